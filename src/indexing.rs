//! Indexed storage engine
//!
//! An object's indexed properties live in its butterfly in one of several
//! shapes, from cheapest to most general:
//!
//! ```text
//! Blank ─► Undecided ─┬─► Int32 ──┬─► Contiguous ─► ArrayStorage
//!                     └─► Double ─┘
//! ```
//!
//! A write that does not fit the current shape widens it first; widening
//! never reverses. ArrayStorage adds an explicit length and a sparse map for
//! indices that would make the dense vector too wasteful, and is the only
//! shape used once indexed access must be intercepted (non-extensible,
//! sealed and frozen objects, or declared indexed accessors).
//!
//! Elements carry the default attributes unless defined otherwise through
//! [`JsObject::define_own_index`]; those live in a sparse map in sparse mode.

use crate::butterfly::{
    ArrayStorage, BASE_VECTOR_LEN, Butterfly, HOLE_NAN_BITS, MAX_ARRAY_INDEX,
    MAX_STORAGE_VECTOR_LENGTH, MIN_SPARSE_ARRAY_INDEX, SparseArrayEntry, SparseArrayValueMap,
    Slot, index_is_sufficiently_beyond_length_for_sparse_map, is_dense_enough_for_vector,
    next_vector_length,
};
use crate::error::JsError;
use crate::object::{JsObject, PropertyAttributes};
use crate::value::JsValue;

/// Shape of an object's indexed storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexingType {
    /// No indexed storage yet
    #[default]
    Blank,
    /// Storage allocated, no element written
    Undecided,
    Int32,
    Double,
    Contiguous,
    ArrayStorage,
}

impl IndexingType {
    pub fn has_indexed_storage(self) -> bool {
        self != IndexingType::Blank
    }

    /// Position in the widening order; Int32 and Double share a rank
    pub fn generality(self) -> u8 {
        match self {
            IndexingType::Blank => 0,
            IndexingType::Undecided => 1,
            IndexingType::Int32 | IndexingType::Double => 2,
            IndexingType::Contiguous => 3,
            IndexingType::ArrayStorage => 4,
        }
    }

    /// The slot a hole is stored as in this shape
    pub(crate) fn hole_slot(self) -> Slot {
        match self {
            IndexingType::Double => Slot::double_hole(),
            _ => Slot::Empty,
        }
    }

    /// Narrowest shape a first write of `value` fits in
    pub fn for_value(value: &JsValue) -> IndexingType {
        match value {
            JsValue::Int32(_) => IndexingType::Int32,
            JsValue::Double(d) if d.to_bits() != HOLE_NAN_BITS => IndexingType::Double,
            _ => IndexingType::Contiguous,
        }
    }
}

fn missing_storage() -> JsError {
    JsError::internal_error("indexed storage missing for non-blank indexing type")
}

// ============================================================================
// Typed views returned by the ensure_* converters
// ============================================================================

/// Int32 elements. Writes inside the vector extend the public length.
pub struct Int32Elements<'a> {
    butterfly: &'a mut Butterfly,
}

impl Int32Elements<'_> {
    pub fn len(&self) -> u32 {
        self.butterfly.public_length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector_length(&self) -> u32 {
        self.butterfly.vector_length()
    }

    pub fn get(&self, i: u32) -> Option<i32> {
        if i >= self.butterfly.public_length() {
            return None;
        }
        match self.butterfly.slot(i)? {
            Slot::Value(JsValue::Int32(n)) => Some(*n),
            _ => None,
        }
    }

    /// `false` when `i` is outside the vector
    pub fn set(&mut self, i: u32, value: i32) -> bool {
        let Some(slot) = self.butterfly.slot_mut(i) else {
            return false;
        };
        *slot = Slot::Value(JsValue::Int32(value));
        let length = self.butterfly.public_length().max(i + 1);
        self.butterfly.set_public_length(length);
        true
    }
}

/// Double elements; holes read as `None`, NaN is a value
pub struct DoubleElements<'a> {
    butterfly: &'a mut Butterfly,
}

impl DoubleElements<'_> {
    pub fn len(&self) -> u32 {
        self.butterfly.public_length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector_length(&self) -> u32 {
        self.butterfly.vector_length()
    }

    pub fn get(&self, i: u32) -> Option<f64> {
        if i >= self.butterfly.public_length() {
            return None;
        }
        match self.butterfly.slot(i)? {
            Slot::Double(d) if d.to_bits() != HOLE_NAN_BITS => Some(*d),
            _ => None,
        }
    }

    /// `false` when `i` is outside the vector or `value` has the hole bits
    pub fn set(&mut self, i: u32, value: f64) -> bool {
        if value.to_bits() == HOLE_NAN_BITS {
            return false;
        }
        let Some(slot) = self.butterfly.slot_mut(i) else {
            return false;
        };
        *slot = Slot::Double(value);
        let length = self.butterfly.public_length().max(i + 1);
        self.butterfly.set_public_length(length);
        true
    }
}

/// Elements of any type
pub struct ContiguousElements<'a> {
    butterfly: &'a mut Butterfly,
}

impl ContiguousElements<'_> {
    pub fn len(&self) -> u32 {
        self.butterfly.public_length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector_length(&self) -> u32 {
        self.butterfly.vector_length()
    }

    pub fn get(&self, i: u32) -> Option<JsValue> {
        if i >= self.butterfly.public_length() {
            return None;
        }
        self.butterfly.slot(i)?.to_value()
    }

    pub fn set(&mut self, i: u32, value: JsValue) -> bool {
        let Some(slot) = self.butterfly.slot_mut(i) else {
            return false;
        };
        *slot = Slot::Value(value);
        let length = self.butterfly.public_length().max(i + 1);
        self.butterfly.set_public_length(length);
        true
    }
}

/// Read-only view of sparse-capable storage
pub struct ArrayStorageElements<'a> {
    butterfly: &'a Butterfly,
    storage: &'a ArrayStorage,
}

impl ArrayStorageElements<'_> {
    pub fn length(&self) -> u32 {
        self.storage.length
    }

    pub fn vector_length(&self) -> u32 {
        self.butterfly.vector_length()
    }

    pub fn num_values_in_vector(&self) -> u32 {
        self.storage.num_values_in_vector
    }

    pub fn sparse_map(&self) -> Option<&SparseArrayValueMap> {
        self.storage.sparse_map.as_ref()
    }

    pub fn in_sparse_mode(&self) -> bool {
        self.storage.in_sparse_mode()
    }

    pub fn get(&self, i: u32) -> Option<JsValue> {
        array_storage_get(self.butterfly, self.storage, i)
    }
}

fn array_storage_get(butterfly: &Butterfly, storage: &ArrayStorage, i: u32) -> Option<JsValue> {
    if i >= storage.length {
        return None;
    }
    if i < butterfly.vector_length() {
        return butterfly.slot(i)?.to_value();
    }
    storage.sparse_map.as_ref()?.get(i).cloned()
}

// ============================================================================
// The engine
// ============================================================================

impl JsObject {
    pub fn indexing_type(&self) -> IndexingType {
        self.indexing
    }

    pub fn has_indexed_storage(&self) -> bool {
        self.indexing.has_indexed_storage()
    }

    /// Indexed writes must go through the sparse map
    pub fn indexing_should_be_sparse(&self) -> bool {
        !self.extensible || self.intercepts_indexed_accesses
    }

    fn set_indexing(&mut self, to: IndexingType) {
        if self.indexing != to {
            tracing::debug!(target: "jscell::indexing", from = ?self.indexing, to = ?to, "indexing transition");
            self.indexing = to;
        }
    }

    fn butterfly_mut(&mut self) -> Result<&mut Butterfly, JsError> {
        self.butterfly.as_mut().ok_or_else(missing_storage)
    }

    fn storage_mut(&mut self) -> Result<(&mut Butterfly, u32), JsError> {
        let butterfly = self.butterfly_mut()?;
        let vector_length = butterfly.vector_length();
        if butterfly.array_storage().is_none() {
            return Err(missing_storage());
        }
        Ok((butterfly, vector_length))
    }

    /// Own element at `i`, or `None` for a hole
    pub fn get_index(&self, i: u32) -> Option<JsValue> {
        let butterfly = self.butterfly.as_ref()?;
        match self.indexing {
            IndexingType::Blank | IndexingType::Undecided => None,
            IndexingType::Int32 | IndexingType::Double | IndexingType::Contiguous => {
                if i >= butterfly.public_length() {
                    return None;
                }
                butterfly.slot(i)?.to_value()
            }
            IndexingType::ArrayStorage => {
                array_storage_get(butterfly, butterfly.array_storage()?, i)
            }
        }
    }

    pub fn has_index(&self, i: u32) -> bool {
        self.get_index(i).is_some()
    }

    fn sparse_entry(&self, i: u32) -> Option<&SparseArrayEntry> {
        self.butterfly
            .as_ref()?
            .array_storage()?
            .sparse_map
            .as_ref()?
            .entry(i)
    }

    fn in_sparse_mode(&self) -> bool {
        self.butterfly
            .as_ref()
            .and_then(Butterfly::array_storage)
            .is_some_and(ArrayStorage::in_sparse_mode)
    }

    /// Attributes of element `i` with the object's integrity level applied;
    /// `None` when there is no such element
    pub fn index_attributes(&self, i: u32) -> Option<PropertyAttributes> {
        if !self.has_index(i) {
            return None;
        }
        let mut attributes = self
            .sparse_entry(i)
            .map_or(PropertyAttributes::DEFAULT, |entry| entry.attributes);
        if self.sealed {
            attributes.configurable = false;
        }
        if self.frozen {
            attributes.writable = false;
        }
        Some(attributes)
    }

    pub(crate) fn index_is_enumerable(&self, i: u32) -> bool {
        self.sparse_entry(i).is_none_or(|entry| entry.attributes.enumerable)
    }

    /// Length as an array sees it: the public length of dense shapes, the
    /// tracked length of ArrayStorage
    pub fn array_length(&self) -> u32 {
        match (self.indexing, &self.butterfly) {
            (IndexingType::Blank, _) | (_, None) => 0,
            (IndexingType::ArrayStorage, Some(butterfly)) => {
                butterfly.array_storage().map_or(0, |storage| storage.length)
            }
            (_, Some(butterfly)) => butterfly.public_length(),
        }
    }

    /// Non-hole elements
    pub fn count_elements(&self) -> u32 {
        let Some(butterfly) = &self.butterfly else {
            return 0;
        };
        match self.indexing {
            IndexingType::Blank | IndexingType::Undecided => 0,
            IndexingType::Int32 | IndexingType::Double | IndexingType::Contiguous => butterfly
                .vector()
                .iter()
                .take(butterfly.public_length() as usize)
                .filter(|slot| !slot.is_hole())
                .count() as u32,
            IndexingType::ArrayStorage => butterfly.array_storage().map_or(0, |storage| {
                storage.num_values_in_vector + storage.sparse_len() as u32
            }),
        }
    }

    /// Indices of present elements, ascending
    pub fn own_index_keys(&self) -> Vec<u32> {
        let Some(butterfly) = &self.butterfly else {
            return Vec::new();
        };
        let dense_end = match self.indexing {
            IndexingType::Blank | IndexingType::Undecided => return Vec::new(),
            IndexingType::ArrayStorage => butterfly
                .array_storage()
                .map_or(0, |storage| storage.length)
                .min(butterfly.vector_length()),
            _ => butterfly.public_length(),
        };
        let mut keys: Vec<u32> = (0..dense_end)
            .filter(|&i| butterfly.slot(i).is_some_and(|slot| !slot.is_hole()))
            .collect();
        if let Some(map) = butterfly.array_storage().and_then(|s| s.sparse_map.as_ref()) {
            keys.extend(map.sorted_keys());
            keys.sort_unstable();
            keys.dedup();
        }
        keys
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store `value` at index `i`, widening or going sparse as needed.
    ///
    /// `Ok(false)` means the object refused the write (frozen, or a new
    /// element on a non-extensible object). An index past
    /// [`MAX_ARRAY_INDEX`] or a failed allocation is `OutOfMemory`; the
    /// element is then not stored.
    pub fn put_index(&mut self, i: u32, value: JsValue) -> Result<bool, JsError> {
        if i > MAX_ARRAY_INDEX {
            return Err(JsError::out_of_memory());
        }
        loop {
            match self.indexing {
                IndexingType::Blank => {
                    if self.indexing_should_be_sparse() {
                        self.enter_dictionary_indexing_mode()?;
                        return self.put_index_beyond_vector_with_array_storage(i, value);
                    }
                    if index_is_sufficiently_beyond_length_for_sparse_map(i, 0)
                        || i >= MIN_SPARSE_ARRAY_INDEX
                    {
                        self.create_initial_array_storage(0)?;
                        return self.put_index_beyond_vector_with_array_storage(i, value);
                    }
                    self.create_initial_indexed_storage(IndexingType::for_value(&value), i + 1)?;
                }
                IndexingType::Undecided => {
                    self.reserve_dense_index(i)?;
                    self.convert_undecided_for_value(&value);
                }
                IndexingType::Int32 => {
                    if !value.is_int32() {
                        self.reserve_dense_index(i)?;
                        self.convert_int32_for_value(&value);
                        continue;
                    }
                    return self.put_dense(i, Slot::Value(value));
                }
                IndexingType::Double => match value.as_number() {
                    Some(d) if d.to_bits() != HOLE_NAN_BITS => {
                        return self.put_dense(i, Slot::Double(d));
                    }
                    _ => {
                        self.reserve_dense_index(i)?;
                        self.convert_double_to_contiguous();
                    }
                },
                IndexingType::Contiguous => return self.put_dense(i, Slot::Value(value)),
                IndexingType::ArrayStorage => return self.put_index_with_array_storage(i, value),
            }
        }
    }

    /// Store into a dense shape without any widening check.
    ///
    /// Only valid when `i` is inside the vector and `value` fits the current
    /// shape (as the ensure_* views guarantee); returns `false` otherwise.
    pub fn set_index_quickly(&mut self, i: u32, value: JsValue) -> bool {
        let slot = match self.indexing {
            IndexingType::Int32 if value.is_int32() => Slot::Value(value),
            IndexingType::Contiguous => Slot::Value(value),
            IndexingType::Double => match value.as_number() {
                Some(d) if d.to_bits() != HOLE_NAN_BITS => Slot::Double(d),
                _ => return false,
            },
            IndexingType::ArrayStorage => return self.set_array_storage_quickly(i, value),
            _ => return false,
        };
        let Some(butterfly) = self.butterfly.as_mut() else {
            return false;
        };
        let Some(target) = butterfly.slot_mut(i) else {
            return false;
        };
        *target = slot;
        let length = butterfly.public_length().max(i + 1);
        butterfly.set_public_length(length);
        true
    }

    fn set_array_storage_quickly(&mut self, i: u32, value: JsValue) -> bool {
        if !self.extensible || self.frozen {
            return false;
        }
        let Some(butterfly) = self.butterfly.as_mut() else {
            return false;
        };
        let was_hole = match butterfly.slot(i) {
            Some(slot) => slot.is_hole(),
            None => return false,
        };
        if let Some(storage) = butterfly.array_storage_mut() {
            if was_hole {
                storage.num_values_in_vector += 1;
            }
            storage.length = storage.length.max(i + 1);
        }
        if let Some(slot) = butterfly.slot_mut(i) {
            *slot = Slot::Value(value);
        }
        true
    }

    fn put_dense(&mut self, i: u32, slot: Slot) -> Result<bool, JsError> {
        let butterfly = self.butterfly_mut()?;
        if i < butterfly.vector_length() {
            if let Some(target) = butterfly.slot_mut(i) {
                *target = slot;
            }
            let length = butterfly.public_length().max(i + 1);
            butterfly.set_public_length(length);
            return Ok(true);
        }
        self.put_index_beyond_vector_length_without_attributes(i, slot)
    }

    /// A dense-shape write at `i` past the vector goes to the sparse map
    fn dense_write_goes_sparse(&self, i: u32, vector_length: u32) -> bool {
        i >= MAX_ARRAY_INDEX - 1
            || (i >= MIN_SPARSE_ARRAY_INDEX && !is_dense_enough_for_vector(i, self.count_elements()))
            || index_is_sufficiently_beyond_length_for_sparse_map(i, vector_length)
    }

    /// Grow the vector for a dense write at `i` ahead of a shape change, so
    /// a failed allocation leaves the shape as it was
    fn reserve_dense_index(&mut self, i: u32) -> Result<(), JsError> {
        let vector_length = self.butterfly_mut()?.vector_length();
        if i < vector_length || self.dense_write_goes_sparse(i, vector_length) {
            return Ok(());
        }
        self.ensure_length(i + 1)
    }

    fn put_index_beyond_vector_length_without_attributes(
        &mut self,
        i: u32,
        slot: Slot,
    ) -> Result<bool, JsError> {
        let vector_length = self.butterfly_mut()?.vector_length();
        if self.dense_write_goes_sparse(i, vector_length) {
            let value = slot.to_value().unwrap_or_default();
            self.convert_to_array_storage()?;
            let (butterfly, _) = self.storage_mut()?;
            if let Some(storage) = butterfly.array_storage_mut() {
                storage
                    .sparse_map
                    .get_or_insert_with(SparseArrayValueMap::default)
                    .put(i, value);
                storage.length = storage.length.max(i + 1);
            }
            tracing::debug!(target: "jscell::indexing", index = i, "element moved to sparse map");
            return Ok(true);
        }

        self.ensure_length(i + 1)?;
        let butterfly = self.butterfly_mut()?;
        let target = butterfly
            .slot_mut(i)
            .ok_or_else(|| JsError::internal_error("vector shorter than ensured length"))?;
        *target = slot;
        let length = butterfly.public_length().max(i + 1);
        butterfly.set_public_length(length);
        Ok(true)
    }

    fn put_index_with_array_storage(&mut self, i: u32, value: JsValue) -> Result<bool, JsError> {
        let extensible = self.extensible;
        let frozen = self.frozen;
        let (butterfly, vector_length) = self.storage_mut()?;
        if i >= vector_length {
            return self.put_index_beyond_vector_with_array_storage(i, value);
        }

        let was_hole = butterfly.slot(i).is_none_or(Slot::is_hole);
        if was_hole && !extensible {
            return Ok(false);
        }
        if !was_hole && frozen {
            return Ok(false);
        }
        if let Some(storage) = butterfly.array_storage_mut() {
            if was_hole {
                storage.num_values_in_vector += 1;
            }
            storage.length = storage.length.max(i + 1);
        }
        if let Some(slot) = butterfly.slot_mut(i) {
            *slot = Slot::Value(value);
        }
        Ok(true)
    }

    fn put_index_beyond_vector_with_array_storage(
        &mut self,
        i: u32,
        value: JsValue,
    ) -> Result<bool, JsError> {
        let extensible = self.extensible;
        let frozen = self.frozen;
        let (butterfly, vector_length) = self.storage_mut()?;
        let (length, num_values_in_vector, map_state) = match butterfly.array_storage() {
            Some(storage) => (
                storage.length,
                storage.num_values_in_vector,
                storage.sparse_map.as_ref().map(|map| {
                    (
                        map.sparse_mode(),
                        map.entry(i).map(|entry| entry.attributes),
                        map.len() as u32,
                    )
                }),
            ),
            None => return Err(missing_storage()),
        };

        let Some((sparse_mode, existing, map_len)) = map_state else {
            // No sparse map yet: grow the vector if it stays dense enough.
            if !index_is_sufficiently_beyond_length_for_sparse_map(i, vector_length)
                && is_dense_enough_for_vector(i, num_values_in_vector)
                && self.increase_vector_length(i + 1)?
            {
                let (butterfly, _) = self.storage_mut()?;
                if let Some(slot) = butterfly.slot_mut(i) {
                    *slot = Slot::Value(value);
                }
                if let Some(storage) = butterfly.array_storage_mut() {
                    storage.num_values_in_vector += 1;
                    storage.length = storage.length.max(i + 1);
                }
                return Ok(true);
            }
            let (butterfly, _) = self.storage_mut()?;
            if let Some(storage) = butterfly.array_storage_mut() {
                storage
                    .sparse_map
                    .get_or_insert_with(SparseArrayValueMap::default)
                    .put(i, value);
                storage.length = storage.length.max(i + 1);
            }
            tracing::debug!(target: "jscell::indexing", index = i, "sparse map allocated");
            return Ok(true);
        };

        match existing {
            Some(attributes) if frozen || !attributes.writable => return Ok(false),
            None if !extensible => return Ok(false),
            _ => {}
        }
        let new_length = length.max(i + 1);

        // Stay sparse if in dictionary mode or the vector would be too empty.
        let num_values_in_array = num_values_in_vector + map_len;
        if sparse_mode
            || !is_dense_enough_for_vector(new_length, num_values_in_array)
            || !self.increase_vector_length(new_length)?
        {
            let (butterfly, _) = self.storage_mut()?;
            if let Some(storage) = butterfly.array_storage_mut() {
                storage.length = new_length;
                if let Some(map) = storage.sparse_map.as_mut() {
                    map.put(i, value);
                }
            }
            return Ok(true);
        }

        // Dense enough again: move every sparse entry into the vector.
        let (butterfly, _) = self.storage_mut()?;
        let entries: Vec<(u32, JsValue)> = butterfly
            .array_storage_mut()
            .and_then(|storage| storage.sparse_map.take())
            .map(|mut map| map.drain().collect())
            .unwrap_or_default();
        for (index, entry) in entries {
            if let Some(slot) = butterfly.slot_mut(index) {
                *slot = Slot::Value(entry);
            }
        }
        let was_hole = butterfly.slot(i).is_none_or(Slot::is_hole);
        if let Some(slot) = butterfly.slot_mut(i) {
            *slot = Slot::Value(value);
        }
        if let Some(storage) = butterfly.array_storage_mut() {
            storage.num_values_in_vector = num_values_in_array + u32::from(was_hole);
            storage.length = new_length;
        }
        tracing::debug!(target: "jscell::indexing", length = new_length, "sparse map folded back into vector");
        Ok(true)
    }

    /// Grow an ArrayStorage vector to hold `new_length` elements.
    /// `Ok(false)` when the vector would be too large or too sparse.
    fn increase_vector_length(&mut self, new_length: u32) -> Result<bool, JsError> {
        let (butterfly, vector_length) = self.storage_mut()?;
        if new_length > MAX_STORAGE_VECTOR_LENGTH {
            return Ok(false);
        }
        let num_values = butterfly
            .array_storage()
            .map_or(0, |storage| storage.num_values_in_vector);
        if new_length >= MIN_SPARSE_ARRAY_INDEX && !is_dense_enough_for_vector(new_length, num_values) {
            return Ok(false);
        }
        if new_length <= vector_length {
            return Ok(true);
        }
        let target = next_vector_length(vector_length, new_length);
        let out_of_line = butterfly.out_of_line_capacity();
        butterfly.reallocate(out_of_line, target, &Slot::Empty)?;
        Ok(true)
    }

    /// Make the dense vector at least `n` slots long (amortized doubling).
    ///
    /// Does nothing for objects whose elements must stay in the sparse map
    /// (non-extensible, intercepted, or in dictionary mode): a vector there
    /// would shadow the map and accept writes the object has to refuse.
    pub fn ensure_length(&mut self, n: u32) -> Result<(), JsError> {
        if self.indexing_should_be_sparse() || self.in_sparse_mode() {
            return Ok(());
        }
        match self.indexing {
            IndexingType::Blank => {
                return self.create_initial_indexed_storage(IndexingType::Undecided, n);
            }
            IndexingType::ArrayStorage => return self.ensure_array_storage_length(n),
            _ => {}
        }
        if n > MAX_STORAGE_VECTOR_LENGTH {
            return Err(JsError::out_of_memory());
        }
        let hole = self.indexing.hole_slot();
        let butterfly = self.butterfly_mut()?;
        let current = butterfly.vector_length();
        if n <= current {
            return Ok(());
        }
        let target = next_vector_length(current, n);
        let out_of_line = butterfly.out_of_line_capacity();
        butterfly.reallocate(out_of_line, target, &hole)?;
        tracing::trace!(target: "jscell::indexing", from = current, to = target, "vector grown");
        Ok(())
    }

    /// Grow an ArrayStorage vector; sparse entries the vector now covers
    /// move into it so reads keep finding them
    fn ensure_array_storage_length(&mut self, n: u32) -> Result<(), JsError> {
        let (butterfly, current) = self.storage_mut()?;
        if n <= current {
            return Ok(());
        }
        if n > MAX_STORAGE_VECTOR_LENGTH {
            return Err(JsError::out_of_memory());
        }
        let target = next_vector_length(current, n);
        let out_of_line = butterfly.out_of_line_capacity();
        butterfly.reallocate(out_of_line, target, &Slot::Empty)?;

        let mut moved = Vec::new();
        if let Some(map) = butterfly
            .array_storage_mut()
            .and_then(|storage| storage.sparse_map.as_mut())
        {
            for index in map.sorted_keys().into_iter().take_while(|&index| index < target) {
                if let Some(value) = map.remove(index) {
                    moved.push((index, value));
                }
            }
        }
        let count = moved.len() as u32;
        for (index, value) in moved {
            if let Some(slot) = butterfly.slot_mut(index) {
                *slot = Slot::Value(value);
            }
        }
        if let Some(storage) = butterfly.array_storage_mut() {
            storage.num_values_in_vector += count;
            if storage.sparse_map.as_ref().is_some_and(SparseArrayValueMap::is_empty) {
                storage.sparse_map = None;
            }
        }
        tracing::trace!(target: "jscell::indexing", from = current, to = target, moved = count, "array storage vector grown");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attributed definition
    // ------------------------------------------------------------------

    /// Define element `i` with explicit attributes.
    ///
    /// Default attributes take the ordinary write path. Anything else moves
    /// the indexed storage to dictionary mode, where the sparse map keeps
    /// attributes per element. `Ok(false)` when the definition is refused: a
    /// new element on a non-extensible object, or a change to a
    /// non-configurable one.
    pub fn define_own_index(
        &mut self,
        i: u32,
        value: JsValue,
        attributes: PropertyAttributes,
    ) -> Result<bool, JsError> {
        if i > MAX_ARRAY_INDEX {
            return Err(JsError::out_of_memory());
        }
        match self.index_attributes(i) {
            None if !self.extensible => return Ok(false),
            // A non-configurable element only takes a new value, and only
            // when writable
            Some(current) if !current.configurable && !(current.writable && current == attributes) => {
                return Ok(false);
            }
            _ => {}
        }
        if attributes == PropertyAttributes::DEFAULT && !self.in_sparse_mode() {
            return self.put_index(i, value);
        }

        self.enter_dictionary_indexing_mode()?;
        let (butterfly, _) = self.storage_mut()?;
        let storage = butterfly.array_storage_mut().ok_or_else(missing_storage)?;
        storage
            .sparse_map
            .get_or_insert_with(SparseArrayValueMap::default)
            .put_entry(i, SparseArrayEntry { value, attributes });
        storage.length = storage.length.max(i + 1);
        tracing::trace!(target: "jscell::indexing", index = i, ?attributes, "element defined");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Creation and conversion
    // ------------------------------------------------------------------

    /// First indexed storage of the object, with room for `length` elements
    fn create_initial_indexed_storage(
        &mut self,
        shape: IndexingType,
        length: u32,
    ) -> Result<(), JsError> {
        if length > MAX_STORAGE_VECTOR_LENGTH {
            return Err(JsError::out_of_memory());
        }
        let vector_length = length.max(BASE_VECTOR_LEN);
        let hole = shape.hole_slot();
        match self.butterfly.as_mut() {
            Some(butterfly) => {
                let out_of_line = butterfly.out_of_line_capacity();
                butterfly.reallocate(out_of_line, vector_length, &hole)?;
                butterfly.set_public_length(0);
            }
            None => self.butterfly = Some(Butterfly::create(0, vector_length, &hole)?),
        }
        self.set_indexing(shape);
        Ok(())
    }

    fn create_initial_array_storage(&mut self, vector_length: u32) -> Result<(), JsError> {
        match self.butterfly.as_mut() {
            Some(butterfly) => {
                let out_of_line = butterfly.out_of_line_capacity();
                butterfly.reallocate(out_of_line, vector_length, &Slot::Empty)?;
                butterfly.set_public_length(0);
            }
            None => self.butterfly = Some(Butterfly::create(0, vector_length, &Slot::Empty)?),
        }
        if let Some(butterfly) = self.butterfly.as_mut() {
            butterfly.set_array_storage(Some(ArrayStorage::default()));
        }
        self.set_indexing(IndexingType::ArrayStorage);
        Ok(())
    }

    fn convert_undecided_for_value(&mut self, value: &JsValue) {
        let shape = IndexingType::for_value(value);
        if shape == IndexingType::Double {
            if let Some(butterfly) = self.butterfly.as_mut() {
                for slot in butterfly.vector_mut() {
                    *slot = Slot::double_hole();
                }
            }
        }
        self.set_indexing(shape);
    }

    fn convert_int32_for_value(&mut self, value: &JsValue) {
        match value.as_number() {
            Some(d) if d.to_bits() != HOLE_NAN_BITS => self.convert_int32_to_double(),
            _ => self.set_indexing(IndexingType::Contiguous),
        }
    }

    fn convert_int32_to_double(&mut self) {
        if let Some(butterfly) = self.butterfly.as_mut() {
            for slot in butterfly.vector_mut() {
                *slot = match slot {
                    Slot::Value(JsValue::Int32(n)) => Slot::Double(f64::from(*n)),
                    _ => Slot::double_hole(),
                };
            }
        }
        self.set_indexing(IndexingType::Double);
    }

    fn convert_double_to_contiguous(&mut self) {
        if let Some(butterfly) = self.butterfly.as_mut() {
            for slot in butterfly.vector_mut() {
                *slot = match slot.to_value() {
                    Some(value) => Slot::Value(value),
                    None => Slot::Empty,
                };
            }
        }
        self.set_indexing(IndexingType::Contiguous);
    }

    /// Widen any dense shape to ArrayStorage in place
    fn convert_to_array_storage(&mut self) -> Result<(), JsError> {
        match self.indexing {
            IndexingType::ArrayStorage => return Ok(()),
            IndexingType::Blank => return self.create_initial_array_storage(BASE_VECTOR_LEN),
            IndexingType::Double => self.convert_double_to_contiguous(),
            _ => {}
        }
        let butterfly = self.butterfly_mut()?;
        let length = butterfly.public_length();
        let num_values_in_vector = butterfly
            .vector()
            .iter()
            .take(length as usize)
            .filter(|slot| !slot.is_hole())
            .count() as u32;
        butterfly.set_array_storage(Some(ArrayStorage {
            length,
            num_values_in_vector,
            sparse_map: None,
        }));
        self.set_indexing(IndexingType::ArrayStorage);
        Ok(())
    }

    /// ArrayStorage with every element in a sparse map in sparse mode; the
    /// vector is emptied.
    pub(crate) fn enter_dictionary_indexing_mode(&mut self) -> Result<(), JsError> {
        match self.indexing {
            IndexingType::Blank => self.create_initial_array_storage(0)?,
            IndexingType::ArrayStorage => {}
            _ => self.convert_to_array_storage()?,
        }
        let (butterfly, vector_length) = self.storage_mut()?;
        let Some(storage) = butterfly.array_storage() else {
            return Err(missing_storage());
        };
        if storage.in_sparse_mode() {
            return Ok(());
        }

        let mut map = storage.sparse_map.clone().unwrap_or_default();
        for i in 0..storage.length.min(vector_length) {
            if let Some(value) = butterfly.slot(i).and_then(Slot::to_value) {
                map.put(i, value);
            }
        }
        map.set_sparse_mode();
        let out_of_line = butterfly.out_of_line_capacity();
        butterfly.reallocate(out_of_line, 0, &Slot::Empty)?;
        if let Some(storage) = butterfly.array_storage_mut() {
            storage.sparse_map = Some(map);
            storage.num_values_in_vector = 0;
        }
        tracing::debug!(target: "jscell::indexing", "entered dictionary indexing mode");
        Ok(())
    }

    // ------------------------------------------------------------------
    // ensure_* converters
    // ------------------------------------------------------------------

    /// At least Int32; `None` if the shape is already past Int32 (or is
    /// Double) or indexed access is intercepted
    pub fn ensure_int32(&mut self) -> Result<Option<Int32Elements<'_>>, JsError> {
        if self.indexing_should_be_sparse() {
            return Ok(None);
        }
        match self.indexing {
            IndexingType::Blank => self.create_initial_indexed_storage(IndexingType::Int32, 0)?,
            IndexingType::Undecided => self.set_indexing(IndexingType::Int32),
            IndexingType::Int32 => {}
            _ => return Ok(None),
        }
        Ok(self.butterfly.as_mut().map(|butterfly| Int32Elements { butterfly }))
    }

    pub fn ensure_double(&mut self) -> Result<Option<DoubleElements<'_>>, JsError> {
        if self.indexing_should_be_sparse() {
            return Ok(None);
        }
        match self.indexing {
            IndexingType::Blank => self.create_initial_indexed_storage(IndexingType::Double, 0)?,
            IndexingType::Undecided => self.convert_undecided_for_value(&JsValue::Double(0.5)),
            IndexingType::Int32 => self.convert_int32_to_double(),
            IndexingType::Double => {}
            _ => return Ok(None),
        }
        Ok(self.butterfly.as_mut().map(|butterfly| DoubleElements { butterfly }))
    }

    pub fn ensure_contiguous(&mut self) -> Result<Option<ContiguousElements<'_>>, JsError> {
        if self.indexing_should_be_sparse() {
            return Ok(None);
        }
        match self.indexing {
            IndexingType::Blank => {
                self.create_initial_indexed_storage(IndexingType::Contiguous, 0)?
            }
            IndexingType::Undecided | IndexingType::Int32 => {
                self.set_indexing(IndexingType::Contiguous)
            }
            IndexingType::Double => self.convert_double_to_contiguous(),
            IndexingType::Contiguous => {}
            IndexingType::ArrayStorage => return Ok(None),
        }
        Ok(self.butterfly.as_mut().map(|butterfly| ContiguousElements { butterfly }))
    }

    /// ArrayStorage always succeeds; intercepting objects get dictionary mode
    pub fn ensure_array_storage(&mut self) -> Result<ArrayStorageElements<'_>, JsError> {
        if self.indexing_should_be_sparse() {
            self.enter_dictionary_indexing_mode()?;
        } else {
            self.convert_to_array_storage()?;
        }
        let butterfly = self.butterfly.as_ref().ok_or_else(missing_storage)?;
        let storage = butterfly.array_storage().ok_or_else(missing_storage)?;
        Ok(ArrayStorageElements { butterfly, storage })
    }

    // ------------------------------------------------------------------
    // Deletion and length
    // ------------------------------------------------------------------

    /// Turn element `i` into a hole. `false` if the element cannot be
    /// deleted (sealed object).
    pub fn delete_index(&mut self, i: u32) -> bool {
        if self.sealed {
            return !self.has_index(i);
        }
        let indexing = self.indexing;
        let Some(butterfly) = self.butterfly.as_mut() else {
            return true;
        };
        match indexing {
            IndexingType::Blank | IndexingType::Undecided => {}
            IndexingType::Int32 | IndexingType::Double | IndexingType::Contiguous => {
                if i < butterfly.public_length() {
                    if let Some(slot) = butterfly.slot_mut(i) {
                        *slot = indexing.hole_slot();
                    }
                }
            }
            IndexingType::ArrayStorage => {
                if i < butterfly.vector_length() {
                    let was_value = butterfly.slot(i).is_some_and(|slot| !slot.is_hole());
                    if let Some(slot) = butterfly.slot_mut(i) {
                        *slot = Slot::Empty;
                    }
                    if let Some(storage) = butterfly.array_storage_mut() {
                        if was_value {
                            storage.num_values_in_vector -= 1;
                        }
                    }
                } else if let Some(map) = butterfly
                    .array_storage_mut()
                    .and_then(|storage| storage.sparse_map.as_mut())
                {
                    if map.entry(i).is_some_and(|entry| !entry.attributes.configurable) {
                        return false;
                    }
                    map.remove(i);
                }
            }
        }
        true
    }

    /// Array `length` assignment. Shrinking drops elements at or past
    /// `length`; growing adds holes. `Ok(false)` when refused (frozen, or a
    /// sealed array would lose elements).
    pub fn set_length(&mut self, length: u32) -> Result<bool, JsError> {
        let current = self.array_length();
        if self.frozen && length != current {
            return Ok(false);
        }
        if length < current
            && self.own_index_keys().iter().any(|&i| {
                i >= length && self.index_attributes(i).is_some_and(|a| !a.configurable)
            })
        {
            return Ok(false);
        }

        match self.indexing {
            IndexingType::Blank => {
                if length == 0 {
                    return Ok(true);
                }
                if length >= MIN_SPARSE_ARRAY_INDEX || self.indexing_should_be_sparse() {
                    self.ensure_array_storage()?;
                    self.set_array_storage_length(length)?;
                } else {
                    self.create_initial_indexed_storage(IndexingType::Undecided, length)?;
                    self.butterfly_mut()?.set_public_length(length);
                }
            }
            IndexingType::ArrayStorage => self.set_array_storage_length(length)?,
            shape => {
                let butterfly = self.butterfly_mut()?;
                let public_length = butterfly.public_length();
                if length <= public_length {
                    for i in length..public_length {
                        if let Some(slot) = butterfly.slot_mut(i) {
                            *slot = shape.hole_slot();
                        }
                    }
                    butterfly.set_public_length(length);
                } else if length <= butterfly.vector_length() {
                    butterfly.set_public_length(length);
                } else if length > MAX_STORAGE_VECTOR_LENGTH
                    || (length >= MIN_SPARSE_ARRAY_INDEX
                        && !is_dense_enough_for_vector(length, self.count_elements()))
                {
                    self.convert_to_array_storage()?;
                    self.set_array_storage_length(length)?;
                } else {
                    self.ensure_length(length)?;
                    self.butterfly_mut()?.set_public_length(length);
                }
            }
        }
        Ok(true)
    }

    fn set_array_storage_length(&mut self, length: u32) -> Result<(), JsError> {
        let (butterfly, vector_length) = self.storage_mut()?;
        let current = butterfly.array_storage().map_or(0, |storage| storage.length);
        if length < current {
            let mut removed = 0;
            for i in length..current.min(vector_length) {
                if let Some(slot) = butterfly.slot_mut(i) {
                    if !slot.is_hole() {
                        removed += 1;
                    }
                    *slot = Slot::Empty;
                }
            }
            if let Some(storage) = butterfly.array_storage_mut() {
                storage.num_values_in_vector -= removed;
                if let Some(map) = storage.sparse_map.as_mut() {
                    map.truncate(length);
                }
            }
        }
        if let Some(storage) = butterfly.array_storage_mut() {
            storage.length = length;
        }
        Ok(())
    }

    /// Append at `array_length()`
    pub fn push(&mut self, value: JsValue) -> Result<(), JsError> {
        let length = self.array_length();
        if self.put_index(length, value)? {
            Ok(())
        } else {
            Err(JsError::type_error(format!(
                "Cannot add property {}, object is not extensible",
                length
            )))
        }
    }
}
