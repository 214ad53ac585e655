//! Butterfly storage
//!
//! One allocation backs both of an object's out-of-line named-property slots
//! and its indexed elements. The slot array is split at
//! `out_of_line_capacity`: named-property slot `k` lives at
//! `out_of_line_capacity - 1 - k` (growing backward, away from the split),
//! element `i` lives at `out_of_line_capacity + i` (growing forward).
//!
//! Reallocation builds the whole replacement array before anything is moved,
//! so a failed allocation leaves the old butterfly untouched.

use rustc_hash::FxHashMap;

use crate::error::JsError;
use crate::object::PropertyAttributes;
use crate::value::JsValue;

/// Bit pattern marking an absent element in double storage.
///
/// A quiet NaN with a payload arithmetic never produces; the canonical NaN
/// (`0x7ff8_0000_0000_0000`) and every other NaN remain storable values.
pub const HOLE_NAN_BITS: u64 = 0x7ff8_dead_beef_0001;

/// Indices at or beyond this are only stored densely when the vector stays dense
pub const MIN_SPARSE_ARRAY_INDEX: u32 = 10_000;

/// A write this far past the current vector goes to the sparse map
pub const MIN_BEYOND_LENGTH_SPARSE_INDEX: u32 = 1_000;

/// A vector must have at least one value per this many slots
pub const MIN_DENSITY_MULTIPLIER: u32 = 8;

/// Initial vector length of fresh indexed storage
pub const BASE_VECTOR_LEN: u32 = 4;

/// Largest valid array index (2^32 - 2)
pub const MAX_ARRAY_INDEX: u32 = u32::MAX - 1;

/// Largest dense vector; beyond this elements live in the sparse map
pub const MAX_STORAGE_VECTOR_LENGTH: u32 = (u32::MAX - 16) / 8;

/// Out-of-line property capacity of the first butterfly that needs one
pub const INITIAL_OUT_OF_LINE_CAPACITY: usize = 4;

/// `length / 8 <= num_values`
pub fn is_dense_enough_for_vector(length: u32, num_values: u32) -> bool {
    length / MIN_DENSITY_MULTIPLIER <= num_values
}

pub fn index_is_sufficiently_beyond_length_for_sparse_map(i: u32, vector_length: u32) -> bool {
    u64::from(i) > u64::from(vector_length) + u64::from(MIN_BEYOND_LENGTH_SPARSE_INDEX)
}

/// Amortized growth: at least double, at least `desired`, never past the cap
pub fn next_vector_length(current: u32, desired: u32) -> u32 {
    current
        .saturating_mul(2)
        .max(desired)
        .max(BASE_VECTOR_LEN)
        .min(MAX_STORAGE_VECTOR_LENGTH)
}

/// One storage cell
#[derive(Clone, Debug, Default)]
pub enum Slot {
    /// Hole in value storage, unused property slot
    #[default]
    Empty,
    Value(JsValue),
    /// Double storage; `HOLE_NAN_BITS` marks a hole
    Double(f64),
}

impl Slot {
    pub fn double_hole() -> Slot {
        Slot::Double(f64::from_bits(HOLE_NAN_BITS))
    }

    pub fn is_hole(&self) -> bool {
        match self {
            Slot::Empty => true,
            Slot::Value(_) => false,
            Slot::Double(d) => d.to_bits() == HOLE_NAN_BITS,
        }
    }

    pub fn to_value(&self) -> Option<JsValue> {
        match self {
            Slot::Empty => None,
            Slot::Value(v) => Some(v.clone()),
            Slot::Double(d) if d.to_bits() == HOLE_NAN_BITS => None,
            Slot::Double(d) => Some(JsValue::Double(*d)),
        }
    }
}

/// One element held in the sparse map
#[derive(Clone, Debug)]
pub struct SparseArrayEntry {
    pub value: JsValue,
    pub attributes: PropertyAttributes,
}

impl SparseArrayEntry {
    pub fn new(value: JsValue) -> Self {
        Self {
            value,
            attributes: PropertyAttributes::DEFAULT,
        }
    }
}

/// Index → entry map for elements that do not live in the dense vector.
///
/// Only a map in sparse mode holds entries with non-default attributes; the
/// dense vector has nowhere to keep them.
#[derive(Clone, Debug, Default)]
pub struct SparseArrayValueMap {
    entries: FxHashMap<u32, SparseArrayEntry>,
    /// Dictionary mode: every element lives here and the vector stays empty
    sparse_mode: bool,
}

impl SparseArrayValueMap {
    pub fn get(&self, index: u32) -> Option<&JsValue> {
        self.entries.get(&index).map(|entry| &entry.value)
    }

    pub fn entry(&self, index: u32) -> Option<&SparseArrayEntry> {
        self.entries.get(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    /// Store a value, keeping the attributes of an existing entry
    pub fn put(&mut self, index: u32, value: JsValue) -> Option<JsValue> {
        match self.entries.get_mut(&index) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                self.entries.insert(index, SparseArrayEntry::new(value));
                None
            }
        }
    }

    pub fn put_entry(&mut self, index: u32, entry: SparseArrayEntry) {
        self.entries.insert(index, entry);
    }

    pub fn remove(&mut self, index: u32) -> Option<JsValue> {
        self.entries.remove(&index).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sparse_mode(&self) -> bool {
        self.sparse_mode
    }

    pub fn set_sparse_mode(&mut self) {
        self.sparse_mode = true;
    }

    /// Keys in ascending order
    pub fn sorted_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Drop every entry at or above `length`
    pub fn truncate(&mut self, length: u32) {
        self.entries.retain(|&index, _| index < length);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (u32, JsValue)> + '_ {
        self.entries.drain().map(|(index, entry)| (index, entry.value))
    }

    pub fn values(&self) -> impl Iterator<Item = &JsValue> {
        self.entries.values().map(|entry| &entry.value)
    }
}

/// Header extension for the sparse-capable representation
#[derive(Clone, Debug, Default)]
pub struct ArrayStorage {
    /// Logical length (one past the highest index, or as set)
    pub length: u32,
    /// Non-hole slots inside the vector
    pub num_values_in_vector: u32,
    pub sparse_map: Option<SparseArrayValueMap>,
}

impl ArrayStorage {
    pub fn in_sparse_mode(&self) -> bool {
        self.sparse_map.as_ref().is_some_and(SparseArrayValueMap::sparse_mode)
    }

    pub fn sparse_len(&self) -> usize {
        self.sparse_map.as_ref().map_or(0, SparseArrayValueMap::len)
    }
}

/// The two-directional slot array plus its header
#[derive(Debug, Default)]
pub struct Butterfly {
    slots: Box<[Slot]>,
    out_of_line_capacity: usize,
    public_length: u32,
    vector_length: u32,
    array_storage: Option<ArrayStorage>,
}

#[cfg(test)]
thread_local! {
    /// Makes the next slot allocation on this thread fail
    pub(crate) static FAIL_NEXT_ALLOCATION: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

fn try_alloc_slots(len: usize, hole: &Slot) -> Result<Vec<Slot>, JsError> {
    #[cfg(test)]
    if FAIL_NEXT_ALLOCATION.with(|fail| fail.replace(false)) {
        return Err(JsError::out_of_memory());
    }
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(len)
        .map_err(|_| JsError::out_of_memory())?;
    slots.resize(len, hole.clone());
    Ok(slots)
}

impl Butterfly {
    /// Fresh butterfly; every indexed slot starts as `hole`
    pub fn create(
        out_of_line_capacity: usize,
        vector_length: u32,
        hole: &Slot,
    ) -> Result<Butterfly, JsError> {
        if vector_length > MAX_STORAGE_VECTOR_LENGTH {
            return Err(JsError::out_of_memory());
        }
        let total = out_of_line_capacity
            .checked_add(vector_length as usize)
            .ok_or_else(JsError::out_of_memory)?;
        let mut slots = try_alloc_slots(total, hole)?;
        for slot in slots.iter_mut().take(out_of_line_capacity) {
            *slot = Slot::Empty;
        }
        Ok(Butterfly {
            slots: slots.into_boxed_slice(),
            out_of_line_capacity,
            public_length: 0,
            vector_length,
            array_storage: None,
        })
    }

    /// Replace the slot array with one of the given capacities.
    ///
    /// Property slot `k` keeps its distance from the split, elements keep
    /// their index; new indexed slots are filled with `hole`. Shrinking the
    /// vector drops the elements past the new end.
    pub fn reallocate(
        &mut self,
        out_of_line_capacity: usize,
        vector_length: u32,
        hole: &Slot,
    ) -> Result<(), JsError> {
        if vector_length > MAX_STORAGE_VECTOR_LENGTH || out_of_line_capacity < self.out_of_line_capacity {
            return Err(JsError::out_of_memory());
        }
        let total = out_of_line_capacity
            .checked_add(vector_length as usize)
            .ok_or_else(JsError::out_of_memory)?;
        let mut slots = try_alloc_slots(total, hole)?;

        // Nothing below can fail; the old array is only consumed from here on.
        let old_split = self.out_of_line_capacity;
        let mut old = std::mem::take(&mut self.slots).into_vec();
        let shift = out_of_line_capacity - old_split;
        for (k, slot) in old.drain(..).enumerate() {
            let keep = k < old_split || k - old_split < vector_length as usize;
            if let Some(dst) = slots.get_mut(k + shift).filter(|_| keep) {
                *dst = slot;
            }
        }
        for slot in slots.iter_mut().take(shift) {
            *slot = Slot::Empty;
        }

        tracing::trace!(
            target: "jscell::indexing",
            out_of_line_capacity,
            vector_length,
            "butterfly reallocated"
        );
        self.slots = slots.into_boxed_slice();
        self.out_of_line_capacity = out_of_line_capacity;
        self.vector_length = vector_length;
        self.public_length = self.public_length.min(vector_length);
        Ok(())
    }

    pub fn out_of_line_capacity(&self) -> usize {
        self.out_of_line_capacity
    }

    pub fn public_length(&self) -> u32 {
        self.public_length
    }

    pub fn set_public_length(&mut self, length: u32) {
        self.public_length = length.min(self.vector_length);
    }

    pub fn vector_length(&self) -> u32 {
        self.vector_length
    }

    pub fn array_storage(&self) -> Option<&ArrayStorage> {
        self.array_storage.as_ref()
    }

    pub fn array_storage_mut(&mut self) -> Option<&mut ArrayStorage> {
        self.array_storage.as_mut()
    }

    pub fn set_array_storage(&mut self, storage: Option<ArrayStorage>) {
        self.array_storage = storage;
    }

    fn out_of_line_position(&self, k: usize) -> Option<usize> {
        self.out_of_line_capacity.checked_sub(k + 1)
    }

    pub fn out_of_line(&self, k: usize) -> Option<&JsValue> {
        match self.slots.get(self.out_of_line_position(k)?)? {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn set_out_of_line(&mut self, k: usize, value: JsValue) -> bool {
        let Some(position) = self.out_of_line_position(k) else {
            return false;
        };
        match self.slots.get_mut(position) {
            Some(slot) => {
                *slot = Slot::Value(value);
                true
            }
            None => false,
        }
    }

    pub fn clear_out_of_line(&mut self, k: usize) {
        if let Some(slot) = self
            .out_of_line_position(k)
            .and_then(|position| self.slots.get_mut(position))
        {
            *slot = Slot::Empty;
        }
    }

    /// The indexed region, `vector_length` slots
    pub fn vector(&self) -> &[Slot] {
        self.slots.get(self.out_of_line_capacity..).unwrap_or(&[])
    }

    pub fn vector_mut(&mut self) -> &mut [Slot] {
        let split = self.out_of_line_capacity;
        self.slots.get_mut(split..).unwrap_or(&mut [])
    }

    pub fn slot(&self, i: u32) -> Option<&Slot> {
        self.vector().get(i as usize)
    }

    pub fn slot_mut(&mut self, i: u32) -> Option<&mut Slot> {
        self.vector_mut().get_mut(i as usize)
    }

    /// Visit every value this butterfly holds: property slots, elements and
    /// sparse entries. Double slots hold no references and are skipped.
    pub fn for_each_value(&self, mut f: impl FnMut(&JsValue)) {
        for slot in self.slots.iter() {
            if let Slot::Value(v) = slot {
                f(v);
            }
        }
        if let Some(map) = self.array_storage.as_ref().and_then(|s| s.sparse_map.as_ref()) {
            for v in map.values() {
                f(v);
            }
        }
    }

    /// Bytes held outside the owning cell
    pub fn allocation_size(&self) -> usize {
        self.slots.len() * std::mem::size_of::<Slot>()
            + self.array_storage.as_ref().map_or(0, |s| {
                s.sparse_len() * (std::mem::size_of::<u32>() + std::mem::size_of::<SparseArrayEntry>())
            })
    }
}
