//! Heap objects
//!
//! A `JsObject` stores named properties in a property table that maps each
//! key to a storage offset. The first [`INLINE_CAPACITY`] offsets live in the
//! object itself; later ones live in the butterfly's out-of-line region.
//! Indexed properties are handled by the storage engine in `indexing.rs`.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::butterfly::{Butterfly, INITIAL_OUT_OF_LINE_CAPACITY};
use crate::error::JsError;
use crate::gc::{Gc, GcPtr, Reset, Traceable};
use crate::indexing::IndexingType;
use crate::runtime::Runtime;
use crate::value::{CheapClone, JsString, JsValue};

/// Property slots stored directly in the object
pub const INLINE_CAPACITY: usize = 4;

/// Reference to a heap-allocated object (GC-managed)
pub type JsObjectRef = Gc<JsObject>;

/// Native function signature: `(runtime, this, args)`
pub type NativeFn = Rc<dyn Fn(&mut Runtime, &JsValue, &[JsValue]) -> Result<JsValue, JsError>>;

/// Native function wrapper
#[derive(Clone)]
pub struct NativeFunction {
    pub name: JsString,
    pub func: NativeFn,
    pub arity: usize,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Exotic object behavior
#[derive(Debug, Clone, Default)]
pub enum ExoticObject {
    #[default]
    Ordinary,
    Array,
    Function(NativeFunction),
    BooleanObject(bool),
    NumberObject(f64),
    StringObject(JsString),
}

/// Property key: canonical array indices are kept apart from names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Index(u32),
    String(JsString),
}

impl PropertyKey {
    pub fn from_value(value: &JsValue) -> Self {
        match value {
            JsValue::Int32(i) => match u32::try_from(*i) {
                Ok(index) => PropertyKey::Index(index),
                Err(_) => PropertyKey::String(value.to_js_string()),
            },
            JsValue::String(s) => PropertyKey::from(s.cheap_clone()),
            _ => PropertyKey::from(value.to_js_string()),
        }
    }

    /// The key as the string a replacer or reviver sees
    pub fn to_js_string(&self) -> JsString {
        match self {
            PropertyKey::Index(i) => JsString::from(i.to_string()),
            PropertyKey::String(s) => s.cheap_clone(),
        }
    }

    /// Check if this key equals a string literal
    pub fn eq_str(&self, s: &str) -> bool {
        match self {
            PropertyKey::String(js_str) => js_str.eq_str(s),
            PropertyKey::Index(i) => i.to_string() == s,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::from(JsString::from(s))
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        PropertyKey::from(s.as_str())
    }
}

impl From<JsString> for PropertyKey {
    fn from(s: JsString) -> Self {
        match s.as_array_index() {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::String(s),
        }
    }
}

impl From<u32> for PropertyKey {
    fn from(index: u32) -> Self {
        PropertyKey::Index(index)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(s) => write!(f, "{}", s),
            PropertyKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Attributes of a named data property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAttributes {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyAttributes {
    pub const DEFAULT: PropertyAttributes = PropertyAttributes {
        writable: true,
        enumerable: true,
        configurable: true,
    };

    pub const HIDDEN: PropertyAttributes = PropertyAttributes {
        writable: true,
        enumerable: false,
        configurable: true,
    };

    pub const READ_ONLY: PropertyAttributes = PropertyAttributes {
        writable: false,
        enumerable: true,
        configurable: true,
    };
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        PropertyAttributes::DEFAULT
    }
}

#[derive(Debug, Clone, Copy)]
struct PropertyEntry {
    offset: usize,
    attributes: PropertyAttributes,
}

/// A JavaScript object
#[derive(Debug)]
pub struct JsObject {
    pub exotic: ExoticObject,
    pub(crate) indexing: IndexingType,
    /// Out-of-line property slots and indexed elements
    pub(crate) butterfly: Option<Butterfly>,
    inline_slots: [JsValue; INLINE_CAPACITY],
    properties: IndexMap<JsString, PropertyEntry, FxBuildHasher>,
    free_offsets: Vec<usize>,
    next_offset: usize,
    pub(crate) extensible: bool,
    pub(crate) sealed: bool,
    pub(crate) frozen: bool,
    /// Indexed reads and writes must take the sparse path
    pub(crate) intercepts_indexed_accesses: bool,
}

impl JsObject {
    /// Create a new ordinary object
    pub fn new() -> Self {
        Self {
            exotic: ExoticObject::Ordinary,
            indexing: IndexingType::Blank,
            butterfly: None,
            inline_slots: Default::default(),
            properties: IndexMap::default(),
            free_offsets: Vec::new(),
            next_offset: 0,
            extensible: true,
            sealed: false,
            frozen: false,
            intercepts_indexed_accesses: false,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.exotic, ExoticObject::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.exotic, ExoticObject::Array)
    }

    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn butterfly(&self) -> Option<&Butterfly> {
        self.butterfly.as_ref()
    }

    // ------------------------------------------------------------------
    // Keyed access: indices go to the indexed storage engine
    // ------------------------------------------------------------------

    pub fn get_own(&self, key: &PropertyKey) -> Option<JsValue> {
        match key {
            PropertyKey::Index(i) => self.get_index(*i),
            PropertyKey::String(name) => self.get_named(name),
        }
    }

    /// Ordinary [[Set]] on an own property. `Ok(false)` when the write is
    /// rejected (read-only, frozen, or new key on a non-extensible object).
    pub fn put(&mut self, key: PropertyKey, value: JsValue) -> Result<bool, JsError> {
        match key {
            PropertyKey::Index(i) => self.put_index(i, value),
            PropertyKey::String(name) => self.put_named(name, value),
        }
    }

    pub fn has_own(&self, key: &PropertyKey) -> bool {
        match key {
            PropertyKey::Index(i) => self.has_index(*i),
            PropertyKey::String(name) => self.properties.contains_key(name),
        }
    }

    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match key {
            PropertyKey::Index(i) => self.delete_index(*i),
            PropertyKey::String(name) => self.delete_named(name),
        }
    }

    /// Own enumerable keys: indices ascending, then names in insertion order
    pub fn own_enumerable_keys(&self) -> Vec<PropertyKey> {
        let mut keys: Vec<PropertyKey> = self
            .own_index_keys()
            .into_iter()
            .filter(|&i| self.index_is_enumerable(i))
            .map(PropertyKey::Index)
            .collect();
        keys.extend(
            self.properties
                .iter()
                .filter(|(_, entry)| entry.attributes.enumerable)
                .map(|(name, _)| PropertyKey::String(name.cheap_clone())),
        );
        keys
    }

    // ------------------------------------------------------------------
    // Named properties
    // ------------------------------------------------------------------

    pub fn get_named(&self, name: &JsString) -> Option<JsValue> {
        let entry = self.properties.get(name)?;
        self.read_offset(entry.offset)
    }

    /// Convenience lookup by Rust string; index-like names read elements
    pub fn get_str(&self, key: &str) -> Option<JsValue> {
        self.get_own(&PropertyKey::from(key))
    }

    pub fn named_attributes(&self, name: &JsString) -> Option<PropertyAttributes> {
        self.properties.get(name).map(|entry| entry.attributes)
    }

    pub fn named_property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn put_named(&mut self, name: JsString, value: JsValue) -> Result<bool, JsError> {
        if let Some(entry) = self.properties.get(&name).copied() {
            if self.frozen || !entry.attributes.writable {
                return Ok(false);
            }
            self.write_offset(entry.offset, value);
            return Ok(true);
        }
        if !self.extensible {
            return Ok(false);
        }
        self.add_named(name, value, PropertyAttributes::DEFAULT)?;
        Ok(true)
    }

    /// Define or redefine a property with explicit attributes; array-index
    /// names define elements
    pub fn define_own(
        &mut self,
        name: JsString,
        value: JsValue,
        attributes: PropertyAttributes,
    ) -> Result<bool, JsError> {
        if let Some(index) = name.as_array_index() {
            return self.define_own_index(index, value, attributes);
        }
        if let Some(entry) = self.properties.get_mut(&name) {
            if !entry.attributes.configurable {
                return Ok(false);
            }
            entry.attributes = attributes;
            let offset = entry.offset;
            self.write_offset(offset, value);
            return Ok(true);
        }
        if !self.extensible {
            return Ok(false);
        }
        self.add_named(name, value, attributes)?;
        Ok(true)
    }

    fn delete_named(&mut self, name: &JsString) -> bool {
        let Some(entry) = self.properties.get(name).copied() else {
            return true;
        };
        if self.sealed || !entry.attributes.configurable {
            return false;
        }
        self.properties.shift_remove(name);
        self.clear_offset(entry.offset);
        self.free_offsets.push(entry.offset);
        true
    }

    fn add_named(
        &mut self,
        name: JsString,
        value: JsValue,
        attributes: PropertyAttributes,
    ) -> Result<(), JsError> {
        let offset = match self.free_offsets.pop() {
            Some(offset) => offset,
            None => {
                let offset = self.next_offset;
                self.ensure_offset_capacity(offset)?;
                self.next_offset += 1;
                offset
            }
        };
        self.write_offset(offset, value);
        self.properties.insert(name, PropertyEntry { offset, attributes });
        Ok(())
    }

    /// Make sure `offset` has a slot, growing the out-of-line region if needed
    fn ensure_offset_capacity(&mut self, offset: usize) -> Result<(), JsError> {
        let Some(k) = offset.checked_sub(INLINE_CAPACITY) else {
            return Ok(());
        };
        match &mut self.butterfly {
            None => {
                self.butterfly = Some(Butterfly::create(
                    INITIAL_OUT_OF_LINE_CAPACITY.max(k + 1),
                    0,
                    &self.indexing.hole_slot(),
                )?);
            }
            Some(butterfly) if k >= butterfly.out_of_line_capacity() => {
                let capacity = (butterfly.out_of_line_capacity() * 2)
                    .max(INITIAL_OUT_OF_LINE_CAPACITY)
                    .max(k + 1);
                let vector_length = butterfly.vector_length();
                butterfly.reallocate(capacity, vector_length, &self.indexing.hole_slot())?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn read_offset(&self, offset: usize) -> Option<JsValue> {
        if offset < INLINE_CAPACITY {
            self.inline_slots.get(offset).cloned()
        } else {
            self.butterfly
                .as_ref()?
                .out_of_line(offset - INLINE_CAPACITY)
                .cloned()
        }
    }

    fn write_offset(&mut self, offset: usize, value: JsValue) {
        if offset < INLINE_CAPACITY {
            if let Some(slot) = self.inline_slots.get_mut(offset) {
                *slot = value;
            }
        } else if let Some(butterfly) = self.butterfly.as_mut() {
            butterfly.set_out_of_line(offset - INLINE_CAPACITY, value);
        }
    }

    fn clear_offset(&mut self, offset: usize) {
        if offset < INLINE_CAPACITY {
            if let Some(slot) = self.inline_slots.get_mut(offset) {
                *slot = JsValue::Undefined;
            }
        } else if let Some(butterfly) = self.butterfly.as_mut() {
            butterfly.clear_out_of_line(offset - INLINE_CAPACITY);
        }
    }

    // ------------------------------------------------------------------
    // Integrity levels
    // ------------------------------------------------------------------

    /// Forbid new properties. Indexed storage moves to dictionary mode so
    /// every further indexed write goes through the sparse map.
    pub fn prevent_extensions(&mut self) -> Result<(), JsError> {
        if self.has_indexed_storage() {
            self.enter_dictionary_indexing_mode()?;
        }
        self.extensible = false;
        Ok(())
    }

    pub fn seal(&mut self) -> Result<(), JsError> {
        self.prevent_extensions()?;
        for entry in self.properties.values_mut() {
            entry.attributes.configurable = false;
        }
        self.sealed = true;
        Ok(())
    }

    pub fn freeze(&mut self) -> Result<(), JsError> {
        self.seal()?;
        for entry in self.properties.values_mut() {
            entry.attributes.writable = false;
        }
        self.frozen = true;
        Ok(())
    }

    /// Declare that indexed access on this object must be intercepted
    /// (custom indexed getters/setters)
    pub fn notify_presence_of_indexed_accessors(&mut self) -> Result<(), JsError> {
        if self.intercepts_indexed_accesses {
            return Ok(());
        }
        self.intercepts_indexed_accesses = true;
        if self.has_indexed_storage() {
            self.enter_dictionary_indexing_mode()?;
        }
        Ok(())
    }

    fn for_each_value(&self, mut f: impl FnMut(&JsValue)) {
        for value in &self.inline_slots {
            f(value);
        }
        if let Some(butterfly) = &self.butterfly {
            butterfly.for_each_value(&mut f);
        }
    }
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Pooled cells come back as empty ordinary objects.
impl Reset for JsObject {
    fn reset(&mut self) {
        self.exotic = ExoticObject::Ordinary;
        self.indexing = IndexingType::Blank;
        self.butterfly = None;
        self.inline_slots = Default::default();
        self.properties.clear();
        self.free_offsets.clear();
        self.next_offset = 0;
        self.extensible = true;
        self.sealed = false;
        self.frozen = false;
        self.intercepts_indexed_accesses = false;
    }
}

impl Traceable for JsObject {
    fn trace<F: FnMut(GcPtr<Self>)>(&self, mut visitor: F) {
        self.for_each_value(|value| {
            if let JsValue::Object(obj) = value {
                visitor(obj.copy_ref());
            }
        });
    }
}
