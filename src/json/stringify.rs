//! `JSON.stringify`
//!
//! Containers are serialized from an explicit holder stack. Every frame owns
//! the container, a snapshot of what it will visit (array length or key list)
//! and the position of the next member. A value that turns out to be a
//! container pushes a frame instead of recursing; the drain loop then visits
//! its members until the frame is exhausted and closes it.

use std::fmt::Write as _;

use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;

use crate::error::JsError;
use crate::gc::Gc;
use crate::object::{ExoticObject, JsObjectRef, PropertyKey};
use crate::runtime::Runtime;
use crate::string::{CodeUnits, JsString};
use crate::value::{CheapClone, JsValue, number_to_string};

/// Longest indentation unit, in code units
pub const MAX_GAP_LENGTH: usize = 10;

/// `JSON.stringify(value, replacer, space)`
///
/// Returns `undefined` when the top-level value has no JSON representation.
pub fn stringify(
    rt: &mut Runtime,
    value: &JsValue,
    replacer: &JsValue,
    space: &JsValue,
) -> Result<JsValue, JsError> {
    let mut stringifier = Stringifier::new(rt, replacer, space);
    match stringifier.stringify(value)? {
        Some(text) => Ok(JsValue::String(JsString::from(text))),
        None => Ok(JsValue::Undefined),
    }
}

struct Holder {
    object: JsObjectRef,
    is_array: bool,
    /// Key the container was reached under
    key: PropertyKey,
    index: usize,
    size: usize,
    /// Snapshotted member names (objects only)
    keys: Vec<PropertyKey>,
    has_members: bool,
}

enum Appended {
    Value,
    /// A frame was pushed; its members are emitted by the drain loop
    Container,
    /// No representation: omitted from objects, `null` in arrays
    Undefined,
}

pub struct Stringifier<'rt> {
    rt: &'rt mut Runtime,
    replacer_function: Option<JsValue>,
    property_list: Option<Vec<PropertyKey>>,
    gap: String,
    indent_cache: String,
    holders: Vec<Holder>,
    max_depth: usize,
}

impl<'rt> Stringifier<'rt> {
    pub fn new(rt: &'rt mut Runtime, replacer: &JsValue, space: &JsValue) -> Self {
        let (replacer_function, property_list) = match replacer {
            JsValue::Object(obj) if obj.borrow().is_callable() => (Some(replacer.clone()), None),
            JsValue::Object(obj) if obj.borrow().is_array() => (None, Some(property_list(obj))),
            _ => (None, None),
        };
        let max_depth = rt.config().max_stringify_depth;
        Self {
            rt,
            replacer_function,
            property_list,
            gap: compute_gap(space),
            indent_cache: String::new(),
            holders: Vec::new(),
            max_depth,
        }
    }

    /// Serialize `value`; `None` when it has no JSON representation
    pub fn stringify(&mut self, value: &JsValue) -> Result<Option<String>, JsError> {
        let wrapper = self.rt.create_object()?;
        let root_key = PropertyKey::String(JsString::empty());
        wrapper.borrow_mut().put(root_key.clone(), value.clone())?;

        let mut out = String::new();
        let result = self.append_stringified_value(&mut out, value.clone(), &wrapper, &root_key);
        let appended = match result {
            Ok(appended) => appended,
            Err(err) => {
                self.holders.clear();
                return Err(err);
            }
        };
        match appended {
            Appended::Undefined => Ok(None),
            Appended::Value => Ok(Some(out)),
            Appended::Container => match self.drain_holders(&mut out) {
                Ok(()) => Ok(Some(out)),
                Err(err) => {
                    self.holders.clear();
                    Err(err)
                }
            },
        }
    }

    fn drain_holders(&mut self, out: &mut String) -> Result<(), JsError> {
        while let Some(holder) = self.holders.last_mut() {
            if holder.index >= holder.size {
                let close = if holder.is_array { ']' } else { '}' };
                let has_members = holder.has_members;
                self.holders.pop();
                if has_members && !self.gap.is_empty() {
                    out.push('\n');
                    self.append_indent(out, self.holders.len());
                }
                out.push(close);
                continue;
            }

            let is_array = holder.is_array;
            let key = if is_array {
                let index = u32::try_from(holder.index).map_err(|_| JsError::out_of_memory())?;
                PropertyKey::Index(index)
            } else {
                match holder.keys.get(holder.index) {
                    Some(key) => key.clone(),
                    None => return Err(JsError::internal_error("stringify key snapshot out of range")),
                }
            };
            holder.index += 1;
            let object = holder.object.clone();
            let first = !holder.has_members;
            let depth = self.holders.len();

            let rollback = out.len();
            if !first {
                out.push(',');
            }
            if !self.gap.is_empty() {
                out.push('\n');
                self.append_indent(out, depth);
            }
            if !is_array {
                append_quoted(out, &key.to_js_string())?;
                out.push(':');
                if !self.gap.is_empty() {
                    out.push(' ');
                }
            }

            let value = object.borrow().get_own(&key).unwrap_or(JsValue::Undefined);
            match self.append_stringified_value(out, value, &object, &key)? {
                Appended::Undefined if is_array => out.push_str("null"),
                Appended::Undefined => {
                    out.truncate(rollback);
                    continue;
                }
                Appended::Value | Appended::Container => {}
            }
            if let Some(parent) = self.holders.get_mut(depth - 1) {
                parent.has_members = true;
            }
        }
        Ok(())
    }

    fn append_stringified_value(
        &mut self,
        out: &mut String,
        value: JsValue,
        holder: &JsObjectRef,
        key: &PropertyKey,
    ) -> Result<Appended, JsError> {
        let mut value = value;

        if let JsValue::Object(obj) = &value {
            let to_json = obj.borrow().get_str("toJSON");
            if let Some(to_json) = to_json.filter(JsValue::is_callable) {
                let key_value = JsValue::String(key.to_js_string());
                value = self.rt.call(&to_json, &value, &[key_value])?;
            }
        }

        if let Some(replacer) = self.replacer_function.clone() {
            let args = [JsValue::String(key.to_js_string()), value];
            value = self.rt.call(&replacer, &JsValue::Object(holder.clone()), &args)?;
        }

        match unboxed(&value) {
            JsValue::Undefined => return Ok(Appended::Undefined),
            JsValue::Null => out.push_str("null"),
            JsValue::Boolean(true) => out.push_str("true"),
            JsValue::Boolean(false) => out.push_str("false"),
            JsValue::Int32(i) => {
                let _ = write!(out, "{}", i);
            }
            JsValue::Double(n) if n.is_finite() => out.push_str(&number_to_string(n)),
            JsValue::Double(_) => out.push_str("null"),
            JsValue::String(s) => append_quoted(out, &s)?,
            JsValue::Object(obj) => {
                if obj.borrow().is_callable() {
                    return Ok(Appended::Undefined);
                }
                self.start_holder(out, obj, key)?;
                return Ok(Appended::Container);
            }
        }
        Ok(Appended::Value)
    }

    fn start_holder(&mut self, out: &mut String, object: JsObjectRef, key: &PropertyKey) -> Result<(), JsError> {
        if let Some(start) = self.holders.iter().position(|h| Gc::ptr_eq(&h.object, &object)) {
            tracing::debug!(target: "jscell::json", depth = self.holders.len(), "cyclic structure");
            return Err(JsError::cyclic_structure(self.cycle_path(start, key)));
        }
        if self.holders.len() >= self.max_depth {
            tracing::debug!(target: "jscell::json", depth = self.holders.len(), "stringify depth ceiling reached");
            return Err(JsError::stack_overflow());
        }

        let (is_array, size, keys) = {
            let obj = object.borrow();
            if obj.is_array() {
                (true, obj.array_length() as usize, Vec::new())
            } else {
                let keys = match &self.property_list {
                    Some(list) => list.clone(),
                    None => obj.own_enumerable_keys(),
                };
                (false, keys.len(), keys)
            }
        };
        out.push(if is_array { '[' } else { '{' });
        self.holders.push(Holder {
            object,
            is_array,
            key: key.clone(),
            index: 0,
            size,
            keys,
            has_members: false,
        });
        Ok(())
    }

    /// Describe how the cycle closes, starting at the frame `start`
    fn cycle_path(&self, start: usize, closing_key: &PropertyKey) -> String {
        let mut path = String::new();
        let mut frames = self.holders.iter().skip(start);
        if let Some(first) = frames.next() {
            let _ = write!(path, "\n    --> starting at object with constructor '{}'", constructor_name(first));
        }
        for frame in frames {
            let _ = write!(
                path,
                "\n    |     {} -> object with constructor '{}'",
                describe_key(&frame.key),
                constructor_name(frame)
            );
        }
        let _ = write!(path, "\n    --- {} closes the circle", describe_key(closing_key));
        path
    }

    fn append_indent(&mut self, out: &mut String, level: usize) {
        let needed = self.gap.len() * level;
        while self.indent_cache.len() < needed {
            self.indent_cache.push_str(&self.gap);
        }
        if let Some(indent) = self.indent_cache.get(..needed) {
            out.push_str(indent);
        }
    }
}

fn constructor_name(holder: &Holder) -> &'static str {
    if holder.is_array { "Array" } else { "Object" }
}

fn describe_key(key: &PropertyKey) -> String {
    match key {
        PropertyKey::Index(i) => format!("index {}", i),
        PropertyKey::String(name) => format!("property '{}'", name),
    }
}

/// Number, String and Boolean wrappers serialize as their primitive
fn unboxed(value: &JsValue) -> JsValue {
    if let JsValue::Object(obj) = value {
        match &obj.borrow().exotic {
            ExoticObject::NumberObject(n) => return JsValue::number(*n),
            ExoticObject::StringObject(s) => return JsValue::String(s.cheap_clone()),
            ExoticObject::BooleanObject(b) => return JsValue::Boolean(*b),
            _ => {}
        }
    }
    value.clone()
}

/// Allow-list from a replacer array: strings and numbers, first occurrence wins
fn property_list(array: &JsObjectRef) -> Vec<PropertyKey> {
    let mut names: IndexSet<JsString, FxBuildHasher> = IndexSet::default();
    let array = array.borrow();
    for i in 0..array.array_length() {
        let item = unboxed(&array.get_index(i).unwrap_or(JsValue::Undefined));
        match item {
            JsValue::String(s) => {
                names.insert(s);
            }
            JsValue::Int32(_) | JsValue::Double(_) => {
                names.insert(item.to_js_string());
            }
            _ => {}
        }
    }
    names.into_iter().map(PropertyKey::from).collect()
}

fn compute_gap(space: &JsValue) -> String {
    match unboxed(space) {
        JsValue::Int32(n) => " ".repeat(n.clamp(0, MAX_GAP_LENGTH as i32) as usize),
        JsValue::Double(n) if n.is_nan() => String::new(),
        JsValue::Double(n) => " ".repeat(n.trunc().clamp(0.0, MAX_GAP_LENGTH as f64) as usize),
        JsValue::String(s) => match s.to_utf16() {
            Ok(units) => String::from_utf16_lossy(units.get(..MAX_GAP_LENGTH).unwrap_or(&units)),
            Err(_) => String::new(),
        },
        _ => String::new(),
    }
}

/// Append `s` as a JSON string literal. Lone surrogates are escaped so the
/// output stays well-formed.
pub(crate) fn append_quoted(out: &mut String, s: &JsString) -> Result<(), JsError> {
    s.with_code_units(|units| {
        out.push('"');
        match units {
            CodeUnits::Latin1(bytes) => {
                for &b in bytes {
                    append_escaped_char(out, char::from(b));
                }
            }
            CodeUnits::Utf16(units) => {
                for decoded in char::decode_utf16(units.iter().copied()) {
                    match decoded {
                        Ok(c) => append_escaped_char(out, c),
                        Err(err) => {
                            let _ = write!(out, "\\u{:04x}", err.unpaired_surrogate());
                        }
                    }
                }
            }
        }
        out.push('"');
    })
}

fn append_escaped_char(out: &mut String, c: char) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        '\u{8}' => out.push_str("\\b"),
        '\u{c}' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c < ' ' => {
            let _ = write!(out, "\\u{:04x}", u32::from(c));
        }
        c => out.push(c),
    }
}
