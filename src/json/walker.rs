//! Reviver walk for `JSON.parse`
//!
//! Children are revived before their holders. Instead of recursing, the walk
//! keeps parallel stacks (arrays, objects, per-level index, per-object key
//! snapshot) and a stack of resume states that says where to continue once
//! the value currently being revived is finished.

use crate::error::JsError;
use crate::object::{JsObjectRef, PropertyKey};
use crate::runtime::Runtime;
use crate::string::JsString;
use crate::value::JsValue;

/// Resume points of the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    /// Classify `in_value`: primitive, array or object
    StateUnknown,
    ArrayStartState,
    ArrayStartVisitMember,
    ArrayEndVisitMember,
    ObjectStartState,
    ObjectStartVisitMember,
    ObjectEndVisitMember,
}

/// Run `reviver` over `unfiltered` bottom-up, then once more on a synthetic
/// root holder under the empty key.
///
/// Members for which the reviver returns `undefined` are deleted; any other
/// result replaces the member. Nesting deeper than `max_reviver_depth` is a
/// `StackOverflow` error. Revivals applied before an error stay applied.
pub fn walk(rt: &mut Runtime, unfiltered: JsValue, reviver: &JsValue) -> Result<JsValue, JsError> {
    let max_depth = rt.config().max_reviver_depth;

    let mut property_stack: Vec<Vec<PropertyKey>> = Vec::new();
    let mut index_stack: Vec<u32> = Vec::new();
    let mut object_stack: Vec<JsObjectRef> = Vec::new();
    let mut array_stack: Vec<JsObjectRef> = Vec::new();
    let mut state_stack: Vec<WalkerState> = Vec::new();

    let mut state = WalkerState::StateUnknown;
    let mut in_value = unfiltered;
    let mut out_value = JsValue::Null;

    loop {
        // `Some` jumps straight to a state; `None` resumes from `state_stack`.
        let next = match state {
            WalkerState::ArrayStartState => {
                if object_stack.len() + array_stack.len() >= max_depth {
                    tracing::debug!(target: "jscell::json", max_depth, "reviver depth ceiling reached");
                    return Err(JsError::stack_overflow());
                }
                array_stack.push(expect_object(&in_value)?);
                index_stack.push(0);
                Some(WalkerState::ArrayStartVisitMember)
            }
            WalkerState::ArrayStartVisitMember => {
                let array = peek(&array_stack)?;
                let index = peek_index(&index_stack)?;
                let length = array.borrow().array_length();
                if index >= length {
                    out_value = JsValue::Object(array);
                    array_stack.pop();
                    index_stack.pop();
                    None
                } else {
                    in_value = array.borrow().get_index(index).unwrap_or(JsValue::Undefined);
                    if in_value.is_object() {
                        state_stack.push(WalkerState::ArrayEndVisitMember);
                        Some(WalkerState::StateUnknown)
                    } else {
                        out_value = in_value.clone();
                        Some(WalkerState::ArrayEndVisitMember)
                    }
                }
            }
            WalkerState::ArrayEndVisitMember => {
                let array = peek(&array_stack)?;
                let key = PropertyKey::Index(peek_index(&index_stack)?);
                let filtered = call_reviver(rt, reviver, &array, &key, out_value.clone())?;
                apply(&array, key, filtered)?;
                advance(&mut index_stack);
                Some(WalkerState::ArrayStartVisitMember)
            }
            WalkerState::ObjectStartState => {
                if object_stack.len() + array_stack.len() >= max_depth {
                    tracing::debug!(target: "jscell::json", max_depth, "reviver depth ceiling reached");
                    return Err(JsError::stack_overflow());
                }
                let object = expect_object(&in_value)?;
                property_stack.push(object.borrow().own_enumerable_keys());
                object_stack.push(object);
                index_stack.push(0);
                Some(WalkerState::ObjectStartVisitMember)
            }
            WalkerState::ObjectStartVisitMember => {
                let object = peek(&object_stack)?;
                let index = peek_index(&index_stack)?;
                match current_key(&property_stack, index) {
                    None => {
                        out_value = JsValue::Object(object);
                        object_stack.pop();
                        index_stack.pop();
                        property_stack.pop();
                        None
                    }
                    Some(key) => {
                        in_value = object.borrow().get_own(&key).unwrap_or(JsValue::Undefined);
                        if in_value.is_object() {
                            state_stack.push(WalkerState::ObjectEndVisitMember);
                            Some(WalkerState::StateUnknown)
                        } else {
                            out_value = in_value.clone();
                            Some(WalkerState::ObjectEndVisitMember)
                        }
                    }
                }
            }
            WalkerState::ObjectEndVisitMember => {
                let object = peek(&object_stack)?;
                let index = peek_index(&index_stack)?;
                let key = current_key(&property_stack, index)
                    .ok_or_else(|| JsError::internal_error("reviver key snapshot out of range"))?;
                let filtered = call_reviver(rt, reviver, &object, &key, out_value.clone())?;
                apply(&object, key, filtered)?;
                advance(&mut index_stack);
                Some(WalkerState::ObjectStartVisitMember)
            }
            WalkerState::StateUnknown => match &in_value {
                JsValue::Object(obj) if obj.borrow().is_array() => Some(WalkerState::ArrayStartState),
                JsValue::Object(_) => Some(WalkerState::ObjectStartState),
                _ => {
                    out_value = in_value.clone();
                    None
                }
            },
        };

        match next {
            Some(next) => state = next,
            None => match state_stack.pop() {
                Some(resume) => state = resume,
                None => break,
            },
        }
    }

    let root = rt.create_object()?;
    let root_key = PropertyKey::String(JsString::empty());
    root.borrow_mut().put(root_key.clone(), out_value.clone())?;
    call_reviver(rt, reviver, &root, &root_key, out_value)
}

fn call_reviver(
    rt: &mut Runtime,
    reviver: &JsValue,
    holder: &JsObjectRef,
    key: &PropertyKey,
    value: JsValue,
) -> Result<JsValue, JsError> {
    let args = [JsValue::String(key.to_js_string()), value];
    rt.call(reviver, &JsValue::Object(holder.clone()), &args)
}

/// `undefined` deletes the member, anything else overwrites it
fn apply(holder: &JsObjectRef, key: PropertyKey, filtered: JsValue) -> Result<(), JsError> {
    let mut holder = holder.borrow_mut();
    if filtered.is_undefined() {
        holder.delete(&key);
    } else {
        holder.put(key, filtered)?;
    }
    Ok(())
}

fn expect_object(value: &JsValue) -> Result<JsObjectRef, JsError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| JsError::internal_error("reviver walk expected an object"))
}

fn peek(stack: &[JsObjectRef]) -> Result<JsObjectRef, JsError> {
    stack
        .last()
        .cloned()
        .ok_or_else(|| JsError::internal_error("reviver holder stack underflow"))
}

fn peek_index(stack: &[u32]) -> Result<u32, JsError> {
    stack
        .last()
        .copied()
        .ok_or_else(|| JsError::internal_error("reviver index stack underflow"))
}

fn advance(stack: &mut [u32]) {
    if let Some(index) = stack.last_mut() {
        *index += 1;
    }
}

fn current_key(property_stack: &[Vec<PropertyKey>], index: u32) -> Option<PropertyKey> {
    property_stack.last()?.get(index as usize).cloned()
}
