//! JavaScript value representation
//!
//! The tagged `JsValue` plus the numeric and string conversions the storage
//! engine and the JSON code need.

use std::fmt;
use std::rc::Rc;

use crate::gc::{Gc, Traceable};
use crate::object::{ExoticObject, JsObjectRef};

pub use crate::string::JsString;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// This makes it explicit at the call site when a clone is just a reference
/// count bump rather than a copy of the underlying data.
pub trait CheapClone: Clone {
    /// Same as `clone()`, spelled so readers know it is O(1)
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

impl<T: Traceable> CheapClone for Gc<T> {}

impl CheapClone for JsValue {}

/// A JavaScript value
///
/// Numbers that are integral and fit in 32 bits are kept as `Int32`; every
/// other number is a `Double`. The two compare equal when numerically equal.
#[derive(Clone, Default)]
pub enum JsValue {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Double(f64),
    String(JsString),
    Object(JsObjectRef),
}

impl JsValue {
    /// Canonical number: `Int32` when exactly representable, `Double` otherwise.
    /// Negative zero stays a double.
    pub fn number(n: f64) -> Self {
        let truncated = n as i32;
        if f64::from(truncated) == n && !(n == 0.0 && n.is_sign_negative()) {
            JsValue::Int32(truncated)
        } else {
            JsValue::Double(n)
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, JsValue::Null | JsValue::Undefined)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, JsValue::Int32(_) | JsValue::Double(_))
    }

    pub fn is_int32(&self) -> bool {
        matches!(self, JsValue::Int32(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, JsValue::String(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, JsValue::Object(_))
    }

    /// The numeric payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Int32(i) => Some(f64::from(*i)),
            JsValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JsObjectRef> {
        match self {
            JsValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&JsString> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this value is callable (a function)
    pub fn is_callable(&self) -> bool {
        match self {
            JsValue::Object(obj) => obj.borrow().is_callable(),
            _ => false,
        }
    }

    pub fn is_array(&self) -> bool {
        match self {
            JsValue::Object(obj) => obj.borrow().is_array(),
            _ => false,
        }
    }

    /// Get the typeof result for this value
    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "object",
            JsValue::Boolean(_) => "boolean",
            JsValue::Int32(_) | JsValue::Double(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Object(obj) => {
                if obj.borrow().is_callable() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    /// Convert to boolean (ToBoolean)
    pub fn to_boolean(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Boolean(b) => *b,
            JsValue::Int32(i) => *i != 0,
            JsValue::Double(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Object(_) => true,
        }
    }

    /// Convert to number (ToNumber) without invoking user code
    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Boolean(true) => 1.0,
            JsValue::Boolean(false) => 0.0,
            JsValue::Int32(i) => f64::from(*i),
            JsValue::Double(n) => *n,
            JsValue::String(s) => s
                .to_rust_string()
                .map(|s| string_to_number(&s))
                .unwrap_or(f64::NAN),
            JsValue::Object(obj) => match &obj.borrow().exotic {
                ExoticObject::NumberObject(n) => *n,
                ExoticObject::BooleanObject(b) => f64::from(u8::from(*b)),
                ExoticObject::StringObject(s) => s
                    .to_rust_string()
                    .map(|s| string_to_number(&s))
                    .unwrap_or(f64::NAN),
                _ => f64::NAN,
            },
        }
    }

    /// Convert to string (ToString) without invoking user code
    pub fn to_js_string(&self) -> JsString {
        match self {
            JsValue::Undefined => JsString::from("undefined"),
            JsValue::Null => JsString::from("null"),
            JsValue::Boolean(true) => JsString::from("true"),
            JsValue::Boolean(false) => JsString::from("false"),
            JsValue::Int32(i) => JsString::from(i.to_string()),
            JsValue::Double(n) => JsString::from(number_to_string(*n)),
            JsValue::String(s) => s.cheap_clone(),
            JsValue::Object(obj) => match &obj.borrow().exotic {
                ExoticObject::StringObject(s) => s.cheap_clone(),
                ExoticObject::NumberObject(n) => JsString::from(number_to_string(*n)),
                ExoticObject::BooleanObject(b) => JsString::from(if *b { "true" } else { "false" }),
                ExoticObject::Function(func) => {
                    JsString::from(format!("function {}() {{ [native code] }}", func.name))
                }
                ExoticObject::Array | ExoticObject::Ordinary => JsString::from("[object Object]"),
            },
        }
    }

    /// Strict equality (===)
    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) => true,
            (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::Int32(a), JsValue::Int32(b)) => a == b,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => Gc::ptr_eq(a, b),
            (a, b) => match (a.as_number(), b.as_number()) {
                // NaN !== NaN falls out of IEEE comparison
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

/// ECMAScript StringToNumber for the subset of literals JSON and array
/// indices produce, plus hex and the Infinity keywords.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust also accepts "inf", "nan" and "infinity"; JavaScript does not
    if trimmed
        .bytes()
        .any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E')
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// ECMAScript Number::toString(10)
///
/// Uses the shortest round-tripping digits and then lays them out with the
/// decimal/exponential rules of the language.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let mut buffer = ryu::Buffer::new();
    let formatted = buffer.format_finite(n.abs());
    let (digits, point) = decimal_digits(formatted);
    let k = digits.len() as i64;

    let mut out = String::with_capacity(digits.len() + 8);
    if n < 0.0 {
        out.push('-');
    }
    if k <= point && point <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat_n('0', (point - k) as usize));
    } else if 0 < point && point <= 21 {
        let (int_part, frac_part) = digits.split_at(point as usize);
        out.push_str(int_part);
        out.push('.');
        out.push_str(frac_part);
    } else if -6 < point && point <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-point) as usize));
        out.push_str(&digits);
    } else {
        let exponent = point - 1;
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        out.push('e');
        out.push(if exponent >= 0 { '+' } else { '-' });
        out.push_str(&exponent.abs().to_string());
    }
    out
}

/// Split ryu output into significant digits and the decimal point position
/// `n` such that the value is `0.digits * 10^n`.
fn decimal_digits(formatted: &str) -> (String, i64) {
    let (mantissa, exponent) = match formatted.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i64>().unwrap_or(0)),
        None => (formatted, 0),
    };
    let int_len = mantissa.find('.').unwrap_or(mantissa.len()) as i64;
    let all: String = mantissa.chars().filter(|c| *c != '.').collect();

    let leading = all.len() - all.trim_start_matches('0').len();
    let digits = all.trim_start_matches('0').trim_end_matches('0').to_string();
    (digits, int_len - leading as i64 + exponent)
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "undefined"),
            JsValue::Null => write!(f, "null"),
            JsValue::Boolean(b) => write!(f, "{}", b),
            JsValue::Int32(i) => write!(f, "{}", i),
            JsValue::Double(n) => write!(f, "{}", number_to_string(*n)),
            JsValue::String(s) => write!(f, "{:?}", s),
            JsValue::Object(obj) => match obj.try_borrow() {
                Some(obj) => match &obj.exotic {
                    ExoticObject::Ordinary => write!(f, "{{...}}"),
                    ExoticObject::Array => write!(f, "[...]"),
                    ExoticObject::Function(func) => write!(f, "[Function: {}]", func.name),
                    ExoticObject::BooleanObject(b) => write!(f, "[Boolean: {}]", b),
                    ExoticObject::NumberObject(n) => {
                        write!(f, "[Number: {}]", number_to_string(*n))
                    }
                    ExoticObject::StringObject(s) => write!(f, "[String: {:?}]", s),
                },
                None => write!(f, "<borrowed object>"),
            },
        }
    }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

// Conversions from Rust types

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Boolean(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::number(n)
    }
}

impl From<i32> for JsValue {
    fn from(n: i32) -> Self {
        JsValue::Int32(n)
    }
}

impl From<u32> for JsValue {
    fn from(n: u32) -> Self {
        JsValue::number(f64::from(n))
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(JsString::from(s))
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(JsString::from(s))
    }
}

impl From<JsString> for JsValue {
    fn from(s: JsString) -> Self {
        JsValue::String(s)
    }
}

impl From<JsObjectRef> for JsValue {
    fn from(obj: JsObjectRef) -> Self {
        JsValue::Object(obj)
    }
}
