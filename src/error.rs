//! Error types for the runtime core

use thiserror::Error;

use crate::value::{JsString, JsValue};

/// Position inside JSON source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Main error type
///
/// Every variant is a hard failure: nothing retries internally, the error
/// unwinds to the caller and the structures it touched stay consistent.
#[derive(Debug, Error)]
pub enum JsError {
    #[error("SyntaxError: {message}{}", format_location(.location))]
    SyntaxError {
        message: String,
        location: Option<SourceLocation>,
    },

    #[error("TypeError: {message}")]
    TypeError { message: String },

    #[error("RangeError: {message}")]
    RangeError { message: String },

    /// Allocation failure, length overflow or an index past the storage limits
    #[error("RangeError: Out of memory")]
    OutOfMemory,

    /// Stringify met an object already on its holder stack; `path` names the
    /// property that closes the cycle
    #[error("TypeError: Converting circular structure to JSON{path}")]
    CyclicStructure { path: String },

    /// A nesting ceiling of the reviver walk or the stringifier was exceeded
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// A value thrown by a native callback (reviver, replacer, toJSON)
    #[error("Uncaught {}", .0.to_js_string())]
    Thrown(JsValue),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_location(location: &Option<SourceLocation>) -> String {
    match location {
        Some(loc) => format!(" at {}", loc),
        None => String::new(),
    }
}

pub(crate) const CYCLIC_STRUCTURE_MESSAGE: &str = "Converting circular structure to JSON";
pub(crate) const STACK_OVERFLOW_MESSAGE: &str = "Maximum call stack size exceeded";

impl JsError {
    pub fn syntax_error(message: impl Into<String>, line: u32, column: u32) -> Self {
        JsError::SyntaxError {
            message: message.into(),
            location: Some(SourceLocation { line, column }),
        }
    }

    /// Syntax error without a position
    pub fn syntax_error_simple(message: impl Into<String>) -> Self {
        JsError::SyntaxError {
            message: message.into(),
            location: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        JsError::TypeError {
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        JsError::RangeError {
            message: message.into(),
        }
    }

    pub fn out_of_memory() -> Self {
        JsError::OutOfMemory
    }

    /// Cycle found on the stringifier's holder stack; `path` describes how
    /// the cycle closes.
    pub fn cyclic_structure(path: impl Into<String>) -> Self {
        JsError::CyclicStructure { path: path.into() }
    }

    pub fn stack_overflow() -> Self {
        JsError::StackOverflow
    }

    pub fn thrown(value: JsValue) -> Self {
        JsError::Thrown(value)
    }

    /// Create an internal error for states that correct code never reaches
    pub fn internal_error(message: impl Into<String>) -> Self {
        JsError::Internal(message.into())
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, JsError::OutOfMemory)
    }

    pub fn is_cyclic_structure(&self) -> bool {
        matches!(self, JsError::CyclicStructure { .. })
    }

    pub fn is_stack_overflow(&self) -> bool {
        matches!(self, JsError::StackOverflow)
    }

    /// Constructor name of the error a script would catch
    pub fn name(&self) -> &'static str {
        match self {
            JsError::SyntaxError { .. } => "SyntaxError",
            JsError::TypeError { .. } | JsError::CyclicStructure { .. } => "TypeError",
            JsError::RangeError { .. } | JsError::OutOfMemory | JsError::StackOverflow => "RangeError",
            JsError::Thrown(_) => "Error",
            JsError::Internal(_) => "InternalError",
        }
    }

    pub fn is_syntax_error(&self) -> bool {
        matches!(self, JsError::SyntaxError { .. })
    }

    /// Convert this error into the value a script would observe when catching it
    pub fn to_value(&self) -> JsValue {
        match self {
            JsError::Thrown(value) => value.clone(),
            JsError::SyntaxError { message, .. } => {
                JsValue::String(JsString::from(format!("SyntaxError: {}", message)))
            }
            JsError::TypeError { message } => {
                JsValue::String(JsString::from(format!("TypeError: {}", message)))
            }
            JsError::RangeError { message } => {
                JsValue::String(JsString::from(format!("RangeError: {}", message)))
            }
            JsError::CyclicStructure { path } => JsValue::String(JsString::from(format!(
                "TypeError: {}{}",
                CYCLIC_STRUCTURE_MESSAGE, path
            ))),
            JsError::StackOverflow => {
                JsValue::String(JsString::from(format!("RangeError: {}", STACK_OVERFLOW_MESSAGE)))
            }
            JsError::OutOfMemory => JsValue::String(JsString::from("RangeError: Out of memory")),
            JsError::Internal(msg) => {
                JsValue::String(JsString::from(format!("InternalError: {}", msg)))
            }
        }
    }
}
