//! Core runtime data model of a JavaScript engine
//!
//! Tagged values, objects with butterfly-backed indexed storage, rope strings
//! and JSON serialization over live values.
//!
//! # Example
//!
//! ```
//! use jscell::{JsValue, Runtime};
//!
//! let mut runtime = Runtime::new();
//! let value = runtime.json_parse(r#"{"a": [1, 2.5, "x"]}"#, None).unwrap();
//! let text = runtime
//!     .json_stringify(&value, &JsValue::Undefined, &JsValue::Undefined)
//!     .unwrap();
//! assert_eq!(text.to_js_string().to_string(), r#"{"a":[1,2.5,"x"]}"#);
//! ```

pub mod butterfly;
pub mod config;
pub mod error;
pub mod gc;
pub mod indexing;
pub mod json;
pub mod lock;
pub mod object;
pub mod runtime;
pub mod string;
pub mod value;

pub use config::RuntimeConfig;
pub use error::JsError;
pub use gc::{Gc, GcStats, Guard, Heap};
pub use indexing::IndexingType;
pub use lock::{DropAllLocks, ExecutionLock, JsLockGuard};
pub use object::{ExoticObject, JsObject, JsObjectRef, PropertyAttributes, PropertyKey};
pub use runtime::Runtime;
pub use string::{JsString, RopeBuilder, concat, concat3};
pub use value::{CheapClone, JsValue};
