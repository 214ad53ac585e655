//! Integration tests for the runtime core, organized by feature
//!
//! These tests exercise the crate through the public API.
//!
//! ## Aggressive Test Defaults
//!
//! Tests use aggressive defaults to catch bugs early:
//! - `GC_THRESHOLD=1` - GC on every allocation to catch GC bugs
//!
//! Override via environment variables:
//!
//! ```bash
//! cargo test                           # Default: aggressive settings
//! GC_THRESHOLD=100 cargo test          # Less aggressive GC for faster runs
//! ```

mod gc;
mod indexing;
mod lock;
mod parse;
mod reviver;
mod rope;

use jscell::{JsError, JsObjectRef, JsValue, Runtime, RuntimeConfig};

/// Create a runtime with aggressive defaults for testing:
/// - GC_THRESHOLD=1 (GC on every allocation) to catch GC bugs
pub fn create_test_runtime() -> Runtime {
    Runtime::with_config(test_config())
}

pub fn test_config() -> RuntimeConfig {
    // GC_THRESHOLD=0 disables automatic GC
    let gc_threshold = std::env::var("GC_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);
    RuntimeConfig::default().with_gc_threshold(gc_threshold)
}

/// Parse JSON text without a reviver
#[allow(clippy::expect_used)]
pub fn parse(rt: &mut Runtime, text: &str) -> JsValue {
    rt.json_parse(text, None).expect("parse failed")
}

/// Stringify with no replacer and no indentation; `None` for `undefined`
pub fn stringify(rt: &mut Runtime, value: &JsValue) -> Result<Option<String>, JsError> {
    stringify_with(rt, value, &JsValue::Undefined, &JsValue::Undefined)
}

pub fn stringify_with(
    rt: &mut Runtime,
    value: &JsValue,
    replacer: &JsValue,
    space: &JsValue,
) -> Result<Option<String>, JsError> {
    match rt.json_stringify(value, replacer, space)? {
        JsValue::Undefined => Ok(None),
        other => Ok(Some(other.to_js_string().to_string())),
    }
}

/// Native function returning its second argument (the shape of a reviver or
/// replacer that changes nothing)
#[allow(clippy::expect_used)]
pub fn identity_function(rt: &mut Runtime) -> JsValue {
    let f = rt
        .create_function("identity", 2, |_, _, args| {
            Ok(args.get(1).cloned().unwrap_or(JsValue::Undefined))
        })
        .expect("allocation failed");
    JsValue::Object(f)
}

/// Build `{k0: v0, k1: v1, ...}`
#[allow(clippy::expect_used)]
pub fn object_from(rt: &mut Runtime, entries: &[(&str, JsValue)]) -> JsObjectRef {
    let obj = rt.create_object().expect("allocation failed");
    for (key, value) in entries {
        rt.set(&obj, *key, value.clone()).expect("set failed");
    }
    obj
}
