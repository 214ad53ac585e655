//! Tests for the JSON.parse reviver walk

use std::cell::RefCell;
use std::rc::Rc;

use super::{create_test_runtime, identity_function, stringify, test_config};
use jscell::{JsError, JsValue, Runtime};

fn reviver<F>(rt: &mut Runtime, f: F) -> JsValue
where
    F: Fn(&JsValue, &str, JsValue) -> Result<JsValue, JsError> + 'static,
{
    let func = rt
        .create_function("reviver", 2, move |_, this, args| {
            let key = args.first().map(|k| k.to_js_string().to_string()).unwrap_or_default();
            let value = args.get(1).cloned().unwrap_or(JsValue::Undefined);
            f(this, &key, value)
        })
        .unwrap();
    JsValue::Object(func)
}

#[test]
fn test_undefined_deletes_member() {
    let mut rt = create_test_runtime();
    let r = reviver(&mut rt, |_, key, value| {
        Ok(if key == "b" { JsValue::Undefined } else { value })
    });
    let value = rt.json_parse(r#"{"a":1,"b":2}"#, Some(&r)).unwrap();
    assert_eq!(stringify(&mut rt, &value).unwrap().as_deref(), Some(r#"{"a":1}"#));
}

#[test]
fn test_undefined_in_array_leaves_hole() {
    let mut rt = create_test_runtime();
    let r = reviver(&mut rt, |_, key, value| {
        Ok(if key == "1" { JsValue::Undefined } else { value })
    });
    let value = rt.json_parse("[1,2,3]", Some(&r)).unwrap();
    let array = value.as_object().unwrap().borrow();
    assert_eq!(array.array_length(), 3);
    assert_eq!(array.get_index(1), None);
}

#[test]
fn test_values_are_replaced_bottom_up() {
    let mut rt = create_test_runtime();
    let r = reviver(&mut rt, |_, _, value| {
        Ok(match value {
            JsValue::Int32(n) => JsValue::Int32(n + 1),
            other => other,
        })
    });
    let value = rt.json_parse(r#"{"a":[1,{"b":2}],"c":3}"#, Some(&r)).unwrap();
    assert_eq!(
        stringify(&mut rt, &value).unwrap().as_deref(),
        Some(r#"{"a":[2,{"b":3}],"c":4}"#)
    );
}

#[test]
fn test_root_is_revived_last_with_empty_key() {
    let mut rt = create_test_runtime();
    let keys = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&keys);
    let r = reviver(&mut rt, move |this, key, value| {
        log.borrow_mut().push(key.to_string());
        if key.is_empty() {
            let holder = this.as_object().unwrap().borrow();
            assert!(holder.get_str("").is_some());
            return Ok(JsValue::from("replaced root"));
        }
        Ok(value)
    });
    let value = rt.json_parse("[[1],2]", Some(&r)).unwrap();
    assert_eq!(value, JsValue::from("replaced root"));
    assert_eq!(*keys.borrow(), ["0", "0", "1", ""]);
}

#[test]
fn test_scalar_root_gets_one_call() {
    let mut rt = create_test_runtime();
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let r = reviver(&mut rt, move |_, _, value| {
        *counter.borrow_mut() += 1;
        Ok(value)
    });
    assert_eq!(rt.json_parse("7", Some(&r)).unwrap(), JsValue::Int32(7));
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn test_non_callable_reviver_is_ignored() {
    let mut rt = create_test_runtime();
    let value = rt.json_parse("[1]", Some(&JsValue::Int32(3))).unwrap();
    assert!(value.is_array());
}

#[test]
fn test_reviver_error_stops_the_walk() {
    let mut rt = create_test_runtime();
    let keys = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&keys);
    let r = reviver(&mut rt, move |_, key, value| {
        log.borrow_mut().push(key.to_string());
        if key == "b" {
            return Err(JsError::thrown(JsValue::from("stop")));
        }
        Ok(value)
    });
    let err = rt.json_parse(r#"{"a":1,"b":2,"c":3}"#, Some(&r)).unwrap_err();
    assert_eq!(err.to_value(), JsValue::from("stop"));
    assert_eq!(*keys.borrow(), ["a", "b"]);
}

#[test]
fn test_depth_ceiling_is_stack_overflow() {
    let mut rt = Runtime::with_config(test_config().with_max_reviver_depth(8));
    let r = identity_function(&mut rt);
    let ok = format!("{}1{}", "[".repeat(8), "]".repeat(8));
    assert!(rt.json_parse(&ok, Some(&r)).is_ok());
    let deep = format!("{}1{}", "[".repeat(9), "]".repeat(9));
    let err = rt.json_parse(&deep, Some(&r)).unwrap_err();
    assert!(err.is_stack_overflow());
}

fn object_chain(rt: &mut Runtime, depth: usize) -> JsValue {
    let mut value = JsValue::Int32(0);
    for _ in 0..depth {
        let obj = rt.create_object().unwrap();
        rt.set(&obj, "next", value).unwrap();
        value = JsValue::Object(obj);
    }
    value
}

#[test]
fn test_walk_handles_deep_graphs_iteratively() {
    // Default threshold: collecting on every allocation would make this quadratic.
    let mut rt = Runtime::new();
    let value = object_chain(&mut rt, 30_000);
    let r = identity_function(&mut rt);
    assert!(jscell::json::walk(&mut rt, value, &r).is_ok());

    let mut limited = Runtime::with_config(jscell::RuntimeConfig::default().with_max_reviver_depth(1000));
    let value = object_chain(&mut limited, 2000);
    let r = identity_function(&mut limited);
    let err = jscell::json::walk(&mut limited, value, &r).unwrap_err();
    assert!(err.is_stack_overflow());
}
