//! Tests for JSON.parse

use super::{create_test_runtime, parse, stringify};
use jscell::{IndexingType, JsString, JsValue, Runtime, RuntimeConfig};

#[test]
fn test_scalars() {
    let mut rt = create_test_runtime();
    assert_eq!(parse(&mut rt, "null"), JsValue::Null);
    assert_eq!(parse(&mut rt, " true "), JsValue::Boolean(true));
    assert_eq!(parse(&mut rt, "-12"), JsValue::Int32(-12));
    assert_eq!(parse(&mut rt, "1.25e2"), JsValue::Int32(125));
    assert_eq!(parse(&mut rt, "0.5"), JsValue::Double(0.5));
    assert_eq!(parse(&mut rt, "\"\\u00e9\\n\""), JsValue::from("\u{e9}\n"));
}

#[test]
fn test_large_integers_become_doubles() {
    let mut rt = create_test_runtime();
    let value = parse(&mut rt, "4294967296");
    assert!(matches!(value, JsValue::Double(_)));
    assert_eq!(value.as_number(), Some(4294967296.0));
}

#[test]
fn test_strictness() {
    let mut rt = create_test_runtime();
    for text in [
        "{a: 1}",
        "[1,]",
        "{\"a\":1,}",
        "// comment\n1",
        "'single'",
        "01",
        "NaN",
        "",
        "[1] [2]",
    ] {
        let err = rt.json_parse(text, None).unwrap_err();
        assert!(err.is_syntax_error(), "{:?} should be rejected", text);
    }
}

#[test]
fn test_error_carries_position() {
    let mut rt = create_test_runtime();
    let err = rt.json_parse("{\n  \"a\": tru\n}", None).unwrap_err();
    match err {
        jscell::JsError::SyntaxError { location, .. } => {
            let location = location.unwrap();
            assert_eq!(location.line, 2);
        }
        other => panic!("expected SyntaxError, got {:?}", other),
    }
}

#[test]
fn test_arrays_choose_element_shapes() {
    let mut rt = create_test_runtime();
    let ints = parse(&mut rt, "[1,2,3]");
    let doubles = parse(&mut rt, "[1.5,2,3]");
    let mixed = parse(&mut rt, "[1,\"a\",null]");
    let shape = |v: &JsValue| v.as_object().unwrap().borrow().indexing_type();
    assert_eq!(shape(&ints), IndexingType::Int32);
    assert_eq!(shape(&doubles), IndexingType::Double);
    assert_eq!(shape(&mixed), IndexingType::Contiguous);
}

#[test]
fn test_duplicate_keys_last_wins() {
    let mut rt = create_test_runtime();
    let value = parse(&mut rt, r#"{"a":1,"b":2,"a":3}"#);
    assert_eq!(stringify(&mut rt, &value).unwrap().as_deref(), Some(r#"{"a":3,"b":2}"#));
}

#[test]
fn test_index_like_keys_are_elements() {
    let mut rt = create_test_runtime();
    let value = parse(&mut rt, r#"{"x":0,"2":"two","0":"zero"}"#);
    let obj = value.as_object().unwrap().borrow();
    assert_eq!(obj.get_index(2), Some(JsValue::from("two")));
    let keys: Vec<String> = obj.own_enumerable_keys().iter().map(|k| k.to_string()).collect();
    assert_eq!(keys, ["0", "2", "x"]);
}

#[test]
fn test_round_trip() {
    let mut rt = create_test_runtime();
    let documents = [
        r#"{"name":"jscell","tags":["a","b"],"nested":{"n":-1.5,"ok":true,"none":null}}"#,
        r#"[[],{},[[]],[{"a":[0,1e-7,123456789012]}]]"#,
        r#""\u0000\u001f \"quoted\" \\ 😀""#,
    ];
    for document in documents {
        let first = parse(&mut rt, document);
        let text = stringify(&mut rt, &first).unwrap().unwrap();
        let second = parse(&mut rt, &text);
        let again = stringify(&mut rt, &second).unwrap().unwrap();
        assert_eq!(text, again);
    }
}

fn nested_arrays(depth: usize) -> String {
    format!("{}0{}", "[".repeat(depth), "]".repeat(depth))
}

fn nesting_depth(value: &JsValue) -> usize {
    let mut depth = 0;
    let mut current = value.clone();
    while let Some(array) = current.as_object().cloned() {
        depth += 1;
        let next = array.borrow().get_index(0).unwrap_or(JsValue::Undefined);
        current = next;
    }
    depth
}

#[test]
fn test_deep_nesting_round_trips() {
    let mut rt = Runtime::new();
    for depth in [200, 20_000] {
        let text = nested_arrays(depth);
        let value = parse(&mut rt, &text);
        assert_eq!(nesting_depth(&value), depth);
        assert_eq!(stringify(&mut rt, &value).unwrap().as_deref(), Some(text.as_str()));
    }
}

#[test]
fn test_nesting_past_configured_depth_is_range_error() {
    let mut rt = Runtime::with_config(RuntimeConfig::default().with_max_parse_depth(64));
    assert!(rt.json_parse(&nested_arrays(64), None).is_ok());
    let err = rt.json_parse(&nested_arrays(65), None).unwrap_err();
    assert!(err.is_stack_overflow());
    assert_eq!(err.name(), "RangeError");
}

#[test]
fn test_lone_surrogates_round_trip() {
    let mut rt = create_test_runtime();
    let units = [0x61, 0xd800, 0x62, 0xdfff, 0xd83d, 0xde00, 0xdc00];
    let value = JsValue::String(JsString::from_utf16(&units));
    let text = stringify(&mut rt, &value).unwrap().unwrap();
    assert_eq!(text, "\"a\\ud800b\\udfff\u{1f600}\\udc00\"");
    match parse(&mut rt, &text) {
        JsValue::String(s) => assert_eq!(s.to_utf16().unwrap(), units),
        other => panic!("expected a string, got {:?}", other),
    }
}

#[test]
fn test_holes_and_doubles_round_trip() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Double(0.1)]).unwrap();
    {
        let mut a = array.borrow_mut();
        let doubles = [-0.0, 1e-7, 1e21, 5e-324, f64::MAX, -2.5];
        for (i, d) in doubles.into_iter().enumerate() {
            a.put_index(2 * i as u32 + 2, JsValue::Double(d)).unwrap();
        }
    }
    let text = stringify(&mut rt, &JsValue::Object(array.clone())).unwrap().unwrap();
    assert_eq!(
        text,
        "[0.1,null,0,null,1e-7,null,1e+21,null,5e-324,null,1.7976931348623157e+308,null,-2.5]"
    );
    let parsed = parse(&mut rt, &text);
    let parsed = parsed.as_object().unwrap().borrow();
    let original = array.borrow();
    assert_eq!(parsed.array_length(), original.array_length());
    for i in 0..original.array_length() {
        match original.get_index(i) {
            // -0 prints as 0
            Some(JsValue::Double(d)) if d == 0.0 => {
                assert_eq!(parsed.get_index(i).and_then(|v| v.as_number()), Some(0.0));
            }
            Some(value) => assert_eq!(parsed.get_index(i), Some(value), "index {}", i),
            // Holes come back as explicit nulls
            None => assert_eq!(parsed.get_index(i), Some(JsValue::Null), "index {}", i),
        }
    }
}

#[test]
fn test_out_of_range_numbers_saturate() {
    let mut rt = create_test_runtime();
    let value = parse(&mut rt, "[1e400,-1e400,1e-400]");
    let a = value.as_object().unwrap().borrow();
    assert_eq!(a.get_index(0).and_then(|v| v.as_number()), Some(f64::INFINITY));
    assert_eq!(a.get_index(1).and_then(|v| v.as_number()), Some(f64::NEG_INFINITY));
    assert_eq!(a.get_index(2).and_then(|v| v.as_number()), Some(0.0));
    drop(a);
    // Infinity is not JSON; it prints as null
    assert_eq!(stringify(&mut rt, &value).unwrap().as_deref(), Some("[null,null,0]"));
}
