#![no_main]

use jscell::{JsValue, Runtime, RuntimeConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if text.len() > 100_000 {
        return;
    }

    // Indented output grows with the square of the depth
    let mut runtime = Runtime::with_config(RuntimeConfig::default().with_max_parse_depth(1_000));
    let Ok(value) = runtime.json_parse(text, None) else {
        return;
    };

    // Whatever parses must stringify, and the output must be a fixed point
    let first = runtime
        .json_stringify(&value, &JsValue::Undefined, &JsValue::Undefined)
        .expect("stringify of parsed value failed")
        .to_js_string()
        .to_string();
    let reparsed = runtime.json_parse(&first, None).expect("output does not parse");
    let second = runtime
        .json_stringify(&reparsed, &JsValue::Undefined, &JsValue::Undefined)
        .expect("stringify of reparsed value failed")
        .to_js_string()
        .to_string();
    assert_eq!(first, second);

    // Indented output parses back to the same document
    let pretty = runtime
        .json_stringify(&value, &JsValue::Undefined, &JsValue::Int32(2))
        .expect("indented stringify failed")
        .to_js_string()
        .to_string();
    let from_pretty = runtime.json_parse(&pretty, None).expect("indented output does not parse");
    let compact = runtime
        .json_stringify(&from_pretty, &JsValue::Undefined, &JsValue::Undefined)
        .expect("stringify failed")
        .to_js_string()
        .to_string();
    assert_eq!(first, compact);
});
