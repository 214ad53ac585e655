//! Tests for rope strings: concatenation, builder and lazy flattening

use super::{create_test_runtime, stringify};
use jscell::string::MAX_STRING_LENGTH;
use jscell::{JsString, JsValue, RopeBuilder, concat, concat3};

#[test]
fn test_concat_with_empty_is_identity() {
    let x = JsString::from("payload");
    let empty = JsString::empty();
    assert!(JsString::ptr_eq(&concat(&empty, &x).unwrap(), &x));
    assert!(JsString::ptr_eq(&concat(&x, &empty).unwrap(), &x));
    assert!(JsString::ptr_eq(&concat3(&empty, &x, &empty).unwrap(), &x));
}

#[test]
fn test_concat_builds_rope() {
    let a = JsString::from("foo");
    let b = JsString::from("bar");
    let s = concat(&a, &b).unwrap();
    assert!(s.is_rope());
    assert_eq!(s.len(), 6);
    assert!(s.is_8bit());
    assert_eq!(s.to_rust_string().unwrap(), "foobar");
    assert!(!s.is_rope());
}

#[test]
fn test_concat3_single_node() {
    let s = concat3(&JsString::from("a"), &JsString::from("b"), &JsString::from("c")).unwrap();
    let mut fibers = 0;
    s.visit_fibers(|_| fibers += 1);
    assert_eq!(fibers, 3);
    assert!(s.eq_str("abc"));
}

#[test]
fn test_mixed_width_concat() {
    let latin = JsString::from("caf\u{e9}");
    let wide = JsString::from("\u{2603}");
    let s = concat(&latin, &wide).unwrap();
    assert!(!s.is_8bit());
    assert_eq!(s.char_code_at(3).unwrap(), Some(0xe9));
    assert_eq!(s.char_code_at(4).unwrap(), Some(0x2603));
    assert_eq!(s.char_code_at(5).unwrap(), None);
}

#[test]
fn test_resolve_is_idempotent() {
    let s = concat(&JsString::from("left"), &JsString::from("right")).unwrap();
    let first = s.resolve().unwrap();
    assert_eq!(first, 9);
    assert_eq!(s.resolve().unwrap(), 0);
    assert_eq!(s.to_rust_string().unwrap(), "leftright");
}

#[test]
fn test_length_overflow_is_out_of_memory() {
    // Doubling a string reaches the limit after a few dozen steps without
    // ever materializing the characters.
    let mut s = JsString::from("x");
    let mut result = Ok(());
    while s.len() <= MAX_STRING_LENGTH {
        match concat(&s, &s) {
            Ok(next) => s = next,
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }
    assert!(result.unwrap_err().is_out_of_memory());
}

#[test]
fn test_long_left_skewed_rope() {
    let mut s = JsString::empty();
    let x = JsString::from("x");
    for _ in 0..100_000 {
        s = concat(&s, &x).unwrap();
    }
    assert_eq!(s.len(), 100_000);
    assert_eq!(s.char_code_at(99_999).unwrap(), Some(u16::from(b'x')));
}

#[test]
fn test_long_rope_dropped_unresolved() {
    let mut s = JsString::empty();
    let x = JsString::from("x");
    for _ in 0..100_000 {
        s = concat(&x, &s).unwrap();
    }
    assert!(s.is_rope());
    drop(s);
}

#[test]
fn test_builder_expands_left() {
    let mut builder = RopeBuilder::new();
    for i in 0..10 {
        builder.append_str(&i.to_string()).unwrap();
    }
    let s = builder.finish();
    assert_eq!(s.len(), 10);
    assert_eq!(s.to_rust_string().unwrap(), "0123456789");
}

#[test]
fn test_rope_resolved_by_runtime_reports_memory() {
    let rt = create_test_runtime();
    let before = rt.gc_stats().extra_memory_bytes;
    let s = concat(&JsString::from("abc"), &JsString::from("def")).unwrap();
    rt.resolve_string(&s).unwrap();
    assert_eq!(rt.gc_stats().extra_memory_bytes, before + 6);
}

#[test]
fn test_ropes_stringify_like_flat_strings() {
    let mut rt = create_test_runtime();
    let rope = concat3(&JsString::from("a\""), &JsString::from("\n"), &JsString::from("b")).unwrap();
    let text = stringify(&mut rt, &JsValue::String(rope)).unwrap();
    assert_eq!(text.as_deref(), Some(r#""a\"\nb""#));
}
