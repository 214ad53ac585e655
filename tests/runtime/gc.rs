//! Tests for collection and memory accounting through the runtime

use super::{create_test_runtime, parse};
use jscell::{JsString, JsValue, Runtime, RuntimeConfig, concat};

fn manual_runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().with_gc_threshold(0))
}

#[test]
fn test_dropped_objects_are_reclaimed() {
    let mut rt = manual_runtime();
    let value = parse(&mut rt, r#"{"a":{"b":{"c":[1,2,3]}}}"#);
    assert_eq!(rt.gc_stats().live_objects, 4);
    drop(value);
    rt.collect_garbage();
    let stats = rt.gc_stats();
    assert_eq!(stats.live_objects, 0);
    assert_eq!(stats.pooled_objects, stats.total_objects);
}

#[test]
fn test_pooled_cells_are_reused() {
    let mut rt = manual_runtime();
    drop(rt.create_object().unwrap());
    let total = rt.gc_stats().total_objects;
    let obj = rt.create_object().unwrap();
    assert_eq!(rt.gc_stats().total_objects, total);
    // A recycled cell starts empty
    assert!(obj.borrow().own_enumerable_keys().is_empty());
}

#[test]
fn test_cycles_are_collected() {
    let mut rt = manual_runtime();
    let a = rt.create_object().unwrap();
    let b = rt.create_object().unwrap();
    rt.set(&a, "peer", JsValue::Object(b.clone())).unwrap();
    rt.set(&b, "peer", JsValue::Object(a.clone())).unwrap();
    rt.collect_garbage();
    assert_eq!(rt.gc_stats().live_objects, 2);

    drop(a);
    drop(b);
    rt.collect_garbage();
    assert_eq!(rt.gc_stats().live_objects, 0);
}

#[test]
fn test_protect_keeps_value_alive_without_handles() {
    let mut rt = manual_runtime();
    let value = parse(&mut rt, r#"{"keep":[true]}"#);
    rt.protect(&value);
    drop(value);
    rt.collect_garbage();
    let stats = rt.gc_stats();
    assert_eq!(stats.live_objects, 2);
    assert_eq!(stats.pooled_objects, 0);
}

#[test]
fn test_unprotect_releases() {
    let mut rt = manual_runtime();
    let value = parse(&mut rt, "[[]]");
    rt.protect(&value);
    assert!(rt.unprotect(&value));
    assert!(!rt.unprotect(&value));
    assert!(!rt.unprotect(&JsValue::Int32(1)));
    drop(value);
    rt.collect_garbage();
    assert_eq!(rt.gc_stats().live_objects, 0);
}

#[test]
fn test_values_survive_aggressive_collection() {
    let mut rt = create_test_runtime();
    let value = parse(&mut rt, r#"[{"a":1},{"b":[2,3]},{"c":{"d":"e"}}]"#);
    for _ in 0..10 {
        rt.create_object().unwrap();
    }
    rt.collect_garbage();
    let text = rt
        .json_stringify(&value, &JsValue::Undefined, &JsValue::Undefined)
        .unwrap();
    assert_eq!(
        text.to_js_string().to_string(),
        r#"[{"a":1},{"b":[2,3]},{"c":{"d":"e"}}]"#
    );
}

#[test]
fn test_collections_are_counted() {
    let mut rt = manual_runtime();
    assert_eq!(rt.gc_stats().collections, 0);
    rt.collect_garbage();
    rt.collect_garbage();
    assert_eq!(rt.gc_stats().collections, 2);

    let mut eager = Runtime::with_config(RuntimeConfig::default().with_gc_threshold(1));
    let kept: Vec<_> = (0..5).map(|_| eager.create_object().unwrap()).collect();
    assert_eq!(eager.gc_stats().collections, 5);
    assert_eq!(kept.len(), 5);
}

#[test]
fn test_butterfly_growth_reports_extra_memory() {
    let mut rt = manual_runtime();
    let before = rt.gc_stats().extra_memory_bytes;
    let array = rt
        .create_array((0..100).map(JsValue::Int32).collect())
        .unwrap();
    let after = rt.gc_stats().extra_memory_bytes;
    let size = array.borrow().butterfly().map_or(0, |b| b.allocation_size());
    assert!(size >= 100 * 8);
    assert_eq!(after - before, size);
}

#[test]
fn test_extra_memory_threshold_triggers_collection() {
    let mut rt = Runtime::with_config(
        RuntimeConfig::default()
            .with_gc_threshold(0)
            .with_extra_memory_threshold(4096),
    );
    let mut keep = Vec::new();
    for _ in 0..20 {
        keep.push(rt.create_array((0..64).map(JsValue::Int32).collect()).unwrap());
    }
    assert!(rt.gc_stats().collections > 0);
    assert_eq!(keep.len(), 20);
    assert!(keep.iter().all(|a| a.borrow().array_length() == 64));
}

#[test]
fn test_string_resolution_reports_extra_memory() {
    let rt = manual_runtime();
    let wide = concat(&JsString::from("\u{2603}"), &JsString::from("ab")).unwrap();
    rt.resolve_string(&wide).unwrap();
    // Two bytes per code unit once any unit needs 16 bits
    assert_eq!(rt.gc_stats().extra_memory_bytes, 6);
    rt.resolve_string(&wide).unwrap();
    assert_eq!(rt.gc_stats().extra_memory_bytes, 6);
}

#[test]
fn test_deep_chain_is_dropped_without_recursion() {
    let mut rt = Runtime::new();
    let mut value = JsValue::Null;
    for _ in 0..50_000 {
        let obj = rt.create_object().unwrap();
        rt.set(&obj, "next", value).unwrap();
        value = JsValue::Object(obj);
    }
    drop(value);
    rt.collect_garbage();
    assert_eq!(rt.gc_stats().live_objects, 0);
}

#[test]
fn test_handle_outliving_runtime_is_detached() {
    let mut rt = manual_runtime();
    let value = parse(&mut rt, r#"{"a":[1,2]}"#);
    rt.protect(&value);
    let obj = value.as_object().unwrap().clone();
    assert!(obj.is_heap_alive());
    drop(value);
    drop(rt);
    assert!(!obj.is_heap_alive());
    assert!(obj.try_borrow().is_none());
}
