//! Tests for the indexed storage engine through runtime-allocated objects

use super::create_test_runtime;
use jscell::butterfly::{MAX_ARRAY_INDEX, MIN_SPARSE_ARRAY_INDEX};
use jscell::{IndexingType, JsString, JsValue, PropertyAttributes};

#[test]
fn test_int32_to_contiguous_path() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(Vec::new()).unwrap();
    let mut a = array.borrow_mut();
    a.put_index(0, JsValue::Int32(7)).unwrap();
    assert_eq!(a.indexing_type(), IndexingType::Int32);
    a.put_index(1, JsValue::from("seven")).unwrap();
    assert_eq!(a.indexing_type(), IndexingType::Contiguous);
    assert_eq!(a.get_index(0), Some(JsValue::Int32(7)));
    assert_eq!(a.get_index(1), Some(JsValue::from("seven")));
}

#[test]
fn test_double_to_contiguous_path() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(Vec::new()).unwrap();
    let mut a = array.borrow_mut();
    a.put_index(0, JsValue::Double(0.5)).unwrap();
    a.put_index(1, JsValue::Int32(2)).unwrap();
    assert_eq!(a.indexing_type(), IndexingType::Double);
    // Int32 and Double compare equal by value
    assert_eq!(a.get_index(1), Some(JsValue::Double(2.0)));
    a.put_index(2, JsValue::Boolean(true)).unwrap();
    assert_eq!(a.indexing_type(), IndexingType::Contiguous);
    assert_eq!(a.get_index(0), Some(JsValue::Double(0.5)));
    assert_eq!(a.get_index(2), Some(JsValue::Boolean(true)));
}

#[test]
fn test_widening_never_reverses() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Null]).unwrap();
    let mut a = array.borrow_mut();
    assert_eq!(a.indexing_type(), IndexingType::Contiguous);
    for i in 1..10 {
        a.put_index(i, JsValue::Int32(i as i32)).unwrap();
    }
    assert_eq!(a.indexing_type(), IndexingType::Contiguous);
    assert!(a.ensure_int32().unwrap().is_none());
}

#[test]
fn test_push_grows_with_amortized_doubling() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(Vec::new()).unwrap();
    let mut a = array.borrow_mut();
    let mut reallocations = 0;
    let mut last_capacity = 0;
    for i in 0..1000 {
        a.push(JsValue::Int32(i)).unwrap();
        let capacity = a.butterfly().map_or(0, |b| b.vector_length());
        if capacity != last_capacity {
            reallocations += 1;
            last_capacity = capacity;
        }
    }
    assert_eq!(a.array_length(), 1000);
    assert!(reallocations <= 10, "{} reallocations", reallocations);
    assert_eq!(a.get_index(999), Some(JsValue::Int32(999)));
}

#[test]
fn test_far_index_goes_sparse() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(1), JsValue::Int32(2)]).unwrap();
    let mut a = array.borrow_mut();
    a.put_index(50_000, JsValue::from("far")).unwrap();
    assert_eq!(a.indexing_type(), IndexingType::ArrayStorage);
    assert_eq!(a.array_length(), 50_001);
    assert_eq!(a.get_index(1), Some(JsValue::Int32(2)));
    assert_eq!(a.get_index(50_000), Some(JsValue::from("far")));
    assert_eq!(a.get_index(25_000), None);
    assert_eq!(a.count_elements(), 3);
    // The vector did not grow to cover the gap.
    assert!(a.butterfly().map_or(0, |b| b.vector_length()) < 1000);
}

#[test]
fn test_large_first_index_starts_as_array_storage() {
    let mut rt = create_test_runtime();
    let obj = rt.create_object().unwrap();
    let mut o = obj.borrow_mut();
    o.put_index(MIN_SPARSE_ARRAY_INDEX, JsValue::Int32(1)).unwrap();
    assert_eq!(o.indexing_type(), IndexingType::ArrayStorage);
    assert_eq!(o.own_index_keys(), vec![MIN_SPARSE_ARRAY_INDEX]);
}

#[test]
fn test_index_past_limit_is_out_of_memory() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(1)]).unwrap();
    let mut a = array.borrow_mut();
    let err = a.put_index(u32::MAX, JsValue::Int32(2)).unwrap_err();
    assert!(err.is_out_of_memory());
    // Nothing changed
    assert_eq!(a.array_length(), 1);
    assert_eq!(a.indexing_type(), IndexingType::Int32);
    // The largest array index itself is storable (sparsely)
    assert!(a.put_index(MAX_ARRAY_INDEX, JsValue::Int32(3)).unwrap());
    assert_eq!(a.get_index(MAX_ARRAY_INDEX), Some(JsValue::Int32(3)));
}

#[test]
fn test_delete_creates_holes_in_every_shape() {
    let mut rt = create_test_runtime();
    let values = [JsValue::Int32(1), JsValue::Double(1.5), JsValue::from("s")];
    for value in values {
        let array = rt.create_array(vec![value.clone(), value.clone(), value]).unwrap();
        let mut a = array.borrow_mut();
        assert!(a.delete_index(1));
        assert_eq!(a.get_index(1), None);
        assert_eq!(a.array_length(), 3);
        assert_eq!(a.count_elements(), 2);
    }

    let array = rt.create_array(vec![JsValue::Int32(1), JsValue::Int32(2)]).unwrap();
    let mut a = array.borrow_mut();
    a.ensure_array_storage().unwrap();
    assert!(a.delete_index(0));
    assert_eq!(a.ensure_array_storage().unwrap().num_values_in_vector(), 1);
}

#[test]
fn test_set_length_truncates_sparse_entries() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(0)]).unwrap();
    let mut a = array.borrow_mut();
    a.put_index(100_000, JsValue::Int32(1)).unwrap();
    a.put_index(200_000, JsValue::Int32(2)).unwrap();
    assert!(a.set_length(150_000).unwrap());
    assert_eq!(a.array_length(), 150_000);
    assert_eq!(a.get_index(100_000), Some(JsValue::Int32(1)));
    assert_eq!(a.get_index(200_000), None);
    assert!(a.set_length(0).unwrap());
    assert_eq!(a.count_elements(), 0);
}

#[test]
fn test_frozen_array_rejects_writes() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(1), JsValue::Int32(2)]).unwrap();
    let mut a = array.borrow_mut();
    a.freeze().unwrap();
    assert_eq!(a.indexing_type(), IndexingType::ArrayStorage);
    assert!(!a.put_index(0, JsValue::Int32(9)).unwrap());
    assert!(!a.put_index(5, JsValue::Int32(9)).unwrap());
    assert_eq!(a.get_index(0), Some(JsValue::Int32(1)));
    assert!(a.push(JsValue::Int32(3)).is_err());
    assert!(a.ensure_contiguous().unwrap().is_none());
}

#[test]
fn test_non_extensible_allows_overwrite_only() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(1)]).unwrap();
    let mut a = array.borrow_mut();
    a.prevent_extensions().unwrap();
    assert!(a.put_index(0, JsValue::Int32(5)).unwrap());
    assert!(!a.put_index(1, JsValue::Int32(6)).unwrap());
    assert_eq!(a.get_index(0), Some(JsValue::Int32(5)));
    assert_eq!(a.array_length(), 1);
}

#[test]
fn test_named_and_indexed_properties_coexist() {
    let mut rt = create_test_runtime();
    let obj = rt.create_object().unwrap();
    for i in 0..10 {
        rt.set(&obj, format!("p{}", i), JsValue::Int32(i)).unwrap();
    }
    rt.set(&obj, 0u32, JsValue::from("zero")).unwrap();
    rt.set(&obj, "1", JsValue::from("one")).unwrap();
    let o = obj.borrow();
    assert_eq!(o.get_str("p9"), Some(JsValue::Int32(9)));
    assert_eq!(o.get_index(1), Some(JsValue::from("one")));
    let keys: Vec<String> = o.own_enumerable_keys().iter().map(|k| k.to_string()).collect();
    assert_eq!(keys.first().map(String::as_str), Some("0"));
    assert_eq!(keys.get(1).map(String::as_str), Some("1"));
    assert_eq!(keys.len(), 12);
}

#[test]
fn test_ensure_length_respects_integrity_levels() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(1)]).unwrap();
    let mut a = array.borrow_mut();
    a.prevent_extensions().unwrap();
    a.ensure_length(16).unwrap();
    assert!(!a.put_index(3, JsValue::Int32(4)).unwrap());
    assert_eq!(a.get_index(3), None);
    assert_eq!(a.get_index(0), Some(JsValue::Int32(1)));
    assert_eq!(a.array_length(), 1);
}

#[test]
fn test_ensure_length_preserves_sparse_elements() {
    let mut rt = create_test_runtime();
    let array = rt.create_array(vec![JsValue::Int32(1), JsValue::Int32(2)]).unwrap();
    let mut a = array.borrow_mut();
    a.put_index(2_000, JsValue::from("far")).unwrap();
    assert_eq!(a.indexing_type(), IndexingType::ArrayStorage);
    a.ensure_length(4_000).unwrap();
    assert!(a.butterfly().map_or(0, |b| b.vector_length()) >= 4_000);
    assert_eq!(a.get_index(2_000), Some(JsValue::from("far")));
    assert_eq!(a.count_elements(), 3);
    assert_eq!(a.own_index_keys(), vec![0, 1, 2_000]);
}

#[test]
fn test_attributed_elements_through_the_runtime() {
    let mut rt = create_test_runtime();
    let array = rt
        .create_array(vec![JsValue::Int32(1), JsValue::Int32(2), JsValue::Int32(3)])
        .unwrap();
    {
        let mut a = array.borrow_mut();
        assert!(a.define_own(JsString::from("1"), JsValue::from("hidden"), PropertyAttributes::HIDDEN).unwrap());
        assert!(a.define_own_index(2, JsValue::Int32(30), PropertyAttributes::READ_ONLY).unwrap());
        assert!(!a.put_index(2, JsValue::Int32(31)).unwrap());
        assert_eq!(a.get_index(1), Some(JsValue::from("hidden")));
    }
    let keys: Vec<String> = array
        .borrow()
        .own_enumerable_keys()
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(keys, ["0", "2"]);
    // Arrays serialize every index up to length regardless of enumerability
    let text = super::stringify(&mut rt, &JsValue::Object(array.clone())).unwrap();
    assert_eq!(text.as_deref(), Some(r#"[1,"hidden",30]"#));
}
