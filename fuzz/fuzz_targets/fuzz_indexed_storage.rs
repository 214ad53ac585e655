#![no_main]

use std::collections::BTreeMap;

use jscell::{JsValue, Runtime};
use libfuzzer_sys::fuzz_target;

fn value_for(tag: u8, seed: u16) -> JsValue {
    match tag % 4 {
        0 => JsValue::Int32(i32::from(seed)),
        1 => JsValue::Double(f64::from(seed) + 0.25),
        2 => JsValue::from(format!("s{}", seed)),
        _ => JsValue::Boolean(seed % 2 == 0),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut runtime = Runtime::new();
    let Ok(array) = runtime.create_array(Vec::new()) else {
        return;
    };
    let mut model: BTreeMap<u32, JsValue> = BTreeMap::new();
    let mut length: u32 = 0;

    for op in data.chunks_exact(4).take(2_000) {
        let seed = u16::from_le_bytes([op[1], op[2]]);
        // Small indices stay dense; scaled ones reach the sparse map
        let index = if op[3] & 0x80 != 0 {
            u32::from(seed) * 97
        } else {
            u32::from(seed % 64)
        };
        let mut a = array.borrow_mut();
        match op[0] % 4 {
            0 => {
                let value = value_for(op[3], seed);
                a.put_index(index, value.clone()).expect("put failed");
                model.insert(index, value);
                length = length.max(index + 1);
            }
            1 => {
                assert!(a.delete_index(index));
                model.remove(&index);
            }
            2 => {
                let new_length = index / 2;
                a.set_length(new_length).expect("set_length failed");
                model.retain(|k, _| *k < new_length);
                length = new_length;
            }
            _ => {
                let value = value_for(op[3], seed);
                a.push(value.clone()).expect("push failed");
                model.insert(length, value);
                length += 1;
            }
        }
    }

    let a = array.borrow();
    assert_eq!(a.array_length(), length);
    assert_eq!(a.count_elements() as usize, model.len());
    for (index, value) in &model {
        assert_eq!(a.get_index(*index).as_ref(), Some(value));
    }
    assert_eq!(a.own_index_keys(), model.keys().copied().collect::<Vec<_>>());
});
