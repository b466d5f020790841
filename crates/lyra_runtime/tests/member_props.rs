//! Property tests for the member dictionary and value comparison.

use std::collections::BTreeMap;

use lyra_runtime::{Runtime, Value};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Set(String, i64),
    Remove(String),
}

fn key() -> impl Strategy<Value = String> {
    "[a-e]{1,6}"
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (key(), any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
        key().prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn members_match_a_map_model(ops in proptest::collection::vec(op(), 0..64)) {
        let mut rt = Runtime::new();
        let inst = rt.alloc_instance();
        let mut model: BTreeMap<String, i64> = BTreeMap::new();
        for op in ops {
            match op {
                Op::Set(k, v) => {
                    rt.set_member(inst, &k, Value::Int(v));
                    model.insert(k, v);
                }
                Op::Remove(k) => {
                    rt.remove_member(inst, &k);
                    model.remove(&k);
                }
            }
        }
        for (k, v) in &model {
            prop_assert_eq!(rt.get_member(inst, k), Some(Value::Int(*v)));
        }
        prop_assert_eq!(rt.get_member(inst, "zzz"), None);
    }

    #[test]
    fn quick_compare_promotes_ints(i in -1000i64..1000) {
        let rt = Runtime::new();
        prop_assert!(rt.quick_compare(Value::Int(i), Value::Float(i as f64)));
        prop_assert!(rt.quick_compare(Value::Float(i as f64), Value::Int(i)));
        prop_assert!(!rt.quick_compare(Value::Int(i), Value::Int(i + 1)));
    }

    #[test]
    fn equal_strings_compare_equal(s in "[a-z]{0,12}") {
        let mut rt = Runtime::new();
        let a = rt.alloc_str(s.clone());
        let b = rt.alloc_str(s);
        let c = rt.alloc_str("completely different");
        prop_assert!(rt.quick_compare(Value::Obj(a), Value::Obj(b)));
        prop_assert!(!rt.quick_compare(Value::Obj(a), Value::Obj(c)));
    }
}
