//! Built-in aggregate payloads.
//!
//! Array and table literals produce `Custom` objects carrying these
//! payloads, wired up with trace hooks so the collector and the refcount
//! protocol see their contents. They double as the reference example for
//! host-defined custom objects.

use std::any::Any;

use crate::machine::call_value;
use crate::object::{CustomHooks, ObjKind};
use crate::runtime::Runtime;
use crate::value::{ObjId, Value};

pub struct ArrayPayload(pub Vec<Value>);

pub struct TablePayload(pub Vec<(Value, Value)>);

fn array_trace(payload: &dyn Any, f: &mut dyn FnMut(Value)) {
    if let Some(arr) = payload.downcast_ref::<ArrayPayload>() {
        for v in &arr.0 {
            f(*v);
        }
    }
}

fn table_trace(payload: &dyn Any, f: &mut dyn FnMut(Value)) {
    if let Some(table) = payload.downcast_ref::<TablePayload>() {
        for (k, v) in &table.0 {
            f(*k);
            f(*v);
        }
    }
}

/// Builds an array object, retaining every item on its behalf.
pub fn alloc_array(rt: &mut Runtime, items: Vec<Value>) -> ObjId {
    for v in &items {
        rt.retain(*v);
    }
    rt.alloc(ObjKind::Custom {
        payload: Box::new(ArrayPayload(items)),
        hooks: CustomHooks {
            trace: Some(array_trace),
            on_destroy: None,
        },
    })
}

/// Builds a table object, retaining keys and values.
pub fn alloc_table(rt: &mut Runtime, pairs: Vec<(Value, Value)>) -> ObjId {
    for (k, v) in &pairs {
        rt.retain(*k);
        rt.retain(*v);
    }
    rt.alloc(ObjKind::Custom {
        payload: Box::new(TablePayload(pairs)),
        hooks: CustomHooks {
            trace: Some(table_trace),
            on_destroy: None,
        },
    })
}

enum Target {
    Array,
    Table,
    Str,
    Seq,
    Other,
}

fn classify(rt: &Runtime, id: ObjId) -> Target {
    match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Custom { payload, .. }) => {
            if payload.downcast_ref::<ArrayPayload>().is_some() {
                Target::Array
            } else if payload.downcast_ref::<TablePayload>().is_some() {
                Target::Table
            } else {
                Target::Other
            }
        }
        Some(ObjKind::Str(_)) => Target::Str,
        Some(ObjKind::Seq { .. }) => Target::Seq,
        _ => Target::Other,
    }
}

/// `target[index]`, returning an owned value. User objects may provide an
/// `op_get_index_` hook; arrays and strings bounds-check; tables fall back
/// to nil on a missing key.
pub(crate) fn index_get(rt: &mut Runtime, target: Value, index: Value) -> Result<Value, Value> {
    let Some(id) = target.as_obj() else {
        return Ok(Value::Nil);
    };
    if let Some(hook) = rt.member_func(id, "op_get_index_") {
        return call_value(rt, hook, &[index]);
    }
    match classify(rt, id) {
        Target::Array => {
            let item = with_array(rt, id, |arr| int_index(index).and_then(|i| arr.0.get(i).copied()));
            match item.flatten() {
                Some(v) => {
                    rt.retain(v);
                    Ok(v)
                }
                None => Err(rt.raise_error("Index Out Of Bounds", "array index out of range")),
            }
        }
        Target::Table => {
            let found = {
                let pairs = table_pairs(rt, id);
                pairs.and_then(|p| p.iter().find(|(k, _)| rt.quick_compare(*k, index)).map(|(_, v)| *v))
            };
            let v = found.unwrap_or(Value::Nil);
            rt.retain(v);
            Ok(v)
        }
        Target::Str => {
            let ch = match rt.obj(id).map(|o| &o.kind) {
                Some(ObjKind::Str(s)) => int_index(index).and_then(|i| s.chars().nth(i)),
                _ => None,
            };
            match ch {
                Some(c) => Ok(Value::Obj(rt.alloc_str(c.to_string()))),
                None => Err(rt.raise_error("Index Out Of Bounds", "string index out of range")),
            }
        }
        Target::Seq => {
            let Some(i) = int_index(index) else {
                return Ok(Value::Nil);
            };
            let mut cur = Value::Obj(id);
            for _ in 0..i {
                cur = match cur.as_obj().and_then(|c| rt.obj(c)).map(|o| &o.kind) {
                    Some(ObjKind::Seq { next, .. }) => *next,
                    _ => Value::Nil,
                };
            }
            match cur.as_obj().and_then(|c| rt.obj(c)).map(|o| &o.kind) {
                Some(ObjKind::Seq { value, .. }) => {
                    let v = *value;
                    rt.retain(v);
                    Ok(v)
                }
                _ => Err(rt.raise_error("Index Out Of Bounds", "sequence index out of range")),
            }
        }
        Target::Other => {
            // String keys index into the member dictionary.
            let name = match index.as_obj().and_then(|i| rt.obj(i)).map(|o| &o.kind) {
                Some(ObjKind::Str(s)) => Some(s.clone()),
                _ => None,
            };
            match name {
                Some(name) => {
                    let v = rt.get_member(id, &name).unwrap_or(Value::Nil);
                    rt.retain(v);
                    Ok(v)
                }
                None => Ok(Value::Nil),
            }
        }
    }
}

/// `target[index] = value`. The value stays owned by the caller's stack;
/// the container takes its own reference.
pub(crate) fn index_set(
    rt: &mut Runtime,
    target: Value,
    index: Value,
    value: Value,
) -> Result<(), Value> {
    let Some(id) = target.as_obj() else {
        return Err(rt.raise_error("Mismatched Type", "index store on non-object"));
    };
    if let Some(hook) = rt.member_func(id, "op_set_index_") {
        let out = call_value(rt, hook, &[index, value])?;
        rt.release(out);
        return Ok(());
    }
    match classify(rt, id) {
        Target::Array => {
            let Some(i) = int_index(index) else {
                return Err(rt.raise_error("Mismatched Type", "array index must be an integer"));
            };
            rt.retain(value);
            let old = {
                let arr = match rt.obj_mut(id).map(|o| &mut o.kind) {
                    Some(ObjKind::Custom { payload, .. }) => payload.downcast_mut::<ArrayPayload>(),
                    _ => None,
                };
                match arr {
                    Some(arr) if i < arr.0.len() => Some(std::mem::replace(&mut arr.0[i], value)),
                    _ => None,
                }
            };
            match old {
                Some(old) => {
                    rt.release(old);
                    Ok(())
                }
                None => {
                    rt.release(value);
                    Err(rt.raise_error("Index Out Of Bounds", "array index out of range"))
                }
            }
        }
        Target::Table => {
            let pos = {
                let pairs = table_pairs(rt, id);
                pairs.and_then(|p| p.iter().position(|(k, _)| rt.quick_compare(*k, index)))
            };
            rt.retain(value);
            match pos {
                Some(i) => {
                    let old = match rt.obj_mut(id).map(|o| &mut o.kind) {
                        Some(ObjKind::Custom { payload, .. }) => payload
                            .downcast_mut::<TablePayload>()
                            .map(|t| std::mem::replace(&mut t.0[i].1, value)),
                        _ => None,
                    };
                    if let Some(old) = old {
                        rt.release(old);
                    }
                    Ok(())
                }
                None => {
                    rt.retain(index);
                    if let Some(ObjKind::Custom { payload, .. }) =
                        rt.obj_mut(id).map(|o| &mut o.kind)
                    {
                        if let Some(table) = payload.downcast_mut::<TablePayload>() {
                            table.0.push((index, value));
                        }
                    }
                    Ok(())
                }
            }
        }
        Target::Str | Target::Seq => {
            Err(rt.raise_error("Mismatched Type", "value does not support index stores"))
        }
        Target::Other => {
            let name = match index.as_obj().and_then(|i| rt.obj(i)).map(|o| &o.kind) {
                Some(ObjKind::Str(s)) => Some(s.clone()),
                _ => None,
            };
            match name {
                Some(name) => {
                    rt.set_member(id, &name, value);
                    Ok(())
                }
                None => Err(rt.raise_error("Mismatched Type", "member index must be a string")),
            }
        }
    }
}

fn int_index(index: Value) -> Option<usize> {
    match index {
        Value::Int(i) if i >= 0 => Some(i as usize),
        _ => None,
    }
}

fn with_array<R>(rt: &Runtime, id: ObjId, f: impl FnOnce(&ArrayPayload) -> R) -> Option<R> {
    match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Custom { payload, .. }) => payload.downcast_ref::<ArrayPayload>().map(f),
        _ => None,
    }
}

fn table_pairs(rt: &Runtime, id: ObjId) -> Option<&[(Value, Value)]> {
    match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Custom { payload, .. }) => {
            payload.downcast_ref::<TablePayload>().map(|t| t.0.as_slice())
        }
        _ => None,
    }
}
