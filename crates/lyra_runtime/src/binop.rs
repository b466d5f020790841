//! Binary and unary operator dispatch.
//!
//! Order of resolution: a user hook on either operand wins, then nil
//! swallows the operation, then strings get their special cases, then
//! numeric promotion. Operand type mismatches yield nil rather than an
//! error; that permissiveness is part of the language.

use lyra_ir::Opcode;

use crate::builtins::{ArrayPayload, TablePayload};
use crate::machine::call_value;
use crate::object::{ObjKind, FuncObj};
use crate::runtime::Runtime;
use crate::value::Value;

fn hook_name(op: Opcode) -> Option<&'static str> {
    use Opcode::*;
    Some(match op {
        Add => "op_add_",
        Sub => "op_subtract_",
        Mul => "op_multiply_",
        Div => "op_divide_",
        Mod => "op_modulo_",
        Pow => "op_power_",
        Lt => "op_lt_",
        Gt => "op_gt_",
        Le => "op_lte_",
        Ge => "op_gte_",
        Eq => "op_equals_",
        Ne => "op_notequal_",
        And => "op_and_",
        Or => "op_or_",
        _ => return None,
    })
}

/// Computes `a op b`, returning an owned value. `Err` carries a raised
/// value. The caller keeps `a` and `b` rooted for the duration.
pub(crate) fn binary(rt: &mut Runtime, op: Opcode, a: Value, b: Value) -> Result<Value, Value> {
    if let Some(name) = hook_name(op) {
        if let Some(id) = a.as_obj() {
            if let Some(hook) = rt.member_func(id, name) {
                return call_hook(rt, hook, b, 0);
            }
        }
        if let Some(id) = b.as_obj() {
            if let Some(hook) = rt.member_func(id, name) {
                return call_hook(rt, hook, a, 1);
            }
        }
    }

    use Opcode::*;
    match op {
        Coalesce => {
            let out = if a.is_nil() { b } else { a };
            rt.retain(out);
            return Ok(out);
        }
        Eq => return Ok(Value::from_bool(rt.quick_compare(a, b))),
        Ne => return Ok(Value::from_bool(!rt.quick_compare(a, b))),
        And => return Ok(Value::from_bool(a.truthy() && b.truthy())),
        Or => return Ok(Value::from_bool(a.truthy() || b.truthy())),
        _ => {}
    }

    if a.is_nil() || b.is_nil() {
        return Ok(Value::Nil);
    }

    let sa = str_contents(rt, a).map(str::to_owned);
    let sb = str_contents(rt, b).map(str::to_owned);
    if sa.is_some() || sb.is_some() {
        return string_op(rt, op, a, b, sa, sb);
    }

    numeric_op(rt, op, a, b)
}

fn call_hook(rt: &mut Runtime, hook: Value, other: Value, side: i64) -> Result<Value, Value> {
    let argc = hook
        .as_obj()
        .and_then(|id| match &rt.obj(id)?.kind {
            ObjKind::Func(f) => Some(f.argc),
            _ => None,
        })
        .unwrap_or(1);
    if argc >= 2 {
        call_value(rt, hook, &[other, Value::Int(side)])
    } else {
        call_value(rt, hook, &[other])
    }
}

fn str_contents(rt: &Runtime, v: Value) -> Option<&str> {
    match &rt.obj(v.as_obj()?)?.kind {
        ObjKind::Str(s) => Some(s),
        _ => None,
    }
}

fn string_op(
    rt: &mut Runtime,
    op: Opcode,
    a: Value,
    b: Value,
    sa: Option<String>,
    sb: Option<String>,
) -> Result<Value, Value> {
    use Opcode::*;
    match (op, &sa, &sb) {
        (Add, _, _) => {
            let left = match sa {
                Some(s) => s,
                None => render(rt, a),
            };
            let right = match sb {
                Some(s) => s,
                None => render(rt, b),
            };
            Ok(Value::Obj(rt.alloc_str(left + &right)))
        }
        (Mul, Some(s), None) => Ok(repeat_str(rt, s, b)),
        (Mul, None, Some(s)) => Ok(repeat_str(rt, s, a)),
        (Lt | Gt | Le | Ge, Some(x), Some(y)) => Ok(Value::from_bool(match op {
            Lt => x < y,
            Gt => x > y,
            Le => x <= y,
            _ => x >= y,
        })),
        _ => Ok(Value::Nil),
    }
}

fn repeat_str(rt: &mut Runtime, s: &str, count: Value) -> Value {
    match count {
        Value::Int(n) if n > 0 => Value::Obj(rt.alloc_str(s.repeat(n as usize))),
        Value::Int(_) => Value::Obj(rt.alloc_str("")),
        _ => Value::Nil,
    }
}

fn numeric_op(rt: &mut Runtime, op: Opcode, a: Value, b: Value) -> Result<Value, Value> {
    use Opcode::*;
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Ok(match op {
            Add => Value::Int(x.wrapping_add(y)),
            Sub => Value::Int(x.wrapping_sub(y)),
            Mul => Value::Int(x.wrapping_mul(y)),
            Div => {
                if y == 0 {
                    return Err(rt.raise_error("Divide By Zero", "integer division by zero"));
                }
                Value::Int(x.wrapping_div(y))
            }
            Mod => {
                if y == 0 {
                    return Err(rt.raise_error("Divide By Zero", "integer modulo by zero"));
                }
                Value::Int(x.wrapping_rem(y))
            }
            Pow => Value::Int((x as f64).powf(y as f64) as i64),
            Lt => Value::from_bool(x < y),
            Gt => Value::from_bool(x > y),
            Le => Value::from_bool(x <= y),
            Ge => Value::from_bool(x >= y),
            _ => Value::Nil,
        });
    }
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Ok(Value::Nil);
    };
    Ok(match op {
        Add => Value::Float(x + y),
        Sub => Value::Float(x - y),
        Mul => Value::Float(x * y),
        Div => Value::Float(x / y),
        Mod => Value::Float(x % y),
        Pow => Value::Float(x.powf(y)),
        Lt => Value::from_bool(x < y),
        Gt => Value::from_bool(x > y),
        Le => Value::from_bool(x <= y),
        Ge => Value::from_bool(x >= y),
        _ => Value::Nil,
    })
}

pub(crate) fn unary(op: Opcode, v: Value) -> Value {
    match op {
        Opcode::Not => Value::from_bool(!v.truthy()),
        Opcode::Negate => match v {
            Value::Int(i) => Value::Int(i.wrapping_neg()),
            Value::Float(f) => Value::Float(-f),
            _ => Value::Nil,
        },
        _ => Value::Nil,
    }
}

/// Renders a value the way `print` and string concatenation see it.
pub fn render(rt: &mut Runtime, v: Value) -> String {
    render_depth(rt, v, 0)
}

fn render_depth(rt: &mut Runtime, v: Value, depth: usize) -> String {
    match v {
        Value::Nil => "(null)".to_owned(),
        Value::Int(i) => itoa::Buffer::new().format(i).to_owned(),
        Value::Float(f) => ryu::Buffer::new().format(f).to_owned(),
        Value::Obj(id) => {
            if depth > 4 {
                return "...".to_owned();
            }
            // A stringify_ hook overrides the default rendering.
            if let Some(hook) = rt.member_func(id, "stringify_") {
                if let Ok(out) = call_value(rt, hook, &[]) {
                    let rendered = str_contents(rt, out).map(str::to_owned);
                    rt.release(out);
                    if let Some(s) = rendered {
                        return s;
                    }
                }
            }
            // First pass borrows the object; array contents re-enter the
            // renderer afterwards.
            let mut array_items: Option<Vec<Value>> = None;
            let simple = match rt.obj(id).map(|obj| &obj.kind) {
                None => "(null)".to_owned(),
                Some(ObjKind::Str(s)) => s.clone(),
                Some(ObjKind::Error { name, message }) => format!("{name}: {message}"),
                Some(ObjKind::Func(FuncObj { refname, .. })) => format!("(function {refname})"),
                Some(ObjKind::Class(c)) => format!("(class {})", c.refname),
                Some(ObjKind::Code(_)) => "(code)".to_owned(),
                Some(ObjKind::Seq { .. }) => "(sequence)".to_owned(),
                Some(ObjKind::Iterable { .. }) => "(iterator)".to_owned(),
                Some(ObjKind::Blob { .. }) => "(blob)".to_owned(),
                Some(ObjKind::Instance) => "(object)".to_owned(),
                Some(ObjKind::Custom { payload, .. }) => {
                    if let Some(arr) = payload.downcast_ref::<ArrayPayload>() {
                        array_items = Some(arr.0.clone());
                        String::new()
                    } else if payload.downcast_ref::<TablePayload>().is_some() {
                        "(table)".to_owned()
                    } else {
                        "(object)".to_owned()
                    }
                }
            };
            match array_items {
                None => simple,
                Some(items) => {
                    let parts: Vec<String> = items
                        .into_iter()
                        .map(|it| render_depth(rt, it, depth + 1))
                        .collect();
                    format!("[{}]", parts.join(", "))
                }
            }
        }
    }
}
