//! The stack machine.
//!
//! Frames live on the runtime so the collector can see them; the dispatch
//! loop itself recurses through `call_value` for nested calls. Raising
//! unwinds the current frame's catch stack first, then propagates frame by
//! frame as an `Err` until a handler or the embedder catches it.
//!
//! Reference discipline inside the loop: values sitting on a frame stack
//! are rooted. Any operation that can reach a safepoint (user hooks, calls)
//! reads its operands in place and only pops them afterwards.

use std::rc::Rc;

use lyra_ir::{next_op, read_u32, Opcode};
use smallvec::SmallVec;

use crate::binop;
use crate::builtins;
use crate::errors::ExecError;
use crate::object::{CodeObj, FuncObj, IterCursor, ObjKind};
use crate::runtime::Runtime;
use crate::value::{ObjId, Value};

const MAX_FRAMES: usize = 512;

pub(crate) struct Catch {
    target: usize,
    sp: usize,
}

pub(crate) struct Frame {
    pub(crate) code_id: ObjId,
    pub(crate) code: Rc<CodeObj>,
    pub(crate) bucket: ObjId,
    pub(crate) parents: SmallVec<[ObjId; 4]>,
    pub(crate) locals: Vec<Value>,
    pub(crate) stack: Vec<Value>,
    catches: SmallVec<[Catch; 2]>,
    ip: usize,
}

/// Runs a function to completion. The returned value carries one owned
/// reference; release it when done. An uncaught raise is rendered into
/// the error.
pub fn execute(rt: &mut Runtime, func: ObjId, args: &[Value]) -> Result<Value, ExecError> {
    let out = call_value(rt, Value::Obj(func), args);
    finish(rt, out)
}

/// Like `execute` but binds the frame to a caller-owned bucket, so
/// interactive sessions can share top-level state across units.
pub fn execute_with_env(rt: &mut Runtime, func: ObjId, env: ObjId) -> Result<Value, ExecError> {
    let out = match func_parts(rt, func) {
        Ok(parts) => call_script(rt, parts, &[], Some(env)),
        Err(raised) => Err(raised),
    };
    finish(rt, out)
}

fn finish(rt: &mut Runtime, out: Result<Value, Value>) -> Result<Value, ExecError> {
    match out {
        Ok(v) => Ok(v),
        Err(raised) => {
            let msg = binop::render(rt, raised);
            rt.release(raised);
            Err(ExecError::Uncaught(msg))
        }
    }
}

/// Calls any callable value: script function, native, or class (which
/// instantiates). Arguments are borrowed; the result is owned.
pub fn call_value(rt: &mut Runtime, callee: Value, args: &[Value]) -> Result<Value, Value> {
    let Some(id) = callee.as_obj() else {
        return Err(rt.raise_error("Mismatched Type", "value is not callable"));
    };
    enum Plan {
        Native(crate::object::NativeFn),
        Script,
        Class,
    }
    let plan = match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Func(f)) => match f.native {
            Some(native) => Plan::Native(native),
            None => Plan::Script,
        },
        Some(ObjKind::Class(_)) => Plan::Class,
        _ => {
            return Err(rt.raise_error("Mismatched Type", "value is not callable"));
        }
    };
    match plan {
        Plan::Native(native) => native(rt, args),
        Plan::Script => {
            let parts = func_parts(rt, id)?;
            call_script(rt, parts, args, None)
        }
        Plan::Class => instantiate(rt, id, args),
    }
}

struct FuncParts {
    code_id: ObjId,
    code: Rc<CodeObj>,
    argc: u8,
    parents: SmallVec<[ObjId; 4]>,
}

fn func_parts(rt: &mut Runtime, id: ObjId) -> Result<FuncParts, Value> {
    let info = match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Func(f)) => f.code.map(|c| (c, f.argc, f.parents.clone())),
        _ => None,
    };
    let Some((code_id, argc, parents)) = info else {
        return Err(rt.raise_error("Mismatched Type", "value is not callable"));
    };
    let code = match rt.obj(code_id).map(|o| &o.kind) {
        Some(ObjKind::Code(rc)) => rc.clone(),
        _ => {
            return Err(rt.raise_error("Malformed Code", "function body is not code"));
        }
    };
    Ok(FuncParts {
        code_id,
        code,
        argc,
        parents,
    })
}

fn call_script(
    rt: &mut Runtime,
    parts: FuncParts,
    args: &[Value],
    env: Option<ObjId>,
) -> Result<Value, Value> {
    if rt.frames.len() >= MAX_FRAMES {
        return Err(rt.raise_error("Stack Overflow", "call depth exceeded"));
    }
    let bucket = match env {
        Some(b) => {
            rt.retain(Value::Obj(b));
            b
        }
        None => rt.alloc_instance(),
    };
    // Parameters bind as closed-over names; the compiler seeds the name
    // table with them in order.
    for i in 0..parts.argc as usize {
        let v = args.get(i).copied().unwrap_or(Value::Nil);
        if let Some(name) = parts.code.names.get(i) {
            let name = name.clone();
            rt.set_member(bucket, &name, v);
        }
    }
    rt.retain(Value::Obj(parts.code_id));
    for &p in &parts.parents {
        rt.retain(Value::Obj(p));
    }
    let frame = Frame {
        code_id: parts.code_id,
        code: parts.code.clone(),
        bucket,
        parents: parts.parents,
        locals: vec![Value::Nil; parts.code.num_locals],
        stack: Vec::with_capacity(parts.code.hints.max_stack),
        catches: SmallVec::new(),
        ip: 0,
    };
    rt.frames.push(frame);
    let out = exec_top(rt, &parts.code);
    pop_frame(rt);
    out
}

fn pop_frame(rt: &mut Runtime) {
    let Some(frame) = rt.frames.pop() else { return };
    for v in frame.stack {
        rt.release(v);
    }
    for v in frame.locals {
        rt.release(v);
    }
    rt.release(Value::Obj(frame.bucket));
    rt.release(Value::Obj(frame.code_id));
    for p in frame.parents {
        rt.release(Value::Obj(p));
    }
}

// ---- stack helpers ----

fn push(rt: &mut Runtime, fidx: usize, v: Value) {
    rt.frames[fidx].stack.push(v);
}

fn pop(rt: &mut Runtime, fidx: usize) -> Value {
    rt.frames[fidx].stack.pop().unwrap_or(Value::Nil)
}

fn peek(rt: &Runtime, fidx: usize, depth: usize) -> Value {
    let stack = &rt.frames[fidx].stack;
    let n = stack.len();
    if depth < n {
        stack[n - 1 - depth]
    } else {
        Value::Nil
    }
}

/// Routes a raised value (owned) to the innermost handler of the current
/// frame, or propagates it out.
fn raise(rt: &mut Runtime, fidx: usize, payload: Value) -> Result<(), Value> {
    match rt.frames[fidx].catches.pop() {
        Some(catch) => {
            while rt.frames[fidx].stack.len() > catch.sp {
                let v = pop(rt, fidx);
                rt.release(v);
            }
            push(rt, fidx, payload);
            rt.frames[fidx].ip = catch.target;
            Ok(())
        }
        None => Err(payload),
    }
}

fn malformed(rt: &mut Runtime, what: &str) -> Value {
    rt.raise_error("Malformed Code", what.to_owned())
}

// ---- closure lookup ----

fn find_close(rt: &Runtime, fidx: usize, name: &str) -> Option<(ObjId, Value)> {
    let frame = &rt.frames[fidx];
    if let Some(v) = rt.get_member(frame.bucket, name) {
        return Some((frame.bucket, v));
    }
    for &p in frame.parents.iter().rev() {
        if let Some(v) = rt.get_member(p, name) {
            return Some((p, v));
        }
    }
    None
}

// ---- dispatch ----

fn exec_top(rt: &mut Runtime, code: &Rc<CodeObj>) -> Result<Value, Value> {
    let fidx = rt.frames.len() - 1;
    let ops: &[u8] = &code.ops;
    loop {
        rt.steps = rt.steps.wrapping_add(1);
        if rt.steps & 0x3F == 0 {
            rt.maybe_collect();
        }
        let ip = rt.frames[fidx].ip;
        if ip >= ops.len() {
            return Ok(Value::Nil);
        }
        let Some((op, next)) = next_op(ops, ip) else {
            let e = malformed(rt, "truncated instruction");
            raise(rt, fidx, e)?;
            continue;
        };
        rt.frames[fidx].ip = next;
        use Opcode::*;
        match op {
            Nop => {}
            PushNil => push(rt, fidx, Value::Nil),
            PushBool => {
                let b = ops[ip + 1] != 0;
                push(rt, fidx, Value::from_bool(b));
            }
            Pop => {
                let v = pop(rt, fidx);
                rt.release(v);
            }
            Dup => {
                let v = peek(rt, fidx, 0);
                rt.retain(v);
                push(rt, fidx, v);
            }
            Dup2 => {
                let a = peek(rt, fidx, 1);
                let b = peek(rt, fidx, 0);
                rt.retain(a);
                rt.retain(b);
                push(rt, fidx, a);
                push(rt, fidx, b);
            }
            Swap => {
                let stack = &mut rt.frames[fidx].stack;
                let n = stack.len();
                if n >= 2 {
                    stack.swap(n - 1, n - 2);
                }
            }
            Sink => {
                // [x, y, z] with z on top becomes [z, x, y]
                let stack = &mut rt.frames[fidx].stack;
                let n = stack.len();
                if n >= 3 {
                    stack[n - 3..].rotate_right(1);
                }
            }
            LoadConst => {
                let idx = quad(ops, ip) as usize;
                match code.constants.get(idx).copied() {
                    Some(v) => {
                        rt.retain(v);
                        push(rt, fidx, v);
                    }
                    None => {
                        let e = malformed(rt, "constant index out of range");
                        raise(rt, fidx, e)?;
                    }
                }
            }
            LoadLocal => {
                let idx = quad(ops, ip) as usize;
                let v = rt.frames[fidx].locals.get(idx).copied().unwrap_or(Value::Nil);
                rt.retain(v);
                push(rt, fidx, v);
            }
            SaveLocal => {
                let idx = quad(ops, ip) as usize;
                let v = peek(rt, fidx, 0);
                rt.retain(v);
                let old = {
                    let locals = &mut rt.frames[fidx].locals;
                    if idx < locals.len() {
                        std::mem::replace(&mut locals[idx], v)
                    } else {
                        Value::Nil
                    }
                };
                rt.release(old);
            }
            LoadClose => {
                let Some(name) = name_at(code, ops, ip) else {
                    let e = malformed(rt, "name index out of range");
                    raise(rt, fidx, e)?;
                    continue;
                };
                match find_close(rt, fidx, &name) {
                    Some((_, v)) => {
                        rt.retain(v);
                        push(rt, fidx, v);
                    }
                    None => {
                        let e = rt.raise_error("Undefined Variable", name);
                        raise(rt, fidx, e)?;
                    }
                }
            }
            SaveClose => {
                let Some(name) = name_at(code, ops, ip) else {
                    let e = malformed(rt, "name index out of range");
                    raise(rt, fidx, e)?;
                    continue;
                };
                let v = peek(rt, fidx, 0);
                let target = match find_close(rt, fidx, &name) {
                    Some((owner, _)) => owner,
                    None => rt.frames[fidx].bucket,
                };
                rt.set_member(target, &name, v);
            }
            LoadMember => {
                let Some(name) = name_at(code, ops, ip) else {
                    let e = malformed(rt, "name index out of range");
                    raise(rt, fidx, e)?;
                    continue;
                };
                let obj = pop(rt, fidx);
                match obj.as_obj() {
                    Some(id) => {
                        let v = rt.get_member(id, &name).unwrap_or(Value::Nil);
                        rt.retain(v);
                        rt.release(obj);
                        push(rt, fidx, v);
                    }
                    None => {
                        let e = rt.raise_error("Mismatched Type", "member access on non-object");
                        raise(rt, fidx, e)?;
                    }
                }
            }
            SaveMember => {
                let Some(name) = name_at(code, ops, ip) else {
                    let e = malformed(rt, "name index out of range");
                    raise(rt, fidx, e)?;
                    continue;
                };
                let obj = pop(rt, fidx);
                let v = peek(rt, fidx, 0);
                match obj.as_obj() {
                    Some(id) => {
                        rt.set_member(id, &name, v);
                        rt.release(obj);
                    }
                    None => {
                        let e = rt.raise_error("Mismatched Type", "member store on non-object");
                        raise(rt, fidx, e)?;
                    }
                }
            }
            LoadIndex => {
                let index = peek(rt, fidx, 0);
                let target = peek(rt, fidx, 1);
                let result = builtins::index_get(rt, target, index);
                let (a, b) = (pop(rt, fidx), pop(rt, fidx));
                rt.release(a);
                rt.release(b);
                match result {
                    Ok(v) => push(rt, fidx, v),
                    Err(e) => raise(rt, fidx, e)?,
                }
            }
            SaveIndex => {
                let index = peek(rt, fidx, 0);
                let target = peek(rt, fidx, 1);
                let value = peek(rt, fidx, 2);
                let result = builtins::index_set(rt, target, index, value);
                let (a, b) = (pop(rt, fidx), pop(rt, fidx));
                rt.release(a);
                rt.release(b);
                if let Err(e) = result {
                    raise(rt, fidx, e)?;
                }
            }
            MakeFunction => {
                let argc = ops[ip + 1];
                let code_val = pop(rt, fidx);
                let valid = code_val
                    .as_obj()
                    .and_then(|id| rt.obj(id))
                    .is_some_and(|o| matches!(o.kind, ObjKind::Code(_)));
                if !valid {
                    rt.release(code_val);
                    let e = malformed(rt, "function body is not code");
                    raise(rt, fidx, e)?;
                    continue;
                }
                let refname = match code_val.as_obj().and_then(|id| rt.obj(id)) {
                    Some(obj) => match &obj.kind {
                        ObjKind::Code(c) => c.refname.clone(),
                        _ => FuncObj::DEFAULT_REFNAME.to_owned(),
                    },
                    None => FuncObj::DEFAULT_REFNAME.to_owned(),
                };
                let mut parents = rt.frames[fidx].parents.clone();
                parents.push(rt.frames[fidx].bucket);
                for &p in &parents {
                    rt.retain(Value::Obj(p));
                }
                let func = rt.alloc(ObjKind::Func(FuncObj {
                    code: code_val.as_obj(),
                    native: None,
                    argc,
                    parents,
                    refname,
                }));
                push(rt, fidx, Value::Obj(func));
            }
            MakeClass => {
                make_class(rt, fidx, code, ops, ip)?;
            }
            MakeArray => {
                let n = quad(ops, ip) as usize;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(pop(rt, fidx));
                }
                items.reverse();
                let arr = builtins::alloc_array(rt, items.clone());
                for v in items {
                    rt.release(v);
                }
                push(rt, fidx, Value::Obj(arr));
            }
            MakeTable => {
                let n = quad(ops, ip) as usize;
                let mut pairs = Vec::with_capacity(n);
                for _ in 0..n {
                    let v = pop(rt, fidx);
                    let k = pop(rt, fidx);
                    pairs.push((k, v));
                }
                pairs.reverse();
                let table = builtins::alloc_table(rt, pairs.clone());
                for (k, v) in pairs {
                    rt.release(k);
                    rt.release(v);
                }
                push(rt, fidx, Value::Obj(table));
            }
            MakeObject => {
                let count = ops[ip + 1] as usize;
                let inst = rt.alloc_instance();
                for k in 0..count {
                    let Some(name) = name_at_offset(code, ops, ip + 2 + k * 4) else {
                        continue;
                    };
                    let v = pop(rt, fidx);
                    rt.set_member(inst, &name, v);
                    rt.release(v);
                }
                push(rt, fidx, Value::Obj(inst));
            }
            MakeIter => {
                let owner = pop(rt, fidx);
                let cursor = iter_cursor(rt, owner);
                if let IterCursor::Seq(first) = cursor {
                    rt.retain(first);
                }
                let iter = rt.alloc(ObjKind::Iterable {
                    owner,
                    cursor,
                    index: -1,
                });
                push(rt, fidx, Value::Obj(iter));
            }
            NextIterOrJump => {
                let target = quad(ops, ip) as usize;
                iter_next(rt, fidx, target)?;
            }
            IterIndex => {
                let iter = peek(rt, fidx, 0);
                let index = match iter.as_obj().and_then(|id| rt.obj(id)) {
                    Some(obj) => match obj.kind {
                        ObjKind::Iterable { index, .. } => index,
                        _ => 0,
                    },
                    None => 0,
                };
                push(rt, fidx, Value::Int(index));
            }
            Jump => {
                rt.frames[fidx].ip = quad(ops, ip) as usize;
            }
            JumpFalse => {
                let v = pop(rt, fidx);
                if !v.truthy() {
                    rt.frames[fidx].ip = quad(ops, ip) as usize;
                }
                rt.release(v);
            }
            JumpTrueElsePop => {
                let v = peek(rt, fidx, 0);
                if v.truthy() {
                    rt.frames[fidx].ip = quad(ops, ip) as usize;
                } else {
                    let v = pop(rt, fidx);
                    rt.release(v);
                }
            }
            JumpFalseElsePop => {
                let v = peek(rt, fidx, 0);
                if !v.truthy() {
                    rt.frames[fidx].ip = quad(ops, ip) as usize;
                } else {
                    let v = pop(rt, fidx);
                    rt.release(v);
                }
            }
            Call => {
                let argc = ops[ip + 1] as usize;
                let n = rt.frames[fidx].stack.len();
                if n < argc + 1 {
                    let e = malformed(rt, "call underflows the stack");
                    raise(rt, fidx, e)?;
                    continue;
                }
                // Operands stay on the stack while the callee runs.
                let args: Vec<Value> = rt.frames[fidx].stack[n - argc..].to_vec();
                let callee = rt.frames[fidx].stack[n - argc - 1];
                let result = call_value(rt, callee, &args);
                for _ in 0..argc + 1 {
                    let v = pop(rt, fidx);
                    rt.release(v);
                }
                match result {
                    Ok(v) => push(rt, fidx, v),
                    Err(e) => raise(rt, fidx, e)?,
                }
            }
            Return => {
                return Ok(pop(rt, fidx));
            }
            Add | Sub | Mul | Div | Mod | Pow | Lt | Gt | Le | Ge | Eq | Ne | And | Or
            | Coalesce => {
                let b = peek(rt, fidx, 0);
                let a = peek(rt, fidx, 1);
                let result = binop::binary(rt, op, a, b);
                let (x, y) = (pop(rt, fidx), pop(rt, fidx));
                rt.release(x);
                rt.release(y);
                match result {
                    Ok(v) => push(rt, fidx, v),
                    Err(e) => raise(rt, fidx, e)?,
                }
            }
            Not | Negate => {
                let v = pop(rt, fidx);
                let out = binop::unary(op, v);
                rt.release(v);
                push(rt, fidx, out);
            }
            Print => {
                let v = peek(rt, fidx, 0);
                let text = binop::render(rt, v);
                rt.output.push_str(&text);
                rt.output.push('\n');
                let v = pop(rt, fidx);
                rt.release(v);
            }
            Raise => {
                let v = pop(rt, fidx);
                raise(rt, fidx, v)?;
            }
            PushCatch => {
                let target = quad(ops, ip) as usize;
                let sp = rt.frames[fidx].stack.len();
                rt.frames[fidx].catches.push(Catch { target, sp });
            }
            PopCatch => {
                rt.frames[fidx].catches.pop();
            }
            LoadExtension => {
                let Some(name) = name_at(code, ops, ip) else {
                    let e = malformed(rt, "name index out of range");
                    raise(rt, fidx, e)?;
                    continue;
                };
                match crate::ext::load_extension(rt, &name) {
                    Ok(v) => push(rt, fidx, v),
                    Err(err) => {
                        let e = rt.raise_error("Load Error", err.to_string());
                        raise(rt, fidx, e)?;
                    }
                }
            }
        }
    }
}

fn quad(ops: &[u8], ip: usize) -> u32 {
    read_u32(ops, ip + 1).unwrap_or(0)
}

fn name_at(code: &CodeObj, ops: &[u8], ip: usize) -> Option<String> {
    name_at_offset(code, ops, ip + 1)
}

fn name_at_offset(code: &CodeObj, ops: &[u8], at: usize) -> Option<String> {
    let idx = read_u32(ops, at)? as usize;
    code.names.get(idx).cloned()
}

// ---- classes ----

fn make_class(
    rt: &mut Runtime,
    fidx: usize,
    code: &Rc<CodeObj>,
    ops: &[u8],
    ip: usize,
) -> Result<(), Value> {
    let count = ops[ip + 1] as usize;
    let flags = ops[ip + 2];
    // Stack, top down: refname string, init?, superclass?, members.
    let refname_v = pop(rt, fidx);
    let refname = match refname_v.as_obj().and_then(|id| rt.obj(id)) {
        Some(obj) => match &obj.kind {
            ObjKind::Str(s) => s.clone(),
            _ => String::new(),
        },
        None => String::new(),
    };
    rt.release(refname_v);
    let init = (flags & 1 != 0).then(|| pop(rt, fidx));
    let superclass = (flags & 2 != 0).then(|| pop(rt, fidx));
    let mut member_names = Vec::with_capacity(count);
    let mut member_values = Vec::with_capacity(count);
    for k in 0..count {
        // Name operands are in reverse declaration order, matching pops.
        let name = name_at_offset(code, ops, ip + 3 + k * 4).unwrap_or_default();
        member_names.push(name);
        member_values.push(pop(rt, fidx));
    }
    let class = rt.alloc(ObjKind::Class(crate::object::ClassObj {
        refname,
        member_names,
        member_values,
        superclass,
        init,
    }));
    push(rt, fidx, Value::Obj(class));
    Ok(())
}

fn instantiate(rt: &mut Runtime, class_id: ObjId, args: &[Value]) -> Result<Value, Value> {
    let inst = rt.alloc_instance();
    rt.push_temp(Value::Obj(inst));
    let out = instantiate_into(rt, class_id, inst, args);
    rt.pop_temp();
    match out {
        Ok(()) => Ok(Value::Obj(inst)),
        Err(e) => {
            rt.release(Value::Obj(inst));
            Err(e)
        }
    }
}

fn instantiate_into(
    rt: &mut Runtime,
    class_id: ObjId,
    inst: ObjId,
    args: &[Value],
) -> Result<(), Value> {
    let Some(class) = rt.class_obj(class_id) else {
        return Err(rt.raise_error("Mismatched Type", "value is not a class"));
    };
    let refname = class.refname.clone();
    let member_names = class.member_names.clone();
    let member_values = class.member_values.clone();
    let superclass = class.superclass;
    let init = class.init;

    if let Some(sup) = superclass {
        let sup_inst = call_value(rt, sup, &[])?;
        if let Some(sid) = sup_inst.as_obj() {
            let mut inherited = Vec::new();
            if let Some(obj) = rt.obj(sid) {
                obj.members
                    .for_each(&mut |name, v| inherited.push((name.to_owned(), *v)));
            }
            for (name, v) in inherited {
                rt.set_member(inst, &name, v);
            }
        }
        rt.set_member(inst, "super_", sup_inst);
        rt.release(sup_inst);
    }

    // Every instantiation gets a binding bucket so member functions can
    // reach the new instance by the class's reference name.
    let bucket = rt.alloc_instance();
    rt.push_temp(Value::Obj(bucket));
    let out = bind_members(rt, inst, bucket, &refname, &member_names, &member_values, init, args);
    rt.pop_temp();
    rt.release(Value::Obj(bucket));
    out
}

#[allow(clippy::too_many_arguments)]
fn bind_members(
    rt: &mut Runtime,
    inst: ObjId,
    bucket: ObjId,
    refname: &str,
    member_names: &[String],
    member_values: &[Value],
    init: Option<Value>,
    args: &[Value],
) -> Result<(), Value> {
    if !refname.is_empty() {
        rt.set_member(bucket, refname, Value::Obj(inst));
    }
    for (name, v) in member_names.iter().zip(member_values) {
        let bound = rebind_func(rt, *v, bucket);
        rt.set_member(inst, name, bound);
        rt.release(bound);
    }
    if let Some(init) = init {
        let bound = rebind_func(rt, init, bucket);
        let result = call_value(rt, bound, args);
        rt.release(bound);
        let ret = result?;
        rt.release(ret);
    }
    Ok(())
}

/// Clones a script function with one more closure parent; anything else
/// passes through. Returns an owned value either way.
fn rebind_func(rt: &mut Runtime, v: Value, bucket: ObjId) -> Value {
    let info = v.as_obj().and_then(|id| match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Func(f)) if f.native.is_none() => {
            f.code.map(|c| (c, f.argc, f.parents.clone(), f.refname.clone()))
        }
        _ => None,
    });
    let Some((code, argc, mut parents, refname)) = info else {
        rt.retain(v);
        return v;
    };
    parents.push(bucket);
    rt.retain(Value::Obj(code));
    for &p in &parents {
        rt.retain(Value::Obj(p));
    }
    Value::Obj(rt.alloc(ObjKind::Func(FuncObj {
        code: Some(code),
        native: None,
        argc,
        parents,
        refname,
    })))
}

// ---- iteration ----

fn iter_cursor(rt: &Runtime, owner: Value) -> IterCursor {
    let Some(id) = owner.as_obj() else {
        return IterCursor::Done;
    };
    match rt.obj(id).map(|o| &o.kind) {
        Some(ObjKind::Seq { .. }) => IterCursor::Seq(owner),
        Some(ObjKind::Str(_)) => IterCursor::Str(0),
        Some(ObjKind::Custom { payload, .. })
            if payload.downcast_ref::<builtins::ArrayPayload>().is_some() =>
        {
            IterCursor::Array(0)
        }
        _ => IterCursor::Done,
    }
}

enum Advance {
    Jump,
    SeqElem { elem: Value, next: Value, old: Value },
    StrElem { text: String, next_i: usize },
    ArrElem { elem: Value, next_i: usize },
}

fn iter_next(rt: &mut Runtime, fidx: usize, target: usize) -> Result<(), Value> {
    let iter_v = peek(rt, fidx, 0);
    let Some(iid) = iter_v.as_obj() else {
        let e = malformed(rt, "iteration over a non-iterator");
        return raise(rt, fidx, e);
    };
    let plan = {
        match rt.obj(iid).map(|o| &o.kind) {
            Some(ObjKind::Iterable { owner, cursor, .. }) => match cursor {
                IterCursor::Seq(cur) => match cur.as_obj().and_then(|c| rt.obj(c)) {
                    Some(cell) => match &cell.kind {
                        ObjKind::Seq { value, next } => Advance::SeqElem {
                            elem: *value,
                            next: *next,
                            old: *cur,
                        },
                        _ => Advance::Jump,
                    },
                    None => Advance::Jump,
                },
                IterCursor::Str(i) => {
                    let ch = owner
                        .as_obj()
                        .and_then(|o| rt.obj(o))
                        .and_then(|obj| match &obj.kind {
                            ObjKind::Str(s) => s.chars().nth(*i),
                            _ => None,
                        });
                    match ch {
                        Some(c) => Advance::StrElem {
                            text: c.to_string(),
                            next_i: i + 1,
                        },
                        None => Advance::Jump,
                    }
                }
                IterCursor::Array(i) => {
                    let elem = owner
                        .as_obj()
                        .and_then(|o| rt.obj(o))
                        .and_then(|obj| match &obj.kind {
                            ObjKind::Custom { payload, .. } => payload
                                .downcast_ref::<builtins::ArrayPayload>()
                                .and_then(|arr| arr.0.get(*i).copied()),
                            _ => None,
                        });
                    match elem {
                        Some(elem) => Advance::ArrElem { elem, next_i: i + 1 },
                        None => Advance::Jump,
                    }
                }
                IterCursor::Done => Advance::Jump,
            },
            _ => Advance::Jump,
        }
    };
    match plan {
        Advance::Jump => {
            rt.frames[fidx].ip = target;
        }
        Advance::SeqElem { elem, next, old } => {
            rt.retain(elem);
            rt.retain(next);
            set_cursor(rt, iid, IterCursor::Seq(next));
            rt.release(old);
            push(rt, fidx, elem);
        }
        Advance::StrElem { text, next_i } => {
            let s = rt.alloc_str(text);
            set_cursor(rt, iid, IterCursor::Str(next_i));
            push(rt, fidx, Value::Obj(s));
        }
        Advance::ArrElem { elem, next_i } => {
            rt.retain(elem);
            set_cursor(rt, iid, IterCursor::Array(next_i));
            push(rt, fidx, elem);
        }
    }
    Ok(())
}

fn set_cursor(rt: &mut Runtime, iid: ObjId, new: IterCursor) {
    if let Some(obj) = rt.obj_mut(iid) {
        if let ObjKind::Iterable { cursor, index, .. } = &mut obj.kind {
            *cursor = new;
            *index += 1;
        }
    }
}
