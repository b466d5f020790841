//! Dispatch-loop tests over hand-assembled code objects.

use std::rc::Rc;

use lyra_ir::{analyze, Opcode};
use lyra_runtime::{
    execute, execute_with_env, CodeObj, ExecError, FuncObj, ObjId, ObjKind, Runtime, Value,
};
use smallvec::SmallVec;

fn op(ops: &mut Vec<u8>, o: Opcode) {
    ops.push(o as u8);
}

fn opq(ops: &mut Vec<u8>, o: Opcode, v: u32) {
    ops.push(o as u8);
    ops.extend(v.to_le_bytes());
}

fn make_code(
    rt: &mut Runtime,
    ops: Vec<u8>,
    constants: Vec<Value>,
    names: Vec<&str>,
    num_locals: usize,
) -> ObjId {
    let hints = analyze(&ops);
    let lines = vec![0; ops.len()];
    rt.alloc(ObjKind::Code(Rc::new(CodeObj {
        ops,
        constants,
        names: names.into_iter().map(str::to_owned).collect(),
        lines,
        num_locals,
        hints,
        refname: "test".to_owned(),
    })))
}

fn make_func(rt: &mut Runtime, code: ObjId, argc: u8) -> ObjId {
    rt.alloc(ObjKind::Func(FuncObj {
        code: Some(code),
        native: None,
        argc,
        parents: SmallVec::new(),
        refname: "test".to_owned(),
    }))
}

fn str_of(rt: &Runtime, v: Value) -> String {
    match v {
        Value::Obj(id) => match &rt.obj(id).unwrap().kind {
            ObjKind::Str(s) => s.clone(),
            _ => panic!("not a string"),
        },
        other => panic!("not an object: {other:?}"),
    }
}

#[test]
fn adds_constants() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadConst, 0);
    opq(&mut ops, Opcode::LoadConst, 1);
    op(&mut ops, Opcode::Add);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![Value::Int(2), Value::Int(3)], vec![], 0);
    let func = make_func(&mut rt, code, 0);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(out, Value::Int(5));
}

#[test]
fn divide_by_zero_is_uncaught() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadConst, 0);
    opq(&mut ops, Opcode::LoadConst, 1);
    op(&mut ops, Opcode::Div);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![Value::Int(1), Value::Int(0)], vec![], 0);
    let func = make_func(&mut rt, code, 0);
    let err = execute(&mut rt, func, &[]).unwrap_err();
    let ExecError::Uncaught(msg) = err;
    assert!(msg.starts_with("Divide By Zero"), "got {msg}");
}

#[test]
fn catch_handler_receives_payload() {
    let mut rt = Runtime::new();
    let boom = rt.alloc_str("boom");
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::PushCatch, 11);
    opq(&mut ops, Opcode::LoadConst, 0);
    op(&mut ops, Opcode::Raise);
    // 11: handler; the raised value is back on the stack
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![Value::Obj(boom)], vec![], 0);
    let func = make_func(&mut rt, code, 0);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(str_of(&rt, out), "boom");
}

#[test]
fn jump_false_takes_else_branch() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadConst, 0); // 0
    opq(&mut ops, Opcode::JumpFalse, 16); // 5
    opq(&mut ops, Opcode::LoadConst, 1); // 10
    op(&mut ops, Opcode::Return); // 15
    opq(&mut ops, Opcode::LoadConst, 2); // 16
    op(&mut ops, Opcode::Return); // 21
    let constants = vec![Value::Int(0), Value::Int(1), Value::Int(9)];
    let code = make_code(&mut rt, ops, constants, vec![], 0);
    let func = make_func(&mut rt, code, 0);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(out, Value::Int(9));
}

#[test]
fn locals_round_trip() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadConst, 0);
    opq(&mut ops, Opcode::SaveLocal, 0);
    op(&mut ops, Opcode::Pop);
    opq(&mut ops, Opcode::LoadLocal, 0);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![Value::Int(42)], vec![], 1);
    let func = make_func(&mut rt, code, 0);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(out, Value::Int(42));
}

fn double(_rt: &mut Runtime, args: &[Value]) -> Result<Value, Value> {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(i * 2)),
        _ => Ok(Value::Nil),
    }
}

#[test]
fn calls_native_function() {
    let mut rt = Runtime::new();
    let native = rt.alloc_native("double", 1, double);
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadConst, 0);
    opq(&mut ops, Opcode::LoadConst, 1);
    op(&mut ops, Opcode::Call);
    ops.push(1);
    op(&mut ops, Opcode::Return);
    let constants = vec![Value::Obj(native), Value::Int(21)];
    let code = make_code(&mut rt, ops, constants, vec![], 0);
    let func = make_func(&mut rt, code, 0);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(out, Value::Int(42));
}

#[test]
fn print_appends_to_output() {
    let mut rt = Runtime::new();
    let hi = rt.alloc_str("hi");
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadConst, 0);
    op(&mut ops, Opcode::Print);
    op(&mut ops, Opcode::PushNil);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![Value::Obj(hi)], vec![], 0);
    let func = make_func(&mut rt, code, 0);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(out, Value::Nil);
    assert_eq!(rt.output, "hi\n");
}

#[test]
fn arguments_bind_by_parameter_name() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadClose, 0);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![], vec!["a"], 0);
    let func = make_func(&mut rt, code, 1);
    let out = execute(&mut rt, func, &[Value::Int(7)]).unwrap();
    assert_eq!(out, Value::Int(7));
}

#[test]
fn missing_argument_binds_nil() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadClose, 0);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![], vec!["a"], 0);
    let func = make_func(&mut rt, code, 1);
    let out = execute(&mut rt, func, &[]).unwrap();
    assert_eq!(out, Value::Nil);
}

#[test]
fn runaway_recursion_overflows() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadClose, 0);
    op(&mut ops, Opcode::Call);
    ops.push(0);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![], vec!["f"], 0);
    let env = rt.alloc_instance();
    // the function closes over env, as MakeFunction would capture it
    rt.retain(Value::Obj(env));
    let func = rt.alloc(ObjKind::Func(FuncObj {
        code: Some(code),
        native: None,
        argc: 0,
        parents: SmallVec::from_slice(&[env]),
        refname: "test".to_owned(),
    }));
    rt.set_member(env, "f", Value::Obj(func));
    let err = execute_with_env(&mut rt, func, env).unwrap_err();
    let ExecError::Uncaught(msg) = err;
    assert!(msg.starts_with("Stack Overflow"), "got {msg}");
}

#[test]
fn undefined_name_raises() {
    let mut rt = Runtime::new();
    let mut ops = Vec::new();
    opq(&mut ops, Opcode::LoadClose, 0);
    op(&mut ops, Opcode::Return);
    let code = make_code(&mut rt, ops, vec![], vec!["ghost"], 0);
    let func = make_func(&mut rt, code, 0);
    let err = execute(&mut rt, func, &[]).unwrap_err();
    let ExecError::Uncaught(msg) = err;
    assert!(msg.starts_with("Undefined Variable"), "got {msg}");
}
