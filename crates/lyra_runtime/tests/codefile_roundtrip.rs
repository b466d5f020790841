//! Serialization of compiled units.

use std::rc::Rc;

use lyra_ir::{analyze, Opcode};
use lyra_runtime::{read_code, write_code, CodeFileError, CodeObj, ObjId, ObjKind, Runtime, Value};

fn sample_ops() -> Vec<u8> {
    let mut ops = vec![Opcode::LoadConst as u8];
    ops.extend(0u32.to_le_bytes());
    ops.push(Opcode::Return as u8);
    ops
}

fn make_code(rt: &mut Runtime, constants: Vec<Value>, names: Vec<&str>) -> ObjId {
    let ops = sample_ops();
    let hints = analyze(&ops);
    let lines = vec![7; ops.len()];
    rt.alloc(ObjKind::Code(Rc::new(CodeObj {
        ops,
        constants,
        names: names.into_iter().map(str::to_owned).collect(),
        lines,
        num_locals: 3,
        hints,
        refname: "unit".to_owned(),
    })))
}

fn code_of(rt: &Runtime, id: ObjId) -> Rc<CodeObj> {
    match &rt.obj(id).unwrap().kind {
        ObjKind::Code(rc) => rc.clone(),
        _ => panic!("not code"),
    }
}

#[test]
fn round_trips_scalars_strings_and_names() {
    let mut rt = Runtime::new();
    let s = rt.alloc_str("greeting");
    let id = make_code(
        &mut rt,
        vec![Value::Int(-7), Value::Float(2.5), Value::Obj(s)],
        vec!["alpha", "beta"],
    );
    let mut buf = Vec::new();
    let original = code_of(&rt, id);
    write_code(&rt, &original, &mut buf).unwrap();

    let back_id = read_code(&mut rt, &mut buf.as_slice()).unwrap();
    let back = code_of(&rt, back_id);
    assert_eq!(back.ops, original.ops);
    assert_eq!(back.num_locals, 3);
    assert_eq!(back.names, vec!["alpha", "beta"]);
    assert_eq!(back.constants[0], Value::Int(-7));
    assert_eq!(back.constants[1], Value::Float(2.5));
    let restored = back.constants[2];
    assert!(rt.quick_compare(restored, Value::Obj(s)));
    assert!(back.hints.max_stack >= original.hints.max_stack);
    // line maps are not persisted
    assert!(back.lines.iter().all(|&l| l == 0));
}

#[test]
fn round_trips_nested_code() {
    let mut rt = Runtime::new();
    let inner = make_code(&mut rt, vec![Value::Int(1)], vec![]);
    let outer = make_code(&mut rt, vec![Value::Obj(inner), Value::Int(2)], vec!["f"]);
    let mut buf = Vec::new();
    let original = code_of(&rt, outer);
    write_code(&rt, &original, &mut buf).unwrap();

    let back_id = read_code(&mut rt, &mut buf.as_slice()).unwrap();
    let back = code_of(&rt, back_id);
    assert_eq!(back.constants.len(), 2);
    assert_eq!(back.constants[1], Value::Int(2));
    let nested_id = back.constants[0].as_obj().unwrap();
    let nested = code_of(&rt, nested_id);
    assert_eq!(nested.ops, sample_ops());
    assert_eq!(nested.constants, vec![Value::Int(1)]);
}

#[test]
fn rejects_unknown_constant_tag() {
    let mut rt = Runtime::new();
    let mut buf = Vec::new();
    buf.extend(1u64.to_le_bytes()); // one constant
    buf.extend(0u64.to_le_bytes()); // locals
    buf.extend(0u64.to_le_bytes()); // names
    buf.extend(0u64.to_le_bytes()); // stack hint
    buf.extend(99u32.to_le_bytes()); // bogus tag
    buf.extend(0u64.to_le_bytes());
    let err = read_code(&mut rt, &mut buf.as_slice()).unwrap_err();
    assert!(matches!(err, CodeFileError::BadTag(99)));
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn truncated_input_is_an_io_error() {
    let mut rt = Runtime::new();
    let buf = [1u8, 2, 3];
    let err = read_code(&mut rt, &mut buf.as_slice()).unwrap_err();
    assert!(matches!(err, CodeFileError::Io(_)));
}

#[test]
fn partial_constant_pool_is_released_on_error() {
    let mut rt = Runtime::new();
    let mut buf = Vec::new();
    buf.extend(2u64.to_le_bytes()); // two constants
    buf.extend(0u64.to_le_bytes());
    buf.extend(0u64.to_le_bytes());
    buf.extend(0u64.to_le_bytes());
    buf.extend(3u32.to_le_bytes()); // string tag
    buf.extend(2u64.to_le_bytes());
    buf.extend(b"ok");
    // second constant is missing entirely
    let err = read_code(&mut rt, &mut buf.as_slice()).unwrap_err();
    assert!(matches!(err, CodeFileError::Io(_)));
    assert_eq!(rt.live_objects(), 0);
}
