//! Structural checks on emitted bytecode: stream well-formedness,
//! operand ranges, constant interning, and closure promotion.

use std::rc::Rc;

use lyra_compiler::{compile, compile_main};
use lyra_ir::{next_op, read_u32, BinOp, Node, Opcode};
use lyra_runtime::{execute, CodeObj, ObjId, ObjKind, Runtime, Value};
use proptest::prelude::*;

fn code_of(rt: &Runtime, id: ObjId) -> Rc<CodeObj> {
    match &rt.obj(id).unwrap().kind {
        ObjKind::Code(rc) => rc.clone(),
        _ => panic!("not code"),
    }
}

fn opcodes(code: &CodeObj) -> Vec<Opcode> {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < code.ops.len() {
        let (op, next) = next_op(&code.ops, ip).unwrap_or_else(|| panic!("bad stream at {ip}"));
        out.push(op);
        ip = next;
    }
    out
}

/// Walks a code object and everything nested in its constant pool,
/// asserting every instruction decodes and every operand is in range.
fn check_stream(rt: &Runtime, code: &CodeObj) {
    use Opcode::*;
    let mut ip = 0;
    while ip < code.ops.len() {
        let Some((op, next)) = next_op(&code.ops, ip) else {
            panic!("stream does not decode at offset {ip}");
        };
        match op {
            Jump | JumpFalse | JumpTrueElsePop | JumpFalseElsePop | NextIterOrJump
            | PushCatch => {
                let target = read_u32(&code.ops, ip + 1).unwrap() as usize;
                assert!(target < code.ops.len(), "jump target {target} out of range");
            }
            LoadConst => {
                let idx = read_u32(&code.ops, ip + 1).unwrap() as usize;
                assert!(idx < code.constants.len(), "constant {idx} out of range");
            }
            LoadClose | SaveClose | LoadMember | SaveMember | LoadExtension => {
                let idx = read_u32(&code.ops, ip + 1).unwrap() as usize;
                assert!(idx < code.names.len(), "name {idx} out of range");
            }
            LoadLocal | SaveLocal => {
                let idx = read_u32(&code.ops, ip + 1).unwrap() as usize;
                assert!(idx < code.num_locals, "local {idx} out of range");
            }
            _ => {}
        }
        ip = next;
    }
    assert_eq!(code.lines.len(), code.ops.len());
    for &c in &code.constants {
        if let Some(id) = c.as_obj() {
            if let ObjKind::Code(nested) = &rt.obj(id).unwrap().kind {
                let nested = nested.clone();
                check_stream(rt, &nested);
            }
        }
    }
}

fn make_counter() -> Vec<Node> {
    let inner = Node::func(
        vec![],
        vec![
            Node::assign(
                Node::var("x", 3),
                Node::binary(BinOp::Add, Node::var("x", 3), Node::int(1, 3), 3),
                3,
            ),
            Node::print(Node::var("x", 4), 4),
        ],
        2,
    );
    let outer = Node::func(
        vec![],
        vec![
            Node::assign(Node::var("x", 2), Node::int(1, 2), 2),
            Node::Return {
                value: Some(Box::new(inner)),
                line: 2,
            },
        ],
        1,
    );
    vec![Node::assign(Node::var("make", 1), outer, 1)]
}

#[test]
fn closure_promotion_rewrites_the_outer_store() {
    let mut rt = Runtime::new();
    let root = compile(&mut rt, &make_counter()).unwrap();
    let root_code = code_of(&rt, root);
    check_stream(&rt, &root_code);

    // the outer function's code is a constant of the root unit
    let outer_code = root_code
        .constants
        .iter()
        .find_map(|c| {
            let id = c.as_obj()?;
            match &rt.obj(id).unwrap().kind {
                ObjKind::Code(rc) => Some(rc.clone()),
                _ => None,
            }
        })
        .unwrap();
    let ops = opcodes(&outer_code);
    assert!(ops.contains(&Opcode::SaveClose), "store of x was not promoted");
    assert!(
        !ops.contains(&Opcode::SaveLocal) && !ops.contains(&Opcode::LoadLocal),
        "a local form survived promotion"
    );
}

#[test]
fn repeated_literals_share_a_constant_slot() {
    let mut rt = Runtime::new();
    let nodes = vec![
        Node::print(Node::binary(BinOp::Add, Node::int(7, 1), Node::int(7, 1), 1), 1),
        Node::print(Node::str("dup", 2), 2),
        Node::print(Node::str("dup", 3), 3),
    ];
    let root = compile(&mut rt, &nodes).unwrap();
    let code = code_of(&rt, root);
    let sevens = code
        .constants
        .iter()
        .filter(|&&c| c == Value::Int(7))
        .count();
    assert_eq!(sevens, 1);
    let dups = code
        .constants
        .iter()
        .filter(|c| {
            c.as_obj()
                .and_then(|id| match &rt.obj(id).unwrap().kind {
                    ObjKind::Str(s) => Some(s == "dup"),
                    _ => None,
                })
                .unwrap_or(false)
        })
        .count();
    assert_eq!(dups, 1);
}

#[test]
fn control_flow_lowers_to_a_well_formed_stream() {
    let mut rt = Runtime::new();
    let nodes = vec![
        Node::Loop {
            init: Some(Box::new(Node::assign(Node::var("i", 1), Node::int(0, 1), 1))),
            cond: Some(Box::new(Node::binary(
                BinOp::Lt,
                Node::var("i", 1),
                Node::int(4, 1),
                1,
            ))),
            step: Some(Box::new(Node::assign(
                Node::var("i", 1),
                Node::binary(BinOp::Add, Node::var("i", 1), Node::int(1, 1), 1),
                1,
            ))),
            body: vec![Node::If {
                arms: vec![lyra_ir::IfArm {
                    cond: Some(Node::binary(BinOp::Eq, Node::var("i", 2), Node::int(2, 2), 2)),
                    body: vec![Node::Continue { line: 2 }],
                }],
                line: 2,
            }],
            line: 1,
        },
        Node::TryCatch {
            body: vec![Node::unary(lyra_ir::UnOp::Raise, Node::str("e", 4), 4)],
            catch_name: "e".to_owned(),
            catch_body: vec![],
            line: 4,
        },
    ];
    let root = compile(&mut rt, &nodes).unwrap();
    let code = code_of(&rt, root);
    check_stream(&rt, &code);
    // implicit return is always present
    let ops = opcodes(&code);
    assert_eq!(ops.last(), Some(&Opcode::Return));
}

fn small_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("a"), Just("b"), Just("c")]
}

fn small_stmt() -> impl Strategy<Value = (Node, bool)> {
    prop_oneof![
        (small_name(), any::<i8>())
            .prop_map(|(n, v)| (Node::assign(Node::var(n, 1), Node::int(v as i64, 1), 1), false)),
        (small_name(), small_name()).prop_map(|(x, y)| {
            let sum = Node::binary(BinOp::Add, Node::var(y, 1), Node::int(1, 1), 1);
            (Node::assign(Node::var(x, 1), sum, 1), false)
        }),
        small_name().prop_map(|n| (Node::print(Node::var(n, 1), 1), true)),
    ]
}

proptest! {
    #[test]
    fn generated_programs_compile_and_run(stmts in proptest::collection::vec(small_stmt(), 0..32)) {
        let mut nodes = vec![
            Node::assign(Node::var("a", 1), Node::int(0, 1), 1),
            Node::assign(Node::var("b", 1), Node::int(0, 1), 1),
            Node::assign(Node::var("c", 1), Node::int(0, 1), 1),
        ];
        let prints = stmts.iter().filter(|(_, p)| *p).count();
        nodes.extend(stmts.into_iter().map(|(n, _)| n));

        let mut rt = Runtime::new();
        let root = compile(&mut rt, &nodes).unwrap();
        let code = code_of(&rt, root);
        check_stream(&rt, &code);

        let func = compile_main(&mut rt, &nodes).unwrap();
        let out = execute(&mut rt, func, &[]).unwrap();
        prop_assert_eq!(out, Value::Nil);
        prop_assert_eq!(rt.output.lines().count(), prints);
    }
}
