//! Compiled-unit serialization.
//!
//! A code object writes as fixed-order sections, all integers little
//! endian: an 8-byte count of constants, locals, names, and the stack
//! hint; the name table as length-prefixed byte strings; the constant
//! pool as (4-byte type tag, 8-byte payload size, payload), with nested
//! code as a zero-size tag followed by a recursive block; then the
//! instruction stream length and its raw bytes. Line maps and reference
//! names are not persisted.

use std::io::{Read, Write};
use std::rc::Rc;

use lyra_ir::analyze;

use crate::errors::CodeFileError;
use crate::object::{CodeObj, FuncObj, ObjKind};
use crate::runtime::Runtime;
use crate::value::{ObjId, Value};

const TAG_INT: u32 = 1;
const TAG_FLOAT: u32 = 2;
const TAG_STR: u32 = 3;
const TAG_CODE: u32 = 4;

pub fn write_code(rt: &Runtime, code: &CodeObj, w: &mut impl Write) -> Result<(), CodeFileError> {
    w.write_all(&(code.constants.len() as u64).to_le_bytes())?;
    w.write_all(&(code.num_locals as u64).to_le_bytes())?;
    w.write_all(&(code.names.len() as u64).to_le_bytes())?;
    w.write_all(&(code.hints.max_stack as u64).to_le_bytes())?;
    for name in &code.names {
        w.write_all(&(name.len() as u64).to_le_bytes())?;
        w.write_all(name.as_bytes())?;
    }
    for &c in &code.constants {
        write_constant(rt, c, w)?;
    }
    w.write_all(&(code.ops.len() as u64).to_le_bytes())?;
    w.write_all(&code.ops)?;
    Ok(())
}

fn write_constant(rt: &Runtime, c: Value, w: &mut impl Write) -> Result<(), CodeFileError> {
    match c {
        Value::Int(i) => {
            w.write_all(&TAG_INT.to_le_bytes())?;
            w.write_all(&8u64.to_le_bytes())?;
            w.write_all(&i.to_le_bytes())?;
        }
        Value::Float(f) => {
            w.write_all(&TAG_FLOAT.to_le_bytes())?;
            w.write_all(&8u64.to_le_bytes())?;
            w.write_all(&f.to_bits().to_le_bytes())?;
        }
        Value::Obj(id) => match rt.obj(id).map(|o| &o.kind) {
            Some(ObjKind::Str(s)) => {
                w.write_all(&TAG_STR.to_le_bytes())?;
                w.write_all(&(s.len() as u64).to_le_bytes())?;
                w.write_all(s.as_bytes())?;
            }
            Some(ObjKind::Code(nested)) => {
                w.write_all(&TAG_CODE.to_le_bytes())?;
                w.write_all(&0u64.to_le_bytes())?;
                write_code(rt, nested, w)?;
            }
            _ => return Err(CodeFileError::Malformed("unsupported constant kind")),
        },
        Value::Nil => return Err(CodeFileError::Malformed("nil constant")),
    }
    Ok(())
}

/// Reads one serialized code object, allocating its constants on the
/// runtime's heap. The returned handle is owned by the caller. Collection
/// stays paused until the object is fully linked.
pub fn read_code(rt: &mut Runtime, r: &mut impl Read) -> Result<ObjId, CodeFileError> {
    rt.pause_gc();
    let out = read_one(rt, r);
    rt.resume_gc();
    out
}

fn read_one(rt: &mut Runtime, r: &mut impl Read) -> Result<ObjId, CodeFileError> {
    let num_constants = read_u64(r)? as usize;
    let num_locals = read_u64(r)? as usize;
    let num_names = read_u64(r)? as usize;
    let stack_hint = read_u64(r)? as usize;
    let mut names = Vec::with_capacity(num_names.min(1024));
    for _ in 0..num_names {
        let len = read_u64(r)? as usize;
        let bytes = read_bytes(r, len)?;
        let name =
            String::from_utf8(bytes).map_err(|_| CodeFileError::Malformed("name not utf-8"))?;
        names.push(name);
    }
    let mut constants = Vec::with_capacity(num_constants.min(1024));
    if let Err(e) = read_constants(rt, r, num_constants, &mut constants) {
        for v in constants {
            rt.release(v);
        }
        return Err(e);
    }
    let ops_len = read_u64(r)? as usize;
    let ops = match read_bytes(r, ops_len) {
        Ok(ops) => ops,
        Err(e) => {
            for v in constants {
                rt.release(v);
            }
            return Err(e);
        }
    };
    let mut hints = analyze(&ops);
    hints.max_stack = hints.max_stack.max(stack_hint);
    let lines = vec![0; ops.len()];
    let code = CodeObj {
        ops,
        constants,
        names,
        lines,
        num_locals,
        hints,
        refname: FuncObj::DEFAULT_REFNAME.to_owned(),
    };
    Ok(rt.alloc(ObjKind::Code(Rc::new(code))))
}

fn read_constants(
    rt: &mut Runtime,
    r: &mut impl Read,
    count: usize,
    out: &mut Vec<Value>,
) -> Result<(), CodeFileError> {
    for _ in 0..count {
        let tag = read_u32(r)?;
        let size = read_u64(r)? as usize;
        let v = match tag {
            TAG_INT => {
                let bytes = read_array::<8>(r)?;
                Value::Int(i64::from_le_bytes(bytes))
            }
            TAG_FLOAT => {
                let bytes = read_array::<8>(r)?;
                Value::Float(f64::from_bits(u64::from_le_bytes(bytes)))
            }
            TAG_STR => {
                let bytes = read_bytes(r, size)?;
                let s = String::from_utf8(bytes)
                    .map_err(|_| CodeFileError::Malformed("string constant not utf-8"))?;
                Value::Obj(rt.alloc_str(s))
            }
            TAG_CODE => Value::Obj(read_one(rt, r)?),
            other => return Err(CodeFileError::BadTag(other)),
        };
        out.push(v);
    }
    Ok(())
}

fn read_u64(r: &mut impl Read) -> Result<u64, CodeFileError> {
    Ok(u64::from_le_bytes(read_array::<8>(r)?))
}

fn read_u32(r: &mut impl Read) -> Result<u32, CodeFileError> {
    Ok(u32::from_le_bytes(read_array::<4>(r)?))
}

fn read_array<const N: usize>(r: &mut impl Read) -> Result<[u8; N], CodeFileError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_bytes(r: &mut impl Read, len: usize) -> Result<Vec<u8>, CodeFileError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
