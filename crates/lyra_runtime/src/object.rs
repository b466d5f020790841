//! Heap object representation.

use std::any::Any;
use std::rc::Rc;

use lyra_core::Trie;
use lyra_ir::CodeHints;
use smallvec::SmallVec;

use crate::runtime::Runtime;
use crate::value::{ObjId, Value};

/// Native entry point. `Err` carries a raised value.
pub type NativeFn = fn(&mut Runtime, &[Value]) -> Result<Value, Value>;

pub struct FuncObj {
    /// Compiled body; `None` for natives.
    pub code: Option<ObjId>,
    pub native: Option<NativeFn>,
    pub argc: u8,
    /// Closure bucket chain, outermost first.
    pub parents: SmallVec<[ObjId; 4]>,
    pub refname: String,
}

impl FuncObj {
    pub const DEFAULT_REFNAME: &'static str = "Anonymous Function";
}

/// Immutable once finalized by the compiler, shared by frames via `Rc`.
pub struct CodeObj {
    pub ops: Vec<u8>,
    pub constants: Vec<Value>,
    pub names: Vec<String>,
    /// Source line per op byte, parallel to `ops`.
    pub lines: Vec<u32>,
    pub num_locals: usize,
    pub hints: CodeHints,
    /// Name functions built from this code know themselves by.
    pub refname: String,
}

pub struct ClassObj {
    pub refname: String,
    pub member_names: Vec<String>,
    pub member_values: Vec<Value>,
    pub superclass: Option<Value>,
    pub init: Option<Value>,
}

/// Hooks a host embedder attaches to a `Custom` object.
#[derive(Clone, Copy, Default)]
pub struct CustomHooks {
    /// Reports every value the payload holds; used both for marking and
    /// for releasing references when the object dies.
    pub trace: Option<fn(&dyn Any, &mut dyn FnMut(Value))>,
    pub on_destroy: Option<fn(&mut dyn Any)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcEvent {
    Mark,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterCursor {
    Seq(Value),
    Str(usize),
    Array(usize),
    Done,
}

pub enum ObjKind {
    Str(String),
    /// Cons cell; `next` is another Seq or Nil.
    Seq { value: Value, next: Value },
    Func(FuncObj),
    Class(ClassObj),
    Code(Rc<CodeObj>),
    /// Plain member bag; also serves as a closure bucket.
    Instance,
    Iterable { owner: Value, cursor: IterCursor, index: i64 },
    Error { name: String, message: String },
    Custom { payload: Box<dyn Any>, hooks: CustomHooks },
    /// Opaque pointer-sized payload with a lifecycle callback.
    Blob { data: usize, on_gc: Option<fn(usize, GcEvent)> },
}

pub struct HeapObj {
    pub kind: ObjKind,
    pub members: Trie<Value>,
    pub(crate) refs: u32,
    pub(crate) marked: bool,
    /// Cached estimate used for byte accounting.
    pub(crate) size: usize,
}

impl HeapObj {
    pub(crate) fn new(kind: ObjKind) -> Self {
        let mut obj = Self {
            kind,
            members: Trie::new(),
            refs: 1,
            marked: false,
            size: 0,
        };
        obj.size = obj.estimate_size();
        obj
    }

    pub(crate) fn estimate_size(&self) -> usize {
        let base = std::mem::size_of::<HeapObj>();
        let deep = match &self.kind {
            ObjKind::Str(s) => s.capacity(),
            ObjKind::Seq { .. } => 0,
            ObjKind::Func(f) => f.refname.capacity() + f.parents.len() * 8,
            ObjKind::Class(c) => {
                c.refname.capacity()
                    + c.member_names.iter().map(|n| n.capacity() + 24).sum::<usize>()
                    + c.member_values.len() * std::mem::size_of::<Value>()
            }
            ObjKind::Code(code) => {
                code.ops.len()
                    + code.constants.len() * std::mem::size_of::<Value>()
                    + code.names.iter().map(|n| n.capacity() + 24).sum::<usize>()
                    + code.lines.len() * 4
            }
            ObjKind::Instance | ObjKind::Iterable { .. } => 0,
            ObjKind::Error { name, message } => name.capacity() + message.capacity(),
            ObjKind::Custom { .. } => 256,
            ObjKind::Blob { .. } => 16,
        };
        base + deep
    }
}

/// Visits every reference an object holds: its member dictionary plus the
/// variant's own fields. Marking and freeing both walk this.
pub(crate) fn each_child(obj: &HeapObj, f: &mut dyn FnMut(Value)) {
    obj.members.values(&mut |v| f(*v));
    match &obj.kind {
        ObjKind::Str(_)
        | ObjKind::Instance
        | ObjKind::Error { .. }
        | ObjKind::Blob { .. } => {}
        ObjKind::Seq { value, next } => {
            f(*value);
            f(*next);
        }
        ObjKind::Func(func) => {
            if let Some(code) = func.code {
                f(Value::Obj(code));
            }
            for p in &func.parents {
                f(Value::Obj(*p));
            }
        }
        ObjKind::Class(class) => {
            for v in &class.member_values {
                f(*v);
            }
            if let Some(s) = class.superclass {
                f(s);
            }
            if let Some(i) = class.init {
                f(i);
            }
        }
        ObjKind::Code(code) => {
            for v in &code.constants {
                f(*v);
            }
        }
        ObjKind::Iterable { owner, cursor, .. } => {
            f(*owner);
            if let IterCursor::Seq(v) = cursor {
                f(*v);
            }
        }
        ObjKind::Custom { payload, hooks } => {
            if let Some(trace) = hooks.trace {
                trace(payload.as_ref(), f);
            }
        }
    }
}
