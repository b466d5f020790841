//! Compilation sessions.
//!
//! A session carries the root scope's symbol table across units, so a
//! REPL can compile one line at a time and later lines still see the
//! slots earlier lines assigned. Interactive sessions force every
//! variable into closed-over form, since each unit runs in its own
//! frame against a shared environment bucket.

use lyra_core::StrMap;
use lyra_ir::Node;
use lyra_runtime::{ObjId, Runtime};

use crate::compile::compile_unit;
use crate::emit::Ctx;
use crate::errors::CompileError;

pub struct Session {
    interactive: bool,
    locals: StrMap<u32>,
    local_count: u32,
}

impl Session {
    /// A batch session: one unit, frame-local slots where possible.
    pub fn new() -> Self {
        Self {
            interactive: false,
            locals: StrMap::new(),
            local_count: 0,
        }
    }

    /// An interactive session for unit-at-a-time compilation.
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            locals: StrMap::new(),
            local_count: 0,
        }
    }

    /// Compiles one unit to a code object. The returned handle is owned
    /// by the caller. Collection stays paused for the duration so the
    /// half-built constant pool cannot be swept.
    pub fn compile(&mut self, rt: &mut Runtime, nodes: &[Node]) -> Result<ObjId, CompileError> {
        let mut root = Ctx::new(self.interactive);
        root.locals = std::mem::replace(&mut self.locals, StrMap::new());
        root.local_count = self.local_count;
        rt.pause_gc();
        let out = compile_unit(rt, root, nodes);
        rt.resume_gc();
        let (code, locals, local_count) = out?;
        self.locals = locals;
        self.local_count = local_count;
        Ok(code)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
