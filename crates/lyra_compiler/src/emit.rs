//! Bytecode emission.
//!
//! Instructions are built as a stream of slots, one byte each. Jump
//! targets are symbolic labels in their own namespace: binding a label
//! appends a `Mark` slot (which lowers to a `Nop` byte, so it occupies
//! the offset it names) and referencing one appends a `Ref` slot plus
//! three pads, which lower to the target's 4-byte little-endian offset.
//! Because every slot is exactly one byte wide, a slot's index is its
//! final byte offset and resolution is a single table lookup.
//!
//! Variable emission keeps a patch-site table: every local load or store
//! records where it was emitted, so discovering later that a nested
//! function closes over the name can rewrite those sites in place to
//! their closed-over forms.

use std::rc::Rc;

use hashbrown::HashMap;
use lyra_core::StrMap;
use lyra_ir::{analyze, Opcode};
use lyra_runtime::{CodeObj, ObjId, ObjKind, Runtime, Value};

use crate::errors::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub(crate) u32);

#[derive(Debug, Clone, Copy)]
pub(crate) enum Slot {
    Byte(u8),
    Mark(Label),
    Ref(Label),
    Pad,
}

pub(crate) struct Ctx {
    pub ops: Vec<Slot>,
    pub lines: Vec<u32>,
    /// Owned references; ownership moves into the finished code object.
    pub constants: Vec<Value>,
    pub names: Vec<String>,
    pub locals: StrMap<u32>,
    pub local_count: u32,
    pub loop_next: Vec<Label>,
    pub loop_end: Vec<Label>,
    pub interactive: bool,
    pub last_op: Option<Opcode>,
}

impl Ctx {
    pub(crate) fn new(interactive: bool) -> Self {
        Self {
            ops: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            locals: StrMap::new(),
            local_count: 0,
            loop_next: Vec::new(),
            loop_end: Vec::new(),
            interactive,
            last_op: None,
        }
    }
}

/// One record per local-form variable instruction, so closure discovery
/// can rewrite earlier contexts.
pub(crate) struct NameUse {
    pub name: String,
    pub ctx: usize,
    pub at: usize,
}

pub(crate) struct Compiler<'rt> {
    pub rt: &'rt mut Runtime,
    pub ctxs: Vec<Ctx>,
    pub uses: Vec<NameUse>,
    next_label: u32,
}

impl<'rt> Compiler<'rt> {
    pub(crate) fn new(rt: &'rt mut Runtime, root: Ctx) -> Self {
        Self {
            rt,
            ctxs: vec![root],
            uses: Vec::new(),
            next_label: 0,
        }
    }

    pub(crate) fn cur(&mut self) -> &mut Ctx {
        let last = self.ctxs.len() - 1;
        &mut self.ctxs[last]
    }

    pub(crate) fn new_label(&mut self) -> Label {
        self.next_label += 1;
        Label(self.next_label - 1)
    }

    pub(crate) fn emit_op(&mut self, op: Opcode, line: u32) {
        let ctx = self.cur();
        ctx.ops.push(Slot::Byte(op as u8));
        ctx.lines.push(line);
        ctx.last_op = Some(op);
    }

    pub(crate) fn emit_byte(&mut self, b: u8, line: u32) {
        let ctx = self.cur();
        ctx.ops.push(Slot::Byte(b));
        ctx.lines.push(line);
    }

    pub(crate) fn emit_quad(&mut self, v: u32, line: u32) {
        for b in v.to_le_bytes() {
            self.emit_byte(b, line);
        }
    }

    pub(crate) fn emit_jump(&mut self, op: Opcode, label: Label, line: u32) {
        self.emit_op(op, line);
        let ctx = self.cur();
        ctx.ops.push(Slot::Ref(label));
        ctx.ops.extend([Slot::Pad, Slot::Pad, Slot::Pad]);
        ctx.lines.extend([line; 4]);
    }

    pub(crate) fn bind(&mut self, label: Label, line: u32) {
        let ctx = self.cur();
        ctx.ops.push(Slot::Mark(label));
        ctx.lines.push(line);
        ctx.last_op = None;
    }

    // ---- names and constants ----

    pub(crate) fn name_index(&mut self, name: &str) -> u32 {
        let ctx = self.cur();
        match ctx.names.iter().position(|n| n == name) {
            Some(i) => i as u32,
            None => {
                ctx.names.push(name.to_owned());
                (ctx.names.len() - 1) as u32
            }
        }
    }

    pub(crate) fn name_index_in(&mut self, ctx_i: usize, name: &str) -> u32 {
        let ctx = &mut self.ctxs[ctx_i];
        match ctx.names.iter().position(|n| n == name) {
            Some(i) => i as u32,
            None => {
                ctx.names.push(name.to_owned());
                (ctx.names.len() - 1) as u32
            }
        }
    }

    /// Interns a constant, comparing by shallow value so repeated
    /// literals share a slot. Takes ownership of `v`'s reference.
    pub(crate) fn const_index(&mut self, v: Value) -> u32 {
        let last = self.ctxs.len() - 1;
        let found = self.ctxs[last]
            .constants
            .iter()
            .position(|&c| self.rt.quick_compare(c, v));
        match found {
            Some(i) => {
                self.rt.release(v);
                i as u32
            }
            None => {
                self.ctxs[last].constants.push(v);
                (self.ctxs[last].constants.len() - 1) as u32
            }
        }
    }

    pub(crate) fn emit_const(&mut self, v: Value, line: u32) {
        let idx = self.const_index(v);
        self.emit_op(Opcode::LoadConst, line);
        self.emit_quad(idx, line);
    }

    // ---- variables ----

    /// Emits a variable load or store, deciding between frame-local slots
    /// and closed-over storage. Interactive units force closed-over form;
    /// so does a read with no prior write in scope, or any use of a name
    /// another context owns (which also retroactively rewrites the
    /// owner's sites).
    pub(crate) fn emit_var(&mut self, name: &str, save: bool, line: u32) {
        let cur = self.ctxs.len() - 1;
        let mut needs_close = self.ctxs[cur].interactive;
        let mut seen_here = false;
        let matches: Vec<(usize, usize)> = self
            .uses
            .iter()
            .filter(|u| u.name == name)
            .map(|u| (u.ctx, u.at))
            .collect();
        for (uctx, at) in matches {
            if uctx != cur {
                self.switch_to_close(uctx, at, name);
                needs_close = true;
            } else {
                needs_close = self.is_close_at(cur, at);
                seen_here = true;
            }
        }
        if !needs_close && !seen_here && !save {
            needs_close = true;
        }
        if needs_close {
            let idx = self.name_index(name);
            self.emit_op(
                if save {
                    Opcode::SaveClose
                } else {
                    Opcode::LoadClose
                },
                line,
            );
            self.emit_quad(idx, line);
            return;
        }
        let slot = match self.ctxs[cur].locals.get(name) {
            Some(&s) => s,
            None => {
                let s = self.ctxs[cur].local_count;
                self.ctxs[cur].local_count += 1;
                self.ctxs[cur].locals.insert(name, s);
                s
            }
        };
        let at = self.ctxs[cur].ops.len();
        self.emit_op(
            if save {
                Opcode::SaveLocal
            } else {
                Opcode::LoadLocal
            },
            line,
        );
        self.emit_quad(slot, line);
        self.uses.push(NameUse {
            name: name.to_owned(),
            ctx: cur,
            at,
        });
    }

    /// Releases every constant still owned by a context. Called on error
    /// paths, where the pools never reach a code object.
    pub(crate) fn release_pools(&mut self) {
        for i in 0..self.ctxs.len() {
            let pool = std::mem::take(&mut self.ctxs[i].constants);
            for v in pool {
                self.rt.release(v);
            }
        }
    }

    fn is_close_at(&self, ctx_i: usize, at: usize) -> bool {
        matches!(
            self.ctxs[ctx_i].ops.get(at),
            Some(Slot::Byte(b)) if *b == Opcode::LoadClose as u8 || *b == Opcode::SaveClose as u8
        )
    }

    /// Rewrites a recorded local-form instruction to its closed-over
    /// form, switching the operand from a slot number to a name index.
    /// Idempotent.
    fn switch_to_close(&mut self, ctx_i: usize, at: usize, name: &str) {
        let new_op = match self.ctxs[ctx_i].ops.get(at) {
            Some(Slot::Byte(b)) if *b == Opcode::LoadLocal as u8 => Opcode::LoadClose,
            Some(Slot::Byte(b)) if *b == Opcode::SaveLocal as u8 => Opcode::SaveClose,
            _ => return,
        };
        let idx = self.name_index_in(ctx_i, name);
        let ops = &mut self.ctxs[ctx_i].ops;
        ops[at] = Slot::Byte(new_op as u8);
        for (k, b) in idx.to_le_bytes().into_iter().enumerate() {
            ops[at + 1 + k] = Slot::Byte(b);
        }
    }

    // ---- finishing ----

    /// Pops the innermost context and lowers it to a code object: appends
    /// the implicit return, resolves labels, runs depth analysis. The
    /// returned handle is owned.
    pub(crate) fn finish_ctx(&mut self, refname: String) -> Result<ObjId, CompileError> {
        if self.cur().last_op != Some(Opcode::Return) {
            self.emit_op(Opcode::PushNil, 0);
            self.emit_op(Opcode::Return, 0);
        }
        let ctx = match self.ctxs.pop() {
            Some(ctx) => ctx,
            None => return Err(CompileError::UnresolvedLabel(0)),
        };
        let popped = self.ctxs.len();
        self.uses.retain(|u| u.ctx != popped);

        let mut targets: HashMap<u32, u32> = HashMap::new();
        for (i, slot) in ctx.ops.iter().enumerate() {
            if let Slot::Mark(label) = slot {
                targets.insert(label.0, i as u32);
            }
        }
        let mut bytes = Vec::with_capacity(ctx.ops.len());
        let mut unresolved = None;
        for slot in &ctx.ops {
            match slot {
                Slot::Byte(b) => bytes.push(*b),
                Slot::Mark(_) => bytes.push(Opcode::Nop as u8),
                Slot::Ref(label) => match targets.get(&label.0) {
                    Some(&t) => bytes.extend_from_slice(&t.to_le_bytes()),
                    None => {
                        unresolved = Some(label.0);
                        break;
                    }
                },
                Slot::Pad => {}
            }
        }
        if let Some(label) = unresolved {
            for v in ctx.constants {
                self.rt.release(v);
            }
            return Err(CompileError::UnresolvedLabel(label));
        }
        let hints = analyze(&bytes);
        let code = CodeObj {
            ops: bytes,
            constants: ctx.constants,
            names: ctx.names,
            lines: ctx.lines,
            num_locals: ctx.local_count as usize,
            hints,
            refname,
        };
        Ok(self.rt.alloc(ObjKind::Code(Rc::new(code))))
    }
}
