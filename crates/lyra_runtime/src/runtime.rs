//! The runtime context: heap arena, reference counting, and object helpers.
//!
//! All state lives here; embedders create as many independent runtimes as
//! they like. Collection only happens at safepoints (the machine's loop
//! top and explicit calls), never inside `alloc`, so short-lived values a
//! caller has popped off a frame stack stay valid across any single
//! operation.

use lyra_core::IdSet;
use smallvec::SmallVec;

use crate::machine::Frame;
use crate::object::{ClassObj, FuncObj, HeapObj, ObjKind};
use crate::value::{ObjId, Value};

pub(crate) const GC_GROWTH: usize = 1_600_000;

pub struct Runtime {
    pub(crate) slots: Vec<Option<HeapObj>>,
    pub(crate) free: Vec<usize>,
    /// Every live allocation, keyed by slot index.
    pub(crate) pool: IdSet,
    pub(crate) roots: Vec<ObjId>,
    pub(crate) temp_roots: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) cur_bytes: usize,
    pub(crate) max_bytes: usize,
    pub(crate) paused: usize,
    pub(crate) collecting: bool,
    pub(crate) steps: u64,
    /// Everything `print` emits, newline-terminated per value.
    pub output: String,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(256),
            free: Vec::new(),
            pool: IdSet::new(),
            roots: Vec::new(),
            temp_roots: Vec::new(),
            frames: Vec::new(),
            cur_bytes: 0,
            max_bytes: GC_GROWTH,
            paused: 0,
            collecting: false,
            steps: 0,
            output: String::new(),
        }
    }

    /// Allocates a new object. Child references inside `kind` are taken
    /// over as-is; the returned handle carries one owned reference.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjId {
        let obj = HeapObj::new(kind);
        self.cur_bytes += obj.size;
        let idx = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(obj);
                i
            }
            None => {
                self.slots.push(Some(obj));
                self.slots.len() - 1
            }
        };
        self.pool.insert(idx);
        ObjId(idx)
    }

    pub fn obj(&self, id: ObjId) -> Option<&HeapObj> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn obj_mut(&mut self, id: ObjId) -> Option<&mut HeapObj> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    pub fn retain(&mut self, v: Value) {
        if let Some(id) = v.as_obj() {
            if let Some(obj) = self.obj_mut(id) {
                obj.refs += 1;
            }
        }
    }

    /// Drops one reference. Hitting zero frees the object immediately
    /// unless a collection is underway, in which case the sweep (or the
    /// next cycle) picks it up.
    pub fn release(&mut self, v: Value) {
        let Some(id) = v.as_obj() else { return };
        let Some(obj) = self.obj_mut(id) else { return };
        if obj.refs > 0 {
            obj.refs -= 1;
        }
        if obj.refs == 0 && !self.collecting {
            self.destroy(id, None);
        }
    }

    /// Pins an object so collection always reaches it. Takes a reference.
    pub fn add_root(&mut self, id: ObjId) {
        self.retain(Value::Obj(id));
        self.roots.push(id);
    }

    pub fn remove_root(&mut self, id: ObjId) {
        if let Some(i) = self.roots.iter().position(|&r| r == id) {
            self.roots.swap_remove(i);
            self.release(Value::Obj(id));
        }
    }

    /// Holds a value live across an operation that may hit a safepoint.
    pub(crate) fn push_temp(&mut self, v: Value) {
        self.retain(v);
        self.temp_roots.push(v);
    }

    pub(crate) fn pop_temp(&mut self) {
        if let Some(v) = self.temp_roots.pop() {
            self.release(v);
        }
    }

    pub fn live_objects(&self) -> usize {
        self.pool.len()
    }

    pub fn heap_bytes(&self) -> usize {
        self.cur_bytes
    }

    // ---- members ----

    pub fn get_member(&self, id: ObjId, name: &str) -> Option<Value> {
        self.obj(id)?.members.get(name).copied()
    }

    /// Sets a member, retaining the new value and releasing any displaced
    /// one.
    pub fn set_member(&mut self, id: ObjId, name: &str, v: Value) {
        self.retain(v);
        let old = match self.obj_mut(id) {
            Some(obj) => obj.members.insert(name, v),
            None => {
                self.release(v);
                return;
            }
        };
        if let Some(old) = old {
            self.release(old);
        }
    }

    pub fn remove_member(&mut self, id: ObjId, name: &str) {
        let old = match self.obj_mut(id) {
            Some(obj) => obj.members.remove(name),
            None => None,
        };
        if let Some(old) = old {
            self.release(old);
        }
    }

    /// Member lookup that only hands back callable functions.
    pub(crate) fn member_func(&self, id: ObjId, name: &str) -> Option<Value> {
        let v = self.get_member(id, name)?;
        let fid = v.as_obj()?;
        matches!(self.obj(fid)?.kind, ObjKind::Func(_)).then_some(v)
    }

    // ---- comparison ----

    /// Shallow value comparison: numerics by value, strings bytewise,
    /// everything else by identity.
    pub fn quick_compare(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Int(x), Value::Float(y)) => x as f64 == y,
            (Value::Float(x), Value::Int(y)) => x == y as f64,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => {
                if x == y {
                    return true;
                }
                match (self.obj(x).map(|o| &o.kind), self.obj(y).map(|o| &o.kind)) {
                    (Some(ObjKind::Str(a)), Some(ObjKind::Str(b))) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    // ---- allocation helpers ----

    pub fn alloc_str(&mut self, s: impl Into<String>) -> ObjId {
        self.alloc(ObjKind::Str(s.into()))
    }

    pub fn alloc_instance(&mut self) -> ObjId {
        self.alloc(ObjKind::Instance)
    }

    pub fn alloc_error(&mut self, name: impl Into<String>, message: impl Into<String>) -> ObjId {
        self.alloc(ObjKind::Error {
            name: name.into(),
            message: message.into(),
        })
    }

    /// Builds a cons cell, retaining both fields on behalf of the cell.
    pub fn alloc_seq(&mut self, value: Value, next: Value) -> ObjId {
        self.retain(value);
        self.retain(next);
        self.alloc(ObjKind::Seq { value, next })
    }

    pub fn alloc_native(
        &mut self,
        name: impl Into<String>,
        argc: u8,
        f: crate::object::NativeFn,
    ) -> ObjId {
        self.alloc(ObjKind::Func(FuncObj {
            code: None,
            native: Some(f),
            argc,
            parents: SmallVec::new(),
            refname: name.into(),
        }))
    }

    pub(crate) fn raise_error(&mut self, name: &str, message: impl Into<String>) -> Value {
        Value::Obj(self.alloc_error(name, message.into()))
    }

    pub(crate) fn class_obj(&self, id: ObjId) -> Option<&ClassObj> {
        match &self.obj(id)?.kind {
            ObjKind::Class(c) => Some(c),
            _ => None,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
