//! Mark-sweep collection over the arena.
//!
//! Reference counting reclaims acyclic garbage the moment it drops;
//! the collector here exists for cycles. Marking walks the pinned roots,
//! the temp roots, and the live frame chain. Sweeping snapshots the pool,
//! runs destroy hooks while the dead cohort is still intact, then frees
//! it wholesale, releasing only the references that point out of the
//! cohort into survivors.

use ahash::RandomState;
use hashbrown::HashSet;

use crate::object::{self, GcEvent, ObjKind};
use crate::runtime::{Runtime, GC_GROWTH};
use crate::value::{ObjId, Value};

impl Runtime {
    /// Suspends collection; nests.
    pub fn pause_gc(&mut self) {
        self.paused += 1;
    }

    pub fn resume_gc(&mut self) {
        self.paused = self.paused.saturating_sub(1);
        if self.paused == 0 {
            self.maybe_collect();
        }
    }

    /// Collects if the heap has outgrown its threshold. Safe to call only
    /// at safepoints: every live value must be reachable from the roots
    /// or the frame chain.
    pub fn maybe_collect(&mut self) {
        if self.paused == 0 && !self.collecting && self.cur_bytes > self.max_bytes {
            self.collect();
        }
    }

    pub fn collect(&mut self) {
        if self.paused > 0 || self.collecting {
            return;
        }
        self.collecting = true;
        self.mark();
        self.sweep();
        self.collecting = false;
        // Adaptive threshold: fixed headroom above whatever survived, so
        // a spike does not pin the threshold at its historic peak.
        self.max_bytes = self.cur_bytes + GC_GROWTH;
    }

    fn mark(&mut self) {
        let mut work: Vec<ObjId> = Vec::with_capacity(64);
        work.extend(self.roots.iter().copied());
        for v in &self.temp_roots {
            if let Value::Obj(id) = v {
                work.push(*id);
            }
        }
        for frame in &self.frames {
            work.push(frame.code_id);
            work.push(frame.bucket);
            work.extend(frame.parents.iter().copied());
            for v in frame.stack.iter().chain(frame.locals.iter()) {
                if let Value::Obj(id) = v {
                    work.push(*id);
                }
            }
        }
        while let Some(id) = work.pop() {
            {
                let Some(obj) = self.obj_mut(id) else { continue };
                if obj.marked {
                    continue;
                }
                obj.marked = true;
            }
            let Some(obj) = self.obj(id) else { continue };
            if let ObjKind::Blob {
                data,
                on_gc: Some(hook),
            } = &obj.kind
            {
                hook(*data, GcEvent::Mark);
            }
            object::each_child(obj, &mut |v| {
                if let Value::Obj(child) = v {
                    work.push(child);
                }
            });
        }
    }

    fn sweep(&mut self) {
        let snapshot = self.pool.to_vec();
        let mut dead = Vec::new();
        for idx in snapshot {
            match self.obj_mut(ObjId(idx)) {
                Some(obj) if obj.marked => obj.marked = false,
                Some(_) => dead.push(idx),
                None => {}
            }
        }
        let dead_set: HashSet<usize, RandomState> = dead.iter().copied().collect();
        // Hooks run first, while every dead object can still see its
        // neighbors; the frees below skip them.
        for &idx in &dead {
            if let Some(hook) = self.member_func(ObjId(idx), "on_destroy_") {
                let _ = crate::machine::call_value(self, hook, &[]);
            }
        }
        for &idx in &dead {
            self.destroy(ObjId(idx), Some(&dead_set));
        }
    }

    /// Frees one object. `dead` is the sweep cohort: references into it
    /// are dropped without recounting since the sweep frees each member
    /// itself. The RC path (`dead` absent) runs the destroy hook here,
    /// holding the object alive for the hook's duration.
    pub(crate) fn destroy(&mut self, id: ObjId, dead: Option<&HashSet<usize, RandomState>>) {
        if dead.is_none() {
            if let Some(hook) = self.member_func(id, "on_destroy_") {
                if let Some(obj) = self.obj_mut(id) {
                    obj.refs = 1;
                }
                let _ = crate::machine::call_value(self, hook, &[]);
                match self.obj_mut(id) {
                    Some(obj) => obj.refs = 0,
                    None => return,
                }
            }
        }
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        let Some(mut obj) = slot.take() else { return };
        self.pool.remove(id.0);
        self.free.push(id.0);
        self.cur_bytes = self.cur_bytes.saturating_sub(obj.size);
        let mut children = Vec::new();
        object::each_child(&obj, &mut |v| children.push(v));
        if let ObjKind::Custom { payload, hooks } = &mut obj.kind {
            if let Some(hook) = hooks.on_destroy {
                hook(payload.as_mut());
            }
        }
        if let ObjKind::Blob {
            data,
            on_gc: Some(hook),
        } = &obj.kind
        {
            hook(*data, GcEvent::Destroy);
        }
        drop(obj);
        for v in children {
            if let (Some(child), Some(set)) = (v.as_obj(), dead) {
                if set.contains(&child.0) {
                    continue;
                }
            }
            self.release(v);
        }
    }
}
