//! Reference counting and cycle collection.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};

use lyra_runtime::{CustomHooks, ObjKind, Runtime, Value};

#[test]
fn refcount_reclaims_immediately() {
    let mut rt = Runtime::new();
    let s = rt.alloc_str("short-lived");
    assert_eq!(rt.live_objects(), 1);
    rt.release(Value::Obj(s));
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn seq_cell_keeps_children_alive() {
    let mut rt = Runtime::new();
    let s = rt.alloc_str("payload");
    let cell = rt.alloc_seq(Value::Obj(s), Value::Nil);
    rt.release(Value::Obj(s));
    assert_eq!(rt.live_objects(), 2);
    rt.release(Value::Obj(cell));
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn member_displacement_releases_old_value() {
    let mut rt = Runtime::new();
    let inst = rt.alloc_instance();
    let a = rt.alloc_str("a");
    rt.set_member(inst, "slot", Value::Obj(a));
    rt.release(Value::Obj(a));
    assert_eq!(rt.live_objects(), 2);
    let b = rt.alloc_str("b");
    rt.set_member(inst, "slot", Value::Obj(b));
    rt.release(Value::Obj(b));
    // the displaced "a" is gone, "b" lives through the member
    assert_eq!(rt.live_objects(), 2);
    rt.release(Value::Obj(inst));
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn cycle_survives_refcounting_but_not_collection() {
    let mut rt = Runtime::new();
    let a = rt.alloc_instance();
    let b = rt.alloc_instance();
    rt.set_member(a, "peer", Value::Obj(b));
    rt.set_member(b, "peer", Value::Obj(a));
    rt.release(Value::Obj(a));
    rt.release(Value::Obj(b));
    assert_eq!(rt.live_objects(), 2);
    rt.collect();
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn roots_pin_objects_across_collection() {
    let mut rt = Runtime::new();
    let s = rt.alloc_str("pinned");
    rt.add_root(s);
    rt.release(Value::Obj(s));
    rt.collect();
    assert_eq!(rt.live_objects(), 1);
    rt.remove_root(s);
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn pause_defers_collection() {
    let mut rt = Runtime::new();
    let a = rt.alloc_instance();
    let b = rt.alloc_instance();
    rt.set_member(a, "peer", Value::Obj(b));
    rt.set_member(b, "peer", Value::Obj(a));
    rt.release(Value::Obj(a));
    rt.release(Value::Obj(b));
    rt.pause_gc();
    rt.collect();
    assert_eq!(rt.live_objects(), 2);
    rt.resume_gc();
    rt.collect();
    assert_eq!(rt.live_objects(), 0);
}

static CUSTOM_DESTROYS: AtomicUsize = AtomicUsize::new(0);

fn count_destroy(_payload: &mut dyn Any) {
    CUSTOM_DESTROYS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn custom_destroy_hook_fires_once() {
    let mut rt = Runtime::new();
    let obj = rt.alloc(ObjKind::Custom {
        payload: Box::new(()),
        hooks: CustomHooks {
            trace: None,
            on_destroy: Some(count_destroy),
        },
    });
    assert_eq!(CUSTOM_DESTROYS.load(Ordering::SeqCst), 0);
    rt.release(Value::Obj(obj));
    assert_eq!(CUSTOM_DESTROYS.load(Ordering::SeqCst), 1);
    rt.collect();
    assert_eq!(CUSTOM_DESTROYS.load(Ordering::SeqCst), 1);
}

fn note_destroy(rt: &mut Runtime, _args: &[Value]) -> Result<Value, Value> {
    rt.output.push_str("bye\n");
    Ok(Value::Nil)
}

#[test]
fn member_destroy_hook_runs_on_refcount_death() {
    let mut rt = Runtime::new();
    let inst = rt.alloc_instance();
    let hook = rt.alloc_native("note", 0, note_destroy);
    rt.set_member(inst, "on_destroy_", Value::Obj(hook));
    rt.release(Value::Obj(hook));
    rt.release(Value::Obj(inst));
    assert_eq!(rt.output, "bye\n");
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn member_destroy_hooks_run_once_per_cycle_member() {
    let mut rt = Runtime::new();
    let hook = rt.alloc_native("note", 0, note_destroy);
    rt.add_root(hook);
    rt.release(Value::Obj(hook));
    let a = rt.alloc_instance();
    let b = rt.alloc_instance();
    rt.set_member(a, "peer", Value::Obj(b));
    rt.set_member(b, "peer", Value::Obj(a));
    rt.set_member(a, "on_destroy_", Value::Obj(hook));
    rt.set_member(b, "on_destroy_", Value::Obj(hook));
    rt.release(Value::Obj(a));
    rt.release(Value::Obj(b));
    rt.collect();
    assert_eq!(rt.output, "bye\nbye\n");
    assert_eq!(rt.live_objects(), 1);
    rt.remove_root(hook);
}

#[test]
fn threshold_resets_after_a_heap_spike() {
    let mut rt = Runtime::new();
    // Push the threshold up with a rooted 8 MB peak.
    let mut peak = Vec::new();
    for _ in 0..8 {
        let s = rt.alloc_str("x".repeat(1 << 20));
        rt.add_root(s);
        rt.release(Value::Obj(s));
        peak.push(s);
    }
    rt.collect();
    for s in peak {
        rt.remove_root(s);
    }
    assert_eq!(rt.live_objects(), 0);
    // A collect over the now-small heap must bring the threshold back
    // down, not leave it at the historic peak.
    rt.collect();
    let a = rt.alloc_instance();
    let b = rt.alloc_instance();
    let pad = rt.alloc_str("y".repeat(2 << 20));
    rt.set_member(a, "pad", Value::Obj(pad));
    rt.release(Value::Obj(pad));
    rt.set_member(a, "peer", Value::Obj(b));
    rt.set_member(b, "peer", Value::Obj(a));
    rt.release(Value::Obj(a));
    rt.release(Value::Obj(b));
    assert_eq!(rt.live_objects(), 3);
    rt.maybe_collect();
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn byte_accounting_tracks_frees() {
    let mut rt = Runtime::new();
    assert_eq!(rt.heap_bytes(), 0);
    let s = rt.alloc_str(String::from("x").repeat(64));
    let after = rt.heap_bytes();
    assert!(after >= 64);
    rt.release(Value::Obj(s));
    assert_eq!(rt.heap_bytes(), 0);
}
