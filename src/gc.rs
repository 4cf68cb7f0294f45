//! Precise, non-moving, non-generational tri-color mark-and-sweep.
//!
//! The heap keeps every live object in a single intrusive linked list
//! (`GcHeader::next`). Collection happens synchronously inside an
//! allocation call once `bytes_allocated` crosses `next_gc`; after a
//! collection `next_gc` is set to twice the surviving byte count. There is
//! no write barrier because collection always runs to completion before
//! the allocator returns control to its caller, and anything the caller
//! still needs is reachable from a root it pushed before allocating.

use std::mem::size_of;

use crate::object::{
    GcBox, GcHeader, GcRef, ObjBoundMethod, ObjClass, ObjClosure, ObjFiber, ObjFunction,
    ObjInstance, ObjKind, ObjList, ObjNative, ObjRef, ObjString, ObjTable, ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;

const INITIAL_NEXT_GC: usize = 1024 * 1024;
const HEAP_GROW_FACTOR: usize = 2;

pub struct Heap {
    objects: *mut GcHeader,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub strings: Table,
    pub trace_gc: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: std::ptr::null_mut(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            strings: Table::new(),
            trace_gc: false,
        }
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    /// Allocates `value` on the heap, links it into the object list, and
    /// returns a handle to it. Does not itself trigger collection; callers
    /// that want the allocation threshold honored call `Vm::collect_if_needed`
    /// around a batch of allocations (notably around the parser, which may
    /// allocate many strings before the VM ever runs).
    pub fn allocate<T>(&mut self, kind: ObjKind, value: T) -> GcRef<T> {
        let boxed = Box::new(GcBox {
            header: GcHeader {
                marked: std::cell::Cell::new(false),
                next: std::cell::Cell::new(self.objects),
                kind,
            },
            value,
        });
        let raw = Box::into_raw(boxed);
        self.objects = raw as *mut GcHeader;
        self.bytes_allocated += size_of::<GcBox<T>>();
        if self.trace_gc {
            eprintln!(
                "{:p} allocate {} for {}",
                raw,
                size_of::<GcBox<T>>(),
                kind.type_name()
            );
        }
        unsafe { GcRef::from_raw(raw) }
    }

    /// Walks the allocation list, frees every unmarked object, clears the
    /// mark bit on survivors, and relinks the list.
    pub fn sweep(&mut self) {
        let mut previous: *mut GcHeader = std::ptr::null_mut();
        let mut current = self.objects;
        while !current.is_null() {
            let header = unsafe { &*current };
            let next = header.next.get();
            if header.marked.get() {
                header.marked.set(false);
                previous = current;
                current = next;
            } else {
                let unreached = current;
                current = next;
                if previous.is_null() {
                    self.objects = next;
                } else {
                    unsafe { (*previous).next.set(next) };
                }
                let freed = free_object(unreached);
                self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
            }
        }
    }

    pub fn objects_iter(&self) -> ObjectsIter {
        ObjectsIter { next: self.objects }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ObjectsIter {
    next: *mut GcHeader,
}

impl Iterator for ObjectsIter {
    type Item = *mut GcHeader;
    fn next(&mut self) -> Option<*mut GcHeader> {
        if self.next.is_null() {
            None
        } else {
            let cur = self.next;
            self.next = unsafe { (*cur).next.get() };
            Some(cur)
        }
    }
}

/// Downcasts `header` to its concrete `GcBox<T>` and drops it, returning
/// the number of bytes freed.
fn free_object(header: *mut GcHeader) -> usize {
    let kind = unsafe { (*header).kind };
    macro_rules! drop_as {
        ($t:ty) => {{
            let size = size_of::<GcBox<$t>>();
            unsafe {
                drop(Box::from_raw(header as *mut GcBox<$t>));
            }
            size
        }};
    }
    match kind {
        ObjKind::String => drop_as!(ObjString),
        ObjKind::Function => drop_as!(ObjFunction),
        ObjKind::Native => drop_as!(ObjNative),
        ObjKind::Closure => drop_as!(ObjClosure),
        ObjKind::Upvalue => drop_as!(ObjUpvalue),
        ObjKind::Class => drop_as!(ObjClass),
        ObjKind::Instance => drop_as!(ObjInstance),
        ObjKind::BoundMethod => drop_as!(ObjBoundMethod),
        ObjKind::List => drop_as!(ObjList),
        ObjKind::Table => drop_as!(ObjTable),
        ObjKind::Fiber => drop_as!(ObjFiber),
    }
}

/// Marks `obj` black if it was white, pushing it onto the gray stack so
/// its own references get traced later. Returns whether it was newly
/// marked (callers use this to avoid re-pushing already-gray objects).
pub fn mark_object(obj: ObjRef, gray: &mut Vec<*mut GcHeader>) {
    if obj.is_marked() {
        return;
    }
    obj.mark();
    gray.push(obj.erase());
}

pub fn mark_value(value: Value, gray: &mut Vec<*mut GcHeader>) {
    if let Value::Obj(obj) = value {
        mark_object(obj, gray);
    }
}

fn obj_ref_of(header: *mut GcHeader, kind: ObjKind) -> ObjRef {
    unsafe {
        match kind {
            ObjKind::String => ObjRef::String(GcRef::from_raw(header as *mut GcBox<ObjString>)),
            ObjKind::Function => {
                ObjRef::Function(GcRef::from_raw(header as *mut GcBox<ObjFunction>))
            }
            ObjKind::Native => ObjRef::Native(GcRef::from_raw(header as *mut GcBox<ObjNative>)),
            ObjKind::Closure => ObjRef::Closure(GcRef::from_raw(header as *mut GcBox<ObjClosure>)),
            ObjKind::Upvalue => ObjRef::Upvalue(GcRef::from_raw(header as *mut GcBox<ObjUpvalue>)),
            ObjKind::Class => ObjRef::Class(GcRef::from_raw(header as *mut GcBox<ObjClass>)),
            ObjKind::Instance => {
                ObjRef::Instance(GcRef::from_raw(header as *mut GcBox<ObjInstance>))
            }
            ObjKind::BoundMethod => {
                ObjRef::BoundMethod(GcRef::from_raw(header as *mut GcBox<ObjBoundMethod>))
            }
            ObjKind::List => ObjRef::List(GcRef::from_raw(header as *mut GcBox<ObjList>)),
            ObjKind::Table => ObjRef::Table(GcRef::from_raw(header as *mut GcBox<ObjTable>)),
            ObjKind::Fiber => ObjRef::Fiber(GcRef::from_raw(header as *mut GcBox<ObjFiber>)),
        }
    }
}

/// Marks every field a gray object references, per its concrete kind.
/// Strings and natives have no outgoing references.
pub fn blacken(header: *mut GcHeader, gray: &mut Vec<*mut GcHeader>) {
    let kind = unsafe { (*header).kind };
    let obj = obj_ref_of(header, kind);
    match obj {
        ObjRef::String(_) | ObjRef::Native(_) => {}
        ObjRef::Function(f) => {
            if let Some(name) = f.name {
                mark_object(ObjRef::String(name), gray);
            }
            for constant in f.chunk.constants.iter() {
                mark_value(*constant, gray);
            }
        }
        ObjRef::Closure(c) => {
            mark_object(ObjRef::Function(c.function), gray);
            for upvalue in c.upvalues.iter() {
                mark_object(ObjRef::Upvalue(*upvalue), gray);
            }
        }
        ObjRef::Upvalue(u) => mark_value(u.get(), gray),
        ObjRef::Class(c) => {
            mark_object(ObjRef::String(c.name), gray);
            for (key, value) in c.methods.borrow().iter() {
                mark_object(ObjRef::String(key), gray);
                mark_value(value, gray);
            }
        }
        ObjRef::Instance(i) => {
            mark_object(ObjRef::Class(i.klass), gray);
            for (key, value) in i.fields.borrow().iter() {
                mark_object(ObjRef::String(key), gray);
                mark_value(value, gray);
            }
        }
        ObjRef::BoundMethod(b) => {
            mark_value(b.receiver, gray);
            mark_object(ObjRef::Closure(b.method), gray);
        }
        ObjRef::List(l) => {
            for value in l.values.borrow().iter() {
                mark_value(*value, gray);
            }
        }
        ObjRef::Table(t) => {
            for (key, value) in t.values.borrow().iter() {
                mark_object(ObjRef::String(key), gray);
                mark_value(value, gray);
            }
        }
        ObjRef::Fiber(fiber) => mark_fiber(fiber, gray),
    }
}

/// Marks the transitive roots of a single fiber: its live stack slice,
/// every active frame's closure, and the open-upvalue chain. Used both for
/// the active fiber (as a root set) and for any other fiber object
/// encountered while tracing (as ordinary blackening).
pub fn mark_fiber(fiber: GcRef<ObjFiber>, gray: &mut Vec<*mut GcHeader>) {
    let state = fiber.state.borrow();
    for slot in state.stack[..state.stack_top].iter() {
        mark_value(*slot, gray);
    }
    for frame in state.frames.iter() {
        mark_object(ObjRef::Closure(frame.closure), gray);
    }
    let mut upvalue = state.open_upvalues;
    while let Some(u) = upvalue {
        mark_object(ObjRef::Upvalue(u), gray);
        upvalue = u.next_open.get();
    }
}

pub fn next_gc_after(bytes_allocated: usize) -> usize {
    bytes_allocated * HEAP_GROW_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::hash_string;

    #[test]
    fn next_gc_after_doubles() {
        assert_eq!(next_gc_after(1024), 2048);
        assert_eq!(next_gc_after(0), 0);
    }

    #[test]
    fn mark_object_is_idempotent() {
        let mut heap = Heap::new();
        let s = heap.allocate(
            ObjKind::String,
            ObjString {
                chars: "x".to_string(),
                length: 1,
                hash: hash_string("x"),
            },
        );
        let mut gray = Vec::new();
        mark_object(ObjRef::String(s), &mut gray);
        assert_eq!(gray.len(), 1);
        mark_object(ObjRef::String(s), &mut gray);
        assert_eq!(gray.len(), 1, "marking an already-black object must not re-push it");
    }

    #[test]
    fn sweep_frees_unmarked_and_keeps_marked() {
        let mut heap = Heap::new();
        let survivor = heap.allocate(
            ObjKind::String,
            ObjString {
                chars: "keep".to_string(),
                length: 4,
                hash: hash_string("keep"),
            },
        );
        let _garbage = heap.allocate(
            ObjKind::String,
            ObjString {
                chars: "drop".to_string(),
                length: 4,
                hash: hash_string("drop"),
            },
        );
        survivor.mark();
        heap.sweep();

        let remaining: Vec<&str> = heap
            .objects_iter()
            .map(|h| unsafe { (*(h as *mut GcBox<ObjString>)).value.as_str() })
            .collect();
        assert_eq!(remaining, vec!["keep"]);
        assert!(!survivor.is_marked(), "sweep must clear the mark bit on survivors");
    }
}
