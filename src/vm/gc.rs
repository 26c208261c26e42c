//! Mark-sweep collection (§4.C). Splits from `mod.rs` because this is the
//! one part of the VM that needs to reach every root (stack, frames, open
//! upvalues, globals, the compiler chain) and then walk the full object
//! graph — everything else in the VM only ever touches a handful of those
//! at once.

use crate::object::{GcHeader, ObjKind, UpvalueLocation};
use crate::value::Value;

use super::Vm;

impl Vm {
    /// One full collection cycle: mark every root, trace from them to
    /// blacken the reachable graph, drop interned-string entries whose key
    /// didn't survive (invariant 6 — this must happen *before* sweep frees
    /// the `StringObj`s themselves), then sweep and grow the threshold for
    /// next time.
    pub(crate) fn collect_garbage(&mut self) {
        let mut gray: Vec<*mut GcHeader> = Vec::new();
        self.mark_roots(&mut gray);
        Self::trace_references(&mut gray);
        self.heap.strings.remove_unmarked_keys();
        // SAFETY: every object reachable from a root was just marked above.
        let (freed_objects, freed_bytes) = unsafe { self.heap.sweep() };
        self.heap.grow_threshold();
        if self.gc_log {
            eprintln!("-- gc: collected {freed_objects} objects ({freed_bytes} bytes freed)");
        }
    }

    fn mark_roots(&mut self, gray: &mut Vec<*mut GcHeader>) {
        for &value in &self.stack {
            Self::mark_value(value, gray);
        }
        for frame in &self.frames {
            Self::mark_object(frame.closure.as_header(), gray);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(up) = upvalue {
            Self::mark_object(up.as_header(), gray);
            upvalue = up.next_open;
        }
        self.globals.for_each(|key, value| {
            Self::mark_object(key.as_header(), gray);
            Self::mark_value(value, gray);
        });
        for function in &self.compiler_stack {
            Self::mark_object(function.as_header(), gray);
        }
        Self::mark_object(self.init_string.as_header(), gray);
    }

    fn trace_references(gray: &mut Vec<*mut GcHeader>) {
        while let Some(header) = gray.pop() {
            Self::blacken_object(header, gray);
        }
    }

    fn mark_value(value: Value, gray: &mut Vec<*mut GcHeader>) {
        if let Value::Obj(header) = value {
            Self::mark_object(header, gray);
        }
    }

    /// Mark `header` black-eligible (push it onto the gray worklist) unless
    /// it's already marked. There is no separate "gray" bit on the header
    /// itself — membership in `gray` (or having already been popped from
    /// it) stands in for white/gray/black.
    fn mark_object(header: *mut GcHeader, gray: &mut Vec<*mut GcHeader>) {
        if header.is_null() {
            return;
        }
        // SAFETY: every `*mut GcHeader` reachable from a root or stored in
        // an already-traced object is a live allocation.
        let already_marked = unsafe { (*header).marked };
        if already_marked {
            return;
        }
        unsafe {
            (*header).marked = true;
        }
        gray.push(header);
    }

    /// Trace the outgoing references of one object, per its kind, mirroring
    /// `blackenObject`'s switch in the reference collector.
    fn blacken_object(header: *mut GcHeader, gray: &mut Vec<*mut GcHeader>) {
        use crate::object::{BoundMethodObj, ClassObj, ClosureObj, FunctionObj, Gc, InstanceObj, UpvalueObj};

        // SAFETY: `header` was pushed by `mark_object`, which only pushes
        // live, fully-initialized headers.
        let kind = unsafe { (*header).kind };
        match kind {
            ObjKind::String | ObjKind::Native => {}
            ObjKind::Upvalue => {
                let obj: Gc<UpvalueObj> = unsafe { Gc::from_raw(header.cast()) };
                if let UpvalueLocation::Closed(value) = obj.location {
                    Self::mark_value(value, gray);
                }
            }
            ObjKind::Function => {
                let obj: Gc<FunctionObj> = unsafe { Gc::from_raw(header.cast()) };
                if let Some(name) = obj.name {
                    Self::mark_object(name.as_header(), gray);
                }
                for &constant in &obj.chunk.constants {
                    Self::mark_value(constant, gray);
                }
            }
            ObjKind::Closure => {
                let obj: Gc<ClosureObj> = unsafe { Gc::from_raw(header.cast()) };
                Self::mark_object(obj.function.as_header(), gray);
                for &upvalue in &obj.upvalues {
                    Self::mark_object(upvalue.as_header(), gray);
                }
            }
            ObjKind::Class => {
                let obj: Gc<ClassObj> = unsafe { Gc::from_raw(header.cast()) };
                Self::mark_object(obj.name.as_header(), gray);
                obj.methods.for_each(|key, value| {
                    Self::mark_object(key.as_header(), gray);
                    Self::mark_value(value, gray);
                });
            }
            ObjKind::Instance => {
                let obj: Gc<InstanceObj> = unsafe { Gc::from_raw(header.cast()) };
                Self::mark_object(obj.class.as_header(), gray);
                obj.fields.for_each(|key, value| {
                    Self::mark_object(key.as_header(), gray);
                    Self::mark_value(value, gray);
                });
            }
            ObjKind::BoundMethod => {
                let obj: Gc<BoundMethodObj> = unsafe { Gc::from_raw(header.cast()) };
                Self::mark_value(obj.receiver, gray);
                Self::mark_object(obj.method.as_header(), gray);
            }
        }
    }
}
