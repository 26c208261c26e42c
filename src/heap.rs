//! The allocator side of §4.B/§4.C: every heap object is threaded onto one
//! intrusive list here, and the interned-string table lives alongside it
//! since both are owned by whichever process-wide `Vm` builds them.
//!
//! Collection itself (mark/trace/sweep) needs the VM's roots (the value
//! stack, frames, open upvalues, the compiler's in-progress functions) and
//! so lives on `Vm` in `vm/gc.rs`; this module only owns the bytes-allocated
//! bookkeeping, the intrusive object list, and the raw (un)linking of a new
//! allocation.

use crate::object::{Gc, GcBox, GcHeader, ObjKind};
use crate::table::Table;

/// Initial GC threshold (§4.C): 1 MiB of heap-object headers and payloads
/// before the first collection is even considered.
const INITIAL_NEXT_GC: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

pub struct Heap {
    /// The interned-string set, keyed by itself (every `StringObj` is both
    /// the key and, trivially, its own "value" — see `Table::find_string`).
    pub strings: Table,
    objects: *mut GcHeader,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    /// "Stress GC" build flag from §4.C, exposed as a runtime toggle per
    /// §6 CLI's `--stress-gc` rather than a compile-time `#define`.
    pub stress_gc: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Heap {
            strings: Table::new(),
            objects: std::ptr::null_mut(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress_gc: false,
        }
    }

    /// Allocate a new heap object of kind `kind` wrapping `data`, link it
    /// onto the intrusive `objects` list (invariant 5), and return a typed
    /// handle to it. Does not itself decide whether to collect — that
    /// decision needs VM roots and is made by the caller via
    /// `should_collect`, mirroring `reallocate`'s threshold check in §4.C.
    pub fn alloc<T>(&mut self, kind: ObjKind, data: T) -> Gc<T> {
        let boxed = Box::new(GcBox {
            header: GcHeader {
                kind,
                marked: false,
                next: self.objects,
            },
            data,
        });
        self.bytes_allocated += std::mem::size_of::<GcBox<T>>();
        let ptr = Box::into_raw(boxed);
        self.objects = ptr.cast();
        // SAFETY: `ptr` was just produced by `Box::into_raw` and is fully
        // initialized.
        unsafe { Gc::from_raw(ptr) }
    }

    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.stress_gc || self.bytes_allocated > self.next_gc
    }

    pub fn grow_threshold(&mut self) {
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }

    #[must_use]
    pub fn objects_head(&self) -> *mut GcHeader {
        self.objects
    }

    /// Single sweep pass over the `objects` list (§4.C "Sweep"): unmarked
    /// objects are unlinked and dropped in place via the right concrete
    /// type so their owned fields (`String`, `Vec`, nested `Table`s) run
    /// their destructors; marked objects have their bit cleared for the
    /// next cycle. Returns `(objects_freed, bytes_freed)` for the
    /// `--gc-log` summary.
    ///
    /// # Safety
    /// Must only be called after a full mark phase has set `marked` on
    /// every object reachable from the VM's roots.
    pub unsafe fn sweep(&mut self) -> (usize, usize) {
        let mut prev: *mut GcHeader = std::ptr::null_mut();
        let mut curr = self.objects;
        let mut freed_count = 0usize;
        let mut freed_bytes = 0usize;

        while !curr.is_null() {
            let header = unsafe { &mut *curr };
            if header.marked {
                header.marked = false;
                prev = curr;
                curr = header.next;
                continue;
            }

            let next = header.next;
            if prev.is_null() {
                self.objects = next;
            } else {
                unsafe { (*prev).next = next };
            }

            freed_count += 1;
            freed_bytes += free_object(curr);
            curr = next;
        }

        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed_bytes);
        (freed_count, freed_bytes)
    }

    /// Free every live object unconditionally; used when the `Vm` is
    /// dropped (the Rust realization of `freeVM`/`freeObjects`).
    pub fn free_all(&mut self) {
        let mut curr = self.objects;
        while !curr.is_null() {
            let next = unsafe { (*curr).next };
            free_object(curr);
            curr = next;
        }
        self.objects = std::ptr::null_mut();
        self.bytes_allocated = 0;
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// Downcast `header` to its concrete `GcBox<T>` per its kind tag and drop
/// it, returning the size freed. Mirrors `freeObject`'s switch in
/// `memory.c`, one arm per `ObjKind`.
fn free_object(header: *mut GcHeader) -> usize {
    use crate::object::{
        BoundMethodObj, ClassObj, ClosureObj, FunctionObj, InstanceObj, NativeObj, StringObj,
        UpvalueObj,
    };

    macro_rules! drop_as {
        ($ty:ty) => {{
            let size = std::mem::size_of::<GcBox<$ty>>();
            // SAFETY: `header.kind` guarantees this was allocated as
            // `GcBox<$ty>` by `Heap::alloc`.
            let _ = unsafe { Box::from_raw(header.cast::<GcBox<$ty>>()) };
            size
        }};
    }

    // SAFETY: `header` is a live, fully-initialized object about to be
    // unlinked and freed.
    match unsafe { (*header).kind } {
        ObjKind::String => drop_as!(StringObj),
        ObjKind::Function => drop_as!(FunctionObj),
        ObjKind::Native => drop_as!(NativeObj),
        ObjKind::Closure => drop_as!(ClosureObj),
        ObjKind::Upvalue => drop_as!(UpvalueObj),
        ObjKind::Class => drop_as!(ClassObj),
        ObjKind::Instance => drop_as!(InstanceObj),
        ObjKind::BoundMethod => drop_as!(BoundMethodObj),
    }
}
