//! Heap object representation: the common GC header every allocation
//! carries, and the per-kind payloads it wraps.
//!
//! Every heap allocation is a `GcBox<T>`, which is `#[repr(C)]` with the
//! header first, so a `*mut GcBox<T>` can always be reinterpreted as a
//! `*mut GcHeader` to walk the intrusive `objects` list or to read the kind
//! tag without knowing `T`. This is the same shape the reference VM uses
//! (a common struct header plus a variant payload); we just make the
//! generic spelling explicit instead of hand-duplicating the header in
//! every variant struct.

use std::fmt;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::{Value, format_number};
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

/// Header shared by every heap object, regardless of payload type.
///
/// `next` threads every live object into one list owned by the `Heap`
/// (invariant 5); `marked` is the GC's tri-colour bit (objects are either
/// white/unmarked or black/marked — there is no explicit gray set beyond
/// the worklist in `vm/gc.rs`).
#[repr(C)]
pub struct GcHeader {
    pub kind: ObjKind,
    pub marked: bool,
    pub next: *mut GcHeader,
}

#[repr(C)]
pub struct GcBox<T> {
    pub header: GcHeader,
    pub data: T,
}

/// A typed, non-owning handle to a heap object of a known payload type.
///
/// Copy because it is just a tagged pointer; equality is reference
/// identity, matching `Value::values_equal`'s treatment of objects.
pub struct Gc<T> {
    ptr: *mut GcBox<T>,
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ptr, other.ptr)
    }
}
impl<T> Eq for Gc<T> {}

impl<T> Gc<T> {
    /// # Safety
    /// `ptr` must point at a live, fully-initialized `GcBox<T>`.
    pub unsafe fn from_raw(ptr: *mut GcBox<T>) -> Self {
        Gc { ptr }
    }

    #[must_use]
    pub fn as_header(&self) -> *mut GcHeader {
        self.ptr.cast()
    }

    #[must_use]
    pub fn as_value(&self) -> Value {
        Value::Obj(self.as_header())
    }
}

impl<T> std::ops::Deref for Gc<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &(*self.ptr).data }
    }
}

impl<T> std::ops::DerefMut for Gc<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut (*self.ptr).data }
    }
}

/// Downcast a type-erased `*mut GcHeader` back to a typed handle.
///
/// # Safety
/// `header` must actually point at a `GcBox<T>` whose kind matches `kind`.
unsafe fn downcast<T>(header: *mut GcHeader, kind: ObjKind) -> Gc<T> {
    debug_assert_eq!(unsafe { (*header).kind }, kind);
    unsafe { Gc::from_raw(header.cast()) }
}

// ---------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------

pub struct StringObj {
    pub hash: u32,
    pub chars: String,
}

pub struct FunctionObj {
    pub arity: u8,
    pub upvalue_count: usize,
    pub name: Option<Gc<StringObj>>,
    pub chunk: Chunk,
}

impl FunctionObj {
    #[must_use]
    pub fn new(name: Option<Gc<StringObj>>) -> Self {
        FunctionObj {
            arity: 0,
            upvalue_count: 0,
            name,
            chunk: Chunk::new(),
        }
    }
}

pub type NativeFn = fn(vm: &mut Vm, args: &[Value]) -> Result<Value, String>;

pub struct NativeObj {
    pub function: NativeFn,
}

/// Either a live pointer into the value stack (absolute slot index) or an
/// owned copy made when the defining frame unwound. See §9 "Upvalues as
/// shared mutable slots".
#[derive(Clone, Copy)]
pub enum UpvalueLocation {
    Open(usize),
    Closed(Value),
}

pub struct UpvalueObj {
    pub location: UpvalueLocation,
    /// Next node in the VM's sorted-by-slot open-upvalue list. Only
    /// meaningful while `location` is `Open`; unused once closed.
    pub next_open: Option<Gc<UpvalueObj>>,
}

pub struct ClosureObj {
    pub function: Gc<FunctionObj>,
    pub upvalues: Vec<Gc<UpvalueObj>>,
}

pub struct ClassObj {
    pub name: Gc<StringObj>,
    pub methods: Table,
}

impl ClassObj {
    #[must_use]
    pub fn new(name: Gc<StringObj>) -> Self {
        ClassObj {
            name,
            methods: Table::new(),
        }
    }
}

pub struct InstanceObj {
    pub class: Gc<ClassObj>,
    pub fields: Table,
}

impl InstanceObj {
    #[must_use]
    pub fn new(class: Gc<ClassObj>) -> Self {
        InstanceObj {
            class,
            fields: Table::new(),
        }
    }
}

pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Gc<ClosureObj>,
}

// ---------------------------------------------------------------------
// Typed views onto a `Value`
// ---------------------------------------------------------------------

macro_rules! value_as {
    ($fn_name:ident, $kind:ident, $payload:ty) => {
        #[must_use]
        pub fn $fn_name(value: &Value) -> Option<Gc<$payload>> {
            match value {
                Value::Obj(ptr) if unsafe { (**ptr).kind } == ObjKind::$kind => {
                    Some(unsafe { downcast(*ptr, ObjKind::$kind) })
                }
                _ => None,
            }
        }
    };
}

value_as!(as_string, String, StringObj);
value_as!(as_function, Function, FunctionObj);
value_as!(as_native, Native, NativeObj);
value_as!(as_closure, Closure, ClosureObj);
value_as!(as_upvalue, Upvalue, UpvalueObj);
value_as!(as_class, Class, ClassObj);
value_as!(as_instance, Instance, InstanceObj);
value_as!(as_bound_method, BoundMethod, BoundMethodObj);

#[must_use]
pub fn is_string(value: &Value) -> bool {
    value.is_obj_kind(ObjKind::String)
}

// ---------------------------------------------------------------------
// Printing (§4.A)
// ---------------------------------------------------------------------

#[must_use]
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Obj(_) => format_object(value),
    }
}

fn format_object(value: &Value) -> String {
    if let Some(s) = as_string(value) {
        return s.chars.clone();
    }
    if let Some(f) = as_function(value) {
        return format_function(&f);
    }
    if as_native(value).is_some() {
        return "<native fn>".to_string();
    }
    if let Some(c) = as_closure(value) {
        return format_function(&c.function);
    }
    if as_upvalue(value).is_some() {
        return "upvalue".to_string();
    }
    if let Some(c) = as_class(value) {
        return c.name.chars.clone();
    }
    if let Some(i) = as_instance(value) {
        return format!("{} instance", i.class.name.chars);
    }
    if let Some(b) = as_bound_method(value) {
        return format_function(&b.method.function);
    }
    "<obj>".to_string()
}

fn format_function(f: &Gc<FunctionObj>) -> String {
    match &f.name {
        Some(name) => format!("<fn {}>", name.chars),
        None => "<script>".to_string(),
    }
}

impl fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcHeader({:?})", self.kind)
    }
}

/// FNV-1a 32-bit, matching the reference scanner's string hash exactly so
/// interning behaves identically regardless of host word size.
#[must_use]
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
