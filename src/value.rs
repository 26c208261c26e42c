//! Tagged-union runtime value and the handful of operations that don't need
//! a live `Vm` to answer: equality, truthiness, and printing.

use std::fmt;

use crate::object::{GcHeader, ObjKind};

/// Any value the VM can hold on its stack, in a local slot, or in a table.
///
/// `Obj` is a type-erased, non-owning handle into the heap: its `kind` tag on
/// the pointed-to header says which concrete payload it refers to. See
/// `object.rs` for the downcasting helpers.
#[derive(Clone, Copy)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(*mut GcHeader),
}

impl Value {
    #[must_use]
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsey()
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn obj_kind(&self) -> Option<ObjKind> {
        match self {
            Value::Obj(ptr) => Some(unsafe { (**ptr).kind }),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_obj_kind(&self, kind: ObjKind) -> bool {
        self.obj_kind() == Some(kind)
    }

    /// Reference-identity equality for heap objects, value equality for
    /// everything else. Strings rely on interning (§3 invariant 1) for this
    /// to coincide with content equality.
    #[must_use]
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => std::ptr::eq(*x, *y),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::object::format_value(self))
    }
}

/// Shortest round-trip `%g`-equivalent formatting for a finite double.
///
/// Rust's default `{}` formatting for `f64` already drops a trailing `.0`
/// for integral values and picks the shortest digit sequence that round
/// trips, which is exactly what `%g` does on every libc this project has
/// been run against. `NaN`/infinities print the same lowercase tokens C's
/// runtime would.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    format!("{n}")
}
