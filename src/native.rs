//! Native function registry (§4.H), installed into the globals table at
//! `Vm::new()` the same way the reference interpreter's `defineNative`
//! populates its table during `initVM` — just data-driven instead of one
//! call per builtin.

use std::sync::OnceLock;
use std::time::Instant;

use crate::object::NativeFn;
use crate::value::Value;
use crate::vm::Vm;

pub const NATIVES: &[(&str, NativeFn)] = &[("clock", clock_native)];

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since this process started, matching the reference
/// `clockNative`'s `(double)clock() / CLOCKS_PER_SEC` semantics closely
/// enough for the benchmarking and timeout-style scripts it's meant for.
fn clock_native(_vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    let start = PROCESS_START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}
