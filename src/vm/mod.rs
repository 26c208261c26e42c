//! Stack-based bytecode interpreter (§4.G). `Vm` owns every piece of mutable
//! interpreter state — the value stack, call frames, globals, the heap, and
//! the open-upvalue list — so collection, unlike the reference interpreter's
//! global `vm`, is just a method call away from everything it needs to walk.

mod gc;

use crate::chunk::OpCode;
use crate::compiler;
use crate::error::{ErrorKind, InterpretResult, TraceFrame, VmError};
use crate::heap::Heap;
use crate::native::NATIVES;
use crate::object::{
    as_bound_method, as_class, as_closure, as_function, as_instance, as_native, as_string,
    BoundMethodObj, ClassObj, ClosureObj, FunctionObj, Gc, InstanceObj, NativeFn, NativeObj,
    ObjKind, StringObj, UpvalueLocation, UpvalueObj,
};
use crate::table::Table;
use crate::value::Value;

/// Matches the reference VM's `FRAMES_MAX`: a call chain deeper than this is
/// reported as a stack overflow rather than exhausting the host stack.
const MAX_FRAMES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    Release,
    Debug,
    Trace,
}

#[derive(Clone, Copy)]
struct CallFrame {
    closure: Gc<ClosureObj>,
    ip: usize,
    /// Index into `Vm::stack` where this frame's local slot 0 lives.
    slot_base: usize,
}

pub struct Vm {
    pub(crate) heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    open_upvalues: Option<Gc<UpvalueObj>>,
    init_string: Gc<StringObj>,
    /// GC roots for every function currently mid-compile (§4.C, §9's
    /// "compiler chain" requirement), pushed/popped by `compiler.rs` as it
    /// recurses into nested function and method bodies.
    pub(crate) compiler_stack: Vec<Gc<FunctionObj>>,
    pub log_level: LogLevel,
    pub gc_log: bool,
}

impl Vm {
    #[must_use]
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = {
            let bytes = b"init";
            let hash = crate::object::fnv1a_hash(bytes);
            let obj = heap.alloc(ObjKind::String, StringObj { hash, chars: "init".to_string() });
            heap.strings.set(obj, Value::Nil);
            obj
        };

        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(MAX_FRAMES),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            compiler_stack: Vec::new(),
            log_level: LogLevel::Release,
            gc_log: false,
        };
        vm.define_natives();
        vm
    }

    /// Toggle the §4.C "stress GC" tuning knob: when set, every allocation
    /// that could trigger a collection does, rather than only once the
    /// heap crosses its growth threshold. Exposed for the CLI's
    /// `--stress-gc` flag and for GC-correctness tests.
    pub fn set_stress_gc(&mut self, stress: bool) {
        self.heap.stress_gc = stress;
    }

    fn define_natives(&mut self) {
        for &(name, function) in NATIVES {
            let interned = self.intern_string(name.as_bytes());
            let native = self.new_native(function);
            self.globals.set(interned, native.as_value());
        }
    }

    /// Compile `source` and run it to completion (§6). This is the single
    /// entry point an embedder (the CLI, a REPL line, or an integration
    /// test) ever needs.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match compiler::compile(self, source) {
            Ok(function) => function,
            Err(errors) => return InterpretResult::CompileError(errors),
        };

        self.push(function.as_value());
        let closure = self.new_closure(function);
        self.pop();
        self.push(closure.as_value());
        self.frames.push(CallFrame { closure, ip: 0, slot_base: 0 });

        self.run()
    }

    // -- stack ------------------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("compiler-emitted bytecode keeps push/pop balanced")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    // -- allocation, rooted against the allocator-GC hazard ----------------

    /// Temporarily root a just-allocated object on the value stack across a
    /// possible collection (§4.C): nothing else yet points at it, so if
    /// collection ran before it was pushed it would be swept as garbage.
    fn track_alloc<T>(&mut self, object: Gc<T>) -> Gc<T> {
        self.push(object.as_value());
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.pop();
        object
    }

    pub(crate) fn intern_string(&mut self, bytes: &[u8]) -> Gc<StringObj> {
        let hash = crate::object::fnv1a_hash(bytes);
        if let Some(existing) = self.heap.strings.find_string(bytes, hash) {
            return existing;
        }
        let chars = String::from_utf8_lossy(bytes).into_owned();
        let obj = self.heap.alloc(ObjKind::String, StringObj { hash, chars });
        let obj = self.track_alloc(obj);
        self.heap.strings.set(obj, Value::Nil);
        obj
    }

    pub(crate) fn alloc_function(&mut self, name: Option<Gc<StringObj>>) -> Gc<FunctionObj> {
        let obj = self.heap.alloc(ObjKind::Function, FunctionObj::new(name));
        self.track_alloc(obj)
    }

    fn new_native(&mut self, function: NativeFn) -> Gc<NativeObj> {
        let obj = self.heap.alloc(ObjKind::Native, NativeObj { function });
        self.track_alloc(obj)
    }

    fn new_closure(&mut self, function: Gc<FunctionObj>) -> Gc<ClosureObj> {
        let upvalues = Vec::with_capacity(function.upvalue_count);
        let obj = self.heap.alloc(ObjKind::Closure, ClosureObj { function, upvalues });
        self.track_alloc(obj)
    }

    fn new_upvalue(&mut self, location: UpvalueLocation) -> Gc<UpvalueObj> {
        let obj = self.heap.alloc(ObjKind::Upvalue, UpvalueObj { location, next_open: None });
        self.track_alloc(obj)
    }

    fn new_class(&mut self, name: Gc<StringObj>) -> Gc<ClassObj> {
        let obj = self.heap.alloc(ObjKind::Class, ClassObj::new(name));
        self.track_alloc(obj)
    }

    fn new_instance(&mut self, class: Gc<ClassObj>) -> Gc<InstanceObj> {
        let obj = self.heap.alloc(ObjKind::Instance, InstanceObj::new(class));
        self.track_alloc(obj)
    }

    fn new_bound_method(&mut self, receiver: Value, method: Gc<ClosureObj>) -> Gc<BoundMethodObj> {
        let obj = self.heap.alloc(ObjKind::BoundMethod, BoundMethodObj { receiver, method });
        self.track_alloc(obj)
    }

    /// Concatenate two interned strings (§4.G `OP_ADD`). Both operands stay
    /// on the stack (rather than being popped first) across the allocation
    /// that builds the owned buffer, for the same allocator-GC hazard
    /// `track_alloc` guards against elsewhere.
    fn concatenate(&mut self) {
        let b = as_string(&self.peek(0)).expect("caller already checked both operands are strings");
        let a = as_string(&self.peek(1)).expect("caller already checked both operands are strings");
        let mut joined = String::with_capacity(a.chars.len() + b.chars.len());
        joined.push_str(&a.chars);
        joined.push_str(&b.chars);
        let result = self.intern_string(joined.as_bytes());
        self.pop();
        self.pop();
        self.push(result.as_value());
    }

    // -- bytecode reading ---------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("run() only executes with at least one frame");
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        (u16::from(hi) << 8) | u16::from(lo)
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        let frame = self.frames.last().expect("run() only executes with at least one frame");
        frame.closure.function.chunk.constants[idx as usize]
    }

    fn read_string(&mut self) -> Gc<StringObj> {
        let value = self.read_constant();
        as_string(&value).expect("compiler only ever emits string constants for name operands")
    }

    fn jump_forward(&mut self, offset: u16) {
        self.frames.last_mut().expect("run() only executes with at least one frame").ip += offset as usize;
    }

    fn jump_backward(&mut self, offset: u16) {
        self.frames.last_mut().expect("run() only executes with at least one frame").ip -= offset as usize;
    }

    // -- calling --------------------------------------------------------

    fn call(&mut self, closure: Gc<ClosureObj>, arg_count: u8) -> Result<(), ErrorKind> {
        if arg_count != closure.function.arity {
            return Err(ErrorKind::ArityMismatch { expected: closure.function.arity, got: arg_count });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(ErrorKind::StackOverflow);
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), ErrorKind> {
        if let Some(closure) = as_closure(&callee) {
            return self.call(closure, arg_count);
        }
        if let Some(native) = as_native(&callee) {
            let args_start = self.stack.len() - arg_count as usize;
            let args: Vec<Value> = self.stack[args_start..].to_vec();
            return match (native.function)(self, &args) {
                Ok(result) => {
                    self.stack.truncate(args_start - 1);
                    self.push(result);
                    Ok(())
                }
                Err(message) => Err(ErrorKind::Internal(message)),
            };
        }
        if let Some(class) = as_class(&callee) {
            let instance = self.new_instance(class);
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack[slot] = instance.as_value();
            if let Some(initializer) = class.methods.get(self.init_string) {
                let closure = as_closure(&initializer).expect("methods table only ever stores closures");
                return self.call(closure, arg_count);
            }
            if arg_count != 0 {
                return Err(ErrorKind::ArityMismatch { expected: 0, got: arg_count });
            }
            return Ok(());
        }
        if let Some(bound) = as_bound_method(&callee) {
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack[slot] = bound.receiver;
            return self.call(bound.method, arg_count);
        }
        Err(ErrorKind::NotCallable)
    }

    fn invoke_from_class(&mut self, class: Gc<ClassObj>, name: Gc<StringObj>, arg_count: u8) -> Result<(), ErrorKind> {
        let Some(method) = class.methods.get(name) else {
            return Err(ErrorKind::UndefinedProperty(name.chars.clone()));
        };
        let closure = as_closure(&method).expect("methods table only ever stores closures");
        self.call(closure, arg_count)
    }

    fn invoke(&mut self, name: Gc<StringObj>, arg_count: u8) -> Result<(), ErrorKind> {
        let receiver = self.peek(arg_count as usize);
        let Some(instance) = as_instance(&receiver) else {
            return Err(ErrorKind::OnlyInstancesHaveMethods);
        };
        if let Some(value) = instance.fields.get(name) {
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack[slot] = value;
            return self.call_value(value, arg_count);
        }
        self.invoke_from_class(instance.class, name, arg_count)
    }

    fn bind_method(&mut self, class: Gc<ClassObj>, name: Gc<StringObj>) -> Result<(), ErrorKind> {
        let Some(method) = class.methods.get(name) else {
            return Err(ErrorKind::UndefinedProperty(name.chars.clone()));
        };
        let closure = as_closure(&method).expect("methods table only ever stores closures");
        let receiver = self.peek(0);
        let bound = self.new_bound_method(receiver, closure);
        self.pop();
        self.push(bound.as_value());
        Ok(())
    }

    fn capture_upvalue(&mut self, slot: usize) -> Gc<UpvalueObj> {
        let mut prev: Option<Gc<UpvalueObj>> = None;
        let mut current = self.open_upvalues;
        while let Some(up) = current {
            match up.location {
                UpvalueLocation::Open(s) if s == slot => return up,
                UpvalueLocation::Open(s) if s < slot => break,
                _ => {}
            }
            prev = Some(up);
            current = up.next_open;
        }

        let created = self.new_upvalue(UpvalueLocation::Open(slot));
        let mut created_mut = created;
        created_mut.next_open = current;
        match prev {
            Some(mut p) => p.next_open = Some(created),
            None => self.open_upvalues = Some(created),
        }
        created
    }

    fn close_upvalues(&mut self, from: usize) {
        while let Some(mut up) = self.open_upvalues {
            let UpvalueLocation::Open(slot) = up.location else { break };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            up.location = UpvalueLocation::Closed(value);
            self.open_upvalues = up.next_open;
        }
    }

    // -- the dispatch loop -------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn run(&mut self) -> InterpretResult {
        loop {
            if self.log_level >= LogLevel::Trace {
                self.trace_instruction();
            }

            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + slot as usize]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte();
                    let value = self.peek(0);
                    let base = self.frames.last().unwrap().slot_base;
                    self.stack[base + slot as usize] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => return self.runtime_error(ErrorKind::UndefinedVariable(name.chars.clone())),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        return self.runtime_error(ErrorKind::UndefinedVariable(name.chars.clone()));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte();
                    let upvalue = self.frames.last().unwrap().closure.upvalues[slot as usize];
                    let value = match upvalue.location {
                        UpvalueLocation::Open(idx) => self.stack[idx],
                        UpvalueLocation::Closed(v) => v,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte();
                    let value = self.peek(0);
                    let mut upvalue = self.frames.last().unwrap().closure.upvalues[slot as usize];
                    match upvalue.location {
                        UpvalueLocation::Open(idx) => self.stack[idx] = value,
                        UpvalueLocation::Closed(_) => upvalue.location = UpvalueLocation::Closed(value),
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    let Some(instance) = as_instance(&receiver) else {
                        return self.runtime_error(ErrorKind::OnlyInstancesHaveProperties);
                    };
                    if let Some(value) = instance.fields.get(name) {
                        self.pop();
                        self.push(value);
                    } else if let Err(kind) = self.bind_method(instance.class, name) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(1);
                    let Some(mut instance) = as_instance(&receiver) else {
                        return self.runtime_error(ErrorKind::OnlyInstancesHaveFields);
                    };
                    let value = self.peek(0);
                    instance.fields.set(name, value);
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass_value = self.pop();
                    let superclass = as_class(&superclass_value)
                        .expect("compiler only emits OP_GET_SUPER right after pushing the superclass");
                    if let Err(kind) = self.bind_method(superclass, name) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(&a, &b)));
                }
                OpCode::Greater => {
                    if let Err(kind) = self.binary_compare(|a, b| a > b) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Less => {
                    if let Err(kind) = self.binary_compare(|a, b| a < b) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Add => {
                    if as_string(&self.peek(0)).is_some() && as_string(&self.peek(1)).is_some() {
                        self.concatenate();
                    } else if self.peek(0).is_number() && self.peek(1).is_number() {
                        let b = self.pop().as_number().unwrap();
                        let a = self.pop().as_number().unwrap();
                        self.push(Value::Number(a + b));
                    } else {
                        return self.runtime_error(ErrorKind::AddOperandsMismatch);
                    }
                }
                OpCode::Subtract => {
                    if let Err(kind) = self.binary_arith(|a, b| a - b) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Multiply => {
                    if let Err(kind) = self.binary_arith(|a, b| a * b) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Divide => {
                    if let Err(kind) = self.binary_arith(|a, b| a / b) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return self.runtime_error(ErrorKind::OperandMustBeNumber);
                    }
                    let n = self.pop().as_number().unwrap();
                    self.push(Value::Number(-n));
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{}", crate::object::format_value(&value));
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.jump_forward(offset);
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.jump_forward(offset);
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.jump_backward(offset);
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    if let Err(kind) = self.call_value(callee, arg_count) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    if let Err(kind) = self.invoke(name, arg_count) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    let superclass_value = self.pop();
                    let superclass = as_class(&superclass_value)
                        .expect("compiler only emits OP_SUPER_INVOKE right after pushing the superclass");
                    if let Err(kind) = self.invoke_from_class(superclass, name, arg_count) {
                        return self.runtime_error(kind);
                    }
                }
                OpCode::Closure => {
                    let value = self.read_constant();
                    let function = as_function(&value).expect("compiler only emits OP_CLOSURE for function constants");
                    let mut closure = self.new_closure(function);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        let upvalue = if is_local {
                            let base = self.frames.last().unwrap().slot_base;
                            self.capture_upvalue(base + index as usize)
                        } else {
                            self.frames.last().unwrap().closure.upvalues[index as usize]
                        };
                        closure.upvalues.push(upvalue);
                    }
                    self.push(closure.as_value());
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("OP_RETURN always runs inside a frame");
                    self.close_upvalues(frame.slot_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return InterpretResult::Ok;
                    }
                    self.stack.truncate(frame.slot_base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.new_class(name);
                    self.push(class.as_value());
                }
                OpCode::Inherit => {
                    let superclass_value = self.peek(1);
                    let Some(superclass) = as_class(&superclass_value) else {
                        return self.runtime_error(ErrorKind::SuperclassMustBeClass);
                    };
                    let mut subclass = as_class(&self.peek(0))
                        .expect("compiler only emits OP_INHERIT right after pushing the new class");
                    subclass.methods.add_all(&superclass.methods);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.pop();
                    let mut class = as_class(&self.peek(0)).expect("class body compiles with its class on the stack");
                    class.methods.set(name, method);
                }
            }
        }
    }

    fn binary_arith(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), ErrorKind> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(ErrorKind::OperandsMustBeNumbers);
        }
        let b = self.pop().as_number().unwrap();
        let a = self.pop().as_number().unwrap();
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), ErrorKind> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(ErrorKind::OperandsMustBeNumbers);
        }
        let b = self.pop().as_number().unwrap();
        let a = self.pop().as_number().unwrap();
        self.push(Value::Bool(op(a, b)));
        Ok(())
    }

    fn runtime_error(&mut self, kind: ErrorKind) -> InterpretResult {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = frame.closure.function;
            let line = function.chunk.get_line(frame.ip.saturating_sub(1));
            trace.push(TraceFrame { line, function_name: function.name.map(|n| n.chars.clone()) });
        }

        eprintln!("Runtime Error: {kind}");
        for frame in &trace {
            match &frame.function_name {
                Some(name) => eprintln!("[line {}] in {name}()", frame.line),
                None => eprintln!("[line {}] in script", frame.line),
            }
        }

        self.reset_stack();
        InterpretResult::RuntimeError(VmError::new(kind, trace))
    }

    fn trace_instruction(&self) {
        eprint!("          ");
        for value in &self.stack {
            eprint!("[ {} ]", crate::object::format_value(value));
        }
        eprintln!();
        let frame = self.frames.last().unwrap();
        crate::disassembler::disassemble_instruction(&frame.closure.function.chunk, frame.ip);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
