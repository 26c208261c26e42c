//! Bytecode disassembly (§4.I). Printed to stderr whenever `Vm::log_level`
//! is `LogLevel::Trace`, taking the place of the reference build's
//! compile-time `DEBUG_TRACE_EXECUTION`/`DEBUG_PRINT_CODE` defines.

use crate::chunk::{Chunk, OpCode};
use crate::object::{as_function, format_value};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    eprintln!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    eprint!("{offset:04} ");
    if offset > 0 && chunk.get_line(offset) == chunk.get_line(offset - 1) {
        eprint!("   | ");
    } else {
        eprint!("{:4} ", chunk.get_line(offset));
    }

    match OpCode::from_byte(chunk.code[offset]) {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset),
        OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset),
        OpCode::GetSuper => constant_instruction("OP_GET_SUPER", chunk, offset),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Print => simple_instruction("OP_PRINT", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Invoke => invoke_instruction("OP_INVOKE", chunk, offset),
        OpCode::SuperInvoke => invoke_instruction("OP_SUPER_INVOKE", chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
        OpCode::Class => constant_instruction("OP_CLASS", chunk, offset),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset),
        OpCode::Method => constant_instruction("OP_METHOD", chunk, offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    eprintln!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    eprintln!("{name:-16} {slot:4}");
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let hi = u16::from(chunk.code[offset + 1]);
    let lo = u16::from(chunk.code[offset + 2]);
    let jump = (hi << 8) | lo;
    let target = offset as i32 + 3 + sign * i32::from(jump);
    eprintln!("{name:-16} {offset:4} -> {target}");
    offset + 3
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let idx = chunk.code[offset + 1];
    let value = &chunk.constants[idx as usize];
    eprintln!("{name:-16} {idx:4} '{}'", format_value(value));
    offset + 2
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    let arg_count = chunk.code[offset + 2];
    let value = &chunk.constants[constant as usize];
    eprintln!("{name:-16} ({arg_count} args) {constant:4} '{}'", format_value(value));
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset];
    offset += 1;
    let value = &chunk.constants[constant as usize];
    eprintln!("OP_CLOSURE       {constant:4} '{}'", format_value(value));

    if let Some(function) = as_function(value) {
        for _ in 0..function.upvalue_count {
            let is_local = chunk.code[offset];
            offset += 1;
            let index = chunk.code[offset];
            offset += 1;
            let label = if is_local != 0 { "local" } else { "upvalue" };
            eprintln!("{offset:04}      |                     {label} {index}");
        }
    }
    offset
}
