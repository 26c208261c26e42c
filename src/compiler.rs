//! Single-pass Pratt-parser compiler (§4.E): no AST, every expression and
//! statement emits directly into the `Chunk` of whichever function is
//! currently being compiled. The "currently being compiled" function forms
//! a chain exactly like the reference compiler's linked `Compiler` structs,
//! except here it's `FnCtx::enclosing`, a field on this struct rather than
//! a process-global pointer, and the in-progress `FunctionObj`s are kept
//! alive for the GC via `Vm::compiler_stack` rather than a `markCompilerRoots`
//! callback.

use crate::chunk::OpCode;
use crate::error::{CompileError, ErrorLocation};
use crate::object::{FunctionObj, Gc};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct Local<'src> {
    name: Token<'src>,
    /// `-1` while the initializer expression is still being compiled, so a
    /// reference to the variable inside its own initializer resolves as an
    /// error instead of silently reading the uninitialized slot.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueInfo {
    index: u8,
    is_local: bool,
}

struct FnCtx<'src> {
    enclosing: Option<Box<FnCtx<'src>>>,
    function: Gc<FunctionObj>,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueInfo>,
    scope_depth: i32,
}

struct ClassCtx {
    enclosing: Option<Box<ClassCtx>>,
    has_superclass: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'vm> = fn(&mut Compiler<'src, 'vm>, bool);

struct ParseRule<'src, 'vm> {
    prefix: Option<ParseFn<'src, 'vm>>,
    infix: Option<ParseFn<'src, 'vm>>,
    precedence: Precedence,
}

fn get_rule<'src, 'vm>(kind: TokenKind) -> ParseRule<'src, 'vm> {
    use TokenKind as T;
    let (prefix, infix, precedence) = match kind {
        T::LeftParen => (
            Some(Compiler::grouping as ParseFn<'src, 'vm>),
            Some(Compiler::call_expr as ParseFn<'src, 'vm>),
            Precedence::Call,
        ),
        T::Dot => (None, Some(Compiler::dot as ParseFn<'src, 'vm>), Precedence::Call),
        T::Minus => (
            Some(Compiler::unary as ParseFn<'src, 'vm>),
            Some(Compiler::binary as ParseFn<'src, 'vm>),
            Precedence::Term,
        ),
        T::Plus => (None, Some(Compiler::binary as ParseFn<'src, 'vm>), Precedence::Term),
        T::Slash => (None, Some(Compiler::binary as ParseFn<'src, 'vm>), Precedence::Factor),
        T::Star => (None, Some(Compiler::binary as ParseFn<'src, 'vm>), Precedence::Factor),
        T::Bang => (Some(Compiler::unary as ParseFn<'src, 'vm>), None, Precedence::None),
        T::BangEqual => (None, Some(Compiler::binary as ParseFn<'src, 'vm>), Precedence::Equality),
        T::EqualEqual => (None, Some(Compiler::binary as ParseFn<'src, 'vm>), Precedence::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            (None, Some(Compiler::binary as ParseFn<'src, 'vm>), Precedence::Comparison)
        }
        T::Identifier => (Some(Compiler::variable as ParseFn<'src, 'vm>), None, Precedence::None),
        T::String => (Some(Compiler::string as ParseFn<'src, 'vm>), None, Precedence::None),
        T::Number => (Some(Compiler::number as ParseFn<'src, 'vm>), None, Precedence::None),
        T::And => (None, Some(Compiler::and_ as ParseFn<'src, 'vm>), Precedence::And),
        T::Or => (None, Some(Compiler::or_ as ParseFn<'src, 'vm>), Precedence::Or),
        T::False | T::Nil | T::True => {
            (Some(Compiler::literal as ParseFn<'src, 'vm>), None, Precedence::None)
        }
        T::Super => (Some(Compiler::super_ as ParseFn<'src, 'vm>), None, Precedence::None),
        T::This => (Some(Compiler::this_ as ParseFn<'src, 'vm>), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule { prefix, infix, precedence }
}

fn synthetic_token(text: &'static str) -> Token<'static> {
    Token { kind: TokenKind::Identifier, lexeme: text, line: 0 }
}

pub struct Compiler<'src, 'vm> {
    vm: &'vm mut Vm,
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    ctx: FnCtx<'src>,
    class_ctx: Option<Box<ClassCtx>>,
}

/// Compiles `source` into a top-level function (the "script" function whose
/// chunk is the program's entry point), or the list of diagnostics produced
/// along the way if compilation failed (§4.E, §6).
pub fn compile(vm: &mut Vm, source: &str) -> Result<Gc<FunctionObj>, Vec<CompileError>> {
    let mut compiler = Compiler::new(vm, source);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let had_error = compiler.had_error;
    let errors = std::mem::take(&mut compiler.errors);
    let (function, _) = compiler.end_function();
    if had_error { Err(errors) } else { Ok(function) }
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    fn new(vm: &'vm mut Vm, source: &'src str) -> Self {
        let function = vm.alloc_function(None);
        vm.compiler_stack.push(function);
        let dummy = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
        Compiler {
            scanner: Scanner::new(source),
            previous: dummy,
            current: dummy,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            ctx: FnCtx {
                enclosing: None,
                function,
                fn_type: FunctionType::Script,
                locals: vec![Local {
                    name: Token { kind: TokenKind::Identifier, lexeme: "", line: 0 },
                    depth: 0,
                    is_captured: false,
                }],
                upvalues: Vec::new(),
                scope_depth: 0,
            },
            class_ctx: None,
            vm,
        }
    }

    // -- function-compile chain ------------------------------------------

    fn begin_function(&mut self, fn_type: FunctionType) {
        let name = if fn_type == FunctionType::Script {
            None
        } else {
            Some(self.vm.intern_string(self.previous.lexeme.as_bytes()))
        };
        let function = self.vm.alloc_function(name);
        self.vm.compiler_stack.push(function);
        let reserved = match fn_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Function | FunctionType::Script => "",
        };
        let new_ctx = FnCtx {
            enclosing: None,
            function,
            fn_type,
            locals: vec![Local {
                name: Token { kind: TokenKind::Identifier, lexeme: reserved, line: 0 },
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        };
        let old = std::mem::replace(&mut self.ctx, new_ctx);
        self.ctx.enclosing = Some(Box::new(old));
    }

    fn end_function(&mut self) -> (Gc<FunctionObj>, Vec<UpvalueInfo>) {
        self.emit_return();
        let function = self.ctx.function;
        let upvalues = std::mem::take(&mut self.ctx.upvalues);
        self.vm.compiler_stack.pop();
        if let Some(enclosing) = self.ctx.enclosing.take() {
            self.ctx = *enclosing;
        }
        (function, upvalues)
    }

    // -- token stream ------------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = if token.kind == TokenKind::Eof {
            ErrorLocation::End
        } else if token.kind == TokenKind::Error {
            ErrorLocation::Bare
        } else {
            ErrorLocation::Lexeme(token.lexeme.to_string())
        };
        let error = CompileError { line: token.line, location, message: message.to_string() };
        eprintln!("{error}");
        self.errors.push(error);
        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -- bytecode emission ---------------------------------------------------

    fn chunk_len(&self) -> usize {
        self.ctx.function.chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        let mut function = self.ctx.function;
        function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_byte(op as u8);
        self.emit_byte(byte);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let mut function = self.ctx.function;
        function.chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        function.chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_return(&mut self) {
        if self.ctx.fn_type == FunctionType::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let mut function = self.ctx.function;
        let idx = function.chunk.add_constant(self.vm, value);
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.vm.intern_string(name.as_bytes());
        self.make_constant(interned.as_value())
    }

    fn identifier_constant_from_previous(&mut self) -> u8 {
        let lexeme = self.previous.lexeme.to_string();
        self.identifier_constant(&lexeme)
    }

    // -- locals / upvalues ----------------------------------------------

    fn add_local(&mut self, name: Token<'src>) {
        if self.ctx.locals.len() >= u8::MAX as usize + 1 {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx.locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.ctx.scope_depth == 0 {
            return;
        }
        let name = self.previous;
        for local in self.ctx.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.ctx.scope_depth {
                break;
            }
            if local.name.lexeme == name.lexeme {
                self.error("Already a variable with this name in this scope.");
            }
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant_from_previous()
    }

    fn mark_initialized(&mut self) {
        if self.ctx.scope_depth == 0 {
            return;
        }
        let last = self.ctx.locals.len() - 1;
        self.ctx.locals[last].depth = self.ctx.scope_depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn resolve_local(ctx: &FnCtx<'src>, name: &str) -> Result<Option<usize>, &'static str> {
        for (i, local) in ctx.locals.iter().enumerate().rev() {
            if local.name.lexeme == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn add_upvalue(ctx: &mut FnCtx<'src>, index: u8, is_local: bool) -> Result<u8, &'static str> {
        for (i, up) in ctx.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if ctx.upvalues.len() >= u8::MAX as usize + 1 {
            return Err("Too many closure variables in function.");
        }
        ctx.upvalues.push(UpvalueInfo { index, is_local });
        ctx.function.upvalue_count = ctx.upvalues.len();
        Ok((ctx.upvalues.len() - 1) as u8)
    }

    fn resolve_upvalue(ctx: &mut FnCtx<'src>, name: &str) -> Result<Option<u8>, &'static str> {
        let Some(enclosing) = ctx.enclosing.as_deref_mut() else {
            return Ok(None);
        };
        if let Some(local_idx) = Self::resolve_local(enclosing, name)? {
            enclosing.locals[local_idx].is_captured = true;
            return Ok(Some(Self::add_upvalue(ctx, local_idx as u8, true)?));
        }
        if let Some(up_idx) = Self::resolve_upvalue(enclosing, name)? {
            return Ok(Some(Self::add_upvalue(ctx, up_idx, false)?));
        }
        Ok(None)
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let get_op;
        let set_op;
        let arg: u8;

        match Self::resolve_local(&self.ctx, name.lexeme) {
            Ok(Some(slot)) => {
                get_op = OpCode::GetLocal;
                set_op = OpCode::SetLocal;
                arg = slot as u8;
            }
            Err(message) => {
                self.error(message);
                return;
            }
            Ok(None) => match Self::resolve_upvalue(&mut self.ctx, name.lexeme) {
                Ok(Some(idx)) => {
                    get_op = OpCode::GetUpvalue;
                    set_op = OpCode::SetUpvalue;
                    arg = idx;
                }
                Err(message) => {
                    self.error(message);
                    return;
                }
                Ok(None) => {
                    arg = self.identifier_constant(name.lexeme);
                    get_op = OpCode::GetGlobal;
                    set_op = OpCode::SetGlobal;
                }
            },
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    fn begin_scope(&mut self) {
        self.ctx.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.ctx.scope_depth -= 1;
        while let Some(local) = self.ctx.locals.last() {
            if local.depth <= self.ctx.scope_depth {
                break;
            }
            if local.is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.ctx.locals.pop();
        }
    }

    // -- expressions ----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind)
                .infix
                .expect("operator tokens that reach here always carry an infix rule");
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(f64::NAN);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let bytes = &lexeme.as_bytes()[1..lexeme.len() - 1];
        let interned = self.vm.intern_string(bytes);
        self.emit_constant(interned.as_value());
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_ctx.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let name = self.previous;
        self.named_variable(name, false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match &self.class_ctx {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class_ctx) if !class_ctx.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant_from_previous();

        self.named_variable(synthetic_token("this"), false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(synthetic_token("super"), false);
            self.emit_op_byte(OpCode::SuperInvoke, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(synthetic_token("super"), false);
            self.emit_op_byte(OpCode::GetSuper, name);
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal() only ever dispatched for false/nil/true"),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("unary() only ever dispatched for ! and -"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());
        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("binary() only ever dispatched for binary operator tokens"),
        }
    }

    fn call_expr(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant_from_previous();

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, name);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    // -- statements -------------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant_from_previous();
        self.declare_variable();

        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        let mut class_ctx = Box::new(ClassCtx { enclosing: self.class_ctx.take(), has_superclass: false });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous;
            self.named_variable(superclass_name, false);

            if class_name.lexeme == superclass_name.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(synthetic_token("super"));
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            class_ctx.has_superclass = true;
        }
        self.class_ctx = Some(class_ctx);

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let had_superclass = self.class_ctx.as_ref().expect("just assigned above").has_superclass;
        if had_superclass {
            self.end_scope();
        }

        self.class_ctx = self.class_ctx.take().and_then(|ctx| ctx.enclosing);
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant_from_previous();
        let fn_type = if self.previous.lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(fn_type);
        self.emit_op_byte(OpCode::Method, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, fn_type: FunctionType) {
        self.begin_function(fn_type);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.ctx.function.arity = arity.min(255) as u8;
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let idx = self.make_constant(function.as_value());
        self.emit_op_byte(OpCode::Closure, idx);
        for up in &upvalues {
            self.emit_byte(u8::from(up.is_local));
            self.emit_byte(up.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.ctx.fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.ctx.fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer clause
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }
}
