//! The two error kinds from §7: a structured compile diagnostic (message +
//! line + lexeme context) and a structured runtime error (a `kind` plus the
//! call-frame context needed to print the §6 stack-trace format). Neither
//! is a bare string — `InterpretResult`'s two error variants stay as
//! structurally distinct as the embedder API they report through.

use thiserror::Error;

/// Where in the token stream a compile error was raised, matching the three
/// shapes `errorAt` in the reference parser distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// `Error at '<lexeme>'`.
    Lexeme(String),
    /// `Error at end`.
    End,
    /// A scanner error token: no lexeme to quote, just the message.
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[line {line}] Error{}: {message}", .location.suffix())]
pub struct CompileError {
    pub line: u32,
    pub location: ErrorLocation,
    pub message: String,
}

impl ErrorLocation {
    fn suffix(&self) -> String {
        match self {
            ErrorLocation::Lexeme(lexeme) => format!(" at '{lexeme}'"),
            ErrorLocation::End => " at end".to_string(),
            ErrorLocation::Bare => String::new(),
        }
    }
}

/// One frame of the runtime stack trace printed after a `VmError` (§6):
/// `[line N] in <name>()` or `in script` for the top-level frame.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the top-level script frame.
    pub function_name: Option<String>,
}

/// One variant per distinct runtime failure class named across §4.G/§8.
/// `Internal` is reserved for invariant violations that indicate a bug in
/// the VM itself rather than in the user's program (§7).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("Operands must be two numbers or two strings.")]
    AddOperandsMismatch,
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Only instances have properties.")]
    OnlyInstancesHaveProperties,
    #[error("Only instances have fields.")]
    OnlyInstancesHaveFields,
    #[error("Only instances have methods.")]
    OnlyInstancesHaveMethods,
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Superclass must be a class.")]
    SuperclassMustBeClass,
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error)]
#[error("Runtime Error: {kind}")]
pub struct VmError {
    pub kind: ErrorKind,
    /// Innermost frame first, matching the print order in `runtimeError`.
    pub trace: Vec<TraceFrame>,
}

impl VmError {
    #[must_use]
    pub fn new(kind: ErrorKind, trace: Vec<TraceFrame>) -> Self {
        VmError { kind, trace }
    }
}

/// The three-way outcome of `Vm::interpret` (§6), equivalent to
/// `initVM`/`interpret`'s `InterpretResult` enum. The error variants carry
/// the structured diagnostics rather than requiring the embedder to scrape
/// stderr.
#[derive(Debug)]
pub enum InterpretResult {
    Ok,
    CompileError(Vec<CompileError>),
    RuntimeError(VmError),
}

impl InterpretResult {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError(_) => 65,
            InterpretResult::RuntimeError(_) => 70,
        }
    }
}
