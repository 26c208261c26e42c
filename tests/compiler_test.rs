//! Boundary behaviours from the compiler (§8): every case here should be
//! rejected with a byte-exact diagnostic, and the next-smaller case should
//! compile cleanly.

use ember::{InterpretResult, Vm};

fn compile_messages(source: &str) -> Vec<String> {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        InterpretResult::CompileError(errors) => errors.iter().map(ToString::to_string).collect(),
        other => panic!("expected a compile error, got {other:?}"),
    }
}

fn compiles_cleanly(source: &str) {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        InterpretResult::CompileError(errors) => {
            panic!("expected clean compile, got errors: {errors:?}")
        }
        _ => {}
    }
}

fn function_with_locals(count: usize) -> String {
    let mut source = String::from("fun f() {\n");
    for i in 0..count {
        source.push_str(&format!("var v{i} = {i};\n"));
    }
    source.push_str("}\n");
    source
}

#[test]
fn up_to_255_locals_compiles() {
    compiles_cleanly(&function_with_locals(255));
}

#[test]
fn too_many_locals_in_one_function() {
    let messages = compile_messages(&function_with_locals(256));
    assert!(
        messages.iter().any(|m| m.contains("Too many local variables in function.")),
        "got: {messages:?}"
    );
}

fn function_with_params(count: usize) -> String {
    let params: Vec<String> = (0..count).map(|i| format!("a{i}")).collect();
    format!("fun f({}) {{}}\n", params.join(", "))
}

#[test]
fn up_to_255_parameters_compiles() {
    compiles_cleanly(&function_with_params(255));
}

#[test]
fn too_many_parameters() {
    let messages = compile_messages(&function_with_params(256));
    assert!(
        messages.iter().any(|m| m.contains("Can't have more than 255 parameters.")),
        "got: {messages:?}"
    );
}

fn call_with_args(count: usize) -> String {
    let args: Vec<String> = (0..count).map(|i| i.to_string()).collect();
    format!("fun f() {{}}\nf({});\n", args.join(", "))
}

#[test]
fn up_to_255_arguments_compiles() {
    compiles_cleanly(&call_with_args(255));
}

#[test]
fn too_many_arguments() {
    let messages = compile_messages(&call_with_args(256));
    assert!(
        messages.iter().any(|m| m.contains("Can't have more than 255 arguments.")),
        "got: {messages:?}"
    );
}

#[test]
fn jump_over_more_than_65535_bytes_is_a_compile_error() {
    // Each "1;" expression statement compiles to OP_CONSTANT (2 bytes) +
    // OP_POP (1 byte). 25,000 of them guarantees the `if` body exceeds the
    // 16-bit jump offset `patch_jump` can encode.
    let mut source = String::from("if (true) {\n");
    for _ in 0..25_000 {
        source.push_str("1;\n");
    }
    source.push_str("}\n");

    let messages = compile_messages(&source);
    assert!(
        messages.iter().any(|m| m.contains("Too much code to jump over.")),
        "got: {messages:?}"
    );
}

#[test]
fn already_a_variable_with_this_name_in_scope() {
    let messages = compile_messages("{ var a = 1; var a = 2; }");
    assert!(messages.iter().any(|m| m.contains("Already a variable with this name in this scope.")));
}

#[test]
fn cant_read_local_in_its_own_initializer() {
    let messages = compile_messages("{ var a = a; }");
    assert!(messages.iter().any(|m| m.contains("Can't read local variable in its own initializer.")));
}

#[test]
fn cant_return_from_top_level_code() {
    let messages = compile_messages("return 1;");
    assert!(messages.iter().any(|m| m.contains("Can't return from top-level code.")));
}

#[test]
fn cant_return_a_value_from_an_initializer() {
    let messages = compile_messages("class A { init() { return 1; } }");
    assert!(messages.iter().any(|m| m.contains("Can't return a value from an initializer.")));
}

#[test]
fn class_cant_inherit_from_itself() {
    let messages = compile_messages("class A < A {}");
    assert!(messages.iter().any(|m| m.contains("A class can't inherit from itself.")));
}

#[test]
fn this_outside_a_class_is_an_error() {
    let messages = compile_messages("fun f() { return this; }");
    assert!(messages.iter().any(|m| m.contains("Can't use 'this' outside of a class.")));
}

#[test]
fn super_outside_a_class_is_an_error() {
    let messages = compile_messages("fun f() { super.foo(); }");
    assert!(messages.iter().any(|m| m.contains("Can't use 'super' outside of a class.")));
}

#[test]
fn super_in_a_class_without_a_superclass_is_an_error() {
    let messages = compile_messages("class A { m() { super.foo(); } }");
    assert!(messages.iter().any(|m| m.contains("Can't use 'super' in a class with no superclass.")));
}

#[test]
fn invalid_assignment_target() {
    let messages = compile_messages("1 + 2 = 3;");
    assert!(messages.iter().any(|m| m.contains("Invalid assignment target.")));
}
