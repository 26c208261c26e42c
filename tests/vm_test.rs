//! Runtime behaviour (§8): exact `ErrorKind` messages for every distinct
//! failure class, the 64-frame stack-overflow boundary, and GC-stress
//! correctness. These don't need to observe `print`'s stdout, so they go
//! straight through the library's `Vm` rather than shelling out to the
//! `emberc` binary (contrast `cli_test.rs`).

use ember::{InterpretResult, Vm};

fn runtime_error_message(source: &str) -> String {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        InterpretResult::RuntimeError(err) => err.kind.to_string(),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

fn runs_to_completion(source: &str) {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        InterpretResult::Ok => {}
        other => panic!("expected the program to finish cleanly, got {other:?}"),
    }
}

#[test]
fn arity_mismatch_messages_are_byte_exact() {
    for expected in 0u8..=5 {
        let params: Vec<String> = (0..expected).map(|i| format!("a{i}")).collect();
        for got in 0u8..=5 {
            if got == expected {
                continue;
            }
            let args: Vec<String> = (0..got).map(|i| i.to_string()).collect();
            let source = format!("fun f({}) {{}}\nf({});\n", params.join(", "), args.join(", "));
            let message = runtime_error_message(&source);
            assert_eq!(message, format!("Expected {expected} arguments but got {got}."));
        }
    }
}

#[test]
fn stack_overflow_at_the_65th_simultaneous_call() {
    let source = "fun recurse() { return recurse(); }\nrecurse();\n";
    assert_eq!(runtime_error_message(source), "Stack overflow.");
}

#[test]
fn sixty_three_nested_calls_do_not_overflow() {
    // 63 user frames plus the implicit script frame stays under MAX_FRAMES.
    let mut source = String::from("fun f0() { return 0; }\n");
    for i in 1..63 {
        source.push_str(&format!("fun f{i}() {{ return f{prev}(); }}\n", prev = i - 1));
    }
    source.push_str("f62();\n");
    runs_to_completion(&source);
}

#[test]
fn add_operands_mismatch() {
    assert_eq!(runtime_error_message("1 + \"a\";"), "Operands must be two numbers or two strings.");
}

#[test]
fn operand_must_be_a_number_for_unary_negate() {
    assert_eq!(runtime_error_message("-\"a\";"), "Operand must be a number.");
}

#[test]
fn operands_must_be_numbers_for_comparison() {
    assert_eq!(runtime_error_message("\"a\" > 1;"), "Operands must be numbers.");
}

#[test]
fn operands_must_be_numbers_for_subtraction() {
    assert_eq!(runtime_error_message("\"a\" - 1;"), "Operands must be numbers.");
}

#[test]
fn undefined_variable_read() {
    assert_eq!(runtime_error_message("print y;"), "Undefined variable 'y'.");
}

#[test]
fn undefined_variable_assignment() {
    assert_eq!(runtime_error_message("y = 1;"), "Undefined variable 'y'.");
}

#[test]
fn not_callable() {
    assert_eq!(runtime_error_message("var x = 1;\nx();\n"), "Can only call functions and classes.");
}

#[test]
fn superclass_must_be_a_class() {
    let source = "var NotAClass = 1;\nclass B < NotAClass {}\n";
    assert_eq!(runtime_error_message(source), "Superclass must be a class.");
}

#[test]
fn only_instances_have_properties() {
    assert_eq!(runtime_error_message("var x = 1;\nprint x.foo;\n"), "Only instances have properties.");
}

#[test]
fn only_instances_have_fields() {
    assert_eq!(runtime_error_message("var x = 1;\nx.foo = 2;\n"), "Only instances have fields.");
}

#[test]
fn only_instances_have_methods() {
    assert_eq!(runtime_error_message("var x = 1;\nx.foo();\n"), "Only instances have methods.");
}

#[test]
fn undefined_property_read() {
    let source = "class A {}\nvar a = A();\nprint a.missing;\n";
    assert_eq!(runtime_error_message(source), "Undefined property 'missing'.");
}

#[test]
fn undefined_method_invocation() {
    let source = "class A {}\nvar a = A();\na.missing();\n";
    assert_eq!(runtime_error_message(source), "Undefined property 'missing'.");
}

#[test]
fn gc_stress_correctness_under_heavy_transient_allocation() {
    // ~2 MiB of transient interned strings, none of them retained past each
    // loop iteration; collecting before every single allocation must not
    // corrupt anything still reachable (the loop counter, `s` itself).
    let source = r#"
        var i = 0;
        var s = "x";
        while (i < 20000) {
            var garbage = s + s + s + s + s + s + s + s + s + s;
            i = i + 1;
        }
        print i;
    "#;
    let mut vm = Vm::new();
    vm.set_stress_gc(true);
    match vm.interpret(source) {
        InterpretResult::Ok => {}
        other => panic!("expected the program to survive GC stress, got {other:?}"),
    }
}
