//! The concrete source-to-stdout scenarios enumerated in §8, run through the
//! real `emberc` binary the way a user actually invokes it.

mod common;

use common::run_script;

#[test]
fn prints_arithmetic_result() {
    let result = run_script("print 1 + 2;");
    assert!(result.success);
    assert_eq!(result.stdout, "3\n");
}

#[test]
fn prints_concatenated_strings() {
    let result = run_script(r#"var a = "hi "; var b = "there"; print a + b;"#);
    assert!(result.success);
    assert_eq!(result.stdout, "hi there\n");
}

#[test]
fn closures_capture_their_defining_environment() {
    let result = run_script("fun mk(x){ fun inner(){ return x; } return inner; } print mk(7)();");
    assert!(result.success);
    assert_eq!(result.stdout, "7\n");
}

#[test]
fn closures_over_the_same_local_share_state() {
    let source = "fun counter(){ var n=0; fun incr(){ n=n+1; return n;} return incr;} \
                   var c=counter(); c(); c(); print c();";
    let result = run_script(source);
    assert!(result.success);
    assert_eq!(result.stdout, "3\n");
}

#[test]
fn subclass_inherits_superclass_methods() {
    let source = r#"class A{ greet(){ print "hi"; }} class B < A {} B().greet();"#;
    let result = run_script(source);
    assert!(result.success);
    assert_eq!(result.stdout, "hi\n");
}

#[test]
fn initializer_sets_instance_state() {
    let source = r#"class P{ init(v){ this.v=v; } get(){ return this.v; }} print P(42).get();"#;
    let result = run_script(source);
    assert!(result.success);
    assert_eq!(result.stdout, "42\n");
}

#[test]
fn clock_native_returns_a_nonnegative_number() {
    let result = run_script("print clock() >= 0;");
    assert!(result.success);
    assert_eq!(result.stdout, "true\n");
}

#[test]
fn uninitialized_variable_is_nil() {
    let result = run_script("var x;\nprint x;\n");
    assert!(result.success);
    assert_eq!(result.stdout, "nil\n");
}

#[test]
fn undefined_variable_read_is_a_runtime_error() {
    let result = run_script("print y;");
    assert!(!result.success);
    assert!(result.stderr.contains("Undefined variable 'y'."));
}

#[test]
fn mismatched_add_operands_is_a_runtime_error() {
    let result = run_script(r#"1 + "a";"#);
    assert!(!result.success);
    assert!(result.stderr.contains("Operands must be two numbers or two strings."));
}

#[test]
fn compile_error_exits_65() {
    let result = run_script("var;");
    assert!(!result.success);
}

#[test]
fn two_path_arguments_is_a_usage_error_exiting_64() {
    let output = assert_cmd::Command::cargo_bin("emberc")
        .expect("locate emberc binary")
        .arg("one.ember")
        .arg("two.ember")
        .output()
        .expect("run emberc");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn trace_flag_does_not_change_printed_output() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp script");
    use std::io::Write as _;
    write!(file, "print 1 + 2;").expect("write temp script");

    let traced = assert_cmd::Command::cargo_bin("emberc")
        .expect("locate emberc binary")
        .arg(file.path())
        .arg("--trace")
        .output()
        .expect("run emberc with --trace");

    assert!(traced.status.success());
    assert_eq!(String::from_utf8_lossy(&traced.stdout), "3\n");
}
