//! Universal invariants (§8) checked across randomly generated inputs.
//! Every case here has to observe printed output, so it goes through the
//! real `emberc` binary via `common::run_script` rather than the library
//! directly (contrast `compiler_test.rs`/`vm_test.rs`).

mod common;

use common::run_script;
use ember::value::format_number;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Interning never changes equality or concatenation semantics: two
    /// occurrences of the same literal compare equal, and concatenation
    /// produces exactly the expected joined text.
    #[test]
    fn string_interning_preserves_equality_and_concatenation(
        a in "[a-zA-Z0-9]{0,8}",
        b in "[a-zA-Z0-9]{0,8}",
    ) {
        let source = format!(
            r#"var a1 = "{a}"; var a2 = "{a}"; print a1 == a2; print a1 + "{b}";"#
        );
        let result = run_script(&source);
        prop_assert!(result.success);
        let expected = format!("true\n{a}{b}\n");
        prop_assert_eq!(result.stdout, expected);
    }

    /// Two closures capturing the same local share the exact same upvalue:
    /// mutating through one is visible through the other.
    #[test]
    fn closures_over_the_same_local_observe_each_others_writes(bumps in 0usize..6) {
        let source = String::from(
            "fun make() { var n = 0; fun add() { n = n + 1; return n; } return add; }\n",
        );
        let count = 1 + (bumps % 5);
        let mut script = source.clone();
        script.push_str("var add = make();\n");
        for _ in 0..count {
            script.push_str("add();\n");
        }
        script.push_str("print add();\n");

        let result = run_script(&script);
        prop_assert!(result.success);
        let expected = format!("{}\n", count + 2);
        prop_assert_eq!(result.stdout, expected);
    }

    /// A `while` loop that counts up to `n` runs exactly `n` iterations,
    /// regardless of how large `n` is within a modest bound.
    #[test]
    fn while_loop_iterates_exactly_n_times(n in 0usize..200) {
        let source = format!(
            "var i = 0; var count = 0; \
             while (i < {n}) {{ count = count + 1; i = i + 1; }} \
             print count;"
        );
        let result = run_script(&source);
        prop_assert!(result.success);
        prop_assert_eq!(result.stdout, format!("{n}\n"));
    }

    /// `for` loops with a reassigned loop variable visit the body the
    /// predicted number of times and leave the variable at its final value.
    #[test]
    fn for_loop_reassigning_its_variable_matches_prediction(n in 1usize..100) {
        let source = format!(
            "var count = 0; \
             for (var i = 0; i < {n}; i = i + 1) {{ count = count + 1; }} \
             print count;"
        );
        let result = run_script(&source);
        prop_assert!(result.success);
        prop_assert_eq!(result.stdout, format!("{n}\n"));
    }

    /// Printing a finite number round-trips through the same formatting the
    /// library itself uses to render constants.
    #[test]
    fn number_printing_matches_the_library_formatter(n in -1.0e12f64..1.0e12f64) {
        prop_assume!(n.is_finite());
        let source = format!("print {n:?};");
        let result = run_script(&source);
        prop_assert!(result.success);
        let expected = format!("{}\n", format_number(n));
        prop_assert_eq!(result.stdout, expected);
    }

    /// Field writes on one instance are visible on subsequent reads of that
    /// same instance and invisible on a separately constructed instance.
    #[test]
    fn instance_fields_are_isolated_per_instance(value in 0i64..10_000) {
        let source = format!(
            "class Box {{}} \
             var a = Box(); var b = Box(); \
             a.v = {value}; \
             print a.v; \
             print b.v == nil;"
        );
        let result = run_script(&source);
        prop_assert!(result.success);
        let expected = format!("{value}\ntrue\n");
        prop_assert_eq!(result.stdout, expected);
    }
}
