//! Error-path coverage: each rejected program is checked against the error
//! kind (and therefore the process exit code) it must produce.

use ifjc::{compile_to_string, ErrorKind};

const HEADER: &str = "const ifj = @import(\"ifj24.zig\");\n";

fn compile_err(body: &str) -> ErrorKind {
    let source = format!("{HEADER}{body}");
    match compile_to_string(&source) {
        Ok(_) => panic!("expected compilation to fail"),
        Err(err) => err.kind,
    }
}

#[test]
fn lexical_error_in_program() {
    let err = compile_err("pub fn main() void { const x = 0123; ifj.write(x); }");
    assert_eq!(err, ErrorKind::Lexical);
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn missing_header_is_syntactic() {
    let err = match compile_to_string("pub fn main() void { }") {
        Err(err) => err,
        Ok(_) => panic!("expected failure"),
    };
    assert_eq!(err.kind, ErrorKind::Syntactic);
}

#[test]
fn missing_main() {
    let err = compile_err("pub fn helper() void { }");
    assert_eq!(err, ErrorKind::UndefinedSymbol);
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn undefined_variable() {
    let err = compile_err("pub fn main() void { ifj.write(x); }");
    assert_eq!(err, ErrorKind::UndefinedSymbol);
}

#[test]
fn undefined_function() {
    let err = compile_err("pub fn main() void { missing(); }");
    assert_eq!(err, ErrorKind::UndefinedSymbol);
}

#[test]
fn call_arity_mismatch() {
    let err = compile_err(
        r#"
        pub fn f(a: i32) void { ifj.write(a); }
        pub fn main() void { f(1, 2); }
        "#,
    );
    assert_eq!(err, ErrorKind::CallMismatch);
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn call_argument_type_mismatch() {
    let err = compile_err(
        r#"
        pub fn f(a: i32) void { ifj.write(a); }
        pub fn main() void { f(1.5); }
        "#,
    );
    assert_eq!(err, ErrorKind::CallMismatch);
}

#[test]
fn builtin_argument_type_mismatch() {
    let err = compile_err("pub fn main() void { const n = ifj.length(5); ifj.write(n); }");
    assert_eq!(err, ErrorKind::CallMismatch);
}

#[test]
fn main_with_parameters() {
    let err = compile_err("pub fn main(a: i32) void { ifj.write(a); }");
    assert_eq!(err, ErrorKind::CallMismatch);
}

#[test]
fn main_with_return_type() {
    let err = compile_err("pub fn main() i32 { return 0; }");
    assert_eq!(err, ErrorKind::CallMismatch);
}

#[test]
fn constant_reassignment() {
    let err = compile_err("pub fn main() void { const x = 5; x = 6; }");
    assert_eq!(err, ErrorKind::Redefinition);
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn variable_redefinition() {
    let err = compile_err("pub fn main() void { var x : i32 = 1; var x : i32 = 2; }");
    assert_eq!(err, ErrorKind::Redefinition);
}

#[test]
fn variable_shadowing_outer_scope() {
    let err = compile_err(
        r#"
        pub fn main() void {
            var x : i32 = 1;
            if (x < 2) {
                var x : i32 = 3;
                ifj.write(x);
            } else { }
            ifj.write(x);
        }
        "#,
    );
    assert_eq!(err, ErrorKind::Redefinition);
}

#[test]
fn function_redefinition() {
    let err = compile_err(
        r#"
        pub fn f() void { }
        pub fn f() void { }
        pub fn main() void { }
        "#,
    );
    assert_eq!(err, ErrorKind::Redefinition);
}

#[test]
fn redefining_a_builtin() {
    let err = compile_err(
        r#"
        pub fn length(s: []u8) i32 { return 0; }
        pub fn main() void { }
        "#,
    );
    assert_eq!(err, ErrorKind::Redefinition);
}

#[test]
fn variable_named_like_function() {
    let err = compile_err(
        r#"
        pub fn f() void { }
        pub fn main() void { var f : i32 = 1; ifj.write(f); }
        "#,
    );
    assert_eq!(err, ErrorKind::Redefinition);
}

#[test]
fn missing_return_in_value_function() {
    let err = compile_err(
        r#"
        pub fn f() i32 { }
        pub fn main() void { _ = f(); }
        "#,
    );
    assert_eq!(err, ErrorKind::MissingExpression);
    assert_eq!(err.exit_code(), 6);
}

#[test]
fn return_value_from_void_function() {
    let err = compile_err(
        r#"
        pub fn f() void { return 1; }
        pub fn main() void { f(); }
        "#,
    );
    assert_eq!(err, ErrorKind::MissingExpression);
}

#[test]
fn return_value_from_main() {
    let err = compile_err("pub fn main() void { return 1; }");
    assert_eq!(err, ErrorKind::MissingExpression);
}

#[test]
fn return_without_value() {
    let err = compile_err(
        r#"
        pub fn f() i32 { return; }
        pub fn main() void { _ = f(); }
        "#,
    );
    assert_eq!(err, ErrorKind::MissingExpression);
}

#[test]
fn null_into_non_nullable() {
    let err = compile_err("pub fn main() void { const x : i32 = null; ifj.write(x); }");
    assert_eq!(err, ErrorKind::TypeMismatch);
    assert_eq!(err.exit_code(), 7);
}

#[test]
fn nullable_operand_in_arithmetic() {
    let err = compile_err(
        r#"
        pub fn main() void {
            var a : ?i32 = 1;
            var b : i32 = 0;
            b = a + 1;
            ifj.write(b);
        }
        "#,
    );
    assert_eq!(err, ErrorKind::TypeMismatch);
}

#[test]
fn nullable_ordering_comparison() {
    let err = compile_err(
        r#"
        pub fn main() void {
            var a : ?i32 = 1;
            if (a < 2) { } else { }
        }
        "#,
    );
    assert_eq!(err, ErrorKind::TypeMismatch);
}

#[test]
fn condition_must_be_boolean() {
    let err = compile_err(
        r#"
        pub fn main() void {
            var x : i32 = 1;
            if (x + 1) { } else { }
            ifj.write(x);
        }
        "#,
    );
    assert_eq!(err, ErrorKind::TypeMismatch);
}

#[test]
fn string_literal_into_typed_variable() {
    let err = compile_err(
        "pub fn main() void { var s : []u8 = \"text\"; ifj.write(s); }",
    );
    assert_eq!(err, ErrorKind::TypeMismatch);
}

#[test]
fn cannot_derive_type_from_null() {
    let err = compile_err("pub fn main() void { const x = null; ifj.write(x); }");
    assert_eq!(err, ErrorKind::TypeInference);
    assert_eq!(err.exit_code(), 8);
}

#[test]
fn cannot_derive_type_from_string_literal() {
    let err = compile_err("pub fn main() void { const s = \"text\"; ifj.write(s); }");
    assert_eq!(err, ErrorKind::TypeInference);
}

#[test]
fn unused_variable() {
    let err = compile_err("pub fn main() void { var x : i32 = 5; }");
    assert_eq!(err, ErrorKind::UnusedVariable);
    assert_eq!(err.exit_code(), 9);
}

#[test]
fn unused_nullable_binding() {
    let err = compile_err(
        r#"
        pub fn main() void {
            const y : ?i32 = null;
            if (y) |v| { } else { }
        }
        "#,
    );
    assert_eq!(err, ErrorKind::UnusedVariable);
}

#[test]
fn nested_function_definition() {
    let err = compile_err(
        r#"
        pub fn main() void {
            var x : i32 = 1;
            if (x < 2) {
                pub fn inner() void { }
            } else { }
            ifj.write(x);
        }
        "#,
    );
    assert_eq!(err, ErrorKind::OtherSemantic);
    assert_eq!(err.exit_code(), 10);
}

#[test]
fn discarding_non_void_result() {
    let err = compile_err(
        r#"
        pub fn f() i32 { return 1; }
        pub fn main() void { f(); }
        "#,
    );
    assert_eq!(err, ErrorKind::CallMismatch);
}

#[test]
fn assigning_void_function_result() {
    let err = compile_err(
        r#"
        pub fn f() void { }
        pub fn main() void { const x = f(); ifj.write(x); }
        "#,
    );
    assert_eq!(err, ErrorKind::TypeMismatch);
}

#[test]
fn empty_expression() {
    let err = compile_err("pub fn main() void { var x : i32 = 1; x = ; }");
    assert_eq!(err, ErrorKind::Syntactic);
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn fractional_literal_against_integer_variable() {
    let err = compile_err(
        r#"
        pub fn main() void {
            var x : i32 = 1;
            x = x + 1.5;
            ifj.write(x);
        }
        "#,
    );
    assert_eq!(err, ErrorKind::TypeMismatch);
}
