//! End-to-end compilations of well-formed programs, checked against the
//! emitted intermediate code.

use ifjc::compile_to_string;

const HEADER: &str = "const ifj = @import(\"ifj24.zig\");\n";

fn compile(body: &str) -> String {
    let source = format!("{HEADER}{body}");
    compile_to_string(&source).expect("compilation failed")
}

#[test]
fn compile_write_constant() {
    let output = compile(
        r#"
        pub fn main() void {
            const x = 5;
            ifj.write(x);
        }
        "#,
    );

    assert!(output.starts_with(".IFJcode24\n"));
    assert!(output.contains("JUMP main"));
    assert!(output.contains("LABEL main"));
    assert!(output.contains("DEFVAR LF@x"));
    assert!(output.contains("MOVE LF@x int@5"));
    assert!(output.contains("WRITE LF@x"));
    assert!(output.trim_end().ends_with("EXIT int@0"));
}

#[test]
fn compile_float_constant_from_integer_literal() {
    let output = compile(
        r#"
        pub fn main() void {
            const x : f64 = 5;
            ifj.write(x);
        }
        "#,
    );
    assert!(output.contains("MOVE LF@x float@0x1.4p+2"));
}

#[test]
fn float_literal_spellings_emit_the_same_code() {
    let plain = compile("pub fn main() void { const x : f64 = 0.0; ifj.write(x); }");
    let exponent = compile("pub fn main() void { const x : f64 = 0.0e0; ifj.write(x); }");
    assert_eq!(plain, exponent);
    assert!(plain.contains("MOVE LF@x float@0x0p+0"));
}

#[test]
fn compile_program_preamble_defines_registers() {
    let output = compile("pub fn main() void { }");
    for register in ["$R0", "$F0", "$B0", "$S0", "$R1", "$R2", "$F1", "$F2", "$B1", "$B2", "$S1", "$S2"] {
        assert!(
            output.contains(&format!("DEFVAR GF@{register}")),
            "{register} missing"
        );
    }
    let jump = output.find("JUMP main").unwrap();
    let label = output.find("LABEL main").unwrap();
    assert!(jump < label);
}

#[test]
fn compile_user_function_call() {
    let output = compile(
        r#"
        pub fn main() void {
            const r = add(1, 2);
            ifj.write(r);
        }
        pub fn add(a: i32, b: i32) i32 {
            return a + b;
        }
        "#,
    );

    // Call site: temporary frame, positional parameters, result pop.
    assert!(output.contains("CREATEFRAME"));
    assert!(output.contains("DEFVAR TF@PARAM0"));
    assert!(output.contains("MOVE TF@PARAM0 int@1"));
    assert!(output.contains("MOVE TF@PARAM1 int@2"));
    assert!(output.contains("CALL add"));
    assert!(output.contains("POPS LF@r"));

    // Callee: label, parameter binding, stack arithmetic, return.
    assert!(output.contains("LABEL add"));
    assert!(output.contains("MOVE LF@a LF@PARAM0"));
    assert!(output.contains("MOVE LF@b LF@PARAM1"));
    assert!(output.contains("PUSHS LF@a"));
    assert!(output.contains("ADDS"));
    assert!(output.contains("POPFRAME\nRETURN"));
}

#[test]
fn compile_if_else() {
    let output = compile(
        r#"
        pub fn main() void {
            var x : i32 = 1;
            if (x < 2) {
                x = 5;
            } else {
                x = 6;
            }
            ifj.write(x);
        }
        "#,
    );

    assert!(output.contains("LABEL $if0"));
    assert!(output.contains("LTS"));
    assert!(output.contains("POPS GF@$B0"));
    assert!(output.contains("JUMPIFEQ $else0 GF@$B0 bool@false"));
    assert!(output.contains("JUMP $endif0"));
    assert!(output.contains("LABEL $else0"));
    assert!(output.contains("LABEL $endif0"));
}

#[test]
fn compile_while_loop() {
    let output = compile(
        r#"
        pub fn main() void {
            var x : i32 = 0;
            while (x < 3) {
                x = x + 1;
            }
            ifj.write(x);
        }
        "#,
    );

    assert!(output.contains("LABEL $while0"));
    assert!(output.contains("JUMPIFEQ $endwhile0 GF@$B0 bool@false"));
    assert!(output.contains("JUMP $while0"));
    assert!(output.contains("LABEL $endwhile0"));

    // The condition is evaluated behind the loop label.
    let label = output.find("LABEL $while0").unwrap();
    let condition = output.find("LTS").unwrap();
    assert!(label < condition);
}

#[test]
fn compile_nullable_if_unwrap() {
    let output = compile(
        r#"
        pub fn main() void {
            const y : ?i32 = null;
            if (y) |v| {
                ifj.write(v);
            } else {
                ifj.write(0);
            }
        }
        "#,
    );

    // The binding is hoisted into the frame and moved after the nil test.
    assert!(output.contains("DEFVAR LF@v"));
    assert!(output.contains("JUMPIFEQ $else0 LF@y nil@nil"));
    assert!(output.contains("MOVE LF@v LF@y"));
}

#[test]
fn compile_nullable_while_unwrap() {
    let output = compile(
        r#"
        pub fn main() void {
            var y : ?i32 = 1;
            while (y) |v| {
                ifj.write(v);
                y = null;
            }
        }
        "#,
    );

    assert!(output.contains("LABEL $while0"));
    assert!(output.contains("JUMPIFEQ $endwhile0 LF@y nil@nil"));
    assert!(output.contains("MOVE LF@v LF@y"));
}

#[test]
fn compile_forward_reference() {
    // `helper` is called before its definition appears.
    let output = compile(
        r#"
        pub fn main() void {
            helper();
        }
        pub fn helper() void {
            ifj.write(1);
        }
        "#,
    );
    assert!(output.contains("CALL helper"));
    assert!(output.contains("LABEL helper"));
}

#[test]
fn compile_string_builtins() {
    let output = compile(
        r#"
        pub fn main() void {
            const s = ifj.string("hi there");
            const n = ifj.length(s);
            ifj.write(n);
        }
        "#,
    );

    assert!(output.contains("MOVE LF@s string@hi\\032there"));
    assert!(output.contains("STRLEN LF@n LF@s"));
}

#[test]
fn compile_substring_expansion() {
    let output = compile(
        r#"
        pub fn main() void {
            const s = ifj.string("word");
            const part = ifj.substring(s, 1, 3);
            ifj.write(part);
        }
        "#,
    );

    assert!(output.contains("LABEL SUBSTRINGWHILE0"));
    assert!(output.contains("LABEL SUBSTRINGRETURNNULL0"));
    assert!(output.contains("LABEL SUBSTRINGRETURNEMPTY0"));
    assert!(output.contains("GETCHAR GF@$S1 LF@s GF@$R0"));
    assert!(output.contains("MOVE LF@part GF@$S0"));
}

#[test]
fn compile_repeated_builtins_use_fresh_labels() {
    let output = compile(
        r#"
        pub fn main() void {
            const s = ifj.string("ab");
            const a = ifj.ord(s, 0);
            const b = ifj.ord(s, 1);
            ifj.write(a);
            ifj.write(b);
        }
        "#,
    );
    assert!(output.contains("LABEL ENDORD0"));
    assert!(output.contains("LABEL ENDORD1"));
}

#[test]
fn compile_read_builtins() {
    let output = compile(
        r#"
        pub fn main() void {
            const n = ifj.readi32();
            ifj.write(n);
        }
        "#,
    );
    assert!(output.contains("READ LF@n int"));
}

#[test]
fn compile_float_coercion_in_expression() {
    let output = compile(
        r#"
        pub fn main() void {
            var x : f64 = 1.5;
            x = x + 1;
            ifj.write(x);
        }
        "#,
    );
    // The integer literal on the stack top converts to float.
    assert!(output.contains("INT2FLOATS"));
    assert!(output.contains("ADDS"));
}

#[test]
fn compile_int_division_uses_idivs() {
    let output = compile(
        r#"
        pub fn main() void {
            var x : i32 = 7;
            x = x / 2;
            ifj.write(x);
        }
        "#,
    );
    assert!(output.contains("IDIVS"));
    assert!(!output.contains("\nDIVS\n"));
}

#[test]
fn compile_float_division_uses_divs() {
    let output = compile(
        r#"
        pub fn main() void {
            var x : f64 = 7.5;
            x = x / 2.5;
            ifj.write(x);
        }
        "#,
    );
    assert!(output.contains("DIVS"));
}

#[test]
fn compile_return_in_main_exits() {
    let output = compile(
        r#"
        pub fn main() void {
            return;
        }
        "#,
    );
    assert!(output.contains("POPFRAME\nEXIT int@0"));
}

#[test]
fn compile_folded_float_constant_divides_integers() {
    // A whole-valued f64 constant folds to an integer literal, so the
    // division stays integral.
    let output = compile(
        r#"
        pub fn main() void {
            const d : f64 = 2.0;
            var x : i32 = 8;
            x = x / d;
            ifj.write(x);
        }
        "#,
    );
    assert!(output.contains("PUSHS int@2"));
    assert!(output.contains("IDIVS"));
}

#[test]
fn compile_discard_expression() {
    let output = compile(
        r#"
        pub fn main() void {
            var x : i32 = 1;
            x = 2;
            _ = x + 1;
            ifj.write(x);
        }
        "#,
    );
    // Evaluated for effect, then the operand stack is cleared; no store.
    assert!(output.contains("CLEARS"));
}
