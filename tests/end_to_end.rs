//! End-to-end scenarios driven through `Vm::interpret`, capturing `print`
//! output instead of touching the real process stdout/stderr.

use loon::config::VmConfig;
use loon::vm::{InterpretResult, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let mut vm = Vm::new(VmConfig::default());
    vm.output.start_capture();
    let result = vm.interpret(source);
    let output = vm.output.take_captured();
    (result, output)
}

#[test]
fn arithmetic_and_precedence() {
    let (result, output) = run("print(1 + 2 * 3);");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "7\n");
}

#[test]
fn closures_over_loop_variables() {
    let (result, output) = run(
        "fun make(){ var i = 0; fun incr(){ i = i + 1; return i; } return incr; } \
         var f = make(); print(f()); print(f()); print(f());",
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn classes_inheritance_super_and_concat() {
    let (result, output) = run(
        "class A { greet(){ return \"A\"; } } \
         class B < A { greet(){ return super.greet() # \"B\"; } } \
         print(B().greet());",
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "AB\n");
}

#[test]
fn list_literal_and_prelude_method_dispatch() {
    let (result, output) = run("var xs = [10, 20, 30]; print(xs.len()); print(xs.get(1));");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "3\n20\n");
}

#[test]
fn table_literal_and_lookup() {
    let (result, output) = run("var t = {\"a\": 1, \"b\": 2}; print(t.get(\"b\"));");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "2\n");
}

#[test]
fn runtime_type_error_reports_line_and_stops() {
    let (result, output) = run("print(1 + \"x\");");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(output, "", "the failed print should never have run");
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let (result, _) = run("print(doesNotExist);");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn compile_error_is_reported_without_running() {
    let (result, output) = run("var = ;");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(output, "");
}

#[test]
fn list_index_sugar_desugars_to_get_at_and_set_at() {
    let (result, output) = run(
        "var xs = [1, 2, 3]; xs[0] = 9; print(xs[0]);",
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "9\n");
}

#[test]
fn unary_hash_stringifies_its_operand() {
    let (result, output) = run("print(#123);");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "123\n");
}
