//! The concrete end-to-end scenarios.

use crate::{compile, load, run};
use mcl_vm::{State, VirtualMachine};

#[test]
fn return_literal_product() {
    let vm = run("function main() { var x = 7; return x * 6; }");
    assert_eq!(vm.get_register(0).unwrap(), 42);
}

#[test]
fn recursive_factorial_balances_the_stack() {
    let vm = run(
        "function fact(n) {
             if (n <= 1) { return 1; }
             return n * fact(n - 1);
         }
         function main() { return fact(5); }",
    );
    assert_eq!(vm.get_register(0).unwrap(), 120);
    assert_eq!(vm.get_register(3).unwrap(), mcl_codegen::STACK_TOP);
}

#[test]
fn twenty_six_locals_spill_and_sum() {
    let names: Vec<String> = (b'a'..=b'z').map(|c| (c as char).to_string()).collect();
    let decls: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("var {name} = {};\n", i + 1))
        .collect();
    let sum = names.join(" + ");
    let source = format!("function main() {{\n{decls}return {sum};\n}}");

    let listing = compile(&source);
    assert!(
        listing.lines().any(|l| l.contains("// Spill")),
        "expected at least one spill"
    );
    assert!(
        listing.lines().any(|l| l.contains("// Reload")),
        "expected at least one reload"
    );

    let mut vm = VirtualMachine::new();
    vm.load_program(&listing).unwrap();
    vm.run(Some(5_000_000));
    assert_eq!(vm.state(), State::Stopped);
    assert_eq!(vm.get_register(0).unwrap(), 351);
}

#[test]
fn buffer_select_routes_drawing() {
    let vm = run(
        "function main() {
             setGPUBuffer(0, 1);
             fillGrid(0, 0, 32, 1);
             return 0;
         }",
    );
    assert_eq!(vm.gpu().buffer(1)[0], 0xFFFF_FFFF);
    assert_eq!(vm.gpu().buffer(0)[0], 0);
}

#[test]
fn draw_line_fills_the_top_row() {
    let vm = run("function main() { drawLine(0, 0, 31, 0); return 0; }");
    assert_eq!(vm.gpu().buffer(0)[0], 0xFFFF_FFFF);
}

#[test]
fn keyin_stores_injected_input() {
    let mut vm = VirtualMachine::new();
    vm.load_program("KEYIN i:0x2000\nHALT").unwrap();
    vm.inject_input(65);
    assert!(vm.step());
    assert_eq!(vm.read_memory(0x2000).unwrap(), 65);
}

#[test]
fn keyin_from_compiled_source() {
    let mut vm = load(
        r#"function main() {
               var buf = 0;
               asm("KEYIN %0", @buf);
               return buf;
           }"#,
    );
    vm.inject_input(65);
    vm.run(Some(100_000));
    assert_eq!(vm.state(), State::Stopped);
    assert_eq!(vm.get_register(0).unwrap(), 65);
}
