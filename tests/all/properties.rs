//! Cross-component invariants: round-trips, buffer identities, stepping.

use crate::{compile, run};
use mcl_vm::{State, VirtualMachine};

#[test]
fn loader_round_trip_is_identity() {
    let text = "\
        init: MVR i:0x7FFF, 3\n\
        MVR i:0x7FFF, 4\n\
        JMP func_main\n\
        func_main:\n\
        MVR i:7, 31\n\
        MULT 31, i:6\n\
        LOAD 0, i:0x1000\n\
        JZ done, 0\n\
        done: HALT\n";
    let first = mcl_asm::parse_listing(text).unwrap();
    let second = mcl_asm::parse_listing(&first.to_string()).unwrap();
    assert_eq!(first.insts, second.insts);
    assert_eq!(first.labels, second.labels);
}

#[test]
fn compiled_listing_round_trips() {
    let listing = compile(
        "var g = 3;
         function helper(n) { return n + g; }
         function main() {
             var a: int[2] = {1, 2};
             return helper(a[0]) + a[1];
         }",
    );
    let first = mcl_asm::parse_listing(&listing).unwrap();
    let second = mcl_asm::parse_listing(&first.to_string()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn fill_then_clear_leaves_the_rectangle_zero() {
    let vm = run(
        "function main() {
             fillGrid(3, 4, 9, 5);
             clearGrid(3, 4, 9, 5);
             return 0;
         }",
    );
    assert!(vm.gpu().buffer(0).iter().all(|&row| row == 0));
}

#[test]
fn display_buffer_follows_register_bit_zero() {
    let vm = run("function main() { setGPUBuffer(1, 1); return 0; }");
    assert_eq!(vm.gpu().gpu_register() & 1, 1);
    assert_eq!(vm.gpu().display_buffer_id(), 1);
    assert!(std::ptr::eq(vm.gpu().display_buffer(), vm.gpu().buffer(1)));
}

#[test]
fn each_step_retires_exactly_one_instruction() {
    let listing = compile("function main() { var x = 1; return x + 2; }");
    let mut vm = VirtualMachine::new();
    vm.load_program(&listing).unwrap();

    let mut retired = 0u64;
    for _ in 0..10_000 {
        let before = vm.cpu().instruction_count();
        let more = vm.step();
        if vm.cpu().instruction_count() == before {
            break;
        }
        assert_eq!(vm.cpu().instruction_count(), before + 1);
        retired += 1;
        if !more {
            break;
        }
    }
    assert!(retired > 0);
    assert_eq!(vm.state(), State::Stopped);
    assert_eq!(vm.halt_reason(), Some("HALT instruction executed"));
}

#[test]
fn nested_calls_balance_the_stack() {
    let vm = run(
        "function leaf(a, b) { return a + b; }
         function middle(n) { var t = leaf(n, 2); return t * leaf(1, 1); }
         function main() { return middle(19); }",
    );
    assert_eq!(vm.get_register(0).unwrap(), 42);
    assert_eq!(vm.get_register(3).unwrap(), mcl_codegen::STACK_TOP);
}

#[test]
fn max_cycles_stops_infinite_loops() {
    let listing = compile("function main() { while (1) { } return 0; }");
    let mut vm = VirtualMachine::new();
    vm.load_program(&listing).unwrap();
    vm.run(Some(10_000));
    assert_eq!(vm.state(), State::Stopped);
    assert_eq!(vm.halt_reason(), Some("Max cycles reached"));
}

#[test]
fn runtime_division_by_zero_reports_an_error() {
    let listing = compile(
        "function main() { var zero = 0; return 5 / zero; }",
    );
    let mut vm = VirtualMachine::new();
    vm.load_program(&listing).unwrap();
    vm.run(Some(100_000));
    assert_eq!(vm.state(), State::Error);
    assert_eq!(vm.halt_reason(), Some("division by zero"));
}

#[test]
fn single_stepping_reaches_the_same_result() {
    let listing = compile("function main() { var x = 6; return x * 7; }");

    let mut run_vm = VirtualMachine::new();
    run_vm.load_program(&listing).unwrap();
    run_vm.run(None);

    let mut step_vm = VirtualMachine::new();
    step_vm.load_program(&listing).unwrap();
    for _ in 0..100_000 {
        if !step_vm.step() {
            break;
        }
    }

    assert_eq!(run_vm.get_register(0).unwrap(), step_vm.get_register(0).unwrap());
    assert_eq!(step_vm.get_register(0).unwrap(), 42);
}

#[test]
fn preprocessor_feeds_the_pipeline() {
    let _ = env_logger::try_init();
    let source = "\
        #define ANSWER 42\n\
        function main() { return ANSWER; }\n";
    let expanded = mcl_frontend::preprocess(source, std::path::Path::new(".")).unwrap();
    let program = mcl_frontend::parse_source(&expanded).unwrap();
    let listing = mcl_codegen::compile(&program).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_program(&listing).unwrap();
    vm.run(Some(100_000));
    assert_eq!(vm.get_register(0).unwrap(), 42);
}
