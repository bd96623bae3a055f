//! End-to-end tests: MCL source through the compiler, loader, and VM.

use mcl_vm::{State, VirtualMachine};

mod properties;
mod scenarios;

/// Compile MCL source text to an assembly listing.
pub fn compile(source: &str) -> String {
    let _ = env_logger::try_init();
    let program = mcl_frontend::parse_source(source).expect("source should parse");
    mcl_codegen::compile(&program).expect("source should compile")
}

/// Compile and load a program, without running it.
pub fn load(source: &str) -> VirtualMachine {
    let listing = compile(source);
    let mut vm = VirtualMachine::new();
    vm.load_program(&listing)
        .unwrap_or_else(|e| panic!("listing should load: {e}\n{listing}"));
    vm
}

/// Compile, load, and run a program to a clean halt.
pub fn run(source: &str) -> VirtualMachine {
    let mut vm = load(source);
    vm.run(Some(5_000_000));
    assert_eq!(
        vm.state(),
        State::Stopped,
        "program should stop cleanly, got {:?}",
        vm.halt_reason()
    );
    vm
}
