//! End-to-end lowering tests: compile MCL source and execute the listing
//! on the VM.

use mcl_codegen::{compile, CodegenError, STACK_TOP};
use mcl_vm::{State, VirtualMachine};

fn compile_source(source: &str) -> String {
    let _ = env_logger::try_init();
    let program = mcl_frontend::parse_source(source).expect("source should parse");
    compile(&program).expect("source should compile")
}

fn run(source: &str) -> VirtualMachine {
    let listing = compile_source(source);
    let mut vm = VirtualMachine::new();
    vm.load_program(&listing)
        .unwrap_or_else(|e| panic!("listing should load: {e}\n{listing}"));
    vm.run(Some(2_000_000));
    assert_eq!(
        vm.state(),
        State::Stopped,
        "program should stop cleanly: {:?}\n{listing}",
        vm.halt_reason()
    );
    assert_eq!(vm.halt_reason(), Some("HALT instruction executed"));
    vm
}

fn run_expect(source: &str, expected: u16) {
    let vm = run(source);
    assert_eq!(vm.get_register(0).unwrap(), expected);
}

#[test]
fn literal_times_variable() {
    run_expect("function main() { var x = 7; return x * 6; }", 42);
}

#[test]
fn arithmetic_operators() {
    run_expect("function main() { return 10 + 2 * 3 - 4 / 2; }", 14);
    run_expect("function main() { return 17 % 5; }", 2);
    run_expect("function main() { return (1 << 4) | 3; }", 19);
    run_expect("function main() { return 12 & 10; }", 8);
    run_expect("function main() { return 12 ^ 10; }", 6);
    run_expect("function main() { return 256 >> 4; }", 16);
}

#[test]
fn keyword_bitwise_forms() {
    run_expect("function main() { return 12 and 10; }", 8);
    run_expect("function main() { return 12 or 2; }", 14);
    run_expect("function main() { return not 0xFF00; }", 0x00FF);
}

#[test]
fn unary_operators() {
    run_expect("function main() { return -5 + 6; }", 1);
    run_expect("function main() { return !0; }", 1);
    run_expect("function main() { return !7; }", 0);
    run_expect("function main() { return ~0; }", 0xFFFF);
}

#[test]
fn comparisons() {
    run_expect("function main() { return 3 < 5; }", 1);
    run_expect("function main() { return 5 < 3; }", 0);
    run_expect("function main() { return 5 > 3; }", 1);
    run_expect("function main() { return 3 > 3; }", 0);
    run_expect("function main() { return 3 <= 3; }", 1);
    run_expect("function main() { return 4 >= 5; }", 0);
    run_expect("function main() { return 7 == 7; }", 1);
    run_expect("function main() { return 7 != 7; }", 0);
}

#[test]
fn logical_operators() {
    run_expect("function main() { return 1 && 2; }", 1);
    run_expect("function main() { return 1 && 0; }", 0);
    run_expect("function main() { return 0 || 3; }", 1);
    run_expect("function main() { return 0 || 0; }", 0);
}

#[test]
fn if_else() {
    run_expect(
        "function main() { var x = 10; if (x > 5) { return 1; } else { return 2; } }",
        1,
    );
    run_expect(
        "function main() { var x = 3; if (x > 5) { return 1; } else { return 2; } }",
        2,
    );
    run_expect(
        "function main() { var x = 1; if (x) { x = x + 10; } return x; }",
        11,
    );
}

#[test]
fn while_loop() {
    run_expect(
        "function main() {
             var sum = 0;
             var i = 1;
             while (i <= 10) {
                 sum = sum + i;
                 i = i + 1;
             }
             return sum;
         }",
        55,
    );
}

#[test]
fn for_loop_with_break_and_continue() {
    run_expect(
        "function main() {
             var sum = 0;
             for (var i = 0; i < 10; i = i + 1) {
                 if (i == 3) { continue; }
                 if (i == 6) { break; }
                 sum = sum + i;
             }
             return sum;
         }",
        0 + 1 + 2 + 4 + 5,
    );
}

#[test]
fn switch_dispatch() {
    let source = |n: u16| {
        format!(
            "function main() {{
                 var x = {n};
                 var out = 0;
                 switch (x) {{
                     case 1: out = 10; break;
                     case 2: out = 20; break;
                     default: out = 99;
                 }}
                 return out;
             }}"
        )
    };
    run_expect(&source(1), 10);
    run_expect(&source(2), 20);
    run_expect(&source(7), 99);
}

#[test]
fn switch_falls_through() {
    run_expect(
        "function main() {
             var out = 0;
             switch (1) {
                 case 1: out = out + 1;
                 case 2: out = out + 2; break;
                 default: out = out + 99;
             }
             return out;
         }",
        3,
    );
}

#[test]
fn globals_are_shared() {
    run_expect(
        "var counter = 5;
         function bump() { counter = counter + 1; return 0; }
         function main() { bump(); bump(); return counter; }",
        7,
    );
}

#[test]
fn function_call_with_arguments() {
    run_expect(
        "function add(a: int, b: int) -> int { return a + b; }
         function main() { return add(40, 2); }",
        42,
    );
    // Argument order: parameter 0 is the leftmost.
    run_expect(
        "function sub(a: int, b: int) -> int { return a - b; }
         function main() { return sub(50, 8); }",
        42,
    );
}

#[test]
fn recursion_and_stack_balance() {
    let vm = run(
        "function fact(n) {
             if (n <= 1) { return 1; }
             return n * fact(n - 1);
         }
         function main() { return fact(5); }",
    );
    assert_eq!(vm.get_register(0).unwrap(), 120);
    // SP must come back to its initial value once main halts.
    assert_eq!(vm.get_register(3).unwrap(), STACK_TOP);
}

#[test]
fn function_locals_survive_calls() {
    run_expect(
        "function noisy() { var a = 1; var b = 2; var c = 3; return a + b + c; }
         function f() {
             var x = 30;
             var y = noisy();
             return x + y + 6;
         }
         function main() { return f(); }",
        42,
    );
}

#[test]
fn main_locals_survive_calls() {
    run_expect(
        "function noisy() { var a = 9; var b = 8; return a * b; }
         function main() {
             var x = 40;
             noisy();
             var y = 2;
             return x + y;
         }",
        42,
    );
}

#[test]
fn nested_call_arguments() {
    run_expect(
        "function add(a, b) { return a + b; }
         function main() { return add(add(1, 2), add(3, add(4, 5))); }",
        15,
    );
}

#[test]
fn many_locals_spill_and_reload() {
    let names: Vec<String> = (b'a'..=b'z').map(|c| (c as char).to_string()).collect();
    let decls: String = names
        .iter()
        .enumerate()
        .map(|(i, n)| format!("var {n} = {};\n", i + 1))
        .collect();
    let sum = names.join(" + ");
    let source = format!("function main() {{\n{decls}return {sum};\n}}");

    let listing = compile_source(&source);
    let spills = listing.lines().filter(|l| l.contains("// Spill")).count();
    let reloads = listing.lines().filter(|l| l.contains("// Reload")).count();
    assert!(spills > 0, "26 live locals must force at least one spill");
    assert!(reloads > 0, "spilled locals must reload on access");
    // Spill addresses are immediates, never register indices.
    for line in listing.lines().filter(|l| l.contains("// Spill")) {
        assert!(line.contains("i:"), "spill without immediate address: {line}");
    }

    let mut vm = VirtualMachine::new();
    vm.load_program(&listing).unwrap();
    vm.run(Some(2_000_000));
    assert_eq!(vm.get_register(0).unwrap(), (1..=26).sum::<u16>());
}

#[test]
fn arrays_with_literal_initializer() {
    run_expect(
        "function main() {
             var a: int[5] = {10, 20, 30, 40, 50};
             return a[1] + a[3];
         }",
        60,
    );
}

#[test]
fn array_element_assignment() {
    run_expect(
        "function main() {
             var a: int[4];
             var i = 0;
             while (i < 4) {
                 a[i] = i * i;
                 i = i + 1;
             }
             return a[0] + a[1] + a[2] + a[3];
         }",
        14,
    );
}

#[test]
fn pointers_and_address_of() {
    run_expect(
        "function main() {
             var x = 5;
             var p: int* = @x;
             *p = 42;
             return x;
         }",
        42,
    );
    run_expect(
        "function main() {
             var x = 41;
             var p: int* = @x;
             return *p + 1;
         }",
        42,
    );
}

#[test]
fn malloc_returns_usable_storage() {
    run_expect(
        "function main() {
             var p: int* = malloc(4);
             p[0] = 40;
             p[1] = 2;
             var r = p[0] + p[1];
             free(p);
             return r;
         }",
        42,
    );
}

#[test]
fn malloc_with_runtime_size_is_rejected() {
    let program = mcl_frontend::parse_source(
        "function main() { var n = 4; var p: int* = malloc(n); return 0; }",
    )
    .unwrap();
    assert_eq!(compile(&program), Err(CodegenError::RuntimeMallocSize));
}

#[test]
fn array_decay_on_call() {
    run_expect(
        "function second(p: int*) { return p[1]; }
         function main() {
             var a: int[3] = {7, 42, 9};
             return second(a);
         }",
        42,
    );
}

#[test]
fn gpu_buffer_select_and_fill() {
    let vm = run(
        "function main() {
             setGPUBuffer(0, 1);
             fillGrid(0, 0, 32, 1);
             return 0;
         }",
    );
    assert_eq!(vm.gpu().buffer(1)[0], 0xFFFF_FFFF);
    assert_eq!(vm.gpu().buffer(0)[0], 0);
    assert_eq!(vm.gpu().gpu_register(), 0b10);
}

#[test]
fn gpu_draw_line() {
    let vm = run("function main() { drawLine(0, 0, 31, 0); return 0; }");
    assert_eq!(vm.gpu().buffer(0)[0], 0xFFFF_FFFF);
}

#[test]
fn gpu_fill_then_clear_is_zero() {
    let vm = run(
        "function main() {
             fillGrid(4, 2, 8, 3);
             clearGrid(4, 2, 8, 3);
             return 0;
         }",
    );
    assert!(vm.gpu().buffer(0).iter().all(|&row| row == 0));
}

#[test]
fn gpu_get_buffer_reads_back() {
    run_expect(
        "function main() {
             setGPUBuffer(0, 1);
             return getGPUBuffer(0);
         }",
        1,
    );
    run_expect("function main() { return getGPUBuffer(1); }", 0);
}

#[test]
fn gpu_dynamic_selector() {
    let vm = run(
        "function main() {
             var which = 0;
             setGPUBuffer(which, 1);
             fillGrid(0, 0, 1, 1);
             return 0;
         }",
    );
    assert_eq!(vm.gpu().gpu_register(), 0b10);
    assert_eq!(vm.gpu().buffer(1)[0] >> 31, 1);
}

#[test]
fn gpu_register_arguments() {
    let vm = run(
        "function main() {
             var w = 32;
             fillGrid(0, 0, w, 1);
             return 0;
         }",
    );
    assert_eq!(vm.gpu().buffer(0)[0], 0xFFFF_FFFF);
}

#[test]
fn inline_asm() {
    run_expect(r#"function main() { return asm("ADD %0, %1", 20, 22); }"#, 42);
    run_expect(
        r#"function main() {
               var x = 6;
               return asm("MULT %0, %1", x, 7);
           }"#,
        42,
    );
}

#[test]
fn inline_asm_bad_template_is_rejected() {
    let program =
        mcl_frontend::parse_source(r#"function main() { return asm("FROB 1, 2"); }"#).unwrap();
    assert!(matches!(compile(&program), Err(CodegenError::InlineAsm(_))));
}

#[test]
fn undefined_symbol_is_rejected() {
    let program = mcl_frontend::parse_source("function main() { return nope; }").unwrap();
    assert_eq!(
        compile(&program),
        Err(CodegenError::Undefined("nope".to_string()))
    );
}

#[test]
fn redefinition_is_rejected() {
    let program =
        mcl_frontend::parse_source("function main() { var x = 1; var x = 2; return x; }").unwrap();
    assert!(matches!(
        compile(&program),
        Err(CodegenError::Redefinition { .. })
    ));
}

#[test]
fn missing_main_is_rejected() {
    let program = mcl_frontend::parse_source("function helper() { return 1; }").unwrap();
    assert_eq!(compile(&program), Err(CodegenError::MissingMain));
}

#[test]
fn break_outside_loop_is_rejected() {
    let program = mcl_frontend::parse_source("function main() { break; }").unwrap();
    assert_eq!(compile(&program), Err(CodegenError::BreakOutsideLoop));
}

#[test]
fn shadowing_in_nested_blocks() {
    run_expect(
        "function main() {
             var x = 1;
             {
                 var x = 100;
                 x = x + 1;
             }
             return x;
         }",
        1,
    );
}

#[test]
fn generated_listing_round_trips_through_the_loader() {
    let listing = compile_source(
        "function helper(n) { return n + 1; }
         function main() { var x = helper(3); return x * 2; }",
    );
    let loaded = mcl_asm::parse_listing(&listing).unwrap();
    let reloaded = mcl_asm::parse_listing(&loaded.to_string()).unwrap();
    assert_eq!(loaded, reloaded);
}

#[test]
fn locals_in_loops_with_calls() {
    run_expect(
        "function twice(n) { return n * 2; }
         function main() {
             var total = 0;
             for (var i = 1; i <= 4; i = i + 1) {
                 total = total + twice(i);
             }
             return total;
         }",
        20,
    );
}

#[test]
fn deep_expression_nesting() {
    run_expect(
        "function main() { return ((((1 + 2) * (3 + 4)) - ((5 - 3) * 2)) + (10 / (2 + 3))); }",
        (((1 + 2) * (3 + 4)) - ((5 - 3) * 2)) + (10 / (2 + 3)),
    );
}
