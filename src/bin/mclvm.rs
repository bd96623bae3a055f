//! `mclvm`: run an assembly listing on the MCL virtual machine.

use anyhow::{Context, Result};
use clap::Parser;
use mcl_vm::{State, VirtualMachine};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mclvm", version, about = "MCL virtual machine")]
struct Options {
    /// Assembly listing to load and run.
    file: PathBuf,

    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Print all 32 registers after the run.
    #[arg(long)]
    registers: bool,

    /// Dump a range of RAM words after the run, as START:COUNT.
    #[arg(long)]
    memory: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();

    let text = std::fs::read_to_string(&options.file)
        .with_context(|| format!("cannot read '{}'", options.file.display()))?;

    let mut vm = VirtualMachine::new();
    vm.load_program(&text)
        .with_context(|| format!("loading '{}'", options.file.display()))?;

    // KEYIN pulls 6-bit character codes from stdin in headless mode.
    vm.set_input_source(Box::new(|| {
        let mut byte = [0u8; 1];
        match std::io::stdin().read(&mut byte) {
            Ok(1) => Some(encode_byte(byte[0])),
            _ => None,
        }
    }));

    vm.run(options.max_cycles);

    println!(
        "state: {:?} ({})",
        vm.state(),
        vm.halt_reason().unwrap_or("no reason recorded")
    );
    println!("R0 = {}", vm.get_register(0).expect("R0 exists"));
    println!(
        "instructions: {}, cycles: {}",
        vm.cpu().instruction_count(),
        vm.cpu().cycle_count()
    );

    if options.registers {
        for r in 0..mcl_vm::NUM_REGISTERS as u8 {
            let value = vm.get_register(r).expect("register id in range");
            println!("R{r:<2} = {value:#06x} ({value})");
        }
    }

    if let Some(spec) = &options.memory {
        let (start, count) = parse_range(spec)?;
        for addr in start..start.saturating_add(count) {
            let value = vm.read_memory(addr)?;
            println!("[{addr:#06x}] = {value:#06x} ({value})");
        }
    }

    std::process::exit(match vm.state() {
        State::Error => 1,
        _ => 0,
    });
}

/// Map a raw input byte to the VM's 6-bit character encoding.
fn encode_byte(byte: u8) -> u8 {
    mcl_vm::encode_char((byte as char).to_ascii_uppercase())
}

fn parse_range(spec: &str) -> Result<(u16, u16)> {
    let (start, count) = spec
        .split_once(':')
        .context("expected START:COUNT, e.g. 0x1000:16")?;
    let parse = |s: &str| -> Result<u16> {
        let value = if let Some(hex) = s.strip_prefix("0x") {
            u16::from_str_radix(hex, 16)?
        } else {
            s.parse()?
        };
        Ok(value)
    };
    Ok((parse(start)?, parse(count)?))
}
