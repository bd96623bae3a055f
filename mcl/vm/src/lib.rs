//! The MCL virtual machine: a 32-register 16-bit CPU, word-addressed
//! RAM/ROM, and a bit-packed dual-buffer GPU, coordinated behind a single
//! [`VirtualMachine`] facade.
//!
//! Everything is single-threaded and cooperative: the host drives the
//! machine with [`VirtualMachine::step`] or [`VirtualMachine::run`], and the
//! only suspension point is `KEYIN`, which waits on the keyboard ring
//! buffer. A cloneable stop flag lets embedders cancel a `run` from another
//! thread; memory stays owned by this machine.
//!
//! ```
//! use mcl_vm::{State, VirtualMachine};
//!
//! let mut vm = VirtualMachine::new();
//! vm.load_program("MVR i:7, 6\nMULT 6, i:6\nHALT").unwrap();
//! vm.run(None);
//! assert_eq!(vm.state(), State::Stopped);
//! assert_eq!(vm.get_register(0).unwrap(), 42);
//! ```

#![deny(missing_docs)]

mod cpu;
mod error;
mod gpu;
mod mem;

pub use crate::cpu::{Cpu, State, Step, INPUT_BUFFER_SIZE, NUM_REGISTERS};
pub use crate::error::VmError;
pub use crate::gpu::{decode_char, encode_char, Gpu, DISPLAY_SIZE};
pub use crate::mem::{Memory, RAM_SIZE, ROM_BASE, ROM_SIZE};

use log::debug;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback polled while `KEYIN` waits for input; returning `None` means
/// the input stream is exhausted.
pub type InputSource = Box<dyn FnMut() -> Option<u8>>;

/// The whole machine: CPU + memory + GPU, plus host-facing controls.
pub struct VirtualMachine {
    cpu: Cpu,
    mem: Memory,
    gpu: Gpu,
    breakpoints: HashSet<u16>,
    stop: Arc<AtomicBool>,
    input_source: Option<InputSource>,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// Create a machine with zeroed RAM and no program.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            mem: Memory::new(),
            gpu: Gpu::new(),
            breakpoints: HashSet::new(),
            stop: Arc::new(AtomicBool::new(false)),
            input_source: None,
        }
    }

    /// Load a program from assembly text. Execution starts at address 0,
    /// where the compiler places its initialization code.
    pub fn load_program(&mut self, text: &str) -> Result<(), VmError> {
        let listing = mcl_asm::parse_listing(text)?;
        self.mem.load_program(listing)?;
        self.cpu.set_pc(0);
        Ok(())
    }

    /// Execute one instruction.
    ///
    /// Returns `true` if an instruction retired and the machine can
    /// continue. Failures are surfaced through [`VirtualMachine::state`]
    /// and [`VirtualMachine::halt_reason`]; no partial continuation is
    /// attempted.
    pub fn step(&mut self) -> bool {
        if self.cpu.state() != State::Running {
            self.cpu.set_state(State::Running);
        }
        if self.breakpoints.contains(&self.cpu.pc()) {
            self.cpu.set_state(State::Breakpoint);
            return false;
        }

        loop {
            match self.cpu.step(&mut self.mem, &mut self.gpu) {
                Ok(Step::Retired) => return self.cpu.state() == State::Running,
                Ok(Step::Blocked) => {
                    if self.cpu.state() != State::Running {
                        return false;
                    }
                    // KEYIN is waiting. Yield to the input source; if it
                    // cannot supply a character the program can never make
                    // progress.
                    let supplied = self
                        .input_source
                        .as_mut()
                        .and_then(|source| source());
                    match supplied {
                        Some(char_code) => self.cpu.push_input(char_code),
                        None => {
                            self.cpu.stop("Input stream ended");
                            return false;
                        }
                    }
                }
                Err(_) => return false,
            }
        }
    }

    /// Run until the program halts, fails, hits `max_cycles`, or the stop
    /// flag is raised.
    pub fn run(&mut self, max_cycles: Option<u64>) {
        self.stop.store(false, Ordering::Relaxed);
        self.cpu.set_state(State::Running);

        let mut cycles: u64 = 0;
        while self.cpu.state() == State::Running {
            if self.stop.load(Ordering::Relaxed) {
                self.cpu.stop("Stopped by host");
                break;
            }
            if let Some(max) = max_cycles {
                if cycles >= max {
                    self.cpu.stop("Max cycles reached");
                    break;
                }
            }
            if !self.step() {
                break;
            }
            cycles += 1;
        }
        debug!(
            "run finished: state {:?}, reason {:?}, {} instructions",
            self.cpu.state(),
            self.cpu.halt_reason(),
            self.cpu.instruction_count()
        );
    }

    /// Reset CPU, RAM, and GPU. The loaded program is kept.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.mem.clear_ram();
        self.gpu.reset();
    }

    /// Read a RAM word.
    pub fn read_memory(&self, addr: u16) -> Result<u16, VmError> {
        self.mem.read(addr)
    }

    /// Write a RAM word.
    pub fn write_memory(&mut self, addr: u16, value: u16) -> Result<(), VmError> {
        self.mem.write(addr, value)
    }

    /// Read a CPU register.
    pub fn get_register(&self, id: u8) -> Result<u16, VmError> {
        self.cpu.register(id)
    }

    /// Write a CPU register.
    pub fn set_register(&mut self, id: u8, value: u16) -> Result<(), VmError> {
        self.cpu.set_register(id, value)
    }

    /// Current execution state.
    pub fn state(&self) -> State {
        self.cpu.state()
    }

    /// Why execution stopped, if it has.
    pub fn halt_reason(&self) -> Option<&str> {
        self.cpu.halt_reason()
    }

    /// Queue a character on the keyboard ring buffer.
    pub fn inject_input(&mut self, char_code: u8) {
        self.cpu.push_input(char_code);
    }

    /// Install the callback `KEYIN` polls when the ring buffer is empty.
    pub fn set_input_source(&mut self, source: InputSource) {
        self.input_source = Some(source);
    }

    /// A flag that cancels [`VirtualMachine::run`] when set from any thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Park execution when the PC reaches `addr`.
    pub fn add_breakpoint(&mut self, addr: u16) {
        self.breakpoints.insert(addr);
    }

    /// Remove a breakpoint.
    pub fn clear_breakpoint(&mut self, addr: u16) {
        self.breakpoints.remove(&addr);
    }

    /// Remove every breakpoint.
    pub fn clear_all_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// The CPU, for inspection.
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// The GPU, for inspection.
    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// The memory unit, for inspection.
    pub fn memory(&self) -> &Memory {
        &self.mem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_to_halt() {
        let mut vm = VirtualMachine::new();
        vm.load_program("MVR i:7, 6\nMULT 6, i:6\nHALT").unwrap();
        vm.run(None);
        assert_eq!(vm.state(), State::Stopped);
        assert_eq!(vm.halt_reason(), Some("HALT instruction executed"));
        assert_eq!(vm.get_register(0).unwrap(), 42);
    }

    #[test]
    fn max_cycles_bounds_the_loop() {
        let mut vm = VirtualMachine::new();
        vm.load_program("loop: JMP loop").unwrap();
        vm.run(Some(100));
        assert_eq!(vm.state(), State::Stopped);
        assert_eq!(vm.halt_reason(), Some("Max cycles reached"));
    }

    #[test]
    fn stop_flag_cancels_run() {
        let mut vm = VirtualMachine::new();
        vm.load_program("loop: JMP loop").unwrap();
        vm.stop_handle().store(true, std::sync::atomic::Ordering::Relaxed);
        // The flag is checked each iteration, so the run ends immediately.
        vm.run(None);
        assert_eq!(vm.halt_reason(), Some("Stopped by host"));
    }

    #[test]
    fn keyin_consumes_injected_input() {
        let mut vm = VirtualMachine::new();
        vm.load_program("KEYIN i:0x2000\nHALT").unwrap();
        vm.inject_input(65);
        vm.run(None);
        assert_eq!(vm.state(), State::Stopped);
        assert_eq!(vm.read_memory(0x2000).unwrap(), 65);
    }

    #[test]
    fn keyin_pulls_from_the_input_source() {
        let mut vm = VirtualMachine::new();
        vm.load_program("KEYIN i:0x2000\nKEYIN i:0x2001\nHALT")
            .unwrap();
        let mut stream = vec![1u8, 2u8].into_iter();
        vm.set_input_source(Box::new(move || stream.next()));
        vm.run(None);
        assert_eq!(vm.read_memory(0x2000).unwrap(), 1);
        assert_eq!(vm.read_memory(0x2001).unwrap(), 2);
    }

    #[test]
    fn keyin_without_input_stops() {
        let mut vm = VirtualMachine::new();
        vm.load_program("KEYIN i:0x2000\nHALT").unwrap();
        vm.run(None);
        assert_eq!(vm.state(), State::Stopped);
        assert_eq!(vm.halt_reason(), Some("Input stream ended"));
    }

    #[test]
    fn breakpoint_parks_the_cpu() {
        let mut vm = VirtualMachine::new();
        vm.load_program("MVR i:1, 6\nMVR i:2, 7\nHALT").unwrap();
        vm.add_breakpoint(1);
        vm.run(None);
        assert_eq!(vm.state(), State::Breakpoint);
        assert_eq!(vm.get_register(6).unwrap(), 1);
        assert_eq!(vm.get_register(7).unwrap(), 0);
    }

    #[test]
    fn runtime_error_surfaces_in_state() {
        let mut vm = VirtualMachine::new();
        vm.load_program("DIV i:1, i:0\nHALT").unwrap();
        vm.run(None);
        assert_eq!(vm.state(), State::Error);
        assert_eq!(vm.halt_reason(), Some("division by zero"));
    }
}
