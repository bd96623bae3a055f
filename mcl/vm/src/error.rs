//! Runtime error kinds.
//!
//! Every runtime failure is non-recoverable: the CPU surfaces it via
//! `State::Error` plus a halt reason, and execution stops.

use mcl_asm::Opcode;
use thiserror::Error;

/// Errors raised while loading or executing a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// The listing did not parse.
    #[error(transparent)]
    Parse(#[from] mcl_asm::ParseError),

    /// The program does not fit in ROM.
    #[error("program too large: {len} instructions > {capacity} ROM words")]
    ProgramTooLarge {
        /// Instructions in the listing.
        len: usize,
        /// ROM capacity in words.
        capacity: usize,
    },

    /// A register index outside the register file.
    #[error("invalid register: {0}")]
    InvalidRegister(u8),

    /// A read from an address outside every memory region.
    #[error("invalid read address: {0:#06x}")]
    InvalidReadAddress(u16),

    /// A write to an address outside every memory region.
    #[error("invalid write address: {0:#06x}")]
    InvalidWriteAddress(u16),

    /// A write to a read-only region.
    #[error("cannot write to read-only memory: {0:#06x}")]
    ReadOnlyMemory(u16),

    /// A label operand with no entry in the label table.
    #[error("undefined label: {0}")]
    UndefinedLabel(String),

    /// `DIV` with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,

    /// An instruction with the wrong number of operands.
    #[error("{opcode} requires {expected} operands, found {found}")]
    OperandCount {
        /// The offending opcode.
        opcode: Opcode,
        /// The arity of the opcode.
        expected: usize,
        /// Operands actually present.
        found: usize,
    },

    /// An operand of the wrong kind for its position.
    #[error("{opcode}: {message}")]
    BadOperand {
        /// The offending opcode.
        opcode: Opcode,
        /// What was wrong.
        message: &'static str,
    },
}
