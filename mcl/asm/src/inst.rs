//! Instruction, operand, and listing data structures.

use core::fmt::{self, Display, Formatter};
use core::str::FromStr;
use smallvec::SmallVec;
use std::collections::HashMap;

/// An MCL opcode.
///
/// The mnemonic set is fixed; GPU drawing commands are part of the ISA and
/// are dispatched by the CPU to the GPU unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `LOAD value, addr`: store a value to memory.
    Load,
    /// `READ addr, reg`: load a memory word into a register.
    Read,
    /// `MVR value, reg`: move a value into a register.
    Mvr,
    /// `MVM src_addr, dst_addr`: memory-to-memory copy.
    Mvm,
    /// `ADD a, b`: 16-bit wrapping add into R0.
    Add,
    /// `SUB a, b`: 16-bit wrapping subtract into R0.
    Sub,
    /// `MULT a, b`: low half into R0, high half into R1.
    Mult,
    /// `DIV a, b`: quotient into R0, remainder into R1.
    Div,
    /// `SHL a, b`: logical shift left into R0.
    Shl,
    /// `SHR a, b`: logical shift right into R0.
    Shr,
    /// `SHLR a, b`: 16-bit left rotate into R0.
    Shlr,
    /// `AND a, b`: bitwise AND into R0.
    And,
    /// `OR a, b`: bitwise OR into R0.
    Or,
    /// `XOR a, b`: bitwise XOR into R0.
    Xor,
    /// `NOT reg`: in-place bitwise complement.
    Not,
    /// `JMP target`: unconditional jump.
    Jmp,
    /// `JAL target`: jump and link through R2.
    Jal,
    /// `JBT target, x, y`: jump if `x > y`.
    Jbt,
    /// `JZ target, x`: jump if `x == 0`.
    Jz,
    /// `JNZ target, x`: jump if `x != 0`.
    Jnz,
    /// `KEYIN addr`: blocking keyboard input into memory.
    Keyin,
    /// `HALT`: stop execution.
    Halt,
    /// `DRLINE x1, y1, x2, y2`: scanline-filled line.
    Drline,
    /// `DRGRD x, y, w, h`: fill a rectangle.
    Drgrd,
    /// `CLRGRID x, y, w, h`: clear a rectangle.
    Clrgrid,
    /// `LDSPR id, data`: load a 5×3 sprite.
    Ldspr,
    /// `DRSPR id, x, y`: draw a sprite.
    Drspr,
    /// `LDTXT id, data`: load a 6-bit character.
    Ldtxt,
    /// `DRTXT id, x, y`: draw a character with the 3×4 font.
    Drtxt,
    /// `SCRLBFR offx, offy`: scroll the edit buffer.
    Scrlbfr,
}

impl Opcode {
    /// The canonical upper-case mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::Read => "READ",
            Self::Mvr => "MVR",
            Self::Mvm => "MVM",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mult => "MULT",
            Self::Div => "DIV",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Shlr => "SHLR",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
            Self::Jmp => "JMP",
            Self::Jal => "JAL",
            Self::Jbt => "JBT",
            Self::Jz => "JZ",
            Self::Jnz => "JNZ",
            Self::Keyin => "KEYIN",
            Self::Halt => "HALT",
            Self::Drline => "DRLINE",
            Self::Drgrd => "DRGRD",
            Self::Clrgrid => "CLRGRID",
            Self::Ldspr => "LDSPR",
            Self::Drspr => "DRSPR",
            Self::Ldtxt => "LDTXT",
            Self::Drtxt => "DRTXT",
            Self::Scrlbfr => "SCRLBFR",
        }
    }

    /// Whether this opcode updates the PC itself; the CPU does not advance
    /// the PC after executing one of these.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::Jal | Self::Jbt | Self::Jz | Self::Jnz
        )
    }

    /// Whether this opcode is delegated to the GPU unit.
    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            Self::Drline
                | Self::Drgrd
                | Self::Clrgrid
                | Self::Ldspr
                | Self::Drspr
                | Self::Ldtxt
                | Self::Drtxt
                | Self::Scrlbfr
        )
    }

    /// The number of operands this opcode expects.
    pub fn arity(self) -> usize {
        match self {
            Self::Halt => 0,
            Self::Not | Self::Jmp | Self::Jal | Self::Keyin => 1,
            Self::Jbt | Self::Drspr | Self::Drtxt => 3,
            Self::Drline | Self::Drgrd | Self::Clrgrid => 4,
            _ => 2,
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.to_ascii_uppercase().as_str() {
            "LOAD" => Self::Load,
            "READ" => Self::Read,
            "MVR" => Self::Mvr,
            "MVM" => Self::Mvm,
            "ADD" => Self::Add,
            "SUB" => Self::Sub,
            "MULT" => Self::Mult,
            "DIV" => Self::Div,
            "SHL" => Self::Shl,
            "SHR" => Self::Shr,
            "SHLR" => Self::Shlr,
            "AND" => Self::And,
            "OR" => Self::Or,
            "XOR" => Self::Xor,
            "NOT" => Self::Not,
            "JMP" => Self::Jmp,
            "JAL" => Self::Jal,
            "JBT" => Self::Jbt,
            "JZ" => Self::Jz,
            "JNZ" => Self::Jnz,
            "KEYIN" => Self::Keyin,
            "HALT" => Self::Halt,
            "DRLINE" => Self::Drline,
            "DRGRD" => Self::Drgrd,
            "CLRGRID" => Self::Clrgrid,
            "LDSPR" => Self::Ldspr,
            "DRSPR" => Self::Drspr,
            "LDTXT" => Self::Ldtxt,
            "DRTXT" => Self::Drtxt,
            "SCRLBFR" => Self::Scrlbfr,
            _ => return Err(()),
        };
        Ok(op)
    }
}

/// A named special register, addressed by its bare identifier in assembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialReg {
    /// The 32-bit GPU control register shared between the CPU and the GPU.
    Gpu,
}

impl SpecialReg {
    /// The assembly name of this register.
    pub fn name(self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
        }
    }

    /// Look up a special register by its assembly name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "GPU" => Some(Self::Gpu),
            _ => None,
        }
    }
}

impl Display for SpecialReg {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction operand.
///
/// The textual forms are: `i:N` / `i:0x…` / bare `0x…` for immediates
/// (`i:name` also refers to a label), bare decimals for register indices,
/// and identifiers for label references or special registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// A literal value, printed with the `i:` prefix.
    Imm(i64),
    /// A general register index. Indices are validated by the CPU, not the
    /// loader.
    Reg(u8),
    /// A named special register.
    Special(SpecialReg),
    /// A label reference; resolves to a ROM address at execution time.
    Label(Box<str>),
}

impl Operand {
    /// Shorthand for a label operand.
    pub fn label(name: impl Into<Box<str>>) -> Self {
        Self::Label(name.into())
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Imm(v) => write!(f, "i:{v}"),
            Self::Reg(r) => write!(f, "{r}"),
            Self::Special(s) => write!(f, "{s}"),
            Self::Label(l) => f.write_str(l),
        }
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Self::Imm(v)
    }
}

impl From<u8> for Operand {
    fn from(r: u8) -> Self {
        Self::Reg(r)
    }
}

impl From<SpecialReg> for Operand {
    fn from(s: SpecialReg) -> Self {
        Self::Special(s)
    }
}

/// A single decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inst {
    /// The operation.
    pub opcode: Opcode,
    /// Decoded operands, in listing order.
    pub operands: SmallVec<[Operand; 3]>,
    /// Trailing `// …` note carried in emitted listings. The loader drops
    /// comments, so they never participate in equality of loaded programs.
    pub comment: Option<Box<str>>,
}

impl Inst {
    /// Create an instruction from any operand-convertible values.
    pub fn new<I>(opcode: Opcode, operands: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        Self {
            opcode,
            operands: operands.into_iter().map(Into::into).collect(),
            comment: None,
        }
    }

    /// Attach a trailing comment.
    pub fn with_comment(mut self, comment: impl Into<Box<str>>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl Display for Inst {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{op}")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, "  // {comment}")?;
        }
        Ok(())
    }
}

/// A loaded program: the instruction array plus the label→address table.
///
/// Printing a listing and re-loading the text yields an identical
/// instruction array and label table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// Instructions in address order; the address of `insts[i]` is `i`.
    pub insts: Vec<Inst>,
    /// Labels, resolved to instruction addresses. A label may point one
    /// past the last instruction.
    pub labels: HashMap<String, u16>,
}

impl Listing {
    /// Look up a label.
    pub fn label(&self, name: &str) -> Option<u16> {
        self.labels.get(name).copied()
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Whether the listing holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

impl Display for Listing {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // Group labels by address so they print ahead of their instruction.
        let mut by_addr: HashMap<u16, Vec<&str>> = HashMap::new();
        for (name, addr) in &self.labels {
            by_addr.entry(*addr).or_default().push(name);
        }
        for names in by_addr.values_mut() {
            names.sort_unstable();
        }

        for (addr, inst) in self.insts.iter().enumerate() {
            if let Some(names) = by_addr.get(&(addr as u16)) {
                for name in names {
                    writeln!(f, "{name}:")?;
                }
            }
            writeln!(f, "{inst}")?;
        }
        // Labels that point one past the last instruction.
        if let Some(names) = by_addr.get(&(self.insts.len() as u16)) {
            for name in names {
                writeln!(f, "{name}:")?;
            }
        }
        Ok(())
    }
}
