//! MCL assembly: shared instruction data model, textual loader, and printer.
//!
//! The assembly listing is the only artefact that crosses the
//! compiler/VM boundary, so both sides link against this crate to agree on
//! the decoded form. The text format is line oriented:
//!
//! ```text
//! // comment-only lines and blank lines are ignored
//! label:                  // a label may stand alone ...
//! start: MVR i:7, 31      // ... or prefix an instruction
//! ADD 31, i:6             // raw decimals are register indices
//! JMP start               // identifiers are label references
//! ```
//!
//! Operands are decoded exactly once, into [`Operand`]; the VM never
//! re-parses strings at execution time.

#![deny(missing_docs)]

#[macro_use]
mod error;
mod builder;
mod inst;
mod parse;

pub use crate::builder::{AsmLine, InstSink, ListingBuilder};
pub use crate::error::{Location, ParseError, ParseResult};
pub use crate::inst::{Inst, Listing, Opcode, Operand, SpecialReg};
pub use crate::parse::{parse_inst, parse_line, parse_listing};
