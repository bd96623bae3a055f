//! Two-pass parser for textual assembly listings.
//!
//! The first pass collects labels so that forward references resolve; the
//! second pass decodes instructions and their operands.

use crate::error::{Location, ParseResult};
use crate::inst::{Inst, Listing, Opcode, Operand, SpecialReg};
use log::trace;
use std::collections::HashMap;

/// Parse a complete assembly listing.
pub fn parse_listing(text: &str) -> ParseResult<Listing> {
    let mut labels: HashMap<String, u16> = HashMap::new();

    // First pass: record label addresses. A label occupies the address of
    // the next instruction, which may follow it on the same line.
    let mut address: u16 = 0;
    for (idx, raw) in text.lines().enumerate() {
        let loc = Location {
            line_number: idx + 1,
        };
        let Some(line) = strip_line(raw) else {
            continue;
        };
        match split_label(line) {
            Some((label, rest)) => {
                if labels.insert(label.to_string(), address).is_some() {
                    return err!(loc, "duplicate label '{label}'");
                }
                if !rest.is_empty() {
                    address += 1;
                }
            }
            None => address += 1,
        }
    }

    // Second pass: decode instructions.
    let mut insts = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let loc = Location {
            line_number: idx + 1,
        };
        let Some(line) = strip_line(raw) else {
            continue;
        };
        let body = match split_label(line) {
            Some((_, rest)) if rest.is_empty() => continue,
            Some((_, rest)) => rest,
            None => line,
        };
        match parse_inst_str(body) {
            Ok(inst) => insts.push(inst),
            Err(message) => {
                return Err(crate::error::ParseError {
                    location: loc,
                    message,
                })
            }
        }
    }

    trace!(
        "loaded {} instructions, {} labels",
        insts.len(),
        labels.len()
    );
    Ok(Listing { insts, labels })
}

/// Parse a single instruction line (no label, no comment). Used both by the
/// listing loader and by the compiler's inline-assembly expansion.
pub fn parse_inst(line: &str) -> ParseResult<Inst> {
    let loc = Location::default();
    let Some(line) = strip_line(line) else {
        return err!(loc, "empty instruction");
    };
    match parse_inst_str(line) {
        Ok(inst) => Ok(inst),
        Err(message) => Err(crate::error::ParseError {
            location: loc,
            message,
        }),
    }
}

/// Split one listing line into its optional label and optional instruction.
/// Blank and comment-only lines yield `(None, None)`.
pub fn parse_line(line: &str) -> ParseResult<(Option<Box<str>>, Option<Inst>)> {
    let Some(stripped) = strip_line(line) else {
        return Ok((None, None));
    };
    let to_err = |message| crate::error::ParseError {
        location: Location::default(),
        message,
    };
    match split_label(stripped) {
        Some((label, rest)) => {
            let inst = if rest.is_empty() {
                None
            } else {
                Some(parse_inst_str(rest).map_err(to_err)?)
            };
            Ok((Some(label.into()), inst))
        }
        None => Ok((None, Some(parse_inst_str(stripped).map_err(to_err)?))),
    }
}

/// Drop comments and surrounding whitespace; `None` means the line holds no
/// instruction or label.
fn strip_line(line: &str) -> Option<&str> {
    let line = match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    };
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Split a leading `identifier:` off an already-stripped line, returning the
/// label and the (possibly empty) remainder.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let (label, rest) = (&line[..colon], &line[colon + 1..]);
    if is_identifier(label) {
        Some((label, rest.trim()))
    } else {
        // `i:` operands also contain a colon; those lines are plain
        // instructions.
        None
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_inst_str(line: &str) -> Result<Inst, String> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let mnemonic = parts.next().expect("stripped line is non-empty");
    let opcode: Opcode = mnemonic
        .parse()
        .map_err(|()| format!("unknown opcode '{mnemonic}'"))?;

    let mut inst = Inst::new(opcode, [] as [Operand; 0]);
    if let Some(rest) = parts.next() {
        for tok in rest.split(',') {
            let tok = tok.trim();
            if tok.is_empty() {
                return Err("empty operand".to_string());
            }
            inst.operands.push(parse_operand(tok)?);
        }
    }
    Ok(inst)
}

fn parse_operand(tok: &str) -> Result<Operand, String> {
    // Explicit immediates: `i:123`, `i:0xFF`, or `i:label`.
    if let Some(value) = tok.strip_prefix("i:") {
        if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            return match i64::from_str_radix(hex, 16) {
                Ok(v) => Ok(Operand::Imm(v)),
                Err(_) => Err(format!("malformed immediate '{tok}'")),
            };
        }
        if let Ok(v) = value.parse::<i64>() {
            return Ok(Operand::Imm(v));
        }
        if is_identifier(value) {
            return Ok(Operand::label(value));
        }
        return Err(format!("malformed immediate '{tok}'"));
    }

    // Bare hex is an immediate without the prefix.
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        return match i64::from_str_radix(hex, 16) {
            Ok(v) => Ok(Operand::Imm(v)),
            Err(_) => Err(format!("malformed immediate '{tok}'")),
        };
    }

    // Raw decimals are register indices.
    if tok.bytes().all(|b| b.is_ascii_digit()) {
        return match tok.parse::<u8>() {
            Ok(r) => Ok(Operand::Reg(r)),
            Err(_) => Err(format!("register index out of range '{tok}'")),
        };
    }

    if let Some(special) = SpecialReg::by_name(tok) {
        return Ok(Operand::Special(special));
    }

    if is_identifier(tok) {
        return Ok(Operand::label(tok));
    }

    Err(format!("invalid operand '{tok}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Listing {
        parse_listing(text).expect("listing should parse")
    }

    #[test]
    fn labels_and_addresses() {
        let listing = load(
            "start: MVR i:1, 6\n\
             // a comment line\n\
             loop:\n\
             ADD 6, i:1\n\
             JMP loop\n\
             end:\n",
        );
        assert_eq!(listing.len(), 3);
        assert_eq!(listing.label("start"), Some(0));
        assert_eq!(listing.label("loop"), Some(1));
        assert_eq!(listing.label("end"), Some(3));
    }

    #[test]
    fn operand_forms() {
        let listing = load("MVR i:0x10, 4\nLOAD 4, 0x2000\nJZ done, 4\ndone: HALT");
        assert_eq!(
            listing.insts[0].operands[..],
            [Operand::Imm(16), Operand::Reg(4)]
        );
        assert_eq!(
            listing.insts[1].operands[..],
            [Operand::Reg(4), Operand::Imm(0x2000)]
        );
        assert_eq!(
            listing.insts[2].operands[..],
            [Operand::label("done"), Operand::Reg(4)]
        );
    }

    #[test]
    fn special_register_and_negative_immediate() {
        let listing = load("MVR GPU, 7\nSCRLBFR i:-1, i:0");
        assert_eq!(
            listing.insts[0].operands[0],
            Operand::Special(SpecialReg::Gpu)
        );
        assert_eq!(listing.insts[1].operands[0], Operand::Imm(-1));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse_listing("MVR i:1, 4\nFROB 1, 2\n").unwrap_err();
        assert_eq!(err.location.line_number, 2);
        assert!(err.message.contains("unknown opcode"));

        let err = parse_listing("MVR i:zz$, 4\n").unwrap_err();
        assert!(err.message.contains("malformed immediate"));

        let err = parse_listing("x: MVR i:1, 4\nx: HALT\n").unwrap_err();
        assert!(err.message.contains("duplicate label"));
    }

    #[test]
    fn comments_are_dropped() {
        let listing = load("MVR i:1, 4  // set up\nHALT // done");
        assert!(listing.insts.iter().all(|i| i.comment.is_none()));
    }

    #[test]
    fn print_reload_round_trip() {
        let original = load(
            "init: MVR i:0x7FFF, 3\n\
             MVR i:0x7FFF, 4\n\
             JMP func_main\n\
             func_main:\n\
             MVR i:7, 31\n\
             MULT 31, i:6\n\
             HALT\n\
             tail:\n",
        );
        let reloaded = load(&original.to_string());
        assert_eq!(original, reloaded);
    }
}
