//! The instruction set shared by the compiler and the VM, and a listing
//! format for dumping compiled blocks.
//!
//! Every instruction is one `u32`: `[DATA:24 | OP:8]`. The operand is an
//! immediate, a constant id, a count, or a relative jump distance.

use std::fmt;

use serde::Serialize;

use crate::consts::{ConstId, Constants};

// ── Opcodes ─────────────────────────────────────────────────────────
// Values are part of the compiled-code contract; do not renumber.

pub const OP_LIT: u8 = 1;
pub const OP_DUMMY: u8 = 2;
pub const OP_COMMENT_SOL: u8 = 3;
pub const OP_ADD: u8 = 4;
pub const OP_SUB: u8 = 5;
pub const OP_MUL: u8 = 6;
pub const OP_DIV: u8 = 7;
pub const OP_END: u8 = 8;
pub const OP_EQUALS: u8 = 9;
pub const OP_CALL: u8 = 11;
pub const OP_LOCALS: u8 = 12;
pub const OP_GET: u8 = 13;
pub const OP_SET: u8 = 14;
pub const OP_PROPREF: u8 = 15;
pub const OP_IF: u8 = 16;
pub const OP_ELSEIF: u8 = 17;
pub const OP_ELSE: u8 = 18;
pub const OP_ENDIF: u8 = 19;
pub const OP_JMPELSEIF: u8 = 20;
pub const OP_WHILE: u8 = 21;
pub const OP_ENDWHILE: u8 = 22;
pub const OP_RETURN: u8 = 23;
pub const OP_REPEAT: u8 = 24;
pub const OP_UNTIL: u8 = 25;
pub const OP_NEQUALS: u8 = 26;
pub const OP_SPARE1: u8 = 27;
pub const OP_PAREN: u8 = 28;
pub const OP_NEGATE: u8 = 29;
pub const OP_NEAREQ: u8 = 30;
pub const OP_NNEAREQ: u8 = 31;
pub const OP_NOT: u8 = 32;
pub const OP_SPECIAL: u8 = 33;
pub const OP_LT: u8 = 34;
pub const OP_LTE: u8 = 35;
pub const OP_GT: u8 = 36;
pub const OP_GTE: u8 = 37;
pub const OP_SRCLINE: u8 = 38;
pub const OP_SRCFILE: u8 = 39;
pub const OP_COMMENT_EOL: u8 = 40;
pub const OP_BLANKLINE: u8 = 41;
pub const OP_COMMENT_EOFD: u8 = 42;
pub const OP_GOTOFW: u8 = 43;
pub const OP_GOTOBK: u8 = 44;
pub const OP_LABEL: u8 = 45;
pub const OP_GOTOMARKER: u8 = 46;
pub const OP_BREAK: u8 = 47;
pub const OP_CONTINUE: u8 = 48;
pub const OP_TRUE: u8 = 49;
pub const OP_FALSE: u8 = 50;
pub const OP_QUICKIF: u8 = 51;
pub const OP_THIS: u8 = 52;
pub const OP_IMMED: u8 = 53;
pub const OP_SQB: u8 = 54;
pub const OP_LOGAND: u8 = 55;
pub const OP_LOGOR: u8 = 56;
pub const OP_BITAND: u8 = 57;
pub const OP_BITOR: u8 = 58;
pub const OP_BITNOT: u8 = 59;
pub const OP_XOR: u8 = 60;
pub const OP_FOR: u8 = 61;
pub const OP_NEXT: u8 = 62;
pub const OP_ENDFOR: u8 = 63;
pub const OP_STARTESTMT: u8 = 64;
pub const OP_ENDESTMT: u8 = 65;
pub const OP_ENDESTMT2: u8 = 66;
pub const OP_VARREFLOC: u8 = 67;
pub const OP_VARREFPRM: u8 = 68;
pub const OP_VARREFSES: u8 = 69;
pub const OP_VARREFGLB: u8 = 70;
pub const OP_LITIDENT: u8 = 71;
pub const OP_MOD: u8 = 72;

/// Largest operand an instruction can carry.
pub const MAX_DATA: u32 = (1 << 24) - 1;

// ── Instruction encoding ────────────────────────────────────────────

#[inline(always)]
pub fn encode(op: u8, data: u32) -> u32 {
    op as u32 | (data & MAX_DATA) << 8
}

#[inline(always)]
pub fn op(inst: u32) -> u8 {
    (inst & 0xff) as u8
}

#[inline(always)]
pub fn data(inst: u32) -> u32 {
    inst >> 8
}

pub fn name(op: u8) -> &'static str {
    match op {
        OP_LIT => "LIT",
        OP_DUMMY => "DUMMY",
        OP_COMMENT_SOL => "COMMENT_SOL",
        OP_ADD => "ADD",
        OP_SUB => "SUB",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_END => "END",
        OP_EQUALS => "EQUALS",
        OP_CALL => "CALL",
        OP_LOCALS => "LOCALS",
        OP_GET => "GET",
        OP_SET => "SET",
        OP_PROPREF => "PROPREF",
        OP_IF => "IF",
        OP_ELSEIF => "ELSEIF",
        OP_ELSE => "ELSE",
        OP_ENDIF => "ENDIF",
        OP_JMPELSEIF => "JMPELSEIF",
        OP_WHILE => "WHILE",
        OP_ENDWHILE => "ENDWHILE",
        OP_RETURN => "RETURN",
        OP_REPEAT => "REPEAT",
        OP_UNTIL => "UNTIL",
        OP_NEQUALS => "NEQUALS",
        OP_SPARE1 => "SPARE1",
        OP_PAREN => "PAREN",
        OP_NEGATE => "NEGATE",
        OP_NEAREQ => "NEAREQ",
        OP_NNEAREQ => "NNEAREQ",
        OP_NOT => "NOT",
        OP_SPECIAL => "SPECIAL",
        OP_LT => "LT",
        OP_LTE => "LTE",
        OP_GT => "GT",
        OP_GTE => "GTE",
        OP_SRCLINE => "SRCLINE",
        OP_SRCFILE => "SRCFILE",
        OP_COMMENT_EOL => "COMMENT_EOL",
        OP_BLANKLINE => "BLANKLINE",
        OP_COMMENT_EOFD => "COMMENT_EOFD",
        OP_GOTOFW => "GOTOFW",
        OP_GOTOBK => "GOTOBK",
        OP_LABEL => "LABEL",
        OP_GOTOMARKER => "GOTOMARKER",
        OP_BREAK => "BREAK",
        OP_CONTINUE => "CONTINUE",
        OP_TRUE => "TRUE",
        OP_FALSE => "FALSE",
        OP_QUICKIF => "QUICKIF",
        OP_THIS => "THIS",
        OP_IMMED => "IMMED",
        OP_SQB => "SQB",
        OP_LOGAND => "LOGAND",
        OP_LOGOR => "LOGOR",
        OP_BITAND => "BITAND",
        OP_BITOR => "BITOR",
        OP_BITNOT => "BITNOT",
        OP_XOR => "XOR",
        OP_FOR => "FOR",
        OP_NEXT => "NEXT",
        OP_ENDFOR => "ENDFOR",
        OP_STARTESTMT => "STARTESTMT",
        OP_ENDESTMT => "ENDESTMT",
        OP_ENDESTMT2 => "ENDESTMT2",
        OP_VARREFLOC => "VARREFLOC",
        OP_VARREFPRM => "VARREFPRM",
        OP_VARREFSES => "VARREFSES",
        OP_VARREFGLB => "VARREFGLB",
        OP_LITIDENT => "LITIDENT",
        OP_MOD => "MOD",
        _ => "???",
    }
}

/// Jumps measured forward from their own index.
pub fn is_forward_jump(op: u8) -> bool {
    matches!(
        op,
        OP_IF | OP_ELSEIF | OP_QUICKIF | OP_WHILE | OP_ELSE | OP_JMPELSEIF | OP_GOTOFW | OP_BREAK | OP_FOR
    )
}

/// Jumps measured backward from their own index.
pub fn is_backward_jump(op: u8) -> bool {
    matches!(op, OP_ENDWHILE | OP_GOTOBK | OP_CONTINUE | OP_NEXT | OP_UNTIL)
}

fn takes_const(op: u8) -> bool {
    matches!(
        op,
        OP_LIT | OP_LOCALS | OP_PROPREF | OP_COMMENT_SOL | OP_COMMENT_EOL | OP_COMMENT_EOFD | OP_SRCFILE | OP_LITIDENT
    )
}

/// Where a jump at `at` lands, if `inst` is a jump.
pub fn jump_target(at: usize, inst: u32) -> Option<usize> {
    let (o, d) = (op(inst), data(inst) as usize);
    if is_forward_jump(o) {
        Some(at + d)
    } else if is_backward_jump(o) {
        at.checked_sub(d)
    } else {
        None
    }
}

// ── Listing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ListingLine {
    pub index: usize,
    pub op: &'static str,
    pub operand: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A readable dump of one compiled block; nested function bodies are
/// listed after the block that defines them.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub title: String,
    pub lines: Vec<ListingLine>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Listing>,
}

pub fn disassemble(title: &str, code: &[u32], consts: &Constants) -> Listing {
    let mut lines = Vec::with_capacity(code.len());
    let mut functions = Vec::new();
    for (index, &inst) in code.iter().enumerate() {
        let o = op(inst);
        let d = data(inst);
        let note = if takes_const(o) {
            let id = ConstId(d);
            if o == OP_LIT {
                if let Some(f) = consts.func(id) {
                    functions.push(disassemble(&format!("function {id}"), &f.code, consts));
                }
            }
            Some(consts.preview(id))
        } else {
            jump_target(index, inst).map(|t| format!("-> {t}"))
        };
        lines.push(ListingLine { index, op: name(o), operand: d, note });
    }
    Listing { title: title.to_string(), lines, functions }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "-- {} --", self.title)?;
        for l in &self.lines {
            match &l.note {
                Some(note) => writeln!(f, "{:4}  {:<12} {:>6}  {}", l.index, l.op, l.operand, note)?,
                None => writeln!(f, "{:4}  {:<12} {:>6}", l.index, l.op, l.operand)?,
            }
        }
        for func in &self.functions {
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_packs_op_low() {
        let inst = encode(OP_IMMED, 1234);
        assert_eq!(inst & 0xff, OP_IMMED as u32);
        assert_eq!(op(inst), OP_IMMED);
        assert_eq!(data(inst), 1234);
        assert_eq!(data(encode(OP_LIT, MAX_DATA)), MAX_DATA);
    }

    #[test]
    fn opcode_values_are_fixed() {
        assert_eq!(OP_LIT, 1);
        assert_eq!(OP_CALL, 11);
        assert_eq!(OP_FOR, 61);
        assert_eq!(OP_MOD, 72);
        assert_eq!(name(OP_VARREFGLB), "VARREFGLB");
    }

    #[test]
    fn jump_targets() {
        assert_eq!(jump_target(3, encode(OP_IF, 4)), Some(7));
        assert_eq!(jump_target(9, encode(OP_ENDWHILE, 6)), Some(3));
        assert_eq!(jump_target(9, encode(OP_NEXT, 5)), Some(4));
        assert_eq!(jump_target(2, encode(OP_ADD, 0)), None);
    }

    #[test]
    fn listing_notes_constants_and_jumps() {
        let mut consts = Constants::new().unwrap();
        let s = consts.find_or_create_string("hi").unwrap();
        let code = [encode(OP_LIT, s.0), encode(OP_IF, 2), encode(OP_END, 0)];
        let listing = disassemble("immediate", &code, &consts);
        assert_eq!(listing.lines[0].note.as_deref(), Some("\"hi\""));
        assert_eq!(listing.lines[1].note.as_deref(), Some("-> 3"));
        let text = listing.to_string();
        assert!(text.contains("LIT"));
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["lines"][2]["op"], "END");
    }
}
