use super::Code;
use crate::arena::{CapacityError, CapacityResult};
use crate::bytecode::{self, OP_BREAK, OP_CONTINUE, OP_GOTOBK, OP_GOTOFW};

/// Most jumps one unset label can collect before it must be set.
pub const MAX_PENDING_JUMPS: usize = 64;

/// A jump target that may be referred to before its position is known.
/// Jumps to an unset label are recorded and patched when it is set.
#[derive(Debug, Clone)]
pub enum Label {
    Unset(Vec<usize>),
    Set(usize),
}

impl Default for Label {
    fn default() -> Self {
        Label::Unset(Vec::new())
    }
}

impl Label {
    pub fn new() -> Self {
        Label::default()
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Label::Set(_))
    }

    pub fn has_pending(&self) -> bool {
        matches!(self, Label::Unset(p) if !p.is_empty())
    }

    /// Register the jump instruction already emitted at `at`.
    pub fn jump_from(&mut self, code: &mut Code, at: usize) -> CapacityResult<()> {
        match self {
            Label::Set(pos) => {
                resolve(code, at, *pos);
                Ok(())
            }
            Label::Unset(pending) => {
                if pending.len() >= MAX_PENDING_JUMPS {
                    return Err(CapacityError::TooManyJumps);
                }
                pending.push(at);
                Ok(())
            }
        }
    }

    /// Fix the label at `pos` and patch every jump waiting on it.
    pub fn set(&mut self, code: &mut Code, pos: usize) {
        if let Label::Unset(pending) = self {
            for &at in pending.iter() {
                resolve(code, at, pos);
            }
        }
        *self = Label::Set(pos);
    }
}

/// Rewrite the jump at `at` to land on `pos`, choosing the direction.
fn resolve(code: &mut Code, at: usize, pos: usize) {
    let mut op = code.op_at(at);
    let dist = if pos > at {
        if matches!(op, OP_GOTOBK | OP_CONTINUE) {
            op = OP_GOTOFW;
        }
        pos - at
    } else {
        if matches!(op, OP_GOTOFW | OP_BREAK) {
            op = OP_GOTOBK;
        }
        at - pos
    };
    code.set(at, bytecode::encode(op, dist as u32));
}
