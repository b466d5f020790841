//! Static bytecode analysis.
//!
//! A single linear pass estimates the value-stack and catch-stack depth a
//! code object can reach, so frames can size their stacks up front. The
//! scan follows the stream in order rather than the jump graph; deltas are
//! chosen so the estimate never undershoots, and frames treat it as a
//! capacity hint in any case.

use crate::{next_op, Opcode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeHints {
    pub max_stack: usize,
    pub max_catch: usize,
}

pub fn analyze(code: &[u8]) -> CodeHints {
    let mut depth: isize = 0;
    let mut catch: isize = 0;
    let mut hints = CodeHints::default();
    let mut at = 0;
    while at < code.len() {
        let Some((op, next)) = next_op(code, at) else {
            break;
        };
        if op == Opcode::PushCatch {
            catch += 1;
            hints.max_catch = hints.max_catch.max(catch as usize);
            // A taken handler re-enters with the raised value pushed.
            hints.max_stack = hints.max_stack.max((depth + 1).max(0) as usize);
        } else if op == Opcode::PopCatch {
            catch = (catch - 1).max(0);
        }
        depth += stack_delta(op, code, at);
        depth = depth.max(0);
        hints.max_stack = hints.max_stack.max(depth as usize);
        at = next;
    }
    hints
}

fn stack_delta(op: Opcode, code: &[u8], at: usize) -> isize {
    use Opcode::*;
    match op {
        PushNil | PushBool | LoadConst | LoadLocal | LoadClose | MakeFunction | IterIndex
        | NextIterOrJump | Dup => 1,
        Dup2 => 2,
        Pop | Return | Raise | Print | SaveMember | LoadIndex | Add | Sub | Mul | Div | Mod
        | Pow | Lt | Gt | Le | Ge | Eq | Ne | And | Or | Coalesce => -1,
        SaveIndex => -2,
        Call => -(byte_operand(code, at) as isize),
        MakeArray => 1 - quad_operand(code, at) as isize,
        MakeTable => 1 - 2 * quad_operand(code, at) as isize,
        MakeObject => 1 - byte_operand(code, at) as isize,
        MakeClass => {
            // pops the refname string, optional init and superclass, and
            // every member initializer
            let count = byte_operand(code, at) as isize;
            let flags = code.get(at + 2).copied().unwrap_or(0);
            -count - (flags & 1) as isize - ((flags >> 1) & 1) as isize
        }
        // JumpFalse pops its condition; the else-pop variants keep the
        // value on one edge, so treat them as depth-neutral.
        JumpFalse => -1,
        _ => 0,
    }
}

fn byte_operand(code: &[u8], at: usize) -> u8 {
    code.get(at + 1).copied().unwrap_or(0)
}

fn quad_operand(code: &[u8], at: usize) -> u32 {
    crate::read_u32(code, at + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    #[test]
    fn straight_line_depth() {
        let mut code = vec![Opcode::PushNil as u8, Opcode::PushNil as u8];
        code.push(Opcode::Add as u8);
        code.push(Opcode::Print as u8);
        let hints = analyze(&code);
        assert_eq!(hints.max_stack, 2);
        assert_eq!(hints.max_catch, 0);
    }

    #[test]
    fn call_pops_its_arguments() {
        // callee + 3 args, call leaves one result
        let code = vec![
            Opcode::PushNil as u8,
            Opcode::PushNil as u8,
            Opcode::PushNil as u8,
            Opcode::PushNil as u8,
            Opcode::Call as u8,
            3,
            Opcode::Pop as u8,
        ];
        let hints = analyze(&code);
        assert_eq!(hints.max_stack, 4);
    }

    #[test]
    fn nested_catch_depth() {
        let mut code = vec![Opcode::PushCatch as u8];
        code.extend_from_slice(&quad(0));
        code.push(Opcode::PushCatch as u8);
        code.extend_from_slice(&quad(0));
        code.push(Opcode::PopCatch as u8);
        code.push(Opcode::PopCatch as u8);
        let hints = analyze(&code);
        assert_eq!(hints.max_catch, 2);
        // handlers push the raised value
        assert!(hints.max_stack >= 1);
    }
}
