//! The instruction encoding.
//!
//! Code is a flat byte stream: one opcode byte followed by its operands.
//! Index and jump operands are 4 little-endian bytes; jump targets are
//! absolute offsets into the stream. `MakeClass` and `MakeObject` carry a
//! count-prefixed list of name-table indices.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    PushNil,
    PushBool,
    Pop,
    Dup,
    Dup2,
    Swap,
    Sink,
    LoadConst,
    LoadLocal,
    SaveLocal,
    LoadClose,
    SaveClose,
    LoadMember,
    SaveMember,
    LoadIndex,
    SaveIndex,
    MakeFunction,
    MakeClass,
    MakeArray,
    MakeTable,
    MakeObject,
    MakeIter,
    NextIterOrJump,
    IterIndex,
    Jump,
    JumpFalse,
    JumpTrueElsePop,
    JumpFalseElsePop,
    Call,
    Return,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Coalesce,
    Not,
    Negate,
    Print,
    Raise,
    PushCatch,
    PopCatch,
    LoadExtension,
}

/// Operand layout of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    /// One immediate byte.
    Byte,
    /// Four little-endian bytes: an index or an absolute jump target.
    Quad,
    /// Count byte, flags byte, then count quads of name indices.
    ClassList,
    /// Count byte, then count quads of name indices.
    NameList,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match b {
            0 => Nop,
            1 => PushNil,
            2 => PushBool,
            3 => Pop,
            4 => Dup,
            5 => Dup2,
            6 => Swap,
            7 => Sink,
            8 => LoadConst,
            9 => LoadLocal,
            10 => SaveLocal,
            11 => LoadClose,
            12 => SaveClose,
            13 => LoadMember,
            14 => SaveMember,
            15 => LoadIndex,
            16 => SaveIndex,
            17 => MakeFunction,
            18 => MakeClass,
            19 => MakeArray,
            20 => MakeTable,
            21 => MakeObject,
            22 => MakeIter,
            23 => NextIterOrJump,
            24 => IterIndex,
            25 => Jump,
            26 => JumpFalse,
            27 => JumpTrueElsePop,
            28 => JumpFalseElsePop,
            29 => Call,
            30 => Return,
            31 => Add,
            32 => Sub,
            33 => Mul,
            34 => Div,
            35 => Mod,
            36 => Pow,
            37 => Lt,
            38 => Gt,
            39 => Le,
            40 => Ge,
            41 => Eq,
            42 => Ne,
            43 => And,
            44 => Or,
            45 => Coalesce,
            46 => Not,
            47 => Negate,
            48 => Print,
            49 => Raise,
            50 => PushCatch,
            51 => PopCatch,
            52 => LoadExtension,
            _ => return None,
        })
    }

    pub fn operands(self) -> Operands {
        use Opcode::*;
        match self {
            PushBool | MakeFunction | Call => Operands::Byte,
            LoadConst | LoadLocal | SaveLocal | LoadClose | SaveClose | LoadMember
            | SaveMember | MakeArray | MakeTable | Jump | JumpFalse | JumpTrueElsePop
            | JumpFalseElsePop | NextIterOrJump | PushCatch | LoadExtension => Operands::Quad,
            MakeClass => Operands::ClassList,
            MakeObject => Operands::NameList,
            _ => Operands::None,
        }
    }
}

pub fn read_u32(code: &[u8], at: usize) -> Option<u32> {
    let bytes = code.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decodes the opcode at `at` and returns it with the offset of the next
/// instruction. `None` means a malformed or truncated stream.
pub fn next_op(code: &[u8], at: usize) -> Option<(Opcode, usize)> {
    let op = Opcode::from_byte(*code.get(at)?)?;
    let end = match op.operands() {
        Operands::None => at + 1,
        Operands::Byte => at + 2,
        Operands::Quad => at + 5,
        Operands::ClassList => {
            let count = *code.get(at + 1)? as usize;
            at + 3 + count * 4
        }
        Operands::NameList => {
            let count = *code.get(at + 1)? as usize;
            at + 2 + count * 4
        }
    };
    if end > code.len() {
        return None;
    }
    Some((op, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        for b in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(b) {
                assert_eq!(op as u8, b);
            }
        }
        assert_eq!(Opcode::from_byte(Opcode::LoadExtension as u8 + 1), None);
    }

    #[test]
    fn next_op_steps_operands() {
        let code = [
            Opcode::PushBool as u8,
            1,
            Opcode::Jump as u8,
            9,
            0,
            0,
            0,
            Opcode::Pop as u8,
        ];
        let (op, at) = next_op(&code, 0).unwrap();
        assert_eq!(op, Opcode::PushBool);
        let (op, at) = next_op(&code, at).unwrap();
        assert_eq!(op, Opcode::Jump);
        assert_eq!(read_u32(&code, 3), Some(9));
        let (op, at) = next_op(&code, at).unwrap();
        assert_eq!(op, Opcode::Pop);
        assert_eq!(at, code.len());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let code = [Opcode::LoadConst as u8, 1, 0];
        assert_eq!(next_op(&code, 0), None);
    }
}
