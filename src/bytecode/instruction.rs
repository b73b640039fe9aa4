use std::fmt;

use super::writer::ByteWriter;
use super::{
    TypeTag, binary_op_from_id, binary_op_id, binary_op_name, unary_op_from_id, unary_op_id, unary_op_name,
};
use crate::ir::{BinaryOp, UnaryOp};

// ── Opcodes ──────────────────────────────────────────────────────────

/// One-byte instruction codes. Operands follow the opcode big-endian;
/// jump targets are byte offsets from the start of the function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    ConstantNil = 0,
    /// `u8` 0 or 1
    ConstantBoolean = 1,
    /// `u16` constant index
    ConstantLong = 2,
    /// `u16` constant index
    ConstantDouble = 3,
    /// `u16` constant index
    ConstantString = 4,
    /// `u16` element count; elements are popped, first element deepest
    CreateArray = 5,
    /// `u16` pair count; key/value pairs are popped, first pair deepest
    CreateObject = 6,
    /// pops `to`, then `from`
    CreateRange = 7,
    /// `u16` slot
    LoadLocal = 8,
    /// `u16` slot
    StoreLocal = 9,
    /// `u16` level, `u16` slot
    LoadUpvalue = 10,
    /// `u16` level, `u16` slot
    StoreUpvalue = 11,
    /// `u16` string constant with the global's name
    LoadGlobal = 12,
    /// `u16` string constant with the global's name
    StoreGlobal = 13,
    /// pops key, then target
    LoadMember = 14,
    /// pops value, key, then target
    StoreMember = 15,
    /// `u16` argument count; arguments sit above the callee
    Call = 16,
    Return = 17,
    /// `u8` operator id
    BinaryOperation = 18,
    /// `u8` operator id
    UnaryOperation = 19,
    /// `u16` target
    Jump = 20,
    /// `u8` condition, `u16` target; pops the tested boolean
    JumpIf = 21,
    /// `u16` function id
    LoadFunction = 22,
    Pop = 23,
    Dup = 24,
    Throw = 25,
    /// `u8` type tag; peeks, pushes a boolean
    TestType = 26,
    Size = 27,
    /// exchanges the two topmost values
    Swap2 = 28,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0 => Opcode::ConstantNil,
            1 => Opcode::ConstantBoolean,
            2 => Opcode::ConstantLong,
            3 => Opcode::ConstantDouble,
            4 => Opcode::ConstantString,
            5 => Opcode::CreateArray,
            6 => Opcode::CreateObject,
            7 => Opcode::CreateRange,
            8 => Opcode::LoadLocal,
            9 => Opcode::StoreLocal,
            10 => Opcode::LoadUpvalue,
            11 => Opcode::StoreUpvalue,
            12 => Opcode::LoadGlobal,
            13 => Opcode::StoreGlobal,
            14 => Opcode::LoadMember,
            15 => Opcode::StoreMember,
            16 => Opcode::Call,
            17 => Opcode::Return,
            18 => Opcode::BinaryOperation,
            19 => Opcode::UnaryOperation,
            20 => Opcode::Jump,
            21 => Opcode::JumpIf,
            22 => Opcode::LoadFunction,
            23 => Opcode::Pop,
            24 => Opcode::Dup,
            25 => Opcode::Throw,
            26 => Opcode::TestType,
            27 => Opcode::Size,
            28 => Opcode::Swap2,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::ConstantNil => "CONSTANT_NIL",
            Opcode::ConstantBoolean => "CONSTANT_BOOLEAN",
            Opcode::ConstantLong => "CONSTANT_LONG",
            Opcode::ConstantDouble => "CONSTANT_DOUBLE",
            Opcode::ConstantString => "CONSTANT_STRING",
            Opcode::CreateArray => "CREATE_ARRAY",
            Opcode::CreateObject => "CREATE_OBJECT",
            Opcode::CreateRange => "CREATE_RANGE",
            Opcode::LoadLocal => "LOAD_LOCAL",
            Opcode::StoreLocal => "STORE_LOCAL",
            Opcode::LoadUpvalue => "LOAD_UPVALUE",
            Opcode::StoreUpvalue => "STORE_UPVALUE",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::LoadMember => "LOAD_MEMBER",
            Opcode::StoreMember => "STORE_MEMBER",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::BinaryOperation => "BINARY_OPERATION",
            Opcode::UnaryOperation => "UNARY_OPERATION",
            Opcode::Jump => "JUMP",
            Opcode::JumpIf => "JUMP_IF",
            Opcode::LoadFunction => "LOAD_FUNCTION",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Throw => "THROW",
            Opcode::TestType => "TEST_TYPE",
            Opcode::Size => "SIZE",
            Opcode::Swap2 => "SWAP2",
        }
    }

    /// Operand bytes following the opcode.
    pub fn operand_size(self) -> usize {
        match self {
            Opcode::ConstantBoolean | Opcode::BinaryOperation | Opcode::UnaryOperation | Opcode::TestType => 1,
            Opcode::ConstantLong
            | Opcode::ConstantDouble
            | Opcode::ConstantString
            | Opcode::CreateArray
            | Opcode::CreateObject
            | Opcode::LoadLocal
            | Opcode::StoreLocal
            | Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::Call
            | Opcode::Jump
            | Opcode::LoadFunction => 2,
            Opcode::JumpIf => 3,
            Opcode::LoadUpvalue | Opcode::StoreUpvalue => 4,
            _ => 0,
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    IfTrue = 0,
    IfFalse = 1,
}

impl Condition {
    pub fn from_u8(byte: u8) -> Option<Condition> {
        match byte {
            0 => Some(Condition::IfTrue),
            1 => Some(Condition::IfFalse),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Condition::IfTrue => "IF_TRUE",
            Condition::IfFalse => "IF_FALSE",
        }
    }

    pub fn holds(self, value: bool) -> bool {
        match self {
            Condition::IfTrue => value,
            Condition::IfFalse => !value,
        }
    }
}

// ── Decoded instructions ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{op:02x} at offset {offset}")]
    UnknownOpcode { op: u8, offset: usize },
    #[error("unknown jump condition {value} at offset {offset}")]
    UnknownCondition { value: u8, offset: usize },
    #[error("unknown binary operator {value} at offset {offset}")]
    UnknownBinaryOp { value: u8, offset: usize },
    #[error("unknown unary operator {value} at offset {offset}")]
    UnknownUnaryOp { value: u8, offset: usize },
    #[error("unknown type tag {value} at offset {offset}")]
    UnknownTypeTag { value: u8, offset: usize },
    #[error("truncated {op} instruction at offset {offset}")]
    Truncated { op: &'static str, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    ConstantNil,
    ConstantBoolean(bool),
    ConstantLong(u16),
    ConstantDouble(u16),
    ConstantString(u16),
    CreateArray(u16),
    CreateObject(u16),
    CreateRange,
    LoadLocal(u16),
    StoreLocal(u16),
    LoadUpvalue { level: u16, index: u16 },
    StoreUpvalue { level: u16, index: u16 },
    LoadGlobal(u16),
    StoreGlobal(u16),
    LoadMember,
    StoreMember,
    Call(u16),
    Return,
    Binary(BinaryOp),
    Unary(UnaryOp),
    Jump(u16),
    JumpIf(Condition, u16),
    LoadFunction(u16),
    Pop,
    Dup,
    Throw,
    TestType(TypeTag),
    Size,
    Swap2,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::ConstantNil => Opcode::ConstantNil,
            Instruction::ConstantBoolean(_) => Opcode::ConstantBoolean,
            Instruction::ConstantLong(_) => Opcode::ConstantLong,
            Instruction::ConstantDouble(_) => Opcode::ConstantDouble,
            Instruction::ConstantString(_) => Opcode::ConstantString,
            Instruction::CreateArray(_) => Opcode::CreateArray,
            Instruction::CreateObject(_) => Opcode::CreateObject,
            Instruction::CreateRange => Opcode::CreateRange,
            Instruction::LoadLocal(_) => Opcode::LoadLocal,
            Instruction::StoreLocal(_) => Opcode::StoreLocal,
            Instruction::LoadUpvalue { .. } => Opcode::LoadUpvalue,
            Instruction::StoreUpvalue { .. } => Opcode::StoreUpvalue,
            Instruction::LoadGlobal(_) => Opcode::LoadGlobal,
            Instruction::StoreGlobal(_) => Opcode::StoreGlobal,
            Instruction::LoadMember => Opcode::LoadMember,
            Instruction::StoreMember => Opcode::StoreMember,
            Instruction::Call(_) => Opcode::Call,
            Instruction::Return => Opcode::Return,
            Instruction::Binary(_) => Opcode::BinaryOperation,
            Instruction::Unary(_) => Opcode::UnaryOperation,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::JumpIf(..) => Opcode::JumpIf,
            Instruction::LoadFunction(_) => Opcode::LoadFunction,
            Instruction::Pop => Opcode::Pop,
            Instruction::Dup => Opcode::Dup,
            Instruction::Throw => Opcode::Throw,
            Instruction::TestType(_) => Opcode::TestType,
            Instruction::Size => Opcode::Size,
            Instruction::Swap2 => Opcode::Swap2,
        }
    }

    /// Encoded length including the opcode byte.
    pub fn encoded_len(&self) -> usize {
        1 + self.opcode().operand_size()
    }

    pub fn encode(&self, out: &mut ByteWriter) {
        out.u8(self.opcode().into());
        match *self {
            Instruction::ConstantBoolean(b) => out.bool(b),
            Instruction::ConstantLong(n)
            | Instruction::ConstantDouble(n)
            | Instruction::ConstantString(n)
            | Instruction::CreateArray(n)
            | Instruction::CreateObject(n)
            | Instruction::LoadLocal(n)
            | Instruction::StoreLocal(n)
            | Instruction::LoadGlobal(n)
            | Instruction::StoreGlobal(n)
            | Instruction::Call(n)
            | Instruction::Jump(n)
            | Instruction::LoadFunction(n) => out.u16(n),
            Instruction::LoadUpvalue { level, index } | Instruction::StoreUpvalue { level, index } => {
                out.u16(level);
                out.u16(index);
            }
            Instruction::Binary(op) => out.u8(binary_op_id(op)),
            Instruction::Unary(op) => out.u8(unary_op_id(op)),
            Instruction::JumpIf(cond, target) => {
                out.u8(cond as u8);
                out.u16(target);
            }
            Instruction::TestType(tag) => out.u8(tag as u8),
            _ => {}
        }
    }

    /// Decodes the instruction at `offset`, returning it with the offset of
    /// the next instruction.
    pub fn decode(code: &[u8], offset: usize) -> Result<(Instruction, usize), DecodeError> {
        let byte = *code.get(offset).ok_or(DecodeError::Truncated { op: "opcode", offset })?;
        let op = Opcode::from_u8(byte).ok_or(DecodeError::UnknownOpcode { op: byte, offset })?;
        let next = offset + 1 + op.operand_size();
        if next > code.len() {
            return Err(DecodeError::Truncated { op: op.name(), offset });
        }
        let operands = &code[offset + 1..next];
        let u8_at = |i: usize| operands[i];
        let u16_at = |i: usize| u16::from_be_bytes([operands[i], operands[i + 1]]);

        let instruction = match op {
            Opcode::ConstantNil => Instruction::ConstantNil,
            Opcode::ConstantBoolean => Instruction::ConstantBoolean(u8_at(0) != 0),
            Opcode::ConstantLong => Instruction::ConstantLong(u16_at(0)),
            Opcode::ConstantDouble => Instruction::ConstantDouble(u16_at(0)),
            Opcode::ConstantString => Instruction::ConstantString(u16_at(0)),
            Opcode::CreateArray => Instruction::CreateArray(u16_at(0)),
            Opcode::CreateObject => Instruction::CreateObject(u16_at(0)),
            Opcode::CreateRange => Instruction::CreateRange,
            Opcode::LoadLocal => Instruction::LoadLocal(u16_at(0)),
            Opcode::StoreLocal => Instruction::StoreLocal(u16_at(0)),
            Opcode::LoadUpvalue => Instruction::LoadUpvalue { level: u16_at(0), index: u16_at(2) },
            Opcode::StoreUpvalue => Instruction::StoreUpvalue { level: u16_at(0), index: u16_at(2) },
            Opcode::LoadGlobal => Instruction::LoadGlobal(u16_at(0)),
            Opcode::StoreGlobal => Instruction::StoreGlobal(u16_at(0)),
            Opcode::LoadMember => Instruction::LoadMember,
            Opcode::StoreMember => Instruction::StoreMember,
            Opcode::Call => Instruction::Call(u16_at(0)),
            Opcode::Return => Instruction::Return,
            Opcode::BinaryOperation => {
                let value = u8_at(0);
                let op = binary_op_from_id(value).ok_or(DecodeError::UnknownBinaryOp { value, offset })?;
                Instruction::Binary(op)
            }
            Opcode::UnaryOperation => {
                let value = u8_at(0);
                let op = unary_op_from_id(value).ok_or(DecodeError::UnknownUnaryOp { value, offset })?;
                Instruction::Unary(op)
            }
            Opcode::Jump => Instruction::Jump(u16_at(0)),
            Opcode::JumpIf => {
                let value = u8_at(0);
                let cond = Condition::from_u8(value).ok_or(DecodeError::UnknownCondition { value, offset })?;
                Instruction::JumpIf(cond, u16_at(1))
            }
            Opcode::LoadFunction => Instruction::LoadFunction(u16_at(0)),
            Opcode::Pop => Instruction::Pop,
            Opcode::Dup => Instruction::Dup,
            Opcode::Throw => Instruction::Throw,
            Opcode::TestType => {
                let value = u8_at(0);
                let tag = TypeTag::from_u8(value).ok_or(DecodeError::UnknownTypeTag { value, offset })?;
                Instruction::TestType(tag)
            }
            Opcode::Size => Instruction::Size,
            Opcode::Swap2 => Instruction::Swap2,
        };
        Ok((instruction, next))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match self {
            Instruction::ConstantBoolean(b) => write!(f, "{name} {b}"),
            Instruction::ConstantLong(n)
            | Instruction::ConstantDouble(n)
            | Instruction::ConstantString(n)
            | Instruction::LoadGlobal(n)
            | Instruction::StoreGlobal(n) => write!(f, "{name} #{n}"),
            Instruction::CreateArray(n)
            | Instruction::CreateObject(n)
            | Instruction::LoadLocal(n)
            | Instruction::StoreLocal(n)
            | Instruction::Call(n)
            | Instruction::LoadFunction(n) => write!(f, "{name} {n}"),
            Instruction::LoadUpvalue { level, index } | Instruction::StoreUpvalue { level, index } => {
                write!(f, "{name} {level} {index}")
            }
            Instruction::Binary(op) => write!(f, "{name} {}", binary_op_name(*op)),
            Instruction::Unary(op) => write!(f, "{name} {}", unary_op_name(*op)),
            Instruction::Jump(target) => write!(f, "{name} {target:04}"),
            Instruction::JumpIf(cond, target) => write!(f, "{name} {} {target:04}", cond.name()),
            Instruction::TestType(tag) => write!(f, "{name} {}", tag.name()),
            _ => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(instr: Instruction) -> Vec<u8> {
        let mut out = ByteWriter::new();
        instr.encode(&mut out);
        out.into_inner()
    }

    #[test]
    fn opcode_bytes_are_stable() {
        assert_eq!(u8::from(Opcode::ConstantNil), 0);
        assert_eq!(u8::from(Opcode::LoadUpvalue), 10);
        assert_eq!(u8::from(Opcode::JumpIf), 21);
        assert_eq!(u8::from(Opcode::Swap2), 28);
        for byte in 0..=28 {
            assert_eq!(Opcode::from_u8(byte).map(u8::from), Some(byte));
        }
        assert_eq!(Opcode::from_u8(29), None);
    }

    #[test]
    fn encodes_operands_big_endian() {
        assert_eq!(bytes(Instruction::ConstantLong(0x0102)), vec![2, 0x01, 0x02]);
        assert_eq!(bytes(Instruction::LoadUpvalue { level: 1, index: 2 }), vec![10, 0, 1, 0, 2]);
        assert_eq!(bytes(Instruction::JumpIf(Condition::IfFalse, 7)), vec![21, 1, 0, 7]);
        assert_eq!(bytes(Instruction::Binary(BinaryOp::Gt)), vec![18, 8]);
        assert_eq!(bytes(Instruction::TestType(TypeTag::Range)), vec![26, 7]);
    }

    #[test]
    fn encoded_length_matches_len() {
        let samples = [
            Instruction::ConstantNil,
            Instruction::ConstantBoolean(true),
            Instruction::StoreUpvalue { level: 0, index: 0 },
            Instruction::JumpIf(Condition::IfTrue, 0),
            Instruction::Swap2,
        ];
        for instr in samples {
            assert_eq!(bytes(instr).len(), instr.encoded_len(), "{instr}");
        }
    }

    #[test]
    fn decode_walks_a_stream() {
        let code = [2, 0, 0, 2, 0, 1, 18, 0, 17];
        let (first, next) = Instruction::decode(&code, 0).unwrap();
        assert_eq!(first, Instruction::ConstantLong(0));
        let (second, next) = Instruction::decode(&code, next).unwrap();
        assert_eq!(second, Instruction::ConstantLong(1));
        let (third, next) = Instruction::decode(&code, next).unwrap();
        assert_eq!(third, Instruction::Binary(BinaryOp::Add));
        assert_eq!(Instruction::decode(&code, next).unwrap(), (Instruction::Return, 9));
    }

    #[test]
    fn decode_rejects_bad_bytes() {
        assert_eq!(Instruction::decode(&[99], 0), Err(DecodeError::UnknownOpcode { op: 99, offset: 0 }));
        assert_eq!(Instruction::decode(&[21, 5, 0, 0], 0), Err(DecodeError::UnknownCondition { value: 5, offset: 0 }));
        assert_eq!(Instruction::decode(&[18, 14], 0), Err(DecodeError::UnknownBinaryOp { value: 14, offset: 0 }));
        assert_eq!(Instruction::decode(&[2, 0], 0), Err(DecodeError::Truncated { op: "CONSTANT_LONG", offset: 0 }));
    }

    #[test]
    fn display_names() {
        assert_eq!(Instruction::JumpIf(Condition::IfFalse, 12).to_string(), "JUMP_IF IF_FALSE 0012");
        assert_eq!(Instruction::Binary(BinaryOp::Ge).to_string(), "BINARY_OPERATION GREATER_EQ");
        assert_eq!(Instruction::ConstantString(3).to_string(), "CONSTANT_STRING #3");
    }
}
