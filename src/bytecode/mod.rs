//! Binary module format: constant pool, function table, instruction stream.
//!
//! ```text
//! u32 MAGIC
//! u16 constant count, { u8 tag; payload }*
//! u16 entrypoint function id
//! u16 function count
//! { u16 FUNCTION_TAG; u32 record length; record }*
//!
//! record: u16 id, bool has_name, [u16 name], u16 argc, u16 locals,
//!         bool varargs, u16 annotation count, u16* annotations, code
//! ```
//!
//! All integers are big-endian. Function records appear in the order they
//! were finalized, not in id order.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::ir::{BinaryOp, UnaryOp};
use crate::value::Value;

pub mod disasm;
pub mod instruction;
pub mod mutf8;
pub mod reader;
pub mod writer;

pub use instruction::{Condition, DecodeError, Instruction, Opcode};
pub use reader::{ByteReader, FormatError, FormatResult, FunctionInfo, FunctionReader, Module, ModuleReader};
pub use writer::{ByteWriter, FunctionWriter, Label, ModuleWriter, WriteError, WriteResult};

pub const MAGIC: u32 = 0xB173_C0DE;
pub const FUNCTION_TAG: u16 = 0xC0DE;

pub const CONSTANT_LONG: u8 = 1;
pub const CONSTANT_DOUBLE: u8 = 2;
pub const CONSTANT_STRING: u8 = 3;

/// Placeholder written for a jump whose label is not bound yet.
pub const UNBOUND_TARGET: u16 = 0xFFFF;

// ── Constants ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Constant {
    Long(i64),
    Double(f64),
    String(String),
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Long(_) => CONSTANT_LONG,
            Constant::Double(_) => CONSTANT_DOUBLE,
            Constant::String(_) => CONSTANT_STRING,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::Long(_) => "long",
            Constant::Double(_) => "double",
            Constant::String(_) => "string",
        }
    }

    /// Interning equality: doubles compare by bit pattern, and a long never
    /// matches a double.
    pub fn same(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Long(n) => Value::Long(*n),
            Constant::Double(n) => Value::Double(*n),
            Constant::String(s) => Value::from(s.as_str()),
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Constant::Long(n) => n.hash(state),
            Constant::Double(n) => n.to_bits().hash(state),
            Constant::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Long(n) => write!(f, "{n}"),
            Constant::Double(n) => write!(f, "{}", crate::value::format_double(*n)),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

// ── Operand enumerations ─────────────────────────────────────────────

/// Type tags tested by `TEST_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Nil = 0,
    Boolean = 1,
    Long = 2,
    Double = 3,
    String = 4,
    Array = 5,
    Object = 6,
    Range = 7,
}

impl TypeTag {
    pub fn from_u8(byte: u8) -> Option<TypeTag> {
        Some(match byte {
            0 => TypeTag::Nil,
            1 => TypeTag::Boolean,
            2 => TypeTag::Long,
            3 => TypeTag::Double,
            4 => TypeTag::String,
            5 => TypeTag::Array,
            6 => TypeTag::Object,
            7 => TypeTag::Range,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "NIL",
            TypeTag::Boolean => "BOOLEAN",
            TypeTag::Long => "LONG",
            TypeTag::Double => "DOUBLE",
            TypeTag::String => "STRING",
            TypeTag::Array => "ARRAY",
            TypeTag::Object => "OBJECT",
            TypeTag::Range => "RANGE",
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (TypeTag::Nil, Value::Nil)
                | (TypeTag::Boolean, Value::Boolean(_))
                | (TypeTag::Long, Value::Long(_))
                | (TypeTag::Double, Value::Double(_))
                | (TypeTag::String, Value::String(_))
                | (TypeTag::Array, Value::Array(_))
                | (TypeTag::Object, Value::Object(_))
                | (TypeTag::Range, Value::Range { .. })
        )
    }
}

pub fn binary_op_id(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::Mod => 4,
        BinaryOp::Pow => 5,
        BinaryOp::Eq => 6,
        BinaryOp::Neq => 7,
        BinaryOp::Gt => 8,
        BinaryOp::Ge => 9,
        BinaryOp::Lt => 10,
        BinaryOp::Le => 11,
        BinaryOp::And => 12,
        BinaryOp::Or => 13,
    }
}

pub fn binary_op_from_id(id: u8) -> Option<BinaryOp> {
    Some(match id {
        0 => BinaryOp::Add,
        1 => BinaryOp::Sub,
        2 => BinaryOp::Mul,
        3 => BinaryOp::Div,
        4 => BinaryOp::Mod,
        5 => BinaryOp::Pow,
        6 => BinaryOp::Eq,
        7 => BinaryOp::Neq,
        8 => BinaryOp::Gt,
        9 => BinaryOp::Ge,
        10 => BinaryOp::Lt,
        11 => BinaryOp::Le,
        12 => BinaryOp::And,
        13 => BinaryOp::Or,
        _ => return None,
    })
}

pub fn binary_op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "ADD",
        BinaryOp::Sub => "SUB",
        BinaryOp::Mul => "MUL",
        BinaryOp::Div => "DIV",
        BinaryOp::Mod => "MOD",
        BinaryOp::Pow => "POW",
        BinaryOp::Eq => "EQ",
        BinaryOp::Neq => "NEQ",
        BinaryOp::Gt => "GREATER",
        BinaryOp::Ge => "GREATER_EQ",
        BinaryOp::Lt => "SMALLER",
        BinaryOp::Le => "SMALLER_EQ",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
    }
}

pub fn unary_op_id(op: UnaryOp) -> u8 {
    match op {
        UnaryOp::Neg => 0,
        UnaryOp::Negate => 1,
    }
}

pub fn unary_op_from_id(id: u8) -> Option<UnaryOp> {
    match id {
        0 => Some(UnaryOp::Neg),
        1 => Some(UnaryOp::Negate),
        _ => None,
    }
}

pub fn unary_op_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "NEG",
        UnaryOp::Negate => "NEGATE",
    }
}
