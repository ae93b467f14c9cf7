//! Instruction set for the kiln minimal runtime
//!
//! Every instruction is a single opcode byte followed by a fixed number of
//! operand bytes (see [`Opcode::operand_size`]).
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Locals and module attributes
//! - 0x20-0x2F: Arithmetic
//! - 0x50-0x5F: Comparison
//! - 0x70-0x7F: Logical
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Calls and return
//! - 0xC0-0xCF: Tuples

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,

    /// Push `None`
    ConstNone = 0x04,
    /// Push `true`
    ConstTrue = 0x05,
    /// Push `false`
    ConstFalse = 0x06,
    /// Push 64-bit integer (operand: i64)
    ConstInt = 0x07,
    /// Push 64-bit float (operand: f64)
    ConstFloat = 0x08,
    /// Load constant from the module constant pool (operand: u32 index)
    LoadConst = 0x0A,

    // ===== Locals and Attributes (0x10-0x1F) =====
    /// Load local slot onto stack (operand: u16 slot)
    LoadLocal = 0x10,
    /// Pop into local slot (operand: u16 slot)
    StoreLocal = 0x11,
    /// Load module attribute (operand: u16 attribute slot)
    LoadAttr = 0x18,
    /// Pop into module attribute (operand: u16 attribute slot)
    StoreAttr = 0x19,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Addition: pop b, pop a, push a + b
    Add = 0x20,
    /// Subtraction: pop b, pop a, push a - b
    Sub = 0x21,
    /// Multiplication: pop b, pop a, push a * b
    Mul = 0x22,
    /// Remainder: pop b, pop a, push a % b
    Rem = 0x24,
    /// Negation: pop a, push -a
    Neg = 0x25,

    // ===== Comparison (0x50-0x5F) =====
    /// Equality: pop b, pop a, push a == b
    Eq = 0x50,
    /// Inequality: pop b, pop a, push a != b
    Ne = 0x51,
    /// Less than: pop b, pop a, push a < b
    Lt = 0x52,
    /// Less or equal: pop b, pop a, push a <= b
    Le = 0x53,
    /// Greater than: pop b, pop a, push a > b
    Gt = 0x54,
    /// Greater or equal: pop b, pop a, push a >= b
    Ge = 0x55,

    // ===== Logical (0x70-0x7F) =====
    /// Logical not: pop a, push !a
    Not = 0x70,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 relative to next instruction)
    Jmp = 0x90,
    /// Pop condition, jump if false (operand: i32)
    JmpIfFalse = 0x91,
    /// Pop condition, jump if true (operand: i32)
    JmpIfTrue = 0x92,

    // ===== Calls (0xA0-0xAF) =====
    /// Call another method of the same module (operands: u16 function, u8 argc)
    CallMethod = 0xA0,
    /// Call a named operator (operands: u16 operator table slot, u8 argc)
    CallOp = 0xA1,
    /// Return top of stack
    Return = 0xA3,

    // ===== Tuples (0xC0-0xCF) =====
    /// Pop `n` values, push a tuple of them (operand: u16 n)
    MakeTuple = 0xC0,
    /// Pop a tuple, push its element (operand: u16 index)
    TupleGet = 0xC1,
}

impl Opcode {
    /// Convert a byte to an opcode
    ///
    /// Returns `None` if the byte doesn't correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x04 => Some(Self::ConstNone),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstInt),
            0x08 => Some(Self::ConstFloat),
            0x0A => Some(Self::LoadConst),

            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),
            0x18 => Some(Self::LoadAttr),
            0x19 => Some(Self::StoreAttr),

            0x20 => Some(Self::Add),
            0x21 => Some(Self::Sub),
            0x22 => Some(Self::Mul),
            0x24 => Some(Self::Rem),
            0x25 => Some(Self::Neg),

            0x50 => Some(Self::Eq),
            0x51 => Some(Self::Ne),
            0x52 => Some(Self::Lt),
            0x53 => Some(Self::Le),
            0x54 => Some(Self::Gt),
            0x55 => Some(Self::Ge),

            0x70 => Some(Self::Not),

            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfFalse),
            0x92 => Some(Self::JmpIfTrue),

            0xA0 => Some(Self::CallMethod),
            0xA1 => Some(Self::CallOp),
            0xA3 => Some(Self::Return),

            0xC0 => Some(Self::MakeTuple),
            0xC1 => Some(Self::TupleGet),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the mnemonic name of this opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::ConstNone => "CONST_NONE",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstInt => "CONST_INT",
            Self::ConstFloat => "CONST_FLOAT",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::LoadAttr => "LOAD_ATTR",
            Self::StoreAttr => "STORE_ATTR",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Rem => "REM",
            Self::Neg => "NEG",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Not => "NOT",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::JmpIfTrue => "JMP_IF_TRUE",
            Self::CallMethod => "CALL_METHOD",
            Self::CallOp => "CALL_OP",
            Self::Return => "RETURN",
            Self::MakeTuple => "MAKE_TUPLE",
            Self::TupleGet => "TUPLE_GET",
        }
    }

    /// Number of operand bytes following the opcode byte
    pub fn operand_size(self) -> usize {
        match self {
            Self::Nop
            | Self::Pop
            | Self::Dup
            | Self::ConstNone
            | Self::ConstTrue
            | Self::ConstFalse
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Rem
            | Self::Neg
            | Self::Eq
            | Self::Ne
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::Not
            | Self::Return => 0,

            Self::LoadLocal
            | Self::StoreLocal
            | Self::LoadAttr
            | Self::StoreAttr
            | Self::MakeTuple
            | Self::TupleGet => 2,

            // u16 target + u8 argc
            Self::CallMethod | Self::CallOp => 3,

            Self::LoadConst | Self::Jmp | Self::JmpIfFalse | Self::JmpIfTrue => 4,

            Self::ConstInt | Self::ConstFloat => 8,
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::JmpIfFalse | Self::JmpIfTrue)
    }

    /// Check if this opcode is a call instruction
    pub fn is_call(self) -> bool {
        matches!(self, Self::CallMethod | Self::CallOp)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::Jmp)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[Opcode] = &[
        Opcode::Nop,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::ConstNone,
        Opcode::ConstTrue,
        Opcode::ConstFalse,
        Opcode::ConstInt,
        Opcode::ConstFloat,
        Opcode::LoadConst,
        Opcode::LoadLocal,
        Opcode::StoreLocal,
        Opcode::LoadAttr,
        Opcode::StoreAttr,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Rem,
        Opcode::Neg,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Not,
        Opcode::Jmp,
        Opcode::JmpIfFalse,
        Opcode::JmpIfTrue,
        Opcode::CallMethod,
        Opcode::CallOp,
        Opcode::Return,
        Opcode::MakeTuple,
        Opcode::TupleGet,
    ];

    #[test]
    fn test_opcode_roundtrip() {
        for &opcode in ALL {
            assert_eq!(Opcode::from_u8(opcode.to_u8()), Some(opcode));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x03), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::LoadConst.name(), "LOAD_CONST");
        assert_eq!(Opcode::CallOp.to_string(), "CALL_OP");
    }

    #[test]
    fn test_jump_and_terminator_detection() {
        assert!(Opcode::Jmp.is_jump());
        assert!(Opcode::JmpIfTrue.is_jump());
        assert!(!Opcode::CallOp.is_jump());
        assert!(Opcode::Return.is_terminator());
        assert!(!Opcode::JmpIfFalse.is_terminator());
        assert!(Opcode::CallMethod.is_call());
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(Opcode::ConstInt.operand_size(), 8);
        assert_eq!(Opcode::CallOp.operand_size(), 3);
        assert_eq!(Opcode::JmpIfFalse.operand_size(), 4);
        assert_eq!(Opcode::Return.operand_size(), 0);
    }
}
