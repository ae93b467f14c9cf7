//! Bytecode encoding and decoding utilities
//!
//! [`BytecodeWriter`] emits instructions and container fields into a growable
//! buffer; [`BytecodeReader`] reads them back with bounds checks on every
//! access. All multi-byte values are little-endian.

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown tag byte in a tagged value
    #[error("Invalid {kind} tag {tag} at offset {offset}")]
    InvalidTag {
        /// What was being decoded
        kind: &'static str,
        /// Tag value found
        tag: u8,
        /// Offset of the tag byte
        offset: usize,
    },

    /// Nested values exceed the decoder's depth limit
    #[error("Value nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// Structurally invalid value (e.g. tensor shape/data mismatch)
    #[error("Invalid value at offset {offset}: {reason}")]
    InvalidValue {
        /// Offset of the value
        offset: usize,
        /// Description of the problem
        reason: String,
    },
}

/// Bytecode writer for encoding instructions and container fields
pub struct BytecodeWriter {
    /// Internal buffer containing the encoded bytes
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of buffer)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit unsigned integer
    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_blob(value.as_bytes());
    }

    /// Emit a length-prefixed byte blob
    pub fn emit_blob(&mut self, bytes: &[u8]) {
        self.emit_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Append raw bytes without a length prefix
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    // ===== Instruction Emission =====

    /// Emit an opcode without operands
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit CONST_INT with an inline value
    pub fn emit_const_int(&mut self, value: i64) {
        self.emit_opcode(Opcode::ConstInt);
        self.emit_i64(value);
    }

    /// Emit CONST_FLOAT with an inline value
    pub fn emit_const_float(&mut self, value: f64) {
        self.emit_opcode(Opcode::ConstFloat);
        self.emit_f64(value);
    }

    /// Emit LOAD_CONST with a constant pool index
    pub fn emit_load_const(&mut self, index: u32) {
        self.emit_opcode(Opcode::LoadConst);
        self.emit_u32(index);
    }

    /// Emit LOAD_LOCAL
    pub fn emit_load_local(&mut self, slot: u16) {
        self.emit_opcode(Opcode::LoadLocal);
        self.emit_u16(slot);
    }

    /// Emit STORE_LOCAL
    pub fn emit_store_local(&mut self, slot: u16) {
        self.emit_opcode(Opcode::StoreLocal);
        self.emit_u16(slot);
    }

    /// Emit LOAD_ATTR
    pub fn emit_load_attr(&mut self, slot: u16) {
        self.emit_opcode(Opcode::LoadAttr);
        self.emit_u16(slot);
    }

    /// Emit STORE_ATTR
    pub fn emit_store_attr(&mut self, slot: u16) {
        self.emit_opcode(Opcode::StoreAttr);
        self.emit_u16(slot);
    }

    /// Emit CALL_METHOD
    pub fn emit_call_method(&mut self, function: u16, argc: u8) {
        self.emit_opcode(Opcode::CallMethod);
        self.emit_u16(function);
        self.emit_u8(argc);
    }

    /// Emit CALL_OP
    pub fn emit_call_op(&mut self, operator: u16, argc: u8) {
        self.emit_opcode(Opcode::CallOp);
        self.emit_u16(operator);
        self.emit_u8(argc);
    }

    /// Emit MAKE_TUPLE
    pub fn emit_make_tuple(&mut self, count: u16) {
        self.emit_opcode(Opcode::MakeTuple);
        self.emit_u16(count);
    }

    /// Emit TUPLE_GET
    pub fn emit_tuple_get(&mut self, index: u16) {
        self.emit_opcode(Opcode::TupleGet);
        self.emit_u16(index);
    }

    /// Emit RETURN
    pub fn emit_return(&mut self) {
        self.emit_opcode(Opcode::Return);
    }

    /// Emit a jump with a placeholder offset, returning the patch position
    pub fn emit_jump(&mut self, opcode: Opcode) -> usize {
        debug_assert!(opcode.is_jump());
        self.emit_opcode(opcode);
        self.reserve_i32()
    }

    /// Emit a jump to an already known target offset
    pub fn emit_jump_to(&mut self, opcode: Opcode, target: usize) {
        let patch = self.emit_jump(opcode);
        self.patch_jump(patch, target);
    }

    /// Resolve a jump emitted by [`emit_jump`](Self::emit_jump) to `target`
    ///
    /// Jump offsets are relative to the first byte after the operand.
    pub fn patch_jump(&mut self, patch_offset: usize, target: usize) {
        let relative = target as i64 - (patch_offset as i64 + 4);
        self.patch_i32(patch_offset, relative as i32);
    }

    // ===== Patching =====

    /// Patch an i32 at a specific offset
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Patch a u32 at a specific offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reserve space for an i32 and return its offset
    pub fn reserve_i32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_i32(0);
        offset
    }

    /// Reserve space for a u32 and return its offset
    pub fn reserve_u32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_u32(0);
        offset
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader for decoding instructions and container fields
///
/// Borrowing reads (`read_slice`, `read_str`) return views into the input
/// buffer without copying.
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Seek to a specific position
    pub fn seek(&mut self, position: usize) -> Result<(), DecodeError> {
        if position > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(position));
        }
        self.position = position;
        Ok(())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    // ===== Basic Reading =====

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take_array().map(u16::from_le_bytes)
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Read a 64-bit unsigned integer
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.take_array().map(u64::from_le_bytes)
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.take_array().map(i32::from_le_bytes)
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.take_array().map(i64::from_le_bytes)
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.take_array().map(f64::from_le_bytes)
    }

    /// Read a length-prefixed byte blob without copying
    pub fn read_slice(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string without copying
    pub fn read_str(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.position;
        let bytes = self.read_slice()?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_str().map(str::to_owned)
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        self.take(count).map(<[u8]>::to_vec)
    }

    /// Read a count prefix, capped so that a hostile count cannot force a
    /// huge up-front allocation
    ///
    /// `min_item_size` is the smallest encoded size of one item.
    pub fn read_count(&mut self, min_item_size: usize) -> Result<usize, DecodeError> {
        let offset = self.position;
        let count = self.read_u32()? as usize;
        if count.saturating_mul(min_item_size.max(1)) > self.remaining() {
            return Err(DecodeError::UnexpectedEnd(offset));
        }
        Ok(count)
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }
}
