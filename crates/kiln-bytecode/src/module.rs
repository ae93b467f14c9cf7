//! Binary container format for kiln modules (.kmb)
//!
//! Layout:
//! - Header (24 bytes): magic, schema version, bytecode version, flags,
//!   code-section CRC32, extra-files section offset
//! - Code section: class name, constant pool, functions, object state,
//!   embedded source files, embedded source constants, debug info
//! - Extra-files section: CRC32 of the entries, then name/bytes entries
//!
//! The extra-files section is located through the header alone, so it can
//! be read without decoding (or trusting) the code section.

use crate::constants::{Constant, ConstantPool};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Magic number for kiln module binaries: "KILN"
pub const MAGIC: [u8; 4] = *b"KILN";

/// Current container layout version
pub const SCHEMA_VERSION: u32 = 1;

/// Instruction-set semantics version written by this release
pub const BYTECODE_VERSION: u32 = 5;

/// Oldest instruction-set version that can still be read
pub const MIN_BYTECODE_VERSION: u32 = 1;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 24;

const CODE_CHECKSUM_OFFSET: usize = 16;
const EXTRA_OFFSET_OFFSET: usize = 20;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected KILN, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported container layout
    #[error("Unsupported schema version: {0} (current: {SCHEMA_VERSION})")]
    UnsupportedSchemaVersion(u32),

    /// Buffer shorter than the fixed header
    #[error("Buffer too small for a module header: {0} bytes")]
    Truncated(usize),

    /// Checksum mismatch
    #[error("Checksum mismatch in {section} section: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Section whose checksum failed
        section: &'static str,
        /// Stored checksum value
        expected: u32,
        /// Computed checksum value
        actual: u32,
    },

    /// Section offsets or lengths are inconsistent
    #[error("Invalid module layout: {0}")]
    InvalidLayout(String),
}

/// Module flags
pub mod flags {
    /// Module has debug information
    pub const HAS_DEBUG_INFO: u32 = 1 << 0;
    /// Module embeds source files for full reconstruction
    pub const HAS_SOURCES: u32 = 1 << 1;
}

/// Reference to a named operator from a function's operator table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorRef {
    /// Operator name (e.g. "div", "_div_0_3")
    pub name: String,
    /// Number of arguments passed at every call site
    pub num_args: u8,
}

/// Function definition
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Method name
    pub name: String,
    /// Number of parameters, excluding the receiver
    pub param_count: u16,
    /// Number of local slots, including parameters
    pub local_count: u16,
    /// Bytecode instructions
    pub code: Vec<u8>,
    /// Operators referenced by CALL_OP
    pub operators: Vec<OperatorRef>,
}

impl Function {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u16(self.param_count);
        writer.emit_u16(self.local_count);
        writer.emit_blob(&self.code);

        writer.emit_u32(self.operators.len() as u32);
        for op in &self.operators {
            writer.emit_string(&op.name);
            writer.emit_u8(op.num_args);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let param_count = reader.read_u16()?;
        let local_count = reader.read_u16()?;
        let code = reader.read_slice()?.to_vec();

        let op_count = reader.read_count(5)?;
        let mut operators = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            let name = reader.read_string()?;
            let num_args = reader.read_u8()?;
            operators.push(OperatorRef { name, num_args });
        }

        Ok(Self {
            name,
            param_count,
            local_count,
            code,
            operators,
        })
    }
}

/// Named slot of the module object's state
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Serialized value
    pub value: Constant,
}

// ============================================================================
// Debug Information
// ============================================================================

/// Debug information for the entire module, indexed by function ID
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugInfo {
    /// Per-function line tables
    pub functions: Vec<FunctionDebugInfo>,
}

/// Debug information for a single function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionDebugInfo {
    /// Line number table mapping bytecode offsets to source locations
    pub line_table: Vec<LineEntry>,
}

/// A single entry in the line number table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Bytecode offset within the function's code
    pub bytecode_offset: u32,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl FunctionDebugInfo {
    /// Source location of the instruction at `offset`
    pub fn location(&self, offset: u32) -> Option<(u32, u32)> {
        self.line_table
            .iter()
            .take_while(|entry| entry.bytecode_offset <= offset)
            .last()
            .map(|entry| (entry.line, entry.column))
    }
}

impl DebugInfo {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            writer.emit_u32(func.line_table.len() as u32);
            for entry in &func.line_table {
                writer.emit_u32(entry.bytecode_offset);
                writer.emit_u32(entry.line);
                writer.emit_u32(entry.column);
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_count(4)?;
        let mut functions = Vec::with_capacity(count);
        for _ in 0..count {
            let entries = reader.read_count(12)?;
            let mut line_table = Vec::with_capacity(entries);
            for _ in 0..entries {
                line_table.push(LineEntry {
                    bytecode_offset: reader.read_u32()?,
                    line: reader.read_u32()?,
                    column: reader.read_u32()?,
                });
            }
            functions.push(FunctionDebugInfo { line_table });
        }
        Ok(Self { functions })
    }
}

/// A decoded kiln module
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Instruction-set semantics version the code was written for
    pub bytecode_version: u32,
    /// Module flags
    pub flags: u32,
    /// Class name of the module object
    pub class_name: String,
    /// Constant pool used by the bytecode
    pub constants: ConstantPool,
    /// Function definitions
    pub functions: Vec<Function>,
    /// Object state (attribute slots in declaration order)
    pub state: Vec<Attribute>,
    /// Embedded source files (path -> text)
    pub sources: BTreeMap<String, String>,
    /// Constant table referenced by the embedded sources
    pub source_constants: ConstantPool,
    /// Auxiliary files carried opaquely (name -> bytes)
    pub extra_files: BTreeMap<String, Vec<u8>>,
    /// Debug information (present when HAS_DEBUG_INFO is set)
    pub debug_info: Option<DebugInfo>,
}

impl Module {
    /// Create a new empty module at the current bytecode version
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            bytecode_version: BYTECODE_VERSION,
            flags: 0,
            class_name: class_name.into(),
            constants: ConstantPool::new(),
            functions: Vec::new(),
            state: Vec::new(),
            sources: BTreeMap::new(),
            source_constants: ConstantPool::new(),
            extra_files: BTreeMap::new(),
            debug_info: None,
        }
    }

    /// Look up a function index by name
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Encode the module to binary format
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = self.flags & !(flags::HAS_DEBUG_INFO | flags::HAS_SOURCES);
        if self.debug_info.is_some() {
            flags |= flags::HAS_DEBUG_INFO;
        }
        if !self.sources.is_empty() {
            flags |= flags::HAS_SOURCES;
        }

        let mut writer = BytecodeWriter::new();

        // Header; checksum and extra-files offset are patched below
        writer.emit_raw(&MAGIC);
        writer.emit_u32(SCHEMA_VERSION);
        writer.emit_u32(self.bytecode_version);
        writer.emit_u32(flags);
        let checksum_offset = writer.reserve_u32();
        let extra_offset_slot = writer.reserve_u32();
        debug_assert_eq!(writer.offset(), HEADER_SIZE);

        // Code section
        writer.emit_string(&self.class_name);
        self.constants.encode(&mut writer);

        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            func.encode(&mut writer);
        }

        writer.emit_u32(self.state.len() as u32);
        for attr in &self.state {
            writer.emit_string(&attr.name);
            attr.value.encode(&mut writer);
        }

        writer.emit_u32(self.sources.len() as u32);
        for (path, text) in &self.sources {
            writer.emit_string(path);
            writer.emit_string(text);
        }
        self.source_constants.encode(&mut writer);

        if let Some(debug_info) = &self.debug_info {
            debug_info.encode(&mut writer);
        }

        let extra_offset = writer.offset();
        let code_checksum = crc32fast::hash(&writer.buffer()[HEADER_SIZE..extra_offset]);
        writer.patch_u32(checksum_offset, code_checksum);
        writer.patch_u32(extra_offset_slot, extra_offset as u32);

        // Extra-files section
        let extra_checksum_slot = writer.reserve_u32();
        let entries_start = writer.offset();
        writer.emit_u32(self.extra_files.len() as u32);
        for (name, data) in &self.extra_files {
            writer.emit_string(name);
            writer.emit_blob(data);
        }
        let extra_checksum = crc32fast::hash(&writer.buffer()[entries_start..]);
        writer.patch_u32(extra_checksum_slot, extra_checksum);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        get_root(data)?.decode()
    }
}

/// SHA-256 digest of an encoded module
pub fn content_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Validated view of an encoded module's header
///
/// Obtained through [`get_root`]; accessors read directly from the borrowed
/// buffer.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRoot<'a> {
    data: &'a [u8],
    schema_version: u32,
    bytecode_version: u32,
    flags: u32,
    code_checksum: u32,
    extra_offset: usize,
}

/// Validate the header of `data` and return a typed view of it
///
/// Fails before any field is interpreted if the magic, schema version or
/// section offsets are wrong.
pub fn get_root(data: &[u8]) -> Result<ModuleRoot<'_>, ModuleError> {
    if data.len() < HEADER_SIZE {
        return Err(ModuleError::Truncated(data.len()));
    }

    let mut reader = BytecodeReader::new(data);
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&reader.read_bytes(4)?);
    if magic != MAGIC {
        return Err(ModuleError::InvalidMagic(magic));
    }

    let schema_version = reader.read_u32()?;
    if schema_version != SCHEMA_VERSION {
        return Err(ModuleError::UnsupportedSchemaVersion(schema_version));
    }

    let bytecode_version = reader.read_u32()?;
    let flags = reader.read_u32()?;
    debug_assert_eq!(reader.position(), CODE_CHECKSUM_OFFSET);
    let code_checksum = reader.read_u32()?;
    debug_assert_eq!(reader.position(), EXTRA_OFFSET_OFFSET);
    let extra_offset = reader.read_u32()? as usize;

    // Extra section needs at least its checksum and entry count
    if extra_offset < HEADER_SIZE || extra_offset.saturating_add(8) > data.len() {
        return Err(ModuleError::InvalidLayout(format!(
            "extra files offset {extra_offset} outside buffer of {} bytes",
            data.len()
        )));
    }

    Ok(ModuleRoot {
        data,
        schema_version,
        bytecode_version,
        flags,
        code_checksum,
        extra_offset,
    })
}

impl<'a> ModuleRoot<'a> {
    /// Container layout version
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Instruction-set semantics version
    pub fn bytecode_version(&self) -> u32 {
        self.bytecode_version
    }

    /// Module flags
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether the module embeds source files
    pub fn has_sources(&self) -> bool {
        self.flags & flags::HAS_SOURCES != 0
    }

    /// Total encoded size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a validated root
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Verify the code-section checksum
    pub fn verify_code_checksum(&self) -> Result<(), ModuleError> {
        let actual = crc32fast::hash(&self.data[HEADER_SIZE..self.extra_offset]);
        if actual != self.code_checksum {
            return Err(ModuleError::ChecksumMismatch {
                section: "code",
                expected: self.code_checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Read the auxiliary files without touching the code section
    ///
    /// Names and contents borrow from the underlying buffer.
    pub fn extra_files(&self) -> Result<Vec<(&'a str, &'a [u8])>, ModuleError> {
        let mut reader = BytecodeReader::new(self.data);
        reader.seek(self.extra_offset)?;
        let expected = reader.read_u32()?;
        let actual = crc32fast::hash(&self.data[reader.position()..]);
        if actual != expected {
            return Err(ModuleError::ChecksumMismatch {
                section: "extra files",
                expected,
                actual,
            });
        }

        let count = reader.read_count(8)?;
        let mut files = Vec::with_capacity(count);
        for _ in 0..count {
            let name = reader.read_str()?;
            let data = reader.read_slice()?;
            files.push((name, data));
        }
        if reader.has_more() {
            return Err(ModuleError::InvalidLayout(format!(
                "{} trailing bytes after extra files",
                reader.remaining()
            )));
        }
        Ok(files)
    }

    /// Decode the full module
    pub fn decode(&self) -> Result<Module, ModuleError> {
        self.verify_code_checksum()?;

        let code = &self.data[..self.extra_offset];
        let mut reader = BytecodeReader::new(code);
        reader.seek(HEADER_SIZE)?;

        let class_name = reader.read_string()?;
        let constants = ConstantPool::decode(&mut reader)?;

        let func_count = reader.read_count(16)?;
        let mut functions = Vec::with_capacity(func_count);
        for _ in 0..func_count {
            functions.push(Function::decode(&mut reader)?);
        }

        let attr_count = reader.read_count(5)?;
        let mut state = Vec::with_capacity(attr_count);
        for _ in 0..attr_count {
            let name = reader.read_string()?;
            let value = Constant::decode(&mut reader)?;
            state.push(Attribute { name, value });
        }

        let source_count = reader.read_count(8)?;
        let mut sources = BTreeMap::new();
        for _ in 0..source_count {
            let path = reader.read_string()?;
            let text = reader.read_string()?;
            sources.insert(path, text);
        }
        let source_constants = ConstantPool::decode(&mut reader)?;

        let debug_info = if self.flags & flags::HAS_DEBUG_INFO != 0 {
            Some(DebugInfo::decode(&mut reader)?)
        } else {
            None
        };

        if reader.has_more() {
            return Err(ModuleError::InvalidLayout(format!(
                "{} trailing bytes in code section",
                reader.remaining()
            )));
        }

        let extra_files = self
            .extra_files()?
            .into_iter()
            .map(|(name, data)| (name.to_string(), data.to_vec()))
            .collect();

        Ok(Module {
            bytecode_version: self.bytecode_version,
            flags: self.flags,
            class_name,
            constants,
            functions,
            state,
            sources,
            source_constants,
            extra_files,
            debug_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample_module() -> Module {
        let mut module = Module::new("Net");
        module.constants.add(Constant::Int(1));

        let mut writer = BytecodeWriter::new();
        writer.emit_load_local(0);
        writer.emit_load_const(0);
        writer.emit_opcode(Opcode::Add);
        writer.emit_return();
        module.functions.push(Function {
            name: "forward".to_string(),
            param_count: 1,
            local_count: 1,
            code: writer.into_bytes(),
            operators: vec![],
        });
        module.state.push(Attribute {
            name: "steps".to_string(),
            value: Constant::Int(0),
        });
        module.sources.insert(
            "code/Net.kl".to_string(),
            "class Net { attr steps; def forward(self, x) { return x + CONSTANTS.c0; } }"
                .to_string(),
        );
        module.source_constants.add(Constant::Int(1));
        module
            .extra_files
            .insert("meta.txt".to_string(), b"v1".to_vec());
        module
    }

    #[test]
    fn test_empty_module_encoding() {
        let module = Module::new("Empty");
        let bytes = module.encode();
        let decoded = Module::decode(&bytes).unwrap();
        assert_eq!(decoded, module);
        assert_eq!(decoded.bytecode_version, BYTECODE_VERSION);
    }

    #[test]
    fn test_complex_module() {
        let mut module = sample_module();
        module.debug_info = Some(DebugInfo {
            functions: vec![FunctionDebugInfo {
                line_table: vec![LineEntry {
                    bytecode_offset: 0,
                    line: 1,
                    column: 40,
                }],
            }],
        });

        let bytes = module.encode();
        let decoded = Module::decode(&bytes).unwrap();

        assert_eq!(decoded.class_name, "Net");
        assert_eq!(decoded.functions, module.functions);
        assert_eq!(decoded.state, module.state);
        assert_eq!(decoded.sources, module.sources);
        assert_eq!(decoded.extra_files, module.extra_files);
        assert_eq!(decoded.debug_info, module.debug_info);
        assert_ne!(decoded.flags & flags::HAS_DEBUG_INFO, 0);
        assert_ne!(decoded.flags & flags::HAS_SOURCES, 0);
    }

    #[test]
    fn test_root_reads_header() {
        let mut module = sample_module();
        module.bytecode_version = 3;
        let bytes = module.encode();
        let root = get_root(&bytes).unwrap();
        assert_eq!(root.schema_version(), SCHEMA_VERSION);
        assert_eq!(root.bytecode_version(), 3);
        assert!(root.has_sources());
    }

    #[test]
    fn test_invalid_magic_number() {
        let mut bytes = sample_module().encode();
        bytes[0] = b'X';
        assert!(matches!(get_root(&bytes), Err(ModuleError::InvalidMagic(_))));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = sample_module().encode();
        assert!(matches!(
            get_root(&bytes[..10]),
            Err(ModuleError::Truncated(10))
        ));
        assert!(matches!(get_root(&[]), Err(ModuleError::Truncated(0))));
    }

    #[test]
    fn test_truncated_body() {
        let bytes = sample_module().encode();
        // Cut inside the extra-files section
        assert!(Module::decode(&bytes[..bytes.len() - 3]).is_err());
        // Cut inside the code section: the offset now points past the end
        assert!(matches!(
            get_root(&bytes[..HEADER_SIZE + 4]),
            Err(ModuleError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_unsupported_schema_version() {
        let mut bytes = sample_module().encode();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            get_root(&bytes),
            Err(ModuleError::UnsupportedSchemaVersion(99))
        ));
    }

    #[test]
    fn test_code_checksum_validation() {
        let mut bytes = sample_module().encode();
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        let result = Module::decode(&bytes);
        assert!(matches!(
            result,
            Err(ModuleError::ChecksumMismatch { section: "code", .. })
        ));
    }

    #[test]
    fn test_extra_files_survive_code_corruption() {
        let mut bytes = sample_module().encode();
        bytes[HEADER_SIZE + 2] ^= 0xFF;

        let root = get_root(&bytes).unwrap();
        assert!(root.decode().is_err());
        let files = root.extra_files().unwrap();
        assert_eq!(files, vec![("meta.txt", &b"v1"[..])]);
    }

    #[test]
    fn test_extra_files_checksum() {
        let mut bytes = sample_module().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let root = get_root(&bytes).unwrap();
        assert!(matches!(
            root.extra_files(),
            Err(ModuleError::ChecksumMismatch {
                section: "extra files",
                ..
            })
        ));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let module = sample_module();
        assert_eq!(module.encode(), module.encode());
        assert_eq!(content_hash(&module.encode()), content_hash(&module.encode()));
    }
}
