//! Kiln portable module format
//!
//! This crate provides the instruction set, the versioned binary container
//! for portable modules, the constant pool, and the bytecode verifier.
//! It has no knowledge of source code or execution; see `kiln-engine`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod constants;
pub mod encoder;
pub mod module;
pub mod opcode;
pub mod tensor;
pub mod verify;

pub use constants::{Constant, ConstantPool};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use module::{
    content_hash, get_root, Attribute, DebugInfo, Function, FunctionDebugInfo, LineEntry, Module,
    ModuleError, ModuleRoot, OperatorRef, BYTECODE_VERSION, MIN_BYTECODE_VERSION, SCHEMA_VERSION,
};
pub use opcode::Opcode;
pub use tensor::{Device, ParseDeviceError, Tensor};
pub use verify::{verify_module, VerifyError};
