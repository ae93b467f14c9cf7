//! Portable module serialization
//!
//! Load: bytes → [`OwnedBuffer`] → [`parse_module`] (format detection and
//! the registered codec's binary loader) →
//! [`reconstruct`] (program reconstructor) → [`ProgramModule`].
//!
//! Save: [`ProgramModule`] → source extraction and lowering →
//! encoded bytes, returned as a buffer, written to a file atomically, or
//! streamed into a [`Sink`].
//!
//! [`ProgramModule`]: crate::ProgramModule

mod buffer;
mod codec;
mod format;
mod loader;
mod reconstruct;
mod saver;

pub use buffer::{OwnedBuffer, WeakBuffer};
pub use codec::{
    codec_registration_count, ensure_codecs_registered, Codec, CodecRegistry, DecodeFn,
};
pub use format::{detect_format, Format};
pub use loader::{
    load_minimal_module, load_module, load_module_from_bytes, load_module_from_reader,
    load_module_with_options, parse_module, read_extra_files, LoadedModule,
};
pub use reconstruct::reconstruct;
pub use saver::{
    save_module, save_module_to_bytes, save_module_to_sink, save_module_with_options,
};

use crate::compiler::LowerError;
use kiln_bytecode::ModuleError;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Auxiliary files: name → bytes, carried through load and save untouched
pub type ExtraFiles = BTreeMap<String, Vec<u8>>;

/// Load and save errors
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// Reading or writing a file or stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The buffer is not a valid kiln module
    #[error("Malformed module: {0}")]
    Malformed(String),

    /// The bytecode version is outside what this runtime can interpret
    #[error("Unsupported bytecode version {version} (supported: {min}..={max})")]
    UnsupportedVersion {
        /// Version found in the buffer
        version: u32,
        /// Oldest supported version
        min: u32,
        /// Newest supported version
        max: u32,
    },

    /// Embedded source does not rebuild the module
    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),

    /// Lowering met an operator the minimal runtime can't represent
    #[error("Unsupported operator '{operator}' in method '{method}'")]
    UnsupportedOperator {
        /// Operator name
        operator: String,
        /// Method using it
        method: String,
    },

    /// Lowering failed for another reason
    #[error("Lowering failed: {0}")]
    Lowering(LowerError),
}

impl From<ModuleError> for SerializeError {
    fn from(err: ModuleError) -> Self {
        SerializeError::Malformed(err.to_string())
    }
}

impl From<LowerError> for SerializeError {
    fn from(err: LowerError) -> Self {
        match err {
            LowerError::UnsupportedOperator { operator, method } => {
                SerializeError::UnsupportedOperator { operator, method }
            }
            other => SerializeError::Lowering(other),
        }
    }
}

/// Destination for streamed module bytes
///
/// `write_chunk` returns how many bytes it accepted; returning 0 for a
/// non-empty chunk is reported as [`io::ErrorKind::WriteZero`].
pub trait Sink {
    /// Accept a prefix of `bytes`
    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

impl<F> Sink for F
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self(bytes)
    }
}

/// [`Sink`] over any [`Write`]
#[derive(Debug)]
pub struct WriteSink<W>(pub W);

impl<W: Write> Sink for WriteSink<W> {
    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0.write(bytes)
    }
}
