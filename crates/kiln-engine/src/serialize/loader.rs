//! Binary loader

use super::buffer::OwnedBuffer;
use super::codec::ensure_codecs_registered;
use super::reconstruct::reconstruct;
use super::{ExtraFiles, SerializeError};
use crate::config::LoadOptions;
use crate::minimal::MinimalModule;
use crate::ops;
use crate::program::ProgramModule;
use crate::upgrader::ensure_registered;
use crate::vm::Value;
use kiln_bytecode::{get_root, verify_module, Device};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Everything a module binary carries besides its auxiliary files
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Executable functions, constants and state
    pub minimal: MinimalModule,
    /// Embedded source files (path → text)
    pub sources: BTreeMap<String, String>,
    /// Constant table referenced by the embedded sources
    pub source_constants: Vec<Value>,
    /// Bytecode version the module was written for
    pub bytecode_version: u32,
}

/// Parse a module binary
///
/// Auxiliary files are copied into `extra_files` before the code section is
/// decoded, so they are available even when the rest of the parse fails.
/// `max_version` caps the accepted bytecode version below this runtime's.
/// The payload is dispatched to the codec registered for its format.
pub fn parse_module(
    bytes: &[u8],
    extra_files: &mut ExtraFiles,
    max_version: Option<u32>,
) -> Result<LoadedModule, SerializeError> {
    ensure_codecs_registered().decode(bytes, extra_files, max_version)
}

/// Decoder for [`Format::Kiln`](super::Format::Kiln) payloads
pub(super) fn decode_kiln(
    bytes: &[u8],
    extra_files: &mut ExtraFiles,
    max_version: Option<u32>,
) -> Result<LoadedModule, SerializeError> {
    let root = get_root(bytes)?;
    for (name, data) in root.extra_files()? {
        extra_files.insert(name.to_string(), data.to_vec());
    }

    let registry = ensure_registered();
    let version = root.bytecode_version();
    let max = max_version.map_or(registry.max_version(), |cap| cap.min(registry.max_version()));
    if !registry.supports(version) || version > max {
        return Err(SerializeError::UnsupportedVersion {
            version,
            min: registry.min_version(),
            max,
        });
    }

    let mut module = root.decode()?;
    verify_module(&module).map_err(|e| SerializeError::Malformed(e.to_string()))?;

    for function in &mut module.functions {
        let rewritten = registry.upgrade_function(function, version);
        if rewritten > 0 {
            tracing::warn!(
                target: "kiln::upgrader",
                function = %function.name,
                version,
                rewritten,
                "Upgraded operator table of old bytecode"
            );
        }
        if let Some(op) = function.operators.iter().find(|op| ops::lookup(&op.name).is_none()) {
            return Err(SerializeError::Malformed(format!(
                "function '{}' references unknown operator '{}'",
                function.name, op.name
            )));
        }
    }

    tracing::debug!(
        target: "kiln::serialize",
        class = %module.class_name,
        version,
        functions = module.functions.len(),
        sources = module.sources.len(),
        "Parsed module binary"
    );

    Ok(LoadedModule {
        minimal: MinimalModule::from_module(&module),
        source_constants: module
            .source_constants
            .values
            .iter()
            .map(Value::from_constant)
            .collect(),
        sources: std::mem::take(&mut module.sources),
        bytecode_version: version,
    })
}

/// Load a program module from a buffer
///
/// The buffer moves into the returned module and is released with it.
pub fn load_module_with_options(
    buffer: OwnedBuffer,
    extra_files: &mut ExtraFiles,
    options: &LoadOptions,
) -> Result<ProgramModule, SerializeError> {
    let loaded = parse_module(buffer.as_slice(), extra_files, options.max_bytecode_version)?;
    let size = buffer.len();
    let module = reconstruct(loaded, options.device, Some(buffer))?;
    tracing::info!(
        target: "kiln::serialize",
        class = %module.class_type().name,
        bytes = size,
        extra_files = extra_files.len(),
        "Loaded module"
    );
    Ok(module)
}

/// Load a program module from a file
pub fn load_module(
    path: &Path,
    extra_files: &mut ExtraFiles,
    device: Option<Device>,
) -> Result<ProgramModule, SerializeError> {
    let buffer = OwnedBuffer::read_file(path)?;
    load_module_with_options(buffer, extra_files, &LoadOptions::with_device(device))
}

/// Load a program module from a stream, read to its end
pub fn load_module_from_reader(
    reader: impl Read,
    extra_files: &mut ExtraFiles,
    device: Option<Device>,
) -> Result<ProgramModule, SerializeError> {
    let buffer = OwnedBuffer::read_from(reader)?;
    load_module_with_options(buffer, extra_files, &LoadOptions::with_device(device))
}

/// Load a program module from bytes already in memory
pub fn load_module_from_bytes(
    bytes: Vec<u8>,
    extra_files: &mut ExtraFiles,
    device: Option<Device>,
) -> Result<ProgramModule, SerializeError> {
    load_module_with_options(
        OwnedBuffer::from_vec(bytes),
        extra_files,
        &LoadOptions::with_device(device),
    )
}

/// Load only the executable part of a module binary
pub fn load_minimal_module(bytes: &[u8]) -> Result<MinimalModule, SerializeError> {
    let mut extra_files = ExtraFiles::new();
    Ok(parse_module(bytes, &mut extra_files, None)?.minimal)
}

/// Read only the auxiliary files of a module binary
///
/// Works even when the code section is corrupt or of an unsupported version.
pub fn read_extra_files(bytes: &[u8]) -> Result<ExtraFiles, SerializeError> {
    let root = get_root(bytes)?;
    Ok(root
        .extra_files()?
        .into_iter()
        .map(|(name, data)| (name.to_string(), data.to_vec()))
        .collect())
}
