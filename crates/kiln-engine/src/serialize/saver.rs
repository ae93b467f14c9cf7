//! Binary saver

use super::{ExtraFiles, SerializeError, Sink};
use crate::compiler::{self, lower_class};
use crate::config::{global_options, CompilationOptions};
use crate::program::ProgramModule;
use crate::vm::Value;
use kiln_bytecode::{ConstantPool, BYTECODE_VERSION};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Encode a module under `options`
///
/// The module's methods are printed back to source, recompiled, and the
/// recompiled class is lowered, so the embedded source and the bytecode
/// always describe the same program.
pub fn save_module_with_options(
    module: &ProgramModule,
    extra_files: &ExtraFiles,
    options: &CompilationOptions,
) -> Result<Vec<u8>, SerializeError> {
    let constants = ConstantPool::from(
        module
            .constants()
            .iter()
            .map(Value::to_constant)
            .collect::<Vec<_>>(),
    );
    let (sources, source_constants) = compiler::extract(module.class_type(), &constants);
    let class = compiler::compile(&sources, source_constants.len(), BYTECODE_VERSION)
        .map_err(|e| SerializeError::Reconstruction(format!("extracted source: {e}")))?;

    let state = module.state_snapshot();
    let minimal = lower_class(&class, module.constants(), &state, options)?;

    let mut encoded = minimal.to_module();
    encoded.bytecode_version = BYTECODE_VERSION;
    encoded.sources = sources;
    encoded.source_constants = source_constants;
    encoded.extra_files = extra_files.clone();
    let bytes = encoded.encode();

    tracing::info!(
        target: "kiln::serialize",
        class = %class.name,
        version = BYTECODE_VERSION,
        bytes = bytes.len(),
        extra_files = extra_files.len(),
        "Saved module"
    );
    Ok(bytes)
}

/// Encode a module under the global compilation options
pub fn save_module_to_bytes(
    module: &ProgramModule,
    extra_files: &ExtraFiles,
) -> Result<Vec<u8>, SerializeError> {
    save_module_with_options(module, extra_files, &global_options())
}

/// Encode a module and write it to `path`
///
/// The file is replaced atomically: on any failure the destination is left
/// as it was and no partial file remains.
pub fn save_module(
    module: &ProgramModule,
    path: &Path,
    extra_files: &ExtraFiles,
) -> Result<(), SerializeError> {
    let bytes = save_module_to_bytes(module, extra_files)?;
    write_atomic(path, &bytes)?;
    tracing::debug!(
        target: "kiln::serialize",
        path = %path.display(),
        bytes = bytes.len(),
        "Wrote module file"
    );
    Ok(())
}

/// Encode a module and stream it into `sink`; returns bytes written
///
/// The bytes are identical to [`save_module_to_bytes`].
pub fn save_module_to_sink(
    module: &ProgramModule,
    extra_files: &ExtraFiles,
    sink: &mut dyn Sink,
) -> Result<usize, SerializeError> {
    let bytes = save_module_to_bytes(module, extra_files)?;
    let mut written = 0;
    while written < bytes.len() {
        match sink.write_chunk(&bytes[written..]) {
            Ok(0) => {
                return Err(SerializeError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sink accepted {written} of {} bytes", bytes.len()),
                )))
            }
            Ok(n) => written += n.min(bytes.len() - written),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(SerializeError::Io(e)),
        }
    }
    Ok(written)
}

/// Write a sibling temp file, fsync, then rename over `path`
///
/// Each call gets its own uniquely named temp file, so concurrent saves to
/// one destination never share partial bytes; the last rename wins.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if path.file_name().is_none() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        ));
    }
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    // A failed persist drops the temp file, which removes it
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
