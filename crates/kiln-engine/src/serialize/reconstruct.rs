//! Program reconstructor
//!
//! Rebuilds a [`ProgramModule`] from a parsed binary by compiling the
//! embedded source against the embedded constants, with the front end set
//! to the bytecode version the binary was written for.

use super::buffer::OwnedBuffer;
use super::loader::LoadedModule;
use super::SerializeError;
use crate::compiler::{self, CompileError};
use crate::program::ProgramModule;
use crate::upgrader::ensure_registered;
use kiln_bytecode::Device;

/// Rebuild a program module
///
/// With a `device`, every constant and attribute tensor is placed on it
/// before the module is returned; otherwise serialized placements are kept.
/// `backing` is attached to the module and lives as long as it does.
pub fn reconstruct(
    loaded: LoadedModule,
    device: Option<Device>,
    backing: Option<OwnedBuffer>,
) -> Result<ProgramModule, SerializeError> {
    let LoadedModule {
        minimal,
        sources,
        source_constants,
        bytecode_version,
    } = loaded;

    if sources.is_empty() {
        return Err(SerializeError::Reconstruction(
            "module has no embedded source".to_string(),
        ));
    }

    let class = compiler::compile(&sources, source_constants.len(), bytecode_version).map_err(
        |err| match err {
            CompileError::UnsupportedVersion(version) => {
                let registry = ensure_registered();
                SerializeError::UnsupportedVersion {
                    version,
                    min: registry.min_version(),
                    max: registry.max_version(),
                }
            }
            other => SerializeError::Reconstruction(other.to_string()),
        },
    )?;

    if class.name != minimal.class_name {
        return Err(SerializeError::Reconstruction(format!(
            "source declares class '{}', bytecode is for '{}'",
            class.name, minimal.class_name
        )));
    }
    if class.attributes != minimal.attributes {
        return Err(SerializeError::Reconstruction(format!(
            "source attributes {:?} don't match module state {:?}",
            class.attributes, minimal.attributes
        )));
    }
    if class.methods.len() != minimal.functions.len() {
        return Err(SerializeError::Reconstruction(format!(
            "source defines {} methods, bytecode has {} functions",
            class.methods.len(),
            minimal.functions.len()
        )));
    }
    for function in &minimal.functions {
        match class.method(&function.name) {
            Some(method) if method.param_count == function.param_count => {}
            Some(method) => {
                return Err(SerializeError::Reconstruction(format!(
                    "method '{}' takes {} parameters in source, {} in bytecode",
                    function.name, method.param_count, function.param_count
                )))
            }
            None => {
                return Err(SerializeError::Reconstruction(format!(
                    "bytecode function '{}' has no source",
                    function.name
                )))
            }
        }
    }

    let mut module =
        ProgramModule::from_parts(class, source_constants, minimal.state, sources, backing);
    if let Some(device) = device {
        module.to_device(device);
    }

    tracing::debug!(
        target: "kiln::serialize",
        class = %module.class_type().name,
        version = bytecode_version,
        device = ?device,
        "Reconstructed program module"
    );
    Ok(module)
}
