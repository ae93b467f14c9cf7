//! `kiln verify`: load a module the way a consumer would

use super::read_module_file;
use anyhow::Context;
use kiln_bytecode::{verify_module, Module};
use kiln_engine::{load_module_from_bytes, ExtraFiles};
use std::path::Path;

pub fn execute(file: &Path) -> anyhow::Result<()> {
    let bytes = read_module_file(file)?;

    let decoded = Module::decode(&bytes).context("container is malformed")?;
    verify_module(&decoded).context("bytecode failed verification")?;

    let mut extra = ExtraFiles::new();
    let module = load_module_from_bytes(bytes, &mut extra, None)
        .with_context(|| format!("{} does not load", file.display()))?;

    println!(
        "{}: ok (class {}, {} methods, {} extra files, bytecode v{})",
        file.display(),
        module.class_type().name,
        module.method_names().len(),
        extra.len(),
        decoded.bytecode_version
    );
    Ok(())
}
