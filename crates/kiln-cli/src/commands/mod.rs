//! Subcommand implementations

pub mod build;
pub mod extra;
pub mod inspect;
pub mod run;
pub mod source;
pub mod verify;

use anyhow::Context;
use kiln_engine::KilnConfig;
use std::path::Path;

/// Read `explicit`, or discover `kiln.toml` starting next to `near`
pub(crate) fn load_config(explicit: Option<&Path>, near: &Path) -> anyhow::Result<KilnConfig> {
    Ok(match explicit {
        Some(path) => KilnConfig::from_file(path)?,
        None => {
            let dir = near.parent().unwrap_or(Path::new("."));
            KilnConfig::discover(dir)?.unwrap_or_default()
        }
    })
}

/// Read a module file into memory
pub(crate) fn read_module_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}
