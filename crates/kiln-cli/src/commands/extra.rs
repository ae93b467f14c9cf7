//! `kiln extra`: list or dump auxiliary files

use super::read_module_file;
use anyhow::{bail, Context};
use kiln_engine::read_extra_files;
use std::io::Write;
use std::path::Path;

pub fn execute(file: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let bytes = read_module_file(file)?;
    let files = read_extra_files(&bytes)?;

    match name {
        Some(name) => {
            let Some(data) = files.get(name) else {
                bail!("{} has no extra file named '{name}'", file.display());
            };
            std::io::stdout()
                .write_all(data)
                .context("failed to write to stdout")?;
        }
        None => {
            for (name, data) in &files {
                println!("{:>10}  {name}", data.len());
            }
        }
    }
    Ok(())
}
