//! `kiln source`: print embedded source files

use super::read_module_file;
use anyhow::bail;
use kiln_bytecode::Module;
use std::path::Path;

pub fn execute(file: &Path, path: Option<&str>) -> anyhow::Result<()> {
    let module = Module::decode(&read_module_file(file)?)?;
    if module.sources.is_empty() {
        bail!("{} embeds no source", file.display());
    }

    match path {
        Some(path) => match module.sources.get(path) {
            Some(text) => print!("{text}"),
            None => bail!(
                "no source '{path}' (available: {})",
                module.sources.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        },
        None => {
            for (path, text) in &module.sources {
                println!("// {path}");
                print!("{text}");
            }
        }
    }
    Ok(())
}
