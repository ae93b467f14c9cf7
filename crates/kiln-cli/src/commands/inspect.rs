//! `kiln inspect`: header and contents of a module binary

use super::read_module_file;
use crate::values::to_json;
use kiln_bytecode::{content_hash, get_root};
use kiln_engine::{detect_format, ensure_registered, Format, Value};
use serde_json::json;
use std::path::Path;

pub fn execute(file: &Path, as_json: bool) -> anyhow::Result<()> {
    let bytes = read_module_file(file)?;
    let format = detect_format(&bytes);
    if format != Format::Kiln {
        anyhow::bail!("{} is a {}, not a kiln module", file.display(), format.name());
    }

    let root = get_root(&bytes)?;
    let extra = root.extra_files()?;
    let module = root.decode()?;
    let hash = hex::encode(content_hash(&bytes));
    let supported = ensure_registered().supports(root.bytecode_version());

    if as_json {
        let report = json!({
            "file": file.display().to_string(),
            "size": bytes.len(),
            "sha256": hash,
            "schema_version": root.schema_version(),
            "bytecode_version": root.bytecode_version(),
            "supported": supported,
            "flags": root.flags(),
            "class": module.class_name,
            "constants": module
                .constants
                .values
                .iter()
                .map(|c| to_json(&Value::from_constant(c)))
                .collect::<Vec<_>>(),
            "functions": module.functions.iter().map(|f| json!({
                "name": f.name,
                "params": f.param_count,
                "locals": f.local_count,
                "code_size": f.code.len(),
                "operators": f.operators.iter().map(|op| op.name.as_str()).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "attributes": module.state.iter().map(|a| json!({
                "name": a.name,
                "value": to_json(&Value::from_constant(&a.value)),
            })).collect::<Vec<_>>(),
            "sources": module.sources.keys().collect::<Vec<_>>(),
            "extra_files": extra.iter().map(|(name, data)| json!({
                "name": name,
                "size": data.len(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File:      {}", file.display());
    println!("Size:      {} bytes", bytes.len());
    println!("SHA-256:   {hash}");
    println!("Schema:    v{}", root.schema_version());
    println!(
        "Bytecode:  v{}{}",
        root.bytecode_version(),
        if supported { "" } else { " (unsupported)" }
    );
    println!("Class:     {}", module.class_name);
    println!("Constants: {}", module.constants.values.len());

    println!();
    println!("Functions:");
    for f in &module.functions {
        let operators: Vec<_> = f.operators.iter().map(|op| op.name.as_str()).collect();
        println!(
            "  {}({} params, {} locals, {} bytes) ops: [{}]",
            f.name,
            f.param_count,
            f.local_count,
            f.code.len(),
            operators.join(", ")
        );
    }

    if !module.state.is_empty() {
        println!();
        println!("Attributes:");
        for attr in &module.state {
            println!("  {} = {}", attr.name, Value::from_constant(&attr.value));
        }
    }

    if !module.sources.is_empty() {
        println!();
        println!("Sources:");
        for (path, text) in &module.sources {
            println!("  {path} ({} lines)", text.lines().count());
        }
    }

    if !extra.is_empty() {
        println!();
        println!("Extra files:");
        for (name, data) in &extra {
            println!("  {name} ({} bytes)", data.len());
        }
    }
    Ok(())
}
