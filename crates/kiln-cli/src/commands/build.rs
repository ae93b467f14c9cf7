//! `kiln build`: compile source into a module binary

use super::load_config;
use crate::values::from_json;
use anyhow::{bail, Context};
use kiln_engine::{save_module, set_global_options, ExtraFiles, ProgramModule, Value};
use serde_json::Value as Json;
use std::path::PathBuf;

pub struct BuildArgs {
    pub source: PathBuf,
    pub output: PathBuf,
    pub constants: Option<String>,
    pub state: Option<String>,
    pub extra: Vec<String>,
    pub config: Option<PathBuf>,
}

pub fn execute(args: BuildArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref(), &args.source)?;
    set_global_options(config.compile);

    let text = std::fs::read_to_string(&args.source)
        .with_context(|| format!("failed to read {}", args.source.display()))?;
    let constants = parse_constants(args.constants.as_deref())?;
    let module = ProgramModule::from_source(&text, constants)
        .with_context(|| format!("failed to compile {}", args.source.display()))?;

    if let Some(state) = args.state.as_deref() {
        let parsed = serde_json::from_str::<Json>(state).context("--state is not JSON")?;
        let Json::Object(fields) = parsed else {
            bail!("--state must be a JSON object");
        };
        for (name, value) in &fields {
            module.set_attr(name, from_json(value)?)?;
        }
    }

    let extra = read_extra(&args.extra)?;
    save_module(&module, &args.output, &extra)?;
    println!(
        "Built {} ({} methods, {} extra files) -> {}",
        module.class_type().name,
        module.method_names().len(),
        extra.len(),
        args.output.display()
    );
    Ok(())
}

fn parse_constants(json: Option<&str>) -> anyhow::Result<Vec<Value>> {
    let Some(json) = json else {
        return Ok(Vec::new());
    };
    let parsed = serde_json::from_str::<Json>(json).context("--constants is not JSON")?;
    let Json::Array(items) = parsed else {
        bail!("--constants must be a JSON array");
    };
    items.iter().map(from_json).collect()
}

fn read_extra(specs: &[String]) -> anyhow::Result<ExtraFiles> {
    let mut extra = ExtraFiles::new();
    for spec in specs {
        let Some((name, path)) = spec.split_once('=') else {
            bail!("--extra expects NAME=PATH, got '{spec}'");
        };
        let data =
            std::fs::read(path).with_context(|| format!("failed to read extra file {path}"))?;
        extra.insert(name.to_string(), data);
    }
    Ok(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_constants() {
        assert!(parse_constants(None).unwrap().is_empty());
        assert_eq!(
            parse_constants(Some("[1, 2.5, \"s\"]")).unwrap(),
            vec![Value::Int(1), Value::Float(2.5), Value::from("s")]
        );
        assert!(parse_constants(Some("{}")).is_err());
        assert!(parse_constants(Some("[")).is_err());
    }

    #[test]
    fn test_read_extra() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.txt");
        std::fs::write(&path, b"v1").unwrap();
        let extra = read_extra(&[format!("meta.txt={}", path.display())]).unwrap();
        assert_eq!(extra["meta.txt"], b"v1");
        assert!(read_extra(&["missing-separator".to_string()]).is_err());
    }

    #[test]
    fn test_build_writes_loadable_module() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("net.kl");
        std::fs::write(
            &source,
            "class Net { attr bias; def forward(self, x) { return x + self.bias + CONSTANTS.c0; } }",
        )
        .unwrap();
        let output = dir.path().join("net.kmb");
        execute(BuildArgs {
            source,
            output: output.clone(),
            constants: Some("[10]".to_string()),
            state: Some(r#"{"bias": 1}"#.to_string()),
            extra: Vec::new(),
            config: None,
        })
        .unwrap();

        let module =
            kiln_engine::load_module(&output, &mut ExtraFiles::new(), None).unwrap();
        assert_eq!(module.call("forward", &[Value::Int(1)]).unwrap(), Value::Int(12));
    }
}
