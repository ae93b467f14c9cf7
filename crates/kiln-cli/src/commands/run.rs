//! `kiln run`: call a method of a module

use super::{load_config, read_module_file};
use crate::values::{parse_arg, to_json};
use anyhow::Context;
use kiln_engine::serialize::parse_module;
use kiln_engine::{load_module_with_options, Device, ExtraFiles, LoadOptions, OwnedBuffer, Value};
use std::path::{Path, PathBuf};

pub struct RunArgs {
    pub file: PathBuf,
    pub method: String,
    pub args: Vec<String>,
    pub device: Option<String>,
    pub minimal: bool,
    pub config: Option<PathBuf>,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref(), &args.file)?;
    let options = load_options(config.load, args.device.as_deref())?;
    let values: Vec<Value> = args.args.iter().map(|a| parse_arg(a)).collect();
    let result = call(&args.file, &args.method, values, &options, args.minimal)?;

    match &result {
        Value::Tensor(_) | Value::Tuple(_) => {
            println!("{}", serde_json::to_string(&to_json(&result))?)
        }
        other => println!("{other}"),
    }
    Ok(())
}

/// `[load]` settings with `--device` taking precedence
fn load_options(mut options: LoadOptions, device: Option<&str>) -> anyhow::Result<LoadOptions> {
    if let Some(device) = device {
        options.device = Some(device.parse::<Device>().context("invalid --device")?);
    }
    Ok(options)
}

fn call(
    file: &Path,
    method: &str,
    args: Vec<Value>,
    options: &LoadOptions,
    minimal: bool,
) -> anyhow::Result<Value> {
    let bytes = read_module_file(file)?;
    let mut extra = ExtraFiles::new();

    let result = if minimal {
        let mut module = parse_module(&bytes, &mut extra, options.max_bytecode_version)?.minimal;
        if let Some(device) = options.device {
            module.to_device(device);
        }
        module.call(method, args)?
    } else {
        let module = load_module_with_options(OwnedBuffer::from_vec(bytes), &mut extra, options)?;
        module.call(method, &args)?
    };

    tracing::debug!(target: "kiln::cli", method, "Call returned {}", result.type_name());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_engine::{save_module, KilnConfig, ProgramModule, Tensor};

    const NET: &str = "class Net {
        attr weight;
        def forward(self, x) { return x + 1; }
        def placement(self) { return ops.device(self.weight); }
    }";

    fn write_module(dir: &Path) -> PathBuf {
        let module = ProgramModule::from_source(NET, vec![]).unwrap();
        module
            .set_attr("weight", Value::from(Tensor::from_vec(vec![1.0])))
            .unwrap();
        let path = dir.join("net.kmb");
        save_module(&module, &path, &ExtraFiles::new()).unwrap();
        path
    }

    #[test]
    fn test_device_flag_overrides_config() {
        let config = KilnConfig::parse("[load]\ndevice = \"cuda:1\"\nmax_bytecode_version = 4\n")
            .unwrap();
        let from_config = load_options(config.load.clone(), None).unwrap();
        assert_eq!(from_config.device, Some(Device::Cuda(1)));
        assert_eq!(from_config.max_bytecode_version, Some(4));

        let overridden = load_options(config.load, Some("mps")).unwrap();
        assert_eq!(overridden.device, Some(Device::Mps));
        assert_eq!(overridden.max_bytecode_version, Some(4));

        assert!(load_options(LoadOptions::default(), Some("tpu")).is_err());
    }

    #[test]
    fn test_version_cap_from_config_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path());
        let capped = LoadOptions {
            max_bytecode_version: Some(1),
            ..LoadOptions::default()
        };
        for minimal in [false, true] {
            assert!(call(&path, "forward", vec![Value::Int(1)], &capped, minimal).is_err());
            assert_eq!(
                call(&path, "forward", vec![Value::Int(1)], &LoadOptions::default(), minimal)
                    .unwrap(),
                Value::Int(2)
            );
        }
    }

    #[test]
    fn test_discovered_config_applies_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path());
        std::fs::write(dir.path().join("kiln.toml"), "[load]\ndevice = \"cuda:2\"\n").unwrap();

        let config = load_config(None, &path).unwrap();
        let options = load_options(config.load, None).unwrap();
        for minimal in [false, true] {
            let placed = call(&path, "placement", vec![], &options, minimal).unwrap();
            assert_eq!(placed, Value::from("cuda:2"));
        }
    }
}
