//! Compilation policy and load configuration
//!
//! `CompilationOptions` controls how a program module is lowered to the
//! minimal executable representation. A process-wide default is used by the
//! save entry points that don't take explicit options. `KilnConfig` reads
//! both option sets from a `kiln.toml` file.

use kiln_bytecode::Device;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Lowering policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilationOptions {
    /// Emit dedicated arithmetic opcodes instead of calls to `add`, `sub`, ...
    pub emit_promoted_ops: bool,
    /// Emit per-statement line tables
    pub retain_debug_info: bool,
    /// Operators the target runtime accepts; `None` accepts all portable ones
    pub operator_allowlist: Option<BTreeSet<String>>,
    /// Accept operators that only the full runtime provides (e.g. `print`)
    pub allow_jit_only_ops: bool,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            emit_promoted_ops: true,
            retain_debug_info: false,
            operator_allowlist: None,
            allow_jit_only_ops: false,
        }
    }
}

impl CompilationOptions {
    /// Policy used when a program module executes its own methods
    pub fn permissive() -> Self {
        Self {
            allow_jit_only_ops: true,
            ..Self::default()
        }
    }

    /// Whether `name` passes the allowlist
    pub fn allows(&self, name: &str) -> bool {
        self.operator_allowlist
            .as_ref()
            .map_or(true, |allowed| allowed.contains(name))
    }
}

static GLOBAL_OPTIONS: LazyLock<RwLock<CompilationOptions>> =
    LazyLock::new(|| RwLock::new(CompilationOptions::default()));

/// Current process-wide compilation options
pub fn global_options() -> CompilationOptions {
    GLOBAL_OPTIONS.read().clone()
}

/// Replace the process-wide compilation options
pub fn set_global_options(options: CompilationOptions) {
    *GLOBAL_OPTIONS.write() = options;
}

/// Options for loading a portable module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadOptions {
    /// Relocate every tensor to this device
    pub device: Option<Device>,
    /// Reject bytecode newer than this version
    pub max_bytecode_version: Option<u32>,
}

impl LoadOptions {
    /// Options that place tensors on `device`
    pub fn with_device(device: Option<Device>) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Contents of `kiln.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KilnConfig {
    /// `[compile]` table
    pub compile: CompilationOptions,
    /// `[load]` table
    pub load: LoadOptions,
}

impl KilnConfig {
    /// Parse configuration text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Find `kiln.toml` in `dir` or its ancestors
    pub fn discover(dir: &Path) -> Result<Option<Self>, ConfigError> {
        for ancestor in dir.ancestors() {
            let candidate = ancestor.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                tracing::debug!(target: "kiln::config", path = %candidate.display(), "Using config file");
                return Self::from_file(&candidate).map(Some);
            }
        }
        Ok(None)
    }
}
