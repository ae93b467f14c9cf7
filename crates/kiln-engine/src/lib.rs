//! Kiln Engine
//!
//! This crate converts kiln program modules to and from the portable
//! module binary defined in `kiln-bytecode`:
//! - **Parser / Compiler**: source front end, printer, and lowering under a
//!   compilation policy (`parser`, `compiler` modules)
//! - **VM**: operator library and interpreter (`ops`, `vm` modules)
//! - **Serialize**: buffer ownership, binary loader, program reconstructor
//!   and binary saver (`serialize` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_engine::{load_module_from_bytes, save_module_to_bytes, ExtraFiles, ProgramModule, Value};
//!
//! let module = ProgramModule::from_source(
//!     "class Net { def forward(self, x) { return x + CONSTANTS.c0; } }",
//!     vec![Value::Int(1)],
//! )?;
//! let mut extra = ExtraFiles::new();
//! extra.insert("meta.txt".into(), b"v1".to_vec());
//! let bytes = save_module_to_bytes(&module, &extra)?;
//!
//! let mut loaded_extra = ExtraFiles::new();
//! let loaded = load_module_from_bytes(bytes, &mut loaded_extra, None)?;
//! assert_eq!(loaded.call("forward", &[Value::Int(5)])?, Value::Int(6));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Source front end: lexer, parser, AST
pub mod parser;

/// Name resolution, source printing and lowering
pub mod compiler;

/// Interpreter and runtime values
pub mod vm;

/// Compilation policy and `kiln.toml` loading
pub mod config;

/// Bytecode-only executable modules
pub mod minimal;

/// Named operator library
pub mod ops;

/// Source-backed program modules
pub mod program;

// ============================================================================
// Portable Modules
// ============================================================================

/// Buffer ownership, loading, reconstruction and saving
pub mod serialize;

/// Rewrites that keep old bytecode versions running
pub mod upgrader;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::{compile, compile_source, lower, ClassType, CompileError, LowerError};
pub use config::{
    global_options, set_global_options, CompilationOptions, ConfigError, KilnConfig, LoadOptions,
};
pub use minimal::MinimalModule;
pub use parser::{ParseError, Parser};
pub use program::ProgramModule;
pub use serialize::{
    codec_registration_count, detect_format, ensure_codecs_registered, load_minimal_module, load_module, load_module_from_bytes,
    load_module_from_reader, load_module_with_options, read_extra_files, save_module,
    save_module_to_bytes, save_module_to_sink, save_module_with_options, ExtraFiles, Format,
    OwnedBuffer, SerializeError, Sink, WeakBuffer, WriteSink,
};
pub use upgrader::{ensure_registered, registration_count, UpgraderRegistry};
pub use vm::{Value, VmError, VmResult};

pub use kiln_bytecode::{Device, Tensor, BYTECODE_VERSION, MIN_BYTECODE_VERSION};
