//! Kiln compiler
//!
//! Source → [`ClassType`] (resolve) → bytecode (codegen, lower), and
//! [`ClassType`] → source (printer). The front end is version-conditioned:
//! operators are resolved as they behaved in the requested bytecode version.

mod codegen;
pub mod ir;
pub mod lower;
pub mod printer;
mod resolve;

pub use ir::ClassType;
pub use lower::{lower, lower_class, LowerError};
pub use printer::{extract, print_class, source_path};
pub use resolve::MAX_ARGUMENTS;

use crate::parser::{self, ParseError};
use crate::upgrader::ensure_registered;
use std::collections::BTreeMap;

/// Front-end errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// A source file failed to parse
    #[error("{path}: {source}")]
    Parse {
        /// Path of the file
        path: String,
        /// Parse failure
        #[source]
        source: ParseError,
    },

    /// No class declaration in any source file
    #[error("No class declaration found")]
    NoClass,

    /// Source files declare different classes
    #[error("Expected class '{expected}', found '{found}'")]
    ClassMismatch {
        /// First class name seen
        expected: String,
        /// Conflicting name
        found: String,
    },

    /// A method is declared twice
    #[error("Duplicate method '{name}'")]
    DuplicateMethod {
        /// Method name
        name: String,
    },

    /// An attribute is declared twice
    #[error("Duplicate attribute '{name}'")]
    DuplicateAttribute {
        /// Attribute name
        name: String,
    },

    /// A local is declared twice in one method
    #[error("Variable '{name}' already declared in '{method}'")]
    DuplicateLocal {
        /// Variable name
        name: String,
        /// Enclosing method
        method: String,
    },

    /// Use of an undeclared local
    #[error("Undefined variable '{name}' in '{method}'")]
    UndefinedVariable {
        /// Variable name
        name: String,
        /// Enclosing method
        method: String,
    },

    /// `self.x` for an undeclared attribute
    #[error("Unknown attribute '{name}' in '{method}'")]
    UnknownAttribute {
        /// Attribute name
        name: String,
        /// Enclosing method
        method: String,
    },

    /// Call of an undeclared method
    #[error("Unknown method '{name}' called from '{method}'")]
    UnknownMethod {
        /// Called name
        name: String,
        /// Enclosing method
        method: String,
    },

    /// `ops.x` for an operator missing from the library
    #[error("Unknown operator '{name}' in '{method}'")]
    UnknownOperator {
        /// Operator name
        name: String,
        /// Enclosing method
        method: String,
    },

    /// Wrong number of arguments to a method or operator
    #[error("'{name}' expects {expected} arguments, got {actual} (in '{method}')")]
    ArityMismatch {
        /// Callee
        name: String,
        /// Declared count
        expected: usize,
        /// Supplied count
        actual: usize,
        /// Enclosing method
        method: String,
    },

    /// `CONSTANTS.cN` past the end of the constant table
    #[error("Constant c{index} out of range ({count} constants) in '{method}'")]
    ConstantOutOfRange {
        /// Referenced index
        index: u32,
        /// Table size
        count: usize,
        /// Enclosing method
        method: String,
    },

    /// No front end for this bytecode version
    #[error("Unsupported bytecode version {0}")]
    UnsupportedVersion(u32),

    /// An encoding limit was exceeded
    #[error("Too many {what} (max {max})")]
    LimitExceeded {
        /// What overflowed
        what: &'static str,
        /// Limit
        max: usize,
    },
}

/// Compile source files into a class type
///
/// Files are parsed in path order and their class blocks merged; all of
/// them must declare the same class. `constant_count` bounds `CONSTANTS.cN`
/// references and `version` selects operator semantics.
pub fn compile(
    sources: &BTreeMap<String, String>,
    constant_count: usize,
    version: u32,
) -> Result<ClassType, CompileError> {
    let registry = ensure_registered();
    if !registry.supports(version) {
        return Err(CompileError::UnsupportedVersion(version));
    }

    let files = sources
        .iter()
        .map(|(path, text)| {
            parser::parse(text).map_err(|source| CompileError::Parse {
                path: path.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let classes: Vec<_> = files.iter().flat_map(|file| &file.classes).collect();

    let class = resolve::resolve_classes(&classes, constant_count, version, registry)?;
    tracing::debug!(
        target: "kiln::compiler",
        class = %class.name,
        methods = class.methods.len(),
        version,
        "Compiled class"
    );
    Ok(class)
}

/// Compile a single source text
pub fn compile_source(
    source: &str,
    constant_count: usize,
    version: u32,
) -> Result<ClassType, CompileError> {
    let mut sources = BTreeMap::new();
    sources.insert("<source>".to_string(), source.to_string());
    compile(&sources, constant_count, version)
}
