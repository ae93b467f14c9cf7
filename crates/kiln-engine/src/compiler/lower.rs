//! Lowering a program module to a minimal module

use super::codegen::ModuleCodegen;
use super::ir::ClassType;
use crate::config::CompilationOptions;
use crate::minimal::MinimalModule;
use crate::program::ProgramModule;
use crate::vm::Value;
use kiln_bytecode::DebugInfo;

/// Lowering errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    /// The operator exists but the lowering policy rejects it
    #[error("Operator '{operator}' used in '{method}' is not supported by the minimal runtime")]
    UnsupportedOperator {
        /// Operator name
        operator: String,
        /// Method using it
        method: String,
    },

    /// The operator is not in the library
    #[error("Unknown operator '{operator}' in '{method}'")]
    UnknownOperator {
        /// Operator name
        operator: String,
        /// Method using it
        method: String,
    },

    /// An encoding limit was exceeded
    #[error("Too many {what} in '{method}' (max {max})")]
    LimitExceeded {
        /// What overflowed
        what: &'static str,
        /// Method being lowered
        method: String,
        /// Limit
        max: usize,
    },
}

/// Lower a program module under `options`
pub fn lower(
    program: &ProgramModule,
    options: &CompilationOptions,
) -> Result<MinimalModule, LowerError> {
    let state = program.state_snapshot();
    lower_class(program.class_type(), program.constants(), &state, options)
}

/// Lower a class with its constants and attribute values
pub fn lower_class(
    class: &ClassType,
    constants: &[Value],
    state: &[Value],
    options: &CompilationOptions,
) -> Result<MinimalModule, LowerError> {
    let mut codegen = ModuleCodegen::new(class, constants, options);
    let (functions, lines) = codegen.generate()?;

    tracing::debug!(
        target: "kiln::lower",
        class = %class.name,
        functions = functions.len(),
        "Lowered module"
    );

    Ok(MinimalModule {
        class_name: class.name.clone(),
        constants: codegen.into_constants(),
        functions,
        attributes: class.attributes.clone(),
        state: state.to_vec(),
        debug_info: options
            .retain_debug_info
            .then_some(DebugInfo { functions: lines }),
    })
}
