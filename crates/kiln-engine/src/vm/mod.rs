//! Kiln interpreter
//!
//! A stack interpreter over `kiln_bytecode::Function`s. It executes both
//! minimal modules loaded from a binary and program modules, which lower
//! their methods on first call.

mod interpreter;
mod value;

pub use interpreter::{Interpreter, MAX_CALL_DEPTH};
pub use value::Value;

use kiln_bytecode::{DecodeError, Device};

/// VM execution errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// Operand stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Call nesting exceeded `MAX_CALL_DEPTH`
    #[error("Maximum call depth ({0}) exceeded")]
    CallDepthExceeded(usize),

    /// Operand has the wrong type
    #[error("Type error: {0}")]
    TypeError(String),

    /// Division or remainder by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Tensors placed on different devices were combined
    #[error("Device mismatch: {left} vs {right}")]
    DeviceMismatch {
        /// Left operand device
        left: Device,
        /// Right operand device
        right: Device,
    },

    /// Tensor shapes don't match
    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        /// Left operand shape
        left: Vec<usize>,
        /// Right operand shape
        right: Vec<usize>,
    },

    /// Tuple or tensor index out of range
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Container length
        len: usize,
    },

    /// No method with this name
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// No operator with this name in the library
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// No attribute with this name
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Wrong number of arguments
    #[error("'{name}' expects {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Method or operator name
        name: String,
        /// Declared parameter count
        expected: usize,
        /// Arguments supplied
        actual: usize,
    },

    /// Operand references a missing constant, local or attribute
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Malformed instruction stream
    #[error("Bytecode error: {0}")]
    Decode(#[from] DecodeError),

    /// Operator failed
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Method could not be compiled for execution
    #[error("Compilation error: {0}")]
    Compile(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
