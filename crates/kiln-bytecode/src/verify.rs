//! Bytecode verification
//!
//! Loaded modules are untrusted. Verification guarantees that the
//! interpreter never indexes out of range: every operand reference is in
//! bounds, jumps land on instruction boundaries, the operand stack depth
//! is consistent on every path, and no path falls off the end of a function.

use crate::encoder::BytecodeReader;
use crate::module::{Function, Module};
use crate::opcode::Opcode;
use std::collections::HashMap;

/// Maximum operand stack depth accepted by the verifier
pub const MAX_STACK_DEPTH: usize = 1024;

/// Bytecode verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Invalid opcode
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// Opcode byte
        opcode: u8,
        /// Instruction offset
        offset: usize,
    },

    /// Operands run past the end of the code
    #[error("Truncated instruction at offset {0}")]
    TruncatedInstruction(usize),

    /// Stack underflow
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// Stack overflow
    #[error("Stack overflow at offset {0} (depth: {1})")]
    StackOverflow(usize, usize),

    /// Two paths reach an instruction with different stack depths
    #[error("Inconsistent stack depth at offset {offset}: {first} vs {second}")]
    StackMismatch {
        /// Instruction offset
        offset: usize,
        /// Depth recorded first
        first: usize,
        /// Conflicting depth
        second: usize,
    },

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Computed absolute target
        target: i64,
        /// Offset of the jump
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        /// Referenced index
        index: u32,
        /// Instruction offset
        offset: usize,
    },

    /// Invalid local, attribute, operator or method reference
    #[error("Invalid {kind} reference: index {index} (max {max}) at offset {offset}")]
    InvalidRef {
        /// Kind of table referenced
        kind: &'static str,
        /// Referenced index
        index: usize,
        /// Table size
        max: usize,
        /// Instruction offset
        offset: usize,
    },

    /// Call site argument count disagrees with the callee
    #[error("Argument count mismatch at offset {offset}: passes {passed}, expects {expected}")]
    ArgCountMismatch {
        /// Instruction offset
        offset: usize,
        /// Arguments passed
        passed: u8,
        /// Arguments expected
        expected: usize,
    },

    /// Execution falls off end
    #[error("Execution falls off end of function at offset {0}")]
    FallOffEnd(usize),

    /// Module validation error
    #[error("Module validation error: {0}")]
    ModuleValidation(String),

    /// Error inside a specific function
    #[error("In function '{function}': {source}")]
    InFunction {
        /// Function name
        function: String,
        /// Underlying error
        #[source]
        source: Box<VerifyError>,
    },
}

/// Verify a module's bytecode
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    if let Some(debug) = &module.debug_info {
        if debug.functions.len() != module.functions.len() {
            return Err(VerifyError::ModuleValidation(format!(
                "debug info covers {} functions, module has {}",
                debug.functions.len(),
                module.functions.len()
            )));
        }
    }

    for function in &module.functions {
        verify_function(function, module).map_err(|e| VerifyError::InFunction {
            function: function.name.clone(),
            source: Box::new(e),
        })?;
    }

    Ok(())
}

/// Parsed instruction
#[derive(Debug, Clone, Copy)]
struct Instruction<'a> {
    offset: usize,
    opcode: Opcode,
    operands: &'a [u8],
}

impl Instruction<'_> {
    fn u16_at(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.operands[at], self.operands[at + 1]])
    }

    fn u32_operand(&self) -> u32 {
        u32::from_le_bytes([
            self.operands[0],
            self.operands[1],
            self.operands[2],
            self.operands[3],
        ])
    }

    fn next_offset(&self) -> usize {
        self.offset + 1 + self.operands.len()
    }

    /// Absolute jump target (relative offsets count from the next instruction)
    fn jump_target(&self) -> i64 {
        self.next_offset() as i64 + self.u32_operand() as i32 as i64
    }
}

/// Verify a single function's bytecode
fn verify_function(function: &Function, module: &Module) -> Result<(), VerifyError> {
    if function.local_count < function.param_count {
        return Err(VerifyError::ModuleValidation(format!(
            "{} locals cannot hold {} parameters",
            function.local_count, function.param_count
        )));
    }

    let instructions = parse_instructions(&function.code)?;
    let Some(last) = instructions.last() else {
        return Err(VerifyError::FallOffEnd(0));
    };
    if !last.opcode.is_terminator() {
        return Err(VerifyError::FallOffEnd(last.offset));
    }

    let index_of: HashMap<usize, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.offset, i))
        .collect();

    for instr in &instructions {
        verify_operands(instr, function, module)?;
        if instr.opcode.is_jump() {
            let target = instr.jump_target();
            let valid = usize::try_from(target)
                .map(|t| index_of.contains_key(&t))
                .unwrap_or(false);
            if !valid {
                return Err(VerifyError::InvalidJumpTarget {
                    target,
                    offset: instr.offset,
                });
            }
        }
    }

    verify_stack_depth(&instructions, &index_of)
}

/// Parse all instructions from bytecode
fn parse_instructions(code: &[u8]) -> Result<Vec<Instruction<'_>>, VerifyError> {
    let mut instructions = Vec::new();
    let mut reader = BytecodeReader::new(code);

    while reader.has_more() {
        let offset = reader.position();
        let byte = reader
            .read_u8()
            .map_err(|_| VerifyError::TruncatedInstruction(offset))?;
        let opcode = Opcode::from_u8(byte).ok_or(VerifyError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;

        let size = opcode.operand_size();
        if reader.remaining() < size {
            return Err(VerifyError::TruncatedInstruction(offset));
        }
        let start = reader.position();
        let operands = &code[start..start + size];
        reader
            .seek(start + size)
            .map_err(|_| VerifyError::TruncatedInstruction(offset))?;

        instructions.push(Instruction {
            offset,
            opcode,
            operands,
        });
    }

    Ok(instructions)
}

fn check_ref(kind: &'static str, index: usize, max: usize, offset: usize) -> Result<(), VerifyError> {
    if index >= max {
        return Err(VerifyError::InvalidRef {
            kind,
            index,
            max,
            offset,
        });
    }
    Ok(())
}

/// Verify operand references against the module tables
fn verify_operands(
    instr: &Instruction<'_>,
    function: &Function,
    module: &Module,
) -> Result<(), VerifyError> {
    let offset = instr.offset;
    match instr.opcode {
        Opcode::LoadConst => {
            let index = instr.u32_operand();
            if index as usize >= module.constants.len() {
                return Err(VerifyError::InvalidConstantRef { index, offset });
            }
        }
        Opcode::LoadLocal | Opcode::StoreLocal => {
            check_ref("local", instr.u16_at(0) as usize, function.local_count as usize, offset)?;
        }
        Opcode::LoadAttr | Opcode::StoreAttr => {
            check_ref("attribute", instr.u16_at(0) as usize, module.state.len(), offset)?;
        }
        Opcode::CallMethod => {
            let target = instr.u16_at(0) as usize;
            check_ref("method", target, module.functions.len(), offset)?;
            let passed = instr.operands[2];
            let expected = module.functions[target].param_count as usize;
            if passed as usize != expected {
                return Err(VerifyError::ArgCountMismatch {
                    offset,
                    passed,
                    expected,
                });
            }
        }
        Opcode::CallOp => {
            let slot = instr.u16_at(0) as usize;
            check_ref("operator", slot, function.operators.len(), offset)?;
            let passed = instr.operands[2];
            let expected = function.operators[slot].num_args as usize;
            if passed as usize != expected {
                return Err(VerifyError::ArgCountMismatch {
                    offset,
                    passed,
                    expected,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// Get the stack effect of an instruction (pops, pushes)
fn stack_effect(instr: &Instruction<'_>) -> (usize, usize) {
    match instr.opcode {
        Opcode::Nop | Opcode::Jmp => (0, 0),
        Opcode::Pop => (1, 0),
        Opcode::Dup => (1, 2),
        Opcode::ConstNone
        | Opcode::ConstTrue
        | Opcode::ConstFalse
        | Opcode::ConstInt
        | Opcode::ConstFloat
        | Opcode::LoadConst
        | Opcode::LoadLocal
        | Opcode::LoadAttr => (0, 1),
        Opcode::StoreLocal | Opcode::StoreAttr => (1, 0),
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Rem
        | Opcode::Eq
        | Opcode::Ne
        | Opcode::Lt
        | Opcode::Le
        | Opcode::Gt
        | Opcode::Ge => (2, 1),
        Opcode::Neg | Opcode::Not | Opcode::TupleGet => (1, 1),
        Opcode::JmpIfFalse | Opcode::JmpIfTrue => (1, 0),
        Opcode::CallMethod | Opcode::CallOp => (instr.operands[2] as usize, 1),
        Opcode::Return => (1, 0),
        Opcode::MakeTuple => (instr.u16_at(0) as usize, 1),
    }
}

/// Verify stack depth consistency by walking every reachable path
fn verify_stack_depth(
    instructions: &[Instruction<'_>],
    index_of: &HashMap<usize, usize>,
) -> Result<(), VerifyError> {
    let mut depth_at: Vec<Option<usize>> = vec![None; instructions.len()];
    let mut worklist = vec![(0usize, 0usize)];

    while let Some((index, depth)) = worklist.pop() {
        let instr = &instructions[index];
        match depth_at[index] {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(VerifyError::StackMismatch {
                    offset: instr.offset,
                    first: seen,
                    second: depth,
                })
            }
            None => depth_at[index] = Some(depth),
        }

        let (pops, pushes) = stack_effect(instr);
        if depth < pops {
            return Err(VerifyError::StackUnderflow(instr.offset));
        }
        let after = depth - pops + pushes;
        if after > MAX_STACK_DEPTH {
            return Err(VerifyError::StackOverflow(instr.offset, after));
        }

        if instr.opcode.is_jump() {
            // Target validity was checked before the walk
            if let Some(&target) = usize::try_from(instr.jump_target())
                .ok()
                .and_then(|t| index_of.get(&t))
            {
                worklist.push((target, after));
            }
        }
        if !instr.opcode.is_terminator() && index + 1 < instructions.len() {
            worklist.push((index + 1, after));
        }
    }

    Ok(())
}
