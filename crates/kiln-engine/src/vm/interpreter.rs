//! Bytecode interpreter

use super::{Value, VmError, VmResult};
use crate::ops::{self, OperatorDef};
use kiln_bytecode::{BytecodeReader, Function, Opcode};
use std::cmp::Ordering;
use std::sync::Arc;

/// Maximum nesting of method calls
pub const MAX_CALL_DEPTH: usize = 200;

/// Executes the functions of one module against its state
///
/// Code is expected to have passed `kiln_bytecode::verify_module`, but every
/// stack, local, constant and attribute access is still bounds checked and
/// reported as a [`VmError`].
pub struct Interpreter<'m> {
    functions: &'m [Function],
    constants: &'m [Value],
    state: &'m mut [Value],
    /// Resolved operator table of each function
    operators: Vec<Vec<&'static OperatorDef>>,
    depth: usize,
}

fn pop(stack: &mut Vec<Value>) -> VmResult<Value> {
    stack.pop().ok_or(VmError::StackUnderflow)
}

fn pop_n(stack: &mut Vec<Value>, count: usize) -> VmResult<Vec<Value>> {
    let start = stack
        .len()
        .checked_sub(count)
        .ok_or(VmError::StackUnderflow)?;
    Ok(stack.split_off(start))
}

impl<'m> Interpreter<'m> {
    /// Create an interpreter, resolving every operator table
    pub fn new(
        functions: &'m [Function],
        constants: &'m [Value],
        state: &'m mut [Value],
    ) -> VmResult<Self> {
        let operators = functions
            .iter()
            .map(|function| {
                function
                    .operators
                    .iter()
                    .map(|op| {
                        ops::lookup(&op.name).ok_or_else(|| VmError::UnknownOperator(op.name.clone()))
                    })
                    .collect::<VmResult<Vec<_>>>()
            })
            .collect::<VmResult<Vec<_>>>()?;

        Ok(Self {
            functions,
            constants,
            state,
            operators,
            depth: 0,
        })
    }

    /// Call function `index` with `args`
    pub fn call(&mut self, index: usize, args: Vec<Value>) -> VmResult<Value> {
        let functions = self.functions;
        let function = functions
            .get(index)
            .ok_or_else(|| VmError::InvalidReference(format!("function {index}")))?;
        if args.len() != function.param_count as usize {
            return Err(VmError::ArityMismatch {
                name: function.name.clone(),
                expected: function.param_count as usize,
                actual: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded(MAX_CALL_DEPTH));
        }

        self.depth += 1;
        let result = self.execute(index, function, args);
        self.depth -= 1;
        result
    }

    fn operator(&self, function: usize, slot: u16) -> VmResult<&'static OperatorDef> {
        self.operators
            .get(function)
            .and_then(|table| table.get(slot as usize))
            .copied()
            .ok_or_else(|| VmError::InvalidReference(format!("operator slot {slot}")))
    }

    fn execute(&mut self, index: usize, function: &'m Function, args: Vec<Value>) -> VmResult<Value> {
        let mut locals = args;
        locals.resize(function.local_count as usize, Value::None);
        let mut stack: Vec<Value> = Vec::with_capacity(16);
        let mut reader = BytecodeReader::new(&function.code);

        loop {
            let opcode = reader.read_opcode()?;
            match opcode {
                Opcode::Nop => {}
                Opcode::Pop => {
                    pop(&mut stack)?;
                }
                Opcode::Dup => {
                    let top = stack.last().cloned().ok_or(VmError::StackUnderflow)?;
                    stack.push(top);
                }

                Opcode::ConstNone => stack.push(Value::None),
                Opcode::ConstTrue => stack.push(Value::Bool(true)),
                Opcode::ConstFalse => stack.push(Value::Bool(false)),
                Opcode::ConstInt => stack.push(Value::Int(reader.read_i64()?)),
                Opcode::ConstFloat => stack.push(Value::Float(reader.read_f64()?)),
                Opcode::LoadConst => {
                    let index = reader.read_u32()?;
                    let value = self
                        .constants
                        .get(index as usize)
                        .cloned()
                        .ok_or_else(|| VmError::InvalidReference(format!("constant {index}")))?;
                    stack.push(value);
                }

                Opcode::LoadLocal => {
                    let slot = reader.read_u16()?;
                    let value = locals
                        .get(slot as usize)
                        .cloned()
                        .ok_or_else(|| VmError::InvalidReference(format!("local {slot}")))?;
                    stack.push(value);
                }
                Opcode::StoreLocal => {
                    let slot = reader.read_u16()?;
                    let value = pop(&mut stack)?;
                    *locals
                        .get_mut(slot as usize)
                        .ok_or_else(|| VmError::InvalidReference(format!("local {slot}")))? = value;
                }
                Opcode::LoadAttr => {
                    let slot = reader.read_u16()?;
                    let value = self
                        .state
                        .get(slot as usize)
                        .cloned()
                        .ok_or_else(|| VmError::InvalidReference(format!("attribute {slot}")))?;
                    stack.push(value);
                }
                Opcode::StoreAttr => {
                    let slot = reader.read_u16()?;
                    let value = pop(&mut stack)?;
                    *self
                        .state
                        .get_mut(slot as usize)
                        .ok_or_else(|| VmError::InvalidReference(format!("attribute {slot}")))? = value;
                }

                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Rem => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    let result = match opcode {
                        Opcode::Add => ops::add(&a, &b),
                        Opcode::Sub => ops::sub(&a, &b),
                        Opcode::Mul => ops::mul(&a, &b),
                        _ => ops::rem(&a, &b),
                    }?;
                    stack.push(result);
                }
                Opcode::Neg => {
                    let a = pop(&mut stack)?;
                    stack.push(ops::neg(&a)?);
                }

                Opcode::Eq | Opcode::Ne => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool((a == b) == (opcode == Opcode::Eq)));
                }
                Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    let ordering = ops::partial_cmp(&a, &b)?;
                    let result = match opcode {
                        Opcode::Lt => matches!(ordering, Some(Ordering::Less)),
                        Opcode::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                        Opcode::Gt => matches!(ordering, Some(Ordering::Greater)),
                        _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                    };
                    stack.push(Value::Bool(result));
                }

                Opcode::Not => {
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(!a.is_truthy()?));
                }

                Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfTrue => {
                    let offset = reader.read_i32()?;
                    let taken = match opcode {
                        Opcode::Jmp => true,
                        Opcode::JmpIfFalse => !pop(&mut stack)?.is_truthy()?,
                        _ => pop(&mut stack)?.is_truthy()?,
                    };
                    if taken {
                        let target = reader.position() as i64 + offset as i64;
                        let target = usize::try_from(target)
                            .map_err(|_| VmError::InvalidReference(format!("jump target {target}")))?;
                        reader.seek(target)?;
                    }
                }

                Opcode::CallMethod => {
                    let target = reader.read_u16()?;
                    let argc = reader.read_u8()?;
                    let args = pop_n(&mut stack, argc as usize)?;
                    let result = self.call(target as usize, args)?;
                    stack.push(result);
                }
                Opcode::CallOp => {
                    let slot = reader.read_u16()?;
                    let argc = reader.read_u8()?;
                    let def = self.operator(index, slot)?;
                    let args = pop_n(&mut stack, argc as usize)?;
                    stack.push((def.func)(&args)?);
                }
                Opcode::Return => return pop(&mut stack),

                Opcode::MakeTuple => {
                    let count = reader.read_u16()?;
                    let items = pop_n(&mut stack, count as usize)?;
                    stack.push(Value::Tuple(Arc::from(items)));
                }
                Opcode::TupleGet => {
                    let index = reader.read_u16()? as usize;
                    let base = pop(&mut stack)?;
                    stack.push(element(&base, index)?);
                }
            }
        }
    }
}

fn element(base: &Value, index: usize) -> VmResult<Value> {
    match base {
        Value::Tuple(items) => items.get(index).cloned().ok_or(VmError::IndexOutOfRange {
            index,
            len: items.len(),
        }),
        Value::Tensor(t) if t.shape.len() == 1 => t
            .data
            .get(index)
            .map(|x| Value::Float(*x))
            .ok_or(VmError::IndexOutOfRange {
                index,
                len: t.data.len(),
            }),
        other => Err(VmError::TypeError(format!(
            "{} does not support indexing",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::{BytecodeWriter, OperatorRef, Tensor};

    fn function(name: &str, params: u16, locals: u16, code: BytecodeWriter) -> Function {
        Function {
            name: name.to_string(),
            param_count: params,
            local_count: locals,
            code: code.into_bytes(),
            operators: Vec::new(),
        }
    }

    fn run(functions: &[Function], args: Vec<Value>) -> VmResult<Value> {
        let mut state = vec![Value::Int(100)];
        let constants = vec![Value::from("hello")];
        Interpreter::new(functions, &constants, &mut state)?.call(0, args)
    }

    #[test]
    fn test_arithmetic() {
        let mut w = BytecodeWriter::new();
        w.emit_load_local(0);
        w.emit_const_int(1);
        w.emit_opcode(Opcode::Add);
        w.emit_load_attr(0);
        w.emit_opcode(Opcode::Mul);
        w.emit_return();
        let f = function("f", 1, 1, w);
        assert_eq!(run(&[f], vec![Value::Int(4)]).unwrap(), Value::Int(500));
    }

    #[test]
    fn test_loop_with_jumps() {
        // i = 0; while i < n { i = i + 1 }; return i
        let mut w = BytecodeWriter::new();
        w.emit_const_int(0);
        w.emit_store_local(1);
        let start = w.offset();
        w.emit_load_local(1);
        w.emit_load_local(0);
        w.emit_opcode(Opcode::Lt);
        let exit = w.emit_jump(Opcode::JmpIfFalse);
        w.emit_load_local(1);
        w.emit_const_int(1);
        w.emit_opcode(Opcode::Add);
        w.emit_store_local(1);
        w.emit_jump_to(Opcode::Jmp, start);
        let end = w.offset();
        w.patch_jump(exit, end);
        w.emit_load_local(1);
        w.emit_return();
        let f = function("count", 1, 2, w);
        assert_eq!(run(&[f], vec![Value::Int(7)]).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_calls_and_operators() {
        let mut callee = BytecodeWriter::new();
        callee.emit_load_local(0);
        callee.emit_call_op(0, 1);
        callee.emit_return();
        let mut relu = function("relu", 1, 1, callee);
        relu.operators.push(OperatorRef {
            name: "relu".to_string(),
            num_args: 1,
        });

        let mut caller = BytecodeWriter::new();
        caller.emit_const_float(-2.5);
        caller.emit_call_method(1, 1);
        caller.emit_load_const(0);
        caller.emit_make_tuple(2);
        caller.emit_return();
        let main = function("main", 0, 0, caller);

        let result = run(&[main, relu], vec![]).unwrap();
        assert_eq!(result, Value::from(vec![Value::Float(0.0), Value::from("hello")]));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let mut f = function("f", 0, 0, BytecodeWriter::new());
        f.operators.push(OperatorRef {
            name: "missing".to_string(),
            num_args: 0,
        });
        let mut state: Vec<Value> = Vec::new();
        assert!(matches!(
            Interpreter::new(std::slice::from_ref(&f), &[], &mut state),
            Err(VmError::UnknownOperator(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_recursion_limit() {
        let mut w = BytecodeWriter::new();
        w.emit_call_method(0, 0);
        w.emit_return();
        let f = function("forever", 0, 0, w);
        assert_eq!(run(&[f], vec![]), Err(VmError::CallDepthExceeded(MAX_CALL_DEPTH)));
    }

    #[test]
    fn test_malformed_code_is_an_error() {
        // Pop on an empty stack, then a truncated operand
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Pop);
        assert_eq!(run(&[function("f", 0, 0, w)], vec![]), Err(VmError::StackUnderflow));

        let mut w = BytecodeWriter::new();
        w.emit_u8(Opcode::LoadLocal.to_u8());
        assert!(matches!(run(&[function("f", 0, 0, w)], vec![]), Err(VmError::Decode(_))));

        let mut w = BytecodeWriter::new();
        w.emit_load_local(3);
        w.emit_return();
        assert!(matches!(
            run(&[function("f", 0, 1, w)], vec![]),
            Err(VmError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_tensor_indexing() {
        let t = Value::from(Tensor::from_vec(vec![1.5, 2.5]));
        assert_eq!(element(&t, 1).unwrap(), Value::Float(2.5));
        assert_eq!(
            element(&t, 2),
            Err(VmError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert!(matches!(element(&Value::Int(1), 0), Err(VmError::TypeError(_))));
    }

    #[test]
    fn test_arity_checked() {
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::ConstNone);
        w.emit_return();
        let f = function("f", 2, 2, w);
        assert!(matches!(
            run(&[f], vec![Value::Int(1)]),
            Err(VmError::ArityMismatch { expected: 2, actual: 1, .. })
        ));
    }
}
