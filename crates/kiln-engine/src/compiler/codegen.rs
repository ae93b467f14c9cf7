//! Bytecode generation
//!
//! Emits one `kiln_bytecode::Function` per method. Every function ends with
//! an implicit `return None`, so forward jumps out of a trailing block always
//! land on an instruction.

use super::ir::{BinOp, ClassType, Expr, Literal, Method, Stmt, StmtKind, UnOp};
use super::lower::LowerError;
use crate::config::CompilationOptions;
use crate::ops;
use crate::vm::Value;
use kiln_bytecode::{BytecodeWriter, Function, FunctionDebugInfo, LineEntry, Opcode, OperatorRef};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Shared state while generating all methods of a class
pub(crate) struct ModuleCodegen<'a> {
    class: &'a ClassType,
    options: &'a CompilationOptions,
    constants: Vec<Value>,
    strings: FxHashMap<String, u32>,
}

impl<'a> ModuleCodegen<'a> {
    /// Program constants keep their indices; string literals are appended
    pub(crate) fn new(
        class: &'a ClassType,
        constants: &[Value],
        options: &'a CompilationOptions,
    ) -> Self {
        Self {
            class,
            options,
            constants: constants.to_vec(),
            strings: FxHashMap::default(),
        }
    }

    /// Generate all methods, in class order
    pub(crate) fn generate(
        &mut self,
    ) -> Result<(Vec<Function>, Vec<FunctionDebugInfo>), LowerError> {
        let class = self.class;
        let mut functions = Vec::with_capacity(class.methods.len());
        let mut debug = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            let (function, lines) = self.method(method)?;
            functions.push(function);
            debug.push(lines);
        }
        Ok((functions, debug))
    }

    /// Final constant pool
    pub(crate) fn into_constants(self) -> Vec<Value> {
        self.constants
    }

    fn intern(&mut self, s: &str) -> Result<u32, LowerError> {
        if let Some(&index) = self.strings.get(s) {
            return Ok(index);
        }
        let index = u32::try_from(self.constants.len()).map_err(|_| LowerError::LimitExceeded {
            what: "constants",
            method: String::new(),
            max: u32::MAX as usize,
        })?;
        self.constants.push(Value::Str(Arc::from(s)));
        self.strings.insert(s.to_string(), index);
        Ok(index)
    }

    fn method(&mut self, method: &Method) -> Result<(Function, FunctionDebugInfo), LowerError> {
        let mut codegen = FunctionCodegen {
            module: self,
            method: &method.name,
            writer: BytecodeWriter::new(),
            operators: Vec::new(),
            operator_slots: FxHashMap::default(),
            line_table: Vec::new(),
        };
        codegen.block(&method.body)?;
        codegen.writer.emit_opcode(Opcode::ConstNone);
        codegen.writer.emit_return();

        let function = Function {
            name: method.name.clone(),
            param_count: method.param_count,
            local_count: method.locals.len() as u16,
            code: codegen.writer.into_bytes(),
            operators: codegen.operators,
        };
        Ok((
            function,
            FunctionDebugInfo {
                line_table: codegen.line_table,
            },
        ))
    }
}

struct FunctionCodegen<'m, 'a> {
    module: &'m mut ModuleCodegen<'a>,
    method: &'m str,
    writer: BytecodeWriter,
    operators: Vec<OperatorRef>,
    operator_slots: FxHashMap<String, u16>,
    line_table: Vec<LineEntry>,
}

impl FunctionCodegen<'_, '_> {
    fn limit(&self, what: &'static str, max: usize) -> LowerError {
        LowerError::LimitExceeded {
            what,
            method: self.method.to_string(),
            max,
        }
    }

    /// Operator table slot for `name`, checked against the lowering policy
    fn operator_slot(&mut self, name: &str, argc: u8) -> Result<u16, LowerError> {
        if let Some(&slot) = self.operator_slots.get(name) {
            return Ok(slot);
        }
        let Some(def) = ops::lookup(name) else {
            return Err(LowerError::UnknownOperator {
                operator: name.to_string(),
                method: self.method.to_string(),
            });
        };
        let options = self.module.options;
        if !options.allows(name) || !(def.portable || options.allow_jit_only_ops) {
            return Err(LowerError::UnsupportedOperator {
                operator: name.to_string(),
                method: self.method.to_string(),
            });
        }
        let slot = u16::try_from(self.operators.len())
            .map_err(|_| self.limit("operators", u16::MAX as usize))?;
        self.operators.push(OperatorRef {
            name: name.to_string(),
            num_args: argc,
        });
        self.operator_slots.insert(name.to_string(), slot);
        Ok(slot)
    }

    fn argc(&self, args: &[Expr]) -> Result<u8, LowerError> {
        u8::try_from(args.len()).map_err(|_| self.limit("arguments", u8::MAX as usize))
    }

    fn call_op(&mut self, name: &str, args: &[&Expr]) -> Result<(), LowerError> {
        for arg in args {
            self.expr(arg)?;
        }
        let argc = args.len() as u8;
        let slot = self.operator_slot(name, argc)?;
        self.writer.emit_call_op(slot, argc);
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), LowerError> {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), LowerError> {
        if self.module.options.retain_debug_info {
            self.line_table.push(LineEntry {
                bytecode_offset: self.writer.offset() as u32,
                line: stmt.line,
                column: stmt.column,
            });
        }

        match &stmt.kind {
            StmtKind::Assign { slot, value, .. } => {
                self.expr(value)?;
                self.writer.emit_store_local(*slot);
            }
            StmtKind::SetAttr { slot, value } => {
                self.expr(value)?;
                self.writer.emit_store_attr(*slot);
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.expr(condition)?;
                let to_else = self.writer.emit_jump(Opcode::JmpIfFalse);
                self.block(then_body)?;
                if else_body.is_empty() {
                    let end = self.writer.offset();
                    self.writer.patch_jump(to_else, end);
                } else {
                    let to_end = self.writer.emit_jump(Opcode::Jmp);
                    let else_start = self.writer.offset();
                    self.writer.patch_jump(to_else, else_start);
                    self.block(else_body)?;
                    let end = self.writer.offset();
                    self.writer.patch_jump(to_end, end);
                }
            }
            StmtKind::While { condition, body } => {
                let start = self.writer.offset();
                self.expr(condition)?;
                let to_end = self.writer.emit_jump(Opcode::JmpIfFalse);
                self.block(body)?;
                self.writer.emit_jump_to(Opcode::Jmp, start);
                let end = self.writer.offset();
                self.writer.patch_jump(to_end, end);
            }
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.writer.emit_opcode(Opcode::ConstNone),
                }
                self.writer.emit_return();
            }
            StmtKind::Expr(value) => {
                self.expr(value)?;
                self.writer.emit_opcode(Opcode::Pop);
            }
        }
        Ok(())
    }

    /// `and` / `or`: leaves a bool on the stack
    fn short_circuit(&mut self, left: &Expr, right: &Expr, jump: Opcode) -> Result<(), LowerError> {
        // `and` jumps to the false result, `or` to the true one
        let (fallthrough, shortcut) = match jump {
            Opcode::JmpIfFalse => (Opcode::ConstTrue, Opcode::ConstFalse),
            _ => (Opcode::ConstFalse, Opcode::ConstTrue),
        };
        self.expr(left)?;
        let first = self.writer.emit_jump(jump);
        self.expr(right)?;
        let second = self.writer.emit_jump(jump);
        self.writer.emit_opcode(fallthrough);
        let to_end = self.writer.emit_jump(Opcode::Jmp);
        let target = self.writer.offset();
        self.writer.patch_jump(first, target);
        self.writer.patch_jump(second, target);
        self.writer.emit_opcode(shortcut);
        let end = self.writer.offset();
        self.writer.patch_jump(to_end, end);
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), LowerError> {
        match expr {
            Expr::Literal(Literal::None) => self.writer.emit_opcode(Opcode::ConstNone),
            Expr::Literal(Literal::Bool(true)) => self.writer.emit_opcode(Opcode::ConstTrue),
            Expr::Literal(Literal::Bool(false)) => self.writer.emit_opcode(Opcode::ConstFalse),
            Expr::Literal(Literal::Int(i)) => self.writer.emit_const_int(*i),
            Expr::Literal(Literal::Float(x)) => self.writer.emit_const_float(*x),
            Expr::Literal(Literal::Str(s)) => {
                let index = self.module.intern(s)?;
                self.writer.emit_load_const(index);
            }
            Expr::Constant(index) => self.writer.emit_load_const(*index),
            Expr::Local(slot) => self.writer.emit_load_local(*slot),
            Expr::Attr(slot) => self.writer.emit_load_attr(*slot),
            Expr::CallMethod { method, args } => {
                let argc = self.argc(args)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.writer.emit_call_method(*method, argc);
            }
            Expr::CallOp { operator, args } => {
                self.argc(args)?;
                let args: Vec<&Expr> = args.iter().collect();
                self.call_op(operator, &args)?;
            }
            Expr::Binary { op, left, right } => match op.operator_name() {
                Some(name) if !self.module.options.emit_promoted_ops => {
                    self.call_op(name, &[&**left, &**right])?;
                }
                _ => {
                    self.expr(left)?;
                    self.expr(right)?;
                    self.writer.emit_opcode(binary_opcode(*op));
                }
            },
            Expr::Unary {
                op: UnOp::Neg,
                operand,
            } => {
                if self.module.options.emit_promoted_ops {
                    self.expr(operand)?;
                    self.writer.emit_opcode(Opcode::Neg);
                } else {
                    self.call_op("neg", &[&**operand])?;
                }
            }
            Expr::Unary {
                op: UnOp::Not,
                operand,
            } => {
                self.expr(operand)?;
                self.writer.emit_opcode(Opcode::Not);
            }
            Expr::And(left, right) => self.short_circuit(left, right, Opcode::JmpIfFalse)?,
            Expr::Or(left, right) => self.short_circuit(left, right, Opcode::JmpIfTrue)?,
            Expr::Tuple(items) => {
                let count = u16::try_from(items.len())
                    .map_err(|_| self.limit("tuple elements", u16::MAX as usize))?;
                for item in items {
                    self.expr(item)?;
                }
                self.writer.emit_make_tuple(count);
            }
            Expr::Index { base, index } => {
                self.expr(base)?;
                self.writer.emit_tuple_get(*index);
            }
        }
        Ok(())
    }
}

fn binary_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Rem => Opcode::Rem,
        BinOp::Eq => Opcode::Eq,
        BinOp::Ne => Opcode::Ne,
        BinOp::Lt => Opcode::Lt,
        BinOp::Le => Opcode::Le,
        BinOp::Gt => Opcode::Gt,
        BinOp::Ge => Opcode::Ge,
    }
}
