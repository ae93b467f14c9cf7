//! Name resolution
//!
//! Turns parsed class blocks into a [`ClassType`]. Operator references are
//! resolved through the upgrader registry, so source written for an older
//! bytecode version calls the operators with that version's semantics.

use super::ir::{BinOp, ClassType, Expr, Literal, Method, Stmt, StmtKind, UnOp};
use super::CompileError;
use crate::ops;
use crate::parser::ast::{
    self, AssignTarget, ClassDecl, Expression, ExpressionKind, MethodDecl, Statement,
    StatementKind,
};
use crate::upgrader::UpgraderRegistry;

/// Maximum arguments per call (the call instruction stores a u8 count)
pub const MAX_ARGUMENTS: usize = u8::MAX as usize;

fn check_limit(what: &'static str, count: usize, max: usize) -> Result<(), CompileError> {
    if count > max {
        return Err(CompileError::LimitExceeded { what, max });
    }
    Ok(())
}

/// Merge class blocks into one class and resolve every method
pub(crate) fn resolve_classes(
    classes: &[&ClassDecl],
    constant_count: usize,
    version: u32,
    registry: &UpgraderRegistry,
) -> Result<ClassType, CompileError> {
    let Some(first) = classes.first() else {
        return Err(CompileError::NoClass);
    };
    let name = first.name.clone();

    let mut attributes: Vec<String> = Vec::new();
    let mut decls: Vec<&MethodDecl> = Vec::new();
    for class in classes {
        if class.name != name {
            return Err(CompileError::ClassMismatch {
                expected: name,
                found: class.name.clone(),
            });
        }
        for attr in &class.attributes {
            if attributes.contains(&attr.name) {
                return Err(CompileError::DuplicateAttribute {
                    name: attr.name.clone(),
                });
            }
            attributes.push(attr.name.clone());
        }
        for method in &class.methods {
            if decls.iter().any(|m| m.name == method.name) {
                return Err(CompileError::DuplicateMethod {
                    name: method.name.clone(),
                });
            }
            decls.push(method);
        }
    }
    check_limit("attributes", attributes.len(), u16::MAX as usize)?;
    check_limit("methods", decls.len(), u16::MAX as usize)?;

    let signatures: Vec<(&str, usize)> = decls
        .iter()
        .map(|m| (m.name.as_str(), m.params.len()))
        .collect();

    let methods = decls
        .iter()
        .map(|decl| {
            MethodResolver {
                method: &decl.name,
                attributes: &attributes,
                signatures: &signatures,
                constant_count,
                version,
                registry,
                locals: Vec::new(),
            }
            .resolve(decl)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClassType {
        name,
        attributes,
        methods,
    })
}

struct MethodResolver<'a> {
    method: &'a str,
    attributes: &'a [String],
    signatures: &'a [(&'a str, usize)],
    constant_count: usize,
    version: u32,
    registry: &'a UpgraderRegistry,
    locals: Vec<String>,
}

impl MethodResolver<'_> {
    fn resolve(mut self, decl: &MethodDecl) -> Result<Method, CompileError> {
        check_limit("parameters", decl.params.len(), MAX_ARGUMENTS)?;
        for param in &decl.params {
            self.declare(param)?;
        }
        let body = self.statements(&decl.body)?;

        Ok(Method {
            name: decl.name.clone(),
            param_count: decl.params.len() as u16,
            locals: self.locals,
            body,
        })
    }

    fn declare(&mut self, name: &str) -> Result<u16, CompileError> {
        if self.locals.iter().any(|l| l == name) {
            return Err(CompileError::DuplicateLocal {
                name: name.to_string(),
                method: self.method.to_string(),
            });
        }
        check_limit("locals", self.locals.len() + 1, u16::MAX as usize)?;
        self.locals.push(name.to_string());
        Ok((self.locals.len() - 1) as u16)
    }

    fn local(&self, name: &str) -> Result<u16, CompileError> {
        self.locals
            .iter()
            .position(|l| l == name)
            .map(|slot| slot as u16)
            .ok_or_else(|| CompileError::UndefinedVariable {
                name: name.to_string(),
                method: self.method.to_string(),
            })
    }

    fn attribute(&self, name: &str) -> Result<u16, CompileError> {
        self.attributes
            .iter()
            .position(|a| a == name)
            .map(|slot| slot as u16)
            .ok_or_else(|| CompileError::UnknownAttribute {
                name: name.to_string(),
                method: self.method.to_string(),
            })
    }

    fn statements(&mut self, statements: &[Statement]) -> Result<Vec<Stmt>, CompileError> {
        statements.iter().map(|s| self.statement(s)).collect()
    }

    fn statement(&mut self, statement: &Statement) -> Result<Stmt, CompileError> {
        let kind = match &statement.kind {
            StatementKind::Let { name, value } => {
                let value = self.expression(value)?;
                let slot = self.declare(name)?;
                StmtKind::Assign {
                    slot,
                    declare: true,
                    value,
                }
            }
            StatementKind::Assign { target, value } => {
                let value = self.expression(value)?;
                match target {
                    AssignTarget::Local(name) => StmtKind::Assign {
                        slot: self.local(name)?,
                        declare: false,
                        value,
                    },
                    AssignTarget::Attribute(name) => StmtKind::SetAttr {
                        slot: self.attribute(name)?,
                        value,
                    },
                }
            }
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => StmtKind::If {
                condition: self.expression(condition)?,
                then_body: self.statements(then_body)?,
                else_body: self.statements(else_body)?,
            },
            StatementKind::While { condition, body } => StmtKind::While {
                condition: self.expression(condition)?,
                body: self.statements(body)?,
            },
            StatementKind::Return(value) => {
                StmtKind::Return(value.as_ref().map(|v| self.expression(v)).transpose()?)
            }
            StatementKind::Expression(value) => StmtKind::Expr(self.expression(value)?),
        };
        Ok(Stmt {
            kind,
            line: statement.span.line,
            column: statement.span.column,
        })
    }

    fn arguments(&mut self, name: &str, args: &[Expression], expected: usize) -> Result<Vec<Expr>, CompileError> {
        if args.len() != expected {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected,
                actual: args.len(),
                method: self.method.to_string(),
            });
        }
        args.iter().map(|a| self.expression(a)).collect()
    }

    fn operator_call(&mut self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::CallOp {
            operator: self.registry.resolve(name, self.version).to_string(),
            args,
        }
    }

    fn expression(&mut self, expression: &Expression) -> Result<Expr, CompileError> {
        Ok(match &expression.kind {
            ExpressionKind::None => Expr::Literal(Literal::None),
            ExpressionKind::Bool(b) => Expr::Literal(Literal::Bool(*b)),
            ExpressionKind::Int(i) => Expr::Literal(Literal::Int(*i)),
            ExpressionKind::Float(x) => Expr::Literal(Literal::Float(*x)),
            ExpressionKind::Str(s) => Expr::Literal(Literal::Str(s.clone())),
            ExpressionKind::Constant(index) => {
                if *index as usize >= self.constant_count {
                    return Err(CompileError::ConstantOutOfRange {
                        index: *index,
                        count: self.constant_count,
                        method: self.method.to_string(),
                    });
                }
                Expr::Constant(*index)
            }
            ExpressionKind::Name(name) => Expr::Local(self.local(name)?),
            ExpressionKind::Attribute(name) => Expr::Attr(self.attribute(name)?),
            ExpressionKind::MethodCall { method, args } => {
                let Some(index) = self.signatures.iter().position(|(n, _)| n == method) else {
                    return Err(CompileError::UnknownMethod {
                        name: method.clone(),
                        method: self.method.to_string(),
                    });
                };
                let expected = self.signatures[index].1;
                let args = self.arguments(method, args, expected)?;
                Expr::CallMethod {
                    method: index as u16,
                    args,
                }
            }
            ExpressionKind::OperatorCall { operator, args } => {
                let Some(def) = ops::lookup(operator) else {
                    return Err(CompileError::UnknownOperator {
                        name: operator.clone(),
                        method: self.method.to_string(),
                    });
                };
                let args = self.arguments(operator, args, def.arity as usize)?;
                self.operator_call(operator, args)
            }
            ExpressionKind::Unary { op, operand } => Expr::Unary {
                op: match op {
                    ast::UnaryOp::Neg => UnOp::Neg,
                    ast::UnaryOp::Not => UnOp::Not,
                },
                operand: Box::new(self.expression(operand)?),
            },
            ExpressionKind::Binary { op, left, right } => {
                let left = self.expression(left)?;
                let right = self.expression(right)?;
                let op = match op {
                    ast::BinaryOp::Div => return Ok(self.operator_call("div", vec![left, right])),
                    ast::BinaryOp::And => return Ok(Expr::And(Box::new(left), Box::new(right))),
                    ast::BinaryOp::Or => return Ok(Expr::Or(Box::new(left), Box::new(right))),
                    ast::BinaryOp::Add => BinOp::Add,
                    ast::BinaryOp::Sub => BinOp::Sub,
                    ast::BinaryOp::Mul => BinOp::Mul,
                    ast::BinaryOp::Rem => BinOp::Rem,
                    ast::BinaryOp::Eq => BinOp::Eq,
                    ast::BinaryOp::Ne => BinOp::Ne,
                    ast::BinaryOp::Lt => BinOp::Lt,
                    ast::BinaryOp::Le => BinOp::Le,
                    ast::BinaryOp::Gt => BinOp::Gt,
                    ast::BinaryOp::Ge => BinOp::Ge,
                };
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            ExpressionKind::Tuple(items) => {
                check_limit("tuple elements", items.len(), u16::MAX as usize)?;
                Expr::Tuple(
                    items
                        .iter()
                        .map(|item| self.expression(item))
                        .collect::<Result<_, _>>()?,
                )
            }
            ExpressionKind::Index { base, index } => Expr::Index {
                base: Box::new(self.expression(base)?),
                index: *index,
            },
        })
    }
}
