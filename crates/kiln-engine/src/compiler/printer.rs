//! Source printer
//!
//! Prints a [`ClassType`] back to kiln source. The output parses back to an
//! equivalent class: parentheses are emitted only where precedence needs
//! them, and literals that have no source spelling (NaN, infinities,
//! `i64::MIN`) are written as expressions producing the same value.

use super::ir::{BinOp, ClassType, Expr, Literal, Method, Stmt, StmtKind, UnOp};
use kiln_bytecode::ConstantPool;
use std::collections::BTreeMap;
use std::fmt::Write;

const INDENT: &str = "    ";

/// Archive path of the source for `class`
pub fn source_path(class: &ClassType) -> String {
    format!("code/{}.kl", class.name)
}

/// Extract the embeddable source files and the constants they reference
pub fn extract(
    class: &ClassType,
    constants: &ConstantPool,
) -> (BTreeMap<String, String>, ConstantPool) {
    let mut sources = BTreeMap::new();
    sources.insert(source_path(class), print_class(class));
    (sources, constants.clone())
}

/// Print a class as source
pub fn print_class(class: &ClassType) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "class {} {{", class.name);
    for attr in &class.attributes {
        let _ = writeln!(out, "{INDENT}attr {attr};");
    }
    for (i, method) in class.methods.iter().enumerate() {
        if i > 0 || !class.attributes.is_empty() {
            out.push('\n');
        }
        print_method(&mut out, class, method);
    }
    out.push_str("}\n");
    out
}

fn print_method(out: &mut String, class: &ClassType, method: &Method) {
    let params = &method.locals[..method.param_count as usize];
    let _ = write!(out, "{INDENT}def {}(self", method.name);
    for param in params {
        let _ = write!(out, ", {param}");
    }
    out.push_str(") {\n");
    let printer = Printer { class, method };
    printer.block(out, &method.body, 2);
    let _ = writeln!(out, "{INDENT}}}");
}

struct Printer<'a> {
    class: &'a ClassType,
    method: &'a Method,
}

impl Printer<'_> {
    fn local(&self, slot: u16) -> &str {
        self.method
            .locals
            .get(slot as usize)
            .map_or("_", String::as_str)
    }

    fn attribute(&self, slot: u16) -> &str {
        self.class
            .attributes
            .get(slot as usize)
            .map_or("_", String::as_str)
    }

    fn block(&self, out: &mut String, body: &[Stmt], depth: usize) {
        for stmt in body {
            self.statement(out, stmt, depth);
        }
    }

    fn indent(out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str(INDENT);
        }
    }

    fn statement(&self, out: &mut String, stmt: &Stmt, depth: usize) {
        Self::indent(out, depth);
        match &stmt.kind {
            StmtKind::Assign {
                slot,
                declare,
                value,
            } => {
                if *declare {
                    out.push_str("let ");
                }
                let _ = writeln!(out, "{} = {};", self.local(*slot), self.expr(value, 0));
            }
            StmtKind::SetAttr { slot, value } => {
                let _ = writeln!(out, "self.{} = {};", self.attribute(*slot), self.expr(value, 0));
            }
            StmtKind::If { .. } => {
                self.if_chain(out, stmt, depth);
                out.push('\n');
            }
            StmtKind::While { condition, body } => {
                let _ = writeln!(out, "while {} {{", self.expr(condition, 0));
                self.block(out, body, depth + 1);
                Self::indent(out, depth);
                out.push_str("}\n");
            }
            StmtKind::Return(None) => out.push_str("return;\n"),
            StmtKind::Return(Some(value)) => {
                let _ = writeln!(out, "return {};", self.expr(value, 0));
            }
            StmtKind::Expr(value) => {
                let _ = writeln!(out, "{};", self.expr(value, 0));
            }
        }
    }

    /// Prints `if ... { } else if ... { } else { }` without the trailing newline
    fn if_chain(&self, out: &mut String, stmt: &Stmt, depth: usize) {
        let StmtKind::If {
            condition,
            then_body,
            else_body,
        } = &stmt.kind
        else {
            return;
        };
        let _ = writeln!(out, "if {} {{", self.expr(condition, 0));
        self.block(out, then_body, depth + 1);
        Self::indent(out, depth);
        out.push('}');

        match else_body.as_slice() {
            [] => {}
            [nested @ Stmt {
                kind: StmtKind::If { .. },
                ..
            }] => {
                out.push_str(" else ");
                self.if_chain(out, nested, depth);
            }
            _ => {
                out.push_str(" else {\n");
                self.block(out, else_body, depth + 1);
                Self::indent(out, depth);
                out.push('}');
            }
        }
    }

    /// Print `expr`, parenthesized if it binds looser than `min_prec`
    fn expr(&self, expr: &Expr, min_prec: u8) -> String {
        let (text, prec) = self.expr_inner(expr);
        if prec < min_prec {
            format!("({text})")
        } else {
            text
        }
    }

    fn args(&self, args: &[Expr]) -> String {
        args.iter()
            .map(|a| self.expr(a, 0))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr_inner(&self, expr: &Expr) -> (String, u8) {
        match expr {
            Expr::Literal(literal) => literal_text(literal),
            Expr::Constant(index) => (format!("CONSTANTS.c{index}"), 8),
            Expr::Local(slot) => (self.local(*slot).to_string(), 8),
            Expr::Attr(slot) => (format!("self.{}", self.attribute(*slot)), 8),
            Expr::CallMethod { method, args } => {
                let name = self
                    .class
                    .methods
                    .get(*method as usize)
                    .map_or("_", |m| m.name.as_str());
                (format!("self.{name}({})", self.args(args)), 8)
            }
            Expr::CallOp { operator, args } => match (operator.as_str(), args.as_slice()) {
                ("div", [left, right]) => (
                    format!("{} / {}", self.expr(left, 6), self.expr(right, 7)),
                    6,
                ),
                _ => (format!("ops.{operator}({})", self.args(args)), 8),
            },
            Expr::Binary { op, left, right } => {
                let (prec, lhs, rhs) = match op {
                    BinOp::Add | BinOp::Sub => (5, 5, 6),
                    BinOp::Mul | BinOp::Rem => (6, 6, 7),
                    // Comparisons don't chain
                    _ => (4, 5, 5),
                };
                (
                    format!(
                        "{} {} {}",
                        self.expr(left, lhs),
                        op.symbol(),
                        self.expr(right, rhs)
                    ),
                    prec,
                )
            }
            Expr::Unary {
                op: UnOp::Neg,
                operand,
            } => (format!("-{}", self.expr(operand, 7)), 7),
            Expr::Unary {
                op: UnOp::Not,
                operand,
            } => (format!("not {}", self.expr(operand, 3)), 3),
            Expr::And(left, right) => (
                format!("{} and {}", self.expr(left, 2), self.expr(right, 3)),
                2,
            ),
            Expr::Or(left, right) => (
                format!("{} or {}", self.expr(left, 1), self.expr(right, 2)),
                1,
            ),
            Expr::Tuple(items) => {
                let text = match items.as_slice() {
                    [] => "()".to_string(),
                    [single] => format!("({},)", self.expr(single, 0)),
                    _ => format!("({})", self.args(items)),
                };
                (text, 8)
            }
            Expr::Index { base, index } => (format!("{}[{index}]", self.expr(base, 8)), 8),
        }
    }
}

fn literal_text(literal: &Literal) -> (String, u8) {
    match literal {
        Literal::None => ("None".to_string(), 8),
        Literal::Bool(b) => (b.to_string(), 8),
        Literal::Int(i64::MIN) => (format!("(-{} - 1)", i64::MAX), 8),
        Literal::Int(i) if *i < 0 => (format!("-{}", i.unsigned_abs()), 7),
        Literal::Int(i) => (i.to_string(), 8),
        Literal::Float(x) if x.is_nan() => ("ops.float(\"nan\")".to_string(), 8),
        Literal::Float(x) if x.is_infinite() => {
            let text = if *x > 0.0 { "inf" } else { "-inf" };
            (format!("ops.float(\"{text}\")"), 8)
        }
        Literal::Float(x) if x.is_sign_negative() => (format!("-{:?}", x.abs()), 7),
        Literal::Float(x) => (format!("{x:?}"), 8),
        Literal::Str(s) => (quote(s), 8),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use kiln_bytecode::BYTECODE_VERSION;

    /// Statement positions differ between the original and printed source
    fn strip_positions(class: &ClassType) -> ClassType {
        fn strip(body: &[Stmt]) -> Vec<Stmt> {
            body.iter()
                .map(|stmt| Stmt {
                    kind: match &stmt.kind {
                        StmtKind::If {
                            condition,
                            then_body,
                            else_body,
                        } => StmtKind::If {
                            condition: condition.clone(),
                            then_body: strip(then_body),
                            else_body: strip(else_body),
                        },
                        StmtKind::While { condition, body } => StmtKind::While {
                            condition: condition.clone(),
                            body: strip(body),
                        },
                        other => other.clone(),
                    },
                    line: 0,
                    column: 0,
                })
                .collect()
        }
        let mut class = class.clone();
        for method in &mut class.methods {
            method.body = strip(&method.body);
        }
        class
    }

    fn roundtrip(source: &str) -> (ClassType, ClassType) {
        let class = compile_source(source, 2, BYTECODE_VERSION).unwrap();
        let printed = print_class(&class);
        let reparsed = compile_source(&printed, 2, BYTECODE_VERSION)
            .unwrap_or_else(|e| panic!("printed source failed to compile: {e}\n{printed}"));
        (strip_positions(&class), strip_positions(&reparsed))
    }

    #[test]
    fn test_print_simple_class() {
        let class = compile_source(
            "class Net { attr w; def forward(self, x) { return x + self.w; } }",
            0,
            BYTECODE_VERSION,
        )
        .unwrap();
        assert_eq!(
            print_class(&class),
            "class Net {\n    attr w;\n\n    def forward(self, x) {\n        return x + self.w;\n    }\n}\n"
        );
    }

    #[test]
    fn test_precedence_roundtrip() {
        let (class, reparsed) = roundtrip(
            "class P {
                def f(self, a, b, c) {
                    let x = (a + b) * c - a / (b - c);
                    let y = a - (b - c);
                    let z = not (a < b) and (b == c or a != c);
                    let w = -(a + b) % c;
                    return (x, y, z, w, (a,), (), CONSTANTS.c1[0]);
                }
            }",
        );
        assert_eq!(class, reparsed);
        let printed = print_class(&class);
        assert!(printed.contains("(a + b) * c - a / (b - c)"));
        assert!(printed.contains("a - (b - c)"));
    }

    #[test]
    fn test_control_flow_roundtrip() {
        let (class, reparsed) = roundtrip(
            "class C {
                attr n;
                def f(self, x) {
                    let i = 0;
                    while i < x { i = i + 1; self.n = i; }
                    if x > 10 { return 1; } else if x > 5 { return 2; } else { ops.abs(x); }
                    return;
                }
            }",
        );
        assert_eq!(class, reparsed);
        assert!(print_class(&class).contains("} else if x > 5 {"));
    }

    #[test]
    fn test_literal_spelling() {
        assert_eq!(literal_text(&Literal::Int(-3)).0, "-3");
        assert_eq!(literal_text(&Literal::Int(i64::MIN)).0, "(-9223372036854775807 - 1)");
        assert_eq!(literal_text(&Literal::Float(2.0)).0, "2.0");
        assert_eq!(literal_text(&Literal::Float(f64::NAN)).0, "ops.float(\"nan\")");
        assert_eq!(literal_text(&Literal::Float(f64::NEG_INFINITY)).0, "ops.float(\"-inf\")");
        assert_eq!(literal_text(&Literal::Float(-0.5)).0, "-0.5");
        assert_eq!(literal_text(&Literal::Str("a\"b\n\u{1}".into())).0, "\"a\\\"b\\n\\u{1}\"");
    }

    #[test]
    fn test_versioned_operators_survive() {
        // Old-version division prints as an explicit operator call
        let class = compile_source("class D { def f(self, a) { return a / 2; } }", 0, 2).unwrap();
        let printed = print_class(&class);
        assert!(printed.contains("ops._div_0_3(a, 2)"));
        let reparsed = compile_source(&printed, 0, BYTECODE_VERSION).unwrap();
        assert_eq!(strip_positions(&class), strip_positions(&reparsed));
    }

    #[test]
    fn test_extract_paths() {
        let class = compile_source("class Net { def f(self) { return CONSTANTS.c0; } }", 1, BYTECODE_VERSION).unwrap();
        let pool = ConstantPool::from(vec![kiln_bytecode::Constant::Int(4)]);
        let (sources, constants) = extract(&class, &pool);
        assert_eq!(sources.keys().collect::<Vec<_>>(), vec!["code/Net.kl"]);
        assert_eq!(constants, pool);
    }
}
