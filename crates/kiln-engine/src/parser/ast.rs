//! Abstract syntax tree for kiln source files.

use super::token::Span;

/// A parsed source file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Class blocks in file order
    pub classes: Vec<ClassDecl>,
}

/// `class Name { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub attributes: Vec<AttrDecl>,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}

/// `attr name;`
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDecl {
    pub name: String,
    pub span: Span,
}

/// `def name(self, params...) { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    /// Parameters after `self`
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `let name = value;`
    Let { name: String, value: Expression },
    /// `name = value;` or `self.name = value;`
    Assign { target: AssignTarget, value: Expression },
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    Return(Option<Expression>),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Local(String),
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// `CONSTANTS.cN`
    Constant(u32),
    /// Local variable or parameter
    Name(String),
    /// `self.name`
    Attribute(String),
    /// `self.name(args)`
    MethodCall { method: String, args: Vec<Expression> },
    /// `ops.name(args)`
    OperatorCall { operator: String, args: Vec<Expression> },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Tuple(Vec<Expression>),
    /// `base[index]`
    Index { base: Box<Expression>, index: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Source spelling
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}
