//! Resolved method bodies
//!
//! The front end turns parsed source into this form: locals are slots,
//! attributes and methods are indices into the class, and every operator
//! call names the exact library operator for the module's bytecode version.
//! Both the printer and code generation work from it.

/// Class-type descriptor of a program module
#[derive(Debug, Clone, PartialEq)]
pub struct ClassType {
    /// Class name
    pub name: String,
    /// Attribute names, in slot order
    pub attributes: Vec<String>,
    /// Methods, in declaration order
    pub methods: Vec<Method>,
}

impl ClassType {
    /// Index of a method by name
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    /// Index of an attribute by name
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a == name)
    }

    /// Look up a method by name
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A compiled method
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Number of parameters after `self`
    pub param_count: u16,
    /// Names of all local slots; parameters come first
    pub locals: Vec<String>,
    /// Method body
    pub body: Vec<Stmt>,
}

/// Statement with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement kind
    pub kind: StmtKind,
    /// Line in the source the method was compiled from
    pub line: u32,
    /// Column in the source the method was compiled from
    pub column: u32,
}

/// Resolved statement
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Store to a local slot; `declare` marks the `let` that introduced it
    Assign {
        /// Target slot
        slot: u16,
        /// Whether this is the slot's declaration
        declare: bool,
        /// Stored value
        value: Expr,
    },
    /// Store to an attribute slot
    SetAttr {
        /// Attribute slot
        slot: u16,
        /// Stored value
        value: Expr,
    },
    /// Conditional
    If {
        /// Condition
        condition: Expr,
        /// Taken when truthy
        then_body: Vec<Stmt>,
        /// Taken otherwise
        else_body: Vec<Stmt>,
    },
    /// Loop
    While {
        /// Condition
        condition: Expr,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// Return, `None` when the value is omitted
    Return(Option<Expr>),
    /// Expression evaluated for effect
    Expr(Expr),
}

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `None`
    None,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal
    Str(String),
}

/// Operators with a dedicated opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl BinOp {
    /// Source spelling
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    /// Library operator used when promoted opcodes are disabled
    pub fn operator_name(self) -> Option<&'static str> {
        match self {
            BinOp::Add => Some("add"),
            BinOp::Sub => Some("sub"),
            BinOp::Mul => Some("mul"),
            BinOp::Rem => Some("rem"),
            _ => None,
        }
    }

    /// Whether this is a comparison
    pub fn is_comparison(self) -> bool {
        self.operator_name().is_none()
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `-x`
    Neg,
    /// `not x`
    Not,
}

/// Resolved expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal
    Literal(Literal),
    /// `CONSTANTS.cN`
    Constant(u32),
    /// Local slot
    Local(u16),
    /// Attribute slot
    Attr(u16),
    /// Call of another method of the class
    CallMethod {
        /// Method index
        method: u16,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Call of a library operator
    CallOp {
        /// Operator name, already resolved for the bytecode version
        operator: String,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Binary operation with a dedicated opcode
    Binary {
        /// Operator
        op: BinOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Short-circuit `and`
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit `or`
    Or(Box<Expr>, Box<Expr>),
    /// Tuple construction
    Tuple(Vec<Expr>),
    /// Tuple or tensor element
    Index {
        /// Indexed value
        base: Box<Expr>,
        /// Element index
        index: u16,
    },
}

impl Expr {
    /// Visit this expression and all sub-expressions
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::CallMethod { args, .. } | Expr::CallOp { args, .. } | Expr::Tuple(args) => {
                args.iter().for_each(|a| a.walk(f))
            }
            Expr::Binary { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Index { base, .. } => base.walk(f),
            Expr::Literal(_) | Expr::Constant(_) | Expr::Local(_) | Expr::Attr(_) => {}
        }
    }
}

impl Stmt {
    /// Visit every expression in this statement, including nested bodies
    pub fn walk_exprs(&self, f: &mut impl FnMut(&Expr)) {
        match &self.kind {
            StmtKind::Assign { value, .. } | StmtKind::SetAttr { value, .. } => value.walk(f),
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                condition.walk(f);
                then_body.iter().chain(else_body).for_each(|s| s.walk_exprs(f));
            }
            StmtKind::While { condition, body } => {
                condition.walk(f);
                body.iter().for_each(|s| s.walk_exprs(f));
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    value.walk(f);
                }
            }
            StmtKind::Expr(value) => value.walk(f),
        }
    }
}

impl Method {
    /// Visit every expression in the body
    pub fn walk_exprs(&self, mut f: impl FnMut(&Expr)) {
        self.body.iter().for_each(|s| s.walk_exprs(&mut f));
    }
}
