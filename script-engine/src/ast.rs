//! Closed syntax tree for indicator scripts.
//!
//! One variant per construct the compiler rewrites; every pass matches exhaustively so a
//! construct without a rule is caught where it is matched, never silently skipped.

use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// 1-based line/column of the first character of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// The whole script: exactly one root function whose single parameter is the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub root: Rc<Function>,
}

impl Program {
    /// Name of the context parameter. The parser guarantees there is exactly one.
    pub fn root_param(&self) -> &str {
        self.root
            .params
            .first()
            .map(|p| p.name.as_str())
            .unwrap_or("context")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionStyle {
    Arrow,
    Classic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Option<Ident>,
    pub params: Vec<Ident>,
    pub body: FunctionBody,
    pub style: FunctionStyle,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

impl DeclKind {
    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Const => "const",
            DeclKind::Let => "let",
            DeclKind::Var => "var",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub kind: DeclKind,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declarator {
    pub target: Pattern,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Ident(Ident),
    /// `{ a, b: c }`; each entry is (property key, bound name).
    Object(Vec<(String, Ident)>),
    /// `[a, , b]`; holes are `None`.
    Array(Vec<Option<Ident>>),
}

impl Pattern {
    pub fn bound_names(&self) -> Vec<&Ident> {
        match self {
            Pattern::Ident(id) => vec![id],
            Pattern::Object(props) => props.iter().map(|(_, id)| id).collect(),
            Pattern::Array(items) => items.iter().flatten().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    Decl(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Decl(VarDecl),
    Expr(Expr),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    Function(Rc<Function>),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

impl UpdateOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UpdateOp::Increment => "++",
            UpdateOp::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::StrictEq => "===",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictNotEq => "!==",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "**" => BinaryOp::Pow,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "===" => BinaryOp::StrictEq,
            "!=" => BinaryOp::NotEq,
            "!==" => BinaryOp::StrictNotEq,
            _ => return None,
        })
    }

    /// Binding power; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq | BinaryOp::StrictEq | BinaryOp::NotEq | BinaryOp::StrictNotEq => 8,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 9,
            BinaryOp::Add | BinaryOp::Sub => 11,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 12,
            BinaryOp::Pow => 13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
            LogicalOp::Nullish => "??",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            LogicalOp::Nullish => 3,
            LogicalOp::Or => 4,
            LogicalOp::And => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "=" => AssignOp::Assign,
            "+=" => AssignOp::Add,
            "-=" => AssignOp::Sub,
            "*=" => AssignOp::Mul,
            "/=" => AssignOp::Div,
            "%=" => AssignOp::Rem,
            _ => return None,
        })
    }

    /// Arithmetic applied by a compound assignment.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(Ident),
    This,
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<Function>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(Ident::new(name, Span::default()))
    }

    pub fn member(object: Expr, property: impl Into<String>) -> Expr {
        Expr::Member {
            object: Box::new(object),
            property: property.into(),
        }
    }

    pub fn index(object: Expr, index: Expr) -> Expr {
        Expr::Index {
            object: Box::new(object),
            index: Box::new(index),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assign {
            op: AssignOp::Assign,
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn as_ident(&self) -> Option<&Ident> {
        match self {
            Expr::Ident(id) => Some(id),
            _ => None,
        }
    }

    /// The root parameter itself, `root.x` or `root.x.y`: a value read straight off the context.
    pub fn is_context_read(&self, root: &str) -> bool {
        match self {
            Expr::Ident(id) => id.name == root,
            Expr::Member { object, .. } => match object.as_ref() {
                Expr::Ident(id) => id.name == root,
                Expr::Member { object, .. } => {
                    matches!(object.as_ref(), Expr::Ident(id) if id.name == root)
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Position of the left-most identifier, used to locate diagnostics.
    pub fn span(&self) -> Option<Span> {
        match self {
            Expr::Ident(id) => Some(id.span),
            Expr::Member { object, .. } | Expr::Index { object, .. } => object.span(),
            Expr::Call { callee, args } => {
                callee.span().or_else(|| args.iter().find_map(Expr::span))
            }
            Expr::Unary { arg, .. } => arg.span(),
            Expr::Update { target, .. } => target.span(),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.span().or_else(|| right.span())
            }
            Expr::Conditional { test, .. } => test.span(),
            Expr::Assign { target, .. } => target.span(),
            Expr::Array(items) => items.iter().find_map(Expr::span),
            Expr::Object(props) => props.iter().find_map(|(_, v)| v.span()),
            Expr::Function(f) => Some(f.span),
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::This => None,
        }
    }
}
