//! Core node definitions for the AST.
//!
//! Every expression and statement is one variant of a closed enum, so
//! both the type checker and the code generator dispatch with exhaustive
//! matches: adding a node kind without handling it everywhere is a
//! compile error rather than a runtime surprise.
//!
//! Nodes own their children outright (the tree has no sharing) and carry
//! a `resolved` slot that starts out empty, is written by the type
//! checker, rewritten by the lowering pass, and only then read by the
//! code generator.

use serde_json::Value as JsonValue;

use crate::Span;

use super::types::{LiteralValue, Ty};

/// An expression node: a kind, the inferred type, and a source span.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    /// Written by the type checker, lowered in place afterwards. Empty
    /// until checking has visited this node.
    pub resolved: Option<Ty>,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind,
            resolved: None,
            span,
        }
    }

    /// The resolved type of this node.
    ///
    /// # Panics
    ///
    /// Panics when checking has not populated the slot; the pipeline
    /// asserts full resolution before the generator runs, so reaching
    /// this in generation is a compiler bug.
    pub fn ty(&self) -> &Ty {
        match &self.resolved {
            Some(ty) => ty,
            None => panic!("unresolved expression node: {:?}", self.kind),
        }
    }
}

/// The closed set of expression kinds.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(LiteralValue),
    Variable(String),
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    /// `x++` / `x--` on a named variable. Yields the old value.
    Postfix {
        op: String,
        target: String,
    },
    /// Assignment in expression position; yields the assigned value.
    Assignment {
        target: String,
        value: Box<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Argument>,
    },
    AnonymousFunction {
        params: Vec<Parameter>,
        body: Vec<Stmt>,
    },
    ArrayLiteral(Vec<Expr>),
    JsonLiteral(JsonValue),
    /// Inserted by unification when an operand changes representation.
    /// Never produced by the parser.
    Conversion {
        from: Ty,
        to: Ty,
        inner: Box<Expr>,
    },
}

/// A call-site argument, positional or named.
///
/// After argument finalization every surviving argument is positional.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

impl Argument {
    pub fn positional(value: Expr) -> Self {
        Argument { name: None, value }
    }

    pub fn named(name: &str, value: Expr) -> Self {
        Argument {
            name: Some(String::from(name)),
            value,
        }
    }
}

/// A declared parameter of a function definition or anonymous function.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<Ty>,
    pub default: Option<Expr>,
}

/// A statement node.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    /// `Nothing` for most statements; function definitions resolve to
    /// their inferred return type.
    pub resolved: Option<Ty>,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt {
            kind,
            resolved: None,
            span,
        }
    }
}

/// The closed set of statement kinds.
#[derive(Debug, Clone)]
pub enum StmtKind {
    Let {
        name: String,
        annotation: Option<Ty>,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Return(Option<Expr>),
    Print(Expr),
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        elseifs: Vec<ElseIf>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        kind: ForKind,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    /// An expression evaluated for its effect; a non-`Nothing` result is
    /// dropped by the generator.
    Call(Expr),
    FunctionDefinition {
        name: String,
        params: Vec<Parameter>,
        return_annotation: Option<Ty>,
        body: Vec<Stmt>,
    },
}

/// One `elseif` clause of an `If` statement.
#[derive(Debug, Clone)]
pub struct ElseIf {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

/// The loop header of a `for` statement.
#[derive(Debug, Clone)]
pub enum ForKind {
    /// `for i = start to end [step s]` - inclusive upper bound.
    Range {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
    },
    /// `for x in seq` over an array value.
    Each { var: String, sequence: Expr },
}

/// The root of a parsed source file: an ordered statement sequence.
#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Program { statements }
    }
}
