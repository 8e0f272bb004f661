//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::lexer::{Builtin, Position, Token};
use std::collections::HashMap;
use std::rc::Rc;

/// Index value of variable and call nodes before resolution.
pub const UNRESOLVED: usize = usize::MAX;

/// The scope a resolved name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Predefined variables (`NF`, `FS`, ...), fixed index table.
    Special,
    /// Program-wide user names, dense per-program indices.
    Global,
    /// Function parameters, dense per-function indices.
    Local,
}

/// An entire parsed AWK program.
#[derive(Debug, Default)]
pub struct Program {
    pub begin: Vec<Vec<Stmt>>,
    pub actions: Vec<Action>,
    pub end: Vec<Vec<Stmt>>,
    pub functions: Vec<Function>,
}

/// A parsed program plus the global index maps produced by the resolver.
/// Scalars and arrays occupy separate index spaces.
#[derive(Debug)]
pub struct ResolvedProgram {
    pub program: Program,
    pub scalars: HashMap<String, usize>,
    pub arrays: HashMap<String, usize>,
}

/// A pattern-action rule. `pattern` holds zero exprs (match every record),
/// one (expression pattern), or two (range pattern). A missing body means
/// `{ print }`.
#[derive(Debug)]
pub struct Action {
    pub pattern: Vec<Expr>,
    pub body: Option<Vec<Stmt>>,
}

/// A user-defined function. `arrays` is filled in by the resolver: true for
/// each parameter inferred to be an array.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub arrays: Vec<bool>,
    pub body: Vec<Stmt>,
    pub pos: Position,
}

/// A scalar variable reference. `scope` and `index` are set by the resolver.
#[derive(Debug)]
pub struct VarExpr {
    pub name: String,
    pub pos: Position,
    pub scope: Scope,
    pub index: usize,
}

impl VarExpr {
    pub fn new(name: impl Into<String>, pos: Position) -> Self {
        Self {
            name: name.into(),
            pos,
            scope: Scope::Global,
            index: UNRESOLVED,
        }
    }
}

/// An array reference. Not a stand-alone expression: appears subscripted, in
/// `delete`, for-in, `split`, and `(i) in a`. `scope` and `index` are set by
/// the resolver (`index` is in the array index space).
#[derive(Debug)]
pub struct ArrayExpr {
    pub name: String,
    pub pos: Position,
    pub scope: Scope,
    pub index: usize,
}

impl ArrayExpr {
    pub fn new(name: impl Into<String>, pos: Position) -> Self {
        Self {
            name: name.into(),
            pos,
            scope: Scope::Global,
            index: UNRESOLVED,
        }
    }
}

/// A call to a user-defined (or host-provided native) function. `index` and
/// `native` are set by the resolver.
#[derive(Debug)]
pub struct UserCallExpr {
    pub name: String,
    pub args: Vec<Expr>,
    pub pos: Position,
    pub native: bool,
    pub index: usize,
}

#[derive(Debug)]
pub enum Expr {
    Num(f64),
    Str(Rc<str>),
    /// A stand-alone `/re/`, equivalent to `$0 ~ /re/`.
    Regex(Rc<str>),
    /// `$expr`
    Field(Box<Expr>),
    Var(VarExpr),
    /// `a[i]` or `a[i, j, ...]`
    Index {
        array: ArrayExpr,
        index: Vec<Expr>,
    },
    /// `!x`, `-x`, `+x`
    Unary {
        op: Token,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    /// `(i) in a` or `(i, j) in a`
    In {
        index: Vec<Expr>,
        array: ArrayExpr,
    },
    /// `cond ? t : f`
    Cond {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// `x = expr`; left is a var, `a[i]`, or `$n`
    Assign {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `x op= expr`; `op` is the underlying binary operator token
    AugAssign {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    /// `++x`, `x--`, ...
    Incr {
        expr: Box<Expr>,
        op: Token,
        pre: bool,
    },
    /// Builtin function call
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    /// A bare array name as a call argument (`split`'s destination).
    ArrayRef(ArrayExpr),
    UserCall(UserCallExpr),
    /// `getline`, `getline lvalue`, `getline [lvalue] < file`,
    /// `cmd | getline [lvalue]`
    Getline {
        command: Option<Box<Expr>>,
        target: Option<Box<Expr>>,
        file: Option<Box<Expr>>,
    },
    /// A parenthesized expression list; only legal as print/printf arguments.
    Multi(Vec<Expr>),
}

impl Expr {
    /// True if the expression can appear on the left of an assignment, in a
    /// `++`/`--`, or as the third argument of `sub`/`gsub`.
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expr::Var(_) | Expr::Index { .. } | Expr::Field(_))
    }
}

/// Output redirection kind for `print`/`printf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// `> dest`
    File,
    /// `>> dest`
    Append,
    /// `| cmd`
    Pipe,
}

#[derive(Debug)]
pub enum Stmt {
    Print {
        args: Vec<Expr>,
        redirect: Option<(Redirect, Expr)>,
    },
    Printf {
        args: Vec<Expr>,
        redirect: Option<(Redirect, Expr)>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    For {
        pre: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    ForIn {
        var: VarExpr,
        array: ArrayExpr,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    Break(Position),
    Continue(Position),
    Next(Position),
    Exit(Option<Expr>),
    /// `delete a[i]`, or `delete a` when `index` is empty
    Delete {
        array: ArrayExpr,
        index: Vec<Expr>,
    },
    Return(Option<Expr>),
    Block(Vec<Stmt>),
}
