//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::ast::{
    Action, ArrayExpr, Expr, Function, Program, Redirect, Stmt, UserCallExpr, VarExpr,
};
use crate::lexer::{Builtin, Lexer, PosError, Position, Token};
use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    /// Minimum and maximum argument counts per builtin.
    static ref BUILTIN_ARITY: HashMap<Builtin, (usize, usize)> = HashMap::from([
        (Builtin::Atan2, (2, 2)),
        (Builtin::Close, (1, 1)),
        (Builtin::Cos, (1, 1)),
        (Builtin::Exp, (1, 1)),
        (Builtin::Fflush, (0, 1)),
        (Builtin::Gsub, (2, 3)),
        (Builtin::Index, (2, 2)),
        (Builtin::Int, (1, 1)),
        (Builtin::Length, (0, 1)),
        (Builtin::Log, (1, 1)),
        (Builtin::Match, (2, 2)),
        (Builtin::Rand, (0, 0)),
        (Builtin::Sin, (1, 1)),
        (Builtin::Split, (2, 3)),
        (Builtin::Sprintf, (1, usize::MAX)),
        (Builtin::Sqrt, (1, 1)),
        (Builtin::Srand, (0, 1)),
        (Builtin::Sub, (2, 3)),
        (Builtin::Substr, (2, 3)),
        (Builtin::System, (1, 1)),
        (Builtin::Tolower, (1, 1)),
        (Builtin::Toupper, (1, 1)),
    ]);
}

/// Parse a complete AWK program.
pub fn parse(src: &str) -> Result<Program, PosError> {
    let mut parser = Parser::new(src)?;
    parser.program()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    tok: Token,
    pos: Position,
    in_function: bool,
    in_begin_or_end: bool,
    loop_depth: u32,
    /// Inside an unparenthesized print/printf argument list, where `>` and
    /// `|` are redirections rather than operators.
    in_print: bool,
    /// A parenthesized expression list is acceptable here (print/printf
    /// argument position).
    allow_multi: bool,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, PosError> {
        let mut parser = Parser {
            lexer: Lexer::new(src),
            tok: Token::Eof,
            pos: Position::new(1, 1),
            in_function: false,
            in_begin_or_end: false,
            loop_depth: 0,
            in_print: false,
            allow_multi: false,
        };
        parser.next()?;
        Ok(parser)
    }

    fn next(&mut self) -> Result<(), PosError> {
        let (pos, tok) = self.lexer.scan()?;
        self.pos = pos;
        self.tok = tok;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> PosError {
        PosError::new(self.pos, message)
    }

    fn expect(&mut self, tok: Token) -> Result<(), PosError> {
        if self.tok == tok {
            self.next()
        } else {
            Err(self.error(format!("expected '{}', found '{}'", tok, self.tok)))
        }
    }

    fn eat(&mut self, tok: Token) -> Result<bool, PosError> {
        if self.tok == tok {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn skip_newlines(&mut self) -> Result<(), PosError> {
        while self.tok == Token::Newline {
            self.next()?;
        }
        Ok(())
    }

    fn skip_terminators(&mut self) -> Result<(), PosError> {
        while self.tok == Token::Newline || self.tok == Token::Semicolon {
            self.next()?;
        }
        Ok(())
    }

    fn program(&mut self) -> Result<Program, PosError> {
        let mut program = Program::default();
        loop {
            self.skip_terminators()?;
            match self.tok {
                Token::Eof => break,
                Token::Function => {
                    self.in_function = true;
                    let function = self.function()?;
                    self.in_function = false;
                    program.functions.push(function);
                }
                Token::Begin => {
                    self.next()?;
                    self.skip_newlines()?;
                    self.in_begin_or_end = true;
                    program.begin.push(self.brace_block()?);
                    self.in_begin_or_end = false;
                }
                Token::End => {
                    self.next()?;
                    self.skip_newlines()?;
                    self.in_begin_or_end = true;
                    program.end.push(self.brace_block()?);
                    self.in_begin_or_end = false;
                }
                Token::Lbrace => {
                    program.actions.push(Action {
                        pattern: Vec::new(),
                        body: Some(self.brace_block()?),
                    });
                }
                _ => {
                    let mut pattern = vec![self.expr()?];
                    if self.eat(Token::Comma)? {
                        self.skip_newlines()?;
                        pattern.push(self.expr()?);
                    }
                    let body = if self.tok == Token::Lbrace {
                        Some(self.brace_block()?)
                    } else {
                        None
                    };
                    program.actions.push(Action { pattern, body });
                }
            }
        }
        Ok(program)
    }

    fn function(&mut self) -> Result<Function, PosError> {
        self.next()?;
        let pos = self.pos;
        let name = match std::mem::replace(&mut self.tok, Token::Eof) {
            Token::Name(name) | Token::FuncName(name) => name,
            other => {
                self.tok = other;
                return Err(self.error("expected function name"));
            }
        };
        self.next()?;
        self.expect(Token::Lparen)?;
        let mut params = Vec::new();
        if self.tok != Token::Rparen {
            loop {
                self.skip_newlines()?;
                let param = match std::mem::replace(&mut self.tok, Token::Eof) {
                    Token::Name(param) => param,
                    other => {
                        self.tok = other;
                        return Err(self.error("expected parameter name"));
                    }
                };
                if params.contains(&param) {
                    return Err(self.error(format!("duplicate parameter name \"{}\"", param)));
                }
                if param == name {
                    return Err(self.error(format!(
                        "can't use function name \"{}\" as parameter name",
                        param
                    )));
                }
                params.push(param);
                self.next()?;
                if !self.eat(Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::Rparen)?;
        self.skip_newlines()?;
        let body = self.brace_block()?;
        let arrays = vec![false; params.len()];
        Ok(Function {
            name,
            params,
            arrays,
            body,
            pos,
        })
    }

    fn brace_block(&mut self) -> Result<Vec<Stmt>, PosError> {
        self.expect(Token::Lbrace)?;
        let stmts = self.stmts()?;
        self.expect(Token::Rbrace)?;
        Ok(stmts)
    }

    fn stmts(&mut self) -> Result<Vec<Stmt>, PosError> {
        let mut result = Vec::new();
        loop {
            self.skip_terminators()?;
            if self.tok == Token::Rbrace || self.tok == Token::Eof {
                break;
            }
            result.push(self.stmt()?);
        }
        Ok(result)
    }

    /// A statement body: `{ ... }`, a single statement, or `;` for none.
    fn body(&mut self) -> Result<Vec<Stmt>, PosError> {
        self.skip_newlines()?;
        match self.tok {
            Token::Lbrace => self.brace_block(),
            Token::Semicolon => {
                self.next()?;
                Ok(Vec::new())
            }
            _ => Ok(vec![self.stmt()?]),
        }
    }

    fn stmt(&mut self) -> Result<Stmt, PosError> {
        match self.tok {
            Token::Lbrace => Ok(Stmt::Block(self.brace_block()?)),
            Token::If => self.if_stmt(),
            Token::While => {
                self.next()?;
                self.expect(Token::Lparen)?;
                let cond = self.expr()?;
                self.expect(Token::Rparen)?;
                self.loop_depth += 1;
                let body = self.body()?;
                self.loop_depth -= 1;
                Ok(Stmt::While { cond, body })
            }
            Token::Do => {
                self.next()?;
                self.loop_depth += 1;
                let body = self.body()?;
                self.loop_depth -= 1;
                self.skip_terminators()?;
                self.expect(Token::While)?;
                self.expect(Token::Lparen)?;
                let cond = self.expr()?;
                self.expect(Token::Rparen)?;
                Ok(Stmt::DoWhile { body, cond })
            }
            Token::For => self.for_stmt(),
            Token::Break => {
                let pos = self.pos;
                if self.loop_depth == 0 {
                    return Err(self.error("break must be inside a loop"));
                }
                self.next()?;
                Ok(Stmt::Break(pos))
            }
            Token::Continue => {
                let pos = self.pos;
                if self.loop_depth == 0 {
                    return Err(self.error("continue must be inside a loop"));
                }
                self.next()?;
                Ok(Stmt::Continue(pos))
            }
            Token::Next => {
                let pos = self.pos;
                if self.in_begin_or_end {
                    return Err(self.error("next can't be inside BEGIN or END"));
                }
                self.next()?;
                Ok(Stmt::Next(pos))
            }
            Token::Exit => {
                self.next()?;
                let status = if starts_expr(&self.tok) {
                    Some(self.expr()?)
                } else {
                    None
                };
                Ok(Stmt::Exit(status))
            }
            Token::Return => {
                if !self.in_function {
                    return Err(self.error("return must be inside a function"));
                }
                self.next()?;
                let value = if starts_expr(&self.tok) {
                    Some(self.expr()?)
                } else {
                    None
                };
                Ok(Stmt::Return(value))
            }
            _ => self.simple_stmt(),
        }
    }

    /// The statement kinds allowed in the header of a C-style `for`.
    fn simple_stmt(&mut self) -> Result<Stmt, PosError> {
        match self.tok {
            Token::Print => {
                self.next()?;
                let (args, redirect) = self.print_args()?;
                Ok(Stmt::Print { args, redirect })
            }
            Token::Printf => {
                let pos = self.pos;
                self.next()?;
                let (args, redirect) = self.print_args()?;
                if args.is_empty() {
                    return Err(PosError::new(pos, "printf requires a format string"));
                }
                Ok(Stmt::Printf { args, redirect })
            }
            Token::Delete => {
                self.next()?;
                let array = self.array_name()?;
                let mut index = Vec::new();
                if self.eat(Token::Lbracket)? {
                    index = self.expr_list()?;
                    self.expect(Token::Rbracket)?;
                }
                Ok(Stmt::Delete { array, index })
            }
            _ => {
                let expr = self.expr()?;
                if let Expr::Multi(_) = expr {
                    return Err(self.error("unexpected comma-separated expression"));
                }
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, PosError> {
        self.next()?;
        self.expect(Token::Lparen)?;
        let cond = self.expr()?;
        self.expect(Token::Rparen)?;
        let body = self.body()?;
        // else may follow the body after newlines or a semicolon
        self.skip_terminators()?;
        let else_body = if self.eat(Token::Else)? {
            self.body()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            body,
            else_body,
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, PosError> {
        self.next()?;
        self.expect(Token::Lparen)?;
        let pre = if self.tok == Token::Semicolon {
            None
        } else {
            Some(self.simple_stmt()?)
        };
        if self.tok == Token::Rparen {
            // `for (k in a) body`: the header parsed as an `in` expression
            let pos = self.pos;
            self.next()?;
            return match pre {
                Some(Stmt::Expr(Expr::In { mut index, array })) if index.len() == 1 => {
                    let var = match index.pop().unwrap() {
                        Expr::Var(var) => var,
                        _ => {
                            return Err(PosError::new(
                                pos,
                                "expected a variable before `in` in for-in loop",
                            ))
                        }
                    };
                    self.loop_depth += 1;
                    let body = self.body()?;
                    self.loop_depth -= 1;
                    Ok(Stmt::ForIn { var, array, body })
                }
                _ => Err(PosError::new(pos, "expected ; in for statement")),
            };
        }
        self.expect(Token::Semicolon)?;
        self.skip_newlines()?;
        let cond = if self.tok == Token::Semicolon {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect(Token::Semicolon)?;
        self.skip_newlines()?;
        let post = if self.tok == Token::Rparen {
            None
        } else {
            Some(Box::new(self.simple_stmt()?))
        };
        self.expect(Token::Rparen)?;
        self.loop_depth += 1;
        let body = self.body()?;
        self.loop_depth -= 1;
        Ok(Stmt::For {
            pre: pre.map(Box::new),
            cond,
            post,
            body,
        })
    }

    /// Parse print/printf arguments plus an optional output redirection.
    fn print_args(&mut self) -> Result<(Vec<Expr>, Option<(Redirect, Expr)>), PosError> {
        let mut args = Vec::new();
        if starts_expr(&self.tok) {
            self.in_print = true;
            self.allow_multi = true;
            let first = self.expr();
            self.allow_multi = false;
            let first = match first {
                Ok(expr) => expr,
                Err(err) => {
                    self.in_print = false;
                    return Err(err);
                }
            };
            args.push(first);
            while self.tok == Token::Comma {
                let arg = self.next().and_then(|_| {
                    self.skip_newlines()?;
                    self.expr()
                });
                match arg {
                    Ok(arg) => args.push(arg),
                    Err(err) => {
                        self.in_print = false;
                        return Err(err);
                    }
                }
            }
            self.in_print = false;
        }
        // `print (a, b)` passes the parenthesized list as the arguments
        if args.len() == 1 {
            match args.pop().unwrap() {
                Expr::Multi(exprs) => args = exprs,
                expr => args.push(expr),
            }
        } else if args.iter().any(|arg| matches!(arg, Expr::Multi(_))) {
            return Err(self.error("unexpected comma-separated expression"));
        }
        let redirect = match self.tok {
            Token::Greater => Some(Redirect::File),
            Token::Append => Some(Redirect::Append),
            Token::Pipe => Some(Redirect::Pipe),
            _ => None,
        };
        let redirect = match redirect {
            Some(kind) => {
                self.next()?;
                Some((kind, self.expr()?))
            }
            None => None,
        };
        Ok((args, redirect))
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, PosError> {
        let mut exprs = vec![self.expr()?];
        while self.eat(Token::Comma)? {
            self.skip_newlines()?;
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn array_name(&mut self) -> Result<ArrayExpr, PosError> {
        let pos = self.pos;
        match std::mem::replace(&mut self.tok, Token::Eof) {
            Token::Name(name) => {
                self.next()?;
                Ok(ArrayExpr::new(name, pos))
            }
            other => {
                self.tok = other;
                Err(self.error("expected array name"))
            }
        }
    }

    // Expression grammar, loosest binding first.

    fn expr(&mut self) -> Result<Expr, PosError> {
        self.assign()
    }

    fn assign(&mut self) -> Result<Expr, PosError> {
        let left = self.pipe_getline()?;
        let op = match self.tok {
            Token::Assign => None,
            Token::AddAssign => Some(Token::Add),
            Token::SubAssign => Some(Token::Sub),
            Token::MulAssign => Some(Token::Mul),
            Token::DivAssign => Some(Token::Div),
            Token::ModAssign => Some(Token::Mod),
            Token::PowAssign => Some(Token::Pow),
            _ => return Ok(left),
        };
        if !left.is_lvalue() {
            return Err(self.error("expected a variable, field, or array element"));
        }
        self.next()?;
        let right = Box::new(self.assign()?);
        let left = Box::new(left);
        Ok(match op {
            None => Expr::Assign { left, right },
            Some(op) => Expr::AugAssign { left, op, right },
        })
    }

    fn pipe_getline(&mut self) -> Result<Expr, PosError> {
        let mut expr = self.ternary()?;
        while self.tok == Token::Pipe && !self.in_print {
            self.next()?;
            self.expect(Token::Getline)?;
            let target = self.optional_lvalue()?;
            expr = Expr::Getline {
                command: Some(Box::new(expr)),
                target: target.map(Box::new),
                file: None,
            };
        }
        Ok(expr)
    }

    fn ternary(&mut self) -> Result<Expr, PosError> {
        let cond = self.or()?;
        if !self.eat(Token::Question)? {
            return Ok(cond);
        }
        self.skip_newlines()?;
        let if_true = self.ternary()?;
        self.expect(Token::Colon)?;
        self.skip_newlines()?;
        let if_false = self.ternary()?;
        Ok(Expr::Cond {
            cond: Box::new(cond),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    fn or(&mut self) -> Result<Expr, PosError> {
        let mut left = self.and()?;
        while self.tok == Token::Or {
            self.next()?;
            self.skip_newlines()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: Token::Or,
                right: Box::new(self.and()?),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, PosError> {
        let mut left = self.in_expr()?;
        while self.tok == Token::And {
            self.next()?;
            self.skip_newlines()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: Token::And,
                right: Box::new(self.in_expr()?),
            };
        }
        Ok(left)
    }

    fn in_expr(&mut self) -> Result<Expr, PosError> {
        let mut left = self.match_expr()?;
        while self.eat(Token::In)? {
            let array = self.array_name()?;
            left = Expr::In {
                index: vec![left],
                array,
            };
        }
        Ok(left)
    }

    fn match_expr(&mut self) -> Result<Expr, PosError> {
        let mut left = self.compare()?;
        while self.tok == Token::Match || self.tok == Token::NotMatch {
            let op = self.tok.clone();
            self.next()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(self.compare()?),
            };
        }
        Ok(left)
    }

    fn compare(&mut self) -> Result<Expr, PosError> {
        let left = self.concat()?;
        let op = match self.tok {
            Token::Less
            | Token::LessOrEqual
            | Token::Equals
            | Token::NotEquals
            | Token::GreaterOrEqual => self.tok.clone(),
            // inside print arguments, > is a redirection
            Token::Greater if !self.in_print => Token::Greater,
            _ => return Ok(left),
        };
        self.next()?;
        // comparison is non-associative
        Ok(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(self.concat()?),
        })
    }

    fn concat(&mut self) -> Result<Expr, PosError> {
        let mut left = self.additive()?;
        while starts_concat_operand(&self.tok) {
            left = Expr::Binary {
                left: Box::new(left),
                op: Token::Concat,
                right: Box::new(self.additive()?),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, PosError> {
        let mut left = self.multiplicative()?;
        while self.tok == Token::Add || self.tok == Token::Sub {
            let op = self.tok.clone();
            self.next()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(self.multiplicative()?),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, PosError> {
        let mut left = self.unary()?;
        while self.tok == Token::Mul || self.tok == Token::Div || self.tok == Token::Mod {
            let op = self.tok.clone();
            self.next()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(self.unary()?),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, PosError> {
        match self.tok {
            Token::Not | Token::Sub | Token::Add => {
                let op = self.tok.clone();
                self.next()?;
                Ok(Expr::Unary {
                    op,
                    expr: Box::new(self.unary()?),
                })
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, PosError> {
        let left = self.postfix()?;
        if self.tok != Token::Pow {
            return Ok(left);
        }
        self.next()?;
        // right-associative; unary on the right allows 2^-3
        Ok(Expr::Binary {
            left: Box::new(left),
            op: Token::Pow,
            right: Box::new(self.unary()?),
        })
    }

    fn postfix(&mut self) -> Result<Expr, PosError> {
        let mut expr = self.primary()?;
        while (self.tok == Token::Incr || self.tok == Token::Decr) && expr.is_lvalue() {
            let op = self.tok.clone();
            self.next()?;
            expr = Expr::Incr {
                expr: Box::new(expr),
                op,
                pre: false,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, PosError> {
        match self.tok.clone() {
            Token::Number(value) => {
                self.next()?;
                Ok(Expr::Num(value))
            }
            Token::String(value) => {
                self.next()?;
                Ok(Expr::Str(value))
            }
            Token::Div | Token::DivAssign => {
                // an operand position: `/` starts an ERE literal
                let (_, tok) = self.lexer.scan_regex(&self.tok)?;
                match tok {
                    Token::Ere(pattern) => {
                        self.next()?;
                        Ok(Expr::Regex(pattern))
                    }
                    _ => unreachable!("scan_regex returned a non-regex token"),
                }
            }
            Token::Dollar => {
                self.next()?;
                Ok(Expr::Field(Box::new(self.primary()?)))
            }
            Token::Incr | Token::Decr => {
                let op = self.tok.clone();
                let pos = self.pos;
                self.next()?;
                let operand = self.primary()?;
                if !operand.is_lvalue() {
                    return Err(PosError::new(
                        pos,
                        "expected a variable, field, or array element",
                    ));
                }
                Ok(Expr::Incr {
                    expr: Box::new(operand),
                    op,
                    pre: true,
                })
            }
            Token::Name(name) => {
                let pos = self.pos;
                self.next()?;
                if self.eat(Token::Lbracket)? {
                    let index = self.bracketed_exprs()?;
                    Ok(Expr::Index {
                        array: ArrayExpr::new(name, pos),
                        index,
                    })
                } else {
                    Ok(Expr::Var(VarExpr::new(name, pos)))
                }
            }
            Token::FuncName(name) => {
                let pos = self.pos;
                self.next()?;
                self.expect(Token::Lparen)?;
                let saved_print = std::mem::replace(&mut self.in_print, false);
                let args = if self.tok == Token::Rparen {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.in_print = saved_print;
                self.expect(Token::Rparen)?;
                Ok(Expr::UserCall(UserCallExpr {
                    name,
                    args,
                    pos,
                    native: false,
                    index: crate::ast::UNRESOLVED,
                }))
            }
            Token::BuiltinFunc(func) => self.builtin_call(func),
            Token::Getline => {
                self.next()?;
                let target = self.optional_lvalue()?;
                let file = if self.eat(Token::Less)? {
                    Some(Box::new(self.concat()?))
                } else {
                    None
                };
                Ok(Expr::Getline {
                    command: None,
                    target: target.map(Box::new),
                    file,
                })
            }
            Token::Lparen => {
                self.next()?;
                let saved_print = std::mem::replace(&mut self.in_print, false);
                let saved_multi = std::mem::replace(&mut self.allow_multi, false);
                let exprs = self.expr_list();
                self.in_print = saved_print;
                self.allow_multi = saved_multi;
                let mut exprs = exprs?;
                self.expect(Token::Rparen)?;
                if self.eat(Token::In)? {
                    let array = self.array_name()?;
                    return Ok(Expr::In {
                        index: exprs,
                        array,
                    });
                }
                if exprs.len() == 1 {
                    Ok(exprs.pop().unwrap())
                } else if self.allow_multi {
                    Ok(Expr::Multi(exprs))
                } else {
                    Err(self.error("unexpected comma-separated expression"))
                }
            }
            _ => Err(self.error(format!("unexpected '{}'", self.tok))),
        }
    }

    fn bracketed_exprs(&mut self) -> Result<Vec<Expr>, PosError> {
        let saved_print = std::mem::replace(&mut self.in_print, false);
        let index = self.expr_list();
        self.in_print = saved_print;
        let index = index?;
        self.expect(Token::Rbracket)?;
        Ok(index)
    }

    fn builtin_call(&mut self, func: Builtin) -> Result<Expr, PosError> {
        let pos = self.pos;
        self.next()?;
        // `length` is the one builtin callable without parentheses
        if func == Builtin::Length && self.tok != Token::Lparen {
            return Ok(Expr::Call {
                func,
                args: Vec::new(),
            });
        }
        self.expect(Token::Lparen)?;
        let saved_print = std::mem::replace(&mut self.in_print, false);
        let args = if self.tok == Token::Rparen {
            Ok(Vec::new())
        } else {
            self.expr_list()
        };
        self.in_print = saved_print;
        let mut args = args?;
        self.expect(Token::Rparen)?;

        let (min, max) = BUILTIN_ARITY[&func];
        if args.len() < min {
            return Err(PosError::new(pos, "not enough arguments in function call"));
        }
        if args.len() > max {
            return Err(PosError::new(pos, "too many arguments in function call"));
        }
        match func {
            Builtin::Split => {
                // the destination must be a bare array name
                let dest = std::mem::replace(&mut args[1], Expr::Num(0.0));
                match dest {
                    Expr::Var(var) => {
                        args[1] = Expr::ArrayRef(ArrayExpr::new(var.name, var.pos));
                    }
                    _ => return Err(PosError::new(pos, "expected an array name in split")),
                }
            }
            Builtin::Sub | Builtin::Gsub => {
                // normalize to three arguments; the default target is $0
                if args.len() == 2 {
                    args.push(Expr::Field(Box::new(Expr::Num(0.0))));
                }
                if !args[2].is_lvalue() {
                    return Err(PosError::new(
                        pos,
                        "expected a variable, field, or array element",
                    ));
                }
            }
            _ => {}
        }
        Ok(Expr::Call { func, args })
    }

    /// The optional lvalue target of a getline.
    fn optional_lvalue(&mut self) -> Result<Option<Expr>, PosError> {
        match self.tok.clone() {
            Token::Name(name) => {
                let pos = self.pos;
                self.next()?;
                if self.eat(Token::Lbracket)? {
                    let index = self.bracketed_exprs()?;
                    Ok(Some(Expr::Index {
                        array: ArrayExpr::new(name, pos),
                        index,
                    }))
                } else {
                    Ok(Some(Expr::Var(VarExpr::new(name, pos))))
                }
            }
            Token::Dollar => {
                self.next()?;
                Ok(Some(Expr::Field(Box::new(self.primary()?))))
            }
            _ => Ok(None),
        }
    }
}

/// Tokens that may begin an expression (used for optional expressions after
/// `exit`/`return` and for detecting an empty print argument list).
fn starts_expr(tok: &Token) -> bool {
    starts_concat_operand(tok)
        | matches!(
            tok,
            Token::Sub | Token::Add | Token::Getline | Token::Div | Token::DivAssign
        )
}

/// Tokens that may begin the right operand of a concatenation. `-`, `+` and
/// `/` are excluded: those continue the expression as operators instead.
fn starts_concat_operand(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Number(_)
            | Token::String(_)
            | Token::Name(_)
            | Token::FuncName(_)
            | Token::BuiltinFunc(_)
            | Token::Dollar
            | Token::Not
            | Token::Lparen
            | Token::Incr
            | Token::Decr
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Scope;
    use crate::lexer::Builtin;

    fn parse_program(src: &str) -> Program {
        parse(src).expect("parse error")
    }

    fn parse_single_stmt(src: &str) -> Stmt {
        let mut program = parse_program(&format!("BEGIN {{ {} }}", src));
        assert_eq!(program.begin.len(), 1);
        let mut stmts = program.begin.pop().unwrap();
        assert_eq!(stmts.len(), 1, "expected one statement");
        stmts.pop().unwrap()
    }

    fn parse_single_expr(src: &str) -> Expr {
        match parse_single_stmt(src) {
            Stmt::Expr(expr) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parse_pattern_kinds() {
        let program = parse_program("NR > 1 { print }\n/re/\n$1 == \"x\", $1 == \"y\" { next }");
        assert_eq!(program.actions.len(), 3);
        assert_eq!(program.actions[0].pattern.len(), 1);
        assert!(program.actions[1].body.is_none());
        assert_eq!(program.actions[2].pattern.len(), 2);
    }

    #[test]
    fn parse_concat_vs_subtraction() {
        // binary minus wins over concatenation
        match parse_single_expr("x = 1 - 2") {
            Expr::Assign { right, .. } => match *right {
                Expr::Binary { op: Token::Sub, .. } => {}
                other => panic!("expected subtraction, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
        match parse_single_expr("x = \"a\" \"b\"") {
            Expr::Assign { right, .. } => match *right {
                Expr::Binary {
                    op: Token::Concat, ..
                } => {}
                other => panic!("expected concatenation, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parse_field_binds_tighter_than_incr() {
        match parse_single_expr("$1++") {
            Expr::Incr { expr, pre, .. } => {
                assert!(!pre);
                assert!(matches!(*expr, Expr::Field(_)));
            }
            other => panic!("expected increment, got {:?}", other),
        }
    }

    #[test]
    fn parse_regex_in_operand_position() {
        match parse_single_expr("x ~ /ab*/") {
            Expr::Binary {
                op: Token::Match,
                right,
                ..
            } => assert!(matches!(*right, Expr::Regex(_))),
            other => panic!("expected match, got {:?}", other),
        }
        // and division where an operator is expected
        match parse_single_expr("x = a / b") {
            Expr::Assign { right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: Token::Div, .. }))
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parse_print_redirect() {
        match parse_single_stmt("print $1, $2 > \"out\"") {
            Stmt::Print { args, redirect } => {
                assert_eq!(args.len(), 2);
                assert_eq!(redirect.unwrap().0, Redirect::File);
            }
            other => panic!("expected print, got {:?}", other),
        }
        // without the redirect, > is a comparison
        match parse_single_stmt("x = $1 > \"out\"") {
            Stmt::Expr(Expr::Assign { right, .. }) => assert!(matches!(
                *right,
                Expr::Binary {
                    op: Token::Greater,
                    ..
                }
            )),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parse_print_parenthesized_args() {
        match parse_single_stmt("print (1, 2) > \"out\"") {
            Stmt::Print { args, redirect } => {
                assert_eq!(args.len(), 2);
                assert!(redirect.is_some());
            }
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn parse_getline_forms() {
        assert!(matches!(
            parse_single_expr("getline"),
            Expr::Getline {
                command: None,
                target: None,
                file: None
            }
        ));
        assert!(matches!(
            parse_single_expr("getline line < \"file\""),
            Expr::Getline {
                command: None,
                target: Some(_),
                file: Some(_)
            }
        ));
        assert!(matches!(
            parse_single_expr("\"echo hi\" | getline line"),
            Expr::Getline {
                command: Some(_),
                target: Some(_),
                file: None
            }
        ));
    }

    #[test]
    fn parse_for_in() {
        match parse_single_stmt("for (k in a) print k") {
            Stmt::ForIn { var, array, body } => {
                assert_eq!(var.name, "k");
                assert_eq!(array.name, "a");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected for-in, got {:?}", other),
        }
    }

    #[test]
    fn parse_multi_dimensional_in() {
        match parse_single_expr("x = (1, 2) in a") {
            Expr::Assign { right, .. } => match *right {
                Expr::In { index, array } => {
                    assert_eq!(index.len(), 2);
                    assert_eq!(array.name, "a");
                }
                other => panic!("expected in expression, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parse_sub_normalizes_target() {
        match parse_single_expr("sub(/a/, \"b\")") {
            Expr::Call { func, args } => {
                assert_eq!(func, Builtin::Sub);
                assert_eq!(args.len(), 3);
                assert!(matches!(args[2], Expr::Field(_)));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parse_split_destination_is_array() {
        match parse_single_expr("split($0, parts)") {
            Expr::Call { func, args } => {
                assert_eq!(func, Builtin::Split);
                assert!(matches!(&args[1], Expr::ArrayRef(a) if a.name == "parts"));
            }
            other => panic!("expected call, got {:?}", other),
        }
        assert!(parse("BEGIN { split($0, x[1]) }").is_err());
    }

    #[test]
    fn parse_function_definition() {
        let program = parse_program("function add(a, b) { return a + b }");
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].params, vec!["a", "b"]);
        assert!(parse("function f(x, x) { }").is_err());
    }

    #[test]
    fn parse_power_associativity() {
        // 2^3^2 is 2^(3^2); -2^2 is -(2^2)
        match parse_single_expr("x = 2 ^ 3 ^ 2") {
            Expr::Assign { right, .. } => match *right {
                Expr::Binary {
                    op: Token::Pow,
                    right,
                    ..
                } => assert!(matches!(*right, Expr::Binary { op: Token::Pow, .. })),
                other => panic!("expected power, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
        match parse_single_expr("x = -2 ^ 2") {
            Expr::Assign { right, .. } => {
                assert!(matches!(*right, Expr::Unary { op: Token::Sub, .. }))
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn resolve_slots_start_unresolved() {
        match parse_single_expr("x") {
            Expr::Var(var) => {
                assert_eq!(var.scope, Scope::Global);
                assert_eq!(var.index, crate::ast::UNRESOLVED);
            }
            other => panic!("expected variable, got {:?}", other),
        }
    }

    #[test]
    fn errors_outside_context() {
        assert!(parse("BEGIN { break }").is_err());
        assert!(parse("BEGIN { next }").is_err());
        assert!(parse("{ return 1 }").is_err());
        assert!(parse("BEGIN { printf }").is_err());
    }

    #[test]
    fn parse_if_else_across_newlines() {
        let stmt = parse_single_stmt("if (x) print 1;\nelse\n print 2");
        match stmt {
            Stmt::If {
                body, else_body, ..
            } => {
                assert_eq!(body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn parse_do_while() {
        match parse_single_stmt("do print; while (--x)") {
            Stmt::DoWhile { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("expected do-while, got {:?}", other),
        }
    }
}
