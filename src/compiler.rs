//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::ast::{Expr, Program, ResolvedProgram, Scope, Stmt};
use crate::lexer::{Builtin, Token};
use crate::program::{
    AugOp, CompiledAction, CompiledFunction, CompiledProgram, InputMode, Opcode, Pattern,
};
use crate::regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

/// Front door for the whole pipeline: parse, resolve, compile.
pub fn compile_program(
    source: &str,
    natives: &[crate::resolver::NativeDecl],
) -> Result<CompiledProgram, String> {
    let program = crate::parser::parse(source).map_err(|err| err.to_string())?;
    let resolved = crate::resolver::resolve(program, natives).map_err(|err| err.to_string())?;
    compile(&resolved)
}

/// Lower a resolved program to opcode blocks plus interned literal pools.
/// The only failure mode left at this stage is an invalid regex literal.
pub fn compile(resolved: &ResolvedProgram) -> Result<CompiledProgram, String> {
    let mut compiler = Compiler {
        program: &resolved.program,
        nums: Vec::new(),
        num_indexes: HashMap::new(),
        strs: Vec::new(),
        str_indexes: HashMap::new(),
        regexes: Vec::new(),
        regex_indexes: HashMap::new(),
        loop_stack: Vec::new(),
    };

    let mut begin = Vec::new();
    for stmts in &resolved.program.begin {
        compiler.stmts(stmts, &mut begin)?;
    }

    let mut actions = Vec::new();
    for action in &resolved.program.actions {
        let pattern = match action.pattern.len() {
            0 => Pattern::Always,
            1 => {
                let mut code = Vec::new();
                compiler.expr(&action.pattern[0], &mut code)?;
                Pattern::Expr(code)
            }
            _ => {
                let mut start = Vec::new();
                let mut end = Vec::new();
                compiler.expr(&action.pattern[0], &mut start)?;
                compiler.expr(&action.pattern[1], &mut end)?;
                Pattern::Range { start, end }
            }
        };
        let mut body = Vec::new();
        match &action.body {
            Some(stmts) => compiler.stmts(stmts, &mut body)?,
            // a missing action prints the record
            None => body.push(Opcode::Print {
                num_args: 0,
                redirect: None,
            }),
        }
        actions.push(CompiledAction { pattern, body });
    }

    let mut end = Vec::new();
    for stmts in &resolved.program.end {
        compiler.stmts(stmts, &mut end)?;
    }

    let mut functions = Vec::new();
    for function in &resolved.program.functions {
        let mut body = Vec::new();
        compiler.stmts(&function.body, &mut body)?;
        let num_arrays = function.arrays.iter().filter(|&&a| a).count();
        functions.push(CompiledFunction {
            name: Rc::from(function.name.as_str()),
            params: function.params.clone(),
            arrays: function.arrays.clone(),
            num_scalars: function.params.len() - num_arrays,
            num_arrays,
            body,
        });
    }

    let mut scalar_names = vec![String::new(); resolved.scalars.len()];
    for (name, &index) in &resolved.scalars {
        scalar_names[index] = name.clone();
    }
    let mut array_names = vec![String::new(); resolved.arrays.len()];
    for (name, &index) in &resolved.arrays {
        array_names[index] = name.clone();
    }

    Ok(CompiledProgram {
        begin,
        actions,
        end,
        functions,
        nums: compiler.nums,
        strs: compiler.strs,
        regexes: compiler.regexes,
        scalar_names,
        array_names,
    })
}

/// Offset stored in a jump at `from` that lands on `target` (offsets are
/// relative to the following instruction).
fn jump_offset(from: usize, target: usize) -> i32 {
    target as i32 - from as i32 - 1
}

/// Rewrite the placeholder jump at `stub` to land on `target`.
fn patch_jump(code: &mut [Opcode], stub: usize, target: usize) {
    let offset = jump_offset(stub, target);
    code[stub] = match code[stub] {
        Opcode::Jump(_) => Opcode::Jump(offset),
        Opcode::JumpFalse(_) => Opcode::JumpFalse(offset),
        Opcode::JumpTrue(_) => Opcode::JumpTrue(offset),
        Opcode::JumpEquals(_) => Opcode::JumpEquals(offset),
        Opcode::JumpNotEquals(_) => Opcode::JumpNotEquals(offset),
        Opcode::JumpLess(_) => Opcode::JumpLess(offset),
        Opcode::JumpGreater(_) => Opcode::JumpGreater(offset),
        Opcode::JumpLessOrEqual(_) => Opcode::JumpLessOrEqual(offset),
        Opcode::JumpGreaterOrEqual(_) => Opcode::JumpGreaterOrEqual(offset),
        other => unreachable!("patching a non-jump opcode {:?}", other),
    };
}

enum LoopKind {
    /// while/do/for: break and continue are patched jumps
    Jumps,
    /// for-in: break raises the BreakForIn signal
    ForIn,
}

struct LoopFrame {
    kind: LoopKind,
    break_stubs: Vec<usize>,
    continue_stubs: Vec<usize>,
}

struct Compiler<'a> {
    program: &'a Program,
    nums: Vec<f64>,
    num_indexes: HashMap<u64, u32>,
    strs: Vec<Rc<str>>,
    str_indexes: HashMap<Rc<str>, u32>,
    regexes: Vec<Rc<Regex>>,
    regex_indexes: HashMap<Rc<str>, u32>,
    loop_stack: Vec<LoopFrame>,
}

impl<'a> Compiler<'a> {
    fn num_index(&mut self, value: f64) -> u32 {
        *self.num_indexes.entry(value.to_bits()).or_insert_with(|| {
            self.nums.push(value);
            self.nums.len() as u32 - 1
        })
    }

    fn str_index(&mut self, value: &Rc<str>) -> u32 {
        match self.str_indexes.get(value) {
            Some(&index) => index,
            None => {
                let index = self.strs.len() as u32;
                self.strs.push(value.clone());
                self.str_indexes.insert(value.clone(), index);
                index
            }
        }
    }

    fn regex_index(&mut self, source: &Rc<str>) -> Result<u32, String> {
        match self.regex_indexes.get(source) {
            Some(&index) => Ok(index),
            None => {
                let regex = Regex::new(source)
                    .map_err(|err| format!("invalid regex /{}/: {}", source, err))?;
                let index = self.regexes.len() as u32;
                self.regexes.push(Rc::new(regex));
                self.regex_indexes.insert(source.clone(), index);
                Ok(index)
            }
        }
    }

    fn stmts(&mut self, stmts: &[Stmt], code: &mut Vec<Opcode>) -> Result<(), String> {
        for stmt in stmts {
            self.stmt(stmt, code)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt, code: &mut Vec<Opcode>) -> Result<(), String> {
        match stmt {
            Stmt::Expr(expr) => self.expr_stmt(expr, code)?,
            Stmt::Print { args, redirect } | Stmt::Printf { args, redirect } => {
                let redirect_kind = match redirect {
                    Some((kind, dest)) => {
                        self.expr(dest, code)?;
                        Some(*kind)
                    }
                    None => None,
                };
                for arg in args {
                    self.expr(arg, code)?;
                }
                let op = match stmt {
                    Stmt::Print { .. } => Opcode::Print {
                        num_args: args.len() as u32,
                        redirect: redirect_kind,
                    },
                    _ => Opcode::Printf {
                        num_args: args.len() as u32,
                        redirect: redirect_kind,
                    },
                };
                code.push(op);
            }
            Stmt::If {
                cond,
                body,
                else_body,
            } => {
                let over_body = self.cond_jump(cond, code, false)?;
                self.stmts(body, code)?;
                if else_body.is_empty() {
                    let target = code.len();
                    patch_jump(code, over_body, target);
                } else {
                    let over_else = code.len();
                    code.push(Opcode::Jump(0));
                    let target = code.len();
                    patch_jump(code, over_body, target);
                    self.stmts(else_body, code)?;
                    let target = code.len();
                    patch_jump(code, over_else, target);
                }
            }
            Stmt::While { cond, body } => {
                self.loop_stack.push(LoopFrame {
                    kind: LoopKind::Jumps,
                    break_stubs: Vec::new(),
                    continue_stubs: Vec::new(),
                });
                let to_test = code.len();
                code.push(Opcode::Jump(0));
                let body_start = code.len();
                self.stmts(body, code)?;
                let target = code.len();
                patch_jump(code, to_test, target);
                let test_start = code.len();
                self.cond_jump_backward(cond, code, body_start)?;
                let end = code.len();
                self.patch_loop_exits(code, end, test_start);
            }
            Stmt::DoWhile { body, cond } => {
                self.loop_stack.push(LoopFrame {
                    kind: LoopKind::Jumps,
                    break_stubs: Vec::new(),
                    continue_stubs: Vec::new(),
                });
                let body_start = code.len();
                self.stmts(body, code)?;
                let test_start = code.len();
                self.cond_jump_backward(cond, code, body_start)?;
                let end = code.len();
                self.patch_loop_exits(code, end, test_start);
            }
            Stmt::For {
                pre,
                cond,
                post,
                body,
            } => {
                if let Some(pre) = pre {
                    self.stmt(pre, code)?;
                }
                self.loop_stack.push(LoopFrame {
                    kind: LoopKind::Jumps,
                    break_stubs: Vec::new(),
                    continue_stubs: Vec::new(),
                });
                let to_test = code.len();
                code.push(Opcode::Jump(0));
                let body_start = code.len();
                self.stmts(body, code)?;
                let post_start = code.len();
                if let Some(post) = post {
                    self.stmt(post, code)?;
                }
                let target = code.len();
                patch_jump(code, to_test, target);
                match cond {
                    Some(cond) => self.cond_jump_backward(cond, code, body_start)?,
                    None => {
                        let offset = jump_offset(code.len(), body_start);
                        code.push(Opcode::Jump(offset));
                    }
                }
                let end = code.len();
                self.patch_loop_exits(code, end, post_start);
            }
            Stmt::ForIn { var, array, body } => {
                self.loop_stack.push(LoopFrame {
                    kind: LoopKind::ForIn,
                    break_stubs: Vec::new(),
                    continue_stubs: Vec::new(),
                });
                let mut body_code = Vec::new();
                self.stmts(body, &mut body_code)?;
                // continue advances to the next key by leaving the body block
                let frame = self.loop_stack.pop().unwrap();
                let body_end = body_code.len();
                for stub in frame.continue_stubs {
                    patch_jump(&mut body_code, stub, body_end);
                }
                code.push(Opcode::ForIn {
                    var_scope: var.scope,
                    var_index: var.index as u32,
                    array_scope: array.scope,
                    array_index: array.index as u32,
                    body_len: body_code.len() as u32,
                });
                code.extend(body_code);
            }
            Stmt::Break(_) => match self.loop_stack.last_mut() {
                Some(frame) => match frame.kind {
                    LoopKind::ForIn => code.push(Opcode::BreakForIn),
                    LoopKind::Jumps => {
                        frame.break_stubs.push(code.len());
                        code.push(Opcode::Jump(0));
                    }
                },
                None => unreachable!("break outside a loop"),
            },
            Stmt::Continue(_) => match self.loop_stack.last_mut() {
                Some(frame) => {
                    frame.continue_stubs.push(code.len());
                    code.push(Opcode::Jump(0));
                }
                None => unreachable!("continue outside a loop"),
            },
            Stmt::Next(_) => code.push(Opcode::Next),
            Stmt::Exit(status) => match status {
                Some(status) => {
                    self.expr(status, code)?;
                    code.push(Opcode::ExitStatus);
                }
                None => code.push(Opcode::Exit),
            },
            Stmt::Return(value) => match value {
                Some(value) => {
                    self.expr(value, code)?;
                    code.push(Opcode::Return);
                }
                None => code.push(Opcode::ReturnNull),
            },
            Stmt::Delete { array, index } => {
                if index.is_empty() {
                    code.push(Opcode::DeleteAll {
                        scope: array.scope,
                        index: array.index as u32,
                    });
                } else {
                    self.index_key(index, code)?;
                    code.push(Opcode::Delete {
                        scope: array.scope,
                        index: array.index as u32,
                    });
                }
            }
            Stmt::Block(body) => self.stmts(body, code)?,
        }
        Ok(())
    }

    /// Patch the break and continue jumps of the innermost loop.
    fn patch_loop_exits(&mut self, code: &mut [Opcode], break_to: usize, continue_to: usize) {
        let frame = self.loop_stack.pop().unwrap();
        for stub in frame.break_stubs {
            patch_jump(code, stub, break_to);
        }
        for stub in frame.continue_stubs {
            patch_jump(code, stub, continue_to);
        }
    }

    /// An expression in statement context: assignments and increments use
    /// their store-only forms so no Dupe/Drop pair is needed.
    fn expr_stmt(&mut self, expr: &Expr, code: &mut Vec<Opcode>) -> Result<(), String> {
        match expr {
            Expr::Assign { left, right } => {
                self.expr(right, code)?;
                self.store(left, code)?;
            }
            Expr::AugAssign { left, op, right } => {
                // x += 3 and friends become fused increments
                if let Some(amount) = incr_amount(op, right) {
                    self.incr(left, amount, code)?;
                    return Ok(());
                }
                let op = aug_op(op);
                match left.as_ref() {
                    Expr::Var(var) => {
                        self.expr(right, code)?;
                        code.push(match var.scope {
                            Scope::Global => Opcode::AugAssignGlobal {
                                op,
                                index: var.index as u32,
                            },
                            Scope::Local => Opcode::AugAssignLocal {
                                op,
                                index: var.index as u32,
                            },
                            Scope::Special => Opcode::AugAssignSpecial {
                                op,
                                index: var.index as u32,
                            },
                        });
                    }
                    Expr::Field(index) => {
                        self.expr(right, code)?;
                        self.expr(index, code)?;
                        code.push(Opcode::AugAssignField(op));
                    }
                    Expr::Index { array, index } => {
                        self.expr(right, code)?;
                        self.index_key(index, code)?;
                        code.push(match array.scope {
                            Scope::Local => Opcode::AugAssignArrayLocal {
                                op,
                                index: array.index as u32,
                            },
                            _ => Opcode::AugAssignArrayGlobal {
                                op,
                                index: array.index as u32,
                            },
                        });
                    }
                    _ => unreachable!("augmented assignment to non-lvalue"),
                }
            }
            Expr::Incr { expr, op, .. } => {
                let amount = if *op == Token::Incr { 1 } else { -1 };
                self.incr(expr, amount, code)?;
            }
            _ => {
                self.expr(expr, code)?;
                code.push(Opcode::Drop);
            }
        }
        Ok(())
    }

    /// Fused increment of an lvalue by a constant, statement context.
    fn incr(&mut self, lvalue: &Expr, amount: i32, code: &mut Vec<Opcode>) -> Result<(), String> {
        match lvalue {
            Expr::Var(var) => code.push(match var.scope {
                Scope::Global => Opcode::IncrGlobal {
                    amount,
                    index: var.index as u32,
                },
                Scope::Local => Opcode::IncrLocal {
                    amount,
                    index: var.index as u32,
                },
                Scope::Special => Opcode::IncrSpecial {
                    amount,
                    index: var.index as u32,
                },
            }),
            Expr::Field(index) => {
                self.expr(index, code)?;
                code.push(Opcode::IncrField(amount));
            }
            Expr::Index { array, index } => {
                self.index_key(index, code)?;
                code.push(match array.scope {
                    Scope::Local => Opcode::IncrArrayLocal {
                        amount,
                        index: array.index as u32,
                    },
                    _ => Opcode::IncrArrayGlobal {
                        amount,
                        index: array.index as u32,
                    },
                });
            }
            _ => unreachable!("increment of non-lvalue"),
        }
        Ok(())
    }

    /// Pop the value on top of the stack into an lvalue.
    fn store(&mut self, lvalue: &Expr, code: &mut Vec<Opcode>) -> Result<(), String> {
        match lvalue {
            Expr::Var(var) => code.push(match var.scope {
                Scope::Global => Opcode::AssignGlobal(var.index as u32),
                Scope::Local => Opcode::AssignLocal(var.index as u32),
                Scope::Special => Opcode::AssignSpecial(var.index as u32),
            }),
            Expr::Field(index) => {
                self.expr(index, code)?;
                code.push(Opcode::AssignField);
            }
            Expr::Index { array, index } => {
                self.index_key(index, code)?;
                code.push(match array.scope {
                    Scope::Local => Opcode::AssignArrayLocal(array.index as u32),
                    _ => Opcode::AssignArrayGlobal(array.index as u32),
                });
            }
            _ => unreachable!("assignment to non-lvalue"),
        }
        Ok(())
    }

    /// Push the subscript key: a single expression, or n expressions joined
    /// with SUBSEP.
    fn index_key(&mut self, index: &[Expr], code: &mut Vec<Opcode>) -> Result<(), String> {
        for expr in index {
            self.expr(expr, code)?;
        }
        if index.len() != 1 {
            code.push(Opcode::MultiIndex(index.len() as u32));
        }
        Ok(())
    }

    /// An expression operand that is a regex pattern: a literal `/re/` is its
    /// source text (the VM's regex cache compiles it once), anything else is
    /// evaluated and converted at runtime.
    fn regex_arg(&mut self, expr: &Expr, code: &mut Vec<Opcode>) -> Result<(), String> {
        match expr {
            Expr::Regex(source) => {
                let index = self.str_index(source);
                code.push(Opcode::Str(index));
                Ok(())
            }
            _ => self.expr(expr, code),
        }
    }

    /// Emit a conditional forward jump with a placeholder offset, fusing
    /// comparisons into compare-and-branch opcodes. Returns the stub index.
    fn cond_jump(
        &mut self,
        cond: &Expr,
        code: &mut Vec<Opcode>,
        jump_if_true: bool,
    ) -> Result<usize, String> {
        if let Expr::Binary { left, op, right } = cond {
            if let Some(fused) = fused_jump(op, jump_if_true) {
                self.expr(left, code)?;
                self.expr(right, code)?;
                let stub = code.len();
                code.push(fused(0));
                return Ok(stub);
            }
        }
        self.expr(cond, code)?;
        let stub = code.len();
        code.push(if jump_if_true {
            Opcode::JumpTrue(0)
        } else {
            Opcode::JumpFalse(0)
        });
        Ok(stub)
    }

    /// The loop-ending test: jump backward to `target` while the condition
    /// holds, fusing comparisons.
    fn cond_jump_backward(
        &mut self,
        cond: &Expr,
        code: &mut Vec<Opcode>,
        target: usize,
    ) -> Result<(), String> {
        let stub = self.cond_jump(cond, code, true)?;
        patch_jump(code, stub, target);
        Ok(())
    }

    fn expr(&mut self, expr: &Expr, code: &mut Vec<Opcode>) -> Result<(), String> {
        match expr {
            Expr::Num(value) => {
                let index = self.num_index(*value);
                code.push(Opcode::Num(index));
            }
            Expr::Str(value) => {
                let index = self.str_index(value);
                code.push(Opcode::Str(index));
            }
            Expr::Regex(source) => {
                let index = self.regex_index(source)?;
                code.push(Opcode::Regex(index));
            }
            Expr::Field(index) => match index.as_ref() {
                Expr::Num(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => {
                    code.push(Opcode::FieldNum(*n as u32));
                }
                _ => {
                    self.expr(index, code)?;
                    code.push(Opcode::Field);
                }
            },
            Expr::Var(var) => code.push(match var.scope {
                Scope::Global => Opcode::Global(var.index as u32),
                Scope::Local => Opcode::Local(var.index as u32),
                Scope::Special => Opcode::Special(var.index as u32),
            }),
            Expr::Index { array, index } => {
                self.index_key(index, code)?;
                code.push(match array.scope {
                    Scope::Local => Opcode::ArrayLocal(array.index as u32),
                    _ => Opcode::ArrayGlobal(array.index as u32),
                });
            }
            Expr::Unary { op, expr } => {
                self.expr(expr, code)?;
                code.push(match op {
                    Token::Not => Opcode::Not,
                    Token::Sub => Opcode::UnaryMinus,
                    _ => Opcode::UnaryPlus,
                });
            }
            Expr::Binary { left, op, right } => self.binary(left, op, right, code)?,
            Expr::In { index, array } => {
                self.index_key(index, code)?;
                code.push(match array.scope {
                    Scope::Local => Opcode::InLocal(array.index as u32),
                    _ => Opcode::InGlobal(array.index as u32),
                });
            }
            Expr::Cond {
                cond,
                if_true,
                if_false,
            } => {
                let over_true = self.cond_jump(cond, code, false)?;
                self.expr(if_true, code)?;
                let over_false = code.len();
                code.push(Opcode::Jump(0));
                let target = code.len();
                patch_jump(code, over_true, target);
                self.expr(if_false, code)?;
                let target = code.len();
                patch_jump(code, over_false, target);
            }
            Expr::Assign { left, right } => {
                self.expr(right, code)?;
                code.push(Opcode::Dupe);
                self.store(left, code)?;
            }
            Expr::AugAssign { left, op, right } => {
                let op = aug_op(op);
                match left.as_ref() {
                    Expr::Var(var) => {
                        self.expr(right, code)?;
                        let index = var.index as u32;
                        let (aug, load) = match var.scope {
                            Scope::Global => {
                                (Opcode::AugAssignGlobal { op, index }, Opcode::Global(index))
                            }
                            Scope::Local => {
                                (Opcode::AugAssignLocal { op, index }, Opcode::Local(index))
                            }
                            Scope::Special => {
                                (Opcode::AugAssignSpecial { op, index }, Opcode::Special(index))
                            }
                        };
                        code.push(aug);
                        code.push(load);
                    }
                    Expr::Field(index) => {
                        self.expr(index, code)?;
                        code.push(Opcode::Dupe);
                        self.expr(right, code)?;
                        code.push(Opcode::Swap);
                        code.push(Opcode::AugAssignField(op));
                        code.push(Opcode::Field);
                    }
                    Expr::Index { array, index } => {
                        self.index_key(index, code)?;
                        code.push(Opcode::Dupe);
                        self.expr(right, code)?;
                        code.push(Opcode::Swap);
                        let index = array.index as u32;
                        let (aug, load) = match array.scope {
                            Scope::Local => (
                                Opcode::AugAssignArrayLocal { op, index },
                                Opcode::ArrayLocal(index),
                            ),
                            _ => (
                                Opcode::AugAssignArrayGlobal { op, index },
                                Opcode::ArrayGlobal(index),
                            ),
                        };
                        code.push(aug);
                        code.push(load);
                    }
                    _ => unreachable!("augmented assignment to non-lvalue"),
                }
            }
            Expr::Incr {
                expr: lvalue,
                op,
                pre,
            } => self.incr_expr(lvalue, op, *pre, code)?,
            Expr::Call { func, args } => self.builtin(*func, args, code)?,
            Expr::UserCall(call) => {
                if call.native {
                    for arg in &call.args {
                        self.expr(arg, code)?;
                    }
                    code.push(Opcode::CallNative {
                        func: call.index as u32,
                        num_args: call.args.len() as u32,
                    });
                } else {
                    self.user_call(call, code)?;
                }
            }
            Expr::Getline {
                command,
                target,
                file,
            } => self.getline(command.as_deref(), target.as_deref(), file.as_deref(), code)?,
            Expr::ArrayRef(_) | Expr::Multi(_) => {
                unreachable!("array or expression list in scalar context")
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        left: &Expr,
        op: &Token,
        right: &Expr,
        code: &mut Vec<Opcode>,
    ) -> Result<(), String> {
        match op {
            Token::And => {
                self.expr(left, code)?;
                let to_false = code.len();
                code.push(Opcode::JumpFalse(0));
                self.expr(right, code)?;
                code.push(Opcode::Boolean);
                let over_false = code.len();
                code.push(Opcode::Jump(0));
                let target = code.len();
                patch_jump(code, to_false, target);
                let zero = self.num_index(0.0);
                code.push(Opcode::Num(zero));
                let target = code.len();
                patch_jump(code, over_false, target);
            }
            Token::Or => {
                self.expr(left, code)?;
                let to_true = code.len();
                code.push(Opcode::JumpTrue(0));
                self.expr(right, code)?;
                code.push(Opcode::Boolean);
                let over_true = code.len();
                code.push(Opcode::Jump(0));
                let target = code.len();
                patch_jump(code, to_true, target);
                let one = self.num_index(1.0);
                code.push(Opcode::Num(one));
                let target = code.len();
                patch_jump(code, over_true, target);
            }
            Token::Match | Token::NotMatch => {
                self.expr(left, code)?;
                self.regex_arg(right, code)?;
                code.push(if *op == Token::Match {
                    Opcode::Match
                } else {
                    Opcode::NotMatch
                });
            }
            _ => {
                self.expr(left, code)?;
                self.expr(right, code)?;
                code.push(match op {
                    Token::Add => Opcode::Add,
                    Token::Sub => Opcode::Subtract,
                    Token::Mul => Opcode::Multiply,
                    Token::Div => Opcode::Divide,
                    Token::Mod => Opcode::Modulo,
                    Token::Pow => Opcode::Power,
                    Token::Equals => Opcode::Equals,
                    Token::NotEquals => Opcode::NotEquals,
                    Token::Less => Opcode::Less,
                    Token::LessOrEqual => Opcode::LessOrEqual,
                    Token::Greater => Opcode::Greater,
                    Token::GreaterOrEqual => Opcode::GreaterOrEqual,
                    Token::Concat => Opcode::Concat,
                    other => unreachable!("unexpected binary operator {}", other),
                });
            }
        }
        Ok(())
    }

    /// Pre/post increment in expression context: the old (post) or new (pre)
    /// numeric value is left on the stack.
    fn incr_expr(
        &mut self,
        lvalue: &Expr,
        op: &Token,
        pre: bool,
        code: &mut Vec<Opcode>,
    ) -> Result<(), String> {
        let amount = if *op == Token::Incr { 1 } else { -1 };
        let arith = if amount > 0 {
            Opcode::Add
        } else {
            Opcode::Subtract
        };
        let one = self.num_index(1.0);
        match lvalue {
            Expr::Var(var) => {
                let index = var.index as u32;
                let (load, assign) = match var.scope {
                    Scope::Global => (Opcode::Global(index), Opcode::AssignGlobal(index)),
                    Scope::Local => (Opcode::Local(index), Opcode::AssignLocal(index)),
                    Scope::Special => (Opcode::Special(index), Opcode::AssignSpecial(index)),
                };
                code.push(load);
                code.push(Opcode::UnaryPlus);
                if pre {
                    code.push(Opcode::Num(one));
                    code.push(arith);
                    code.push(Opcode::Dupe);
                    code.push(assign);
                } else {
                    code.push(Opcode::Dupe);
                    code.push(Opcode::Num(one));
                    code.push(arith);
                    code.push(assign);
                }
            }
            Expr::Field(index) => {
                self.expr(index, code)?;
                code.push(Opcode::Dupe);
                if pre {
                    code.push(Opcode::IncrField(amount));
                    code.push(Opcode::Field);
                } else {
                    code.push(Opcode::Field);
                    code.push(Opcode::UnaryPlus);
                    code.push(Opcode::Swap);
                    code.push(Opcode::IncrField(amount));
                }
            }
            Expr::Index { array, index } => {
                let arr_index = array.index as u32;
                let (incr, load) = match array.scope {
                    Scope::Local => (
                        Opcode::IncrArrayLocal {
                            amount,
                            index: arr_index,
                        },
                        Opcode::ArrayLocal(arr_index),
                    ),
                    _ => (
                        Opcode::IncrArrayGlobal {
                            amount,
                            index: arr_index,
                        },
                        Opcode::ArrayGlobal(arr_index),
                    ),
                };
                self.index_key(index, code)?;
                code.push(Opcode::Dupe);
                if pre {
                    code.push(incr);
                    code.push(load);
                } else {
                    code.push(load);
                    code.push(Opcode::UnaryPlus);
                    code.push(Opcode::Swap);
                    code.push(incr);
                }
            }
            _ => unreachable!("increment of non-lvalue"),
        }
        Ok(())
    }

    fn builtin(
        &mut self,
        func: Builtin,
        args: &[Expr],
        code: &mut Vec<Opcode>,
    ) -> Result<(), String> {
        match func {
            Builtin::Atan2 => {
                self.expr(&args[0], code)?;
                self.expr(&args[1], code)?;
                code.push(Opcode::CallAtan2);
            }
            Builtin::Cos | Builtin::Sin | Builtin::Exp | Builtin::Log | Builtin::Sqrt
            | Builtin::Int | Builtin::Tolower | Builtin::Toupper | Builtin::Close
            | Builtin::System => {
                self.expr(&args[0], code)?;
                code.push(match func {
                    Builtin::Cos => Opcode::CallCos,
                    Builtin::Sin => Opcode::CallSin,
                    Builtin::Exp => Opcode::CallExp,
                    Builtin::Log => Opcode::CallLog,
                    Builtin::Sqrt => Opcode::CallSqrt,
                    Builtin::Int => Opcode::CallInt,
                    Builtin::Tolower => Opcode::CallTolower,
                    Builtin::Toupper => Opcode::CallToupper,
                    Builtin::Close => Opcode::CallClose,
                    _ => Opcode::CallSystem,
                });
            }
            Builtin::Rand => code.push(Opcode::CallRand),
            Builtin::Srand => {
                if args.is_empty() {
                    code.push(Opcode::CallSrand);
                } else {
                    self.expr(&args[0], code)?;
                    code.push(Opcode::CallSrandSeed);
                }
            }
            Builtin::Length => {
                if args.is_empty() {
                    code.push(Opcode::CallLength);
                } else {
                    self.expr(&args[0], code)?;
                    code.push(Opcode::CallLengthArg);
                }
            }
            Builtin::Fflush => {
                if args.is_empty() {
                    code.push(Opcode::CallFflushAll);
                } else {
                    self.expr(&args[0], code)?;
                    code.push(Opcode::CallFflush);
                }
            }
            Builtin::Index => {
                self.expr(&args[0], code)?;
                self.expr(&args[1], code)?;
                code.push(Opcode::CallIndex);
            }
            Builtin::Match => {
                self.expr(&args[0], code)?;
                self.regex_arg(&args[1], code)?;
                code.push(Opcode::CallMatch);
            }
            Builtin::Split => {
                let array = match &args[1] {
                    Expr::ArrayRef(array) => array,
                    other => unreachable!("split destination is {:?}", other),
                };
                self.expr(&args[0], code)?;
                if args.len() == 2 {
                    code.push(Opcode::CallSplit {
                        scope: array.scope,
                        index: array.index as u32,
                    });
                } else {
                    self.regex_arg(&args[2], code)?;
                    code.push(Opcode::CallSplitSep {
                        scope: array.scope,
                        index: array.index as u32,
                    });
                }
            }
            Builtin::Sprintf => {
                for arg in args {
                    self.expr(arg, code)?;
                }
                code.push(Opcode::CallSprintf(args.len() as u32));
            }
            Builtin::Sub | Builtin::Gsub => {
                // (re, repl, target); the call leaves [count, output] and
                // the output is stored back into the target lvalue
                self.regex_arg(&args[0], code)?;
                self.expr(&args[1], code)?;
                self.expr(&args[2], code)?;
                code.push(if func == Builtin::Sub {
                    Opcode::CallSub
                } else {
                    Opcode::CallGsub
                });
                self.store(&args[2], code)?;
            }
            Builtin::Substr => {
                self.expr(&args[0], code)?;
                self.expr(&args[1], code)?;
                if args.len() == 2 {
                    code.push(Opcode::CallSubstr);
                } else {
                    self.expr(&args[2], code)?;
                    code.push(Opcode::CallSubstrLength);
                }
            }
        }
        Ok(())
    }

    fn user_call(
        &mut self,
        call: &crate::ast::UserCallExpr,
        code: &mut Vec<Opcode>,
    ) -> Result<(), String> {
        let function = &self.program.functions[call.index];
        let num_arrays = function.arrays.iter().filter(|&&a| a).count();
        let num_scalars = function.params.len() - num_arrays;

        let mut array_args = Vec::new();
        let mut scalar_args = 0;
        for (i, arg) in call.args.iter().enumerate() {
            if function.arrays[i] {
                match arg {
                    Expr::Var(var) => array_args.push(Opcode::ArrayArg {
                        scope: var.scope,
                        index: var.index as u32,
                    }),
                    other => unreachable!("array argument is {:?}", other),
                }
            } else {
                self.expr(arg, code)?;
                scalar_args += 1;
            }
        }
        if scalar_args < num_scalars {
            code.push(Opcode::Nulls((num_scalars - scalar_args) as u32));
        }
        code.push(Opcode::CallUser {
            func: call.index as u32,
            num_array_args: array_args.len() as u32,
        });
        code.extend(array_args);
        Ok(())
    }

    fn getline(
        &mut self,
        command: Option<&Expr>,
        target: Option<&Expr>,
        file: Option<&Expr>,
        code: &mut Vec<Opcode>,
    ) -> Result<(), String> {
        let mode = if command.is_some() {
            InputMode::Command
        } else if file.is_some() {
            InputMode::File
        } else {
            InputMode::Main
        };
        // auxiliary operands first; the file/command name is popped first by
        // the handler so it goes on top
        let op = match target {
            None => Opcode::Getline { mode },
            Some(Expr::Var(var)) => {
                let index = var.index as u32;
                match var.scope {
                    Scope::Global => Opcode::GetlineGlobal { mode, index },
                    Scope::Local => Opcode::GetlineLocal { mode, index },
                    Scope::Special => Opcode::GetlineSpecial { mode, index },
                }
            }
            Some(Expr::Field(index)) => {
                self.expr(index, code)?;
                Opcode::GetlineField { mode }
            }
            Some(Expr::Index { array, index }) => {
                self.index_key(index, code)?;
                Opcode::GetlineArray {
                    mode,
                    scope: array.scope,
                    index: array.index as u32,
                }
            }
            Some(other) => unreachable!("getline target is {:?}", other),
        };
        if let Some(source) = command.or(file) {
            self.expr(source, code)?;
        }
        code.push(op);
        Ok(())
    }
}

fn aug_op(op: &Token) -> AugOp {
    match op {
        Token::Add => AugOp::Add,
        Token::Sub => AugOp::Sub,
        Token::Mul => AugOp::Mul,
        Token::Div => AugOp::Div,
        Token::Mod => AugOp::Mod,
        Token::Pow => AugOp::Pow,
        other => unreachable!("unexpected augmented operator {}", other),
    }
}

/// A `+=`/`-=` by an integer constant becomes a fused increment when the
/// amount fits the immediate.
fn incr_amount(op: &Token, right: &Expr) -> Option<i32> {
    let amount = match right {
        Expr::Num(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => *n as i32,
        _ => return None,
    };
    match op {
        Token::Add => Some(amount),
        Token::Sub => Some(-amount),
        _ => None,
    }
}

/// The fused compare-and-branch constructor for a comparison operator, or
/// None when the condition doesn't fuse. The opposite branch sense uses the
/// inverted comparison.
fn fused_jump(op: &Token, jump_if_true: bool) -> Option<fn(i32) -> Opcode> {
    let fused = if jump_if_true {
        match op {
            Token::Less => Opcode::JumpLess as fn(i32) -> Opcode,
            Token::LessOrEqual => Opcode::JumpLessOrEqual,
            Token::Greater => Opcode::JumpGreater,
            Token::GreaterOrEqual => Opcode::JumpGreaterOrEqual,
            Token::Equals => Opcode::JumpEquals,
            Token::NotEquals => Opcode::JumpNotEquals,
            _ => return None,
        }
    } else {
        match op {
            Token::Less => Opcode::JumpGreaterOrEqual as fn(i32) -> Opcode,
            Token::LessOrEqual => Opcode::JumpGreater,
            Token::Greater => Opcode::JumpLessOrEqual,
            Token::GreaterOrEqual => Opcode::JumpLess,
            Token::Equals => Opcode::JumpNotEquals,
            Token::NotEquals => Opcode::JumpEquals,
            _ => return None,
        }
    };
    Some(fused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Redirect;
    use crate::parser::parse;
    use crate::program::SpecialVar;
    use crate::resolver::resolve;

    fn compile_source(src: &str) -> CompiledProgram {
        let program = parse(src).expect("parse error");
        let resolved = resolve(program, &[]).expect("resolve error");
        compile(&resolved).expect("compile error")
    }

    /// Compile a statement inside BEGIN and return the BEGIN block.
    fn compile_stmt(stmt: &str) -> CompiledProgram {
        compile_source(&format!("BEGIN {{ {} }}", stmt))
    }

    #[test]
    fn literals_are_interned_once() {
        let program = compile_stmt("x = 1; y = 1; s = \"a\"; t = \"a\"");
        assert_eq!(program.nums, vec![1.0]);
        assert_eq!(program.strs.len(), 1);
    }

    #[test]
    fn statement_assignment_avoids_dupe_drop() {
        let program = compile_stmt("x = 1");
        assert_eq!(
            program.begin,
            vec![Opcode::Num(0), Opcode::AssignGlobal(0)]
        );
    }

    #[test]
    fn expression_assignment_keeps_the_value() {
        let program = compile_stmt("y = x = 1");
        assert_eq!(
            program.begin,
            vec![
                Opcode::Num(0),
                Opcode::Dupe,
                Opcode::AssignGlobal(0),
                Opcode::AssignGlobal(1),
            ]
        );
    }

    #[test]
    fn statement_increment_is_fused() {
        let program = compile_stmt("x++; x += 3; x -= 2");
        assert_eq!(
            program.begin,
            vec![
                Opcode::IncrGlobal { amount: 1, index: 0 },
                Opcode::IncrGlobal { amount: 3, index: 0 },
                Opcode::IncrGlobal { amount: -2, index: 0 },
            ]
        );
    }

    #[test]
    fn loop_comparison_is_fused() {
        let program = compile_stmt("for (i = 1; i <= 3; i++) s = s i");
        let fused = program
            .begin
            .iter()
            .any(|op| matches!(op, Opcode::JumpLessOrEqual(_)));
        assert!(fused, "expected a fused compare-branch: {:?}", program.begin);
        // the loop ends with the backward fused jump
        match program.begin.last().unwrap() {
            Opcode::JumpLessOrEqual(offset) => assert!(*offset < 0),
            other => panic!("expected backward fused jump, got {:?}", other),
        }
    }

    #[test]
    fn if_condition_is_fused_inverted() {
        let program = compile_stmt("if (x < 1) y = 1");
        assert!(program
            .begin
            .iter()
            .any(|op| matches!(op, Opcode::JumpGreaterOrEqual(_))));
    }

    #[test]
    fn jump_targets_stay_inside_the_block() {
        let sources = [
            "while (x < 10) { if (x == 5) break; x++ }",
            "do x++; while (x < 3)",
            "for (;;) { if (x) break }",
            "if (x) y = 1; else y = 2",
            "x = a && b || c",
            "x = a ? b : c",
        ];
        for src in sources {
            let program = compile_stmt(src);
            for (i, op) in program.begin.iter().enumerate() {
                let offset = match op {
                    Opcode::Jump(o)
                    | Opcode::JumpFalse(o)
                    | Opcode::JumpTrue(o)
                    | Opcode::JumpEquals(o)
                    | Opcode::JumpNotEquals(o)
                    | Opcode::JumpLess(o)
                    | Opcode::JumpGreater(o)
                    | Opcode::JumpLessOrEqual(o)
                    | Opcode::JumpGreaterOrEqual(o) => *o,
                    _ => continue,
                };
                let target = i as i32 + 1 + offset;
                assert!(
                    target >= 0 && target <= program.begin.len() as i32,
                    "jump at {} in {:?} leaves the block",
                    i,
                    src
                );
            }
        }
    }

    #[test]
    fn multi_index_joins_subscripts() {
        let program = compile_stmt("a[1, 2] = 7");
        assert_eq!(
            program.begin,
            vec![
                Opcode::Num(0),
                Opcode::Num(1),
                Opcode::Num(2),
                Opcode::MultiIndex(2),
                Opcode::AssignArrayGlobal(3),
            ]
        );
        assert_eq!(program.nums, vec![7.0, 1.0, 2.0]);
    }

    #[test]
    fn field_number_literal_is_direct() {
        let program = compile_stmt("x = $1 $(i)");
        assert!(program.begin.contains(&Opcode::FieldNum(1)));
        assert!(program.begin.contains(&Opcode::Field));
    }

    #[test]
    fn user_call_layout() {
        let program = compile_source(
            "function f(x, y, a) { a[x] = y }\nBEGIN { f(1, 2, b) }",
        );
        assert_eq!(
            program.begin,
            vec![
                Opcode::Num(0),
                Opcode::Num(1),
                Opcode::CallUser {
                    func: 0,
                    num_array_args: 1
                },
                Opcode::ArrayArg {
                    scope: Scope::Global,
                    index: 3
                },
                Opcode::Drop,
            ]
        );
        assert_eq!(program.functions[0].num_scalars, 2);
        assert_eq!(program.functions[0].num_arrays, 1);
    }

    #[test]
    fn missing_scalar_arguments_push_nulls() {
        let program = compile_source("function f(a, b, c) { return a }\nBEGIN { f(1) }");
        assert!(program.begin.contains(&Opcode::Nulls(2)));
    }

    #[test]
    fn exit_forms() {
        assert!(compile_stmt("exit").begin.contains(&Opcode::Exit));
        assert!(compile_stmt("exit 2").begin.contains(&Opcode::ExitStatus));
    }

    #[test]
    fn for_in_body_is_inline() {
        let program = compile_stmt("for (k in a) { if (k == 3) break; print k }");
        match program.begin[0] {
            Opcode::ForIn {
                var_scope: Scope::Global,
                array_scope: Scope::Global,
                body_len,
                ..
            } => {
                assert_eq!(body_len as usize, program.begin.len() - 1);
            }
            other => panic!("expected ForIn, got {:?}", other),
        }
        assert!(program.begin.contains(&Opcode::BreakForIn));
    }

    #[test]
    fn special_assignment_uses_special_opcodes() {
        let program = compile_stmt("NF = 2; FS = \",\"");
        assert_eq!(
            program.begin,
            vec![
                Opcode::Num(0),
                Opcode::AssignSpecial(SpecialVar::Nf as u32),
                Opcode::Str(0),
                Opcode::AssignSpecial(SpecialVar::Fs as u32),
            ]
        );
    }

    #[test]
    fn regex_literal_positions() {
        // standalone: match $0; as a match operand: pattern string
        let program = compile_stmt("if (/ab/) x = $0 ~ /cd/");
        assert!(program.begin.contains(&Opcode::Regex(0)));
        assert_eq!(program.regexes.len(), 1);
        assert!(program.strs.iter().any(|s| s.as_ref() == "cd"));
    }

    #[test]
    fn bad_regex_literal_fails_to_compile() {
        let program = parse("BEGIN { if (/([)/) x = 1 }").expect("parse error");
        let resolved = resolve(program, &[]).expect("resolve error");
        assert!(compile(&resolved).is_err());
    }

    #[test]
    fn sub_stores_back_into_target() {
        let program = compile_stmt("gsub(/a/, \"b\", s)");
        assert_eq!(
            program.begin,
            vec![
                Opcode::Str(0),
                Opcode::Str(1),
                Opcode::Global(0),
                Opcode::CallGsub,
                Opcode::AssignGlobal(0),
                Opcode::Drop,
            ]
        );
    }

    #[test]
    fn print_with_redirect_evaluates_dest_first() {
        let program = compile_stmt("print 1 > \"file\"");
        assert_eq!(
            program.begin,
            vec![
                Opcode::Str(0),
                Opcode::Num(0),
                Opcode::Print {
                    num_args: 1,
                    redirect: Some(Redirect::File)
                },
            ]
        );
    }

    #[test]
    fn getline_operand_order() {
        let program = compile_stmt("while ((getline line < \"f\") > 0) n++");
        assert!(program.begin.iter().any(|op| matches!(
            op,
            Opcode::GetlineGlobal {
                mode: InputMode::File,
                ..
            }
        )));
    }

    #[test]
    fn split_carries_destination_inline() {
        let program = compile_stmt("n = split($0, parts, \",\")");
        assert!(program.begin.iter().any(|op| matches!(
            op,
            Opcode::CallSplitSep {
                scope: Scope::Global,
                ..
            }
        )));
    }
}
