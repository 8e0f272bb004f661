//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use super::array::Array;
use super::builtins::{char_len, index_of, match_offsets, sub_replace, substr};
use super::format::sprintf;
use super::io::exec_shell;
use super::record::{split_record, FieldSeparator};
use super::value::Value;
use super::{Interp, MAX_CALL_DEPTH};
use crate::ast::Scope;
use crate::program::{AugOp, InputMode, Opcode};
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::io::Write;
use std::process::Stdio;
use std::rc::Rc;
use std::time::SystemTime;

/// A structured non-local exit, carried as the error channel of `execute`.
/// Runtime errors travel the same way; everything else is absorbed by the
/// frame it belongs to and never reaches the user.
pub(crate) enum Signal {
    /// BreakForIn, absorbed by the enclosing ForIn driver
    Break,
    /// next: unwinds to the per-record driver
    Next,
    /// exit: unwinds to the top-level driver (status is on the interpreter)
    Exit,
    /// return: unwinds to CallUser, which pushes the payload
    Return(Value),
    /// a hard runtime error
    Error(String),
}

impl From<String> for Signal {
    fn from(message: String) -> Self {
        Signal::Error(message)
    }
}

type ExecResult = Result<(), Signal>;

fn offset_ip(ip: usize, offset: i32) -> usize {
    (ip as i64 + offset as i64) as usize
}

/// Evaluate an augmented-assignment operation.
fn aug_assign_op(op: AugOp, left: &Value, right: &Value) -> Result<Value, String> {
    let left = left.num();
    let right = right.num();
    let result = match op {
        AugOp::Add => left + right,
        AugOp::Sub => left - right,
        AugOp::Mul => left * right,
        AugOp::Div => {
            if right == 0.0 {
                return Err("division by zero".to_string());
            }
            left / right
        }
        AugOp::Pow => left.powf(right),
        AugOp::Mod => {
            if right == 0.0 {
                return Err("division by zero in mod".to_string());
            }
            left % right
        }
    };
    Ok(Value::Num(result))
}

impl<'a, 'p> Interp<'a, 'p> {
    // Stack primitives. The frame of the active call is the top
    // num_scalars entries starting at frame_base.

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop from empty stack")
    }

    fn pop_two(&mut self) -> (Value, Value) {
        let right = self.pop();
        let left = self.pop();
        (left, right)
    }

    /// Pop n values, returned in push order.
    fn pop_slice(&mut self, n: usize) -> Vec<Value> {
        self.stack.split_off(self.stack.len() - n)
    }

    fn pop_str(&mut self) -> Rc<str> {
        let value = self.pop();
        self.to_str(&value)
    }

    fn local(&self, index: u32) -> Value {
        self.stack[self.frame_base + index as usize].clone()
    }

    fn set_local(&mut self, index: u32, value: Value) {
        let slot = self.frame_base + index as usize;
        self.stack[slot] = value;
    }

    fn array_pool_index(&self, scope: Scope, index: u32) -> usize {
        match scope {
            Scope::Global => index as usize,
            Scope::Local => self.local_arrays.last().expect("no active call frame")
                [index as usize],
            Scope::Special => unreachable!("arrays are never specials"),
        }
    }

    fn compare_tops(&mut self) -> Ordering {
        let (left, right) = self.pop_two();
        left.compare(&right, &self.convfmt)
    }

    fn equals_tops(&mut self) -> bool {
        let (left, right) = self.pop_two();
        left.equals(&right, &self.convfmt)
    }

    /// Execute one opcode block. This is the dispatch loop: read the opcode
    /// at the instruction pointer, run its handler, advance.
    pub(crate) fn execute(&mut self, code: &[Opcode]) -> ExecResult {
        let program = self.program;
        let mut ip = 0usize;
        while ip < code.len() {
            let op = code[ip];
            ip += 1;
            match op {
                Opcode::Num(index) => self.push(Value::Num(program.nums[index as usize])),
                Opcode::Str(index) => {
                    self.push(Value::Str(program.strs[index as usize].clone()))
                }
                Opcode::Regex(index) => {
                    let matched = program.regexes[index as usize].is_match(&self.line);
                    self.push(matched.into());
                }

                Opcode::Dupe => {
                    let top = self.stack.last().expect("dupe on empty stack").clone();
                    self.push(top);
                }
                Opcode::Drop => {
                    self.pop();
                }
                Opcode::Swap => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }

                Opcode::Field => {
                    let index = self.pop().num();
                    let field = self.get_field(index)?;
                    self.push(field);
                }
                Opcode::FieldNum(index) => {
                    let field = self.get_field(index as f64)?;
                    self.push(field);
                }
                Opcode::Global(index) => self.push(self.globals[index as usize].clone()),
                Opcode::Local(index) => self.push(self.local(index)),
                Opcode::Special(index) => self.push(self.get_special(index as usize)),
                Opcode::ArrayGlobal(index) => {
                    let key = self.pop_str();
                    let value = self.arrays[index as usize].get(key);
                    self.push(value);
                }
                Opcode::ArrayLocal(index) => {
                    let key = self.pop_str();
                    let pool = self.array_pool_index(Scope::Local, index);
                    let value = self.arrays[pool].get(key);
                    self.push(value);
                }
                Opcode::InGlobal(index) => {
                    let key = self.pop_str();
                    self.push(self.arrays[index as usize].contains(&key).into());
                }
                Opcode::InLocal(index) => {
                    let key = self.pop_str();
                    let pool = self.array_pool_index(Scope::Local, index);
                    self.push(self.arrays[pool].contains(&key).into());
                }

                Opcode::AssignField => {
                    let index = self.pop().num();
                    let value = self.pop_str();
                    self.set_field(index, value)?;
                }
                Opcode::AssignGlobal(index) => {
                    self.globals[index as usize] = self.pop();
                }
                Opcode::AssignLocal(index) => {
                    let value = self.pop();
                    self.set_local(index, value);
                }
                Opcode::AssignSpecial(index) => {
                    let value = self.pop();
                    self.set_special(index as usize, value)?;
                }
                Opcode::AssignArrayGlobal(index) => {
                    let key = self.pop_str();
                    let value = self.pop();
                    self.arrays[index as usize].set(key, value);
                }
                Opcode::AssignArrayLocal(index) => {
                    let key = self.pop_str();
                    let value = self.pop();
                    let pool = self.array_pool_index(Scope::Local, index);
                    self.arrays[pool].set(key, value);
                }

                Opcode::Delete { scope, index } => {
                    let key = self.pop_str();
                    let pool = self.array_pool_index(scope, index);
                    self.arrays[pool].delete(&key);
                }
                Opcode::DeleteAll { scope, index } => {
                    let pool = self.array_pool_index(scope, index);
                    self.arrays[pool].clear();
                }

                Opcode::IncrField(amount) => {
                    let index = self.pop().num();
                    let value = self.get_field(index)?;
                    let incremented = Value::Num(value.num() + amount as f64);
                    let text = self.to_str(&incremented);
                    self.set_field(index, text)?;
                }
                Opcode::IncrGlobal { amount, index } => {
                    let value = &mut self.globals[index as usize];
                    *value = Value::Num(value.num() + amount as f64);
                }
                Opcode::IncrLocal { amount, index } => {
                    let value = self.local(index);
                    self.set_local(index, Value::Num(value.num() + amount as f64));
                }
                Opcode::IncrSpecial { amount, index } => {
                    let value = self.get_special(index as usize);
                    self.set_special(index as usize, Value::Num(value.num() + amount as f64))?;
                }
                Opcode::IncrArrayGlobal { amount, index } => {
                    let key = self.pop_str();
                    let entry = self.arrays[index as usize].get_mut(key);
                    *entry = Value::Num(entry.num() + amount as f64);
                }
                Opcode::IncrArrayLocal { amount, index } => {
                    let key = self.pop_str();
                    let pool = self.array_pool_index(Scope::Local, index);
                    let entry = self.arrays[pool].get_mut(key);
                    *entry = Value::Num(entry.num() + amount as f64);
                }

                Opcode::AugAssignField(op) => {
                    let index = self.pop().num();
                    let right = self.pop();
                    let left = self.get_field(index)?;
                    let value = aug_assign_op(op, &left, &right)?;
                    let text = self.to_str(&value);
                    self.set_field(index, text)?;
                }
                Opcode::AugAssignGlobal { op, index } => {
                    let right = self.pop();
                    let value = aug_assign_op(op, &self.globals[index as usize], &right)?;
                    self.globals[index as usize] = value;
                }
                Opcode::AugAssignLocal { op, index } => {
                    let right = self.pop();
                    let left = self.local(index);
                    self.set_local(index, aug_assign_op(op, &left, &right)?);
                }
                Opcode::AugAssignSpecial { op, index } => {
                    let right = self.pop();
                    let left = self.get_special(index as usize);
                    self.set_special(index as usize, aug_assign_op(op, &left, &right)?)?;
                }
                Opcode::AugAssignArrayGlobal { op, index } => {
                    let key = self.pop_str();
                    let right = self.pop();
                    let entry = self.arrays[index as usize].get_mut(key);
                    *entry = aug_assign_op(op, entry, &right)?;
                }
                Opcode::AugAssignArrayLocal { op, index } => {
                    let key = self.pop_str();
                    let right = self.pop();
                    let pool = self.array_pool_index(Scope::Local, index);
                    let entry = self.arrays[pool].get_mut(key);
                    *entry = aug_assign_op(op, entry, &right)?;
                }

                Opcode::MultiIndex(num_values) => {
                    let values = self.pop_slice(num_values as usize);
                    let mut key = String::new();
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            key.push_str(&self.subsep);
                        }
                        key.push_str(&self.to_str(value));
                    }
                    self.push(Value::str(key));
                }

                Opcode::Add => {
                    let (left, right) = self.pop_two();
                    self.push(Value::Num(left.num() + right.num()));
                }
                Opcode::Subtract => {
                    let (left, right) = self.pop_two();
                    self.push(Value::Num(left.num() - right.num()));
                }
                Opcode::Multiply => {
                    let (left, right) = self.pop_two();
                    self.push(Value::Num(left.num() * right.num()));
                }
                Opcode::Divide => {
                    let (left, right) = self.pop_two();
                    let divisor = right.num();
                    if divisor == 0.0 {
                        return Err(Signal::Error("division by zero".to_string()));
                    }
                    self.push(Value::Num(left.num() / divisor));
                }
                Opcode::Power => {
                    let (left, right) = self.pop_two();
                    self.push(Value::Num(left.num().powf(right.num())));
                }
                Opcode::Modulo => {
                    let (left, right) = self.pop_two();
                    let divisor = right.num();
                    if divisor == 0.0 {
                        return Err(Signal::Error("division by zero in mod".to_string()));
                    }
                    self.push(Value::Num(left.num() % divisor));
                }

                Opcode::Equals => {
                    let equal = self.equals_tops();
                    self.push(equal.into());
                }
                Opcode::NotEquals => {
                    let equal = self.equals_tops();
                    self.push((!equal).into());
                }
                Opcode::Less => {
                    let ord = self.compare_tops();
                    self.push((ord == Ordering::Less).into());
                }
                Opcode::Greater => {
                    let ord = self.compare_tops();
                    self.push((ord == Ordering::Greater).into());
                }
                Opcode::LessOrEqual => {
                    let ord = self.compare_tops();
                    self.push((ord != Ordering::Greater).into());
                }
                Opcode::GreaterOrEqual => {
                    let ord = self.compare_tops();
                    self.push((ord != Ordering::Less).into());
                }

                Opcode::Concat => {
                    let (left, right) = self.pop_two();
                    let mut out = self.to_str(&left).to_string();
                    out.push_str(&self.to_str(&right));
                    self.push(Value::str(out));
                }
                Opcode::Match | Opcode::NotMatch => {
                    let pattern = self.pop_str();
                    let subject = self.pop_str();
                    let regex = self.compile_regex(pattern)?;
                    let matched = regex.is_match(&subject);
                    self.push((matched == (op == Opcode::Match)).into());
                }

                Opcode::Not => {
                    let value = self.pop();
                    self.push((!value.boolean()).into());
                }
                Opcode::UnaryMinus => {
                    let value = self.pop();
                    self.push(Value::Num(-value.num()));
                }
                Opcode::UnaryPlus => {
                    let value = self.pop();
                    self.push(Value::Num(value.num()));
                }
                Opcode::Boolean => {
                    let value = self.pop();
                    self.push(value.boolean().into());
                }

                Opcode::Jump(offset) => ip = offset_ip(ip, offset),
                Opcode::JumpFalse(offset) => {
                    if !self.pop().boolean() {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpTrue(offset) => {
                    if self.pop().boolean() {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpEquals(offset) => {
                    if self.equals_tops() {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpNotEquals(offset) => {
                    if !self.equals_tops() {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpLess(offset) => {
                    if self.compare_tops() == Ordering::Less {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpGreater(offset) => {
                    if self.compare_tops() == Ordering::Greater {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpLessOrEqual(offset) => {
                    if self.compare_tops() != Ordering::Greater {
                        ip = offset_ip(ip, offset);
                    }
                }
                Opcode::JumpGreaterOrEqual(offset) => {
                    if self.compare_tops() != Ordering::Less {
                        ip = offset_ip(ip, offset);
                    }
                }

                Opcode::Next => return Err(Signal::Next),
                Opcode::Exit => return Err(Signal::Exit),
                Opcode::ExitStatus => {
                    self.exit_status = self.pop().num() as i32;
                    return Err(Signal::Exit);
                }

                Opcode::ForIn {
                    var_scope,
                    var_index,
                    array_scope,
                    array_index,
                    body_len,
                } => {
                    let pool = self.array_pool_index(array_scope, array_index);
                    let keys = self.arrays[pool].keys();
                    let body = &code[ip..ip + body_len as usize];
                    for key in keys {
                        match var_scope {
                            Scope::Global => {
                                self.globals[var_index as usize] = Value::Str(key)
                            }
                            Scope::Local => self.set_local(var_index, Value::Str(key)),
                            Scope::Special => {
                                self.set_special(var_index as usize, Value::Str(key))?
                            }
                        }
                        match self.execute(body) {
                            Ok(()) => {}
                            Err(Signal::Break) => break,
                            Err(err) => return Err(err),
                        }
                    }
                    ip += body_len as usize;
                }
                Opcode::BreakForIn => return Err(Signal::Break),

                Opcode::CallAtan2 => {
                    let (y, x) = self.pop_two();
                    self.push(Value::Num(y.num().atan2(x.num())));
                }
                Opcode::CallCos => {
                    let value = self.pop().num();
                    self.push(Value::Num(value.cos()));
                }
                Opcode::CallSin => {
                    let value = self.pop().num();
                    self.push(Value::Num(value.sin()));
                }
                Opcode::CallExp => {
                    let value = self.pop().num();
                    self.push(Value::Num(value.exp()));
                }
                Opcode::CallLog => {
                    let value = self.pop().num();
                    self.push(Value::Num(value.ln()));
                }
                Opcode::CallSqrt => {
                    let value = self.pop().num();
                    self.push(Value::Num(value.sqrt()));
                }
                Opcode::CallInt => {
                    let value = self.pop().num();
                    self.push(Value::Num(value.trunc()));
                }
                Opcode::CallRand => {
                    let value: f64 = self.rng.gen_range(0.0..1.0);
                    self.push(Value::Num(value));
                }
                Opcode::CallSrand => {
                    let seed = SystemTime::now()
                        .duration_since(SystemTime::UNIX_EPOCH)
                        .map(|d| d.as_secs() as f64)
                        .unwrap_or(0.0);
                    self.push(Value::Num(self.rand_seed));
                    self.rand_seed = seed;
                    self.rng = rand::rngs::SmallRng::seed_from_u64(seed.to_bits());
                }
                Opcode::CallSrandSeed => {
                    let seed = self.pop().num();
                    self.push(Value::Num(self.rand_seed));
                    self.rand_seed = seed;
                    self.rng = rand::rngs::SmallRng::seed_from_u64(seed.to_bits());
                }

                Opcode::CallClose => {
                    let name = self.pop_str();
                    let result = self.io.close_stream(&name);
                    self.push(Value::Num(result));
                }
                Opcode::CallFflush => {
                    let name = self.pop_str();
                    let ok = if name.is_empty() {
                        self.io.flush_all()
                    } else {
                        self.io.flush_stream(&name)
                    };
                    self.push(Value::Num(if ok { 0.0 } else { -1.0 }));
                }
                Opcode::CallFflushAll => {
                    let ok = self.io.flush_all();
                    self.push(Value::Num(if ok { 0.0 } else { -1.0 }));
                }

                Opcode::CallGsub | Opcode::CallSub => {
                    let subject = self.pop_str();
                    let replacement = self.pop_str();
                    let pattern = self.pop_str();
                    let regex = self.compile_regex(pattern)?;
                    let (out, count) = sub_replace(
                        &regex,
                        &replacement,
                        &subject,
                        op == Opcode::CallSub,
                    );
                    self.push(Value::Num(count as f64));
                    self.push(Value::str(out));
                }
                Opcode::CallIndex => {
                    let needle = self.pop_str();
                    let haystack = self.pop_str();
                    self.push(Value::Num(index_of(&haystack, &needle, self.bytes)));
                }
                Opcode::CallLength => {
                    self.push(Value::Num(char_len(&self.line, self.bytes) as f64));
                }
                Opcode::CallLengthArg => {
                    let value = self.pop_str();
                    self.push(Value::Num(char_len(&value, self.bytes) as f64));
                }
                Opcode::CallMatch => {
                    let pattern = self.pop_str();
                    let subject = self.pop_str();
                    let regex = self.compile_regex(pattern)?;
                    let (rstart, rlength) = match_offsets(&regex, &subject, self.bytes);
                    self.rstart = rstart;
                    self.rlength = rlength;
                    self.push(Value::Num(rstart));
                }
                Opcode::CallSplit { scope, index } => {
                    let subject = self.pop_str();
                    let count = self.split_into_array(&subject, None, scope, index)?;
                    self.push(Value::Num(count as f64));
                }
                Opcode::CallSplitSep { scope, index } => {
                    let separator = self.pop_str();
                    let subject = self.pop_str();
                    let count =
                        self.split_into_array(&subject, Some(&separator), scope, index)?;
                    self.push(Value::Num(count as f64));
                }
                Opcode::CallSprintf(num_args) => {
                    let args = self.pop_slice(num_args as usize);
                    let format = self.to_str(&args[0]);
                    let out = sprintf(&format, &args[1..], &self.convfmt)?;
                    self.push(Value::str(out));
                }
                Opcode::CallSubstr => {
                    let position = self.pop().num();
                    let subject = self.pop_str();
                    self.push(Value::str(substr(&subject, position, None, self.bytes)));
                }
                Opcode::CallSubstrLength => {
                    let length = self.pop().num();
                    let position = self.pop().num();
                    let subject = self.pop_str();
                    self.push(Value::str(substr(
                        &subject,
                        position,
                        Some(length),
                        self.bytes,
                    )));
                }
                Opcode::CallSystem => self.call_system()?,
                Opcode::CallTolower => {
                    let value = self.pop_str();
                    self.push(Value::str(value.to_lowercase()));
                }
                Opcode::CallToupper => {
                    let value = self.pop_str();
                    self.push(Value::str(value.to_uppercase()));
                }

                Opcode::CallUser {
                    func,
                    num_array_args,
                } => {
                    let function = &program.functions[func as usize];

                    // resolve array arguments to pool aliases
                    let mut arrays = Vec::with_capacity(function.num_arrays);
                    for j in 0..num_array_args as usize {
                        match code[ip + j] {
                            Opcode::ArrayArg { scope, index } => {
                                arrays.push(self.array_pool_index(scope, index))
                            }
                            other => unreachable!("expected array operand, found {:?}", other),
                        }
                    }
                    ip += num_array_args as usize;

                    if self.call_depth >= MAX_CALL_DEPTH {
                        return Err(Signal::Error(format!(
                            "calling \"{}\" exceeded maximum call depth of {}",
                            function.name, MAX_CALL_DEPTH
                        )));
                    }

                    // fresh arrays for the remaining array parameters
                    let old_arrays_len = self.arrays.len();
                    for _ in arrays.len()..function.num_arrays {
                        arrays.push(self.arrays.len());
                        self.arrays.push(Array::default());
                    }
                    self.local_arrays.push(arrays);

                    // the scalar arguments on the stack become the frame
                    let old_frame = self.frame_base;
                    self.frame_base = self.stack.len() - function.num_scalars;

                    self.call_depth += 1;
                    let result = self.execute(&function.body);
                    self.call_depth -= 1;

                    self.stack.truncate(self.frame_base);
                    self.frame_base = old_frame;
                    self.local_arrays.pop();
                    self.arrays.truncate(old_arrays_len);

                    match result {
                        Ok(()) => self.push(Value::Null),
                        Err(Signal::Return(value)) => self.push(value),
                        Err(err) => return Err(err),
                    }
                }
                Opcode::ArrayArg { .. } => {
                    unreachable!("array operand executed as an instruction")
                }
                Opcode::CallNative { func, num_args } => {
                    let args = self.pop_slice(num_args as usize);
                    let native = &mut self.natives[func as usize];
                    let result = (native.func)(&args).map_err(Signal::Error)?;
                    self.push(result);
                }

                Opcode::Return => {
                    let value = self.pop();
                    return Err(Signal::Return(value));
                }
                Opcode::ReturnNull => return Err(Signal::Return(Value::Null)),
                Opcode::Nulls(count) => {
                    for _ in 0..count {
                        self.push(Value::Null);
                    }
                }

                Opcode::Print { num_args, redirect } => {
                    let mut text = if num_args > 0 {
                        let args = self.pop_slice(num_args as usize);
                        let mut text = String::new();
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                text.push_str(&self.ofs);
                            }
                            text.push_str(&self.to_output_str(arg));
                        }
                        text
                    } else {
                        // print with no arguments prints the record
                        self.line.to_string()
                    };
                    text.push_str(&self.ors);
                    self.write_output(redirect, text.as_bytes())?;
                }
                Opcode::Printf { num_args, redirect } => {
                    let args = self.pop_slice(num_args as usize);
                    let format = self.to_str(&args[0]);
                    let text = sprintf(&format, &args[1..], &self.convfmt)?;
                    self.write_output(redirect, text.as_bytes())?;
                }

                Opcode::Getline { mode } => {
                    let (ret, record) = self.getline_read(mode)?;
                    if let Some(record) = record {
                        self.set_line(Rc::from(record));
                    }
                    self.push(Value::Num(ret));
                }
                Opcode::GetlineField { mode } => {
                    let (ret, record) = self.getline_read(mode)?;
                    let index = self.pop().num();
                    if let Some(record) = record {
                        self.set_field(index, Rc::from(record))?;
                    }
                    self.push(Value::Num(ret));
                }
                Opcode::GetlineGlobal { mode, index } => {
                    let (ret, record) = self.getline_read(mode)?;
                    if let Some(record) = record {
                        self.globals[index as usize] = Value::num_str(record);
                    }
                    self.push(Value::Num(ret));
                }
                Opcode::GetlineLocal { mode, index } => {
                    let (ret, record) = self.getline_read(mode)?;
                    if let Some(record) = record {
                        self.set_local(index, Value::num_str(record));
                    }
                    self.push(Value::Num(ret));
                }
                Opcode::GetlineSpecial { mode, index } => {
                    let (ret, record) = self.getline_read(mode)?;
                    if let Some(record) = record {
                        self.set_special(index as usize, Value::num_str(record))?;
                    }
                    self.push(Value::Num(ret));
                }
                Opcode::GetlineArray { mode, scope, index } => {
                    let (ret, record) = self.getline_read(mode)?;
                    let key = self.pop_str();
                    if let Some(record) = record {
                        let pool = self.array_pool_index(scope, index);
                        self.arrays[pool].set(key, Value::num_str(record));
                    }
                    self.push(Value::Num(ret));
                }
            }
        }
        Ok(())
    }

    /// split(s, a) and split(s, a, sep): clear the destination, split, count.
    fn split_into_array(
        &mut self,
        subject: &str,
        separator: Option<&str>,
        scope: Scope,
        index: u32,
    ) -> Result<usize, String> {
        let separator = match separator {
            Some(sep) => Some(FieldSeparator::parse(sep)?),
            None => None,
        };
        let pool = self.array_pool_index(scope, index);
        let array = &mut self.arrays[pool];
        array.clear();
        let mut count = 0;
        split_record(
            subject,
            separator.as_ref().unwrap_or(&self.field_sep),
            |i, part| {
                array.set(Rc::from((i + 1).to_string()), Value::num_str(part));
                count += 1;
            },
        );
        Ok(count)
    }

    fn write_output(
        &mut self,
        redirect: Option<crate::ast::Redirect>,
        data: &[u8],
    ) -> Result<(), String> {
        match redirect {
            None => self
                .io
                .output
                .write_all(data)
                .map_err(|err| err.to_string()),
            Some(kind) => {
                if self.no_exec && kind == crate::ast::Redirect::Pipe {
                    return Err("can't write to pipe due to NoExec".to_string());
                }
                let dest = self.pop_str();
                let stream = self.io.output_stream(kind, dest)?;
                stream.write_all(data)
            }
        }
    }

    /// The shared half of every getline: read one record from the main
    /// input, a file, or a command. Returns 1 and the record on success, 0
    /// at end of input, -1 when the source can't be read.
    fn getline_read(&mut self, mode: InputMode) -> Result<(f64, Option<String>), Signal> {
        match mode {
            InputMode::Main => {
                // the program may have prompted; make that visible first
                self.io.flush_all();
                match self.next_line() {
                    Ok(Some(record)) => Ok((1.0, Some(record))),
                    Ok(None) => Ok((0.0, None)),
                    Err(err) => Err(Signal::Error(err)),
                }
            }
            InputMode::File => {
                let name = self.pop_str();
                match self.io.input_file(name) {
                    None => Ok((-1.0, None)),
                    Some(reader) => match reader.read_record(&self.record_sep) {
                        Ok(Some(record)) => Ok((1.0, Some(record))),
                        Ok(None) => Ok((0.0, None)),
                        Err(_) => Ok((-1.0, None)),
                    },
                }
            }
            InputMode::Command => {
                let name = self.pop_str();
                if self.no_exec {
                    return Err(Signal::Error(
                        "can't read from pipe due to NoExec".to_string(),
                    ));
                }
                self.io.flush_all();
                let reader = self.io.input_pipe(name).map_err(Signal::Error)?;
                match reader.read_record(&self.record_sep) {
                    Ok(Some(record)) => Ok((1.0, Some(record))),
                    Ok(None) => Ok((0.0, None)),
                    Err(_) => Ok((-1.0, None)),
                }
            }
        }
    }

    /// system(cmd): flush everything, run the command to completion wiring
    /// its output to ours, return its exit code (-1 on launch failure).
    fn call_system(&mut self) -> Result<(), Signal> {
        if self.no_exec {
            return Err(Signal::Error(
                "can't call system() due to NoExec".to_string(),
            ));
        }
        let cmdline = self.pop_str();
        self.io.flush_all();
        let output = exec_shell(&cmdline)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let ret = match output {
            Ok(output) => {
                let _ = self.io.output.write_all(&output.stdout);
                let _ = self.io.error.write_all(&output.stderr);
                output.status.code().unwrap_or(-1) as f64
            }
            Err(err) => {
                let _ = writeln!(self.io.error, "{}", err);
                -1.0
            }
        };
        self.push(Value::Num(ret));
        Ok(())
    }
}
