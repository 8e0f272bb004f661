//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::ast::{Redirect, Scope};
use crate::regex::Regex;
use core::fmt;
use std::rc::Rc;

/// The predefined scalar variables. The discriminant is the variable's fixed
/// index in the specials table.
#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SpecialVar {
    Argc,
    Convfmt,
    Filename,
    Fnr,
    Fs,
    Nf,
    Nr,
    Ofmt,
    Ofs,
    Ors,
    Rlength,
    Rs,
    Rstart,
    Subsep,

    /// the total number of special variables
    Count,
}

impl SpecialVar {
    pub fn from_name(name: &str) -> Option<SpecialVar> {
        let var = match name {
            "ARGC" => SpecialVar::Argc,
            "CONVFMT" => SpecialVar::Convfmt,
            "FILENAME" => SpecialVar::Filename,
            "FNR" => SpecialVar::Fnr,
            "FS" => SpecialVar::Fs,
            "NF" => SpecialVar::Nf,
            "NR" => SpecialVar::Nr,
            "OFMT" => SpecialVar::Ofmt,
            "OFS" => SpecialVar::Ofs,
            "ORS" => SpecialVar::Ors,
            "RLENGTH" => SpecialVar::Rlength,
            "RS" => SpecialVar::Rs,
            "RSTART" => SpecialVar::Rstart,
            "SUBSEP" => SpecialVar::Subsep,
            _ => return None,
        };
        Some(var)
    }

    pub fn from_index(index: usize) -> SpecialVar {
        use SpecialVar::*;
        const VARS: [SpecialVar; SpecialVar::Count as usize] = [
            Argc, Convfmt, Filename, Fnr, Fs, Nf, Nr, Ofmt, Ofs, Ors, Rlength, Rs, Rstart, Subsep,
        ];
        VARS[index]
    }
}

/// Operation tag for augmented assignments (also used by the VM to evaluate
/// the combined operation).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AugOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
}

/// Where a getline reads from. For `File` and `Command` the file name or
/// command line is on the stack above any auxiliary operands.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InputMode {
    /// plain `getline`: the main input stream
    Main,
    /// `getline < file`
    File,
    /// `cmd | getline`
    Command,
}

/// A single VM instruction. Each variant is a fixed-width code; immediate
/// operands are carried inline as payload. Jump offsets are signed and
/// relative to the instruction following the jump.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Opcode {
    /// push the number pool entry
    Num(u32),
    /// push the string pool entry
    Str(u32),
    /// stand-alone `/re/`: push whether the regex pool entry matches `$0`
    Regex(u32),

    Dupe,
    Drop,
    Swap,

    // fetch a field, variable, or array item
    Field,
    FieldNum(u32),
    Global(u32),
    Local(u32),
    Special(u32),
    ArrayGlobal(u32),
    ArrayLocal(u32),
    InGlobal(u32),
    InLocal(u32),

    // assign a field, variable, or array item; the stored value is popped
    AssignField,
    AssignGlobal(u32),
    AssignLocal(u32),
    AssignSpecial(u32),
    AssignArrayGlobal(u32),
    AssignArrayLocal(u32),

    /// delete one element (the key is popped)
    Delete { scope: Scope, index: u32 },
    /// delete every element
    DeleteAll { scope: Scope, index: u32 },

    // fused increment-by-constant, statement context only
    IncrField(i32),
    IncrGlobal { amount: i32, index: u32 },
    IncrLocal { amount: i32, index: u32 },
    IncrSpecial { amount: i32, index: u32 },
    IncrArrayGlobal { amount: i32, index: u32 },
    IncrArrayLocal { amount: i32, index: u32 },

    // augmented assignment, statement context: the right-hand side is popped
    AugAssignField(AugOp),
    AugAssignGlobal { op: AugOp, index: u32 },
    AugAssignLocal { op: AugOp, index: u32 },
    AugAssignSpecial { op: AugOp, index: u32 },
    AugAssignArrayGlobal { op: AugOp, index: u32 },
    AugAssignArrayLocal { op: AugOp, index: u32 },

    /// pop n subscript values, convert to strings, join with SUBSEP
    MultiIndex(u32),

    // binary operators
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
    Equals,
    NotEquals,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Concat,
    Match,
    NotMatch,

    // unary operators
    Not,
    UnaryMinus,
    UnaryPlus,
    /// normalize the top of stack to 1 or 0
    Boolean,

    // control flow
    Jump(i32),
    JumpFalse(i32),
    JumpTrue(i32),
    // fused compare-and-branch; implements the full comparison rule
    JumpEquals(i32),
    JumpNotEquals(i32),
    JumpLess(i32),
    JumpGreater(i32),
    JumpLessOrEqual(i32),
    JumpGreaterOrEqual(i32),

    Next,
    /// exit keeping the current status
    Exit,
    /// exit with the popped status
    ExitStatus,

    /// iterate the keys of an array; the body is the next `body_len`
    /// instructions, executed once per key as an inner block
    ForIn {
        var_scope: Scope,
        var_index: u32,
        array_scope: Scope,
        array_index: u32,
        body_len: u32,
    },
    /// `break` inside a for-in body
    BreakForIn,

    // builtin calls; argument counts are fixed by the opcode
    CallAtan2,
    CallClose,
    CallCos,
    CallExp,
    CallFflush,
    CallFflushAll,
    CallGsub,
    CallIndex,
    CallInt,
    CallLength,
    CallLengthArg,
    CallLog,
    CallMatch,
    CallRand,
    CallSin,
    CallSplit { scope: Scope, index: u32 },
    CallSplitSep { scope: Scope, index: u32 },
    CallSprintf(u32),
    CallSqrt,
    CallSrand,
    CallSrandSeed,
    CallSub,
    CallSubstr,
    CallSubstrLength,
    CallSystem,
    CallTolower,
    CallToupper,

    /// call a user function; followed by `num_array_args` ArrayArg operands
    CallUser { func: u32, num_array_args: u32 },
    /// operand of CallUser, never executed directly
    ArrayArg { scope: Scope, index: u32 },
    CallNative { func: u32, num_args: u32 },
    /// return the popped value
    Return,
    /// return the null value
    ReturnNull,
    /// push n null values (missing scalar arguments of a call)
    Nulls(u32),

    Print { num_args: u32, redirect: Option<Redirect> },
    Printf { num_args: u32, redirect: Option<Redirect> },

    // getline family; aux operands (target index, array key) are below the
    // file/command operand
    Getline { mode: InputMode },
    GetlineField { mode: InputMode },
    GetlineGlobal { mode: InputMode, index: u32 },
    GetlineLocal { mode: InputMode, index: u32 },
    GetlineSpecial { mode: InputMode, index: u32 },
    GetlineArray { mode: InputMode, scope: Scope, index: u32 },
}

/// A compiled pattern. Range patterns carry two opcode blocks; the driver
/// keeps the started/stopped state.
#[derive(Debug, PartialEq)]
pub enum Pattern {
    Always,
    Expr(Vec<Opcode>),
    Range { start: Vec<Opcode>, end: Vec<Opcode> },
}

#[derive(Debug, PartialEq)]
pub struct CompiledAction {
    pub pattern: Pattern,
    pub body: Vec<Opcode>,
}

#[derive(Debug, PartialEq, Default)]
pub struct CompiledFunction {
    pub name: Rc<str>,
    pub params: Vec<String>,
    /// true for each parameter that is an array
    pub arrays: Vec<bool>,
    pub num_scalars: usize,
    pub num_arrays: usize,
    pub body: Vec<Opcode>,
}

/// The output of the compiler: one opcode block per BEGIN/rule/END/function,
/// plus the interned literal pools and the global name tables.
pub struct CompiledProgram {
    pub begin: Vec<Opcode>,
    pub actions: Vec<CompiledAction>,
    pub end: Vec<Opcode>,
    pub functions: Vec<CompiledFunction>,
    pub nums: Vec<f64>,
    pub strs: Vec<Rc<str>>,
    pub regexes: Vec<Rc<Regex>>,
    /// global scalar name -> index, used for -v and operand assignments
    pub scalar_names: Vec<String>,
    pub array_names: Vec<String>,
}

fn write_block(f: &mut fmt::Formatter, code: &[Opcode]) -> fmt::Result {
    for (i, op) in code.iter().enumerate() {
        writeln!(f, "    {:4} {:?}", i, op)?;
    }
    Ok(())
}

impl fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.begin.is_empty() {
            writeln!(f, "BEGIN {{")?;
            write_block(f, &self.begin)?;
            writeln!(f, "}}")?;
        }
        for action in &self.actions {
            match &action.pattern {
                Pattern::Always => {}
                Pattern::Expr(expr) => {
                    writeln!(f, "pattern {{")?;
                    write_block(f, expr)?;
                    writeln!(f, "}}")?;
                }
                Pattern::Range { start, end } => {
                    writeln!(f, "range start {{")?;
                    write_block(f, start)?;
                    writeln!(f, "}} range end {{")?;
                    write_block(f, end)?;
                    writeln!(f, "}}")?;
                }
            }
            writeln!(f, "{{")?;
            write_block(f, &action.body)?;
            writeln!(f, "}}")?;
        }
        if !self.end.is_empty() {
            writeln!(f, "END {{")?;
            write_block(f, &self.end)?;
            writeln!(f, "}}")?;
        }
        for function in &self.functions {
            writeln!(
                f,
                "function {}({}) {{",
                function.name,
                function.params.join(", ")
            )?;
            write_block(f, &function.body)?;
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}
