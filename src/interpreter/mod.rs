//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::lexer::unescape;
use crate::program::{CompiledProgram, Pattern, SpecialVar};
use crate::regex::Regex;
use array::Array;
use io::{Io, RecordReader, RecordSeparator};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use record::{ere_escape_char, split_record, FieldSeparator};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::rc::Rc;
use value::Value;
use vm::Signal;

mod array;
mod builtins;
mod format;
mod io;
mod record;
mod value;
mod vm;

#[cfg(test)]
mod tests;

const MAX_CALL_DEPTH: usize = 1000;
const MAX_FIELD_INDEX: usize = 1_000_000;

pub(crate) fn strtod(s: &str) -> f64 {
    lexical::parse_partial_with_options::<f64, _, { lexical::format::C_STRING }>(
        s,
        &lexical::ParseFloatOptions::default(),
    )
    .map(|(val, _)| val)
    .unwrap_or(0.0)
}

/// A host-provided function callable from AWK code. The declaration half of
/// this (name and arity) goes to the resolver.
pub struct NativeFunc<'a> {
    pub name: String,
    #[allow(clippy::type_complexity)]
    pub func: Box<dyn FnMut(&[Value]) -> Result<Value, String> + 'a>,
}

pub struct InterpConfig<'a> {
    /// the operands after the program text: file names and var=value
    pub args: Vec<String>,
    /// -v assignments, applied before BEGIN
    pub assigns: Vec<String>,
    /// -F separator
    pub field_sep: Option<String>,
    /// byte-oriented length/substr/index/match semantics
    pub bytes: bool,
    /// refuse system() and pipes
    pub no_exec: bool,
    pub stdin: Box<dyn BufRead + 'a>,
    pub output: Box<dyn Write + 'a>,
    pub error: Box<dyn Write + 'a>,
    pub natives: Vec<NativeFunc<'a>>,
}

impl Default for InterpConfig<'static> {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            assigns: Vec::new(),
            field_sep: None,
            bytes: false,
            no_exec: false,
            stdin: Box::new(BufReader::new(std::io::stdin())),
            output: Box::new(BufWriter::new(std::io::stdout())),
            error: Box::new(std::io::stderr()),
            natives: Vec::new(),
        }
    }
}

/// Run a compiled program to completion. Returns the exit status; a hard
/// runtime error is reported as Err and the caller exits non-zero.
pub fn interpret(program: &CompiledProgram, config: InterpConfig) -> Result<i32, String> {
    let mut interp = Interp::new(program, config);
    let result = interp.run();
    interp.io.flush_all();
    result
}

/// The state of the main input: the reader for the current ARGV operand.
struct MainInput<'a> {
    current: Option<RecordReader<'a>>,
    stdin: Option<Box<dyn BufRead + 'a>>,
    argv_index: usize,
    /// any operand consumed yet (stdin is the fallback when none is)
    file_read: bool,
}

pub(crate) struct Interp<'a, 'p> {
    program: &'p CompiledProgram,

    // value stack; the active frame is the slice starting at frame_base
    stack: Vec<Value>,
    frame_base: usize,
    call_depth: usize,

    globals: Vec<Value>,
    /// array pool: the global arrays first, then arrays allocated for calls
    arrays: Vec<Array>,
    /// per-call array parameter aliases into the pool
    local_arrays: Vec<Vec<usize>>,

    // current record
    line: Rc<str>,
    fields: Vec<Rc<str>>,

    // special variable state; assignment runs side effects
    argc: f64,
    convfmt: Rc<str>,
    filename: Value,
    fnr: f64,
    fs: Rc<str>,
    field_sep: FieldSeparator,
    nr: f64,
    ofmt: Rc<str>,
    ofs: Rc<str>,
    ors: Rc<str>,
    rlength: f64,
    rs: Rc<str>,
    record_sep: RecordSeparator,
    rstart: f64,
    subsep: Rc<str>,
    /// FS combined with newline for paragraph mode (RS=""); rebuilt when FS
    /// or RS changes
    paragraph_fs: Option<FieldSeparator>,

    argv_array: usize,

    regex_cache: HashMap<Rc<str>, Rc<Regex>>,
    rng: SmallRng,
    rand_seed: f64,

    bytes: bool,
    no_exec: bool,
    exit_status: i32,
    range_started: Vec<bool>,

    io: Io<'a>,
    main_input: MainInput<'a>,
    natives: Vec<NativeFunc<'a>>,

    // pending CLI state applied before BEGIN
    assigns: Vec<String>,
    field_sep_arg: Option<String>,
}

fn array_name_index(program: &CompiledProgram, name: &str) -> usize {
    program
        .array_names
        .iter()
        .position(|n| n == name)
        .expect("built-in array missing from the resolved program")
}

impl<'a, 'p> Interp<'a, 'p> {
    fn new(program: &'p CompiledProgram, config: InterpConfig<'a>) -> Self {
        let mut arrays: Vec<Array> = (0..program.array_names.len())
            .map(|_| Array::default())
            .collect();

        let argv_array = array_name_index(program, "ARGV");
        let environ_array = array_name_index(program, "ENVIRON");
        arrays[argv_array] = std::iter::once(("0".to_string(), Value::str("rawk")))
            .chain(
                config
                    .args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| ((i + 1).to_string(), Value::num_str(arg.as_str()))),
            )
            .collect();
        arrays[environ_array] = std::env::vars()
            .map(|(key, value)| (key, Value::num_str(value)))
            .collect();

        let mut natives = config.natives;
        natives.sort_by(|a, b| a.name.cmp(&b.name));

        Interp {
            program,
            stack: Vec::new(),
            frame_base: 0,
            call_depth: 0,
            globals: vec![Value::Null; program.scalar_names.len()],
            arrays,
            local_arrays: Vec::new(),
            line: Rc::from(""),
            fields: Vec::new(),
            argc: config.args.len() as f64 + 1.0,
            convfmt: Rc::from("%.6g"),
            filename: Value::str(""),
            fnr: 0.0,
            fs: Rc::from(" "),
            field_sep: FieldSeparator::Default,
            nr: 0.0,
            ofmt: Rc::from("%.6g"),
            ofs: Rc::from(" "),
            ors: Rc::from("\n"),
            rlength: -1.0,
            rs: Rc::from("\n"),
            record_sep: RecordSeparator::Char(b'\n'),
            rstart: 0.0,
            subsep: Rc::from("\x1c"),
            paragraph_fs: None,
            argv_array,
            regex_cache: HashMap::new(),
            rng: SmallRng::seed_from_u64(0),
            rand_seed: 0.0,
            bytes: config.bytes,
            no_exec: config.no_exec,
            exit_status: 0,
            range_started: vec![false; program.actions.len()],
            io: Io::new(config.output, config.error),
            main_input: MainInput {
                current: None,
                stdin: Some(config.stdin),
                argv_index: 1,
                file_read: false,
            },
            natives,
            assigns: config.assigns,
            field_sep_arg: config.field_sep,
        }
    }

    fn run(&mut self) -> Result<i32, String> {
        let program = self.program;

        // -v assignments and -F run before BEGIN
        let assigns = std::mem::take(&mut self.assigns);
        for assign in &assigns {
            if let Some((name, value)) = parse_assignment(assign) {
                self.assign_by_name(name, value)?;
            }
        }
        if let Some(fs) = self.field_sep_arg.take() {
            self.set_special(SpecialVar::Fs as usize, Value::str(fs.as_str()))?;
        }

        let mut exited = false;
        match self.execute(&program.begin) {
            Ok(()) => {}
            Err(Signal::Exit) => exited = true,
            Err(Signal::Error(err)) => return Err(err),
            Err(_) => unreachable!("loop signal escaped a BEGIN block"),
        }

        let has_main = !program.actions.is_empty() || !program.end.is_empty();
        if !exited && has_main {
            match self.main_loop() {
                Ok(()) | Err(Signal::Exit) => {}
                Err(Signal::Error(err)) => return Err(err),
                Err(_) => unreachable!("loop signal escaped the record loop"),
            }
        }

        match self.execute(&program.end) {
            Ok(()) | Err(Signal::Exit) => {}
            Err(Signal::Error(err)) => return Err(err),
            Err(_) => unreachable!("loop signal escaped an END block"),
        }

        Ok(self.exit_status)
    }

    fn main_loop(&mut self) -> Result<(), Signal> {
        let program = self.program;
        'record: while let Some(record) = self.next_line().map_err(Signal::Error)? {
            self.set_line(Rc::from(record));
            for i in 0..program.actions.len() {
                let action = &program.actions[i];
                let matched = match &action.pattern {
                    Pattern::Always => true,
                    Pattern::Expr(code) => self.eval_pattern(code)?,
                    Pattern::Range { start, end } => {
                        if self.range_started[i] {
                            if self.eval_pattern(end)? {
                                self.range_started[i] = false;
                            }
                            true
                        } else if self.eval_pattern(start)? {
                            // the range may end on the record it starts on
                            self.range_started[i] = !self.eval_pattern(end)?;
                            true
                        } else {
                            false
                        }
                    }
                };
                if !matched {
                    continue;
                }
                match self.execute(&action.body) {
                    Ok(()) => {}
                    Err(Signal::Next) => continue 'record,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    fn eval_pattern(&mut self, code: &[crate::program::Opcode]) -> Result<bool, Signal> {
        self.execute(code)?;
        Ok(self.pop().boolean())
    }

    /// Deliver the next main-input record, walking ARGV: skipping empty
    /// operands, applying var=value operands, and falling back to stdin when
    /// no file operand was consumed. Updates NR, FNR and FILENAME.
    fn next_line(&mut self) -> Result<Option<String>, String> {
        loop {
            if let Some(reader) = &mut self.main_input.current {
                match reader.read_record(&self.record_sep)? {
                    Some(record) => {
                        self.nr += 1.0;
                        self.fnr += 1.0;
                        return Ok(Some(record));
                    }
                    None => self.main_input.current = None,
                }
            }
            // the current operand is exhausted: find the next input source
            loop {
                if self.main_input.argv_index >= self.argc as usize {
                    if self.main_input.file_read || self.main_input.stdin.is_none() {
                        return Ok(None);
                    }
                    let stdin = self.main_input.stdin.take().unwrap();
                    self.main_input.current = Some(RecordReader::new(stdin));
                    self.main_input.file_read = true;
                    self.filename = Value::str("");
                    self.fnr = 0.0;
                    break;
                }
                let key = self.main_input.argv_index.to_string();
                self.main_input.argv_index += 1;
                let arg = match self.arrays[self.argv_array].lookup(&key) {
                    Some(value) => self.to_str(&value.clone()),
                    None => continue,
                };
                if arg.is_empty() {
                    continue;
                }
                if let Some((name, value)) = parse_assignment(&arg) {
                    self.assign_by_name(name, value)?;
                    continue;
                }
                if arg.as_ref() == "-" {
                    let stdin = match self.main_input.stdin.take() {
                        Some(stdin) => stdin,
                        None => continue,
                    };
                    self.main_input.current = Some(RecordReader::new(stdin));
                } else {
                    let reader = RecordReader::open(&arg)
                        .map_err(|err| format!("can't open file \"{}\": {}", arg, err))?;
                    self.main_input.current = Some(reader);
                }
                self.main_input.file_read = true;
                self.filename = Value::num_str(arg);
                self.fnr = 0.0;
                break;
            }
        }
    }

    /// A var=value operand or -v option: the value gets escape processing
    /// and numeric-string treatment, and the target may be a special.
    fn assign_by_name(&mut self, name: &str, value: &str) -> Result<(), String> {
        let value = Value::num_str(unescape(value)?);
        if let Some(special) = SpecialVar::from_name(name) {
            return self.set_special(special as usize, value);
        }
        if let Some(index) = self.program.scalar_names.iter().position(|n| n == name) {
            self.globals[index] = value;
        }
        // a name the program never uses as a scalar is ignored
        Ok(())
    }

    // Record and field operations.

    /// Replace $0 and resplit it into fields with the current FS. In
    /// paragraph mode newline always separates fields too.
    pub(crate) fn set_line(&mut self, line: Rc<str>) {
        self.line = line.clone();
        let mut fields = std::mem::take(&mut self.fields);
        fields.clear();
        let field_sep = self.paragraph_fs.as_ref().unwrap_or(&self.field_sep);
        split_record(&line, field_sep, |_, s| fields.push(Rc::from(s)));
        self.fields = fields;
    }

    fn rebuild_paragraph_fs(&mut self) -> Result<(), String> {
        if !matches!(self.record_sep, RecordSeparator::Paragraph) {
            self.paragraph_fs = None;
            return Ok(());
        }
        let pattern = match &self.field_sep {
            FieldSeparator::Default | FieldSeparator::Null => {
                self.paragraph_fs = None;
                return Ok(());
            }
            FieldSeparator::Char(c) => format!("\n|{}", ere_escape_char(*c as char)),
            FieldSeparator::Ere(re) => format!("\n|{}", re.pattern()),
        };
        self.paragraph_fs = Some(FieldSeparator::Ere(Rc::new(Regex::new(&pattern)?)));
        Ok(())
    }

    pub(crate) fn get_field(&self, index: f64) -> Result<Value, String> {
        let index = index as i64;
        if index < 0 {
            return Err("field index negative".to_string());
        }
        if index as usize > MAX_FIELD_INDEX {
            return Err(format!("field index too large: {}", index));
        }
        if index == 0 {
            return Ok(Value::num_str(self.line.clone()));
        }
        match self.fields.get(index as usize - 1) {
            Some(field) => Ok(Value::num_str(field.clone())),
            None => Ok(Value::Null),
        }
    }

    pub(crate) fn set_field(&mut self, index: f64, value: Rc<str>) -> Result<(), String> {
        let index = index as i64;
        if index < 0 {
            return Err("field index negative".to_string());
        }
        if index as usize > MAX_FIELD_INDEX {
            return Err(format!("field index too large: {}", index));
        }
        if index == 0 {
            self.set_line(value);
            return Ok(());
        }
        let index = index as usize;
        if index > self.fields.len() {
            self.fields.resize(index, Rc::from(""));
        }
        self.fields[index - 1] = value;
        self.rebuild_line();
        Ok(())
    }

    /// Assignment to NF: truncate or extend, then rejoin $0.
    fn set_num_fields(&mut self, num_fields: f64) -> Result<(), String> {
        if num_fields < 0.0 {
            return Err("NF set to negative value".to_string());
        }
        self.fields.resize(num_fields as usize, Rc::from(""));
        self.rebuild_line();
        Ok(())
    }

    fn rebuild_line(&mut self) {
        let mut line = String::new();
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push_str(&self.ofs);
            }
            line.push_str(field);
        }
        self.line = Rc::from(line);
    }

    // Special variables. Reads come from the cached state; writes run the
    // side effects.

    pub(crate) fn get_special(&self, index: usize) -> Value {
        match SpecialVar::from_index(index) {
            SpecialVar::Argc => Value::Num(self.argc),
            SpecialVar::Convfmt => Value::Str(self.convfmt.clone()),
            SpecialVar::Filename => self.filename.clone(),
            SpecialVar::Fnr => Value::Num(self.fnr),
            SpecialVar::Fs => Value::Str(self.fs.clone()),
            SpecialVar::Nf => Value::Num(self.fields.len() as f64),
            SpecialVar::Nr => Value::Num(self.nr),
            SpecialVar::Ofmt => Value::Str(self.ofmt.clone()),
            SpecialVar::Ofs => Value::Str(self.ofs.clone()),
            SpecialVar::Ors => Value::Str(self.ors.clone()),
            SpecialVar::Rlength => Value::Num(self.rlength),
            SpecialVar::Rs => Value::Str(self.rs.clone()),
            SpecialVar::Rstart => Value::Num(self.rstart),
            SpecialVar::Subsep => Value::Str(self.subsep.clone()),
            SpecialVar::Count => unreachable!("invalid special index"),
        }
    }

    pub(crate) fn set_special(&mut self, index: usize, value: Value) -> Result<(), String> {
        match SpecialVar::from_index(index) {
            SpecialVar::Argc => self.argc = value.num(),
            SpecialVar::Convfmt => self.convfmt = value.to_str(&self.convfmt),
            SpecialVar::Filename => self.filename = value,
            SpecialVar::Fnr => self.fnr = value.num(),
            SpecialVar::Fs => {
                self.fs = value.to_str(&self.convfmt);
                self.field_sep = FieldSeparator::parse(&self.fs)?;
                self.rebuild_paragraph_fs()?;
            }
            SpecialVar::Nf => self.set_num_fields(value.num())?,
            SpecialVar::Nr => self.nr = value.num(),
            SpecialVar::Ofmt => self.ofmt = value.to_str(&self.convfmt),
            SpecialVar::Ofs => self.ofs = value.to_str(&self.convfmt),
            SpecialVar::Ors => self.ors = value.to_str(&self.convfmt),
            SpecialVar::Rlength => self.rlength = value.num(),
            SpecialVar::Rs => {
                self.rs = value.to_str(&self.convfmt);
                self.record_sep = RecordSeparator::parse(&self.rs)?;
                self.rebuild_paragraph_fs()?;
            }
            SpecialVar::Rstart => self.rstart = value.num(),
            SpecialVar::Subsep => self.subsep = value.to_str(&self.convfmt),
            SpecialVar::Count => unreachable!("invalid special index"),
        }
        Ok(())
    }

    // Conversions with the current formats.

    pub(crate) fn to_str(&self, value: &Value) -> Rc<str> {
        value.to_str(&self.convfmt)
    }

    pub(crate) fn to_output_str(&self, value: &Value) -> Rc<str> {
        value.to_str(&self.ofmt)
    }

    /// Look up a dynamic regex in the cache, compiling on miss.
    pub(crate) fn compile_regex(&mut self, pattern: Rc<str>) -> Result<Rc<Regex>, String> {
        if let Some(re) = self.regex_cache.get(&pattern) {
            return Ok(re.clone());
        }
        let re = Rc::new(Regex::new(&pattern)?);
        self.regex_cache.insert(pattern, re.clone());
        Ok(re)
    }
}

fn is_valid_variable(s: &str) -> bool {
    s.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a var=value operand; None when it isn't one.
pub(crate) fn parse_assignment(s: &str) -> Option<(&str, &str)> {
    let (lhs, rhs) = s.split_once('=')?;
    if is_valid_variable(lhs) {
        Some((lhs, rhs))
    } else {
        None
    }
}
