//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::ast::{
    ArrayExpr, Expr, Program, ResolvedProgram, Scope, Stmt, UserCallExpr, VarExpr,
};
use crate::lexer::{PosError, Position};
use crate::program::SpecialVar;
use std::collections::{HashMap, HashSet};

/// A host-provided function callable from AWK programs. Only the name and
/// arity cap are needed for resolution; the callable itself lives with the
/// interpreter.
#[derive(Debug, Clone)]
pub struct NativeDecl {
    pub name: String,
    /// None means variadic
    pub max_args: Option<usize>,
}

/// Resolve every name in the program: assign scope and dense index to each
/// variable and array reference, bind user calls to their targets, and infer
/// scalar-vs-array types across call chains.
pub fn resolve(program: Program, natives: &[NativeDecl]) -> Result<ResolvedProgram, PosError> {
    let mut resolver = Resolver::new(natives);
    let mut program = program;
    resolver.walk_program(&mut program)?;
    resolver.resolve_user_calls(&program)?;
    resolver.resolve_vars(&mut program)?;
    resolver.patch_program(&mut program)?;
    Ok(ResolvedProgram {
        program,
        scalars: resolver.scalars,
        arrays: resolver.arrays,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarType {
    Unknown,
    Scalar,
    Array,
}

/// Type information for a single (function, name) pair.
#[derive(Debug, Clone)]
struct TypeInfo {
    typ: VarType,
    scope: Scope,
    index: usize,
    /// call site remembered when the first reference was a call argument
    call_name: Option<String>,
    arg_index: usize,
    pos: Position,
}

/// A recorded call to a user (or native) function.
struct UserCall {
    name: String,
    pos: Position,
    in_func: String,
    /// for each argument, the name when it is a bare variable reference
    arg_names: Vec<Option<String>>,
    num_args: usize,
    // filled by resolve_user_calls
    native: bool,
    index: usize,
}

struct Resolver {
    /// function name while walking a function body, else ""
    func_name: String,
    /// current function's parameter names
    locals: HashSet<String>,
    /// func name -> var name -> type info ("" holds the globals)
    var_types: HashMap<String, HashMap<String, TypeInfo>>,
    functions: HashMap<String, usize>,
    user_calls: Vec<UserCall>,
    native_indexes: HashMap<String, (usize, Option<usize>)>,
    scalars: HashMap<String, usize>,
    arrays: HashMap<String, usize>,
    /// visit counter used by the patch walk to pair calls back up
    call_cursor: usize,
}

impl Resolver {
    fn new(natives: &[NativeDecl]) -> Self {
        // number the native functions by sorted name for a consistent order
        let mut names: Vec<&NativeDecl> = natives.iter().collect();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        let native_indexes = names
            .into_iter()
            .enumerate()
            .map(|(i, decl)| (decl.name.clone(), (i, decl.max_args)))
            .collect();

        let mut resolver = Resolver {
            func_name: String::new(),
            locals: HashSet::new(),
            var_types: HashMap::from([(String::new(), HashMap::new())]),
            functions: HashMap::new(),
            user_calls: Vec::new(),
            native_indexes,
            scalars: HashMap::new(),
            arrays: HashMap::new(),
            call_cursor: 0,
        };
        // the interpreter relies on the built-in arrays always being present
        let pos = Position::new(1, 1);
        resolver.record_array_ref("ARGV", pos).unwrap();
        resolver.record_array_ref("ENVIRON", pos).unwrap();
        resolver.record_array_ref("FIELDS", pos).unwrap();
        resolver
    }

    fn scope_of(&self, name: &str) -> Scope {
        if self.locals.contains(name) {
            Scope::Local
        } else if SpecialVar::from_name(name).is_some() {
            Scope::Special
        } else {
            Scope::Global
        }
    }

    /// The var_types key a name belongs to: the current function for locals,
    /// "" otherwise.
    fn owner_of(&self, name: &str) -> String {
        if self.locals.contains(name) {
            self.func_name.clone()
        } else {
            String::new()
        }
    }

    /// Record a scalar reference. Returns true if this was the first
    /// reference to the name in its owner.
    fn record_var_ref(&mut self, name: &str, pos: Position) -> bool {
        let scope = self.scope_of(name);
        let owner = self.owner_of(name);
        let types = self.var_types.entry(owner).or_default();
        match types.get_mut(name) {
            None => {
                types.insert(
                    name.to_string(),
                    TypeInfo {
                        typ: VarType::Scalar,
                        scope,
                        index: 0,
                        call_name: None,
                        arg_index: 0,
                        pos,
                    },
                );
                true
            }
            Some(info) => {
                if info.typ == VarType::Unknown {
                    info.typ = VarType::Scalar;
                }
                false
            }
        }
    }

    /// Record an array reference.
    fn record_array_ref(&mut self, name: &str, pos: Position) -> Result<(), PosError> {
        let scope = self.scope_of(name);
        if scope == Scope::Special {
            return Err(PosError::new(
                pos,
                format!("can't use scalar \"{}\" as array", name),
            ));
        }
        let owner = self.owner_of(name);
        let types = self.var_types.entry(owner).or_default();
        match types.get_mut(name) {
            None => {
                types.insert(
                    name.to_string(),
                    TypeInfo {
                        typ: VarType::Array,
                        scope,
                        index: 0,
                        call_name: None,
                        arg_index: 0,
                        pos,
                    },
                );
            }
            Some(info) => {
                if info.typ == VarType::Unknown {
                    info.typ = VarType::Array;
                }
            }
        }
        Ok(())
    }

    /// A bare variable passed as a call argument: if this was its first
    /// reference, its type is unknown until the callee's parameter types are
    /// known; remember the call site.
    fn process_call_arg(&mut self, call_name: &str, arg: &Expr, arg_index: usize, first: bool) {
        if !first {
            return;
        }
        if let Expr::Var(var) = arg {
            let owner = self.owner_of(&var.name);
            if let Some(info) = self.var_types.get_mut(&owner).and_then(|t| t.get_mut(&var.name)) {
                info.typ = VarType::Unknown;
                info.call_name = Some(call_name.to_string());
                info.arg_index = arg_index;
            }
        }
    }

    // First pass: record references, calls, and function definitions.

    fn walk_program(&mut self, program: &mut Program) -> Result<(), PosError> {
        for function in &mut program.functions {
            if self.functions.contains_key(&function.name) {
                return Err(PosError::new(
                    function.pos,
                    format!("function \"{}\" already defined", function.name),
                ));
            }
            self.functions
                .insert(function.name.clone(), self.functions.len());
            self.var_types.entry(function.name.clone()).or_default();
        }
        for stmts in &mut program.begin {
            self.walk_stmts(stmts)?;
        }
        for action in &mut program.actions {
            for expr in &mut action.pattern {
                self.walk_expr(expr)?;
            }
            if let Some(body) = &mut action.body {
                self.walk_stmts(body)?;
            }
        }
        for stmts in &mut program.end {
            self.walk_stmts(stmts)?;
        }
        for function in &mut program.functions {
            self.func_name = function.name.clone();
            self.locals = function.params.iter().cloned().collect();
            self.walk_stmts(&mut function.body)?;
            self.func_name = String::new();
            self.locals.clear();
        }
        Ok(())
    }

    fn walk_stmts(&mut self, stmts: &mut [Stmt]) -> Result<(), PosError> {
        for stmt in stmts {
            self.walk_stmt(stmt)?;
        }
        Ok(())
    }

    fn walk_stmt(&mut self, stmt: &mut Stmt) -> Result<(), PosError> {
        match stmt {
            Stmt::Print { args, redirect } | Stmt::Printf { args, redirect } => {
                for arg in args {
                    self.walk_expr(arg)?;
                }
                if let Some((_, dest)) = redirect {
                    self.walk_expr(dest)?;
                }
            }
            Stmt::Expr(expr) => self.walk_expr(expr)?,
            Stmt::If {
                cond,
                body,
                else_body,
            } => {
                self.walk_expr(cond)?;
                self.walk_stmts(body)?;
                self.walk_stmts(else_body)?;
            }
            Stmt::For {
                pre,
                cond,
                post,
                body,
            } => {
                if let Some(pre) = pre {
                    self.walk_stmt(pre)?;
                }
                if let Some(cond) = cond {
                    self.walk_expr(cond)?;
                }
                if let Some(post) = post {
                    self.walk_stmt(post)?;
                }
                self.walk_stmts(body)?;
            }
            Stmt::ForIn { var, array, body } => {
                self.record_var_ref(&var.name, var.pos);
                self.record_array_ref(&array.name, array.pos)?;
                self.walk_stmts(body)?;
            }
            Stmt::While { cond, body } => {
                self.walk_expr(cond)?;
                self.walk_stmts(body)?;
            }
            Stmt::DoWhile { body, cond } => {
                self.walk_stmts(body)?;
                self.walk_expr(cond)?;
            }
            Stmt::Break(_) | Stmt::Continue(_) | Stmt::Next(_) => {}
            Stmt::Exit(status) => {
                if let Some(status) = status {
                    self.walk_expr(status)?;
                }
            }
            Stmt::Delete { array, index } => {
                self.record_array_ref(&array.name, array.pos)?;
                for expr in index {
                    self.walk_expr(expr)?;
                }
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.walk_expr(value)?;
                }
            }
            Stmt::Block(body) => self.walk_stmts(body)?,
        }
        Ok(())
    }

    fn walk_expr(&mut self, expr: &mut Expr) -> Result<(), PosError> {
        match expr {
            Expr::Num(_) | Expr::Str(_) | Expr::Regex(_) => {}
            Expr::Field(index) => self.walk_expr(index)?,
            Expr::Var(var) => {
                self.record_var_ref(&var.name, var.pos);
            }
            Expr::Index { array, index } => {
                self.record_array_ref(&array.name, array.pos)?;
                for expr in index {
                    self.walk_expr(expr)?;
                }
            }
            Expr::Unary { expr, .. } => self.walk_expr(expr)?,
            Expr::Binary { left, right, .. } => {
                self.walk_expr(left)?;
                self.walk_expr(right)?;
            }
            Expr::In { index, array } => {
                for expr in index {
                    self.walk_expr(expr)?;
                }
                self.record_array_ref(&array.name, array.pos)?;
            }
            Expr::Cond {
                cond,
                if_true,
                if_false,
            } => {
                self.walk_expr(cond)?;
                self.walk_expr(if_true)?;
                self.walk_expr(if_false)?;
            }
            Expr::Assign { left, right } | Expr::AugAssign { left, right, .. } => {
                self.walk_expr(left)?;
                self.walk_expr(right)?;
            }
            Expr::Incr { expr, .. } => self.walk_expr(expr)?,
            Expr::Call { args, .. } => {
                for arg in args {
                    self.walk_expr(arg)?;
                }
            }
            Expr::ArrayRef(array) => {
                self.record_array_ref(&array.name, array.pos)?;
            }
            Expr::UserCall(call) => {
                if self.locals.contains(&call.name) {
                    return Err(PosError::new(
                        call.pos,
                        format!("can't call local variable \"{}\" as function", call.name),
                    ));
                }
                let mut arg_names = Vec::with_capacity(call.args.len());
                for (i, arg) in call.args.iter_mut().enumerate() {
                    let first = match arg {
                        Expr::Var(var) => {
                            let owner = self.owner_of(&var.name);
                            let known = self
                                .var_types
                                .get(&owner)
                                .is_some_and(|t| t.contains_key(&var.name));
                            self.record_var_ref(&var.name, var.pos);
                            !known
                        }
                        _ => {
                            self.walk_expr(arg)?;
                            false
                        }
                    };
                    let call_name = call.name.clone();
                    self.process_call_arg(&call_name, arg, i, first);
                    arg_names.push(match arg {
                        Expr::Var(var) => Some(var.name.clone()),
                        _ => None,
                    });
                }
                self.user_calls.push(UserCall {
                    name: call.name.clone(),
                    pos: call.pos,
                    in_func: self.func_name.clone(),
                    arg_names,
                    num_args: call.args.len(),
                    native: false,
                    index: 0,
                });
            }
            Expr::Getline {
                command,
                target,
                file,
            } => {
                if let Some(command) = command {
                    self.walk_expr(command)?;
                }
                if let Some(target) = target {
                    self.walk_expr(target)?;
                }
                if let Some(file) = file {
                    self.walk_expr(file)?;
                }
            }
            Expr::Multi(exprs) => {
                for expr in exprs {
                    self.walk_expr(expr)?;
                }
            }
        }
        Ok(())
    }

    /// Bind every user call to an AWK function or a native function, and
    /// check argument counts.
    fn resolve_user_calls(&mut self, program: &Program) -> Result<(), PosError> {
        for call in &mut self.user_calls {
            if let Some(&index) = self.functions.get(&call.name) {
                let function = &program.functions[index];
                if call.num_args > function.params.len() {
                    return Err(PosError::new(
                        call.pos,
                        format!("\"{}\" called with more arguments than declared", call.name),
                    ));
                }
                call.index = index;
                continue;
            }
            match self.native_indexes.get(&call.name) {
                Some(&(index, max_args)) => {
                    if let Some(max_args) = max_args {
                        if call.num_args > max_args {
                            return Err(PosError::new(
                                call.pos,
                                format!(
                                    "\"{}\" called with more arguments than declared",
                                    call.name
                                ),
                            ));
                        }
                    }
                    call.native = true;
                    call.index = index;
                }
                None => {
                    return Err(PosError::new(
                        call.pos,
                        format!("undefined function \"{}\"", call.name),
                    ))
                }
            }
        }
        Ok(())
    }

    /// The var_types key holding a name referenced from `in_func`.
    fn var_owner(&self, program: &Program, name: &str, in_func: &str) -> String {
        if in_func.is_empty() {
            return String::new();
        }
        let function = &program.functions[self.functions[in_func]];
        if function.params.iter().any(|param| param == name) {
            in_func.to_string()
        } else {
            String::new()
        }
    }

    /// Resolve unknown variable types and generate the dense index spaces.
    fn resolve_vars(&mut self, program: &mut Program) -> Result<(), PosError> {
        // Propagate parameter types to unknown arguments, visiting callees
        // before callers.
        let mut call_graph: HashMap<String, HashSet<String>> = HashMap::new();
        for call in &self.user_calls {
            call_graph
                .entry(call.in_func.clone())
                .or_default()
                .insert(call.name.clone());
        }
        for func_name in topo_sort(&call_graph) {
            let names: Vec<String> = match self.var_types.get(&func_name) {
                Some(infos) => infos.keys().cloned().collect(),
                None => continue,
            };
            for name in names {
                let info = &self.var_types[&func_name][&name];
                if info.scope == Scope::Special || info.typ != VarType::Unknown {
                    continue;
                }
                let call_name = match &info.call_name {
                    Some(call_name) => call_name.clone(),
                    None => continue,
                };
                if !self.functions.contains_key(&call_name) {
                    // native callee: propagates nothing
                    continue;
                }
                let arg_index = info.arg_index;
                let param = program.functions[self.functions[&call_name]].params[arg_index].clone();
                let typ = self.var_types[&call_name]
                    .get(&param)
                    .map(|info| info.typ)
                    .unwrap_or(VarType::Unknown);
                if typ != VarType::Unknown {
                    self.var_types
                        .get_mut(&func_name)
                        .unwrap()
                        .get_mut(&name)
                        .unwrap()
                        .typ = typ;
                }
            }
        }

        // Assign dense indices to globals; scalars and arrays are separate
        // index spaces. Sorted for a consistent numbering.
        let mut global_names: Vec<String> = self.var_types[""].keys().cloned().collect();
        global_names.sort();
        for name in global_names {
            if self.functions.contains_key(&name) {
                let pos = self.var_types[""][&name].pos;
                return Err(PosError::new(
                    pos,
                    format!("global var \"{}\" can't also be a function", name),
                ));
            }
            let info = self.var_types.get_mut("").unwrap().get_mut(&name).unwrap();
            info.index = match info.scope {
                Scope::Special => SpecialVar::from_name(&name).unwrap() as usize,
                _ if info.typ == VarType::Array => {
                    let index = self.arrays.len();
                    self.arrays.insert(name.clone(), index);
                    index
                }
                _ => {
                    let index = self.scalars.len();
                    self.scalars.insert(name.clone(), index);
                    index
                }
            };
        }

        // Fill in unknown parameter types that are being called with arrays,
        // as in: BEGIN { arr[0]; f(arr) }  function f(a) { }
        for call in &self.user_calls {
            if call.native {
                continue;
            }
            let function = &program.functions[call.index];
            let func_name = function.name.clone();
            for (i, arg_name) in call.arg_names.iter().enumerate() {
                let arg_name = match arg_name {
                    Some(name) => name,
                    None => continue,
                };
                let arg_owner = self.var_owner(program, arg_name, &call.in_func);
                let arg_type = self.var_types[&arg_owner]
                    .get(arg_name)
                    .map(|info| info.typ)
                    .unwrap_or(VarType::Unknown);
                let param = &program.functions[call.index].params[i];
                let param_type = self.var_types[&func_name]
                    .get(param)
                    .map(|info| info.typ)
                    .unwrap_or(VarType::Unknown);
                if arg_type == VarType::Array && param_type == VarType::Unknown {
                    self.var_types
                        .get_mut(&func_name)
                        .unwrap()
                        .entry(param.clone())
                        .or_insert_with(|| TypeInfo {
                            typ: VarType::Unknown,
                            scope: Scope::Local,
                            index: 0,
                            call_name: None,
                            arg_index: 0,
                            pos: call.pos,
                        })
                        .typ = VarType::Array;
                }
            }
        }

        // Assign local indices in parameter order, counting scalars and
        // arrays separately, and record which parameters are arrays.
        for function in &mut program.functions {
            let infos = self.var_types.get_mut(&function.name).unwrap();
            let mut scalar_index = 0;
            let mut array_index = 0;
            let mut arrays = vec![false; function.params.len()];
            for (i, param) in function.params.iter().enumerate() {
                let info = infos.entry(param.clone()).or_insert_with(|| TypeInfo {
                    // never referenced: default scalar
                    typ: VarType::Unknown,
                    scope: Scope::Local,
                    index: 0,
                    call_name: None,
                    arg_index: 0,
                    pos: function.pos,
                });
                if info.typ == VarType::Array {
                    info.index = array_index;
                    array_index += 1;
                    arrays[i] = true;
                } else {
                    info.index = scalar_index;
                    scalar_index += 1;
                }
            }
            function.arrays = arrays;
        }

        // Check that variables passed to functions have the right type.
        for call in &self.user_calls {
            if call.native {
                for arg_name in call.arg_names.iter().flatten() {
                    let owner = self.var_owner(program, arg_name, &call.in_func);
                    let typ = self.var_types[&owner]
                        .get(arg_name)
                        .map(|info| info.typ)
                        .unwrap_or(VarType::Unknown);
                    if typ == VarType::Array {
                        return Err(PosError::new(
                            call.pos,
                            format!("can't pass array \"{}\" to native function", arg_name),
                        ));
                    }
                }
                continue;
            }
            let function = &program.functions[call.index];
            for (i, arg_name) in call.arg_names.iter().enumerate() {
                match arg_name {
                    None => {
                        // a non-variable expression is always scalar
                        if function.arrays[i] {
                            return Err(PosError::new(
                                call.pos,
                                "can't pass scalar as array parameter".to_string(),
                            ));
                        }
                    }
                    Some(arg_name) => {
                        let owner = self.var_owner(program, arg_name, &call.in_func);
                        let typ = self.var_types[&owner]
                            .get(arg_name)
                            .map(|info| info.typ)
                            .unwrap_or(VarType::Unknown);
                        if typ == VarType::Array && !function.arrays[i] {
                            return Err(PosError::new(
                                call.pos,
                                format!("can't pass array \"{}\" as scalar parameter", arg_name),
                            ));
                        }
                        if typ != VarType::Array && function.arrays[i] {
                            return Err(PosError::new(
                                call.pos,
                                format!("can't pass scalar \"{}\" as array parameter", arg_name),
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    // Second pass: patch the resolved scope and index into every reference.

    fn patch_program(&mut self, program: &mut Program) -> Result<(), PosError> {
        self.call_cursor = 0;
        // take the function list to walk bodies while looking params up
        for stmts in &mut program.begin {
            self.patch_stmts(stmts)?;
        }
        for action in &mut program.actions {
            for expr in &mut action.pattern {
                self.patch_expr(expr, false)?;
            }
            if let Some(body) = &mut action.body {
                self.patch_stmts(body)?;
            }
        }
        for stmts in &mut program.end {
            self.patch_stmts(stmts)?;
        }
        let mut functions = std::mem::take(&mut program.functions);
        for function in &mut functions {
            self.func_name = function.name.clone();
            self.locals = function.params.iter().cloned().collect();
            self.patch_stmts(&mut function.body)?;
            self.func_name = String::new();
            self.locals.clear();
        }
        program.functions = functions;
        Ok(())
    }

    fn patch_var(&self, var: &mut VarExpr, is_arg: bool) -> Result<(), PosError> {
        let owner = self.owner_of(&var.name);
        let info = &self.var_types[&owner][&var.name];
        if info.typ == VarType::Array && !is_arg {
            return Err(PosError::new(
                var.pos,
                format!("can't use array \"{}\" as scalar", var.name),
            ));
        }
        var.scope = self.scope_of(&var.name);
        var.index = info.index;
        Ok(())
    }

    fn patch_array(&self, array: &mut ArrayExpr) -> Result<(), PosError> {
        let owner = self.owner_of(&array.name);
        let info = &self.var_types[&owner][&array.name];
        if info.typ == VarType::Scalar {
            return Err(PosError::new(
                array.pos,
                format!("can't use scalar \"{}\" as array", array.name),
            ));
        }
        array.scope = self.scope_of(&array.name);
        array.index = info.index;
        Ok(())
    }

    fn patch_call(&mut self, call: &mut UserCallExpr) -> Result<(), PosError> {
        // args first: nested calls were recorded before this one
        for arg in &mut call.args {
            match arg {
                Expr::Var(var) => self.patch_var(var, true)?,
                other => self.patch_expr(other, false)?,
            }
        }
        let recorded = &self.user_calls[self.call_cursor];
        self.call_cursor += 1;
        call.native = recorded.native;
        call.index = recorded.index;
        Ok(())
    }

    fn patch_stmts(&mut self, stmts: &mut [Stmt]) -> Result<(), PosError> {
        for stmt in stmts {
            self.patch_stmt(stmt)?;
        }
        Ok(())
    }

    fn patch_stmt(&mut self, stmt: &mut Stmt) -> Result<(), PosError> {
        match stmt {
            Stmt::Print { args, redirect } | Stmt::Printf { args, redirect } => {
                for arg in args {
                    self.patch_expr(arg, false)?;
                }
                if let Some((_, dest)) = redirect {
                    self.patch_expr(dest, false)?;
                }
            }
            Stmt::Expr(expr) => self.patch_expr(expr, false)?,
            Stmt::If {
                cond,
                body,
                else_body,
            } => {
                self.patch_expr(cond, false)?;
                self.patch_stmts(body)?;
                self.patch_stmts(else_body)?;
            }
            Stmt::For {
                pre,
                cond,
                post,
                body,
            } => {
                if let Some(pre) = pre {
                    self.patch_stmt(pre)?;
                }
                if let Some(cond) = cond {
                    self.patch_expr(cond, false)?;
                }
                if let Some(post) = post {
                    self.patch_stmt(post)?;
                }
                self.patch_stmts(body)?;
            }
            Stmt::ForIn { var, array, body } => {
                self.patch_var(var, false)?;
                self.patch_array(array)?;
                self.patch_stmts(body)?;
            }
            Stmt::While { cond, body } => {
                self.patch_expr(cond, false)?;
                self.patch_stmts(body)?;
            }
            Stmt::DoWhile { body, cond } => {
                self.patch_stmts(body)?;
                self.patch_expr(cond, false)?;
            }
            Stmt::Break(_) | Stmt::Continue(_) | Stmt::Next(_) => {}
            Stmt::Exit(status) => {
                if let Some(status) = status {
                    self.patch_expr(status, false)?;
                }
            }
            Stmt::Delete { array, index } => {
                self.patch_array(array)?;
                for expr in index {
                    self.patch_expr(expr, false)?;
                }
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.patch_expr(value, false)?;
                }
            }
            Stmt::Block(body) => self.patch_stmts(body)?,
        }
        Ok(())
    }

    fn patch_expr(&mut self, expr: &mut Expr, is_arg: bool) -> Result<(), PosError> {
        match expr {
            Expr::Num(_) | Expr::Str(_) | Expr::Regex(_) => {}
            Expr::Field(index) => self.patch_expr(index, false)?,
            Expr::Var(var) => self.patch_var(var, is_arg)?,
            Expr::Index { array, index } => {
                self.patch_array(array)?;
                for expr in index {
                    self.patch_expr(expr, false)?;
                }
            }
            Expr::Unary { expr, .. } => self.patch_expr(expr, false)?,
            Expr::Binary { left, right, .. } => {
                self.patch_expr(left, false)?;
                self.patch_expr(right, false)?;
            }
            Expr::In { index, array } => {
                for expr in index {
                    self.patch_expr(expr, false)?;
                }
                self.patch_array(array)?;
            }
            Expr::Cond {
                cond,
                if_true,
                if_false,
            } => {
                self.patch_expr(cond, false)?;
                self.patch_expr(if_true, false)?;
                self.patch_expr(if_false, false)?;
            }
            Expr::Assign { left, right } | Expr::AugAssign { left, right, .. } => {
                self.patch_expr(left, false)?;
                self.patch_expr(right, false)?;
            }
            Expr::Incr { expr, .. } => self.patch_expr(expr, false)?,
            Expr::Call { args, .. } => {
                for arg in args {
                    self.patch_expr(arg, false)?;
                }
            }
            Expr::ArrayRef(array) => self.patch_array(array)?,
            Expr::UserCall(call) => self.patch_call(call)?,
            Expr::Getline {
                command,
                target,
                file,
            } => {
                if let Some(command) = command {
                    self.patch_expr(command, false)?;
                }
                if let Some(target) = target {
                    self.patch_expr(target, false)?;
                }
                if let Some(file) = file {
                    self.patch_expr(file, false)?;
                }
            }
            Expr::Multi(exprs) => {
                for expr in exprs {
                    self.patch_expr(expr, false)?;
                }
            }
        }
        Ok(())
    }
}

/// Order the call-graph nodes so callees come before callers. The order
/// within a strongly connected component is arbitrary but consistent.
fn topo_sort(graph: &HashMap<String, HashSet<String>>) -> Vec<String> {
    let mut nodes: Vec<&String> = graph.keys().collect();
    nodes.sort();
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for node in nodes {
        visit(node, graph, &mut visited, &mut order);
    }
    order
}

fn visit(
    node: &str,
    graph: &HashMap<String, HashSet<String>>,
    visited: &mut HashSet<String>,
    order: &mut Vec<String>,
) {
    if !visited.insert(node.to_string()) {
        return;
    }
    if let Some(callees) = graph.get(node) {
        let mut callees: Vec<&String> = callees.iter().collect();
        callees.sort();
        for callee in callees {
            visit(callee, graph, visited, order);
        }
    }
    order.push(node.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn resolve_source(src: &str) -> Result<ResolvedProgram, PosError> {
        resolve(parse(src).expect("parse error"), &[])
    }

    fn resolve_ok(src: &str) -> ResolvedProgram {
        resolve_source(src).expect("resolve error")
    }

    #[test]
    fn global_indices_are_dense() {
        let resolved = resolve_ok("BEGIN { x = 1; y = 2; a[1] = 3; b[2] = 4; z = 5 }");
        let mut scalar_indices: Vec<usize> = resolved.scalars.values().copied().collect();
        scalar_indices.sort();
        assert_eq!(scalar_indices, vec![0, 1, 2]);
        // ARGV, ENVIRON and FIELDS are always registered
        let mut array_indices: Vec<usize> = resolved.arrays.values().copied().collect();
        array_indices.sort();
        assert_eq!(array_indices, (0..5).collect::<Vec<usize>>());
    }

    #[test]
    fn specials_use_the_fixed_table() {
        let resolved = resolve_ok("{ NR = 2 }");
        let body = resolved.program.actions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Expr(Expr::Assign { left, .. }) => match left.as_ref() {
                Expr::Var(var) => {
                    assert_eq!(var.scope, Scope::Special);
                    assert_eq!(var.index, SpecialVar::Nr as usize);
                }
                other => panic!("expected var, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn locals_are_indexed_in_parameter_order() {
        let resolved = resolve_ok(
            "function f(s1, a, s2) { s1 = 1; a[0] = 2; s2 = 3 }\nBEGIN { f() }",
        );
        let function = &resolved.program.functions[0];
        assert_eq!(function.arrays, vec![false, true, false]);
        // s1 and s2 get scalar slots 0 and 1; a gets array slot 0
        let body = &function.body;
        match &body[0] {
            Stmt::Expr(Expr::Assign { left, .. }) => match left.as_ref() {
                Expr::Var(var) => {
                    assert_eq!(var.scope, Scope::Local);
                    assert_eq!(var.index, 0);
                }
                other => panic!("expected var, got {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
        match &body[2] {
            Stmt::Expr(Expr::Assign { left, .. }) => match left.as_ref() {
                Expr::Var(var) => assert_eq!(var.index, 1),
                other => panic!("expected var, got {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn array_type_flows_from_callee_parameter() {
        // b's type is inferred from f's parameter, which is an array
        let resolved = resolve_ok("function f(a) { a[\"x\"] = 1 }\nBEGIN { f(b); b[\"y\"] }");
        assert!(resolved.arrays.contains_key("b"));
        assert!(!resolved.scalars.contains_key("b"));
    }

    #[test]
    fn array_type_flows_into_unknown_parameter() {
        // the reverse direction: a known array argument marks the parameter
        let resolved = resolve_ok("function f(a) { return 0 }\nBEGIN { arr[0] = 1; f(arr) }");
        assert!(resolved.program.functions[0].arrays[0]);
    }

    #[test]
    fn inference_crosses_call_chains() {
        let resolved = resolve_ok(
            "function g(a) { a[1] = 1 }\nfunction f(x) { g(x) }\nBEGIN { f(b) }",
        );
        assert!(resolved.program.functions[0].arrays[0]);
        assert!(resolved.program.functions[1].arrays[0]);
        assert!(resolved.arrays.contains_key("b"));
    }

    #[test]
    fn unknowns_default_to_scalar() {
        let resolved = resolve_ok("function f(x) { return 0 }\nBEGIN { f(y) }");
        assert!(resolved.scalars.contains_key("y"));
        assert!(!resolved.program.functions[0].arrays[0]);
    }

    #[test]
    fn type_conflicts_are_rejected() {
        assert!(resolve_source("BEGIN { x = 1; x[1] = 2 }").is_err());
        assert!(resolve_source("BEGIN { x[1] = 2; y = x }").is_err());
        assert!(resolve_source("function f(a) { a[1] = 1 }\nBEGIN { f(1) }").is_err());
        assert!(
            resolve_source("function f(s) { s = 1 }\nBEGIN { a[1] = 2; f(a) }").is_err()
        );
    }

    #[test]
    fn call_errors_are_rejected() {
        assert!(resolve_source("BEGIN { nosuch() }").is_err());
        assert!(resolve_source("function f(a) { }\nBEGIN { f(1, 2) }").is_err());
        assert!(resolve_source("function f() { }\nfunction f() { }").is_err());
        assert!(resolve_source("function f() { }\nBEGIN { f = 1 }").is_err());
        assert!(resolve_source("function f(g) { g() }").is_err());
    }

    #[test]
    fn special_vars_are_not_arrays() {
        assert!(resolve_source("BEGIN { NR[1] = 1 }").is_err());
    }

    #[test]
    fn native_functions_bind_by_sorted_name() {
        let natives = vec![
            NativeDecl {
                name: "zeta".to_string(),
                max_args: Some(1),
            },
            NativeDecl {
                name: "alpha".to_string(),
                max_args: Some(2),
            },
        ];
        let program = parse("BEGIN { zeta(1); alpha(1, 2) }").unwrap();
        let resolved = resolve(program, &natives).unwrap();
        let body = &resolved.program.begin[0];
        let indexes: Vec<(bool, usize)> = body
            .iter()
            .map(|stmt| match stmt {
                Stmt::Expr(Expr::UserCall(call)) => (call.native, call.index),
                other => panic!("unexpected stmt {:?}", other),
            })
            .collect();
        assert_eq!(indexes, vec![(true, 1), (true, 0)]);
    }

    #[test]
    fn arrays_cannot_go_to_native_functions() {
        let natives = vec![NativeDecl {
            name: "host".to_string(),
            max_args: None,
        }];
        let program = parse("BEGIN { a[1] = 2; host(a) }").unwrap();
        assert!(resolve(program, &natives).is_err());
    }

    #[test]
    fn awk_functions_take_precedence_over_natives() {
        let natives = vec![NativeDecl {
            name: "f".to_string(),
            max_args: Some(0),
        }];
        let program = parse("function f(x) { return x }\nBEGIN { f(1) }").unwrap();
        let resolved = resolve(program, &natives).unwrap();
        match &resolved.program.begin[0][0] {
            Stmt::Expr(Expr::UserCall(call)) => {
                assert!(!call.native);
                assert_eq!(call.index, 0);
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }
}
