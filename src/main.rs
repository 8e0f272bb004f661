//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::compiler::compile_program;
use crate::interpreter::{interpret, InterpConfig};
use clap::Parser;
use gettextrs::{bind_textdomain_codeset, textdomain};
use std::error::Error;
use std::fmt::Display;
use std::io::Read;

mod ast;
mod compiler;
mod interpreter;
mod lexer;
mod parser;
mod program;
mod regex;
mod resolver;

/// awk - pattern scanning and processing language
#[derive(Debug, Parser)]
struct Args {
    /// Define the input field separator
    #[arg(short = 'F')]
    separator_string: Option<String>,

    /// Specify the program files
    #[arg(short = 'f', action = clap::ArgAction::Append)]
    program_files: Vec<String>,

    /// Globals assignments, executed before the start of the program
    #[arg(short = 'v', action = clap::ArgAction::Append)]
    assignments: Vec<String>,

    /// Use byte offsets for length, substr, index and match
    #[arg(short = 'b', long = "bytes")]
    bytes: bool,

    /// Print the compiled program and exit
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    arguments: Vec<String>,
}

fn exit_if_error<T, U: Display>(r: Result<T, U>) -> T {
    match r {
        Ok(v) => v,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    textdomain(env!("CARGO_PKG_NAME"))?;
    bind_textdomain_codeset(env!("CARGO_PKG_NAME"), "UTF-8")?;

    let args = Args::parse();

    let (source, operands) = if !args.program_files.is_empty() {
        let mut combined_sources = String::new();
        for source_file in &args.program_files {
            let mut file = std::fs::File::open(source_file)
                .map_err(|_| format!("could not open file '{}'", source_file))?;
            file.read_to_string(&mut combined_sources)
                .map_err(|_| format!("could not read file '{}'", source_file))?;
            combined_sources.push('\n');
        }
        (combined_sources, args.arguments)
    } else if !args.arguments.is_empty() {
        (args.arguments[0].clone(), args.arguments[1..].to_vec())
    } else {
        eprintln!("missing program argument");
        std::process::exit(2);
    };

    let program = exit_if_error(compile_program(&source, &[]));

    if args.debug {
        print!("{:?}", program);
        return Ok(());
    }

    let config = InterpConfig {
        args: operands,
        assigns: args.assignments,
        field_sep: args.separator_string,
        bytes: args.bytes,
        ..Default::default()
    };
    let return_status = exit_if_error(interpret(&program, config));
    std::process::exit(return_status);
}
