//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use std::io::Write;
use std::process::{Command, Stdio};

struct TestPlan {
    args: Vec<String>,
    stdin_data: String,
    expected_out: String,
    expected_exit_code: i32,
}

fn run_test(plan: TestPlan) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_rawk"))
        .args(&plan.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("could not spawn rawk");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(plan.stdin_data.as_bytes())
        .expect("could not write stdin");
    let output = child.wait_with_output().expect("could not wait for rawk");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        plan.expected_out,
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(output.status.code(), Some(plan.expected_exit_code));
}

fn test_awk(args: Vec<&str>, stdin_data: &str, expected_out: &str) {
    run_test(TestPlan {
        args: args.into_iter().map(String::from).collect(),
        stdin_data: String::from(stdin_data),
        expected_out: String::from(expected_out),
        expected_exit_code: 0,
    });
}

fn test_awk_fails(args: Vec<&str>) {
    let output = Command::new(env!("CARGO_BIN_EXE_rawk"))
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("could not run rawk");
    assert_ne!(output.status.code(), Some(0));
    assert!(!output.stderr.is_empty());
}

#[test]
fn empty_program() {
    test_awk(vec![""], "", "");
}

#[test]
fn hello_world() {
    test_awk(vec!["BEGIN { print \"hello world\" }"], "", "hello world\n");
}

#[test]
fn missing_pattern_matches_all_records() {
    test_awk(vec!["{ print }"], "a\nb\n", "a\nb\n");
}

#[test]
fn missing_action_prints_the_record() {
    test_awk(vec!["/b/"], "a\nb\nabc\n", "b\nabc\n");
}

#[test]
fn begin_loop_concatenation() {
    test_awk(
        vec!["BEGIN { for (i=1;i<=3;i++) s=s i } END { print s }"],
        "",
        "123\n",
    );
}

#[test]
fn field_sum() {
    test_awk(
        vec!["{ for (i=1;i<=NF;i++) sum+=$i } END { print sum }"],
        "3 1 2\n",
        "6\n",
    );
}

#[test]
fn field_separator_option() {
    test_awk(vec!["-F", ":", "{ print $2 }"], "a:b:c\n", "b\n");
}

#[test]
fn assignment_option() {
    test_awk(
        vec!["-v", "x=41", "BEGIN { print x + 1 }"],
        "",
        "42\n",
    );
}

#[test]
fn program_file_option() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prog = dir.path().join("prog.awk");
    std::fs::write(&prog, "{ print NR, $0 }\n").unwrap();
    test_awk(
        vec!["-f", prog.to_str().unwrap()],
        "x\ny\n",
        "1 x\n2 y\n",
    );
}

#[test]
fn multiple_program_files_are_concatenated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("first.awk");
    let second = dir.path().join("second.awk");
    std::fs::write(&first, "BEGIN { print \"one\" }").unwrap();
    std::fs::write(&second, "BEGIN { print \"two\" }").unwrap();
    test_awk(
        vec!["-f", first.to_str().unwrap(), "-f", second.to_str().unwrap()],
        "",
        "one\ntwo\n",
    );
}

#[test]
fn file_operands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data.txt");
    std::fs::write(&data, "1\n2\n3\n").unwrap();
    test_awk(
        vec!["{ sum += $1 } END { print sum }", data.to_str().unwrap()],
        "",
        "6\n",
    );
}

#[test]
fn exit_status_is_propagated() {
    run_test(TestPlan {
        args: vec!["BEGIN { exit 7 }".to_string()],
        stdin_data: String::new(),
        expected_out: String::new(),
        expected_exit_code: 7,
    });
}

#[test]
fn command_pipe_getline() {
    test_awk(
        vec!["BEGIN { \"echo hi\" | getline x; print x; print close(\"echo hi\") }"],
        "",
        "hi\n0\n",
    );
}

#[test]
fn print_through_a_pipe() {
    test_awk(
        vec!["BEGIN { print \"piped\" | \"cat\"; close(\"cat\") }"],
        "",
        "piped\n",
    );
}

#[test]
fn byte_semantics_flag() {
    test_awk(
        vec!["BEGIN { print length(\"\u{3b1}\u{3b2}\u{3b3}\") }"],
        "",
        "3\n",
    );
    test_awk(
        vec!["-b", "BEGIN { print length(\"\u{3b1}\u{3b2}\u{3b3}\") }"],
        "",
        "6\n",
    );
}

#[test]
fn dump_flag_prints_opcodes() {
    let output = Command::new(env!("CARGO_BIN_EXE_rawk"))
        .args(["-d", "BEGIN { x = 1 }"])
        .output()
        .expect("could not run rawk");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("BEGIN"));
    assert!(text.contains("AssignGlobal"));
}

#[test]
fn syntax_errors_are_fatal() {
    test_awk_fails(vec!["BEGIN { ("]);
    test_awk_fails(vec!["function f() {} function f() {}"]);
    test_awk_fails(vec!["BEGIN { x = 1; x[1] = 2 }"]);
}

#[test]
fn runtime_errors_are_fatal() {
    test_awk_fails(vec!["BEGIN { print 1 / 0 }"]);
}

#[test]
fn missing_program_is_an_error() {
    test_awk_fails(vec![]);
}

#[test]
fn uses_argv_and_environ() {
    test_awk(
        vec!["BEGIN { print ARGC, ARGV[0], ARGV[1] }", "op1"],
        "",
        "2 rawk op1\n",
    );
}

#[test]
fn printf_formats() {
    test_awk(
        vec!["BEGIN { printf \"%5.2f|%-4s|%03d\\n\", 3.14159, \"ab\", 7 }"],
        "",
        " 3.14|ab  |007\n",
    );
}
