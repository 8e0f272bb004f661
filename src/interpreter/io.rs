//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::ast::Redirect;
use crate::regex::Regex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::rc::Rc;

/// The compiled form of RS.
pub enum RecordSeparator {
    Char(u8),
    /// RS == "": paragraph mode
    Paragraph,
    /// multi-character RS is an ERE
    Ere(Rc<Regex>),
}

impl RecordSeparator {
    pub fn parse(value: &str) -> Result<Self, String> {
        if value.is_empty() {
            Ok(RecordSeparator::Paragraph)
        } else if value.len() == 1 {
            Ok(RecordSeparator::Char(value.as_bytes()[0]))
        } else {
            Ok(RecordSeparator::Ere(Rc::new(Regex::new(value)?)))
        }
    }
}

fn from_utf8(bytes: Vec<u8>) -> Result<String, String> {
    String::from_utf8(bytes).map_err(|err| err.to_string())
}

/// Reads RS-separated records from a byte stream.
pub struct RecordReader<'a> {
    input: Box<dyn BufRead + 'a>,
    /// records left over from splitting the input on a regex RS
    buffered: Vec<String>,
    done: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(input: Box<dyn BufRead + 'a>) -> Self {
        Self {
            input,
            buffered: Vec::new(),
            done: false,
        }
    }

    pub fn open(path: &str) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(Box::new(BufReader::new(file))))
    }

    /// One line with the trailing newline removed; None at end of input.
    fn read_line(&mut self) -> Result<Option<String>, String> {
        let mut buf = Vec::new();
        let n = self.input.read_until(b'\n', &mut buf).map_err(|err| err.to_string())?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        from_utf8(buf).map(Some)
    }

    pub fn read_record(&mut self, separator: &RecordSeparator) -> Result<Option<String>, String> {
        if !self.buffered.is_empty() {
            return Ok(Some(self.buffered.remove(0)));
        }
        if self.done {
            return Ok(None);
        }
        match separator {
            RecordSeparator::Char(sep) => {
                let mut buf = Vec::new();
                let n = self
                    .input
                    .read_until(*sep, &mut buf)
                    .map_err(|err| err.to_string())?;
                if n == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if buf.last() == Some(sep) {
                    buf.pop();
                } else {
                    // last record without a trailing separator
                    self.done = true;
                }
                from_utf8(buf).map(Some)
            }
            RecordSeparator::Paragraph => {
                // skip blank lines between paragraphs
                let mut record = loop {
                    match self.read_line()? {
                        None => {
                            self.done = true;
                            return Ok(None);
                        }
                        Some(line) if line.is_empty() => continue,
                        Some(line) => break line,
                    }
                };
                loop {
                    match self.read_line()? {
                        None => {
                            self.done = true;
                            break;
                        }
                        Some(line) if line.is_empty() => break,
                        Some(line) => {
                            record.push('\n');
                            record.push_str(&line);
                        }
                    }
                }
                Ok(Some(record))
            }
            RecordSeparator::Ere(re) => {
                let mut bytes = Vec::new();
                self.input
                    .read_to_end(&mut bytes)
                    .map_err(|err| err.to_string())?;
                self.done = true;
                if bytes.is_empty() {
                    return Ok(None);
                }
                let input = from_utf8(bytes)?;
                let mut records = Vec::new();
                let mut split_start = 0;
                for location in re.match_locations(&input) {
                    if location.end == location.start {
                        continue;
                    }
                    records.push(input[split_start..location.start].to_string());
                    split_start = location.end;
                }
                let last = &input[split_start..];
                if !last.is_empty() {
                    records.push(last.to_string());
                }
                if records.is_empty() {
                    return Ok(None);
                }
                let first = records.remove(0);
                self.buffered = records;
                Ok(Some(first))
            }
        }
    }
}

/// A named output sink for `>`, `>>` and `|` redirections.
pub enum OutputStream {
    File(File),
    Pipe(Child),
}

impl OutputStream {
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), String> {
        match self {
            OutputStream::File(file) => file.write_all(data).map_err(|err| err.to_string()),
            OutputStream::Pipe(child) => match child.stdin.as_mut() {
                Some(stdin) => stdin.write_all(data).map_err(|err| err.to_string()),
                None => Err("pipe is closed".to_string()),
            },
        }
    }

    fn flush(&mut self) -> bool {
        match self {
            OutputStream::File(file) => file.flush().is_ok(),
            OutputStream::Pipe(child) => match child.stdin.as_mut() {
                Some(stdin) => stdin.flush().is_ok(),
                None => false,
            },
        }
    }

    /// Close the stream; commands are reaped. Returns 0 on success, -1 on
    /// any failure, matching what close() reports.
    fn close(self) -> f64 {
        match self {
            OutputStream::File(file) => {
                drop(file);
                0.0
            }
            OutputStream::Pipe(mut child) => {
                drop(child.stdin.take());
                match child.wait() {
                    Ok(status) if status.success() => 0.0,
                    _ => -1.0,
                }
            }
        }
    }
}

/// An input stream opened by `cmd | getline`.
pub struct InputPipe<'a> {
    child: Child,
    pub reader: RecordReader<'a>,
}

/// Build the shell command used by pipes and system(). The caller wires the
/// standard streams before spawning.
pub fn exec_shell(cmdline: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmdline);
    command
}

/// The named streams owned by the interpreter, keyed by file name or command
/// line, plus the main output and error sinks.
pub struct Io<'a> {
    pub output: Box<dyn Write + 'a>,
    pub error: Box<dyn Write + 'a>,
    input_files: HashMap<Rc<str>, RecordReader<'a>>,
    input_pipes: HashMap<Rc<str>, InputPipe<'a>>,
    output_streams: HashMap<Rc<str>, OutputStream>,
}

impl<'a> Io<'a> {
    pub fn new(output: Box<dyn Write + 'a>, error: Box<dyn Write + 'a>) -> Self {
        Self {
            output,
            error,
            input_files: HashMap::new(),
            input_pipes: HashMap::new(),
            output_streams: HashMap::new(),
        }
    }

    /// The record reader for `getline < file`. Ok(None) when the file can't
    /// be opened: that is not a hard error, getline returns -1.
    pub fn input_file(&mut self, name: Rc<str>) -> Option<&mut RecordReader<'a>> {
        match self.input_files.entry(name) {
            Entry::Occupied(entry) => Some(entry.into_mut()),
            Entry::Vacant(entry) => match RecordReader::open(entry.key()) {
                Ok(reader) => Some(entry.insert(reader)),
                Err(_) => None,
            },
        }
    }

    /// The record reader for `cmd | getline`.
    pub fn input_pipe(&mut self, name: Rc<str>) -> Result<&mut RecordReader<'a>, String> {
        match self.input_pipes.entry(name) {
            Entry::Occupied(entry) => Ok(&mut entry.into_mut().reader),
            Entry::Vacant(entry) => {
                let mut child = exec_shell(entry.key())
                    .stdout(Stdio::piped())
                    .spawn()
                    .map_err(|err| format!("can't start command: {}", err))?;
                let stdout = child.stdout.take().ok_or("can't read command output")?;
                let pipe = InputPipe {
                    child,
                    reader: RecordReader::new(Box::new(BufReader::new(stdout))),
                };
                Ok(&mut entry.insert(pipe).reader)
            }
        }
    }

    /// The output sink for a print/printf redirection.
    pub fn output_stream(
        &mut self,
        kind: Redirect,
        name: Rc<str>,
    ) -> Result<&mut OutputStream, String> {
        match self.output_streams.entry(name) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let stream = match kind {
                    Redirect::File => {
                        let file = File::create(entry.key().as_ref())
                            .map_err(|err| format!("can't open \"{}\": {}", entry.key(), err))?;
                        OutputStream::File(file)
                    }
                    Redirect::Append => {
                        let file = File::options()
                            .create(true)
                            .append(true)
                            .open(entry.key().as_ref())
                            .map_err(|err| format!("can't open \"{}\": {}", entry.key(), err))?;
                        OutputStream::File(file)
                    }
                    Redirect::Pipe => {
                        let child = exec_shell(entry.key())
                            .stdin(Stdio::piped())
                            .spawn()
                            .map_err(|err| format!("can't start command: {}", err))?;
                        OutputStream::Pipe(child)
                    }
                };
                Ok(entry.insert(stream))
            }
        }
    }

    /// fflush(name): 0 on success, -1 when the stream is unknown or fails.
    pub fn flush_stream(&mut self, name: &str) -> bool {
        match self.output_streams.get_mut(name) {
            Some(stream) => stream.flush(),
            None => false,
        }
    }

    /// fflush() and fflush(""): flush the main output and every named sink.
    pub fn flush_all(&mut self) -> bool {
        let mut ok = self.output.flush().is_ok();
        for stream in self.output_streams.values_mut() {
            ok = stream.flush() && ok;
        }
        ok
    }

    /// close(name): 0 on success (commands reaped), -1 for unknown streams.
    pub fn close_stream(&mut self, name: &str) -> f64 {
        if let Some(stream) = self.output_streams.remove(name) {
            return stream.close();
        }
        if self.input_files.remove(name).is_some() {
            return 0.0;
        }
        if let Some(mut pipe) = self.input_pipes.remove(name) {
            drop(pipe.reader);
            return match pipe.child.wait() {
                Ok(status) if status.success() => 0.0,
                _ => -1.0,
            };
        }
        -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(input: &str) -> RecordReader<'static> {
        RecordReader::new(Box::new(std::io::Cursor::new(input.as_bytes().to_vec())))
    }

    fn split_records(input: &str, separator: RecordSeparator) -> Vec<String> {
        let mut reader = reader(input);
        let mut result = Vec::new();
        while let Some(record) = reader.read_record(&separator).unwrap() {
            result.push(record);
        }
        result
    }

    #[test]
    fn split_empty_input() {
        assert!(split_records("", RecordSeparator::Char(b'\n')).is_empty());
        assert!(split_records("", RecordSeparator::Paragraph).is_empty());
    }

    #[test]
    fn split_records_with_newline_separator() {
        let records = split_records("one\ntwo\nthree\n", RecordSeparator::Char(b'\n'));
        assert_eq!(records, vec!["one", "two", "three"]);
        // no trailing separator on the last record
        let records = split_records("one\ntwo", RecordSeparator::Char(b'\n'));
        assert_eq!(records, vec!["one", "two"]);
    }

    #[test]
    fn split_records_with_separator_chars() {
        let records = split_records("record1,record2,record3", RecordSeparator::Char(b','));
        assert_eq!(records, vec!["record1", "record2", "record3"]);
    }

    #[test]
    fn split_records_in_paragraph_mode() {
        let records = split_records(
            "\n\nrecord1\nrecord2\n\n\nrecord3\n",
            RecordSeparator::Paragraph,
        );
        assert_eq!(records, vec!["record1\nrecord2", "record3"]);
    }

    #[test]
    fn split_records_with_regex_separator() {
        let separator = RecordSeparator::parse("ab+").unwrap();
        let records = split_records("oneabbtwoabthree", separator);
        assert_eq!(records, vec!["one", "two", "three"]);
    }
}
