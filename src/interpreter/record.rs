//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::regex::Regex;
use std::rc::Rc;

/// Escape a character for use in an ERE pattern.
pub fn ere_escape_char(c: char) -> String {
    if "\\^$.|?*+()[]{}".contains(c) {
        format!("\\{}", c)
    } else {
        c.to_string()
    }
}

/// The compiled form of FS.
pub enum FieldSeparator {
    /// FS == " ": split on runs of blanks, ignoring leading and trailing
    Default,
    Char(u8),
    Ere(Rc<Regex>),
    /// FS == "": every character is its own field
    Null,
}

impl FieldSeparator {
    pub fn parse(value: &str) -> Result<Self, String> {
        if value.is_empty() {
            Ok(FieldSeparator::Null)
        } else if value == " " {
            Ok(FieldSeparator::Default)
        } else if value.len() == 1 {
            Ok(FieldSeparator::Char(value.as_bytes()[0]))
        } else {
            let ere = Regex::new(value)?;
            Ok(FieldSeparator::Ere(Rc::new(ere)))
        }
    }
}

/// Split a record into fields, calling `store` with each zero-based field
/// index and its text.
pub fn split_record<S: FnMut(usize, &str)>(
    record: &str,
    field_separator: &FieldSeparator,
    mut store: S,
) {
    if record.is_empty() {
        return;
    }
    match field_separator {
        FieldSeparator::Default => {
            for (i, field) in record.split_ascii_whitespace().enumerate() {
                store(i, field);
            }
        }
        FieldSeparator::Char(c) => {
            for (i, field) in record.split(*c as char).enumerate() {
                store(i, field);
            }
        }
        FieldSeparator::Ere(re) => {
            let mut split_start = 0;
            let mut index = 0;
            for location in re.match_locations(record) {
                // a zero-width separator match contributes nothing
                if location.end == location.start {
                    continue;
                }
                store(index, &record[split_start..location.start]);
                split_start = location.end;
                index += 1;
            }
            store(index, &record[split_start..]);
        }
        FieldSeparator::Null => {
            let mut buf = [0u8; 4];
            for (i, c) in record.chars().enumerate() {
                store(i, c.encode_utf8(&mut buf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(record: &str, sep: &str) -> Vec<String> {
        let separator = FieldSeparator::parse(sep).expect("bad separator");
        let mut fields = Vec::new();
        split_record(record, &separator, |_, s| fields.push(s.to_string()));
        fields
    }

    #[test]
    fn default_separator_ignores_surrounding_blanks() {
        assert_eq!(split("  a \t b  c ", " "), vec!["a", "b", "c"]);
        assert!(split("", " ").is_empty());
        assert!(split("   ", " ").is_empty());
    }

    #[test]
    fn char_separator_keeps_empty_fields() {
        assert_eq!(split("a,,b,", ","), vec!["a", "", "b", ""]);
    }

    #[test]
    fn regex_separator() {
        assert_eq!(split("a1b22c", "[0-9]+"), vec!["a", "b", "c"]);
    }

    #[test]
    fn null_separator_splits_characters() {
        assert_eq!(split("abc", ""), vec!["a", "b", "c"]);
    }
}
