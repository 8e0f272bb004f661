//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::regex::Regex;

/// length() in the configured semantics: characters or bytes.
pub fn char_len(s: &str, bytes: bool) -> usize {
    if bytes {
        s.len()
    } else {
        s.chars().count()
    }
}

/// index(haystack, needle): 1-based position of the first occurrence, 0
/// when absent.
pub fn index_of(haystack: &str, needle: &str, bytes: bool) -> f64 {
    match haystack.find(needle) {
        None => 0.0,
        Some(pos) => {
            if bytes {
                pos as f64 + 1.0
            } else {
                haystack[..pos].chars().count() as f64 + 1.0
            }
        }
    }
}

/// substr(s, m[, n]): the characters from position m (1-based) covering n
/// positions, clamped to the string. Positions before 1 count against n.
pub fn substr(s: &str, position: f64, length: Option<f64>, bytes: bool) -> String {
    let total = char_len(s, bytes) as i64;
    let position = position as i64;
    let end = match length {
        // inclusive end position
        None => total,
        Some(length) => (position + length as i64 - 1).min(total),
    };
    let start = position.max(1);
    if start > end {
        return String::new();
    }
    let (start, count) = (start as usize - 1, (end - start + 1) as usize);
    if bytes {
        let slice = &s.as_bytes()[start..start + count];
        match std::str::from_utf8(slice) {
            Ok(text) => text.to_string(),
            // byte semantics may cut a multi-byte character in half
            Err(_) => String::from_utf8_lossy(slice).into_owned(),
        }
    } else {
        s.chars().skip(start).take(count).collect()
    }
}

/// match(s, re): the 1-based start offset and length of the first match,
/// or (0, -1) when there is none. These become RSTART and RLENGTH.
pub fn match_offsets(regex: &Regex, subject: &str, bytes: bool) -> (f64, f64) {
    match regex.find(subject) {
        None => (0.0, -1.0),
        Some(m) => {
            if bytes {
                (m.start as f64 + 1.0, (m.end - m.start) as f64)
            } else {
                let start = subject[..m.start].chars().count();
                let length = subject[m.start..m.end].chars().count();
                (start as f64 + 1.0, length as f64)
            }
        }
    }
}

/// Split the replacement text of sub/gsub at each unescaped `&`; the parts
/// are later joined with the matched text. `\&` is a literal ampersand and
/// `\\` a literal backslash.
fn replacement_parts(replacement: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut iter = replacement.chars();
    while let Some(c) = iter.next() {
        match c {
            '&' => {
                parts.push(std::mem::take(&mut current));
            }
            '\\' => match iter.next() {
                Some('&') => current.push('&'),
                Some('\\') => current.push('\\'),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            other => current.push(other),
        }
    }
    parts.push(current);
    parts
}

/// sub/gsub: replace the first (or every) match of `regex` in `subject`,
/// expanding `&` in the replacement. A null match immediately following a
/// previous match is skipped, so gsub of `x*` over "axb" gives "-a-b-".
/// Returns the result and the replacement count.
pub fn sub_replace(
    regex: &Regex,
    replacement: &str,
    subject: &str,
    first_only: bool,
) -> (String, usize) {
    let parts = replacement_parts(replacement);
    let mut result = String::with_capacity(subject.len());
    let mut count = 0;
    let mut copied = 0;
    let mut pos = 0;
    let mut prev_end = None;
    while pos <= subject.len() {
        let m = match regex.find_at(subject, pos) {
            Some(m) => m,
            None => break,
        };
        let empty = m.start == m.end;
        if empty && prev_end == Some(m.start) {
            // adjacent null match: not a replacement
            match subject[m.end..].chars().next() {
                Some(c) => pos = m.end + c.len_utf8(),
                None => break,
            }
            continue;
        }
        result.push_str(&subject[copied..m.start]);
        let matched = &subject[m.start..m.end];
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                result.push_str(matched);
            }
            result.push_str(part);
        }
        count += 1;
        copied = m.end;
        prev_end = Some(m.end);
        if first_only {
            break;
        }
        if empty {
            match subject[m.end..].chars().next() {
                Some(c) => pos = m.end + c.len_utf8(),
                None => break,
            }
        } else {
            pos = m.end;
        }
    }
    result.push_str(&subject[copied..]);
    (result, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regex::regex_from_str;

    #[test]
    fn substr_clamps_like_posix() {
        assert_eq!(substr("hello", 2.0, None, false), "ello");
        assert_eq!(substr("hello", 2.0, Some(2.0), false), "el");
        assert_eq!(substr("hello", 0.0, Some(2.0), false), "h");
        assert_eq!(substr("hello", -1.0, Some(3.0), false), "h");
        assert_eq!(substr("hello", 4.0, Some(100.0), false), "lo");
        assert_eq!(substr("hello", 6.0, None, false), "");
        assert_eq!(substr("hello", 2.0, Some(-1.0), false), "");
    }

    #[test]
    fn substr_character_and_byte_offsets() {
        assert_eq!(substr("αβγ", 2.0, Some(2.0), false), "βγ");
        // in byte mode the same offsets land inside the UTF-8 sequences
        let bytes = substr("αβγ", 2.0, Some(2.0), true);
        assert_eq!(bytes.as_bytes().len(), 2 * "\u{fffd}".len());
    }

    #[test]
    fn index_offsets() {
        assert_eq!(index_of("hello", "ll", false), 3.0);
        assert_eq!(index_of("hello", "x", false), 0.0);
        assert_eq!(index_of("αβγ", "γ", false), 3.0);
        assert_eq!(index_of("αβγ", "γ", true), 5.0);
    }

    #[test]
    fn match_sets_start_and_length() {
        let re = regex_from_str("l+");
        assert_eq!(match_offsets(&re, "hello", false), (3.0, 2.0));
        assert_eq!(match_offsets(&re, "xyz", false), (0.0, -1.0));
        let re = regex_from_str("βγ");
        assert_eq!(match_offsets(&re, "αβγ", false), (2.0, 2.0));
        assert_eq!(match_offsets(&re, "αβγ", true), (3.0, 4.0));
    }

    #[test]
    fn sub_replaces_first_only() {
        let re = regex_from_str("l");
        let (out, n) = sub_replace(&re, "L", "hello", true);
        assert_eq!(out, "heLlo");
        assert_eq!(n, 1);
    }

    #[test]
    fn gsub_replaces_all_with_ampersand() {
        let re = regex_from_str("o+");
        let (out, n) = sub_replace(&re, "<&>", "foo boo", false);
        assert_eq!(out, "f<oo> b<oo>");
        assert_eq!(n, 2);
        let (out, _) = sub_replace(&re, "\\&", "foo", false);
        assert_eq!(out, "f&");
    }

    #[test]
    fn gsub_null_matches_do_not_double_count() {
        let re = regex_from_str("x*");
        let (out, n) = sub_replace(&re, "-", "axb", false);
        assert_eq!(out, "-a-b-");
        assert_eq!(n, 3);
    }
}
