//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use std::rc::Rc;

/// A compiled regular expression. Wraps the regex crate behind the small
/// compile-and-match interface the VM needs, keeping the source pattern for
/// error messages and cache keys.
pub struct Regex {
    inner: regex::Regex,
    pattern: Rc<str>,
}

#[cfg_attr(test, derive(Debug))]
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct RegexMatch {
    /// byte offsets into the subject
    pub start: usize,
    pub end: usize,
}

impl Regex {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let inner = regex::Regex::new(pattern).map_err(|err| err.to_string())?;
        Ok(Self {
            inner,
            pattern: pattern.into(),
        })
    }

    pub fn pattern(&self) -> &Rc<str> {
        &self.pattern
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.inner.is_match(subject)
    }

    /// The first match location, or None.
    pub fn find(&self, subject: &str) -> Option<RegexMatch> {
        self.inner.find(subject).map(|m| RegexMatch {
            start: m.start(),
            end: m.end(),
        })
    }

    /// The first match location at or after `start`.
    pub fn find_at(&self, subject: &str, start: usize) -> Option<RegexMatch> {
        self.inner.find_at(subject, start).map(|m| RegexMatch {
            start: m.start(),
            end: m.end(),
        })
    }

    /// Iterator over every match location. Zero-width matches advance by one
    /// character so the iterator always makes progress.
    pub fn match_locations<'re, 's>(&'re self, subject: &'s str) -> MatchIter<'re, 's> {
        MatchIter {
            regex: self,
            subject,
            next_start: 0,
        }
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

#[cfg(test)]
impl core::fmt::Debug for Regex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "/{}/", self.pattern)
    }
}

pub struct MatchIter<'re, 's> {
    regex: &'re Regex,
    subject: &'s str,
    next_start: usize,
}

impl Iterator for MatchIter<'_, '_> {
    type Item = RegexMatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start > self.subject.len() {
            return None;
        }
        let m = self.regex.inner.find_at(self.subject, self.next_start)?;
        let result = RegexMatch {
            start: m.start(),
            end: m.end(),
        };
        self.next_start = if m.end() > m.start() {
            m.end()
        } else {
            // zero-width: step over the next character
            match self.subject[m.end()..].chars().next() {
                Some(c) => m.end() + c.len_utf8(),
                None => self.subject.len() + 1,
            }
        };
        Some(result)
    }
}

/// utility function for writing tests
#[cfg(test)]
pub fn regex_from_str(pattern: &str) -> Regex {
    Regex::new(pattern).expect("error compiling ere")
}
