//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use super::format::format_float;
use super::strtod;
use std::cmp::Ordering;
use std::rc::Rc;

/// An AWK scalar: uninitialized, number, string, or numeric string. A
/// numeric string is a string that came from input (fields, getline, split,
/// ARGV, ENVIRON, assignment operands) and looks like a number; it carries
/// its parsed numeric view and takes part in numeric comparisons.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Num(f64),
    Str(Rc<str>),
    NumStr(Rc<str>, f64),
}

/// True if the string looks like a number in its entirety (modulo
/// surrounding blanks). Rejects hex, inf and nan forms: those are not
/// numeric strings in AWK.
pub fn is_valid_number(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || !trimmed
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return false;
    }
    match lexical::parse_partial_with_options::<f64, _, { lexical::format::C_STRING }>(
        trimmed,
        &lexical::ParseFloatOptions::default(),
    ) {
        Ok((_, consumed)) => consumed == trimmed.len(),
        Err(_) => false,
    }
}

impl Value {
    pub fn str(value: impl Into<Rc<str>>) -> Self {
        Value::Str(value.into())
    }

    /// A string from an input source: numeric-looking input participates in
    /// numeric comparisons.
    pub fn num_str(value: impl Into<Rc<str>>) -> Self {
        let value = value.into();
        if is_valid_number(&value) {
            let num = strtod(value.trim());
            Value::NumStr(value, num)
        } else {
            Value::Str(value)
        }
    }

    pub fn num(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Num(n) => *n,
            Value::Str(s) => strtod(s),
            Value::NumStr(_, n) => *n,
        }
    }

    /// Convert to string, formatting numbers with `float_fmt` (CONVFMT or
    /// OFMT). Integral numbers print without a decimal point.
    pub fn to_str(&self, float_fmt: &str) -> Rc<str> {
        match self {
            Value::Null => Rc::from(""),
            Value::Str(s) | Value::NumStr(s, _) => s.clone(),
            Value::Num(n) => format_num(*n, float_fmt),
        }
    }

    pub fn boolean(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::NumStr(_, n) => *n != 0.0,
        }
    }

    /// The comparison classifier: the numeric view, and whether this value
    /// is a "true string" (forcing string comparison).
    pub fn is_true_str(&self) -> (f64, bool) {
        match self {
            Value::Null => (0.0, false),
            Value::Num(n) => (*n, false),
            Value::NumStr(_, n) => (*n, false),
            Value::Str(s) => (strtod(s), true),
        }
    }

    /// Compare per the AWK rule: string comparison iff either side is a true
    /// string, numeric otherwise.
    pub fn compare(&self, other: &Value, float_fmt: &str) -> Ordering {
        let (left_num, left_str) = self.is_true_str();
        let (right_num, right_str) = other.is_true_str();
        if left_str || right_str {
            self.to_str(float_fmt).cmp(&other.to_str(float_fmt))
        } else {
            left_num.partial_cmp(&right_num).unwrap_or(Ordering::Less)
        }
    }

    /// Equality per the same rule. Kept separate from compare so NaN
    /// behaves like C (never equal).
    pub fn equals(&self, other: &Value, float_fmt: &str) -> bool {
        let (left_num, left_str) = self.is_true_str();
        let (right_num, right_str) = other.is_true_str();
        if left_str || right_str {
            self.to_str(float_fmt) == other.to_str(float_fmt)
        } else {
            left_num == right_num
        }
    }
}

/// Format a number the way AWK prints scalars: integral values without a
/// decimal point, the rest through the CONVFMT/OFMT format.
pub fn format_num(value: f64, float_fmt: &str) -> Rc<str> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        Rc::from((value as i64).to_string())
    } else if value.is_nan() {
        Rc::from("nan")
    } else if value.is_infinite() {
        Rc::from(if value < 0.0 { "-inf" } else { "inf" })
    } else {
        match format_float(float_fmt, value) {
            Ok(s) => Rc::from(s),
            Err(_) => Rc::from(value.to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Num(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Num(if value { 1.0 } else { 0.0 })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}
