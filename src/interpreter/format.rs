//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use super::value::Value;
use std::str::Chars;

#[derive(Default)]
pub struct FormatArgs {
    left_justified: bool,
    signed: bool,
    prefix_space: bool,
    alternative_form: bool,
    zero_padded: bool,
    width: usize,
    precision: Option<usize>,
}

/// Parse the conversion specifier arguments from the format string.
/// `iter` must be positioned after the '%' that starts the specifier.
/// Returns the conversion character and the parsed arguments.
pub fn parse_conversion_specifier_args(iter: &mut Chars) -> Result<(char, FormatArgs), String> {
    let iter_next = |iter: &mut Chars| iter.next().ok_or("invalid format string".to_string());

    let parse_number = |next: &mut char, iter: &mut Chars| -> Result<usize, String> {
        let mut number = 0usize;
        while let Some(digit) = next.to_digit(10) {
            number = number * 10 + digit as usize;
            *next = iter_next(iter)?;
        }
        Ok(number)
    };

    let mut result = FormatArgs::default();
    let mut next = iter_next(iter)?;
    loop {
        match next {
            '-' => result.left_justified = true,
            '+' => result.signed = true,
            ' ' => result.prefix_space = true,
            '#' => result.alternative_form = true,
            '0' => result.zero_padded = true,
            _ => break,
        }
        next = iter_next(iter)?;
    }
    if next.is_ascii_digit() {
        result.width = parse_number(&mut next, iter)?;
    }
    if next == '.' {
        next = iter_next(iter)?;
        result.precision = Some(parse_number(&mut next, iter)?);
    }
    Ok((next, result))
}

/// Apply sign, zero padding, and width to a conversion body. `zero_pad_ok`
/// is false for integer conversions with an explicit precision (the 0 flag
/// is then ignored, as in C).
fn pad_number(body: String, negative: bool, args: &FormatArgs, zero_pad_ok: bool) -> String {
    let sign = if negative {
        "-"
    } else if args.signed {
        "+"
    } else if args.prefix_space {
        " "
    } else {
        ""
    };
    let len = sign.len() + body.len();
    if len >= args.width {
        return format!("{}{}", sign, body);
    }
    let padding = args.width - len;
    if args.left_justified {
        format!("{}{}{}", sign, body, " ".repeat(padding))
    } else if args.zero_padded && zero_pad_ok {
        format!("{}{}{}", sign, "0".repeat(padding), body)
    } else {
        format!("{}{}{}", " ".repeat(padding), sign, body)
    }
}

fn pad_string(body: &str, args: &FormatArgs) -> String {
    let len = body.chars().count();
    if len >= args.width {
        return body.to_string();
    }
    let padding = " ".repeat(args.width - len);
    if args.left_justified {
        format!("{}{}", body, padding)
    } else {
        format!("{}{}", padding, body)
    }
}

fn write_signed(out: &mut String, value: i64, args: &FormatArgs) {
    let mut body = value.unsigned_abs().to_string();
    if let Some(precision) = args.precision {
        if body.len() < precision {
            body = format!("{}{}", "0".repeat(precision - body.len()), body);
        }
        if precision == 0 && value == 0 {
            body = String::new();
        }
    }
    out.push_str(&pad_number(
        body,
        value < 0,
        args,
        args.precision.is_none(),
    ));
}

#[derive(PartialEq, Clone, Copy)]
pub enum IntegerFormat {
    Decimal,
    Octal,
    HexLower,
    HexUpper,
}

fn write_unsigned(out: &mut String, value: u64, format: IntegerFormat, args: &FormatArgs) {
    let mut body = match format {
        IntegerFormat::Decimal => value.to_string(),
        IntegerFormat::Octal => format!("{:o}", value),
        IntegerFormat::HexLower => format!("{:x}", value),
        IntegerFormat::HexUpper => format!("{:X}", value),
    };
    if args.alternative_form && value != 0 {
        body = match format {
            IntegerFormat::Octal if !body.starts_with('0') => format!("0{}", body),
            IntegerFormat::HexLower => format!("0x{}", body),
            IntegerFormat::HexUpper => format!("0X{}", body),
            _ => body,
        };
    }
    if let Some(precision) = args.precision {
        if body.len() < precision {
            body = format!("{}{}", "0".repeat(precision - body.len()), body);
        }
        if precision == 0 && value == 0 {
            body = String::new();
        }
    }
    out.push_str(&pad_number(body, false, args, args.precision.is_none()));
}

/// The body of an %e/%E conversion of a non-negative value, C style: at
/// least two exponent digits and an explicit exponent sign.
fn exponent_body(value: f64, precision: usize, upper: bool) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return "inf".to_string();
    }
    let formatted = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = formatted
        .split_once('e')
        .expect("float exponent formatting");
    let exponent: i32 = exponent.parse().expect("float exponent parse");
    let e = if upper { 'E' } else { 'e' };
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exponent.abs())
}

fn trim_trailing_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.')
}

/// The body of a %g/%G conversion of a non-negative value: %e when the
/// exponent is < -4 or >= the precision, %f otherwise, with trailing zeros
/// removed.
fn general_body(value: f64, precision: usize, upper: bool) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return "inf".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let precision = precision.max(1);
    let e_form = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = e_form.split_once('e').expect("float exponent formatting");
    let exponent: i32 = exponent.parse().expect("float exponent parse");
    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = trim_trailing_zeros(mantissa);
        let e = if upper { 'E' } else { 'e' };
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}{}{}{:02}", mantissa, e, sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        trim_trailing_zeros(&fixed).to_string()
    }
}

fn write_float(out: &mut String, value: f64, specifier: char, args: &FormatArgs) {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let precision = args.precision.unwrap_or(6);
    let body = match specifier {
        'f' | 'F' => {
            if magnitude.is_finite() {
                format!("{:.*}", precision, magnitude)
            } else if magnitude.is_nan() {
                "nan".to_string()
            } else {
                "inf".to_string()
            }
        }
        'e' | 'E' => exponent_body(magnitude, precision, specifier == 'E'),
        _ => general_body(magnitude, precision, specifier == 'G'),
    };
    let zero_pad_ok = magnitude.is_finite();
    out.push_str(&pad_number(body, negative, args, zero_pad_ok));
}

/// Format `values` according to `format_string`. `float_fmt` is the current
/// CONVFMT, used when a %s argument is a number.
pub fn sprintf(format_string: &str, values: &[Value], float_fmt: &str) -> Result<String, String> {
    let mut result = String::with_capacity(format_string.len());
    let mut iter = format_string.chars();
    let mut current_arg = 0;
    while let Some(c) = iter.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        let (specifier, args) = parse_conversion_specifier_args(&mut iter)?;
        if specifier == '%' {
            result.push('%');
            continue;
        }
        if current_arg == values.len() {
            return Err("not enough arguments for format string".to_string());
        }
        let value = &values[current_arg];
        current_arg += 1;
        match specifier {
            'd' | 'i' => write_signed(&mut result, value.num() as i64, &args),
            'u' | 'o' | 'x' | 'X' => {
                let format = match specifier {
                    'u' => IntegerFormat::Decimal,
                    'o' => IntegerFormat::Octal,
                    'x' => IntegerFormat::HexLower,
                    _ => IntegerFormat::HexUpper,
                };
                write_unsigned(&mut result, value.num() as i64 as u64, format, &args);
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                write_float(&mut result, value.num(), specifier, &args)
            }
            'c' => {
                let body = match value {
                    Value::Str(s) | Value::NumStr(s, _) if !s.is_empty() => {
                        s.chars().next().unwrap().to_string()
                    }
                    Value::Str(_) => String::new(),
                    _ => char::from_u32(value.num() as u32)
                        .map(|c| c.to_string())
                        .unwrap_or_default(),
                };
                result.push_str(&pad_string(&body, &args));
            }
            's' => {
                let full = value.to_str(float_fmt);
                let body: String = match args.precision {
                    Some(precision) => full.chars().take(precision).collect(),
                    None => full.to_string(),
                };
                result.push_str(&pad_string(&body, &args));
            }
            other => return Err(format!("unsupported format specifier '{}'", other)),
        }
    }
    Ok(result)
}

/// Format a single number through a CONVFMT/OFMT-style specification.
pub fn format_float(spec: &str, value: f64) -> Result<String, String> {
    let mut out = String::new();
    let mut iter = spec.chars();
    let mut formatted = false;
    while let Some(c) = iter.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let (specifier, args) = parse_conversion_specifier_args(&mut iter)?;
        match specifier {
            '%' => out.push('%'),
            _ if formatted => return Err("invalid number format".to_string()),
            'd' | 'i' => {
                write_signed(&mut out, value as i64, &args);
                formatted = true;
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                write_float(&mut out, value, specifier, &args);
                formatted = true;
            }
            _ => return Err("invalid number format".to_string()),
        }
    }
    Ok(out)
}
