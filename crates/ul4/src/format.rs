//! `format()`: Python's format-spec mini-language for numbers and strings,
//! and `strftime` patterns for dates.

use std::fmt::Write as _;

use crate::error::Error;
use crate::value::float_repr;
use crate::value::Value;

#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid(spec: &str) -> Error {
    Error::value_error(format!("invalid format specifier {spec:?}"))
}

fn parse_spec(spec: &str) -> Result<Spec, Error> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');

    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        parsed.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        parsed.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    let digits = |from: usize| {
        chars[from..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
    };
    let width = digits(i);
    if !width.is_empty() {
        parsed.width = width.parse().map_err(|_| invalid(spec))?;
        i += width.len();
    }
    if chars.get(i) == Some(&',') {
        parsed.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        let precision = digits(i + 1);
        if precision.is_empty() {
            return Err(invalid(spec));
        }
        parsed.precision = Some(precision.parse().map_err(|_| invalid(spec))?);
        i += 1 + precision.len();
    }
    match &chars[i..] {
        [] => {}
        [kind] => parsed.kind = Some(*kind),
        _ => return Err(invalid(spec)),
    }
    Ok(parsed)
}

pub fn format(value: &Value, spec: &str) -> Result<String, Error> {
    match value {
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        _ if spec.is_empty() => Ok(value.to_str()),
        Value::Date(date) => strftime(spec, |pattern, out| write!(out, "{}", date.format(pattern))),
        Value::DateTime(dt) => strftime(spec, |pattern, out| write!(out, "{}", dt.format(pattern))),
        Value::Bool(_) | Value::Int(_) => {
            let spec_parsed = parse_spec(spec)?;
            let i = value.as_int().unwrap_or_default();
            format_int(i, &spec_parsed).ok_or_else(|| invalid(spec))
        }
        Value::Float(f) => {
            let spec_parsed = parse_spec(spec)?;
            format_float(*f, &spec_parsed).ok_or_else(|| invalid(spec))
        }
        Value::Str(s) => {
            let spec_parsed = parse_spec(spec)?;
            if !matches!(spec_parsed.kind, None | Some('s'))
                || spec_parsed.sign.is_some()
                || spec_parsed.grouping
            {
                return Err(invalid(spec));
            }
            let text: String = match spec_parsed.precision {
                Some(precision) => s.chars().take(precision).collect(),
                None => s.to_string(),
            };
            Ok(pad(String::new(), &text, &spec_parsed, '<'))
        }
        other => Err(Error::type_error(format!(
            "unsupported format string passed to {}",
            other.type_name()
        ))),
    }
}

/// Runs a chrono pattern, translating Python's `%f` (microseconds).
fn strftime(
    spec: &str,
    write: impl Fn(&str, &mut String) -> std::fmt::Result,
) -> Result<String, Error> {
    let mut pattern = String::with_capacity(spec.len());
    let mut chars = spec.chars();
    while let Some(c) = chars.next() {
        pattern.push(c);
        if c == '%' {
            match chars.next() {
                Some('f') => pattern.push_str("6f"),
                Some(next) => pattern.push(next),
                None => {}
            }
        }
    }
    let mut out = String::new();
    write(&pattern, &mut out).map_err(|_| invalid(spec))?;
    Ok(out)
}

fn sign_of(negative: bool, spec: &Spec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn group(digits: &str) -> String {
    let (int_part, rest) = match digits.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

#[allow(clippy::cast_precision_loss)]
fn format_int(i: i64, spec: &Spec) -> Option<String> {
    let magnitude = i.unsigned_abs();
    let (prefix, digits) = match spec.kind {
        None | Some('d' | 'n') => ("", magnitude.to_string()),
        Some('b') => ("0b", format!("{magnitude:b}")),
        Some('o') => ("0o", format!("{magnitude:o}")),
        Some('x') => ("0x", format!("{magnitude:x}")),
        Some('X') => ("0X", format!("{magnitude:X}")),
        Some('c') => {
            let c = u32::try_from(i).ok().and_then(char::from_u32)?;
            return Some(pad(String::new(), &c.to_string(), spec, '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return format_float(i as f64, spec),
        Some(_) => return None,
    };
    if spec.precision.is_some() {
        return None;
    }
    let digits = if spec.grouping { group(&digits) } else { digits };
    let mut head = sign_of(i < 0, spec).to_string();
    if spec.alternate {
        head.push_str(prefix);
    }
    Some(pad(head, &digits, spec, '>'))
}

/// `{:e}` with Python's exponent notation (`1.5e+03`).
fn exponent(f: f64, precision: usize, upper: bool) -> String {
    let text = format!("{f:.precision$e}");
    let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp),
    };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{digits:0>2}")
}

fn strip_zeros(text: &str) -> String {
    let (number, exp) = match text.find(['e', 'E']) {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };
    let number = if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    };
    format!("{number}{exp}")
}

fn general(f: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let precision = precision.max(1);
    let probe = exponent(f, precision - 1, false);
    let exp: i64 = probe
        .split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0);
    let precision_i = i64::try_from(precision).unwrap_or(i64::MAX);
    let text = if (-4..precision_i).contains(&exp) {
        let decimals = usize::try_from(precision_i - 1 - exp).unwrap_or(0);
        format!("{f:.decimals$}")
    } else {
        exponent(f, precision - 1, upper)
    };
    if alternate {
        text
    } else {
        strip_zeros(&text)
    }
}

fn format_float(f: f64, spec: &Spec) -> Option<String> {
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));
    let magnitude = f.abs();
    let mut digits = if magnitude.is_nan() {
        "nan".to_string()
    } else if magnitude.is_infinite() {
        "inf".to_string()
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{magnitude:.*}", spec.precision.unwrap_or(6)),
            Some('e' | 'E') => exponent(magnitude, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), upper, spec.alternate),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                Some(precision) => general(magnitude, precision, false, spec.alternate),
                None => float_repr(magnitude),
            },
            Some(_) => return None,
        }
    };
    if upper {
        digits = digits.to_uppercase();
    }
    let digits = if spec.grouping { group(&digits) } else { digits };
    let head = sign_of(f.is_sign_negative() && !f.is_nan(), spec).to_string();
    Some(pad(head, &digits, spec, '>'))
}

/// Pads `head + body` to the spec's width. `=` alignment (and the `0` flag)
/// pads between the sign/prefix and the digits.
fn pad(head: String, body: &str, spec: &Spec, default_align: char) -> String {
    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(if spec.zero { '0' } else { ' ' }), align),
        (_, None, true) => ('0', '='),
        (_, None, false) => (' ', default_align),
    };
    let len = head.chars().count() + body.chars().count();
    let missing = spec.width.saturating_sub(len);
    let filler = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    let mut out = String::with_capacity(len + missing);
    match align {
        '<' => {
            out.push_str(&head);
            out.push_str(body);
            out.push_str(&filler(missing));
        }
        '^' => {
            out.push_str(&filler(missing / 2));
            out.push_str(&head);
            out.push_str(body);
            out.push_str(&filler(missing - missing / 2));
        }
        '=' => {
            out.push_str(&head);
            out.push_str(&filler(missing));
            out.push_str(body);
        }
        _ => {
            out.push_str(&filler(missing));
            out.push_str(&head);
            out.push_str(body);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn fmt(value: impl Into<Value>, spec: &str) -> String {
        format(&value.into(), spec).unwrap()
    }

    mod numbers {
        use super::*;

        #[test]
        fn test_ints() {
            assert_eq!(fmt(42, ""), "42");
            assert_eq!(fmt(42, "5"), "   42");
            assert_eq!(fmt(42, "<5"), "42   ");
            assert_eq!(fmt(42, "*^6"), "**42**");
            assert_eq!(fmt(-42, "06"), "-00042");
            assert_eq!(fmt(255, "#x"), "0xff");
            assert_eq!(fmt(5, "b"), "101");
            assert_eq!(fmt(1_234_567, ","), "1,234,567");
            assert_eq!(fmt(7, "+"), "+7");
            assert_eq!(fmt(65, "c"), "A");
        }

        #[test]
        fn test_floats() {
            assert_eq!(fmt(3.14159, ".2f"), "3.14");
            assert_eq!(fmt(1500.0, "e"), "1.500000e+03");
            assert_eq!(fmt(0.5, "%"), "50.000000%");
            assert_eq!(fmt(0.000_012_5, "g"), "1.25e-05");
            assert_eq!(fmt(123.456, "g"), "123.456");
            assert_eq!(fmt(-1.5, "8.1f"), "    -1.5");
            assert_eq!(fmt(2, ".1f"), "2.0");
        }

        #[test]
        fn test_invalid() {
            assert!(format(&Value::Int(1), "q").is_err());
            assert!(format(&Value::Int(1), "5.2d").is_err());
            assert!(format(&Value::str("x"), "+").is_err());
        }
    }

    mod text {
        use super::*;

        #[test]
        fn test_strings() {
            assert_eq!(fmt("ab", "4"), "ab  ");
            assert_eq!(fmt("ab", ">4"), "  ab");
            assert_eq!(fmt("abcdef", ".3"), "abc");
        }

        #[test]
        fn test_dates() {
            let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_micro_opt(7, 8, 9, 42)
                .unwrap();
            assert_eq!(fmt(dt, "%Y/%m/%d %H:%M:%S.%f"), "2024/03/05 07:08:09.000042");
            assert_eq!(fmt(dt.date(), "%d.%m.%Y"), "05.03.2024");
            assert_eq!(fmt(dt.date(), "100%%"), "100%");
        }
    }
}
