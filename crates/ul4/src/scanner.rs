use std::rc::Rc;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use ul4_source::Span;

use crate::error::Error;
use crate::value::Value;

/// Multi-character symbols first, so the longest match wins.
const SYMBOLS: &[&str] = &[
    "{/}", "//=", "<<=", ">>=", "**", "//", "<<", ">>", "==", "!=", "<=", ">=", "+=", "-=", "*=",
    "/=", "%=", "&=", "^=", "|=", "+", "-", "*", "/", "%", "&", "^", "|", "~", "<", ">", "=", "(",
    ")", "[", "]", "{", "}", ",", ":", ".",
];

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Name(Rc<str>),
    Literal(Value),
    Symbol(&'static str),
    Eof,
}

/// A token of the code inside a tag, with a span into the template source.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprToken {
    pub kind: TokenKind,
    pub span: Span,
}

impl ExprToken {
    #[must_use]
    pub fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self.kind, TokenKind::Symbol(s) if s == symbol)
    }

    /// Names double as keywords (`and`, `in`, `for`, ...).
    #[must_use]
    pub fn is_name(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Name(n) if &**n == name)
    }
}

/// Tokenizes `code` (a span of `source`), appending an [`TokenKind::Eof`].
pub fn scan(source: &str, code: Span) -> Result<Vec<ExprToken>, Error> {
    Scanner {
        source,
        current: code.start_usize(),
        end: code.end_usize(),
    }
    .scan()
}

struct Scanner<'a> {
    source: &'a str,
    current: usize,
    end: usize,
}

impl Scanner<'_> {
    fn scan(mut self) -> Result<Vec<ExprToken>, Error> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.current >= self.end {
                tokens.push(ExprToken {
                    kind: TokenKind::Eof,
                    span: Span::empty(self.end),
                });
                return Ok(tokens);
            }
            let start = self.current;
            let rest = &self.source[start..self.end];
            let c = rest.chars().next().unwrap_or_default();
            let kind = if c.is_ascii_digit() {
                self.number()?
            } else if c == '_' || c.is_alphabetic() {
                self.name()
            } else if c == '\'' || c == '"' {
                self.string(c)?
            } else if rest.starts_with("@(") {
                self.date()?
            } else if let Some(symbol) = SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
                self.current += symbol.len();
                TokenKind::Symbol(symbol)
            } else {
                return Err(Error::syntax(
                    format!("unexpected character {c:?}"),
                    Span::from_bounds(start, start + c.len_utf8()),
                ));
            };
            tokens.push(ExprToken {
                kind,
                span: Span::from_bounds(start, self.current),
            });
        }
    }

    fn rest(&self) -> &str {
        &self.source[self.current..self.end]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.current += rest.len() - rest.trim_start().len();
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &str {
        let start = self.current;
        let len = self
            .rest()
            .char_indices()
            .find(|(_, c)| !predicate(*c))
            .map_or(self.end - start, |(i, _)| i);
        self.current += len;
        &self.source[start..self.current]
    }

    fn name(&mut self) -> TokenKind {
        let name = self.take_while(|c| c == '_' || c.is_alphanumeric());
        match name {
            "None" => TokenKind::Literal(Value::None),
            "True" => TokenKind::Literal(Value::Bool(true)),
            "False" => TokenKind::Literal(Value::Bool(false)),
            name => TokenKind::Name(Rc::from(name)),
        }
    }

    fn number(&mut self) -> Result<TokenKind, Error> {
        let start = self.current;
        let rest = self.rest();
        let radix = match rest.get(..2) {
            Some("0x" | "0X") => Some(16),
            Some("0o" | "0O") => Some(8),
            Some("0b" | "0B") => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            self.current += 2;
            let digits = self.take_while(|c| c.is_digit(radix) || c == '_').replace('_', "");
            return i64::from_str_radix(&digits, radix)
                .map(|i| TokenKind::Literal(Value::Int(i)))
                .map_err(|_| {
                    Error::syntax("invalid integer literal", Span::from_bounds(start, self.current))
                });
        }

        self.take_while(|c| c.is_ascii_digit() || c == '_');
        let mut is_float = false;
        let after = self.rest();
        if after.starts_with('.') && !after[1..].starts_with(|c: char| c.is_alphabetic() || c == '_') {
            is_float = true;
            self.current += 1;
            self.take_while(|c| c.is_ascii_digit());
        }
        let after = self.rest();
        if after.starts_with(['e', 'E']) {
            let mantissa_end = self.current;
            self.current += 1;
            if self.rest().starts_with(['+', '-']) {
                self.current += 1;
            }
            if self.take_while(|c| c.is_ascii_digit()).is_empty() {
                self.current = mantissa_end;
            } else {
                is_float = true;
            }
        }
        let text = self.source[start..self.current].replace('_', "");
        let span = Span::from_bounds(start, self.current);
        if is_float {
            text.parse::<f64>()
                .map(|f| TokenKind::Literal(Value::Float(f)))
                .map_err(|_| Error::syntax("invalid float literal", span))
        } else {
            text.parse::<i64>()
                .map(|i| TokenKind::Literal(Value::Int(i)))
                .map_err(|_| Error::syntax("integer literal too large", span))
        }
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, Error> {
        let start = self.current;
        let triple: String = std::iter::repeat(quote).take(3).collect();
        let delimiter = if self.rest().starts_with(&triple) {
            triple
        } else {
            quote.to_string()
        };
        self.current += delimiter.len();

        let mut value = String::new();
        loop {
            let rest = self.rest();
            if rest.starts_with(&delimiter) {
                self.current += delimiter.len();
                return Ok(TokenKind::Literal(Value::str(value)));
            }
            let Some(c) = rest.chars().next() else {
                return Err(Error::syntax(
                    "unterminated string",
                    Span::from_bounds(start, self.end),
                ));
            };
            if (c == '\n' || c == '\r') && delimiter.len() == 1 {
                return Err(Error::syntax(
                    "unterminated string",
                    Span::from_bounds(start, self.current),
                ));
            }
            self.current += c.len_utf8();
            if c == '\\' {
                self.escape(&mut value, start)?;
            } else {
                value.push(c);
            }
        }
    }

    fn escape(&mut self, value: &mut String, string_start: usize) -> Result<(), Error> {
        let Some(c) = self.rest().chars().next() else {
            return Err(Error::syntax(
                "unterminated string",
                Span::from_bounds(string_start, self.end),
            ));
        };
        self.current += c.len_utf8();
        let simple = match c {
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            'a' => Some('\x07'),
            'b' => Some('\x08'),
            'f' => Some('\x0c'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\x0b'),
            'e' => Some('\x1b'),
            _ => None,
        };
        if let Some(simple) = simple {
            value.push(simple);
            return Ok(());
        }
        let digits = match c {
            'x' => 2,
            'u' => 4,
            'U' => 8,
            other => {
                value.push('\\');
                value.push(other);
                return Ok(());
            }
        };
        let escape_start = self.current - 2;
        let hex = self.rest().get(..digits).unwrap_or_default();
        let decoded = (hex.len() == digits)
            .then(|| u32::from_str_radix(hex, 16).ok())
            .flatten()
            .and_then(char::from_u32)
            .ok_or_else(|| {
                Error::syntax(
                    format!("invalid \\{c} escape"),
                    Span::from_bounds(escape_start, self.current + hex.len()),
                )
            })?;
        self.current += digits;
        value.push(decoded);
        Ok(())
    }

    fn date(&mut self) -> Result<TokenKind, Error> {
        let start = self.current;
        self.current += 2;
        let text = self.take_while(|c| c != ')').to_string();
        if !self.rest().starts_with(')') {
            return Err(Error::syntax(
                "unterminated date literal",
                Span::from_bounds(start, self.current),
            ));
        }
        self.current += 1;
        let span = Span::from_bounds(start, self.current);
        parse_date(&text)
            .ok_or_else(|| Error::syntax(format!("invalid date literal @({text})"), span))
            .map(TokenKind::Literal)
    }
}

/// Parses the inside of a `@(...)` literal.
pub(crate) fn parse_date(text: &str) -> Option<Value> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Value::Date(date));
    }
    let text = text.strip_suffix('T').unwrap_or(text);
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(Value::DateTime);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(Value::DateTime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(code: &str) -> Vec<TokenKind> {
        scan(code, Span::from_bounds(0, code.len()))
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn literal(code: &str) -> Value {
        match kinds(code).remove(0) {
            TokenKind::Literal(value) => value,
            other => panic!("expected literal, got {other:?}"),
        }
    }

    mod literals {
        use super::*;

        #[test]
        fn test_numbers() {
            assert_eq!(literal("42"), Value::Int(42));
            assert_eq!(literal("0x1F"), Value::Int(31));
            assert_eq!(literal("0o17"), Value::Int(15));
            assert_eq!(literal("0b101"), Value::Int(5));
            assert_eq!(literal("1_000"), Value::Int(1000));
            assert!(matches!(literal("1.5"), Value::Float(f) if f == 1.5));
            assert!(matches!(literal("1e3"), Value::Float(f) if f == 1000.0));
            assert!(matches!(literal("2.5E-1"), Value::Float(f) if f == 0.25));
        }

        #[test]
        fn test_strings() {
            assert_eq!(literal(r#"'a\'b'"#), Value::str("a'b"));
            assert_eq!(literal(r#""tab\there""#), Value::str("tab\there"));
            assert_eq!(literal(r"'\x41ä\U0001F600'"), Value::str("Aä😀"));
            assert_eq!(literal(r"'\q'"), Value::str("\\q"));
            assert_eq!(literal("'''a'b'''"), Value::str("a'b"));
        }

        #[test]
        fn test_dates() {
            assert_eq!(literal("@(2000-02-29)").repr(), "@(2000-02-29)");
            assert_eq!(
                literal("@(2000-02-29T12:34)").repr(),
                "@(2000-02-29T12:34:00)"
            );
            assert_eq!(
                literal("@(2000-02-29T12:34:56.5)").repr(),
                "@(2000-02-29T12:34:56.500000)"
            );
            assert_eq!(literal("@(2000-02-29T)").repr(), "@(2000-02-29T00:00:00)");
        }

        #[test]
        fn test_constants() {
            assert_eq!(literal("None"), Value::None);
            assert_eq!(literal("True"), Value::Bool(true));
        }
    }

    mod symbols {
        use super::*;

        #[test]
        fn test_longest_match() {
            assert_eq!(
                kinds("a//=b<<1"),
                vec![
                    TokenKind::Name("a".into()),
                    TokenKind::Symbol("//="),
                    TokenKind::Name("b".into()),
                    TokenKind::Symbol("<<"),
                    TokenKind::Literal(Value::Int(1)),
                    TokenKind::Eof,
                ]
            );
        }

        #[test]
        fn test_empty_set_and_attribute_after_int() {
            assert_eq!(kinds("{/}")[0], TokenKind::Symbol("{/}"));
            assert_eq!(kinds("1.real")[1], TokenKind::Symbol("."));
        }

        #[test]
        fn test_spans_are_absolute() {
            let source = "<?print foo + 1?>";
            let tokens = scan(source, Span::from_bounds(8, 15)).unwrap();
            assert_eq!(tokens[0].span, Span::new(8, 3));
            assert_eq!(tokens[2].span, Span::new(14, 1));
            assert_eq!(tokens[3].span, Span::empty(15));
        }

        #[test]
        fn test_errors() {
            let source = "'abc";
            assert!(scan(source, Span::from_bounds(0, 4)).is_err());
            let source = "a $ b";
            let err = scan(source, Span::from_bounds(0, 5)).unwrap_err();
            assert_eq!(err.span(), Some(Span::new(2, 1)));
        }
    }
}
