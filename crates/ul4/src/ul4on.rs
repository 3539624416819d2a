//! UL4ON, a text serialization format for template values and compiled
//! templates.
//!
//! Every item starts with a one character type code. Uppercase codes
//! register the item so later `^<n>` backreferences can point to it; the
//! encoder writes backreferences for strings, containers and templates it
//! has already written.

mod nodes;

use std::io;
use std::rc::Rc;

use chrono::Datelike;
use chrono::NaiveDate;
use chrono::Timelike;
use indexmap::IndexMap;
use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::value::float_repr;
use crate::value::str_repr;
use crate::value::timedelta_from_parts;
use crate::value::timedelta_parts;
use crate::value::Value;

/// Version of the template layout written by [`dumps`].
pub const VERSION: &str = "47";

/// Type keys of templates and syntax tree nodes start with this.
const TYPE_PREFIX: &str = "de.livinglogic.ul4.";

pub fn dumps(value: &Value, indent: Option<&str>) -> Result<String, Error> {
    let mut encoder = Encoder::new(indent);
    encoder.dump(value)?;
    Ok(encoder.finish())
}

pub fn dump(value: &Value, writer: &mut impl io::Write, indent: Option<&str>) -> Result<(), Error> {
    let output = dumps(value, indent)?;
    writer.write_all(output.as_bytes()).map_err(|err| Error::Io {
        path: "<stream>".to_string(),
        message: err.to_string(),
    })
}

pub fn loads(input: &str) -> Result<Value, Error> {
    Decoder::new(input).load()
}

pub fn load(reader: &mut impl io::Read) -> Result<Value, Error> {
    let mut input = String::new();
    reader.read_to_string(&mut input).map_err(|err| Error::Io {
        path: "<stream>".to_string(),
        message: err.to_string(),
    })?;
    loads(&input)
}

/// Identity of values that may be written as backreferences.
fn identity(value: &Value) -> Option<usize> {
    match value {
        Value::Str(s) => Some(Rc::as_ptr(s).cast::<u8>() as usize),
        Value::List(items) => Some(Rc::as_ptr(items) as usize),
        Value::Dict(items) => Some(Rc::as_ptr(items) as usize),
        Value::Set(items) => Some(Rc::as_ptr(items) as usize),
        Value::Template(template) => Some(template.addr()),
        _ => None,
    }
}

pub struct Encoder {
    output: String,
    /// `None` writes everything on one line.
    indent: Option<String>,
    level: usize,
    inline: bool,
    /// Number of registered items written so far.
    registered: usize,
    positions: FxHashMap<usize, usize>,
    /// Keeps recorded values alive so their addresses stay unique.
    recorded: Vec<Value>,
}

impl Encoder {
    #[must_use]
    pub fn new(indent: Option<&str>) -> Self {
        Self {
            output: String::new(),
            indent: indent.filter(|indent| !indent.is_empty()).map(str::to_string),
            level: 0,
            inline: false,
            registered: 0,
            positions: FxHashMap::default(),
            recorded: Vec::new(),
        }
    }

    #[must_use]
    pub fn finish(self) -> String {
        self.output
    }

    fn start(&mut self, code: &str) {
        match &self.indent {
            Some(indent) if !self.inline => {
                for _ in 0..self.level {
                    self.output.push_str(indent);
                }
            }
            _ => {
                if !self.output.is_empty() {
                    self.output.push(' ');
                }
            }
        }
        self.output.push_str(code);
    }

    fn end(&mut self) {
        if self.indent.is_some() && !self.inline {
            self.output.push('\n');
        }
    }

    fn line(&mut self, code: &str) {
        self.start(code);
        self.end();
    }

    /// Writes the items of `f` onto the current line.
    fn inline<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let outer = std::mem::replace(&mut self.inline, true);
        let result = f(self);
        self.inline = outer;
        result
    }

    /// Writes `^<n>` if `value` was written before.
    fn backref(&mut self, value: &Value) -> bool {
        let position = identity(value).and_then(|id| self.positions.get(&id).copied());
        match position {
            Some(position) => {
                self.line(&format!("^{position}"));
                true
            }
            None => false,
        }
    }

    fn record(&mut self, value: Option<&Value>) {
        if let Some(id) = value.and_then(identity) {
            self.positions.insert(id, self.registered);
            self.recorded.extend(value.cloned());
        }
        self.registered += 1;
    }

    fn int(&mut self, i: i64) {
        self.line(&format!("i{i}"));
    }

    fn str(&mut self, s: &str) {
        self.record(None);
        self.line(&format!("S{}", str_repr(s)));
    }

    fn shared_str(&mut self, s: &Rc<str>) -> Result<(), Error> {
        self.dump(&Value::Str(Rc::clone(s)))
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => self.str(s),
            None => self.line("n"),
        }
    }

    /// A registered item whose fields are integers on the same line.
    fn numbers(&mut self, value: Option<&Value>, code: &str, numbers: &[Option<i64>]) {
        self.record(value);
        self.start(code);
        self.inline(|encoder| {
            for number in numbers {
                match number {
                    Some(i) => encoder.int(*i),
                    None => encoder.line("n"),
                }
            }
        });
        self.end();
    }

    /// `O '<type>' ... )`. Only templates are ever referenced again.
    fn object(
        &mut self,
        value: Option<&Value>,
        kind: &str,
        fields: impl FnOnce(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.record(value);
        self.start("O");
        self.inline(|encoder| encoder.str(&format!("{TYPE_PREFIX}{kind}")));
        self.end();
        self.level += 1;
        fields(self)?;
        self.level -= 1;
        self.line(")");
        Ok(())
    }

    fn container<'v>(
        &mut self,
        value: &Value,
        open: &str,
        close: &str,
        items: impl IntoIterator<Item = &'v Value>,
    ) -> Result<(), Error> {
        self.record(Some(value));
        self.line(open);
        self.level += 1;
        for item in items {
            self.dump(item)?;
        }
        self.level -= 1;
        self.line(close);
        Ok(())
    }

    pub fn dump(&mut self, value: &Value) -> Result<(), Error> {
        if self.backref(value) {
            return Ok(());
        }
        match value {
            Value::None => self.line("n"),
            Value::Bool(b) => self.line(if *b { "bT" } else { "bF" }),
            Value::Int(i) => self.int(*i),
            Value::Float(f) => self.line(&format!("f{}", float_repr(*f))),
            Value::Str(s) => {
                self.record(Some(value));
                self.line(&format!("S{}", str_repr(s)));
            }
            Value::Date(date) => {
                let fields = [
                    i64::from(date.year()),
                    i64::from(date.month()),
                    i64::from(date.day()),
                ];
                self.numbers(Some(value), "X", &fields.map(Some));
            }
            Value::DateTime(dt) => {
                let fields = [
                    i64::from(dt.year()),
                    i64::from(dt.month()),
                    i64::from(dt.day()),
                    i64::from(dt.hour()),
                    i64::from(dt.minute()),
                    i64::from(dt.second()),
                    i64::from(dt.nanosecond() / 1000),
                ];
                self.numbers(Some(value), "Z", &fields.map(Some));
            }
            Value::TimeDelta(td) => {
                let (days, seconds, micros) = timedelta_parts(*td);
                self.numbers(Some(value), "T", &[Some(days), Some(seconds), Some(micros)]);
            }
            Value::Slice(start, stop) => self.numbers(Some(value), "R", &[*start, *stop]),
            Value::List(items) => {
                let items = items.borrow().clone();
                self.container(value, "L", "]", &items)?;
            }
            Value::Set(items) => {
                let items: Vec<Value> = items.borrow().iter().cloned().collect();
                self.container(value, "Y", "}", &items)?;
            }
            Value::Dict(items) => {
                let pairs: Vec<Value> = items
                    .borrow()
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.container(value, "D", "}", &pairs)?;
            }
            Value::Template(template) => self.template(template)?,
            other => {
                return Err(Error::Ul4on {
                    message: format!("can't serialize {}", other.describe()),
                    position: self.output.len(),
                })
            }
        }
        Ok(())
    }
}

pub struct Decoder<'a> {
    input: &'a str,
    position: usize,
    /// Registered items; `None` for syntax tree nodes and for objects
    /// that are still being loaded.
    objects: Vec<Option<Value>>,
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            objects: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Ul4on {
            message: message.into(),
            position: self.position,
        }
    }

    fn raw_char(&mut self) -> Result<char, Error> {
        let c = self.input[self.position..]
            .chars()
            .next()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.position += c.len_utf8();
        Ok(c)
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.position..];
        self.position += rest.len() - rest.trim_start().len();
    }

    fn peek_char(&mut self) -> Result<char, Error> {
        self.skip_whitespace();
        self.input[self.position..]
            .chars()
            .next()
            .ok_or_else(|| self.error("unexpected end of input"))
    }

    fn next_char(&mut self) -> Result<char, Error> {
        self.skip_whitespace();
        self.raw_char()
    }

    fn expect(&mut self, expected: char) -> Result<(), Error> {
        let found = self.next_char()?;
        if found == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {found:?}")))
        }
    }

    /// Characters up to the next whitespace.
    fn word(&mut self) -> &'a str {
        let rest = &self.input[self.position..];
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        self.position += end;
        &rest[..end]
    }

    fn register(&mut self, code: char, value: Option<Value>) -> Option<usize> {
        if code.is_ascii_uppercase() {
            self.objects.push(value);
            Some(self.objects.len() - 1)
        } else {
            None
        }
    }

    fn resolve(&mut self, slot: Option<usize>, value: &Value) {
        if let Some(slot) = slot {
            self.objects[slot] = Some(value.clone());
        }
    }

    pub fn load(&mut self) -> Result<Value, Error> {
        let code = self.next_char()?;
        self.load_code(code)
    }

    fn load_code(&mut self, code: char) -> Result<Value, Error> {
        let value = match code {
            '^' => {
                let text = self.word();
                let position: usize = text
                    .parse()
                    .map_err(|_| self.error(format!("invalid backreference {text:?}")))?;
                return match self.objects.get(position) {
                    Some(Some(value)) => Ok(value.clone()),
                    Some(None) => Err(self.error(format!("backreference ^{position} can't be used as a value"))),
                    None => Err(self.error(format!("unknown backreference ^{position}"))),
                };
            }
            'n' | 'N' => Value::None,
            'b' | 'B' => match self.raw_char()? {
                'T' => Value::Bool(true),
                'F' => Value::Bool(false),
                other => return Err(self.error(format!("expected 'T' or 'F' for bool, found {other:?}"))),
            },
            'i' | 'I' => {
                let text = self.word();
                Value::Int(text.parse().map_err(|_| self.error(format!("invalid int {text:?}")))?)
            }
            'f' | 'F' => {
                let text = self.word();
                Value::Float(text.parse().map_err(|_| self.error(format!("invalid float {text:?}")))?)
            }
            's' | 'S' => Value::str(self.string()?),
            'x' | 'X' => {
                let slot = self.register(code, None);
                let [year, month, day] = self.ints()?;
                let value = Value::Date(self.date(year, month, day)?);
                self.resolve(slot, &value);
                return Ok(value);
            }
            'z' | 'Z' => {
                let slot = self.register(code, None);
                let [year, month, day, hour, minute, second, micro] = self.ints()?;
                let time = [hour, minute, second, micro].map(|part| u32::try_from(part).ok());
                let dt = match time {
                    [Some(h), Some(m), Some(s), Some(us)] => {
                        self.date(year, month, day)?.and_hms_micro_opt(h, m, s, us)
                    }
                    _ => None,
                };
                let value = Value::DateTime(dt.ok_or_else(|| self.error("invalid datetime"))?);
                self.resolve(slot, &value);
                return Ok(value);
            }
            't' | 'T' => {
                let slot = self.register(code, None);
                let [days, seconds, micros] = self.ints()?;
                let value = Value::TimeDelta(timedelta_from_parts(days, seconds, micros)?);
                self.resolve(slot, &value);
                return Ok(value);
            }
            'r' | 'R' => {
                let slot = self.register(code, None);
                let start = self.opt_int()?;
                let stop = self.opt_int()?;
                let value = Value::Slice(start, stop);
                self.resolve(slot, &value);
                return Ok(value);
            }
            'l' | 'L' => {
                let value = Value::list(Vec::new());
                self.register(code, Some(value.clone()));
                if let Value::List(items) = &value {
                    while self.peek_char()? != ']' {
                        let item = self.load()?;
                        items.borrow_mut().push(item);
                    }
                }
                self.expect(']')?;
                return Ok(value);
            }
            'd' | 'D' => {
                let value = Value::dict(IndexMap::new());
                self.register(code, Some(value.clone()));
                if let Value::Dict(items) = &value {
                    while self.peek_char()? != '}' {
                        let key = self.load()?;
                        key.check_hashable()?;
                        let item = self.load()?;
                        items.borrow_mut().insert(key, item);
                    }
                }
                self.expect('}')?;
                return Ok(value);
            }
            'y' | 'Y' => {
                let value = Value::set(IndexSet::new());
                self.register(code, Some(value.clone()));
                if let Value::Set(items) = &value {
                    while self.peek_char()? != '}' {
                        let item = self.load()?;
                        item.check_hashable()?;
                        items.borrow_mut().insert(item);
                    }
                }
                self.expect('}')?;
                return Ok(value);
            }
            'o' | 'O' => {
                let slot = self.register(code, None);
                let kind = self.type_key()?;
                if kind != "template" {
                    return Err(self.error(format!("can't load object of type {kind:?} as a value")));
                }
                let template = self.template_payload(slot)?;
                self.expect(')')?;
                return Ok(Value::Template(template));
            }
            other => return Err(self.error(format!("unknown type code {other:?}"))),
        };
        self.register(code, Some(value.clone()));
        Ok(value)
    }

    fn ints<const N: usize>(&mut self) -> Result<[i64; N], Error> {
        let mut ints = [0; N];
        for slot in &mut ints {
            *slot = match self.load()? {
                Value::Int(i) => i,
                other => return Err(self.error(format!("expected int, found {}", other.type_name()))),
            };
        }
        Ok(ints)
    }

    fn opt_int(&mut self) -> Result<Option<i64>, Error> {
        match self.load()? {
            Value::None => Ok(None),
            Value::Int(i) => Ok(Some(i)),
            other => Err(self.error(format!("expected int or None, found {}", other.type_name()))),
        }
    }

    fn date(&self, year: i64, month: i64, day: i64) -> Result<NaiveDate, Error> {
        let date = match (i32::try_from(year), u32::try_from(month), u32::try_from(day)) {
            (Ok(year), Ok(month), Ok(day)) => NaiveDate::from_ymd_opt(year, month, day),
            _ => None,
        };
        date.ok_or_else(|| self.error("invalid date"))
    }

    /// The body of a quoted string, with Python escapes resolved.
    fn string(&mut self) -> Result<String, Error> {
        let quote = self.raw_char()?;
        if quote != '\'' && quote != '"' {
            return Err(self.error(format!("expected a quote, found {quote:?}")));
        }
        let mut text = String::new();
        loop {
            let c = self.raw_char()?;
            if c == quote {
                return Ok(text);
            }
            if c != '\\' {
                text.push(c);
                continue;
            }
            let escaped = self.raw_char()?;
            let resolved = match escaped {
                '\\' | '\'' | '"' => escaped,
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                'a' => '\x07',
                'b' => '\x08',
                'f' => '\x0c',
                'v' => '\x0b',
                '0' => '\0',
                'x' => self.hex_char(2)?,
                'u' => self.hex_char(4)?,
                'U' => self.hex_char(8)?,
                '\n' => continue,
                other => {
                    text.push('\\');
                    other
                }
            };
            text.push(resolved);
        }
    }

    fn hex_char(&mut self, digits: usize) -> Result<char, Error> {
        let end = self.position + digits;
        let hex = self
            .input
            .get(self.position..end)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        let c = u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid escape sequence {hex:?}")))?;
        self.position = end;
        Ok(c)
    }

    /// The kind of an object, with the type prefix removed.
    fn type_key(&mut self) -> Result<String, Error> {
        let key = match self.load()? {
            Value::Str(key) => key,
            other => return Err(self.error(format!("expected a type name, found {}", other.type_name()))),
        };
        key.strip_prefix(TYPE_PREFIX)
            .map(str::to_string)
            .ok_or_else(|| self.error(format!("unknown object type {key:?}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::value::Vars;

    fn dict(pairs: &[(&str, Value)]) -> Value {
        let mut vars = Vars::new();
        for (key, value) in pairs {
            vars.insert((*key).to_string(), value.clone());
        }
        Value::from_vars(vars)
    }

    mod encoding {
        use super::*;

        #[test]
        fn test_scalars() {
            assert_eq!(dumps(&Value::None, None).unwrap(), "n");
            assert_eq!(dumps(&Value::Bool(true), None).unwrap(), "bT");
            assert_eq!(dumps(&Value::Int(-42), None).unwrap(), "i-42");
            assert_eq!(dumps(&Value::Float(0.5), None).unwrap(), "f0.5");
            assert_eq!(dumps(&Value::str("it's"), None).unwrap(), "S\"it's\"");
        }

        #[test]
        fn test_dates() {
            let date = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap();
            assert_eq!(dumps(&Value::Date(date), None).unwrap(), "X i2000 i2 i29");
            let dt = date.and_hms_micro_opt(1, 2, 3, 4).unwrap();
            insta::assert_snapshot!(dumps(&Value::DateTime(dt), None).unwrap(), @"Z i2000 i2 i29 i1 i2 i3 i4");
        }

        #[test]
        fn test_containers() {
            let value = dict(&[("a", Value::list(vec![Value::Int(1), Value::None]))]);
            insta::assert_snapshot!(dumps(&value, None).unwrap(), @"D S'a' L i1 n ] }");
        }

        #[test]
        fn test_indent() {
            let value = Value::list(vec![Value::Int(1), Value::Slice(Some(1), None)]);
            assert_eq!(dumps(&value, Some("\t")).unwrap(), "L\n\ti1\n\tR i1 n\n]\n");
        }

        #[test]
        fn test_shared_list_is_a_backreference() {
            let shared = Value::list(vec![Value::Int(1)]);
            let outer = Value::list(vec![shared.clone(), shared]);
            insta::assert_snapshot!(dumps(&outer, None).unwrap(), @"L L i1 ] ^1 ]");
        }

        #[test]
        fn test_unserializable() {
            let value = Value::Function(crate::builtins::Builtin::Len);
            assert!(matches!(dumps(&value, None), Err(Error::Ul4on { .. })));
        }
    }

    mod decoding {
        use super::*;

        #[test]
        fn test_round_trip() {
            let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
            let value = dict(&[
                ("list", Value::list(vec![Value::Int(1), Value::Float(2.5), Value::Bool(false)])),
                ("text", Value::str("tab\there \u{e4} 'quoted'")),
                ("date", Value::Date(date)),
                ("delta", Value::TimeDelta(timedelta_from_parts(1, 2, 3).unwrap())),
            ]);
            for indent in [None, Some("  ")] {
                let dump = dumps(&value, indent).unwrap();
                assert_eq!(loads(&dump).unwrap(), value, "{dump}");
            }
        }

        #[test]
        fn test_lowercase_codes_and_escapes() {
            assert_eq!(loads("s'\\x41\\u00e4\\n'").unwrap(), Value::str("A\u{e4}\n"));
            assert_eq!(loads("  i7  ").unwrap(), Value::Int(7));
        }

        #[test]
        fn test_backreference_shares_identity() {
            let value = loads("L L i1 ] ^1 ]").unwrap();
            let Value::List(items) = &value else {
                panic!("expected a list");
            };
            let items = items.borrow();
            let (Value::List(a), Value::List(b)) = (&items[0], &items[1]) else {
                panic!("expected nested lists");
            };
            assert!(Rc::ptr_eq(a, b));
        }

        #[test]
        fn test_errors() {
            assert!(matches!(loads("L i1"), Err(Error::Ul4on { .. })));
            assert!(matches!(loads("^3"), Err(Error::Ul4on { .. })));
            assert!(matches!(loads("q"), Err(Error::Ul4on { .. })));
            let err = loads("O S'com.example.person' )").unwrap_err();
            assert_eq!(err.code(), "U400");
        }

        #[test]
        fn test_reader_and_writer() {
            let value = Value::list(vec![Value::str("x")]);
            let mut buffer = Vec::new();
            dump(&value, &mut buffer, None).unwrap();
            assert_eq!(load(&mut buffer.as_slice()).unwrap(), value);
        }
    }
}
