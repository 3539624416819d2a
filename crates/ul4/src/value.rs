use std::cell::RefCell;
use std::fmt;
use std::fmt::Write as _;
use std::hash::Hash;
use std::hash::Hasher;
use std::rc::Rc;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::TimeDelta;
use chrono::Timelike;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::builtins::Builtin;
use crate::error::Error;
use crate::methods::BoundMethod;
use crate::template::Closure;
use crate::template::Template;

/// Variables visible to a template, in assignment order.
pub type Vars = IndexMap<String, Value>;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<IndexMap<Value, Value>>>;
pub type SetRef = Rc<RefCell<IndexSet<Value>>>;

/// The result of looking up something that isn't there.
///
/// Undefined values are falsy and print as the empty string; they only fail
/// once something needs their value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Undefined {
    Variable(Rc<str>),
    Key(Rc<str>),
    Attr(Rc<str>),
    Index(i64),
}

impl fmt::Display for Undefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Undefined::Variable(name) => write!(f, "undefined variable {}", str_repr(name)),
            Undefined::Key(key) => write!(f, "undefined key {key}"),
            Undefined::Attr(name) => write!(f, "undefined attribute {}", str_repr(name)),
            Undefined::Index(index) => write!(f, "undefined index {index}"),
        }
    }
}

/// Record-like host objects, such as database rows, exposed to templates.
pub trait Object: fmt::Debug {
    fn type_name(&self) -> &str;

    fn get_attr(&self, name: &str) -> Option<Value>;

    fn get_item(&self, key: &Value) -> Option<Value> {
        match key {
            Value::Str(name) => self.get_attr(name),
            _ => None,
        }
    }

    fn attr_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A lazily evaluated sequence, consumed by the first loop over it.
pub struct ValueIter(Box<dyn Iterator<Item = Value>>);

impl ValueIter {
    pub fn new(iter: impl Iterator<Item = Value> + 'static) -> Self {
        Self(Box::new(iter))
    }
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.0.next()
    }
}

impl fmt::Debug for ValueIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueIter")
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined(Undefined),
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
    Slice(Option<i64>, Option<i64>),
    List(ListRef),
    Dict(DictRef),
    Set(SetRef),
    Template(Template),
    Closure(Rc<Closure>),
    Function(Builtin),
    Method(Rc<BoundMethod>),
    Iterator(Rc<RefCell<ValueIter>>),
    Object(Rc<dyn Object>),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn dict(items: IndexMap<Value, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn set(items: IndexSet<Value>) -> Self {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    pub fn iter(iter: impl Iterator<Item = Value> + 'static) -> Self {
        Value::Iterator(Rc::new(RefCell::new(ValueIter::new(iter))))
    }

    pub fn object(object: impl Object + 'static) -> Self {
        Value::Object(Rc::new(object))
    }

    /// A dict keyed by strings, e.g. collected `**kwargs`.
    #[must_use]
    pub fn from_vars(vars: Vars) -> Self {
        Value::dict(
            vars.into_iter()
                .map(|(name, value)| (Value::str(name), value))
                .collect(),
        )
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Value::Undefined(_) => "undefined",
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::TimeDelta(_) => "timedelta",
            Value::Slice(..) => "slice",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Template(_) | Value::Closure(_) => "template",
            Value::Function(_) => "function",
            Value::Method(_) => "method",
            Value::Iterator(_) => "iterator",
            Value::Object(object) => object.type_name(),
        }
    }

    /// How the value is named in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Value::Undefined(undefined) => undefined.to_string(),
            other => format!("object of type {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined(_))
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined(_) | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::TimeDelta(td) => !td.is_zero(),
            Value::List(list) => !list.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            _ => true,
        }
    }

    #[must_use]
    pub fn is_hashable(&self) -> bool {
        !matches!(
            self,
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Iterator(_)
        )
    }

    pub(crate) fn check_hashable(&self) -> Result<(), Error> {
        if self.is_hashable() {
            Ok(())
        } else {
            Err(Error::Unhashable(self.type_name().to_string()))
        }
    }

    /// Integer value of ints and bools.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Fail with the stored reason if this is an undefined value.
    pub(crate) fn defined(self) -> Result<Value, Error> {
        match self {
            Value::Undefined(undefined) => Err(Error::Undefined(undefined)),
            other => Ok(other),
        }
    }

    pub fn iterate(&self) -> Result<Box<dyn Iterator<Item = Value>>, Error> {
        match self {
            Value::Str(s) => {
                let chars: Vec<Value> = s.chars().map(|c| Value::str(c.to_string())).collect();
                Ok(Box::new(chars.into_iter()))
            }
            Value::List(list) => Ok(Box::new(list.borrow().clone().into_iter())),
            Value::Dict(dict) => {
                let keys: Vec<Value> = dict.borrow().keys().cloned().collect();
                Ok(Box::new(keys.into_iter()))
            }
            Value::Set(set) => {
                let items: Vec<Value> = set.borrow().iter().cloned().collect();
                Ok(Box::new(items.into_iter()))
            }
            Value::Iterator(iter) => {
                let iter = Rc::clone(iter);
                Ok(Box::new(std::iter::from_fn(move || iter.borrow_mut().next())))
            }
            other => Err(Error::NotIterable(other.describe())),
        }
    }

    /// The text `<?print?>` outputs for this value.
    #[must_use]
    pub fn to_str(&self) -> String {
        match self {
            Value::Undefined(_) | Value::None => String::new(),
            Value::Str(s) => s.to_string(),
            Value::Date(date) => date.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => {
                let mut text = dt.format("%Y-%m-%d %H:%M:%S").to_string();
                push_micros(&mut text, dt);
                text
            }
            Value::TimeDelta(td) => timedelta_str(*td),
            other => other.repr(),
        }
    }

    /// Source-like representation, as produced by `repr()`.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Value::Undefined(_) => "undefined".to_string(),
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::Date(date) => date.format("@(%Y-%m-%d)").to_string(),
            Value::DateTime(dt) => {
                let mut text = dt.format("@(%Y-%m-%dT%H:%M:%S").to_string();
                push_micros(&mut text, dt);
                text.push(')');
                text
            }
            Value::TimeDelta(td) => timedelta_repr(*td),
            Value::Slice(start, stop) => format!(
                "slice({}, {})",
                start.map_or("None".to_string(), |i| i.to_string()),
                stop.map_or("None".to_string(), |i| i.to_string())
            ),
            Value::List(list) => {
                let items: Vec<String> = list.borrow().iter().map(Value::repr).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Dict(dict) => {
                let items: Vec<String> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Set(set) => {
                let set = set.borrow();
                if set.is_empty() {
                    "{/}".to_string()
                } else {
                    let items: Vec<String> = set.iter().map(Value::repr).collect();
                    format!("{{{}}}", items.join(", "))
                }
            }
            Value::Template(template) => match template.name() {
                Some(name) => format!("<template {}>", str_repr(name)),
                None => "<template>".to_string(),
            },
            Value::Closure(closure) => match closure.template().name() {
                Some(name) => format!("<template {}>", str_repr(name)),
                None => "<template>".to_string(),
            },
            Value::Function(builtin) => format!("<function {}>", builtin.name()),
            Value::Method(method) => format!(
                "<method {} of {}>",
                method.name(),
                method.receiver().type_name()
            ),
            Value::Iterator(_) => "<iterator>".to_string(),
            Value::Object(object) => format!("<{} object>", object.type_name()),
        }
    }
}

fn push_micros(text: &mut String, dt: &NaiveDateTime) {
    let micros = dt.nanosecond() / 1000;
    if micros != 0 {
        let _ = write!(text, ".{micros:06}");
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

#[allow(clippy::cast_precision_loss)]
fn numeric_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Float(f), other) | (other, Value::Float(f)) => {
            other.as_int().is_some_and(|i| i as f64 == *f)
        }
        _ => left.as_int() == right.as_int(),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined(a), Value::Undefined(b)) => a == b,
            (Value::None, Value::None) => true,
            (
                Value::Bool(_) | Value::Int(_) | Value::Float(_),
                Value::Bool(_) | Value::Int(_) | Value::Float(_),
            ) => numeric_eq(self, other),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::TimeDelta(a), Value::TimeDelta(b)) => a == b,
            (Value::Slice(a1, a2), Value::Slice(b1, b2)) => a1 == b1 && a2 == b2,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
            }
            (Value::Set(a), Value::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Value::Template(a), Value::Template(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Bool(b) => hash_int(i64::from(*b), state),
            Value::Int(i) => hash_int(*i, state),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    hash_int(*f as i64, state);
                } else {
                    1u8.hash(state);
                    f.to_bits().hash(state);
                }
            }
            Value::Str(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Value::Date(date) => {
                3u8.hash(state);
                date.hash(state);
            }
            Value::DateTime(dt) => {
                4u8.hash(state);
                dt.hash(state);
            }
            Value::TimeDelta(td) => {
                5u8.hash(state);
                td.hash(state);
            }
            Value::Slice(start, stop) => {
                6u8.hash(state);
                start.hash(state);
                stop.hash(state);
            }
            Value::Template(template) => {
                7u8.hash(state);
                template.addr().hash(state);
            }
            Value::Function(builtin) => {
                8u8.hash(state);
                builtin.hash(state);
            }
            other => std::mem::discriminant(other).hash(state),
        }
    }
}

fn hash_int<H: Hasher>(i: i64, state: &mut H) {
    0u8.hash(state);
    i.hash(state);
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    &str => Str,
    String => Str,
    Rc<str> => Str,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    TimeDelta => TimeDelta,
    Template => Template,
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

/// `repr()` of a float, matching the shortest round-tripping notation.
#[must_use]
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{f:e}");
        if let Some((mantissa, exponent)) = text.split_once('e') {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            return format!("{mantissa}e{sign}{digits:0>2}");
        }
        return text;
    }
    let text = f.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Quote a string, preferring single quotes.
#[must_use]
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[must_use]
pub fn xmlescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// Normalized `(days, seconds, microseconds)` with `0 <= seconds < 86400`
/// and `0 <= microseconds < 1000000`.
#[must_use]
pub fn timedelta_parts(td: TimeDelta) -> (i64, i64, i64) {
    let mut seconds = td.num_seconds();
    let mut micros = i64::from(td.subsec_nanos() / 1000);
    if micros < 0 {
        micros += MICROS_PER_SECOND;
        seconds -= 1;
    }
    (
        seconds.div_euclid(SECONDS_PER_DAY),
        seconds.rem_euclid(SECONDS_PER_DAY),
        micros,
    )
}

pub fn timedelta_from_parts(days: i64, seconds: i64, micros: i64) -> Result<TimeDelta, Error> {
    days.checked_mul(SECONDS_PER_DAY)
        .and_then(|s| s.checked_add(seconds))
        .and_then(|s| s.checked_mul(MICROS_PER_SECOND))
        .and_then(|us| us.checked_add(micros))
        .map(TimeDelta::microseconds)
        .ok_or(Error::Overflow)
}

fn timedelta_str(td: TimeDelta) -> String {
    let (days, seconds, micros) = timedelta_parts(td);
    let mut text = String::new();
    if days != 0 {
        let unit = if days.abs() == 1 { "day" } else { "days" };
        let _ = write!(text, "{days} {unit}, ");
    }
    let _ = write!(
        text,
        "{}:{:02}:{:02}",
        seconds / 3600,
        seconds / 60 % 60,
        seconds % 60
    );
    if micros != 0 {
        let _ = write!(text, ".{micros:06}");
    }
    text
}

fn timedelta_repr(td: TimeDelta) -> String {
    let (days, seconds, micros) = timedelta_parts(td);
    let parts: Vec<String> = [("days", days), ("seconds", seconds), ("microseconds", micros)]
        .into_iter()
        .filter(|(_, n)| *n != 0)
        .map(|(name, n)| format!("{name}={n}"))
        .collect();
    format!("timedelta({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod conversion {
        use super::*;

        #[test]
        fn test_to_str_scalars() {
            assert_eq!(Value::None.to_str(), "");
            assert_eq!(Value::Undefined(Undefined::Variable("x".into())).to_str(), "");
            assert_eq!(Value::Bool(true).to_str(), "True");
            assert_eq!(Value::Int(-42).to_str(), "-42");
            assert_eq!(Value::Float(1.0).to_str(), "1.0");
            assert_eq!(Value::Float(0.5).to_str(), "0.5");
            assert_eq!(Value::str("foo").to_str(), "foo");
        }

        #[test]
        fn test_float_repr_exponents() {
            assert_eq!(float_repr(1e20), "1e+20");
            assert_eq!(float_repr(1.5e-7), "1.5e-07");
            assert_eq!(float_repr(-0.0001), "-0.0001");
            assert_eq!(float_repr(f64::INFINITY), "inf");
        }

        #[test]
        fn test_str_repr_quotes() {
            assert_eq!(str_repr("foo"), "'foo'");
            assert_eq!(str_repr("it's"), "\"it's\"");
            assert_eq!(str_repr("'\""), "'\\'\"'");
            assert_eq!(str_repr("a\nb\\"), "'a\\nb\\\\'");
            assert_eq!(str_repr("\u{1}"), "'\\x01'");
        }

        #[test]
        fn test_container_repr() {
            let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
            assert_eq!(list.repr(), "[1, 'a', None]");
            let mut map = IndexMap::new();
            map.insert(Value::str("x"), Value::Int(1));
            assert_eq!(Value::dict(map).repr(), "{'x': 1}");
            assert_eq!(Value::set(IndexSet::new()).repr(), "{/}");
        }

        #[test]
        fn test_dates() {
            let date = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap();
            assert_eq!(Value::Date(date).to_str(), "2000-02-29");
            assert_eq!(Value::Date(date).repr(), "@(2000-02-29)");
            let dt = date.and_hms_micro_opt(12, 34, 56, 123).unwrap();
            assert_eq!(Value::DateTime(dt).to_str(), "2000-02-29 12:34:56.000123");
            assert_eq!(Value::DateTime(dt).repr(), "@(2000-02-29T12:34:56.000123)");
        }

        #[test]
        fn test_timedelta() {
            let td = timedelta_from_parts(1, 3661, 5).unwrap();
            assert_eq!(timedelta_parts(td), (1, 3661, 5));
            assert_eq!(Value::TimeDelta(td).to_str(), "1 day, 1:01:01.000005");
            assert_eq!(
                Value::TimeDelta(td).repr(),
                "timedelta(days=1, seconds=3661, microseconds=5)"
            );
            let negative = timedelta_from_parts(0, 0, -1).unwrap();
            assert_eq!(timedelta_parts(negative), (-1, 86_399, 999_999));
            assert_eq!(Value::TimeDelta(TimeDelta::zero()).to_str(), "0:00:00");
        }
    }

    mod semantics {
        use super::*;

        #[test]
        fn test_truthiness() {
            assert!(!Value::None.truthy());
            assert!(!Value::Undefined(Undefined::Key("'x'".into())).truthy());
            assert!(!Value::Int(0).truthy());
            assert!(Value::Float(0.1).truthy());
            assert!(!Value::str("").truthy());
            assert!(!Value::list(vec![]).truthy());
            assert!(Value::list(vec![Value::None]).truthy());
        }

        #[test]
        fn test_numeric_equality_and_hash() {
            use std::collections::hash_map::DefaultHasher;

            fn hash(value: &Value) -> u64 {
                let mut hasher = DefaultHasher::new();
                value.hash(&mut hasher);
                hasher.finish()
            }

            assert_eq!(Value::Int(1), Value::Float(1.0));
            assert_eq!(Value::Bool(true), Value::Int(1));
            assert_eq!(hash(&Value::Int(1)), hash(&Value::Float(1.0)));
            assert_eq!(hash(&Value::Bool(true)), hash(&Value::Int(1)));
            assert_ne!(Value::Int(1), Value::str("1"));
        }

        #[test]
        fn test_list_equality_is_structural() {
            let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
            let b = Value::list(vec![Value::Int(1), Value::Float(2.0)]);
            assert_eq!(a, b);
        }

        #[test]
        fn test_iterate() {
            let items: Vec<Value> = Value::str("ab").iterate().unwrap().collect();
            assert_eq!(items, vec![Value::str("a"), Value::str("b")]);
            assert!(matches!(
                Value::Int(1).iterate(),
                Err(Error::NotIterable(_))
            ));
            let undefined = Value::Undefined(Undefined::Variable("x".into()));
            match undefined.iterate() {
                Err(Error::NotIterable(what)) => assert_eq!(what, "undefined variable 'x'"),
                _ => panic!("expected NotIterable"),
            }
        }

        #[test]
        fn test_iterator_is_consumed_once() {
            let value = Value::iter(vec![Value::Int(1), Value::Int(2)].into_iter());
            assert_eq!(value.iterate().unwrap().count(), 2);
            assert_eq!(value.iterate().unwrap().count(), 0);
        }

        #[test]
        fn test_xmlescape() {
            assert_eq!(xmlescape("<a href=\"x\">&'"), "&lt;a href=&#34;x&#34;&gt;&amp;&#39;");
        }
    }
}
