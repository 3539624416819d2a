use std::fmt::Write as _;
use std::rc::Rc;

use chrono::Datelike;
use chrono::NaiveDateTime;
use chrono::Timelike;

use crate::builtins::to_dict;
use crate::builtins::Slots;
use crate::context::Context;
use crate::error::Error;
use crate::ops;
use crate::signature::Arguments;
use crate::signature::BuiltinParam;
use crate::template::Template;
use crate::value::timedelta_parts;
use crate::value::Undefined;
use crate::value::Value;

macro_rules! methods {
    ($($variant:ident => $name:literal [$($param:expr),* $(,)?]),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Method {
            $($variant),*
        }

        impl Method {
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Method::$variant => $name),*
                }
            }

            fn params(self) -> &'static [BuiltinParam] {
                match self {
                    $(Method::$variant => {
                        const PARAMS: &[BuiltinParam] = &[$($param),*];
                        PARAMS
                    }),*
                }
            }
        }
    };
}

use BuiltinParam as P;

methods! {
    Upper => "upper" [],
    Lower => "lower" [],
    Capitalize => "capitalize" [],
    Strip => "strip" [P::optional("chars")],
    LStrip => "lstrip" [P::optional("chars")],
    RStrip => "rstrip" [P::optional("chars")],
    Split => "split" [P::optional("sep"), P::optional("count")],
    RSplit => "rsplit" [P::optional("sep"), P::optional("count")],
    SplitLines => "splitlines" [P::optional("keepends")],
    StartsWith => "startswith" [P::required("prefix")],
    EndsWith => "endswith" [P::required("suffix")],
    Find => "find" [P::required("sub"), P::optional("start"), P::optional("end")],
    RFind => "rfind" [P::required("sub"), P::optional("start"), P::optional("end")],
    Replace => "replace" [P::required("old"), P::required("new"), P::optional("count")],
    Join => "join" [P::required("iterable")],
    Count => "count" [P::required("sub"), P::optional("start"), P::optional("end")],
    Append => "append" [P::args("items")],
    Insert => "insert" [P::required("pos"), P::args("items")],
    Pop => "pop" [P::optional("key"), P::optional("default")],
    Get => "get" [P::required("key"), P::optional("default")],
    Items => "items" [],
    Keys => "keys" [],
    Values => "values" [],
    Update => "update" [P::args("others"), P::kwargs("kwargs")],
    Clear => "clear" [],
    Add => "add" [P::args("items")],
    Year => "year" [],
    Month => "month" [],
    Day => "day" [],
    Hour => "hour" [],
    Minute => "minute" [],
    Second => "second" [],
    Microsecond => "microsecond" [],
    Weekday => "weekday" [],
    Yearday => "yearday" [],
    IsoFormat => "isoformat" [],
    Date => "date" [],
    Days => "days" [],
    Seconds => "seconds" [],
    Microseconds => "microseconds" [],
    Renders => "renders" [],
}

const STR_METHODS: &[Method] = &[
    Method::Upper,
    Method::Lower,
    Method::Capitalize,
    Method::Strip,
    Method::LStrip,
    Method::RStrip,
    Method::Split,
    Method::RSplit,
    Method::SplitLines,
    Method::StartsWith,
    Method::EndsWith,
    Method::Find,
    Method::RFind,
    Method::Replace,
    Method::Join,
    Method::Count,
];
const LIST_METHODS: &[Method] = &[
    Method::Append,
    Method::Insert,
    Method::Pop,
    Method::Count,
    Method::Find,
];
const DICT_METHODS: &[Method] = &[
    Method::Get,
    Method::Items,
    Method::Keys,
    Method::Values,
    Method::Update,
    Method::Clear,
    Method::Pop,
];
const SET_METHODS: &[Method] = &[Method::Add, Method::Clear];
const DATE_METHODS: &[Method] = &[
    Method::Year,
    Method::Month,
    Method::Day,
    Method::Weekday,
    Method::Yearday,
    Method::IsoFormat,
];
const DATETIME_METHODS: &[Method] = &[
    Method::Year,
    Method::Month,
    Method::Day,
    Method::Hour,
    Method::Minute,
    Method::Second,
    Method::Microsecond,
    Method::Weekday,
    Method::Yearday,
    Method::IsoFormat,
    Method::Date,
];
const TIMEDELTA_METHODS: &[Method] = &[Method::Days, Method::Seconds, Method::Microseconds];
const TEMPLATE_METHODS: &[Method] = &[Method::Renders];

const TEMPLATE_ATTRS: &[&str] = &["name", "source", "doc", "whitespace", "startdelim", "enddelim"];

fn methods_of(object: &Value) -> &'static [Method] {
    match object {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Date(_) => DATE_METHODS,
        Value::DateTime(_) => DATETIME_METHODS,
        Value::TimeDelta(_) => TIMEDELTA_METHODS,
        Value::Template(_) | Value::Closure(_) => TEMPLATE_METHODS,
        _ => &[],
    }
}

/// A method together with the object it was looked up on.
#[derive(Debug)]
pub struct BoundMethod {
    method: Method,
    receiver: Value,
}

impl BoundMethod {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.method.name()
    }

    #[must_use]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }
}

fn template_of(object: &Value) -> Option<&Template> {
    match object {
        Value::Template(template) => Some(template),
        Value::Closure(closure) => Some(closure.template()),
        _ => None,
    }
}

/// Builtin attributes and methods of `object`.
#[must_use]
pub fn attribute(object: &Value, name: &str) -> Option<Value> {
    if let Some(method) = methods_of(object).iter().find(|m| m.name() == name) {
        return Some(Value::Method(Rc::new(BoundMethod {
            method: *method,
            receiver: object.clone(),
        })));
    }
    let template = template_of(object)?;
    let value: Value = match name {
        "name" => template.name().into(),
        "source" => template.source().into(),
        "doc" => template.doc().into(),
        "whitespace" => template.whitespace().as_str().into(),
        "startdelim" => template.startdelim().into(),
        "enddelim" => template.enddelim().into(),
        _ => return None,
    };
    Some(value)
}

/// Everything `attribute` and the object itself answer to, for `dir()`.
#[must_use]
pub fn attribute_names(object: &Value) -> Vec<String> {
    let mut names: Vec<String> = methods_of(object)
        .iter()
        .map(|method| method.name().to_string())
        .collect();
    match object {
        Value::Template(_) | Value::Closure(_) => {
            names.extend(TEMPLATE_ATTRS.iter().map(ToString::to_string));
        }
        Value::Dict(dict) => {
            names.extend(dict.borrow().keys().filter_map(|k| k.as_str().map(str::to_string)));
        }
        Value::Object(host) => names.extend(host.attr_names()),
        _ => {}
    }
    names
}

pub(crate) fn call(
    ctx: &mut Context,
    bound: &BoundMethod,
    args: Arguments,
) -> Result<Value, Error> {
    let receiver = &bound.receiver;
    if bound.method == Method::Renders {
        return ctx.render_to_string(receiver, args).map(Value::str);
    }
    let mut args = Slots::bind(bound.method.name(), bound.method.params(), args)?;
    match receiver {
        Value::Str(s) => str_method(bound.method, s, &mut args),
        Value::List(_) => list_method(bound.method, receiver, &mut args),
        Value::Dict(_) => dict_method(bound.method, receiver, &mut args),
        Value::Set(set) => match bound.method {
            Method::Add => {
                let mut set = set.borrow_mut();
                for item in args.rest(0) {
                    item.check_hashable()?;
                    set.insert(item);
                }
                Ok(Value::None)
            }
            _ => {
                set.borrow_mut().clear();
                Ok(Value::None)
            }
        },
        Value::Date(date) => Ok(date_method(bound.method, &date.and_time(chrono::NaiveTime::MIN), true)),
        Value::DateTime(dt) => Ok(date_method(bound.method, dt, false)),
        Value::TimeDelta(td) => {
            let (days, seconds, micros) = timedelta_parts(*td);
            Ok(Value::Int(match bound.method {
                Method::Days => days,
                Method::Seconds => seconds,
                _ => micros,
            }))
        }
        other => Err(Error::type_error(format!(
            "{}() can't be called on {}",
            bound.method.name(),
            other.describe()
        ))),
    }
}

fn usize_value(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Character bounds of `s[start:end]`.
fn char_bounds(s: &str, args: &mut Slots, start: usize) -> Result<(usize, usize), Error> {
    let start_bound = ops::slice_index(&args.value(start))?;
    let end_bound = ops::slice_index(&args.value(start + 1))?;
    Ok(ops::slice_bounds(s.chars().count(), start_bound, end_bound))
}

fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let byte = |n: usize| s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    &s[byte(start)..byte(end)]
}

fn strip_chars(args: &mut Slots) -> Result<Option<Vec<char>>, Error> {
    match args.optional(0) {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(chars)) => Ok(Some(chars.chars().collect())),
        Some(other) => Err(Error::type_error(format!(
            "strip arg must be None or str, not {}",
            other.type_name()
        ))),
    }
}

fn optional_str(args: &mut Slots, index: usize) -> Result<Option<String>, Error> {
    match args.optional(index) {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.to_string())),
        Some(other) => Err(Error::type_error(format!(
            "expected str or None, not {}",
            other.type_name()
        ))),
    }
}

fn optional_count(args: &mut Slots, index: usize) -> Result<Option<usize>, Error> {
    let count = args.int(index, -1)?;
    Ok(usize::try_from(count).ok())
}

fn str_list(parts: Vec<String>) -> Value {
    Value::list(parts.into_iter().map(Value::str).collect())
}

fn str_method(method: Method, s: &str, args: &mut Slots) -> Result<Value, Error> {
    let value = match method {
        Method::Upper => Value::str(s.to_uppercase()),
        Method::Lower => Value::str(s.to_lowercase()),
        Method::Capitalize => {
            let mut chars = s.chars();
            let capitalized: String = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Value::str(capitalized)
        }
        Method::Strip | Method::LStrip | Method::RStrip => {
            let chars = strip_chars(args)?;
            let matches = |c: char| match &chars {
                Some(chars) => chars.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match method {
                Method::Strip => s.trim_matches(matches),
                Method::LStrip => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Value::str(stripped)
        }
        Method::Split | Method::RSplit => {
            let sep = optional_str(args, 0)?;
            let count = optional_count(args, 1)?;
            let from_right = method == Method::RSplit;
            let parts = match sep {
                None => split_whitespace(s, count, from_right),
                Some(sep) if sep.is_empty() => return Err(Error::value_error("empty separator")),
                Some(sep) => split_on(s, &sep, count, from_right),
            };
            str_list(parts)
        }
        Method::SplitLines => {
            let keepends = args.value(0).truthy();
            let mut lines = Vec::new();
            let mut rest = s;
            while !rest.is_empty() {
                let end = rest.find(['\n', '\r']).unwrap_or(rest.len());
                let break_len = if rest[end..].starts_with("\r\n") {
                    2
                } else {
                    usize::from(end < rest.len())
                };
                let line = if keepends { &rest[..end + break_len] } else { &rest[..end] };
                lines.push(line.to_string());
                rest = &rest[end + break_len..];
            }
            str_list(lines)
        }
        Method::StartsWith | Method::EndsWith => {
            let candidates = match args.value(0) {
                Value::Str(prefix) => vec![prefix.to_string()],
                other => other
                    .iterate()?
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| Error::type_error(format!("{}() expects strings", method.name())))?,
            };
            let found = candidates.iter().any(|candidate| {
                if method == Method::StartsWith {
                    s.starts_with(candidate.as_str())
                } else {
                    s.ends_with(candidate.as_str())
                }
            });
            Value::Bool(found)
        }
        Method::Find | Method::RFind => {
            let sub = args.str(0)?;
            let (start, end) = char_bounds(s, args, 1)?;
            let haystack = char_slice(s, start, end);
            let found = if method == Method::Find {
                haystack.find(&sub)
            } else {
                haystack.rfind(&sub)
            };
            match found {
                Some(byte) => usize_value(start + haystack[..byte].chars().count()),
                None => Value::Int(-1),
            }
        }
        Method::Count => {
            let sub = args.str(0)?;
            let (start, end) = char_bounds(s, args, 1)?;
            let haystack = char_slice(s, start, end);
            if sub.is_empty() {
                usize_value(haystack.chars().count() + 1)
            } else {
                usize_value(haystack.matches(&sub).count())
            }
        }
        Method::Replace => {
            let old = args.str(0)?;
            let new = args.str(1)?;
            match optional_count(args, 2)? {
                Some(count) => Value::str(s.replacen(&old, &new, count)),
                None => Value::str(s.replace(&old, &new)),
            }
        }
        Method::Join => {
            let parts = args
                .value(0)
                .iterate()?
                .map(|item| match item {
                    Value::Str(part) => Ok(part.to_string()),
                    other => Err(Error::type_error(format!(
                        "join() expects strings, found {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Value::str(parts.join(s))
        }
        _ => unreachable_method(method, "str")?,
    };
    Ok(value)
}

fn unreachable_method(method: Method, type_name: &str) -> Result<Value, Error> {
    Err(Error::type_error(format!(
        "{type_name} has no method {}()",
        method.name()
    )))
}

/// `str.split()` without a separator: runs of whitespace separate, and
/// leading and trailing whitespace is ignored.
fn split_whitespace(s: &str, count: Option<usize>, from_right: bool) -> Vec<String> {
    let Some(count) = count else {
        return s.split_whitespace().map(str::to_string).collect();
    };
    let mut parts = Vec::new();
    let mut rest = if from_right { s.trim_end() } else { s.trim_start() };
    while parts.len() < count && !rest.is_empty() {
        if from_right {
            let Some((pos, c)) = rest.char_indices().rev().find(|(_, c)| c.is_whitespace()) else {
                break;
            };
            parts.push(rest[pos + c.len_utf8()..].to_string());
            rest = rest[..pos].trim_end();
        } else {
            let Some(pos) = rest.find(char::is_whitespace) else {
                break;
            };
            parts.push(rest[..pos].to_string());
            rest = rest[pos..].trim_start();
        }
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    if from_right {
        parts.reverse();
    }
    parts
}

fn split_on(s: &str, sep: &str, count: Option<usize>, from_right: bool) -> Vec<String> {
    let mut parts: Vec<String> = match (count, from_right) {
        (None, _) => s.split(sep).map(str::to_string).collect(),
        (Some(count), false) => s.splitn(count + 1, sep).map(str::to_string).collect(),
        (Some(count), true) => s.rsplitn(count + 1, sep).map(str::to_string).collect(),
    };
    if count.is_some() && from_right {
        parts.reverse();
    }
    parts
}

fn list_method(method: Method, receiver: &Value, args: &mut Slots) -> Result<Value, Error> {
    let Value::List(list) = receiver else {
        return unreachable_method(method, receiver.type_name());
    };
    match method {
        Method::Append => {
            list.borrow_mut().extend(args.rest(0));
            Ok(Value::None)
        }
        Method::Insert => {
            let pos = args.int(0, 0)?;
            let items = args.rest(1);
            let mut list = list.borrow_mut();
            let (index, _) = ops::slice_bounds(list.len(), Some(pos), None);
            for (offset, item) in items.into_iter().enumerate() {
                list.insert(index + offset, item);
            }
            Ok(Value::None)
        }
        Method::Pop => {
            let pos = args.int(0, -1)?;
            let mut list = list.borrow_mut();
            let len = i64::try_from(list.len()).unwrap_or(i64::MAX);
            let index = if pos < 0 { pos + len } else { pos };
            match usize::try_from(index).ok().filter(|&i| i < list.len()) {
                Some(i) => Ok(list.remove(i)),
                None => Err(Error::Index(pos)),
            }
        }
        Method::Count => {
            let item = args.value(0);
            Ok(usize_value(list.borrow().iter().filter(|x| **x == item).count()))
        }
        Method::Find => {
            let item = args.value(0);
            let list = list.borrow();
            let start = ops::slice_index(&args.value(1))?;
            let end = ops::slice_index(&args.value(2))?;
            let (start, end) = ops::slice_bounds(list.len(), start, end);
            Ok(list[start..end]
                .iter()
                .position(|x| *x == item)
                .map_or(Value::Int(-1), |i| usize_value(start + i)))
        }
        _ => unreachable_method(method, "list"),
    }
}

fn dict_method(method: Method, receiver: &Value, args: &mut Slots) -> Result<Value, Error> {
    let Value::Dict(dict) = receiver else {
        return unreachable_method(method, receiver.type_name());
    };
    match method {
        Method::Get => {
            let key = args.value(0);
            key.check_hashable()?;
            let default = args.value(1);
            Ok(dict.borrow().get(&key).cloned().unwrap_or(default))
        }
        Method::Items => Ok(Value::list(
            dict.borrow()
                .iter()
                .map(|(k, v)| Value::list(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        Method::Keys => Ok(Value::list(dict.borrow().keys().cloned().collect())),
        Method::Values => Ok(Value::list(dict.borrow().values().cloned().collect())),
        Method::Update => {
            let mut merged = Vec::new();
            for other in args.rest(0) {
                if let Value::Dict(other) = to_dict(vec![other], Value::None)? {
                    merged.extend(other.take());
                }
            }
            if let Value::Dict(kwargs) = args.value(1) {
                merged.extend(kwargs.take());
            }
            dict.borrow_mut().extend(merged);
            Ok(Value::None)
        }
        Method::Clear => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        Method::Pop => {
            let key = args.value(0);
            key.check_hashable()?;
            let default = args.optional(1);
            let removed = dict.borrow_mut().shift_remove(&key);
            match (removed, default) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(Error::Undefined(Undefined::Key(Rc::from(key.repr())))),
            }
        }
        _ => unreachable_method(method, "dict"),
    }
}

fn date_method(method: Method, dt: &NaiveDateTime, date_only: bool) -> Value {
    match method {
        Method::Year => Value::Int(i64::from(dt.year())),
        Method::Month => Value::Int(i64::from(dt.month())),
        Method::Day => Value::Int(i64::from(dt.day())),
        Method::Hour => Value::Int(i64::from(dt.hour())),
        Method::Minute => Value::Int(i64::from(dt.minute())),
        Method::Second => Value::Int(i64::from(dt.second())),
        Method::Microsecond => Value::Int(i64::from(dt.nanosecond() / 1000)),
        Method::Weekday => Value::Int(i64::from(dt.weekday().num_days_from_monday())),
        Method::Yearday => Value::Int(i64::from(dt.ordinal())),
        Method::Date => Value::Date(dt.date()),
        _ if date_only => Value::str(dt.format("%Y-%m-%d").to_string()),
        _ => {
            let mut text = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
            let micros = dt.nanosecond() / 1000;
            if micros != 0 {
                let _ = write!(text, ".{micros:06}");
            }
            Value::str(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::value::Vars;

    fn call_method(object: &Value, name: &str, args: Arguments) -> Result<Value, Error> {
        let Some(Value::Method(method)) = attribute(object, name) else {
            panic!("{} has no method {name}", object.type_name());
        };
        let globals = Vars::new();
        let mut ctx = Context::new(&globals);
        ctx.push_frame(None, None)?;
        call(&mut ctx, &method, args)
    }

    fn strs(value: &Value) -> Vec<String> {
        value.iterate().unwrap().map(|v| v.to_str()).collect()
    }

    mod strings {
        use super::*;

        #[test]
        fn test_case() {
            let s = Value::str("hELLO wORLD");
            assert_eq!(call_method(&s, "upper", Arguments::new()).unwrap(), Value::str("HELLO WORLD"));
            assert_eq!(
                call_method(&s, "capitalize", Arguments::new()).unwrap(),
                Value::str("Hello world")
            );
        }

        #[test]
        fn test_strip() {
            let s = Value::str("xxhixx");
            assert_eq!(call_method(&s, "strip", Arguments::new().arg("x")).unwrap(), Value::str("hi"));
            assert_eq!(call_method(&s, "rstrip", Arguments::new().arg("x")).unwrap(), Value::str("xxhi"));
            let padded = Value::str("  hi\n");
            assert_eq!(call_method(&padded, "strip", Arguments::new()).unwrap(), Value::str("hi"));
        }

        #[test]
        fn test_split() {
            let s = Value::str(" a  b c ");
            assert_eq!(strs(&call_method(&s, "split", Arguments::new()).unwrap()), ["a", "b", "c"]);
            assert_eq!(
                strs(&call_method(&s, "split", Arguments::new().arg(Value::None).arg(1)).unwrap()),
                ["a", "b c "]
            );
            assert_eq!(
                strs(&call_method(&s, "rsplit", Arguments::new().arg(Value::None).arg(1)).unwrap()),
                [" a  b", "c"]
            );
            let csv = Value::str("a,b,c");
            assert_eq!(
                strs(&call_method(&csv, "rsplit", Arguments::new().arg(",").arg(1)).unwrap()),
                ["a,b", "c"]
            );
            assert!(call_method(&csv, "split", Arguments::new().arg("")).is_err());
        }

        #[test]
        fn test_splitlines() {
            let s = Value::str("a\r\nb\nc");
            assert_eq!(strs(&call_method(&s, "splitlines", Arguments::new()).unwrap()), ["a", "b", "c"]);
            assert_eq!(
                strs(&call_method(&s, "splitlines", Arguments::new().arg(true)).unwrap()),
                ["a\r\n", "b\n", "c"]
            );
        }

        #[test]
        fn test_find_counts_characters() {
            let s = Value::str("äbcäbc");
            assert_eq!(call_method(&s, "find", Arguments::new().arg("b")).unwrap(), Value::Int(1));
            assert_eq!(call_method(&s, "rfind", Arguments::new().arg("b")).unwrap(), Value::Int(4));
            assert_eq!(
                call_method(&s, "find", Arguments::new().arg("b").arg(2)).unwrap(),
                Value::Int(4)
            );
            assert_eq!(call_method(&s, "find", Arguments::new().arg("x")).unwrap(), Value::Int(-1));
            assert_eq!(call_method(&s, "count", Arguments::new().arg("bc")).unwrap(), Value::Int(2));
        }

        #[test]
        fn test_join_and_replace() {
            let sep = Value::str(", ");
            let items = Value::list(vec![Value::str("a"), Value::str("b")]);
            assert_eq!(call_method(&sep, "join", Arguments::new().arg(items)).unwrap(), Value::str("a, b"));
            let s = Value::str("aaa");
            assert_eq!(
                call_method(&s, "replace", Arguments::new().arg("a").arg("b").arg(2)).unwrap(),
                Value::str("bba")
            );
        }
    }

    mod containers {
        use super::*;

        #[test]
        fn test_list_mutation() {
            let list = Value::list(vec![Value::Int(1)]);
            call_method(&list, "append", Arguments::new().arg(2).arg(3)).unwrap();
            call_method(&list, "insert", Arguments::new().arg(0).arg(0)).unwrap();
            assert_eq!(list.repr(), "[0, 1, 2, 3]");
            assert_eq!(call_method(&list, "pop", Arguments::new()).unwrap(), Value::Int(3));
            assert_eq!(call_method(&list, "find", Arguments::new().arg(2)).unwrap(), Value::Int(2));
            assert!(matches!(
                call_method(&Value::list(vec![]), "pop", Arguments::new()),
                Err(Error::Index(-1))
            ));
        }

        #[test]
        fn test_dict_methods() {
            let dict = Value::dict(indexmap::IndexMap::new());
            call_method(&dict, "update", Arguments::new().kwarg("a", 1).kwarg("b", 2)).unwrap();
            assert_eq!(call_method(&dict, "get", Arguments::new().arg("a")).unwrap(), Value::Int(1));
            assert_eq!(call_method(&dict, "get", Arguments::new().arg("z")).unwrap(), Value::None);
            assert_eq!(call_method(&dict, "items", Arguments::new()).unwrap().repr(), "[['a', 1], ['b', 2]]");
            assert_eq!(call_method(&dict, "pop", Arguments::new().arg("a")).unwrap(), Value::Int(1));
            assert!(call_method(&dict, "pop", Arguments::new().arg("a")).is_err());
            assert_eq!(dict.repr(), "{'b': 2}");
        }

        #[test]
        fn test_dict_keys_shadow_methods() {
            let mut map = indexmap::IndexMap::new();
            map.insert(Value::str("items"), Value::Int(1));
            let dict = Value::dict(map);
            assert_eq!(ops::get_attr(&dict, "items").unwrap(), Value::Int(1));
            assert!(matches!(ops::get_attr(&dict, "keys").unwrap(), Value::Method(_)));
        }
    }

    mod dates {
        use super::*;

        #[test]
        fn test_date_methods() {
            let date = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
            assert_eq!(call_method(&date, "weekday", Arguments::new()).unwrap(), Value::Int(4));
            assert_eq!(call_method(&date, "yearday", Arguments::new()).unwrap(), Value::Int(61));
            assert_eq!(
                call_method(&date, "isoformat", Arguments::new()).unwrap(),
                Value::str("2024-03-01")
            );
            assert!(attribute(&date, "hour").is_none());
        }

        #[test]
        fn test_datetime_isoformat() {
            let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_micro_opt(8, 5, 0, 250)
                .unwrap();
            let value = Value::DateTime(dt);
            assert_eq!(
                call_method(&value, "isoformat", Arguments::new()).unwrap(),
                Value::str("2024-03-01T08:05:00.000250")
            );
            assert_eq!(call_method(&value, "hour", Arguments::new()).unwrap(), Value::Int(8));
        }
    }

    #[test]
    fn test_template_attributes() {
        let template = Template::compile("<?ul4 page?><?doc The page?>x").unwrap();
        let value = Value::Template(template);
        assert_eq!(attribute(&value, "name"), Some(Value::str("page")));
        assert_eq!(attribute(&value, "doc"), Some(Value::str("The page")));
        assert_eq!(attribute(&value, "whitespace"), Some(Value::str("keep")));
        let names = attribute_names(&value);
        assert!(names.iter().any(|n| n == "renders"));
        assert!(names.iter().any(|n| n == "source"));
    }
}
