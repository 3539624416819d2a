//! Functions every template can call without importing anything.
//!
//! The registry is a fixed table compiled into the crate; [`Builtin::ALL`]
//! lists every entry and lookup by name never allocates.

use std::cmp::Ordering;
use std::fmt;

use chrono::Local;
use chrono::NaiveDate;
use chrono::Utc;
use indexmap::IndexMap;
use indexmap::IndexSet;
use percent_encoding::percent_decode_str;
use percent_encoding::utf8_percent_encode;
use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;
use sha2::Digest;
use sha2::Sha224;
use sha2::Sha256;
use sha2::Sha384;
use sha2::Sha512;

use crate::ast::BinaryOp;
use crate::context::Context;
use crate::error::Error;
use crate::format;
use crate::methods;
use crate::ops;
use crate::signature::bind;
use crate::signature::Arguments;
use crate::signature::BuiltinParam;
use crate::ul4on;
use crate::value::timedelta_from_parts;
use crate::value::xmlescape;
use crate::value::Value;

/// Characters `urlquote` leaves alone, like Python's `quote_plus`.
const URL_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

macro_rules! builtins {
    ($($variant:ident => $name:literal [$($param:expr),* $(,)?]),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $($variant),*
        }

        impl Builtin {
            pub const ALL: &'static [Builtin] = &[$(Builtin::$variant),*];

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Builtin::$variant => $name),*
                }
            }

            fn params(self) -> &'static [BuiltinParam] {
                match self {
                    $(Builtin::$variant => {
                        const PARAMS: &[BuiltinParam] = &[$($param),*];
                        PARAMS
                    }),*
                }
            }
        }
    };
}

use BuiltinParam as P;

builtins! {
    Bool => "bool" [P::optional("obj")],
    Int => "int" [P::optional("obj"), P::optional("base")],
    Float => "float" [P::optional("obj")],
    Str => "str" [P::optional("obj")],
    List => "list" [P::optional("iterable")],
    Set => "set" [P::optional("iterable")],
    Dict => "dict" [P::args("items"), P::kwargs("kwargs")],
    Date => "date" [P::required("year"), P::required("month"), P::required("day")],
    DateTime => "datetime" [
        P::required("year"),
        P::required("month"),
        P::required("day"),
        P::optional("hour"),
        P::optional("minute"),
        P::optional("second"),
        P::optional("microsecond"),
    ],
    TimeDelta => "timedelta" [P::optional("days"), P::optional("seconds"), P::optional("microseconds")],
    Repr => "repr" [P::required("obj")],
    Format => "format" [P::required("obj"), P::optional("fmt")],
    Sorted => "sorted" [P::required("iterable"), P::keyword("key"), P::keyword("reverse")],
    Enumerate => "enumerate" [P::required("iterable"), P::optional("start")],
    Enumfl => "enumfl" [P::required("iterable"), P::optional("start")],
    IsFirst => "isfirst" [P::required("iterable")],
    IsLast => "islast" [P::required("iterable")],
    IsFirstLast => "isfirstlast" [P::required("iterable")],
    Min => "min" [P::args("args"), P::keyword("default"), P::keyword("key")],
    Max => "max" [P::args("args"), P::keyword("default"), P::keyword("key")],
    Sum => "sum" [P::required("iterable"), P::optional("start")],
    First => "first" [P::required("iterable"), P::optional("default")],
    Last => "last" [P::required("iterable"), P::optional("default")],
    Len => "len" [P::required("sequence")],
    Range => "range" [P::args("args")],
    Reversed => "reversed" [P::required("sequence")],
    Zip => "zip" [P::args("iterables")],
    Any => "any" [P::required("iterable")],
    All => "all" [P::required("iterable")],
    Abs => "abs" [P::required("number")],
    Round => "round" [P::required("x"), P::optional("digits")],
    Chr => "chr" [P::required("i")],
    Ord => "ord" [P::required("c")],
    Hex => "hex" [P::required("number")],
    Oct => "oct" [P::required("number")],
    Bin => "bin" [P::required("number")],
    Type => "type" [P::required("obj")],
    GetAttr => "getattr" [P::required("obj"), P::required("attrname"), P::optional("default")],
    HasAttr => "hasattr" [P::required("obj"), P::required("attrname")],
    Dir => "dir" [P::required("obj")],
    IsUndefined => "isundefined" [P::required("obj")],
    IsDefined => "isdefined" [P::required("obj")],
    IsNone => "isnone" [P::required("obj")],
    IsBool => "isbool" [P::required("obj")],
    IsInt => "isint" [P::required("obj")],
    IsFloat => "isfloat" [P::required("obj")],
    IsStr => "isstr" [P::required("obj")],
    IsDate => "isdate" [P::required("obj")],
    IsDateTime => "isdatetime" [P::required("obj")],
    IsTimeDelta => "istimedelta" [P::required("obj")],
    IsList => "islist" [P::required("obj")],
    IsSet => "isset" [P::required("obj")],
    IsDict => "isdict" [P::required("obj")],
    IsTemplate => "istemplate" [P::required("obj")],
    IsFunction => "isfunction" [P::required("obj")],
    XmlEscape => "xmlescape" [P::required("obj")],
    UrlQuote => "urlquote" [P::required("string")],
    UrlUnquote => "urlunquote" [P::required("string")],
    AsJson => "asjson" [P::required("obj")],
    FromJson => "fromjson" [P::required("string")],
    AsUl4on => "asul4on" [P::required("obj"), P::optional("indent")],
    FromUl4on => "fromul4on" [P::required("dump")],
    Now => "now" [],
    UtcNow => "utcnow" [],
    Today => "today" [],
    Sha224 => "sha224" [P::required("string")],
    Sha256 => "sha256" [P::required("string")],
    Sha384 => "sha384" [P::required("string")],
    Sha512 => "sha512" [P::required("string")],
}

impl Builtin {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|builtin| builtin.name() == name)
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bound arguments of one builtin call, in parameter order.
pub(crate) struct Slots {
    callable: &'static str,
    slots: Vec<Option<Value>>,
}

impl Slots {
    pub(crate) fn bind(
        callable: &'static str,
        params: &[BuiltinParam],
        args: Arguments,
    ) -> Result<Self, Error> {
        let slots = bind(callable, params, args)?;
        Ok(Self { callable, slots })
    }

    pub(crate) fn optional(&mut self, index: usize) -> Option<Value> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub(crate) fn value(&mut self, index: usize) -> Value {
        self.optional(index).unwrap_or(Value::None)
    }

    /// The list collected by a `*args` parameter.
    pub(crate) fn rest(&mut self, index: usize) -> Vec<Value> {
        match self.optional(index) {
            Some(Value::List(items)) => items.take(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn int(&mut self, index: usize, default: i64) -> Result<i64, Error> {
        match self.optional(index) {
            None | Some(Value::None) => Ok(default),
            Some(value) => int_arg(self.callable, &value),
        }
    }

    pub(crate) fn str(&mut self, index: usize) -> Result<String, Error> {
        let value = self.value(index);
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(Error::type_error(format!(
                "{}() argument must be str, not {}",
                self.callable,
                other.type_name()
            ))),
        }
    }
}

pub(crate) fn int_arg(callable: &str, value: &Value) -> Result<i64, Error> {
    match value {
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        other => other.as_int().ok_or_else(|| {
            Error::type_error(format!(
                "{callable}() argument must be int, not {}",
                other.type_name()
            ))
        }),
    }
}

fn len_value(len: usize) -> Result<Value, Error> {
    i64::try_from(len).map(Value::Int).map_err(|_| Error::Overflow)
}

pub(crate) fn call(
    ctx: &mut Context,
    builtin: Builtin,
    args: Arguments,
    out: &mut dyn fmt::Write,
) -> Result<Value, Error> {
    let callable = builtin.name();
    let mut args = Slots::bind(callable, builtin.params(), args)?;
    match builtin {
        Builtin::Bool => Ok(Value::Bool(args.value(0).truthy())),
        Builtin::Int => to_int(args.optional(0), args.optional(1)),
        Builtin::Float => to_float(args.optional(0)),
        Builtin::Str => Ok(Value::str(args.value(0).to_str())),
        Builtin::List => match args.optional(0) {
            Some(iterable) => Ok(Value::list(iterable.iterate()?.collect())),
            None => Ok(Value::list(Vec::new())),
        },
        Builtin::Set => {
            let mut set = IndexSet::new();
            if let Some(iterable) = args.optional(0) {
                for item in iterable.iterate()? {
                    item.check_hashable()?;
                    set.insert(item);
                }
            }
            Ok(Value::set(set))
        }
        Builtin::Dict => to_dict(args.rest(0), args.value(1)),
        Builtin::Date => {
            let (year, month, day) = (args.int(0, 0)?, args.int(1, 0)?, args.int(2, 0)?);
            make_date(year, month, day).map(Value::Date)
        }
        Builtin::DateTime => {
            let date = make_date(args.int(0, 0)?, args.int(1, 0)?, args.int(2, 0)?)?;
            let time = [args.int(3, 0)?, args.int(4, 0)?, args.int(5, 0)?, args.int(6, 0)?];
            let [hour, minute, second, micro] = time.map(|part| u32::try_from(part).ok());
            hour.zip(minute)
                .zip(second.zip(micro))
                .and_then(|((h, m), (s, us))| date.and_hms_micro_opt(h, m, s, us))
                .map(Value::DateTime)
                .ok_or_else(|| Error::value_error("time out of range"))
        }
        Builtin::TimeDelta => {
            let (days, seconds, micros) = (args.int(0, 0)?, args.int(1, 0)?, args.int(2, 0)?);
            timedelta_from_parts(days, seconds, micros).map(Value::TimeDelta)
        }
        Builtin::Repr => Ok(Value::str(args.value(0).repr())),
        Builtin::Format => {
            let spec = match args.optional(1) {
                Some(Value::Str(spec)) => spec.to_string(),
                _ => String::new(),
            };
            format::format(&args.value(0), &spec).map(Value::str)
        }
        Builtin::Sorted => {
            let items: Vec<Value> = args.value(0).iterate()?.collect();
            let key = args.optional(1).filter(|key| !matches!(key, Value::None));
            let reverse = args.optional(2).is_some_and(|value| value.truthy());
            sorted(ctx, items, key.as_ref(), reverse, out).map(Value::list)
        }
        Builtin::Enumerate => {
            let iter = args.value(0).iterate()?;
            let start = args.int(1, 0)?;
            Ok(Value::iter(
                (start..).zip(iter).map(|(i, item)| Value::list(vec![Value::Int(i), item])),
            ))
        }
        Builtin::Enumfl => {
            let iter = args.value(0).iterate()?;
            let start = args.int(1, 0)?;
            Ok(Value::iter(first_last(iter).zip(start..).map(
                |((first, last, item), i)| {
                    Value::list(vec![Value::Int(i), Value::Bool(first), Value::Bool(last), item])
                },
            )))
        }
        Builtin::IsFirst => {
            let iter = args.value(0).iterate()?;
            Ok(Value::iter(first_last(iter).map(|(first, _, item)| {
                Value::list(vec![Value::Bool(first), item])
            })))
        }
        Builtin::IsLast => {
            let iter = args.value(0).iterate()?;
            Ok(Value::iter(first_last(iter).map(|(_, last, item)| {
                Value::list(vec![Value::Bool(last), item])
            })))
        }
        Builtin::IsFirstLast => {
            let iter = args.value(0).iterate()?;
            Ok(Value::iter(first_last(iter).map(|(first, last, item)| {
                Value::list(vec![Value::Bool(first), Value::Bool(last), item])
            })))
        }
        Builtin::Min | Builtin::Max => {
            let items = args.rest(0);
            let default = args.optional(1);
            let key = args.optional(2).filter(|key| !matches!(key, Value::None));
            let wanted = if builtin == Builtin::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            extreme(ctx, callable, items, default, key.as_ref(), wanted, out)
        }
        Builtin::Sum => {
            let mut total = args.optional(1).unwrap_or(Value::Int(0));
            for item in args.value(0).iterate()? {
                total = ops::binary(BinaryOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::First => {
            let default = args.value(1);
            Ok(args.value(0).iterate()?.next().unwrap_or(default))
        }
        Builtin::Last => {
            let default = args.value(1);
            Ok(args.value(0).iterate()?.last().unwrap_or(default))
        }
        Builtin::Len => len(&args.value(0)),
        Builtin::Range => range(&args.rest(0)),
        Builtin::Reversed => {
            let mut items: Vec<Value> = args.value(0).iterate()?.collect();
            items.reverse();
            Ok(Value::iter(items.into_iter()))
        }
        Builtin::Zip => {
            let mut iters = args
                .rest(0)
                .iter()
                .map(Value::iterate)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::iter(std::iter::from_fn(move || {
                if iters.is_empty() {
                    return None;
                }
                let row: Option<Vec<Value>> = iters.iter_mut().map(Iterator::next).collect();
                row.map(Value::list)
            })))
        }
        Builtin::Any => Ok(Value::Bool(args.value(0).iterate()?.any(|item| item.truthy()))),
        Builtin::All => Ok(Value::Bool(args.value(0).iterate()?.all(|item| item.truthy()))),
        Builtin::Abs => match args.value(0) {
            Value::Float(f) => Ok(Value::Float(f.abs())),
            Value::TimeDelta(td) => Ok(Value::TimeDelta(td.abs())),
            other => int_arg(callable, &other)?
                .checked_abs()
                .map(Value::Int)
                .ok_or(Error::Overflow),
        },
        Builtin::Round => {
            let digits = args.int(1, 0)?;
            round(&args.value(0), digits)
        }
        Builtin::Chr => {
            let i = args.int(0, 0)?;
            u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| Error::value_error(format!("chr() arg {i} not in range")))
        }
        Builtin::Ord => {
            let s = args.str(0)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                _ => Err(Error::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        Builtin::Hex => radix(args.int(0, 0)?, "0x", |n| format!("{n:x}")),
        Builtin::Oct => radix(args.int(0, 0)?, "0o", |n| format!("{n:o}")),
        Builtin::Bin => radix(args.int(0, 0)?, "0b", |n| format!("{n:b}")),
        Builtin::Type => Ok(Value::str(args.value(0).type_name().to_string())),
        Builtin::GetAttr => {
            let object = args.value(0);
            let name = args.str(1)?;
            let default = args.optional(2);
            match ops::get_attr(&object, &name)? {
                Value::Undefined(undefined) => match default {
                    Some(default) => Ok(default),
                    None => Ok(Value::Undefined(undefined)),
                },
                value => Ok(value),
            }
        }
        Builtin::HasAttr => {
            let object = args.value(0);
            let name = args.str(1)?;
            Ok(Value::Bool(!ops::get_attr(&object, &name)?.is_undefined()))
        }
        Builtin::Dir => Ok(Value::set(
            methods::attribute_names(&args.value(0))
                .into_iter()
                .map(Value::str)
                .collect(),
        )),
        Builtin::IsUndefined => Ok(Value::Bool(args.value(0).is_undefined())),
        Builtin::IsDefined => Ok(Value::Bool(!args.value(0).is_undefined())),
        Builtin::IsNone => Ok(Value::Bool(matches!(args.value(0), Value::None))),
        Builtin::IsBool => Ok(Value::Bool(matches!(args.value(0), Value::Bool(_)))),
        Builtin::IsInt => Ok(Value::Bool(matches!(args.value(0), Value::Int(_)))),
        Builtin::IsFloat => Ok(Value::Bool(matches!(args.value(0), Value::Float(_)))),
        Builtin::IsStr => Ok(Value::Bool(matches!(args.value(0), Value::Str(_)))),
        Builtin::IsDate => Ok(Value::Bool(matches!(args.value(0), Value::Date(_)))),
        Builtin::IsDateTime => Ok(Value::Bool(matches!(args.value(0), Value::DateTime(_)))),
        Builtin::IsTimeDelta => Ok(Value::Bool(matches!(args.value(0), Value::TimeDelta(_)))),
        Builtin::IsList => Ok(Value::Bool(matches!(args.value(0), Value::List(_)))),
        Builtin::IsSet => Ok(Value::Bool(matches!(args.value(0), Value::Set(_)))),
        Builtin::IsDict => Ok(Value::Bool(matches!(args.value(0), Value::Dict(_)))),
        Builtin::IsTemplate => Ok(Value::Bool(matches!(
            args.value(0),
            Value::Template(_) | Value::Closure(_)
        ))),
        Builtin::IsFunction => Ok(Value::Bool(matches!(
            args.value(0),
            Value::Function(_) | Value::Method(_) | Value::Template(_) | Value::Closure(_)
        ))),
        Builtin::XmlEscape => Ok(Value::str(xmlescape(&args.value(0).to_str()))),
        Builtin::UrlQuote => {
            let s = args.str(0)?;
            let quoted = utf8_percent_encode(&s, URL_SAFE).to_string();
            Ok(Value::str(quoted.replace(' ', "+")))
        }
        Builtin::UrlUnquote => {
            let s = args.str(0)?.replace('+', " ");
            Ok(Value::str(percent_decode_str(&s).decode_utf8_lossy().into_owned()))
        }
        Builtin::AsJson => {
            let json = to_json(&args.value(0))?;
            Ok(Value::str(json.to_string()))
        }
        Builtin::FromJson => {
            let s = args.str(0)?;
            let json: serde_json::Value = serde_json::from_str(&s)
                .map_err(|err| Error::value_error(format!("invalid JSON: {err}")))?;
            Ok(from_json(json))
        }
        Builtin::AsUl4on => {
            let value = args.value(0);
            let indent = match args.optional(1) {
                Some(Value::Str(indent)) => Some(indent),
                _ => None,
            };
            Ok(Value::str(ul4on::dumps(&value, indent.as_deref())?))
        }
        Builtin::FromUl4on => ul4on::loads(&args.str(0)?),
        Builtin::Now => Ok(Value::DateTime(Local::now().naive_local())),
        Builtin::UtcNow => Ok(Value::DateTime(Utc::now().naive_utc())),
        Builtin::Today => Ok(Value::Date(Local::now().date_naive())),
        Builtin::Sha224 => Ok(Value::str(format!("{:x}", Sha224::digest(args.str(0)?)))),
        Builtin::Sha256 => Ok(Value::str(format!("{:x}", Sha256::digest(args.str(0)?)))),
        Builtin::Sha384 => Ok(Value::str(format!("{:x}", Sha384::digest(args.str(0)?)))),
        Builtin::Sha512 => Ok(Value::str(format!("{:x}", Sha512::digest(args.str(0)?)))),
    }
}

/// Tags every item with whether it's the first and the last one.
fn first_last(
    iter: Box<dyn Iterator<Item = Value>>,
) -> impl Iterator<Item = (bool, bool, Value)> {
    let mut iter = iter.peekable();
    let mut first = true;
    std::iter::from_fn(move || {
        let item = iter.next()?;
        let last = iter.peek().is_none();
        let is_first = std::mem::replace(&mut first, false);
        Some((is_first, last, item))
    })
}

fn to_int(value: Option<Value>, base: Option<Value>) -> Result<Value, Error> {
    let base = match base {
        None | Some(Value::None) => None,
        Some(base) => Some(int_arg("int", &base)?),
    };
    match (value, base) {
        (None, _) => Ok(Value::Int(0)),
        (Some(Value::Str(s)), base) => {
            let base = base.unwrap_or(10);
            let radix = u32::try_from(base)
                .ok()
                .filter(|radix| (2..=36).contains(radix))
                .ok_or_else(|| Error::value_error("int() base must be >= 2 and <= 36"))?;
            let digits = s.trim().replace('_', "");
            i64::from_str_radix(&digits, radix)
                .map(Value::Int)
                .map_err(|_| {
                    Error::value_error(format!(
                        "invalid literal for int() with base {base}: {}",
                        crate::value::str_repr(&s)
                    ))
                })
        }
        (Some(_), Some(_)) => Err(Error::type_error(
            "int() can't convert non-string with explicit base",
        )),
        (Some(Value::Float(f)), None) => float_to_int(f),
        (Some(value), None) => int_arg("int", &value).map(Value::Int),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(f: f64) -> Result<Value, Error> {
    if f.is_nan() {
        return Err(Error::value_error("cannot convert float NaN to integer"));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(Error::Overflow);
    }
    Ok(Value::Int(truncated as i64))
}

#[allow(clippy::cast_precision_loss)]
fn to_float(value: Option<Value>) -> Result<Value, Error> {
    match value {
        None => Ok(Value::Float(0.0)),
        Some(Value::Float(f)) => Ok(Value::Float(f)),
        Some(Value::Str(s)) => {
            let text = s.trim();
            let parsed = match text.to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                _ => text.replace('_', "").parse().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                Error::value_error(format!(
                    "could not convert string to float: {}",
                    crate::value::str_repr(&s)
                ))
            })
        }
        Some(other) => int_arg("float", &other).map(|i| Value::Float(i as f64)),
    }
}

pub(crate) fn to_dict(items: Vec<Value>, kwargs: Value) -> Result<Value, Error> {
    if items.len() > 1 {
        return Err(Error::TooManyArguments {
            callable: "dict".to_string(),
            max: 1,
            given: items.len(),
        });
    }
    let mut dict = IndexMap::new();
    if let Some(source) = items.into_iter().next() {
        match &source {
            Value::Dict(source) => {
                dict.extend(source.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            other => {
                for pair in other.iterate()? {
                    let mut pair = pair.iterate()?;
                    let (Some(key), Some(value), None) = (pair.next(), pair.next(), pair.next())
                    else {
                        return Err(Error::type_error(
                            "dict() items must be key/value pairs",
                        ));
                    };
                    key.check_hashable()?;
                    dict.insert(key, value);
                }
            }
        }
    }
    if let Value::Dict(kwargs) = kwargs {
        dict.extend(kwargs.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(Value::dict(dict))
}

fn make_date(year: i64, month: i64, day: i64) -> Result<NaiveDate, Error> {
    let (Ok(year), Ok(month), Ok(day)) = (
        i32::try_from(year),
        u32::try_from(month),
        u32::try_from(day),
    ) else {
        return Err(Error::value_error("date out of range"));
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::value_error("date out of range"))
}

/// Keys used to order `items`: the items themselves, or `key(item)`.
fn sort_keys(
    ctx: &mut Context,
    items: &[Value],
    key: Option<&Value>,
    out: &mut dyn fmt::Write,
) -> Result<Vec<Value>, Error> {
    match key {
        None => Ok(items.to_vec()),
        Some(key) => items
            .iter()
            .map(|item| ctx.call_value(key, Arguments::from(vec![item.clone()]), out))
            .collect(),
    }
}

fn sorted(
    ctx: &mut Context,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
    out: &mut dyn fmt::Write,
) -> Result<Vec<Value>, Error> {
    let keys = sort_keys(ctx, &items, key, out)?;
    let mut pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    let mut failure = None;
    pairs.sort_by(|(a, _), (b, _)| {
        let ordering = if reverse { ops::cmp(b, a) } else { ops::cmp(a, b) };
        ordering.unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(pairs.into_iter().map(|(_, item)| item).collect()),
    }
}

fn extreme(
    ctx: &mut Context,
    callable: &str,
    args: Vec<Value>,
    default: Option<Value>,
    key: Option<&Value>,
    wanted: Ordering,
    out: &mut dyn fmt::Write,
) -> Result<Value, Error> {
    let items: Vec<Value> = match <[Value; 1]>::try_from(args) {
        Ok([iterable]) => iterable.iterate()?.collect(),
        Err(args) => args,
    };
    let keys = sort_keys(ctx, &items, key, out)?;
    let mut best: Option<(Value, Value)> = None;
    for (key, item) in keys.into_iter().zip(items) {
        best = match best {
            Some((best_key, best_item)) if ops::cmp(&key, &best_key)? != wanted => {
                Some((best_key, best_item))
            }
            _ => Some((key, item)),
        };
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Error::value_error(format!(
            "{callable}() arg is an empty sequence"
        ))),
    }
}

fn len(value: &Value) -> Result<Value, Error> {
    match value {
        Value::Str(s) => len_value(s.chars().count()),
        Value::List(items) => len_value(items.borrow().len()),
        Value::Dict(items) => len_value(items.borrow().len()),
        Value::Set(items) => len_value(items.borrow().len()),
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        other => Err(Error::type_error(format!(
            "{} has no len()",
            other.describe()
        ))),
    }
}

fn range(args: &[Value]) -> Result<Value, Error> {
    let ints = args
        .iter()
        .map(|arg| int_arg("range", arg))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(Error::type_error(format!(
                "range() expected 1 to 3 arguments, got {}",
                ints.len()
            )))
        }
    };
    if step == 0 {
        return Err(Error::value_error("range() arg 3 must not be zero"));
    }
    let mut next = Some(start);
    Ok(Value::iter(std::iter::from_fn(move || {
        let current = next?;
        let inside = if step > 0 { current < stop } else { current > stop };
        if !inside {
            next = None;
            return None;
        }
        next = current.checked_add(step);
        Some(Value::Int(current))
    })))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn round(value: &Value, digits: i64) -> Result<Value, Error> {
    let digits = i32::try_from(digits).map_err(|_| Error::Overflow)?;
    match value {
        Value::Float(f) => {
            if digits == 0 {
                return float_to_int(f.round_ties_even());
            }
            let factor = 10f64.powi(digits);
            Ok(Value::Float((f * factor).round_ties_even() / factor))
        }
        other => {
            let i = int_arg("round", other)?;
            if digits >= 0 {
                return Ok(Value::Int(i));
            }
            let factor = 10i64
                .checked_pow(digits.unsigned_abs())
                .ok_or(Error::Overflow)?;
            let rounded = (i as f64 / factor as f64).round_ties_even() as i64;
            rounded.checked_mul(factor).map(Value::Int).ok_or(Error::Overflow)
        }
    }
}

fn radix(number: i64, prefix: &str, digits: impl Fn(u64) -> String) -> Result<Value, Error> {
    let sign = if number < 0 { "-" } else { "" };
    Ok(Value::str(format!(
        "{sign}{prefix}{}",
        digits(number.unsigned_abs())
    )))
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    use serde_json::Value as Json;

    let json = match value {
        Value::Undefined(_) | Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Date(date) => Json::String(date.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::TimeDelta(td) => Json::from(td.num_microseconds().ok_or(Error::Overflow)?),
        Value::List(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Set(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Dict(items) => Json::Object(
            items
                .borrow()
                .iter()
                .map(|(k, v)| Ok((k.to_str(), to_json(v)?)))
                .collect::<Result<_, Error>>()?,
        ),
        Value::Iterator(_) => {
            let items: Vec<Value> = value.iterate()?.collect();
            return to_json(&Value::list(items));
        }
        other => {
            return Err(Error::type_error(format!(
                "{} is not JSON serializable",
                other.describe()
            )))
        }
    };
    Ok(json)
}

fn from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s),
        Json::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        Json::Object(items) => Value::dict(
            items
                .into_iter()
                .map(|(k, v)| (Value::str(k), from_json(v)))
                .collect(),
        ),
    }
}
