//! Operators and element access shared by the evaluator, constant folding
//! and the builtins.

use std::cmp::Ordering;
use std::rc::Rc;

use chrono::TimeDelta;

use crate::ast::BinaryOp;
use crate::ast::CmpOp;
use crate::ast::UnaryOp;
use crate::error::Error;
use crate::methods;
use crate::value::timedelta_parts;
use crate::value::Undefined;
use crate::value::Value;

#[derive(Clone, Copy, Debug)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Float(f) => Some(Num::Float(*f)),
            other => other.as_int().map(Num::Int),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> Error {
    Error::type_error(format!(
        "unsupported operand types for {op}: {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

fn micros(td: TimeDelta) -> Result<i64, Error> {
    td.num_microseconds().ok_or(Error::Overflow)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scale_timedelta(td: TimeDelta, factor: f64) -> Result<Value, Error> {
    let scaled = (micros(td)? as f64 * factor).round();
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(Error::Overflow);
    }
    Ok(Value::TimeDelta(TimeDelta::microseconds(scaled as i64)))
}

fn checked(result: Option<i64>) -> Result<Value, Error> {
    result.map(Value::Int).ok_or(Error::Overflow)
}

pub(crate) fn floor_div(a: i64, b: i64) -> Result<i64, Error> {
    if b == 0 {
        return Err(Error::ZeroDivision);
    }
    let quotient = a.checked_div(b).ok_or(Error::Overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

pub(crate) fn floor_mod(a: i64, b: i64) -> Result<i64, Error> {
    if b == 0 {
        return Err(Error::ZeroDivision);
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

fn float_mod(a: f64, b: f64) -> Result<f64, Error> {
    if b == 0.0 {
        return Err(Error::ZeroDivision);
    }
    Ok(a - b * (a / b).floor())
}

/// Length of `len` items repeated `count` times. Negative counts repeat
/// nothing; results that cannot be allocated are an overflow.
fn repeated_len(len: usize, count: i64) -> Result<usize, Error> {
    let count = usize::try_from(count).unwrap_or(0);
    len.checked_mul(count)
        .filter(|&total| isize::try_from(total).is_ok())
        .ok_or(Error::Overflow)
}

fn repeat_str(s: &str, count: i64) -> Result<Value, Error> {
    let total = repeated_len(s.len(), count)?;
    let mut result = String::new();
    result.try_reserve_exact(total).map_err(|_| Error::Overflow)?;
    if !s.is_empty() {
        for _ in 0..usize::try_from(count).unwrap_or(0) {
            result.push_str(s);
        }
    }
    Ok(Value::str(result))
}

fn repeat_list(items: &[Value], count: i64) -> Result<Value, Error> {
    let total = repeated_len(items.len(), count)?;
    let mut result = Vec::new();
    result.try_reserve_exact(total).map_err(|_| Error::Overflow)?;
    if !items.is_empty() {
        for _ in 0..usize::try_from(count).unwrap_or(0) {
            result.extend(items.iter().cloned());
        }
    }
    Ok(Value::list(result))
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, Error> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.truthy()));
    }
    let operand = operand.clone().defined()?;
    match (op, Num::of(&operand), &operand) {
        (UnaryOp::Neg, Some(Num::Int(i)), _) => checked(i.checked_neg()),
        (UnaryOp::Neg, Some(Num::Float(f)), _) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, None, Value::TimeDelta(td)) => Ok(Value::TimeDelta(-*td)),
        (UnaryOp::Pos, Some(Num::Int(i)), _) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Num::Float(f)), _) => Ok(Value::Float(f)),
        (UnaryOp::Pos, None, Value::TimeDelta(_)) => Ok(operand.clone()),
        (UnaryOp::BitNot, Some(Num::Int(i)), _) => Ok(Value::Int(!i)),
        _ => Err(Error::type_error(format!(
            "bad operand type for unary {}: {}",
            op.key(),
            operand.type_name()
        ))),
    }
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Error> {
    let left = left.clone().defined()?;
    let right = right.clone().defined()?;
    match op {
        BinaryOp::Add => add(&left, &right),
        BinaryOp::Sub => sub(&left, &right),
        BinaryOp::Mul => mul(&left, &right),
        BinaryOp::TrueDiv => true_div(&left, &right),
        BinaryOp::FloorDiv => floordiv(&left, &right),
        BinaryOp::Mod => modulo(&left, &right),
        BinaryOp::ShiftLeft | BinaryOp::ShiftRight => shift(op, &left, &right),
        BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::BitOr => bitwise(op, &left, &right),
    }
}

fn add(left: &Value, right: &Value) -> Result<Value, Error> {
    match (left, right, Num::of(left), Num::of(right)) {
        (_, _, Some(Num::Int(a)), Some(Num::Int(b))) => checked(a.checked_add(b)),
        (_, _, Some(a), Some(b)) => Ok(Value::Float(a.float() + b.float())),
        (Value::Str(a), Value::Str(b), ..) => Ok(Value::str(format!("{a}{b}"))),
        (Value::List(a), Value::List(b), ..) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::TimeDelta(a), Value::TimeDelta(b), ..) => a
            .checked_add(b)
            .map(Value::TimeDelta)
            .ok_or(Error::Overflow),
        (Value::Date(date), Value::TimeDelta(td), ..) | (Value::TimeDelta(td), Value::Date(date), ..) => {
            let (days, _, _) = timedelta_parts(*td);
            TimeDelta::try_days(days)
                .and_then(|delta| date.checked_add_signed(delta))
                .map(Value::Date)
                .ok_or(Error::Overflow)
        }
        (Value::DateTime(dt), Value::TimeDelta(td), ..) | (Value::TimeDelta(td), Value::DateTime(dt), ..) => dt
            .checked_add_signed(*td)
            .map(Value::DateTime)
            .ok_or(Error::Overflow),
        _ => Err(unsupported("+", left, right)),
    }
}

fn sub(left: &Value, right: &Value) -> Result<Value, Error> {
    match (left, right, Num::of(left), Num::of(right)) {
        (_, _, Some(Num::Int(a)), Some(Num::Int(b))) => checked(a.checked_sub(b)),
        (_, _, Some(a), Some(b)) => Ok(Value::Float(a.float() - b.float())),
        (Value::TimeDelta(a), Value::TimeDelta(b), ..) => a
            .checked_sub(b)
            .map(Value::TimeDelta)
            .ok_or(Error::Overflow),
        (Value::Date(a), Value::Date(b), ..) => Ok(Value::TimeDelta(a.signed_duration_since(*b))),
        (Value::DateTime(a), Value::DateTime(b), ..) => {
            Ok(Value::TimeDelta(a.signed_duration_since(*b)))
        }
        (Value::Date(date), Value::TimeDelta(td), ..) => {
            let (days, _, _) = timedelta_parts(*td);
            TimeDelta::try_days(days)
                .and_then(|delta| date.checked_sub_signed(delta))
                .map(Value::Date)
                .ok_or(Error::Overflow)
        }
        (Value::DateTime(dt), Value::TimeDelta(td), ..) => dt
            .checked_sub_signed(*td)
            .map(Value::DateTime)
            .ok_or(Error::Overflow),
        _ => Err(unsupported("-", left, right)),
    }
}

fn mul(left: &Value, right: &Value) -> Result<Value, Error> {
    match (left, right, Num::of(left), Num::of(right)) {
        (_, _, Some(Num::Int(a)), Some(Num::Int(b))) => checked(a.checked_mul(b)),
        (_, _, Some(a), Some(b)) => Ok(Value::Float(a.float() * b.float())),
        (Value::Str(s), _, _, Some(Num::Int(n))) | (_, Value::Str(s), Some(Num::Int(n)), _) => {
            repeat_str(s, n)
        }
        (Value::List(items), _, _, Some(Num::Int(n))) | (_, Value::List(items), Some(Num::Int(n)), _) => {
            repeat_list(&items.borrow(), n)
        }
        (Value::TimeDelta(td), _, _, Some(Num::Int(n))) | (_, Value::TimeDelta(td), Some(Num::Int(n)), _) => {
            micros(*td)?
                .checked_mul(n)
                .map(|us| Value::TimeDelta(TimeDelta::microseconds(us)))
                .ok_or(Error::Overflow)
        }
        (Value::TimeDelta(td), _, _, Some(Num::Float(f))) | (_, Value::TimeDelta(td), Some(Num::Float(f)), _) => {
            scale_timedelta(*td, f)
        }
        _ => Err(unsupported("*", left, right)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn true_div(left: &Value, right: &Value) -> Result<Value, Error> {
    match (left, right, Num::of(left), Num::of(right)) {
        (_, _, Some(a), Some(b)) => {
            if b.float() == 0.0 {
                return Err(Error::ZeroDivision);
            }
            Ok(Value::Float(a.float() / b.float()))
        }
        (Value::TimeDelta(td), _, _, Some(n)) => {
            if n.float() == 0.0 {
                return Err(Error::ZeroDivision);
            }
            scale_timedelta(*td, 1.0 / n.float())
        }
        (Value::TimeDelta(a), Value::TimeDelta(b), ..) => {
            let divisor = micros(*b)?;
            if divisor == 0 {
                return Err(Error::ZeroDivision);
            }
            Ok(Value::Float(micros(*a)? as f64 / divisor as f64))
        }
        _ => Err(unsupported("/", left, right)),
    }
}

fn floordiv(left: &Value, right: &Value) -> Result<Value, Error> {
    match (left, right, Num::of(left), Num::of(right)) {
        (_, _, Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Value::Int(floor_div(a, b)?)),
        (_, _, Some(a), Some(b)) => {
            if b.float() == 0.0 {
                return Err(Error::ZeroDivision);
            }
            Ok(Value::Float((a.float() / b.float()).floor()))
        }
        (Value::TimeDelta(td), _, _, Some(Num::Int(n))) => Ok(Value::TimeDelta(
            TimeDelta::microseconds(floor_div(micros(*td)?, n)?),
        )),
        (Value::TimeDelta(a), Value::TimeDelta(b), ..) => {
            Ok(Value::Int(floor_div(micros(*a)?, micros(*b)?)?))
        }
        _ => Err(unsupported("//", left, right)),
    }
}

fn modulo(left: &Value, right: &Value) -> Result<Value, Error> {
    match (left, right, Num::of(left), Num::of(right)) {
        (_, _, Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Value::Int(floor_mod(a, b)?)),
        (_, _, Some(a), Some(b)) => Ok(Value::Float(float_mod(a.float(), b.float())?)),
        (Value::TimeDelta(a), Value::TimeDelta(b), ..) => Ok(Value::TimeDelta(
            TimeDelta::microseconds(floor_mod(micros(*a)?, micros(*b)?)?),
        )),
        _ => Err(unsupported("%", left, right)),
    }
}

fn shift(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Error> {
    let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
        return Err(unsupported(op.symbol(), left, right));
    };
    // Positive amounts shift left.
    let amount = match op {
        BinaryOp::ShiftLeft => b,
        _ => b.checked_neg().ok_or(Error::Overflow)?,
    };
    if amount < 0 {
        return Ok(Value::Int(a >> amount.unsigned_abs().min(63)));
    }
    if a == 0 {
        return Ok(Value::Int(0));
    }
    if amount >= 64 {
        return Err(Error::Overflow);
    }
    i64::try_from(i128::from(a) << amount)
        .map(Value::Int)
        .map_err(|_| Error::Overflow)
}

fn bitwise(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Error> {
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        let result = match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitXor => a ^ b,
            _ => a | b,
        };
        return Ok(Value::Bool(result));
    }
    let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
        return Err(unsupported(op.symbol(), left, right));
    };
    let result = match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitXor => a ^ b,
        _ => a | b,
    };
    Ok(Value::Int(result))
}

/// Ordering used by `<`, `sorted()`, `min()` and `max()`.
pub fn cmp(left: &Value, right: &Value) -> Result<Ordering, Error> {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return Ok(match (a, b) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (a, b) => a.float().partial_cmp(&b.float()).unwrap_or(Ordering::Equal),
        });
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),
        (Value::TimeDelta(a), Value::TimeDelta(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            for (x, y) in a.iter().zip(b.iter()) {
                match cmp(x, y)? {
                    Ordering::Equal => {}
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        (Value::Undefined(undefined), _) | (_, Value::Undefined(undefined)) => {
            Err(Error::Undefined(undefined.clone()))
        }
        _ => Err(Error::type_error(format!(
            "unorderable types: {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, Error> {
    let result = match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        CmpOp::Lt => cmp(left, right)? == Ordering::Less,
        CmpOp::Le => cmp(left, right)? != Ordering::Greater,
        CmpOp::Gt => cmp(left, right)? == Ordering::Greater,
        CmpOp::Ge => cmp(left, right)? != Ordering::Less,
        CmpOp::Contains => contains(right, left)?,
        CmpOp::NotContains => !contains(right, left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    };
    Ok(Value::Bool(result))
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> Result<bool, Error> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(Error::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|x| x == item)),
        Value::Dict(dict) => Ok(dict.borrow().contains_key(item)),
        Value::Set(set) => Ok(set.borrow().contains(item)),
        Value::Object(object) => Ok(match item {
            Value::Str(name) => object.get_attr(name).is_some(),
            _ => false,
        }),
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        other => Err(Error::type_error(format!(
            "argument of type {} is not a container",
            other.type_name()
        ))),
    }
}

/// `is`: identity for containers and callables, equality for immutable
/// scalars of the same type.
#[must_use]
pub fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => a == b,
        (Value::DateTime(a), Value::DateTime(b)) => a == b,
        (Value::TimeDelta(a), Value::TimeDelta(b)) => a == b,
        (Value::Undefined(_), _) | (_, Value::Undefined(_)) => false,
        _ if std::mem::discriminant(left) == std::mem::discriminant(right) => left == right,
        _ => false,
    }
}

/// `object.name`. Dict keys win over dict methods.
pub fn get_attr(object: &Value, name: &str) -> Result<Value, Error> {
    if let Value::Undefined(undefined) = object {
        return Err(Error::Undefined(undefined.clone()));
    }
    if let Value::Dict(dict) = object {
        if let Some(value) = dict.borrow().get(&Value::str(name)) {
            return Ok(value.clone());
        }
    }
    if let Some(value) = methods::attribute(object, name) {
        return Ok(value);
    }
    if let Value::Object(host) = object {
        if let Some(value) = host.get_attr(name) {
            return Ok(value);
        }
    }
    Ok(Value::Undefined(Undefined::Attr(Rc::from(name))))
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

/// `object[index]`.
pub fn get_item(object: &Value, index: &Value) -> Result<Value, Error> {
    if let Value::Slice(start, stop) = index {
        return get_slice(object, *start, *stop);
    }
    match object {
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        Value::Dict(dict) => {
            index.check_hashable()?;
            Ok(dict
                .borrow()
                .get(index)
                .cloned()
                .unwrap_or_else(|| Value::Undefined(Undefined::Key(Rc::from(index.repr())))))
        }
        Value::Object(host) => Ok(host
            .get_item(index)
            .unwrap_or_else(|| Value::Undefined(Undefined::Key(Rc::from(index.repr()))))),
        Value::Str(_) | Value::List(_) => {
            let Some(i) = index.as_int() else {
                return Err(Error::type_error(format!(
                    "{} indices must be integers, not {}",
                    object.type_name(),
                    index.type_name()
                )));
            };
            let item = match object {
                Value::Str(s) => {
                    let len = s.chars().count();
                    normalize_index(i, len)
                        .and_then(|n| s.chars().nth(n))
                        .map(|c| Value::str(c.to_string()))
                }
                Value::List(items) => {
                    let items = items.borrow();
                    normalize_index(i, items.len()).map(|n| items[n].clone())
                }
                _ => None,
            };
            item.ok_or(Error::Index(i))
        }
        other => Err(Error::type_error(format!(
            "{} is not subscriptable",
            other.describe()
        ))),
    }
}

/// Python slice bounds, clamped to `0..=len`.
pub(crate) fn slice_bounds(len: usize, start: Option<i64>, stop: Option<i64>) -> (usize, usize) {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |i: i64| {
        let i = if i < 0 { i.saturating_add(len_i).max(0) } else { i.min(len_i) };
        usize::try_from(i).unwrap_or(0)
    };
    let start = start.map_or(0, clamp);
    let stop = stop.map_or(len, clamp);
    (start, stop.max(start))
}

/// `object[start:stop]`.
pub fn get_slice(object: &Value, start: Option<i64>, stop: Option<i64>) -> Result<Value, Error> {
    match object {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, stop) = slice_bounds(chars.len(), start, stop);
            Ok(Value::str(chars[start..stop].iter().collect::<String>()))
        }
        Value::List(items) => {
            let items = items.borrow();
            let (start, stop) = slice_bounds(items.len(), start, stop);
            Ok(Value::list(items[start..stop].to_vec()))
        }
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        other => Err(Error::type_error(format!(
            "{} can't be sliced",
            other.describe()
        ))),
    }
}

/// Converts a slice bound; `None` and undefined mean "open".
pub(crate) fn slice_index(value: &Value) -> Result<Option<i64>, Error> {
    match value {
        Value::None | Value::Undefined(_) => Ok(None),
        other => other.as_int().map(Some).ok_or_else(|| {
            Error::type_error(format!(
                "slice indices must be integers or None, not {}",
                other.type_name()
            ))
        }),
    }
}

pub fn set_attr(object: &Value, name: &str, value: Value) -> Result<(), Error> {
    match object {
        Value::Dict(dict) => {
            dict.borrow_mut().insert(Value::str(name), value);
            Ok(())
        }
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        other => Err(Error::type_error(format!(
            "can't set attribute {name:?} of {}",
            other.describe()
        ))),
    }
}

pub fn set_item(object: &Value, index: &Value, value: Value) -> Result<(), Error> {
    match object {
        Value::List(items) => {
            let Some(i) = index.as_int() else {
                return Err(Error::type_error(format!(
                    "list indices must be integers, not {}",
                    index.type_name()
                )));
            };
            let mut items = items.borrow_mut();
            let n = normalize_index(i, items.len()).ok_or(Error::Index(i))?;
            items[n] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            index.check_hashable()?;
            dict.borrow_mut().insert(index.clone(), value);
            Ok(())
        }
        Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
        other => Err(Error::type_error(format!(
            "{} doesn't support item assignment",
            other.describe()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    mod arithmetic {
        use super::*;

        #[test]
        fn test_int_ops() {
            assert_eq!(binary(BinaryOp::Add, &int(2), &int(3)).unwrap(), int(5));
            assert_eq!(binary(BinaryOp::FloorDiv, &int(-7), &int(2)).unwrap(), int(-4));
            assert_eq!(binary(BinaryOp::Mod, &int(-7), &int(2)).unwrap(), int(1));
            assert_eq!(binary(BinaryOp::Mod, &int(7), &int(-2)).unwrap(), int(-1));
            assert_eq!(
                binary(BinaryOp::TrueDiv, &int(7), &int(2)).unwrap(),
                Value::Float(3.5)
            );
            assert_eq!(binary(BinaryOp::ShiftLeft, &int(1), &int(4)).unwrap(), int(16));
            assert_eq!(binary(BinaryOp::ShiftRight, &int(-16), &int(2)).unwrap(), int(-4));
            assert_eq!(binary(BinaryOp::BitXor, &int(6), &int(3)).unwrap(), int(5));
        }

        #[test]
        fn test_errors() {
            assert_eq!(
                binary(BinaryOp::TrueDiv, &int(1), &int(0)).unwrap_err(),
                Error::ZeroDivision
            );
            assert_eq!(
                binary(BinaryOp::Add, &int(i64::MAX), &int(1)).unwrap_err(),
                Error::Overflow
            );
            assert_eq!(
                binary(BinaryOp::Add, &int(1), &Value::str("a"))
                    .unwrap_err()
                    .to_string(),
                "unsupported operand types for +: int and str"
            );
        }

        #[test]
        fn test_huge_repetition_is_an_overflow() {
            assert_eq!(
                binary(BinaryOp::Mul, &Value::str("ab"), &int(i64::MAX)).unwrap_err(),
                Error::Overflow
            );
            assert_eq!(
                binary(BinaryOp::Mul, &int(i64::MAX), &Value::str("x")).unwrap_err(),
                Error::Overflow
            );
            let list = Value::list(vec![int(1), int(2)]);
            assert_eq!(
                binary(BinaryOp::Mul, &list, &int(i64::MAX)).unwrap_err(),
                Error::Overflow
            );
        }

        #[test]
        fn test_repetition() {
            assert_eq!(binary(BinaryOp::Mul, &Value::str("ab"), &int(3)).unwrap(), Value::str("ababab"));
            assert_eq!(binary(BinaryOp::Mul, &int(-1), &Value::str("ab")).unwrap(), Value::str(""));
            let list = Value::list(vec![int(1)]);
            assert_eq!(binary(BinaryOp::Mul, &list, &int(2)).unwrap().repr(), "[1, 1]");
            let empty = Value::list(vec![]);
            assert_eq!(binary(BinaryOp::Mul, &empty, &int(i64::MAX)).unwrap().repr(), "[]");
        }

        #[test]
        fn test_sequences() {
            assert_eq!(
                binary(BinaryOp::Mul, &Value::str("ab"), &int(3)).unwrap(),
                Value::str("ababab")
            );
            let list = binary(
                BinaryOp::Add,
                &Value::list(vec![int(1)]),
                &Value::list(vec![int(2)]),
            )
            .unwrap();
            assert_eq!(list.repr(), "[1, 2]");
        }

        #[test]
        fn test_dates() {
            let date = Value::Date(NaiveDate::from_ymd_opt(2000, 2, 28).unwrap());
            let day = Value::TimeDelta(TimeDelta::days(1));
            assert_eq!(binary(BinaryOp::Add, &date, &day).unwrap().repr(), "@(2000-02-29)");
            let later = Value::Date(NaiveDate::from_ymd_opt(2000, 3, 1).unwrap());
            assert_eq!(
                binary(BinaryOp::Sub, &later, &date).unwrap(),
                Value::TimeDelta(TimeDelta::days(2))
            );
            assert_eq!(
                binary(BinaryOp::Mul, &day, &int(2)).unwrap(),
                Value::TimeDelta(TimeDelta::days(2))
            );
        }

        #[test]
        fn test_unary() {
            assert_eq!(unary(UnaryOp::Neg, &int(3)).unwrap(), int(-3));
            assert_eq!(unary(UnaryOp::BitNot, &int(0)).unwrap(), int(-1));
            assert_eq!(unary(UnaryOp::Not, &Value::None).unwrap(), Value::Bool(true));
            assert!(unary(UnaryOp::Neg, &Value::str("x")).is_err());
        }
    }

    mod access {
        use indexmap::IndexMap;

        use super::*;

        #[test]
        fn test_item_negative_index() {
            let list = Value::list(vec![int(1), int(2), int(3)]);
            assert_eq!(get_item(&list, &int(-1)).unwrap(), int(3));
            assert_eq!(get_item(&list, &int(3)).unwrap_err(), Error::Index(3));
            assert_eq!(get_item(&Value::str("äbc"), &int(0)).unwrap(), Value::str("ä"));
        }

        #[test]
        fn test_missing_key_is_undefined() {
            let dict = Value::dict(IndexMap::new());
            let value = get_item(&dict, &Value::str("x")).unwrap();
            assert!(value.is_undefined());
            assert_eq!(
                value.defined().unwrap_err().to_string(),
                "undefined key 'x'"
            );
        }

        #[test]
        fn test_dict_key_as_attribute() {
            let mut map = IndexMap::new();
            map.insert(Value::str("items"), int(1));
            let dict = Value::dict(map);
            assert_eq!(get_attr(&dict, "items").unwrap(), int(1));
            assert!(get_attr(&dict, "nope").unwrap().is_undefined());
        }

        #[test]
        fn test_slices() {
            let s = Value::str("hello");
            assert_eq!(get_slice(&s, Some(1), Some(-1)).unwrap(), Value::str("ell"));
            assert_eq!(get_slice(&s, Some(-100), None).unwrap(), Value::str("hello"));
            assert_eq!(get_slice(&s, Some(4), Some(2)).unwrap(), Value::str(""));
        }

        #[test]
        fn test_set_item() {
            let list = Value::list(vec![int(1)]);
            set_item(&list, &int(-1), int(5)).unwrap();
            assert_eq!(list.repr(), "[5]");
            assert!(set_item(&list, &int(1), int(5)).is_err());
        }
    }

    mod comparison {
        use super::*;

        #[test]
        fn test_ordering() {
            assert_eq!(cmp(&int(1), &Value::Float(1.5)).unwrap(), Ordering::Less);
            assert_eq!(
                cmp(&Value::list(vec![int(1), int(2)]), &Value::list(vec![int(1)])).unwrap(),
                Ordering::Greater
            );
            assert!(cmp(&int(1), &Value::str("1")).is_err());
        }

        #[test]
        fn test_contains() {
            assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
            assert!(contains(&Value::list(vec![int(1)]), &Value::Float(1.0)).unwrap());
            assert!(contains(&int(1), &int(1)).is_err());
        }

        #[test]
        fn test_identity() {
            let list = Value::list(vec![]);
            assert!(identical(&list, &list.clone()));
            assert!(!identical(&list, &Value::list(vec![])));
            assert!(identical(&Value::None, &Value::None));
        }
    }
}
