use std::rc::Rc;

use ul4_source::Span;

use crate::ast::Expr;
use crate::error::Error;
use crate::value::Value;
use crate::value::Vars;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

impl ParamKind {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            ParamKind::PositionalOnly => "p",
            ParamKind::PositionalOrKeyword => "pk",
            ParamKind::KeywordOnly => "k",
            ParamKind::VarPositional => "*",
            ParamKind::VarKeyword => "**",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        let kind = match key {
            "p" => ParamKind::PositionalOnly,
            "pk" => ParamKind::PositionalOrKeyword,
            "k" => ParamKind::KeywordOnly,
            "*" => ParamKind::VarPositional,
            "**" => ParamKind::VarKeyword,
            _ => return None,
        };
        Some(kind)
    }

    fn is_positional(self) -> bool {
        matches!(self, ParamKind::PositionalOnly | ParamKind::PositionalOrKeyword)
    }

    fn is_keyword(self) -> bool {
        matches!(self, ParamKind::PositionalOrKeyword | ParamKind::KeywordOnly)
    }

    fn is_variadic(self) -> bool {
        matches!(self, ParamKind::VarPositional | ParamKind::VarKeyword)
    }
}

/// A parameter default. Top-level templates fold their defaults when they
/// are compiled, local templates evaluate them on every call.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamDefault {
    Value(Value),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Rc<str>,
    pub kind: ParamKind,
    pub default: Option<ParamDefault>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub span: Span,
    pub params: Vec<Param>,
}

impl Signature {
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|param| &*param.name).collect()
    }
}

/// What argument binding needs to know about a parameter.
pub trait Parameter {
    fn name(&self) -> &str;
    fn kind(&self) -> ParamKind;
    fn has_default(&self) -> bool;
}

impl Parameter for Param {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ParamKind {
        self.kind
    }

    fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Parameter of a builtin function or method.
#[derive(Clone, Copy, Debug)]
pub struct BuiltinParam {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl BuiltinParam {
    #[must_use]
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::PositionalOrKeyword,
            required: true,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::PositionalOrKeyword,
            required: false,
        }
    }

    #[must_use]
    pub const fn keyword(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::KeywordOnly,
            required: false,
        }
    }

    #[must_use]
    pub const fn args(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::VarPositional,
            required: false,
        }
    }

    #[must_use]
    pub const fn kwargs(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::VarKeyword,
            required: false,
        }
    }
}

impl Parameter for BuiltinParam {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ParamKind {
        self.kind
    }

    fn has_default(&self) -> bool {
        !self.required
    }
}

/// Evaluated call arguments, in source order.
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl Arguments {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

impl From<()> for Arguments {
    fn from((): ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Vec::new(),
        }
    }
}

impl From<Vars> for Arguments {
    fn from(vars: Vars) -> Self {
        Self {
            positional: Vec::new(),
            keyword: vars.into_iter().collect(),
        }
    }
}

/// Binds arguments to parameters.
///
/// The result has one slot per parameter. Variadic parameters always receive
/// a list or dict; other slots are `None` when the argument was omitted and
/// the parameter has a default.
pub fn bind<P: Parameter>(
    callable: &str,
    params: &[P],
    args: Arguments,
) -> Result<Vec<Option<Value>>, Error> {
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    let positional: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, param)| param.kind().is_positional())
        .map(|(i, _)| i)
        .collect();
    let var_positional = params
        .iter()
        .position(|param| param.kind() == ParamKind::VarPositional);
    let var_keyword = params
        .iter()
        .position(|param| param.kind() == ParamKind::VarKeyword);

    let given = args.positional.len();
    let mut extra = Vec::new();
    for (i, value) in args.positional.into_iter().enumerate() {
        match positional.get(i) {
            Some(&slot) => slots[slot] = Some(value),
            None if var_positional.is_some() => extra.push(value),
            None => {
                return Err(Error::TooManyArguments {
                    callable: callable.to_string(),
                    max: positional.len(),
                    given,
                })
            }
        }
    }

    let mut extra_keywords = Vars::new();
    for (name, value) in args.keyword {
        let slot = params
            .iter()
            .position(|param| param.kind().is_keyword() && param.name() == name);
        match slot {
            Some(slot) => {
                if slots[slot].is_some() {
                    return Err(Error::DuplicateArgument {
                        callable: callable.to_string(),
                        name,
                    });
                }
                slots[slot] = Some(value);
            }
            None if var_keyword.is_some() => {
                if extra_keywords.contains_key(&name) {
                    return Err(Error::DuplicateArgument {
                        callable: callable.to_string(),
                        name,
                    });
                }
                extra_keywords.insert(name, value);
            }
            None => {
                return Err(Error::UnknownKeyword {
                    callable: callable.to_string(),
                    name,
                })
            }
        }
    }

    if let Some(slot) = var_positional {
        slots[slot] = Some(Value::list(extra));
    }
    if let Some(slot) = var_keyword {
        slots[slot] = Some(Value::from_vars(extra_keywords));
    }

    for (param, slot) in params.iter().zip(&slots) {
        if slot.is_none() && !param.has_default() && !param.kind().is_variadic() {
            return Err(Error::MissingArgument {
                callable: callable.to_string(),
                name: param.name().to_string(),
            });
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn param(name: &str, kind: ParamKind, default: Option<i64>) -> Param {
        Param {
            span: Span::default(),
            name: Rc::from(name),
            kind,
            default: default.map(|i| ParamDefault::Value(Value::Int(i))),
        }
    }

    /// `(a, b=2, *c, **d)`
    fn signature() -> Vec<Param> {
        vec![
            param("a", ParamKind::PositionalOrKeyword, None),
            param("b", ParamKind::PositionalOrKeyword, Some(2)),
            param("c", ParamKind::VarPositional, None),
            param("d", ParamKind::VarKeyword, None),
        ]
    }

    mod binding {
        use super::*;

        #[test]
        fn test_defaults_and_empty_variadics() {
            let slots = bind("f", &signature(), Arguments::new().arg(1)).unwrap();
            assert_eq!(
                slots,
                vec![
                    Some(Value::Int(1)),
                    None,
                    Some(Value::list(vec![])),
                    Some(Value::dict(IndexMap::new())),
                ]
            );
        }

        #[test]
        fn test_variadics_collect_extras() {
            let args = Arguments::new().arg(1).arg(3).arg(4).kwarg("x", 5);
            let slots = bind("f", &signature(), args).unwrap();
            let mut d = IndexMap::new();
            d.insert(Value::str("x"), Value::Int(5));
            assert_eq!(
                slots,
                vec![
                    Some(Value::Int(1)),
                    Some(Value::Int(3)),
                    Some(Value::list(vec![Value::Int(4)])),
                    Some(Value::dict(d)),
                ]
            );
        }

        #[test]
        fn test_keyword_fills_positional_parameter() {
            let args = Arguments::new().kwarg("b", 7).kwarg("a", 6);
            let slots = bind("f", &signature(), args).unwrap();
            assert_eq!(slots[0], Some(Value::Int(6)));
            assert_eq!(slots[1], Some(Value::Int(7)));
        }

        #[test]
        fn test_positional_only_by_keyword_goes_to_kwargs() {
            let params = vec![
                param("a", ParamKind::PositionalOnly, Some(0)),
                param("kw", ParamKind::VarKeyword, None),
            ];
            let slots = bind("f", &params, Arguments::new().kwarg("a", 1)).unwrap();
            assert_eq!(slots[0], None);
            assert_eq!(slots[1].as_ref().unwrap().repr(), "{'a': 1}");
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn test_unknown_keyword() {
            let params = vec![param("a", ParamKind::PositionalOrKeyword, None)];
            let err = bind("f", &params, Arguments::new().arg(1).kwarg("x", 1)).unwrap_err();
            assert_eq!(
                err,
                Error::UnknownKeyword {
                    callable: "f".to_string(),
                    name: "x".to_string()
                }
            );
        }

        #[test]
        fn test_too_many_positional() {
            let params = vec![param("a", ParamKind::PositionalOrKeyword, None)];
            let err = bind("f", &params, Arguments::new().arg(1).arg(2)).unwrap_err();
            assert_eq!(
                err.to_string(),
                "f() takes at most 1 positional arguments (2 given)"
            );
        }

        #[test]
        fn test_duplicate_argument() {
            let err = bind("f", &signature(), Arguments::new().arg(1).kwarg("a", 2)).unwrap_err();
            assert!(matches!(err, Error::DuplicateArgument { name, .. } if name == "a"));

            let args = Arguments::new().arg(1).kwarg("x", 1).kwarg("x", 2);
            let err = bind("f", &signature(), args).unwrap_err();
            assert!(matches!(err, Error::DuplicateArgument { name, .. } if name == "x"));
        }

        #[test]
        fn test_missing_argument() {
            let err = bind("f", &signature(), Arguments::new()).unwrap_err();
            assert!(matches!(err, Error::MissingArgument { name, .. } if name == "a"));
        }

        #[test]
        fn test_keyword_only_required() {
            let params = [BuiltinParam::required("x"), BuiltinParam::keyword("key")];
            let slots = bind("sorted", &params, Arguments::new().arg(1)).unwrap();
            assert_eq!(slots, vec![Some(Value::Int(1)), None]);
            let err = bind("sorted", &params, Arguments::new().arg(1).arg(2)).unwrap_err();
            assert!(matches!(err, Error::TooManyArguments { max: 1, .. }));
        }
    }
}
