use std::rc::Rc;

use rustc_hash::FxHashSet;
use ul4_source::Span;

use crate::ast::Arg;
use crate::ast::BinaryOp;
use crate::ast::CallExpr;
use crate::ast::CmpOp;
use crate::ast::Comprehension;
use crate::ast::DictItem;
use crate::ast::Expr;
use crate::ast::SeqItem;
use crate::ast::Target;
use crate::ast::UnaryOp;
use crate::error::Error;
use crate::ops;
use crate::scanner::scan;
use crate::scanner::ExprToken;
use crate::scanner::TokenKind;
use crate::signature::Param;
use crate::signature::ParamDefault;
use crate::signature::ParamKind;
use crate::signature::Signature;
use crate::value::Value;

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "is", "if", "else", "for"];

const AUGMENTED: &[(&str, BinaryOp)] = &[
    ("+=", BinaryOp::Add),
    ("-=", BinaryOp::Sub),
    ("*=", BinaryOp::Mul),
    ("/=", BinaryOp::TrueDiv),
    ("//=", BinaryOp::FloorDiv),
    ("%=", BinaryOp::Mod),
    ("<<=", BinaryOp::ShiftLeft),
    (">>=", BinaryOp::ShiftRight),
    ("&=", BinaryOp::BitAnd),
    ("^=", BinaryOp::BitXor),
    ("|=", BinaryOp::BitOr),
];

/// The content of a `<?code?>` tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Expr(Expr),
    Set(Target, Expr),
    Modify(BinaryOp, Target, Expr),
}

/// The content of a `<?ul4?>` or `<?def?>` tag.
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    pub name: Option<Rc<str>>,
    pub signature: Option<Signature>,
}

pub fn parse_expr(source: &str, code: Span) -> Result<Expr, Error> {
    let mut parser = Parser::new(source, code)?;
    let expr = parser.expr()?;
    parser.finish()?;
    Ok(expr)
}

pub fn parse_statement(source: &str, code: Span) -> Result<Statement, Error> {
    let mut parser = Parser::new(source, code)?;
    let statement = parser.statement()?;
    parser.finish()?;
    Ok(statement)
}

/// `target in container` of a `<?for?>` tag.
pub fn parse_for(source: &str, code: Span) -> Result<(Target, Expr), Error> {
    let mut parser = Parser::new(source, code)?;
    let target = parser.target_list()?;
    parser.expect_name("in")?;
    let container = parser.expr()?;
    parser.finish()?;
    Ok((target, container))
}

/// A render tag's expression, which must be a call.
pub fn parse_call(source: &str, code: Span, kind: &'static str) -> Result<CallExpr, Error> {
    match parse_expr(source, code)? {
        Expr::Call(call) => Ok(call),
        other => Err(Error::InvalidRenderTarget {
            kind,
            span: other.span(),
        }),
    }
}

/// `name`, `name(signature)`, `(signature)` or nothing.
pub fn parse_declaration(source: &str, code: Span) -> Result<Declaration, Error> {
    let mut parser = Parser::new(source, code)?;
    let name = match parser.peek().kind {
        TokenKind::Name(_) => Some(parser.name()?.1),
        _ => None,
    };
    let signature = if parser.check("(") {
        Some(parser.signature()?)
    } else {
        None
    };
    parser.finish()?;
    Ok(Declaration { name, signature })
}

struct Parser {
    tokens: Vec<ExprToken>,
    current: usize,
}

impl Parser {
    fn new(source: &str, code: Span) -> Result<Self, Error> {
        Ok(Self {
            tokens: scan(source, code)?,
            current: 0,
        })
    }

    fn peek(&self) -> &ExprToken {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &ExprToken {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.current + offset).min(last)]
    }

    fn advance(&mut self) -> ExprToken {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, symbol: &str) -> bool {
        self.peek().is_symbol(symbol)
    }

    fn eat(&mut self, symbol: &str) -> Option<Span> {
        self.check(symbol).then(|| self.advance().span)
    }

    fn eat_name(&mut self, name: &str) -> Option<Span> {
        self.peek().is_name(name).then(|| self.advance().span)
    }

    fn expect(&mut self, symbol: &str) -> Result<Span, Error> {
        self.eat(symbol)
            .ok_or_else(|| self.unexpected(&format!("expected {symbol:?}")))
    }

    fn expect_name(&mut self, name: &str) -> Result<Span, Error> {
        self.eat_name(name)
            .ok_or_else(|| self.unexpected(&format!("expected {name:?}")))
    }

    fn finish(&self) -> Result<(), Error> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("expected end of expression"))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Eof => "end of expression".to_string(),
            TokenKind::Name(name) => format!("{name:?}"),
            TokenKind::Literal(value) => value.repr(),
            TokenKind::Symbol(symbol) => format!("{symbol:?}"),
        };
        Error::syntax(format!("{expected}, found {found}"), token.span)
    }

    fn name(&mut self) -> Result<(Span, Rc<str>), Error> {
        match &self.peek().kind {
            TokenKind::Name(name) if !KEYWORDS.contains(&&**name) => {
                let name = name.clone();
                Ok((self.advance().span, name))
            }
            _ => Err(self.unexpected("expected a name")),
        }
    }

    fn statement(&mut self) -> Result<Statement, Error> {
        let lhs = self.expr_list()?;
        if self.eat("=").is_some() {
            let target = to_target(lhs)?;
            let value = self.expr_list()?;
            return Ok(Statement::Set(target, value));
        }
        let augmented = AUGMENTED
            .iter()
            .find(|(symbol, _)| self.check(symbol))
            .map(|(_, op)| *op);
        if let Some(op) = augmented {
            self.advance();
            let target = match to_target(lhs)? {
                Target::Unpack { span, .. } => {
                    return Err(Error::syntax(
                        format!("can't use {}= with multiple targets", op.symbol()),
                        span,
                    ))
                }
                target => target,
            };
            let value = self.expr()?;
            return Ok(Statement::Modify(op, target, value));
        }
        Ok(Statement::Expr(lhs))
    }

    /// `a, b, c` becomes a list, a single expression stays as it is.
    fn expr_list(&mut self) -> Result<Expr, Error> {
        let first = self.expr()?;
        if !self.check(",") {
            return Ok(first);
        }
        let mut span = first.span();
        let mut items = vec![SeqItem::Item(first)];
        while self.eat(",").is_some() {
            if self.is_at_end() || self.check("=") {
                break;
            }
            let item = self.expr()?;
            span = span.cover(item.span());
            items.push(SeqItem::Item(item));
        }
        Ok(Expr::List { span, items })
    }

    fn target_list(&mut self) -> Result<Target, Error> {
        let first = self.postfix()?;
        if !self.check(",") {
            return to_target(first);
        }
        let mut span = first.span();
        let mut targets = vec![to_target(first)?];
        while self.eat(",").is_some() {
            if self.peek().is_name("in") {
                break;
            }
            let target = to_target(self.postfix()?)?;
            span = span.cover(target.span());
            targets.push(target);
        }
        Ok(Target::Unpack { span, targets })
    }

    fn expr(&mut self) -> Result<Expr, Error> {
        let then = self.or()?;
        if self.eat_name("if").is_none() {
            return Ok(then);
        }
        let condition = self.or()?;
        self.expect_name("else")?;
        let otherwise = self.expr()?;
        Ok(fold_if(then, condition, otherwise))
    }

    fn or(&mut self) -> Result<Expr, Error> {
        let mut left = self.and()?;
        while self.eat_name("or").is_some() {
            let right = self.and()?;
            left = fold_logical(false, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, Error> {
        let mut left = self.not()?;
        while self.eat_name("and").is_some() {
            let right = self.not()?;
            left = fold_logical(true, left, right);
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, Error> {
        match self.eat_name("not") {
            Some(start) => {
                let operand = self.not()?;
                Ok(fold_unary(start, UnaryOp::Not, operand))
            }
            None => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<Expr, Error> {
        let mut left = self.bitor()?;
        loop {
            let next = self.peek_at(1);
            let (op, width) = match &self.peek().kind {
                TokenKind::Symbol("==") => (CmpOp::Eq, 1),
                TokenKind::Symbol("!=") => (CmpOp::Ne, 1),
                TokenKind::Symbol("<") => (CmpOp::Lt, 1),
                TokenKind::Symbol("<=") => (CmpOp::Le, 1),
                TokenKind::Symbol(">") => (CmpOp::Gt, 1),
                TokenKind::Symbol(">=") => (CmpOp::Ge, 1),
                TokenKind::Name(name) if &**name == "in" => (CmpOp::Contains, 1),
                TokenKind::Name(name) if &**name == "not" && next.is_name("in") => {
                    (CmpOp::NotContains, 2)
                }
                TokenKind::Name(name) if &**name == "is" && next.is_name("not") => (CmpOp::IsNot, 2),
                TokenKind::Name(name) if &**name == "is" => (CmpOp::Is, 1),
                _ => return Ok(left),
            };
            for _ in 0..width {
                self.advance();
            }
            let right = self.bitor()?;
            left = fold_compare(op, left, right);
        }
    }

    fn binary_level(
        &mut self,
        operators: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, Error>,
    ) -> Result<Expr, Error> {
        let mut left = next(self)?;
        while let Some(op) = operators
            .iter()
            .find(|(symbol, _)| self.check(symbol))
            .map(|(_, op)| *op)
        {
            self.advance();
            let right = next(self)?;
            left = fold_binary(op, left, right);
        }
        Ok(left)
    }

    fn bitor(&mut self) -> Result<Expr, Error> {
        self.binary_level(&[("|", BinaryOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> Result<Expr, Error> {
        self.binary_level(&[("^", BinaryOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> Result<Expr, Error> {
        self.binary_level(&[("&", BinaryOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr, Error> {
        self.binary_level(
            &[("<<", BinaryOp::ShiftLeft), (">>", BinaryOp::ShiftRight)],
            Self::arith,
        )
    }

    fn arith(&mut self) -> Result<Expr, Error> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, Error> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::TrueDiv),
                ("//", BinaryOp::FloorDiv),
                ("%", BinaryOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, Error> {
        let op = match self.peek().kind {
            TokenKind::Symbol("-") => UnaryOp::Neg,
            TokenKind::Symbol("+") => UnaryOp::Pos,
            TokenKind::Symbol("~") => UnaryOp::BitNot,
            _ => return self.postfix(),
        };
        let start = self.advance().span;
        let operand = self.unary()?;
        Ok(fold_unary(start, op, operand))
    }

    fn postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(".").is_some() {
                let (name_span, name) = self.name()?;
                expr = Expr::Attr {
                    span: expr.span().cover(name_span),
                    object: Box::new(expr),
                    name,
                };
            } else if self.eat("[").is_some() {
                expr = self.index(expr)?;
            } else if self.eat("(").is_some() {
                expr = self.call(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn index(&mut self, object: Expr) -> Result<Expr, Error> {
        let start = if self.check(":") {
            None
        } else {
            Some(self.expr()?)
        };
        if self.eat(":").is_none() {
            let close = self.expect("]")?;
            let index = start.ok_or_else(|| self.unexpected("expected an index"))?;
            return Ok(Expr::Item {
                span: object.span().cover(close),
                object: Box::new(object),
                index: Box::new(index),
            });
        }
        let stop = if self.check("]") {
            None
        } else {
            Some(self.expr()?)
        };
        let close = self.expect("]")?;
        Ok(Expr::Slice {
            span: object.span().cover(close),
            object: Box::new(object),
            start: start.map(Box::new),
            stop: stop.map(Box::new),
        })
    }

    fn call(&mut self, callee: Expr) -> Result<Expr, Error> {
        let mut args = Vec::new();
        while !self.check(")") {
            let arg = if let Some(star) = self.eat("**") {
                let expr = self.expr()?;
                Arg::UnpackDict {
                    span: star.cover(expr.span()),
                    expr,
                }
            } else if let Some(star) = self.eat("*") {
                let expr = self.expr()?;
                Arg::UnpackList {
                    span: star.cover(expr.span()),
                    expr,
                }
            } else if matches!(self.peek().kind, TokenKind::Name(_)) && self.peek_at(1).is_symbol("=")
            {
                let (name_span, name) = self.name()?;
                self.advance();
                let value = self.expr()?;
                Arg::Keyword {
                    span: name_span.cover(value.span()),
                    name,
                    value,
                }
            } else {
                let value = self.expr()?;
                if args.is_empty() && self.peek().is_name("for") {
                    let comp = self.comprehension()?;
                    let close = self.expect(")")?;
                    let generator = Expr::GenExpr {
                        span: value.span().cover(close),
                        item: Box::new(value),
                        comp,
                    };
                    return Ok(Expr::Call(CallExpr {
                        span: callee.span().cover(close),
                        callee: Box::new(callee),
                        args: vec![Arg::Positional {
                            span: generator.span(),
                            value: generator,
                        }],
                    }));
                }
                Arg::Positional {
                    span: value.span(),
                    value,
                }
            };
            args.push(arg);
            if self.eat(",").is_none() {
                break;
            }
        }
        let close = self.expect(")")?;
        Ok(Expr::Call(CallExpr {
            span: callee.span().cover(close),
            callee: Box::new(callee),
            args,
        }))
    }

    fn atom(&mut self) -> Result<Expr, Error> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Literal(value) => {
                self.advance();
                Ok(Expr::Const {
                    span: token.span,
                    value,
                })
            }
            TokenKind::Name(_) => {
                let (span, name) = self.name()?;
                Ok(Expr::Var { span, name })
            }
            TokenKind::Symbol("(") => {
                self.advance();
                self.parenthesized(token.span)
            }
            TokenKind::Symbol("[") => {
                self.advance();
                self.list(token.span)
            }
            TokenKind::Symbol("{") => {
                self.advance();
                self.braces(token.span)
            }
            TokenKind::Symbol("{/}") => {
                self.advance();
                Ok(Expr::Set {
                    span: token.span,
                    items: Vec::new(),
                })
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn seq_item(&mut self) -> Result<SeqItem, Error> {
        match self.eat("*") {
            Some(star) => {
                let expr = self.expr()?;
                Ok(SeqItem::Unpack {
                    span: star.cover(expr.span()),
                    expr,
                })
            }
            None => Ok(SeqItem::Item(self.expr()?)),
        }
    }

    /// Items after the first one, up to and including `close`.
    fn seq_items(&mut self, first: SeqItem, close: &str) -> Result<(Vec<SeqItem>, Span), Error> {
        let mut items = vec![first];
        while self.eat(",").is_some() {
            if self.check(close) {
                break;
            }
            items.push(self.seq_item()?);
        }
        Ok((items, self.expect(close)?))
    }

    fn comprehension(&mut self) -> Result<Comprehension, Error> {
        self.expect_name("for")?;
        let target = self.target_list()?;
        self.expect_name("in")?;
        let container = self.or()?;
        let condition = match self.eat_name("if") {
            Some(_) => Some(Box::new(self.or()?)),
            None => None,
        };
        Ok(Comprehension {
            target,
            container: Box::new(container),
            condition,
        })
    }

    fn parenthesized(&mut self, open: Span) -> Result<Expr, Error> {
        if let Some(close) = self.eat(")") {
            return Ok(Expr::List {
                span: open.cover(close),
                items: Vec::new(),
            });
        }
        let first = self.seq_item()?;
        match first {
            SeqItem::Item(item) if self.peek().is_name("for") => {
                let comp = self.comprehension()?;
                let close = self.expect(")")?;
                Ok(Expr::GenExpr {
                    span: open.cover(close),
                    item: Box::new(item),
                    comp,
                })
            }
            SeqItem::Item(item) if self.check(")") => {
                self.advance();
                Ok(item)
            }
            first => {
                if !self.check(",") {
                    return Err(self.unexpected("expected \",\" or \")\""));
                }
                let (items, close) = self.seq_items(first, ")")?;
                Ok(Expr::List {
                    span: open.cover(close),
                    items,
                })
            }
        }
    }

    fn list(&mut self, open: Span) -> Result<Expr, Error> {
        if let Some(close) = self.eat("]") {
            return Ok(Expr::List {
                span: open.cover(close),
                items: Vec::new(),
            });
        }
        match self.seq_item()? {
            SeqItem::Item(item) if self.peek().is_name("for") => {
                let comp = self.comprehension()?;
                let close = self.expect("]")?;
                Ok(Expr::ListComp {
                    span: open.cover(close),
                    item: Box::new(item),
                    comp,
                })
            }
            first => {
                let (items, close) = self.seq_items(first, "]")?;
                Ok(Expr::List {
                    span: open.cover(close),
                    items,
                })
            }
        }
    }

    fn braces(&mut self, open: Span) -> Result<Expr, Error> {
        if let Some(close) = self.eat("}") {
            return Ok(Expr::Dict {
                span: open.cover(close),
                items: Vec::new(),
            });
        }
        if self.check("**") {
            let first = self.dict_item()?;
            return self.dict_items(open, first);
        }
        let first = self.seq_item()?;
        let key = match first {
            SeqItem::Item(key) if self.check(":") => key,
            SeqItem::Item(item) if self.peek().is_name("for") => {
                let comp = self.comprehension()?;
                let close = self.expect("}")?;
                return Ok(Expr::SetComp {
                    span: open.cover(close),
                    item: Box::new(item),
                    comp,
                });
            }
            first => {
                let (items, close) = self.seq_items(first, "}")?;
                return Ok(Expr::Set {
                    span: open.cover(close),
                    items,
                });
            }
        };
        self.advance();
        let value = self.expr()?;
        if self.peek().is_name("for") {
            let comp = self.comprehension()?;
            let close = self.expect("}")?;
            return Ok(Expr::DictComp {
                span: open.cover(close),
                key: Box::new(key),
                value: Box::new(value),
                comp,
            });
        }
        let first = DictItem::Item {
            span: key.span().cover(value.span()),
            key,
            value,
        };
        self.dict_items(open, first)
    }

    fn dict_item(&mut self) -> Result<DictItem, Error> {
        if let Some(star) = self.eat("**") {
            let expr = self.expr()?;
            return Ok(DictItem::Unpack {
                span: star.cover(expr.span()),
                expr,
            });
        }
        let key = self.expr()?;
        self.expect(":")?;
        let value = self.expr()?;
        Ok(DictItem::Item {
            span: key.span().cover(value.span()),
            key,
            value,
        })
    }

    fn dict_items(&mut self, open: Span, first: DictItem) -> Result<Expr, Error> {
        let mut items = vec![first];
        while self.eat(",").is_some() {
            if self.check("}") {
                break;
            }
            items.push(self.dict_item()?);
        }
        let close = self.expect("}")?;
        Ok(Expr::Dict {
            span: open.cover(close),
            items,
        })
    }

    fn signature(&mut self) -> Result<Signature, Error> {
        let open = self.expect("(")?;
        let mut params: Vec<Param> = Vec::new();
        let mut names = FxHashSet::default();
        let mut keyword_only = false;
        let mut seen_default = false;
        let mut seen_kwargs = false;

        while !self.check(")") {
            let start = self.peek().span;
            if seen_kwargs {
                return Err(invalid_signature("parameter after **kwargs", start));
            }
            let param = if self.eat("/").is_some() {
                if keyword_only
                    || params.is_empty()
                    || params.iter().any(|p| p.kind != ParamKind::PositionalOrKeyword)
                {
                    return Err(invalid_signature("misplaced /", start));
                }
                for param in &mut params {
                    param.kind = ParamKind::PositionalOnly;
                }
                None
            } else if self.eat("**").is_some() {
                let (span, name) = self.name()?;
                seen_kwargs = true;
                Some(Param {
                    span: start.cover(span),
                    name,
                    kind: ParamKind::VarKeyword,
                    default: None,
                })
            } else if self.eat("*").is_some() {
                if keyword_only {
                    return Err(invalid_signature("duplicate *", start));
                }
                keyword_only = true;
                if matches!(self.peek().kind, TokenKind::Name(_)) {
                    let (span, name) = self.name()?;
                    Some(Param {
                        span: start.cover(span),
                        name,
                        kind: ParamKind::VarPositional,
                        default: None,
                    })
                } else {
                    None
                }
            } else {
                let (span, name) = self.name()?;
                let default = match self.eat("=") {
                    Some(_) => Some(self.expr()?),
                    None => None,
                };
                if !keyword_only {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(invalid_signature(
                            "non-default parameter follows default parameter",
                            span,
                        ));
                    }
                }
                Some(Param {
                    span: default.as_ref().map_or(span, |d| span.cover(d.span())),
                    name,
                    kind: if keyword_only {
                        ParamKind::KeywordOnly
                    } else {
                        ParamKind::PositionalOrKeyword
                    },
                    default: default.map(ParamDefault::Expr),
                })
            };
            if let Some(param) = param {
                if !names.insert(param.name.clone()) {
                    return Err(invalid_signature(
                        format!("duplicate parameter {:?}", &*param.name),
                        param.span,
                    ));
                }
                params.push(param);
            }
            if self.eat(",").is_none() {
                break;
            }
        }
        let close = self.expect(")")?;
        Ok(Signature {
            span: open.cover(close),
            params,
        })
    }
}

fn invalid_signature(message: impl Into<String>, span: Span) -> Error {
    Error::InvalidSignature {
        message: message.into(),
        span,
    }
}

fn to_target(expr: Expr) -> Result<Target, Error> {
    match expr {
        Expr::Var { span, name } => Ok(Target::Var { span, name }),
        Expr::Attr { span, object, name } => Ok(Target::Attr { span, object, name }),
        Expr::Item {
            span,
            object,
            index,
        } => Ok(Target::Item {
            span,
            object,
            index,
        }),
        Expr::List { span, items } => {
            let targets = items
                .into_iter()
                .map(|item| match item {
                    SeqItem::Item(expr) => to_target(expr),
                    SeqItem::Unpack { span, .. } => {
                        Err(Error::syntax("can't assign to starred expression", span))
                    }
                })
                .collect::<Result<_, _>>()?;
            Ok(Target::Unpack { span, targets })
        }
        other => Err(Error::syntax("can't assign to expression", other.span())),
    }
}

fn scalar(expr: &Expr) -> Option<&Value> {
    expr.as_const().filter(|value| {
        matches!(
            value,
            Value::None
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::Date(_)
                | Value::DateTime(_)
                | Value::TimeDelta(_)
        )
    })
}

fn fold_unary(start: Span, op: UnaryOp, operand: Expr) -> Expr {
    let span = start.cover(operand.span());
    if let Some(Ok(value)) = scalar(&operand).map(|value| ops::unary(op, value)) {
        return Expr::Const { span, value };
    }
    Expr::Unary {
        span,
        op,
        operand: Box::new(operand),
    }
}

fn fold_binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span().cover(right.span());
    if let (Some(l), Some(r)) = (scalar(&left), scalar(&right)) {
        // Failing operations stay in the tree and fail at render time.
        if let Ok(value) = ops::binary(op, l, r) {
            return Expr::Const { span, value };
        }
    }
    Expr::Binary {
        span,
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn fold_compare(op: CmpOp, left: Expr, right: Expr) -> Expr {
    let span = left.span().cover(right.span());
    if let (Some(l), Some(r)) = (scalar(&left), scalar(&right)) {
        if let Ok(value) = ops::compare(op, l, r) {
            return Expr::Const { span, value };
        }
    }
    Expr::Compare {
        span,
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// `and` (when `is_and`) or `or`. A constant left operand decides which side
/// survives.
fn fold_logical(is_and: bool, left: Expr, right: Expr) -> Expr {
    let span = left.span().cover(right.span());
    if let Some(value) = scalar(&left) {
        return if value.truthy() == is_and { right } else { left };
    }
    let (left, right) = (Box::new(left), Box::new(right));
    if is_and {
        Expr::And { span, left, right }
    } else {
        Expr::Or { span, left, right }
    }
}

fn fold_if(then: Expr, condition: Expr, otherwise: Expr) -> Expr {
    if let Some(value) = scalar(&condition) {
        return if value.truthy() { then } else { otherwise };
    }
    Expr::If {
        span: then.span().cover(otherwise.span()),
        then: Box::new(then),
        condition: Box::new(condition),
        otherwise: Box::new(otherwise),
    }
}
