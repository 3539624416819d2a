//! Templates and their syntax trees as UL4ON objects.
//!
//! Every node is an `O` object whose fields follow in declaration order;
//! spans are written as slices. Encoding and decoding below must stay in
//! the same order.

use std::rc::Rc;
use std::str::FromStr;

use tracing::debug;
use ul4_conf::Whitespace;
use ul4_source::Span;

use super::Decoder;
use super::Encoder;
use super::VERSION;
use crate::ast::Arg;
use crate::ast::BinaryOp;
use crate::ast::Branch;
use crate::ast::BranchKind;
use crate::ast::CallExpr;
use crate::ast::CmpOp;
use crate::ast::Comprehension;
use crate::ast::DictItem;
use crate::ast::Expr;
use crate::ast::ForBlock;
use crate::ast::IfBlock;
use crate::ast::Indent;
use crate::ast::Node;
use crate::ast::Render;
use crate::ast::RenderBlock;
use crate::ast::RenderBlocks;
use crate::ast::RenderKind;
use crate::ast::SeqItem;
use crate::ast::Target;
use crate::ast::UnaryOp;
use crate::ast::WhileBlock;
use crate::error::Error;
use crate::parser;
use crate::signature::Param;
use crate::signature::ParamDefault;
use crate::signature::ParamKind;
use crate::signature::Signature;
use crate::template::CompileOptions;
use crate::template::Template;
use crate::template::TemplateData;
use crate::value::Value;

type Result<T> = std::result::Result<T, Error>;

fn render_key(kind: RenderKind) -> &'static str {
    match kind {
        RenderKind::Render => "render",
        RenderKind::RenderX => "renderx",
    }
}

impl Encoder {
    pub(super) fn template(&mut self, template: &Template) -> Result<()> {
        let value = Value::Template(template.clone());
        self.object(Some(&value), "template", |e| {
            e.str(VERSION);
            e.opt_str(template.name());
            e.shared_str(&template.shared_source())?;
            e.str(template.whitespace().as_str());
            e.str(template.startdelim());
            e.str(template.enddelim());
            e.opt_str(template.doc());
            e.optional(template.signature(), Self::signature)?;
            e.opt_span(template.span());
            e.opt_span(template.stop());
            e.list(template.content(), Self::node)
        })
    }

    fn span(&mut self, span: Span) {
        let bounds = [Some(i64::from(span.start())), Some(i64::from(span.end()))];
        self.numbers(None, "R", &bounds);
    }

    fn opt_span(&mut self, span: Option<Span>) {
        match span {
            Some(span) => self.span(span),
            None => self.line("n"),
        }
    }

    fn optional<T>(&mut self, item: Option<&T>, f: impl FnOnce(&mut Self, &T) -> Result<()>) -> Result<()> {
        match item {
            Some(item) => f(self, item),
            None => {
                self.line("n");
                Ok(())
            }
        }
    }

    fn list<T>(&mut self, items: &[T], f: impl Fn(&mut Self, &T) -> Result<()>) -> Result<()> {
        self.record(None);
        self.line("L");
        self.level += 1;
        for item in items {
            f(self, item)?;
        }
        self.level -= 1;
        self.line("]");
        Ok(())
    }

    fn signature(&mut self, signature: &Signature) -> Result<()> {
        self.object(None, "signature", |e| {
            e.span(signature.span);
            e.list(&signature.params, |e, param| {
                e.object(None, "param", |e| {
                    e.span(param.span);
                    e.shared_str(&param.name)?;
                    e.str(param.kind.key());
                    match &param.default {
                        None => e.line("n"),
                        Some(ParamDefault::Value(value)) => {
                            e.str("value");
                            e.dump(value)?;
                        }
                        Some(ParamDefault::Expr(expr)) => {
                            e.str("expr");
                            e.expr(expr)?;
                        }
                    }
                    Ok(())
                })
            })
        })
    }

    fn indent(&mut self, indent: &Indent) -> Result<()> {
        self.object(None, "indent", |e| {
            e.span(indent.span);
            match &indent.text {
                Some(text) => e.shared_str(text),
                None => {
                    e.line("n");
                    Ok(())
                }
            }
        })
    }

    fn node(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Text { span } => self.object(None, "text", |e| {
                e.span(*span);
                Ok(())
            }),
            Node::LineEnd { span } => self.object(None, "lineend", |e| {
                e.span(*span);
                Ok(())
            }),
            Node::Indent(indent) => self.indent(indent),
            Node::Print { span, expr } => self.tagged_expr("print", *span, expr),
            Node::PrintX { span, expr } => self.tagged_expr("printx", *span, expr),
            Node::Expr { span, expr } => self.tagged_expr("exprstmt", *span, expr),
            Node::Return { span, expr } => self.tagged_expr("return", *span, expr),
            Node::Set { span, target, value } => self.object(None, "setvar", |e| {
                e.span(*span);
                e.target(target)?;
                e.expr(value)
            }),
            Node::Modify {
                span,
                op,
                target,
                value,
            } => self.object(None, op.var_key(), |e| {
                e.span(*span);
                e.target(target)?;
                e.expr(value)
            }),
            Node::For(block) => self.object(None, "for", |e| {
                e.span(block.span);
                e.span(block.stop);
                e.target(&block.target)?;
                e.expr(&block.container)?;
                e.list(&block.body, Self::node)
            }),
            Node::While(block) => self.object(None, "while", |e| {
                e.span(block.span);
                e.span(block.stop);
                e.expr(&block.condition)?;
                e.list(&block.body, Self::node)
            }),
            Node::Break { span } => self.object(None, "break", |e| {
                e.span(*span);
                Ok(())
            }),
            Node::Continue { span } => self.object(None, "continue", |e| {
                e.span(*span);
                Ok(())
            }),
            Node::If(block) => self.object(None, "ieie", |e| {
                e.span(block.span);
                e.span(block.stop);
                e.list(&block.branches, |e, branch| {
                    e.object(None, branch.kind.key(), |e| {
                        e.span(branch.span);
                        e.span(branch.stop);
                        e.optional(branch.condition.as_ref(), Self::expr)?;
                        e.list(&branch.body, Self::node)
                    })
                })
            }),
            Node::Def(template) => self.template(template),
            Node::Render(render) => self.object(None, render_key(render.kind), |e| {
                e.span(render.span);
                e.call(&render.call)?;
                e.optional(render.indent.as_ref(), Self::indent)
            }),
            Node::RenderBlock(render) => self.object(None, "renderblock", |e| {
                e.span(render.span);
                e.span(render.stop);
                e.call(&render.call)?;
                e.optional(render.indent.as_ref(), Self::indent)?;
                e.template(&render.content)
            }),
            Node::RenderBlocks(render) => self.object(None, "renderblocks", |e| {
                e.span(render.span);
                e.span(render.stop);
                e.call(&render.call)?;
                e.optional(render.indent.as_ref(), Self::indent)?;
                e.list(&render.body, Self::node)
            }),
        }
    }

    fn tagged_expr(&mut self, kind: &str, span: Span, expr: &Expr) -> Result<()> {
        self.object(None, kind, |e| {
            e.span(span);
            e.expr(expr)
        })
    }

    fn target(&mut self, target: &Target) -> Result<()> {
        match target {
            Target::Var { span, name } => self.object(None, "var", |e| {
                e.span(*span);
                e.shared_str(name)
            }),
            Target::Attr { span, object, name } => self.object(None, "getattr", |e| {
                e.span(*span);
                e.expr(object)?;
                e.shared_str(name)
            }),
            Target::Item {
                span,
                object,
                index,
            } => self.object(None, "getitem", |e| {
                e.span(*span);
                e.expr(object)?;
                e.expr(index)
            }),
            Target::Unpack { span, targets } => self.object(None, "unpack", |e| {
                e.span(*span);
                e.list(targets, Self::target)
            }),
        }
    }

    fn comprehension(&mut self, comp: &Comprehension) -> Result<()> {
        self.target(&comp.target)?;
        self.expr(&comp.container)?;
        self.optional(comp.condition.as_deref(), Self::expr)
    }

    fn call(&mut self, call: &CallExpr) -> Result<()> {
        self.object(None, "call", |e| {
            e.span(call.span);
            e.expr(&call.callee)?;
            e.list(&call.args, |e, arg| match arg {
                Arg::Positional { span, value } => e.object(None, "posarg", |e| {
                    e.span(*span);
                    e.expr(value)
                }),
                Arg::Keyword { span, name, value } => e.object(None, "kwarg", |e| {
                    e.span(*span);
                    e.shared_str(name)?;
                    e.expr(value)
                }),
                Arg::UnpackList { span, expr } => e.tagged_expr("unpacklistarg", *span, expr),
                Arg::UnpackDict { span, expr } => e.tagged_expr("unpackdictarg", *span, expr),
            })
        })
    }

    fn seq_item(&mut self, item: &SeqItem) -> Result<()> {
        match item {
            SeqItem::Item(expr) => self.expr(expr),
            SeqItem::Unpack { span, expr } => self.tagged_expr("unpackseqitem", *span, expr),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Const { span, value } => self.object(None, "const", |e| {
                e.span(*span);
                e.dump(value)
            }),
            Expr::Var { span, name } => self.object(None, "var", |e| {
                e.span(*span);
                e.shared_str(name)
            }),
            Expr::List { span, items } => self.object(None, "list", |e| {
                e.span(*span);
                e.list(items, Self::seq_item)
            }),
            Expr::Set { span, items } => self.object(None, "set", |e| {
                e.span(*span);
                e.list(items, Self::seq_item)
            }),
            Expr::Dict { span, items } => self.object(None, "dict", |e| {
                e.span(*span);
                e.list(items, |e, item| match item {
                    DictItem::Item { span, key, value } => e.object(None, "dictitem", |e| {
                        e.span(*span);
                        e.expr(key)?;
                        e.expr(value)
                    }),
                    DictItem::Unpack { span, expr } => e.tagged_expr("unpackdictitem", *span, expr),
                })
            }),
            Expr::ListComp { span, item, comp } => self.object(None, "listcomp", |e| {
                e.span(*span);
                e.expr(item)?;
                e.comprehension(comp)
            }),
            Expr::SetComp { span, item, comp } => self.object(None, "setcomp", |e| {
                e.span(*span);
                e.expr(item)?;
                e.comprehension(comp)
            }),
            Expr::GenExpr { span, item, comp } => self.object(None, "genexpr", |e| {
                e.span(*span);
                e.expr(item)?;
                e.comprehension(comp)
            }),
            Expr::DictComp {
                span,
                key,
                value,
                comp,
            } => self.object(None, "dictcomp", |e| {
                e.span(*span);
                e.expr(key)?;
                e.expr(value)?;
                e.comprehension(comp)
            }),
            Expr::Attr { span, object, name } => self.object(None, "getattr", |e| {
                e.span(*span);
                e.expr(object)?;
                e.shared_str(name)
            }),
            Expr::Item {
                span,
                object,
                index,
            } => self.object(None, "getitem", |e| {
                e.span(*span);
                e.expr(object)?;
                e.expr(index)
            }),
            Expr::Slice {
                span,
                object,
                start,
                stop,
            } => self.object(None, "getslice", |e| {
                e.span(*span);
                e.expr(object)?;
                e.optional(start.as_deref(), Self::expr)?;
                e.optional(stop.as_deref(), Self::expr)
            }),
            Expr::Unary { span, op, operand } => self.tagged_expr(op.key(), *span, operand),
            Expr::Binary {
                span,
                op,
                left,
                right,
            } => self.pair(op.key(), *span, left, right),
            Expr::Compare {
                span,
                op,
                left,
                right,
            } => self.pair(op.key(), *span, left, right),
            Expr::And { span, left, right } => self.pair("and", *span, left, right),
            Expr::Or { span, left, right } => self.pair("or", *span, left, right),
            Expr::If {
                span,
                then,
                condition,
                otherwise,
            } => self.object(None, "ifexpr", |e| {
                e.span(*span);
                e.expr(then)?;
                e.expr(condition)?;
                e.expr(otherwise)
            }),
            Expr::Call(call) => self.call(call),
        }
    }

    fn pair(&mut self, kind: &str, span: Span, left: &Expr, right: &Expr) -> Result<()> {
        self.object(None, kind, |e| {
            e.span(span);
            e.expr(left)?;
            e.expr(right)
        })
    }
}

impl Decoder<'_> {
    /// Reads the fields of a template object. `slot` is the object's
    /// registration, filled in once the template is complete.
    pub(super) fn template_payload(&mut self, slot: Option<usize>) -> Result<Template> {
        let version = match self.load()? {
            Value::None => None,
            Value::Str(version) => Some(version),
            other => return Err(self.error(format!("expected a version, found {}", other.type_name()))),
        };
        let name = self.opt_text()?;
        let source = self.text()?;
        let whitespace = self.text()?;
        let whitespace = Whitespace::from_str(&whitespace)
            .map_err(|_| self.error(format!("unknown whitespace mode {whitespace:?}")))?;
        let startdelim = self.text()?;
        let enddelim = self.text()?;

        let template = match version {
            None => {
                debug!(name = name.as_deref(), "recompiling legacy template dump");
                let options = CompileOptions {
                    name: name.as_deref().map(str::to_string),
                    whitespace,
                    startdelim: startdelim.to_string(),
                    enddelim: enddelim.to_string(),
                };
                parser::compile(&source, &options)?
            }
            Some(version) if &*version == VERSION => {
                let doc = self.opt_text()?;
                let signature = self.optional(Self::signature)?;
                let span = self.optional(Self::span)?;
                let stop = self.optional(Self::span)?;
                let content = self.list(Self::node)?;
                Template::new(TemplateData {
                    name,
                    source,
                    whitespace,
                    startdelim,
                    enddelim,
                    doc,
                    signature,
                    span,
                    stop,
                    content,
                })
            }
            Some(found) => {
                return Err(Error::VersionMismatch {
                    expected: VERSION.to_string(),
                    found: found.to_string(),
                })
            }
        };
        self.resolve(slot, &Value::Template(template.clone()));
        Ok(template)
    }

    fn text(&mut self) -> Result<Rc<str>> {
        match self.load()? {
            Value::Str(text) => Ok(text),
            other => Err(self.error(format!("expected a string, found {}", other.type_name()))),
        }
    }

    fn opt_text(&mut self) -> Result<Option<Rc<str>>> {
        match self.load()? {
            Value::None => Ok(None),
            Value::Str(text) => Ok(Some(text)),
            other => Err(self.error(format!("expected a string or None, found {}", other.type_name()))),
        }
    }

    fn span(&mut self) -> Result<Span> {
        match self.load()? {
            Value::Slice(Some(start), Some(stop)) => {
                match (usize::try_from(start), usize::try_from(stop)) {
                    (Ok(start), Ok(stop)) if start <= stop => Ok(Span::from_bounds(start, stop)),
                    _ => Err(self.error(format!("invalid span {start}:{stop}"))),
                }
            }
            other => Err(self.error(format!("expected a span, found {}", other.type_name()))),
        }
    }

    fn optional<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<T>> {
        if matches!(self.peek_char()?, 'n' | 'N') {
            self.load()?;
            Ok(None)
        } else {
            f(self).map(Some)
        }
    }

    fn list<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let code = self.next_char()?;
        if !matches!(code, 'l' | 'L') {
            return Err(self.error(format!("expected a list, found {code:?}")));
        }
        self.register(code, None);
        let mut items = Vec::new();
        while self.peek_char()? != ']' {
            items.push(f(self)?);
        }
        self.expect(']')?;
        Ok(items)
    }

    /// Opens an object and returns its kind and registration.
    fn begin(&mut self) -> Result<(String, Option<usize>)> {
        let code = self.next_char()?;
        if !matches!(code, 'o' | 'O') {
            return Err(self.error(format!("expected an object, found {code:?}")));
        }
        let slot = self.register(code, None);
        Ok((self.type_key()?, slot))
    }

    /// Reads one object whose fields are read by `f`.
    fn object<T>(&mut self, f: impl FnOnce(&mut Self, &str, Option<usize>) -> Result<T>) -> Result<T> {
        let (kind, slot) = self.begin()?;
        let value = f(self, &kind, slot)?;
        self.expect(')')?;
        Ok(value)
    }

    fn unexpected(&self, kind: &str) -> Error {
        self.error(format!("unexpected object of type {kind:?}"))
    }

    fn signature(&mut self) -> Result<Signature> {
        self.object(|d, kind, _| {
            if kind != "signature" {
                return Err(d.unexpected(kind));
            }
            let span = d.span()?;
            let params = d.list(Self::param)?;
            Ok(Signature { span, params })
        })
    }

    fn param(&mut self) -> Result<Param> {
        self.object(|d, kind, _| {
            if kind != "param" {
                return Err(d.unexpected(kind));
            }
            let span = d.span()?;
            let name = d.text()?;
            let key = d.text()?;
            let kind = ParamKind::from_key(&key)
                .ok_or_else(|| d.error(format!("unknown parameter kind {key:?}")))?;
            let default = match d.opt_text()?.as_deref() {
                None => None,
                Some("value") => Some(ParamDefault::Value(d.load()?)),
                Some("expr") => Some(ParamDefault::Expr(d.expr()?)),
                Some(other) => return Err(d.error(format!("unknown default kind {other:?}"))),
            };
            Ok(Param {
                span,
                name,
                kind,
                default,
            })
        })
    }

    fn indent(&mut self) -> Result<Indent> {
        self.object(|d, kind, _| {
            if kind != "indent" {
                return Err(d.unexpected(kind));
            }
            d.indent_fields()
        })
    }

    fn indent_fields(&mut self) -> Result<Indent> {
        let span = self.span()?;
        let text = self.opt_text()?;
        Ok(Indent { span, text })
    }

    fn nodes(&mut self) -> Result<Vec<Node>> {
        self.list(Self::node)
    }

    fn node(&mut self) -> Result<Node> {
        self.object(|d, kind, slot| {
            let node = match kind {
                "text" => Node::Text { span: d.span()? },
                "lineend" => Node::LineEnd { span: d.span()? },
                "indent" => Node::Indent(d.indent_fields()?),
                "print" => Node::Print {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                "printx" => Node::PrintX {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                "exprstmt" => Node::Expr {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                "return" => Node::Return {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                "setvar" => Node::Set {
                    span: d.span()?,
                    target: d.target()?,
                    value: d.expr()?,
                },
                "for" => Node::For(Box::new(ForBlock {
                    span: d.span()?,
                    stop: d.span()?,
                    target: d.target()?,
                    container: d.expr()?,
                    body: d.nodes()?,
                })),
                "while" => Node::While(Box::new(WhileBlock {
                    span: d.span()?,
                    stop: d.span()?,
                    condition: d.expr()?,
                    body: d.nodes()?,
                })),
                "break" => Node::Break { span: d.span()? },
                "continue" => Node::Continue { span: d.span()? },
                "ieie" => Node::If(Box::new(IfBlock {
                    span: d.span()?,
                    stop: d.span()?,
                    branches: d.list(Self::branch)?,
                })),
                "template" => Node::Def(d.template_payload(slot)?),
                "render" | "renderx" => {
                    let kind = if kind == "render" {
                        RenderKind::Render
                    } else {
                        RenderKind::RenderX
                    };
                    Node::Render(Box::new(Render {
                        span: d.span()?,
                        kind,
                        call: d.call()?,
                        indent: d.optional(Self::indent)?,
                    }))
                }
                "renderblock" => Node::RenderBlock(Box::new(RenderBlock {
                    span: d.span()?,
                    stop: d.span()?,
                    call: d.call()?,
                    indent: d.optional(Self::indent)?,
                    content: d.object(|d, kind, slot| {
                        if kind != "template" {
                            return Err(d.unexpected(kind));
                        }
                        d.template_payload(slot)
                    })?,
                })),
                "renderblocks" => Node::RenderBlocks(Box::new(RenderBlocks {
                    span: d.span()?,
                    stop: d.span()?,
                    call: d.call()?,
                    indent: d.optional(Self::indent)?,
                    body: d.nodes()?,
                })),
                other => match BinaryOp::from_var_key(other) {
                    Some(op) => Node::Modify {
                        span: d.span()?,
                        op,
                        target: d.target()?,
                        value: d.expr()?,
                    },
                    None => return Err(d.unexpected(other)),
                },
            };
            Ok(node)
        })
    }

    fn branch(&mut self) -> Result<Branch> {
        self.object(|d, kind, _| {
            let kind = match kind {
                "if" => BranchKind::If,
                "elif" => BranchKind::Elif,
                "else" => BranchKind::Else,
                other => return Err(d.unexpected(other)),
            };
            Ok(Branch {
                kind,
                span: d.span()?,
                stop: d.span()?,
                condition: d.optional(Self::expr)?,
                body: d.nodes()?,
            })
        })
    }

    fn target(&mut self) -> Result<Target> {
        self.object(|d, kind, _| {
            let target = match kind {
                "var" => Target::Var {
                    span: d.span()?,
                    name: d.text()?,
                },
                "getattr" => Target::Attr {
                    span: d.span()?,
                    object: d.boxed()?,
                    name: d.text()?,
                },
                "getitem" => Target::Item {
                    span: d.span()?,
                    object: d.boxed()?,
                    index: d.boxed()?,
                },
                "unpack" => Target::Unpack {
                    span: d.span()?,
                    targets: d.list(Self::target)?,
                },
                other => return Err(d.unexpected(other)),
            };
            Ok(target)
        })
    }

    fn call(&mut self) -> Result<CallExpr> {
        match self.expr()? {
            Expr::Call(call) => Ok(call),
            _ => Err(self.error("expected a call")),
        }
    }

    fn arg(&mut self) -> Result<Arg> {
        self.object(|d, kind, _| {
            let arg = match kind {
                "posarg" => Arg::Positional {
                    span: d.span()?,
                    value: d.expr()?,
                },
                "kwarg" => Arg::Keyword {
                    span: d.span()?,
                    name: d.text()?,
                    value: d.expr()?,
                },
                "unpacklistarg" => Arg::UnpackList {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                "unpackdictarg" => Arg::UnpackDict {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                other => return Err(d.unexpected(other)),
            };
            Ok(arg)
        })
    }

    fn seq_item(&mut self) -> Result<SeqItem> {
        self.object(|d, kind, _| {
            if kind == "unpackseqitem" {
                Ok(SeqItem::Unpack {
                    span: d.span()?,
                    expr: d.expr()?,
                })
            } else {
                d.expr_fields(kind).map(SeqItem::Item)
            }
        })
    }

    fn dict_item(&mut self) -> Result<DictItem> {
        self.object(|d, kind, _| {
            let item = match kind {
                "dictitem" => DictItem::Item {
                    span: d.span()?,
                    key: d.expr()?,
                    value: d.expr()?,
                },
                "unpackdictitem" => DictItem::Unpack {
                    span: d.span()?,
                    expr: d.expr()?,
                },
                other => return Err(d.unexpected(other)),
            };
            Ok(item)
        })
    }

    fn boxed(&mut self) -> Result<Box<Expr>> {
        self.expr().map(Box::new)
    }

    fn expr(&mut self) -> Result<Expr> {
        self.object(|d, kind, _| d.expr_fields(kind))
    }

    fn comprehension(&mut self) -> Result<Comprehension> {
        Ok(Comprehension {
            target: self.target()?,
            container: self.boxed()?,
            condition: self.optional(Self::boxed)?,
        })
    }

    fn expr_fields(&mut self, kind: &str) -> Result<Expr> {
        let span = self.span()?;
        let expr = match kind {
            "const" => Expr::Const {
                span,
                value: self.load()?,
            },
            "var" => Expr::Var {
                span,
                name: self.text()?,
            },
            "list" => Expr::List {
                span,
                items: self.list(Self::seq_item)?,
            },
            "set" => Expr::Set {
                span,
                items: self.list(Self::seq_item)?,
            },
            "dict" => Expr::Dict {
                span,
                items: self.list(Self::dict_item)?,
            },
            "listcomp" => Expr::ListComp {
                span,
                item: self.boxed()?,
                comp: self.comprehension()?,
            },
            "setcomp" => Expr::SetComp {
                span,
                item: self.boxed()?,
                comp: self.comprehension()?,
            },
            "genexpr" => Expr::GenExpr {
                span,
                item: self.boxed()?,
                comp: self.comprehension()?,
            },
            "dictcomp" => Expr::DictComp {
                span,
                key: self.boxed()?,
                value: self.boxed()?,
                comp: self.comprehension()?,
            },
            "getattr" => Expr::Attr {
                span,
                object: self.boxed()?,
                name: self.text()?,
            },
            "getitem" => Expr::Item {
                span,
                object: self.boxed()?,
                index: self.boxed()?,
            },
            "getslice" => Expr::Slice {
                span,
                object: self.boxed()?,
                start: self.optional(Self::boxed)?,
                stop: self.optional(Self::boxed)?,
            },
            "and" => Expr::And {
                span,
                left: self.boxed()?,
                right: self.boxed()?,
            },
            "or" => Expr::Or {
                span,
                left: self.boxed()?,
                right: self.boxed()?,
            },
            "ifexpr" => Expr::If {
                span,
                then: self.boxed()?,
                condition: self.boxed()?,
                otherwise: self.boxed()?,
            },
            "call" => Expr::Call(CallExpr {
                span,
                callee: self.boxed()?,
                args: self.list(Self::arg)?,
            }),
            other => {
                if let Some(op) = UnaryOp::from_key(other) {
                    Expr::Unary {
                        span,
                        op,
                        operand: self.boxed()?,
                    }
                } else if let Some(op) = BinaryOp::from_key(other) {
                    Expr::Binary {
                        span,
                        op,
                        left: self.boxed()?,
                        right: self.boxed()?,
                    }
                } else if let Some(op) = CmpOp::from_key(other) {
                    Expr::Compare {
                        span,
                        op,
                        left: self.boxed()?,
                        right: self.boxed()?,
                    }
                } else {
                    return Err(self.unexpected(other));
                }
            }
        };
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ul4on::dumps;
    use crate::ul4on::loads;

    fn round_trip(template: &Template) -> Template {
        let dump = dumps(&Value::Template(template.clone()), Some("\t")).unwrap();
        match loads(&dump).unwrap() {
            Value::Template(loaded) => loaded,
            other => panic!("expected a template, got {other:?}"),
        }
    }

    mod templates {
        use super::*;

        #[test]
        fn test_round_trip_preserves_structure() {
            let source = "<?ul4 t(x, *args, y=[1, 2], **kw)?><?doc demo?>\
                <?for (i, c) in enumerate(x[1:] if x else 'ab')?>\
                <?if i > 0 and not c?><?print c.upper()?><?elif i?><?printx {'a': i, **kw}?>\
                <?else?><?break?><?end if?><?end for?>\
                <?def f(a, b=i)?><?return [a * b for a in range(3) if a]?><?end def?>\
                <?code n = -1?><?code n += 3?><?while n?><?code n -= 1?><?continue?><?end while?>\
                <?render f(*args, **kw)?>";
            let template = Template::compile(source).unwrap();
            let loaded = round_trip(&template);
            assert_eq!(loaded, template);
            assert!(loaded.doc().is_some_and(|doc| doc.contains("demo")));
        }

        #[test]
        fn test_round_trip_renders_the_same() {
            let source = "<?ul4 t(n=3)?><?for i in range(n)?><?print i?>;<?end for?>";
            let template = Template::compile(source).unwrap();
            let loaded = round_trip(&template);
            assert_eq!(loaded.renders(()).unwrap(), "0;1;2;");
        }

        #[test]
        fn test_local_templates_share_the_source() {
            let template = Template::compile("<?def inner?>x<?end def?>").unwrap();
            let loaded = round_trip(&template);
            let Some(inner) = loaded.content().iter().find_map(|node| match node {
                Node::Def(inner) => Some(inner),
                _ => None,
            }) else {
                panic!("expected a local template");
            };
            assert!(std::ptr::eq(inner.source(), loaded.source()));
        }

        #[test]
        fn test_renderblock_content() {
            let source = "<?def f(content)?><?render content()?><?end def?>\
                <?renderblock f()?>body<?end renderblock?>";
            let template = Template::compile(source).unwrap();
            assert_eq!(round_trip(&template), template);
        }
    }

    mod versions {
        use super::*;

        #[test]
        fn test_version_mismatch() {
            let dump = "O S'de.livinglogic.ul4.template' S'46' n S'x' S'keep' S'<?' S'?>' n n n n L ] )";
            let err = loads(dump).unwrap_err();
            assert!(matches!(
                err,
                Error::VersionMismatch { ref expected, ref found } if expected == VERSION && found == "46"
            ));
        }

        #[test]
        fn test_legacy_dump_is_recompiled() {
            let dump = "O S'de.livinglogic.ul4.template' n S'old' S'<?print 1 + 1?>' S'keep' S'<?' S'?>' )";
            let Value::Template(template) = loads(dump).unwrap() else {
                panic!("expected a template");
            };
            assert_eq!(template.name(), Some("old"));
            assert_eq!(template.renders(()).unwrap(), "2");
        }

        #[test]
        fn test_unknown_node_kind() {
            let dump = format!(
                "O S'de.livinglogic.ul4.template' S'{VERSION}' n S'x' S'keep' S'<?' S'?>' n n n n \
                 L O S'de.livinglogic.ul4.frobnicate' R i0 i1 ) ] )"
            );
            assert!(matches!(loads(&dump), Err(Error::Ul4on { .. })));
        }
    }
}
