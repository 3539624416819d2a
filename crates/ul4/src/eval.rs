//! The tree-walking evaluator.
//!
//! Nodes write their output into a `fmt::Write` sink. Loop control and
//! `<?return?>` travel back up as [`Flow`] values, errors as `Err`, and every
//! tag an error passes through adds its location to the error.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use ul4_source::Span;

use crate::ast::Arg;
use crate::ast::Comprehension;
use crate::ast::DictItem;
use crate::ast::Expr;
use crate::ast::Indent;
use crate::ast::Node;
use crate::ast::RenderKind;
use crate::ast::SeqItem;
use crate::ast::Target;
use crate::builtins;
use crate::context::Context;
use crate::context::Discard;
use crate::error::Error;
use crate::methods;
use crate::ops;
use crate::signature::bind;
use crate::signature::Arguments;
use crate::signature::ParamDefault;
use crate::template::Closure;
use crate::template::Template;
use crate::value::xmlescape;
use crate::value::Value;
use crate::value::Vars;

/// How a node finished.
#[derive(Debug, PartialEq)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Evaluates an expression outside of any template, as needed for the
/// signature defaults of `<?ul4?>`.
pub(crate) fn evaluate_constant(expr: &Expr) -> Result<Value, Error> {
    let globals = Vars::new();
    let mut ctx = Context::new(&globals);
    ctx.push_frame(None, None)?;
    ctx.eval(expr, &mut Discard)
}

impl Context<'_> {
    /// Runs a template for its return value; its output goes to `out`.
    pub(crate) fn call_template(
        &mut self,
        template: &Template,
        captured: Option<Rc<Vars>>,
        args: Arguments,
        out: &mut dyn fmt::Write,
    ) -> Result<Value, Error> {
        self.invoke(template, captured, None, args, out)
    }

    fn invoke(
        &mut self,
        template: &Template,
        captured: Option<Rc<Vars>>,
        itself: Option<Value>,
        args: Arguments,
        out: &mut dyn fmt::Write,
    ) -> Result<Value, Error> {
        self.push_frame(Some(template.clone()), captured)?;
        let result = self.bind_and_run(template, itself, args, out);
        self.pop_frame();
        result
    }

    fn bind_and_run(
        &mut self,
        template: &Template,
        itself: Option<Value>,
        args: Arguments,
        out: &mut dyn fmt::Write,
    ) -> Result<Value, Error> {
        let callable = template.name().unwrap_or("template");
        let mut vars = Vars::new();
        if let (Some(name), Some(itself)) = (template.name(), itself) {
            vars.insert(name.to_string(), itself);
        }
        match template.signature() {
            None => {
                if !args.positional.is_empty() {
                    return Err(Error::TooManyArguments {
                        callable: callable.to_string(),
                        max: 0,
                        given: args.positional.len(),
                    });
                }
                let mut seen = FxHashSet::default();
                for (name, value) in args.keyword {
                    if !seen.insert(name.clone()) {
                        return Err(Error::DuplicateArgument {
                            callable: callable.to_string(),
                            name,
                        });
                    }
                    vars.insert(name, value);
                }
            }
            Some(signature) => {
                let slots = bind(callable, &signature.params, args)?;
                for (param, slot) in signature.params.iter().zip(slots) {
                    let value = match (slot, &param.default) {
                        (Some(value), _) => value,
                        (None, Some(ParamDefault::Value(value))) => value.clone(),
                        (None, Some(ParamDefault::Expr(expr))) => self.eval(expr, out)?,
                        (None, None) => Value::None,
                    };
                    vars.insert(param.name.to_string(), value);
                }
            }
        }
        self.set_locals(vars);
        match self.exec_block(template.content(), out)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    /// `callee(args)`. Templates called this way write their output into
    /// `out` and evaluate to their return value.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Arguments,
        out: &mut dyn fmt::Write,
    ) -> Result<Value, Error> {
        match callee {
            Value::Template(template) => self.call_template(template, None, args, out),
            Value::Closure(closure) => self.invoke(
                closure.template(),
                Some(Rc::clone(closure.captured())),
                Some(callee.clone()),
                args,
                out,
            ),
            Value::Function(builtin) => builtins::call(self, *builtin, args, out),
            Value::Method(method) => methods::call(self, method, args),
            Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
            other => Err(Error::NotCallable(other.describe())),
        }
    }

    fn render_value(
        &mut self,
        callee: &Value,
        args: Arguments,
        out: &mut dyn fmt::Write,
    ) -> Result<(), Error> {
        match callee {
            Value::Template(_) | Value::Closure(_) => {
                self.call_value(callee, args, out)?;
                Ok(())
            }
            Value::Undefined(undefined) => Err(Error::Undefined(undefined.clone())),
            other => Err(Error::NotRenderable(other.describe())),
        }
    }

    /// `template.renders(...)`: the output as a string.
    pub(crate) fn render_to_string(&mut self, callee: &Value, args: Arguments) -> Result<String, Error> {
        let mut output = String::new();
        self.isolated(|ctx| ctx.render_value(callee, args, &mut output))?;
        Ok(output)
    }

    pub(crate) fn exec_block(
        &mut self,
        nodes: &[Node],
        out: &mut dyn fmt::Write,
    ) -> Result<Flow, Error> {
        for node in nodes {
            match self.exec(node, out)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, node: &Node, out: &mut dyn fmt::Write) -> Result<Flow, Error> {
        self.exec_node(node, out).map_err(|err| {
            if node.is_literal() {
                return err;
            }
            match self.location(node.span()) {
                Some(location) => err.located(location),
                None => err,
            }
        })
    }

    fn exec_node(&mut self, node: &Node, out: &mut dyn fmt::Write) -> Result<Flow, Error> {
        match node {
            Node::Text { span } | Node::LineEnd { span } => {
                let text = self.source_text(*span);
                self.output(out, &text)?;
            }
            Node::Indent(indent) => {
                let mut text = self.indentation();
                if let Some(template) = self.current_template() {
                    text.push_str(indent.text(template.source()));
                }
                self.output(out, &text)?;
            }
            Node::Print { expr, .. } => {
                let value = self.eval(expr, out)?;
                self.output(out, &value.to_str())?;
            }
            Node::PrintX { expr, .. } => {
                let value = self.eval(expr, out)?;
                self.output(out, &xmlescape(&value.to_str()))?;
            }
            Node::Expr { expr, .. } => {
                self.eval(expr, out)?;
            }
            Node::Set { target, value, .. } => {
                let value = self.eval(value, out)?;
                self.assign(target, value, out)?;
            }
            Node::Modify {
                op, target, value, ..
            } => {
                let value = self.eval(value, out)?;
                let current = self.eval_target(target, out)?;
                let result = ops::binary(*op, &current, &value)?;
                self.assign(target, result, out)?;
            }
            Node::For(block) => {
                let container = self.eval(&block.container, out)?;
                for item in container.iterate()? {
                    self.assign(&block.target, item, out)?;
                    match self.exec_block(&block.body, out)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            Node::While(block) => {
                while self.eval(&block.condition, out)?.truthy() {
                    match self.exec_block(&block.body, out)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            Node::Break { .. } => return Ok(Flow::Break),
            Node::Continue { .. } => return Ok(Flow::Continue),
            Node::Return { expr, .. } => return Ok(Flow::Return(self.eval(expr, out)?)),
            Node::If(block) => {
                for branch in &block.branches {
                    let taken = match &branch.condition {
                        Some(condition) => self.eval(condition, out)?.truthy(),
                        None => true,
                    };
                    if taken {
                        return self.exec_block(&branch.body, out);
                    }
                }
            }
            Node::Def(template) => {
                let closure = Closure::new(template.clone(), self.snapshot());
                if let Some(name) = template.name() {
                    self.set_var(name, Value::Closure(Rc::new(closure)));
                }
            }
            Node::Render(render) => {
                let callee = self.eval(&render.call.callee, out)?;
                let args = self.eval_args(&render.call.args, out)?;
                let escape = (render.kind == RenderKind::RenderX).then_some(xmlescape as fn(&str) -> String);
                self.render_indented(&callee, args, render.indent.as_ref(), escape, out)?;
            }
            Node::RenderBlock(render) => {
                let callee = self.eval(&render.call.callee, out)?;
                let mut args = self.eval_args(&render.call.args, out)?;
                let content = Closure::new(render.content.clone(), self.snapshot());
                args.keyword
                    .push(("content".to_string(), Value::Closure(Rc::new(content))));
                self.render_indented(&callee, args, render.indent.as_ref(), None, out)?;
            }
            Node::RenderBlocks(render) => {
                let callee = self.eval(&render.call.callee, out)?;
                let mut args = self.eval_args(&render.call.args, out)?;
                self.push_scope();
                let body = self.exec_block(&render.body, &mut Discard);
                let collected = self.pop_scope();
                if let flow @ Flow::Return(_) = body? {
                    return Ok(flow);
                }
                args.keyword.extend(collected);
                self.render_indented(&callee, args, render.indent.as_ref(), None, out)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn render_indented(
        &mut self,
        callee: &Value,
        args: Arguments,
        indent: Option<&Indent>,
        escape: Option<fn(&str) -> String>,
        out: &mut dyn fmt::Write,
    ) -> Result<(), Error> {
        if let Some(indent) = indent {
            let text = match self.current_template() {
                Some(template) => Rc::from(indent.text(template.source())),
                None => Rc::from(""),
            };
            self.push_indent(text);
        }
        if let Some(escape) = escape {
            self.push_escape(escape);
        }
        let result = self.render_value(callee, args, out);
        if escape.is_some() {
            self.pop_escape();
        }
        if indent.is_some() {
            self.pop_indent();
        }
        result
    }

    fn source_text(&self, span: Span) -> String {
        self.current_template()
            .and_then(|template| span.text(template.source()))
            .unwrap_or_default()
            .to_string()
    }

    /// The current value of an assignment target, for `+=` and friends.
    fn eval_target(&mut self, target: &Target, out: &mut dyn fmt::Write) -> Result<Value, Error> {
        match target {
            Target::Var { name, .. } => self.lookup(name).defined(),
            Target::Attr { object, name, .. } => {
                let object = self.eval(object, out)?;
                ops::get_attr(&object, name)?.defined()
            }
            Target::Item { object, index, .. } => {
                let object = self.eval(object, out)?;
                let index = self.eval(index, out)?;
                ops::get_item(&object, &index)?.defined()
            }
            Target::Unpack { span, .. } => Err(Error::syntax(
                "augmented assignment to multiple targets",
                *span,
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value, out: &mut dyn fmt::Write) -> Result<(), Error> {
        match target {
            Target::Var { name, .. } => {
                self.set_var(name, value);
                Ok(())
            }
            Target::Attr { object, name, .. } => {
                let object = self.eval(object, out)?;
                ops::set_attr(&object, name, value)
            }
            Target::Item { object, index, .. } => {
                let object = self.eval(object, out)?;
                let index = self.eval(index, out)?;
                ops::set_item(&object, &index, value)
            }
            Target::Unpack { targets, .. } => {
                let items: Vec<Value> = value.iterate()?.take(targets.len() + 1).collect();
                if items.len() != targets.len() {
                    return Err(Error::Unpack {
                        expected: targets.len(),
                        got: items.len(),
                    });
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, out)?;
                }
                Ok(())
            }
        }
    }

    fn eval_args(&mut self, args: &[Arg], out: &mut dyn fmt::Write) -> Result<Arguments, Error> {
        let mut arguments = Arguments::new();
        for arg in args {
            match arg {
                Arg::Positional { value, .. } => arguments.positional.push(self.eval(value, out)?),
                Arg::Keyword { name, value, .. } => {
                    let value = self.eval(value, out)?;
                    arguments.keyword.push((name.to_string(), value));
                }
                Arg::UnpackList { expr, .. } => {
                    let value = self.eval(expr, out)?;
                    arguments.positional.extend(value.iterate()?);
                }
                Arg::UnpackDict { expr, .. } => {
                    let value = self.eval(expr, out)?;
                    let Value::Dict(dict) = &value else {
                        return Err(Error::type_error(format!(
                            "** argument must be a dict, not {}",
                            value.type_name()
                        )));
                    };
                    for (key, item) in dict.borrow().iter() {
                        let Value::Str(name) = key else {
                            return Err(Error::type_error("keywords must be strings"));
                        };
                        arguments.keyword.push((name.to_string(), item.clone()));
                    }
                }
            }
        }
        Ok(arguments)
    }

    fn eval_items(&mut self, items: &[SeqItem], out: &mut dyn fmt::Write) -> Result<Vec<Value>, Error> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SeqItem::Item(expr) => values.push(self.eval(expr, out)?),
                SeqItem::Unpack { expr, .. } => values.extend(self.eval(expr, out)?.iterate()?),
            }
        }
        Ok(values)
    }

    /// Runs `body` for every item of a comprehension, in a scope of its own.
    fn comprehend(
        &mut self,
        comp: &Comprehension,
        out: &mut dyn fmt::Write,
        mut body: impl FnMut(&mut Self, &mut dyn fmt::Write) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let container = self.eval(&comp.container, out)?;
        self.push_scope();
        let result = (|| -> Result<(), Error> {
            for item in container.iterate()? {
                self.assign(&comp.target, item, out)?;
                if let Some(condition) = &comp.condition {
                    if !self.eval(condition, out)?.truthy() {
                        continue;
                    }
                }
                body(self, out)?;
            }
            Ok(())
        })();
        self.pop_scope();
        result
    }

    pub(crate) fn eval(&mut self, expr: &Expr, out: &mut dyn fmt::Write) -> Result<Value, Error> {
        match expr {
            Expr::Const { value, .. } => Ok(value.clone()),
            Expr::Var { name, .. } => Ok(self.lookup(name)),
            Expr::List { items, .. } => Ok(Value::list(self.eval_items(items, out)?)),
            Expr::Set { items, .. } => {
                let values = self.eval_items(items, out)?;
                let mut set = IndexSet::with_capacity(values.len());
                for value in values {
                    value.check_hashable()?;
                    set.insert(value);
                }
                Ok(Value::set(set))
            }
            Expr::Dict { items, .. } => {
                let mut dict = IndexMap::new();
                for item in items {
                    match item {
                        DictItem::Item { key, value, .. } => {
                            let key = self.eval(key, out)?;
                            key.check_hashable()?;
                            let value = self.eval(value, out)?;
                            dict.insert(key, value);
                        }
                        DictItem::Unpack { expr, .. } => match self.eval(expr, out)? {
                            Value::Dict(other) => {
                                dict.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                            }
                            other => {
                                return Err(Error::type_error(format!(
                                    "** requires a dict, not {}",
                                    other.type_name()
                                )))
                            }
                        },
                    }
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp { item, comp, .. } | Expr::GenExpr { item, comp, .. } => {
                let mut items = Vec::new();
                self.comprehend(comp, out, |ctx, out| {
                    items.push(ctx.eval(item, out)?);
                    Ok(())
                })?;
                if matches!(expr, Expr::GenExpr { .. }) {
                    Ok(Value::iter(items.into_iter()))
                } else {
                    Ok(Value::list(items))
                }
            }
            Expr::SetComp { item, comp, .. } => {
                let mut set = IndexSet::new();
                self.comprehend(comp, out, |ctx, out| {
                    let value = ctx.eval(item, out)?;
                    value.check_hashable()?;
                    set.insert(value);
                    Ok(())
                })?;
                Ok(Value::set(set))
            }
            Expr::DictComp {
                key, value, comp, ..
            } => {
                let mut dict = IndexMap::new();
                self.comprehend(comp, out, |ctx, out| {
                    let key = ctx.eval(key, out)?;
                    key.check_hashable()?;
                    let value = ctx.eval(value, out)?;
                    dict.insert(key, value);
                    Ok(())
                })?;
                Ok(Value::dict(dict))
            }
            Expr::Attr { object, name, .. } => {
                let object = self.eval(object, out)?;
                ops::get_attr(&object, name)
            }
            Expr::Item { object, index, .. } => {
                let object = self.eval(object, out)?;
                let index = self.eval(index, out)?;
                ops::get_item(&object, &index)
            }
            Expr::Slice {
                object, start, stop, ..
            } => {
                let object = self.eval(object, out)?;
                let start = match start {
                    Some(start) => ops::slice_index(&self.eval(start, out)?)?,
                    None => None,
                };
                let stop = match stop {
                    Some(stop) => ops::slice_index(&self.eval(stop, out)?)?,
                    None => None,
                };
                ops::get_slice(&object, start, stop)
            }
            Expr::Unary { op, operand, .. } => {
                let operand = self.eval(operand, out)?;
                ops::unary(*op, &operand)
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let left = self.eval(left, out)?;
                let right = self.eval(right, out)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Compare {
                op, left, right, ..
            } => {
                let left = self.eval(left, out)?;
                let right = self.eval(right, out)?;
                ops::compare(*op, &left, &right)
            }
            Expr::And { left, right, .. } => {
                let left = self.eval(left, out)?;
                if left.truthy() {
                    self.eval(right, out)
                } else {
                    Ok(left)
                }
            }
            Expr::Or { left, right, .. } => {
                let left = self.eval(left, out)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right, out)
                }
            }
            Expr::If {
                then,
                condition,
                otherwise,
                ..
            } => {
                if self.eval(condition, out)?.truthy() {
                    self.eval(then, out)
                } else {
                    self.eval(otherwise, out)
                }
            }
            Expr::Call(call) => {
                let callee = self.eval(&call.callee, out)?;
                let args = self.eval_args(&call.args, out)?;
                self.call_value(&callee, args, out)
            }
        }
    }
}
