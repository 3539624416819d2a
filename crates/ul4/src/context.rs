use std::fmt;
use std::rc::Rc;

use tracing::trace;
use ul4_source::Span;

use crate::builtins::Builtin;
use crate::error::Error;
use crate::error::Location;
use crate::template::Template;
use crate::value::Undefined;
use crate::value::Value;
use crate::value::Vars;

/// Nesting limit for template calls.
const MAX_DEPTH: usize = 200;

/// An output sink that throws everything away.
pub(crate) struct Discard;

impl fmt::Write for Discard {
    fn write_str(&mut self, _: &str) -> fmt::Result {
        Ok(())
    }
}

/// One template invocation.
struct Frame {
    /// `None` while evaluating signature defaults at compile time.
    template: Option<Template>,
    /// Innermost last. Comprehensions and `<?renderblocks?>` bodies push a
    /// temporary scope.
    scopes: Vec<Vars>,
    /// What a closure saw when it was defined.
    captured: Option<Rc<Vars>>,
}

/// Evaluation state of one top-level render or call.
pub struct Context<'a> {
    globals: &'a Vars,
    frames: Vec<Frame>,
    escapes: Vec<fn(&str) -> String>,
    indents: Vec<Rc<str>>,
}

impl<'a> Context<'a> {
    #[must_use]
    pub fn new(globals: &'a Vars) -> Self {
        Self {
            globals,
            frames: Vec::new(),
            escapes: Vec::new(),
            indents: Vec::new(),
        }
    }

    pub(crate) fn push_frame(
        &mut self,
        template: Option<Template>,
        captured: Option<Rc<Vars>>,
    ) -> Result<(), Error> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(Error::value_error("maximum template nesting depth exceeded"));
        }
        trace!(
            template = template.as_ref().and_then(Template::name),
            depth = self.frames.len(),
            "entering template"
        );
        self.frames.push(Frame {
            template,
            scopes: vec![Vars::new()],
            captured,
        });
        Ok(())
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(Vars::new());
        }
    }

    pub(crate) fn pop_scope(&mut self) -> Vars {
        self.frames
            .last_mut()
            .and_then(|frame| frame.scopes.pop())
            .unwrap_or_default()
    }

    /// Replaces the variables of the current call.
    pub(crate) fn set_locals(&mut self, vars: Vars) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes = vec![vars];
        }
    }

    /// Local scopes, then the closure's captured variables, then globals,
    /// then builtins.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Value {
        if let Some(frame) = self.frames.last() {
            for scope in frame.scopes.iter().rev() {
                if let Some(value) = scope.get(name) {
                    return value.clone();
                }
            }
            if let Some(value) = frame.captured.as_ref().and_then(|vars| vars.get(name)) {
                return value.clone();
            }
        }
        if let Some(value) = self.globals.get(name) {
            return value.clone();
        }
        match Builtin::from_name(name) {
            Some(builtin) => Value::Function(builtin),
            None => Value::Undefined(Undefined::Variable(Rc::from(name))),
        }
    }

    pub(crate) fn set_var(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
            scope.insert(name.to_string(), value);
        }
    }

    /// A flat copy of everything a local template defined now may see.
    pub(crate) fn snapshot(&self) -> Rc<Vars> {
        let Some(frame) = self.frames.last() else {
            return Rc::new(Vars::new());
        };
        let mut vars = frame
            .captured
            .as_deref()
            .cloned()
            .unwrap_or_default();
        for scope in &frame.scopes {
            vars.extend(scope.iter().map(|(name, value)| (name.clone(), value.clone())));
        }
        Rc::new(vars)
    }

    pub(crate) fn location(&self, span: Span) -> Option<Location> {
        let template = self.frames.last()?.template.as_ref()?;
        Some(Location::new(
            template.name().map(str::to_string),
            template.shared_source(),
            span,
        ))
    }

    pub(crate) fn current_template(&self) -> Option<&Template> {
        self.frames.last()?.template.as_ref()
    }

    /// Writes template output through the active escapes.
    pub(crate) fn output(&self, out: &mut dyn fmt::Write, text: &str) -> Result<(), Error> {
        if text.is_empty() {
            return Ok(());
        }
        let result = if self.escapes.is_empty() {
            out.write_str(text)
        } else {
            let mut text = text.to_string();
            for escape in &self.escapes {
                text = escape(&text);
            }
            out.write_str(&text)
        };
        result.map_err(|_| Error::Output)
    }

    /// The indentation of every enclosing render call.
    pub(crate) fn indentation(&self) -> String {
        self.indents.concat()
    }

    pub(crate) fn push_indent(&mut self, indent: Rc<str>) {
        self.indents.push(indent);
    }

    pub(crate) fn pop_indent(&mut self) {
        self.indents.pop();
    }

    /// Runs `f` with no indentation or escaping active.
    pub(crate) fn isolated<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let indents = std::mem::take(&mut self.indents);
        let escapes = std::mem::take(&mut self.escapes);
        let result = f(self);
        self.indents = indents;
        self.escapes = escapes;
        result
    }

    pub(crate) fn push_escape(&mut self, escape: fn(&str) -> String) {
        self.escapes.push(escape);
    }

    pub(crate) fn pop_escape(&mut self) {
        self.escapes.pop();
    }
}
