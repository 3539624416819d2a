use std::fmt;
use std::rc::Rc;

use ul4_conf::Settings;
use ul4_conf::Whitespace;
use ul4_source::Span;

use crate::ast::Node;
use crate::context::Context;
use crate::context::Discard;
use crate::error::Error;
use crate::parser;
use crate::signature::Arguments;
use crate::signature::Signature;
use crate::ul4on;
use crate::value::Value;
use crate::value::Vars;

/// How source text is turned into a [`Template`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Overrides the name given in a `<?ul4?>` tag.
    pub name: Option<String>,
    pub whitespace: Whitespace,
    pub startdelim: String,
    pub enddelim: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            name: None,
            whitespace: Whitespace::Keep,
            startdelim: "<?".to_string(),
            enddelim: "?>".to_string(),
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_whitespace(mut self, whitespace: Whitespace) -> Self {
        self.whitespace = whitespace;
        self
    }

    #[must_use]
    pub fn with_delimiters(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.startdelim = start.into();
        self.enddelim = end.into();
        self
    }
}

impl From<&Settings> for CompileOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            name: None,
            whitespace: settings.whitespace(),
            startdelim: settings.startdelim().to_string(),
            enddelim: settings.enddelim().to_string(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct TemplateData {
    pub(crate) name: Option<Rc<str>>,
    pub(crate) source: Rc<str>,
    pub(crate) whitespace: Whitespace,
    pub(crate) startdelim: Rc<str>,
    pub(crate) enddelim: Rc<str>,
    pub(crate) doc: Option<Rc<str>>,
    pub(crate) signature: Option<Signature>,
    /// The `<?def?>` tag of a local template.
    pub(crate) span: Option<Span>,
    /// The matching `<?end def?>` tag.
    pub(crate) stop: Option<Span>,
    pub(crate) content: Vec<Node>,
}

/// A compiled template.
///
/// Templates are immutable and cheap to clone. Local templates defined with
/// `<?def?>` are templates too; evaluating their definition binds a
/// [`Closure`] instead of producing output.
#[derive(Clone, PartialEq)]
pub struct Template(Rc<TemplateData>);

impl Template {
    pub(crate) fn new(data: TemplateData) -> Self {
        Self(Rc::new(data))
    }

    pub fn compile(source: &str) -> Result<Self, Error> {
        Self::compile_with(source, &CompileOptions::default())
    }

    pub fn compile_with(source: &str, options: &CompileOptions) -> Result<Self, Error> {
        parser::compile(source, options)
    }

    /// Loads a template from its UL4ON dump.
    pub fn loads(dump: &str) -> Result<Self, Error> {
        match ul4on::loads(dump)? {
            Value::Template(template) => Ok(template),
            other => Err(Error::Ul4on {
                message: format!("expected a template, got {}", other.type_name()),
                position: 0,
            }),
        }
    }

    pub fn dumps(&self) -> Result<String, Error> {
        ul4on::dumps(&Value::Template(self.clone()), None)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.0.source
    }

    pub(crate) fn shared_source(&self) -> Rc<str> {
        Rc::clone(&self.0.source)
    }

    #[must_use]
    pub fn whitespace(&self) -> Whitespace {
        self.0.whitespace
    }

    #[must_use]
    pub fn startdelim(&self) -> &str {
        &self.0.startdelim
    }

    #[must_use]
    pub fn enddelim(&self) -> &str {
        &self.0.enddelim
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.0.doc.as_deref()
    }

    #[must_use]
    pub fn signature(&self) -> Option<&Signature> {
        self.0.signature.as_ref()
    }

    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.0.span
    }

    #[must_use]
    pub fn stop(&self) -> Option<Span> {
        self.0.stop
    }

    #[must_use]
    pub fn content(&self) -> &[Node] {
        &self.0.content
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Template) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Streams the output into `out`.
    pub fn render<W: fmt::Write>(&self, out: &mut W, args: impl Into<Arguments>) -> Result<(), Error> {
        self.render_with_globals(out, args, &Vars::new())
    }

    pub fn render_with_globals<W: fmt::Write>(
        &self,
        out: &mut W,
        args: impl Into<Arguments>,
        globals: &Vars,
    ) -> Result<(), Error> {
        Context::new(globals).call_template(self, None, args.into(), out)?;
        Ok(())
    }

    pub fn renders(&self, args: impl Into<Arguments>) -> Result<String, Error> {
        self.renders_with_globals(args, &Vars::new())
    }

    pub fn renders_with_globals(
        &self,
        args: impl Into<Arguments>,
        globals: &Vars,
    ) -> Result<String, Error> {
        let mut output = String::new();
        self.render_with_globals(&mut output, args, globals)?;
        Ok(output)
    }

    /// Runs the template for its `<?return?>` value, discarding the output.
    pub fn call(&self, args: impl Into<Arguments>) -> Result<Value, Error> {
        self.call_with_globals(args, &Vars::new())
    }

    pub fn call_with_globals(
        &self,
        args: impl Into<Arguments>,
        globals: &Vars,
    ) -> Result<Value, Error> {
        Context::new(globals).call_template(self, None, args.into(), &mut Discard)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.0.name)
            .field("whitespace", &self.0.whitespace)
            .field("signature", &self.0.signature)
            .field("content", &self.0.content)
            .finish_non_exhaustive()
    }
}

/// A local template together with the variables that were visible when its
/// `<?def?>` ran.
#[derive(Debug)]
pub struct Closure {
    template: Template,
    captured: Rc<Vars>,
}

impl Closure {
    pub(crate) fn new(template: Template, captured: Rc<Vars>) -> Self {
        Self { template, captured }
    }

    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub(crate) fn captured(&self) -> &Rc<Vars> {
        &self.captured
    }
}
