use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use ul4_source::Diagnostic;
use ul4_source::DiagnosticRenderer;
use ul4_source::LineCol;
use ul4_source::LineIndex;
use ul4_source::Span;

use crate::value::Undefined;

/// Everything that can go wrong while compiling, rendering, or
/// (de)serializing a template.
///
/// Evaluation errors travel outwards wrapped in [`Error::Located`], one layer
/// per tag they pass through, so the outermost error names the entry point
/// and [`Error::root`] names the actual failure.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("empty template")]
    EmptyTemplate,

    #[error("unterminated <?ignore?> block")]
    UnterminatedIgnore { span: Span },

    #[error("{message}")]
    Syntax { message: String, span: Span },

    #[error("whitespace mode {mode:?} unknown (expected keep, strip or smart)")]
    InvalidWhitespace { mode: String, span: Span },

    #[error("<?{kind}?> doesn't match any <?if?>")]
    OrphanBranch { kind: &'static str, span: Span },

    #[error("<?{kind}?> after <?else?>")]
    DuplicateElse { kind: &'static str, span: Span },

    #[error("<?end?> doesn't match any open block")]
    UnmatchedEnd { span: Span },

    #[error("<?end {found}?> doesn't match <?{expected}?>")]
    EndMismatch {
        expected: &'static str,
        found: String,
        span: Span,
    },

    #[error("<?{kind}?> block is never closed")]
    Unclosed { kind: &'static str, span: Span },

    #[error("<?{kind}?> outside of a loop")]
    LoopControlOutsideLoop { kind: &'static str, span: Span },

    #[error("<?{kind}?> requires a call expression")]
    InvalidRenderTarget { kind: &'static str, span: Span },

    #[error("invalid signature: {message}")]
    InvalidSignature { message: String, span: Span },

    #[error("<?ul4?> is only allowed outside of <?def?>")]
    NestedDeclaration { span: Span },

    #[error("{callable}() takes at most {max} positional arguments ({given} given)")]
    TooManyArguments {
        callable: String,
        max: usize,
        given: usize,
    },

    #[error("{callable}() got an unexpected keyword argument {name:?}")]
    UnknownKeyword { callable: String, name: String },

    #[error("{callable}() got multiple values for argument {name:?}")]
    DuplicateArgument { callable: String, name: String },

    #[error("{callable}() missing required argument {name:?}")]
    MissingArgument { callable: String, name: String },

    #[error("{0}")]
    Type(String),

    #[error("{0}")]
    Value(String),

    #[error("{0}")]
    Undefined(Undefined),

    #[error("{0} is not iterable")]
    NotIterable(String),

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("{0} is not renderable")]
    NotRenderable(String),

    #[error("division by zero")]
    ZeroDivision,

    #[error("integer overflow")]
    Overflow,

    #[error("unhashable type: {0}")]
    Unhashable(String),

    #[error("index {0} out of range")]
    Index(i64),

    #[error("{}", unpack_message(*expected, *got))]
    Unpack { expected: usize, got: usize },

    #[error("writing template output failed")]
    Output,

    #[error("broken UL4ON stream at position {position}: {message}")]
    Ul4on { message: String, position: usize },

    #[error("invalid UL4ON template version: expected {expected:?}, got {found:?}")]
    VersionMismatch { expected: String, found: String },

    #[error("template {name:?} not found (searched {searched})")]
    TemplateNotFound { name: String, searched: String },

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("{location}")]
    Located {
        location: Box<Location>,
        #[source]
        source: Box<Error>,
    },
}

fn unpack_message(expected: usize, got: usize) -> String {
    if got > expected {
        format!("too many values to unpack (expected {expected})")
    } else {
        format!("not enough values to unpack (expected {expected}, got {got})")
    }
}

impl Error {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }

    pub(crate) fn value_error(message: impl Into<String>) -> Self {
        Error::Value(message.into())
    }

    pub(crate) fn syntax(message: impl Into<String>, span: Span) -> Self {
        Error::Syntax {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn located(self, location: Location) -> Self {
        Error::Located {
            location: Box::new(location),
            source: Box::new(self),
        }
    }

    /// The undecorated error at the end of the location chain.
    #[must_use]
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Located { source, .. } = current {
            current = source;
        }
        current
    }

    /// Locations the error passed through, innermost first.
    #[must_use]
    pub fn locations(&self) -> Vec<&Location> {
        let mut locations = Vec::new();
        let mut current = self;
        while let Error::Located { location, source } = current {
            locations.push(location.as_ref());
            current = source;
        }
        locations.reverse();
        locations
    }

    /// Source span carried by compile errors.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self.root() {
            Error::UnterminatedIgnore { span }
            | Error::Syntax { span, .. }
            | Error::InvalidWhitespace { span, .. }
            | Error::OrphanBranch { span, .. }
            | Error::DuplicateElse { span, .. }
            | Error::UnmatchedEnd { span }
            | Error::EndMismatch { span, .. }
            | Error::Unclosed { span, .. }
            | Error::LoopControlOutsideLoop { span, .. }
            | Error::InvalidRenderTarget { span, .. }
            | Error::InvalidSignature { span, .. }
            | Error::NestedDeclaration { span } => Some(*span),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self.root() {
            Error::EmptyTemplate
            | Error::UnterminatedIgnore { .. }
            | Error::Syntax { .. }
            | Error::InvalidWhitespace { .. }
            | Error::InvalidSignature { .. }
            | Error::NestedDeclaration { .. } => "U100",
            Error::OrphanBranch { .. }
            | Error::DuplicateElse { .. }
            | Error::UnmatchedEnd { .. }
            | Error::EndMismatch { .. }
            | Error::Unclosed { .. }
            | Error::LoopControlOutsideLoop { .. }
            | Error::InvalidRenderTarget { .. } => "U101",
            Error::TooManyArguments { .. }
            | Error::UnknownKeyword { .. }
            | Error::DuplicateArgument { .. }
            | Error::MissingArgument { .. } => "U200",
            Error::Ul4on { .. } | Error::VersionMismatch { .. } => "U400",
            Error::TemplateNotFound { .. } | Error::Io { .. } => "U900",
            _ => "U300",
        }
    }

    /// A plain-text report: the root message followed by every location,
    /// innermost first.
    #[must_use]
    pub fn report(&self) -> String {
        let mut report = self.root().to_string();
        for location in self.locations() {
            report.push_str("\n  in ");
            report.push_str(&location.to_string());
        }
        report
    }

    /// An annotated excerpt of the innermost template, with the outer
    /// frames listed as notes.
    #[must_use]
    pub fn render_report(&self, renderer: &DiagnosticRenderer) -> String {
        let locations = self.locations();
        let Some((innermost, outer)) = locations.split_first() else {
            return self.report();
        };
        let message = self.root().to_string();
        let origin = innermost.template_name().unwrap_or("<unnamed>");
        let span = self.span().unwrap_or(innermost.span());
        let notes: Vec<String> = outer.iter().map(|l| format!("called from {l}")).collect();
        let mut diagnostic = Diagnostic::new(
            innermost.source(),
            origin,
            self.code(),
            &message,
            span,
            "here",
        );
        for note in &notes {
            diagnostic = diagnostic.note(note);
        }
        renderer.render(&diagnostic)
    }
}

/// Where in which template something happened.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    template: Option<String>,
    source: Rc<str>,
    span: Span,
}

impl Location {
    pub(crate) fn new(template: Option<String>, source: Rc<str>, span: Span) -> Self {
        Self {
            template,
            source,
            span,
        }
    }

    #[must_use]
    pub fn template_name(&self) -> Option<&str> {
        self.template.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn span(&self) -> Span {
        self.span
    }

    /// The source text of the tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.span.text(&self.source).unwrap_or_default()
    }

    #[must_use]
    pub fn line_col(&self) -> LineCol {
        LineIndex::new(&self.source).line_col(&self.source, self.span.start())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = self.line_col();
        write!(f, "{} in ", self.tag())?;
        match &self.template {
            Some(name) => write!(f, "template {name:?}")?,
            None => f.write_str("unnamed template")?,
        }
        write!(
            f,
            " at {}:{} (line {}, col {})",
            self.span.start(),
            self.span.end(),
            position.line(),
            position.column()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(name: Option<&str>, source: &str, span: Span) -> Location {
        Location::new(name.map(str::to_string), Rc::from(source), span)
    }

    #[test]
    fn test_location_display() {
        let loc = location(Some("page"), "abc\n<?print x?>", Span::new(4, 11));
        insta::assert_snapshot!(loc, @r#"<?print x?> in template "page" at 4:15 (line 2, col 1)"#);
    }

    #[test]
    fn test_location_display_unnamed() {
        let loc = location(None, "<?print x?>", Span::new(0, 11));
        assert_eq!(
            loc.to_string(),
            "<?print x?> in unnamed template at 0:11 (line 1, col 1)"
        );
    }

    #[test]
    fn test_chain_order() {
        let source = "<?for x in y?><?print 1/0?><?end for?>";
        let err = Error::ZeroDivision
            .located(location(Some("t"), source, Span::new(14, 13)))
            .located(location(Some("t"), source, Span::new(0, 14)));
        assert_eq!(err.root(), &Error::ZeroDivision);
        let tags: Vec<&str> = err.locations().iter().map(|l| l.tag()).collect();
        assert_eq!(tags, ["<?print 1/0?>", "<?for x in y?>"]);
        assert_eq!(err.code(), "U300");
    }

    #[test]
    fn test_report() {
        let source = "<?print 1/0?>";
        let err = Error::ZeroDivision.located(location(Some("t"), source, Span::new(0, 13)));
        assert_eq!(
            err.report(),
            "division by zero\n  in <?print 1/0?> in template \"t\" at 0:13 (line 1, col 1)"
        );
    }

    #[test]
    fn test_render_report() {
        let source = "<?print 1/0?>";
        let err = Error::ZeroDivision.located(location(Some("t"), source, Span::new(0, 13)));
        let output = err.render_report(&DiagnosticRenderer::plain());
        assert!(output.contains("error[U300]"));
        assert!(output.contains("division by zero"));
        assert!(output.contains("<?print 1/0?>"));
    }

    #[test]
    fn test_unpack_message() {
        let few = Error::Unpack {
            expected: 3,
            got: 2,
        };
        assert_eq!(
            few.to_string(),
            "not enough values to unpack (expected 3, got 2)"
        );
        let many = Error::Unpack {
            expected: 2,
            got: 3,
        };
        assert_eq!(many.to_string(), "too many values to unpack (expected 2)");
    }
}
