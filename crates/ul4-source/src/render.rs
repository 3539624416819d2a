use annotate_snippets::AnnotationKind;
use annotate_snippets::Level;
use annotate_snippets::Renderer;
use annotate_snippets::Snippet;

use crate::Span;

/// Label printed in front of a rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A highlighted span inside the excerpt.
#[derive(Debug, Clone)]
pub struct Annotation<'a> {
    pub span: Span,
    pub label: &'a str,
    pub primary: bool,
}

/// Everything needed to print one annotated template excerpt.
#[derive(Debug)]
pub struct Diagnostic<'a> {
    pub source: &'a str,
    pub origin: &'a str,
    pub code: &'a str,
    pub message: &'a str,
    pub severity: Severity,
    pub annotations: Vec<Annotation<'a>>,
    pub notes: Vec<&'a str>,
}

impl<'a> Diagnostic<'a> {
    /// A diagnostic pointing at a single primary span.
    #[must_use]
    pub fn new(
        source: &'a str,
        origin: &'a str,
        code: &'a str,
        message: &'a str,
        span: Span,
        label: &'a str,
    ) -> Self {
        Self {
            source,
            origin,
            code,
            message,
            severity: Severity::Error,
            annotations: vec![Annotation {
                span,
                label,
                primary: true,
            }],
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn annotation(mut self, span: Span, label: &'a str) -> Self {
        self.annotations.push(Annotation {
            span,
            label,
            primary: false,
        });
        self
    }

    #[must_use]
    pub fn note(mut self, note: &'a str) -> Self {
        self.notes.push(note);
        self
    }
}

/// Renders [`Diagnostic`]s through `annotate-snippets`.
#[derive(Debug)]
pub struct DiagnosticRenderer {
    renderer: Renderer,
}

impl DiagnosticRenderer {
    /// No ANSI escapes. Used by tests and for logs.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            renderer: Renderer::plain(),
        }
    }

    #[must_use]
    pub fn styled() -> Self {
        Self {
            renderer: Renderer::styled(),
        }
    }

    #[must_use]
    pub fn render(&self, diagnostic: &Diagnostic<'_>) -> String {
        let level = match diagnostic.severity {
            Severity::Error => Level::ERROR,
            Severity::Warning => Level::WARNING,
            Severity::Note => Level::NOTE,
        };

        let mut snippet = Snippet::source(diagnostic.source)
            .path(diagnostic.origin)
            .line_start(1);

        for annotation in &diagnostic.annotations {
            // annotate-snippets indexes by byte; clamp to the source so a
            // stale span cannot panic the renderer.
            let end = annotation.span.end_usize().min(diagnostic.source.len());
            let start = annotation.span.start_usize().min(end);
            let kind = if annotation.primary {
                AnnotationKind::Primary
            } else {
                AnnotationKind::Context
            };
            snippet = snippet.annotation(kind.span(start..end).label(annotation.label));
        }

        let mut title = level
            .primary_title(diagnostic.message)
            .id(diagnostic.code)
            .element(snippet);

        for note in &diagnostic.notes {
            title = title.element(Level::NOTE.message(*note));
        }

        let report = &[title];
        self.renderer.render(report).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_span() {
        let source = "<?for x in y?>\n<?print x?>\n";
        let diagnostic = Diagnostic::new(
            source,
            "page",
            "E-UNCLOSED",
            "unclosed <?for?> block",
            Span::new(0, 14),
            "opened here",
        );
        let output = DiagnosticRenderer::plain().render(&diagnostic);

        assert!(output.contains("error[E-UNCLOSED]"));
        assert!(output.contains("unclosed <?for?> block"));
        assert!(output.contains("page"));
        assert!(output.contains("<?for x in y?>"));
        assert!(output.contains("opened here"));
        assert!(output.contains("^^^"));
    }

    #[test]
    fn test_context_annotation_and_note() {
        let source = "<?if x?>\n<?end for?>\n";
        let diagnostic = Diagnostic::new(
            source,
            "page",
            "E-END",
            "<?end for?> doesn't match <?if?>",
            Span::new(9, 11),
            "closes for",
        )
        .annotation(Span::new(0, 8), "opened as if")
        .note("called from <?render page()?>");
        let output = DiagnosticRenderer::plain().render(&diagnostic);

        assert!(output.contains("closes for"));
        assert!(output.contains("opened as if"));
        assert!(output.contains("note: called from <?render page()?>"));
    }

    #[test]
    fn test_warning_severity() {
        let source = "<?print x?>";
        let diagnostic = Diagnostic::new(source, "t", "W1", "odd", Span::new(0, 11), "here")
            .severity(Severity::Warning);
        let output = DiagnosticRenderer::plain().render(&diagnostic);
        assert!(output.contains("warning[W1]"));
    }

    #[test]
    fn test_out_of_range_span_is_clamped() {
        let source = "<?print x?>";
        let diagnostic = Diagnostic::new(source, "t", "E1", "boom", Span::new(5, 500), "here");
        let output = DiagnosticRenderer::plain().render(&diagnostic);
        assert!(output.contains("boom"));
    }

    #[test]
    fn test_plain_has_no_ansi() {
        let source = "<?print x?>";
        let diagnostic = Diagnostic::new(source, "t", "E1", "boom", Span::new(0, 11), "here");
        let output = DiagnosticRenderer::plain().render(&diagnostic);
        assert!(!output.contains("\x1b["));
        let styled = DiagnosticRenderer::styled().render(&diagnostic);
        assert!(styled.contains("\x1b["));
    }
}
