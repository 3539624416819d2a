//! Source positions for UL4 templates.
//!
//! Every compiled node refers back into the template source through a
//! [`Span`]. Human readable positions are computed lazily through a
//! [`LineIndex`], and [`DiagnosticRenderer`] turns a span plus a message into
//! an annotated excerpt of the template source.

mod position;
mod render;
mod span;

pub use position::LineCol;
pub use position::LineIndex;
pub use render::Diagnostic;
pub use render::DiagnosticRenderer;
pub use render::Severity;
pub use span::Span;
