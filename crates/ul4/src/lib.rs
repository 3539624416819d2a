//! UL4, a cross-platform templating language.
//!
//! Templates are compiled once into a syntax tree and can then be rendered
//! any number of times, called for their `<?return?>` value, or serialized
//! to UL4ON and loaded by another runtime without reparsing.
//!
//! ## Pipeline
//!
//! 1. **Lexing**: the source is split into text and `<?tag code?>` tokens
//! 2. **Whitespace**: indentation and line feeds are kept, stripped, or
//!    handled smartly depending on the template's whitespace mode
//! 3. **Parsing**: tag code is parsed into expressions and block nodes, with
//!    constant operands folded
//! 4. **Evaluation**: nodes are executed against a [`Context`] that tracks
//!    variables, indentation and escaping
//!
//! ## Example
//!
//! ```
//! use ul4::{Arguments, Template};
//!
//! let template = Template::compile("<?ul4 greet(name)?>Hello, <?print name?>!")?;
//! let output = template.renders(Arguments::new().kwarg("name", "world"))?;
//! assert_eq!(output, "Hello, world!");
//! # Ok::<(), ul4::Error>(())
//! ```

pub mod ast;
mod builtins;
mod context;
mod error;
mod eval;
mod format;
mod grammar;
mod lexer;
mod loader;
mod methods;
mod ops;
mod parser;
mod scanner;
mod signature;
mod template;
mod tokens;
pub mod ul4on;
mod value;
mod whitespace;

pub use builtins::Builtin;
pub use context::Context;
pub use error::Error;
pub use error::Location;
pub use loader::TemplateLoader;
pub use methods::BoundMethod;
pub use signature::bind;
pub use signature::Arguments;
pub use signature::BuiltinParam;
pub use signature::Param;
pub use signature::ParamDefault;
pub use signature::ParamKind;
pub use signature::Parameter;
pub use signature::Signature;
pub use template::Closure;
pub use template::CompileOptions;
pub use template::Template;
pub use ul4_conf::Settings;
pub use ul4_conf::Whitespace;
pub use ul4_source::DiagnosticRenderer;
pub use ul4_source::Span;
pub use value::Object;
pub use value::Undefined;
pub use value::Value;
pub use value::ValueIter;
pub use value::Vars;
