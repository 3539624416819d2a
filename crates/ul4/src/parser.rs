use std::rc::Rc;
use std::str::FromStr;

use tracing::debug;
use ul4_conf::Whitespace;
use ul4_source::Span;

use crate::ast::count_nodes;
use crate::ast::Branch;
use crate::ast::BranchKind;
use crate::ast::CallExpr;
use crate::ast::Expr;
use crate::ast::ForBlock;
use crate::ast::IfBlock;
use crate::ast::Indent;
use crate::ast::Node;
use crate::ast::Render;
use crate::ast::RenderBlock;
use crate::ast::RenderBlocks;
use crate::ast::RenderKind;
use crate::ast::Target;
use crate::ast::WhileBlock;
use crate::error::Error;
use crate::error::Location;
use crate::eval::evaluate_constant;
use crate::grammar;
use crate::grammar::Statement;
use crate::lexer::Lexer;
use crate::signature::ParamDefault;
use crate::signature::Signature;
use crate::template::CompileOptions;
use crate::template::Template;
use crate::template::TemplateData;
use crate::tokens::TagKind;
use crate::tokens::Token;
use crate::whitespace;

pub(crate) fn compile(source: &str, options: &CompileOptions) -> Result<Template, Error> {
    if source.is_empty() {
        return Err(Error::EmptyTemplate);
    }
    let source: Rc<str> = Rc::from(source);
    let name: Option<Rc<str>> = options.name.as_deref().map(Rc::from);
    let locate = |err: Error| match err.span() {
        Some(span) => {
            let location = Location::new(name.as_deref().map(str::to_string), Rc::clone(&source), span);
            err.located(location)
        }
        None => err,
    };

    let tokens = Lexer::new(&source, &options.startdelim, &options.enddelim)
        .tokenize()
        .map_err(locate)?;
    let mode = whitespace_mode(&tokens, &source, options.whitespace).map_err(locate)?;
    let tokens = whitespace::apply(tokens, mode, &source);

    let mut parser = Parser::new(Rc::clone(&source), options, mode, name.clone());
    let template = parser.parse(tokens)?;
    debug!(
        name = template.name(),
        whitespace = %mode,
        nodes = count_nodes(template.content()),
        "compiled template"
    );
    Ok(template)
}

/// The mode of the first `<?whitespace?>` tag, if any.
fn whitespace_mode(tokens: &[Token], source: &str, default: Whitespace) -> Result<Whitespace, Error> {
    let tag = tokens.iter().find_map(|token| match token {
        Token::Tag {
            kind: TagKind::Whitespace,
            span,
            code,
        } => Some((*span, *code)),
        _ => None,
    });
    let Some((span, code)) = tag else {
        return Ok(default);
    };
    let mode = code.text(source).unwrap_or_default();
    Whitespace::from_str(mode).map_err(|_| Error::InvalidWhitespace {
        mode: mode.to_string(),
        span,
    })
}

enum Open {
    For {
        target: Target,
        container: Expr,
    },
    While {
        condition: Expr,
    },
    If {
        branches: Vec<Branch>,
        kind: BranchKind,
        span: Span,
        condition: Option<Expr>,
    },
    Def {
        signature: Option<Signature>,
    },
    RenderBlock {
        call: CallExpr,
        indent: Option<Indent>,
    },
    RenderBlocks {
        call: CallExpr,
        indent: Option<Indent>,
        /// Loop depth outside the block.
        loops: usize,
    },
}

impl Open {
    fn kind(&self) -> &'static str {
        match self {
            Open::For { .. } => "for",
            Open::While { .. } => "while",
            Open::If { .. } => "if",
            Open::Def { .. } => "def",
            Open::RenderBlock { .. } => "renderblock",
            Open::RenderBlocks { .. } => "renderblocks",
        }
    }
}

struct Block {
    span: Span,
    open: Open,
    body: Vec<Node>,
}

/// A template whose tags are being parsed: the top-level one, a `<?def?>`
/// or the content of a `<?renderblock?>`.
struct TemplateFrame {
    name: Option<Rc<str>>,
    doc: Option<Rc<str>>,
    loops: usize,
}

struct Parser<'a> {
    source: Rc<str>,
    options: &'a CompileOptions,
    whitespace: Whitespace,
    signature: Option<Signature>,
    content: Vec<Node>,
    blocks: Vec<Block>,
    templates: Vec<TemplateFrame>,
}

impl<'a> Parser<'a> {
    fn new(
        source: Rc<str>,
        options: &'a CompileOptions,
        whitespace: Whitespace,
        name: Option<Rc<str>>,
    ) -> Self {
        Self {
            source,
            options,
            whitespace,
            signature: None,
            content: Vec::new(),
            blocks: Vec::new(),
            templates: vec![TemplateFrame {
                name,
                doc: None,
                loops: 0,
            }],
        }
    }

    fn parse(&mut self, tokens: Vec<Token>) -> Result<Template, Error> {
        for token in tokens {
            let span = token.span();
            self.token(token).map_err(|err| self.locate(err, span))?;
        }
        if let Some(block) = self.blocks.last() {
            let span = block.span;
            let err = Error::Unclosed {
                kind: block.open.kind(),
                span,
            };
            return Err(self.locate(err, span));
        }
        let frame = self.templates.pop().unwrap_or(TemplateFrame {
            name: None,
            doc: None,
            loops: 0,
        });
        let signature = self.signature.take();
        let content = std::mem::take(&mut self.content);
        Ok(self.template(frame, signature, None, content))
    }

    /// Attaches the tag and the innermost template being parsed.
    fn locate(&self, err: Error, tag: Span) -> Error {
        let name = self.templates.last().and_then(|frame| frame.name.as_deref());
        err.located(Location::new(
            name.map(str::to_string),
            Rc::clone(&self.source),
            tag,
        ))
    }

    fn frame(&mut self) -> &mut TemplateFrame {
        let last = self.templates.len() - 1;
        &mut self.templates[last]
    }

    fn template(
        &self,
        frame: TemplateFrame,
        signature: Option<Signature>,
        tags: Option<(Span, Span)>,
        content: Vec<Node>,
    ) -> Template {
        Template::new(TemplateData {
            name: frame.name,
            source: Rc::clone(&self.source),
            whitespace: self.whitespace,
            startdelim: Rc::from(self.options.startdelim.as_str()),
            enddelim: Rc::from(self.options.enddelim.as_str()),
            doc: frame.doc,
            signature,
            span: tags.map(|(span, _)| span),
            stop: tags.map(|(_, stop)| stop),
            content,
        })
    }

    fn body(&mut self) -> &mut Vec<Node> {
        match self.blocks.last_mut() {
            Some(block) => &mut block.body,
            None => &mut self.content,
        }
    }

    fn push(&mut self, node: Node) {
        self.body().push(node);
    }

    /// Detaches the indentation in front of a render tag in smart mode.
    fn take_indent(&mut self) -> Option<Indent> {
        if self.whitespace != Whitespace::Smart {
            return None;
        }
        let body = self.body();
        match body.last() {
            Some(Node::Indent(_)) => match body.pop() {
                Some(Node::Indent(indent)) => Some(indent),
                _ => None,
            },
            _ => None,
        }
    }

    fn code<'s>(&'s self, code: Span) -> &'s str {
        code.text(&self.source).unwrap_or_default()
    }

    fn token(&mut self, token: Token) -> Result<(), Error> {
        match token {
            Token::Text { span } => self.push(Node::Text { span }),
            Token::Indent { span, text } => self.push(Node::Indent(Indent { span, text })),
            Token::LineEnd { span } => self.push(Node::LineEnd { span }),
            Token::Tag { kind, span, code } => self.tag(kind, span, code)?,
        }
        Ok(())
    }

    fn open(&mut self, span: Span, open: Open) {
        self.blocks.push(Block {
            span,
            open,
            body: Vec::new(),
        });
    }

    fn tag(&mut self, kind: TagKind, span: Span, code: Span) -> Result<(), Error> {
        let source = Rc::clone(&self.source);
        match kind {
            TagKind::Whitespace => {}
            TagKind::Ul4 => self.declaration(span, code)?,
            TagKind::Doc => {
                let text = self.code(code).to_string();
                let frame = self.frame();
                if frame.doc.is_none() {
                    frame.doc = Some(Rc::from(text));
                }
            }
            TagKind::Print => {
                let expr = grammar::parse_expr(&source, code)?;
                self.push(Node::Print { span, expr });
            }
            TagKind::Printx => {
                let expr = grammar::parse_expr(&source, code)?;
                self.push(Node::PrintX { span, expr });
            }
            TagKind::Return => {
                let expr = grammar::parse_expr(&source, code)?;
                self.push(Node::Return { span, expr });
            }
            TagKind::Code => {
                let node = match grammar::parse_statement(&source, code)? {
                    Statement::Expr(expr) => Node::Expr { span, expr },
                    Statement::Set(target, value) => Node::Set {
                        span,
                        target,
                        value,
                    },
                    Statement::Modify(op, target, value) => Node::Modify {
                        span,
                        op,
                        target,
                        value,
                    },
                };
                self.push(node);
            }
            TagKind::For => {
                let (target, container) = grammar::parse_for(&source, code)?;
                self.frame().loops += 1;
                self.open(span, Open::For { target, container });
            }
            TagKind::While => {
                let condition = grammar::parse_expr(&source, code)?;
                self.frame().loops += 1;
                self.open(span, Open::While { condition });
            }
            TagKind::If => {
                let condition = grammar::parse_expr(&source, code)?;
                self.open(
                    span,
                    Open::If {
                        branches: Vec::new(),
                        kind: BranchKind::If,
                        span,
                        condition: Some(condition),
                    },
                );
            }
            TagKind::Elif | TagKind::Else => self.branch(kind, span, code)?,
            TagKind::End => self.end(span, code)?,
            TagKind::Break | TagKind::Continue => {
                if self.frame().loops == 0 {
                    return Err(Error::LoopControlOutsideLoop {
                        kind: kind.as_str(),
                        span,
                    });
                }
                self.push(if kind == TagKind::Break {
                    Node::Break { span }
                } else {
                    Node::Continue { span }
                });
            }
            TagKind::Def => {
                let declaration = grammar::parse_declaration(&source, code)?;
                let Some(name) = declaration.name else {
                    return Err(Error::syntax("<?def?> requires a name", span));
                };
                self.templates.push(TemplateFrame {
                    name: Some(name),
                    doc: None,
                    loops: 0,
                });
                self.open(
                    span,
                    Open::Def {
                        signature: declaration.signature,
                    },
                );
            }
            TagKind::Render | TagKind::Renderx => {
                let call = grammar::parse_call(&source, code, kind.as_str())?;
                let indent = self.take_indent();
                self.push(Node::Render(Box::new(Render {
                    span,
                    kind: if kind == TagKind::Render {
                        RenderKind::Render
                    } else {
                        RenderKind::RenderX
                    },
                    call,
                    indent,
                })));
            }
            TagKind::Renderblock => {
                let call = grammar::parse_call(&source, code, kind.as_str())?;
                let indent = self.take_indent();
                self.templates.push(TemplateFrame {
                    name: Some(Rc::from("content")),
                    doc: None,
                    loops: 0,
                });
                self.open(span, Open::RenderBlock { call, indent });
            }
            TagKind::Renderblocks => {
                let call = grammar::parse_call(&source, code, kind.as_str())?;
                let indent = self.take_indent();
                let loops = std::mem::take(&mut self.frame().loops);
                self.open(
                    span,
                    Open::RenderBlocks {
                        call,
                        indent,
                        loops,
                    },
                );
            }
        }
        Ok(())
    }

    fn declaration(&mut self, span: Span, code: Span) -> Result<(), Error> {
        if self.templates.len() > 1 {
            return Err(Error::NestedDeclaration { span });
        }
        let declaration = grammar::parse_declaration(&self.source, code)?;
        if let Some(name) = declaration.name {
            let frame = self.frame();
            if frame.name.is_none() {
                frame.name = Some(name);
            }
        }
        if let Some(mut signature) = declaration.signature {
            for param in &mut signature.params {
                if let Some(ParamDefault::Expr(expr)) = &param.default {
                    let value = evaluate_constant(expr)?;
                    param.default = Some(ParamDefault::Value(value));
                }
            }
            self.signature = Some(signature);
        }
        Ok(())
    }

    fn branch(&mut self, kind: TagKind, span: Span, code: Span) -> Result<(), Error> {
        let condition = match kind {
            TagKind::Elif => Some(grammar::parse_expr(&self.source, code)?),
            _ => None,
        };
        let Some(block) = self.blocks.last_mut() else {
            return Err(Error::OrphanBranch {
                kind: kind.as_str(),
                span,
            });
        };
        let Open::If {
            branches,
            kind: current_kind,
            span: current_span,
            condition: current_condition,
        } = &mut block.open
        else {
            return Err(Error::OrphanBranch {
                kind: kind.as_str(),
                span,
            });
        };
        if *current_kind == BranchKind::Else {
            return Err(Error::DuplicateElse {
                kind: kind.as_str(),
                span,
            });
        }
        branches.push(Branch {
            kind: *current_kind,
            span: *current_span,
            stop: span,
            condition: current_condition.take(),
            body: std::mem::take(&mut block.body),
        });
        *current_kind = if kind == TagKind::Elif {
            BranchKind::Elif
        } else {
            BranchKind::Else
        };
        *current_span = span;
        *current_condition = condition;
        Ok(())
    }

    fn end(&mut self, stop: Span, code: Span) -> Result<(), Error> {
        let found = self.code(code).to_string();
        let Some(block) = self.blocks.pop() else {
            return Err(Error::UnmatchedEnd { span: stop });
        };
        if !found.is_empty() && found != block.open.kind() {
            return Err(Error::EndMismatch {
                expected: block.open.kind(),
                found,
                span: stop,
            });
        }
        let Block { span, open, body } = block;
        let node = match open {
            Open::For { target, container } => {
                self.frame().loops -= 1;
                Node::For(Box::new(ForBlock {
                    span,
                    stop,
                    target,
                    container,
                    body,
                }))
            }
            Open::While { condition } => {
                self.frame().loops -= 1;
                Node::While(Box::new(WhileBlock {
                    span,
                    stop,
                    condition,
                    body,
                }))
            }
            Open::If {
                mut branches,
                kind,
                span: branch_span,
                condition,
            } => {
                branches.push(Branch {
                    kind,
                    span: branch_span,
                    stop,
                    condition,
                    body,
                });
                Node::If(Box::new(IfBlock {
                    span,
                    stop,
                    branches,
                }))
            }
            Open::Def { signature } => {
                let frame = self.pop_template();
                Node::Def(self.template(frame, signature, Some((span, stop)), body))
            }
            Open::RenderBlock { call, indent } => {
                let frame = self.pop_template();
                let content = self.template(frame, None, Some((span, stop)), body);
                Node::RenderBlock(Box::new(RenderBlock {
                    span,
                    stop,
                    call,
                    indent,
                    content,
                }))
            }
            Open::RenderBlocks {
                call,
                indent,
                loops,
            } => {
                self.frame().loops = loops;
                Node::RenderBlocks(Box::new(RenderBlocks {
                    span,
                    stop,
                    call,
                    indent,
                    body,
                }))
            }
        };
        self.push(node);
        Ok(())
    }

    fn pop_template(&mut self) -> TemplateFrame {
        self.templates.pop().unwrap_or(TemplateFrame {
            name: None,
            doc: None,
            loops: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Template, Error> {
        compile(source, &CompileOptions::default())
    }

    /// Everything but the (possibly empty) indentation starting each line.
    fn significant(nodes: &[Node]) -> Vec<&Node> {
        nodes
            .iter()
            .filter(|node| !matches!(node, Node::Indent(_)))
            .collect()
    }

    fn parse_smart(source: &str) -> Template {
        compile(
            source,
            &CompileOptions::default().with_whitespace(Whitespace::Smart),
        )
        .unwrap()
    }

    mod structure {
        use super::*;

        #[test]
        fn test_nested_blocks() {
            let template = parse("<?for x in y?><?if x?>a<?elif z?>b<?else?>c<?end if?><?end for?>").unwrap();
            let nodes = significant(template.content());
            let [Node::For(block)] = nodes[..] else {
                panic!("expected a single loop: {template:?}");
            };
            let [Node::If(chain)] = block.body.as_slice() else {
                panic!("expected a condition");
            };
            let kinds: Vec<_> = chain.branches.iter().map(|b| b.kind).collect();
            assert_eq!(kinds, [BranchKind::If, BranchKind::Elif, BranchKind::Else]);
            assert_eq!(chain.branches[0].stop, chain.branches[1].span);
            assert_eq!(chain.branches[2].stop, chain.stop);
        }

        #[test]
        fn test_def_is_a_template() {
            let template = parse("<?def f(a, b=x)?><?doc adds?><?return a + b?><?end def?>").unwrap();
            let nodes = significant(template.content());
            let [Node::Def(local)] = nodes[..] else {
                panic!("expected a definition");
            };
            assert_eq!(local.name(), Some("f"));
            assert_eq!(local.doc(), Some("adds"));
            let signature = local.signature().unwrap();
            assert!(matches!(signature.params[1].default, Some(ParamDefault::Expr(_))));
            assert_eq!(local.span().map(|s| s.start()), Some(0));
        }

        #[test]
        fn test_ul4_tag() {
            let template = parse("<?ul4 page(title, count=2 * 3)?><?doc A page?>x").unwrap();
            assert_eq!(template.name(), Some("page"));
            assert_eq!(template.doc(), Some("A page"));
            let signature = template.signature().unwrap();
            assert_eq!(
                signature.params[1].default,
                Some(ParamDefault::Value(crate::value::Value::Int(6)))
            );
            assert_eq!(significant(template.content()).len(), 1);
        }

        #[test]
        fn test_option_name_wins() {
            let options = CompileOptions::default().with_name("given");
            let template = compile("<?ul4 tagged?>", &options).unwrap();
            assert_eq!(template.name(), Some("given"));
        }

        #[test]
        fn test_renderblock_content() {
            let template = parse("<?renderblock f(1)?>body<?end renderblock?>").unwrap();
            let nodes = significant(template.content());
            let [Node::RenderBlock(render)] = nodes[..] else {
                panic!("expected renderblock");
            };
            assert_eq!(render.content.name(), Some("content"));
            assert!(render.content.signature().is_none());
            assert!(matches!(render.content.content(), [Node::Text { .. }]));
        }

        #[test]
        fn test_smart_indent_is_attached() {
            let template = parse_smart("<?if x?>\n\t<?render f()?>\n<?end if?>\n");
            let [Node::If(chain)] = template.content() else {
                panic!("expected a condition: {template:?}");
            };
            let [Node::Render(render)] = chain.branches[0].body.as_slice() else {
                panic!("expected only the render: {:?}", chain.branches[0].body);
            };
            assert!(render.indent.is_some());
        }

        #[test]
        fn test_whitespace_tag() {
            let template = parse("<?whitespace strip?>\n  a\n").unwrap();
            assert_eq!(template.whitespace(), Whitespace::Strip);
        }
    }

    mod errors {
        use super::*;

        fn root(source: &str) -> Error {
            parse(source).unwrap_err().root().clone()
        }

        #[test]
        fn test_empty() {
            assert_eq!(parse("").unwrap_err(), Error::EmptyTemplate);
        }

        #[test]
        fn test_mismatches() {
            assert!(matches!(root("<?for x in y?><?end if?>"), Error::EndMismatch { expected: "for", .. }));
            assert!(matches!(root("<?end?>"), Error::UnmatchedEnd { .. }));
            assert!(matches!(root("<?else?>"), Error::OrphanBranch { kind: "else", .. }));
            assert!(matches!(
                root("<?if x?><?else?><?elif y?><?end if?>"),
                Error::DuplicateElse { kind: "elif", .. }
            ));
            assert!(matches!(root("<?for x in y?><?while 1?><?elif 1?><?end while?><?end for?>"), Error::OrphanBranch { .. }));
        }

        #[test]
        fn test_unclosed_reports_opening_tag() {
            let err = parse("a<?if x?>b").unwrap_err();
            assert_eq!(err.root(), &Error::Unclosed {
                kind: "if",
                span: Span::new(1, 8),
            });
            assert_eq!(err.locations()[0].tag(), "<?if x?>");
        }

        #[test]
        fn test_break_outside_loop() {
            assert!(matches!(root("<?break?>"), Error::LoopControlOutsideLoop { kind: "break", .. }));
            let err = parse("<?for x in y?><?def f?><?break?><?end def?><?end for?>").unwrap_err();
            assert!(matches!(err.root(), Error::LoopControlOutsideLoop { .. }));
            assert_eq!(err.locations()[0].template_name(), Some("f"));
            assert!(parse("<?while x?><?if y?><?continue?><?end if?><?end while?>").is_ok());
        }

        #[test]
        fn test_render_requires_call() {
            assert!(matches!(root("<?render x?>"), Error::InvalidRenderTarget { kind: "render", .. }));
        }

        #[test]
        fn test_nested_ul4() {
            assert!(matches!(root("<?def f?><?ul4 g?><?end def?>"), Error::NestedDeclaration { .. }));
        }

        #[test]
        fn test_invalid_whitespace() {
            let err = root("<?whitespace tidy?>");
            assert_eq!(
                err.to_string(),
                "whitespace mode \"tidy\" unknown (expected keep, strip or smart)"
            );
        }

        #[test]
        fn test_syntax_error_location() {
            let err = parse("ab<?print 1 +?>").unwrap_err();
            assert!(matches!(err.root(), Error::Syntax { .. }));
            assert_eq!(err.locations()[0].tag(), "<?print 1 +?>");
        }
    }
}
