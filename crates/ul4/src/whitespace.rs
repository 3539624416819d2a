//! Whitespace handling between the lexer and the parser.
//!
//! `keep` passes the token stream through, `strip` removes indentation and
//! line ends, and `smart` removes lines that hold nothing but a control tag
//! and re-anchors the content of every block on the indentation of the tag
//! that opened it.

use std::rc::Rc;

use ul4_conf::Whitespace;

use crate::tokens::TagKind;
use crate::tokens::Token;

pub fn apply(tokens: Vec<Token>, mode: Whitespace, source: &str) -> Vec<Token> {
    match mode {
        Whitespace::Keep => tokens,
        Whitespace::Strip => strip(tokens),
        Whitespace::Smart => smart(tokens, source),
    }
}

fn strip(tokens: Vec<Token>) -> Vec<Token> {
    let last = tokens.len().saturating_sub(1);
    tokens
        .into_iter()
        .enumerate()
        .filter(|(i, token)| match token {
            Token::Indent { .. } => *i == 0,
            Token::LineEnd { .. } => *i == last,
            _ => true,
        })
        .map(|(_, token)| token)
        .collect()
}

#[derive(Clone, Copy)]
enum Entry {
    Block(usize),
    Inline,
}

struct Block {
    /// Line holding the opening tag; `None` for the template itself.
    opener: Option<usize>,
    prefix: Option<String>,
}

struct Line {
    tokens: Vec<Token>,
    indent: String,
    owner: usize,
    block_tag: Option<TagKind>,
}

impl Line {
    fn is_blank(&self) -> bool {
        self.tokens
            .iter()
            .all(|token| token.is_indent() || token.is_line_end())
    }
}

fn smart(tokens: Vec<Token>, source: &str) -> Vec<Token> {
    let mut lines = split_lines(tokens, source);
    let blocks = assign_blocks(&mut lines);
    let indents = rewrite_indents(&lines, &blocks);

    let mut output = Vec::new();
    for (line, indent) in lines.into_iter().zip(indents) {
        let keep_indent = match line.block_tag {
            Some(TagKind::Renderblock | TagKind::Renderblocks) => true,
            Some(_) => false,
            None if is_render_line(&line.tokens) => true,
            None => {
                output.extend(
                    line.tokens
                        .into_iter()
                        .map(|token| replace_indent(token, &line.indent, &indent)),
                );
                continue;
            }
        };
        for token in line.tokens {
            match token {
                Token::Indent { .. } if keep_indent => {
                    output.push(replace_indent(token, &line.indent, &indent));
                }
                Token::Indent { .. } | Token::LineEnd { .. } => {}
                other => output.push(other),
            }
        }
    }
    output
}

fn split_lines(tokens: Vec<Token>, source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        let ends_line = token.is_line_end();
        current.push(token);
        if ends_line {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
        .into_iter()
        .map(|tokens| {
            let indent = match tokens.first() {
                Some(token @ Token::Indent { .. }) => token.lexeme(source).to_string(),
                _ => String::new(),
            };
            let block_tag = block_tag(&tokens);
            Line {
                tokens,
                indent,
                owner: 0,
                block_tag,
            }
        })
        .collect()
}

/// The tag of a line consisting of indentation, one non-output tag and an
/// optional line end.
fn block_tag(tokens: &[Token]) -> Option<TagKind> {
    let inner: Vec<&Token> = tokens
        .iter()
        .filter(|token| !token.is_indent() && !token.is_line_end())
        .collect();
    match inner.as_slice() {
        [Token::Tag { kind, .. }] if !kind.produces_output() => Some(*kind),
        _ => None,
    }
}

fn is_render_line(tokens: &[Token]) -> bool {
    let inner: Vec<&Token> = tokens
        .iter()
        .filter(|token| !token.is_indent() && !token.is_line_end())
        .collect();
    matches!(
        inner.as_slice(),
        [Token::Tag {
            kind: TagKind::Render | TagKind::Renderx,
            ..
        }]
    )
}

fn innermost(stack: &[Entry]) -> usize {
    stack
        .iter()
        .rev()
        .find_map(|entry| match entry {
            Entry::Block(block) => Some(*block),
            Entry::Inline => None,
        })
        .unwrap_or(0)
}

/// Attributes every line to its innermost enclosing block. Block tag lines
/// belong to the block around them, not the one they open or close.
fn assign_blocks(lines: &mut [Line]) -> Vec<Block> {
    let mut blocks = vec![Block {
        opener: None,
        prefix: None,
    }];
    let mut stack = vec![Entry::Block(0)];

    for (index, line) in lines.iter_mut().enumerate() {
        match line.block_tag {
            Some(kind) if kind.opens_block() => {
                line.owner = innermost(&stack);
                stack.push(Entry::Block(blocks.len()));
                blocks.push(Block {
                    opener: Some(index),
                    prefix: None,
                });
            }
            Some(TagKind::Elif | TagKind::Else) => {
                if stack.len() > 1 && matches!(stack.last(), Some(Entry::Block(_))) {
                    stack.pop();
                    line.owner = innermost(&stack);
                    stack.push(Entry::Block(blocks.len()));
                    blocks.push(Block {
                        opener: Some(index),
                        prefix: None,
                    });
                } else {
                    line.owner = innermost(&stack);
                }
            }
            Some(TagKind::End) => {
                if stack.len() > 1 {
                    stack.pop();
                }
                line.owner = innermost(&stack);
            }
            Some(_) => line.owner = innermost(&stack),
            None => {
                line.owner = innermost(&stack);
                for token in &line.tokens {
                    if let Token::Tag { kind, .. } = token {
                        if kind.opens_block() {
                            stack.push(Entry::Inline);
                        } else if *kind == TagKind::End && stack.len() > 1 {
                            stack.pop();
                        }
                    }
                }
            }
        }
    }

    for line in lines.iter().filter(|line| !line.is_blank()) {
        let block = &mut blocks[line.owner];
        block.prefix = Some(match block.prefix.take() {
            Some(prefix) => common_prefix(&prefix, &line.indent).to_string(),
            None => line.indent.clone(),
        });
    }
    blocks
}

fn rewrite_indents(lines: &[Line], blocks: &[Block]) -> Vec<String> {
    let mut indents: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        let block = &blocks[line.owner];
        let indent = match (block.opener, block.prefix.as_deref()) {
            (Some(opener), Some(prefix)) => match line.indent.strip_prefix(prefix) {
                Some(extra) => format!("{}{extra}", indents[opener]),
                None => line.indent.clone(),
            },
            _ => line.indent.clone(),
        };
        indents.push(indent);
    }
    indents
}

fn replace_indent(token: Token, original: &str, indent: &str) -> Token {
    match token {
        Token::Indent { span, .. } if original != indent => Token::Indent {
            span,
            text: Some(Rc::from(indent)),
        },
        other => other,
    }
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8());
    &a[..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn render_tokens(source: &str, mode: Whitespace) -> String {
        let tokens = Lexer::new(source, "<?", "?>").tokenize().unwrap();
        apply(tokens, mode, source)
            .iter()
            .map(|token| match token {
                Token::Tag { kind, .. } => format!("[{}]", kind.as_str()),
                other => other.lexeme(source).to_string(),
            })
            .collect()
    }

    #[test]
    fn test_keep_is_identity() {
        let source = "  <?if x?>\n\tfoo\n<?end if?>\n";
        assert_eq!(
            render_tokens(source, Whitespace::Keep),
            "  [if]\n\tfoo\n[end]\n"
        );
    }

    #[test]
    fn test_strip() {
        let source = "  a\n  <?print x?>\n  b\n";
        assert_eq!(render_tokens(source, Whitespace::Strip), "  a[print]b\n");
    }

    #[test]
    fn test_smart_removes_block_lines() {
        let source = "<?if x?>\n\tfoo\n<?end if?>\n";
        assert_eq!(render_tokens(source, Whitespace::Smart), "[if]foo\n[end]");
    }

    #[test]
    fn test_smart_reanchors_content() {
        let source = "<div>\n\t<?if x?>\n\t\t<p>\n\t\t\tx\n\t\t</p>\n\t<?end if?>\n</div>\n";
        assert_eq!(
            render_tokens(source, Whitespace::Smart),
            "<div>\n[if]\t<p>\n\t\tx\n\t</p>\n[end]</div>\n"
        );
    }

    #[test]
    fn test_smart_nested_blocks() {
        let source = "<?for a in b?>\n\t<?if a?>\n\t\t<?print a?>\n\t<?else?>\n\t\tno\n\t<?end if?>\n<?end for?>\n";
        assert_eq!(
            render_tokens(source, Whitespace::Smart),
            "[for][if][print]\n[else]no\n[end][end]"
        );
    }

    #[test]
    fn test_smart_keeps_inline_tags() {
        let source = "<?if x?>\n\ta<?if y?>b<?end if?>\n<?end if?>\n";
        assert_eq!(
            render_tokens(source, Whitespace::Smart),
            "[if]a[if]b[end]\n[end]"
        );
    }

    #[test]
    fn test_smart_render_line_keeps_indent_drops_line_end() {
        let source = "<?if x?>\n\t\t<?render t()?>\n<?end if?>\n";
        assert_eq!(render_tokens(source, Whitespace::Smart), "[if][render][end]");
        let source = "<ul>\n\t<?render t()?>\n</ul>\n";
        assert_eq!(
            render_tokens(source, Whitespace::Smart),
            "<ul>\n\t[render]</ul>\n"
        );
    }

    #[test]
    fn test_smart_mixed_indentation_is_opaque() {
        let source = "<?if x?>\n \tfoo\n\t bar\n<?end if?>\n";
        assert_eq!(
            render_tokens(source, Whitespace::Smart),
            "[if] \tfoo\n\t bar\n[end]"
        );
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(common_prefix("\t\t ", "\t\t\t"), "\t\t");
        assert_eq!(common_prefix("", "\t"), "");
        assert_eq!(common_prefix(" ", " "), " ");
    }
}
