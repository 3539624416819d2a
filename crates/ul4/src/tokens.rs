use std::rc::Rc;

use ul4_source::Span;

/// Keyword of a tag that survives tokenization.
///
/// `note` and `ignore` tags never leave the lexer, so they have no variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagKind {
    Ul4,
    Whitespace,
    Doc,
    Print,
    Printx,
    Code,
    For,
    While,
    If,
    Elif,
    Else,
    End,
    Break,
    Continue,
    Def,
    Return,
    Render,
    Renderx,
    Renderblock,
    Renderblocks,
}

impl TagKind {
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let kind = match keyword {
            "ul4" => TagKind::Ul4,
            "whitespace" => TagKind::Whitespace,
            "doc" => TagKind::Doc,
            "print" => TagKind::Print,
            "printx" => TagKind::Printx,
            "code" => TagKind::Code,
            "for" => TagKind::For,
            "while" => TagKind::While,
            "if" => TagKind::If,
            "elif" => TagKind::Elif,
            "else" => TagKind::Else,
            "end" => TagKind::End,
            "break" => TagKind::Break,
            "continue" => TagKind::Continue,
            "def" => TagKind::Def,
            "return" => TagKind::Return,
            "render" => TagKind::Render,
            "renderx" => TagKind::Renderx,
            "renderblock" => TagKind::Renderblock,
            "renderblocks" => TagKind::Renderblocks,
            _ => return None,
        };
        Some(kind)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Ul4 => "ul4",
            TagKind::Whitespace => "whitespace",
            TagKind::Doc => "doc",
            TagKind::Print => "print",
            TagKind::Printx => "printx",
            TagKind::Code => "code",
            TagKind::For => "for",
            TagKind::While => "while",
            TagKind::If => "if",
            TagKind::Elif => "elif",
            TagKind::Else => "else",
            TagKind::End => "end",
            TagKind::Break => "break",
            TagKind::Continue => "continue",
            TagKind::Def => "def",
            TagKind::Return => "return",
            TagKind::Render => "render",
            TagKind::Renderx => "renderx",
            TagKind::Renderblock => "renderblock",
            TagKind::Renderblocks => "renderblocks",
        }
    }

    /// Tags that open a block closed by `<?end?>`.
    #[must_use]
    pub fn opens_block(self) -> bool {
        matches!(
            self,
            TagKind::For
                | TagKind::While
                | TagKind::If
                | TagKind::Def
                | TagKind::Renderblock
                | TagKind::Renderblocks
        )
    }

    /// Tags whose line keeps its indentation in smart whitespace mode.
    #[must_use]
    pub fn produces_output(self) -> bool {
        matches!(
            self,
            TagKind::Print | TagKind::Printx | TagKind::Render | TagKind::Renderx
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Literal text inside a line.
    Text { span: Span },
    /// Leading whitespace of a line, possibly empty. `text` replaces the
    /// source text when smart whitespace rewrote the indentation.
    Indent { span: Span, text: Option<Rc<str>> },
    /// `\n`, `\r\n` or `\r`.
    LineEnd { span: Span },
    /// A tag: `span` covers the delimiters, `code` the trimmed inner code.
    Tag { kind: TagKind, span: Span, code: Span },
}

impl Token {
    #[must_use]
    pub fn indent(span: Span) -> Self {
        Token::Indent { span, text: None }
    }

    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Token::Text { span }
            | Token::Indent { span, .. }
            | Token::LineEnd { span }
            | Token::Tag { span, .. } => *span,
        }
    }

    #[must_use]
    pub fn is_indent(&self) -> bool {
        matches!(self, Token::Indent { .. })
    }

    #[must_use]
    pub fn is_line_end(&self) -> bool {
        matches!(self, Token::LineEnd { .. })
    }

    /// The source text covered by the token, or the rewritten indentation.
    #[must_use]
    pub fn lexeme<'a>(&'a self, source: &'a str) -> &'a str {
        match self {
            Token::Indent {
                text: Some(text), ..
            } => text,
            _ => self.span().text(source).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_round_trip() {
        for keyword in ["print", "printx", "renderblocks", "ul4", "while"] {
            let kind = TagKind::from_keyword(keyword).unwrap();
            assert_eq!(kind.as_str(), keyword);
        }
        assert_eq!(TagKind::from_keyword("note"), None);
        assert_eq!(TagKind::from_keyword("xml"), None);
    }

    #[test]
    fn test_classification() {
        assert!(TagKind::Renderblock.opens_block());
        assert!(!TagKind::Elif.opens_block());
        assert!(TagKind::Renderx.produces_output());
        assert!(!TagKind::Renderblock.produces_output());
    }
}
