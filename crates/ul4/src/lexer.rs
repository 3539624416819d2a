use std::collections::VecDeque;

use memchr::memchr2;
use memchr::memmem;
use ul4_source::Span;

use crate::error::Error;
use crate::tokens::TagKind;
use crate::tokens::Token;

/// Splits template source into lines of text and tags.
///
/// Every line starts with an [`Token::Indent`] (empty when the line has no
/// leading whitespace) and every line except possibly the last ends with a
/// [`Token::LineEnd`]. `<?note?>` tags are dropped and `<?ignore?>` regions
/// are skipped, nesting through a counter.
pub struct Lexer<'a> {
    source: &'a str,
    startdelim: &'a str,
    enddelim: &'a str,
    current: usize,
    line_start: bool,
    ignores: Vec<Span>,
    pending: VecDeque<Token>,
    done: bool,
}

struct RawTag<'a> {
    keyword: &'a str,
    span: Span,
    code: Span,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str, startdelim: &'a str, enddelim: &'a str) -> Self {
        Lexer {
            source,
            startdelim,
            enddelim,
            current: 0,
            line_start: true,
            ignores: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    pub fn tokenize(self) -> Result<Vec<Token>, Error> {
        self.collect()
    }

    fn advance(&mut self) -> Result<(), Error> {
        match self.find_tag(self.current)? {
            Some(tag) => {
                if self.ignores.is_empty() {
                    self.lex_text(self.current, tag.span.start_usize());
                }
                self.current = tag.span.end_usize();
                self.lex_tag(&tag);
            }
            None => {
                if self.ignores.is_empty() {
                    self.lex_text(self.current, self.source.len());
                }
                self.current = self.source.len();
            }
        }
        Ok(())
    }

    fn lex_tag(&mut self, tag: &RawTag<'_>) {
        let code = tag.code.text(self.source).unwrap_or_default();
        if !self.ignores.is_empty() {
            match tag.keyword {
                "ignore" => self.ignores.push(tag.span),
                "end" if code == "ignore" => {
                    self.ignores.pop();
                }
                _ => {}
            }
            return;
        }
        match tag.keyword {
            "ignore" => self.ignores.push(tag.span),
            "note" => {}
            keyword => {
                let Some(kind) = TagKind::from_keyword(keyword) else {
                    return;
                };
                if self.line_start {
                    self.pending
                        .push_back(Token::indent(Span::empty(tag.span.start_usize())));
                    self.line_start = false;
                }
                self.pending.push_back(Token::Tag {
                    kind,
                    span: tag.span,
                    code: tag.code,
                });
            }
        }
    }

    fn lex_text(&mut self, start: usize, end: usize) {
        let bytes = self.source.as_bytes();
        let mut pos = start;
        while pos < end {
            if self.line_start {
                let indent = bytes[pos..end]
                    .iter()
                    .take_while(|&&b| b == b' ' || b == b'\t')
                    .count();
                self.pending
                    .push_back(Token::indent(Span::from_bounds(pos, pos + indent)));
                self.line_start = false;
                pos += indent;
                continue;
            }
            match memchr2(b'\n', b'\r', &bytes[pos..end]) {
                Some(offset) => {
                    let newline = pos + offset;
                    if newline > pos {
                        self.pending.push_back(Token::Text {
                            span: Span::from_bounds(pos, newline),
                        });
                    }
                    let line_end = if bytes[newline] == b'\r'
                        && newline + 1 < end
                        && bytes[newline + 1] == b'\n'
                    {
                        newline + 2
                    } else {
                        newline + 1
                    };
                    self.pending.push_back(Token::LineEnd {
                        span: Span::from_bounds(newline, line_end),
                    });
                    self.line_start = true;
                    pos = line_end;
                }
                None => {
                    self.pending.push_back(Token::Text {
                        span: Span::from_bounds(pos, end),
                    });
                    pos = end;
                }
            }
        }
    }

    /// Finds the next tag at or after `from`.
    ///
    /// A start delimiter not followed by a tag keyword (and whitespace or the
    /// end delimiter) is ordinary text.
    fn find_tag(&self, from: usize) -> Result<Option<RawTag<'a>>, Error> {
        let source = self.source;
        let mut search = from;
        while let Some(offset) = memmem::find(&source.as_bytes()[search..], self.startdelim.as_bytes()) {
            let start = search + offset;
            let after_delim = start + self.startdelim.len();
            let keyword_start = after_delim + leading_whitespace(&source[after_delim..]);
            let keyword_len = source[keyword_start..]
                .bytes()
                .take_while(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
                .count();
            let keyword_end = keyword_start + keyword_len;
            let keyword = &source[keyword_start..keyword_end];
            let rest = &source[keyword_end..];
            let boundary = rest.starts_with(self.enddelim)
                || rest.starts_with(|c: char| c.is_whitespace());

            if keyword_len == 0 || !boundary || !is_keyword(keyword) {
                search = after_delim;
                continue;
            }

            let Some(close) = memmem::find(rest.as_bytes(), self.enddelim.as_bytes()) else {
                return Err(Error::syntax(
                    format!("unterminated <?{keyword}?> tag"),
                    Span::from_bounds(start, source.len()),
                ));
            };
            let code_end = keyword_end + close;
            let inner = &source[keyword_end..code_end];
            let code_start = keyword_end + leading_whitespace(inner);
            let code_end = keyword_end + inner.trim_end().len();
            return Ok(Some(RawTag {
                keyword,
                span: Span::from_bounds(start, keyword_end + close + self.enddelim.len()),
                code: Span::from_bounds(code_start, code_end.max(code_start)),
            }));
        }
        Ok(None)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            }
            if self.done {
                return None;
            }
            if self.current >= self.source.len() {
                self.done = true;
                return self
                    .ignores
                    .first()
                    .map(|&span| Err(Error::UnterminatedIgnore { span }));
            }
            if let Err(err) = self.advance() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

fn is_keyword(keyword: &str) -> bool {
    matches!(keyword, "note" | "ignore") || TagKind::from_keyword(keyword).is_some()
}

fn leading_whitespace(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<String> {
        Lexer::new(source, "<?", "?>")
            .map(|token| {
                let token = token.unwrap();
                match token {
                    Token::Text { .. } => format!("text {:?}", token.lexeme(source)),
                    Token::Indent { .. } => format!("indent {:?}", token.lexeme(source)),
                    Token::LineEnd { .. } => format!("lineend {:?}", token.lexeme(source)),
                    Token::Tag { kind, code, .. } => {
                        format!("{} {:?}", kind.as_str(), code.text(source).unwrap())
                    }
                }
            })
            .collect()
    }

    #[test]
    fn test_text_and_tags() {
        assert_eq!(
            lex("a<?print x ?>b"),
            [
                "indent \"\"",
                "text \"a\"",
                "print \"x\"",
                "text \"b\""
            ]
        );
    }

    #[test]
    fn test_lines() {
        assert_eq!(
            lex("  <?if x?>\r\n\tfoo\n"),
            [
                "indent \"  \"",
                "if \"x\"",
                "lineend \"\\r\\n\"",
                "indent \"\\t\"",
                "text \"foo\"",
                "lineend \"\\n\"",
            ]
        );
    }

    #[test]
    fn test_tag_at_line_start_gets_empty_indent() {
        assert_eq!(
            lex("x\n<?end if?>"),
            [
                "indent \"\"",
                "text \"x\"",
                "lineend \"\\n\"",
                "indent \"\"",
                "end \"if\""
            ]
        );
    }

    #[test]
    fn test_keyword_needs_boundary() {
        assert_eq!(lex("<?printer?>"), ["indent \"\"", "text \"<?printer?>\""]);
        assert_eq!(
            lex("<?xml version=\"1.0\"?>"),
            ["indent \"\"", "text \"<?xml version=\\\"1.0\\\"?>\""]
        );
        assert_eq!(lex("<?print?>"), ["indent \"\"", "print \"\""]);
    }

    #[test]
    fn test_note_dropped() {
        assert_eq!(
            lex("a<?note whatever?>b"),
            ["indent \"\"", "text \"a\"", "text \"b\""]
        );
    }

    #[test]
    fn test_nested_ignore() {
        assert_eq!(
            lex("a<?ignore?>x<?ignore?>y<?end ignore?>z<?print q?><?end ignore?>b"),
            ["indent \"\"", "text \"a\"", "text \"b\""]
        );
    }

    #[test]
    fn test_unterminated_ignore_reports_opening_tag() {
        let source = "a<?ignore?>b<?ignore?><?end ignore?>";
        let err = Lexer::new(source, "<?", "?>").tokenize().unwrap_err();
        assert_eq!(
            err,
            Error::UnterminatedIgnore {
                span: Span::new(1, 10)
            }
        );
    }

    #[test]
    fn test_unterminated_tag() {
        let err = Lexer::new("<?print x", "<?", "?>").tokenize().unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_custom_delimiters() {
        let source = "{{print x}}<?print y?>";
        let tokens: Vec<Token> = Lexer::new(source, "{{", "}}").tokenize().unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(matches!(
            tokens[1],
            Token::Tag {
                kind: TagKind::Print,
                ..
            }
        ));
        assert_eq!(tokens[2].lexeme(source), "<?print y?>");
    }
}
