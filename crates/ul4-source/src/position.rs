use crate::Span;

/// A one-based line and column.
///
/// Columns count characters, not bytes, so that positions line up with what
/// an editor shows for the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineCol {
    line: u32,
    column: u32,
}

impl LineCol {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }
}

/// Byte offsets of every line start in a source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, c) in text.char_indices() {
            if c == '\n' {
                line_starts.push(u32::try_from(offset + 1).unwrap_or(u32::MAX));
            }
        }
        Self { line_starts }
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Resolve a byte offset in `text` to its line and column.
    ///
    /// `text` must be the text this index was built from.
    #[must_use]
    pub fn line_col(&self, text: &str, offset: u32) -> LineCol {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(0) => 0,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line] as usize;
        let end = (offset as usize).min(text.len());
        let column = text
            .get(line_start..end)
            .map_or(end.saturating_sub(line_start), |prefix| prefix.chars().count());
        LineCol::new(
            u32::try_from(line + 1).unwrap_or(u32::MAX),
            u32::try_from(column + 1).unwrap_or(u32::MAX),
        )
    }

    /// Line/column positions of the start and end of `span`.
    #[must_use]
    pub fn span_line_cols(&self, text: &str, span: Span) -> (LineCol, LineCol) {
        (
            self.line_col(text, span.start()),
            self.line_col(text, span.end()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        let text = "<?print x?>";
        let index = LineIndex::new(text);
        assert_eq!(index.line_col(text, 0), LineCol::new(1, 1));
        assert_eq!(index.line_col(text, 8), LineCol::new(1, 9));
    }

    #[test]
    fn test_later_lines() {
        let text = "a\nbc\n<?print x?>\n";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(text, 2), LineCol::new(2, 1));
        assert_eq!(index.line_col(text, 3), LineCol::new(2, 2));
        assert_eq!(index.line_col(text, 5), LineCol::new(3, 1));
    }

    #[test]
    fn test_columns_count_characters() {
        let text = "äöü<?print x?>";
        let index = LineIndex::new(text);
        assert_eq!(index.line_col(text, 6), LineCol::new(1, 4));
    }

    #[test]
    fn test_span_line_cols() {
        let text = "x\n<?if y?>";
        let index = LineIndex::new(text);
        let (start, end) = index.span_line_cols(text, Span::new(2, 8));
        assert_eq!(start, LineCol::new(2, 1));
        assert_eq!(end, LineCol::new(2, 9));
    }
}
