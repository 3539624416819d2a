use serde::Serialize;

/// A byte range into a template source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    start: u32,
    length: u32,
}

impl Span {
    #[must_use]
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    #[must_use]
    pub fn from_parts(start: usize, length: usize) -> Self {
        let start_u32 = u32::try_from(start).unwrap_or(u32::MAX);
        let length_u32 = u32::try_from(length).unwrap_or(u32::MAX.saturating_sub(start_u32));
        Span::new(start_u32, length_u32)
    }

    /// Construct a span from byte offsets `start..end`.
    #[must_use]
    pub fn from_bounds(start: usize, end: usize) -> Self {
        Self::from_parts(start, end.saturating_sub(start))
    }

    /// An empty span positioned at `offset`.
    #[must_use]
    pub fn empty(offset: usize) -> Self {
        Self::from_parts(offset, 0)
    }

    /// The smallest span covering both `self` and `other`.
    #[must_use]
    pub fn cover(self, other: Span) -> Self {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        Self::new(start, end - start)
    }

    #[must_use]
    pub fn start(self) -> u32 {
        self.start
    }

    #[must_use]
    pub fn start_usize(self) -> usize {
        self.start as usize
    }

    #[must_use]
    pub fn end(self) -> u32 {
        self.start.saturating_add(self.length)
    }

    #[must_use]
    pub fn end_usize(self) -> usize {
        self.end() as usize
    }

    #[must_use]
    pub fn length(self) -> u32 {
        self.length
    }

    #[must_use]
    pub fn length_usize(self) -> usize {
        self.length as usize
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.length == 0
    }

    /// Slice `source` with this span, if it lies on character boundaries.
    #[must_use]
    pub fn text(self, source: &str) -> Option<&str> {
        source.get(self.start_usize()..self.end_usize())
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Self::from_bounds(range.start, range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bounds() {
        let span = Span::from_bounds(3, 8);
        assert_eq!(span.start(), 3);
        assert_eq!(span.length(), 5);
        assert_eq!(span.end(), 8);
    }

    #[test]
    fn test_from_bounds_inverted_is_empty() {
        let span = Span::from_bounds(8, 3);
        assert!(span.is_empty());
        assert_eq!(span.start(), 8);
    }

    #[test]
    fn test_cover() {
        let a = Span::new(10, 2);
        let b = Span::new(4, 3);
        assert_eq!(a.cover(b), Span::new(4, 8));
        assert_eq!(b.cover(a), Span::new(4, 8));
    }

    #[test]
    fn test_text() {
        let source = "<?print x?>";
        assert_eq!(Span::new(8, 1).text(source), Some("x"));
        assert_eq!(Span::new(8, 100).text(source), None);
    }
}
