use serde::{Deserialize, Serialize};

/// Byte-offset span in source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// 1-based (line, column) of the span start.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let offset = self.start.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let col = match before.rfind('\n') {
            Some(nl) => offset - nl,
            None => offset + 1,
        };
        (line, col)
    }
}

/// A value annotated with its source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn dummy(node: T) -> Self {
        Self { node, span: Span::dummy() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Span tests =====

    #[test]
    fn test_span_new() {
        let span = Span::new(10, 20);
        assert_eq!(span.start, 10);
        assert_eq!(span.end, 20);
    }

    #[test]
    fn test_span_dummy() {
        let span = Span::dummy();
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 0);
    }

    #[test]
    fn test_span_to_covers_both() {
        let a = Span::new(4, 9);
        let b = Span::new(12, 20);
        assert_eq!(a.to(b), Span::new(4, 20));
        assert_eq!(b.to(a), Span::new(4, 20));
    }

    // ===== line_col tests =====

    #[test]
    fn test_line_col_first_line() {
        let src = "def f():\n    pass\n";
        assert_eq!(Span::new(4, 5).line_col(src), (1, 5));
    }

    #[test]
    fn test_line_col_second_line() {
        let src = "def f():\n    pass\n";
        assert_eq!(Span::new(13, 17).line_col(src), (2, 5));
    }

    #[test]
    fn test_line_col_past_end_clamps() {
        let src = "x\n";
        assert_eq!(Span::new(50, 60).line_col(src), (2, 1));
    }

    // ===== Spanned tests =====

    #[test]
    fn test_spanned_new() {
        let s = Spanned::new("total", Span::new(3, 8));
        assert_eq!(s.node, "total");
        assert_eq!(s.span, Span::new(3, 8));
    }

    #[test]
    fn test_spanned_dummy() {
        let s = Spanned::dummy(7);
        assert_eq!(s.node, 7);
        assert_eq!(s.span, Span::dummy());
    }
}
