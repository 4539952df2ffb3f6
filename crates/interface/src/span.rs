use std::fmt;

/// A source code location: a `lo..hi` byte range into the original source.
///
/// Spans are produced by the external front end; the core only threads them
/// through to diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    lo: u32,
    hi: u32,
}

impl Span {
    /// A dummy span, pointing nowhere. Used for synthesized nodes.
    pub const DUMMY: Self = Self { lo: 0, hi: 0 };

    /// Creates a new span from a byte range.
    #[inline]
    pub const fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    /// Returns the low byte position.
    #[inline]
    pub const fn lo(self) -> u32 {
        self.lo
    }

    /// Returns the high byte position.
    #[inline]
    pub const fn hi(self) -> u32 {
        self.hi
    }

    /// Returns `true` if this is the dummy span.
    #[inline]
    pub const fn is_dummy(self) -> bool {
        self.lo == 0 && self.hi == 0
    }

    /// Returns a span covering both `self` and `other`.
    pub fn to(self, other: Self) -> Self {
        Self { lo: self.lo.min(other.lo), hi: self.hi.max(other.hi) }
    }
}

impl Default for Span {
    #[inline]
    fn default() -> Self {
        Self::DUMMY
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({}..{})", self.lo, self.hi)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.lo, self.hi)
    }
}
