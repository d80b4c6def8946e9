//! Request count expectations checked against the journal

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Never,
}

impl Times {
    pub fn once() -> Self {
        Times::Exactly(1)
    }

    pub fn matches(&self, count: usize) -> bool {
        match *self {
            Times::Exactly(n) => count == n,
            Times::AtLeast(n) => count >= n,
            Times::AtMost(n) => count <= n,
            Times::Never => count == 0,
        }
    }
}

impl Default for Times {
    fn default() -> Self {
        Times::once()
    }
}

impl fmt::Display for Times {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Times::Exactly(n) => write!(f, "exactly {}", n),
            Times::AtLeast(n) => write!(f, "at least {}", n),
            Times::AtMost(n) => write!(f, "at most {}", n),
            Times::Never => f.write_str("never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_matches() {
        assert!(Times::once().matches(1));
        assert!(!Times::once().matches(2));
        assert!(Times::AtLeast(2).matches(5));
        assert!(!Times::AtLeast(2).matches(1));
        assert!(Times::AtMost(2).matches(0));
        assert!(!Times::AtMost(2).matches(3));
        assert!(Times::Never.matches(0));
        assert!(!Times::Never.matches(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Times::AtLeast(3).to_string(), "at least 3");
        assert_eq!(Times::Never.to_string(), "never");
    }
}
