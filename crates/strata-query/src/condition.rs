//! String and binary conditions.
//!
//! Integer and floating point nodes use the comparison markers of
//! `strata_storage`. Variable-length values add substring conditions and
//! case-insensitive variants. Case folding works char by char against
//! precomputed upper and lower forms of the needle, so a needle char matches
//! a stored char if either form equals it.

use std::borrow::Cow;

use strata_storage::{Equal, NotEqual};

/// A needle prepared for repeated comparison.
#[derive(Debug, Clone, Default)]
pub struct Needle {
    bytes: Vec<u8>,
    upper: Vec<char>,
    lower: Vec<char>,
}

/// Single-char case mapping; chars that map to several chars stay as they are.
fn single(mut mapped: impl Iterator<Item = char>, original: char) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(c), None) => c,
        _ => original,
    }
}

impl Needle {
    /// Prepares `bytes`. Returns the validation error for a string needle
    /// that is not UTF-8.
    pub fn new(bytes: &[u8]) -> (Self, Option<String>) {
        match std::str::from_utf8(bytes) {
            Ok(s) => (
                Self {
                    bytes: bytes.to_vec(),
                    upper: s.chars().map(|c| single(c.to_uppercase(), c)).collect(),
                    lower: s.chars().map(|c| single(c.to_lowercase(), c)).collect(),
                },
                None,
            ),
            Err(_) => (
                Self {
                    bytes: bytes.to_vec(),
                    upper: Vec::new(),
                    lower: Vec::new(),
                },
                Some(format!("Malformed UTF-8: {}", String::from_utf8_lossy(bytes))),
            ),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The needle as a string, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    fn char_count(&self) -> usize {
        self.lower.len()
    }

    #[inline]
    fn char_matches(&self, i: usize, c: char) -> bool {
        self.upper[i] == c || self.lower[i] == c
    }

    /// Case-insensitive match of the needle against the start of `chars`.
    fn prefix_of(&self, mut chars: impl Iterator<Item = char>) -> bool {
        (0..self.char_count()).all(|i| chars.next().is_some_and(|c| self.char_matches(i, c)))
    }

    /// Case-insensitive match of the needle against the end of `chars`.
    fn suffix_of(&self, mut chars: impl DoubleEndedIterator<Item = char>) -> bool {
        (0..self.char_count())
            .rev()
            .all(|i| chars.next_back().is_some_and(|c| self.char_matches(i, c)))
    }
}

/// A condition on a variable-length value.
pub trait StringCondition: Copy + Default + Send + Sync + 'static {
    /// Returns true if `value` satisfies the condition for `needle`.
    fn matches(needle: &Needle, value: &[u8]) -> bool;
}

/// `value` contains the needle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Contains;

/// `value` starts with the needle.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeginsWith;

/// `value` ends with the needle.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndsWith;

/// Case-insensitive [`Equal`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualIns;

/// Case-insensitive [`NotEqual`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NotEqualIns;

/// Case-insensitive [`Contains`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainsIns;

/// Case-insensitive [`BeginsWith`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BeginsWithIns;

/// Case-insensitive [`EndsWith`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EndsWithIns;

impl StringCondition for Equal {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        value == needle.as_bytes()
    }
}

impl StringCondition for NotEqual {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        value != needle.as_bytes()
    }
}

impl StringCondition for Contains {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        let n = needle.as_bytes();
        n.is_empty() || value.windows(n.len()).any(|w| w == n)
    }
}

impl StringCondition for BeginsWith {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        value.starts_with(needle.as_bytes())
    }
}

impl StringCondition for EndsWith {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        value.ends_with(needle.as_bytes())
    }
}

/// Stored values are compared as text; invalid sequences become U+FFFD.
fn text(value: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(value)
}

impl StringCondition for EqualIns {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        let value = text(value);
        let mut chars = value.chars();
        needle.prefix_of(&mut chars) && chars.next().is_none()
    }
}

impl StringCondition for NotEqualIns {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        !EqualIns::matches(needle, value)
    }
}

impl StringCondition for ContainsIns {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        if needle.char_count() == 0 {
            return true;
        }
        let value = text(value);
        value.char_indices().any(|(at, _)| needle.prefix_of(value[at..].chars()))
    }
}

impl StringCondition for BeginsWithIns {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        needle.prefix_of(text(value).chars())
    }
}

impl StringCondition for EndsWithIns {
    fn matches(needle: &Needle, value: &[u8]) -> bool {
        needle.suffix_of(text(value).chars())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn needle(s: &str) -> Needle {
        Needle::new(s.as_bytes()).0
    }

    #[test]
    fn test_case_sensitive_conditions() {
        let n = needle("ell");
        assert!(Contains::matches(&n, b"hello"));
        assert!(!Contains::matches(&n, b"HELLO"));
        assert!(BeginsWith::matches(&needle("he"), b"hello"));
        assert!(EndsWith::matches(&needle("lo"), b"hello"));
        assert!(Equal::matches(&needle("hello"), b"hello"));
        assert!(NotEqual::matches(&needle("hello"), b"hell"));
        assert!(Contains::matches(&needle(""), b""));
    }

    #[test]
    fn test_case_insensitive_conditions() {
        assert!(EqualIns::matches(&needle("HeLLo"), b"hello"));
        assert!(!EqualIns::matches(&needle("hello"), b"hello!"));
        assert!(ContainsIns::matches(&needle("ELL"), b"hello"));
        assert!(BeginsWithIns::matches(&needle("HE"), b"hello"));
        assert!(EndsWithIns::matches(&needle("LO"), b"hello"));
        assert!(!EndsWithIns::matches(&needle("hello world"), b"world"));
        assert!(NotEqualIns::matches(&needle("abc"), b"abd"));
    }

    #[test]
    fn test_case_insensitive_edges() {
        assert!(EqualIns::matches(&needle(""), b""));
        assert!(!EqualIns::matches(&needle(""), b"a"));
        assert!(!EqualIns::matches(&needle("abc"), b"ab"));
        assert!(BeginsWithIns::matches(&needle(""), b"x"));
        assert!(!BeginsWithIns::matches(&needle("abc"), b"AB"));
        assert!(EndsWithIns::matches(&needle("C"), b"abc"));
        assert!(!EndsWithIns::matches(&needle("B"), b"abc"));
        assert!(ContainsIns::matches(&needle("BC"), b"abc"));
        assert!(!ContainsIns::matches(&needle("ca"), b"abc"));
        assert!(ContainsIns::matches(&needle("x"), &[0xFF, b'X', 0xFE]));
        assert!(ContainsIns::matches(&needle("ÉT"), "l'été".as_bytes()));
    }

    #[test]
    fn test_non_ascii_folding() {
        assert!(EqualIns::matches(&needle("ÆBLE"), "æble".as_bytes()));
        assert!(ContainsIns::matches(&needle("ö"), "SCHÖN".as_bytes()));
    }

    #[test]
    fn test_malformed_needle_reports_error() {
        let (_, err) = Needle::new(&[0x66, 0xFF, 0x6F]);
        let err = err.unwrap();
        assert!(err.starts_with("Malformed UTF-8: "));
        assert!(Needle::new(b"fine").1.is_none());
    }
}
