//! Length-based token mass approximation.
//!
//! The breaker decision depends on these numbers, so counting is pure: no
//! tokenizer model, no I/O, identical output for identical input.

use memcurate_state::Memory;

/// Default characters per token for mixed prose.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Approximates the "information mass" of text and memory collections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenAccountant {
    chars_per_token: f64,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl TokenAccountant {
    /// Falls back to the default ratio for non-finite or non-positive input.
    pub fn new(chars_per_token: f64) -> Self {
        if chars_per_token.is_finite() && chars_per_token > 0.0 {
            Self { chars_per_token }
        } else {
            Self::default()
        }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// `ceil(chars / chars_per_token)`; 0 for empty text, at least 1 otherwise.
    pub fn count(&self, text: &str) -> u64 {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        ((chars as f64 / self.chars_per_token).ceil() as u64).max(1)
    }

    /// Sum of `count` over the non-tombstoned memories.
    pub fn mass<'a, I>(&self, memories: I) -> u64
    where
        I: IntoIterator<Item = &'a Memory>,
    {
        memories
            .into_iter()
            .filter(|m| !m.tombstoned)
            .map(|m| self.count(&m.content))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memcurate_state::{MemoryKind, OwnerId};

    #[test]
    fn empty_text_has_no_mass() {
        assert_eq!(TokenAccountant::default().count(""), 0);
    }

    #[test]
    fn short_text_counts_at_least_one() {
        assert_eq!(TokenAccountant::default().count("a"), 1);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let acc = TokenAccountant::default();
        // 8 scalar values, 24 bytes
        assert_eq!(acc.count("日本語日本語日本"), 2);
        assert_eq!(acc.count("abcdefgh"), 2);
        assert_eq!(acc.count("abcdefghi"), 3);
    }

    #[test]
    fn count_is_stable() {
        let acc = TokenAccountant::new(3.5);
        let text = "The user prefers concise answers with code first.";
        let first = acc.count(text);
        for _ in 0..10 {
            assert_eq!(acc.count(text), first);
        }
    }

    #[test]
    fn invalid_ratio_falls_back_to_default() {
        assert_eq!(TokenAccountant::new(0.0), TokenAccountant::default());
        assert_eq!(TokenAccountant::new(f64::NAN), TokenAccountant::default());
    }

    #[test]
    fn mass_skips_tombstoned() {
        let acc = TokenAccountant::default();
        let owner = OwnerId::from("o");
        let live = Memory::new(owner.clone(), "x".repeat(40), MemoryKind::Core);
        let mut dead = Memory::new(owner, "y".repeat(400), MemoryKind::Core);
        dead.tombstoned = true;
        assert_eq!(acc.mass([&live, &dead]), 10);
        assert_eq!(acc.mass(Vec::<&Memory>::new()), 0);
    }
}
