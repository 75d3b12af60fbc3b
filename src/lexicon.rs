//! Commit-message lexicon scanning.
//!
//! Compiles a fixed word list into a single word-boundary alternation and
//! reports every match in a piece of text. Used by the statistics updater to
//! keep per-user and global matched-term counters for push commit messages.

use anyhow::Result;
use regex::Regex;

/// Bundled default word list.
pub const DEFAULT_WORDS: &str = include_str!("../static/swears.txt");

pub struct Lexicon {
    pattern: Regex,
}

impl Lexicon {
    /// Compile the bundled word list.
    pub fn bundled() -> Result<Self> {
        Self::from_words(DEFAULT_WORDS.lines())
    }

    /// Compile a lexicon from arbitrary words. Empty lines are ignored.
    pub fn from_words<'a, I: IntoIterator<Item = &'a str>>(words: I) -> Result<Self> {
        let alternation = words
            .into_iter()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?;
        Ok(Self { pattern })
    }

    /// All lexicon terms found in `text`, lowercased, in match order.
    pub fn matches(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        let lexicon = Lexicon::from_words(["hell", "damn"]).unwrap();
        assert_eq!(lexicon.matches("oh hell, damn it"), vec!["hell", "damn"]);
        // "hello" and "shell" must not match "hell".
        assert!(lexicon.matches("hello from the shell").is_empty());
    }

    #[test]
    fn test_case_insensitive_and_lowercased() {
        let lexicon = Lexicon::from_words(["damn"]).unwrap();
        assert_eq!(lexicon.matches("DAMN broken CI"), vec!["damn"]);
    }

    #[test]
    fn test_bundled_compiles() {
        let lexicon = Lexicon::bundled().unwrap();
        assert!(!lexicon.matches("this damn test").is_empty());
    }
}
