//! Suffix allow-list matching
//!
//! A single predicate shared by the DNS responder (forge vs. forward) and
//! the TCP proxy (allow vs. drop): a name matches a configured suffix `S`
//! iff it equals `S` or ends with `"." + S`. Matching is case-insensitive
//! and ignores a trailing dot on the query name and a leading dot on the
//! configured suffix.
//!
//! # Example
//!
//! ```
//! use spoof_router::rules::SuffixMatcher;
//!
//! let matcher = SuffixMatcher::new([".openai.com", "cursor.sh"]);
//!
//! assert!(matcher.matches("api.openai.com"));
//! assert!(matcher.matches("OPENAI.COM."));
//! assert!(matcher.matches("cursor.sh"));
//! assert!(!matcher.matches("notopenai.com"));
//! ```

/// Suffix matcher over a fixed allow-list.
///
/// Suffixes are canonicalised once at construction; `matches` is a linear
/// scan, which is the right shape for an allow-list of a dozen entries.
#[derive(Debug, Clone)]
pub struct SuffixMatcher {
    /// Canonical suffixes: lowercase, leading dot stripped
    suffixes: Vec<String>,
}

impl SuffixMatcher {
    /// Build a matcher from configured suffixes.
    ///
    /// Empty entries (including a bare `.`) are discarded.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .filter_map(|s| {
                let cleaned = s
                    .as_ref()
                    .trim()
                    .trim_start_matches('.')
                    .to_ascii_lowercase();
                if cleaned.is_empty() {
                    None
                } else {
                    Some(cleaned)
                }
            })
            .collect();

        Self { suffixes }
    }

    /// Canonicalise a query name: lowercase, trailing dot stripped.
    #[must_use]
    pub fn canonicalize(name: &str) -> String {
        name.trim_end_matches('.').to_ascii_lowercase()
    }

    /// Whether `name` matches any configured suffix.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let name = Self::canonicalize(name);

        self.suffixes
            .iter()
            .any(|suffix| name == *suffix || name.ends_with(&format!(".{suffix}")))
    }

    /// Number of configured suffixes
    #[must_use]
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    /// Whether the allow-list is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> SuffixMatcher {
        SuffixMatcher::new([".openai.com", "chatgpt.com"])
    }

    #[test]
    fn test_exact_match() {
        assert!(matcher().matches("openai.com"));
        assert!(matcher().matches("chatgpt.com"));
    }

    #[test]
    fn test_subdomain_match() {
        assert!(matcher().matches("api.openai.com"));
        assert!(matcher().matches("a.b.c.openai.com"));
    }

    #[test]
    fn test_case_and_dots_indistinguishable() {
        // Mixed case and trailing dot on the query name.
        assert!(matcher().matches("API.OpenAI.COM."));
        // Suffixes configured with and without a leading dot behave alike.
        let with_dot = SuffixMatcher::new([".example.org"]);
        let without_dot = SuffixMatcher::new(["example.org"]);
        for name in ["example.org", "www.example.org", "WWW.EXAMPLE.ORG."] {
            assert_eq!(with_dot.matches(name), without_dot.matches(name));
            assert!(with_dot.matches(name));
        }
    }

    #[test]
    fn test_no_substring_match() {
        // A suffix match is label-aligned, not a substring search.
        assert!(!matcher().matches("notopenai.com"));
        assert!(!matcher().matches("openai.com.evil.com"));
        assert!(!matcher().matches("openai.community"));
    }

    #[test]
    fn test_non_matching() {
        assert!(!matcher().matches("example.org"));
        assert!(!matcher().matches(""));
    }

    #[test]
    fn test_blank_suffixes_discarded() {
        let matcher = SuffixMatcher::new(["", ".", "  ", "real.example"]);
        assert_eq!(matcher.len(), 1);
        assert!(matcher.matches("real.example"));
        // A discarded blank suffix must not match everything.
        assert!(!matcher.matches("anything.at.all"));
    }
}
