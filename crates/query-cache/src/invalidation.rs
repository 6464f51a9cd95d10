//! Cache invalidation support
//!
//! Write-path callers drop cached reads that a mutation made stale, either by
//! a literal substring of the key or by a regular expression.

use regex::Regex;

/// Pattern selecting which cache keys to invalidate
#[derive(Debug, Clone)]
pub enum InvalidationPattern {
    /// Keys containing this literal text
    Substring(String),
    /// Keys matched by this expression
    Regex(Regex),
}

impl InvalidationPattern {
    /// Check whether a key is selected by this pattern
    pub fn matches(&self, key: &str) -> bool {
        match self {
            InvalidationPattern::Substring(text) => key.contains(text.as_str()),
            InvalidationPattern::Regex(re) => re.is_match(key),
        }
    }
}

impl From<&str> for InvalidationPattern {
    fn from(text: &str) -> Self {
        InvalidationPattern::Substring(text.to_string())
    }
}

impl From<String> for InvalidationPattern {
    fn from(text: String) -> Self {
        InvalidationPattern::Substring(text)
    }
}

impl From<Regex> for InvalidationPattern {
    fn from(re: Regex) -> Self {
        InvalidationPattern::Regex(re)
    }
}

/// Trait for components that can drop cached results after data changes
pub trait CacheInvalidator: Send + Sync {
    /// Invalidate every cached result of one query
    fn invalidate_query(&self, query_name: &str) -> usize;

    /// Invalidate all cached results
    fn invalidate_all(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_pattern() {
        let pattern = InvalidationPattern::from("courses");
        assert!(pattern.matches("courses:e30"));
        assert!(pattern.matches("active-courses:e30"));
        assert!(!pattern.matches("users:e30"));
    }

    #[test]
    fn test_regex_pattern() {
        let pattern = InvalidationPattern::from(Regex::new("^course-(stats|summary):").unwrap());
        assert!(pattern.matches("course-stats:e30"));
        assert!(pattern.matches("course-summary:e30"));
        assert!(!pattern.matches("courses:e30"));
    }
}
