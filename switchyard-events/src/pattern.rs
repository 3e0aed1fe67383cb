//! Topic grammar and wildcard pattern compilation.
//!
//! Topics are colon-separated segments of ASCII letters, digits, `_` and `-`
//! (e.g. `user:42:updated`). Patterns use the same grammar and may replace
//! whole segments with wildcards:
//!
//! - `*` matches exactly one segment
//! - `**` matches zero or more consecutive segments
//! - `++` matches one or more consecutive segments
//!
//! ```
//! use switchyard_events::pattern::compile;
//!
//! let matcher = compile("user:**:updated").unwrap();
//! assert!(matcher.test("user:updated"));
//! assert!(matcher.test("user:42:profile:updated"));
//!
//! let matcher = compile("user:++:updated").unwrap();
//! assert!(!matcher.test("user:updated"));
//! ```

use crate::error::PatternError;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use tracing::trace;

/// Segment separator.
pub const SEPARATOR: char = ':';

/// Wildcard matching exactly one segment.
pub const WILDCARD_ONE: &str = "*";

/// Wildcard matching zero or more segments.
pub const WILDCARD_ANY: &str = "**";

/// Wildcard matching one or more segments.
pub const WILDCARD_SOME: &str = "++";

/// Default ceiling for the compiled pattern cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Regex fragment for one segment body.
const SEGMENT_BODY: &str = "[^:]+";

fn is_wildcard(segment: &str) -> bool {
    segment == WILDCARD_ONE || segment == WILDCARD_ANY || segment == WILDCARD_SOME
}

fn is_segment_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

fn check_grammar(input: &str, allow_wildcards: bool) -> Result<(), PatternError> {
    if input.is_empty() {
        return Err(PatternError::Empty);
    }

    for (position, segment) in input.split(SEPARATOR).enumerate() {
        if segment.is_empty() {
            return Err(PatternError::EmptySegment {
                input: input.to_string(),
                position,
            });
        }

        if allow_wildcards && is_wildcard(segment) {
            continue;
        }

        if !segment.chars().all(is_segment_char) {
            return Err(PatternError::InvalidSegment {
                input: input.to_string(),
                segment: segment.to_string(),
            });
        }
    }

    Ok(())
}

/// Validate a concrete topic used for emission.
///
/// Wildcard segments are rejected with [`PatternError::WildcardInTopic`].
pub fn validate_topic(topic: &str) -> Result<(), PatternError> {
    if topic.split(SEPARATOR).any(is_wildcard) {
        return Err(PatternError::WildcardInTopic {
            topic: topic.to_string(),
        });
    }
    check_grammar(topic, false)
}

/// Validate a subscription pattern.
///
/// Wildcards must occupy a whole segment; `a*b` or `***` are invalid.
pub fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    check_grammar(pattern, true)
}

/// Whether a pattern contains any wildcard segment.
pub fn has_wildcards(pattern: &str) -> bool {
    pattern.split(SEPARATOR).any(is_wildcard)
}

/// A compiled pattern.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Wildcard-free pattern; compared by string equality.
    Exact(String),
    /// Anchored regex over the separator-prefixed topic.
    Wildcard(Regex),
}

impl Matcher {
    /// Test whether a concrete topic matches.
    pub fn test(&self, topic: &str) -> bool {
        match self {
            Matcher::Exact(expected) => expected == topic,
            Matcher::Wildcard(regex) => {
                let mut prefixed = String::with_capacity(topic.len() + 1);
                prefixed.push(SEPARATOR);
                prefixed.push_str(topic);
                regex.is_match(&prefixed)
            }
        }
    }

    /// Regex source for wildcard matchers.
    pub fn as_regex_str(&self) -> Option<&str> {
        match self {
            Matcher::Exact(_) => None,
            Matcher::Wildcard(regex) => Some(regex.as_str()),
        }
    }
}

/// Compile a pattern into a [`Matcher`].
///
/// Every segment is translated together with the separator in front of it,
/// and topics are tested as `:` + topic. A multi-segment wildcard therefore
/// owns its own separators, which is what lets `a:**:b` match `a:b` and
/// `**:x` match `x`.
pub fn compile(pattern: &str) -> Result<Matcher, PatternError> {
    validate_pattern(pattern)?;

    if !has_wildcards(pattern) {
        return Ok(Matcher::Exact(pattern.to_string()));
    }

    let mut source = String::with_capacity(pattern.len() * 4 + 2);
    source.push('^');
    for segment in pattern.split(SEPARATOR) {
        match segment {
            WILDCARD_ONE => {
                source.push(SEPARATOR);
                source.push_str(SEGMENT_BODY);
            }
            WILDCARD_ANY => {
                source.push_str("(?::");
                source.push_str(SEGMENT_BODY);
                source.push_str(")*");
            }
            WILDCARD_SOME => {
                source.push_str("(?::");
                source.push_str(SEGMENT_BODY);
                source.push_str(")+");
            }
            literal => {
                source.push(SEPARATOR);
                source.push_str(&regex::escape(literal));
            }
        }
    }
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| PatternError::Compile {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    Ok(Matcher::Wildcard(regex))
}

/// Cache of compiled matchers keyed by the literal pattern string.
///
/// Once the number of entries reaches the capacity the whole cache is
/// cleared before the next insert.
#[derive(Debug)]
pub struct PatternCache {
    entries: DashMap<String, Arc<Matcher>>,
    capacity: usize,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Get the compiled matcher for a pattern, compiling it on a miss.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Matcher>, PatternError> {
        if let Some(matcher) = self.entries.get(pattern) {
            return Ok(matcher.value().clone());
        }

        let matcher = Arc::new(compile(pattern)?);

        if self.entries.len() >= self.capacity {
            trace!(
                capacity = self.capacity,
                "Pattern cache full, clearing compiled matchers"
            );
            self.entries.clear();
        }
        self.entries.insert(pattern.to_string(), matcher.clone());

        Ok(matcher)
    }

    /// Test a topic against a pattern through the cache.
    pub fn matches(&self, topic: &str, pattern: &str) -> Result<bool, PatternError> {
        Ok(self.get_or_compile(pattern)?.test(topic))
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, topic: &str) -> bool {
        compile(pattern).unwrap().test(topic)
    }

    #[test]
    fn test_exact_pattern() {
        assert!(matches("a:b", "a:b"));
        assert!(!matches("a:b", "a"));
        assert!(!matches("a:b", "a:b:c"));
        assert!(!matches("a:b", "a:bc"));
        assert!(matches!(compile("a:b").unwrap(), Matcher::Exact(_)));
    }

    #[test]
    fn test_single_wildcard() {
        assert!(matches("user:*:updated", "user:42:updated"));
        assert!(!matches("user:*:updated", "user:42:deleted"));
        assert!(!matches("user:*:updated", "user:updated"));
        assert!(!matches("user:*:updated", "user:1:2:updated"));
        assert!(matches("*", "a"));
        assert!(!matches("*", "a:b"));
    }

    #[test]
    fn test_trailing_any() {
        assert!(matches("ns:**", "ns"));
        assert!(matches("ns:**", "ns:x"));
        assert!(matches("ns:**", "ns:x:y"));
        assert!(!matches("ns:**", "other:x"));
        assert!(!matches("ns:**", "nsx"));
    }

    #[test]
    fn test_leading_any() {
        assert!(matches("**:x", "x"));
        assert!(matches("**:x", "p:x"));
        assert!(matches("**:x", "p:q:x"));
        assert!(!matches("**:x", "x:p"));
        assert!(!matches("**:x", "px"));
    }

    #[test]
    fn test_interior_any() {
        assert!(matches("a:**:b", "a:b"));
        assert!(matches("a:**:b", "a:x:b"));
        assert!(matches("a:**:b", "a:x:y:b"));
        assert!(!matches("a:**:b", "a:x"));
        assert!(!matches("a:**:b", "ab"));
    }

    #[test]
    fn test_any_alone() {
        assert!(matches("**", "a"));
        assert!(matches("**", "a:b:c"));
    }

    #[test]
    fn test_some_wildcard() {
        assert!(matches("ns:++", "ns:x"));
        assert!(matches("ns:++", "ns:x:y"));
        assert!(!matches("ns:++", "ns"));
        assert!(!matches("a:++:b", "a:b"));
        assert!(matches("a:++:b", "a:x:b"));
        assert!(matches("a:++:b", "a:x:y:b"));
        assert!(matches("++:x", "p:x"));
        assert!(!matches("++:x", "x"));
    }

    #[test]
    fn test_literals_are_escaped() {
        // `-` and `_` are literal segment characters, never regex syntax
        assert!(matches("a-b:*", "a-b:c"));
        assert!(!matches("a-b:*", "aab:c"));
        assert!(matches("a_b:**", "a_b"));
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("user:42:updated").is_ok());
        assert!(validate_topic("a").is_ok());
        assert_eq!(validate_topic(""), Err(PatternError::Empty));
        assert!(matches!(
            validate_topic("a::b"),
            Err(PatternError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            validate_topic("a:b c"),
            Err(PatternError::InvalidSegment { .. })
        ));
        assert!(matches!(
            validate_topic("a:*"),
            Err(PatternError::WildcardInTopic { .. })
        ));
        assert!(matches!(
            validate_topic("a:"),
            Err(PatternError::EmptySegment { .. })
        ));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("a:*:**:++").is_ok());
        assert!(validate_pattern("a*b").is_err());
        assert!(validate_pattern("***").is_err());
        assert!(validate_pattern("a.b").is_err());
        assert!(validate_pattern(":a").is_err());
        assert!(compile("a:+").is_err());
    }

    #[test]
    fn test_cache_reuses_and_clears_at_capacity() {
        let cache = PatternCache::new(2);
        let first = cache.get_or_compile("a:*").unwrap();
        let again = cache.get_or_compile("a:*").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);

        cache.get_or_compile("b:*").unwrap();
        assert_eq!(cache.len(), 2);

        cache.get_or_compile("c:*").unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_does_not_store_invalid_patterns() {
        let cache = PatternCache::default();
        assert!(cache.matches("a", "a b").is_err());
        assert!(cache.is_empty());
        assert!(cache.matches("a:b", "a:*").unwrap());
    }
}
