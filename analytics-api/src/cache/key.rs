use std::borrow::Cow;
use std::fmt;

const DELIMITER: char = ':';

/// Deterministic cache key: a fixed namespace followed by ordered segments, joined by `:`.
///
/// Segment values have `%` and `:` percent-escaped, so a value can never forge a delimiter.
/// Absent optional values become an empty segment rather than disappearing, so the number of
/// segments for a namespace is fixed. Request filters are normalised so that a present value
/// is never empty, which keeps "absent" and "present" apart.
///
/// ```
/// use analytics_api::cache::CacheKey;
///
/// let key = CacheKey::new("sales").segment("2025-01").segment("2025-05").optional(None::<&str>);
/// assert_eq!(key.to_string(), "sales:2025-01:2025-05:");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: &'static str,
    segments: Vec<String>,
}

impl CacheKey {
    pub fn new(namespace: &'static str) -> Self {
        Self {
            namespace,
            segments: Vec::new(),
        }
    }

    /// Append a required value
    pub fn segment(mut self, value: impl fmt::Display) -> Self {
        self.segments.push(escape(&value.to_string()).into_owned());
        self
    }

    /// Append an optional value; `None` becomes the empty segment
    pub fn optional<T: fmt::Display>(mut self, value: Option<T>) -> Self {
        self.segments
            .push(value.map(|v| escape(&v.to_string()).into_owned()).unwrap_or_default());
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace)?;
        for segment in &self.segments {
            write!(f, "{DELIMITER}{segment}")?;
        }
        Ok(())
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    if value.contains(['%', DELIMITER]) {
        Cow::Owned(value.replace('%', "%25").replace(DELIMITER, "%3A"))
    } else {
        Cow::Borrowed(value)
    }
}
