//! Ordered, case-insensitive header multimap.

use std::fmt;

const REDACTED_NAMES: &[&str] = &["authorization", "cookie", "proxy-authorization", "set-cookie"];

/// One (name, value) pair as stored. Names keep their original case; all
/// comparisons are ASCII case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: String,
}

/// An insertion-ordered sequence of header pairs with case-insensitive
/// lookup, matching OkHttp-style `Headers`: duplicates are preserved in
/// order, not merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Entry>,
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("header name must not be empty".to_owned());
    }
    for b in name.bytes() {
        if b.is_ascii_control() || b == b':' {
            return Err(format!("invalid header name {name:?}"));
        }
    }
    Ok(())
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> HeadersBuilder {
        HeadersBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a pair, trimming the value as the data model requires.
    /// Panics on a malformed name; use `HeadersBuilder::try_add` at
    /// construction boundaries that must not panic.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        validate_name(&name).expect("invalid header name");
        self.entries.push(Entry {
            name,
            value: value.into().trim().to_owned(),
        });
    }

    /// Removes every entry with this name (case-insensitive) and appends a
    /// fresh single value, as the bridge interceptor does for `Host` et al.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.add(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|e| (e.name.as_str(), e.value.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Byte-cost approximation: `Σ (len(name)+len(value)+3) + 2`.
    pub fn byte_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.name.len() + e.value.len() + 3)
            .sum::<usize>()
            + 2
    }

    /// True when every header named in this `Vary` value compares equal
    /// between two request header sets.
    pub fn vary_matches(vary: &Headers, cached_request: &Headers, new_request: &Headers) -> bool {
        let Some(vary_value) = vary.get("vary") else {
            return true;
        };
        if vary_value.trim() == "*" {
            return false;
        }
        vary_value.split(',').all(|field| {
            let field = field.trim();
            if field.is_empty() {
                return true;
            }
            cached_request.get_all(field) == new_request.get_all(field)
        })
    }

    /// The subset of `request_headers` named by `vary`, persisted alongside
    /// a cache entry.
    pub fn subset_named_by_vary(vary_value: &str, request_headers: &Headers) -> Headers {
        let mut out = Headers::new();
        for field in vary_value.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            for value in request_headers.get_all(field) {
                out.add(field, value);
            }
        }
        out
    }
}

impl fmt::Display for Headers {
    /// Diagnostic rendering with `Authorization`/`Cookie`/etc. redacted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let redacted = REDACTED_NAMES
                .iter()
                .any(|n| entry.name.eq_ignore_ascii_case(n));
            if redacted {
                writeln!(f, "{}: ██", entry.name)?;
            } else {
                writeln!(f, "{}: {}", entry.name, entry.value)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

#[derive(Debug, Default)]
pub struct HeadersBuilder {
    headers: Headers,
}

impl HeadersBuilder {
    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn try_add(&mut self, name: &str, value: &str) -> Result<(), String> {
        validate_name(name)?;
        self.headers.add(name, value);
        Ok(())
    }

    pub fn build(self) -> Headers {
        self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut h = Headers::new();
        h.add("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn preserves_duplicates_in_order() {
        let mut h = Headers::new();
        h.add("X-A", "1");
        h.add("X-A", "2");
        assert_eq!(h.get_all("x-a"), vec!["1", "2"]);
        assert_eq!(h.get("x-a"), Some("1"));
    }

    #[test]
    fn set_replaces_all_prior_values() {
        let mut h = Headers::new();
        h.add("Host", "a.example");
        h.add("Host", "b.example");
        h.set("Host", "c.example");
        assert_eq!(h.get_all("host"), vec!["c.example"]);
    }

    #[test]
    fn vary_star_never_matches() {
        let mut vary = Headers::new();
        vary.add("Vary", "*");
        assert!(!Headers::vary_matches(&vary, &Headers::new(), &Headers::new()));
    }

    #[test]
    fn vary_mismatch_on_differing_value() {
        let mut vary = Headers::new();
        vary.add("Vary", "Accept-Encoding");
        let mut cached = Headers::new();
        cached.add("Accept-Encoding", "gzip");
        let mut fresh = Headers::new();
        fresh.add("Accept-Encoding", "identity");
        assert!(!Headers::vary_matches(&vary, &cached, &fresh));
    }

    #[test]
    fn redacts_sensitive_headers_in_display() {
        let mut h = Headers::new();
        h.add("Authorization", "Bearer secret");
        let rendered = h.to_string();
        assert!(!rendered.contains("secret"));
    }
}
