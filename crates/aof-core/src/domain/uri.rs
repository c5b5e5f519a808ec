//! Source URIs: `domain:///path/segments`.
//!
//! The server identifies sources and source items by URI.  Cache keys embed
//! the URI as path segments (`[domain, path...]`), so the two conversions here
//! are used whenever a handler turns one into the other.

const URI_SEPARATOR: &str = ":///";

/// Splits a source URI into `[domain, path segments...]`.
///
/// Returns an empty list when the separator is missing or either side of it
/// is empty.
///
/// ```rust
/// use aof_core::parse_uri;
///
/// assert_eq!(parse_uri("example.com:///feeds/main"), vec!["example.com", "feeds", "main"]);
/// assert!(parse_uri("no-separator").is_empty());
/// ```
pub fn parse_uri(uri: &str) -> Vec<String> {
    let Some((domain, path)) = uri.split_once(URI_SEPARATOR) else {
        return Vec::new();
    };
    if domain.is_empty() || path.is_empty() {
        return Vec::new();
    }
    std::iter::once(domain)
        .chain(path.split('/'))
        .map(str::to_owned)
        .collect()
}

/// Joins `[domain, path segments...]` back into a source URI.
///
/// Returns `None` for an empty slice.
pub fn make_uri<S: AsRef<str>>(parts: &[S]) -> Option<String> {
    let (domain, path) = parts.split_first()?;
    let path: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
    Some(format!("{}{URI_SEPARATOR}{}", domain.as_ref(), path.join("/")))
}
