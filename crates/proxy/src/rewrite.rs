//! Path rewriting for forwarded requests.

/// Strip the routing prefix from a path before forwarding.
///
/// Pure and deterministic: the query string is preserved untouched, and the
/// result always begins with a single leading `/` — stripping the bare
/// prefix itself yields `/`. Paths that do not carry the prefix pass through
/// unchanged, which also makes the rewrite idempotent on already-rewritten
/// paths.
pub fn rewrite_path(path_and_query: &str, prefix: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let stripped = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix).unwrap_or(path)
    };

    let rewritten = if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{}", stripped)
    };

    match query {
        Some(query) => format!("{}?{}", rewritten, query),
        None => rewritten,
    }
}
