//! Rule resolution.
//!
//! Rules are kept ordered by priority descending, then creation time
//! descending. Resolution is a linear scan over that order and the first
//! structural match wins, so "highest priority wins; among equal priority
//! the most recently created rule wins". The id is a final key only so that
//! rules created in the same instant still sort deterministically.

use crate::rule::Rule;
use std::cmp::Ordering;

/// Ordering used for every rule list handed to the matcher.
pub fn precedence(a: &Rule, b: &Rule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort rules into match order.
pub fn sort_by_precedence(rules: &mut [Rule]) {
    rules.sort_by(precedence);
}

/// Reduce an inbound target to the path used for matching.
///
/// Absolute URLs keep only their path component; plain paths drop any
/// query string or fragment.
pub fn normalize_path(target: &str) -> &str {
    let lower = target.get(..8).map(str::to_ascii_lowercase);
    let is_absolute = lower
        .as_deref()
        .is_some_and(|p| p.starts_with("http://") || p.starts_with("https://"));

    if is_absolute {
        if let Ok(uri) = target.parse::<http::Uri>() {
            // `Uri::path` defaults to "/" for an empty path.
            let path = uri.path();
            if let Some(start) = target.find(path).filter(|_| path != "/") {
                return &target[start..start + path.len()];
            }
            return "/";
        }
        return target;
    }

    match target.find(['?', '#']) {
        Some(idx) => &target[..idx],
        None => target,
    }
}

/// Return the first rule in `rules` (already in precedence order) whose
/// pattern prefixes `path` and whose methods contain `method`.
pub fn find_matching<'a>(
    rules: &'a [Rule],
    path: &str,
    method: &str,
    enabled_only: bool,
) -> Option<&'a Rule> {
    let path = normalize_path(path);
    rules
        .iter()
        .filter(|rule| !enabled_only || rule.enabled)
        .find(|rule| rule.matches(path, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_scheme_and_host() {
        assert_eq!(normalize_path("https://example.com/api/users?x=1"), "/api/users");
        assert_eq!(normalize_path("http://example.com:8080/a/b"), "/a/b");
        assert_eq!(normalize_path("HTTPS://example.com/a"), "/a");
        assert_eq!(normalize_path("https://example.com"), "/");
    }

    #[test]
    fn normalize_leaves_plain_paths() {
        assert_eq!(normalize_path("/api/users"), "/api/users");
        assert_eq!(normalize_path("/api/users?page=2"), "/api/users");
        assert_eq!(normalize_path("/api#frag"), "/api");
    }
}
