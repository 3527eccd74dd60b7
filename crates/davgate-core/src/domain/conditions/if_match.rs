//! `If-Match` / `If-None-Match` checks

use crate::error::{Error, Result};

/// Check plain HTTP etag preconditions against the current etag
///
/// `current` is `None` when the resource does not exist. Returns `false`
/// when the request should fail with 412.
pub fn check_if_match(
    current: Option<&str>,
    if_match: Option<&str>,
    if_none_match: Option<&str>,
) -> Result<bool> {
    let if_match = if_match.map(str::trim).filter(|h| !h.is_empty());
    let if_none_match = if_none_match.map(str::trim).filter(|h| !h.is_empty());

    if if_match.is_some() && if_none_match.is_some() {
        return Err(Error::InvalidInput(
            "If-Match conflicts with If-None-Match".to_string(),
        ));
    }

    let Some(current) = current else {
        // If-Match fails when there is no current entity
        return Ok(if_match.is_none());
    };

    if let Some(header) = if_match {
        return Ok(matches_any(header, current, strong_eq));
    }
    if let Some(header) = if_none_match {
        return Ok(!matches_any(header, current, weak_eq));
    }
    Ok(true)
}

fn matches_any(header: &str, current: &str, eq: fn(&str, &str) -> bool) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || eq(tag, current))
}

/// Strong comparison: both strong and byte-identical
fn strong_eq(a: &str, b: &str) -> bool {
    !a.starts_with("W/") && !b.starts_with("W/") && a == b
}

/// Weak comparison: identical opaque tags, ignoring weakness
fn weak_eq(a: &str, b: &str) -> bool {
    a.trim_start_matches("W/") == b.trim_start_matches("W/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_headers_is_bad_request() {
        let err = check_if_match(Some("\"a\""), Some("\"a\""), Some("\"b\"")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_missing_resource() {
        assert!(!check_if_match(None, Some("*"), None).unwrap());
        assert!(check_if_match(None, None, Some("*")).unwrap());
        assert!(check_if_match(None, None, None).unwrap());
    }

    #[test]
    fn test_if_match_lists() {
        assert!(check_if_match(Some("\"b\""), Some("\"a\", \"b\""), None).unwrap());
        assert!(check_if_match(Some("\"b\""), Some("*"), None).unwrap());
        assert!(!check_if_match(Some("\"c\""), Some("\"a\", \"b\""), None).unwrap());
        assert!(!check_if_match(Some("W/\"b\""), Some("W/\"b\""), None).unwrap());
    }

    #[test]
    fn test_if_none_match() {
        assert!(!check_if_match(Some("\"a\""), None, Some("*")).unwrap());
        assert!(!check_if_match(Some("\"a\""), None, Some("W/\"a\"")).unwrap());
        assert!(check_if_match(Some("\"a\""), None, Some("\"b\"")).unwrap());
    }
}
