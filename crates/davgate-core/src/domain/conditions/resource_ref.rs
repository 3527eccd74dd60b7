//! Resolution of resource references named in `If` header tags

use crate::domain::resource_path::ResourcePath;
use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;

/// Where the managed root is published
///
/// `http://example.com/dav` has origin `http://example.com` and mount
/// prefix `/dav/`. Without an origin only path-absolute references and
/// absolute URIs on any host are matched against the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl {
    origin: Option<String>,
    prefix: String,
}

impl BaseUrl {
    /// Root mounted at `/` on any host
    pub fn root() -> Self {
        Self {
            origin: None,
            prefix: "/".to_string(),
        }
    }

    /// Parse an absolute `scheme://authority/path` URL
    pub fn parse(url: &str) -> Result<Self> {
        let (origin, path) = split_origin(url.trim())
            .ok_or_else(|| Error::InvalidInput(format!("base URL must be absolute: '{}'", url)))?;

        let mut prefix = path.to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }

        Ok(Self {
            origin: Some(origin.to_ascii_lowercase()),
            prefix,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Map a Simple-ref (absolute URI or path-absolute) to a managed path
    ///
    /// Returns `None` for references outside the managed root, on another
    /// origin, or that do not decode to a valid path.
    pub fn resolve(&self, reference: &str) -> Option<ResourcePath> {
        let reference = reference.trim();
        let path = if reference.starts_with('/') {
            reference
        } else {
            let (origin, path) = split_origin(reference)?;
            if let Some(expected) = &self.origin {
                if !origin.eq_ignore_ascii_case(expected) {
                    return None;
                }
            }
            path
        };

        let path = path.split(['?', '#']).next().unwrap_or_default();
        let relative = if path == self.prefix.trim_end_matches('/') {
            ""
        } else {
            path.strip_prefix(self.prefix.as_str())?
        };

        let decoded = percent_decode_str(relative).decode_utf8().ok()?;
        ResourcePath::parse(&decoded).ok()
    }
}

impl Default for BaseUrl {
    fn default() -> Self {
        Self::root()
    }
}

/// Split `scheme://authority/path` into (`scheme://authority`, `/path`)
fn split_origin(url: &str) -> Option<(&str, &str)> {
    let scheme_end = url.find("://")?;
    if scheme_end == 0 {
        return None;
    }
    let after = scheme_end + 3;
    match url[after..].find('/') {
        Some(idx) => Some((&url[..after + idx], &url[after + idx..])),
        None => Some((url, "/")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_uri_under_mount() {
        let base = BaseUrl::parse("http://Example.com/webdav.cgi").unwrap();
        assert_eq!(base.prefix(), "/webdav.cgi/");

        let path = base.resolve("http://example.com/webdav.cgi/docs/a%20b.txt").unwrap();
        assert_eq!(path.as_str(), "docs/a b.txt");

        assert!(base.resolve("http://example.com/webdav.cgi").unwrap().is_root());
        assert!(base.resolve("http://example.com/webdav.cgi/").unwrap().is_root());
    }

    #[test]
    fn test_resolve_path_absolute() {
        let base = BaseUrl::parse("https://host/dav/").unwrap();
        assert_eq!(base.resolve("/dav/x?y=1").unwrap().as_str(), "x");
        assert!(base.resolve("/other/x").is_none());
    }

    #[test]
    fn test_resolve_rejects_foreign_or_escaping_refs() {
        let base = BaseUrl::parse("http://example.com/dav").unwrap();
        assert!(base.resolve("http://evil.com/dav/x").is_none());
        assert!(base.resolve("http://example.com/davx/y").is_none());
        assert!(base.resolve("http://example.com/dav/../etc").is_none());
        assert!(base.resolve("relative/path").is_none());
        assert!(base.resolve("/dav/%ff").is_none());
    }

    #[test]
    fn test_root_base_accepts_any_host() {
        let base = BaseUrl::root();
        assert_eq!(base.resolve("http://anything/a/b").unwrap().as_str(), "a/b");
        assert_eq!(base.resolve("/a").unwrap().as_str(), "a");
    }

    #[test]
    fn test_parse_requires_absolute_url() {
        assert!(BaseUrl::parse("/dav").is_err());
        assert!(BaseUrl::parse("://x").is_err());
    }
}
