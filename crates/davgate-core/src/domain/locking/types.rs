//! Lock types

use crate::domain::resource_path::ResourcePath;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Scope of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Any number of shared locks may coexist
    Shared,
    /// No other lock may coexist
    Exclusive,
}

impl LockScope {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "exclusive" => Ok(Self::Exclusive),
            other => Err(Error::InvalidInput(format!("unknown lock scope '{}'", other))),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How far a lock reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDepth {
    /// The locked resource only
    Zero,
    /// The resource and everything nested under it
    Infinity,
}

impl LockDepth {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Infinity => "infinity",
        }
    }

    /// Parse the stored form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "zero" | "0" => Ok(Self::Zero),
            "infinity" => Ok(Self::Infinity),
            other => Err(Error::InvalidInput(format!("unknown lock depth '{}'", other))),
        }
    }

    /// Parse a `Depth` header for a LOCK request. Absent means infinity.
    pub fn from_header(header: Option<&str>) -> Result<Self> {
        match header.map(str::trim) {
            None => Ok(Self::Infinity),
            Some("0") => Ok(Self::Zero),
            Some(h) if h.eq_ignore_ascii_case("infinity") => Ok(Self::Infinity),
            Some(other) => Err(Error::InvalidInput(format!(
                "invalid Depth header for lock: '{}'",
                other
            ))),
        }
    }

    /// Depth as a protocol header value
    pub fn header_value(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::Infinity => "infinity",
        }
    }
}

impl fmt::Display for LockDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque proof of lock ownership
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh `urn:uuid:` token
    pub fn generate() -> Self {
        Self(format!("urn:uuid:{}", Uuid::new_v4()))
    }

    /// Wrap a token exactly as the client supplied it
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse a `Lock-Token` header (`<urn:uuid:...>`, brackets optional)
    pub fn from_header(header: &str) -> Result<Self> {
        let trimmed = header.trim();
        let inner = match (trimmed.strip_prefix('<'), trimmed.ends_with('>')) {
            (Some(rest), true) => &rest[..rest.len() - 1],
            (None, false) => trimmed,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "unbalanced brackets in Lock-Token header: '{}'",
                    header
                )));
            }
        };
        let inner = inner.trim();
        if inner.is_empty() {
            return Err(Error::InvalidInput("empty Lock-Token header".to_string()));
        }
        Ok(Self(inner.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Token in coded-URL form for response headers
    pub fn header_value(&self) -> String {
        format!("<{}>", self.0)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An active claim on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub token: LockToken,
    pub path: ResourcePath,
    pub scope: LockScope,
    /// Client-supplied owner description, stored verbatim
    pub owner: String,
    pub depth: LockDepth,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    /// A lock is logically gone once the current time passes `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether this lock applies to `path`: same path, or an infinite-depth
    /// lock on one of its ancestors
    pub fn applies_to(&self, path: &ResourcePath) -> bool {
        self.path == *path || (self.depth == LockDepth::Infinity && self.path.is_ancestor_of(path))
    }

    /// Seconds left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }
}

/// Attributes of a lock to create
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub path: ResourcePath,
    pub scope: LockScope,
    pub owner: String,
    pub depth: LockDepth,
    /// Requested lifetime, capped by the store's maximum
    pub timeout: Duration,
}

impl LockRequest {
    pub fn new(path: ResourcePath, scope: LockScope, depth: LockDepth, timeout: Duration) -> Self {
        Self {
            path,
            scope,
            owner: String::new(),
            depth,
            timeout,
        }
    }

    /// Set the owner description
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// Parse a `Timeout` header (`Second-N`, `Infinite`, comma separated)
///
/// The first understood alternative wins. `Infinite` maps to `max`; an
/// absent or entirely unrecognized header yields `default`. The result is
/// never larger than `max`.
pub fn parse_timeout_header(header: Option<&str>, default: Duration, max: Duration) -> Duration {
    let requested = header.and_then(|h| {
        h.split(',').map(str::trim).find_map(|alt| {
            if alt.eq_ignore_ascii_case("infinite") {
                Some(max)
            } else {
                let secs = alt
                    .get(..7)
                    .filter(|p| p.eq_ignore_ascii_case("second-"))
                    .and_then(|_| alt[7..].parse::<u64>().ok())?;
                Some(Duration::from_secs(secs))
            }
        })
    });

    requested.unwrap_or(default).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_urns() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert!(a.as_str().starts_with("urn:uuid:"));
        assert_ne!(a, b);
        assert_eq!(a.header_value(), format!("<{}>", a));
    }

    #[test]
    fn test_token_from_header() {
        let token = LockToken::from_header(" <urn:uuid:abc> ").unwrap();
        assert_eq!(token.as_str(), "urn:uuid:abc");
        assert_eq!(LockToken::from_header("urn:uuid:abc").unwrap(), token);
        assert!(LockToken::from_header("<>").is_err());
        assert!(LockToken::from_header("<urn:uuid:abc").is_err());
    }

    #[test]
    fn test_depth_from_header() {
        assert_eq!(LockDepth::from_header(None).unwrap(), LockDepth::Infinity);
        assert_eq!(LockDepth::from_header(Some("0")).unwrap(), LockDepth::Zero);
        assert_eq!(LockDepth::from_header(Some("Infinity")).unwrap(), LockDepth::Infinity);
        assert!(LockDepth::from_header(Some("1")).is_err());
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!(LockScope::parse("Exclusive").unwrap(), LockScope::Exclusive);
        assert_eq!(LockScope::parse("shared").unwrap(), LockScope::Shared);
        assert!(LockScope::parse("write").is_err());
    }

    #[test]
    fn test_timeout_header() {
        let default = Duration::from_secs(600);
        let max = Duration::from_secs(3600);

        assert_eq!(parse_timeout_header(None, default, max), default);
        assert_eq!(
            parse_timeout_header(Some("Second-100"), default, max),
            Duration::from_secs(100)
        );
        assert_eq!(parse_timeout_header(Some("Infinite, Second-5"), default, max), max);
        assert_eq!(
            parse_timeout_header(Some("Bogus, second-5"), default, max),
            Duration::from_secs(5)
        );
        assert_eq!(parse_timeout_header(Some("Second-99999"), default, max), max);
        assert_eq!(parse_timeout_header(Some("Second-x"), default, max), default);
    }

    #[test]
    fn test_applies_to_follows_depth() {
        let now = Utc::now();
        let mut lock = Lock {
            token: LockToken::generate(),
            path: ResourcePath::parse("docs").unwrap(),
            scope: LockScope::Exclusive,
            owner: String::new(),
            depth: LockDepth::Infinity,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(60),
        };
        let nested = ResourcePath::parse("docs/a/b.txt").unwrap();

        assert!(lock.applies_to(&lock.path.clone()));
        assert!(lock.applies_to(&nested));

        lock.depth = LockDepth::Zero;
        assert!(!lock.applies_to(&nested));
        assert!(!lock.is_expired());
        assert!(lock.is_expired_at(now + chrono::Duration::seconds(61)));
    }
}
