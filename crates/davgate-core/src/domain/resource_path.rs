//! Normalized resource paths relative to the managed root
//!
//! Locks are stored as flat rows keyed by path. Ancestor and descendant
//! relationships are computed from path segments at query time; no tree
//! is materialized.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A path relative to the managed root
///
/// Segments are joined with `/` with no leading or trailing slash. The
/// root itself is the empty path. Displays with a leading `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// The managed root
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse a client-supplied (already percent-decoded) path
    ///
    /// Empty and `.` segments are dropped and `..` is resolved lexically.
    /// Climbing above the root fails with `PathOutsideRoot`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            return Err(Error::InvalidInput(format!(
                "path contains a NUL byte: {:?}",
                raw
            )));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::PathOutsideRoot(raw.to_string()));
                    }
                }
                other => segments.push(other),
            }
        }

        Ok(Self(segments.join("/")))
    }

    /// Wrap a path read back from the lock table
    pub(crate) fn from_stored(path: String) -> Self {
        Self(path)
    }

    /// The stored form (no leading slash)
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments, root has none
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The final segment, `None` for the root
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<ResourcePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Proper ancestors, nearest first, ending with the root
    pub fn ancestors(&self) -> Vec<ResourcePath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            out.push(path);
        }
        out
    }

    /// True if `other` is nested somewhere below `self`
    pub fn is_ancestor_of(&self, other: &ResourcePath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Prefix shared by the stored form of every descendant
    pub fn descendant_prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Append a relative path
    pub fn join(&self, rest: &str) -> Result<ResourcePath> {
        Self::parse(&format!("{}/{}", self.0, rest))
    }

    /// Location of this resource under a filesystem root
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl std::str::FromStr for ResourcePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
