//! Path containment and administrative restrictions

use crate::domain::resource_path::ResourcePath;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// What a request intends to do with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated resource location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: ResourcePath,
    pub fs_path: PathBuf,
    pub exists: bool,
}

/// Resolves client paths to filesystem paths inside the managed root
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    restrict_access: Vec<ResourcePath>,
    restrict_write: Vec<ResourcePath>,
}

impl PathGuard {
    /// Guard the directory `root`, which must exist
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|e| {
            Error::ConfigError(format!("root directory {} is unusable: {}", root.display(), e))
        })?;
        if !canonical.is_dir() {
            return Err(Error::ConfigError(format!(
                "root {} is not a directory",
                canonical.display()
            )));
        }

        Ok(Self {
            root: canonical,
            restrict_access: Vec::new(),
            restrict_write: Vec::new(),
        })
    }

    /// Paths (and their subtrees) that can be neither read nor written
    pub fn with_restrict_access(mut self, paths: Vec<ResourcePath>) -> Self {
        self.restrict_access = paths;
        self
    }

    /// Paths (and their subtrees) that can be read but not written
    pub fn with_restrict_write(mut self, paths: Vec<ResourcePath>) -> Self {
        self.restrict_write = paths;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a decoded client path for `mode`
    ///
    /// Read requires an existing resource. Write requires a writable
    /// resource, or for a new one, a writable parent directory.
    pub fn resolve(&self, raw: &str, mode: AccessMode) -> Result<ResolvedPath> {
        self.resolve_path(ResourcePath::parse(raw)?, mode)
    }

    /// Same checks as [`resolve`](Self::resolve) for an already parsed path
    pub fn resolve_path(&self, path: ResourcePath, mode: AccessMode) -> Result<ResolvedPath> {
        let fs_path = path.to_fs_path(&self.root);
        let display = path.to_string();

        let metadata = match fs::symlink_metadata(&fs_path) {
            Ok(_) => Some(self.contained_metadata(&fs_path, &display)?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let exists = metadata.is_some();

        if covered_by(&self.restrict_access, &path) {
            return Err(Error::PathRestricted {
                path: display,
                reason: "restrict_access".to_string(),
            });
        }

        match mode {
            AccessMode::Read => {
                let Some(metadata) = metadata else {
                    return Err(Error::NotFound(display));
                };
                if metadata.is_file() {
                    if let Err(e) = fs::File::open(&fs_path) {
                        if e.kind() == ErrorKind::PermissionDenied {
                            return Err(Error::PathRestricted {
                                path: display,
                                reason: "file mode excludes read".to_string(),
                            });
                        }
                        return Err(e.into());
                    }
                }
            }
            AccessMode::Write => {
                if covered_by(&self.restrict_write, &path) {
                    return Err(Error::PathRestricted {
                        path: display,
                        reason: "restrict_write".to_string(),
                    });
                }

                match metadata {
                    Some(metadata) => {
                        if !writable(&fs_path, &metadata)? {
                            return Err(Error::PathRestricted {
                                path: display,
                                reason: "file mode excludes write".to_string(),
                            });
                        }
                    }
                    None => self.check_parent_writable(&path, &display)?,
                }
            }
        }

        Ok(ResolvedPath {
            path,
            fs_path,
            exists,
        })
    }

    /// Metadata of an existing path, after checking symlinks stay inside the root
    fn contained_metadata(&self, fs_path: &Path, display: &str) -> Result<fs::Metadata> {
        let canonical = match fs::canonicalize(fs_path) {
            Ok(p) => p,
            // Dangling symlink
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::PathOutsideRoot(display.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if !canonical.starts_with(&self.root) {
            return Err(Error::PathOutsideRoot(display.to_string()));
        }
        Ok(fs::metadata(&canonical)?)
    }

    fn check_parent_writable(&self, path: &ResourcePath, display: &str) -> Result<()> {
        let parent = path.parent().unwrap_or_default();
        let parent_fs = parent.to_fs_path(&self.root);
        let parent_display = parent.to_string();

        let metadata = match fs::symlink_metadata(&parent_fs) {
            Ok(_) => self.contained_metadata(&parent_fs, &parent_display)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ParentNotDirectory(display.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_dir() {
            return Err(Error::ParentNotDirectory(display.to_string()));
        }
        if !writable(&parent_fs, &metadata)? {
            return Err(Error::PathRestricted {
                path: parent_display,
                reason: "parent mode excludes write".to_string(),
            });
        }
        Ok(())
    }
}

/// Whether this process may write `fs_path`
///
/// A path with no write bits is refused even where the process could
/// override its mode.
#[cfg(unix)]
fn writable(fs_path: &Path, metadata: &fs::Metadata) -> Result<bool> {
    use rustix::fs::Access;
    use rustix::io::Errno;

    if metadata.permissions().readonly() {
        return Ok(false);
    }
    match rustix::fs::access(fs_path, Access::WRITE_OK) {
        Ok(()) => Ok(true),
        Err(Errno::ACCESS | Errno::PERM | Errno::ROFS) => Ok(false),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

#[cfg(not(unix))]
fn writable(_fs_path: &Path, metadata: &fs::Metadata) -> Result<bool> {
    Ok(!metadata.permissions().readonly())
}

/// True if `path` equals or is nested under one of `entries`
fn covered_by(entries: &[ResourcePath], path: &ResourcePath) -> bool {
    entries
        .iter()
        .any(|entry| entry == path || entry.is_ancestor_of(path))
}
