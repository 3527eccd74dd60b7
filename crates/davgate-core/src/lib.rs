//! Davgate Core Library
//!
//! This crate provides the core of a WebDAV server's concurrency control:
//! - Locking (persistent SQLite lock store, conflict resolution, refresh)
//! - Conditional headers (`If` parsing and evaluation, `If-Match`)
//! - Access authorization (path containment, restrictions, lock ownership)
//! - Storage (SQLite pool and migrations)
//! - Configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::access::{Access, AccessGuard, AccessMode, PathGuard};
    pub use crate::domain::conditions::{BaseUrl, EtagOracle, FsEtagOracle, IfHeader};
    pub use crate::domain::locking::{Lock, LockDepth, LockRequest, LockScope, LockStore, LockToken};
    pub use crate::domain::resource_path::ResourcePath;
    pub use crate::error::{Error, Result};
}
