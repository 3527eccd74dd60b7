//! WebDAV resource locking
//!
//! Locks are claims over a resource path, optionally covering its whole
//! subtree, that mutating requests must honor unless the caller submits
//! the lock's token.
//!
//! # Architecture
//!
//! - **Types**: `Lock`, `LockScope`, `LockDepth`, `LockToken`, `LockRequest`
//! - **Conflict resolution**: `find_conflicts`, a pure decision over a lock snapshot
//! - **Store**: `LockStore`, the SQLite-backed table of live locks
//!
//! Lock acquisition never waits: a conflicting request fails immediately
//! with the locks that block it.
//!
//! # Example
//!
//! ```ignore
//! use davgate_core::domain::locking::{LockDepth, LockRequest, LockScope, LockStore};
//!
//! let store = LockStore::open(&db, Duration::from_secs(3600), true).await?;
//! let request = LockRequest::new(path, LockScope::Exclusive, LockDepth::Infinity, ttl)
//!     .with_owner("<D:href>mailto:someone@example.com</D:href>");
//! let lock = store.create(&request).await?;
//! store.release(&lock.path, &lock.token).await?;
//! ```

pub mod conflict;
pub mod store;
pub mod types;

// Re-export main types
pub use conflict::find_conflicts;
pub use store::{LockStore, DEFAULT_MAX_TIMEOUT, TIMEOUT_LIMIT};
pub use types::{parse_timeout_header, Lock, LockDepth, LockRequest, LockScope, LockToken};
