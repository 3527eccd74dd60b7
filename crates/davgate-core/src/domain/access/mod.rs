//! Request admission
//!
//! - `path_guard`: containment and administrative restrictions
//! - `guard`: the allow/deny decision combining paths, `If` headers and locks

pub mod guard;
pub mod path_guard;

pub use guard::{Access, AccessGuard};
pub use path_guard::{AccessMode, PathGuard, ResolvedPath};
