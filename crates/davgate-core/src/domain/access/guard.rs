//! Access authorization
//!
//! Fuses path validation, `If` header evaluation and lock ownership into a
//! single allow/deny decision per request. Reads are never blocked by
//! locks; writes require the token of every lock that applies.

use super::path_guard::{AccessMode, PathGuard, ResolvedPath};
use crate::domain::conditions::{BaseUrl, ConditionEvaluator, EtagOracle, Evaluation, IfHeader};
use crate::domain::locking::{Lock, LockStore};
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// A granted request
#[derive(Debug, Clone)]
pub struct Access {
    pub resolved: ResolvedPath,
    pub mode: AccessMode,
    /// Outcome of the `If` header, including every token the client submitted
    pub evaluation: Evaluation,
    /// Locks that apply to the resource (for writes, all of them were proven)
    pub locks: Vec<Lock>,
}

/// Decides whether a request may read or write a resource
pub struct AccessGuard<'a> {
    paths: &'a PathGuard,
    locks: Option<&'a LockStore>,
    etags: &'a dyn EtagOracle,
    base: &'a BaseUrl,
}

impl<'a> AccessGuard<'a> {
    /// `locks` is `None` when locking is disabled
    pub fn new(
        paths: &'a PathGuard,
        locks: Option<&'a LockStore>,
        etags: &'a dyn EtagOracle,
        base: &'a BaseUrl,
    ) -> Self {
        Self {
            paths,
            locks,
            etags,
            base,
        }
    }

    /// Authorize `mode` access to the decoded client path `raw_path`
    ///
    /// A malformed `If` header is rejected before anything else is looked
    /// at. A failing header denies before lock ownership is checked.
    pub async fn authorize(
        &self,
        raw_path: &str,
        mode: AccessMode,
        if_header: Option<&str>,
    ) -> Result<Access> {
        let header = if_header.map(IfHeader::parse).transpose()?;

        let resolved = self.paths.resolve(raw_path, mode)?;

        let evaluator = ConditionEvaluator::new(self.locks, self.etags, self.base).with_paths(self.paths);
        let evaluation = evaluator.evaluate(header.as_ref(), &resolved.path).await?;
        if !evaluation.passed {
            warn!(path = %resolved.path, mode = %mode, "If header precondition failed");
            return Err(Error::PreconditionFailed("If header".to_string()));
        }

        let locks = self.applying_locks(&resolved, mode).await?;

        if mode == AccessMode::Write {
            if let Some(lock) = locks.iter().find(|lock| !evaluation.proves(&lock.token)) {
                warn!(
                    path = %resolved.path,
                    lock_path = %lock.path,
                    token = %lock.token,
                    "Write denied by lock"
                );
                return Err(Error::Locked {
                    path: lock.path.to_string(),
                    token: lock.token.to_string(),
                });
            }
        }

        debug!(
            path = %resolved.path,
            mode = %mode,
            locks = locks.len(),
            "Access granted"
        );

        Ok(Access {
            resolved,
            mode,
            evaluation,
            locks,
        })
    }

    /// Locks on the resource; creating a new resource is also governed by
    /// the locks on its parent directory
    async fn applying_locks(&self, resolved: &ResolvedPath, mode: AccessMode) -> Result<Vec<Lock>> {
        let Some(store) = self.locks else {
            return Ok(Vec::new());
        };

        let mut locks = store.locks_applying_to(&resolved.path).await?;

        if mode == AccessMode::Write && !resolved.exists {
            if let Some(parent) = resolved.path.parent() {
                for lock in store.locks_applying_to(&parent).await? {
                    if !locks.iter().any(|l| l.token == lock.token) {
                        locks.push(lock);
                    }
                }
            }
        }

        Ok(locks)
    }
}
