//! Lock conflict resolution
//!
//! A pure decision over a snapshot of lock rows. The store calls it inside
//! the same transaction that performs the insert, so the snapshot cannot go
//! stale between the decision and the write.

use super::types::{Lock, LockDepth, LockScope};
use crate::domain::resource_path::ResourcePath;
use chrono::{DateTime, Utc};

/// Existing locks that would block a new lock on `target`
///
/// The candidate set is every live lock applying to `target` (its own
/// locks plus infinite-depth locks on ancestors). For an infinite-depth
/// request, locks anywhere below `target` are candidates too. An exclusive
/// request is blocked by any candidate, a shared request only by exclusive
/// ones.
pub fn find_conflicts(
    target: &ResourcePath,
    scope: LockScope,
    depth: LockDepth,
    existing: &[Lock],
    now: DateTime<Utc>,
) -> Vec<Lock> {
    existing
        .iter()
        .filter(|lock| !lock.is_expired_at(now))
        .filter(|lock| {
            lock.applies_to(target)
                || (depth == LockDepth::Infinity && target.is_ancestor_of(&lock.path))
        })
        .filter(|lock| scope == LockScope::Exclusive || lock.scope == LockScope::Exclusive)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::types::LockToken;

    fn lock(path: &str, scope: LockScope, depth: LockDepth) -> Lock {
        let now = Utc::now();
        Lock {
            token: LockToken::generate(),
            path: ResourcePath::parse(path).unwrap(),
            scope,
            owner: String::new(),
            depth,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(100),
        }
    }

    fn path(p: &str) -> ResourcePath {
        ResourcePath::parse(p).unwrap()
    }

    #[test]
    fn test_shared_locks_can_coexist() {
        let existing = vec![lock("f.txt", LockScope::Shared, LockDepth::Zero)];
        let conflicts = find_conflicts(
            &path("f.txt"),
            LockScope::Shared,
            LockDepth::Zero,
            &existing,
            Utc::now(),
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_exclusive_blocked_by_shared() {
        let existing = vec![
            lock("f.txt", LockScope::Shared, LockDepth::Zero),
            lock("f.txt", LockScope::Shared, LockDepth::Zero),
        ];
        let conflicts = find_conflicts(
            &path("f.txt"),
            LockScope::Exclusive,
            LockDepth::Zero,
            &existing,
            Utc::now(),
        );
        assert_eq!(conflicts.len(), 2);
    }

    #[test]
    fn test_shared_blocked_by_exclusive() {
        let existing = vec![lock("f.txt", LockScope::Exclusive, LockDepth::Zero)];
        let conflicts = find_conflicts(
            &path("f.txt"),
            LockScope::Shared,
            LockDepth::Zero,
            &existing,
            Utc::now(),
        );
        assert_eq!(conflicts, existing);
    }

    #[test]
    fn test_inherited_lock_blocks_nested_target() {
        let existing = vec![lock("docs", LockScope::Exclusive, LockDepth::Infinity)];
        let conflicts = find_conflicts(
            &path("docs/a/b.txt"),
            LockScope::Shared,
            LockDepth::Zero,
            &existing,
            Utc::now(),
        );
        assert_eq!(conflicts.len(), 1);

        let shallow = vec![lock("docs", LockScope::Exclusive, LockDepth::Zero)];
        let conflicts = find_conflicts(
            &path("docs/a/b.txt"),
            LockScope::Exclusive,
            LockDepth::Zero,
            &shallow,
            Utc::now(),
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_infinite_request_checks_descendants() {
        let existing = vec![lock("docs/a/b.txt", LockScope::Exclusive, LockDepth::Zero)];

        let deep = find_conflicts(
            &path("docs"),
            LockScope::Shared,
            LockDepth::Infinity,
            &existing,
            Utc::now(),
        );
        assert_eq!(deep.len(), 1);

        let shallow = find_conflicts(
            &path("docs"),
            LockScope::Exclusive,
            LockDepth::Zero,
            &existing,
            Utc::now(),
        );
        assert!(shallow.is_empty());

        let sibling = find_conflicts(
            &path("docs2"),
            LockScope::Exclusive,
            LockDepth::Infinity,
            &existing,
            Utc::now(),
        );
        assert!(sibling.is_empty());
    }

    #[test]
    fn test_expired_locks_never_conflict() {
        let existing = vec![lock("f.txt", LockScope::Exclusive, LockDepth::Zero)];
        let later = Utc::now() + chrono::Duration::seconds(500);
        let conflicts = find_conflicts(
            &path("f.txt"),
            LockScope::Exclusive,
            LockDepth::Zero,
            &existing,
            later,
        );
        assert!(conflicts.is_empty());
    }
}
