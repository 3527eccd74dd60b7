//! `If` header evaluation
//!
//! The header passes when at least one condition list passes (OR across
//! lists), and a list passes when all its conditions pass (AND, stopping
//! at the first failure). Every lock token tested along the way is
//! recorded so the access guard can later check which applying locks the
//! client proved ownership of.
//!
//! With a path guard attached, an etag condition first resolves its
//! resource for reading. A resource outside the root or restricted from
//! access denies the request instead of revealing its etag.

use super::etag::EtagOracle;
use super::parser::{Condition, ConditionKind, ConditionList, IfHeader};
use super::resource_ref::BaseUrl;
use crate::domain::access::{AccessMode, PathGuard};
use crate::domain::locking::{LockStore, LockToken};
use crate::domain::resource_path::ResourcePath;
use crate::error::{Error, Result};
use tracing::debug;

/// A lock token tested while evaluating the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedToken {
    /// Resource the token was tested against
    pub path: ResourcePath,
    pub token: LockToken,
    /// A live lock with this token applies to `path` (before any `Not`)
    pub valid: bool,
}

/// Outcome of evaluating an `If` header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub passed: bool,
    pub submitted: Vec<SubmittedToken>,
}

impl Evaluation {
    /// Result for a request without an `If` header
    pub fn unconditional() -> Self {
        Self {
            passed: true,
            submitted: Vec::new(),
        }
    }

    /// Whether `token` was submitted and validated
    pub fn proves(&self, token: &LockToken) -> bool {
        self.submitted.iter().any(|s| s.valid && s.token == *token)
    }
}

/// Evaluates parsed `If` headers against etag state and the lock store
pub struct ConditionEvaluator<'a> {
    locks: Option<&'a LockStore>,
    etags: &'a dyn EtagOracle,
    base: &'a BaseUrl,
    paths: Option<&'a PathGuard>,
}

impl<'a> ConditionEvaluator<'a> {
    /// Without a lock store every token condition is false
    pub fn new(locks: Option<&'a LockStore>, etags: &'a dyn EtagOracle, base: &'a BaseUrl) -> Self {
        Self {
            locks,
            etags,
            base,
            paths: None,
        }
    }

    /// Check containment and restrictions before reading an etag
    pub fn with_paths(mut self, paths: &'a PathGuard) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Evaluate `header` for a request on `target`
    pub async fn evaluate(&self, header: Option<&IfHeader>, target: &ResourcePath) -> Result<Evaluation> {
        let Some(header) = header else {
            return Ok(Evaluation::unconditional());
        };

        let mut evaluation = Evaluation::default();

        for entry in &header.entries {
            let resource = match &entry.resource {
                None => target.clone(),
                Some(reference) => match self.base.resolve(reference) {
                    Some(path) => path,
                    None => {
                        debug!(reference = %reference, "If header names a resource outside the root");
                        continue;
                    }
                },
            };

            // Every list is evaluated so that all submitted tokens are recorded
            for list in &entry.lists {
                if self.evaluate_list(list, &resource, &mut evaluation.submitted).await? {
                    evaluation.passed = true;
                }
            }
        }

        debug!(
            target = %target,
            passed = evaluation.passed,
            submitted = evaluation.submitted.len(),
            "Evaluated If header"
        );
        Ok(evaluation)
    }

    async fn evaluate_list(
        &self,
        list: &ConditionList,
        resource: &ResourcePath,
        submitted: &mut Vec<SubmittedToken>,
    ) -> Result<bool> {
        for condition in list {
            let holds = self.test(condition, resource, submitted).await?;
            if holds == condition.negated {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The underlying test, before negation
    async fn test(
        &self,
        condition: &Condition,
        resource: &ResourcePath,
        submitted: &mut Vec<SubmittedToken>,
    ) -> Result<bool> {
        match condition.kind {
            ConditionKind::Etag => {
                if let Some(paths) = self.paths {
                    match paths.resolve_path(resource.clone(), AccessMode::Read) {
                        Ok(_) | Err(Error::NotFound(_)) => {}
                        Err(e) => {
                            debug!(resource = %resource, error = %e, "Etag condition names an unreadable resource");
                            return Err(e);
                        }
                    }
                }
                let live = self.etags.etag(resource).await?;
                Ok(live.as_deref() == Some(condition.value.as_str()))
            }
            ConditionKind::Token => {
                let token = LockToken::new(condition.value.clone());
                let valid = match self.locks {
                    Some(store) => store.validate_token(resource, &token).await?,
                    None => false,
                };
                submitted.push(SubmittedToken {
                    path: resource.clone(),
                    token,
                    valid,
                });
                Ok(valid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conditions::etag::StaticEtags;
    use crate::domain::locking::{LockDepth, LockRequest, LockScope, DEFAULT_MAX_TIMEOUT};
    use crate::storage::Database;
    use std::time::Duration;

    async fn create_test_store() -> LockStore {
        let db = Database::in_memory().await.unwrap();
        LockStore::open(&db, DEFAULT_MAX_TIMEOUT, false).await.unwrap()
    }

    fn path(p: &str) -> ResourcePath {
        ResourcePath::parse(p).unwrap()
    }

    async fn lock(store: &LockStore, p: &str) -> LockToken {
        store
            .create(&LockRequest::new(
                path(p),
                LockScope::Shared,
                LockDepth::Zero,
                Duration::from_secs(100),
            ))
            .await
            .unwrap()
            .token
    }

    #[tokio::test]
    async fn test_absent_header_passes() {
        let etags = StaticEtags::new();
        let base = BaseUrl::root();
        let evaluator = ConditionEvaluator::new(None, &etags, &base);

        let evaluation = evaluator.evaluate(None, &path("f.txt")).await.unwrap();
        assert!(evaluation.passed);
        assert!(evaluation.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_or_across_lists_records_every_token() {
        let store = create_test_store().await;
        let held = lock(&store, "f.txt").await;
        let etags = StaticEtags::new();
        let base = BaseUrl::root();
        let evaluator = ConditionEvaluator::new(Some(&store), &etags, &base);

        let header = IfHeader::parse(&format!("(<{}>) (<urn:uuid:not-held>)", held)).unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();

        assert!(evaluation.passed);
        assert_eq!(evaluation.submitted.len(), 2);
        assert!(evaluation.proves(&held));
        assert!(!evaluation.proves(&LockToken::new("urn:uuid:not-held")));
    }

    #[tokio::test]
    async fn test_negated_etag_fails_on_match() {
        let etags = StaticEtags::new().with(path("f.txt"), "\"X\"");
        let base = BaseUrl::root();
        let evaluator = ConditionEvaluator::new(None, &etags, &base);

        let header = IfHeader::parse("(Not [\"X\"])").unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();
        assert!(!evaluation.passed);

        let header = IfHeader::parse("([\"X\"])").unwrap();
        assert!(evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap().passed);

        // Comparison is exact: a weak form of the same tag does not match
        let header = IfHeader::parse("([W/\"X\"])").unwrap();
        assert!(!evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_and_short_circuits_on_first_failure() {
        let store = create_test_store().await;
        let held = lock(&store, "f.txt").await;
        let etags = StaticEtags::new().with(path("f.txt"), "\"v1\"");
        let base = BaseUrl::root();
        let evaluator = ConditionEvaluator::new(Some(&store), &etags, &base);

        let header = IfHeader::parse(&format!("([\"v2\"] <{}>)", held)).unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();

        assert!(!evaluation.passed);
        assert!(evaluation.submitted.is_empty(), "token after failed etag is not tested");
    }

    #[tokio::test]
    async fn test_not_token_still_records_submission() {
        let store = create_test_store().await;
        let held = lock(&store, "f.txt").await;
        let etags = StaticEtags::new();
        let base = BaseUrl::root();
        let evaluator = ConditionEvaluator::new(Some(&store), &etags, &base);

        // Classic "submit the token but don't depend on it" form
        let header = IfHeader::parse(&format!("(<{}>) (Not <DAV:no-lock>)", held)).unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();
        assert!(evaluation.passed);
        assert!(evaluation.proves(&held));
    }

    #[tokio::test]
    async fn test_tagged_entry_evaluated_against_named_resource() {
        let store = create_test_store().await;
        let other = lock(&store, "other.txt").await;
        let etags = StaticEtags::new();
        let base = BaseUrl::parse("http://example.com/dav").unwrap();
        let evaluator = ConditionEvaluator::new(Some(&store), &etags, &base);

        let header = IfHeader::parse(&format!("<http://example.com/dav/other.txt> (<{}>)", other)).unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();
        assert!(evaluation.passed);
        assert_eq!(evaluation.submitted[0].path, path("other.txt"));

        // Same token presented untagged is tested against the target and fails
        let header = IfHeader::parse(&format!("(<{}>)", other)).unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();
        assert!(!evaluation.passed);
        assert!(!evaluation.proves(&other));
    }

    #[tokio::test]
    async fn test_etag_of_restricted_resource_is_never_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"data").unwrap();
        std::fs::write(dir.path().join(".locks.db"), b"").unwrap();
        let paths = PathGuard::new(dir.path())
            .unwrap()
            .with_restrict_access(vec![path(".locks.db")]);

        let etags = StaticEtags::new().with(path(".locks.db"), "\"x\"");
        let base = BaseUrl::parse("http://example.com/dav").unwrap();
        let evaluator = ConditionEvaluator::new(None, &etags, &base).with_paths(&paths);

        let header = IfHeader::parse("<http://example.com/dav/.locks.db> ([\"x\"])").unwrap();
        let err = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap_err();
        assert!(matches!(err, Error::PathRestricted { ref path, .. } if path == "/.locks.db"));

        // Absent resources simply have no etag
        let header = IfHeader::parse("<http://example.com/dav/gone.txt> (Not [\"x\"])").unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();
        assert!(evaluation.passed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_etag_behind_escaping_symlink_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let paths = PathGuard::new(dir.path()).unwrap();

        let etags = StaticEtags::new().with(path("link/secret"), "\"s\"");
        let base = BaseUrl::root();
        let evaluator = ConditionEvaluator::new(None, &etags, &base).with_paths(&paths);

        let header = IfHeader::parse("</link/secret> ([\"s\"])").unwrap();
        let err = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoot(_)));
    }

    #[tokio::test]
    async fn test_foreign_tag_is_ignored() {
        let etags = StaticEtags::new();
        let base = BaseUrl::parse("http://example.com/dav").unwrap();
        let evaluator = ConditionEvaluator::new(None, &etags, &base);

        let header = IfHeader::parse("<http://elsewhere.org/x> (Not <urn:uuid:z>)").unwrap();
        let evaluation = evaluator.evaluate(Some(&header), &path("f.txt")).await.unwrap();
        assert!(!evaluation.passed);
        assert!(evaluation.submitted.is_empty());
    }
}
