//! Persistent lock store
//!
//! Request handlers may run as separate processes with no shared memory.
//! The SQLite database is their only coordination point, so every
//! read-decide-write sequence (create, release, refresh) runs inside a
//! single `BEGIN IMMEDIATE` transaction on one connection. Plain queries
//! run outside a transaction; a stale answer there is re-validated at the
//! point of mutation.

use super::conflict::find_conflicts;
use super::types::{Lock, LockDepth, LockRequest, LockScope, LockToken};
use crate::domain::resource_path::ResourcePath;
use crate::error::{Error, Result};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default ceiling on lock lifetimes
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Largest configurable ceiling (one year)
pub const TIMEOUT_LIMIT: Duration = Duration::from_secs(365 * 24 * 3600);

const LOCK_COLUMNS: &str = "token, path, scope, owner, depth, created_at, expires_at";

/// Durable table of active locks
#[derive(Debug, Clone)]
pub struct LockStore {
    pool: SqlitePool,
    max_timeout: Duration,
}

impl LockStore {
    /// Create a store over an already migrated pool
    pub fn new(pool: SqlitePool, max_timeout: Duration) -> Self {
        Self { pool, max_timeout }
    }

    /// Attach to a database, optionally purging expired locks first
    pub async fn open(db: &Database, max_timeout: Duration, purge_on_open: bool) -> Result<Self> {
        let store = Self::new(db.pool().clone(), max_timeout);
        if purge_on_open {
            store.purge_expired().await?;
        }
        Ok(store)
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Longest lifetime a lock can be granted
    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    // ========== Mutations ==========

    /// Create a lock, or report the locks that block it
    ///
    /// The conflict check and the insert share one immediate transaction,
    /// so two callers can never both create mutually conflicting locks.
    pub async fn create(&self, request: &LockRequest) -> Result<Lock> {
        let ttl = self.ttl(request.timeout)?;

        let mut tx = self.begin_immediate().await?;
        let lock = create_in_tx(&mut *tx, request, ttl).await?;
        tx.commit().await.map_err(Error::from_store)?;

        info!(
            token = %lock.token,
            path = %lock.path,
            scope = %lock.scope,
            depth = %lock.depth,
            expires_at = %lock.expires_at,
            "Lock created"
        );
        Ok(lock)
    }

    /// Remove the lock matching both `path` and `token`
    pub async fn release(&self, path: &ResourcePath, token: &LockToken) -> Result<()> {
        let mut tx = self.begin_immediate().await?;
        release_in_tx(&mut *tx, path, token).await?;
        tx.commit().await.map_err(Error::from_store)?;

        info!(token = %token, path = %path, "Lock released");
        Ok(())
    }

    /// Extend a live lock that applies to `path`
    ///
    /// The new expiry is `now + min(timeout, max_timeout)`.
    pub async fn refresh(
        &self,
        path: &ResourcePath,
        token: &LockToken,
        timeout: Duration,
    ) -> Result<Lock> {
        let ttl = self.ttl(timeout)?;

        let mut tx = self.begin_immediate().await?;
        let lock = refresh_in_tx(&mut *tx, path, token, ttl).await?;
        tx.commit().await.map_err(Error::from_store)?;

        info!(token = %token, path = %path, expires_at = %lock.expires_at, "Lock refreshed");
        Ok(lock)
    }

    /// Delete every expired row, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let removed = purge_expired_rows(&self.pool, Utc::now()).await?;
        if removed > 0 {
            info!(removed = removed, "Purged expired locks");
        }
        Ok(removed)
    }

    // ========== Queries ==========

    /// Every live lock on `path` itself plus every live infinite-depth lock
    /// on one of its ancestors
    pub async fn locks_applying_to(&self, path: &ResourcePath) -> Result<Vec<Lock>> {
        applying_locks(&self.pool, path, Utc::now()).await
    }

    /// The live lock holding `token`, if any
    pub async fn find(&self, token: &LockToken) -> Result<Option<Lock>> {
        let sql = format!(
            "SELECT {} FROM locks WHERE token = ? AND expires_at >= ?",
            LOCK_COLUMNS
        );
        let row: Option<LockRow> = sqlx::query_as(&sql)
            .bind(token.as_str())
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from_store)?;

        row.map(LockRow::into_lock).transpose()
    }

    /// True iff a live lock holding `token` applies to `path`
    pub async fn validate_token(&self, path: &ResourcePath, token: &LockToken) -> Result<bool> {
        let valid = self
            .locks_applying_to(path)
            .await?
            .iter()
            .any(|lock| lock.token == *token);

        debug!(path = %path, token = %token, valid = valid, "Validated lock token");
        Ok(valid)
    }

    /// All live locks, ordered by path
    pub async fn list(&self) -> Result<Vec<Lock>> {
        let sql = format!(
            "SELECT {} FROM locks WHERE expires_at >= ? ORDER BY path, created_at, token",
            LOCK_COLUMNS
        );
        let rows: Vec<LockRow> = sqlx::query_as(&sql)
            .bind(Utc::now().timestamp_millis())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from_store)?;

        rows.into_iter().map(LockRow::into_lock).collect()
    }

    // ========== Transactions ==========

    /// Open a write transaction on a pooled connection
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock up front, so the
    /// reads that follow cannot be invalidated before the write. Waiting is
    /// bounded by the busy timeout; running out surfaces as
    /// `TransientStoreUnavailable`. Dropping the transaction without
    /// committing rolls it back, including when the caller's future is
    /// dropped mid-flight.
    async fn begin_immediate(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(Error::from_store)
    }

    /// Granted lifetime for a requested timeout, capped at the maximum
    fn ttl(&self, requested: Duration) -> Result<chrono::Duration> {
        chrono::Duration::from_std(requested.min(self.max_timeout))
            .map_err(|e| Error::InvalidInput(format!("lock timeout out of range: {}", e)))
    }
}

fn expiry(now: DateTime<Utc>, ttl: chrono::Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| Error::InvalidInput(format!("lock timeout of {}s is out of range", ttl.num_seconds())))
}

async fn create_in_tx(
    conn: &mut SqliteConnection,
    request: &LockRequest,
    ttl: chrono::Duration,
) -> Result<Lock> {
    let now = Utc::now();
    purge_expired_rows(&mut *conn, now).await?;

    let mut candidates = applying_locks(&mut *conn, &request.path, now).await?;
    if request.depth == LockDepth::Infinity {
        candidates.extend(descendant_locks(&mut *conn, &request.path, now).await?);
    }

    let conflicts = find_conflicts(&request.path, request.scope, request.depth, &candidates, now);
    if !conflicts.is_empty() {
        warn!(
            path = %request.path,
            scope = %request.scope,
            conflicts = conflicts.len(),
            "Lock request conflicts with existing locks"
        );
        return Err(Error::Conflict(conflicts));
    }

    let lock = Lock {
        token: LockToken::generate(),
        path: request.path.clone(),
        scope: request.scope,
        owner: request.owner.clone(),
        depth: request.depth,
        created_at: now,
        expires_at: expiry(now, ttl)?,
    };

    sqlx::query(
        r#"
        INSERT INTO locks (token, path, scope, owner, depth, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lock.token.as_str())
    .bind(lock.path.as_str())
    .bind(lock.scope.as_str())
    .bind(&lock.owner)
    .bind(lock.depth.as_str())
    .bind(lock.created_at.timestamp_millis())
    .bind(lock.expires_at.timestamp_millis())
    .execute(&mut *conn)
    .await
    .map_err(Error::from_store)?;

    Ok(lock)
}

async fn release_in_tx(
    conn: &mut SqliteConnection,
    path: &ResourcePath,
    token: &LockToken,
) -> Result<()> {
    let now = Utc::now();
    purge_expired_rows(&mut *conn, now).await?;

    let result = sqlx::query("DELETE FROM locks WHERE path = ? AND token = ? AND expires_at >= ?")
        .bind(path.as_str())
        .bind(token.as_str())
        .bind(now.timestamp_millis())
        .execute(&mut *conn)
        .await
        .map_err(Error::from_store)?;

    if result.rows_affected() == 0 {
        debug!(path = %path, token = %token, "No lock to release");
        return Err(Error::LockNotFound(token.to_string()));
    }
    Ok(())
}

async fn refresh_in_tx(
    conn: &mut SqliteConnection,
    path: &ResourcePath,
    token: &LockToken,
    ttl: chrono::Duration,
) -> Result<Lock> {
    let now = Utc::now();
    let mut lock = applying_locks(&mut *conn, path, now)
        .await?
        .into_iter()
        .find(|lock| lock.token == *token)
        .ok_or_else(|| Error::LockNotFound(token.to_string()))?;

    lock.expires_at = expiry(now, ttl)?;
    sqlx::query("UPDATE locks SET expires_at = ? WHERE token = ?")
        .bind(lock.expires_at.timestamp_millis())
        .bind(lock.token.as_str())
        .execute(&mut *conn)
        .await
        .map_err(Error::from_store)?;

    Ok(lock)
}

async fn purge_expired_rows<'e, E>(executor: E, now: DateTime<Utc>) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM locks WHERE expires_at < ?")
        .bind(now.timestamp_millis())
        .execute(executor)
        .await
        .map_err(Error::from_store)?;
    Ok(result.rows_affected())
}

/// Live locks on `path` plus live infinite locks on each ancestor, walking
/// one segment at a time up to the root
async fn applying_locks<'e, E>(
    executor: E,
    path: &ResourcePath,
    now: DateTime<Utc>,
) -> Result<Vec<Lock>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ancestors = path.ancestors();

    let mut sql = format!(
        "SELECT {} FROM locks WHERE expires_at >= ? AND (path = ?",
        LOCK_COLUMNS
    );
    for _ in &ancestors {
        sql.push_str(" OR (depth = 'infinity' AND path = ?)");
    }
    sql.push_str(") ORDER BY created_at, token");

    let mut query = sqlx::query_as::<_, LockRow>(&sql)
        .bind(now.timestamp_millis())
        .bind(path.as_str());
    for ancestor in &ancestors {
        query = query.bind(ancestor.as_str());
    }

    let rows = query.fetch_all(executor).await.map_err(Error::from_store)?;
    rows.into_iter().map(LockRow::into_lock).collect()
}

/// Live locks strictly below `path`
///
/// Descendants of `a/b` sort between `a/b/` and `a/b0` (`'0'` follows `'/'`).
async fn descendant_locks<'e, E>(
    executor: E,
    path: &ResourcePath,
    now: DateTime<Utc>,
) -> Result<Vec<Lock>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<LockRow> = if path.is_root() {
        let sql = format!(
            "SELECT {} FROM locks WHERE expires_at >= ? AND path != '' ORDER BY created_at, token",
            LOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(now.timestamp_millis())
            .fetch_all(executor)
            .await
            .map_err(Error::from_store)?
    } else {
        let sql = format!(
            "SELECT {} FROM locks WHERE expires_at >= ? AND path >= ? AND path < ? ORDER BY created_at, token",
            LOCK_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(now.timestamp_millis())
            .bind(path.descendant_prefix())
            .bind(format!("{}0", path.as_str()))
            .fetch_all(executor)
            .await
            .map_err(Error::from_store)?
    };

    rows.into_iter().map(LockRow::into_lock).collect()
}

/// Raw lock row
#[derive(Debug, FromRow)]
struct LockRow {
    token: String,
    path: String,
    scope: String,
    owner: String,
    depth: String,
    created_at: i64,
    expires_at: i64,
}

impl LockRow {
    fn into_lock(self) -> Result<Lock> {
        let scope = LockScope::parse(&self.scope)
            .map_err(|_| Error::Corrupted(format!("lock {} has scope '{}'", self.token, self.scope)))?;
        let depth = LockDepth::parse(&self.depth)
            .map_err(|_| Error::Corrupted(format!("lock {} has depth '{}'", self.token, self.depth)))?;

        Ok(Lock {
            created_at: timestamp(&self.token, self.created_at)?,
            expires_at: timestamp(&self.token, self.expires_at)?,
            token: LockToken::new(self.token),
            path: ResourcePath::from_stored(self.path),
            scope,
            owner: self.owner,
            depth,
        })
    }
}

fn timestamp(token: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Corrupted(format!("lock {} has timestamp {}", token, millis)))
}
