//! Error types for Davgate

use crate::domain::locking::Lock;
use thiserror::Error;

/// Result type alias using Davgate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Davgate error types
///
/// Every variant is terminal for the request that produced it. The
/// response layer maps them to protocol statuses through [`Error::status`].
#[derive(Error, Debug)]
pub enum Error {
    // Path errors (E001-E099)
    #[error("Path '{0}' resolves outside the managed root")]
    PathOutsideRoot(String),

    #[error("Access to '{path}' is restricted: {reason}")]
    PathRestricted { path: String, reason: String },

    #[error("Resource '{0}' not found")]
    NotFound(String),

    #[error("Parent of '{0}' is not an existing directory")]
    ParentNotDirectory(String),

    // Condition errors (E100-E199)
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Malformed If header: {0}")]
    MalformedConditionalHeader(String),

    // Lock errors (E300-E399)
    #[error("Resource is locked by '{path}'. Submit the lock token in the If header.")]
    Locked { path: String, token: String },

    #[error("Lock request conflicts with {} existing lock(s)", .0.len())]
    Conflict(Vec<Lock>),

    #[error("Lock '{0}' not found")]
    LockNotFound(String),

    // Database errors (E400-E499)
    #[error("Lock store temporarily unavailable: {0}. Retry the request.")]
    TransientStoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Lock record corrupted: {0}")]
    Corrupted(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathOutsideRoot(_) => "E001",
            Self::PathRestricted { .. } => "E002",
            Self::NotFound(_) => "E003",
            Self::ParentNotDirectory(_) => "E004",
            Self::PreconditionFailed(_) => "E100",
            Self::MalformedConditionalHeader(_) => "E101",
            Self::Locked { .. } => "E300",
            Self::Conflict(_) => "E301",
            Self::LockNotFound(_) => "E302",
            Self::TransientStoreUnavailable(_) => "E400",
            Self::DatabaseError(_) => "E401",
            Self::Corrupted(_) => "E402",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Io(_) => "E900",
        }
    }

    /// Protocol status the response layer should answer with
    pub fn status(&self) -> u16 {
        match self {
            Self::PathOutsideRoot(_) | Self::PathRestricted { .. } => 403,
            Self::NotFound(_) => 404,
            Self::ParentNotDirectory(_) => 409,
            Self::PreconditionFailed(_) => 412,
            Self::MalformedConditionalHeader(_) | Self::InvalidInput(_) => 400,
            Self::Locked { .. } | Self::Conflict(_) => 423,
            Self::LockNotFound(_) => 409,
            Self::TransientStoreUnavailable(_) => 503,
            Self::DatabaseError(_) | Self::Corrupted(_) | Self::ConfigError(_) | Self::Io(_) => 500,
        }
    }

    /// Only a busy store is worth retrying; retry policy belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStoreUnavailable(_))
    }

    /// Whether this error is an access decision rather than a failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PathOutsideRoot(_)
                | Self::PathRestricted { .. }
                | Self::NotFound(_)
                | Self::ParentNotDirectory(_)
                | Self::PreconditionFailed(_)
                | Self::Locked { .. }
                | Self::Conflict(_)
        )
    }

    /// Classify a persistence failure
    ///
    /// A busy or locked database and an exhausted pool are transient; the
    /// caller may retry. Everything else is a hard database error.
    pub(crate) fn from_store(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::PoolTimedOut => Some("timed out waiting for a connection".to_string()),
            sqlx::Error::Database(db) if is_busy_code(db.code().as_deref()) => {
                Some(db.message().to_string())
            }
            _ => None,
        };

        match transient {
            Some(reason) => {
                tracing::warn!(reason = %reason, "Lock store busy");
                Self::TransientStoreUnavailable(reason)
            }
            None => Self::DatabaseError(err),
        }
    }

    /// Path of the resource that caused the denial, when there is one
    pub fn affected_path(&self) -> Option<&str> {
        match self {
            Self::PathOutsideRoot(p)
            | Self::NotFound(p)
            | Self::ParentNotDirectory(p) => Some(p),
            Self::PathRestricted { path, .. } | Self::Locked { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}
