//! Storage layer - SQLite lock database
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! # Usage
//!
//! ```ignore
//! use davgate_core::storage::{Database, DatabaseConfig};
//!
//! // Create an in-memory database for testing
//! let db = Database::in_memory().await?;
//!
//! // Or open the configured lock database
//! let db = Database::new(DatabaseConfig::with_path("/srv/dav/.locks.db")).await?;
//! ```

pub mod database;
pub mod migrations;

// Re-export commonly used types
pub use database::{Database, DatabaseConfig, DEFAULT_BUSY_TIMEOUT};
pub use migrations::{run_migrations, CURRENT_VERSION};
