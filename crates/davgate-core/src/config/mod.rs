//! Configuration management with file persistence

use crate::domain::access::PathGuard;
use crate::domain::conditions::BaseUrl;
use crate::domain::locking::{LockStore, TIMEOUT_LIMIT};
use crate::domain::resource_path::ResourcePath;
use crate::storage::{Database, DatabaseConfig};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Davgate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub locks: LockConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory published over WebDAV
    pub root_dir: PathBuf,
    /// Public URL of the root, used to resolve absolute `If` header tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lock database, relative to `root_dir` unless absolute. Empty disables locking.
    pub database: String,
    pub max_timeout_secs: u64,
    pub default_timeout_secs: u64,
    pub busy_timeout_ms: u64,
    pub purge_on_open: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Paths that can be neither read nor written
    pub restrict_access: Vec<String>,
    /// Paths that can be read but not written
    pub restrict_write: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            root_url: None,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            database: ".davgate-locks.db".to_string(),
            max_timeout_secs: 3600,
            default_timeout_secs: 600,
            busy_timeout_ms: 5000,
            purge_on_open: true,
        }
    }
}

impl LockConfig {
    pub fn enabled(&self) -> bool {
        !self.database.trim().is_empty()
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("DAVGATE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("davgate")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load and validate configuration from `path`
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.locks.max_timeout_secs == 0 {
            return Err(anyhow!("locks.max_timeout_secs must be positive"));
        }
        if self.locks.max_timeout() > TIMEOUT_LIMIT {
            return Err(anyhow!(
                "locks.max_timeout_secs ({}) exceeds the limit of {}",
                self.locks.max_timeout_secs,
                TIMEOUT_LIMIT.as_secs()
            ));
        }
        if self.locks.default_timeout_secs == 0 {
            return Err(anyhow!("locks.default_timeout_secs must be positive"));
        }
        if self.locks.default_timeout_secs > self.locks.max_timeout_secs {
            return Err(anyhow!(
                "locks.default_timeout_secs ({}) exceeds locks.max_timeout_secs ({})",
                self.locks.default_timeout_secs,
                self.locks.max_timeout_secs
            ));
        }
        if self.locks.busy_timeout_ms == 0 {
            return Err(anyhow!("locks.busy_timeout_ms must be positive"));
        }

        self.base_url()?;
        parse_paths("access.restrict_access", &self.access.restrict_access)?;
        parse_paths("access.restrict_write", &self.access.restrict_write)?;
        Ok(())
    }

    /// Base URL for `If` header tags; `/` on any host when unset
    pub fn base_url(&self) -> anyhow::Result<BaseUrl> {
        match &self.server.root_url {
            Some(url) => BaseUrl::parse(url).with_context(|| format!("Invalid server.root_url: {}", url)),
            None => Ok(BaseUrl::root()),
        }
    }

    /// Lock database location, `None` when locking is disabled
    pub fn lock_database_path(&self) -> Option<PathBuf> {
        if !self.locks.enabled() {
            return None;
        }
        let path = Path::new(self.locks.database.trim());
        Some(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.server.root_dir.join(path)
        })
    }

    /// Build the path guard for the managed root
    ///
    /// A lock database stored inside the root is always access-restricted,
    /// along with its WAL and shared-memory files.
    pub fn path_guard(&self) -> anyhow::Result<PathGuard> {
        let guard = PathGuard::new(&self.server.root_dir)?;

        let mut restrict_access = parse_paths("access.restrict_access", &self.access.restrict_access)?;
        if let Some(db_path) = self.lock_database_path() {
            if let Some(relative) = database_relative_to(guard.root(), &db_path) {
                for suffix in ["", "-wal", "-shm", "-journal"] {
                    let entry = ResourcePath::parse(&format!("{}{}", relative, suffix))?;
                    if !restrict_access.contains(&entry) {
                        restrict_access.push(entry);
                    }
                }
            }
        }

        let restrict_write = parse_paths("access.restrict_write", &self.access.restrict_write)?;
        Ok(guard
            .with_restrict_access(restrict_access)
            .with_restrict_write(restrict_write))
    }

    /// Database settings for the lock store
    pub fn database_config(&self) -> Option<DatabaseConfig> {
        self.lock_database_path()
            .map(|path| DatabaseConfig::with_path(path).busy_timeout(self.locks.busy_timeout()))
    }

    /// Open the lock store, `None` when locking is disabled
    pub async fn open_lock_store(&self) -> anyhow::Result<Option<LockStore>> {
        let Some(db_config) = self.database_config() else {
            return Ok(None);
        };
        let db = Database::new(db_config).await?;
        let store = LockStore::open(&db, self.locks.max_timeout(), self.locks.purge_on_open).await?;
        Ok(Some(store))
    }
}

fn parse_paths(key: &str, raw: &[String]) -> anyhow::Result<Vec<ResourcePath>> {
    raw.iter()
        .map(|p| ResourcePath::parse(p).with_context(|| format!("Invalid {} entry: {}", key, p)))
        .collect()
}

/// Path of the database relative to the canonical root, if it lives inside it
fn database_relative_to(root: &Path, db_path: &Path) -> Option<String> {
    let file_name = db_path.file_name()?;
    let parent = db_path.parent().filter(|p| !p.as_os_str().is_empty())?;
    let parent = fs::canonicalize(parent).ok()?;
    let relative = parent.join(file_name).strip_prefix(root).ok()?.to_path_buf();
    Some(relative.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::access::AccessMode;
    use crate::error::Error;

    fn rooted(dir: &Path) -> Config {
        let mut config = Config::default();
        config.server.root_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.locks.enabled());
        assert_eq!(config.locks.max_timeout(), Duration::from_secs(3600));
        assert_eq!(config.locks.default_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[locks]\nmax_timeout_secs = 7200\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.locks.max_timeout_secs, 7200);
        assert_eq!(config.locks.default_timeout_secs, 600);
        assert_eq!(config.server.root_dir, PathBuf::from("."));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = rooted(dir.path());
        config.server.root_url = Some("http://example.com/dav".to_string());
        config.access.restrict_write = vec!["archive".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.root_url.as_deref(), Some("http://example.com/dav"));
        assert_eq!(loaded.access.restrict_write, vec!["archive".to_string()]);
        assert_eq!(loaded.base_url().unwrap().prefix(), "/dav/");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.locks.default_timeout_secs = 7200;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.locks.max_timeout_secs = 10_000_000_000_000;
        assert!(config.validate().is_err());
        config.locks.max_timeout_secs = TIMEOUT_LIMIT.as_secs();
        config.validate().unwrap();

        let mut config = Config::default();
        config.access.restrict_access = vec!["../outside".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.root_url = Some("not-a-url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lock_database_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = rooted(dir.path());
        assert_eq!(
            config.lock_database_path().unwrap(),
            dir.path().join(".davgate-locks.db")
        );

        config.locks.database = String::new();
        assert!(config.lock_database_path().is_none());
        assert!(config.database_config().is_none());
    }

    #[test]
    fn test_path_guard_hides_lock_database() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".davgate-locks.db"), b"").unwrap();
        fs::write(dir.path().join("file.txt"), b"x").unwrap();

        let guard = rooted(dir.path()).path_guard().unwrap();
        let err = guard.resolve("/.davgate-locks.db", AccessMode::Read).unwrap_err();
        assert!(matches!(err, Error::PathRestricted { .. }));
        let err = guard.resolve("/.davgate-locks.db-wal", AccessMode::Write).unwrap_err();
        assert!(matches!(err, Error::PathRestricted { .. }));

        guard.resolve("/file.txt", AccessMode::Write).unwrap();
    }

    #[tokio::test]
    async fn test_open_lock_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = rooted(dir.path());

        let store = config.open_lock_store().await.unwrap().unwrap();
        assert_eq!(store.max_timeout(), Duration::from_secs(3600));
        assert!(store.list().await.unwrap().is_empty());
        assert!(dir.path().join(".davgate-locks.db").exists());

        let mut disabled = rooted(dir.path());
        disabled.locks.database = "  ".to_string();
        assert!(disabled.open_lock_store().await.unwrap().is_none());
    }
}
