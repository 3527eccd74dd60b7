//! Davgate CLI - inspect and manage WebDAV locks

use clap::{Parser, Subcommand};
use davgate_core::config::Config;
use davgate_core::domain::access::{AccessGuard, AccessMode};
use davgate_core::domain::conditions::{BaseUrl, FsEtagOracle};
use davgate_core::domain::locking::{
    Lock, LockDepth, LockRequest, LockScope, LockStore, LockToken, parse_timeout_header,
};
use davgate_core::domain::resource_path::ResourcePath;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;

#[derive(Parser)]
#[command(name = "davgate")]
#[command(author, version, about = "WebDAV lock store and access guard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $DAVGATE_CONFIG_DIR/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Managed root directory, overriding the config
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ScopeArg {
    Shared,
    Exclusive,
}

impl From<ScopeArg> for LockScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Shared => LockScope::Shared,
            ScopeArg::Exclusive => LockScope::Exclusive,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Read,
    Write,
}

impl From<ModeArg> for AccessMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Read => AccessMode::Read,
            ModeArg::Write => AccessMode::Write,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Lock a resource
    Lock {
        /// Resource path, relative to the root
        path: String,
        #[arg(short, long, value_enum, default_value = "exclusive")]
        scope: ScopeArg,
        /// `0` or `infinity`
        #[arg(short, long, default_value = "infinity")]
        depth: String,
        /// Seconds, or a Timeout header value such as `Second-300` or `Infinite`
        #[arg(short, long)]
        timeout: Option<String>,
        /// Owner description stored with the lock
        #[arg(short, long, default_value = "")]
        owner: String,
    },

    /// Release a lock
    Unlock {
        path: String,
        /// Lock token, with or without angle brackets
        token: String,
    },

    /// Extend a lock's lifetime
    Refresh {
        path: String,
        token: String,
        #[arg(short, long)]
        timeout: Option<String>,
    },

    /// Show the locks applying to a resource
    Locks { path: String },

    /// List every active lock
    List,

    /// Remove expired locks
    Purge,

    /// Decide whether a request would be admitted
    Authorize {
        path: String,
        #[arg(short, long, value_enum, default_value = "read")]
        mode: ModeArg,
        /// Value of the If header
        #[arg(long = "if")]
        if_header: Option<String>,
        /// Public URL of the root, for tagged If header entries
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e, format),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("davgate=info".parse()?),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;

    match cli.command {
        Commands::Lock {
            path,
            scope,
            depth,
            timeout,
            owner,
        } => {
            let store = open_store(&config).await?;
            cmd_lock(&config, &store, &path, scope.into(), &depth, timeout.as_deref(), owner, format).await
        }

        Commands::Unlock { path, token } => {
            let store = open_store(&config).await?;
            cmd_unlock(&store, &path, &token, format).await
        }

        Commands::Refresh {
            path,
            token,
            timeout,
        } => {
            let store = open_store(&config).await?;
            cmd_refresh(&config, &store, &path, &token, timeout.as_deref(), format).await
        }

        Commands::Locks { path } => {
            let store = open_store(&config).await?;
            let path = ResourcePath::parse(&path)?;
            let locks = store.locks_applying_to(&path).await?;
            print_locks(&locks, format);
            Ok(())
        }

        Commands::List => {
            let store = open_store(&config).await?;
            let locks = store.list().await?;
            print_locks(&locks, format);
            Ok(())
        }

        Commands::Purge => {
            let store = open_store(&config).await?;
            let removed = store.purge_expired().await?;
            match format {
                OutputFormat::Json => println!("{}", json!({ "removed": removed })),
                OutputFormat::Text => println!("Removed {} expired lock(s)", removed),
            }
            Ok(())
        }

        Commands::Authorize {
            path,
            mode,
            if_header,
            base_url,
        } => cmd_authorize(&config, &path, mode.into(), if_header.as_deref(), base_url.as_deref(), format).await,

        Commands::Config { action } => cmd_config(cli.config.as_deref(), &config, action, format),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) if path.exists() => Config::load_from(path)?,
        Some(_) => Config::default(),
        None => Config::load()?,
    };
    if let Some(root) = &cli.root {
        config.server.root_dir = root.clone();
    }
    Ok(config)
}

async fn open_store(config: &Config) -> anyhow::Result<LockStore> {
    config
        .open_lock_store()
        .await?
        .ok_or_else(|| davgate_core::Error::ConfigError("locking is disabled (locks.database is empty)".to_string()).into())
}

/// Plain seconds, or a `Timeout` header value
fn resolve_timeout(arg: Option<&str>, config: &Config) -> Duration {
    let max = config.locks.max_timeout();
    match arg.map(str::trim) {
        Some(secs) if !secs.is_empty() && secs.bytes().all(|b| b.is_ascii_digit()) => secs
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(max)
            .min(max),
        other => parse_timeout_header(other, config.locks.default_timeout(), max),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn cmd_lock(
    config: &Config,
    store: &LockStore,
    path: &str,
    scope: LockScope,
    depth: &str,
    timeout: Option<&str>,
    owner: String,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let depth = LockDepth::from_header(Some(depth))?;
    let resolved = config.path_guard()?.resolve(path, AccessMode::Write)?;
    let timeout = resolve_timeout(timeout, config);

    let request = LockRequest::new(resolved.path, scope, depth, timeout).with_owner(owner);
    let lock = store.create(&request).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lock)?),
        OutputFormat::Text => {
            println!("Lock created");
            print_lock_details(&lock);
        }
    }
    Ok(())
}

async fn cmd_unlock(store: &LockStore, path: &str, token: &str, format: OutputFormat) -> anyhow::Result<()> {
    let path = ResourcePath::parse(path)?;
    let token = LockToken::from_header(token)?;
    store.release(&path, &token).await?;

    match format {
        OutputFormat::Json => println!("{}", json!({ "released": token, "path": path.to_string() })),
        OutputFormat::Text => println!("Released {} on {}", token, path),
    }
    Ok(())
}

async fn cmd_refresh(
    config: &Config,
    store: &LockStore,
    path: &str,
    token: &str,
    timeout: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path = ResourcePath::parse(path)?;
    let token = LockToken::from_header(token)?;
    let lock = store.refresh(&path, &token, resolve_timeout(timeout, config)).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lock)?),
        OutputFormat::Text => {
            println!("Lock refreshed");
            print_lock_details(&lock);
        }
    }
    Ok(())
}

async fn cmd_authorize(
    config: &Config,
    path: &str,
    mode: AccessMode,
    if_header: Option<&str>,
    base_url: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let paths = config.path_guard()?;
    let store = config.open_lock_store().await?;
    let etags = FsEtagOracle::new(paths.root());
    let base = match base_url {
        Some(url) => BaseUrl::parse(url)?,
        None => config.base_url()?,
    };

    let guard = AccessGuard::new(&paths, store.as_ref(), &etags, &base);
    let access = guard.authorize(path, mode, if_header).await?;
    debug!(path = %access.resolved.path, mode = %mode, "Authorized");

    let proven: Vec<&str> = access
        .evaluation
        .submitted
        .iter()
        .filter(|s| s.valid)
        .map(|s| s.token.as_str())
        .collect();

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "allowed": true,
                "path": access.resolved.path.to_string(),
                "mode": mode,
                "exists": access.resolved.exists,
                "locks": access.locks,
                "proven_tokens": proven,
            }))?
        ),
        OutputFormat::Text => {
            println!("Allowed: {} {}", mode, access.resolved.path);
            for lock in &access.locks {
                println!("  Lock: {} {} ({})", lock.token, lock.path, lock.scope);
            }
            for token in proven {
                println!("  Proven: {}", token);
            }
        }
    }
    Ok(())
}

fn cmd_config(
    explicit: Option<&Path>,
    config: &Config,
    action: ConfigAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        },
        ConfigAction::Init { force } => {
            let path = match explicit {
                Some(path) => path.to_path_buf(),
                None => Config::config_path()?,
            };
            if path.exists() && !force {
                return Err(anyhow::anyhow!(
                    "Config file already exists: {}. Use --force to overwrite.",
                    path.display()
                ));
            }
            Config::default().save_to(&path)?;
            match format {
                OutputFormat::Json => println!("{}", json!({ "written": path.display().to_string() })),
                OutputFormat::Text => println!("Wrote {}", path.display()),
            }
        }
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_lock_details(lock: &Lock) {
    println!("  Token: {}", lock.token);
    println!("  Path: {}", lock.path);
    println!("  Scope: {}", lock.scope);
    println!("  Depth: {}", lock.depth);
    if !lock.owner.is_empty() {
        println!("  Owner: {}", lock.owner);
    }
    println!("  Expires: {}", lock.expires_at.to_rfc3339());
}

fn print_locks(locks: &[Lock], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", json!(locks)),
        OutputFormat::Text => {
            if locks.is_empty() {
                println!("No active locks.");
            }
            for lock in locks {
                println!(
                    "{}  {}  {}  depth={}  expires in {}s",
                    lock.path,
                    lock.token,
                    lock.scope,
                    lock.depth,
                    lock.remaining().as_secs()
                );
            }
        }
    }
}

/// Denials exit with 2, every other failure with 1
fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<davgate_core::Error>() {
        Some(e) if e.is_denial() => 2,
        _ => 1,
    }
}

fn report_error(error: &anyhow::Error, format: OutputFormat) -> ExitCode {
    let core = error.downcast_ref::<davgate_core::Error>();
    let code = core.map(|e| e.code()).unwrap_or("E000");

    match format {
        OutputFormat::Json => {
            let mut body = json!({
                "code": code,
                "message": format!("{:#}", error),
            });
            if let Some(e) = core {
                body["status"] = json!(e.status());
                body["retryable"] = json!(e.is_retryable());
                if let Some(path) = e.affected_path() {
                    body["path"] = json!(path);
                }
                if let davgate_core::Error::Conflict(locks) = e {
                    body["locks"] = json!(locks);
                }
            }
            println!("{}", json!({ "error": body }));
        }
        OutputFormat::Text => {
            eprintln!("Error [{}]: {:#}", code, error);
            if let Some(davgate_core::Error::Conflict(locks)) = core {
                for lock in locks {
                    eprintln!("  Blocked by: {} {} ({})", lock.token, lock.path, lock.scope);
                }
            }
        }
    }

    ExitCode::from(exit_code_for(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolve_timeout() {
        let config = Config::default();
        assert_eq!(resolve_timeout(None, &config), Duration::from_secs(600));
        assert_eq!(resolve_timeout(Some("30"), &config), Duration::from_secs(30));
        assert_eq!(resolve_timeout(Some("999999"), &config), Duration::from_secs(3600));
        assert_eq!(resolve_timeout(Some("Second-45"), &config), Duration::from_secs(45));
        assert_eq!(resolve_timeout(Some("Infinite"), &config), Duration::from_secs(3600));
    }

    #[test]
    fn test_exit_codes() {
        let denial = anyhow::Error::new(davgate_core::Error::Locked {
            path: "/docs".to_string(),
            token: "urn:uuid:x".to_string(),
        });
        assert_eq!(exit_code_for(&denial), 2);

        let failure = anyhow::Error::new(davgate_core::Error::LockNotFound("urn:uuid:x".to_string()));
        assert_eq!(exit_code_for(&failure), 1);

        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }
}
