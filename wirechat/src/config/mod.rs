//! Configuration system for the `WireChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/wirechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    timing: TimingFileConfig,
    storage: StorageFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    ws_url: Option<String>,
    api_url: Option<String>,
}

/// `[timing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TimingFileConfig {
    heartbeat_secs: Option<u64>,
    register_delay_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    typing_quiet_ms: Option<u64>,
    typing_expiry_ms: Option<u64>,
    read_cooldown_ms: Option<u64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    snapshot_path: Option<String>,
    flush_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Sign-in parameters assembled from CLI args and environment.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Numeric user id to register on the socket.
    pub user_id: i64,
    /// Account email; the display name derives from it.
    pub email: String,
    /// Bearer token for the REST API.
    pub access_token: String,
    /// Token used to renew an expired access token.
    pub refresh_token: Option<String>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// WebSocket URL of the chat backend.
    pub ws_url: String,
    /// Base URL of the REST API (scheme + host + port + prefix).
    pub api_url: String,

    // -- Session --
    /// User id to sign in as, when given up front.
    pub user_id: Option<i64>,
    /// Account email for the session.
    pub email: Option<String>,
    /// Access token for the session.
    pub access_token: Option<String>,
    /// Refresh token for the session.
    pub refresh_token: Option<String>,

    // -- Timing --
    /// Interval between heartbeat envelopes.
    pub heartbeat_interval: Duration,
    /// Delay between the socket opening and the registration envelope.
    pub register_delay: Duration,
    /// Settle delay between `connected` and the first conversation load.
    pub settle_delay: Duration,
    /// Quiet window after the last keystroke before typing auto-stops.
    pub typing_quiet: Duration,
    /// Fallback lifetime of inbound typing indicators.
    pub typing_expiry: Duration,
    /// Window collapsing repeated read receipts for one conversation.
    pub read_cooldown: Duration,

    // -- Storage --
    /// Snapshot file path; `None` picks the platform data directory.
    pub snapshot_path: Option<PathBuf>,
    /// Interval between dirty-flag checks of the flush task.
    pub flush_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:4000/ws".to_string(),
            api_url: "http://127.0.0.1:4000/api".to_string(),
            user_id: None,
            email: None,
            access_token: None,
            refresh_token: None,
            heartbeat_interval: Duration::from_secs(30),
            register_delay: Duration::from_millis(500),
            settle_delay: Duration::from_secs(1),
            typing_quiet: Duration::from_secs(2),
            typing_expiry: Duration::from_secs(2),
            read_cooldown: Duration::from_secs(1),
            snapshot_path: None,
            flush_interval: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/wirechat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.server.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_url.clone())
                .unwrap_or(defaults.api_url),
            user_id: cli.user_id,
            email: cli.email.clone(),
            access_token: cli.token.clone(),
            refresh_token: cli.refresh_token.clone(),
            heartbeat_interval: file
                .timing
                .heartbeat_secs
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
            register_delay: file
                .timing
                .register_delay_ms
                .map_or(defaults.register_delay, Duration::from_millis),
            settle_delay: file
                .timing
                .settle_delay_ms
                .map_or(defaults.settle_delay, Duration::from_millis),
            typing_quiet: file
                .timing
                .typing_quiet_ms
                .map_or(defaults.typing_quiet, Duration::from_millis),
            typing_expiry: file
                .timing
                .typing_expiry_ms
                .map_or(defaults.typing_expiry, Duration::from_millis),
            read_cooldown: file
                .timing
                .read_cooldown_ms
                .map_or(defaults.read_cooldown, Duration::from_millis),
            snapshot_path: cli
                .snapshot
                .clone()
                .or_else(|| file.storage.snapshot_path.clone().map(PathBuf::from)),
            flush_interval: file
                .storage
                .flush_interval_secs
                .map_or(defaults.flush_interval, Duration::from_secs),
        }
    }

    /// Assemble a [`LoginConfig`] when the session fields are complete.
    ///
    /// Returns `None` if `user_id`, `email`, or the access token is missing
    /// or empty (interactive sign-in, or a restored snapshot session).
    #[must_use]
    pub fn to_login_config(&self) -> Option<LoginConfig> {
        let user_id = self.user_id?;
        let email = self.email.clone()?;
        let access_token = self.access_token.clone()?;

        if email.is_empty() || access_token.is_empty() {
            return None;
        }

        Some(LoginConfig {
            user_id,
            email,
            access_token,
            refresh_token: self.refresh_token.clone(),
        })
    }
}

/// CLI arguments parsed by clap.
///
/// Environment variables are supported via `env` attributes so the client
/// can run headless under a supervisor without flags.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time chat client with optimistic messaging")]
pub struct CliArgs {
    /// WebSocket URL of the chat backend.
    #[arg(long, env = "WIRECHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Base URL of the REST API.
    #[arg(long, env = "WIRECHAT_API_URL")]
    pub api_url: Option<String>,

    /// Numeric user id to sign in as.
    #[arg(long, env = "WIRECHAT_USER_ID")]
    pub user_id: Option<i64>,

    /// Account email; the display name shown to peers derives from it.
    #[arg(long, env = "WIRECHAT_EMAIL")]
    pub email: Option<String>,

    /// Access token for the REST API.
    #[arg(long, env = "WIRECHAT_TOKEN")]
    pub token: Option<String>,

    /// Refresh token for session renewal.
    #[arg(long, env = "WIRECHAT_REFRESH_TOKEN")]
    pub refresh_token: Option<String>,

    /// Path to config file (default: `~/.config/wirechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the state snapshot file.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WIRECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/wirechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // Platform without a config dir; run on defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("wirechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
