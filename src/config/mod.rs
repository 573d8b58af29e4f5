use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Take the client IP from `X-Forwarded-For`/`X-Real-IP`. Only enable
    /// behind a reverse proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            trust_proxy: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// How long a login session stays valid, in hours (default: 7 days)
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Upper bound on the per-request session lookup, in milliseconds
    #[serde(default = "default_session_lookup_timeout_ms")]
    pub session_lookup_timeout_ms: u64,
    /// How long an unredeemed staff invite stays valid, in hours
    #[serde(default = "default_invite_ttl_hours")]
    pub invite_ttl_hours: i64,
    /// Mark the session cookie `Secure` (enable behind HTTPS)
    #[serde(default)]
    pub cookie_secure: bool,
    /// Interval between expired-session purges, in seconds
    #[serde(default = "default_session_cleanup_interval")]
    pub session_cleanup_interval: u64,
}

impl AuthConfig {
    pub fn session_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.session_lookup_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            session_lookup_timeout_ms: default_session_lookup_timeout_ms(),
            invite_ttl_hours: default_invite_ttl_hours(),
            cookie_secure: false,
            session_cleanup_interval: default_session_cleanup_interval(),
        }
    }
}

/// Longest session or invite lifetime accepted, in hours (ten years)
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

fn default_session_lookup_timeout_ms() -> u64 {
    5000
}

fn default_invite_ttl_hours() -> i64 {
    72
}

fn default_session_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for general API and portal endpoints
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests per window for login, registration and setup
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_requests() -> u32 {
    100
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would produce already-expired or unrepresentable expiries
    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("auth.session_ttl_hours", self.auth.session_ttl_hours),
            ("auth.invite_ttl_hours", self.auth.invite_ttl_hours),
        ];
        for (name, hours) in ttls {
            if !(1..=MAX_TTL_HOURS).contains(&hours) {
                bail!("{} must be between 1 and {}, got {}", name, MAX_TTL_HOURS, hours);
            }
        }
        Ok(())
    }
}
