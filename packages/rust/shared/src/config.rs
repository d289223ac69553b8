//! Application configuration for courtlink.
//!
//! User config lives at `~/.courtlink/courtlink.toml`.
//! CLI flags override environment variables, which override config file
//! values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CourtLinkError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "courtlink.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".courtlink";

// ---------------------------------------------------------------------------
// Config structs (matching courtlink.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Geocoding providers and pacing.
    #[serde(default)]
    pub geocoding: GeocodingSection,

    /// Post-run audit thresholds.
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Bare path, `file:<path>`, `sqlite://<path>` or `libsql://<path>`.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "courtlink.db".into()
}

/// `[geocoding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingSection {
    /// Base URL of the keyless primary provider (Nominatim).
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,

    /// Base URL of the keyed secondary provider (Positionstack).
    #[serde(default = "default_positionstack_url")]
    pub positionstack_url: String,

    /// Name of the env var holding the secondary provider key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// User-Agent sent to every provider. Nominatim rejects anonymous clients.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts against the primary provider before falling back.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff step in ms; doubles on every retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Pause after every external call, in ms.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// ISO country code results are restricted to.
    #[serde(default = "default_country")]
    pub country: String,
}

impl Default for GeocodingSection {
    fn default() -> Self {
        Self {
            nominatim_url: default_nominatim_url(),
            positionstack_url: default_positionstack_url(),
            api_key_env: default_api_key_env(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            request_delay_ms: default_request_delay_ms(),
            country: default_country(),
        }
    }
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".into()
}
fn default_positionstack_url() -> String {
    "http://api.positionstack.com".into()
}
fn default_api_key_env() -> String {
    "POSITIONSTACK_KEY".into()
}
fn default_user_agent() -> String {
    concat!("courtlink/", env!("CARGO_PKG_VERSION")).into()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_request_delay_ms() -> u64 {
    1_000
}
fn default_country() -> String {
    "US".into()
}

/// `[verification]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Court coverage percentage below which verification warns.
    #[serde(default = "default_coverage_warn_pct")]
    pub coverage_warn_pct: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            coverage_warn_pct: default_coverage_warn_pct(),
        }
    }
}

fn default_coverage_warn_pct() -> f64 {
    80.0
}

// ---------------------------------------------------------------------------
// Geocoding config (runtime, merged from config + environment)
// ---------------------------------------------------------------------------

/// Runtime geocoding configuration.
#[derive(Debug, Clone)]
pub struct GeocodingConfig {
    pub nominatim_url: String,
    pub positionstack_url: String,
    /// Secondary provider key; `None` disables the fallback provider.
    pub api_key: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub request_delay: Duration,
    pub country: String,
}

impl From<&AppConfig> for GeocodingConfig {
    fn from(config: &AppConfig) -> Self {
        let g = &config.geocoding;
        Self {
            nominatim_url: g.nominatim_url.clone(),
            positionstack_url: g.positionstack_url.clone(),
            api_key: None,
            user_agent: g.user_agent.clone(),
            timeout: Duration::from_secs(g.timeout_secs),
            max_attempts: g.max_attempts.max(1),
            backoff_base: Duration::from_millis(g.backoff_base_ms),
            request_delay: Duration::from_millis(g.request_delay_ms),
            country: g.country.clone(),
        }
    }
}

impl GeocodingConfig {
    /// Attach the secondary provider key (blank keys count as absent).
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }
}

// ---------------------------------------------------------------------------
// Database location
// ---------------------------------------------------------------------------

/// Resolve a database URL into a local file path.
///
/// Remote schemes are rejected: the pipeline assumes a single local writer.
pub fn database_path(url: &str) -> Result<PathBuf> {
    let url = url.trim();
    if url.is_empty() {
        return Err(CourtLinkError::config("database url is empty"));
    }

    let path = if let Some(rest) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("libsql://"))
    {
        rest
    } else if let Some(rest) = url.strip_prefix("file:") {
        rest.trim_start_matches("//")
    } else if url.contains("://") {
        return Err(CourtLinkError::config(format!(
            "unsupported database url '{url}': expected a local path, file:, sqlite:// or libsql://"
        )));
    } else {
        url
    };

    if path.is_empty() {
        return Err(CourtLinkError::config(format!(
            "database url '{url}' has no path"
        )));
    }
    Ok(PathBuf::from(path))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.courtlink/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CourtLinkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.courtlink/courtlink.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CourtLinkError::config(format!("cannot read {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        CourtLinkError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CourtLinkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CourtLinkError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CourtLinkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the secondary provider key from the environment variable named in config.
pub fn secondary_api_key(config: &AppConfig) -> Option<String> {
    secondary_api_key_with(config, |name| std::env::var(name).ok())
}

/// Same as [`secondary_api_key`] with an injectable variable lookup.
pub fn secondary_api_key_with(
    config: &AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let var_name = &config.geocoding.api_key_env;
    match lookup(var_name) {
        Some(val) if !val.trim().is_empty() => Some(val),
        _ => {
            tracing::debug!(
                var = %var_name,
                "secondary geocoder key not set, fallback provider disabled"
            );
            None
        }
    }
}
