// Configuration loading and parsing (config/dispatch.toml).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::routing::{cluster, metrics, PlanOptions};
use crate::shipping::{Depot, Driver};

/// File name of the main config, both in `defaults/` and `config/`.
pub const CONFIG_FILE: &str = "dispatch.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// dispatch.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub depot: Depot,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub drivers: Vec<Driver>,
    #[serde(default)]
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub clusters: usize,
    pub max_iterations: usize,
    pub average_speed_kmh: f64,
    pub return_to_depot: bool,
    /// Fixed RNG seed for reproducible plans. Random when absent.
    pub seed: Option<u64>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            clusters: 2,
            max_iterations: cluster::DEFAULT_MAX_ITERATIONS,
            average_speed_kmh: metrics::DEFAULT_SPEED_KMH,
            return_to_depot: true,
            seed: None,
        }
    }
}

impl RoutingConfig {
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            clusters: self.clusters,
            max_iterations: self.max_iterations,
            average_speed_kmh: self.average_speed_kmh,
            return_to_depot: self.return_to_depot,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8087,
        }
    }
}

impl WebsocketConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Falls back to the platform data directory when unset.
    pub path: Option<String>,
}

impl DatabaseConfig {
    /// Resolve the database path, creating the data directory for the
    /// platform default.
    pub fn resolve_path(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", "dispatch").ok_or_else(|| {
            ConfigError::ValidationError {
                field: "database.path".into(),
                message: "not set and no home directory available for a default".into(),
            }
        })?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).map_err(|e| ConfigError::ValidationError {
            field: "database.path".into(),
            message: format!("failed to create {}: {e}", data_dir.display()),
        })?;
        Ok(data_dir.join("dispatch.db").to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub history_page_size: usize,
    /// Notifications older than this many days are purged on server start.
    pub retention_days: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            history_page_size: 20,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "dispatch=info,dispatch_core=info,warn".into(),
            directory: "logs".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depot: Depot::default(),
            routing: RoutingConfig::default(),
            drivers: Vec::new(),
            websocket: WebsocketConfig::default(),
            database: DatabaseConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/dispatch.toml` relative to `base_dir`.
///
/// This does not copy defaults; prefer `load_config()` for normal startup.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config = parse_config(&text).map_err(|source| ConfigError::ParseError {
        path: path.clone(),
        source,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Parse config text without validation.
pub fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(text)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }

        let target = config_dir.join(file_name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let routing = &config.routing;
    if routing.clusters == 0 {
        return Err(invalid("routing.clusters", "must be greater than 0"));
    }
    if routing.max_iterations == 0 {
        return Err(invalid("routing.max_iterations", "must be greater than 0"));
    }
    let speed = routing.average_speed_kmh;
    if !speed.is_finite() || speed <= 0.0 {
        return Err(invalid(
            "routing.average_speed_kmh",
            format!("must be > 0, got {speed}"),
        ));
    }

    if !config.depot.location().is_valid() {
        return Err(invalid(
            "depot",
            format!(
                "latitude/longitude ({}, {}) out of range",
                config.depot.latitude, config.depot.longitude
            ),
        ));
    }

    let mut ids = HashSet::new();
    for driver in &config.drivers {
        if !ids.insert(driver.id) {
            return Err(invalid("drivers.id", format!("duplicate driver id {}", driver.id)));
        }
        if driver.user_id.trim().is_empty() {
            return Err(invalid(
                "drivers.user_id",
                format!("driver {} has an empty user_id", driver.id),
            ));
        }
    }

    if config.websocket.port == 0 {
        return Err(invalid("websocket.port", "must be greater than 0"));
    }
    if config.notifications.history_page_size == 0 {
        return Err(invalid(
            "notifications.history_page_size",
            "must be greater than 0",
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
