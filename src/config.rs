//! Server configuration loaded from environment variables (and `.env`).
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`. Default: `0.0.0.0:8000`
    pub http_addr: SocketAddr,

    /// Sled database directory.
    /// Env: `DATA_DIR`. Default: `view_config_data`
    pub data_dir: PathBuf,

    /// bcrypt cost for issued secrets (4..=31).
    /// Env: `SECRET_HASH_COST`. Default: `bcrypt::DEFAULT_COST`
    pub secret_hash_cost: u32,

    /// Env: `LOG_FORMAT` (`pretty` | `json`). Default: `pretty`
    pub log_format: LogFormat,

    /// Daily rolling log files are written here when set.
    /// Env: `LOG_DIR`
    pub log_dir: Option<PathBuf>,

    /// Upstream view endpoint with a `{view_id}` placeholder.
    /// Env: `SOURCE_API_URL`
    pub source_api_url: Option<String>,

    /// Env: `SOURCE_API_TOKEN`
    pub source_api_token: Option<String>,

    /// Env: `SOURCE_VIEW_IDS` (comma separated)
    pub source_view_ids: Vec<i64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8000).into(),
            data_dir: PathBuf::from("view_config_data"),
            secret_hash_cost: bcrypt::DEFAULT_COST,
            log_format: LogFormat::Pretty,
            log_dir: None,
            source_api_url: None,
            source_api_token: None,
            source_view_ids: vec![],
        }
    }
}

impl ServerConfig {
    /// Load `.env` if present, then read the environment over the defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(cost) = lookup("SECRET_HASH_COST") {
            match cost.parse::<u32>() {
                Ok(c) if (4..=31).contains(&c) => config.secret_hash_cost = c,
                _ => tracing::warn!(value = %cost, "Invalid SECRET_HASH_COST, using default"),
            }
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }

        config.log_dir = lookup("LOG_DIR").filter(|d| !d.is_empty()).map(PathBuf::from);
        config.source_api_url = lookup("SOURCE_API_URL").filter(|u| !u.is_empty());
        config.source_api_token = lookup("SOURCE_API_TOKEN").filter(|t| !t.is_empty());

        if let Some(ids) = lookup("SOURCE_VIEW_IDS") {
            config.source_view_ids = ids
                .split(',')
                .filter_map(|id| {
                    let id = id.trim();
                    match id.parse::<i64>() {
                        Ok(n) => Some(n),
                        Err(_) if id.is_empty() => None,
                        Err(_) => {
                            tracing::warn!(value = %id, "Ignoring invalid SOURCE_VIEW_IDS entry");
                            None
                        }
                    }
                })
                .collect();
        }

        config
    }

    pub fn data_dir_str(&self) -> String {
        self.data_dir.to_string_lossy().into_owned()
    }
}
