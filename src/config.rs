//! Settings for the provisioning run and the bot.
//!
//! Loaded once from the server's JSON config file, then overridden by
//! environment variables (a `.env` file is honoured) and finally by CLI flags.
//! The result is an immutable [`Settings`] handed to whoever needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::credentials::DEFAULT_CREDENTIALS_PATH;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(3);

pub const ENV_SERVER_URL: &str = "SPACEBAR_SERVER_URL";
pub const ENV_ALLOW_INSECURE: &str = "SPACEBAR_ALLOW_INSECURE";
pub const ENV_CREDENTIALS: &str = "SPACEBAR_CREDENTIALS";
pub const ENV_STARTUP_DELAY: &str = "SPACEBAR_STARTUP_DELAY_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("server URL must start with http:// or https://, got {0:?}")]
    InvalidServerUrl(String),
}

// ---------------------------------------------------------------------------
// Server config file (only the part we read)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ServerConfigFile {
    api: ApiSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSection {
    endpoint_public: String,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Deployment base URL, no trailing `/api`.
    pub server_url: String,
    /// Skip TLS certificate verification. Only for self-signed test
    /// deployments.
    pub allow_insecure_transport: bool,
    /// Where the credential artifact is written.
    pub credentials_path: PathBuf,
    /// Wait before the first request so a freshly started server can come up.
    pub startup_delay: Duration,
}

impl Settings {
    pub fn new(server_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        let server_url = base_url_from_endpoint(server_url.as_ref());
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(ConfigError::InvalidServerUrl(server_url));
        }
        Ok(Self {
            server_url,
            allow_insecure_transport: false,
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            startup_delay: DEFAULT_STARTUP_DELAY,
        })
    }

    /// Load from the server config file and the environment.
    ///
    /// `SPACEBAR_SERVER_URL` replaces the file's `api.endpointPublic`; when it
    /// is set the file does not have to exist.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let endpoint = match std::env::var(ENV_SERVER_URL) {
            Ok(url) if !url.trim().is_empty() => {
                debug!(url = %url, "server URL taken from environment");
                url
            }
            _ => read_endpoint(config_path.as_ref())?,
        };

        let mut settings = Self::new(endpoint)?;

        if let Some(flag) = env_bool(ENV_ALLOW_INSECURE)? {
            settings.allow_insecure_transport = flag;
        }
        if let Ok(path) = std::env::var(ENV_CREDENTIALS) {
            if !path.trim().is_empty() {
                settings.credentials_path = PathBuf::from(path);
            }
        }
        if let Ok(raw) = std::env::var(ENV_STARTUP_DELAY) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_STARTUP_DELAY,
                value: raw.clone(),
            })?;
            settings.startup_delay = Duration::from_secs(secs);
        }

        Ok(settings)
    }

    pub fn with_insecure_transport(mut self, allow: bool) -> Self {
        self.allow_insecure_transport = allow;
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// REST root, `{server}/api`.
    pub fn api_url(&self) -> String {
        format!("{}/api", self.server_url)
    }

    /// Log loudly if certificate checks are off.
    pub fn warn_if_insecure(&self) {
        if self.allow_insecure_transport {
            warn!(
                server = %self.server_url,
                "TLS certificate verification is DISABLED; only use this against test deployments"
            );
        }
    }
}

/// Strip a trailing `/` and `/api` from a public API endpoint.
pub fn base_url_from_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/api")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

fn read_endpoint(path: &Path) -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ServerConfigFile =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.api.endpoint_public)
}

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv { name, value: raw }),
    }
}
