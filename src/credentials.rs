//! The credential artifact shared between `spacebar-setup` and `example-bot`.
//!
//! Written once at the end of a provisioning run, read by the bot at
//! startup. The file is a snapshot: every save replaces whatever was there.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Application;

pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("could not read credentials file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write credentials file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credentials file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("credentials could not be serialised: {0}")]
    Serialise(#[from] serde_json::Error),
    #[error("no bots in credentials file, run spacebar-setup first")]
    NoBots,
    #[error("bot index {index} not found, available: 0-{max}")]
    BotIndexOutOfRange { index: usize, max: usize },
    #[error("bot {name} has no token, run spacebar-setup first")]
    MissingToken { name: String },
}

// ---------------------------------------------------------------------------
// Artifact model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CredentialArtifact {
    /// Base URL of the deployment, without the `/api` suffix.
    pub server: String,
    pub admin: AdminCredential,
    pub users: Vec<UserCredential>,
    pub bots: Vec<BotCredential>,
    /// Raw server response to guild creation.
    pub guild: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AdminCredential {
    pub username: String,
    pub email: String,
    pub password: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserCredential {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BotCredential {
    pub name: String,
    pub id: String,
    pub token: String,
}

impl BotCredential {
    /// Keep an application only if the server issued a bot token for it.
    pub fn from_application(app: &Application) -> Option<Self> {
        app.bot_token().map(|token| Self {
            name: app.name.clone(),
            id: app.id.clone(),
            token: token.to_string(),
        })
    }
}

impl CredentialArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CredentialsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the artifact, replacing any previous file at `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CredentialsError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| CredentialsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), bots = self.bots.len(), "credentials saved");
        Ok(())
    }

    /// Select a bot record by position.
    pub fn bot(&self, index: usize) -> Result<&BotCredential, CredentialsError> {
        if self.bots.is_empty() {
            return Err(CredentialsError::NoBots);
        }
        let bot = self
            .bots
            .get(index)
            .ok_or(CredentialsError::BotIndexOutOfRange {
                index,
                max: self.bots.len() - 1,
            })?;
        if bot.token.trim().is_empty() {
            return Err(CredentialsError::MissingToken {
                name: bot.name.clone(),
            });
        }
        Ok(bot)
    }

    /// Name of the created guild, if guild creation succeeded.
    pub fn guild_name(&self) -> Option<&str> {
        self.guild.as_ref()?.get("name")?.as_str()
    }
}
