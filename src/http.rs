//! HTTP client for the Spacebar REST API.
//!
//! All outbound HTTP calls go through [`SpacebarHttpClient`] so the API root,
//! the authorization header, the TLS posture and error decoding live in one
//! place. There is no retry and no request timeout: a failed call is returned
//! to the caller as an [`HttpError`], a hung call hangs the caller.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::Settings;
use crate::types::*;

const USER_AGENT: &str = concat!("hello-spacebar/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Non-success status from the server.
    #[error("API error {status} on {route}: {message}", message = .body.describe())]
    Api {
        status: u16,
        route: String,
        body: ApiErrorBody,
    },
    /// Connection refused, DNS failure, TLS failure and the like.
    #[error("HTTP transport error: {0}")]
    Transport(String),
    /// Request body could not be encoded or response body decoded.
    #[error("serialisation error: {0}")]
    Serde(String),
}

impl HttpError {
    /// The decoded error body, for API errors.
    pub fn api_body(&self) -> Option<&ApiErrorBody> {
        match self {
            HttpError::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Short human-readable reason, preferring the server's own message.
    pub fn describe(&self) -> String {
        match self {
            HttpError::Api { body, .. } => body.describe(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SpacebarHttpClient
// ---------------------------------------------------------------------------

/// Cheap to clone (reqwest's client is an `Arc` inside).
#[derive(Clone)]
pub struct SpacebarHttpClient {
    api_url: String,
    authorization: Option<String>,
    client: reqwest::Client,
}

impl SpacebarHttpClient {
    /// Create an unauthenticated client rooted at `api_url` (`.../api`).
    ///
    /// `allow_insecure` turns off certificate verification for `https`
    /// servers.
    pub fn new(api_url: impl Into<String>, allow_insecure: bool) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(allow_insecure)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            authorization: None,
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, HttpError> {
        Self::new(settings.api_url(), settings.allow_insecure_transport)
    }

    /// A copy of this client that sends `Authorization: <value>`.
    ///
    /// User tokens are sent bare; use [`with_bot_token`](Self::with_bot_token)
    /// for bot tokens.
    pub fn with_authorization(&self, value: impl Into<String>) -> Self {
        Self {
            authorization: Some(value.into()),
            ..self.clone()
        }
    }

    /// A copy of this client that authenticates as a bot.
    pub fn with_bot_token(&self, token: &str) -> Self {
        self.with_authorization(format!("Bot {}", token))
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ------------------------------------------------------------------
    // Low-level: the single request method everything funnels through
    // ------------------------------------------------------------------

    /// Send a request to `{api_url}/{path}` and return the raw body of a 2xx
    /// response.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>, HttpError> {
        let path = path.trim_start_matches('/');
        let url = format!("{}/{}", self.api_url, path);
        let route = format!("{} /{}", method, path);

        let mut req = self.client.request(method, &url);
        if let Some(auth) = &self.authorization {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        debug!(route = %route, "sending request");
        let resp = req.send().await.map_err(|e| {
            if e.is_builder() {
                HttpError::Serde(e.to_string())
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        debug!(route = %route, status = status.as_u16(), len = bytes.len(), "response");

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        Err(HttpError::Api {
            status: status.as_u16(),
            route,
            body: ApiErrorBody::from_raw(&String::from_utf8_lossy(&bytes)),
        })
    }

    /// Like [`request`](Self::request) but deserialises the response body.
    pub async fn request_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, body).await?;
        decode(&bytes)
    }

    // ------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------

    /// `POST /auth/register`. Servers differ on what a successful
    /// registration returns, so an empty or unexpected body is not an error.
    pub async fn register(&self, body: &RegisterRequest<'_>) -> Result<AuthResponse, HttpError> {
        let bytes = self.request(Method::POST, "auth/register", Some(body)).await?;
        Ok(serde_json::from_slice(&bytes).unwrap_or_default())
    }

    /// `POST /auth/login`
    pub async fn login(&self, body: &LoginRequest<'_>) -> Result<AuthResponse, HttpError> {
        self.request_json(Method::POST, "auth/login", Some(body))
            .await
    }

    /// `POST /applications`. Requires an authorized client.
    pub async fn create_application(
        &self,
        body: &CreateApplication<'_>,
    ) -> Result<Application, HttpError> {
        self.request_json(Method::POST, "applications", Some(body))
            .await
    }

    /// `POST /guilds`. Requires an authorized client. The body is returned
    /// untouched.
    pub async fn create_guild(
        &self,
        body: &CreateGuild<'_>,
    ) -> Result<serde_json::Value, HttpError> {
        self.request_json(Method::POST, "guilds", Some(body)).await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn create_message(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let path = format!("channels/{}/messages", channel_id);
        self.request_json(Method::POST, &path, Some(msg)).await
    }

    /// Send a plain text message to a channel.
    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<Message, HttpError> {
        self.create_message(channel_id, &CreateMessage::new().content(content))
            .await
    }

    /// Reply to `to` in its channel, threading the reply.
    pub async fn reply(&self, to: &Message, content: &str) -> Result<Message, HttpError> {
        let msg = CreateMessage::new().content(content).reply_to(to.id.as_str());
        self.create_message(&to.channel_id, &msg).await
    }
}

impl std::fmt::Debug for SpacebarHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpacebarHttpClient")
            .field("api_url", &self.api_url)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(bytes).map_err(|e| {
        let raw = String::from_utf8_lossy(bytes);
        let end = raw
            .char_indices()
            .nth(200)
            .map(|(i, _)| i)
            .unwrap_or(raw.len());
        HttpError::Serde(format!("{}: {}", e, &raw[..end]))
    })
}
