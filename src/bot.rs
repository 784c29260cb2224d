//! Bot runtime: credential artifact in, gateway events out to handlers.
//!
//! [`start`] picks one bot out of the credential artifact, connects to the
//! server's gateway and REST API, and runs the event loop. Events are handled
//! one at a time in arrival order; a slow handler delays the next event.
//! Reconnecting is the gateway client's business, the loop only logs it.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{error, info, trace, warn};

use crate::credentials::{CredentialArtifact, CredentialsError, DEFAULT_CREDENTIALS_PATH};
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, GatewayError, Intents};
use crate::handlers;
use crate::http::{HttpError, SpacebarHttpClient};
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("gateway client stopped: {0}")]
    ClientStopped(String),
}

#[derive(Debug, Clone)]
pub struct BotOptions {
    pub credentials_path: PathBuf,
    /// Position of the bot in the artifact's `bots` list.
    pub index: usize,
    pub allow_insecure_transport: bool,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            index: 0,
            allow_insecure_transport: false,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// What the bot has learned from the gateway so far.
#[derive(Debug, Default)]
pub struct BotState {
    /// The bot's own user (set on READY).
    pub user: Option<User>,
    /// Guilds by id, from READY and GUILD_CREATE.
    pub guilds: HashMap<Snowflake, Guild>,
}

impl BotState {
    pub fn apply_ready(&mut self, ready: &ReadyEvent) {
        self.user = Some(ready.user.clone());
        for guild in &ready.guilds {
            self.apply_guild(guild.clone());
        }
    }

    /// Store a guild, without letting an unavailable stub clobber full data.
    pub fn apply_guild(&mut self, guild: Guild) {
        if guild.unavailable && self.guilds.contains_key(&guild.id) {
            return;
        }
        self.guilds.insert(guild.id.clone(), guild);
    }

    /// Count a new member against the cached guild.
    pub fn apply_member_add(&mut self, added: &GuildMemberAdd) {
        let Some(guild) = self.guilds.get_mut(&added.guild_id) else {
            return;
        };
        if let Some(count) = guild.member_count.as_mut() {
            *count += 1;
        } else if let Some(count) = guild.approximate_member_count.as_mut() {
            *count += 1;
        }
        if !guild.members.is_empty() {
            guild.members.push(added.member.clone());
        }
    }

    pub fn guild(&self, guild_id: Option<&str>) -> Option<&Guild> {
        self.guilds.get(guild_id?)
    }

    /// Channel name for logs, falling back to the id.
    pub fn channel_label(&self, msg: &Message) -> String {
        self.guild(msg.guild_id.as_deref())
            .and_then(|g| g.channels.iter().find(|c| c.id == msg.channel_id))
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| msg.channel_id.clone())
    }
}

/// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | MESSAGE_CONTENT
pub fn gateway_intents() -> Intents {
    Intents::GUILDS | Intents::GUILD_MEMBERS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT
}

// ---------------------------------------------------------------------------
// Bot entry point
// ---------------------------------------------------------------------------

/// Load the artifact, connect, and run the event loop until the gateway
/// client stops.
pub async fn start(options: BotOptions) -> Result<(), BotError> {
    let credentials = CredentialArtifact::load(&options.credentials_path)?;
    let bot = credentials.bot(options.index)?;

    info!(bot = %bot.name, index = options.index, "starting bot");
    info!(server = %credentials.server, "connecting");
    if options.allow_insecure_transport {
        warn!("TLS certificate verification is DISABLED; only use this against test deployments");
    }

    let http = SpacebarHttpClient::new(
        format!("{}/api", credentials.server),
        options.allow_insecure_transport,
    )?
    .with_bot_token(&bot.token);

    let gw = gateway::connect(GatewayConfig {
        token: bot.token.clone(),
        url: GatewayConfig::url_for_server(&credentials.server),
        intents: gateway_intents(),
        allow_insecure_transport: options.allow_insecure_transport,
    })?;

    let mut state = BotState::default();

    while let Ok(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => {
                handlers::on_ready(&mut state, &gw, ready).await;
            }

            GatewayEvent::GuildCreate(guild) => {
                handlers::on_guild_create(&mut state, guild);
            }

            GatewayEvent::MessageCreate(msg) => {
                handlers::on_message(&state, &http, &msg).await;
            }

            GatewayEvent::GuildMemberAdd(added) => {
                handlers::on_member_add(&mut state, &http, &added).await;
            }

            GatewayEvent::Disconnected { reason } => {
                warn!(reason = %reason, "disconnected from gateway");
            }

            GatewayEvent::Reconnecting { attempt, delay_ms } => {
                info!(attempt, delay_ms, "reconnecting");
            }

            GatewayEvent::ClientWarning(warning) => {
                warn!(warning = %warning, "gateway client warning");
            }

            GatewayEvent::ClientError(e) => {
                error!(error = %e, "gateway client error");
                return Err(BotError::ClientStopped(e));
            }

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => {
                trace!(event = %name, "unhandled gateway event");
            }

            _ => {}
        }
    }

    warn!("event stream ended, bot shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guild(value: serde_json::Value) -> Guild {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn bot_state_default_has_no_identity() {
        let state = BotState::default();
        assert!(state.user.is_none());
        assert!(state.guilds.is_empty());
    }

    #[test]
    fn apply_ready_stores_identity_and_guilds() {
        let ready: ReadyEvent = serde_json::from_value(json!({
            "user": { "id": "900", "username": "WelcomeBot", "bot": true },
            "session_id": "s",
            "guilds": [{ "id": "1", "name": "My Spacebar Server" }]
        }))
        .unwrap();
        let mut state = BotState::default();
        state.apply_ready(&ready);
        assert_eq!(state.user.as_ref().unwrap().id, "900");
        assert!(state.guild(Some("1")).is_some());
        assert!(state.guild(None).is_none());
    }

    #[test]
    fn unavailable_stub_does_not_replace_full_guild() {
        let mut state = BotState::default();
        state.apply_guild(guild(json!({ "id": "1", "name": "My Spacebar Server" })));
        state.apply_guild(guild(json!({ "id": "1", "unavailable": true })));
        assert_eq!(
            state.guild(Some("1")).unwrap().name.as_deref(),
            Some("My Spacebar Server")
        );
    }

    #[test]
    fn member_add_bumps_cached_count() {
        let mut state = BotState::default();
        state.apply_guild(guild(json!({ "id": "1", "member_count": 4 })));
        state.apply_guild(guild(json!({
            "id": "2",
            "members": [{ "user": { "id": "7", "username": "user1" } }]
        })));
        let added = |guild_id: &str| -> GuildMemberAdd {
            serde_json::from_value(json!({
                "guild_id": guild_id,
                "user": { "id": "8", "username": "user2" }
            }))
            .unwrap()
        };

        state.apply_member_add(&added("1"));
        state.apply_member_add(&added("2"));
        state.apply_member_add(&added("3"));

        assert_eq!(state.guild(Some("1")).unwrap().members_known(), Some(5));
        assert_eq!(state.guild(Some("2")).unwrap().members_known(), Some(2));
        assert!(state.guild(Some("3")).is_none());
    }

    #[test]
    fn channel_label_falls_back_to_id() {
        let mut state = BotState::default();
        state.apply_guild(guild(json!({
            "id": "1",
            "name": "My Spacebar Server",
            "channels": [{ "id": "10", "type": 0, "name": "general" }]
        })));
        let msg = |channel: &str| -> Message {
            serde_json::from_value(json!({
                "id": "5",
                "channel_id": channel,
                "guild_id": "1",
                "author": { "id": "2", "username": "user1" },
                "content": "hi"
            }))
            .unwrap()
        };
        assert_eq!(state.channel_label(&msg("10")), "general");
        assert_eq!(state.channel_label(&msg("11")), "11");
    }

    #[test]
    fn gateway_intents_includes_required_bits() {
        let intents = gateway_intents();
        assert!(intents.contains(Intents::GUILDS));
        assert!(intents.contains(Intents::GUILD_MEMBERS));
        assert!(intents.contains(Intents::GUILD_MESSAGES));
        assert!(intents.contains(Intents::MESSAGE_CONTENT));
    }

    #[tokio::test]
    async fn start_fails_fast_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let err = start(BotOptions {
            credentials_path: dir.path().join("credentials.json"),
            ..BotOptions::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BotError::Credentials(CredentialsError::Read { .. })));
    }

    #[tokio::test]
    async fn start_fails_fast_on_bad_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            json!({
                "server": "http://127.0.0.1:9",
                "admin": { "username": "admin", "email": "a@b", "password": "p", "token": null },
                "users": [],
                "bots": [{ "name": "WelcomeBot", "id": "1", "token": "t" }],
                "guild": null
            })
            .to_string(),
        )
        .unwrap();
        let err = start(BotOptions {
            credentials_path: path,
            index: 3,
            allow_insecure_transport: false,
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BotError::Credentials(CredentialsError::BotIndexOutOfRange { index: 3, max: 0 })
        ));
    }
}
