//! Typed representations of Spacebar API objects.
//!
//! Spacebar speaks the Discord wire format, so the chat objects here mirror
//! the Discord API docs. Only the fields the bot and the provisioning run
//! actually read are modelled; everything else is ignored on deserialize.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Snowflake ids are transmitted as strings in JSON.
pub type Snowflake = String;

// ---------------------------------------------------------------------------
// Gateway payload (the envelope that wraps every WS message)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }

    /// `<@id>` mention markup for this user.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Channel `type` as sent on the wire.
///
/// Spacebar adds types of its own beyond the Discord set, so anything not
/// listed here is kept as `Other` instead of failing the whole guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildAnnouncement,
    AnnouncementThread,
    PublicThread,
    PrivateThread,
    GuildStageVoice,
    GuildDirectory,
    GuildForum,
    Other(u8),
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            0 => ChannelType::GuildText,
            1 => ChannelType::Dm,
            2 => ChannelType::GuildVoice,
            3 => ChannelType::GroupDm,
            4 => ChannelType::GuildCategory,
            5 => ChannelType::GuildAnnouncement,
            10 => ChannelType::AnnouncementThread,
            11 => ChannelType::PublicThread,
            12 => ChannelType::PrivateThread,
            13 => ChannelType::GuildStageVoice,
            14 => ChannelType::GuildDirectory,
            15 => ChannelType::GuildForum,
            other => ChannelType::Other(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(kind: ChannelType) -> Self {
        match kind {
            ChannelType::GuildText => 0,
            ChannelType::Dm => 1,
            ChannelType::GuildVoice => 2,
            ChannelType::GroupDm => 3,
            ChannelType::GuildCategory => 4,
            ChannelType::GuildAnnouncement => 5,
            ChannelType::AnnouncementThread => 10,
            ChannelType::PublicThread => 11,
            ChannelType::PrivateThread => 12,
            ChannelType::GuildStageVoice => 13,
            ChannelType::GuildDirectory => 14,
            ChannelType::GuildForum => 15,
            ChannelType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
    pub position: Option<i32>,
    pub parent_id: Option<Snowflake>,
}

impl Channel {
    pub fn is_text(&self) -> bool {
        self.kind == ChannelType::GuildText
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
}

impl Message {
    /// Whether a given user id is mentioned in the message.
    pub fn mentions_user(&self, user_id: &str) -> bool {
        self.mentions.iter().any(|u| u.id == user_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageReference {
    pub message_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub fail_if_not_exists: bool,
}

// ---------------------------------------------------------------------------
// Guild
// ---------------------------------------------------------------------------

/// A guild as delivered in READY, GUILD_CREATE and REST responses.
///
/// READY may carry unavailable stubs (`{id, unavailable: true}`), so
/// everything past the id is optional.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub member_count: Option<u64>,
    pub approximate_member_count: Option<u64>,
    pub system_channel_id: Option<Snowflake>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<GuildMember>,
}

impl Guild {
    /// Best member count the server gave us.
    pub fn members_known(&self) -> Option<u64> {
        self.member_count
            .or(self.approximate_member_count)
            .or_else(|| (!self.members.is_empty()).then_some(self.members.len() as u64))
    }

    pub fn text_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.is_text())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuildMember {
    pub user: Option<User>,
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<String>,
}

/// GUILD_MEMBER_ADD payload: a member object plus the guild it joined.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuildMemberAdd {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub member: GuildMember,
}

// ---------------------------------------------------------------------------
// READY event payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyEvent {
    #[serde(default)]
    pub v: u8,
    pub user: User,
    pub session_id: String,
    /// Discord sends this; Spacebar may not, in which case the configured
    /// gateway URL is reused.
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub guilds: Vec<Guild>,
}

// ---------------------------------------------------------------------------
// Presence (gateway op 3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Activity {
    pub name: String,
    /// 0 = Playing, 1 = Streaming, 2 = Listening, 3 = Watching
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePresence {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: String,
    pub afk: bool,
}

impl UpdatePresence {
    /// Online, "Playing {name}".
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: vec![Activity {
                name: name.into(),
                kind: 0,
            }],
            status: "online".to_string(),
            afk: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound message body (for REST POST /channels/{id}/messages)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

impl CreateMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.message_reference = Some(MessageReference {
            message_id: Some(message_id.into()),
            channel_id: None,
            guild_id: None,
            fail_if_not_exists: false,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Provisioning request bodies
// ---------------------------------------------------------------------------

/// `POST /auth/register`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub consent: bool,
    pub email: &'a str,
    pub date_of_birth: &'a str,
}

/// `POST /auth/login`. `login` is the account email.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub login: &'a str,
    pub password: &'a str,
}

/// `POST /applications`
#[derive(Debug, Clone, Serialize)]
pub struct CreateApplication<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub bot_public: bool,
    pub bot_require_code_grant: bool,
}

/// `POST /guilds`
#[derive(Debug, Clone, Serialize)]
pub struct CreateGuild<'a> {
    pub name: &'a str,
}

// ---------------------------------------------------------------------------
// Provisioning response bodies
// ---------------------------------------------------------------------------

/// Body of a successful register or login call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthResponse {
    pub token: Option<String>,
    pub user_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Application {
    pub id: Snowflake,
    pub name: String,
    pub description: Option<String>,
    pub bot: Option<ApplicationBot>,
}

impl Application {
    /// Token of the bot user issued alongside the application, if any.
    pub fn bot_token(&self) -> Option<&str> {
        self.bot
            .as_ref()
            .and_then(|b| b.token.as_deref())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationBot {
    pub id: Option<Snowflake>,
    pub username: Option<String>,
    pub token: Option<String>,
}

// ---------------------------------------------------------------------------
// Error body returned by the API on non-2xx responses
// ---------------------------------------------------------------------------

/// Spacebar returns either `{message, code}` or a form error of the shape
/// `{message, code, errors: {field: {_errors: [{code, message}]}}}`; some
/// deployments return `errors` as a plain array.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiErrorBody {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub errors: Option<serde_json::Value>,
}

impl ApiErrorBody {
    /// Fallback for bodies that are not JSON at all.
    pub fn from_raw(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            message: (!raw.trim().is_empty()).then(|| raw.trim().to_string()),
            ..Self::default()
        })
    }

    /// Messages nested under `errors`, in document order.
    pub fn detail_messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(errors) = &self.errors {
            collect_error_messages(errors, &mut out);
        }
        out
    }

    /// The top-level message, or the first nested one.
    pub fn describe(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.detail_messages().into_iter().next())
            .unwrap_or_else(|| "unknown error".to_string())
    }

    /// Whether any message says the resource is already taken.
    pub fn is_already_exists(&self) -> bool {
        self.message
            .iter()
            .cloned()
            .chain(self.detail_messages())
            .any(|m| m.to_lowercase().contains("already"))
    }
}

fn collect_error_messages(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_error_messages(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(msg)) = map.get("message") {
                out.push(msg.clone());
                return;
            }
            for v in map.values() {
                collect_error_messages(v, out);
            }
        }
        _ => {}
    }
}
