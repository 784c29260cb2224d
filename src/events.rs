//! Typed gateway events.
//!
//! The gateway module deserialises dispatch payloads into [`GatewayEvent`]
//! so the bot can pattern-match on typed data. The same enum also carries the
//! client's own lifecycle notifications (disconnects, reconnect attempts,
//! errors) so the bot can log them without knowing how the connection is
//! driven.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Identify succeeded, bot is ready.
    Ready(ReadyEvent),

    /// Full guild object, sent after READY or when the bot joins a guild.
    GuildCreate(Guild),

    /// A message was created in a channel we can see.
    MessageCreate(Message),

    /// A member joined a guild we are in.
    GuildMemberAdd(GuildMemberAdd),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). `true` if resumable.
    InvalidSession(bool),

    /// The connection dropped. Emitted by the client, not the server.
    Disconnected { reason: String },

    /// The client is about to reconnect after a delay.
    Reconnecting { attempt: u32, delay_ms: u64 },

    /// Something went wrong in the client that did not end the session.
    ClientWarning(String),

    /// The client gave up; no further events will follow.
    ClientError(String),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// Never fails: unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let (Some(name), Some(d)) = (event_name.as_deref(), data.as_ref()) else {
            return GatewayEvent::Unknown {
                event_name,
                op: 0,
                data,
            };
        };

        let parsed = match name {
            "READY" => parse_as(name, d, GatewayEvent::Ready),
            "GUILD_CREATE" => parse_as(name, d, GatewayEvent::GuildCreate),
            "MESSAGE_CREATE" => parse_as(name, d, GatewayEvent::MessageCreate),
            "GUILD_MEMBER_ADD" => parse_as(name, d, GatewayEvent::GuildMemberAdd),
            _ => None,
        };

        parsed.unwrap_or(GatewayEvent::Unknown {
            event_name,
            op: 0,
            data,
        })
    }

    /// Whether the event is gateway plumbing the bot never needs to see.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            GatewayEvent::HeartbeatAck
                | GatewayEvent::HeartbeatRequest
                | GatewayEvent::Reconnect
                | GatewayEvent::InvalidSession(_)
        )
    }
}

fn parse_as<T: DeserializeOwned>(
    name: &str,
    data: &serde_json::Value,
    wrap: fn(T) -> GatewayEvent,
) -> Option<GatewayEvent> {
    match serde_json::from_value::<T>(data.clone()) {
        Ok(value) => Some(wrap(value)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}
