//! Event handlers for the bot.
//!
//! Each public function handles one kind of gateway event. Handlers read the
//! [`BotState`] the event loop keeps and send replies through the REST
//! client. What to say lives in [`crate::commands`]; this module only decides
//! when and where to say it.

use tracing::{info, warn};

use crate::bot::BotState;
use crate::commands::{self, CommandContext};
use crate::gateway::GatewayHandle;
use crate::http::SpacebarHttpClient;
use crate::types::*;

pub const PRESENCE_ACTIVITY: &str = "on Spacebar";

// ---------------------------------------------------------------------------
// READY / GUILD_CREATE
// ---------------------------------------------------------------------------

/// Record identity, log what we can see, and set presence.
pub async fn on_ready(state: &mut BotState, gw: &GatewayHandle, ready: ReadyEvent) {
    state.apply_ready(&ready);
    info!(user = %ready.user.tag(), "bot is online");
    info!(guilds = ready.guilds.len(), "connected to guilds");
    for guild in ready.guilds.iter().filter(|g| !g.unavailable) {
        log_guild(guild);
    }

    if let Err(e) = gw
        .update_presence(&UpdatePresence::playing(PRESENCE_ACTIVITY))
        .await
    {
        warn!(error = %e, "failed to set presence");
    }
}

pub fn on_guild_create(state: &mut BotState, guild: Guild) {
    log_guild(&guild);
    state.apply_guild(guild);
}

fn log_guild(guild: &Guild) {
    info!(guild = guild.name.as_deref().unwrap_or("?"), id = %guild.id, "guild");
    for channel in guild.text_channels() {
        info!(
            "   #{} ({})",
            channel.name.as_deref().unwrap_or("?"),
            channel.id
        );
    }
}

// ---------------------------------------------------------------------------
// MESSAGE_CREATE
// ---------------------------------------------------------------------------

/// Log the message, run it through dispatch, send each reply.
///
/// Returns the number of replies sent successfully.
pub async fn on_message(state: &BotState, http: &SpacebarHttpClient, msg: &Message) -> usize {
    if msg.author.bot {
        return 0;
    }

    info!(
        "[{}] {}: {}",
        state.channel_label(msg),
        msg.author.username,
        msg.content
    );

    let Some(bot_user) = state.user.as_ref() else {
        warn!(message_id = %msg.id, "message before READY, ignoring");
        return 0;
    };

    let ctx = CommandContext {
        bot_user,
        guild: state.guild(msg.guild_id.as_deref()),
        now: chrono::Local::now(),
    };

    let mut sent = 0;
    for reply in commands::dispatch(msg, &ctx) {
        match http.reply(msg, &reply).await {
            Ok(_) => sent += 1,
            Err(e) => warn!(error = %e, channel_id = %msg.channel_id, "failed to send reply"),
        }
    }
    sent
}

// ---------------------------------------------------------------------------
// GUILD_MEMBER_ADD
// ---------------------------------------------------------------------------

/// Count the new member in the guild cache, then greet them in the guild's
/// system channel if it has one.
pub async fn on_member_add(state: &mut BotState, http: &SpacebarHttpClient, added: &GuildMemberAdd) {
    state.apply_member_add(added);

    let Some(user) = added.member.user.as_ref() else {
        return;
    };
    if user.bot {
        return;
    }
    let Some(guild) = state.guild(Some(&added.guild_id)) else {
        return;
    };
    let Some(channel_id) = guild.system_channel_id.as_deref() else {
        return;
    };

    let text = commands::welcome_text(user, guild.name.as_deref().unwrap_or("the server"));
    match http.send_message(channel_id, &text).await {
        Ok(_) => info!(user = %user.username, guild = %added.guild_id, "welcomed member"),
        Err(e) => warn!(error = %e, "failed to send welcome"),
    }
}
