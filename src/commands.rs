//! `!` prefix commands and the message dispatch function.
//!
//! Dispatch is a pure function of the inbound message and a read-only
//! [`CommandContext`]; it returns the reply texts and leaves sending them to
//! the caller. The only fixed state is the command table below.

use chrono::{DateTime, Local};

use crate::types::{Guild, Message, User};

pub const PREFIX: char = '!';

pub const MENTION_REPLY: &str = "You mentioned me! Try `!help` for commands.";

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Hello,
    Info,
    Time,
    Help,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Ping,
        Command::Hello,
        Command::Info,
        Command::Time,
        Command::Help,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Hello => "hello",
            Command::Info => "info",
            Command::Time => "time",
            Command::Help => "help",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::Ping => "Check if bot is responsive",
            Command::Hello => "Get a greeting",
            Command::Info => "Server information",
            Command::Time => "Current time",
            Command::Help => "This help message",
        }
    }

    /// Parse the command word of a `!`-prefixed message.
    ///
    /// Returns `None` for messages without the prefix and for unknown
    /// commands. Matching is case-insensitive on the first word only.
    pub fn parse(content: &str) -> Option<Command> {
        let rest = content.strip_prefix(PREFIX)?;
        let word = rest.split_whitespace().next()?.to_lowercase();
        Command::ALL.into_iter().find(|c| c.name() == word)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What a handler may read while building replies.
#[derive(Debug, Clone)]
pub struct CommandContext<'a> {
    /// The bot's own user, from READY.
    pub bot_user: &'a User,
    /// Cached guild the message was posted in, if known.
    pub guild: Option<&'a Guild>,
    pub now: DateTime<Local>,
}

/// Replies for one inbound message.
///
/// Bot authors get nothing. A recognised command yields one reply; a mention
/// of the bot yields the nudge reply; both can fire for the same message.
pub fn dispatch(msg: &Message, ctx: &CommandContext<'_>) -> Vec<String> {
    if msg.author.bot {
        return Vec::new();
    }

    let mut replies = Vec::new();

    if let Some(command) = Command::parse(&msg.content) {
        replies.push(render(command, msg, ctx));
    }

    if msg.mentions_user(&ctx.bot_user.id) {
        replies.push(MENTION_REPLY.to_string());
    }

    replies
}

fn render(command: Command, msg: &Message, ctx: &CommandContext<'_>) -> String {
    match command {
        Command::Ping => "🏓 Pong!".to_string(),
        Command::Hello => format!("👋 Hello {}!", msg.author.username),
        Command::Info => format_info(ctx),
        Command::Time => format!("🕐 Current time: {}", ctx.now.format("%Y-%m-%d %H:%M:%S")),
        Command::Help => help_text(),
    }
}

fn format_info(ctx: &CommandContext<'_>) -> String {
    let unknown = || "unknown".to_string();
    let (name, members, channels) = match ctx.guild {
        Some(guild) => (
            guild.name.clone().unwrap_or_else(unknown),
            guild
                .members_known()
                .map(|n| n.to_string())
                .unwrap_or_else(unknown),
            guild.channels.len().to_string(),
        ),
        None => (unknown(), unknown(), unknown()),
    };
    format!(
        "📊 **Server Info**\n\
         Server: {}\n\
         Members: {}\n\
         Channels: {}\n\
         Bot: {}",
        name, members, channels, ctx.bot_user.username
    )
}

pub fn help_text() -> String {
    let mut text = String::from("**Available Commands:**");
    for command in Command::ALL {
        text.push_str(&format!(
            "\n`{}{}` - {}",
            PREFIX,
            command.name(),
            command.description()
        ));
    }
    text
}

/// Greeting posted to a guild's system channel when someone joins.
pub fn welcome_text(member: &User, guild_name: &str) -> String {
    format!("Welcome {} to {}! 🎉", member.mention(), guild_name)
}
