//! Provision a local Spacebar server and run an example bot against it.
//!
//! `spacebar-setup` registers accounts, creates bot applications and a guild,
//! and writes `credentials.json`. `example-bot` reads that file and answers
//! `!` commands. Wire types, events, the credential artifact and command
//! dispatch are always compiled; the networked parts sit behind the `io`
//! feature.

pub mod commands;
pub mod credentials;
pub mod events;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod config;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod handlers;
#[cfg(feature = "io")]
pub mod http;
#[cfg(feature = "io")]
pub mod setup;
#[cfg(feature = "io")]
mod tls;
