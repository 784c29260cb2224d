//! Example bot: answers `!ping`, `!hello`, `!info`, `!time` and `!help`
//! using one of the bots from the credential artifact.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use hello_spacebar::bot::{self, BotError, BotOptions};
use hello_spacebar::credentials::DEFAULT_CREDENTIALS_PATH;

#[derive(Parser)]
#[command(name = "example-bot", about = "Run an example bot against a Spacebar server")]
struct Args {
    /// Which bot from the credentials file to run
    #[arg(default_value_t = 0)]
    index: usize,

    /// Credential artifact written by spacebar-setup
    #[arg(long, env = "SPACEBAR_CREDENTIALS", default_value = DEFAULT_CREDENTIALS_PATH)]
    credentials: PathBuf,

    /// Accept invalid TLS certificates (self-signed test deployments only)
    #[arg(
        long,
        env = "SPACEBAR_ALLOW_INSECURE",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    insecure: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let options = BotOptions {
        credentials_path: args.credentials,
        index: args.index,
        allow_insecure_transport: args.insecure,
    };

    match bot::start(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ BotError::Credentials(_)) => {
            error!(error = %e, "no usable bot token, run spacebar-setup first");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "bot stopped");
            info!("make sure the Spacebar server is running");
            ExitCode::FAILURE
        }
    }
}
