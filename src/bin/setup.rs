//! Provision users, bot applications and a guild on a Spacebar server and
//! write the credential artifact.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use hello_spacebar::config::{Settings, DEFAULT_CONFIG_PATH};
use hello_spacebar::setup::{ProvisionOutcome, ProvisionPlan, Provisioner};

#[derive(Parser)]
#[command(name = "spacebar-setup", about = "Create test users, bots and a guild on a Spacebar server")]
struct Args {
    /// Server config file providing `api.endpointPublic`
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Where to write the credential artifact
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Accept invalid TLS certificates (self-signed test deployments only)
    #[arg(long)]
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

    let mut settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load settings");
            return ExitCode::FAILURE;
        }
    };
    if args.insecure {
        settings = settings.with_insecure_transport(true);
    }
    if let Some(output) = args.output {
        settings = settings.with_credentials_path(output);
    }

    let provisioner = match Provisioner::new(settings, ProvisionPlan::default()) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };

    match provisioner.run().await {
        Ok(ProvisionOutcome::Completed(_)) => ExitCode::SUCCESS,
        Ok(ProvisionOutcome::AdminLoginFailed) => {
            error!("could not log in as admin, no credentials written");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "setup failed");
            ExitCode::FAILURE
        }
    }
}
