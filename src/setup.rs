//! Provisioning orchestrator.
//!
//! Registers the admin and user accounts, logs in as admin, creates the bot
//! applications and a guild, then writes the credential artifact. Steps run
//! one after another. Every step except the admin login is allowed to fail:
//! the failure is logged and the resource is left out of the artifact.

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::credentials::{
    AdminCredential, BotCredential, CredentialArtifact, CredentialsError, UserCredential,
};
use crate::http::{HttpError, SpacebarHttpClient};
use crate::types::*;

pub const DATE_OF_BIRTH: &str = "2000-01-01";

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl AccountSpec {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSpec {
    pub name: String,
    pub description: String,
}

impl BotSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Everything a run will try to create, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub admin: AccountSpec,
    pub users: Vec<AccountSpec>,
    pub bots: Vec<BotSpec>,
    pub guild_name: String,
}

impl Default for ProvisionPlan {
    fn default() -> Self {
        Self {
            admin: AccountSpec::new("admin", "admin@spacebar.local", "AdminPass123!"),
            users: (1..=3)
                .map(|n| {
                    AccountSpec::new(
                        format!("user{n}"),
                        format!("user{n}@spacebar.local"),
                        "UserPass123!",
                    )
                })
                .collect(),
            bots: vec![
                BotSpec::new("WelcomeBot", "Welcomes new users"),
                BotSpec::new("ModeratorBot", "Helps with moderation"),
                BotSpec::new("MusicBot", "Plays music in voice channels"),
                BotSpec::new("GameBot", "Provides games and fun activities"),
            ],
            guild_name: "My Spacebar Server".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// The server says the account is already there; treated as success.
    AlreadyExists,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionOutcome {
    Completed(CredentialArtifact),
    /// Admin login failed; nothing after it was attempted.
    AdminLoginFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Provisioner {
    settings: Settings,
    plan: ProvisionPlan,
    http: SpacebarHttpClient,
}

impl Provisioner {
    pub fn new(settings: Settings, plan: ProvisionPlan) -> Result<Self, SetupError> {
        let http = SpacebarHttpClient::from_settings(&settings)?;
        Ok(Self {
            settings,
            plan,
            http,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn plan(&self) -> &ProvisionPlan {
        &self.plan
    }

    // ------------------------------------------------------------------
    // Single steps
    // ------------------------------------------------------------------

    pub async fn register_user(&self, account: &AccountSpec) -> Registration {
        let body = RegisterRequest {
            username: &account.username,
            password: &account.password,
            consent: true,
            email: &account.email,
            date_of_birth: DATE_OF_BIRTH,
        };
        match self.http.register(&body).await {
            Ok(_) => {
                info!(username = %account.username, "created user");
                Registration::Created
            }
            Err(e) if e.api_body().is_some_and(ApiErrorBody::is_already_exists) => {
                info!(username = %account.username, "user already exists");
                Registration::AlreadyExists
            }
            Err(e) => {
                warn!(username = %account.username, error = %e, "failed to create user");
                Registration::Failed(e.describe())
            }
        }
    }

    pub async fn login(&self, account: &AccountSpec) -> Option<String> {
        let body = LoginRequest {
            login: &account.email,
            password: &account.password,
        };
        match self.http.login(&body).await {
            Ok(AuthResponse {
                token: Some(token), ..
            }) if !token.is_empty() => {
                info!(username = %account.username, "logged in");
                Some(token)
            }
            Ok(_) => {
                warn!(username = %account.username, "login response carried no token");
                None
            }
            Err(e) => {
                warn!(
                    username = %account.username,
                    reason = %e.describe(),
                    error = %e,
                    "failed to log in"
                );
                None
            }
        }
    }

    pub async fn create_bot_application(
        &self,
        admin_token: &str,
        bot: &BotSpec,
    ) -> Option<Application> {
        let body = CreateApplication {
            name: &bot.name,
            description: &bot.description,
            bot_public: true,
            bot_require_code_grant: false,
        };
        match self
            .http
            .with_authorization(admin_token)
            .create_application(&body)
            .await
        {
            Ok(app) => {
                info!(
                    bot = %bot.name,
                    id = %app.id,
                    token = app.bot_token().unwrap_or("<none issued>"),
                    "created bot"
                );
                Some(app)
            }
            Err(e) => {
                warn!(bot = %bot.name, error = %e, "failed to create bot");
                None
            }
        }
    }

    pub async fn create_guild(&self, admin_token: &str, name: &str) -> Option<serde_json::Value> {
        match self
            .http
            .with_authorization(admin_token)
            .create_guild(&CreateGuild { name })
            .await
        {
            Ok(guild) => {
                info!(guild = name, "created guild");
                Some(guild)
            }
            Err(e) => {
                warn!(guild = name, error = %e, "failed to create guild");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // The whole sequence
    // ------------------------------------------------------------------

    /// Run every step and assemble the artifact. Does not write it.
    pub async fn provision(&self) -> ProvisionOutcome {
        let plan = &self.plan;

        info!(count = plan.users.len() + 1, "creating users");
        self.register_user(&plan.admin).await;
        for user in &plan.users {
            self.register_user(user).await;
        }

        info!(username = %plan.admin.username, "logging in as admin");
        let Some(admin_token) = self.login(&plan.admin).await else {
            error!("could not log in as admin, skipping bots, guild and credentials");
            return ProvisionOutcome::AdminLoginFailed;
        };

        info!(count = plan.bots.len(), "creating bots");
        let mut bots = Vec::new();
        for spec in &plan.bots {
            if let Some(app) = self.create_bot_application(&admin_token, spec).await {
                bots.push(app);
            }
        }

        info!(guild = %plan.guild_name, "creating guild");
        let guild = self.create_guild(&admin_token, &plan.guild_name).await;

        ProvisionOutcome::Completed(self.assemble(admin_token, &bots, guild))
    }

    /// Wait out the startup grace period, provision, and write the artifact
    /// if admin login succeeded.
    pub async fn run(&self) -> Result<ProvisionOutcome, SetupError> {
        self.settings.warn_if_insecure();
        info!(server = %self.settings.server_url, "setting up users and bots");

        if !self.settings.startup_delay.is_zero() {
            info!(
                delay_ms = self.settings.startup_delay.as_millis() as u64,
                "waiting for server to be ready"
            );
            tokio::time::sleep(self.settings.startup_delay).await;
        }

        let outcome = self.provision().await;
        if let ProvisionOutcome::Completed(artifact) = &outcome {
            artifact.save(&self.settings.credentials_path)?;
            self.log_summary(artifact);
        }
        Ok(outcome)
    }

    fn assemble(
        &self,
        admin_token: String,
        apps: &[Application],
        guild: Option<serde_json::Value>,
    ) -> CredentialArtifact {
        let plan = &self.plan;
        CredentialArtifact {
            server: self.settings.server_url.clone(),
            admin: AdminCredential {
                username: plan.admin.username.clone(),
                email: plan.admin.email.clone(),
                password: plan.admin.password.clone(),
                token: Some(admin_token),
            },
            users: plan
                .users
                .iter()
                .map(|u| UserCredential {
                    username: u.username.clone(),
                    email: u.email.clone(),
                    password: u.password.clone(),
                })
                .collect(),
            bots: apps
                .iter()
                .filter_map(BotCredential::from_application)
                .collect(),
            guild,
        }
    }

    fn log_summary(&self, artifact: &CredentialArtifact) {
        let users: Vec<&str> = artifact.users.iter().map(|u| u.username.as_str()).collect();
        info!(
            path = %self.settings.credentials_path.display(),
            server = %artifact.server,
            admin = %artifact.admin.username,
            users = %users.join(", "),
            bots = artifact.bots.len(),
            guild = artifact.guild_name().unwrap_or("<not created>"),
            "setup complete"
        );
    }
}
