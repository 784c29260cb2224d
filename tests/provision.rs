//! Provisioning against a mock Spacebar API.
//!
//! Each test gets its own mockito server and a temp dir for the credential
//! artifact. The startup delay is zeroed so runs are immediate.

use std::sync::Once;
use std::time::Duration;

use hello_spacebar::config::Settings;
use hello_spacebar::credentials::CredentialArtifact;
use hello_spacebar::setup::{ProvisionOutcome, ProvisionPlan, Provisioner, Registration};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

const ADMIN_TOKEN: &str = "admin-token";

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt().with_env_filter(env_filter).with_test_writer().init();
    });
}

fn provisioner(server: &ServerGuard, dir: &TempDir) -> Provisioner {
    init_tracing();
    let settings = Settings::new(format!("{}/api", server.url()))
        .unwrap()
        .with_credentials_path(dir.path().join("credentials.json"))
        .with_startup_delay(Duration::ZERO);
    Provisioner::new(settings, ProvisionPlan::default()).unwrap()
}

async fn mock_register_ok(server: &mut ServerGuard, hits: usize) -> Mock {
    server
        .mock("POST", "/api/auth/register")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "token": "user-token" }).to_string())
        .expect(hits)
        .create_async()
        .await
}

async fn mock_login_ok(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/api/auth/login")
        .match_body(Matcher::PartialJson(json!({
            "login": "admin@spacebar.local",
            "password": "AdminPass123!"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "token": ADMIN_TOKEN, "user_id": "1" }).to_string())
        .create_async()
        .await
}

async fn mock_application(server: &mut ServerGuard, name: &str, id: &str, token: Option<&str>) -> Mock {
    let bot = match token {
        Some(token) => json!({ "id": id, "token": token }),
        None => json!({ "id": id }),
    };
    server
        .mock("POST", "/api/applications")
        .match_header("authorization", ADMIN_TOKEN)
        .match_body(Matcher::PartialJson(json!({
            "name": name,
            "bot_public": true,
            "bot_require_code_grant": false
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(json!({ "id": id, "name": name, "bot": bot }).to_string())
        .create_async()
        .await
}

async fn mock_all_applications(server: &mut ServerGuard) -> Vec<Mock> {
    let mut mocks = Vec::new();
    for (i, name) in ["WelcomeBot", "ModeratorBot", "MusicBot", "GameBot"]
        .iter()
        .enumerate()
    {
        let id = format!("10{i}");
        let token = format!("bot-token-{i}");
        mocks.push(mock_application(server, name, &id, Some(&token)).await);
    }
    mocks
}

async fn mock_guild_ok(server: &mut ServerGuard, hits: usize) -> Mock {
    server
        .mock("POST", "/api/guilds")
        .match_header("authorization", ADMIN_TOKEN)
        .match_body(Matcher::PartialJson(json!({ "name": "My Spacebar Server" })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(json!({ "id": "500", "name": "My Spacebar Server", "owner_id": "1" }).to_string())
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn full_run_writes_artifact() {
    let mut server = Server::new_async().await;
    let register = mock_register_ok(&mut server, 4).await;
    let login = mock_login_ok(&mut server).await;
    let apps = mock_all_applications(&mut server).await;
    let guild = mock_guild_ok(&mut server, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(&server, &dir);
    let outcome = provisioner.run().await.unwrap();

    register.assert_async().await;
    login.assert_async().await;
    for app in &apps {
        app.assert_async().await;
    }
    guild.assert_async().await;

    let ProvisionOutcome::Completed(artifact) = outcome else {
        panic!("expected a completed run");
    };
    let written = CredentialArtifact::load(dir.path().join("credentials.json")).unwrap();
    assert_eq!(written, artifact);

    assert_eq!(written.server, server.url());
    assert_eq!(written.admin.username, "admin");
    assert_eq!(written.admin.token.as_deref(), Some(ADMIN_TOKEN));
    assert_eq!(
        written.users.iter().map(|u| u.username.as_str()).collect::<Vec<_>>(),
        ["user1", "user2", "user3"]
    );
    assert_eq!(
        written.bots.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
        ["WelcomeBot", "ModeratorBot", "MusicBot", "GameBot"]
    );
    assert_eq!(written.bots[2].token, "bot-token-2");
    assert_eq!(written.guild_name(), Some("My Spacebar Server"));
}

#[tokio::test]
async fn admin_login_failure_stops_before_bots_and_writes_nothing() {
    let mut server = Server::new_async().await;
    let _register = mock_register_ok(&mut server, 4).await;
    let login = server
        .mock("POST", "/api/auth/login")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({ "code": 50035, "message": "Invalid login or password" }).to_string())
        .create_async()
        .await;
    let apps = server
        .mock("POST", "/api/applications")
        .expect(0)
        .create_async()
        .await;
    let guilds = server.mock("POST", "/api/guilds").expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = provisioner(&server, &dir).run().await.unwrap();

    assert_eq!(outcome, ProvisionOutcome::AdminLoginFailed);
    login.assert_async().await;
    apps.assert_async().await;
    guilds.assert_async().await;
    assert!(!dir.path().join("credentials.json").exists());
}

#[tokio::test]
async fn bot_without_token_is_left_out() {
    let mut server = Server::new_async().await;
    let _register = mock_register_ok(&mut server, 4).await;
    let _login = mock_login_ok(&mut server).await;
    let _welcome = mock_application(&mut server, "WelcomeBot", "100", Some("t0")).await;
    let _moderator = mock_application(&mut server, "ModeratorBot", "101", Some("t1")).await;
    let _music = mock_application(&mut server, "MusicBot", "102", None).await;
    let _game = mock_application(&mut server, "GameBot", "103", Some("t3")).await;
    let _guild = mock_guild_ok(&mut server, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = provisioner(&server, &dir).run().await.unwrap();

    let ProvisionOutcome::Completed(artifact) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(
        artifact.bots.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
        ["WelcomeBot", "ModeratorBot", "GameBot"]
    );
    assert!(artifact.bots.iter().all(|b| !b.token.is_empty()));
}

#[tokio::test]
async fn failed_guild_is_recorded_as_absent() {
    let mut server = Server::new_async().await;
    let _register = mock_register_ok(&mut server, 4).await;
    let _login = mock_login_ok(&mut server).await;
    let _apps = mock_all_applications(&mut server).await;
    let _guild = server
        .mock("POST", "/api/guilds")
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = provisioner(&server, &dir).run().await.unwrap();

    let ProvisionOutcome::Completed(artifact) = outcome else {
        panic!("expected a completed run");
    };
    assert!(artifact.guild.is_none());
    assert_eq!(artifact.bots.len(), 4);
    let raw = std::fs::read_to_string(dir.path().join("credentials.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(value["guild"].is_null());
}

#[tokio::test]
async fn existing_accounts_are_not_errors() {
    let mut server = Server::new_async().await;
    let _register = server
        .mock("POST", "/api/auth/register")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "code": 50035,
                "message": "Invalid Form Body",
                "errors": {
                    "email": { "_errors": [
                        { "code": "EMAIL_ALREADY_REGISTERED", "message": "Email is already registered" }
                    ] }
                }
            })
            .to_string(),
        )
        .expect(4)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(&server, &dir);
    let plan = provisioner.plan().clone();

    for account in std::iter::once(&plan.admin).chain(&plan.users) {
        assert_eq!(
            provisioner.register_user(account).await,
            Registration::AlreadyExists
        );
    }
}

#[tokio::test]
async fn other_registration_errors_carry_the_server_message() {
    let mut server = Server::new_async().await;
    let _register = server
        .mock("POST", "/api/auth/register")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "code": 50035,
                "message": "Invalid Form Body",
                "errors": {
                    "password": { "_errors": [{ "code": "PASSWORD_TOO_WEAK", "message": "Password too weak" }] }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(&server, &dir);
    let admin = provisioner.plan().admin.clone();

    assert_eq!(
        provisioner.register_user(&admin).await,
        Registration::Failed("Invalid Form Body".to_string())
    );
}

#[tokio::test]
async fn register_sends_supplied_credentials() {
    let mut server = Server::new_async().await;
    let register = server
        .mock("POST", "/api/auth/register")
        .match_body(Matcher::PartialJson(json!({
            "username": "user2",
            "email": "user2@spacebar.local",
            "password": "UserPass123!",
            "consent": true,
            "date_of_birth": "2000-01-01"
        })))
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(&server, &dir);
    let user2 = provisioner.plan().users[1].clone();

    assert_eq!(provisioner.register_user(&user2).await, Registration::Created);
    register.assert_async().await;
}

#[tokio::test]
async fn login_without_token_is_a_failure() {
    let mut server = Server::new_async().await;
    let _login = server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "ticket": "mfa", "mfa": true }).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(&server, &dir);
    let admin = provisioner.plan().admin.clone();

    assert_eq!(provisioner.login(&admin).await, None);
}

#[tokio::test]
async fn rerun_repeats_every_creation() {
    let mut server = Server::new_async().await;
    let _register = mock_register_ok(&mut server, 8).await;
    let login = server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "token": ADMIN_TOKEN }).to_string())
        .expect(2)
        .create_async()
        .await;
    let apps = server
        .mock("POST", "/api/applications")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(json!({ "id": "100", "name": "AnyBot", "bot": { "token": "t" } }).to_string())
        .expect(8)
        .create_async()
        .await;
    let guild = mock_guild_ok(&mut server, 2).await;

    let dir = tempfile::tempdir().unwrap();
    let provisioner = provisioner(&server, &dir);
    provisioner.run().await.unwrap();
    provisioner.run().await.unwrap();

    login.assert_async().await;
    apps.assert_async().await;
    guild.assert_async().await;
}

#[tokio::test]
async fn unreachable_server_ends_at_admin_login() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new("http://127.0.0.1:9/api")
        .unwrap()
        .with_credentials_path(dir.path().join("credentials.json"))
        .with_startup_delay(Duration::ZERO);
    let provisioner = Provisioner::new(settings, ProvisionPlan::default()).unwrap();

    let outcome = provisioner.run().await.unwrap();

    assert_eq!(outcome, ProvisionOutcome::AdminLoginFailed);
    assert!(!dir.path().join("credentials.json").exists());
}
