//! Message handling against a mock REST API: which inbound messages produce
//! replies, and what gets posted.

use hello_spacebar::bot::BotState;
use hello_spacebar::handlers;
use hello_spacebar::http::SpacebarHttpClient;
use hello_spacebar::types::{GuildMemberAdd, Message, ReadyEvent};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

const BOT_TOKEN: &str = "bot-token";

fn state() -> BotState {
    let ready: ReadyEvent = serde_json::from_value(json!({
        "v": 9,
        "user": { "id": "900", "username": "WelcomeBot", "bot": true },
        "session_id": "session",
        "guilds": [{
            "id": "1",
            "name": "My Spacebar Server",
            "member_count": 4,
            "system_channel_id": "10",
            "channels": [
                { "id": "10", "type": 0, "name": "general" },
                { "id": "11", "type": 2, "name": "voice" }
            ]
        }]
    }))
    .unwrap();
    let mut state = BotState::default();
    state.apply_ready(&ready);
    state
}

fn message(content: &str, bot_author: bool, mentions: serde_json::Value) -> Message {
    serde_json::from_value(json!({
        "id": "5",
        "channel_id": "10",
        "guild_id": "1",
        "author": { "id": "2", "username": "user1", "bot": bot_author },
        "content": content,
        "mentions": mentions
    }))
    .unwrap()
}

fn client(server: &ServerGuard) -> SpacebarHttpClient {
    SpacebarHttpClient::new(format!("{}/api", server.url()), false)
        .unwrap()
        .with_bot_token(BOT_TOKEN)
}

fn echo_body() -> String {
    json!({
        "id": "6",
        "channel_id": "10",
        "author": { "id": "900", "username": "WelcomeBot", "bot": true },
        "content": "ok"
    })
    .to_string()
}

#[tokio::test]
async fn ping_gets_one_threaded_reply() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/channels/10/messages")
        .match_header("authorization", "Bot bot-token")
        .match_body(Matcher::PartialJson(json!({
            "content": "🏓 Pong!",
            "message_reference": { "message_id": "5" }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body())
        .expect(1)
        .create_async()
        .await;

    let sent = handlers::on_message(&state(), &client(&server), &message("!ping", false, json!([]))).await;

    assert_eq!(sent, 1);
    post.assert_async().await;
}

#[tokio::test]
async fn info_reports_cached_guild() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/channels/10/messages")
        .match_body(Matcher::Regex(
            "Server: My Spacebar Server.*Members: 4.*Channels: 2.*Bot: WelcomeBot".to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body())
        .expect(1)
        .create_async()
        .await;

    let sent = handlers::on_message(&state(), &client(&server), &message("!info", false, json!([]))).await;

    assert_eq!(sent, 1);
    post.assert_async().await;
}

#[tokio::test]
async fn unknown_command_and_plain_text_send_nothing() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/channels/10/messages")
        .expect(0)
        .create_async()
        .await;

    let http = client(&server);
    let state = state();
    assert_eq!(handlers::on_message(&state, &http, &message("!unknown", false, json!([]))).await, 0);
    assert_eq!(handlers::on_message(&state, &http, &message("hello there", false, json!([]))).await, 0);
    post.assert_async().await;
}

#[tokio::test]
async fn bot_authors_are_ignored() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/channels/10/messages")
        .expect(0)
        .create_async()
        .await;

    let sent = handlers::on_message(&state(), &client(&server), &message("!ping", true, json!([]))).await;

    assert_eq!(sent, 0);
    post.assert_async().await;
}

#[tokio::test]
async fn command_with_mention_sends_both_replies() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/channels/10/messages")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body())
        .expect(2)
        .create_async()
        .await;
    let mentions = json!([{ "id": "900", "username": "WelcomeBot", "bot": true }]);
    let sent = handlers::on_message(&state(), &client(&server), &message("!hello", false, mentions)).await;

    assert_eq!(sent, 2);
    post.assert_async().await;
}

#[tokio::test]
async fn failed_send_is_not_counted() {
    let mut server = Server::new_async().await;
    let _post = server
        .mock("POST", "/api/channels/10/messages")
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(json!({ "code": 50013, "message": "Missing Permissions" }).to_string())
        .create_async()
        .await;

    let sent = handlers::on_message(&state(), &client(&server), &message("!time", false, json!([]))).await;

    assert_eq!(sent, 0);
}

#[tokio::test]
async fn new_member_is_welcomed_in_system_channel() {
    let mut server = Server::new_async().await;
    let post = server
        .mock("POST", "/api/channels/10/messages")
        .match_body(Matcher::Regex("My Spacebar Server".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body())
        .expect(1)
        .create_async()
        .await;

    let added: GuildMemberAdd = serde_json::from_value(json!({
        "guild_id": "1",
        "user": { "id": "3", "username": "user2" },
        "roles": []
    }))
    .unwrap();
    handlers::on_member_add(&mut state(), &client(&server), &added).await;

    post.assert_async().await;
}

#[tokio::test]
async fn info_after_join_counts_new_member() {
    let mut server = Server::new_async().await;
    let _welcome = server
        .mock("POST", "/api/channels/10/messages")
        .match_body(Matcher::Regex("Welcome".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body())
        .create_async()
        .await;
    let info = server
        .mock("POST", "/api/channels/10/messages")
        .match_body(Matcher::Regex("Members: 5".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(echo_body())
        .expect(1)
        .create_async()
        .await;

    let http = client(&server);
    let mut state = state();
    let added: GuildMemberAdd = serde_json::from_value(json!({
        "guild_id": "1",
        "user": { "id": "3", "username": "user2" }
    }))
    .unwrap();
    handlers::on_member_add(&mut state, &http, &added).await;
    let sent = handlers::on_message(&state, &http, &message("!info", false, json!([]))).await;

    assert_eq!(sent, 1);
    info.assert_async().await;
}
