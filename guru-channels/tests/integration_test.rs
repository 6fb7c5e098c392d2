//! Integration tests for Guru Channels.
//!
//! Drives the router end to end, with mock servers standing in for the
//! Twilio and OpenAI APIs.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use guru_channels::build_channels_router;
use guru_channels::twilio::{compute_signature, form_value, parse_form};
use guru_common::config::Config;
use guru_planner::{MENU, START_HINT};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SENDER: &str = "whatsapp:+15551234567";
const MESSAGES_PATH: &str = "/2010-04-01/Accounts/AC123/Messages.json";

/// Config pointing every outbound API at the mock servers.
fn test_config(twilio: &MockServer, openai: &MockServer) -> Config {
    let mut config = Config::default();
    config.twilio.account_sid = Some("AC123".into());
    config.twilio.api_key_sid = Some("SK123".into());
    config.twilio.api_key_secret = Some("secret".into());
    config.twilio.proxy_address = Some("whatsapp:+14155238886".into());
    config.twilio.api_base_url = twilio.uri();
    config.twilio.conversations_base_url = twilio.uri();
    config.llm.api_key = Some("sk-test".into());
    config.llm.base_url = openai.uri();
    config.outbound.chunk_delay_ms = 0;
    config
}

async fn mock_twilio() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM1"})))
        .mount(&server)
        .await;
    server
}

async fn mock_openai(answer: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {"role": "assistant", "content": answer},
                "finish_reason": "stop"
            }]
        })))
        .mount(&server)
        .await;
    server
}

/// Helper to make a JSON request.
async fn request_json(app: &axum::Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, json)
}

/// Post one inbound WhatsApp message, returning status and body text.
async fn post_inbound(
    app: &axum::Router,
    text: &str,
    signature: Option<&str>,
) -> (StatusCode, String) {
    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("Body", text)
        .append_pair("From", SENDER)
        .finish();

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhook/whatsapp")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(signature) = signature {
        builder = builder.header("X-Twilio-Signature", signature);
    }

    let response = app
        .clone()
        .oneshot(builder.body(Body::from(form)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();

    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// Wait until Twilio has received `count` outbound messages; return their bodies.
async fn sent_bodies(twilio: &MockServer, count: usize) -> Vec<String> {
    for _ in 0..400 {
        let bodies: Vec<String> = twilio
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == MESSAGES_PATH)
            .filter_map(|r| form_value(&parse_form(&r.body), "Body").map(str::to_string))
            .collect();
        if bodies.len() >= count {
            return bodies;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Twilio did not receive {count} messages in time");
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Check Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let (app, _bridge, _twilio) = build_channels_router(&Config::default());

    let (status, json) = request_json(&app, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "guru-channels");
}

#[tokio::test]
async fn test_ready_without_credentials() {
    let (app, _bridge, _twilio) = build_channels_router(&Config::default());

    let (status, json) = request_json(&app, Method::GET, "/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "not_ready");
}

#[tokio::test]
async fn test_ready_with_reachable_twilio() {
    let twilio = mock_twilio().await;
    Mock::given(method("GET"))
        .and(path("/2010-04-01/Accounts/AC123.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sid": "AC123"})))
        .mount(&twilio)
        .await;
    let openai = mock_openai("unused").await;
    let (app, _bridge, _twilio) = build_channels_router(&test_config(&twilio, &openai));

    let (status, json) = request_json(&app, Method::GET, "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ready");
    assert_eq!(json["sessions"], 0);
}

#[tokio::test]
async fn test_home_text() {
    let (app, _bridge, _twilio) = build_channels_router(&Config::default());

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();

    assert_eq!(&body[..], b"Polling bot is running!");
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restaurant_conversation_end_to_end() {
    let twilio = mock_twilio().await;
    let openai = mock_openai("Try Trattoria Roma near the Marais.").await;
    let (app, bridge, _twilio) = build_channels_router(&test_config(&twilio, &openai));

    for text in ["help", "1", "Paris", "Italian", "50"] {
        let (status, body) = post_inbound(&app, text, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<Message>Processing your itinerary...</Message>"));
    }

    let bodies = sent_bodies(&twilio, 5).await;
    assert_eq!(
        bodies,
        vec![
            MENU.to_string(),
            "Enter your location:".to_string(),
            "Preferred cuisine?".to_string(),
            "Enter your budget:".to_string(),
            "Try Trattoria Roma near the Marais.".to_string(),
        ]
    );
    assert!(bridge.store().contains(SENDER));

    let llm_requests = openai.received_requests().await.unwrap();
    assert_eq!(llm_requests.len(), 1);
    let sent: Value = serde_json::from_slice(&llm_requests[0].body).unwrap();
    assert_eq!(sent["max_tokens"], 800);
    assert!(sent["messages"][1]["content"]
        .as_str()
        .unwrap()
        .contains("Paris"));
}

#[tokio::test]
async fn test_bad_budget_is_corrected_in_place() {
    let twilio = mock_twilio().await;
    let openai = mock_openai("Three days of surprises.").await;
    let (app, _bridge, _twilio) = build_channels_router(&test_config(&twilio, &openai));

    for text in ["help", "1", "Paris", "Italian", "-5"] {
        post_inbound(&app, text, None).await;
    }
    let bodies = sent_bodies(&twilio, 5).await;
    assert_eq!(bodies[4], "Error: Budget must be a positive number.");
    assert!(openai.received_requests().await.unwrap().is_empty());

    post_inbound(&app, "40", None).await;
    let bodies = sent_bodies(&twilio, 6).await;
    assert_eq!(bodies[5], "Three days of surprises.");
}

#[tokio::test]
async fn test_text_before_trigger_gets_hint() {
    let twilio = mock_twilio().await;
    let openai = mock_openai("unused").await;
    let (app, _bridge, _twilio) = build_channels_router(&test_config(&twilio, &openai));

    post_inbound(&app, "hello there", None).await;

    assert_eq!(sent_bodies(&twilio, 1).await, vec![START_HINT.to_string()]);
}

#[tokio::test]
async fn test_long_answer_is_split() {
    let answer = format!("{}\n{}", "a".repeat(900), "b".repeat(300));
    let twilio = mock_twilio().await;
    let openai = mock_openai(&answer).await;
    let (app, _bridge, _twilio) = build_channels_router(&test_config(&twilio, &openai));

    for text in ["help", "3", "Lisbon", "2", "900", "4"] {
        post_inbound(&app, text, None).await;
    }

    let bodies = sent_bodies(&twilio, 7).await;
    assert_eq!(bodies[5], "a".repeat(900));
    assert_eq!(bodies[6], "b".repeat(300));
}

// ─────────────────────────────────────────────────────────────────────────────
// Signature Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_signed_webhook() {
    let twilio = mock_twilio().await;
    let openai = mock_openai("unused").await;
    let mut config = test_config(&twilio, &openai);
    config.twilio.auth_token = Some("auth-token".into());
    config.twilio.webhook_url = Some("https://guru.example.com/webhook/whatsapp".into());
    let (app, _bridge, _twilio) = build_channels_router(&config);

    let params = vec![
        ("Body".to_string(), "help".to_string()),
        ("From".to_string(), SENDER.to_string()),
    ];
    let signature = compute_signature(
        "auth-token",
        "https://guru.example.com/webhook/whatsapp",
        &params,
    );

    let (status, _) = post_inbound(&app, "help", Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_inbound(&app, "help", Some("bm90IGl0")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post_inbound(&app, "help", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(sent_bodies(&twilio, 1).await, vec![MENU.to_string()]);
}
