use llm_key_gateway::{
    config::UpstreamConfig,
    errors::ApiError,
    proxy::{summarize_prompt, ticket_prompt, GatewayProxy, Operation, SummaryLength},
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn proxy_for(server: &MockServer, endpoint: &str) -> GatewayProxy {
    let mut config = UpstreamConfig::new(format!("{}{}", server.uri(), endpoint), "llama3");
    config.ticket_lookup_url = Some(format!("{}/ticket", server.uri()));
    GatewayProxy::new(config).expect("Failed to build proxy")
}

#[tokio::test]
async fn test_generate_forwards_prompt_and_relays_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_json(json!({ "model": "llama3", "prompt": "hello", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "hi there", "done": true })))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy_for(&server, "/api/generate");
    let response = proxy
        .forward(&Operation::Generate { prompt: "hello".to_string() })
        .await
        .expect("forward failed");

    assert_eq!(response, json!({ "response": "hi there", "done": true }));
}

#[tokio::test]
async fn test_responses_endpoint_uses_input_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(body_json(json!({ "model": "llama3", "input": "ping" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "output": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy_for(&server, "/v1/responses");
    let response = proxy
        .forward(&Operation::Generate { prompt: "ping".to_string() })
        .await
        .expect("forward failed");
    assert_eq!(response, json!({ "output": [] }));
}

#[tokio::test]
async fn test_upstream_error_status_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = proxy_for(&server, "/api/generate");
    let result = proxy
        .forward(&Operation::Generate { prompt: "hello".to_string() })
        .await;

    match result {
        Err(ApiError::Upstream(message)) => assert!(message.contains("503")),
        other => panic!("expected upstream error, got {:?}", other),
    }
    // MockServer verifies `.expect(1)` on drop
}

#[tokio::test]
async fn test_non_json_body_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let proxy = proxy_for(&server, "/api/generate");
    let result = proxy
        .forward(&Operation::Generate { prompt: "hello".to_string() })
        .await;
    assert!(matches!(result, Err(ApiError::Upstream(_))));
}

#[tokio::test]
async fn test_timeout_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "late" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = UpstreamConfig::new(format!("{}/api/generate", server.uri()), "llama3");
    config.timeouts.generate = Duration::from_millis(50);
    let proxy = GatewayProxy::new(config).unwrap();

    match proxy.forward(&Operation::Generate { prompt: "hello".to_string() }).await {
        Err(ApiError::Upstream(message)) => assert!(message.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_upstream_is_upstream_error() {
    // Nothing listens on port 9 (discard) in the test environment.
    let proxy = GatewayProxy::new(UpstreamConfig::new("http://127.0.0.1:9/api/generate", "llama3")).unwrap();
    let result = proxy
        .forward(&Operation::Generate { prompt: "hello".to_string() })
        .await;
    assert!(matches!(result, Err(ApiError::Upstream(_))));

    let probe = proxy.probe().await;
    assert!(!probe.reachable);
    assert!(probe.error.is_some());
}

#[tokio::test]
async fn test_fetch_text_for_summaries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Rust is a systems language."))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let proxy = proxy_for(&server, "/api/generate");
    let text = proxy
        .fetch_text(&format!("{}/article", server.uri()))
        .await
        .expect("fetch failed");
    assert_eq!(text, "Rust is a systems language.");

    let missing = proxy.fetch_text(&format!("{}/missing", server.uri())).await;
    assert!(matches!(missing, Err(ApiError::BadRequest(_))));

    let bad_scheme = proxy.fetch_text("file:///etc/passwd").await;
    assert!(matches!(bad_scheme, Err(ApiError::BadRequest(_))));

    let garbage = proxy.fetch_text("not a url").await;
    assert!(matches!(garbage, Err(ApiError::BadRequest(_))));
}

#[tokio::test]
async fn test_fetch_text_rejects_oversized_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/small"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tiny"))
        .mount(&server)
        .await;

    let mut config = UpstreamConfig::new(format!("{}/api/generate", server.uri()), "llama3");
    config.max_fetch_bytes = 16;
    let proxy = GatewayProxy::new(config).unwrap();

    match proxy.fetch_text(&format!("{}/big", server.uri())).await {
        Err(ApiError::BadRequest(message)) => assert!(message.contains("exceeds 16 bytes")),
        other => panic!("expected size rejection, got {:?}", other),
    }
    assert_eq!(
        proxy.fetch_text(&format!("{}/small", server.uri())).await.unwrap(),
        "tiny"
    );
}

#[tokio::test]
async fn test_ticket_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ticket"))
        .and(query_param("ticket_id", "T-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Login broken",
            "description": "Users see a 500 on /login"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ticket"))
        .and(query_param("ticket_id", "T-bad"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let proxy = proxy_for(&server, "/api/generate");
    let ticket = proxy.lookup_ticket("T-42").await.expect("lookup failed");
    assert_eq!(ticket["subject"], "Login broken");

    let bad = proxy.lookup_ticket("T-bad").await;
    assert!(matches!(bad, Err(ApiError::Upstream(_))));
}

#[tokio::test]
async fn test_ticket_lookup_requires_configuration() {
    let proxy = GatewayProxy::new(UpstreamConfig::new("http://127.0.0.1:11434/api/generate", "llama3")).unwrap();
    let result = proxy.lookup_ticket("T-1").await;
    assert!(matches!(result, Err(ApiError::Config(_))));
}

#[tokio::test]
async fn test_probe_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let probe = proxy_for(&server, "/api/generate").probe().await;
    assert!(probe.reachable);
    assert_eq!(probe.status, Some(405));
}

#[test]
fn test_invalid_upstream_url_is_config_error() {
    let result = GatewayProxy::new(UpstreamConfig::new("not a url", "llama3"));
    assert!(matches!(result, Err(ApiError::Config(_))));
}

#[test]
fn test_prompt_construction() {
    assert_eq!(
        summarize_prompt("abc", SummaryLength::Long),
        "Summarize the following text in a long summary:\n\nabc"
    );

    let prompt = ticket_prompt("T-1", &json!({ "title": "Printer", "body": "Out of toner" }));
    assert!(prompt.contains("Subject: Printer"));
    assert!(prompt.contains("Description:\nOut of toner"));

    let prompt = ticket_prompt("T-2", &json!({}));
    assert!(prompt.contains("Subject: Ticket T-2"));

    let op = Operation::Summarize { text: "xyz".into(), length: SummaryLength::Short };
    assert_eq!(op.prompt(), summarize_prompt("xyz", SummaryLength::Short));
    assert_eq!(op.name(), "summarize");
}

#[test]
fn test_summary_length_parsing() {
    assert_eq!(SummaryLength::parse(None).unwrap(), SummaryLength::Short);
    assert_eq!(SummaryLength::parse(Some("long")).unwrap(), SummaryLength::Long);
    assert!(matches!(SummaryLength::parse(Some("epic")), Err(ApiError::BadRequest(_))));
}
