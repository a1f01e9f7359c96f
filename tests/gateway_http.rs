use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use babyup_gateway::server::router;
use babyup_gateway::{Settings, build_gateway};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROUTE: &str = "/api/analyze";

fn app(provider: &str, endpoint: String, key: Option<&str>) -> Router {
    let settings = Settings {
        provider: provider.to_string(),
        endpoint: Some(endpoint),
        ..Settings::default()
    };
    app_with(&settings, key)
}

fn app_with(settings: &Settings, key: Option<&str>) -> Router {
    let key = key.map(str::to_string);
    let gateway = build_gateway(settings, move |_: &str| key.clone()).unwrap();
    router(gateway, ROUTE)
}

fn profile(lang: Option<&str>) -> Value {
    let mut body = json!({
        "name": "Mia",
        "gender": "other",
        "days": 65,
        "weight": 5.6,
        "height": 58.5,
        "head": 39.5
    });
    if let Some(lang) = lang {
        body["lang"] = json!(lang);
    }
    body
}

async fn post(app: Router, body: impl Into<Body>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(ROUTE)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "google/gemini-2.0-flash-001",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 320, "completion_tokens": 410, "total_tokens": 730}
    })
}

#[tokio::test]
async fn returns_generated_text_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("x-title", "BabyUp"))
        .and(body_partial_json(json!({
            "model": "google/gemini-2.0-flash-001",
            "temperature": 0.7
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("X")))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(
        "openrouter",
        format!("{}/v1/chat/completions", server.uri()),
        Some("test-key"),
    );
    let (status, body) = post(app, profile(Some("en")).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "X" }));
}

#[tokio::test]
async fn sends_system_then_user_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(
        "siliconflow",
        format!("{}/v1/chat/completions", server.uri()),
        Some("test-key"),
    );
    let (status, _) = post(app, profile(None).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let requests = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["model"], "Qwen/Qwen2.5-7B-Instruct");
    assert_eq!(sent["max_tokens"], 2048);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["role"], "user");
    let user = sent["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("头围：39.5cm"));
    assert!(user.contains("### 1. 生长现状评估"));
    assert!(user.contains("### 2. 未来趋势预测"));
    assert!(user.contains("### 3. 本月龄专属建议"));
}

#[tokio::test]
async fn provider_outage_returns_localized_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "upstream billing quota exhausted for account 42"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(
        "openrouter",
        format!("{}/v1/chat/completions", server.uri()),
        Some("test-key"),
    );
    let (status, body) = post(app, profile(None).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "报告生成失败，请稍后再试。" }));
    assert!(!body.to_string().contains("quota"));
}

#[tokio::test]
async fn rate_limited_status_is_retried_regardless_of_body_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Upstream rejected the request", "code": 400}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("X")))
        .expect(1)
        .mount(&server)
        .await;

    let settings = Settings {
        provider: "openrouter".to_string(),
        endpoint: Some(format!("{}/v1/chat/completions", server.uri())),
        max_attempts: 2,
        ..Settings::default()
    };
    let (status, body) = post(
        app_with(&settings, Some("test-key")),
        profile(Some("en")).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "X" }));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn embedded_error_envelope_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"message": "No endpoints found", "code": 404}
        })))
        .mount(&server)
        .await;

    let app = app(
        "openrouter",
        format!("{}/v1/chat/completions", server.uri()),
        Some("test-key"),
    );
    let (status, body) = post(app, profile(Some("en")).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "error": "Failed to generate the report. Please try again later." })
    );
}

#[tokio::test]
async fn missing_credential_never_calls_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let app = app(
        "openrouter",
        format!("{}/v1/chat/completions", server.uri()),
        None,
    );
    let (status, body) = post(app, profile(Some("en")).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "error": "Failed to generate the report. Please try again later." })
    );
}

#[tokio::test]
async fn malformed_bodies_use_the_fallback_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let endpoint = format!("{}/v1/chat/completions", server.uri());
    let (status, body) = post(
        app("openrouter", endpoint.clone(), Some("test-key")),
        "{\"name\": ",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "报告生成失败，请稍后再试。" }));

    let mut invalid = profile(Some("en"));
    invalid["weight"] = json!(-4);
    let (status, body) = post(app("openrouter", endpoint, Some("test-key")), invalid.to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "error": "Failed to generate the report. Please try again later." })
    );
}

#[tokio::test]
async fn claude_messages_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "Y"}],
            "usage": {"input_tokens": 300, "output_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(
        "claude",
        format!("{}/v1/messages", server.uri()),
        Some("sk-ant-test"),
    );
    let (status, body) = post(app, profile(Some("en")).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "Y" }));
}

#[tokio::test]
async fn health_and_preflight() {
    let app = app("openrouter", "http://127.0.0.1:9".to_string(), None);

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri(ROUTE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET,POST,OPTIONS"
    );
}
