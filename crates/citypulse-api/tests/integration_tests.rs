//! Integration tests for the CityPulse API.
//!
//! Each test builds its own router over an in-memory database and
//! scripted collaborators, then drives it with `oneshot`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use citypulse_api::create_router;
use citypulse_api::handlers::{ChatResponse, HealthResponse, SessionIdResponse};
use citypulse_api::state::AppState;
use citypulse_chat::collaborator::mock::{summary, ScriptedCompletion, StaticPlaces};
use citypulse_chat::{ChatOrchestrator, PlacesService, ResponseComposer, TextCompletion};
use citypulse_core::config::CityPulseConfig;
use citypulse_core::types::Role;
use citypulse_storage::{Database, SessionRepository};

// =============================================================================
// Helpers
// =============================================================================

fn scripted() -> Arc<ScriptedCompletion> {
    Arc::new(ScriptedCompletion::new(|req| {
        let prompt = req.last_content();
        if prompt.contains("Extract search information") {
            Ok("amenity: cafe\nrequirements: dog-friendly\nlocation: Newtown\nfollow_up: no"
                .to_string())
        } else if prompt.contains("Answer with only") {
            Ok("no".to_string())
        } else if prompt.contains("===") {
            Ok("Both cafes welcome dogs.".to_string())
        } else {
            Ok("G'day! Ask me about places around Sydney.".to_string())
        }
    }))
}

fn newtown_places() -> Arc<StaticPlaces> {
    Arc::new(
        StaticPlaces::new()
            .with_geocode("newtown", -33.897, 151.179, &["locality", "political"])
            .with_results(vec![
                summary("p1", "Bean There", "12 King St", Some(4.6)),
                summary("p2", "Paws Cafe", "3 Enmore Rd", Some(3.9)),
            ]),
    )
}

fn make_state_with(
    completion: Option<Arc<dyn TextCompletion>>,
    places: Option<Arc<dyn PlacesService>>,
    config: CityPulseConfig,
) -> AppState {
    let db = Arc::new(Database::in_memory().unwrap());
    let orchestrator = ChatOrchestrator::new(SessionRepository::new(db), completion, places, &config)
        .with_composer(ResponseComposer::with_seed(config.search.places_described, 5));
    AppState::new(config, orchestrator)
}

fn make_state() -> AppState {
    make_state_with(
        Some(scripted()),
        Some(newtown_places()),
        CityPulseConfig::default(),
    )
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

// =============================================================================
// GET /health
// =============================================================================

#[tokio::test]
async fn test_health_reports_collaborators() {
    let app = create_router(make_state());
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert!(health.completion_configured);
    assert!(health.maps_configured);
}

#[tokio::test]
async fn test_health_without_collaborators() {
    let app = create_router(make_state_with(None, None, CityPulseConfig::default()));
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert!(!health.completion_configured);
    assert!(!health.maps_configured);
}

// =============================================================================
// POST /generate_session_id
// =============================================================================

#[tokio::test]
async fn test_generate_session_id() {
    let app = create_router(make_state());
    let resp = app
        .oneshot(
            Request::post("/generate_session_id")
                .header("x-forwarded-for", "203.0.113.7")
                .header("user-agent", "Mozilla/5.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: SessionIdResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(body.session_id.len(), 32);
    assert!(body.session_id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_generate_session_id_without_proxy_headers() {
    let app = create_router(make_state());
    let peer = SocketAddr::from(([192, 168, 1, 20], 51000));
    let resp = app
        .oneshot(
            Request::post("/generate_session_id")
                .extension(ConnectInfo(peer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: SessionIdResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(body.session_id.len(), 32);
}

#[tokio::test]
async fn test_generate_session_id_is_unique() {
    let state = make_state();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let resp = create_router(state.clone())
            .oneshot(Request::post("/generate_session_id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        ids.push(body_json(resp).await["session_id"].as_str().unwrap().to_string());
    }
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

// =============================================================================
// POST /chat
// =============================================================================

#[tokio::test]
async fn test_chat_search_turn() {
    let state = make_state();
    let app = create_router(state.clone());
    let resp = app
        .oneshot(post_json(
            "/chat",
            r#"{"message": "find dog friendly cafes in Newtown", "session_id": "abc"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: ChatResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert!(body
        .response
        .starts_with("I found some places matching your search for dog-friendly cafe in Newtown."));
    assert!(body.response.contains("**Bean There**"));
    assert_eq!(body.places.map(|p| p.len()), Some(2));

    let history = state.orchestrator.sessions().read("abc").unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::System);
    assert!(history[2].announces_results());
}

#[tokio::test]
async fn test_chat_general_turn() {
    let app = create_router(make_state());
    let resp = app
        .oneshot(post_json("/chat", r#"{"message": "hi", "session_id": "abc"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["response"], "G'day! Ask me about places around Sydney.");
    assert_eq!(body["intent"], "GENERAL_CHAT");
}

#[tokio::test]
async fn test_chat_empty_message_prompts() {
    let completion = scripted();
    let state = make_state_with(
        Some(completion.clone()),
        Some(newtown_places()),
        CityPulseConfig::default(),
    );
    let resp = create_router(state)
        .oneshot(post_json("/chat", r#"{"message": "", "session_id": "abc"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(
        body["response"],
        "I didn't receive a message. How can I help you?"
    );
    assert_eq!(completion.call_count(), 0);
}

#[tokio::test]
async fn test_chat_missing_session_id() {
    let state = make_state();
    let resp = create_router(state.clone())
        .oneshot(post_json("/chat", r#"{"message": "cafes in Newtown"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "No session ID provided");
}

#[tokio::test]
async fn test_chat_message_too_long() {
    let long = "a".repeat(2001);
    let resp = create_router(make_state())
        .oneshot(post_json(
            "/chat",
            &serde_json::json!({"message": long, "session_id": "abc"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"]
        .as_str()
        .unwrap()
        .contains("2000"));
}

#[tokio::test]
async fn test_chat_invalid_json() {
    let resp = create_router(make_state())
        .oneshot(post_json("/chat", "not json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn test_chat_search_unavailable() {
    let places: Arc<dyn PlacesService> = Arc::new(StaticPlaces::new().denying_search());
    let state = make_state_with(Some(scripted()), Some(places), CityPulseConfig::default());
    let resp = create_router(state)
        .oneshot(post_json(
            "/chat",
            r#"{"message": "find cafes in Newtown", "session_id": "abc"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    // No internal detail such as the maps error text leaks out.
    assert!(!body["error"].as_str().unwrap().contains("API key"));
}

#[tokio::test]
async fn test_chat_transient_search_failure_apologises() {
    let places: Arc<dyn PlacesService> = Arc::new(StaticPlaces::new().failing_search());
    let state = make_state_with(Some(scripted()), Some(places), CityPulseConfig::default());
    let resp = create_router(state)
        .oneshot(post_json(
            "/chat",
            r#"{"message": "find cafes in Newtown", "session_id": "abc"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(
        body["response"],
        "I'm sorry, something went wrong with the chat service. Please try again."
    );
    assert!(!body["response"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_chat_completion_failure_apologises() {
    let completion: Arc<dyn TextCompletion> = Arc::new(ScriptedCompletion::failing());
    let state = make_state_with(Some(completion), None, CityPulseConfig::default());
    let resp = create_router(state)
        .oneshot(post_json("/chat", r#"{"message": "hello", "session_id": "abc"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await["response"],
        "I'm sorry, I encountered an error processing your request. Please try again."
    );
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let mut config = CityPulseConfig::default();
    config.general.rate_limit_per_sec = 1;
    let app = create_router(make_state_with(None, None, config));

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let resp = app
            .clone()
            .oneshot(Request::post("/generate_session_id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        statuses.push(resp.status());
    }
    assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));

    // Health is not rate limited.
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
