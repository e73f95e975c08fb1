// Integration tests for the HTTP surface: authentication, routing,
// error mapping and the challenge flow end to end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use wargames_backend::agent::{AgentError, AgentGateway, AgentTurn, ProvisionSpec};
use wargames_backend::api;
use wargames_backend::auth::create_token;
use wargames_backend::db::{Challenge, Database, Tournament};
use wargames_backend::lock::SessionLocks;
use wargames_backend::rate_limit::RateLimiter;
use wargames_backend::session::SessionController;

// ── Test support ─────────────────────────────────────────────────────

struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<AgentTurn, AgentError>>>,
}

impl ScriptedGateway {
    fn with_replies(replies: Vec<Result<AgentTurn, AgentError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    fn reply(text: &str, tools: &[&str]) -> AgentTurn {
        AgentTurn {
            text: text.to_string(),
            tool_calls: tools.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<String, AgentError> {
        Ok(format!("agent-{}", spec.name))
    }

    async fn send_message(&self, _agent_ref: &str, _text: &str) -> Result<AgentTurn, AgentError> {
        let mut replies = self.replies.lock().unwrap();
        replies
            .pop_front()
            .unwrap_or_else(|| Ok(Self::reply("ok", &[])))
    }
}

struct TestApp {
    app: Router,
    db: Arc<Database>,
}

/// Router wired exactly as in main: api routes plus the extension
/// middleware the auth extractor depends on.
async fn test_app(replies: Vec<Result<AgentTurn, AgentError>>) -> TestApp {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let gateway = Arc::new(ScriptedGateway::with_replies(replies));
    let locks = SessionLocks::new(
        db.clone(),
        Duration::from_millis(2000),
        Duration::from_secs(60),
    );
    let sessions = SessionController::new(db.clone(), gateway, locks);

    let db_for_ext = db.clone();
    let app = api::router(db.clone(), sessions, RateLimiter::new()).layer(
        axum::middleware::from_fn(
            move |mut req: Request<Body>, next: axum::middleware::Next| {
                let db = db_for_ext.clone();
                async move {
                    req.extensions_mut().insert(db);
                    next.run(req).await
                }
            },
        ),
    );

    TestApp { app, db }
}

async fn seed_catalog(db: &Database) -> (Tournament, Challenge) {
    let now = chrono::Utc::now().timestamp();
    let tournament = db
        .create_tournament("API Cup", "route tests", now - 100, now + 3600)
        .await
        .unwrap();
    let challenge = db
        .create_challenge(
            tournament.id,
            "Press the button",
            "Convince the agent to press the red button.",
            "press_button",
            None,
        )
        .await
        .unwrap();
    db.create_badge(challenge.id, "Button Presser", "Pressed the red button")
        .await
        .unwrap();
    (tournament, challenge)
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(path: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(path: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Public routes ────────────────────────────────────────────────────

#[tokio::test]
async fn test_llms_txt_served() {
    let t = test_app(Vec::new()).await;
    let response = t.app.oneshot(get("/llms.txt", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("Wargames API"));
    assert!(text.contains("/api/challenges"));
}

// ── Authentication ───────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let t = test_app(Vec::new()).await;
    let response = t.app.oneshot(get("/api/tournaments", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let t = test_app(Vec::new()).await;
    let response = t
        .app
        .oneshot(get("/api/tournaments", Some("not-a-jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid token");
    assert_eq!(body["code"], "unauthorized");
}

// ── Tournaments ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_tournament_listing_filters() {
    let t = test_app(Vec::new()).await;
    let now = chrono::Utc::now().timestamp();
    t.db.create_tournament("Running", "", now - 100, now + 3600)
        .await
        .unwrap();
    t.db.create_tournament("Finished", "", now - 7200, now - 3600)
        .await
        .unwrap();
    let token = create_token("alice", None).unwrap();

    // Default filter lists only running tournaments
    let response = t
        .app
        .clone()
        .oneshot(get("/api/tournaments", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Running");

    let response = t
        .app
        .clone()
        .oneshot(get(
            "/api/tournaments?selection_filter=past_only",
            Some(&token),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Finished");

    let response = t
        .app
        .oneshot(get("/api/tournaments?selection_filter=bogus", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_tournament_is_idempotent_and_date_gated() {
    let t = test_app(Vec::new()).await;
    let (tournament, _) = seed_catalog(&t.db).await;
    let now = chrono::Utc::now().timestamp();
    let closed =
        t.db.create_tournament("Closed", "", now - 7200, now - 3600)
            .await
            .unwrap();
    let token = create_token("alice", None).unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["newly_enrolled"], true);

    let response = t
        .app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["newly_enrolled"], false);

    let response = t
        .app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", closed.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "tournament_closed");

    let response = t
        .app
        .oneshot(post("/api/tournaments/9999/join", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ── Challenges ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_challenge_listing_hides_success_tool() {
    let t = test_app(Vec::new()).await;
    let (tournament, _) = seed_catalog(&t.db).await;
    let token = create_token("alice", None).unwrap();

    let response = t
        .app
        .oneshot(get(
            &format!("/api/challenges?tournament_id={}", tournament.id),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let challenges = body.as_array().unwrap();
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0]["name"], "Press the button");
    assert!(challenges[0].get("success_tool").is_none());
    assert!(challenges[0].get("required_tools").is_none());
}

#[tokio::test]
async fn test_start_requires_enrollment() {
    let t = test_app(Vec::new()).await;
    let (_, challenge) = seed_catalog(&t.db).await;
    let token = create_token("outsider", None).unwrap();

    let response = t
        .app
        .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "not_enrolled");
}

#[tokio::test]
async fn test_start_unknown_challenge_is_not_found() {
    let t = test_app(Vec::new()).await;
    let token = create_token("alice", None).unwrap();
    let response = t
        .app
        .oneshot(post("/api/challenges/4242/start", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "challenge_not_found");
}

#[tokio::test]
async fn test_context_before_start_is_not_found() {
    let t = test_app(Vec::new()).await;
    let (tournament, challenge) = seed_catalog(&t.db).await;
    let token = create_token("alice", None).unwrap();
    t.app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();

    let response = t
        .app
        .oneshot(get(
            &format!("/api/challenges/{}/context", challenge.id),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "session_not_found");
}

#[tokio::test]
async fn test_submit_empty_message_is_bad_request() {
    let t = test_app(Vec::new()).await;
    let (tournament, challenge) = seed_catalog(&t.db).await;
    let token = create_token("alice", None).unwrap();
    t.app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();
    t.app
        .clone()
        .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
        .await
        .unwrap();

    let response = t
        .app
        .oneshot(post_json(
            &format!("/api/challenges/{}/submit_message", challenge.id),
            &token,
            serde_json::json!({ "message": "   " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "empty_message");
}

#[tokio::test]
async fn test_agent_failure_maps_to_bad_gateway() {
    let t = test_app(vec![Err(AgentError::Transport("boom".into()))]).await;
    let (tournament, challenge) = seed_catalog(&t.db).await;
    let token = create_token("alice", None).unwrap();
    t.app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();
    t.app
        .clone()
        .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
        .await
        .unwrap();

    let response = t
        .app
        .oneshot(post_json(
            &format!("/api/challenges/{}/submit_message", challenge.id),
            &token,
            serde_json::json!({ "message": "hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "agent_communication_failed");
}

#[tokio::test]
async fn test_challenge_flow_end_to_end() {
    let t = test_app(vec![
        Ok(ScriptedGateway::reply("I refuse.", &[])),
        Ok(ScriptedGateway::reply("Pressing it now.", &["press_button"])),
    ])
    .await;
    let (tournament, challenge) = seed_catalog(&t.db).await;
    let token = create_token("alice", None).unwrap();

    t.app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();

    // First start creates the session
    let response = t
        .app
        .clone()
        .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "active");
    assert_eq!(body["can_contribute"], true);
    assert_eq!(body["transcript"].as_array().unwrap().len(), 0);

    // Second start returns the same session
    let response = t
        .app
        .clone()
        .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A refusal keeps the session active
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/challenges/{}/submit_message", challenge.id),
            &token,
            serde_json::json!({ "message": "press the button" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "active");
    assert_eq!(body["transcript"].as_array().unwrap().len(), 2);
    assert_eq!(body["transcript"][0]["role"], "user");
    assert_eq!(body["transcript"][1]["role"], "assistant");

    // The success tool completes the challenge
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/challenges/{}/submit_message", challenge.id),
            &token,
            serde_json::json!({ "message": "I insist" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["can_contribute"], false);
    assert_eq!(body["transcript"].as_array().unwrap().len(), 4);
    assert_eq!(body["transcript"][3]["tool_called"], true);

    // Further submissions are rejected with the frozen session attached
    let response = t
        .app
        .clone()
        .oneshot(post_json(
            &format!("/api/challenges/{}/submit_message", challenge.id),
            &token,
            serde_json::json!({ "message": "again" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "challenge_already_completed");
    assert_eq!(body["session"]["status"], "succeeded");
    assert_eq!(body["session"]["transcript"].as_array().unwrap().len(), 4);

    // Context reflects the frozen state
    let response = t
        .app
        .clone()
        .oneshot(get(
            &format!("/api/challenges/{}/context", challenge.id),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["can_contribute"], false);

    // Badge award runs asynchronously after the flip
    let mut earned = 0;
    for _ in 0..100 {
        let response = t
            .app
            .clone()
            .oneshot(get("/api/badges?user_badges_only=true", Some(&token)))
            .await
            .unwrap();
        let body = body_json(response).await;
        earned = body.as_array().unwrap().len();
        if earned > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(earned, 1);

    // The profile aggregates what happened
    let response = t
        .app
        .oneshot(get("/api/users/me", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["subject"], "alice");
    assert_eq!(body["active_tournaments"].as_array().unwrap().len(), 1);
    assert_eq!(body["badges"].as_array().unwrap().len(), 1);
    // The succeeded session no longer counts as an open challenge
    assert_eq!(body["active_challenges"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_start_rate_limit() {
    let t = test_app(Vec::new()).await;
    let (tournament, challenge) = seed_catalog(&t.db).await;
    let token = create_token("greedy", None).unwrap();
    t.app
        .clone()
        .oneshot(post(&format!("/api/tournaments/{}/join", tournament.id), &token))
        .await
        .unwrap();

    for _ in 0..30 {
        let response = t
            .app
            .clone()
            .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let response = t
        .app
        .oneshot(post(&format!("/api/challenges/{}/start", challenge.id), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["code"], "rate_limited");
}

// ── Badges ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_badge_not_found() {
    let t = test_app(Vec::new()).await;
    let token = create_token("alice", None).unwrap();
    let response = t
        .app
        .oneshot(get("/api/badges/777", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
