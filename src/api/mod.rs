// HTTP API routes (tournaments, challenges, badges, session flow).

use axum::{
    body::Body,
    extract::{Json, Path, Query, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::AuthUser;
use crate::db::{Challenge, Database, SelectionFilter};
use crate::metrics;
use crate::rate_limit::{RateLimitType, RateLimiter};
use crate::session::{SessionController, SessionError};

const DEFAULT_PAGE_COUNT: i64 = 20;
const MAX_PAGE_COUNT: i64 = 100;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitMessageRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct TournamentListParams {
    pub selection_filter: Option<String>,
    pub page_index: Option<i64>,
    pub count: Option<i64>,
}

#[derive(Deserialize)]
pub struct ChallengeListParams {
    pub tournament_id: Option<i64>,
    pub page_index: Option<i64>,
    pub count: Option<i64>,
}

#[derive(Deserialize)]
pub struct BadgeListParams {
    pub user_badges_only: Option<bool>,
    pub page_index: Option<i64>,
    pub count: Option<i64>,
}

// ── Response types ────────────────────────────────────────────────────

/// Public challenge representation. The success tool and the provisioning
/// tool list stay server-side so the win condition is never advertised.
#[derive(Serialize)]
pub struct ChallengeView {
    pub id: i64,
    pub tournament_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
}

impl From<Challenge> for ChallengeView {
    fn from(c: Challenge) -> Self {
        Self {
            id: c.id,
            tournament_id: c.tournament_id,
            name: c.name,
            description: c.description,
            created_at: c.created_at,
        }
    }
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: SessionController,
    pub rate_limiter: RateLimiter,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, code: &str, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg, "code": code })))
}

fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    tracing::error!("Database error: {e}");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal server error",
    )
}

/// Map controller errors onto the HTTP surface. `AlreadyCompleted` embeds
/// the final session view so a rejected client can render the frozen
/// transcript without a second request.
async fn session_error_response(
    state: &AppState,
    user_id: i64,
    challenge_id: i64,
    err: SessionError,
) -> Response {
    match err {
        SessionError::ChallengeNotFound => json_error(
            StatusCode::NOT_FOUND,
            "challenge_not_found",
            "Challenge not found",
        )
        .into_response(),
        SessionError::NotEnrolled => json_error(
            StatusCode::FORBIDDEN,
            "not_enrolled",
            "You are not enrolled in this challenge's tournament",
        )
        .into_response(),
        SessionError::SessionNotFound => json_error(
            StatusCode::NOT_FOUND,
            "session_not_found",
            "Challenge has not been started",
        )
        .into_response(),
        SessionError::AlreadyCompleted => {
            let body = match state.sessions.context(user_id, challenge_id).await {
                Ok(view) => json!({
                    "error": "Challenge already completed",
                    "code": "challenge_already_completed",
                    "session": view,
                }),
                Err(e) => {
                    tracing::error!("Failed to load completed session view: {e}");
                    json!({
                        "error": "Challenge already completed",
                        "code": "challenge_already_completed",
                    })
                }
            };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        SessionError::SessionBusy => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "1")],
            Json(json!({
                "error": "Another submission for this challenge is in progress",
                "code": "session_busy",
            })),
        )
            .into_response(),
        SessionError::EmptyMessage => json_error(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "message must not be empty",
        )
        .into_response(),
        SessionError::ProvisioningFailed(msg) => {
            tracing::error!("Agent provisioning failed for challenge {challenge_id}: {msg}");
            json_error(
                StatusCode::BAD_GATEWAY,
                "agent_provisioning_failed",
                "Could not provision the challenge agent",
            )
            .into_response()
        }
        SessionError::AgentUnavailable(msg) => {
            tracing::error!("Agent communication failed for challenge {challenge_id}: {msg}");
            json_error(
                StatusCode::BAD_GATEWAY,
                "agent_communication_failed",
                "The challenge agent could not be reached, please retry",
            )
            .into_response()
        }
        SessionError::AgentMissing => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "agent_not_found",
            "The challenge agent no longer exists",
        )
        .into_response(),
        SessionError::Database(e) => internal_error(e).into_response(),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(
    db: Arc<Database>,
    sessions: SessionController,
    rate_limiter: RateLimiter,
) -> Router {
    let state = AppState {
        db,
        sessions,
        rate_limiter,
    };

    Router::new()
        // Tournaments
        .route("/api/tournaments", get(list_tournaments))
        .route("/api/tournaments/{id}", get(get_tournament))
        .route("/api/tournaments/{id}/join", post(join_tournament))
        // Challenges
        .route("/api/challenges", get(list_challenges))
        .route("/api/challenges/{id}", get(get_challenge))
        .route("/api/challenges/{id}/start", post(start_challenge))
        .route("/api/challenges/{id}/submit_message", post(submit_message))
        .route("/api/challenges/{id}/context", get(get_context))
        // Badges
        .route("/api/badges", get(list_badges))
        .route("/api/badges/{id}", get(get_badge))
        // Current user
        .route("/api/users/me", get(me))
        // Documentation
        .route("/llms.txt", get(get_llms_txt))
        .with_state(state)
}

// ── Metrics middleware ────────────────────────────────────────────────

pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let endpoint = metrics::normalize_path(req.uri().path());
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &endpoint, &status])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&endpoint])
        .observe(start.elapsed().as_secs_f64());
    response
}

// ── Pagination helpers ────────────────────────────────────────────────

fn page_params(page_index: Option<i64>, count: Option<i64>) -> (i64, i64) {
    let page_index = page_index.unwrap_or(0).max(0);
    let count = count.unwrap_or(DEFAULT_PAGE_COUNT).clamp(1, MAX_PAGE_COUNT);
    (page_index, count)
}

fn parse_selection_filter(raw: Option<&str>) -> Option<SelectionFilter> {
    match raw.unwrap_or("active_only") {
        "past_only" => Some(SelectionFilter::PastOnly),
        "active_only" => Some(SelectionFilter::ActiveOnly),
        "future_only" => Some(SelectionFilter::FutureOnly),
        "past_and_active" => Some(SelectionFilter::PastAndActive),
        "active_and_future" => Some(SelectionFilter::ActiveAndFuture),
        _ => None,
    }
}

// ── Tournament handlers ───────────────────────────────────────────────

async fn list_tournaments(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(params): Query<TournamentListParams>,
) -> impl IntoResponse {
    let filter = match parse_selection_filter(params.selection_filter.as_deref()) {
        Some(f) => f,
        None => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_filter",
                "Unknown selection_filter",
            )
            .into_response()
        }
    };
    let (page_index, count) = page_params(params.page_index, params.count);
    match state.db.list_tournaments(filter, page_index, count).await {
        Ok(tournaments) => (StatusCode::OK, Json(json!(tournaments))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_tournament(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.db.get_tournament(id).await {
        Ok(Some(tournament)) => (StatusCode::OK, Json(json!(tournament))).into_response(),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            "tournament_not_found",
            "Tournament not found",
        )
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn join_tournament(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let tournament = match state.db.get_tournament(id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            return json_error(
                StatusCode::NOT_FOUND,
                "tournament_not_found",
                "Tournament not found",
            )
            .into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    };

    // Joining is only open while the tournament window is running
    let now = chrono::Utc::now().timestamp();
    if !tournament.is_running(now) {
        return json_error(
            StatusCode::CONFLICT,
            "tournament_closed",
            "Tournament is not currently running",
        )
        .into_response();
    }

    match state.db.enroll_user(auth.user_id, id).await {
        Ok(newly_enrolled) => {
            if newly_enrolled {
                tracing::info!("User {} joined tournament {}", auth.user_id, id);
            }
            (
                StatusCode::OK,
                Json(json!({
                    "tournament_id": id,
                    "enrolled": true,
                    "newly_enrolled": newly_enrolled,
                })),
            )
                .into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Challenge handlers ────────────────────────────────────────────────

async fn list_challenges(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(params): Query<ChallengeListParams>,
) -> impl IntoResponse {
    let (page_index, count) = page_params(params.page_index, params.count);
    match state
        .db
        .list_challenges(params.tournament_id, page_index, count)
        .await
    {
        Ok(challenges) => {
            let views: Vec<ChallengeView> =
                challenges.into_iter().map(ChallengeView::from).collect();
            (StatusCode::OK, Json(json!(views))).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_challenge(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.db.get_challenge(id).await {
        Ok(Some(challenge)) => {
            (StatusCode::OK, Json(json!(ChallengeView::from(challenge)))).into_response()
        }
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            "challenge_not_found",
            "Challenge not found",
        )
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn start_challenge(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.user_id, RateLimitType::ChallengeStarts)
    {
        return json_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", &e.to_string())
            .into_response();
    }

    match state.sessions.start(auth.user_id, id).await {
        Ok((view, created)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(json!(view))).into_response()
        }
        Err(e) => session_error_response(&state, auth.user_id, id, e).await,
    }
}

async fn submit_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SubmitMessageRequest>,
) -> impl IntoResponse {
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.user_id, RateLimitType::MessageSubmissions)
    {
        return json_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", &e.to_string())
            .into_response();
    }

    match state
        .sessions
        .submit_message(auth.user_id, id, &req.message)
        .await
    {
        Ok(view) => (StatusCode::OK, Json(json!(view))).into_response(),
        Err(e) => session_error_response(&state, auth.user_id, id, e).await,
    }
}

async fn get_context(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.sessions.context(auth.user_id, id).await {
        Ok(view) => (StatusCode::OK, Json(json!(view))).into_response(),
        Err(e) => session_error_response(&state, auth.user_id, id, e).await,
    }
}

// ── Badge handlers ────────────────────────────────────────────────────

async fn list_badges(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<BadgeListParams>,
) -> impl IntoResponse {
    let (page_index, count) = page_params(params.page_index, params.count);
    let result = if params.user_badges_only.unwrap_or(false) {
        state.db.earned_badges(auth.user_id, page_index, count).await
    } else {
        state.db.list_badges(page_index, count).await
    };
    match result {
        Ok(badges) => (StatusCode::OK, Json(json!(badges))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_badge(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.db.get_badge(id).await {
        Ok(Some(badge)) => (StatusCode::OK, Json(json!(badge))).into_response(),
        Ok(None) => {
            json_error(StatusCode::NOT_FOUND, "badge_not_found", "Badge not found").into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Current-user handler ──────────────────────────────────────────────

async fn me(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    let tournaments = match state.db.active_tournaments_for_user(auth.user_id).await {
        Ok(t) => t,
        Err(e) => return internal_error(e).into_response(),
    };
    let challenges = match state.db.active_challenges_for_user(auth.user_id).await {
        Ok(c) => c,
        Err(e) => return internal_error(e).into_response(),
    };
    let badges = match state.db.earned_badges(auth.user_id, 0, MAX_PAGE_COUNT).await {
        Ok(b) => b,
        Err(e) => return internal_error(e).into_response(),
    };

    let challenges: Vec<ChallengeView> = challenges.into_iter().map(ChallengeView::from).collect();
    (
        StatusCode::OK,
        Json(json!({
            "id": auth.user_id,
            "subject": auth.subject,
            "active_tournaments": tournaments,
            "active_challenges": challenges,
            "badges": badges,
        })),
    )
        .into_response()
}

// ── Documentation handlers ────────────────────────────────────────────

async fn get_llms_txt() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        crate::llms_txt::LLMS_TXT,
    )
        .into_response()
}
