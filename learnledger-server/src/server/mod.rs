mod acl;
pub mod auth;
mod config;
mod judge;

use crate::server::auth::AuthCtx;
use crate::storage::{
    self, LeaderboardRow, ProgressSummary, SectionCompletionOutcome, StorageError, TrackProgress,
};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use bcrypt::verify;
pub use config::{AppConfig, ConfigError, Role, UserConfig};
use learnledger_shared::api;
use learnledger_shared::domain::{self, TransactionType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use crate::rewards::PayoutOutcome;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: storage::Store,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: storage::Store) -> Self {
        Self {
            config,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/tracks", get(api_list_tracks))
        .route("/api/tracks/{track_id}/courses", get(api_list_courses))
        .route("/api/courses/{course_id}/sections", get(api_list_sections))
        .route("/api/challenges", get(api_list_challenges))
        .route("/api/leaderboard", get(api_leaderboard))
        .route("/api/students/{id}/wallet", get(api_get_wallet))
        .route(
            "/api/students/{id}/wallet/settings",
            post(api_wallet_settings),
        )
        .route("/api/students/{id}/transactions", get(api_list_transactions))
        .route("/api/students/{id}/progress", get(api_progress))
        .route(
            "/api/students/{id}/tracks/{track_id}/enroll",
            post(api_enroll),
        )
        .route(
            "/api/students/{id}/sections/{section_id}/complete",
            post(api_complete_section),
        )
        .route(
            "/api/students/{id}/challenges/{challenge_id}/solution",
            post(api_submit_solution),
        )
        .route("/api/students/{id}/payout", post(api_request_payout))
        .route("/api/students/{id}/adjustment", post(api_adjustment))
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(middleware::from_fn(set_auth_span_fields));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            role = tracing::field::Empty,
            student_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_api_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    // Put into request extensions for trace layer & handlers
    req.extensions_mut().insert(ReqId(rid.clone()));
    // Call next
    let mut resp = next.run(req).await;
    // Set header on response
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_api_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // Disable caching for API and health endpoints
    if path == "/healthz" || path.starts_with("/api/") || path == "/api" {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(sid) = &auth.claims.student_id {
            span.record("student_id", tracing::field::display(sid));
        }
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    // Find user in config
    let user = state
        .config
        .users
        .iter()
        .find(|u| u.username == body.username)
        .ok_or_else(|| {
            tracing::warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    // For student role, ensure student_id provided
    if user.role == Role::Student && user.student_id.is_none() {
        tracing::error!(username=%body.username, "login: student user missing student_id in config");
        return Err(AppError::internal("student user missing student_id"));
    }
    let token =
        auth::issue_jwt_for_user(&state, &user.username, user.role, user.student_id.clone())
            .await?;
    Ok(Json(api::AuthResp { token }))
}

/// Student identity the catalog views compute progress flags against. Admin
/// tokens carry no student, so their catalog views show no progress.
fn viewer_student(auth: &AuthCtx) -> &str {
    auth.claims.student_id.as_deref().unwrap_or("")
}

fn pct(completed: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64) * 100.0
    }
}

async fn api_list_tracks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::TrackDto>>, AppError> {
    let rows = state
        .store
        .list_tracks_with_progress(viewer_student(&auth))
        .await
        .map_err(storage_err)?;
    let items = rows
        .into_iter()
        .map(|(p, enrolled)| api::TrackDto {
            id: p.track.id,
            name: p.track.name,
            description: p.track.description,
            is_enrolled: enrolled,
            total_sections: p.total_sections,
            completed_sections: p.completed_sections,
            progress_percent: pct(p.completed_sections, p.total_sections),
        })
        .collect();
    Ok(Json(items))
}

#[derive(Deserialize)]
struct TrackPath {
    track_id: String,
}

async fn api_list_courses(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<TrackPath>,
) -> Result<Json<Vec<api::CourseDto>>, AppError> {
    let rows = state
        .store
        .list_courses_with_progress(&p.track_id, viewer_student(&auth))
        .await
        .map_err(storage_err)?;
    let items = rows
        .into_iter()
        .map(|(course, total, completed)| api::CourseDto {
            id: course.id,
            track_id: course.track_id,
            name: course.name,
            total_sections: total,
            completed_sections: completed,
        })
        .collect();
    Ok(Json(items))
}

#[derive(Deserialize)]
struct CoursePath {
    course_id: String,
}

async fn api_list_sections(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<CoursePath>,
) -> Result<Json<Vec<api::SectionDto>>, AppError> {
    let rows = state
        .store
        .list_sections_with_completion(&p.course_id, viewer_student(&auth))
        .await
        .map_err(storage_err)?;
    let mut items = Vec::with_capacity(rows.len());
    for (section, completed) in rows {
        let kind = section.kind().map_err(storage_err)?;
        items.push(api::SectionDto {
            id: section.id,
            course_id: section.course_id,
            title: section.title,
            kind,
            estimated_minutes: section.estimated_minutes,
            is_completed: completed,
        });
    }
    Ok(Json(items))
}

async fn api_list_challenges(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::ChallengeDto>>, AppError> {
    let rows = state
        .store
        .list_challenges(viewer_student(&auth))
        .await
        .map_err(storage_err)?;
    let mut items = Vec::with_capacity(rows.len());
    for (challenge, solved) in rows {
        let difficulty = challenge.difficulty().map_err(storage_err)?;
        items.push(api::ChallengeDto {
            id: challenge.id,
            title: challenge.title,
            description: challenge.description,
            difficulty,
            is_solved: solved,
        });
    }
    Ok(Json(items))
}

async fn api_leaderboard(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
) -> Result<Json<api::LeaderboardDto>, AppError> {
    let (top_earners, most_points) = state.store.leaderboard(50).await.map_err(storage_err)?;
    let map = |rows: Vec<LeaderboardRow>| {
        rows.into_iter()
            .map(|r| api::LeaderboardEntryDto {
                student_id: r.student.id,
                display_name: r.student.display_name,
                total_points: r.total_points,
                total_earnings: r.total_earnings,
            })
            .collect()
    };
    Ok(Json(api::LeaderboardDto {
        top_earners: map(top_earners),
        most_points: map(most_points),
    }))
}

#[derive(Deserialize)]
struct StudentPath {
    id: String,
}

#[derive(Deserialize)]
struct StudentTrackPath {
    id: String,
    track_id: String,
}

#[derive(Deserialize)]
struct StudentSectionPath {
    id: String,
    section_id: String,
}

#[derive(Deserialize)]
struct StudentChallengePath {
    id: String,
    challenge_id: String,
}

async fn require_student_record(state: &AppState, student: &str) -> Result<(), AppError> {
    let exists = state
        .store
        .student_exists(student)
        .await
        .map_err(storage_err)?;
    if exists {
        Ok(())
    } else {
        Err(AppError::not_found(format!("student not found: {student}")))
    }
}

async fn api_enroll(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentTrackPath>,
) -> Result<Json<api::EnrollResp>, AppError> {
    require_student_record(&state, &p.id).await?;
    let newly_enrolled = state
        .store
        .enroll(&p.id, &p.track_id)
        .await
        .map_err(storage_err)?;
    Ok(Json(api::EnrollResp {
        track_id: p.track_id,
        newly_enrolled,
    }))
}

async fn api_complete_section(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentSectionPath>,
) -> Result<Json<api::CompleteSectionResp>, AppError> {
    require_student_record(&state, &p.id).await?;
    let outcome = state
        .store
        .complete_section(&p.id, &p.section_id)
        .await
        .map_err(storage_err)?;
    let resp = match outcome {
        SectionCompletionOutcome::Created {
            award,
            track_id,
            track_bonus,
        } => api::CompleteSectionResp {
            created: true,
            points_earned: award.points,
            cash_value: award.cash_value,
            track_bonus: track_bonus.map(|b| api::TrackBonusDto {
                track_id,
                points_earned: b.points,
                cash_value: b.cash_value,
            }),
        },
        SectionCompletionOutcome::AlreadyCompleted => api::CompleteSectionResp {
            created: false,
            points_earned: 0,
            cash_value: Decimal::ZERO,
            track_bonus: None,
        },
    };
    Ok(Json(resp))
}

async fn api_submit_solution(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentChallengePath>,
    Json(body): Json<api::SubmitSolutionReq>,
) -> Result<Json<api::SubmitSolutionResp>, AppError> {
    require_student_record(&state, &p.id).await?;
    let challenge = state
        .store
        .get_challenge(&p.challenge_id)
        .await
        .map_err(storage_err)?
        .ok_or_else(|| AppError::not_found(format!("challenge not found: {}", p.challenge_id)))?;

    let correct = judge::evaluate(&challenge.title, &body.code);
    let award = state
        .store
        .submit_solution(&p.id, &challenge.id, &body.code, correct)
        .await
        .map_err(storage_err)?;

    let resp = match award {
        Some(award) => api::SubmitSolutionResp {
            correct,
            first_solve: true,
            points_earned: award.points,
            cash_value: award.cash_value,
        },
        None => api::SubmitSolutionResp {
            correct,
            first_solve: false,
            points_earned: 0,
            cash_value: Decimal::ZERO,
        },
    };
    Ok(Json(resp))
}

fn wallet_dto(wallet: domain::Wallet) -> api::WalletDto {
    api::WalletDto {
        student_id: wallet.student_id.to_string(),
        learning_points: wallet.learning_points,
        challenge_points: wallet.challenge_points,
        bonus_points: wallet.bonus_points,
        total_points: wallet.total_points(),
        can_request_payout: wallet.can_request_payout(),
        total_earnings: wallet.total_earnings,
        pending_payout: wallet.pending_payout,
        lifetime_earnings: wallet.lifetime_earnings,
        payout_threshold: wallet.payout_threshold,
        payout_email: wallet.payout_email,
    }
}

async fn api_get_wallet(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentPath>,
) -> Result<Json<api::WalletDto>, AppError> {
    require_student_record(&state, &p.id).await?;
    let wallet = state.store.get_wallet(&p.id).await.map_err(storage_err)?;
    Ok(Json(wallet_dto(wallet)))
}

async fn api_wallet_settings(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentPath>,
    Json(body): Json<api::WalletSettingsReq>,
) -> Result<Json<api::WalletDto>, AppError> {
    require_student_record(&state, &p.id).await?;
    let wallet = state
        .store
        .update_wallet_settings(&p.id, body.payout_email, body.payout_threshold)
        .await
        .map_err(storage_err)?;
    Ok(Json(wallet_dto(wallet)))
}

#[derive(Deserialize)]
struct PageOpts {
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn api_list_transactions(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentPath>,
    Query(opts): Query<PageOpts>,
) -> Result<Json<Vec<api::TransactionDto>>, AppError> {
    require_student_record(&state, &p.id).await?;
    let page = opts.page.unwrap_or(1);
    let per_page = opts.per_page.unwrap_or(20);
    let rows = state
        .store
        .list_transactions(&p.id, page, per_page)
        .await
        .map_err(storage_err)?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(transaction_dto(row)?);
    }
    Ok(Json(items))
}

fn transaction_dto(row: storage::models::Transaction) -> Result<api::TransactionDto, AppError> {
    let transaction_type: TransactionType = row
        .transaction_type
        .parse()
        .map_err(AppError::internal)?;
    let cash_value: Decimal = row
        .cash_value
        .parse()
        .map_err(|e| AppError::internal(format!("bad cash value {:?}: {e}", row.cash_value)))?;
    Ok(api::TransactionDto {
        id: row.id,
        transaction_type,
        points_earned: row.points_earned,
        cash_value,
        related_section_id: row.related_section_id,
        related_challenge_id: row.related_challenge_id,
        related_track_id: row.related_track_id,
        description: row.description,
        created_at: chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(
            row.created_at,
            chrono::Utc,
        )
        .to_rfc3339(),
        is_processed: row.is_processed,
    })
}

async fn api_progress(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentPath>,
) -> Result<Json<api::ProgressDto>, AppError> {
    require_student_record(&state, &p.id).await?;
    let ProgressSummary {
        sections_completed,
        current_streak,
        tracks,
    } = state.store.progress(&p.id).await.map_err(storage_err)?;
    let track_dtos: Vec<api::TrackProgressDto> = tracks
        .iter()
        .map(|t: &TrackProgress| api::TrackProgressDto {
            track_id: t.track.id.clone(),
            name: t.track.name.clone(),
            progress_percent: pct(t.completed_sections, t.total_sections),
        })
        .collect();
    let overall_progress = if track_dtos.is_empty() {
        0.0
    } else {
        track_dtos.iter().map(|t| t.progress_percent).sum::<f64>() / track_dtos.len() as f64
    };
    Ok(Json(api::ProgressDto {
        student_id: p.id,
        sections_completed,
        current_streak,
        overall_progress,
        tracks: track_dtos,
    }))
}

async fn api_request_payout(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<StudentPath>,
) -> Result<Json<api::PayoutResp>, AppError> {
    require_student_record(&state, &p.id).await?;
    match state.store.request_payout(&p.id).await.map_err(storage_err)? {
        PayoutOutcome::Requested { amount, pending } => Ok(Json(api::PayoutResp {
            amount,
            pending_payout: pending,
        })),
        PayoutOutcome::BelowThreshold { total, threshold } => Err(AppError::bad_request(format!(
            "earnings {total} below payout threshold {threshold}"
        ))),
    }
}

async fn api_adjustment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<StudentPath>,
    Json(body): Json<api::AdjustmentReq>,
) -> Result<StatusCode, AppError> {
    require_student_record(&state, &p.id).await?;
    if body.description.trim().is_empty() {
        return Err(AppError::bad_request("description required"));
    }
    tracing::info!(
        admin = %auth.claims.sub,
        student = %p.id,
        bucket = %body.bucket,
        points = body.points,
        "manual adjustment"
    );
    state
        .store
        .manual_adjustment(
            &p.id,
            body.bucket,
            body.points,
            body.cash_value.unwrap_or(Decimal::ZERO),
            &body.description,
        )
        .await
        .map_err(storage_err)?;
    Ok(StatusCode::NO_CONTENT)
}

fn storage_err(e: StorageError) -> AppError {
    match e {
        StorageError::NotFound(msg) => AppError::not_found(msg),
        StorageError::InvalidInput(msg) => AppError::bad_request(msg),
        other => AppError::internal(other),
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        // Log any error responses at ERROR level for troubleshooting
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
