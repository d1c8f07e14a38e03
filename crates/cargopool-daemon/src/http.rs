//! HTTP surface.
//!
//! Three public routes and one administrative route, all thin: parse, hand
//! to the engine, map the result. Every business decision lives in
//! `cargopool-core`; this module only owns the wire.
//!
//! Error responses never leak internals. Client-fixable failures carry the
//! offending field and a message; storage failures are an opaque 500 with
//! the cause in the log only.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use cargopool_core::intake::{admin_update, AdminUpdateError, IntakeError, IntakePipeline};
use cargopool_core::pledge::{AdminPledgeUpdate, PledgeId, PledgeStatus};
use cargopool_core::quote::Quote;
use cargopool_core::submission::{RawQuoteRequest, RawSubmission};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::store::SqliteStore;

/// Header carrying the shared administrative token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The intake engine.
    pub pipeline: Arc<IntakePipeline>,
    /// Store handle for the administrative route.
    pub store: Arc<SqliteStore>,
    /// Shared administrative token; `None` disables the admin routes.
    pub admin_token: Option<String>,
}

/// Builds the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/pledges", post(submit_pledge))
        .route("/api/quotes", post(quote_preview))
        .route("/api/admin/pledges/{id}", patch(admin_update_pledge))
        .with_state(state)
}

/// Resolves the client address for rate limiting: the first
/// `x-forwarded-for` hop when a reverse proxy supplied one, the peer
/// address otherwise.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

/// API failure with an HTTP mapping.
#[derive(Debug)]
pub enum ApiError {
    /// Engine-reported intake failure.
    Intake(IntakeError),
    /// Engine-reported administrative failure.
    Admin(AdminUpdateError),
    /// Administrative routes are not configured; hidden as 404.
    AdminDisabled,
    /// Missing or wrong administrative token.
    Unauthorized,
    /// Malformed request outside the engine's vocabulary.
    BadRequest(String),
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        Self::Intake(err)
    }
}

impl From<AdminUpdateError> for ApiError {
    fn from(err: AdminUpdateError) -> Self {
        Self::Admin(err)
    }
}

impl ApiError {
    /// HTTP status for this failure.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Intake(err) => match err {
                IntakeError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
                IntakeError::InvalidSubmission { .. } | IntakeError::InvalidCargoSpec { .. } => {
                    StatusCode::BAD_REQUEST
                },
                IntakeError::PoolNotAcceptingPledges | IntakeError::DuplicatePledge => {
                    StatusCode::CONFLICT
                },
                IntakeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Admin(err) => match err {
                AdminUpdateError::NotFound => StatusCode::NOT_FOUND,
                AdminUpdateError::InvalidTransition { .. } => StatusCode::CONFLICT,
                AdminUpdateError::EmptyUpdate => StatusCode::BAD_REQUEST,
                AdminUpdateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::AdminDisabled => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Self::Intake(IntakeError::InvalidSubmission { field, message }) => {
                json!({ "error": { "field": field, "message": message } })
            },
            Self::Intake(IntakeError::Storage(_)) | Self::Admin(AdminUpdateError::Storage(_)) => {
                // Cause is logged server-side; callers get nothing to chew on.
                json!({ "error": { "message": "internal error" } })
            },
            Self::AdminDisabled => json!({ "error": { "message": "not found" } }),
            Self::Intake(err) => json!({ "error": { "message": err.to_string() } }),
            Self::Admin(err) => json!({ "error": { "message": err.to_string() } }),
            Self::Unauthorized => json!({ "error": { "message": "unauthorized" } }),
            Self::BadRequest(message) => json!({ "error": { "message": message } }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn submit_pledge(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(raw): Json<RawSubmission>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let client = client_ip(&headers, peer);
    let id = state.pipeline.submit(&raw, client).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn quote_preview(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(raw): Json<RawQuoteRequest>,
) -> Result<Json<Quote>, ApiError> {
    let client = client_ip(&headers, peer);
    let quote = state.pipeline.preview(&raw, client)?;
    Ok(Json(quote))
}

/// Administrative update body.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateBody {
    /// New status tag, if changing.
    pub status: Option<String>,
    /// New internal-cargo flag, if changing.
    pub is_internal_cargo: Option<bool>,
}

impl AdminUpdateBody {
    /// Resolves the wire body to the engine's update type.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] for an unknown status tag.
    pub fn to_update(&self) -> Result<AdminPledgeUpdate, ApiError> {
        let status = match self.status.as_deref() {
            None => None,
            Some(tag) => Some(PledgeStatus::from_tag(tag).ok_or_else(|| {
                ApiError::BadRequest(format!("unknown pledge status '{tag}'"))
            })?),
        };
        Ok(AdminPledgeUpdate {
            status,
            is_internal_cargo: self.is_internal_cargo,
        })
    }
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state.admin_token.as_deref().ok_or(ApiError::AdminDisabled)?;
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if presented != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

async fn admin_update_pledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<AdminUpdateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;
    let update = body.to_update()?;
    admin_update(state.store.as_ref(), PledgeId(id), &update).await?;
    Ok(Json(json!({ "ok": true })))
}
