// HTTP Surface
// Demo routes showing the governance flows behind axum

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GovernanceConfig;
use crate::governance::{Denial, Governance, LoginOutcome};
use crate::middleware::{ANONYMOUS_CLIENT, api_rate_limit_middleware, origin_guard_middleware};
use crate::security::rate_limiting::RateLimitPreset;
use crate::security::request::request_ip;
use crate::security::timing::timing_safe_equal;
use crate::security::validation::sanitize_for_storage;

/// Credential check performed between `begin_login` and `finish_login`
pub trait CredentialVerifier: Send + Sync {
    /// Returns the user id when the credentials are valid
    fn verify(&self, email: &str, password: &str) -> Option<String>;
}

/// Fixed set of accounts, keyed by normalized email
#[derive(Default)]
pub struct StaticCredentials {
    accounts: HashMap<String, (String, String)>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(
        mut self,
        email: &str,
        password: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        self.accounts.insert(
            email.trim().to_lowercase(),
            (password.into(), user_id.into()),
        );
        self
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, email: &str, password: &str) -> Option<String> {
        let (expected, user_id) = self.accounts.get(&email.trim().to_lowercase())?;
        timing_safe_equal(password, expected).then(|| user_id.clone())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub governance: Arc<Governance>,
    pub verifier: Arc<dyn CredentialVerifier>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Response {
    let attempt = match state.governance.begin_login(&headers, &body.email) {
        Ok(attempt) => attempt,
        Err(denial) => return denial.into_response(),
    };

    match state.verifier.verify(attempt.email(), &body.password) {
        Some(user_id) => {
            state.governance.finish_login(
                attempt,
                LoginOutcome::Success {
                    user_id: user_id.clone(),
                },
            );
            (StatusCode::OK, Json(json!({ "userId": user_id }))).into_response()
        }
        None => {
            let status = state.governance.finish_login(
                attempt,
                LoginOutcome::Failure {
                    reason: "invalid credentials".to_string(),
                },
            );
            if status.is_locked {
                return Denial::LockedOut {
                    remaining_minutes: status.remaining_minutes,
                }
                .into_response();
            }
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid email or password." })),
            )
                .into_response()
        }
    }
}

async fn scheduled_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.governance.authorize_scheduled_job(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    info!(job = %job, "Scheduled job accepted");
    (StatusCode::ACCEPTED, Json(json!({ "job": job }))).into_response()
}

/// Optional body of a mutating action
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub target_id: Option<String>,
    pub note: Option<String>,
}

async fn mutate(
    State(state): State<AppState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ip_address = request_ip(&headers);
    let identifier = ip_address.unwrap_or(ANONYMOUS_CLIENT);
    let quota = match state
        .governance
        .guard_action(&headers, &action, identifier, RateLimitPreset::Api)
    {
        Ok(quota) => quota,
        Err(denial) => return denial.into_response(),
    };

    let request: ActionRequest = if body.is_empty() {
        ActionRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Malformed request body." })),
                )
                    .into_response();
            }
        }
    };

    let validator = state.governance.validator();
    if let Some(target_id) = request.target_id.as_deref()
        && let Err(error) = validator.validate_id(target_id, "targetId", ip_address)
    {
        return Denial::from(error).into_response();
    }
    let note = match request.note.as_deref() {
        Some(note) => match validator.validate_no_injection(note, "note", ip_address) {
            Ok(note) => Some(sanitize_for_storage(note)),
            Err(error) => return Denial::from(error).into_response(),
        },
        None => None,
    };

    let mut response = Json(json!({
        "action": action,
        "targetId": request.target_id,
        "note": note,
        "remaining": quota.remaining,
    }))
    .into_response();
    response.headers_mut().extend(quota.headers());
    response
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "pong": true }))
}

/// Router with login, scheduled-job and rate-limited API routes.
///
/// `/api/actions/{action}` is metered per action by the handler; the rest of
/// `/api` shares the per-IP quota, with the origin guard as the outer layer.
pub fn router(state: AppState) -> Router {
    let governance = state.governance.clone();

    let api = Router::new()
        .route("/api/ping", get(ping).post(ping))
        .layer(from_fn_with_state(governance.clone(), api_rate_limit_middleware))
        .layer(from_fn_with_state(governance, origin_guard_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/cron/{job}", post(scheduled_job))
        .route("/api/actions/{action}", post(mutate))
        .merge(api)
        .with_state(state)
}

/// Bind and serve until ctrl-c
pub async fn serve(config: &GovernanceConfig, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!(address = %listener.local_addr()?, "Server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        let credentials = StaticCredentials::new().with_account(
            "Resident@Example.com",
            "correct horse",
            "user-42",
        );

        assert_eq!(
            credentials.verify("resident@example.com", "correct horse"),
            Some("user-42".to_string())
        );
        assert_eq!(credentials.verify("resident@example.com", "wrong"), None);
        assert_eq!(credentials.verify("nobody@example.com", "correct horse"), None);
    }
}
