use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::governance::{Denial, Governance};
use crate::security::request::request_ip;

/// Identifier used for API quotas when no client IP can be determined
pub const ANONYMOUS_CLIENT: &str = "anonymous";

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, retry_after) = match self {
            Denial::Forbidden => (StatusCode::FORBIDDEN, None),
            Denial::RateLimited {
                retry_after_seconds,
            } => (StatusCode::TOO_MANY_REQUESTS, Some(retry_after_seconds)),
            Denial::LockedOut { remaining_minutes } => (
                StatusCode::TOO_MANY_REQUESTS,
                Some(remaining_minutes.saturating_mul(60)),
            ),
            Denial::InvalidInput(_) => (StatusCode::BAD_REQUEST, None),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Rejects mutating requests whose Origin is not allowed.
///
/// Must be the outer layer around [`api_rate_limit_middleware`] so rejected
/// requests never reach the quota.
pub async fn origin_guard_middleware(
    State(governance): State<Arc<Governance>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method().is_safe() {
        return next.run(request).await;
    }

    let action = format!("{} {}", request.method(), request.uri().path());
    if governance
        .origin_guard()
        .enforce_allowed_origin(request.headers(), &action)
        .is_err()
    {
        return Denial::Forbidden.into_response();
    }

    next.run(request).await
}

/// Applies the API preset per client IP and adds quota headers to every response
pub async fn api_rate_limit_middleware(
    State(governance): State<Arc<Governance>>,
    request: Request,
    next: Next,
) -> Response {
    let ip_address = request_ip(request.headers()).map(str::to_string);
    let identifier = ip_address.as_deref().unwrap_or(ANONYMOUS_CLIENT).to_string();
    let quota = governance.rate_limiter().api(&identifier);

    if !quota.allowed {
        governance
            .audit()
            .rate_limited(&identifier, request.uri().path(), ip_address.as_deref());
        let mut response = Denial::RateLimited {
            retry_after_seconds: quota.retry_after_seconds,
        }
        .into_response();
        response.headers_mut().extend(quota.headers());
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(quota.headers());
    debug!(
        client = %identifier,
        remaining = quota.remaining,
        "API quota checked"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::security::audit::{AuditEventType, MemorySink};
    use crate::security::clock::ManualClock;
    use crate::security::rate_limiting::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
    use axum::{
        Router,
        body::Body,
        http::{self, Method},
        middleware::from_fn_with_state,
        routing::post,
    };
    use tower::ServiceExt;

    fn app(config: GovernanceConfig) -> (Router, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let governance = Arc::new(Governance::with_parts(
            config,
            sink.clone(),
            Arc::new(ManualClock::default()),
        ));

        let router = Router::new()
            .route("/api/items", post(|| async { "created" }).get(|| async { "listed" }))
            .layer(from_fn_with_state(governance.clone(), api_rate_limit_middleware))
            .layer(from_fn_with_state(governance, origin_guard_middleware));
        (router, sink)
    }

    fn request(method: Method, origin: Option<&str>) -> Request {
        let mut builder = http::Request::builder()
            .method(method)
            .uri("/api/items")
            .header("x-forwarded-for", "203.0.113.20");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).expect("valid request")
    }

    #[tokio::test]
    async fn test_cross_origin_post_is_forbidden() {
        let (app, sink) = app(GovernanceConfig::default());

        let response = app
            .oneshot(request(Method::POST, Some("https://evil.example")))
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(
            body["error"],
            "You do not have permission to perform this action."
        );
        assert_eq!(sink.count_of(&AuditEventType::SecurityUnauthorizedAccess), 1);
    }

    #[tokio::test]
    async fn test_cross_origin_get_passes() {
        let (app, sink) = app(GovernanceConfig::default());

        let response = app
            .oneshot(request(Method::GET, Some("https://evil.example")))
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_quota_headers_and_denial() {
        let mut config = GovernanceConfig::default();
        config.rate_limits.api.limit = 2;
        let (app, sink) = app(config);

        let first = app
            .clone()
            .oneshot(request(Method::POST, Some("http://localhost:3000")))
            .await
            .expect("infallible");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[&X_RATELIMIT_LIMIT], "2");
        assert_eq!(first.headers()[&X_RATELIMIT_REMAINING], "1");

        let _second = app
            .clone()
            .oneshot(request(Method::GET, None))
            .await
            .expect("infallible");

        let third = app
            .oneshot(request(Method::POST, None))
            .await
            .expect("infallible");
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third.headers()[header::RETRY_AFTER], "60");
        assert_eq!(third.headers()[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(sink.count_of(&AuditEventType::AuthRateLimited), 1);
    }

    #[tokio::test]
    async fn test_rejected_origin_does_not_spend_quota() {
        let mut config = GovernanceConfig::default();
        config.rate_limits.api.limit = 2;
        let (app, _sink) = app(config);

        for _ in 0..2 {
            let rejected = app
                .clone()
                .oneshot(request(Method::POST, Some("https://evil.example")))
                .await
                .expect("infallible");
            assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
            assert!(rejected.headers().get(&X_RATELIMIT_REMAINING).is_none());
        }

        let own = app
            .oneshot(request(Method::POST, Some("http://localhost:3000")))
            .await
            .expect("infallible");
        assert_eq!(own.status(), StatusCode::OK);
        assert_eq!(own.headers()[&X_RATELIMIT_REMAINING], "1");
    }

    #[test]
    fn test_lockout_denial_response() {
        let response = Denial::LockedOut {
            remaining_minutes: 5,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "300");
    }
}
