#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use chrono::{DateTime, Utc};
use sharehouse_guard::security::{ManualClock, MemorySink};
use sharehouse_guard::server::{AppState, StaticCredentials, router};
use sharehouse_guard::{Governance, GovernanceConfig};
use std::sync::Arc;

pub const RESIDENT_EMAIL: &str = "resident@example.com";
pub const RESIDENT_PASSWORD: &str = "correct horse battery";
pub const RESIDENT_ID: &str = "user-1";
pub const CRON_SECRET: &str = "nightly-digest-0123456789";

/// Governance wired to a manual clock and a capturing audit sink
pub struct TestContext {
    pub governance: Arc<Governance>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MemorySink>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GovernanceConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let sink = Arc::new(MemorySink::new());
        let governance = Arc::new(Governance::with_parts(config, sink.clone(), clock.clone()));
        Self {
            governance,
            clock,
            sink,
        }
    }

    /// Router over this context's governance with one known resident account
    pub fn app(&self) -> Router {
        let credentials = StaticCredentials::new().with_account(
            RESIDENT_EMAIL,
            RESIDENT_PASSWORD,
            RESIDENT_ID,
        );
        router(AppState {
            governance: self.governance.clone(),
            verifier: Arc::new(credentials),
        })
    }
}

/// Configuration used across integration tests
pub fn test_config() -> GovernanceConfig {
    GovernanceConfig {
        site_url: Some("https://app.example".to_string()),
        cron_secret: Some(CRON_SECRET.to_string()),
        ..Default::default()
    }
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-04-01T09:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for &(name, value) in pairs {
        map.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    map
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.50")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("json body")
}
