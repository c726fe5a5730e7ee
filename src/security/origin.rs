// Origin Guard Module
// CSRF protection for mutating actions by validating the Origin header

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use super::audit::{AuditEventType, AuditLogEntry, AuditLogger, AuditOutcome};
use super::request::{request_host, request_ip, request_origin, user_agent};

/// Local development origin that is always allowed
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Runtime mode; development relaxes the origin check for loopback origins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Development,
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

/// A rejected cross-origin request.
///
/// Displays only a generic message; the fields are for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("You do not have permission to perform this action.")]
pub struct OriginRejection {
    pub action: String,
    pub origin: String,
}

impl OriginRejection {
    pub const MESSAGE: &'static str = "You do not have permission to perform this action.";
}

/// Build the allow-list from the public site URL and the platform URL.
///
/// A platform URL without a scheme is treated as `https://`.
pub fn allowed_origins(site_url: Option<&str>, platform_url: Option<&str>) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    let mut push = |origin: String| {
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    };

    if let Some(site) = site_url.map(str::trim).filter(|s| !s.is_empty()) {
        push(site.to_string());
    }
    if let Some(platform) = platform_url.map(str::trim).filter(|s| !s.is_empty()) {
        if platform.contains("://") {
            push(platform.to_string());
        } else {
            push(format!("https://{}", platform));
        }
    }
    push(DEFAULT_ALLOWED_ORIGIN.to_string());

    origins
}

fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// `host[:port]` of a URL, with default ports omitted
pub fn origin_host(origin: &str) -> Option<String> {
    host_key(&Url::parse(origin).ok()?)
}

/// Whether `origin` matches any allowed origin by host
pub fn validate_origin(origin: &str, allowed: &[String]) -> bool {
    let Some(host) = origin_host(origin) else {
        return false;
    };
    allowed
        .iter()
        .filter_map(|candidate| origin_host(candidate))
        .any(|candidate| candidate == host)
}

fn is_loopback_origin(origin: &str) -> bool {
    Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .is_some_and(|host| host == "localhost" || host == "127.0.0.1")
}

pub struct OriginGuard {
    allowed: Vec<String>,
    mode: RuntimeMode,
    audit: AuditLogger,
}

impl OriginGuard {
    pub fn new(allowed: Vec<String>, mode: RuntimeMode, audit: AuditLogger) -> Self {
        Self {
            allowed,
            mode,
            audit,
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    /// Decide without side effects
    pub fn is_allowed(&self, headers: &HeaderMap) -> bool {
        let Some(origin) = request_origin(headers) else {
            return true;
        };

        if validate_origin(origin, &self.allowed) {
            return true;
        }

        if let Some(host) = request_host(headers)
            && let Some(origin_key) = origin_host(origin)
            && matches_request_host(&origin_key, host)
        {
            return true;
        }

        self.mode.is_development() && is_loopback_origin(origin)
    }

    /// Reject cross-origin requests for a mutating action, auditing each rejection
    pub fn enforce_allowed_origin(
        &self,
        headers: &HeaderMap,
        action: &str,
    ) -> Result<(), OriginRejection> {
        if self.is_allowed(headers) {
            return Ok(());
        }

        let origin = request_origin(headers).unwrap_or_default().to_string();
        let ip_address = request_ip(headers);

        warn!(
            origin = %origin,
            action = %action,
            ip = ?ip_address,
            "Blocked request from disallowed origin"
        );

        self.audit.log(
            AuditLogEntry::new(
                AuditEventType::SecurityUnauthorizedAccess,
                format!("Blocked {} from disallowed origin", action),
                AuditOutcome::Failure,
            )
            .with_target(action)
            .with_request_context(
                ip_address.map(str::to_string),
                user_agent(headers).map(str::to_string),
            )
            .with_metadata("origin", origin.clone())
            .with_metadata("action", action),
        );

        Err(OriginRejection {
            action: action.to_string(),
            origin,
        })
    }
}

fn matches_request_host(origin_key: &str, request_host: &str) -> bool {
    Url::parse(&format!("http://{}", request_host))
        .ok()
        .and_then(|url| host_key(&url))
        .is_some_and(|host| host == origin_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::audit::MemorySink;
    use crate::security::clock::ManualClock;
    use axum::http::{HeaderName, HeaderValue};
    use std::sync::Arc;

    fn guard(mode: RuntimeMode) -> (OriginGuard, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(sink.clone(), Arc::new(ManualClock::default()));
        let allowed = allowed_origins(Some("https://app.example"), Some("preview.app.example"));
        (OriginGuard::new(allowed, mode, audit), sink)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_allowed_origins_list() {
        assert_eq!(
            allowed_origins(Some("https://app.example"), Some("preview.app.example")),
            vec![
                "https://app.example".to_string(),
                "https://preview.app.example".to_string(),
                DEFAULT_ALLOWED_ORIGIN.to_string(),
            ]
        );
        assert_eq!(
            allowed_origins(None, Some("")),
            vec![DEFAULT_ALLOWED_ORIGIN.to_string()]
        );
        assert_eq!(
            allowed_origins(Some(DEFAULT_ALLOWED_ORIGIN), None),
            vec![DEFAULT_ALLOWED_ORIGIN.to_string()]
        );
    }

    #[test]
    fn test_origin_host_normalization() {
        assert_eq!(origin_host("https://App.Example"), Some("app.example".to_string()));
        assert_eq!(origin_host("https://app.example:443"), Some("app.example".to_string()));
        assert_eq!(origin_host("http://localhost:3000"), Some("localhost:3000".to_string()));
        assert_eq!(origin_host("not a url"), None);
        assert_eq!(origin_host("null"), None);
    }

    #[test]
    fn test_validate_origin_compares_hosts_only() {
        let allowed = vec!["https://app.example".to_string()];
        assert!(validate_origin("http://app.example", &allowed));
        assert!(!validate_origin("https://app.example:8443", &allowed));
        assert!(!validate_origin("https://evil.example", &allowed));
        assert!(!validate_origin("garbage", &allowed));
    }

    #[test]
    fn test_missing_origin_is_allowed() {
        let (guard, sink) = guard(RuntimeMode::Production);
        assert!(guard.enforce_allowed_origin(&HeaderMap::new(), "update-profile").is_ok());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_allow_listed_origin() {
        let (guard, _sink) = guard(RuntimeMode::Production);
        let map = headers(&[("origin", "https://preview.app.example")]);
        assert!(guard.enforce_allowed_origin(&map, "update-profile").is_ok());
    }

    #[test]
    fn test_own_host_fallback() {
        let (guard, _sink) = guard(RuntimeMode::Production);

        let map = headers(&[
            ("origin", "https://staging.example"),
            ("x-forwarded-host", "staging.example, internal"),
            ("host", "internal:8080"),
        ]);
        assert!(guard.enforce_allowed_origin(&map, "create-post").is_ok());

        let map = headers(&[("origin", "http://10.0.0.5:8080"), ("host", "10.0.0.5:8080")]);
        assert!(guard.enforce_allowed_origin(&map, "create-post").is_ok());
    }

    #[test]
    fn test_development_loopback() {
        let map = headers(&[("origin", "http://127.0.0.1:5173")]);

        let (dev, _sink) = guard(RuntimeMode::Development);
        assert!(dev.enforce_allowed_origin(&map, "login").is_ok());

        let (prod, _sink) = guard(RuntimeMode::Production);
        assert!(prod.enforce_allowed_origin(&map, "login").is_err());
    }

    #[test]
    fn test_rejection_is_generic_and_audited_once() {
        let (guard, sink) = guard(RuntimeMode::Production);
        let map = headers(&[
            ("origin", "https://evil.example"),
            ("host", "app.example"),
            ("x-forwarded-for", "198.51.100.4"),
            ("user-agent", "evil-bot/1.0"),
        ]);

        let rejection = guard
            .enforce_allowed_origin(&map, "delete-account")
            .expect_err("cross-origin request must be rejected");

        assert_eq!(rejection.origin, "https://evil.example");
        assert_eq!(rejection.action, "delete-account");
        assert!(!rejection.to_string().contains("evil"));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.event_type, AuditEventType::SecurityUnauthorizedAccess);
        assert_eq!(record.target_id.as_deref(), Some("delete-account"));
        assert_eq!(record.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(record.user_agent.as_deref(), Some("evil-bot/1.0"));
        let metadata = record.metadata.as_ref().expect("metadata present");
        assert_eq!(metadata["origin"], "https://evil.example");
    }

    #[test]
    fn test_unparseable_origin_is_rejected() {
        let (guard, sink) = guard(RuntimeMode::Development);
        let map = headers(&[("origin", "null"), ("host", "app.example")]);
        assert!(guard.enforce_allowed_origin(&map, "login").is_err());
        assert_eq!(sink.count_of(&AuditEventType::SecurityUnauthorizedAccess), 1);
    }
}
