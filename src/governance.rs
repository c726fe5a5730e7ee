// Request Governance
// Wires origin guard, rate limiter, lockout and audit log into the request flows

use axum::http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::GovernanceConfig;
use crate::security::audit::{
    AuditEventType, AuditLogEntry, AuditLogger, AuditOutcome, AuditSink, TracingSink,
};
use crate::security::clock::{Clock, SystemClock};
use crate::security::lockout::{AccountLockout, LockoutStatus, format_lockout_error};
use crate::security::masking::mask_email;
use crate::security::origin::{OriginGuard, OriginRejection};
use crate::security::rate_limiting::{
    RateLimitPreset, RateLimitResult, RateLimiter, format_rate_limit_error,
};
use crate::security::request::{request_ip, user_agent};
use crate::security::timing::validate_cron_secret;
use crate::security::validation::{InputValidator, ValidationError};

/// Why a request was turned away. `Display` is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Forbidden,
    RateLimited { retry_after_seconds: u64 },
    LockedOut { remaining_minutes: u64 },
    InvalidInput(ValidationError),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Forbidden => write!(f, "{}", OriginRejection::MESSAGE),
            Denial::RateLimited {
                retry_after_seconds,
            } => write!(f, "{}", format_rate_limit_error(*retry_after_seconds)),
            Denial::LockedOut { remaining_minutes } => {
                write!(f, "{}", format_lockout_error(*remaining_minutes))
            }
            Denial::InvalidInput(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for Denial {}

impl From<ValidationError> for Denial {
    fn from(error: ValidationError) -> Self {
        Denial::InvalidInput(error)
    }
}

/// A login that passed the pre-checks and awaits credential verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    email: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl LoginAttempt {
    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// Result of the external credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success { user_id: String },
    Failure { reason: String },
}

/// The governance layer as one object, sharing a clock and an audit sink
pub struct Governance {
    config: GovernanceConfig,
    audit: AuditLogger,
    rate_limiter: RateLimiter,
    lockout: AccountLockout,
    origin_guard: OriginGuard,
    validator: InputValidator,
}

impl Governance {
    pub fn new(config: GovernanceConfig) -> Self {
        Self::with_parts(config, Arc::new(TracingSink), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: GovernanceConfig,
        sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = AuditLogger::new(sink, clock.clone())
            .with_sensitive_fields(config.sensitive_fields.iter().cloned());
        let rate_limiter =
            RateLimiter::new(clock.clone()).with_presets(config.rate_limits.clone());
        let lockout =
            AccountLockout::new(audit.clone(), clock).with_policy(config.lockout.clone());
        let origin_guard = OriginGuard::new(config.allowed_origins(), config.mode, audit.clone());
        let validator = InputValidator::new(audit.clone());

        debug!(
            allowed_origins = ?origin_guard.allowed(),
            mode = ?config.mode,
            "Request governance initialized"
        );

        Self {
            config,
            audit,
            rate_limiter,
            lockout,
            origin_guard,
            validator,
        }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn lockout(&self) -> &AccountLockout {
        &self.lockout
    }

    pub fn origin_guard(&self) -> &OriginGuard {
        &self.origin_guard
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    /// Origin check, auth rate limit and lockout check ahead of credential verification
    pub fn begin_login(&self, headers: &HeaderMap, email: &str) -> Result<LoginAttempt, Denial> {
        self.origin_guard
            .enforce_allowed_origin(headers, "login")
            .map_err(|_| Denial::Forbidden)?;

        let email = email.trim().to_lowercase();
        let ip_address = request_ip(headers);
        let identifier = ip_address.unwrap_or(email.as_str());

        let quota = self.rate_limiter.auth(identifier);
        if !quota.allowed {
            self.audit.rate_limited(identifier, "login", ip_address);
            return Err(Denial::RateLimited {
                retry_after_seconds: quota.retry_after_seconds,
            });
        }

        let status = self.lockout.check_lockout(&email, ip_address);
        if status.is_locked {
            warn!(
                email = %mask_email(&email),
                remaining_minutes = status.remaining_minutes,
                "Login attempt on locked account"
            );
            self.audit.log(
                AuditLogEntry::new(
                    AuditEventType::AuthLoginFailure,
                    "Login blocked by account lockout",
                    AuditOutcome::Failure,
                )
                .with_request_context(
                    ip_address.map(str::to_string),
                    user_agent(headers).map(str::to_string),
                )
                .with_error("account locked")
                .with_metadata("email", mask_email(&email))
                .with_metadata("failedAttempts", status.failed_attempts)
                .with_metadata("remainingMinutes", status.remaining_minutes),
            );
            return Err(Denial::LockedOut {
                remaining_minutes: status.remaining_minutes,
            });
        }

        Ok(LoginAttempt {
            email,
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent(headers).map(str::to_string),
        })
    }

    /// Record the verification result; returns the lock state after it
    pub fn finish_login(&self, attempt: LoginAttempt, outcome: LoginOutcome) -> LockoutStatus {
        let ip_address = attempt.ip_address();
        match outcome {
            LoginOutcome::Success { user_id } => {
                self.lockout
                    .record_successful_login(&attempt.email, ip_address);
                self.audit.login_success(&user_id, ip_address);
                LockoutStatus::default()
            }
            LoginOutcome::Failure { reason } => {
                self.audit
                    .login_failure(&attempt.email, &reason, ip_address);
                self.lockout.record_failed_login(&attempt.email, ip_address)
            }
        }
    }

    /// Origin check plus a preset rate limit for a general mutating action.
    ///
    /// The quota is counted per action, so `identifier` is usually a user id or IP.
    pub fn guard_action(
        &self,
        headers: &HeaderMap,
        action: &str,
        identifier: &str,
        preset: RateLimitPreset,
    ) -> Result<RateLimitResult, Denial> {
        self.origin_guard
            .enforce_allowed_origin(headers, action)
            .map_err(|_| Denial::Forbidden)?;

        let quota = self
            .rate_limiter
            .check_preset(preset, &format!("{}:{}", action, identifier));
        if !quota.allowed {
            self.audit
                .rate_limited(identifier, action, request_ip(headers));
            return Err(Denial::RateLimited {
                retry_after_seconds: quota.retry_after_seconds,
            });
        }

        Ok(quota)
    }

    /// Bearer check for scheduled jobs
    pub fn authorize_scheduled_job(&self, headers: &HeaderMap) -> bool {
        let authorization = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let authorized = validate_cron_secret(authorization, self.config.cron_secret());
        if !authorized {
            warn!(ip = ?request_ip(headers), "Rejected scheduled job request");
            self.audit.unauthorized_access(None, "scheduled-job", request_ip(headers));
        }
        authorized
    }
}

impl Default for Governance {
    fn default() -> Self {
        Self::new(GovernanceConfig::default())
    }
}
