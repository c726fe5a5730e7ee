// Account Lockout Module
// Progressive lockout for repeated failed logins, keyed by email and client IP

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info, warn};

use super::audit::{AuditEventType, AuditLogEntry, AuditLogger, AuditOutcome};
use super::clock::{Clock, SystemClock};
use super::masking::mask_email;
use super::store::{EntryStore, MemoryStore};

/// Minimum time between sweeps of inactive entries
pub const SWEEP_INTERVAL_MS: i64 = 5 * 60 * 1000;

/// One step of the lockout table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutThreshold {
    /// Failure count at which this step applies
    pub attempts: u32,
    /// Lock duration in minutes
    pub duration_minutes: u64,
}

/// Lockout thresholds and inactivity reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Ascending by `attempts`
    pub thresholds: Vec<LockoutThreshold>,
    /// Failures are forgotten after this many minutes without activity
    pub reset_after_minutes: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            thresholds: vec![
                LockoutThreshold {
                    attempts: 5,
                    duration_minutes: 5,
                },
                LockoutThreshold {
                    attempts: 10,
                    duration_minutes: 30,
                },
                LockoutThreshold {
                    attempts: 15,
                    duration_minutes: 60,
                },
            ],
            reset_after_minutes: 60,
        }
    }
}

impl LockoutPolicy {
    /// Lock duration for a failure count: the highest threshold met, if any
    pub fn duration_for(&self, failed_attempts: u32) -> Option<Duration> {
        self.thresholds
            .iter()
            .filter(|threshold| failed_attempts >= threshold.attempts)
            .max_by_key(|threshold| threshold.attempts)
            .filter(|threshold| threshold.duration_minutes > 0)
            .map(|threshold| minutes(threshold.duration_minutes))
    }

    pub fn reset_after(&self) -> Duration {
        minutes(self.reset_after_minutes)
    }

    /// Attempts strictly ascending, durations never decreasing
    pub fn is_monotonic(&self) -> bool {
        self.thresholds.windows(2).all(|pair| {
            pair[0].attempts < pair[1].attempts
                && pair[0].duration_minutes <= pair[1].duration_minutes
        })
    }
}

fn minutes(value: u64) -> Duration {
    Duration::minutes(i64::try_from(value).unwrap_or(i64::MAX / 60_000))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutEntry {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_attempt: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutStatus {
    pub is_locked: bool,
    pub remaining_minutes: u64,
    pub failed_attempts: u32,
}

impl LockoutStatus {
    /// User-facing message while locked
    pub fn error_message(&self) -> String {
        format_lockout_error(self.remaining_minutes)
    }
}

pub fn format_lockout_error(remaining_minutes: u64) -> String {
    if remaining_minutes == 1 {
        "Too many failed login attempts. Please try again in 1 minute.".to_string()
    } else {
        format!(
            "Too many failed login attempts. Please try again in {} minutes.",
            remaining_minutes
        )
    }
}

/// Lockout store key: normalized email, plus `:ip` when an IP is known
pub fn lockout_key(email: &str, ip_address: Option<&str>) -> String {
    let email = email.trim().to_lowercase();
    match ip_address.map(str::trim).filter(|ip| !ip.is_empty()) {
        Some(ip) => format!("{}:{}", email, ip),
        None => email,
    }
}

/// Progressive account lockout.
///
/// Failures keep counting while an account is locked, so abuse during a
/// lock escalates it. Every new lock and every move to a longer tier is
/// audited. A successful login forgets everything.
pub struct AccountLockout {
    store: Arc<dyn EntryStore<LockoutEntry>>,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
    policy: LockoutPolicy,
    last_sweep_ms: AtomicI64,
}

impl AccountLockout {
    pub fn new(audit: AuditLogger, clock: Arc<dyn Clock>) -> Self {
        Self::with_store(Arc::new(MemoryStore::<LockoutEntry>::new()), audit, clock)
    }

    pub fn with_store(
        store: Arc<dyn EntryStore<LockoutEntry>>,
        audit: AuditLogger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            store,
            clock,
            audit,
            policy: LockoutPolicy::default(),
            last_sweep_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    fn is_stale(&self, entry: &LockoutEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_attempt > self.policy.reset_after()
    }

    fn status_of(entry: &LockoutEntry, now: DateTime<Utc>) -> LockoutStatus {
        match entry.locked_until {
            Some(until) if until > now => {
                let remaining_ms = u64::try_from((until - now).num_milliseconds()).unwrap_or(0);
                LockoutStatus {
                    is_locked: true,
                    remaining_minutes: remaining_ms.div_ceil(60_000),
                    failed_attempts: entry.failed_attempts,
                }
            }
            _ => LockoutStatus {
                is_locked: false,
                remaining_minutes: 0,
                failed_attempts: entry.failed_attempts,
            },
        }
    }

    /// Current lock state; entries past the inactivity gap are dropped
    pub fn check_lockout(&self, email: &str, ip_address: Option<&str>) -> LockoutStatus {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let key = lockout_key(email, ip_address);
        let Some(entry) = self.store.get(&key) else {
            return LockoutStatus::default();
        };

        if self.is_stale(&entry, now) {
            self.store
                .remove_if(&key, &|current| self.is_stale(current, now));
            debug!(email = %mask_email(email.trim()), "Lockout entry expired after inactivity");
            return LockoutStatus::default();
        }

        Self::status_of(&entry, now)
    }

    /// Count a failed login and recompute the lock
    pub fn record_failed_login(&self, email: &str, ip_address: Option<&str>) -> LockoutStatus {
        let now = self.clock.now();
        let key = lockout_key(email, ip_address);

        let mut was_locked = false;
        let entry = self.store.upsert(&key, &mut |current| {
            let live = current.filter(|existing| !self.is_stale(existing, now));
            was_locked = live.is_some_and(|existing| Self::status_of(existing, now).is_locked);

            let failed_attempts = live
                .map_or(0, |existing| existing.failed_attempts)
                .saturating_add(1);
            LockoutEntry {
                failed_attempts,
                locked_until: self
                    .policy
                    .duration_for(failed_attempts)
                    .map(|duration| now + duration),
                last_attempt: now,
            }
        });

        let status = Self::status_of(&entry, now);
        let duration = self.policy.duration_for(entry.failed_attempts);
        let escalated = duration > self.policy.duration_for(entry.failed_attempts - 1);
        if status.is_locked && (!was_locked || escalated) {
            let lockout_minutes = duration.map_or(0, |duration| duration.num_minutes());

            warn!(
                email = %mask_email(email.trim()),
                ip = ?ip_address,
                failed_attempts = entry.failed_attempts,
                lockout_minutes,
                "Account locked after repeated failed logins"
            );

            self.audit.log(
                AuditLogEntry::new(
                    AuditEventType::SecuritySuspiciousActivity,
                    format!(
                        "Account locked after {} failed attempts",
                        entry.failed_attempts
                    ),
                    AuditOutcome::Failure,
                )
                .at(now)
                .with_request_context(ip_address.map(str::to_string), None)
                .with_metadata("email", mask_email(email.trim()))
                .with_metadata("failedAttempts", entry.failed_attempts)
                .with_metadata("lockoutMinutes", lockout_minutes),
            );
        }

        status
    }

    /// Forget all failures for this key
    pub fn record_successful_login(&self, email: &str, ip_address: Option<&str>) {
        let key = lockout_key(email, ip_address);
        if self.store.delete(&key) {
            info!(email = %mask_email(email.trim()), "Cleared failed login history");
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms - last < SWEEP_INTERVAL_MS {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let removed = self.store.sweep(&|entry| self.is_stale(entry, now));
        if removed > 0 {
            debug!(removed, "Swept inactive lockout entries");
        }
    }
}

impl Default for AccountLockout {
    fn default() -> Self {
        Self::new(AuditLogger::default(), Arc::new(SystemClock))
    }
}
