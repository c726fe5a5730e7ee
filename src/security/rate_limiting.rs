// Rate Limiting Module
// Fixed-window request counters keyed by namespace and identifier

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::store::{EntryStore, MemoryStore};

/// Store size above which a sweep is forced and the oldest windows are evicted
pub const MAX_STORE_SIZE: usize = 10_000;

/// Minimum time between opportunistic sweeps
pub const SWEEP_INTERVAL_MS: i64 = 30 * 1000;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of requests allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Key prefix for namespacing
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "rl".to_string()
}

impl RateLimitConfig {
    pub fn new(limit: u32, window_ms: u64, prefix: impl Into<String>) -> Self {
        Self {
            limit,
            window_ms,
            prefix: prefix.into(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(60, 60 * 1000, default_prefix())
    }
}

/// Preset limiters for the common call sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPreset {
    /// Login and signup: 5 attempts per minute
    Auth,
    /// General API traffic: 60 requests per minute
    Api,
    /// File uploads: 10 per hour
    Upload,
    /// Password reset: 3 per hour
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPresets {
    pub auth: RateLimitConfig,
    pub api: RateLimitConfig,
    pub upload: RateLimitConfig,
    pub password_reset: RateLimitConfig,
}

impl Default for RateLimitPresets {
    fn default() -> Self {
        Self {
            auth: RateLimitConfig::new(5, 60 * 1000, "auth"),
            api: RateLimitConfig::new(60, 60 * 1000, "api"),
            upload: RateLimitConfig::new(10, 60 * 60 * 1000, "upload"),
            password_reset: RateLimitConfig::new(3, 60 * 60 * 1000, "pwd_reset"),
        }
    }
}

impl RateLimitPresets {
    pub fn get(&self, preset: RateLimitPreset) -> &RateLimitConfig {
        match preset {
            RateLimitPreset::Auth => &self.auth,
            RateLimitPreset::Api => &self.api,
            RateLimitPreset::Upload => &self.upload,
            RateLimitPreset::PasswordReset => &self.password_reset,
        }
    }
}

/// Counter for one `prefix:identifier` window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

/// Rate limit result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Limit of the window that produced this result
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_time: DateTime<Utc>,
    /// Seconds until the window ends; zero when allowed
    pub retry_after_seconds: u64,
}

impl RateLimitResult {
    /// Quota headers for propagating this decision to the client
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(
            X_RATELIMIT_RESET,
            HeaderValue::from(self.reset_time.timestamp_millis()),
        );
        if !self.allowed {
            headers.insert(
                header::RETRY_AFTER,
                HeaderValue::from(self.retry_after_seconds),
            );
        }
        headers
    }

    /// User-facing message for a denied request
    pub fn error_message(&self) -> String {
        format_rate_limit_error(self.retry_after_seconds)
    }
}

/// "Too many requests" message with the retry delay in seconds or whole minutes
pub fn format_rate_limit_error(retry_after_seconds: u64) -> String {
    let (amount, unit) = if retry_after_seconds < 60 {
        (retry_after_seconds, "second")
    } else {
        (retry_after_seconds.div_ceil(60), "minute")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!(
        "Too many requests. Please try again in {} {}{}.",
        amount, unit, plural
    )
}

/// Fixed-window rate limiter.
///
/// Denial is a normal result, never an error. Expiry is checked on every
/// call; the periodic sweep only bounds memory.
pub struct RateLimiter {
    store: Arc<dyn EntryStore<RateLimitEntry>>,
    clock: Arc<dyn Clock>,
    presets: RateLimitPresets,
    max_entries: usize,
    last_sweep_ms: AtomicI64,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(Arc::new(MemoryStore::<RateLimitEntry>::new()), clock)
    }

    pub fn with_store(store: Arc<dyn EntryStore<RateLimitEntry>>, clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            store,
            clock,
            presets: RateLimitPresets::default(),
            max_entries: MAX_STORE_SIZE,
            last_sweep_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn with_presets(mut self, presets: RateLimitPresets) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn presets(&self) -> &RateLimitPresets {
        &self.presets
    }

    /// Count a request for `identifier` against `config`
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitResult {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let key = config.key(identifier);
        let window = config.window();
        let entry = self.store.upsert(&key, &mut |current| match current {
            Some(existing) if now < existing.reset_time => RateLimitEntry {
                count: existing.count.saturating_add(1),
                reset_time: existing.reset_time,
            },
            _ => RateLimitEntry {
                count: 1,
                reset_time: now + window,
            },
        });

        if entry.count > config.limit {
            let remaining_ms = (entry.reset_time - now).num_milliseconds().max(0);
            let retry_after_seconds = u64::try_from(remaining_ms).unwrap_or(0).div_ceil(1000);

            warn!(
                key = %key,
                count = entry.count,
                limit = config.limit,
                retry_after_seconds,
                "Rate limit exceeded"
            );

            return RateLimitResult {
                allowed: false,
                limit: config.limit,
                remaining: 0,
                reset_time: entry.reset_time,
                retry_after_seconds,
            };
        }

        RateLimitResult {
            allowed: true,
            limit: config.limit,
            remaining: config.limit - entry.count,
            reset_time: entry.reset_time,
            retry_after_seconds: 0,
        }
    }

    /// Count a request against one of the configured presets
    pub fn check_preset(&self, preset: RateLimitPreset, identifier: &str) -> RateLimitResult {
        self.check(identifier, self.presets.get(preset))
    }

    pub fn auth(&self, identifier: &str) -> RateLimitResult {
        self.check_preset(RateLimitPreset::Auth, identifier)
    }

    pub fn api(&self, identifier: &str) -> RateLimitResult {
        self.check_preset(RateLimitPreset::Api, identifier)
    }

    pub fn upload(&self, identifier: &str) -> RateLimitResult {
        self.check_preset(RateLimitPreset::Upload, identifier)
    }

    pub fn password_reset(&self, identifier: &str) -> RateLimitResult {
        self.check_preset(RateLimitPreset::PasswordReset, identifier)
    }

    /// Number of tracked windows, live or not yet swept
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    /// Drop every window
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Remove expired windows now, then evict the oldest if still over capacity
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        self.last_sweep_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
        self.sweep_at(now)
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let over_capacity = self.store.len() > self.max_entries;
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);

        if !over_capacity {
            if now_ms - last < SWEEP_INTERVAL_MS {
                return;
            }
            // Another caller already claimed this interval
            if self
                .last_sweep_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
        } else {
            self.last_sweep_ms.store(now_ms, Ordering::Relaxed);
        }

        self.sweep_at(now);
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = self.store.sweep(&|entry| entry.reset_time <= now);

        let len = self.store.len();
        if len > self.max_entries {
            let mut entries = self.store.entries();
            entries.sort_by_key(|(_, entry)| entry.reset_time);
            for (key, _) in entries.into_iter().take(len - self.max_entries) {
                if self.store.delete(&key) {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "Swept rate limit windows");
        }
        removed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
