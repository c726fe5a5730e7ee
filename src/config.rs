use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;
use url::Url;

use crate::error::{GovernanceError, GovernanceResult};
use crate::security::lockout::LockoutPolicy;
use crate::security::masking::DEFAULT_SENSITIVE_FIELDS;
use crate::security::origin::{RuntimeMode, allowed_origins};
use crate::security::rate_limiting::{RateLimitConfig, RateLimitPresets};

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "GUARD_";

/// Configuration for the request-governance layer
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub host: String,
    pub port: u16,
    /// Public site URL, first entry of the origin allow-list
    #[serde(deserialize_with = "string_or_number")]
    pub site_url: Option<String>,
    /// Deployment platform URL; `https://` is assumed when bare
    #[serde(deserialize_with = "string_or_number")]
    pub platform_url: Option<String>,
    /// Shared secret for `Authorization: Bearer` on scheduled jobs
    #[serde(deserialize_with = "string_or_number")]
    pub cron_secret: Option<String>,
    pub mode: RuntimeMode,
    pub rate_limits: RateLimitPresets,
    pub lockout: LockoutPolicy,
    /// Audit metadata fields that are masked before emission
    pub sensitive_fields: Vec<String>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            site_url: None,
            platform_url: None,
            cron_secret: None,
            mode: RuntimeMode::default(),
            rate_limits: RateLimitPresets::default(),
            lockout: LockoutPolicy::default(),
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
        }
    }
}

impl fmt::Debug for GovernanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernanceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("site_url", &self.site_url)
            .field("platform_url", &self.platform_url)
            .field("cron_secret", &self.cron_secret.as_ref().map(|_| "***"))
            .field("mode", &self.mode)
            .field("rate_limits", &self.rate_limits)
            .field("lockout", &self.lockout)
            .field("sensitive_fields", &self.sensitive_fields)
            .finish()
    }
}

impl GovernanceConfig {
    /// Defaults overlaid with `GUARD_*` environment variables
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(GovernanceConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from the environment and validate
    pub fn from_env() -> GovernanceResult<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> GovernanceResult<Self> {
        let config: GovernanceConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Origins accepted by the origin guard
    pub fn allowed_origins(&self) -> Vec<String> {
        allowed_origins(self.site_url.as_deref(), self.platform_url.as_deref())
    }

    pub fn cron_secret(&self) -> Option<&str> {
        self.cron_secret.as_deref().filter(|secret| !secret.is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> GovernanceResult<()> {
        if let Some(site_url) = self.site_url.as_deref().filter(|s| !s.is_empty()) {
            Url::parse(site_url).map_err(|e| invalid("site_url", e.to_string()))?;
        }

        for (name, preset) in [
            ("rate_limits.auth", &self.rate_limits.auth),
            ("rate_limits.api", &self.rate_limits.api),
            ("rate_limits.upload", &self.rate_limits.upload),
            ("rate_limits.password_reset", &self.rate_limits.password_reset),
        ] {
            validate_preset(name, preset)?;
        }

        if self.lockout.thresholds.is_empty() {
            return Err(invalid("lockout.thresholds", "at least one threshold is required"));
        }
        if !self.lockout.is_monotonic() {
            return Err(invalid(
                "lockout.thresholds",
                "thresholds must ascend in attempts with non-decreasing durations",
            ));
        }
        if self.lockout.reset_after_minutes == 0 {
            return Err(invalid("lockout.reset_after_minutes", "must be greater than zero"));
        }

        if let Some(secret) = self.cron_secret()
            && secret.len() < 16
        {
            warn!("Cron secret is shorter than 16 characters");
        }

        Ok(())
    }
}

fn validate_preset(name: &str, preset: &RateLimitConfig) -> GovernanceResult<()> {
    if preset.window_ms == 0 {
        return Err(invalid(name, "window_ms must be greater than zero"));
    }
    if preset.prefix.trim().is_empty() {
        return Err(invalid(name, "prefix must not be empty"));
    }
    Ok(())
}

/// Environment values that look numeric reach serde as numbers; keep their text
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TextVisitor;

    impl<'de> Visitor<'de> for TextVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, inner: D) -> Result<Self::Value, D::Error> {
            inner.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_option(TextVisitor)
}

fn invalid(key: &str, reason: impl Into<String>) -> GovernanceError {
    GovernanceError::InvalidConfig {
        key: key.to_string(),
        reason: reason.into(),
    }
}
