// Security Audit Log
// Structured, severity-tagged and PII-masked records for security-relevant outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::clock::{Clock, SystemClock};
use super::masking::{DEFAULT_SENSITIVE_FIELDS, mask_email, mask_prefix, mask_sensitive_data};
use crate::error::GovernanceError;

/// Free-form audit metadata
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuditEventType {
    AuthLoginSuccess,
    AuthLoginFailure,
    AuthLogout,
    AuthSignup,
    AuthPasswordChange,
    AuthEmailChange,
    AuthAccountDelete,
    AuthRateLimited,
    AuthPasswordResetRequest,
    AuthPasswordResetComplete,

    ProfileUpdate,
    ProfileView,
    AvatarUpload,
    AvatarDelete,

    DataExport,
    DataDelete,

    SecuritySuspiciousActivity,
    SecurityValidationFailure,
    SecurityUnauthorizedAccess,

    TeaTimeSettingChange,
    TeaTimeMatchUpdate,

    RoomPhotoUpload,
    RoomPhotoDelete,

    WifiCreate,
    WifiUpdate,
    WifiDelete,

    GarbageScheduleCreate,
    GarbageScheduleUpdate,
    GarbageScheduleDelete,
    GarbageDutyAssign,
    GarbageDutyComplete,
    GarbageRotationGenerate,

    /// Event type not known to this build; always classified as INFO
    Custom(String),
}

impl AuditEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthLoginSuccess => "AUTH_LOGIN_SUCCESS",
            Self::AuthLoginFailure => "AUTH_LOGIN_FAILURE",
            Self::AuthLogout => "AUTH_LOGOUT",
            Self::AuthSignup => "AUTH_SIGNUP",
            Self::AuthPasswordChange => "AUTH_PASSWORD_CHANGE",
            Self::AuthEmailChange => "AUTH_EMAIL_CHANGE",
            Self::AuthAccountDelete => "AUTH_ACCOUNT_DELETE",
            Self::AuthRateLimited => "AUTH_RATE_LIMITED",
            Self::AuthPasswordResetRequest => "AUTH_PASSWORD_RESET_REQUEST",
            Self::AuthPasswordResetComplete => "AUTH_PASSWORD_RESET_COMPLETE",
            Self::ProfileUpdate => "PROFILE_UPDATE",
            Self::ProfileView => "PROFILE_VIEW",
            Self::AvatarUpload => "AVATAR_UPLOAD",
            Self::AvatarDelete => "AVATAR_DELETE",
            Self::DataExport => "DATA_EXPORT",
            Self::DataDelete => "DATA_DELETE",
            Self::SecuritySuspiciousActivity => "SECURITY_SUSPICIOUS_ACTIVITY",
            Self::SecurityValidationFailure => "SECURITY_VALIDATION_FAILURE",
            Self::SecurityUnauthorizedAccess => "SECURITY_UNAUTHORIZED_ACCESS",
            Self::TeaTimeSettingChange => "TEA_TIME_SETTING_CHANGE",
            Self::TeaTimeMatchUpdate => "TEA_TIME_MATCH_UPDATE",
            Self::RoomPhotoUpload => "ROOM_PHOTO_UPLOAD",
            Self::RoomPhotoDelete => "ROOM_PHOTO_DELETE",
            Self::WifiCreate => "WIFI_CREATE",
            Self::WifiUpdate => "WIFI_UPDATE",
            Self::WifiDelete => "WIFI_DELETE",
            Self::GarbageScheduleCreate => "GARBAGE_SCHEDULE_CREATE",
            Self::GarbageScheduleUpdate => "GARBAGE_SCHEDULE_UPDATE",
            Self::GarbageScheduleDelete => "GARBAGE_SCHEDULE_DELETE",
            Self::GarbageDutyAssign => "GARBAGE_DUTY_ASSIGN",
            Self::GarbageDutyComplete => "GARBAGE_DUTY_COMPLETE",
            Self::GarbageRotationGenerate => "GARBAGE_ROTATION_GENERATE",
            Self::Custom(name) => name,
        }
    }

    /// Severity classification for this event type
    pub fn severity(&self) -> AuditSeverity {
        use AuditSeverity::*;

        match self {
            Self::AuthLoginSuccess => Info,
            Self::AuthLoginFailure => Warning,
            Self::AuthLogout => Info,
            Self::AuthSignup => Info,
            Self::AuthPasswordChange => Warning,
            Self::AuthEmailChange => Warning,
            Self::AuthAccountDelete => Critical,
            Self::AuthRateLimited => Warning,
            Self::AuthPasswordResetRequest => Info,
            Self::AuthPasswordResetComplete => Warning,
            Self::ProfileUpdate | Self::ProfileView => Info,
            Self::AvatarUpload | Self::AvatarDelete => Info,
            Self::DataExport | Self::DataDelete => Warning,
            Self::SecuritySuspiciousActivity => Critical,
            Self::SecurityValidationFailure => Warning,
            Self::SecurityUnauthorizedAccess => Critical,
            Self::TeaTimeSettingChange | Self::TeaTimeMatchUpdate => Info,
            Self::RoomPhotoUpload | Self::RoomPhotoDelete => Info,
            Self::WifiCreate | Self::WifiUpdate => Info,
            Self::WifiDelete => Warning,
            Self::GarbageScheduleCreate | Self::GarbageScheduleUpdate => Info,
            Self::GarbageScheduleDelete => Warning,
            Self::GarbageDutyAssign | Self::GarbageDutyComplete => Info,
            Self::GarbageRotationGenerate => Warning,
            Self::Custom(_) => Info,
        }
    }

    const KNOWN: [AuditEventType; 32] = [
        Self::AuthLoginSuccess,
        Self::AuthLoginFailure,
        Self::AuthLogout,
        Self::AuthSignup,
        Self::AuthPasswordChange,
        Self::AuthEmailChange,
        Self::AuthAccountDelete,
        Self::AuthRateLimited,
        Self::AuthPasswordResetRequest,
        Self::AuthPasswordResetComplete,
        Self::ProfileUpdate,
        Self::ProfileView,
        Self::AvatarUpload,
        Self::AvatarDelete,
        Self::DataExport,
        Self::DataDelete,
        Self::SecuritySuspiciousActivity,
        Self::SecurityValidationFailure,
        Self::SecurityUnauthorizedAccess,
        Self::TeaTimeSettingChange,
        Self::TeaTimeMatchUpdate,
        Self::RoomPhotoUpload,
        Self::RoomPhotoDelete,
        Self::WifiCreate,
        Self::WifiUpdate,
        Self::WifiDelete,
        Self::GarbageScheduleCreate,
        Self::GarbageScheduleUpdate,
        Self::GarbageScheduleDelete,
        Self::GarbageDutyAssign,
        Self::GarbageDutyComplete,
        Self::GarbageRotationGenerate,
    ];
}

impl FromStr for AuditEventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::KNOWN
            .iter()
            .find(|known| known.as_str() == s)
            .cloned()
            .unwrap_or_else(|| Self::Custom(s.to_string())))
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AuditEventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuditEventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let Ok(event_type) = raw.parse();
        Ok(event_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// An audit event as supplied by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    /// Filled from the logger's clock at emission when left empty
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub target_id: Option<String>,
    pub action: String,
    pub outcome: AuditOutcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Metadata>,
    pub error_message: Option<String>,
}

impl AuditLogEntry {
    pub fn new(event_type: AuditEventType, action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            timestamp: None,
            event_type,
            user_id: None,
            target_id: None,
            action: action.into(),
            outcome,
            ip_address: None,
            user_agent: None,
            metadata: None,
            error_message: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_request_context(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .extend(metadata);
        self
    }

    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self
    }
}

/// The record handed to a sink: the entry plus its severity, with metadata masked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_id: Option<String>,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    pub severity: AuditSeverity,
}

/// Destination for formatted audit records (console, file, SIEM forwarder)
pub trait AuditSink: Send + Sync {
    fn write(&self, record: &AuditRecord, line: &str) -> Result<(), GovernanceError>;
}

/// Default sink: routes records to `tracing` by severity under the `audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn write(&self, record: &AuditRecord, line: &str) -> Result<(), GovernanceError> {
        match record.severity {
            AuditSeverity::Critical | AuditSeverity::Error => {
                error!(target: "audit", "[AUDIT:{}] {}", record.severity, line);
            }
            AuditSeverity::Warning => {
                warn!(target: "audit", "[AUDIT:{}] {}", record.severity, line);
            }
            AuditSeverity::Info => {
                info!(target: "audit", "[AUDIT:{}] {}", record.severity, line);
            }
        }
        Ok(())
    }
}

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    captured: Mutex<Vec<(AuditRecord, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().iter().map(|(record, _)| record.clone()).collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    pub fn count_of(&self, event_type: &AuditEventType) -> usize {
        self.lock()
            .iter()
            .filter(|(record, _)| &record.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(AuditRecord, String)>> {
        self.captured.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditSink for MemorySink {
    fn write(&self, record: &AuditRecord, line: &str) -> Result<(), GovernanceError> {
        self.lock().push((record.clone(), line.to_string()));
        Ok(())
    }
}

/// Audit logger: classifies, masks, formats and forwards entries to its sink.
///
/// Logging never fails the caller. Formatting and sink errors are reported
/// through `tracing` at error level and dropped.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    sensitive_fields: Vec<String>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
        }
    }

    /// Replace the list of metadata fields that get masked
    pub fn with_sensitive_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Build the masked, severity-tagged record and its JSON line
    pub fn format(&self, entry: AuditLogEntry) -> Result<(AuditRecord, String), GovernanceError> {
        let severity = entry.event_type.severity();
        let metadata = entry
            .metadata
            .map(|metadata| mask_sensitive_data(&metadata, &self.sensitive_fields));

        let record = AuditRecord {
            timestamp: entry.timestamp.unwrap_or_else(|| self.clock.now()),
            event_type: entry.event_type,
            user_id: entry.user_id,
            target_id: entry.target_id,
            action: entry.action,
            outcome: entry.outcome,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            metadata,
            error_message: entry.error_message,
            severity,
        };
        let line = serde_json::to_string(&record)?;

        Ok((record, line))
    }

    /// Emit an audit entry
    pub fn log(&self, entry: AuditLogEntry) {
        let event_type = entry.event_type.clone();

        match self.format(entry) {
            Ok((record, line)) => {
                if let Err(e) = self.sink.write(&record, &line) {
                    error!(
                        target: "audit",
                        event_type = %event_type,
                        error = %e,
                        "Audit sink rejected record"
                    );
                }
            }
            Err(e) => {
                error!(
                    target: "audit",
                    event_type = %event_type,
                    error = %e,
                    "Failed to format audit record"
                );
            }
        }
    }

    /// Logger with request context pre-filled
    pub fn with_context(&self, context: AuditContext) -> ContextAuditLogger<'_> {
        ContextAuditLogger {
            logger: self,
            context,
        }
    }

    pub fn login_success(&self, user_id: &str, ip_address: Option<&str>) {
        self.log(
            AuditLogEntry::new(
                AuditEventType::AuthLoginSuccess,
                "User logged in",
                AuditOutcome::Success,
            )
            .with_user(user_id)
            .with_request_context(ip_address.map(str::to_string), None),
        );
    }

    pub fn login_failure(&self, email: &str, reason: &str, ip_address: Option<&str>) {
        self.log(
            AuditLogEntry::new(
                AuditEventType::AuthLoginFailure,
                "Login attempt failed",
                AuditOutcome::Failure,
            )
            .with_error(reason)
            .with_request_context(ip_address.map(str::to_string), None)
            .with_metadata("email", mask_email(email)),
        );
    }

    pub fn rate_limited(&self, identifier: &str, endpoint: &str, ip_address: Option<&str>) {
        self.log(
            AuditLogEntry::new(
                AuditEventType::AuthRateLimited,
                format!("Rate limit exceeded on {}", endpoint),
                AuditOutcome::Failure,
            )
            .with_request_context(ip_address.map(str::to_string), None)
            .with_metadata("identifier", mask_prefix(identifier, 5))
            .with_metadata("endpoint", endpoint),
        );
    }

    pub fn suspicious_activity(
        &self,
        description: &str,
        user_id: Option<&str>,
        metadata: Option<Metadata>,
    ) {
        let mut entry = AuditLogEntry::new(
            AuditEventType::SecuritySuspiciousActivity,
            description,
            AuditOutcome::Failure,
        );
        entry.user_id = user_id.map(str::to_string);
        entry.metadata = metadata;
        self.log(entry);
    }

    pub fn unauthorized_access(
        &self,
        user_id: Option<&str>,
        target_resource: &str,
        ip_address: Option<&str>,
    ) {
        let mut entry = AuditLogEntry::new(
            AuditEventType::SecurityUnauthorizedAccess,
            format!("Unauthorized access attempt to {}", target_resource),
            AuditOutcome::Failure,
        )
        .with_request_context(ip_address.map(str::to_string), None);
        entry.user_id = user_id.map(str::to_string);
        self.log(entry);
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), Arc::new(SystemClock))
    }
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger")
            .field("sensitive_fields", &self.sensitive_fields)
            .finish_non_exhaustive()
    }
}

/// Request context shared by every entry from a [`ContextAuditLogger`]
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Optional parts of an entry logged through [`ContextAuditLogger::log`]
#[derive(Debug, Clone, Default)]
pub struct AuditDetails {
    pub target_id: Option<String>,
    pub metadata: Option<Metadata>,
    pub error_message: Option<String>,
}

pub struct ContextAuditLogger<'a> {
    logger: &'a AuditLogger,
    context: AuditContext,
}

impl ContextAuditLogger<'_> {
    fn entry(
        &self,
        event_type: AuditEventType,
        action: &str,
        outcome: AuditOutcome,
    ) -> AuditLogEntry {
        let mut entry = AuditLogEntry::new(event_type, action, outcome).with_request_context(
            self.context.ip_address.clone(),
            self.context.user_agent.clone(),
        );
        entry.user_id = self.context.user_id.clone();
        entry
    }

    pub fn log(
        &self,
        event_type: AuditEventType,
        action: &str,
        outcome: AuditOutcome,
        details: AuditDetails,
    ) {
        let mut entry = self.entry(event_type, action, outcome);
        entry.target_id = details.target_id;
        entry.metadata = details.metadata;
        entry.error_message = details.error_message;
        self.logger.log(entry);
    }

    pub fn success(&self, event_type: AuditEventType, action: &str, metadata: Option<Metadata>) {
        let mut entry = self.entry(event_type, action, AuditOutcome::Success);
        entry.metadata = metadata;
        self.logger.log(entry);
    }

    pub fn failure(
        &self,
        event_type: AuditEventType,
        action: &str,
        error_message: &str,
        metadata: Option<Metadata>,
    ) {
        let mut entry = self
            .entry(event_type, action, AuditOutcome::Failure)
            .with_error(error_message);
        entry.metadata = metadata;
        self.logger.log(entry);
    }
}
