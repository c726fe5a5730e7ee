pub mod audit;
pub mod clock;
pub mod lockout;
pub mod masking;
pub mod origin;
pub mod rate_limiting;
pub mod request;
pub mod store;
pub mod timing;
pub mod validation;

pub use audit::{
    AuditContext, AuditDetails, AuditEventType, AuditLogEntry, AuditLogger, AuditOutcome,
    AuditRecord, AuditSeverity, AuditSink, MemorySink, TracingSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use lockout::{AccountLockout, LockoutPolicy, LockoutStatus, format_lockout_error};
pub use masking::{mask_sensitive_data, mask_value};
pub use origin::{OriginGuard, OriginRejection, RuntimeMode, allowed_origins};
pub use rate_limiting::{
    RateLimitConfig, RateLimitPreset, RateLimitPresets, RateLimitResult, RateLimiter,
    format_rate_limit_error,
};
pub use store::{EntryStore, MemoryStore};
pub use timing::{timing_safe_equal, validate_cron_secret};
pub use validation::{InputValidator, ValidationError};
