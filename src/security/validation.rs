// Input Validation Module
// Identifier checks, injection screening and sanitizers for user-supplied text

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use super::audit::{AuditEventType, AuditLogEntry, AuditLogger, AuditOutcome};

/// Longest email kept by [`sanitize_email`]
pub const MAX_EMAIL_LENGTH: usize = 255;

lazy_static::lazy_static! {
    static ref UUID_V4: Regex = Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$"
    )
    .expect("Valid regex pattern for UUID validation");

    static ref MOCK_ID: Regex =
        Regex::new(r"^mock-\d{1,3}$").expect("Valid regex pattern for mock IDs");

    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").expect("Valid regex pattern for HTML tags");

    static ref SCRIPT_SCHEME: Regex =
        Regex::new(r"(?i)javascript:").expect("Valid regex pattern for script URLs");

    static ref EVENT_HANDLER: Regex =
        Regex::new(r"(?i)on\w+=").expect("Valid regex pattern for event handlers");

    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("Valid regex pattern for whitespace");

    /// Matched against upper-cased input with collapsed whitespace
    static ref SQL_INJECTION_PATTERNS: Vec<Regex> = [
        // statements and clauses
        r"\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE)\b",
        r"\b(UNION|JOIN|WHERE|FROM|INTO|VALUES|SET)\b",
        r"\b(HAVING|GROUP\s+BY|ORDER\s+BY|LIMIT|OFFSET)\b",
        r"\b(GRANT|REVOKE|COMMIT|ROLLBACK|SAVEPOINT)\b",
        // functions
        r"\b(CONCAT|SUBSTRING|CHAR|ASCII|HEX|UNHEX)\s*\(",
        r"\b(SLEEP|BENCHMARK|WAITFOR|DELAY)\s*\(",
        r"\b(LOAD_FILE|INTO\s+OUTFILE|INTO\s+DUMPFILE)\b",
        // comments
        r"--",
        r"#",
        r"/\*",
        r"\*/",
        // tautologies
        r#"['"`]\s*(OR|AND)\s"#,
        r"\b(OR|AND)\s+\d+\s*=\s*\d+",
        r#"\b(OR|AND)\s+['"`]"#,
        // stored procedures
        r"\b(EXEC|EXECUTE|XP_|SP_)\b",
        // null bytes
        r"\\x00|\\0|%00",
        // encodings and concatenation
        r"(?i)0x[0-9a-f]{4,}",
        r#"['"`]\s*\+\s*['"`]"#,
        r#"['"`]\s*\|\|\s*['"`]"#,
        r"(?i)CHAR\s*\(\s*\d+",
        // branching
        r"\bCASE\s+WHEN\b",
        r"\bIF\s*\(",
        // catalogs
        r"INFORMATION_SCHEMA",
        r"SYS\.(ALL_|DBA_|USER_)",
        r"PG_CATALOG",
        // subqueries
        r"\(\s*SELECT\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Valid regex pattern for SQL injection detection"))
    .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid {field} format.")]
    InvalidFormat { field: String },

    #[error("{field} contains invalid characters.")]
    InvalidCharacters { field: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidFormat { field } | Self::InvalidCharacters { field } => field.as_str(),
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "format",
            Self::InvalidCharacters { .. } => "injection",
        }
    }
}

pub fn is_valid_uuid(id: &str) -> bool {
    UUID_V4.is_match(id)
}

/// Seeded demo profiles use `mock-<n>` identifiers
pub fn is_mock_id(id: &str) -> bool {
    id.starts_with("mock-")
}

/// Accept a UUID v4 or a `mock-` id of one to three digits
pub fn validate_id<'a>(id: &'a str, field: &str) -> Result<&'a str, ValidationError> {
    let valid = if is_mock_id(id) {
        MOCK_ID.is_match(id)
    } else {
        is_valid_uuid(id)
    };

    if valid {
        Ok(id)
    } else {
        Err(ValidationError::InvalidFormat {
            field: field.to_string(),
        })
    }
}

/// Escape characters with meaning in HTML
pub fn sanitize_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '/' => escaped.push_str("&#x2F;"),
            '`' => escaped.push_str("&#x60;"),
            '=' => escaped.push_str("&#x3D;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn strip_html(input: &str) -> String {
    HTML_TAG.replace_all(input, "").into_owned()
}

/// Trim, drop null bytes, tags and script-like fragments, and collapse whitespace
pub fn sanitize_for_storage(input: &str) -> String {
    let text = input.trim().replace('\0', "");
    let text = HTML_TAG.replace_all(&text, "");
    let text = SCRIPT_SCHEME.replace_all(&text, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").into_owned()
}

pub fn sanitize_email(email: &str) -> String {
    email
        .trim()
        .to_lowercase()
        .chars()
        .take(MAX_EMAIL_LENGTH)
        .collect()
}

/// Whether `input` looks like an SQL injection attempt.
///
/// Deliberately broad: only apply it to fields that never hold free prose.
pub fn has_sql_injection_pattern(input: &str) -> bool {
    if input.is_empty() {
        return false;
    }

    let normalized = WHITESPACE.replace_all(&input.to_uppercase(), " ").into_owned();
    SQL_INJECTION_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&normalized))
}

pub fn validate_no_injection<'a>(input: &'a str, field: &str) -> Result<&'a str, ValidationError> {
    if has_sql_injection_pattern(input) {
        return Err(ValidationError::InvalidCharacters {
            field: field.to_string(),
        });
    }
    Ok(input)
}

/// Validation that reports every rejection to the audit log
#[derive(Debug, Clone)]
pub struct InputValidator {
    audit: AuditLogger,
}

impl InputValidator {
    pub fn new(audit: AuditLogger) -> Self {
        Self { audit }
    }

    pub fn validate_id<'a>(
        &self,
        id: &'a str,
        field: &str,
        ip_address: Option<&str>,
    ) -> Result<&'a str, ValidationError> {
        validate_id(id, field).inspect_err(|e| self.report(e, id, ip_address))
    }

    pub fn validate_no_injection<'a>(
        &self,
        input: &'a str,
        field: &str,
        ip_address: Option<&str>,
    ) -> Result<&'a str, ValidationError> {
        validate_no_injection(input, field).inspect_err(|e| self.report(e, input, ip_address))
    }

    fn report(&self, error: &ValidationError, input: &str, ip_address: Option<&str>) {
        warn!(
            field = %error.field(),
            reason = error.reason(),
            ip = ?ip_address,
            "Rejected invalid input"
        );

        self.audit.log(
            AuditLogEntry::new(
                AuditEventType::SecurityValidationFailure,
                format!("Rejected invalid {}", error.field()),
                AuditOutcome::Failure,
            )
            .with_request_context(ip_address.map(str::to_string), None)
            .with_error(error.to_string())
            .with_metadata("field", error.field())
            .with_metadata("reason", error.reason())
            .with_metadata("length", input.chars().count()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::audit::MemorySink;
    use crate::security::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_uuid_and_mock_ids() {
        assert!(is_valid_uuid("3f2b8c1e-9d4a-4e6b-a1c2-0f9e8d7c6b5a"));
        assert!(is_valid_uuid("3F2B8C1E-9D4A-4E6B-A1C2-0F9E8D7C6B5A"));
        assert!(!is_valid_uuid("3f2b8c1e-9d4a-1e6b-a1c2-0f9e8d7c6b5a"));
        assert!(!is_valid_uuid("not-a-uuid"));

        assert_eq!(validate_id("mock-7", "profileId"), Ok("mock-7"));
        assert!(validate_id("mock-1234", "profileId").is_err());
        assert!(validate_id("mock-abc", "profileId").is_err());
        assert_eq!(
            validate_id("1; DROP TABLE profiles", "profileId"),
            Err(ValidationError::InvalidFormat {
                field: "profileId".to_string()
            })
        );
    }

    #[test]
    fn test_sanitize_html_escapes_markup() {
        assert_eq!(
            sanitize_html(r#"<a href="x">'hi'</a>"#),
            "&lt;a href&#x3D;&quot;x&quot;&gt;&#39;hi&#39;&lt;&#x2F;a&gt;"
        );
        assert_eq!(sanitize_html(""), "");
    }

    #[test]
    fn test_strip_and_storage_sanitizers() {
        assert_eq!(strip_html("<b>Tea</b> at <i>3</i>"), "Tea at 3");
        assert_eq!(
            sanitize_for_storage("  Hello\0 <script>x</script>\n\n world javascript:go onclick=run "),
            "Hello x world go run"
        );
    }

    #[test]
    fn test_sanitize_email() {
        assert_eq!(sanitize_email("  Resident@Example.COM "), "resident@example.com");
        assert_eq!(sanitize_email(&"a".repeat(300)).len(), MAX_EMAIL_LENGTH);
    }

    #[test]
    fn test_injection_patterns() {
        for attack in [
            "' OR 1=1",
            "admin'--",
            "1; drop table users",
            "x' UNION   select password from users",
            "sleep(5)",
            "0x41424344",
            "char(65)",
            "information_schema.tables",
        ] {
            assert!(has_sql_injection_pattern(attack), "{} should be flagged", attack);
        }

        for benign in ["Room 203", "Kitchen shelf B", "mock-12", ""] {
            assert!(!has_sql_injection_pattern(benign), "{} should pass", benign);
        }

        assert_eq!(
            validate_no_injection("' OR 1=1", "note").map_err(|e| e.to_string()),
            Err("note contains invalid characters.".to_string())
        );
    }

    #[test]
    fn test_validator_audits_rejections_only() {
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(sink.clone(), Arc::new(ManualClock::default()));
        let validator = InputValidator::new(audit);

        assert!(validator.validate_id("mock-3", "itemId", None).is_ok());
        assert!(sink.records().is_empty());

        assert!(
            validator
                .validate_no_injection("x' OR 'a'='a", "itemName", Some("192.0.2.8"))
                .is_err()
        );

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, AuditEventType::SecurityValidationFailure);
        assert_eq!(records[0].ip_address.as_deref(), Some("192.0.2.8"));
        let metadata = records[0].metadata.as_ref().expect("metadata present");
        assert_eq!(metadata["field"], "itemName");
        assert_eq!(metadata["reason"], "injection");
        assert_eq!(metadata["length"], 12);
    }
}
