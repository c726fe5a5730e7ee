// Timing-Safe Comparison Module
// Constant-time equality for bearer secrets and other shared credentials

use subtle::ConstantTimeEq;

/// Compare two strings without leaking where (or whether) they differ through timing.
///
/// A length mismatch still pays for a full comparison of `a` against itself
/// before returning `false`.
pub fn timing_safe_equal(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    if a.len() != b.len() {
        std::hint::black_box(a.ct_eq(a));
        return false;
    }

    a.ct_eq(b).into()
}

/// Validate an `Authorization` header against the scheduled-job secret.
///
/// Anything other than exactly `Bearer <secret>` is rejected, as is every
/// header when no secret has been configured.
pub fn validate_cron_secret(authorization: Option<&str>, secret: Option<&str>) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return false;
    };
    let Some(authorization) = authorization.filter(|h| !h.is_empty()) else {
        return false;
    };

    timing_safe_equal(authorization, &format!("Bearer {}", secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_strings() {
        assert!(timing_safe_equal("hello", "hello"));
        assert!(timing_safe_equal("Bearer secret123", "Bearer secret123"));
        assert!(timing_safe_equal("", ""));
        assert!(timing_safe_equal("日本語", "日本語"));
        assert!(timing_safe_equal("🔐🔑", "🔐🔑"));
    }

    #[test]
    fn test_different_strings() {
        assert!(!timing_safe_equal("hello", "world"));
        assert!(!timing_safe_equal("abc", "abd"));
        assert!(!timing_safe_equal("Bearer secret123", "Bearer secret456"));
    }

    #[test]
    fn test_different_lengths() {
        assert!(!timing_safe_equal("short", "longer string"));
        assert!(!timing_safe_equal("", "not empty"));
        assert!(!timing_safe_equal("abc", "ab"));
    }

    #[test]
    fn test_symmetry() {
        let pairs = [("a", "a"), ("a", "b"), ("abc", "ab"), ("", "x")];
        for (a, b) in pairs {
            assert_eq!(timing_safe_equal(a, b), timing_safe_equal(b, a));
        }
    }

    #[test]
    fn test_cron_secret_accepts_exact_bearer() {
        assert!(validate_cron_secret(
            Some("Bearer test-secret-123"),
            Some("test-secret-123")
        ));
    }

    #[test]
    fn test_cron_secret_rejects_everything_else() {
        let secret = Some("test-secret-123");
        assert!(!validate_cron_secret(Some("Bearer wrong-secret"), secret));
        assert!(!validate_cron_secret(Some("Bearer "), secret));
        assert!(!validate_cron_secret(Some("test-secret-123"), secret));
        assert!(!validate_cron_secret(Some("bearer test-secret-123"), secret));
        assert!(!validate_cron_secret(Some("BEARER test-secret-123"), secret));
        assert!(!validate_cron_secret(Some(""), secret));
        assert!(!validate_cron_secret(None, secret));
    }

    #[test]
    fn test_cron_secret_unset() {
        assert!(!validate_cron_secret(Some("Bearer test-secret-123"), None));
        assert!(!validate_cron_secret(Some("Bearer "), Some("")));
    }
}
