// Masking Module
// Redacts sensitive values before they reach log sinks

use serde_json::{Map, Value};

/// Metadata fields masked by default in audit records
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &["password", "token", "secret", "apiKey"];

/// Mask a single value: `first2***last2`, or `***` for values of four characters or fewer
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 4 {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "***".to_string()
    }
}

/// Keep only the first `visible` characters followed by `***`
pub fn mask_prefix(value: &str, visible: usize) -> String {
    let head: String = value.chars().take(visible).collect();
    format!("{}***", head)
}

/// Mask an email for logs, leaving the first three characters
pub fn mask_email(email: &str) -> String {
    mask_prefix(email, 3)
}

/// Return a copy of `data` with every listed field masked.
///
/// Fields that are absent or hold a falsy value (null, false, 0, empty string)
/// are left untouched.
pub fn mask_sensitive_data<S: AsRef<str>>(data: &Map<String, Value>, fields: &[S]) -> Map<String, Value> {
    let mut masked = data.clone();
    for field in fields {
        let field = field.as_ref();
        if let Some(value) = masked.get_mut(field)
            && is_truthy(value)
        {
            let text = match &*value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            *value = Value::String(mask_value(&text));
        }
    }
    masked
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_values_mask_completely() {
        assert_eq!(mask_value("abcd"), "***");
        assert_eq!(mask_value("a"), "***");
        assert_eq!(mask_value(""), "***");
    }

    #[test]
    fn test_long_values_keep_edges() {
        assert_eq!(mask_value("0123456789"), "01***89");
        assert_eq!(mask_value("abcde"), "ab***de");
        assert_eq!(mask_value("パスワード秘密"), "パス***秘密");
    }

    #[test]
    fn test_mask_sensitive_data_only_touches_listed_fields() {
        let data = json!({
            "password": "hunter2hunter2",
            "token": "abc",
            "apiKey": "",
            "secret": null,
            "email": "someone@example.com"
        });
        let map = data.as_object().expect("object literal").clone();

        let masked = mask_sensitive_data(&map, DEFAULT_SENSITIVE_FIELDS);

        assert_eq!(masked["password"], json!("hu***r2"));
        assert_eq!(masked["token"], json!("***"));
        assert_eq!(masked["apiKey"], json!(""));
        assert_eq!(masked["secret"], Value::Null);
        assert_eq!(masked["email"], json!("someone@example.com"));
    }

    #[test]
    fn test_non_string_values_use_their_string_form() {
        let map = json!({ "token": 1234567 })
            .as_object()
            .expect("object literal")
            .clone();

        let masked = mask_sensitive_data(&map, &["token"]);
        assert_eq!(masked["token"], json!("12***67"));
    }

    #[test]
    fn test_masks_every_truthy_value_kind() {
        let map = json!({
            "password": "hunter2hunter2",
            "token": true,
            "secret": ["a", "b"],
            "apiKey": { "k": 1 }
        })
        .as_object()
        .expect("object literal")
        .clone();

        let masked = mask_sensitive_data(&map, DEFAULT_SENSITIVE_FIELDS);

        assert_eq!(masked["password"], json!("hu***r2"));
        assert_eq!(masked["token"], json!("***"));
        assert_eq!(masked["secret"], json!("[\"***\"]"));
        assert_eq!(masked["apiKey"], json!("{\"***1}"));
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "ali***");
        assert_eq!(mask_email("al"), "al***");
    }
}
