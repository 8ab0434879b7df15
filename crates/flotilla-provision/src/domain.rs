//! Hostname normalization and validation.
//!
//! Normalization trims whitespace, lower-cases, and strips exactly one
//! trailing dot. Validation enforces the hostname grammar: labels of 1–63
//! alphanumeric-or-hyphen characters with no leading hyphen, a TLD of at
//! least 2 characters, and a total length of at most 253.

use crate::error::{ProvisionError, ProvisionResult};

/// Maximum total hostname length.
const MAX_HOSTNAME_LEN: usize = 253;
/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// Normalize a raw hostname: trim, lower-case, strip one trailing dot.
pub fn normalize_hostname(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_lowercase();
    match trimmed.strip_suffix('.') {
        Some(stripped) => stripped.to_string(),
        None => trimmed,
    }
}

/// Normalize and validate a hostname, naming `field` in any error.
pub fn validate_hostname(field: &str, raw: &str) -> ProvisionResult<String> {
    let hostname = normalize_hostname(raw);

    if hostname.is_empty() {
        return Err(ProvisionError::validation(field, "hostname is empty"));
    }
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(ProvisionError::validation(
            field,
            format!("hostname exceeds {MAX_HOSTNAME_LEN} characters"),
        ));
    }

    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 2 {
        return Err(ProvisionError::validation(
            field,
            format!("'{hostname}' is not a fully-qualified hostname"),
        ));
    }

    for label in &labels {
        if label.is_empty() {
            return Err(ProvisionError::validation(
                field,
                format!("'{hostname}' contains an empty label"),
            ));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(ProvisionError::validation(
                field,
                format!("label '{label}' exceeds {MAX_LABEL_LEN} characters"),
            ));
        }
        if label.starts_with('-') {
            return Err(ProvisionError::validation(
                field,
                format!("label '{label}' starts with a hyphen"),
            ));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ProvisionError::validation(
                field,
                format!("label '{label}' contains invalid characters"),
            ));
        }
    }

    // The TLD must be at least two characters.
    let tld = labels.last().expect("at least two labels");
    if tld.len() < 2 {
        return Err(ProvisionError::validation(
            field,
            format!("top-level domain '{tld}' is too short"),
        ));
    }

    Ok(hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_domains() {
        assert_eq!(validate_hostname("domain", "example.com").unwrap(), "example.com");
        assert_eq!(
            validate_hostname("domain", "sub.example.co").unwrap(),
            "sub.example.co"
        );
    }

    #[test]
    fn normalizes_case_and_trailing_dot() {
        assert_eq!(normalize_hostname("Example.COM."), "example.com");
        // Exactly one trailing dot is stripped.
        assert_eq!(normalize_hostname("example.com.."), "example.com.");
        assert_eq!(validate_hostname("domain", "  Example.COM. ").unwrap(), "example.com");
    }

    #[test]
    fn rejects_leading_hyphen() {
        assert!(validate_hostname("domain", "-bad.com").is_err());
    }

    #[test]
    fn rejects_empty_label() {
        assert!(validate_hostname("domain", "a..b.com").is_err());
    }

    #[test]
    fn rejects_oversized_label() {
        let label = "a".repeat(300);
        assert!(validate_hostname("domain", &format!("{label}.com")).is_err());
    }

    #[test]
    fn rejects_short_tld() {
        assert!(validate_hostname("domain", "example.c").is_err());
    }

    #[test]
    fn rejects_bare_label() {
        assert!(validate_hostname("domain", "localhost").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(validate_hostname("domain", "exa_mple.com").is_err());
        assert!(validate_hostname("domain", "exam ple.com").is_err());
    }

    #[test]
    fn rejects_overlong_hostname() {
        let hostname = format!("{}.com", "a.".repeat(130));
        assert!(validate_hostname("domain", &hostname).is_err());
    }

    #[test]
    fn error_names_the_field() {
        let err = validate_hostname("alias", "-bad.com").unwrap_err();
        assert!(err.to_string().contains("alias"));
    }
}
