use crate::error::{CodeSwitchError, Result};
use subtle::ConstantTimeEq;

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Check a presented API key against the configured one. With no key
/// configured every caller is accepted.
pub fn verify_api_key(expected: Option<&str>, presented: Option<&str>) -> Result<()> {
    match (expected, presented) {
        (None, _) => Ok(()),
        (Some(expected), Some(presented)) if constant_time_compare(expected, presented) => Ok(()),
        _ => Err(CodeSwitchError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("secret123", "secret12"));
        assert!(!constant_time_compare("", "secret"));
    }

    #[test]
    fn test_verify_api_key() {
        assert!(verify_api_key(None, None).is_ok());
        assert!(verify_api_key(None, Some("anything")).is_ok());
        assert!(verify_api_key(Some("k"), Some("k")).is_ok());
        assert_eq!(verify_api_key(Some("k"), None), Err(CodeSwitchError::Unauthorized));
        assert_eq!(verify_api_key(Some("k"), Some("x")), Err(CodeSwitchError::Unauthorized));
    }
}
