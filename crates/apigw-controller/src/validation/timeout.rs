//! Route timeout bounds

use apigw_common::MAX_TIMEOUT_SECS;

use super::Failure;

/// Route timeouts must be positive and at most 65 minutes
pub(super) fn validate_timeout(path: &str, timeout: Option<u32>) -> Vec<Failure> {
    match timeout {
        Some(0) => vec![Failure::new(path, "Timeout must not be 0 or lower")],
        Some(secs) if secs > MAX_TIMEOUT_SECS => {
            vec![Failure::new(path, "Timeout must not exceed 65m")]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive_of_65_minutes() {
        assert!(validate_timeout(".spec.timeout", None).is_empty());
        assert!(validate_timeout(".spec.timeout", Some(1)).is_empty());
        assert!(validate_timeout(".spec.timeout", Some(3900)).is_empty());
        assert_eq!(
            validate_timeout(".spec.rules[0].timeout", Some(3901)),
            vec![Failure::new(".spec.rules[0].timeout", "Timeout must not exceed 65m")]
        );
        assert_eq!(
            validate_timeout(".spec.timeout", Some(0)),
            vec![Failure::new(".spec.timeout", "Timeout must not be 0 or lower")]
        );
    }
}
