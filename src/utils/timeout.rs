//! Timeout validation for configured browser waits

use std::time::Duration;

use crate::error::ConfigError;

/// Maximum bound for navigation waits (5 minutes)
/// Covers the portal's slow JSF postbacks on a bad day
pub const MAX_NAVIGATION_TIMEOUT_MS: u64 = 300_000; // 5 minutes

/// Maximum bound for element waits and the capture window (2 minutes)
pub const MAX_INTERACTION_TIMEOUT_MS: u64 = 120_000;

/// Validate a navigation bound.
///
/// # Example
/// ```rust
/// use portal_courier::utils::validate_navigation_timeout;
/// let timeout = validate_navigation_timeout("navigation_ms", 45_000).unwrap();
/// assert_eq!(timeout.as_secs(), 45);
/// ```
pub fn validate_navigation_timeout(field: &str, ms: u64) -> Result<Duration, ConfigError> {
    validate(field, ms, MAX_NAVIGATION_TIMEOUT_MS)
}

/// Validate an element-interaction bound (element waits, capture window).
pub fn validate_interaction_timeout(field: &str, ms: u64) -> Result<Duration, ConfigError> {
    validate(field, ms, MAX_INTERACTION_TIMEOUT_MS)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn validate(field: &str, ms: u64, max_ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    if ms > max_ms {
        return Err(ConfigError::Invalid(format!(
            "{field} cannot exceed {}ms ({:.1} minutes). Received: {}ms",
            max_ms,
            max_ms as f64 / 60_000.0,
            ms
        )));
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_values_within_bounds() {
        assert_eq!(
            validate_interaction_timeout("action_ms", 30_000).unwrap(),
            Duration::from_secs(30)
        );
        assert!(validate_navigation_timeout("navigation_ms", MAX_NAVIGATION_TIMEOUT_MS).is_ok());
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn rejects_zero_and_oversized_values() {
        assert!(validate_interaction_timeout("action_ms", 0).is_err());
        let err = validate_interaction_timeout("capture_window_ms", 600_000).unwrap_err();
        assert!(err.to_string().contains("capture_window_ms"));
    }
}
