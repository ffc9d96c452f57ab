//! Binding and freshness checks on protected headers
//!
//! Checks run in a fixed order (method, path, timestamp, window) and stop at
//! the first failure. The window is open: a skew of exactly `window` seconds
//! in either direction is rejected.
//!
//! There is no record of timestamps already seen, so an identical request
//! replayed inside the window passes again.

use crate::{FRESHNESS_WINDOW_SECONDS, envelope::ProtectedHeaders, errors::BindingError};

/// Validates `htm`, `htu` and `ts` against the request being served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingValidator {
    window_seconds: i64,
}

impl Default for BindingValidator {
    fn default() -> Self {
        Self::new(FRESHNESS_WINDOW_SECONDS)
    }
}

impl BindingValidator {
    /// Validator with a window of `window_seconds` on either side of `now`
    #[must_use]
    pub fn new(window_seconds: i64) -> Self {
        Self { window_seconds }
    }

    /// Half-width of the open window
    #[must_use]
    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    /// Check the headers of a received envelope
    ///
    /// `expected_method` is compared exactly, so pass it lowercase.
    ///
    /// # Errors
    /// Returns the first [`BindingError`] found.
    pub fn validate(
        &self,
        headers: &ProtectedHeaders,
        expected_method: &str,
        expected_path: &str,
        now: i64,
    ) -> Result<(), BindingError> {
        if headers.htm.as_deref() != Some(expected_method) {
            return Err(BindingError::MethodMismatch {
                expected: expected_method.to_string(),
                found: headers.htm.clone(),
            });
        }

        if headers.htu.as_deref() != Some(expected_path) {
            return Err(BindingError::PathMismatch {
                expected: expected_path.to_string(),
                found: headers.htu.clone(),
            });
        }

        let ts = headers
            .timestamp()
            .ok_or(BindingError::MissingOrMalformedTimestamp)?;

        let skew = now.checked_sub(ts).unwrap_or(if ts > 0 { i64::MIN } else { i64::MAX });
        if skew <= -self.window_seconds || skew >= self.window_seconds {
            return Err(BindingError::TimestampOutOfWindow {
                skew_seconds: skew,
                window_seconds: self.window_seconds,
            });
        }

        Ok(())
    }
}
