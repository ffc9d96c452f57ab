//! Grant policy capability
//!
//! The grant pipeline never decides on its own; it asks the
//! [`PolicyDecision`] it was constructed with.

use std::fmt;

use crate::request::TokenRequest;

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Issue a token
    Allow,
    /// Refuse the request
    Deny {
        /// Why the request was refused
        reason: String,
    },
}

impl Decision {
    /// Deny with a reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    /// Whether this decision allows the grant
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether a verified request is granted
pub trait PolicyDecision: Send + Sync + fmt::Debug {
    /// Evaluate a request whose signature and binding already checked out
    fn decide(&self, request: &TokenRequest) -> Decision;
}

/// Grants every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyDecision for AllowAll {
    fn decide(&self, _request: &TokenRequest) -> Decision {
        Decision::Allow
    }
}

/// Refuses every request
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl PolicyDecision for DenyAll {
    fn decide(&self, _request: &TokenRequest) -> Decision {
        Decision::deny("All requests are denied")
    }
}
