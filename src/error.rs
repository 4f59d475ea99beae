use thiserror::Error;

/// Hard failures surfaced by the coordination flows.
///
/// Step-up and enrollment requirements are not errors; they are
/// [`crate::policy::Decision`] variants, since they are expected control-flow
/// outcomes of a protected navigation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity-provider session never materialized within the bounded
    /// polling window. User-visible; callers should offer a retry.
    #[error("identity provider session did not appear after {attempts} attempts")]
    SessionTimeout { attempts: u32 },

    /// Coordination was cancelled, typically by navigating away mid-check.
    #[error("session coordination cancelled")]
    Cancelled,

    /// A non-recoverable failure in the coordination sequence.
    #[error("session coordination failed: {0}")]
    CoordinationFailed(String),
}
