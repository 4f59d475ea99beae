//! AAL policy: per-route requirements and the authorization decision.
//!
//! `decide` is the single authoritative policy function; it is pure so the
//! state machine can be tested without any network or UI. The engine in
//! [`engine`] layers requirement lookup, caching, and fail-closed fallbacks
//! on top of it.

pub mod engine;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{Aal, Identity, Session};

/// Redirect target for unauthenticated navigations.
pub const LOGIN_ROUTE: &str = "/login";
/// Redirect target for identities that still need factor enrollment.
/// Enrollment is TOTP-first so a working second factor exists before any
/// platform-authenticator dependency enters the picture.
pub const SECURITY_SETUP_ROUTE: &str = "/security/setup";
/// Redirect target for the step-up (AAL1 to AAL2) flow.
pub const STEP_UP_ROUTE: &str = "/security/step-up";

fn default_grace_period_minutes() -> i64 {
    15
}

/// Per-route policy record returned by the policy endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AalRequirement {
    pub requires_aal2: bool,
    #[serde(default)]
    pub min_aal: Aal,
    #[serde(default)]
    pub reason: String,
    /// Minutes during which a prior step-up remains valid.
    #[serde(default = "default_grace_period_minutes")]
    pub grace_period_minutes: i64,
}

impl AalRequirement {
    /// Requirement for a route with no step-up gate.
    #[must_use]
    pub fn open(reason: &str) -> Self {
        Self {
            requires_aal2: false,
            min_aal: Aal::Aal1,
            reason: reason.to_string(),
            grace_period_minutes: default_grace_period_minutes(),
        }
    }
}

/// Outcome of a protected navigation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Unauthenticated,
    NeedsEnrollment,
    NeedsStepUp,
    Authorized,
}

impl Decision {
    #[must_use]
    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }

    /// Where to send the user instead of the protected content, if anywhere.
    #[must_use]
    pub fn redirect_target(self) -> Option<&'static str> {
        match self {
            Self::Unauthenticated => Some(LOGIN_ROUTE),
            Self::NeedsEnrollment => Some(SECURITY_SETUP_ROUTE),
            Self::NeedsStepUp => Some(STEP_UP_ROUTE),
            Self::Authorized => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NeedsEnrollment => "needs_enrollment",
            Self::NeedsStepUp => "needs_step_up",
            Self::Authorized => "authorized",
        }
    }
}

/// Decide whether a session satisfies a route's AAL requirement.
///
/// The machine, per protected navigation:
/// - no session, or an expired one, is unauthenticated;
/// - a non-gated route is authorized for any authenticated session;
/// - a gated route first requires role-complete enrollment (admins: TOTP and
///   passkey; regular users: at least one), then a step-up completed within
///   the requirement's grace period.
#[must_use]
pub fn decide(
    identity: &Identity,
    session: Option<&Session>,
    requirement: &AalRequirement,
    now: DateTime<Utc>,
) -> Decision {
    let Some(session) = session else {
        return Decision::Unauthenticated;
    };
    if session.is_expired(now) {
        return Decision::Unauthenticated;
    }
    if !requirement.requires_aal2 {
        return Decision::Authorized;
    }
    if !identity.security_complete() {
        return Decision::NeedsEnrollment;
    }
    if session.aal() < Aal::Aal2 {
        return Decision::NeedsStepUp;
    }
    match session.step_up_completed_at() {
        Some(completed_at)
            if now - completed_at < Duration::minutes(requirement.grace_period_minutes) =>
        {
            Decision::Authorized
        }
        // Grace elapsed, or an AAL2 session with no recorded step-up time:
        // re-verify rather than trust ambiguous state.
        _ => Decision::NeedsStepUp,
    }
}
