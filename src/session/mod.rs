//! Session and identity types shared across the coordination core.
//!
//! The [`Session`] here is a derived, shorter-lived shadow of the identity
//! provider's session. Its assurance level can only move up; a downgrade
//! requires a new session (logout or expiry).

pub mod cancel;
pub mod coordinator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticator assurance level.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Aal {
    #[default]
    Aal1,
    Aal2,
}

impl Aal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aal1 => "aal1",
            Self::Aal2 => "aal2",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "aal1" => Some(Self::Aal1),
            "aal2" => Some(Self::Aal2),
            _ => None,
        }
    }
}

/// Authentication factors the identity provider reports on a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Password,
    Totp,
    Passkey,
    RecoveryCodes,
}

impl Factor {
    /// Map an identity-provider method name to a factor.
    ///
    /// The provider reports passkeys as `webauthn` and recovery codes as
    /// `lookup_secret`; unknown methods are ignored by callers.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method.trim() {
            "password" => Some(Self::Password),
            "totp" => Some(Self::Totp),
            "webauthn" | "passkey" => Some(Self::Passkey),
            "lookup_secret" | "recovery_codes" => Some(Self::RecoveryCodes),
            _ => None,
        }
    }

    /// Whether this factor counts as a second factor for step-up purposes.
    #[must_use]
    pub fn is_second_factor(self) -> bool {
        !matches!(self, Self::Password)
    }
}

/// Application role carried in identity traits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

/// Which second-factor credential types an identity has enrolled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CredentialSummary {
    #[serde(default)]
    pub totp: bool,
    #[serde(default, rename = "webauthn", alias = "passkey")]
    pub passkey: bool,
    #[serde(default)]
    pub recovery_codes: bool,
}

/// Stable identity owned by the identity provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub credentials: CredentialSummary,
}

impl Identity {
    /// Second factors currently enrolled, in hierarchy order.
    #[must_use]
    pub fn configured_factors(&self) -> Vec<Factor> {
        let mut factors = Vec::new();
        if self.credentials.passkey {
            factors.push(Factor::Passkey);
        }
        if self.credentials.totp {
            factors.push(Factor::Totp);
        }
        if self.credentials.recovery_codes {
            factors.push(Factor::RecoveryCodes);
        }
        factors
    }

    #[must_use]
    pub fn has_second_factor(&self) -> bool {
        self.credentials.totp || self.credentials.passkey
    }

    /// Whether the identity meets its role-specific enrollment requirement.
    ///
    /// Admins must have both TOTP and a passkey enrolled; regular users need
    /// at least one of the two.
    #[must_use]
    pub fn security_complete(&self) -> bool {
        if self.role.is_admin() {
            self.credentials.totp && self.credentials.passkey
        } else {
            self.has_second_factor()
        }
    }
}

/// A snapshot of the identity-provider session.
///
/// Assurance level and verified factors are private so the only mutation path
/// is [`Session::record_step_up`], which can never lower the level.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    aal: Aal,
    pub authenticated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    verified_factors: Vec<Factor>,
    step_up_completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Build a session snapshot.
    ///
    /// A session already at AAL2 is considered stepped up at its
    /// authentication time, which starts the grace-period clock.
    #[must_use]
    pub fn new(
        id: String,
        identity: Identity,
        aal: Aal,
        authenticated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        verified_factors: Vec<Factor>,
    ) -> Self {
        let step_up_completed_at = (aal == Aal::Aal2).then_some(authenticated_at);
        Self {
            id,
            identity,
            aal,
            authenticated_at,
            expires_at,
            verified_factors,
            step_up_completed_at,
        }
    }

    #[must_use]
    pub fn aal(&self) -> Aal {
        self.aal
    }

    #[must_use]
    pub fn verified_factors(&self) -> &[Factor] {
        &self.verified_factors
    }

    #[must_use]
    pub fn step_up_completed_at(&self) -> Option<DateTime<Utc>> {
        self.step_up_completed_at
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Record a successful second-factor verification.
    ///
    /// Upgrades the session to AAL2 and restarts the grace-period clock.
    /// Primary factors are ignored; there is no way to lower the level.
    pub fn record_step_up(&mut self, factor: Factor, at: DateTime<Utc>) {
        if !factor.is_second_factor() {
            return;
        }
        if !self.verified_factors.contains(&factor) {
            self.verified_factors.push(factor);
        }
        self.aal = Aal::Aal2;
        self.step_up_completed_at = Some(at);
    }
}

/// Outcome of the session-establishment poll.
#[derive(Debug)]
pub enum SessionOutcome {
    Established(Session),
    TimedOut,
    Cancelled,
    Failed(String),
}
