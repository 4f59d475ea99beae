//! Second-factor method preference resolution.
//!
//! A fixed safety hierarchy (passkey > TOTP > recovery codes) is balanced
//! against contextual overrides, and an explicit user choice is sticky across
//! resolutions. Recommendations are advisory; a failure here never blocks
//! authentication.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::session::{Factor, Identity};

/// Contextual signals that adjust method priorities.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PreferenceContext {
    /// Passkeys can be unreliable while infrastructure is being updated.
    pub service_update: bool,
    pub high_security: bool,
    pub mobile_device: bool,
}

/// The resolver's advice for one authentication prompt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Recommendation {
    pub primary: Factor,
    pub fallback: Option<Factor>,
    /// Human-readable justification for UI messaging.
    pub reason: String,
    /// Whether the primary comes from a sticky user choice.
    pub sticky: bool,
}

fn base_score(factor: Factor) -> i32 {
    match factor {
        Factor::Passkey => 100,
        Factor::Totp => 80,
        Factor::RecoveryCodes => 20,
        Factor::Password => 0,
    }
}

fn adjusted_score(factor: Factor, context: &PreferenceContext) -> i32 {
    let mut score = base_score(factor);
    match factor {
        Factor::Totp if context.service_update => score += 30,
        Factor::Passkey => {
            if context.high_security {
                score += 20;
            }
            if context.mobile_device {
                score += 15;
            }
        }
        _ => {}
    }
    score
}

fn reason_for(primary: Factor, context: &PreferenceContext) -> String {
    match primary {
        Factor::Totp if context.service_update => {
            "Authenticator app recommended while service updates are in progress".to_string()
        }
        Factor::Passkey if context.mobile_device => {
            "Passkey recommended on this device".to_string()
        }
        Factor::Passkey if context.high_security => {
            "Passkey required strength for this page".to_string()
        }
        Factor::Passkey => "Passkey offers the strongest protection".to_string(),
        Factor::Totp => "Authenticator app is your strongest configured method".to_string(),
        Factor::RecoveryCodes => "Recovery codes are your only configured method".to_string(),
        Factor::Password => "Password".to_string(),
    }
}

/// Resolves which second factor to present, remembering sticky choices.
#[derive(Debug, Default)]
pub struct MethodPreferenceResolver {
    // Ephemeral cache of explicit user choices; durable storage lives
    // behind the application API.
    sticky: Mutex<HashMap<Uuid, Factor>>,
}

impl MethodPreferenceResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist an explicit user choice, respected on subsequent resolutions.
    pub async fn set_preference(&self, identity_id: Uuid, factor: Factor) {
        if !factor.is_second_factor() {
            return;
        }
        self.sticky.lock().await.insert(identity_id, factor);
    }

    pub async fn clear_preference(&self, identity_id: Uuid) {
        self.sticky.lock().await.remove(&identity_id);
    }

    pub async fn preference(&self, identity_id: Uuid) -> Option<Factor> {
        self.sticky.lock().await.get(&identity_id).copied()
    }

    /// Choose the factor to prompt for, or `None` when nothing is configured.
    pub async fn resolve(
        &self,
        identity: &Identity,
        context: &PreferenceContext,
    ) -> Option<Recommendation> {
        let configured = identity.configured_factors();
        if configured.is_empty() {
            return None;
        }

        if let Some(choice) = self.preference(identity.id).await {
            if configured.contains(&choice) {
                let fallback = configured.iter().copied().find(|f| *f != choice);
                return Some(Recommendation {
                    primary: choice,
                    fallback,
                    reason: "Using your saved sign-in preference".to_string(),
                    sticky: true,
                });
            }
            debug!("sticky preference no longer configured, recomputing");
        }

        let mut scored: Vec<(Factor, i32)> = configured
            .iter()
            .map(|&factor| (factor, adjusted_score(factor, context)))
            .collect();
        // Stable tie-break on the base hierarchy.
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(base_score(b.0).cmp(&base_score(a.0))));

        let (primary, _) = scored.first().copied()?;
        let fallback = scored.get(1).map(|(factor, _)| *factor);
        Some(Recommendation {
            primary,
            fallback,
            reason: reason_for(primary, context),
            sticky: false,
        })
    }

    /// Whether to present a choice UI at all: only when more than one strong
    /// (non-recovery) method is configured and no sticky preference exists.
    pub async fn should_offer_choice(&self, identity: &Identity) -> bool {
        let strong_methods = identity
            .configured_factors()
            .iter()
            .filter(|f| !matches!(f, Factor::RecoveryCodes))
            .count();
        strong_methods > 1 && self.preference(identity.id).await.is_none()
    }
}
