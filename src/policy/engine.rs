//! Requirement lookup with caching and fail-closed degradation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::client::IdpClient;
use crate::policy::{decide, AalRequirement, Decision};
use crate::session::{Aal, Session};

/// How long a per-route requirement lookup stays cached.
pub const REQUIREMENT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Known-sensitive route prefixes used when the policy endpoint is down.
/// Deliberately fail-closed: better to over-challenge than silently expose.
const FALLBACK_SENSITIVE_PREFIXES: &[&str] = &[
    "/dashboard/admin",
    "/dashboard/reports",
    "/admin",
    "/settings/security",
];

/// Shorter grace window while policy is unavailable.
const FALLBACK_GRACE_PERIOD_MINUTES: i64 = 5;

/// Where a requirement came from, for logging and the CLI report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementSource {
    Policy,
    Cache,
    Fallback,
}

struct CachedRequirement {
    requirement: AalRequirement,
    fetched_at: Instant,
}

/// The full result of authorizing one navigation.
#[derive(Clone, Debug, Serialize)]
pub struct Authorization {
    pub route: String,
    pub decision: Decision,
    pub requirement: AalRequirement,
    pub source: RequirementSource,
}

impl Authorization {
    #[must_use]
    pub fn redirect_target(&self) -> Option<&'static str> {
        self.decision.redirect_target()
    }
}

/// Per-route AAL requirement lookup with a TTL cache.
pub struct PolicyEngine {
    client: Arc<IdpClient>,
    cache: Mutex<HashMap<String, CachedRequirement>>,
    ttl: Duration,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(client: Arc<IdpClient>) -> Self {
        Self::with_ttl(client, REQUIREMENT_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(client: Arc<IdpClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Requirement used when the policy endpoint cannot be reached.
    #[must_use]
    pub fn fallback_requirement(route: &str) -> AalRequirement {
        let sensitive = FALLBACK_SENSITIVE_PREFIXES
            .iter()
            .any(|prefix| route.starts_with(prefix));
        AalRequirement {
            requires_aal2: sensitive,
            min_aal: if sensitive { Aal::Aal2 } else { Aal::Aal1 },
            reason: "policy lookup unavailable; fallback prefix list".to_string(),
            grace_period_minutes: FALLBACK_GRACE_PERIOD_MINUTES,
        }
    }

    /// Look up the requirement for a route, serving cached entries within the
    /// TTL and degrading to the fallback list on lookup failure. Fallback
    /// results are not cached so recovery is picked up promptly.
    #[instrument(skip(self))]
    pub async fn requirement_for(&self, route: &str) -> (AalRequirement, RequirementSource) {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(route) {
                if cached.fetched_at.elapsed() < self.ttl {
                    debug!("requirement cache hit for {route}");
                    return (cached.requirement.clone(), RequirementSource::Cache);
                }
            }
        }

        match self.client.aal_requirements(route).await {
            Ok(requirement) => {
                let mut cache = self.cache.lock().await;
                cache.insert(
                    route.to_string(),
                    CachedRequirement {
                        requirement: requirement.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                (requirement, RequirementSource::Policy)
            }
            Err(err) => {
                warn!("policy lookup failed for {route}: {err}; using fallback list");
                (Self::fallback_requirement(route), RequirementSource::Fallback)
            }
        }
    }

    /// Authorize a navigation for an already-established session snapshot.
    #[instrument(skip(self, session))]
    pub async fn authorize(&self, session: Option<&Session>, route: &str) -> Authorization {
        let (requirement, source) = self.requirement_for(route).await;
        let decision = match session {
            Some(session) => decide(&session.identity, Some(session), &requirement, Utc::now()),
            None => Decision::Unauthenticated,
        };
        Authorization {
            route: route.to_string(),
            decision,
            requirement,
            source,
        }
    }

    /// Authorize a navigation, introspecting the current session first.
    ///
    /// A session check that errors is treated as "needs step-up" rather than
    /// granting access on ambiguous state, whether or not the route is gated.
    #[instrument(skip(self))]
    pub async fn authorize_current(&self, route: &str) -> Authorization {
        let (requirement, source) = self.requirement_for(route).await;
        let decision = match self.client.whoami().await {
            Ok(Some(payload)) => {
                let session = payload.into_session();
                decide(&session.identity, Some(&session), &requirement, Utc::now())
            }
            Ok(None) => Decision::Unauthenticated,
            Err(err) => {
                // Never grant access on ambiguous session state, gated or not.
                warn!("session check failed for {route}: {err}; failing closed");
                Decision::NeedsStepUp
            }
        };
        Authorization {
            route: route.to_string(),
            decision,
            requirement,
            source,
        }
    }
}
