//! Reconciles the identity-provider session with the application session.
//!
//! Cookie propagation across the provider and application domains is not
//! atomic with the post-login redirect, so establishment is a bounded poll
//! of the whoami endpoint rather than a single check.

use std::sync::Arc;

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::{sleep, Duration};
use tracing::{debug, instrument, warn};

use crate::client::{ClientError, IdpClient};
use crate::error::AuthError;
use crate::policy::SECURITY_SETUP_ROUTE;
use crate::session::cancel::CancelToken;
use crate::session::{Aal, Factor, Session, SessionOutcome};

/// Bounded-poll settings for session establishment.
#[derive(Clone, Copy, Debug)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for CoordinatorConfig {
    // 10 attempts at 500 ms bounds worst-case login latency around 5 s.
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 10,
        }
    }
}

/// Result of a completed coordination sequence.
///
/// Navigation is returned as data; the coordinator never redirects.
#[derive(Clone, Debug)]
pub struct Coordination {
    pub session: Session,
    /// Whether the application session mirror succeeded. Soft: the provider
    /// session stays authoritative either way.
    pub synced: bool,
    pub navigate_to: String,
}

/// Bridges the identity-provider session to the application session.
pub struct SessionCoordinator {
    client: Arc<IdpClient>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(client: Arc<IdpClient>) -> Self {
        Self::with_config(client, CoordinatorConfig::default())
    }

    #[must_use]
    pub fn with_config(client: Arc<IdpClient>, config: CoordinatorConfig) -> Self {
        Self { client, config }
    }

    /// Poll the whoami endpoint until a session materializes.
    ///
    /// Provider unavailability counts as a miss and polling continues; the
    /// attempt cap turns persistent absence into [`SessionOutcome::TimedOut`].
    #[instrument(skip(self, cancel))]
    pub async fn establish_session(&self, cancel: &CancelToken) -> SessionOutcome {
        let mut rng = StdRng::from_entropy();

        for attempt in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                return SessionOutcome::Cancelled;
            }

            match self.client.whoami().await {
                Ok(Some(payload)) => {
                    debug!("session established on attempt {attempt}");
                    return SessionOutcome::Established(payload.into_session());
                }
                Ok(None) => {
                    debug!("no session yet, attempt {attempt}");
                }
                Err(ClientError::InvalidResponse) => {
                    // A bad payload will not improve with retries.
                    warn!("unparseable session payload on attempt {attempt}");
                    return SessionOutcome::Failed(
                        "identity provider returned an unparseable session payload".to_string(),
                    );
                }
                Err(err) => {
                    warn!("session check failed on attempt {attempt}: {err}");
                }
            }

            if attempt < self.config.max_attempts {
                let jitter = rng.gen_range(0.9..1.1);
                let wait = Duration::from_millis(
                    (self.config.poll_interval.as_millis() as f64 * jitter) as u64,
                );
                tokio::select! {
                    () = cancel.cancelled() => return SessionOutcome::Cancelled,
                    () = sleep(wait) => {}
                }
            }
        }

        SessionOutcome::TimedOut
    }

    /// Mirror the provider session into the application session record.
    ///
    /// Non-2xx responses are logged soft failures; the provider session
    /// remains authoritative.
    #[instrument(skip(self, session))]
    pub async fn sync_application_session(&self, session: &Session) -> bool {
        match self.client.sync_application_session(&session.id).await {
            Ok(()) => true,
            Err(err) => {
                warn!("application session sync failed: {err}");
                false
            }
        }
    }

    /// Sequence establishment, application sync, and the enrollment check,
    /// returning the navigation target as a value.
    ///
    /// # Errors
    /// Returns [`AuthError::SessionTimeout`] when no session appears within
    /// the polling window, [`AuthError::Cancelled`] on cancellation, and
    /// [`AuthError::CoordinationFailed`] for other hard failures.
    #[instrument(skip(self, cancel))]
    pub async fn complete_coordination(
        &self,
        method: Factor,
        target_aal: Aal,
        redirect: &str,
        cancel: &CancelToken,
    ) -> Result<Coordination, AuthError> {
        let mut session = match self.establish_session(cancel).await {
            SessionOutcome::Established(session) => session,
            SessionOutcome::TimedOut => {
                return Err(AuthError::SessionTimeout {
                    attempts: self.config.max_attempts,
                })
            }
            SessionOutcome::Cancelled => return Err(AuthError::Cancelled),
            SessionOutcome::Failed(reason) => return Err(AuthError::CoordinationFailed(reason)),
        };

        // The provider may lag behind a just-verified second factor.
        if target_aal == Aal::Aal2 && method.is_second_factor() {
            session.record_step_up(method, Utc::now());
        }

        let synced = self.sync_application_session(&session).await;

        let navigate_to = if session.identity.security_complete() {
            redirect.to_string()
        } else {
            SECURITY_SETUP_ROUTE.to_string()
        };

        Ok(Coordination {
            session,
            synced,
            navigate_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(10),
            max_attempts: 5,
        }
    }

    fn coordinator_for(server: &MockServer) -> SessionCoordinator {
        let client = Arc::new(IdpClient::new(&server.uri(), &server.uri(), None).unwrap());
        SessionCoordinator::with_config(client, fast_config())
    }

    fn whoami_body(role: &str, totp: bool, passkey: bool) -> serde_json::Value {
        json!({
            "id": "sess-coord",
            "authenticator_assurance_level": "aal1",
            "authenticated_at": "2026-08-30T10:00:00Z",
            "authentication_methods": [{ "method": "password" }],
            "identity": {
                "id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                "role": role,
                "email_verified": true,
                "credentials": { "totp": totp, "webauthn": passkey }
            }
        })
    }

    #[tokio::test]
    async fn establishes_after_cookie_propagation_delay() {
        let server = MockServer::start().await;
        // Two misses before the session cookie lands.
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(200).set_body_json(whoami_body("user", true, false)))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server);
        let cancel = CancelToken::new();
        match coordinator.establish_session(&cancel).await {
            SessionOutcome::Established(session) => assert_eq!(session.id, "sess-coord"),
            other => panic!("expected established session, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn times_out_after_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(401))
            .expect(5)
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server);
        let cancel = CancelToken::new();
        assert!(matches!(
            coordinator.establish_session(&cancel).await,
            SessionOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn cancel_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = Arc::new(IdpClient::new(&server.uri(), &server.uri(), None).unwrap());
        let coordinator = SessionCoordinator::with_config(
            client,
            CoordinatorConfig {
                poll_interval: Duration::from_secs(30),
                max_attempts: 10,
            },
        );
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        assert!(matches!(
            coordinator.establish_session(&cancel).await,
            SessionOutcome::Cancelled
        ));
    }

    #[tokio::test]
    async fn sync_failure_is_soft() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(200).set_body_json(whoami_body("user", true, false)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/session/sync"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server);
        let cancel = CancelToken::new();
        let coordination = coordinator
            .complete_coordination(Factor::Totp, Aal::Aal2, "/dashboard", &cancel)
            .await
            .expect("coordination should survive sync failure");
        assert!(!coordination.synced);
        assert_eq!(coordination.navigate_to, "/dashboard");
        assert_eq!(coordination.session.aal(), Aal::Aal2);
    }

    #[tokio::test]
    async fn incomplete_admin_is_routed_to_security_setup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(whoami_body("admin", true, false)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/session/sync"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server);
        let cancel = CancelToken::new();
        let coordination = coordinator
            .complete_coordination(Factor::Totp, Aal::Aal2, "/dashboard/admin", &cancel)
            .await
            .unwrap();
        assert_eq!(coordination.navigate_to, SECURITY_SETUP_ROUTE);
        assert!(coordination.synced);
    }

    #[tokio::test]
    async fn unparseable_whoami_payload_fails_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            // One request per coordination attempt: no retries on bad payloads.
            .expect(2)
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server);
        let cancel = CancelToken::new();
        match coordinator.establish_session(&cancel).await {
            SessionOutcome::Failed(reason) => assert!(reason.contains("unparseable")),
            other => panic!("expected failed outcome, got {other:?}"),
        }

        let err = coordinator
            .complete_coordination(Factor::Totp, Aal::Aal2, "/dashboard", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CoordinationFailed(_)));
    }

    #[tokio::test]
    async fn timeout_surfaces_session_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/whoami"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let coordinator = coordinator_for(&server);
        let cancel = CancelToken::new();
        let err = coordinator
            .complete_coordination(Factor::Passkey, Aal::Aal2, "/dashboard", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionTimeout { attempts: 5 }));
    }
}
