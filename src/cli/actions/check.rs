use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::client::IdpClient;
use crate::policy::engine::PolicyEngine;
use crate::session::cancel::CancelToken;
use crate::session::coordinator::{CoordinatorConfig, SessionCoordinator};
use crate::session::SessionOutcome;
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Handle the check action: establish the current session, authorize the
/// route, and print a JSON report.
///
/// Returns the process exit code: 0 when authorized, 1 otherwise.
pub async fn handle(action: &Action, globals: &GlobalArgs) -> Result<i32> {
    let Action::Check {
        route,
        max_attempts,
        poll_interval,
    } = action;

    let client = Arc::new(IdpClient::new(
        &globals.idp_url,
        &globals.app_url,
        globals.session_token.clone(),
    )?);

    let coordinator = SessionCoordinator::with_config(
        client.clone(),
        CoordinatorConfig {
            poll_interval: *poll_interval,
            max_attempts: *max_attempts,
        },
    );

    let cancel = CancelToken::new();
    let session = match coordinator.establish_session(&cancel).await {
        SessionOutcome::Established(session) => {
            info!("session {} established", session.id);
            Some(session)
        }
        SessionOutcome::TimedOut => {
            info!("no identity-provider session within {max_attempts} attempts");
            None
        }
        SessionOutcome::Cancelled => None,
        SessionOutcome::Failed(reason) => {
            info!("session establishment failed: {reason}");
            None
        }
    };

    if let Some(session) = &session {
        coordinator.sync_application_session(session).await;
    }

    let engine = PolicyEngine::new(client);
    let authorization = engine.authorize(session.as_ref(), route).await;

    let report = json!({
        "route": authorization.route,
        "decision": authorization.decision,
        "redirect_to": authorization.redirect_target(),
        "requirement": authorization.requirement,
        "requirement_source": authorization.source,
        "session": session,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(i32::from(!authorization.decision.is_authorized()))
}
