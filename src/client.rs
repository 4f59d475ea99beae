//! HTTP client for the identity-provider and application boundary endpoints.
//!
//! The core is a consumer of these APIs, never a provider: session
//! introspection lives on the identity provider, while AAL policy, passkey
//! ceremonies, biometric audit records, and the session mirror live on the
//! application backend.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use url::Url;

use crate::policy::AalRequirement;
use crate::session::{Aal, Factor, Identity, Session};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Transport-level failures mapped from HTTP status classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Unavailable")]
    Unavailable,
    #[error("Invalid response")]
    InvalidResponse,
}

/// Normalize a base URL into `scheme://host:port` and append a path.
///
/// # Errors
/// Returns an error if `base` cannot be parsed, has no host, or uses an
/// unsupported scheme.
pub fn endpoint_url(base: &str, path: &str) -> Result<String> {
    let url = Url::parse(base)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// Wire shape of `GET /session/whoami`.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoamiResponse {
    pub id: String,
    #[serde(default)]
    pub authenticator_assurance_level: Option<Aal>,
    #[serde(default)]
    pub authenticated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authentication_methods: Vec<AuthenticationMethodRef>,
    pub identity: Identity,
}

/// One entry of the provider's `authentication_methods` list.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationMethodRef {
    pub method: String,
}

impl WhoamiResponse {
    /// Convert the provider payload into the application session snapshot.
    #[must_use]
    pub fn into_session(self) -> Session {
        let verified_factors: Vec<Factor> = self
            .authentication_methods
            .iter()
            .filter_map(|m| Factor::from_method(&m.method))
            .collect();
        let authenticated_at = self.authenticated_at.unwrap_or_else(Utc::now);
        Session::new(
            self.id,
            self.identity,
            self.authenticator_assurance_level.unwrap_or_default(),
            authenticated_at,
            self.expires_at,
            verified_factors,
        )
    }
}

/// Client for the identity-provider and application backends.
#[derive(Clone, Debug)]
pub struct IdpClient {
    client: Client,
    idp_url: String,
    app_url: String,
    session_token: Option<SecretString>,
}

impl IdpClient {
    /// Build a client for the given identity-provider and application bases.
    ///
    /// # Errors
    /// Returns an error if either base URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(idp_url: &str, app_url: &str, session_token: Option<SecretString>) -> Result<Self> {
        let idp_url = endpoint_url(idp_url, "")?;
        let app_url = endpoint_url(app_url, "")?;
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            client,
            idp_url,
            app_url,
            session_token,
        })
    }

    fn with_session_token(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.session_token {
            Some(token) => request.header(SESSION_TOKEN_HEADER, token.expose_secret()),
            None => request,
        }
    }

    /// Introspect the identity-provider session.
    ///
    /// `Ok(None)` means unauthenticated (any 4xx); server errors and
    /// transport failures map to [`ClientError::Unavailable`].
    ///
    /// # Errors
    /// Returns `ClientError` if the provider is unavailable or the payload
    /// cannot be parsed.
    pub async fn whoami(&self) -> Result<Option<WhoamiResponse>, ClientError> {
        let url = format!("{}/session/whoami", self.idp_url);
        let span = info_span!("idp.whoami", http.method = "GET", url = %url);
        let response = self
            .with_session_token(self.client.get(&url))
            .send()
            .instrument(span)
            .await
            .map_err(|_| ClientError::Unavailable)?;

        let status = response.status();
        if status.is_client_error() {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ClientError::Unavailable);
        }

        let payload: WhoamiResponse = response
            .json()
            .await
            .map_err(|_| ClientError::InvalidResponse)?;
        Ok(Some(payload))
    }

    /// Fetch the AAL requirement for a route from the policy endpoint.
    ///
    /// # Errors
    /// Returns `ClientError` on transport failure, non-success status, or an
    /// unparseable body. Callers degrade to the fallback prefix list.
    pub async fn aal_requirements(&self, route: &str) -> Result<AalRequirement, ClientError> {
        let url = format!("{}/auth/aal-requirements", self.app_url);
        let span = info_span!("policy.aal_requirements", http.method = "GET", url = %url, route = %route);
        let response = self
            .with_session_token(self.client.get(&url).query(&[("route", route)]))
            .send()
            .instrument(span)
            .await
            .map_err(|_| ClientError::Unavailable)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::Unavailable);
        }

        response
            .json()
            .await
            .map_err(|_| ClientError::InvalidResponse)
    }

    /// Mirror the identity-provider session into the application session.
    ///
    /// # Errors
    /// Returns `ClientError` on transport failure or non-success status; the
    /// coordinator treats these as soft failures since the provider session
    /// stays authoritative.
    pub async fn sync_application_session(&self, session_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/auth/session/sync", self.app_url);
        let span = info_span!("app.session_sync", http.method = "POST", url = %url);
        let response = self
            .with_session_token(
                self.client
                    .post(&url)
                    .json(&json!({ "session_id": session_id })),
            )
            .send()
            .instrument(span)
            .await
            .map_err(|_| ClientError::Unavailable)?;

        if response.status().is_success() {
            Ok(())
        } else if response.status().is_client_error() {
            Err(ClientError::Unauthorized)
        } else {
            Err(ClientError::Unavailable)
        }
    }

    /// Begin a passkey authentication ceremony, returning the challenge.
    ///
    /// # Errors
    /// Returns `ClientError` on transport failure, non-success status, or an
    /// unparseable body.
    pub async fn passkey_authenticate_start(&self) -> Result<Value, ClientError> {
        self.post_json("/auth/passkey/authenticate", &json!({}))
            .await
    }

    /// Complete a passkey authentication ceremony with the browser response.
    ///
    /// # Errors
    /// Returns `ClientError` on transport failure, non-success status, or an
    /// unparseable body.
    pub async fn passkey_authenticate_verify(&self, payload: &Value) -> Result<Value, ClientError> {
        self.post_json("/auth/passkey/verify", payload).await
    }

    /// Persist an assertion-derived authentication record.
    ///
    /// # Errors
    /// Returns `ClientError` on transport failure or non-success status;
    /// callers log and continue.
    pub async fn record_authentication(&self, record: &Value) -> Result<(), ClientError> {
        self.post_json("/biometric/record-auth", record)
            .await
            .map(|_| ())
    }

    /// Persist credential metadata for display in account settings.
    ///
    /// # Errors
    /// Returns `ClientError` on transport failure or non-success status;
    /// callers log and continue.
    pub async fn record_credential(&self, record: &Value) -> Result<(), ClientError> {
        self.post_json("/biometric/record-credential", record)
            .await
            .map(|_| ())
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, ClientError> {
        let url = format!("{}{path}", self.app_url);
        let span = info_span!("app.post", http.method = "POST", url = %url);
        let response = self
            .with_session_token(self.client.post(&url).json(payload))
            .send()
            .instrument(span)
            .await
            .map_err(|_| ClientError::Unavailable)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::Unavailable);
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|_| ClientError::InvalidResponse)
    }
}
