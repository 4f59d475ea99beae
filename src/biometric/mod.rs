//! WebAuthn authenticator-data flag interpretation.
//!
//! The identity provider treats all WebAuthn assertions as a single factor
//! regardless of verification strength, so the effective assurance upgrade
//! for user-verifying (biometric or PIN) authenticators is decided here by
//! reading the flags byte of the raw authenticator data.

use std::sync::{Arc, OnceLock};

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::client::IdpClient;
use crate::session::{Factor, Session};

/// Bit 0: user present (UP).
pub const FLAG_USER_PRESENT: u8 = 0x01;
/// Bit 2: user verified (UV) — biometric or PIN.
pub const FLAG_USER_VERIFIED: u8 = 0x04;
/// Bit 6: attested credential data included (AT).
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
/// Bit 7: extension data included (ED).
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

/// Authenticator data is 32 bytes of RP ID hash, then the flags byte.
const FLAGS_OFFSET: usize = 32;
const MIN_AUTHENTICATOR_DATA_LEN: usize = 33;

/// Decoded flags byte of a WebAuthn authenticator-data buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct AuthenticatorFlags {
    pub user_present: bool,
    pub user_verified: bool,
    pub attested_credential_data: bool,
    pub extension_data: bool,
}

impl AuthenticatorFlags {
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            user_present: byte & FLAG_USER_PRESENT != 0,
            user_verified: byte & FLAG_USER_VERIFIED != 0,
            attested_credential_data: byte & FLAG_ATTESTED_CREDENTIAL_DATA != 0,
            extension_data: byte & FLAG_EXTENSION_DATA != 0,
        }
    }
}

/// Declared or inferred authenticator attachment.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorType {
    Platform,
    CrossPlatform,
    Unknown,
}

impl AuthenticatorType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::CrossPlatform => "cross-platform",
            Self::Unknown => "unknown",
        }
    }

    /// Classify from the credential's declared attachment.
    #[must_use]
    pub fn from_attachment(attachment: Option<&str>) -> Option<Self> {
        match attachment.map(str::trim) {
            Some("platform") => Some(Self::Platform),
            Some("cross-platform") => Some(Self::CrossPlatform),
            _ => None,
        }
    }

    /// Best-effort inference from the user agent. Never authoritative; only
    /// used when the attachment is absent.
    #[must_use]
    pub fn infer_from_user_agent(user_agent: &str) -> Self {
        static PLATFORM_UA: OnceLock<Option<Regex>> = OnceLock::new();
        let re = PLATFORM_UA.get_or_init(|| {
            Regex::new(r"(?i)(iphone|ipad|android|macintosh|windows nt.*touch|mobile)").ok()
        });
        match re {
            Some(re) if re.is_match(user_agent) => Self::Platform,
            _ => Self::Unknown,
        }
    }
}

/// Raw WebAuthn assertion as produced by one authentication ceremony.
///
/// Ephemeral: consumed immediately to update session assurance, persisted
/// only as an audit record.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthenticatorAssertion {
    pub credential_id: String,
    /// Base64url-encoded authenticator data.
    #[serde(default)]
    pub authenticator_data: Option<String>,
    #[serde(default)]
    pub authenticator_attachment: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Why an assertion could not be interpreted. Internal only; malformed
/// assertions are treated as non-biometric, never surfaced to the user.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum AssertionError {
    #[error("missing authenticator data")]
    MissingAuthenticatorData,
    #[error("authenticator data is not valid base64url")]
    InvalidEncoding,
    #[error("authenticator data shorter than {MIN_AUTHENTICATOR_DATA_LEN} bytes")]
    Truncated,
}

/// Outcome of interpreting one assertion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct BiometricDetection {
    pub user_verified: bool,
    pub user_present: bool,
    pub authenticator: AuthenticatorType,
    /// `None` when the assertion was malformed.
    pub flags: Option<AuthenticatorFlags>,
}

fn parse_flags(assertion: &AuthenticatorAssertion) -> Result<AuthenticatorFlags, AssertionError> {
    let encoded = assertion
        .authenticator_data
        .as_deref()
        .filter(|data| !data.is_empty())
        .ok_or(AssertionError::MissingAuthenticatorData)?;
    let data =
        Base64UrlUnpadded::decode_vec(encoded).map_err(|_| AssertionError::InvalidEncoding)?;
    if data.len() < MIN_AUTHENTICATOR_DATA_LEN {
        return Err(AssertionError::Truncated);
    }
    let byte = data
        .get(FLAGS_OFFSET)
        .copied()
        .ok_or(AssertionError::Truncated)?;
    Ok(AuthenticatorFlags::from_byte(byte))
}

fn classify(assertion: &AuthenticatorAssertion) -> AuthenticatorType {
    if let Some(declared) =
        AuthenticatorType::from_attachment(assertion.authenticator_attachment.as_deref())
    {
        return declared;
    }
    assertion
        .user_agent
        .as_deref()
        .map_or(AuthenticatorType::Unknown, |ua| {
            AuthenticatorType::infer_from_user_agent(ua)
        })
}

/// Interpret an assertion's flags to detect user-verifying authentication.
///
/// Malformed or truncated authenticator data yields a non-biometric result
/// instead of an error; authorization must not hinge on ambiguous input.
#[must_use]
pub fn detect_biometric(assertion: &AuthenticatorAssertion) -> BiometricDetection {
    let authenticator = classify(assertion);
    match parse_flags(assertion) {
        Ok(flags) => {
            debug!(
                "assertion flags: up={} uv={} at={} ed={}",
                flags.user_present,
                flags.user_verified,
                flags.attested_credential_data,
                flags.extension_data
            );
            BiometricDetection {
                user_verified: flags.user_verified,
                user_present: flags.user_present,
                authenticator,
                flags: Some(flags),
            }
        }
        Err(err) => {
            warn!("skipping biometric detection: {err}");
            BiometricDetection {
                user_verified: false,
                user_present: false,
                authenticator,
                flags: None,
            }
        }
    }
}

/// Processes assertions: detection, session upgrade, audit recording.
pub struct BiometricService {
    client: Arc<IdpClient>,
}

impl BiometricService {
    #[must_use]
    pub fn new(client: Arc<IdpClient>) -> Self {
        Self { client }
    }

    /// Interpret an assertion, upgrade the session when user verification is
    /// present, and record the outcome for account settings.
    ///
    /// Recording is soft-fail: every processed assertion is reported, but a
    /// failed write never blocks authentication.
    #[instrument(skip(self, session, assertion))]
    pub async fn process_assertion(
        &self,
        session: &mut Session,
        assertion: &AuthenticatorAssertion,
    ) -> BiometricDetection {
        let detection = detect_biometric(assertion);
        let recorded_at = Utc::now();

        if detection.user_verified {
            session.record_step_up(Factor::Passkey, recorded_at);
        }

        let record = json!({
            "credential_id": assertion.credential_id,
            "user_verified": detection.user_verified,
            "authenticator_type": detection.authenticator.as_str(),
            "recorded_at": recorded_at,
        });
        if let Err(err) = self.client.record_authentication(&record).await {
            warn!("failed to record authentication outcome: {err}");
        }

        detection
    }

    /// Record credential metadata for later display, independent of
    /// verification outcome. Soft-fail.
    #[instrument(skip(self, assertion))]
    pub async fn record_credential(&self, assertion: &AuthenticatorAssertion) {
        let record = json!({
            "credential_id": assertion.credential_id,
            "authenticator_type": classify(assertion).as_str(),
            "recorded_at": Utc::now(),
        });
        if let Err(err) = self.client.record_credential(&record).await {
            warn!("failed to record credential metadata: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Aal, CredentialSummary, Identity, Role};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn assertion(data: Option<String>) -> AuthenticatorAssertion {
        AuthenticatorAssertion {
            credential_id: "cred-1".to_string(),
            authenticator_data: data,
            authenticator_attachment: None,
            user_agent: None,
        }
    }

    fn encoded_with_flags(flags: u8) -> String {
        let mut data = [0u8; 37]; // RP ID hash + flags + sign count
        data[FLAGS_OFFSET] = flags;
        Base64UrlUnpadded::encode_string(&data)
    }

    #[test]
    fn flags_byte_decodes_each_bit() {
        // flags = 0x45: UP, UV, AT set
        let flags = AuthenticatorFlags::from_byte(0x45);
        assert!(flags.user_present);
        assert!(flags.user_verified);
        assert!(flags.attested_credential_data);
        assert!(!flags.extension_data);

        let flags = AuthenticatorFlags::from_byte(0x80);
        assert!(flags.extension_data);
        assert!(!flags.user_verified);

        // UV is exactly bit 2 for every byte value.
        for byte in 0..=u8::MAX {
            assert_eq!(
                AuthenticatorFlags::from_byte(byte).user_verified,
                byte & 0x04 != 0
            );
        }
    }

    #[test]
    fn user_verified_detected_from_up_uv_flags() {
        // flags byte = 0b00000101: UP=1, UV=1
        let detection = detect_biometric(&assertion(Some(encoded_with_flags(0b0000_0101))));
        assert!(detection.user_verified);
        assert!(detection.user_present);
        assert_eq!(detection.flags.map(|f| f.user_verified), Some(true));
    }

    #[test]
    fn present_but_not_verified_is_not_biometric() {
        let detection = detect_biometric(&assertion(Some(encoded_with_flags(0b0000_0001))));
        assert!(!detection.user_verified);
        assert!(detection.user_present);
    }

    #[test]
    fn short_buffer_is_non_biometric_without_panic() {
        let short = Base64UrlUnpadded::encode_string(&[0u8; 32]);
        let detection = detect_biometric(&assertion(Some(short)));
        assert!(!detection.user_verified);
        assert_eq!(detection.flags, None);
    }

    #[test]
    fn missing_and_garbage_data_are_non_biometric() {
        assert!(!detect_biometric(&assertion(None)).user_verified);
        assert!(!detect_biometric(&assertion(Some(String::new()))).user_verified);
        assert!(!detect_biometric(&assertion(Some("!!not-base64!!".to_string()))).user_verified);
    }

    #[test]
    fn parse_errors_name_the_failure() {
        assert_eq!(
            parse_flags(&assertion(None)).unwrap_err(),
            AssertionError::MissingAuthenticatorData
        );
        assert_eq!(
            parse_flags(&assertion(Some("%%%".to_string()))).unwrap_err(),
            AssertionError::InvalidEncoding
        );
        let short = Base64UrlUnpadded::encode_string(&[0u8; 10]);
        assert_eq!(
            parse_flags(&assertion(Some(short))).unwrap_err(),
            AssertionError::Truncated
        );
    }

    #[test]
    fn attachment_classification_prefers_declared_value() {
        let mut a = assertion(None);
        a.authenticator_attachment = Some("platform".to_string());
        a.user_agent = Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string());
        assert_eq!(classify(&a), AuthenticatorType::Platform);

        a.authenticator_attachment = Some("cross-platform".to_string());
        assert_eq!(classify(&a), AuthenticatorType::CrossPlatform);
    }

    #[test]
    fn user_agent_inference_is_best_effort() {
        assert_eq!(
            AuthenticatorType::infer_from_user_agent(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)"
            ),
            AuthenticatorType::Platform
        );
        assert_eq!(
            AuthenticatorType::infer_from_user_agent("Mozilla/5.0 (Android 14; Mobile)"),
            AuthenticatorType::Platform
        );
        assert_eq!(
            AuthenticatorType::infer_from_user_agent("curl/8.4.0"),
            AuthenticatorType::Unknown
        );
    }

    #[tokio::test]
    async fn verified_assertion_upgrades_session_and_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/biometric/record-auth"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = Arc::new(IdpClient::new(&server.uri(), &server.uri(), None).unwrap());
        let service = BiometricService::new(client);

        let identity = Identity {
            id: Uuid::new_v4(),
            role: Role::User,
            email_verified: true,
            credentials: CredentialSummary {
                totp: false,
                passkey: true,
                recovery_codes: false,
            },
        };
        let mut session = Session::new(
            "sess-bio".to_string(),
            identity,
            Aal::Aal1,
            Utc::now(),
            None,
            vec![Factor::Password],
        );

        let detection = service
            .process_assertion(&mut session, &assertion(Some(encoded_with_flags(0x45))))
            .await;
        assert!(detection.user_verified);
        assert_eq!(session.aal(), Aal::Aal2);
        assert!(session.verified_factors().contains(&Factor::Passkey));
    }

    #[tokio::test]
    async fn recording_failure_does_not_block_detection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/biometric/record-auth"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Arc::new(IdpClient::new(&server.uri(), &server.uri(), None).unwrap());
        let service = BiometricService::new(client);

        let identity = Identity {
            id: Uuid::new_v4(),
            role: Role::User,
            email_verified: true,
            credentials: CredentialSummary::default(),
        };
        let mut session = Session::new(
            "sess-bio-2".to_string(),
            identity,
            Aal::Aal1,
            Utc::now(),
            None,
            vec![Factor::Password],
        );

        let detection = service
            .process_assertion(&mut session, &assertion(Some(encoded_with_flags(0x05))))
            .await;
        assert!(detection.user_verified);
        assert_eq!(session.aal(), Aal::Aal2);
    }
}
