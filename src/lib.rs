//! Session and authentication-level (AAL) coordination core for STING.
//!
//! The crate reconciles the identity provider's session state with the
//! application session, decides per-route step-up requirements, interprets
//! WebAuthn authenticator flags for biometric detection, and resolves which
//! second factor to present. It owns no HTTP server or storage; everything
//! durable lives behind the identity-provider and application APIs.

pub mod biometric;
pub mod cli;
pub mod client;
pub mod error;
pub mod policy;
pub mod preference;
pub mod session;
