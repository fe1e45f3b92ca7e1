//! Connection authentication: find a bearer token on the upgrade request and
//! check it against the configured secrets.

pub mod credentials;
pub mod verifier;

pub use credentials::{Credential, CredentialSource, extract_credential, offered_protocol};
pub use verifier::{Authenticator, Claims, HmacVerifier, TokenVerifier};

#[cfg(test)]
mod tests;
