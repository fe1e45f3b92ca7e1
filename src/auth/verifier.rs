//! Token verification.
//!
//! An [`Authenticator`] holds an ordered chain of verifiers, one per
//! configured secret. A token is accepted as soon as one of them validates
//! its signature and expiry.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::Credential;
use crate::config::AuthSettings;
use crate::utils::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: usize,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims>;
}

/// HS256 verifier for a single shared secret.
pub struct HmacVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl HmacVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for HmacVerifier {
    fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| GatewayError::AuthFailure(e.to_string()))
    }
}

pub struct Authenticator {
    verifiers: Vec<Box<dyn TokenVerifier>>,
}

impl Authenticator {
    pub fn new(verifiers: Vec<Box<dyn TokenVerifier>>) -> Self {
        Self { verifiers }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        if settings.secrets.is_empty() {
            warn!("no auth secrets configured; every connection will be rejected");
        }
        Self::new(
            settings
                .secrets
                .iter()
                .map(|secret| Box::new(HmacVerifier::new(secret)) as Box<dyn TokenVerifier>)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// A missing credential is treated like an invalid one.
    pub fn authenticate(&self, credential: Option<&Credential>) -> Result<Claims> {
        let credential =
            credential.ok_or_else(|| GatewayError::AuthFailure("no credential presented".into()))?;

        let mut last_error = None;
        for (index, verifier) in self.verifiers.iter().enumerate() {
            match verifier.verify(&credential.token) {
                Ok(claims) => {
                    debug!(verifier = index, source = ?credential.source, "token accepted");
                    return Ok(claims);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::AuthFailure("no verifiers configured".into())))
    }
}
