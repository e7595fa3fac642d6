//! Bearer-credential validation for the real-time channel
//!
//! Token issuance lives outside this service; the gateway only checks
//! that a presented credential is acceptable before any subscription
//! exists.

use unibox_core::{Error, Result};

/// Validates bearer credentials presented at the WebSocket handshake
pub trait CredentialValidator: Send + Sync {
    /// Accept or reject a credential
    fn validate(&self, token: &str) -> Result<()>;
}

/// Validator over a fixed set of accepted tokens from config
///
/// An empty set rejects every connection - the gateway never falls open
/// when no credentials are configured.
pub struct StaticTokenValidator {
    tokens: Vec<String>,
}

impl StaticTokenValidator {
    /// Create a validator accepting the given tokens
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

impl CredentialValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(Error::Permanent("missing credential".to_string()));
        }
        if self.tokens.iter().any(|t| t == token) {
            Ok(())
        } else {
            Err(Error::Permanent("invalid credential".to_string()))
        }
    }
}
