//! Caller identity verification. Token issuance lives outside this service; we only check
//! presented tokens against a verifier.

use std::collections::HashMap;

use dashmap::DashMap;
use futures::future::{self, BoxFuture};

use crate::error::ServiceError;

/// Server-verified identity of a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: String,
}

impl CallerIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// Resolves an opaque bearer token into a caller identity.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<CallerIdentity, ServiceError>>;
}

/// Verifier backed by a table of known tokens.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: DashMap<String, String>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from the `tokens` section of the configuration.
    pub fn from_config(tokens: &HashMap<String, String>) -> Self {
        let registry = Self::new();
        for (token, uid) in tokens {
            registry.register(token.clone(), uid.clone());
        }
        registry
    }

    pub fn register(&self, token: impl Into<String>, uid: impl Into<String>) {
        self.tokens.insert(token.into(), uid.into());
    }

    /// Forget a token, returning whether it was known.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    fn lookup(&self, token: &str) -> Result<CallerIdentity, ServiceError> {
        if token.trim().is_empty() {
            return Err(ServiceError::NotAuthenticated("missing token".into()));
        }
        self.tokens
            .get(token)
            .map(|uid| CallerIdentity::new(uid.value().clone()))
            .ok_or_else(|| ServiceError::NotAuthenticated("unknown or revoked token".into()))
    }
}

impl IdentityVerifier for TokenRegistry {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<CallerIdentity, ServiceError>> {
        Box::pin(future::ready(self.lookup(token)))
    }
}
