//! Authentication collaborator.
//!
//! The engine never authenticates anyone itself. An [`AuthProvider`] turns
//! a credential into a [`Principal`] whose role set feeds authorization.

use async_trait::async_trait;
use casebook_rbac::Principal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};

/// Resolves a caller credential to a principal.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Fails with [`CoreError::Unauthorized`] for unknown credentials.
    async fn authenticate(&self, credential: &str) -> CoreResult<Principal>;
}

/// Fixed token → principal map for tests and embedded use.
///
/// Tokens are held as SHA-256 digests, never in the clear.
#[derive(Default)]
pub struct StaticAuthProvider {
    tokens: RwLock<HashMap<Vec<u8>, Principal>>,
}

fn digest(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token, replacing any previous holder.
    pub async fn insert(&self, token: &str, principal: Principal) {
        self.tokens.write().await.insert(digest(token), principal);
    }

    /// Forget a token. Returns whether it was known.
    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(&digest(token)).is_some()
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(&self, credential: &str) -> CoreResult<Principal> {
        let principal = self.tokens.read().await.get(&digest(credential)).cloned();
        match principal {
            Some(principal) => {
                tracing::debug!(user = %principal.username, "Credential accepted");
                Ok(principal)
            }
            None => {
                tracing::debug!("Credential rejected");
                Err(CoreError::Unauthorized("unknown credential".into()))
            }
        }
    }
}
