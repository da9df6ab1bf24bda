use std::collections::HashMap;

use async_trait::async_trait;
use parley_protocol::handshake::AuthContext;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Auth collaborator contract. The engine never inspects tokens itself;
/// it forwards them here and, on success, to tool servers on the user's
/// behalf.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError>;
}

/// Built-in validator over the config token table (token -> user id).
/// Deployments with a real auth service swap this out wholesale.
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl StaticTokenValidator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        match self.tokens.get(token) {
            Some(user_id) => Ok(AuthContext::new(user_id.clone(), Vec::new())),
            None => Err(AuthError::Unauthorized("invalid token".to_string())),
        }
    }
}
