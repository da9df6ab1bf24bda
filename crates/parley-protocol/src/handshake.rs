use serde::{Deserialize, Serialize};

/// Outcome of validating a connect token against the auth collaborator.
///
/// Roles come back verbatim from the validator; the engine itself only
/// distinguishes owner vs. non-owner when closing conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}
