use crate::directory::{Actor, Directory};
use crate::limits::MAX_LOGIN_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid user name or password")]
    BadCredentials,
    #[error("user '{0}' is not allowed to sign in")]
    Refused(String),
}

/// Password shared by every client of this server.
#[derive(Debug)]
pub struct SharedSecret {
    password: String,
}

impl SharedSecret {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    /// Compares every byte regardless of where the first mismatch is.
    fn matches(&self, candidate: &str) -> bool {
        let (a, b) = (self.password.as_bytes(), candidate.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    /// Check the password, then resolve the login through the directory.
    pub fn authenticate(&self, directory: &dyn Directory, user: &str, password: &str) -> Result<Actor, AuthError> {
        let user = user.trim();
        if user.is_empty() || user.len() > MAX_LOGIN_LEN || !self.matches(password) {
            return Err(AuthError::BadCredentials);
        }
        directory.resolve(user).ok_or_else(|| AuthError::Refused(user.to_string()))
    }
}
