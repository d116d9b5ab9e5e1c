//! Static password store with SHA-256 hashed credentials.

use std::collections::HashMap;

use duckgate_common::{GateError, Result, UserCredential};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// SHA-256 digest of a credential string.
pub fn hash(original: &str) -> Vec<u8> {
    Sha256::digest(original.as_bytes()).to_vec()
}

/// Compare two digests without early exit on the first differing byte.
fn digest_match(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().min(b.len());
    let mut diff = a.len().abs_diff(b.len());
    for i in 0..len {
        if a[i] != b[i] {
            diff += 1;
        }
    }
    diff == 0
}

/// Fresh random HS256 signing secret for servers configured without one.
pub fn generate_random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

/// Password validator backed by the configured user list. Clear-text
/// passwords are hashed at construction and dropped.
#[derive(Debug, Clone)]
pub struct PasswordValidator {
    passwords: HashMap<String, Vec<u8>>,
}

impl PasswordValidator {
    /// Build the store from configured credentials.
    pub fn from_users(users: &[UserCredential]) -> Self {
        let passwords = users
            .iter()
            .map(|u| (u.username.clone(), hash(&u.password)))
            .collect();
        Self { passwords }
    }

    /// Validate a username/password pair; unknown users and empty passwords
    /// fail the same way as a wrong password.
    pub fn validate(&self, username: &str, password: &str) -> Result<()> {
        let stored = self.passwords.get(username);
        let ok = match stored {
            Some(stored) => !password.is_empty() && digest_match(stored, &hash(password)),
            None => false,
        };
        if ok {
            Ok(())
        } else {
            Err(GateError::Unauthenticated(format!(
                "invalid credentials for user {username}"
            )))
        }
    }
}
