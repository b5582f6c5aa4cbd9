use std::collections::HashMap;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use log::error;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub pwhash: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug)]
pub enum RegisterError {
    AlreadyExists,
    Internal,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// Unknown username and wrong password collapse to this one variant,
    /// so callers can't tell them apart (nor can the client).
    BadCredentials,
    Internal,
}

/// In-memory credential store. Users are keyed by username and never
/// mutated or deleted once registered.
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, RegisterError> {
        if self.users.read().await.contains_key(username) {
            return Err(RegisterError::AlreadyExists);
        }

        // hashing costs real CPU, so run it off the executor and
        // without holding the store lock
        let password = password.to_string();
        let pwhash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| {
                error!("hashing task failed: {e}");
                RegisterError::Internal
            })?
            .ok_or(RegisterError::Internal)?;

        let user = User {
            username: username.into(),
            pwhash,
            first_name: first_name.into(),
            last_name: last_name.into(),
        };

        let mut users = self.users.write().await;

        // a racing registration may have claimed the name while we hashed
        if users.contains_key(username) {
            return Err(RegisterError::AlreadyExists);
        }
        users.insert(username.into(), user.clone());

        Ok(user)
    }

    pub async fn verify(&self, username: &str, password: &str) -> Result<(), VerifyError> {
        let stored = self
            .users
            .read()
            .await
            .get(username)
            .map(|user| user.pwhash.clone());

        let username = username.to_string();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || match stored {
            Some(pwhash) => {
                let hash = PasswordHash::new(&pwhash).map_err(|e| {
                    error!("stored hash for {username} won't parse: {e}");
                    VerifyError::Internal
                })?;

                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .map_err(|_| VerifyError::BadCredentials)
            }
            None => {
                // burn a hashing round so a miss takes as long as a mismatch
                let _ = hash_password(&password);
                Err(VerifyError::BadCredentials)
            }
        })
        .await
        .map_err(|e| {
            error!("verify task failed: {e}");
            VerifyError::Internal
        })?
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }
}

fn hash_password(password: &str) -> Option<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("couldn't hash password: {e}");
        })
        .ok()
}
