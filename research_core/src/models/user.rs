use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::UserPk;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id: UserPk,
  pub email: String,
  pub username: String,
  #[serde(skip_serializing)]
  pub password_hash: String,
  pub full_name: String,
  pub is_active: bool,
  pub is_verified: bool,
  pub preferences: Value,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
  pub email: String,
  pub username: String,
  pub password_hash: String,
  pub full_name: String,
}

/// An opaque bearer-token session, resolved by the HTTP facade's auth
/// middleware. Simpler than a JWT/refresh-token pair since the spec names no
/// token-refresh contract for this system (see DESIGN.md open questions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
  pub id: i64,
  pub user_id: UserPk,
  pub token_hash: String,
  pub expires_at: DateTime<Utc>,
  pub ip_address: Option<String>,
  pub user_agent: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl UserSession {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Hash a plaintext password to a PHC string (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> Result<String, crate::error::CoreError> {
  use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
  use argon2::Argon2;

  let salt = SaltString::generate(OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| crate::error::CoreError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, crate::error::CoreError> {
  use argon2::password_hash::PasswordVerifier;
  use argon2::{Argon2, PasswordHash};

  let parsed_hash =
    PasswordHash::new(password_hash).map_err(|e| crate::error::CoreError::Internal(e.to_string()))?;
  Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_and_verify_round_trip() {
    let hash = hash_password("correct horse battery staple").unwrap();
    assert!(verify_password("correct horse battery staple", &hash).unwrap());
    assert!(!verify_password("wrong password", &hash).unwrap());
  }
}
