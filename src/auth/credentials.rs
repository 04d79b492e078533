//! Password hashing and session token primitives.

use argon2::{
  password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
  Argon2,
};
use rand::Rng;
use sha2::{Digest, Sha256};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
  Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
  PasswordHash::new(hash)
    .map(|parsed| {
      Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
    })
    .unwrap_or(false)
}

/// 32 random bytes, hex encoded. Only the hash is ever stored.
pub fn generate_session_token() -> String {
  let bytes: [u8; 32] = rand::thread_rng().gen();
  hex::encode(bytes)
}

pub fn hash_session_token(token: &str) -> String {
  hex::encode(Sha256::digest(token.as_bytes()))
}
