use base64::{engine::general_purpose, Engine as _};
use ring::{pbkdf2, rand::{SecureRandom, SystemRandom}};
use std::num::NonZeroU32;

use crate::errors::{AppError, Result};
use crate::utils::sha256_hex;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const TOKEN_LEN: usize = 32;

pub struct CryptoService;

impl CryptoService {
    /// `pbkdf2$<iterations>$<salt>$<hash>`, base64 encoded parts.
    pub fn hash_password(password: &str) -> Result<String> {
        Self::hash_with_iterations(password, PBKDF2_ITERATIONS)
    }

    fn hash_with_iterations(password: &str, iterations: u32) -> Result<String> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| AppError::Internal("Failed to generate salt".to_string()))?;

        let mut hash = [0u8; HASH_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            non_zero(iterations)?,
            &salt,
            password.as_bytes(),
            &mut hash,
        );

        Ok(format!(
            "pbkdf2${}${}${}",
            iterations,
            general_purpose::STANDARD.encode(salt),
            general_purpose::STANDARD.encode(hash)
        ))
    }

    /// False for a wrong password; an error only for a malformed stored hash.
    pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
        let parts: Vec<&str> = stored.split('$').collect();
        if parts.len() != 4 || parts[0] != "pbkdf2" {
            return Err(AppError::Internal("Invalid password hash format".to_string()));
        }
        let iterations: u32 = parts[1]
            .parse()
            .map_err(|_| AppError::Internal("Invalid password hash iterations".to_string()))?;
        let salt = general_purpose::STANDARD
            .decode(parts[2])
            .map_err(|e| AppError::Internal(format!("Decode salt: {}", e)))?;
        let hash = general_purpose::STANDARD
            .decode(parts[3])
            .map_err(|e| AppError::Internal(format!("Decode hash: {}", e)))?;

        Ok(pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            non_zero(iterations)?,
            &salt,
            password.as_bytes(),
            &hash,
        )
        .is_ok())
    }

    /// Opaque bearer token handed to the client once.
    pub fn new_session_token() -> Result<String> {
        let mut bytes = [0u8; TOKEN_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| AppError::Internal("Failed to generate session token".to_string()))?;
        Ok(hex::encode(bytes))
    }

    /// Only this digest is persisted.
    pub fn token_digest(token: &str) -> String {
        sha256_hex(token.as_bytes())
    }
}

fn non_zero(iterations: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(iterations).ok_or_else(|| AppError::Internal("Invalid iterations".to_string()))
}
