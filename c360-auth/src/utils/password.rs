use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Stored form: base64(salt || derived key).
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

fn derive(password: &Password, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_str().as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Hash a password with PBKDF2-HMAC-SHA256 and a fresh random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| anyhow::anyhow!("Failed to generate salt: {}", e))?;

    let key = derive(password, &salt);

    let mut stored = Vec::with_capacity(SALT_LEN + KEY_LEN);
    stored.extend_from_slice(&salt);
    stored.extend_from_slice(&key);

    Ok(PasswordHashString::new(STANDARD.encode(stored)))
}

/// Verify a password against a stored hash.
///
/// The derived key is compared in constant time. A stored value that is not
/// valid base64 or has the wrong length is treated as a mismatch.
pub fn verify_password(password: &Password, password_hash: &PasswordHashString) -> bool {
    let Ok(stored) = STANDARD.decode(password_hash.as_str()) else {
        return false;
    };
    if stored.len() != SALT_LEN + KEY_LEN {
        return false;
    }

    let (salt, expected) = stored.split_at(SALT_LEN);
    let actual = derive(password, salt);

    actual[..].ct_eq(expected).into()
}
