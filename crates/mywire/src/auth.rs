//! MySQL authentication plugins.
//!
//! Built-in plugins:
//! - `mysql_native_password`: SHA1-based scramble
//! - `caching_sha2_password`: SHA256 fast path, with full authentication over
//!   a secure channel or RSA
//! - `sha256_password`: password over TLS, or RSA-encrypted otherwise
//! - `mysql_clear_password`: only when explicitly allowed
//! - `dialog`: interactive prompts
//!
//! Any other plugin is resolved through caller-registered
//! [`AuthPluginHandler`]s.
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```

use std::fmt;

use mywire_core::error::AuthenticationError;
use mywire_core::{Error, Result};

use rand::rngs::OsRng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

/// Length of the scramble used by the password plugins.
pub const SCRAMBLE_LENGTH: usize = 20;

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
    pub const DIALOG: &str = "dialog";
    pub const MYSQL_OLD_PASSWORD: &str = "mysql_old_password";
}

/// Extra-data codes of the caching_sha2_password exchange.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Byte sent by sha256_password to request the server's public key.
pub const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// The plugin selected for one authentication round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    Sha256Password,
    ClearPassword,
    Dialog,
    OldPassword,
    /// Not built in; needs a registered handler
    Other(String),
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> Self {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Self::NativePassword,
            plugins::CACHING_SHA2_PASSWORD => Self::CachingSha2Password,
            plugins::SHA256_PASSWORD => Self::Sha256Password,
            plugins::MYSQL_CLEAR_PASSWORD => Self::ClearPassword,
            plugins::DIALOG => Self::Dialog,
            plugins::MYSQL_OLD_PASSWORD => Self::OldPassword,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            Self::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
            Self::Sha256Password => plugins::SHA256_PASSWORD,
            Self::ClearPassword => plugins::MYSQL_CLEAR_PASSWORD,
            Self::Dialog => plugins::DIALOG,
            Self::OldPassword => plugins::MYSQL_OLD_PASSWORD,
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-supplied authentication logic, registered per plugin name.
///
/// Returning `Ok(None)` defers to the built-in behavior for that plugin.
pub trait AuthPluginHandler: Send + Sync + fmt::Debug {
    /// Produce the response to a server challenge.
    #[allow(clippy::result_large_err)]
    fn authenticate(&self, challenge: &[u8]) -> Result<Option<Vec<u8>>> {
        let _ = challenge;
        Ok(None)
    }

    /// Answer a `dialog` prompt other than the password prompt.
    #[allow(clippy::result_large_err)]
    fn prompt(&self, echo: bool, prompt: &[u8]) -> Result<Option<Vec<u8>>> {
        let _ = (echo, prompt);
        Ok(None)
    }
}

pub(crate) fn auth_error(message: impl Into<String>) -> Error {
    Error::Authentication(AuthenticationError {
        code: None,
        message: message.into(),
        source: None,
    })
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Compute the mysql_native_password response.
///
/// Only the first 20 bytes of the scramble are used. An empty password
/// yields an empty response.
pub fn scramble_native_password(password: &[u8], scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &scramble[..scramble.len().min(SCRAMBLE_LENGTH)];

    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    xor(&stage1, &stage3)
}

/// Compute the caching_sha2_password fast-path response.
///
/// A 21-byte scramble ending in NUL (as sent in auth switch requests) is
/// trimmed to 20 bytes. An empty password yields an empty response.
pub fn scramble_caching_sha2(password: &[u8], scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = match scramble {
        [head @ .., 0] if head.len() == SCRAMBLE_LENGTH => head,
        other => other,
    };

    let p1 = Sha256::digest(password);
    let p2 = Sha256::digest(p1);
    let mut hasher = Sha256::new();
    hasher.update(p2);
    hasher.update(seed);
    let p3 = hasher.finalize();

    xor(&p1, &p3)
}

/// Password followed by NUL, for clear-text channels (TLS, Unix socket) and
/// the clear-text plugin.
pub fn nul_terminated(password: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password);
    out.push(0);
    out
}

/// Encrypt the password with the server's RSA public key.
///
/// The NUL-terminated password is XORed with the 20-byte scramble (cycled),
/// then encrypted with RSA-OAEP (SHA-1). Both SPKI and PKCS#1 PEM keys are
/// accepted.
#[allow(clippy::result_large_err)]
pub fn sha256_password_rsa(password: &[u8], scramble: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    let seed = &scramble[..scramble.len().min(SCRAMBLE_LENGTH)];
    if seed.is_empty() {
        return Err(auth_error("Server scramble is empty; cannot encrypt password"));
    }

    let mut message = nul_terminated(password);
    for (i, b) in message.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error(format!("Server public key is not valid PEM: {e}")))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_error(format!("Failed to parse server RSA public key: {e}")))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &message)
        .map_err(|e| auth_error(format!("RSA encryption of password failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> Vec<u8> {
        (1..=20).collect()
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_native_password_reference_vector() {
        let response = scramble_native_password(b"secret", &seed());
        assert_eq!(hex(&response), "b32bb3a583e1340c0a1108d58b1be49781ad8c2f");
        // Trailing NUL of a switch-request scramble is ignored
        let mut with_nul = seed();
        with_nul.push(0);
        assert_eq!(scramble_native_password(b"secret", &with_nul), response);
    }

    #[test]
    fn test_caching_sha2_reference_vector() {
        let response = scramble_caching_sha2(b"secret", &seed());
        assert_eq!(
            hex(&response),
            "746ebe205d56a0707acb3e796e834e0dd7b1d61743b26bd5202c7a623230c7c9"
        );
        let mut with_nul = seed();
        with_nul.push(0);
        assert_eq!(scramble_caching_sha2(b"secret", &with_nul), response);
    }

    #[test]
    fn test_empty_password_gives_empty_response() {
        assert!(scramble_native_password(b"", &seed()).is_empty());
        assert!(scramble_caching_sha2(b"", &seed()).is_empty());
    }

    #[test]
    fn test_scrambles_are_deterministic_and_password_sensitive() {
        let a = scramble_caching_sha2(b"secret", &seed());
        assert_eq!(a, scramble_caching_sha2(b"secret", &seed()));
        assert_ne!(a, scramble_caching_sha2(b"Secret", &seed()));
        assert_ne!(
            scramble_native_password(b"secret", &seed()),
            scramble_native_password(b"secret", &[0; 20])
        );
    }

    #[test]
    fn test_plugin_names_round_trip() {
        for name in [
            plugins::MYSQL_NATIVE_PASSWORD,
            plugins::CACHING_SHA2_PASSWORD,
            plugins::SHA256_PASSWORD,
            plugins::MYSQL_CLEAR_PASSWORD,
            plugins::DIALOG,
            "auth_gssapi_client",
        ] {
            assert_eq!(AuthPlugin::from_name(name).name(), name);
        }
        assert_eq!(
            AuthPlugin::from_name("auth_gssapi_client"),
            AuthPlugin::Other("auth_gssapi_client".to_string())
        );
    }

    #[test]
    fn test_rsa_encryption_round_trip() {
        use rsa::RsaPrivateKey;
        use rsa::pkcs8::{EncodePublicKey, LineEnding};

        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let encrypted = sha256_password_rsa(b"secret", &seed(), pem.as_bytes()).unwrap();
        let decrypted = private
            .decrypt(rsa::Oaep::new::<Sha1>(), &encrypted)
            .unwrap();

        let expected: Vec<u8> = nul_terminated(b"secret")
            .iter()
            .zip(seed().iter().cycle())
            .map(|(p, s)| p ^ s)
            .collect();
        assert_eq!(decrypted, expected);
    }

    #[test]
    fn test_rsa_rejects_bad_key() {
        let err = sha256_password_rsa(b"secret", &seed(), b"not a key").unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_default_handler_defers() {
        #[derive(Debug)]
        struct Noop;
        impl AuthPluginHandler for Noop {}

        assert_eq!(Noop.authenticate(b"challenge").unwrap(), None);
        assert_eq!(Noop.prompt(true, b"Token: ").unwrap(), None);
    }
}
