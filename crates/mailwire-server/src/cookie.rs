use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("cookie sealing failed")]
    Seal,
}

/// Seals and opens cookie values with ChaCha20-Poly1305.
///
/// The cookie name is bound as associated data, so a value sealed under one
/// name never opens under another. The rest of the server treats this as an
/// opaque codec: `decode` returns `None` for anything absent, garbled, or
/// tampered with.
pub struct CredentialCodec {
    cipher: ChaCha20Poly1305,
}

impl CredentialCodec {
    pub fn new(secret: &SecretString) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.expose_secret().as_bytes()).into();
        Self {
            cipher: ChaCha20Poly1305::new(&key.into()),
        }
    }

    /// Seal a value for the named cookie. Returns base64(nonce || ciphertext).
    pub fn seal(&self, name: &str, value: &str) -> Result<String, CookieError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: value.as_bytes(),
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Seal)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Open a sealed cookie value. Any failure resolves to `None`.
    pub fn decode(&self, name: &str, raw: &str) -> Option<String> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .ok()?;

        if combined.len() < NONCE_LEN {
            return None;
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .ok()?;

        String::from_utf8(plaintext).ok()
    }
}
