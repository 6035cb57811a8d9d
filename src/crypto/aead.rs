use std::fmt;
use std::str::FromStr;

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, Payload},
};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use super::{NONCE_LEN, SymmetricKey, TAG_LEN, secure_random};
use crate::codec::{decode_bytes, encode_bytes};
use crate::error::CryptoError;

/// Authenticated cipher used for every payload. All suites take a 256-bit
/// key, a 96-bit nonce and append a 128-bit tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuite {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherSuite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown cipher suite '{0}' (expected aes-256-gcm or chacha20-poly1305)")]
pub struct UnknownCipherSuite(pub String);

impl FromStr for CipherSuite {
    type Err = UnknownCipherSuite;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            _ => Err(UnknownCipherSuite(s.to_string())),
        }
    }
}

/// Output of one encryption: base64 ciphertext (with tag) and base64 nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    ciphertext: String,
    iv: String,
}

impl EncryptedPayload {
    pub fn new(ciphertext: impl Into<String>, iv: impl Into<String>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            iv: iv.into(),
        }
    }

    /// Base64 of `ciphertext || tag`.
    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }

    /// Base64 of the 12 nonce bytes.
    pub fn iv(&self) -> &str {
        &self.iv
    }
}

/// Stateless text cipher.
///
/// Holds only the suite choice; every call takes its key explicitly and
/// draws a fresh random nonce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cipher {
    suite: CipherSuite,
}

impl Cipher {
    pub fn new(suite: CipherSuite) -> Self {
        Self { suite }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypts UTF-8 text. Only fails if the OS random source is unavailable.
    pub fn encrypt(&self, plaintext: &str, key: &SymmetricKey) -> Result<EncryptedPayload, CryptoError> {
        self.encrypt_with_aad(plaintext, key, &[])
    }

    /// Encrypts UTF-8 text, binding `aad` into the authentication tag.
    pub fn encrypt_with_aad(
        &self,
        plaintext: &str,
        key: &SymmetricKey,
        aad: &[u8],
    ) -> Result<EncryptedPayload, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        secure_random(&mut nonce)?;

        let ciphertext = self.seal(key, &nonce, plaintext.as_bytes(), aad)?;

        Ok(EncryptedPayload {
            ciphertext: encode_bytes(&ciphertext),
            iv: encode_bytes(&nonce),
        })
    }

    /// Decrypts a payload produced by [`Cipher::encrypt`].
    ///
    /// # Errors
    ///
    /// - [`CryptoError::Decode`] if either field is not base64
    /// - [`CryptoError::Authentication`] on wrong key, tampering or truncation
    /// - [`CryptoError::InvalidUtf8`] if the authenticated bytes are not text
    pub fn decrypt(&self, payload: &EncryptedPayload, key: &SymmetricKey) -> Result<String, CryptoError> {
        self.decrypt_with_aad(payload, key, &[])
    }

    /// Decrypts a payload sealed with [`Cipher::encrypt_with_aad`]; `aad`
    /// must match byte for byte.
    pub fn decrypt_with_aad(
        &self,
        payload: &EncryptedPayload,
        key: &SymmetricKey,
        aad: &[u8],
    ) -> Result<String, CryptoError> {
        let ciphertext = decode_bytes(&payload.ciphertext)?;
        let nonce = decode_bytes(&payload.iv)?;

        let nonce: [u8; NONCE_LEN] = nonce
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Authentication)?;
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::Authentication);
        }

        let plaintext = Zeroizing::new(self.open(key, &nonce, &ciphertext, aad)?);
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
    }

    pub(crate) fn seal(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = Payload { msg, aad };
        let sealed = match self.suite {
            CipherSuite::Aes256Gcm => Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes()))
                .encrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            CipherSuite::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_bytes()))
                    .encrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        };
        sealed.map_err(|_| CryptoError::Encryption)
    }

    fn open(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = Payload { msg, aad };
        let opened = match self.suite {
            CipherSuite::Aes256Gcm => Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes()))
                .decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            CipherSuite::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_bytes()))
                    .decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        };
        opened.map_err(|_| CryptoError::Authentication)
    }
}

/// Encrypts `plaintext` with AES-256-GCM.
pub fn encrypt(plaintext: &str, key: &SymmetricKey) -> Result<EncryptedPayload, CryptoError> {
    Cipher::default().encrypt(plaintext, key)
}

/// Decrypts an AES-256-GCM payload produced by [`encrypt`].
pub fn decrypt(payload: &EncryptedPayload, key: &SymmetricKey) -> Result<String, CryptoError> {
    Cipher::default().decrypt(payload, key)
}
