use std::fmt;

use zeroize::Zeroize;

use super::{KEY_LEN, SALT_LEN, secure_random};
use crate::codec::{decode_bytes, encode_bytes};
use crate::error::CryptoError;

/// 256-bit key material used for both encryption and decryption.
///
/// The raw bytes never leave the type except through [`export_key`]. The
/// `Debug` output is redacted and the bytes are wiped on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
}

impl SymmetricKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Generates a fresh random key, independent of any passphrase.
pub fn generate_key() -> Result<SymmetricKey, CryptoError> {
    let mut bytes = [0u8; KEY_LEN];
    secure_random(&mut bytes)?;
    Ok(SymmetricKey::from_bytes(bytes))
}

/// Serializes the raw key bytes as base64 for storage or transport.
pub fn export_key(key: &SymmetricKey) -> String {
    encode_bytes(key.as_bytes())
}

/// Parses a key previously produced by [`export_key`].
///
/// # Errors
///
/// - [`CryptoError::Decode`] if `text` is not valid base64
/// - [`CryptoError::InvalidKey`] if the decoded length is not 32 bytes
pub fn import_key(text: &str) -> Result<SymmetricKey, CryptoError> {
    let mut decoded = decode_bytes(text)?;
    let actual = decoded.len();
    let result = <[u8; KEY_LEN]>::try_from(decoded.as_slice())
        .map(SymmetricKey::from_bytes)
        .map_err(|_| CryptoError::InvalidKey {
            expected: KEY_LEN,
            actual,
        });
    decoded.zeroize();
    result
}

/// Random salt bound to a passphrase-derived key.
///
/// Not a secret: it must be stored next to the ciphertext it protects,
/// otherwise the key cannot be derived again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Draws 16 fresh random bytes.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        secure_random(&mut salt)?;
        Ok(Self(salt))
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    /// Base64 form for persisting next to the ciphertext.
    pub fn encode(&self) -> String {
        encode_bytes(&self.0)
    }

    pub fn decode(text: &str) -> Result<Self, CryptoError> {
        let decoded = decode_bytes(text)?;
        <[u8; SALT_LEN]>::try_from(decoded.as_slice())
            .map(Self)
            .map_err(|_| CryptoError::InvalidSalt {
                expected: SALT_LEN,
                actual: decoded.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let k1 = generate_key().unwrap();
        let k2 = generate_key().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn export_import_preserves_bytes() {
        let key = generate_key().unwrap();
        let text = export_key(&key);
        assert_eq!(decode_bytes(&text).unwrap().len(), KEY_LEN);

        let imported = import_key(&text).unwrap();
        assert_eq!(imported.as_bytes(), key.as_bytes());
    }

    #[test]
    fn import_rejects_bad_base64() {
        assert!(matches!(import_key("%%%"), Err(CryptoError::Decode(_))));
    }

    #[test]
    fn import_rejects_wrong_length() {
        let short = encode_bytes(&[7u8; 16]);
        match import_key(&short) {
            Err(CryptoError::InvalidKey { expected, actual }) => {
                assert_eq!(expected, 32);
                assert_eq!(actual, 16);
            }
            other => panic!("expected InvalidKey, got: {other:?}"),
        }
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = SymmetricKey::from_bytes([0xab; KEY_LEN]);
        let printed = format!("{key:?}");
        assert_eq!(printed, "SymmetricKey([REDACTED])");
        assert!(!printed.contains("ab"));
    }

    #[test]
    fn salt_encode_decode() {
        let salt = Salt::generate().unwrap();
        assert_eq!(Salt::decode(&salt.encode()).unwrap(), salt);
    }

    #[test]
    fn salt_decode_rejects_wrong_length() {
        let text = encode_bytes(&[1u8; 15]);
        assert!(matches!(
            Salt::decode(&text),
            Err(CryptoError::InvalidSalt { actual: 15, .. })
        ));
    }
}
