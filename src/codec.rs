//! Binary to text encoding for ciphertext, nonces, salts and keys.
//!
//! Everything that crosses a text boundary (JSON, database columns, CLI
//! output) goes through standard-alphabet, padded base64.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::CryptoError;

/// Encodes raw bytes as base64. Total: the empty slice maps to `""`.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes base64 text back into raw bytes.
///
/// # Errors
///
/// Returns [`CryptoError::Decode`] if `text` is not valid padded base64.
pub fn decode_bytes(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(text)?)
}
