use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use super::{KEY_LEN, Salt, SymmetricKey};
use crate::error::CryptoError;

/// Lowest PBKDF2 iteration count accepted.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

pub const ARGON2_DEFAULT_MEM_COST_KIB: u32 = 64 * 1024; // 64 MiB
pub const ARGON2_DEFAULT_TIME_COST: u32 = 3;
pub const ARGON2_DEFAULT_PARALLELISM: u32 = 1;

/// Parameters of the passphrase stretching function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
pub enum KdfParams {
    /// PBKDF2-HMAC-SHA256.
    Pbkdf2Sha256 { iterations: u32 },
    /// Argon2id v1.3.
    Argon2id {
        mem_cost_kib: u32,
        time_cost: u32,
        parallelism: u32,
    },
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::Pbkdf2Sha256 {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn pbkdf2(iterations: u32) -> Result<Self, CryptoError> {
        let params = Self::Pbkdf2Sha256 { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn argon2id(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self, CryptoError> {
        let params = Self::Argon2id {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    /// Argon2id with 64 MiB of memory, 3 passes and a single lane.
    pub fn argon2id_default() -> Self {
        Self::Argon2id {
            mem_cost_kib: ARGON2_DEFAULT_MEM_COST_KIB,
            time_cost: ARGON2_DEFAULT_TIME_COST,
            parallelism: ARGON2_DEFAULT_PARALLELISM,
        }
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        let invalid = |msg: &str| Err(CryptoError::InvalidKdfParams(msg.to_string()));
        match *self {
            Self::Pbkdf2Sha256 { iterations } => {
                if iterations < MIN_PBKDF2_ITERATIONS {
                    return invalid("pbkdf2 needs at least 100000 iterations");
                }
            }
            Self::Argon2id {
                mem_cost_kib,
                time_cost,
                parallelism,
            } => {
                if mem_cost_kib < 8 {
                    return invalid("argon2 memory cost too low");
                }
                if time_cost < 1 {
                    return invalid("argon2 time cost must be >= 1");
                }
                if parallelism < 1 {
                    return invalid("argon2 parallelism must be >= 1");
                }
                if mem_cost_kib < 8 * parallelism {
                    return invalid("argon2 memory cost must be at least 8 * parallelism");
                }
            }
        }
        Ok(())
    }
}

/// A passphrase-derived key together with the salt needed to derive it again.
#[derive(Debug, Clone)]
pub struct DerivedKey {
    pub key: SymmetricKey,
    pub salt: Salt,
}

/// Derives a key with the default parameters (PBKDF2-HMAC-SHA256, 100k rounds).
///
/// When `salt` is `None` a fresh random salt is generated; persist the
/// returned salt alongside anything encrypted under the key.
pub fn derive_key(passphrase: &str, salt: Option<Salt>) -> Result<DerivedKey, CryptoError> {
    derive_key_with(passphrase, salt, &KdfParams::default())
}

/// Derives a key with explicit parameters.
///
/// Same passphrase, salt and parameters always yield the same key. Passphrase
/// strength is not checked; the empty string is accepted.
pub fn derive_key_with(
    passphrase: &str,
    salt: Option<Salt>,
    params: &KdfParams,
) -> Result<DerivedKey, CryptoError> {
    params.validate()?;

    let salt = match salt {
        Some(salt) => salt,
        None => Salt::generate()?,
    };

    let mut key = [0u8; KEY_LEN];
    match *params {
        KdfParams::Pbkdf2Sha256 { iterations } => {
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt.as_bytes(), iterations, &mut key);
        }
        KdfParams::Argon2id {
            mem_cost_kib,
            time_cost,
            parallelism,
        } => {
            let argon_params = Params::new(mem_cost_kib, time_cost, parallelism, Some(KEY_LEN))
                .map_err(|e| CryptoError::InvalidKdfParams(format!("argon2: {e}")))?;

            Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
                .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key)
                .map_err(|e| CryptoError::KeyDerivation(format!("argon2: {e}")))?;
        }
    }

    let derived = DerivedKey {
        key: SymmetricKey::from_bytes(key),
        salt,
    };
    key.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_bytes;

    #[test]
    fn kdf_is_deterministic() {
        let salt = Salt::from_bytes([42u8; 16]);

        let k1 = derive_key("password", Some(salt)).unwrap();
        let k2 = derive_key("password", Some(salt)).unwrap();

        assert_eq!(k1.key.as_bytes(), k2.key.as_bytes());
        assert_eq!(k1.salt, salt);
    }

    #[test]
    fn different_salts_give_different_keys() {
        let k1 = derive_key("pw", Some(Salt::from_bytes([1u8; 16]))).unwrap();
        let k2 = derive_key("pw", Some(Salt::from_bytes([2u8; 16]))).unwrap();
        assert_ne!(k1.key.as_bytes(), k2.key.as_bytes());
    }

    #[test]
    fn different_passphrases_give_different_keys() {
        let salt = Salt::from_bytes([9u8; 16]);
        let k1 = derive_key("alpha", Some(salt)).unwrap();
        let k2 = derive_key("beta", Some(salt)).unwrap();
        assert_ne!(k1.key.as_bytes(), k2.key.as_bytes());
    }

    #[test]
    fn missing_salt_is_generated() {
        let k1 = derive_key("pw", None).unwrap();
        let k2 = derive_key("pw", None).unwrap();
        assert_ne!(k1.salt, k2.salt);
        assert_ne!(k1.key.as_bytes(), k2.key.as_bytes());
    }

    #[test]
    fn empty_passphrase_is_accepted() {
        assert!(derive_key("", None).is_ok());
    }

    #[test]
    fn iteration_count_affects_output() {
        let salt = Salt::from_bytes([7u8; 16]);
        let k1 = derive_key_with("pw", Some(salt), &KdfParams::pbkdf2(100_000).unwrap()).unwrap();
        let k2 = derive_key_with("pw", Some(salt), &KdfParams::pbkdf2(100_001).unwrap()).unwrap();
        assert_ne!(k1.key.as_bytes(), k2.key.as_bytes());
    }

    #[test]
    fn matches_reference_pbkdf2_sha256() {
        let salt = Salt::from_bytes(*b"0123456789abcdef");
        let derived = derive_key("password", Some(salt)).unwrap();

        let mut expected = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(b"password", b"0123456789abcdef", 100_000, &mut expected);
        assert_eq!(derived.key.as_bytes(), &expected);
    }

    #[test]
    fn argon2_params_affect_output() {
        let salt = Salt::from_bytes([7u8; 16]);
        let kdf1 = KdfParams::argon2id(1024, 1, 1).unwrap();
        let kdf2 = KdfParams::argon2id(2048, 1, 1).unwrap();

        let k1 = derive_key_with("pw", Some(salt), &kdf1).unwrap();
        let k2 = derive_key_with("pw", Some(salt), &kdf2).unwrap();

        assert_ne!(k1.key.as_bytes(), k2.key.as_bytes());
    }

    #[test]
    fn invalid_params_fail_gracefully() {
        assert!(KdfParams::pbkdf2(1_000).is_err());
        assert!(KdfParams::argon2id(0, 0, 0).is_err());
        assert!(KdfParams::argon2id(16, 1, 4).is_err());

        let weak = KdfParams::Pbkdf2Sha256 { iterations: 10 };
        assert!(matches!(
            derive_key_with("pw", None, &weak),
            Err(CryptoError::InvalidKdfParams(_))
        ));
    }

    #[test]
    fn params_serialize_with_algorithm_tag() {
        let json = serde_json::to_value(KdfParams::default()).unwrap();
        assert_eq!(json["algorithm"], "pbkdf2-sha256");
        assert_eq!(json["iterations"], 100_000);

        let parsed: KdfParams = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, KdfParams::default());
    }

    #[test]
    fn derived_key_has_full_length() {
        let derived = derive_key("pw", None).unwrap();
        let exported = crate::crypto::export_key(&derived.key);
        assert_eq!(decode_bytes(&exported).unwrap().len(), KEY_LEN);
    }
}
