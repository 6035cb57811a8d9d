//! Runtime configuration from environment variables.
//!
//! | Variable                   | Meaning                                   |
//! |----------------------------|-------------------------------------------|
//! | `FIELDSEAL_CIPHER`         | `aes-256-gcm` (default) or `chacha20-poly1305` |
//! | `FIELDSEAL_KDF_ITERATIONS` | PBKDF2 iterations, at least 100000        |
//! | `FIELDSEAL_BIND_CONTEXT`   | `true`/`false`: bind collection, field and id into each tag |
//! | `FIELDSEAL_ID_FIELD`       | name of the record id field (default `id`) |

use anyhow::{Context, Result, bail};

use crate::crypto::{Cipher, CipherSuite, KdfParams};
use crate::facade::SealOptions;
use crate::storage::DEFAULT_ID_FIELD;

pub const ENV_CIPHER: &str = "FIELDSEAL_CIPHER";
pub const ENV_KDF_ITERATIONS: &str = "FIELDSEAL_KDF_ITERATIONS";
pub const ENV_BIND_CONTEXT: &str = "FIELDSEAL_BIND_CONTEXT";
pub const ENV_ID_FIELD: &str = "FIELDSEAL_ID_FIELD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cipher: CipherSuite,
    pub kdf: KdfParams,
    pub seal: SealOptions,
    /// Record id field handed to the storage backend.
    pub id_field: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cipher: CipherSuite::default(),
            kdf: KdfParams::default(),
            seal: SealOptions::default(),
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset variables keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(cipher) = lookup(ENV_CIPHER) {
            config.cipher = cipher.parse().with_context(|| format!("invalid {ENV_CIPHER}"))?;
        }

        if let Some(iterations) = lookup(ENV_KDF_ITERATIONS) {
            let iterations: u32 = iterations
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_KDF_ITERATIONS}: '{iterations}'"))?;
            config.kdf = KdfParams::pbkdf2(iterations)
                .with_context(|| format!("invalid {ENV_KDF_ITERATIONS}"))?;
        }

        if let Some(flag) = lookup(ENV_BIND_CONTEXT) {
            config.seal.bind_context = parse_bool(&flag)
                .with_context(|| format!("invalid {ENV_BIND_CONTEXT}"))?;
        }

        if let Some(id_field) = lookup(ENV_ID_FIELD) {
            if id_field.trim().is_empty() {
                bail!("{ENV_ID_FIELD} cannot be empty");
            }
            config.id_field = id_field.trim().to_string();
        }

        Ok(config)
    }

    pub fn cipher(&self) -> Cipher {
        Cipher::new(self.cipher)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}
