use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
mod auth;
use fieldseal::crypto::kdf;
use fieldseal::{
    Cipher, Config, EncryptedPayload, EncryptedStore, FileStorage, KdfParams, Query, Record, Salt,
    StoreMeta, SymmetricKey, default_store_path, derive_key_with, export_key, generate_key,
    import_key,
};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KdfKind {
    Pbkdf2,
    Argon2id,
}

#[derive(Debug, clap::Args)]
struct KdfArgs {
    /// Key derivation function (default: pbkdf2)
    #[arg(long = "kdf", value_enum)]
    kind: Option<KdfKind>,

    /// PBKDF2 iterations (default: 100000, or FIELDSEAL_KDF_ITERATIONS)
    #[arg(long)]
    iterations: Option<u32>,

    /// Argon2 memory cost in KiB (default: 65536)
    #[arg(long = "argon-mem")]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 3)
    #[arg(long = "argon-time")]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 1)
    #[arg(long = "argon-parallelism")]
    parallelism: Option<u32>,
}

impl KdfArgs {
    fn to_kdf_params(&self, configured: KdfParams) -> Result<KdfParams> {
        let argon_flags = self.mem_cost_kib.is_some()
            || self.time_cost.is_some()
            || self.parallelism.is_some();
        let kind = match self.kind {
            Some(kind) => kind,
            None if argon_flags => KdfKind::Argon2id,
            None => KdfKind::Pbkdf2,
        };

        let params = match kind {
            KdfKind::Pbkdf2 => {
                let iterations = match (self.iterations, configured) {
                    (Some(n), _) => n,
                    (None, KdfParams::Pbkdf2Sha256 { iterations }) => iterations,
                    (None, _) => kdf::MIN_PBKDF2_ITERATIONS,
                };
                KdfParams::pbkdf2(iterations)?
            }
            KdfKind::Argon2id => KdfParams::argon2id(
                self.mem_cost_kib.unwrap_or(kdf::ARGON2_DEFAULT_MEM_COST_KIB),
                self.time_cost.unwrap_or(kdf::ARGON2_DEFAULT_TIME_COST),
                self.parallelism.unwrap_or(kdf::ARGON2_DEFAULT_PARALLELISM),
            )?,
        };
        Ok(params)
    }
}

#[derive(Debug, clap::Args)]
struct SensitiveArgs {
    /// Field to encrypt (repeatable, or comma separated)
    #[arg(id = "sensitive", short = 's', long = "sensitive", value_delimiter = ',')]
    fields: Vec<String>,
}

#[derive(Debug, Parser)]
#[command(name = "fieldseal")]
#[command(version, about = "Field-level envelope encryption for structured records.")]
struct Cli {
    /// Path to the record store file
    #[arg(long, global = true, value_name = "PATH", env = "FIELDSEAL_PATH")]
    store: Option<PathBuf>,

    /// Base64 encoded 256-bit key; skips passphrase derivation
    #[arg(long, global = true, value_name = "BASE64", env = "FIELDSEAL_KEY", hide_env_values = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initializes the record store with a passphrase-derived key
    Init {
        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Generates a random key and prints it
    Keygen,

    /// Derives a key from a passphrase and prints key and salt
    Derive {
        /// Base64 salt to re-derive an existing key
        #[arg(long)]
        salt: Option<String>,

        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Encrypts text and prints the payload as JSON
    #[command(arg_required_else_help = true)]
    Encrypt { plaintext: String },

    /// Decrypts a payload
    #[command(arg_required_else_help = true)]
    Decrypt { ciphertext: String, iv: String },

    /// Stores a JSON record, encrypting the sensitive fields
    #[command(arg_required_else_help = true)]
    Put {
        collection: String,
        record: String,
        #[command(flatten)]
        sensitive: SensitiveArgs,
    },

    /// Reads records and decrypts the sensitive fields
    #[command(arg_required_else_help = true)]
    Get {
        collection: String,
        /// String equality filter as FIELD=VALUE (repeatable)
        #[arg(long = "eq", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
        #[command(flatten)]
        sensitive: SensitiveArgs,
        /// Print records even if some fields fail to decrypt
        #[arg(long, default_value_t = false)]
        partial: bool,
    },

    /// Applies a partial update, encrypting the sensitive fields it contains
    #[command(arg_required_else_help = true)]
    Update {
        collection: String,
        id: String,
        /// JSON object with the fields to change
        #[arg(value_name = "FIELDS")]
        changes: String,
        #[command(flatten)]
        sensitive: SensitiveArgs,
    },

    /// Shows information about the store
    Info,
}

fn resolve_storage(path: Option<PathBuf>, config: &Config) -> Result<FileStorage> {
    let path = match path {
        Some(p) => p,
        None => default_store_path()?,
    };
    Ok(FileStorage::new(path).with_id_field(config.id_field.clone()))
}

/// Uses `--key` when given, otherwise derives the key from the passphrase
/// and the salt stored in the record store.
fn resolve_key(key: Option<&str>, storage: &FileStorage) -> Result<SymmetricKey> {
    if let Some(text) = key {
        return import_key(text.trim()).context("invalid --key");
    }

    let meta = storage.meta()?;
    let (Some(salt), Some(kdf)) = (meta.salt, meta.kdf) else {
        bail!("store has no passphrase salt; pass --key");
    };
    let salt = Salt::decode(&salt).context("store salt is corrupted")?;

    let passphrase = auth::read_passphrase()?;
    let derived = derive_key_with(&passphrase, Some(salt), &kdf)
        .context("unable to derive encryption key")?;
    Ok(derived.key)
}

fn cipher_for(storage: &FileStorage, config: &Config) -> Result<Cipher> {
    if storage.exists() {
        Ok(Cipher::new(storage.meta()?.cipher))
    } else {
        Ok(config.cipher())
    }
}

fn open_store(storage: FileStorage, config: &Config) -> Result<EncryptedStore<FileStorage>> {
    let cipher = Cipher::new(storage.meta()?.cipher);
    Ok(EncryptedStore::with_options(storage, cipher, config.seal.clone()))
}

fn parse_record(text: &str) -> Result<Record> {
    match serde_json::from_str::<Value>(text).context("record is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("record must be a JSON object"),
    }
}

fn parse_query(filters: &[String]) -> Result<Query> {
    let mut query = Query::all();
    for filter in filters {
        let Some((field, value)) = filter.split_once('=') else {
            bail!("filter '{filter}' must look like FIELD=VALUE");
        };
        query = query.eq(field, value);
    }
    Ok(query)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Cli::parse();
    let config = Config::from_env()?;
    let storage = resolve_storage(args.store.clone(), &config)?;
    let key_arg = args.key.as_deref();

    match args.command {
        Commands::Init { kdf } => {
            if storage.exists() {
                bail!("fieldseal store already exists");
            }
            let kdf = kdf.to_kdf_params(config.kdf)?;
            let passphrase = auth::read_new_passphrase_with_confirmation()?;
            let derived = derive_key_with(&passphrase, None, &kdf)
                .context("failed to derive encryption key")?;
            drop(passphrase);

            storage.init(StoreMeta {
                cipher: config.cipher,
                kdf: Some(kdf),
                salt: Some(derived.salt.encode()),
            })?;
            println!("store initialized");
        }
        Commands::Keygen => {
            let key = generate_key()?;
            println!("{}", export_key(&key));
        }
        Commands::Derive { salt, kdf } => {
            let kdf = kdf.to_kdf_params(config.kdf)?;
            let salt = salt
                .as_deref()
                .map(|s| Salt::decode(s.trim()))
                .transpose()
                .context("invalid --salt")?;
            let passphrase = auth::read_passphrase()?;
            let derived = derive_key_with(&passphrase, salt, &kdf)?;
            let out = json!({
                "key": export_key(&derived.key),
                "salt": derived.salt.encode(),
                "kdf": kdf,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Encrypt { plaintext } => {
            let key = resolve_key(key_arg, &storage)?;
            let payload = cipher_for(&storage, &config)?.encrypt(&plaintext, &key)?;
            println!("{}", serde_json::to_string(&payload)?);
        }
        Commands::Decrypt { ciphertext, iv } => {
            let key = resolve_key(key_arg, &storage)?;
            let payload = EncryptedPayload::new(ciphertext, iv);
            let plaintext = cipher_for(&storage, &config)?.decrypt(&payload, &key)?;
            println!("{plaintext}");
        }
        Commands::Put {
            collection,
            record,
            sensitive,
        } => {
            let record = parse_record(&record)?;
            let key = resolve_key(key_arg, &storage)?;
            let store = open_store(storage, &config)?;
            let stored = store.store_encrypted(&collection, record, &sensitive.fields, &key)?;
            let id = match stored.get(&config.id_field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            println!("stored record {id} in '{collection}'");
        }
        Commands::Get {
            collection,
            filters,
            sensitive,
            partial,
        } => {
            let query = parse_query(&filters)?;
            let key = resolve_key(key_arg, &storage)?;
            let store = open_store(storage, &config)?;
            let rows = store.retrieve_decrypted(&collection, &query, &sensitive.fields, &key)?;

            if rows.is_empty() {
                println!("no records found");
                return Ok(());
            }

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if partial {
                    for (field, err) in row.failures() {
                        eprintln!("warning: field '{field}': {err}");
                    }
                    out.push(Value::Object(row.into_parts().0));
                } else {
                    out.push(Value::Object(row.into_record()?));
                }
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Update {
            collection,
            id,
            changes,
            sensitive,
        } => {
            let fields = parse_record(&changes)?;
            let key = resolve_key(key_arg, &storage)?;
            let store = open_store(storage, &config)?;
            store.update_encrypted(&collection, &id, fields, &sensitive.fields, &key)?;
            println!("record {id} in '{collection}' updated");
        }
        Commands::Info => {
            let doc = storage.load()?;
            let meta = doc.meta();
            println!("path:     {}", storage.path().display());
            println!("version:  {}", doc.version());
            println!("cipher:   {}", meta.cipher);
            match &meta.kdf {
                Some(kdf) => println!("kdf:      {}", serde_json::to_string(kdf)?),
                None => println!("kdf:      none (key supplied externally)"),
            }
            for (name, rows) in doc.collections() {
                println!("{name}: {} record(s)", rows.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_arguments_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn update_keeps_changes_and_sensitive_fields_apart() {
        let cli = Cli::try_parse_from([
            "fieldseal",
            "update",
            "profiles",
            "1",
            r#"{"ssn":"9"}"#,
            "-s",
            "ssn,email",
        ])
        .unwrap();

        let Commands::Update {
            changes, sensitive, ..
        } = cli.command
        else {
            panic!("expected update command");
        };
        assert_eq!(changes, r#"{"ssn":"9"}"#);
        assert_eq!(sensitive.fields, ["ssn", "email"]);
    }
}
