//! Records, queries and the sealed form of a sensitive field.
//!
//! A sealed field is stored inside the record as a JSON object:
//!
//! ```text
//! { "ciphertext": "<base64>", "iv": "<base64>" }                      string value
//! { "ciphertext": "<base64>", "iv": "<base64>", "encoding": "json" }  any other JSON value
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::crypto::{Cipher, EncryptedPayload, SymmetricKey};
use crate::error::{CryptoError, Error};

/// A structured row: field name to JSON value.
pub type Record = Map<String, Value>;

/// How the plaintext of a sealed field maps back to a JSON value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldEncoding {
    /// The field held a JSON string; the plaintext is that string.
    #[default]
    Text,
    /// The field held another JSON value; the plaintext is its JSON text.
    Json,
}

/// The stored form of one encrypted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedField {
    payload: EncryptedPayload,
    encoding: FieldEncoding,
}

impl SealedField {
    pub fn payload(&self) -> &EncryptedPayload {
        &self.payload
    }

    pub fn encoding(&self) -> FieldEncoding {
        self.encoding
    }

    /// Reads a sealed field back out of a record value, if it is one.
    ///
    /// Only objects with exactly `ciphertext`, `iv` and an optional
    /// `encoding` key qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj
            .keys()
            .any(|k| !matches!(k.as_str(), "ciphertext" | "iv" | "encoding"))
        {
            return None;
        }

        let ciphertext = obj.get("ciphertext")?.as_str()?;
        let iv = obj.get("iv")?.as_str()?;
        let encoding = match obj.get("encoding").map(Value::as_str) {
            None | Some(Some("text")) => FieldEncoding::Text,
            Some(Some("json")) => FieldEncoding::Json,
            Some(_) => return None,
        };

        Some(Self {
            payload: EncryptedPayload::new(ciphertext, iv),
            encoding,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("ciphertext".into(), Value::String(self.payload.ciphertext().to_string()));
        obj.insert("iv".into(), Value::String(self.payload.iv().to_string()));
        if self.encoding == FieldEncoding::Json {
            obj.insert("encoding".into(), Value::String("json".into()));
        }
        Value::Object(obj)
    }
}

/// Equality filters applied by a storage backend.
///
/// Filters on sealed fields never match, since each ciphertext is randomized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<(String, Value)>,
}

impl Query {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a `field == value` filter.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

/// Builds the associated data binding a field to its record.
pub(crate) fn field_context(collection: &str, field: &str, id: &str) -> Vec<u8> {
    format!("{collection}\u{1f}{field}\u{1f}{id}").into_bytes()
}

/// Renders a record id as text, whether stored as a string or a number.
pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Context bound into each field when associated-data binding is enabled.
#[derive(Debug, Clone, Copy)]
pub struct FieldBinding<'a> {
    pub collection: &'a str,
    pub id: &'a str,
}

/// Replaces every listed field present in `record` with its sealed form.
///
/// Fields not listed pass through untouched; listed fields missing from the
/// record are skipped. Each field gets its own nonce.
pub fn seal_fields<F: AsRef<str>>(
    cipher: &Cipher,
    record: &mut Record,
    sensitive_fields: &[F],
    key: &SymmetricKey,
    binding: Option<FieldBinding<'_>>,
) -> Result<usize, Error> {
    let mut sealed = 0;
    for field in sensitive_fields {
        let field = field.as_ref();
        let Some(value) = record.get_mut(field) else {
            continue;
        };

        let (plaintext, encoding) = match &*value {
            Value::String(s) => (s.clone(), FieldEncoding::Text),
            other => {
                let text = serde_json::to_string(other).map_err(|source| Error::Serialization {
                    field: field.to_string(),
                    source,
                })?;
                (text, FieldEncoding::Json)
            }
        };
        let plaintext = Zeroizing::new(plaintext);

        let payload = match binding {
            Some(b) => cipher.encrypt_with_aad(&plaintext, key, &field_context(b.collection, field, b.id))?,
            None => cipher.encrypt(&plaintext, key)?,
        };

        *value = SealedField { payload, encoding }.to_value();
        sealed += 1;
    }
    Ok(sealed)
}

/// Decrypts every listed field that is present and sealed.
///
/// A field that fails to open keeps its sealed value and its error is
/// returned in the map; the remaining fields are still opened.
pub fn open_fields<F: AsRef<str>>(
    cipher: &Cipher,
    record: &mut Record,
    sensitive_fields: &[F],
    key: &SymmetricKey,
    binding: Option<FieldBinding<'_>>,
) -> BTreeMap<String, CryptoError> {
    let mut failures = BTreeMap::new();
    for field in sensitive_fields {
        let field = field.as_ref();
        let Some(value) = record.get_mut(field) else {
            continue;
        };
        let Some(sealed) = SealedField::from_value(value) else {
            continue;
        };

        let opened = match binding {
            Some(b) => cipher.decrypt_with_aad(
                &sealed.payload,
                key,
                &field_context(b.collection, field, b.id),
            ),
            None => cipher.decrypt(&sealed.payload, key),
        };

        let plaintext = match opened {
            Ok(text) => Zeroizing::new(text),
            Err(e) => {
                failures.insert(field.to_string(), e);
                continue;
            }
        };

        *value = match sealed.encoding {
            FieldEncoding::Text => Value::String(plaintext.to_string()),
            // The tag verified, so a parse failure means a foreign writer
            // sealed non-JSON text under the json marker; hand back the text.
            FieldEncoding::Json => serde_json::from_str(&plaintext)
                .unwrap_or_else(|_| Value::String(plaintext.to_string())),
        };
    }
    failures
}

/// A record read back through the facade.
///
/// Fields that failed to decrypt are left sealed in [`record`](Self::record)
/// and listed in [`failures`](Self::failures).
#[derive(Debug)]
pub struct DecryptedRecord {
    record: Record,
    failures: BTreeMap<String, CryptoError>,
}

impl DecryptedRecord {
    pub(crate) fn new(record: Record, failures: BTreeMap<String, CryptoError>) -> Self {
        Self { record, failures }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn failures(&self) -> &BTreeMap<String, CryptoError> {
        &self.failures
    }

    /// `true` when every sealed sensitive field was decrypted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Strict policy: the whole record fails if any field failed.
    pub fn into_record(self) -> Result<Record, CryptoError> {
        match self.failures.into_values().next() {
            Some(err) => Err(err),
            None => Ok(self.record),
        }
    }

    pub fn into_parts(self) -> (Record, BTreeMap<String, CryptoError>) {
        (self.record, self.failures)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::crypto::generate_key;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn seals_only_listed_fields() {
        let key = generate_key().unwrap();
        let cipher = Cipher::default();
        let mut rec = record(json!({ "id": "1", "name": "Alice", "ssn": "123-45-6789" }));

        let count = seal_fields(&cipher, &mut rec, &["ssn", "missing"], &key, None).unwrap();

        assert_eq!(count, 1);
        assert_eq!(rec["name"], "Alice");
        assert_eq!(rec["id"], "1");
        let sealed = SealedField::from_value(&rec["ssn"]).unwrap();
        assert_eq!(sealed.encoding(), FieldEncoding::Text);
        assert_eq!(cipher.decrypt(sealed.payload(), &key).unwrap(), "123-45-6789");
        assert!(!rec.contains_key("missing"));
    }

    #[test]
    fn non_string_values_roundtrip_with_json_marker() {
        let key = generate_key().unwrap();
        let cipher = Cipher::default();
        let original = json!({ "age": 42, "tags": ["a", "b"], "vip": true, "note": null });
        let mut rec = record(original.clone());
        let fields = ["age", "tags", "vip", "note"];

        seal_fields(&cipher, &mut rec, &fields, &key, None).unwrap();
        assert_eq!(rec["age"]["encoding"], "json");
        assert!(rec["age"].get("ciphertext").is_some());

        let failures = open_fields(&cipher, &mut rec, &fields, &key, None);
        assert!(failures.is_empty());
        assert_eq!(Value::Object(rec), original);
    }

    #[test]
    fn each_field_gets_its_own_nonce() {
        let key = generate_key().unwrap();
        let cipher = Cipher::default();
        let mut rec = record(json!({ "a": "same", "b": "same" }));

        seal_fields(&cipher, &mut rec, &["a", "b"], &key, None).unwrap();
        assert_ne!(rec["a"]["iv"], rec["b"]["iv"]);
        assert_ne!(rec["a"]["ciphertext"], rec["b"]["ciphertext"]);
    }

    #[test]
    fn one_bad_field_does_not_hide_the_others() {
        let key = generate_key().unwrap();
        let cipher = Cipher::default();
        let mut rec = record(json!({ "email": "a@example.com", "ssn": "123-45-6789" }));
        seal_fields(&cipher, &mut rec, &["email", "ssn"], &key, None).unwrap();

        rec["ssn"]["iv"] = json!("AAAAAAAAAAAAAAAA");
        let tampered_ssn = rec["ssn"].clone();

        let failures = open_fields(&cipher, &mut rec, &["email", "ssn"], &key, None);

        assert_eq!(rec["email"], "a@example.com");
        assert_eq!(rec["ssn"], tampered_ssn);
        assert!(matches!(failures.get("ssn"), Some(CryptoError::Authentication)));
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn plaintext_sensitive_fields_pass_through_on_open() {
        let key = generate_key().unwrap();
        let mut rec = record(json!({ "ssn": "legacy-plain", "obj": { "x": 1 } }));

        let failures = open_fields(&Cipher::default(), &mut rec, &["ssn", "obj"], &key, None);

        assert!(failures.is_empty());
        assert_eq!(rec["ssn"], "legacy-plain");
        assert_eq!(rec["obj"], json!({ "x": 1 }));
    }

    #[test]
    fn bound_field_cannot_be_moved() {
        let key = generate_key().unwrap();
        let cipher = Cipher::default();
        let binding = FieldBinding {
            collection: "profiles",
            id: "1",
        };
        let mut rec = record(json!({ "phone": "555", "ssn": "123" }));
        seal_fields(&cipher, &mut rec, &["phone", "ssn"], &key, Some(binding)).unwrap();

        let swapped = rec["ssn"].clone();
        rec["phone"] = swapped;

        let failures = open_fields(&cipher, &mut rec, &["phone", "ssn"], &key, Some(binding));
        assert!(failures.contains_key("phone"));
        assert_eq!(rec["ssn"], "123");

        let other = FieldBinding {
            collection: "profiles",
            id: "2",
        };
        let mut rec2 = record(json!({ "ssn": "123" }));
        seal_fields(&cipher, &mut rec2, &["ssn"], &key, Some(binding)).unwrap();
        let failures = open_fields(&cipher, &mut rec2, &["ssn"], &key, Some(other));
        assert!(failures.contains_key("ssn"));
    }

    #[test]
    fn sealed_field_detection_is_strict() {
        assert!(SealedField::from_value(&json!("text")).is_none());
        assert!(SealedField::from_value(&json!({ "ciphertext": "x" })).is_none());
        assert!(SealedField::from_value(&json!({ "ciphertext": "x", "iv": "y", "extra": 1 })).is_none());
        assert!(SealedField::from_value(&json!({ "ciphertext": "x", "iv": "y" })).is_some());
    }

    #[test]
    fn query_matches_on_equality() {
        let rec = record(json!({ "id": "1", "name": "Alice", "age": 30 }));

        assert!(Query::all().matches(&rec));
        assert!(Query::all().eq("name", "Alice").matches(&rec));
        assert!(Query::all().eq("name", "Alice").eq("age", 30).matches(&rec));
        assert!(!Query::all().eq("name", "Bob").matches(&rec));
        assert!(!Query::all().eq("missing", "x").matches(&rec));
    }

    #[test]
    fn strict_policy_surfaces_first_failure() {
        let mut failures = BTreeMap::new();
        failures.insert("ssn".to_string(), CryptoError::Authentication);
        let decrypted = DecryptedRecord::new(Record::new(), failures);

        assert!(!decrypted.is_complete());
        assert!(matches!(decrypted.into_record(), Err(CryptoError::Authentication)));
    }
}
