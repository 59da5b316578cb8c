//! Record signing and the series encoding shared by the storage engines.

use crate::error::{Result, StorageError};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use vigil_common::config::NodeIdentity;
use vigil_common::types::{Fields, FieldValue, OperationRecord, SIGN_FIELD, VERSION_FIELD};

/// Canonical text of a field map: its JSON rendering with sorted keys and
/// without the signature field.
pub fn canonical(fields: &Fields) -> String {
    let unsigned: Fields = fields
        .iter()
        .filter(|(k, _)| k.as_str() != SIGN_FIELD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    // String keys and scalar values always serialize.
    serde_json::to_string(&unsigned).unwrap_or_default()
}

/// Hex SHA-256 over the node secret followed by the canonical record text.
///
/// # Examples
///
/// ```
/// use vigil_common::types::{Fields, FieldValue};
/// use vigil_storage::codec::sign;
///
/// let mut fields = Fields::new();
/// fields.insert("rtt".into(), FieldValue::Float(12.5));
/// assert_eq!(sign("s3cret", &fields), sign("s3cret", &fields));
/// assert_ne!(sign("s3cret", &fields), sign("other", &fields));
/// assert_eq!(sign("s3cret", &fields).len(), 64);
/// ```
pub fn sign(secret: &str, fields: &Fields) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(canonical(fields).as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks a signature produced by [`sign`] against the record's fields.
pub fn verify(secret: &str, fields: &Fields) -> bool {
    match fields.get(SIGN_FIELD).and_then(FieldValue::as_str) {
        Some(signature) => signature == sign(secret, fields),
        None => false,
    }
}

/// Enriches outgoing records with the node version and a signature.
#[derive(Debug, Clone)]
pub struct RecordSigner {
    secret: String,
    version: String,
}

impl RecordSigner {
    pub fn new(secret: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            version: version.into(),
        }
    }

    pub fn from_identity(identity: &NodeIdentity) -> Self {
        if identity.secret.is_empty() {
            tracing::warn!("Node secret is not configured, records are signed with an empty secret");
        }
        Self::new(identity.secret.clone(), identity.version.clone())
    }

    /// Injects `version`, then `sign` computed over everything else.
    pub fn seal(&self, op_type: &str, mut fields: Fields) -> OperationRecord {
        fields.remove(SIGN_FIELD);
        fields.insert(VERSION_FIELD.to_string(), FieldValue::from(self.version.as_str()));
        let signature = sign(&self.secret, &fields);
        fields.insert(SIGN_FIELD.to_string(), FieldValue::Text(signature));
        OperationRecord {
            op_type: op_type.to_string(),
            fields,
        }
    }
}

/// Series body in the InfluxDB 0.8 write schema:
/// `[{"name": .., "columns": [..], "points": [[..]]}]`.
pub fn encode_series(name: &str, fields: &Fields) -> Value {
    let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
    let values: Vec<&FieldValue> = fields.values().collect();
    json!([{
        "name": name,
        "columns": columns,
        "points": [values],
    }])
}

/// Series and attribute names are embedded in query text, so only
/// `[A-Za-z0-9_]` is accepted.
pub fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_fields() -> Fields {
        let mut fields = Fields::new();
        fields.insert("landmark".into(), FieldValue::from("example.org"));
        fields.insert("avg".into(), FieldValue::Float(23.4));
        fields.insert("packets".into(), FieldValue::Int(10));
        fields
    }

    #[test]
    fn signature_is_deterministic() {
        let fields = ping_fields();
        assert_eq!(sign("secret", &fields), sign("secret", &fields.clone()));
    }

    #[test]
    fn signature_changes_with_any_field() {
        let base = sign("secret", &ping_fields());

        let mut changed = ping_fields();
        changed.insert("packets".into(), FieldValue::Int(11));
        assert_ne!(base, sign("secret", &changed));

        let mut added = ping_fields();
        added.insert("loss".into(), FieldValue::Float(0.0));
        assert_ne!(base, sign("secret", &added));
    }

    #[test]
    fn signature_ignores_existing_sign_field() {
        let mut fields = ping_fields();
        let expected = sign("secret", &fields);
        fields.insert(SIGN_FIELD.into(), FieldValue::from("forged"));
        assert_eq!(sign("secret", &fields), expected);
    }

    #[test]
    fn seal_injects_version_and_verifiable_sign() {
        let signer = RecordSigner::new("secret", "1.4.0");
        let record = signer.seal("ping", ping_fields());

        assert_eq!(record.op_type, "ping");
        assert_eq!(record.get(VERSION_FIELD), Some(&FieldValue::from("1.4.0")));
        assert!(verify("secret", &record.fields));
        assert!(!verify("other-secret", &record.fields));

        let mut tampered = record.fields.clone();
        tampered.insert("avg".into(), FieldValue::Float(1.0));
        assert!(!verify("secret", &tampered));
    }

    #[test]
    fn seal_is_stable_for_identical_input() {
        let signer = RecordSigner::new("secret", "1.4.0");
        assert_eq!(
            signer.seal("ping", ping_fields()),
            signer.seal("ping", ping_fields())
        );
    }

    #[test]
    fn encode_series_aligns_columns_and_points() {
        let body = encode_series("ping", &ping_fields());
        assert_eq!(body[0]["name"], "ping");
        assert_eq!(body[0]["columns"], json!(["avg", "landmark", "packets"]));
        assert_eq!(body[0]["points"], json!([[23.4, "example.org", 10]]));
    }

    #[test]
    fn identifiers_are_restricted() {
        assert!(check_identifier("last_updated").is_ok());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("user; drop").is_err());
        assert!(check_identifier("a-b").is_err());
    }
}
