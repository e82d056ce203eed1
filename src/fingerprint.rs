//! Request Fingerprints
//!
//! A fingerprint is the SHA-256 digest of a canonical serialization of the request
//! content that determines its result: script, datasources, parent and policies.
//! Delivery flags (`async`, `doValidate`, `doProfile`, `pageSpec`) are not part of
//! the key.
//!
//! Datasource order is kept as given since scripts may reference sources by position.
//! Policies are stably sorted by field name, so callers may list fields in any order
//! while policies for the same field keep their relative (override) order.

use crate::error::Result;
use crate::request::{Datasource, FieldPolicy, Parent, TransformRequest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

const FINGERPRINT_DOMAIN: &[u8] = b"transform-request/v1\0";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Deterministic table name under which the result is materialized
    pub fn table_name(&self) -> String {
        format!("transform_{}", &self.to_hex()[..24])
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&raw).ok_or_else(|| serde::de::Error::custom("invalid fingerprint"))
    }
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    script: &'a str,
    datasources: &'a [Datasource],
    parent: Option<CanonicalParent<'a>>,
    policies: Vec<&'a FieldPolicy>,
}

/// Parent as resolution sees it: blank fields dropped, table name trimmed
#[derive(Serialize)]
struct CanonicalParent<'a> {
    table: Option<&'a str>,
    script: Option<&'a str>,
}

impl<'a> From<&'a Parent> for CanonicalParent<'a> {
    fn from(parent: &'a Parent) -> Self {
        Self {
            table: parent.table(),
            script: parent.script(),
        }
    }
}

/// Compute the cache key of a request.
pub fn fingerprint(request: &TransformRequest) -> Result<Fingerprint> {
    let mut policies: Vec<&FieldPolicy> = request.policies.iter().collect();
    policies.sort_by(|a, b| a.field_name.cmp(&b.field_name));

    let canonical = CanonicalRequest {
        script: &request.script,
        datasources: &request.datasources,
        parent: request.parent.as_ref().map(CanonicalParent::from),
        policies,
    };
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update(&bytes);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Ok(Fingerprint(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{PageSpec, ValidationRule};

    fn base() -> TransformRequest {
        TransformRequest::new("SELECT * FROM t")
            .with_datasource(Datasource::named("t"))
            .with_policy(FieldPolicy::new("a", vec![ValidationRule::NotNull]))
            .with_policy(FieldPolicy::new("b", vec![ValidationRule::Unique]))
    }

    #[test]
    fn test_identical_content_same_fingerprint() {
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&base()).unwrap());
    }

    #[test]
    fn test_delivery_flags_do_not_change_fingerprint() {
        let tweaked = base()
            .asynchronous()
            .validate_results(false)
            .profile_results(true)
            .with_page(PageSpec::new(10, 5));
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&tweaked).unwrap());
    }

    #[test]
    fn test_content_changes_fingerprint() {
        let original = fingerprint(&base()).unwrap();

        let mut script = base();
        script.script = "SELECT a FROM t".to_string();
        assert_ne!(original, fingerprint(&script).unwrap());

        let datasources = base().with_datasource(Datasource::named("u"));
        assert_ne!(original, fingerprint(&datasources).unwrap());

        let parent = base().with_parent(Parent::from_table("transform_0001"));
        assert_ne!(original, fingerprint(&parent).unwrap());

        let policies = base().with_policy(FieldPolicy::new("c", vec![ValidationRule::NotNull]));
        assert_ne!(original, fingerprint(&policies).unwrap());
    }

    #[test]
    fn test_parent_is_keyed_by_resolved_reference() {
        let request = |parent: Parent| TransformRequest::new("SELECT * FROM parent").with_parent(parent);
        let padded = Parent {
            table: Some("  transform_0001 ".to_string()),
            script: None,
        };
        assert_eq!(
            fingerprint(&request(padded)).unwrap(),
            fingerprint(&request(Parent::from_table("transform_0001"))).unwrap()
        );

        let blank_table = Parent {
            table: Some(String::new()),
            script: Some("SELECT 1 AS x".to_string()),
        };
        assert_eq!(
            fingerprint(&request(blank_table)).unwrap(),
            fingerprint(&request(Parent::from_script("SELECT 1 AS x"))).unwrap()
        );
    }

    #[test]
    fn test_datasource_order_is_significant() {
        let ab = TransformRequest::new("SELECT 1")
            .with_datasource(Datasource::named("a"))
            .with_datasource(Datasource::named("b"));
        let ba = TransformRequest::new("SELECT 1")
            .with_datasource(Datasource::named("b"))
            .with_datasource(Datasource::named("a"));
        assert_ne!(fingerprint(&ab).unwrap(), fingerprint(&ba).unwrap());
    }

    #[test]
    fn test_policy_order_across_fields_is_normalized() {
        let reordered = TransformRequest::new("SELECT * FROM t")
            .with_datasource(Datasource::named("t"))
            .with_policy(FieldPolicy::new("b", vec![ValidationRule::Unique]))
            .with_policy(FieldPolicy::new("a", vec![ValidationRule::NotNull]));
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&reordered).unwrap());
    }

    #[test]
    fn test_policy_order_within_field_is_significant() {
        let first = TransformRequest::new("SELECT 1")
            .with_policy(FieldPolicy::new("a", vec![ValidationRule::NotNull]))
            .with_policy(FieldPolicy::new("a", vec![ValidationRule::Unique]));
        let second = TransformRequest::new("SELECT 1")
            .with_policy(FieldPolicy::new("a", vec![ValidationRule::Unique]))
            .with_policy(FieldPolicy::new("a", vec![ValidationRule::NotNull]));
        assert_ne!(fingerprint(&first).unwrap(), fingerprint(&second).unwrap());
    }

    #[test]
    fn test_hex_round_trip_and_table_name() {
        let fp = fingerprint(&base()).unwrap();
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()), Some(fp));
        let table = fp.table_name();
        assert!(table.starts_with("transform_"));
        assert_eq!(table.len(), "transform_".len() + 24);
    }
}
