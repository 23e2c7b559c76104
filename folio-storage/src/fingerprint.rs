//! Query fingerprinting.
//!
//! A fingerprint is the single key under which a query's cached result and
//! its execution statistics are stored.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Separates the query text from the parameter list in the hash input so
/// that `("a", ["b"])` and `("a\"b", [])` can never produce the same bytes.
const FIELD_SEPARATOR: u8 = 0x1F;

/// Deterministic key derived from query text and bound parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Fingerprint a query and its ordered parameters.
    ///
    /// The query text is trimmed and lower-cased before hashing. Parameters
    /// are serialized as a JSON array, so their order is significant.
    /// Output is a 64-character lowercase hex SHA-256 digest.
    pub fn compute(query: &str, params: &[Value]) -> Self {
        let normalized = query.trim().to_lowercase();
        let serialized_params = Value::Array(params.to_vec()).to_string();

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(serialized_params.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Use a caller-chosen key verbatim, e.g. `posts:list:page:1`.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_fixed_length_hex() {
        let fp = QueryFingerprint::compute("SELECT * FROM posts WHERE id = ?", &[json!(5)]);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let a = QueryFingerprint::compute("  SELECT * FROM posts  ", &[]);
        let b = QueryFingerprint::compute("select * from posts", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameter_order_matters() {
        let a = QueryFingerprint::compute("SELECT ?, ?", &[json!(1), json!(2)]);
        let b = QueryFingerprint::compute("SELECT ?, ?", &[json!(2), json!(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_and_null_params() {
        let empty = QueryFingerprint::compute("SELECT 1", &[]);
        let null = QueryFingerprint::compute("SELECT 1", &[Value::Null]);
        assert_ne!(empty, null);
        assert_eq!(empty, QueryFingerprint::compute("SELECT 1", &[]));
    }

    #[test]
    fn test_parameter_types_distinguished() {
        let number = QueryFingerprint::compute("SELECT ?", &[json!(5)]);
        let string = QueryFingerprint::compute("SELECT ?", &[json!("5")]);
        assert_ne!(number, string);
    }

    #[test]
    fn test_from_key_is_verbatim() {
        assert_eq!(
            QueryFingerprint::from_key("posts:list:page:1").as_str(),
            "posts:list:page:1"
        );
    }

    fn param_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_deterministic(
            query in "[A-Za-z *=?]{1,40}",
            params in prop::collection::vec(param_strategy(), 0..5),
        ) {
            prop_assert_eq!(
                QueryFingerprint::compute(&query, &params),
                QueryFingerprint::compute(&query, &params)
            );
        }

        #[test]
        fn prop_swapping_distinct_params_changes_fingerprint(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let forward = QueryFingerprint::compute("SELECT ?, ?", &[Value::from(a), Value::from(b)]);
            let reversed = QueryFingerprint::compute("SELECT ?, ?", &[Value::from(b), Value::from(a)]);
            prop_assert_ne!(forward, reversed);
        }
    }
}
