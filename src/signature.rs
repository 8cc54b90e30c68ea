use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Deterministic HMAC signer for outbound gateway requests and inbound
/// payment webhooks.
///
/// The canonical form is the payload's keys sorted lexicographically and
/// joined as `key=value` pairs with `&`. Signing and verification share
/// this exact canonicalization; any divergence makes webhook
/// authentication fail silently.
#[derive(Clone)]
pub struct SignatureCodec {
    checksum_key: String,
}

impl SignatureCodec {
    pub fn new(checksum_key: impl Into<String>) -> Self {
        Self {
            checksum_key: checksum_key.into(),
        }
    }

    /// Signs a JSON payload, returning the hex-encoded HMAC-SHA256 digest
    /// of the canonical string. Non-object payloads canonicalize to the
    /// empty string.
    pub fn sign(&self, payload: &Value) -> String {
        let canonical = canonicalize(payload);
        let mut mac = HmacSha256::new_from_slice(self.checksum_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recomputes the signature over `payload` and compares it with the
    /// presented hex digest in constant time. Malformed hex fails closed.
    pub fn verify(&self, payload: &Value, signature_hex: &str) -> bool {
        let presented = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let expected = match hex::decode(self.sign(payload)) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        constant_time_compare(&expected, &presented)
    }
}

/// Renders a payload object as `key=value&key=value` with keys in
/// lexicographic order, independent of the order fields arrived in.
fn canonicalize(payload: &Value) -> String {
    let Value::Object(map) = payload else {
        return String::new();
    };

    let sorted: BTreeMap<&String, &Value> = map.iter().collect();
    let mut parts = Vec::with_capacity(sorted.len());
    for (key, value) in sorted {
        parts.push(format!("{}={}", key, render_value(value)));
    }
    parts.join("&")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Nested structures are carried verbatim as compact JSON
        other => other.to_string(),
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const TEST_KEY: &str = "test-checksum-key-0123456789";

    #[test]
    fn canonical_form_sorts_keys() {
        let payload = json!({
            "orderCode": 1723450000u64,
            "amount": 500000,
            "description": "Logo design",
        });
        assert_eq!(
            canonicalize(&payload),
            "amount=500000&description=Logo design&orderCode=1723450000"
        );
    }

    #[test]
    fn null_renders_empty_and_nested_renders_json() {
        let payload = json!({
            "b": null,
            "a": {"x": 1},
        });
        assert_eq!(canonicalize(&payload), r#"a={"x":1}&b="#);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let codec = SignatureCodec::new(TEST_KEY);
        let payload = json!({
            "orderCode": 1723450000u64,
            "amount": 500000,
            "status": "PAID",
        });
        let signature = codec.sign(&payload);
        assert_eq!(signature.len(), 64);
        assert!(codec.verify(&payload, &signature));
    }

    #[test]
    fn altered_field_fails_verification() {
        let codec = SignatureCodec::new(TEST_KEY);
        let payload = json!({"orderCode": 1u64, "amount": 500000});
        let signature = codec.sign(&payload);

        let tampered = json!({"orderCode": 1u64, "amount": 999999});
        assert!(!codec.verify(&tampered, &signature));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = SignatureCodec::new(TEST_KEY);
        let verifier = SignatureCodec::new("another-checksum-key-9876543210");
        let payload = json!({"orderCode": 1u64});
        assert!(!verifier.verify(&payload, &signer.sign(&payload)));
    }

    #[test]
    fn malformed_hex_fails_closed() {
        let codec = SignatureCodec::new(TEST_KEY);
        let payload = json!({"orderCode": 1u64});
        assert!(!codec.verify(&payload, "not-hex"));
        assert!(!codec.verify(&payload, ""));
    }

    #[test]
    fn key_order_does_not_affect_signature() {
        let codec = SignatureCodec::new(TEST_KEY);
        let a: Value =
            serde_json::from_str(r#"{"amount": 1, "orderCode": 2, "status": "PAID"}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"status": "PAID", "orderCode": 2, "amount": 1}"#).unwrap();
        assert_eq!(codec.sign(&a), codec.sign(&b));
    }

    proptest! {
        /// Signatures depend on key-value content, never on arrival order.
        #[test]
        fn signature_is_order_independent(
            entries in proptest::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 1..8),
            seed in any::<u64>(),
        ) {
            let codec = SignatureCodec::new(TEST_KEY);

            let forward: serde_json::Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();

            // Rebuild the object inserting keys in a rotated order
            let keys: Vec<&String> = entries.keys().collect();
            let offset = (seed as usize) % keys.len();
            let mut rotated = serde_json::Map::new();
            for i in 0..keys.len() {
                let k = keys[(i + offset) % keys.len()];
                rotated.insert(k.clone(), Value::String(entries[k].clone()));
            }

            let forward = Value::Object(forward);
            let sig_a = codec.sign(&forward);
            let sig_b = codec.sign(&Value::Object(rotated));
            prop_assert_eq!(&sig_a, &sig_b);
            prop_assert!(codec.verify(&forward, &sig_a));
        }
    }
}
