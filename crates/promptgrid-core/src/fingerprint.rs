use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Stable fingerprint of anything serializable (compact JSON, field order as declared).
pub fn of_json<T: serde::Serialize>(value: &T) -> anyhow::Result<String> {
    let canonical = serde_json::to_string(value)?;
    Ok(sha256_hex(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn json_fingerprint_is_stable() {
        let a = serde_json::json!({"prompts": ["p1"], "models": ["m"]});
        assert_eq!(of_json(&a).unwrap(), of_json(&a.clone()).unwrap());
    }
}
