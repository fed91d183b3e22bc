use sha2::{Digest, Sha256};

/// Recursively sorts object keys so two semantically-equal JSON values with
/// differently-ordered maps hash identically (§4.5/§8: integrity hash is a
/// function of `aggregated_data`'s content, not its serialized key order).
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// `sha256(canonicalize(aggregated_data))`, hex-encoded — the integrity
/// hash recomputed on every `save` and verified at startup (§4.5, §8).
pub fn integrity_hash(aggregated_data: &serde_json::Value) -> String {
    let canonical = canonicalize(aggregated_data);
    let serialized = serde_json::to_string(&canonical).expect("canonical value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}
