use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn hash_api_key(key: &str) -> String {
  format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Compare a presented key with the configured one by digest.
pub fn api_key_matches(presented: &str, expected: &str) -> bool {
  hash_api_key(presented) == hash_api_key(expected)
}

/// Current time in unix milliseconds.
pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as i64)
    .unwrap_or_default()
}
