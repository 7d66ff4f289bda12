//! Session identifiers, request identifiers and log-safe phone digests.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of a session identifier.
pub const SESSION_ID_LEN: usize = 24;

/// Length of the hex prefix kept from a phone digest.
pub const DIGEST_LEN: usize = 12;

/// Generate a session identifier from the operating system's CSPRNG.
pub fn new_session_id() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Generate an identifier for correlating one HTTP interaction in logs.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// One-way digest of a phone number for logs and stats.
pub fn hash_for_logging(phone: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phone.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_session_ids_are_unique() {
        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(tokio::spawn(async {
                (0..1250).map(|_| new_session_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate session id");
            }
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_request_ids_are_uuids() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_hash_for_logging() {
        let h1 = hash_for_logging("923123456789");
        let h2 = hash_for_logging("923123456789");
        let h3 = hash_for_logging("14155551234");

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), DIGEST_LEN);
        assert!(!h1.contains("923123456789"));
    }
}
