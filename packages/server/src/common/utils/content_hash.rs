use sha2::{Digest, Sha256};

/// Stable fingerprint for an inbound message that arrived without a
/// `Message-Id` header.
///
/// Hashes the routing and content fields with a separator byte between them,
/// so a provider redelivering the same email produces the same identifier
/// and the `message_id` uniqueness check still deduplicates it.
pub fn generate_message_fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.trim().as_bytes());
        hasher.update([0x1f]);
    }
    format!("generated-{:x}", hasher.finalize())
}
