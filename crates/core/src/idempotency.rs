//! Idempotency key derivation
//!
//! Every intended send is identified by a deterministic key over the
//! coordinates of the step. The unique constraint on `"Outbox"."idemKey"`
//! is the only cross-process guard against duplicate enqueues.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of the stored key in hex characters.
pub const IDEM_KEY_LEN: usize = 32;

/// Derive the idempotency key for one intended send.
///
/// The key is the SHA-256 of `"{sequence}:{lead}:{step}:{attempt}:{suffix}"`
/// truncated to 32 hex characters. Normal scheduler progression always uses
/// `attempt = 0` and an empty suffix; the extra fields leave room for
/// deliberate re-sends without widening the table.
pub fn idem_key(
    sequence_id: &Uuid,
    lead_id: &Uuid,
    step_number: i32,
    attempt: u32,
    suffix: &str,
) -> String {
    let canonical = format!("{sequence_id}:{lead_id}:{step_number}:{attempt}:{suffix}");
    let digest = Sha256::digest(canonical.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(IDEM_KEY_LEN);
    key
}
