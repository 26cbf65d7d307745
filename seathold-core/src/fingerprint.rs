use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash of the logical content of a hold request.
///
/// Seat order does not matter: `[A2, A1]` and `[A1, A2]` fingerprint the same.
pub fn fingerprint(event_id: &Uuid, seats: &[String], user_id: &Uuid) -> String {
    let mut sorted: Vec<&str> = seats.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(event_id.as_bytes());
    for seat in sorted {
        // Length prefix keeps ["A1", "B"] distinct from ["A", "1B"]
        hasher.update((seat.len() as u64).to_be_bytes());
        hasher.update(seat.as_bytes());
    }
    hasher.update(user_id.as_bytes());

    hex::encode(hasher.finalize())
}
