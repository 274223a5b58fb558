//! Short random identifiers for object keys, slugs and account credentials.
//!
//! Identifiers only need to avoid accidental collisions, not resist guessing, so the
//! thread-local generator (seeded once per thread from the OS) is sufficient.

use rand::Rng;

/// The 62-character alphabet identifiers are drawn from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated object keys (before the extension) and slugs.
pub const ID_LENGTH: usize = 10;

/// Length of minted account credentials.
pub const CREDENTIAL_LENGTH: usize = 32;

/// Generate `length` characters drawn uniformly and independently from [`ALPHABET`].
pub fn generate(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Whether `value` could have come from [`generate`].
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_alphanumeric())
}
