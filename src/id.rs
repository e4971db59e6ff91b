//! Document id generation.

use rand::rngs::OsRng;
use rand::RngCore;

const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 20;

/// Generate a 20-character lowercase alphanumeric document id.
///
/// Each OS-random byte is reduced modulo 36 into the alphabet. The
/// resulting bias is negligible and the ids are not security-bearing.
/// Panics if the OS entropy source fails.
pub fn generate_document_id() -> String {
    let mut bytes = [0u8; ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[(b % ALPHABET.len() as u8) as usize] as char)
        .collect()
}
