//! Session identifier generation.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;

/// Random bytes drawn for every identifier.
pub const ID_ENTROPY_BYTES: usize = 32;

/// Length of an encoded identifier (unpadded base32 of 32 bytes).
pub const ID_LEN: usize = 52;

/// Generate a new session identifier.
///
/// 256 bits from the thread-local CSPRNG, encoded as unpadded RFC 4648
/// base32 so the result only contains `A-Z` and `2-7` and can be used as a
/// cookie value and as a storage key without escaping.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; ID_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Check that a string has the shape of a generated identifier.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}
