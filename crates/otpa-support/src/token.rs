//! Session token generation and constant-time comparison helpers.

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Generate an opaque, random 128-bit session token, hex-encoded.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare two byte strings in constant time, for MAC/signature checks
/// where a timing side-channel could leak which byte first differed.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_128_bits_hex_encoded() {
        let token = generate_session_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_differ_across_calls() {
        assert_ne!(generate_session_token(), generate_session_token());
    }

    #[test]
    fn constant_time_eq_matches_standard_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
