//! Decoding of short strings packed into fixed-width fields (`bytes32`).
//!
//! Contracts store document names as ASCII left-aligned in the field and
//! padded with zero bytes. Decoding stops at the first zero byte.

/// Decodes a fixed-width string field.
///
/// `0x414243000000` decodes to `"ABC"`.
pub fn decode_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn test_decode_stops_at_nul() {
        assert_eq!(decode_bytes(&hex!("414243000000")), "ABC");
        assert_eq!(decode_bytes(&hex!("4142430044")), "ABC");
        assert_eq!(decode_bytes(&hex!("00414243")), "");
        assert_eq!(decode_bytes(&[]), "");
    }

    #[test]
    fn test_decode_bytes32() {
        let mut word = [0u8; 32];
        word[..8].copy_from_slice(b"prospect");
        assert_eq!(decode_bytes(&word), "prospect");
        assert_eq!(decode_bytes(&[0u8; 32]), "");
    }
}
