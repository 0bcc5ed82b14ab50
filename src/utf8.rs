//! The UTF-8 validator: a pure function over a byte slice.
//!
//! Must accept every RFC 3629-conformant sequence and reject overlong
//! encodings, surrogate-range codepoints, and truncated multi-byte
//! sequences — the same properties `str::from_utf8` enforces, spelled out
//! explicitly here so each rejection reason is independently testable.

/// Returns whether `bytes` is valid UTF-8 per RFC 3629.
#[cfg(feature = "simd")]
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    simdutf8::basic::from_utf8(bytes).is_ok()
}

/// Returns whether `bytes` is valid UTF-8 per RFC 3629.
#[cfg(not(feature = "simd"))]
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        let extra = if b0 < 0x80 {
            0
        } else if b0 & 0b1110_0000 == 0b1100_0000 {
            if b0 < 0xC2 {
                // overlong two-byte encoding (C0, C1)
                return false;
            }
            1
        } else if b0 & 0b1111_0000 == 0b1110_0000 {
            2
        } else if b0 & 0b1111_1000 == 0b1111_0000 {
            if b0 > 0xF4 {
                // beyond the Unicode range (codepoints > U+10FFFF)
                return false;
            }
            3
        } else {
            return false;
        };

        if i + extra >= bytes.len() {
            // truncated multi-byte sequence
            return false;
        }

        for (k, &cont) in bytes[i + 1..=i + extra].iter().enumerate() {
            if cont & 0b1100_0000 != 0b1000_0000 {
                return false;
            }

            // Additional overlong / surrogate / out-of-range checks that
            // depend on the lead byte and the first continuation byte.
            if k == 0 {
                match (b0, extra) {
                    (0xE0, 2) if cont < 0xA0 => return false, // overlong 3-byte
                    (0xED, 2) if cont >= 0xA0 => return false, // surrogate range
                    (0xF0, 3) if cont < 0x90 => return false, // overlong 4-byte
                    (0xF4, 3) if cont >= 0x90 => return false, // > U+10FFFF
                    _ => {}
                }
            }
        }

        i += extra + 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ascii() {
        assert!(is_valid_utf8(b"hello, world"));
    }

    #[test]
    fn accepts_multibyte_sequences() {
        assert!(is_valid_utf8("héllo wörld 日本語".as_bytes()));
        assert!(is_valid_utf8("\u{1F600}".as_bytes())); // emoji, 4-byte
    }

    #[test]
    fn rejects_truncated_sequence() {
        let full = "日".as_bytes().to_vec();
        assert!(is_valid_utf8(&full));
        assert!(!is_valid_utf8(&full[..full.len() - 1]));
    }

    #[test]
    fn rejects_overlong_encoding() {
        // Overlong encoding of U+002F ('/') as two bytes.
        assert!(!is_valid_utf8(&[0xC0, 0xAF]));
        assert!(!is_valid_utf8(&[0xC1, 0xBF]));
        // Overlong 3-byte and 4-byte encodings.
        assert!(!is_valid_utf8(&[0xE0, 0x80, 0x80]));
        assert!(!is_valid_utf8(&[0xF0, 0x80, 0x80, 0x80]));
    }

    #[test]
    fn rejects_surrogate_range() {
        // U+D800 encoded directly as three bytes, which is never legal UTF-8.
        assert!(!is_valid_utf8(&[0xED, 0xA0, 0x80]));
    }

    #[test]
    fn rejects_lone_continuation_and_invalid_lead_bytes() {
        // 0xFF and 0xFE are never valid anywhere in UTF-8; 0xFD/0xFC are
        // unassigned lead-byte patterns outside the 4-byte range.
        assert!(!is_valid_utf8(&[0xFF, 0xFE, 0xFD, 0xFC]));
    }

    #[test]
    fn rejects_out_of_unicode_range() {
        assert!(!is_valid_utf8(&[0xF5, 0x80, 0x80, 0x80]));
    }
}
