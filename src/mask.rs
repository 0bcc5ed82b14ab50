//! Frame payload masking (RFC 6455 §5.3).

/// XOR-unmasks `data` in place using the 4-byte `mask`, cycling the mask
/// over the whole buffer. Masking and unmasking are the same operation.
pub fn unmask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Generates a cryptographically-acceptable random 4-byte mask.
pub fn generate_mask() -> [u8; 4] {
    rand::random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmask_is_its_own_inverse() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut data = b"hello, world".to_vec();
        let original = data.clone();

        unmask(&mut data, mask);
        assert_ne!(data, original);
        unmask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn unmask_empty_is_noop() {
        let mut data: Vec<u8> = vec![];
        unmask(&mut data, [1, 2, 3, 4]);
        assert!(data.is_empty());
    }
}
