//! # Alarm code layout.
//!
//! Alarm codes are global bit positions across the ordered block list:
//!
//! ```text
//! blocks: [ 7: 2 bytes ][ 12: 4 bytes ][ 3: 1 byte ]
//! codes:    0 ..= 15      16 ..= 47      48 ..= 55
//!
//! code(block 12, bit 5) = 2*8 + 5 = 21
//! ```
//!
//! Bytes expand to bits LSB-first: bit 0 of byte 0 is its least-significant bit.

use crate::error::AlarmError;

use super::config::AlarmBlockConfig;

/// Alarm code of `bit` in `block`.
pub fn alarm_code(blocks: &[AlarmBlockConfig], block: u32, bit: usize) -> Result<u32, AlarmError> {
    let mut offset = 0usize;
    for cfg in blocks {
        if cfg.block == block {
            let width = cfg.bit_width();
            if bit >= width {
                return Err(AlarmError::BitOutOfRange { block, bit, width });
            }
            return Ok((offset + bit) as u32);
        }
        offset += cfg.bit_width();
    }
    Err(AlarmError::BlockNotFound { block })
}

/// Inverse of [`alarm_code`]: the `(block, bit)` pair a code refers to.
pub fn locate(blocks: &[AlarmBlockConfig], code: u32) -> Result<(u32, usize), AlarmError> {
    let mut rest = code as usize;
    for cfg in blocks {
        let width = cfg.bit_width();
        if rest < width {
            return Ok((cfg.block, rest));
        }
        rest -= width;
    }
    Err(AlarmError::CodeOutOfRange { code })
}

/// Expands bytes to bits, LSB-first per byte.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| byte & (1 << i) != 0))
        .collect()
}

/// Pads with `false` or truncates to `width`; returns whether the input was resized.
pub(crate) fn fit_width(bits: &mut Vec<bool>, width: usize) -> bool {
    if bits.len() == width {
        return false;
    }
    bits.resize(width, false);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn layout(sizes: &[(u32, usize)]) -> Vec<AlarmBlockConfig> {
        sizes
            .iter()
            .map(|&(block, size)| AlarmBlockConfig::new(block, size, Duration::from_secs(1)))
            .collect()
    }

    #[test]
    fn test_code_accumulates_preceding_blocks() {
        let blocks = layout(&[(7, 2), (12, 4), (3, 1)]);
        assert_eq!(alarm_code(&blocks, 7, 3), Ok(3));
        assert_eq!(alarm_code(&blocks, 12, 5), Ok(21));
        assert_eq!(alarm_code(&blocks, 3, 0), Ok(48));
    }

    #[test]
    fn test_code_errors() {
        let blocks = layout(&[(7, 2)]);
        assert_eq!(
            alarm_code(&blocks, 7, 16),
            Err(AlarmError::BitOutOfRange {
                block: 7,
                bit: 16,
                width: 16
            })
        );
        assert_eq!(
            alarm_code(&blocks, 8, 0),
            Err(AlarmError::BlockNotFound { block: 8 })
        );
        assert_eq!(locate(&blocks, 16), Err(AlarmError::CodeOutOfRange { code: 16 }));
    }

    #[test]
    fn test_bits_are_lsb_first() {
        let bits = bytes_to_bits(&[0b0000_1001, 0b1000_0000]);
        assert_eq!(bits.len(), 16);
        assert!(bits[0]);
        assert!(bits[3]);
        assert!(!bits[1]);
        assert!(bits[15]);
        assert_eq!(bits.iter().filter(|b| **b).count(), 3);
    }

    #[test]
    fn test_fit_width() {
        let mut bits = vec![true; 3];
        assert!(fit_width(&mut bits, 8));
        assert_eq!(bits, vec![true, true, true, false, false, false, false, false]);
        assert!(!fit_width(&mut bits, 8));
        assert!(fit_width(&mut bits, 2));
        assert_eq!(bits, vec![true, true]);
    }

    fn arb_layout() -> impl Strategy<Value = Vec<AlarmBlockConfig>> {
        proptest::collection::btree_map(0u32..500, 1usize..16, 1..8).prop_map(|m| {
            m.into_iter()
                .map(|(block, size)| AlarmBlockConfig::new(block, size, Duration::from_secs(1)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_code_is_pure(blocks in arb_layout(), pick in any::<prop::sample::Index>(), bit in 0usize..128) {
            let cfg = &blocks[pick.index(blocks.len())];
            let first = alarm_code(&blocks, cfg.block, bit);
            let second = alarm_code(&blocks.clone(), cfg.block, bit);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_code_roundtrip(blocks in arb_layout()) {
            for cfg in &blocks {
                for bit in 0..cfg.bit_width() {
                    let code = alarm_code(&blocks, cfg.block, bit).unwrap();
                    prop_assert_eq!(locate(&blocks, code).unwrap(), (cfg.block, bit));
                }
            }
        }

        #[test]
        fn prop_bytes_expand_to_eight_bits_each(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            let bits = bytes_to_bits(&bytes);
            prop_assert_eq!(bits.len(), bytes.len() * 8);
            let ones: u32 = bytes.iter().map(|b| b.count_ones()).sum();
            prop_assert_eq!(bits.iter().filter(|b| **b).count() as u32, ones);
        }
    }
}
