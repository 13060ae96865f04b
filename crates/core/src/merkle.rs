//! Merkle root computation over transaction hashes.

use crate::crypto::hash256;
use crate::uint256::UInt256;

/// Computes the merkle root of the given hashes.
///
/// Pairs are combined bottom-up with double SHA-256; an odd level duplicates
/// its last hash. The empty list yields the zero hash.
pub fn compute_merkle_root(hashes: &[UInt256]) -> UInt256 {
    match hashes.len() {
        0 => UInt256::zero(),
        1 => hashes[0],
        _ => {
            let mut level: Vec<UInt256> = hashes.to_vec();
            while level.len() > 1 {
                if level.len() % 2 == 1 {
                    level.push(*level.last().expect("level is non-empty"));
                }
                level = level
                    .chunks(2)
                    .map(|pair| {
                        let mut buf = [0u8; 64];
                        buf[..32].copy_from_slice(pair[0].as_bytes());
                        buf[32..].copy_from_slice(pair[1].as_bytes());
                        hash256(&buf)
                    })
                    .collect();
            }
            level[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> UInt256 {
        UInt256([byte; 32])
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(compute_merkle_root(&[]), UInt256::zero());
    }

    #[test]
    fn single_hash_is_identity() {
        assert_eq!(compute_merkle_root(&[h(1)]), h(1));
    }

    #[test]
    fn odd_count_duplicates_last() {
        // Three leaves must equal the root over [a, b, c, c].
        let odd = compute_merkle_root(&[h(1), h(2), h(3)]);
        let padded = compute_merkle_root(&[h(1), h(2), h(3), h(3)]);
        assert_eq!(odd, padded);
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            compute_merkle_root(&[h(1), h(2)]),
            compute_merkle_root(&[h(2), h(1)])
        );
    }
}
