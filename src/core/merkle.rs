// Merkle commitment over an ordered list of transaction encodings

use crate::core::{Hash256, sha256};

/// Reduce ordered leaves to a single root hash.
///
/// Leaves are hashed with `H(data)`, internal nodes with `H(left || right)`.
/// Whenever a level has an odd number of nodes the last one is duplicated,
/// at every level of the reduction. Returns `None` for an empty list.
pub fn merkle_root<T: AsRef<[u8]>>(leaves: &[T]) -> Option<Hash256> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<Hash256> = leaves.iter().map(|data| sha256(data.as_ref())).collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut combined = Vec::with_capacity(64);
                combined.extend_from_slice(pair[0].as_bytes());
                combined.extend_from_slice(pair[1].as_bytes());
                sha256(&combined)
            })
            .collect();
    }

    Some(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(left: &Hash256, right: &Hash256) -> Hash256 {
        let mut combined = left.as_bytes().to_vec();
        combined.extend_from_slice(right.as_bytes());
        sha256(&combined)
    }

    #[test]
    fn test_empty_has_no_root() {
        let leaves: Vec<Vec<u8>> = Vec::new();
        assert!(merkle_root(&leaves).is_none());
    }

    #[test]
    fn test_single_leaf_is_its_hash() {
        let root = merkle_root(&[b"only".to_vec()]).unwrap();
        assert_eq!(root, sha256(b"only"));
    }

    #[test]
    fn test_three_leaves_duplicate_last() {
        let leaves = [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let (a, b, c) = (sha256(b"a"), sha256(b"b"), sha256(b"c"));
        let expected = node(&node(&a, &b), &node(&c, &c));
        assert_eq!(merkle_root(&leaves).unwrap(), expected);
    }

    #[test]
    fn test_parity_rechecked_at_every_level() {
        // 6 leaves -> 3 nodes (odd) -> padded to 4 -> 2 -> 1
        let leaves: Vec<Vec<u8>> = (0u8..6).map(|i| vec![i]).collect();
        let h: Vec<Hash256> = leaves.iter().map(|l| sha256(l)).collect();
        let l1 = [node(&h[0], &h[1]), node(&h[2], &h[3]), node(&h[4], &h[5])];
        let l2 = [node(&l1[0], &l1[1]), node(&l1[2], &l1[2])];
        assert_eq!(merkle_root(&leaves).unwrap(), node(&l2[0], &l2[1]));
    }

    #[test]
    fn test_deterministic_and_order_sensitive() {
        let leaves = vec![b"tx1".to_vec(), b"tx2".to_vec(), b"tx3".to_vec()];
        let root = merkle_root(&leaves).unwrap();
        assert_eq!(root, merkle_root(&leaves.clone()).unwrap());

        let swapped = vec![b"tx2".to_vec(), b"tx1".to_vec(), b"tx3".to_vec()];
        assert_ne!(root, merkle_root(&swapped).unwrap());

        let mut altered = leaves.clone();
        altered[2][0] ^= 0x01;
        assert_ne!(root, merkle_root(&altered).unwrap());
    }
}
