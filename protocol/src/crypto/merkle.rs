//! # Merkle Builder
//!
//! Binary Merkle tree over an ordered list of SHA-256 digests.
//!
//! ```text
//!            root
//!          /      \
//!       H(ab)      c        <- odd node carried forward unchanged
//!       /   \      |
//!      a     b     c
//! ```
//!
//! Rules:
//!
//! 1. An empty input is replaced by the single leaf `SHA256("")`.
//! 2. Each level pairs neighbours left to right and hashes `left || right`.
//! 3. A level with an odd count promotes its last node to the next level
//!    as is. It is *not* paired with a copy of itself.
//! 4. The last remaining node is the root.
//!
//! A block's key-Merkle-root is the root of the two-leaf tree
//! `[SHA256(header_bytes), body_root]`, which reduces to
//! `SHA256(SHA256(header_bytes) || body_root)`.

use super::hash::{sha256, sha256_multi, Digest};

/// Every level of a Merkle tree, leaves first, root level last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build the full tree over `leaves`.
    pub fn build(leaves: &[Digest]) -> Self {
        let bottom = if leaves.is_empty() {
            vec![sha256(&[])]
        } else {
            leaves.to_vec()
        };

        let mut levels = vec![bottom];
        while let Some(level) = levels.last() {
            if level.len() <= 1 {
                break;
            }
            let parent: Vec<Digest> = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(parent);
        }

        Self { levels }
    }

    /// The root digest.
    pub fn root(&self) -> Digest {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(|| sha256(&[]))
    }

    /// All levels, leaves first.
    pub fn levels(&self) -> &[Vec<Digest>] {
        &self.levels
    }

    /// Number of levels including leaves and root.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    sha256_multi(&[&left.as_bytes()[..], &right.as_bytes()[..]])
}

/// Merkle root of `leaves`.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    MerkleTree::build(leaves).root()
}

/// Key-Merkle-root of a block: the two-leaf root over the header hash and
/// the body root.
pub fn key_merkle_root(header_bytes: &[u8], body_root: &Digest) -> Digest {
    merkle_root(&[sha256(header_bytes), *body_root])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Digest {
        sha256(&[n])
    }

    #[test]
    fn empty_input_uses_empty_hash() {
        let tree = MerkleTree::build(&[]);
        assert_eq!(tree.root(), sha256(b""));
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        assert_eq!(merkle_root(&[leaf(1)]), leaf(1));
    }

    #[test]
    fn two_leaves_hash_their_concatenation() {
        let (a, b) = (leaf(1), leaf(2));
        assert_eq!(merkle_root(&[a, b]), hash_pair(&a, &b));
    }

    #[test]
    fn odd_node_is_carried_forward_not_duplicated() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let carried = hash_pair(&hash_pair(&a, &b), &c);
        let duplicated = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));

        let root = merkle_root(&[a, b, c]);
        assert_eq!(root, carried);
        assert_ne!(root, duplicated);
    }

    #[test]
    fn five_leaves_level_shape() {
        let leaves: Vec<Digest> = (0..5).map(leaf).collect();
        let tree = MerkleTree::build(&leaves);
        let widths: Vec<usize> = tree.levels().iter().map(Vec::len).collect();
        assert_eq!(widths, vec![5, 3, 2, 1]);
        // The fifth leaf rides up unchanged until the last pairing.
        assert_eq!(tree.levels()[1][2], leaves[4]);
        assert_eq!(tree.levels()[2][1], leaves[4]);
    }

    #[test]
    fn root_is_deterministic() {
        let leaves: Vec<Digest> = (0..9).map(leaf).collect();
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
    }

    #[test]
    fn root_depends_on_order() {
        let forward: Vec<Digest> = (0..4).map(leaf).collect();
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_ne!(merkle_root(&forward), merkle_root(&reversed));
    }

    #[test]
    fn root_detects_any_single_bit_flip() {
        let leaves: Vec<Digest> = (0..6).map(leaf).collect();
        let original = merkle_root(&leaves);

        for index in 0..leaves.len() {
            for bit in [0usize, 77, 255] {
                let mut tampered = leaves.clone();
                let mut bytes = *tampered[index].as_bytes();
                bytes[bit / 8] ^= 1 << (bit % 8);
                tampered[index] = Digest::new(bytes);
                assert_ne!(merkle_root(&tampered), original, "leaf {index} bit {bit}");
            }
        }
    }

    #[test]
    fn key_merkle_root_is_pair_of_header_hash_and_body() {
        let header = b"header bytes";
        let body = leaf(42);
        let expected = sha256_multi(&[&sha256(header).as_bytes()[..], &body.as_bytes()[..]]);
        assert_eq!(key_merkle_root(header, &body), expected);
    }
}
