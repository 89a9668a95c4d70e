//! Offset-annotated binary Merkle trees.
//!
//! Leaves carry a data hash and an end offset; internal nodes carry the
//! split offset between their subtrees. An authentication path encodes the
//! route from the root down to one leaf, so a verifier holding only the
//! root can both authenticate the leaf hash and learn the exact byte range
//! `[start, end)` the leaf covers.
//!
//! Node identifiers:
//! - leaf: `H(0x00 ++ data_hash ++ end_be)`
//! - internal: `H(0x01 ++ left_id ++ right_id ++ split_be)`
//!
//! Path wire format, root first:
//! - each internal step: `left_id(32) ++ right_id(32) ++ split_be(8)`
//! - terminal leaf entry: `data_hash(32) ++ end_be(8)`

use sha2::{Digest, Sha256};

/// One internal path step: two child ids plus the split offset.
const STEP_LEN: usize = 32 + 32 + 8;
/// The terminal leaf entry: data hash plus end offset.
const LEAF_LEN: usize = 32 + 8;

/// Result of a successful path validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathBounds {
    /// The authenticated leaf data hash.
    pub leaf_hash: [u8; 32],
    /// First byte covered by the leaf (inclusive).
    pub start: u64,
    /// End of the leaf's range (exclusive).
    pub end: u64,
}

#[derive(Clone, Debug)]
enum Node {
    Leaf {
        id: [u8; 32],
        data_hash: [u8; 32],
        end: u64,
    },
    Internal {
        id: [u8; 32],
        split: u64,
        max: u64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn id(&self) -> &[u8; 32] {
        match self {
            Node::Leaf { id, .. } => id,
            Node::Internal { id, .. } => id,
        }
    }

    fn max(&self) -> u64 {
        match self {
            Node::Leaf { end, .. } => *end,
            Node::Internal { max, .. } => *max,
        }
    }
}

/// A materialized Merkle tree, kept around so paths can be generated for
/// any leaf without re-hashing.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Node,
}

impl MerkleTree {
    /// The root identifier.
    pub fn root(&self) -> [u8; 32] {
        *self.root.id()
    }
}

fn leaf_id(data_hash: &[u8; 32], end: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0u8]);
    hasher.update(data_hash);
    hasher.update(end.to_be_bytes());
    hasher.finalize().into()
}

fn internal_id(left: &[u8; 32], right: &[u8; 32], split: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([1u8]);
    hasher.update(left);
    hasher.update(right);
    hasher.update(split.to_be_bytes());
    hasher.finalize().into()
}

/// Build a tree over `(data_hash, end_offset)` leaves. End offsets must be
/// strictly increasing. Returns `None` for an empty leaf list.
pub fn generate_tree(leaves: &[([u8; 32], u64)]) -> Option<([u8; 32], MerkleTree)> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<Node> = leaves
        .iter()
        .map(|(data_hash, end)| Node::Leaf {
            id: leaf_id(data_hash, *end),
            data_hash: *data_hash,
            end: *end,
        })
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => {
                    let split = left.max();
                    let id = internal_id(left.id(), right.id(), split);
                    let max = right.max();
                    next.push(Node::Internal {
                        id,
                        split,
                        max,
                        left: Box::new(left),
                        right: Box::new(right),
                    });
                }
                // Odd node is promoted unchanged.
                None => next.push(left),
            }
        }
        level = next;
    }

    let root = level.pop().expect("non-empty level");
    let root_id = *root.id();
    Some((root_id, MerkleTree { root }))
}

/// Generate the authentication path for the leaf covering byte `offset`.
///
/// Returns `None` when `offset` is at or past the tree's right bound.
pub fn generate_path(tree: &MerkleTree, offset: u64) -> Option<Vec<u8>> {
    if offset >= tree.root.max() {
        return None;
    }
    let mut path = Vec::new();
    let mut node = &tree.root;
    loop {
        match node {
            Node::Internal {
                split, left, right, ..
            } => {
                path.extend_from_slice(left.id());
                path.extend_from_slice(right.id());
                path.extend_from_slice(&split.to_be_bytes());
                node = if offset < *split { left } else { right };
            }
            Node::Leaf {
                data_hash, end, ..
            } => {
                path.extend_from_slice(data_hash);
                path.extend_from_slice(&end.to_be_bytes());
                return Some(path);
            }
        }
    }
}

/// Validate `path` against `root`, for the leaf covering byte `offset` of a
/// tree whose right bound is `right_bound`. Returns the authenticated leaf
/// hash and byte range, or `None` when anything fails to check out.
pub fn validate_path(
    root: &[u8; 32],
    offset: u64,
    right_bound: u64,
    path: &[u8],
) -> Option<PathBounds> {
    if right_bound == 0 || offset >= right_bound {
        return None;
    }

    let mut expected = *root;
    let mut lo = 0u64;
    let mut hi = right_bound;
    let mut rest = path;

    while rest.len() > LEAF_LEN {
        if rest.len() < STEP_LEN {
            return None;
        }
        let left: [u8; 32] = rest[..32].try_into().ok()?;
        let right: [u8; 32] = rest[32..64].try_into().ok()?;
        let split = u64::from_be_bytes(rest[64..72].try_into().ok()?);
        if internal_id(&left, &right, split) != expected {
            return None;
        }
        if split <= lo || split >= hi {
            return None;
        }
        if offset < split {
            expected = left;
            hi = split;
        } else {
            expected = right;
            lo = split;
        }
        rest = &rest[STEP_LEN..];
    }

    if rest.len() != LEAF_LEN {
        return None;
    }
    let data_hash: [u8; 32] = rest[..32].try_into().ok()?;
    let end = u64::from_be_bytes(rest[32..40].try_into().ok()?);
    if leaf_id(&data_hash, end) != expected {
        return None;
    }
    if end <= lo || end > hi || offset >= end {
        return None;
    }
    Some(PathBounds {
        leaf_hash: data_hash,
        start: lo,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// Three leaves with uneven sizes, ends at 100, 250, 256.
    fn sample_leaves() -> Vec<([u8; 32], u64)> {
        vec![(hash(b"a"), 100), (hash(b"b"), 250), (hash(b"c"), 256)]
    }

    #[test]
    fn empty_tree_is_none() {
        assert!(generate_tree(&[]).is_none());
    }

    #[test]
    fn single_leaf_round_trip() {
        let leaves = vec![(hash(b"only"), 42)];
        let (root, tree) = generate_tree(&leaves).unwrap();
        let path = generate_path(&tree, 0).unwrap();
        let bounds = validate_path(&root, 0, 42, &path).unwrap();
        assert_eq!(bounds.leaf_hash, hash(b"only"));
        assert_eq!((bounds.start, bounds.end), (0, 42));
    }

    #[test]
    fn every_leaf_validates_at_every_covered_offset() {
        let leaves = sample_leaves();
        let (root, tree) = generate_tree(&leaves).unwrap();
        let ranges = [(0u64, 100u64), (100, 250), (250, 256)];
        for (i, (start, end)) in ranges.iter().enumerate() {
            for offset in [*start, (*start + *end) / 2, *end - 1] {
                let path = generate_path(&tree, offset).unwrap();
                let bounds = validate_path(&root, offset, 256, &path).unwrap();
                assert_eq!(bounds.leaf_hash, leaves[i].0);
                assert_eq!((bounds.start, bounds.end), (*start, *end));
            }
        }
    }

    #[test]
    fn offset_past_right_bound_is_rejected() {
        let (root, tree) = generate_tree(&sample_leaves()).unwrap();
        assert!(generate_path(&tree, 256).is_none());
        let path = generate_path(&tree, 255).unwrap();
        assert!(validate_path(&root, 256, 256, &path).is_none());
    }

    #[test]
    fn tampered_path_is_rejected() {
        let (root, tree) = generate_tree(&sample_leaves()).unwrap();
        let mut path = generate_path(&tree, 120).unwrap();
        path[0] ^= 1;
        assert!(validate_path(&root, 120, 256, &path).is_none());
    }

    #[test]
    fn truncated_path_is_rejected() {
        let (root, tree) = generate_tree(&sample_leaves()).unwrap();
        let path = generate_path(&tree, 120).unwrap();
        assert!(validate_path(&root, 120, 256, &path[..path.len() - 1]).is_none());
    }

    #[test]
    fn path_for_wrong_offset_is_rejected() {
        let (root, tree) = generate_tree(&sample_leaves()).unwrap();
        // Path for the first leaf cannot prove an offset in the second.
        let path = generate_path(&tree, 10).unwrap();
        assert!(validate_path(&root, 200, 256, &path).is_none());
    }

    #[test]
    fn wrong_root_is_rejected() {
        let (_, tree) = generate_tree(&sample_leaves()).unwrap();
        let path = generate_path(&tree, 10).unwrap();
        assert!(validate_path(&[9u8; 32], 10, 256, &path).is_none());
    }

    #[test]
    fn large_even_tree() {
        let leaves: Vec<([u8; 32], u64)> = (1..=64u64)
            .map(|i| (hash(&i.to_be_bytes()), i * 1000))
            .collect();
        let (root, tree) = generate_tree(&leaves).unwrap();
        for i in 0..64u64 {
            let offset = i * 1000 + 17;
            let path = generate_path(&tree, offset).unwrap();
            let bounds = validate_path(&root, offset, 64_000, &path).unwrap();
            assert_eq!(bounds.start, i * 1000);
            assert_eq!(bounds.end, (i + 1) * 1000);
        }
    }
}
