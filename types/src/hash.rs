//! Content hash types for chunks, transactions, and blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! hash32 {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// Parse from a 32-byte slice. Returns `None` on length mismatch.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; 32] = bytes.try_into().ok()?;
                Some(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                for b in &self.0[..4] {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "..)")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    };
}

hash32! {
    /// Merkle root of a transaction's chunks.
    DataRoot
}

hash32! {
    /// Merkle root built from a block's transaction data roots in order.
    TxRoot
}

hash32! {
    /// A 32-byte transaction identifier.
    TxId
}

hash32! {
    /// SHA-256 of a chunk's data path — the content identity of a stored chunk.
    DataPathHash
}

hash32! {
    /// A 32-byte block hash.
    BlockHash
}

/// Identifies a pending data root: the root together with the size of the
/// transaction it commits to. Two uploads of the same payload with different
/// declared sizes are distinct roots.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataRootKey {
    pub data_root: DataRoot,
    pub tx_size: u64,
}

impl DataRootKey {
    pub fn new(data_root: DataRoot, tx_size: u64) -> Self {
        Self { data_root, tx_size }
    }

    /// Binary key form: `data_root ++ tx_size_be` (40 bytes).
    pub fn to_bytes(&self) -> [u8; 40] {
        let mut out = [0u8; 40];
        out[..32].copy_from_slice(self.data_root.as_bytes());
        out[32..].copy_from_slice(&self.tx_size.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 40 {
            return None;
        }
        let data_root = DataRoot::from_slice(&bytes[..32])?;
        let tx_size = u64::from_be_bytes(bytes[32..].try_into().ok()?);
        Some(Self { data_root, tx_size })
    }
}

impl fmt::Debug for DataRootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataRootKey({:?}, {})", self.data_root, self.tx_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_root_key_round_trips() {
        let key = DataRootKey::new(DataRoot::new([7u8; 32]), 524_416);
        let bytes = key.to_bytes();
        assert_eq!(DataRootKey::from_bytes(&bytes), Some(key));
    }

    #[test]
    fn data_root_key_sorts_by_root_then_size() {
        let a = DataRootKey::new(DataRoot::new([1u8; 32]), 100).to_bytes();
        let b = DataRootKey::new(DataRoot::new([1u8; 32]), 200).to_bytes();
        let c = DataRootKey::new(DataRoot::new([2u8; 32]), 1).to_bytes();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn from_slice_rejects_bad_length() {
        assert!(TxId::from_slice(&[0u8; 31]).is_none());
        assert!(TxId::from_slice(&[0u8; 33]).is_none());
        assert!(TxId::from_slice(&[0u8; 32]).is_some());
    }

    #[test]
    fn zero_hash() {
        assert!(DataRoot::ZERO.is_zero());
        assert!(!DataRoot::new([1u8; 32]).is_zero());
    }
}
