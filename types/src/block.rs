//! Block-index entries and size-tagged transaction lists.

use serde::{Deserialize, Serialize};

use crate::hash::{BlockHash, DataRoot, TxId, TxRoot};

/// One entry of the node's block index: the block hash, the weave size after
/// this block (the end offset of its last byte), and the root of the block's
/// transaction Merkle tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub hash: BlockHash,
    pub weave_size: u64,
    pub tx_root: TxRoot,
}

impl BlockEntry {
    pub fn new(hash: BlockHash, weave_size: u64, tx_root: TxRoot) -> Self {
        Self {
            hash,
            weave_size,
            tx_root,
        }
    }
}

/// A transaction as it appears in a block body: identifier, announced data
/// root, and payload size in bytes. Order within the block determines the
/// transaction's position in the weave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTaggedTx {
    pub tx_id: TxId,
    pub data_root: DataRoot,
    pub data_size: u64,
}

impl SizeTaggedTx {
    pub fn new(tx_id: TxId, data_root: DataRoot, data_size: u64) -> Self {
        Self {
            tx_id,
            data_root,
            data_size,
        }
    }
}
