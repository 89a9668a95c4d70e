//! Content blacklist interface and source parser.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use loom_types::TxId;

/// The node's tx-blacklist service, consulted before any chunk write and
/// notified after an erasure completes.
pub trait BlacklistClient: Send + Sync {
    /// Whether the weave byte at `offset` belongs to blacklisted content.
    fn is_byte_blacklisted(&self, offset: u64) -> bool;

    /// Erasure of `tx_id`'s chunk data finished.
    fn notify_about_removed_tx_data(&self, tx_id: &TxId);
}

/// A blacklist client that blacklists nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBlacklist;

impl BlacklistClient for NoBlacklist {
    fn is_byte_blacklisted(&self, _offset: u64) -> bool {
        false
    }

    fn notify_about_removed_tx_data(&self, _tx_id: &TxId) {}
}

/// Parse a blacklist source: line-separated base64url-encoded 32-byte
/// tx ids. CR, LF and CRLF line endings are accepted; invalid lines are
/// skipped with a warning. An empty source is valid.
pub fn parse_blacklist(source: &[u8]) -> Vec<TxId> {
    let mut ids = Vec::new();
    for (line_no, line) in source.split(|&b| b == b'\n' || b == b'\r').enumerate() {
        if line.is_empty() {
            continue;
        }
        let decoded = match std::str::from_utf8(line).ok().and_then(|s| {
            URL_SAFE_NO_PAD.decode(s.trim()).ok()
        }) {
            Some(bytes) => bytes,
            None => {
                tracing::warn!(line = line_no + 1, "skipping undecodable blacklist line");
                continue;
            }
        };
        match TxId::from_slice(&decoded) {
            Some(id) => ids.push(id),
            None => {
                tracing::warn!(
                    line = line_no + 1,
                    len = decoded.len(),
                    "skipping blacklist line with wrong id length"
                );
            }
        }
    }
    ids
}
