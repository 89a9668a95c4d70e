//! Shared fixtures for the engine integration tests: deterministic weave
//! builders backed by real Merkle trees, a scripted peer client, and a
//! controllable blacklist.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use loom_merkle::{generate_path, generate_tree};
use loom_nullables::{MemKv, NullClock};
use loom_sync::config::UnlimitedDiskSpace;
use loom_sync::engine::{Engine, EngineDeps, EngineHandle};
use loom_sync::peer::{FetchedChunk, PeerClient, PeerError};
use loom_sync::proof::chunk_hash;
use loom_sync::{BlacklistClient, SyncConfig, SyncMetrics};
use loom_types::{BlockEntry, BlockHash, DataRoot, PeerAddr, SizeTaggedTx, TxId, TxRoot};

// ── Weave fixtures ─────────────────────────────────────────────────────

pub struct ChunkSpec {
    pub bytes: Vec<u8>,
    /// Offset of the chunk's first byte within the transaction.
    pub start_in_tx: u64,
    pub end_in_tx: u64,
    pub data_path: Vec<u8>,
}

pub struct TxSpec {
    pub tx_id: TxId,
    pub data_root: DataRoot,
    pub tx_size: u64,
    pub data: Vec<u8>,
    pub chunks: Vec<ChunkSpec>,
}

/// Build a transaction whose payload is split into the given chunk sizes.
pub fn make_tx(seed: u8, chunk_sizes: &[u64]) -> TxSpec {
    let mut data = Vec::new();
    let mut leaves = Vec::new();
    let mut bounds = Vec::new();
    let mut end = 0u64;
    for (i, &size) in chunk_sizes.iter().enumerate() {
        let bytes: Vec<u8> = (0..size).map(|j| seed ^ (i as u8) ^ (j % 251) as u8).collect();
        let start = end;
        end += size;
        leaves.push((chunk_hash(&bytes), end));
        bounds.push((start, end, bytes.clone()));
        data.extend_from_slice(&bytes);
    }
    let (root, tree) = generate_tree(&leaves).expect("at least one chunk");

    let chunks = bounds
        .into_iter()
        .map(|(start, end, bytes)| ChunkSpec {
            data_path: generate_path(&tree, start).expect("chunk start inside tree"),
            bytes,
            start_in_tx: start,
            end_in_tx: end,
        })
        .collect();

    TxSpec {
        tx_id: TxId::new([seed; 32]),
        data_root: DataRoot::new(root),
        tx_size: end,
        data,
        chunks,
    }
}

pub struct BlockSpec {
    pub entry: BlockEntry,
    pub start: u64,
    pub txs: Vec<TxSpec>,
    pub size_tagged: Vec<SizeTaggedTx>,
    /// One tx path per transaction, aligned with `txs`.
    pub tx_paths: Vec<Vec<u8>>,
}

/// Build a block holding the given transactions, starting at weave offset
/// `start`. The entry's tx root is computed from the size-tagged list.
pub fn make_block(seed: u8, start: u64, txs: Vec<TxSpec>) -> BlockSpec {
    let mut leaves = Vec::new();
    let mut tx_starts = Vec::new();
    let mut end_in_block = 0u64;
    for tx in &txs {
        tx_starts.push(end_in_block);
        end_in_block += tx.tx_size;
        leaves.push((*tx.data_root.as_bytes(), end_in_block));
    }
    let (root, tree) = generate_tree(&leaves).expect("blocks in tests carry data");

    let tx_paths = tx_starts
        .iter()
        .map(|&s| generate_path(&tree, s).expect("tx start inside tree"))
        .collect();
    let size_tagged = txs
        .iter()
        .map(|tx| SizeTaggedTx::new(tx.tx_id, tx.data_root, tx.tx_size))
        .collect();

    BlockSpec {
        entry: BlockEntry::new(
            BlockHash::new([seed; 32]),
            start + end_in_block,
            TxRoot::new(root),
        ),
        start,
        txs,
        size_tagged,
        tx_paths,
    }
}

pub fn genesis() -> BlockEntry {
    BlockEntry::new(BlockHash::new([0u8; 32]), 0, TxRoot::ZERO)
}

// ── Scripted peers ─────────────────────────────────────────────────────

struct PeerData {
    record: Vec<(u64, u64)>,
    /// `(abs_start, abs_end, chunk)` sorted by start.
    chunks: Vec<(u64, u64, FetchedChunk)>,
}

/// A peer client whose peers serve pre-built weave content.
#[derive(Default)]
pub struct ScriptedPeers {
    inner: Mutex<HashMap<PeerAddr, PeerData>>,
}

impl ScriptedPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer advertising `record` and serving every chunk of the
    /// given blocks.
    pub fn add_peer(&self, addr: PeerAddr, record: Vec<(u64, u64)>, blocks: &[BlockSpec]) {
        let mut chunks = Vec::new();
        for block in blocks {
            let mut tx_start = block.start;
            for (tx, tx_path) in block.txs.iter().zip(&block.tx_paths) {
                for chunk in &tx.chunks {
                    chunks.push((
                        tx_start + chunk.start_in_tx,
                        tx_start + chunk.end_in_tx,
                        FetchedChunk {
                            chunk: chunk.bytes.clone(),
                            data_path: chunk.data_path.clone(),
                            tx_path: tx_path.clone(),
                        },
                    ));
                }
                tx_start += tx.tx_size;
            }
        }
        chunks.sort_by_key(|&(start, _, _)| start);
        self.inner
            .lock()
            .unwrap()
            .insert(addr, PeerData { record, chunks });
    }
}

impl PeerClient for ScriptedPeers {
    fn peers(&self) -> Vec<PeerAddr> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    fn fetch_sync_record(&self, peer: &PeerAddr) -> Result<Vec<(u64, u64)>, PeerError> {
        self.inner
            .lock()
            .unwrap()
            .get(peer)
            .map(|data| data.record.clone())
            .ok_or_else(|| PeerError::Unreachable(peer.to_string()))
    }

    fn fetch_chunk(&self, peer: &PeerAddr, offset: u64) -> Result<FetchedChunk, PeerError> {
        let inner = self.inner.lock().unwrap();
        let data = inner
            .get(peer)
            .ok_or_else(|| PeerError::Unreachable(peer.to_string()))?;
        data.chunks
            .iter()
            .find(|(start, end, _)| *start < offset && offset <= *end)
            .map(|(_, _, chunk)| chunk.clone())
            .ok_or(PeerError::NotFound)
    }
}

// ── Blacklist double ───────────────────────────────────────────────────

/// A blacklist whose byte ranges the test controls, recording removal
/// notifications.
#[derive(Default)]
pub struct TestBlacklist {
    ranges: Mutex<Vec<(u64, u64)>>,
    removed: Mutex<Vec<TxId>>,
}

impl TestBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blacklist the offsets `(start, end]`.
    pub fn add_range(&self, start: u64, end: u64) {
        self.ranges.lock().unwrap().push((start, end));
    }

    pub fn removed(&self) -> Vec<TxId> {
        self.removed.lock().unwrap().clone()
    }
}

impl BlacklistClient for TestBlacklist {
    fn is_byte_blacklisted(&self, offset: u64) -> bool {
        self.ranges
            .lock()
            .unwrap()
            .iter()
            .any(|&(start, end)| start < offset && offset <= end)
    }

    fn notify_about_removed_tx_data(&self, tx_id: &TxId) {
        self.removed.lock().unwrap().push(*tx_id);
    }
}

// ── Harness ────────────────────────────────────────────────────────────

pub struct Harness {
    pub handle: EngineHandle,
    pub kv: Arc<MemKv>,
    pub clock: Arc<NullClock>,
    pub blacklist: Arc<TestBlacklist>,
    pub metrics: Arc<SyncMetrics>,
    pub dir: tempfile::TempDir,
}

/// A config with tight timer periods so scenarios settle quickly.
pub fn fast_config(dir: &std::path::Path) -> SyncConfig {
    SyncConfig {
        data_dir: dir.to_path_buf(),
        disk_pool_data_root_expiration_secs: 1,
        disk_space_check_frequency_ms: 50,
        disk_pool_scan_frequency_ms: 50,
        remove_expired_data_roots_frequency_ms: 50,
        peer_sync_records_frequency_ms: 50,
        migration_retry_delay_ms: 50,
        log_level: "loom_sync=info".to_string(),
        ..Default::default()
    }
}

pub fn spawn_engine(peers: Arc<dyn PeerClient>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(dir.path());
    spawn_engine_with(config, peers, dir)
}

static INIT_LOGGING: Once = Once::new();

pub fn spawn_engine_with(
    config: SyncConfig,
    peers: Arc<dyn PeerClient>,
    dir: tempfile::TempDir,
) -> Harness {
    // The subscriber is process-global; first harness in the binary wins.
    INIT_LOGGING.call_once(|| config.init_logging());
    let kv = Arc::new(MemKv::new());
    let clock = Arc::new(NullClock::new(1_000_000_000));
    let blacklist = Arc::new(TestBlacklist::new());
    let metrics = Arc::new(SyncMetrics::new());
    let deps = EngineDeps {
        kv: Arc::clone(&kv) as Arc<dyn loom_store::KvStore>,
        peer_client: peers,
        blacklist: Arc::clone(&blacklist) as Arc<dyn BlacklistClient>,
        clock: Arc::clone(&clock) as Arc<dyn loom_types::Clock>,
        disk_space: Arc::new(UnlimitedDiskSpace),
        legacy_store: None,
        metrics: Arc::clone(&metrics),
    };
    let handle = Engine::spawn(config, deps).expect("engine spawns");
    Harness {
        handle,
        kv,
        clock,
        blacklist,
        metrics,
        dir,
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
