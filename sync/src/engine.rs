//! The sync engine actor.
//!
//! One tokio task owns every table, the sync record, the disk pool, and
//! the block-index prefix; all mutation flows through its message channel
//! in order. Network I/O runs in short-lived blocking tasks that post
//! their results back as messages and never touch the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};

use loom_store::{KvStore, Table};
use loom_types::{
    BlockEntry, Clock, DataPathHash, DataRoot, DataRootKey, PeerAddr, SizeTaggedTx, Timestamp,
    TxId, TxRoot, EXTRA_INTERVALS_BEFORE_COMPACTION, MAX_SHARED_SYNCED_INTERVALS_COUNT,
    MIN_CHUNK_TO_PATH_RATIO, TRACK_CONFIRMATIONS,
};

use crate::blacklist::BlacklistClient;
use crate::config::{DiskSpace, SyncConfig};
use crate::disk_pool::DiskPool;
use crate::error::{AddChunkError, EngineError};
use crate::interval_set::IntervalSet;
use crate::metrics::SyncMetrics;
use crate::migration::{LegacyChunkStore, MARKER_COMPLETE, STORE_DATA_IN_V2_INDEX};
use crate::peer::{FetchedChunk, PeerClient};
use crate::persistence::{self, PersistedState};
use crate::proof::{data_path_hash, validate_chunk_proof, validate_data_path};
use crate::reader::{SharedFlags, SyncReader};
use crate::record::{encode_record, RecordFormat};
use crate::scheduler::{self, FetchWindow};
use crate::tables::{
    decode, disk_pool_key, disk_pool_ts_prefix, encode, offset_key, parse_disk_pool_key,
    parse_offset_key, BlockOffsetRecord, ChunkData, ChunkRecord, DataRootPlacements,
    DiskPoolChunkRecord, TxRecord,
};

/// Upper bound on disk-pool entries visited per scan tick.
const MAX_DISK_POOL_STEPS_PER_SCAN: u64 = 10_000;

/// A user-submitted chunk of a pending or confirmed transaction.
#[derive(Clone, Debug)]
pub struct AddChunkRequest {
    pub data_root: DataRoot,
    pub data_path: Vec<u8>,
    pub chunk: Vec<u8>,
    /// Byte offset of the chunk's first byte within the transaction.
    pub offset_in_tx: u64,
    pub tx_size: u64,
    /// Bypass the global free-space check.
    pub write_past_disk_limit: bool,
}

enum Message {
    Join(Vec<BlockEntry>),
    AddTipBlock {
        blocks: Vec<(BlockEntry, Vec<SizeTaggedTx>)>,
        recent_index: Vec<BlockEntry>,
    },
    AddBlock {
        block: BlockEntry,
        txs: Vec<SizeTaggedTx>,
    },
    AddChunk {
        req: AddChunkRequest,
        resp: oneshot::Sender<Result<(), AddChunkError>>,
    },
    AddDataRootToDiskPool {
        data_root: DataRoot,
        tx_size: u64,
        tx_id: TxId,
    },
    MaybeDropDataRootFromDiskPool {
        data_root: DataRoot,
        tx_size: u64,
        tx_id: TxId,
    },
    GetSyncRecord {
        format: RecordFormat,
        resp: oneshot::Sender<Vec<u8>>,
    },
    RequestTxDataRemoval(TxId),
    // Internal scheduling.
    CheckSpaceSyncRandomInterval,
    SyncRandomInterval {
        excluded: Vec<PeerAddr>,
    },
    SyncChunk(FetchWindow),
    StoreFetchedChunk {
        window: FetchWindow,
        probe: u64,
        fetched: FetchedChunk,
        elapsed_ms: f64,
    },
    SyncFailed {
        peer: PeerAddr,
    },
    CompactIntervals,
    ScanDiskPool,
    RemoveExpiredDataRoots,
    UpdatePeerRecords(Vec<(PeerAddr, Vec<(u64, u64)>)>),
    MigrationStep,
}

/// Sync-loop phase, for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncState {
    IdleForSpace,
    Hunting,
    Fetching,
    IdleForPeer,
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Message>,
    kv: Arc<dyn KvStore>,
    flags: Arc<SharedFlags>,
    legacy: Option<Arc<dyn LegacyChunkStore>>,
}

impl EngineHandle {
    /// Initialize from a block index, newest entry first. May trigger a
    /// reorg relative to the current index.
    pub fn join(&self, block_index: Vec<BlockEntry>) {
        let _ = self.tx.send(Message::Join(block_index));
    }

    /// Append confirmed blocks at the tip; reorgs away anything the new
    /// index orphans. `blocks` are the missing blocks oldest first.
    pub fn add_tip_block(
        &self,
        blocks: Vec<(BlockEntry, Vec<SizeTaggedTx>)>,
        recent_index: Vec<BlockEntry>,
    ) {
        let _ = self.tx.send(Message::AddTipBlock {
            blocks,
            recent_index,
        });
    }

    /// Index a single block known to extend the tip (catch-up path).
    pub fn add_block(&self, block: BlockEntry, txs: Vec<SizeTaggedTx>) {
        let _ = self.tx.send(Message::AddBlock { block, txs });
    }

    /// Submit a chunk. Resolves within `deadline` or fails with `Timeout`
    /// (the write may still land later — read back before retrying).
    pub async fn add_chunk(
        &self,
        req: AddChunkRequest,
        deadline: Duration,
    ) -> Result<(), AddChunkError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Message::AddChunk { req, resp })
            .map_err(|_| AddChunkError::Store("engine stopped".into()))?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AddChunkError::Store("engine stopped".into())),
            Err(_) => Err(AddChunkError::Timeout),
        }
    }

    pub fn add_data_root_to_disk_pool(&self, data_root: DataRoot, tx_size: u64, tx_id: TxId) {
        let _ = self.tx.send(Message::AddDataRootToDiskPool {
            data_root,
            tx_size,
            tx_id,
        });
    }

    pub fn maybe_drop_data_root_from_disk_pool(
        &self,
        data_root: DataRoot,
        tx_size: u64,
        tx_id: TxId,
    ) {
        let _ = self.tx.send(Message::MaybeDropDataRootFromDiskPool {
            data_root,
            tx_size,
            tx_id,
        });
    }

    /// The shared portion of the sync record in the requested encoding.
    pub async fn get_sync_record(
        &self,
        format: RecordFormat,
        deadline: Duration,
    ) -> Option<Vec<u8>> {
        let (resp, rx) = oneshot::channel();
        self.tx.send(Message::GetSyncRecord { format, resp }).ok()?;
        tokio::time::timeout(deadline, rx).await.ok()?.ok()
    }

    /// Erase a transaction's chunk bytes and records (blacklist path).
    pub fn request_tx_data_removal(&self, tx_id: TxId) {
        let _ = self.tx.send(Message::RequestTxDataRemoval(tx_id));
    }

    /// A read-only handle; lookups go straight to the store.
    pub fn reader(&self) -> SyncReader {
        SyncReader::new(
            Arc::clone(&self.kv),
            Arc::clone(&self.flags),
            self.legacy.clone(),
        )
    }
}

/// The engine actor state. Constructed and driven by [`Engine::spawn`].
pub struct Engine {
    config: SyncConfig,
    kv: Arc<dyn KvStore>,
    peer_client: Arc<dyn PeerClient>,
    blacklist: Arc<dyn BlacklistClient>,
    clock: Arc<dyn Clock>,
    disk_space: Arc<dyn DiskSpace>,
    legacy: Option<Arc<dyn LegacyChunkStore>>,
    metrics: Arc<SyncMetrics>,
    flags: Arc<SharedFlags>,
    self_tx: mpsc::UnboundedSender<Message>,

    sync_record: IntervalSet,
    peer_records: HashMap<PeerAddr, IntervalSet>,
    disk_pool: DiskPool,
    compacted_size: u64,
    weave_size: u64,
    block_index: Vec<BlockEntry>,

    disk_pool_cursor: Vec<u8>,
    missing_cursor: Vec<u8>,
    missing_probe: Option<u64>,
    migration_cursor: Option<Vec<u8>>,

    state: SyncState,
    rng: StdRng,
}

/// External collaborators handed to [`Engine::spawn`].
pub struct EngineDeps {
    pub kv: Arc<dyn KvStore>,
    pub peer_client: Arc<dyn PeerClient>,
    pub blacklist: Arc<dyn BlacklistClient>,
    pub clock: Arc<dyn Clock>,
    pub disk_space: Arc<dyn DiskSpace>,
    pub legacy_store: Option<Arc<dyn LegacyChunkStore>>,
    pub metrics: Arc<SyncMetrics>,
}

impl Engine {
    /// Load persisted state, start the actor and its timers, and return
    /// the handle.
    pub fn spawn(config: SyncConfig, deps: EngineDeps) -> Result<EngineHandle, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (engine, handle) = Self::new(config, deps, tx)?;
        Self::spawn_timers(&engine);
        tokio::spawn(engine.run(rx));
        Ok(handle)
    }

    fn new(
        config: SyncConfig,
        deps: EngineDeps,
        self_tx: mpsc::UnboundedSender<Message>,
    ) -> Result<(Self, EngineHandle), EngineError> {
        let state = persistence::load(&config.data_dir)?;
        let flags = Arc::new(SharedFlags::default());

        let migration_cursor = match deps.kv.get(Table::MigrationsIndex, STORE_DATA_IN_V2_INDEX.as_bytes())? {
            Some(marker) if marker == MARKER_COMPLETE => {
                flags.set_migration_complete();
                None
            }
            Some(cursor) => Some(cursor),
            None => Some(Vec::new()),
        };

        let handle = EngineHandle {
            tx: self_tx.clone(),
            kv: Arc::clone(&deps.kv),
            flags: Arc::clone(&flags),
            legacy: deps.legacy_store.clone(),
        };

        let weave_size = state.block_index.first().map_or(0, |b| b.weave_size);
        let engine = Self {
            config,
            kv: deps.kv,
            peer_client: deps.peer_client,
            blacklist: deps.blacklist,
            clock: deps.clock,
            disk_space: deps.disk_space,
            legacy: deps.legacy_store,
            metrics: deps.metrics,
            flags,
            self_tx,
            sync_record: state.sync_record,
            peer_records: HashMap::new(),
            disk_pool: state.disk_pool,
            compacted_size: state.compacted_size,
            weave_size,
            block_index: state.block_index,
            disk_pool_cursor: Vec::new(),
            missing_cursor: Vec::new(),
            missing_probe: None,
            migration_cursor,
            state: SyncState::IdleForSpace,
            rng: StdRng::from_entropy(),
        };
        Ok((engine, handle))
    }

    fn spawn_timers(engine: &Engine) {
        let timers: [(u64, fn() -> Message); 3] = [
            (engine.config.disk_space_check_frequency_ms, || {
                Message::CheckSpaceSyncRandomInterval
            }),
            (engine.config.disk_pool_scan_frequency_ms, || {
                Message::ScanDiskPool
            }),
            (engine.config.remove_expired_data_roots_frequency_ms, || {
                Message::RemoveExpiredDataRoots
            }),
        ];
        for (period_ms, make) in timers {
            let tx = engine.self_tx.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(period_ms.max(1)));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if tx.send(make()).is_err() {
                        break;
                    }
                }
            });
        }

        // Peer sync-record refresh: the sampling and HTTP round-trips run
        // off the engine task, results come back as one message.
        let tx = engine.self_tx.clone();
        let client = Arc::clone(&engine.peer_client);
        let period = Duration::from_millis(engine.config.peer_sync_records_frequency_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let client = Arc::clone(&client);
                let fetched = tokio::task::spawn_blocking(move || {
                    let mut rng = StdRng::from_entropy();
                    let sample = scheduler::sample_peers(client.peers(), &mut rng);
                    let mut records = Vec::with_capacity(sample.len());
                    for peer in sample {
                        match client.fetch_sync_record(&peer) {
                            Ok(pairs) => records.push((peer, pairs)),
                            Err(e) => {
                                tracing::debug!(peer = %peer, error = %e, "sync record fetch failed")
                            }
                        }
                    }
                    records
                })
                .await
                .unwrap_or_default();
                if tx.send(Message::UpdatePeerRecords(fetched)).is_err() {
                    break;
                }
            }
        });

        // Kick the migration once; it re-schedules itself.
        let _ = engine.self_tx.send(Message::MigrationStep);
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            if let Err(e) = self.handle(message) {
                match e {
                    EngineError::NoCommonAncestor => {
                        tracing::error!(
                            "no common ancestor with the new block index; refusing to proceed"
                        );
                        break;
                    }
                    e => tracing::warn!(error = %e, "engine handler failed; will retry on timer"),
                }
            }
        }
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "failed to persist sync state on shutdown");
        }
    }

    fn handle(&mut self, message: Message) -> Result<(), EngineError> {
        match message {
            Message::Join(bi) => self.handle_join(bi),
            Message::AddTipBlock {
                blocks,
                recent_index,
            } => self.handle_add_tip_block(blocks, recent_index),
            Message::AddBlock { block, txs } => self.handle_add_block(block, txs),
            Message::AddChunk { req, resp } => {
                let _ = resp.send(self.handle_add_chunk(req));
                Ok(())
            }
            Message::AddDataRootToDiskPool {
                data_root,
                tx_size,
                tx_id,
            } => {
                let key = DataRootKey::new(data_root, tx_size);
                self.disk_pool.add_root(key, tx_id, self.clock.now());
                Ok(())
            }
            Message::MaybeDropDataRootFromDiskPool {
                data_root,
                tx_size,
                tx_id,
            } => {
                let key = DataRootKey::new(data_root, tx_size);
                self.disk_pool.maybe_drop_root(&key, &tx_id);
                self.metrics.disk_pool_bytes.set(self.disk_pool.size as i64);
                Ok(())
            }
            Message::GetSyncRecord { format, resp } => {
                let _ = resp.send(encode_record(
                    &self.sync_record,
                    MAX_SHARED_SYNCED_INTERVALS_COUNT,
                    format,
                ));
                Ok(())
            }
            Message::RequestTxDataRemoval(tx_id) => self.handle_remove_tx_data(tx_id),
            Message::CheckSpaceSyncRandomInterval => self.handle_check_space(),
            Message::SyncRandomInterval { excluded } => self.handle_sync_random_interval(excluded),
            Message::SyncChunk(window) => self.handle_sync_chunk(window),
            Message::StoreFetchedChunk {
                window,
                probe,
                fetched,
                elapsed_ms,
            } => self.handle_store_fetched_chunk(window, probe, fetched, elapsed_ms),
            Message::SyncFailed { peer } => {
                self.metrics.fetch_failures_total.inc();
                self.handle_sync_random_interval(vec![peer])
            }
            Message::CompactIntervals => self.handle_compact_intervals(),
            Message::ScanDiskPool => self.handle_scan_disk_pool(),
            Message::RemoveExpiredDataRoots => self.handle_remove_expired(),
            Message::UpdatePeerRecords(records) => {
                self.peer_records = records
                    .into_iter()
                    .map(|(peer, pairs)| (peer, IntervalSet::from_pairs(pairs)))
                    .collect();
                Ok(())
            }
            Message::MigrationStep => self.handle_migration_step(),
        }
    }

    fn cast(&self, message: Message) {
        let _ = self.self_tx.send(message);
    }

    fn persist(&self) -> Result<(), EngineError> {
        persistence::save(
            &self.config.data_dir,
            &PersistedState {
                sync_record: self.sync_record.clone(),
                block_index: self.block_index.clone(),
                disk_pool: self.disk_pool.clone(),
                disk_pool_size: self.disk_pool.size,
                compacted_size: self.compacted_size,
            },
        )
    }

    fn update_record_metrics(&self) {
        self.metrics
            .sync_record_bytes
            .set(self.sync_record.sum() as i64);
        self.metrics
            .sync_record_intervals
            .set(self.sync_record.count() as i64);
        self.metrics.weave_size_bytes.set(self.weave_size as i64);
    }

    // ── Join / reorg ────────────────────────────────────────────────────

    fn handle_join(&mut self, bi: Vec<BlockEntry>) -> Result<(), EngineError> {
        let Some(head) = bi.first() else {
            tracing::warn!("ignoring join with an empty block index");
            return Ok(());
        };
        let new_weave = head.weave_size;

        if self.block_index.is_empty() {
            // Fresh start: replay the block sizes into the offset index.
            for pair in bi.windows(2) {
                let (block, prev) = (pair[0], pair[1]);
                self.put_block_offset_row(prev.weave_size, block.tx_root, block.weave_size)?;
            }
            if let Some(oldest) = bi.last() {
                if oldest.weave_size > 0 && bi.len() > 1 {
                    tracing::debug!(
                        hash = %oldest.hash,
                        "oldest joined block has no predecessor info; offset row skipped"
                    );
                }
            }
        } else {
            let (ancestor_idx, fork_base) = self
                .find_common_ancestor(&bi)
                .ok_or(EngineError::NoCommonAncestor)?;
            let orphaned = self.remove_orphaned_data(fork_base, self.weave_size)?;
            if fork_base < self.weave_size {
                self.metrics.reorgs_total.inc();
            }
            // Replay the forward-only blocks above the ancestor.
            for idx in (0..ancestor_idx).rev() {
                let block = bi[idx];
                let start = bi[idx + 1].weave_size;
                self.put_block_offset_row(start, block.tx_root, block.weave_size)?;
            }
            let now = self.clock.now();
            for key in orphaned {
                self.disk_pool.reset_timestamp(key, now);
            }
            self.sync_record.cut(fork_base);
        }

        self.weave_size = new_weave;
        self.block_index = bi;
        self.block_index.truncate(TRACK_CONFIRMATIONS);
        self.flags.set_joined();
        self.state = SyncState::Hunting;
        self.update_record_metrics();
        self.persist()?;
        tracing::info!(weave_size = new_weave, "joined the network");
        self.cast(Message::CheckSpaceSyncRandomInterval);
        Ok(())
    }

    /// The newest entry of `bi` that is also in our block index, with its
    /// weave offset.
    fn find_common_ancestor(&self, bi: &[BlockEntry]) -> Option<(usize, u64)> {
        bi.iter()
            .enumerate()
            .find(|(_, entry)| self.block_index.iter().any(|b| b.hash == entry.hash))
            .map(|(idx, entry)| (idx, entry.weave_size))
    }

    fn put_block_offset_row(
        &mut self,
        block_start: u64,
        tx_root: TxRoot,
        block_end: u64,
    ) -> Result<(), EngineError> {
        if block_end <= block_start {
            return Ok(());
        }
        let record = BlockOffsetRecord {
            tx_root,
            block_size: block_end - block_start,
            data_root_keys: Default::default(),
        };
        self.kv.put(
            Table::DataRootOffsetIndex,
            &offset_key(block_start),
            &encode(&record)?,
        )?;
        Ok(())
    }

    fn handle_add_tip_block(
        &mut self,
        blocks: Vec<(BlockEntry, Vec<SizeTaggedTx>)>,
        recent_index: Vec<BlockEntry>,
    ) -> Result<(), EngineError> {
        if !self.flags.is_joined() {
            tracing::warn!("add_tip_block before join; ignored");
            return Ok(());
        }
        let (_, fork_base) = self
            .find_common_ancestor(&recent_index)
            .ok_or(EngineError::NoCommonAncestor)?;

        if fork_base < self.weave_size {
            let orphaned = self.remove_orphaned_data(fork_base, self.weave_size)?;
            self.metrics.reorgs_total.inc();
            let now = self.clock.now();
            for key in orphaned {
                self.disk_pool.reset_timestamp(key, now);
            }
            self.sync_record.cut(fork_base);
            tracing::info!(fork_base, "reorg: orphaned data removed");
        }

        let mut block_start = fork_base;
        for (block, txs) in &blocks {
            self.add_block_data_roots(block_start, block.tx_root, txs)?;
            block_start = block.weave_size;
        }

        self.weave_size = recent_index.first().map_or(fork_base, |b| b.weave_size);
        self.block_index = recent_index;
        self.block_index.truncate(TRACK_CONFIRMATIONS);
        self.update_record_metrics();
        self.persist()?;
        Ok(())
    }

    fn handle_add_block(
        &mut self,
        block: BlockEntry,
        txs: Vec<SizeTaggedTx>,
    ) -> Result<(), EngineError> {
        if !self.flags.is_joined() {
            tracing::warn!("add_block before join; ignored");
            return Ok(());
        }
        let block_start = self.weave_size;
        self.add_block_data_roots(block_start, block.tx_root, &txs)?;

        let computed = block_start + txs.iter().map(|tx| tx.data_size).sum::<u64>();
        if computed != block.weave_size {
            tracing::warn!(
                expected = block.weave_size,
                computed,
                "block weave size does not match its transaction sizes"
            );
        }
        self.weave_size = block.weave_size;
        self.block_index.insert(0, block);
        self.block_index.truncate(TRACK_CONFIRMATIONS);
        self.update_record_metrics();
        self.persist()?;
        Ok(())
    }

    /// Index a block's size-tagged transactions: tx indices, data-root
    /// placements with freshly generated tx paths, and the block's offset
    /// row. Roots staged in the disk pool are marked confirmed.
    fn add_block_data_roots(
        &mut self,
        block_start: u64,
        tx_root: TxRoot,
        txs: &[SizeTaggedTx],
    ) -> Result<(), EngineError> {
        let mut leaves = Vec::new();
        let mut placements = Vec::new();
        let mut end_in_block = 0u64;
        for tx in txs {
            let start_in_block = end_in_block;
            end_in_block += tx.data_size;
            if tx.data_size > 0 {
                leaves.push((*tx.data_root.as_bytes(), end_in_block));
                placements.push((tx, start_in_block));
            }
            // Every transaction is locatable, data or not.
            let abs_start = block_start + start_in_block;
            let abs_end = block_start + end_in_block;
            self.kv.put(
                Table::TxOffsetIndex,
                &offset_key(abs_start),
                tx.tx_id.as_bytes(),
            )?;
            self.kv.put(
                Table::TxIndex,
                tx.tx_id.as_bytes(),
                &encode(&TxRecord {
                    abs_end,
                    tx_size: tx.data_size,
                })?,
            )?;
        }
        if leaves.is_empty() {
            return Ok(());
        }

        let (computed_root, tree) =
            loom_merkle::generate_tree(&leaves).expect("leaves are non-empty");
        if computed_root != *tx_root.as_bytes() {
            tracing::warn!(
                block_start,
                "announced tx root does not match the size-tagged tx list"
            );
        }

        let mut root_keys = std::collections::BTreeSet::new();
        for (tx, start_in_block) in placements {
            let tx_path = loom_merkle::generate_path(&tree, start_in_block)
                .expect("placement offsets are inside the tree");
            let key = DataRootKey::new(tx.data_root, tx.data_size);
            let key_bytes = key.to_bytes().to_vec();

            let mut record: DataRootPlacements = match self
                .kv
                .get(Table::DataRootIndex, &key_bytes)?
            {
                Some(bytes) => decode(&bytes)?,
                None => Default::default(),
            };
            record.insert(tx_root, block_start + start_in_block, tx_path);
            self.kv
                .put(Table::DataRootIndex, &key_bytes, &encode(&record)?)?;

            self.disk_pool.mark_confirmed(&key);
            root_keys.insert(key_bytes);
        }

        let record = BlockOffsetRecord {
            tx_root,
            block_size: end_in_block,
            data_root_keys: root_keys,
        };
        self.kv.put(
            Table::DataRootOffsetIndex,
            &offset_key(block_start),
            &encode(&record)?,
        )?;
        Ok(())
    }

    /// Undo all index state above `block_start_offset`. Returns the data
    /// root keys whose every placement was orphaned.
    fn remove_orphaned_data(
        &mut self,
        block_start_offset: u64,
        weave_size: u64,
    ) -> Result<Vec<DataRootKey>, EngineError> {
        let lo = offset_key(block_start_offset);
        let hi = offset_key(weave_size.saturating_add(1));

        // 1. Orphaned transactions.
        for (_, tx_id) in self.kv.get_range(Table::TxOffsetIndex, &lo, &hi)? {
            self.kv.delete(Table::TxIndex, &tx_id)?;
        }
        self.kv.delete_range(Table::TxOffsetIndex, &lo, &hi)?;

        // 2. Orphaned chunks.
        self.kv.delete_range(
            Table::ChunksIndex,
            &offset_key(block_start_offset.saturating_add(1)),
            &hi,
        )?;

        // 3. Orphaned data-root placements.
        let mut removed = Vec::new();
        for (_, value) in self.kv.get_range(Table::DataRootOffsetIndex, &lo, &hi)? {
            let block: BlockOffsetRecord = decode(&value)?;
            for key_bytes in &block.data_root_keys {
                let Some(bytes) = self.kv.get(Table::DataRootIndex, key_bytes)? else {
                    continue;
                };
                let mut placements: DataRootPlacements = decode(&bytes)?;
                if placements.remove_at_or_above(block_start_offset) {
                    self.kv.delete(Table::DataRootIndex, key_bytes)?;
                    if let Some(key) = DataRootKey::from_bytes(key_bytes) {
                        removed.push(key);
                    }
                } else {
                    self.kv
                        .put(Table::DataRootIndex, key_bytes, &encode(&placements)?)?;
                }
            }
        }

        // 4. Orphaned block rows.
        self.kv.delete_range(Table::DataRootOffsetIndex, &lo, &hi)?;

        Ok(removed)
    }

    // ── Chunk admission ─────────────────────────────────────────────────

    fn handle_add_chunk(&mut self, req: AddChunkRequest) -> Result<(), AddChunkError> {
        if !self.flags.is_joined() {
            return Err(AddChunkError::NotJoined);
        }
        if !req.write_past_disk_limit
            && self.disk_space.free_bytes() < self.config.disk_data_buffer_size
        {
            return Err(AddChunkError::DiskFull);
        }

        let key = DataRootKey::new(req.data_root, req.tx_size);
        let key_bytes = key.to_bytes();
        match self.kv.get(Table::DataRootIndex, &key_bytes)? {
            Some(bytes) => self.add_chunk_confirmed(req, key, decode(&bytes)?),
            None => self.add_chunk_pending(req, key),
        }
    }

    /// The data root has confirmed placements: validate once, index the
    /// chunk under every placement, write the body exactly once.
    fn add_chunk_confirmed(
        &mut self,
        req: AddChunkRequest,
        key: DataRootKey,
        placements: DataRootPlacements,
    ) -> Result<(), AddChunkError> {
        let bounds =
            validate_data_path(&req.data_root, req.offset_in_tx, req.tx_size, &req.chunk, &req.data_path)
                .ok_or(AddChunkError::InvalidProof)?;
        let hash = data_path_hash(&req.data_path);

        for (tx_root, abs_tx_start, tx_path) in placements.iter() {
            let record = ChunkRecord {
                data_path_hash: hash,
                tx_root,
                data_root: req.data_root,
                tx_path: tx_path.clone(),
                chunk_offset_in_tx: bounds.start,
                chunk_size: bounds.end - bounds.start,
            };
            self.store_chunk(
                abs_tx_start + bounds.end,
                &record,
                Some((&req.chunk, &req.data_path)),
                &key,
            )?;
        }
        Ok(())
    }

    /// The data root is only known to the disk pool: stage the chunk under
    /// the root's timestamp.
    fn add_chunk_pending(
        &mut self,
        req: AddChunkRequest,
        key: DataRootKey,
    ) -> Result<(), AddChunkError> {
        let Some(entry) = self.disk_pool.get(&key) else {
            return Err(AddChunkError::DataRootNotFound);
        };
        let timestamp = entry.timestamp;
        let chunk_len = req.chunk.len() as u64;
        if entry.size + chunk_len > self.config.max_disk_pool_data_root_bytes()
            || self.disk_pool.size + chunk_len > self.config.max_disk_pool_bytes()
        {
            return Err(AddChunkError::ExceedsDiskPoolSizeLimit);
        }

        let bounds =
            validate_data_path(&req.data_root, req.offset_in_tx, req.tx_size, &req.chunk, &req.data_path)
                .ok_or(AddChunkError::InvalidProof)?;
        let hash = data_path_hash(&req.data_path);

        let pool_key = disk_pool_key(timestamp, &hash);
        if self.kv.get(Table::DiskPoolChunksIndex, &pool_key)?.is_some() {
            return Ok(());
        }

        if self.kv.get(Table::ChunkDataIndex, hash.as_bytes())?.is_none() {
            self.kv.put(
                Table::ChunkDataIndex,
                hash.as_bytes(),
                &encode(&ChunkData {
                    chunk: req.chunk,
                    data_path: req.data_path,
                })?,
            )?;
        }
        self.kv.put(
            Table::DiskPoolChunksIndex,
            &pool_key,
            &encode(&DiskPoolChunkRecord {
                chunk_offset_in_tx: bounds.start,
                chunk_size: bounds.end - bounds.start,
                data_root: req.data_root,
                tx_size: req.tx_size,
            })?,
        )?;
        self.disk_pool.account_chunk(&key, chunk_len);
        self.metrics.disk_pool_bytes.set(self.disk_pool.size as i64);
        Ok(())
    }

    /// The store-chunk primitive: one placement of a chunk at an absolute
    /// offset. `bytes` carries `(chunk, data_path)` unless this is an
    /// index-only placement. Returns whether anything was written.
    fn store_chunk(
        &mut self,
        abs_end: u64,
        record: &ChunkRecord,
        bytes: Option<(&[u8], &[u8])>,
        data_root_key: &DataRootKey,
    ) -> Result<bool, AddChunkError> {
        let end_key = offset_key(abs_end);
        if self.sync_record.is_inside(abs_end)
            && self.kv.get(Table::ChunksIndex, &end_key)?.is_some()
        {
            return Ok(false);
        }
        if self.blacklist.is_byte_blacklisted(abs_end) {
            tracing::debug!(offset = abs_end, "skipping blacklisted chunk placement");
            return Ok(false);
        }

        if let Some((chunk, data_path)) = bytes {
            let hash = record.data_path_hash;
            if self.kv.get(Table::ChunkDataIndex, hash.as_bytes())?.is_none() {
                self.kv.put(
                    Table::ChunkDataIndex,
                    hash.as_bytes(),
                    &encode(&ChunkData {
                        chunk: chunk.to_vec(),
                        data_path: data_path.to_vec(),
                    })?,
                )?;
            }
        }

        self.kv
            .put(Table::ChunksIndex, &end_key, &encode(record)?)?;

        if let Some(entry) = self.disk_pool.get(data_root_key) {
            let pool_key = disk_pool_key(entry.timestamp, &record.data_path_hash);
            self.kv.put(
                Table::DiskPoolChunksIndex,
                &pool_key,
                &encode(&DiskPoolChunkRecord {
                    chunk_offset_in_tx: record.chunk_offset_in_tx,
                    chunk_size: record.chunk_size,
                    data_root: record.data_root,
                    tx_size: data_root_key.tx_size,
                })?,
            )?;
        }

        let start = abs_end - record.chunk_size;
        // A write into a region the record already claimed repairs a false
        // positive left behind by compaction.
        if self
            .sync_record
            .find(abs_end)
            .is_some_and(|(s, _)| s <= start)
        {
            self.compacted_size = self.compacted_size.saturating_sub(record.chunk_size);
        }
        self.sync_record.add(start, abs_end);
        if self.sync_record.count()
            > MAX_SHARED_SYNCED_INTERVALS_COUNT + EXTRA_INTERVALS_BEFORE_COMPACTION
        {
            self.cast(Message::CompactIntervals);
        }

        self.metrics.chunks_stored_total.inc();
        self.update_record_metrics();
        Ok(true)
    }

    // ── Sync scheduler ──────────────────────────────────────────────────

    fn handle_check_space(&mut self) -> Result<(), EngineError> {
        if !self.flags.is_joined() {
            return Ok(());
        }
        if self.disk_space.free_bytes() <= self.config.disk_data_buffer_size {
            if self.state != SyncState::IdleForSpace {
                tracing::warn!("free disk space below the buffer; sync paused");
            }
            self.state = SyncState::IdleForSpace;
            return Ok(());
        }
        self.handle_sync_random_interval(Vec::new())
    }

    fn handle_sync_random_interval(&mut self, excluded: Vec<PeerAddr>) -> Result<(), EngineError> {
        if !self.flags.is_joined() {
            return Ok(());
        }
        self.state = SyncState::Hunting;
        if let Some(window) = scheduler::pick_interval(
            &self.peer_records,
            &self.sync_record,
            self.weave_size,
            &excluded,
            &mut self.rng,
        ) {
            self.state = SyncState::Fetching;
            self.cast(Message::SyncChunk(window));
            return Ok(());
        }
        self.missing_chunk_step(&excluded)
    }

    /// One cyclic step over `missing_chunks_index`: either heal the
    /// interval from a chunk that already exists, or fetch its probe byte
    /// from a peer holding it.
    fn missing_chunk_step(&mut self, excluded: &[PeerAddr]) -> Result<(), EngineError> {
        let Some(entry) = self
            .kv
            .iter_from(Table::MissingChunksIndex, &self.missing_cursor)?
        else {
            self.state = SyncState::IdleForPeer;
            return Ok(());
        };
        self.missing_cursor = entry.next;
        let (end, start) = match (parse_offset_key(&entry.key), parse_offset_key(&entry.value)) {
            (Some(end), Some(start)) => (end, start),
            _ => return Ok(()),
        };

        let probe = match self.missing_probe {
            Some(byte) if start < byte && byte <= end => byte,
            _ => scheduler::missing_probe(start, end, &mut self.rng),
        };
        self.missing_probe = Some(probe);

        // A chunk covering the probe means the interval is a stale false
        // negative: split it around the chunk in one handler turn.
        if let Some((key, value)) = self.kv.get_next(Table::ChunksIndex, &offset_key(probe))? {
            let chunk_end = parse_offset_key(&key).unwrap_or(0);
            let record: ChunkRecord = decode(&value)?;
            let chunk_start = chunk_end - record.chunk_size;
            if chunk_start < probe {
                self.kv.delete(Table::MissingChunksIndex, &entry.key)?;
                if chunk_start > start {
                    self.kv.put(
                        Table::MissingChunksIndex,
                        &offset_key(chunk_start.min(end)),
                        &offset_key(start),
                    )?;
                }
                if chunk_end < end {
                    self.kv.put(
                        Table::MissingChunksIndex,
                        &offset_key(end),
                        &offset_key(chunk_end.max(start)),
                    )?;
                }
                self.missing_probe = None;
                self.cast(Message::SyncRandomInterval {
                    excluded: Vec::new(),
                });
                return Ok(());
            }
        }

        let mut peers: Vec<&PeerAddr> = self
            .peer_records
            .iter()
            .filter(|(peer, record)| !excluded.contains(*peer) && record.is_inside(probe))
            .map(|(peer, _)| peer)
            .collect();
        peers.sort();
        match peers.first() {
            Some(peer) => {
                self.state = SyncState::Fetching;
                self.cast(Message::SyncChunk(FetchWindow::single((*peer).clone(), probe)));
            }
            None => self.state = SyncState::IdleForPeer,
        }
        Ok(())
    }

    fn handle_sync_chunk(&mut self, mut window: FetchWindow) -> Result<(), EngineError> {
        let Some(probe) = window.next_probe() else {
            self.cast(Message::CheckSpaceSyncRandomInterval);
            return Ok(());
        };
        if self.blacklist.is_byte_blacklisted(probe) {
            window.skip_probe();
            self.cast(Message::SyncChunk(window));
            return Ok(());
        }

        let client = Arc::clone(&self.peer_client);
        let tx = self.self_tx.clone();
        tokio::task::spawn_blocking(move || {
            let started = std::time::Instant::now();
            let peer = window.peer.clone();
            match client.fetch_chunk(&peer, probe) {
                Ok(fetched) => {
                    let _ = tx.send(Message::StoreFetchedChunk {
                        window,
                        probe,
                        fetched,
                        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, offset = probe, error = %e, "chunk fetch failed");
                    let _ = tx.send(Message::SyncFailed { peer });
                }
            }
        });
        Ok(())
    }

    fn handle_store_fetched_chunk(
        &mut self,
        mut window: FetchWindow,
        probe: u64,
        fetched: FetchedChunk,
        elapsed_ms: f64,
    ) -> Result<(), EngineError> {
        let peer = window.peer.clone();
        // A peer serving pathologically deep proofs is not worth the bytes.
        let ratio = fetched.chunk.len() as u64 / (1 + fetched.data_path.len() as u64);
        if ratio < MIN_CHUNK_TO_PATH_RATIO {
            self.metrics.fetch_failures_total.inc();
            return self.handle_sync_random_interval(vec![peer]);
        }

        let stored = self.try_store_fetched(&mut window, probe, &fetched)?;
        if !stored {
            self.metrics.fetch_failures_total.inc();
            return self.handle_sync_random_interval(vec![peer]);
        }
        self.metrics.chunks_fetched_total.inc();
        self.metrics.fetch_time_ms.observe(elapsed_ms);
        self.cast(Message::SyncChunk(window));
        Ok(())
    }

    /// Validate a fetched chunk against the block covering the probe and
    /// index it. Returns false when the proof does not check out.
    fn try_store_fetched(
        &mut self,
        window: &mut FetchWindow,
        probe: u64,
        fetched: &FetchedChunk,
    ) -> Result<bool, EngineError> {
        if probe == 0 {
            return Ok(false);
        }
        let Some((key, value)) = self
            .kv
            .get_prev(Table::DataRootOffsetIndex, &offset_key(probe - 1))?
        else {
            return Ok(false);
        };
        let block_start = parse_offset_key(&key).unwrap_or(0);
        let block: BlockOffsetRecord = decode(&value)?;
        if probe > block_start + block.block_size {
            return Ok(false);
        }

        let offset_in_block = probe - block_start - 1;
        let Some(valid) = validate_chunk_proof(
            &block.tx_root,
            offset_in_block,
            block.block_size,
            &fetched.chunk,
            &fetched.tx_path,
            &fetched.data_path,
        ) else {
            return Ok(false);
        };

        let tx_size = valid.tx_end_in_block - valid.tx_start_in_block;
        let abs_tx_start = block_start + valid.tx_start_in_block;
        let data_root_key = DataRootKey::new(valid.data_root, tx_size);
        let key_bytes = data_root_key.to_bytes().to_vec();

        // Record the newly learned placement.
        let mut placements: DataRootPlacements =
            match self.kv.get(Table::DataRootIndex, &key_bytes)? {
                Some(bytes) => decode(&bytes)?,
                None => Default::default(),
            };
        placements.insert(block.tx_root, abs_tx_start, fetched.tx_path.clone());
        self.kv
            .put(Table::DataRootIndex, &key_bytes, &encode(&placements)?)?;
        if !block.data_root_keys.contains(&key_bytes) {
            let mut block = block.clone();
            block.data_root_keys.insert(key_bytes);
            self.kv.put(
                Table::DataRootOffsetIndex,
                &offset_key(block_start),
                &encode(&block)?,
            )?;
        }

        let record = ChunkRecord {
            data_path_hash: data_path_hash(&fetched.data_path),
            tx_root: block.tx_root,
            data_root: valid.data_root,
            tx_path: fetched.tx_path.clone(),
            chunk_offset_in_tx: valid.chunk_start_in_tx,
            chunk_size: valid.chunk_end_in_tx - valid.chunk_start_in_tx,
        };
        let abs_end = abs_tx_start + valid.chunk_end_in_tx;
        self.store_chunk(
            abs_end,
            &record,
            Some((&fetched.chunk, &fetched.data_path)),
            &data_root_key,
        )
        .map_err(|e| EngineError::Store(loom_store::StoreError::Backend(e.to_string())))?;

        window.advance(abs_tx_start + valid.chunk_start_in_tx, abs_end);
        Ok(true)
    }

    // ── Compaction ──────────────────────────────────────────────────────

    fn handle_compact_intervals(&mut self) -> Result<(), EngineError> {
        let swallowed = self
            .sync_record
            .compact(MAX_SHARED_SYNCED_INTERVALS_COUNT);
        for &(start, end) in &swallowed {
            self.kv.put(
                Table::MissingChunksIndex,
                &offset_key(end),
                &offset_key(start),
            )?;
            self.compacted_size += end - start;
        }
        // Aim the next scanner pass at the biggest hole.
        if let Some(&(start, _)) = swallowed.last() {
            self.missing_cursor = offset_key(start + 1).to_vec();
            self.missing_probe = None;
        }
        self.update_record_metrics();
        Ok(())
    }

    // ── Disk pool ───────────────────────────────────────────────────────

    fn handle_scan_disk_pool(&mut self) -> Result<(), EngineError> {
        let steps = self
            .kv
            .count(Table::DiskPoolChunksIndex)?
            .min(MAX_DISK_POOL_STEPS_PER_SCAN);
        for _ in 0..steps {
            if !self.disk_pool_step()? {
                break;
            }
        }
        Ok(())
    }

    /// One cyclic step over `disk_pool_chunks_index`. Returns false once
    /// the table is empty.
    fn disk_pool_step(&mut self) -> Result<bool, EngineError> {
        let Some(entry) = self
            .kv
            .iter_from(Table::DiskPoolChunksIndex, &self.disk_pool_cursor)?
        else {
            return Ok(false);
        };
        let Some((timestamp, hash)) = parse_disk_pool_key(&entry.key) else {
            self.disk_pool_cursor = entry.next;
            return Ok(true);
        };
        let record: DiskPoolChunkRecord = decode(&entry.value)?;
        let key = record.data_root_key();

        let confirmed = self
            .kv
            .get(Table::DataRootIndex, &key.to_bytes())?
            .map(|bytes| decode::<DataRootPlacements>(&bytes))
            .transpose()?;
        let in_pool = self.disk_pool.contains(&key);

        match (confirmed, in_pool) {
            (None, true) => {
                // Still pending: skip this root's sibling chunks.
                self.disk_pool_cursor =
                    disk_pool_ts_prefix(Timestamp::new(timestamp.as_micros() + 1)).to_vec();
            }
            (None, false) => {
                // Expired without confirmation: drop the staged data.
                self.kv.delete(Table::DiskPoolChunksIndex, &entry.key)?;
                self.kv.delete(Table::ChunkDataIndex, hash.as_bytes())?;
                self.metrics.disk_pool_chunks_expired_total.inc();
                self.disk_pool_cursor = entry.next;
            }
            (Some(placements), _) => {
                self.promote_chunk(&record, &hash, &placements, &key)?;
                if !in_pool {
                    self.kv.delete(Table::DiskPoolChunksIndex, &entry.key)?;
                }
                self.disk_pool_cursor = entry.next;
            }
        }
        Ok(true)
    }

    /// Index a staged chunk under every confirmed placement of its root.
    /// The bytes are already on disk under the hash.
    fn promote_chunk(
        &mut self,
        staged: &DiskPoolChunkRecord,
        hash: &DataPathHash,
        placements: &DataRootPlacements,
        key: &DataRootKey,
    ) -> Result<(), EngineError> {
        let end_in_tx = staged.chunk_offset_in_tx + staged.chunk_size;
        for (tx_root, abs_tx_start, tx_path) in placements.iter() {
            let record = ChunkRecord {
                data_path_hash: *hash,
                tx_root,
                data_root: staged.data_root,
                tx_path: tx_path.clone(),
                chunk_offset_in_tx: staged.chunk_offset_in_tx,
                chunk_size: staged.chunk_size,
            };
            self.store_chunk(abs_tx_start + end_in_tx, &record, None, key)
                .map_err(|e| EngineError::Store(loom_store::StoreError::Backend(e.to_string())))?;
        }
        Ok(())
    }

    fn handle_remove_expired(&mut self) -> Result<(), EngineError> {
        let expired = self.disk_pool.expire(
            self.config.data_root_expiration_micros(),
            self.clock.now(),
        );
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired unconfirmed data roots");
            self.persist()?;
        }
        self.metrics.disk_pool_bytes.set(self.disk_pool.size as i64);
        Ok(())
    }

    // ── Blacklisted erasure ─────────────────────────────────────────────

    fn handle_remove_tx_data(&mut self, tx_id: TxId) -> Result<(), EngineError> {
        let Some(bytes) = self.kv.get(Table::TxIndex, tx_id.as_bytes())? else {
            tracing::debug!(tx = %tx_id, "tx data removal for unknown tx; nothing to do");
            return Ok(());
        };
        let tx: TxRecord = decode(&bytes)?;
        let start = tx.abs_end - tx.tx_size;

        let mut cursor = start + 1;
        while let Some((key, value)) = self.kv.get_next(Table::ChunksIndex, &offset_key(cursor))? {
            let Some(end) = parse_offset_key(&key) else {
                break;
            };
            if end > tx.abs_end {
                break;
            }
            let record: ChunkRecord = decode(&value)?;
            self.kv.delete(Table::ChunksIndex, &key)?;
            self.kv
                .delete(Table::ChunkDataIndex, record.data_path_hash.as_bytes())?;
            self.sync_record.delete(end - record.chunk_size, end);
            cursor = end + 1;
        }

        self.blacklist.notify_about_removed_tx_data(&tx_id);
        self.update_record_metrics();
        self.persist()?;
        Ok(())
    }

    // ── Migration ───────────────────────────────────────────────────────

    fn handle_migration_step(&mut self) -> Result<(), EngineError> {
        let Some(cursor) = self.migration_cursor.clone() else {
            return Ok(());
        };
        match self.migration_step(&cursor) {
            Ok(Some(next)) => {
                self.migration_cursor = Some(next.clone());
                self.kv
                    .put(Table::MigrationsIndex, STORE_DATA_IN_V2_INDEX.as_bytes(), &next)?;
                self.cast(Message::MigrationStep);
            }
            Ok(None) => {
                self.kv.put(
                    Table::MigrationsIndex,
                    STORE_DATA_IN_V2_INDEX.as_bytes(),
                    MARKER_COMPLETE,
                )?;
                self.migration_cursor = None;
                self.flags.set_migration_complete();
                tracing::info!(migration = STORE_DATA_IN_V2_INDEX, "migration complete");
            }
            Err(e) => {
                tracing::warn!(error = %e, "migration step failed; retrying");
                let tx = self.self_tx.clone();
                let delay = Duration::from_millis(self.config.migration_retry_delay_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Message::MigrationStep);
                });
            }
        }
        Ok(())
    }

    /// Move one chunk's bytes from the legacy store into
    /// `chunk_data_index`. Returns the next cursor, or `None` when the
    /// cyclic walk has wrapped.
    fn migration_step(&mut self, cursor: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let Some(entry) = self.kv.iter_from(Table::ChunksIndex, cursor)? else {
            return Ok(None);
        };
        if !cursor.is_empty() && entry.key.as_slice() < cursor {
            // Wrapped around: every row has been visited.
            return Ok(None);
        }
        let record: ChunkRecord = decode(&entry.value)?;
        let hash = record.data_path_hash;

        if let Some(bytes) = self.kv.get(Table::ChunkDataIndex, hash.as_bytes())? {
            let mut data: ChunkData = decode(&bytes)?;
            if data.chunk.is_empty() {
                if let Some(legacy) = &self.legacy {
                    if let Some(chunk) = legacy
                        .read(&hash)
                        .map_err(|e| EngineError::Persistence(e.to_string()))?
                    {
                        data.chunk = chunk;
                        self.kv
                            .put(Table::ChunkDataIndex, hash.as_bytes(), &encode(&data)?)?;
                        legacy
                            .remove(&hash)
                            .map_err(|e| EngineError::Persistence(e.to_string()))?;
                    }
                }
            }
        }
        Ok(Some(entry.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::NoBlacklist;
    use crate::config::UnlimitedDiskSpace;
    use crate::peer::PeerError;
    use crate::proof::chunk_hash;
    use loom_nullables::{MemKv, NullClock};
    use loom_types::SystemClock;

    struct NoPeers;

    impl PeerClient for NoPeers {
        fn peers(&self) -> Vec<PeerAddr> {
            Vec::new()
        }

        fn fetch_sync_record(&self, _peer: &PeerAddr) -> Result<Vec<(u64, u64)>, PeerError> {
            Err(PeerError::NotFound)
        }

        fn fetch_chunk(&self, _peer: &PeerAddr, _offset: u64) -> Result<FetchedChunk, PeerError> {
            Err(PeerError::NotFound)
        }
    }

    fn test_engine(dir: &std::path::Path) -> Engine {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = SyncConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let deps = EngineDeps {
            kv: Arc::new(MemKv::new()),
            peer_client: Arc::new(NoPeers),
            blacklist: Arc::new(NoBlacklist),
            clock: Arc::new(NullClock::new(1_000_000)),
            disk_space: Arc::new(UnlimitedDiskSpace),
            legacy_store: None,
            metrics: Arc::new(SyncMetrics::new()),
        };
        let (engine, _handle) = Engine::new(config, deps, tx).unwrap();
        engine
    }

    fn entry(n: u8, weave: u64) -> BlockEntry {
        BlockEntry::new(
            loom_types::BlockHash::new([n; 32]),
            weave,
            TxRoot::new([n.wrapping_add(100); 32]),
        )
    }

    #[test]
    fn join_from_empty_replays_offset_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine
            .handle_join(vec![entry(2, 300), entry(1, 100), entry(0, 0)])
            .unwrap();
        assert!(engine.flags.is_joined());
        assert_eq!(engine.weave_size, 300);
        // Rows at block starts 0 and 100.
        assert_eq!(engine.kv.count(Table::DataRootOffsetIndex).unwrap(), 2);
    }

    #[test]
    fn join_without_ancestor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine
            .handle_join(vec![entry(1, 100), entry(0, 0)])
            .unwrap();
        let result = engine.handle_join(vec![entry(9, 100), entry(8, 0)]);
        assert!(matches!(result, Err(EngineError::NoCommonAncestor)));
    }

    #[test]
    fn clock_trait_objects_compose() {
        // Both clocks satisfy the engine's Clock seam.
        let _: Arc<dyn Clock> = Arc::new(SystemClock);
        let _: Arc<dyn Clock> = Arc::new(NullClock::new(0));
    }

    #[test]
    fn add_block_indexes_txs_and_roots() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.handle_join(vec![entry(0, 0)]).unwrap();

        let chunk = vec![7u8; 100];
        let leaves = vec![(chunk_hash(&chunk), 100u64)];
        let (data_root, _) = loom_merkle::generate_tree(&leaves).unwrap();
        let data_root = DataRoot::new(data_root);

        let tx_leaves = vec![(*data_root.as_bytes(), 100u64)];
        let (tx_root, _) = loom_merkle::generate_tree(&tx_leaves).unwrap();

        let tx = SizeTaggedTx::new(TxId::new([9u8; 32]), data_root, 100);
        let block = BlockEntry::new(
            loom_types::BlockHash::new([5u8; 32]),
            100,
            TxRoot::new(tx_root),
        );
        engine.handle_add_block(block, vec![tx]).unwrap();

        assert_eq!(engine.weave_size, 100);
        assert_eq!(engine.kv.count(Table::TxIndex).unwrap(), 1);
        assert_eq!(engine.kv.count(Table::DataRootIndex).unwrap(), 1);
        let key = DataRootKey::new(data_root, 100);
        let placements: DataRootPlacements = decode(
            &engine
                .kv
                .get(Table::DataRootIndex, &key.to_bytes())
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(placements.iter().count(), 1);
    }

    #[test]
    fn reorg_removes_everything_above_fork() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.handle_join(vec![entry(0, 0)]).unwrap();

        // Two blocks of 100 bytes each.
        for (i, weave) in [(1u8, 100u64), (2, 200)] {
            let chunk = vec![i; 100];
            let leaves = vec![(chunk_hash(&chunk), 100u64)];
            let (data_root, _) = loom_merkle::generate_tree(&leaves).unwrap();
            let data_root = DataRoot::new(data_root);
            let (tx_root, _) =
                loom_merkle::generate_tree(&[(data_root.0, 100u64)]).unwrap();
            let tx = SizeTaggedTx::new(TxId::new([i; 32]), data_root, 100);
            let block =
                BlockEntry::new(loom_types::BlockHash::new([i; 32]), weave, TxRoot::new(tx_root));
            engine.handle_add_block(block, vec![tx]).unwrap();
        }
        engine.sync_record.add(0, 200);

        let orphaned = engine.remove_orphaned_data(100, 200).unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(engine.kv.count(Table::TxIndex).unwrap(), 1);
        assert_eq!(engine.kv.count(Table::DataRootIndex).unwrap(), 1);
        // Only the first block's offset row survives.
        assert_eq!(engine.kv.count(Table::DataRootOffsetIndex).unwrap(), 1);
    }

    #[test]
    fn compaction_books_missing_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.handle_join(vec![entry(0, 0)]).unwrap();
        for i in 0..(MAX_SHARED_SYNCED_INTERVALS_COUNT as u64 + 5) {
            engine.sync_record.add(i * 10, i * 10 + 1);
        }
        engine.handle_compact_intervals().unwrap();
        assert!(engine.sync_record.count() <= MAX_SHARED_SYNCED_INTERVALS_COUNT);
        let missing = engine.kv.count(Table::MissingChunksIndex).unwrap();
        assert_eq!(missing, 5);
        assert_eq!(engine.compacted_size, 5 * 9);
    }
}
