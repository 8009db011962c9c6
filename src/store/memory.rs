use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::limits::MAX_TRANSACT_ITEMS;
use crate::observability;
use crate::wal::Wal;

use super::{AppliedOp, Key, Record, StoreError, TimeSlotStore, Versioned, WriteOp};

type Partition = BTreeMap<String, Versioned>;
type SharedPartition = Arc<RwLock<Partition>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL and batches appends: take the first append, drain whatever
/// else is already queued, then one fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                flush_batch(&mut wal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: Vec<(Record, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err = None;
    for (record, _) in &batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    let result = match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    };

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

async fn wal_request<T>(
    tx: &mpsc::Sender<WalCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
) -> Result<T, StoreError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(build(resp_tx))
        .await
        .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
    resp_rx
        .await
        .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))
}

fn apply(partition: &mut Partition, op: &AppliedOp) {
    match op {
        AppliedOp::Put { key, value } => {
            partition.insert(key.sort.clone(), value.clone());
        }
        AppliedOp::Delete { key } => {
            partition.remove(&key.sort);
        }
    }
}

/// Partitioned in-memory store, optionally made durable by a WAL.
///
/// Transactions write-lock every partition they touch, in sorted order, so
/// concurrent transactions never deadlock and never observe each other
/// half-applied.
pub struct MemoryStore {
    partitions: DashMap<String, SharedPartition>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Commits hold it shared; compaction holds it exclusively so the
    /// snapshot and the log never disagree.
    commit_gate: Arc<RwLock<()>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A volatile store: nothing survives a restart.
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            wal_tx: None,
            commit_gate: Arc::new(RwLock::new(())),
        }
    }

    /// Replay the WAL at `wal_path` and keep appending to it.
    /// Must be called from within a Tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(wal_path)?;
        if replay.discarded_len > 0 {
            warn!(
                "discarding {} trailing bytes of {}",
                replay.discarded_len,
                wal_path.display()
            );
        }

        let mut state: HashMap<String, Partition> = HashMap::new();
        for record in &replay.records {
            match record {
                Record::Commit(ops) => {
                    for op in ops {
                        let key = match op {
                            AppliedOp::Put { key, .. } | AppliedOp::Delete { key } => key,
                        };
                        apply(state.entry(key.partition.clone()).or_default(), op);
                    }
                }
                Record::Snapshot(items) => {
                    state.clear();
                    for (key, value) in items {
                        state
                            .entry(key.partition.clone())
                            .or_default()
                            .insert(key.sort.clone(), value.clone());
                    }
                }
            }
        }
        info!(
            "replayed {} WAL records into {} partitions",
            replay.records.len(),
            state.len()
        );

        let wal = Wal::open(wal_path, replay.valid_len)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let partitions = DashMap::new();
        for (name, partition) in state {
            partitions.insert(name, Arc::new(RwLock::new(partition)));
        }
        Ok(Self {
            partitions,
            wal_tx: Some(wal_tx),
            commit_gate: Arc::new(RwLock::new(())),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    fn partition(&self, name: &str) -> SharedPartition {
        if let Some(p) = self.partitions.get(name) {
            return p.value().clone();
        }
        self.partitions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Partition::new())))
            .value()
            .clone()
    }

    /// Rewrite the WAL as a single snapshot of the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;

        let mut names: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        let mut items = Vec::new();
        for name in names {
            let partition = self.partition(&name);
            let guard = partition.read().await;
            for (sort, value) in guard.iter() {
                items.push((Key::new(name.clone(), sort.clone()), value.clone()));
            }
        }
        let count = items.len();
        wal_request(tx, |response| WalCommand::Compact {
            snapshot: Record::Snapshot(items),
            response,
        })
        .await?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("compacted WAL to {count} items");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        match &self.wal_tx {
            Some(tx) => wal_request(tx, |response| WalCommand::AppendsSinceCompact { response })
                .await
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Validate then commit. With a `deadline`, only validation is bounded.
    async fn write(&self, ops: Vec<WriteOp>, deadline: Option<Instant>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        if ops.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::TooManyItems(ops.len()));
        }
        let started = std::time::Instant::now();

        let validate = async {
            let gate = self.commit_gate.clone().read_owned().await;
            self.prepare(&ops).await.map(|prepared| (gate, prepared))
        };
        let validated = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, validate)
                .await
                .unwrap_or(Err(StoreError::Timeout)),
            None => validate.await,
        }
        .and_then(|validated| match deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::Timeout),
            _ => Ok(validated),
        });
        let (gate, (mut guards, applied)) = match validated {
            Ok(validated) => validated,
            Err(e) => {
                let status = match e {
                    StoreError::Timeout => "timed_out",
                    _ => "rejected",
                };
                metrics::counter!(observability::STORE_TRANSACTIONS_TOTAL, "status" => status)
                    .increment(1);
                return Err(e);
            }
        };

        // Phase 2 runs detached and unbounded: once validated, a transaction
        // finishes even if the caller stops waiting for it.
        let wal_tx = self.wal_tx.clone();
        let commit = tokio::spawn(async move {
            let _gate = gate;
            if let Some(tx) = wal_tx {
                let record = Record::Commit(applied.clone());
                wal_request(&tx, |response| WalCommand::Append { record, response })
                    .await?
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
            for op in &applied {
                let key = match op {
                    AppliedOp::Put { key, .. } | AppliedOp::Delete { key } => key,
                };
                if let Some(guard) = guards.get_mut(&key.partition) {
                    apply(guard, op);
                }
            }
            Ok::<(), StoreError>(())
        });

        let result = commit
            .await
            .map_err(|e| StoreError::Unavailable(format!("commit task failed: {e}")))?;
        let status = if result.is_ok() { "committed" } else { "failed" };
        metrics::counter!(observability::STORE_TRANSACTIONS_TOTAL, "status" => status).increment(1);
        metrics::histogram!(observability::STORE_COMMIT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Phase 1: lock and validate. Returns the guards and the ops to apply.
    async fn prepare(
        &self,
        ops: &[WriteOp],
    ) -> Result<(HashMap<String, OwnedRwLockWriteGuard<Partition>>, Vec<AppliedOp>), StoreError> {
        let mut seen = HashSet::new();
        for op in ops {
            if !seen.insert(op.key()) {
                return Err(StoreError::DuplicateKey(op.key().clone()));
            }
        }

        let mut names: Vec<&str> = ops.iter().map(|op| op.key().partition.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let mut guards = HashMap::with_capacity(names.len());
        for name in names {
            let guard = self.partition(name).write_owned().await;
            guards.insert(name.to_string(), guard);
        }

        let mut applied = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            let key = op.key();
            let current = guards[&key.partition].get(&key.sort);
            if let Some(condition) = op.condition()
                && !condition.holds(current)
            {
                return Err(StoreError::ConditionFailed {
                    index,
                    key: key.clone(),
                });
            }
            match op {
                WriteOp::Put { key, item, .. } => applied.push(AppliedOp::Put {
                    key: key.clone(),
                    value: Versioned {
                        item: item.clone(),
                        version: current.map_or(1, |c| c.version + 1),
                    },
                }),
                WriteOp::Delete { key, .. } => {
                    if current.is_some() {
                        applied.push(AppliedOp::Delete { key: key.clone() });
                    }
                }
                WriteOp::Check { .. } => {}
            }
        }
        Ok((guards, applied))
    }
}

#[async_trait]
impl TimeSlotStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Versioned>, StoreError> {
        let Some(partition) = self.partitions.get(&key.partition).map(|p| p.value().clone()) else {
            return Ok(None);
        };
        let guard = partition.read().await;
        Ok(guard.get(&key.sort).cloned())
    }

    async fn query(&self, partition: &str) -> Result<Vec<(Key, Versioned)>, StoreError> {
        let Some(shared) = self.partitions.get(partition).map(|p| p.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = shared.read().await;
        Ok(guard
            .iter()
            .map(|(sort, value)| (Key::new(partition, sort.clone()), value.clone()))
            .collect())
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.write(ops, None).await
    }

    async fn transact_write_by(&self, ops: Vec<WriteOp>, deadline: Instant) -> Result<(), StoreError> {
        self.write(ops, Some(deadline)).await
    }
}

/// Path of the WAL for `resource` inside `data_dir`.
pub fn wal_path(data_dir: &Path, resource: &str) -> PathBuf {
    let safe: String = resource
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    data_dir.join(format!("{safe}.wal"))
}
