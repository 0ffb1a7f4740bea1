//! REDO/UNDO recovery over the logical key-value model.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use crate::wal::{LogRecord, LogRecordKind};
use crate::{Lsn, TxnId, INVALID_LSN};

/// The recovered state: one map from key to value.
pub type KvDatabase = HashMap<String, i32>;

/// A consistent cut of the log: the LSN it covers, the transactions still
/// running at that point (with their last LSNs), and the data image.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub checkpoint_lsn: Lsn,
    pub active_txns: HashMap<TxnId, Lsn>,
    pub persist_data: KvDatabase,
}

/// The empty checkpoint: no LSN covered, so recovery replays the whole log.
impl Default for Checkpoint {
    fn default() -> Self {
        Self::new(INVALID_LSN)
    }
}

impl Checkpoint {
    pub fn new(checkpoint_lsn: Lsn) -> Self {
        Self {
            checkpoint_lsn,
            active_txns: HashMap::new(),
            persist_data: KvDatabase::new(),
        }
    }

    pub fn add_active_txn(&mut self, txn_id: TxnId, last_lsn: Lsn) {
        self.active_txns.insert(txn_id, last_lsn);
    }

    pub fn add_data(&mut self, key: &str, value: i32) {
        self.persist_data.insert(key.to_string(), value);
    }
}

/// Replays the log against a checkpoint: REDO everything after the
/// checkpoint, then UNDO whatever never committed.
pub struct RecoveryManager {
    log_records: BTreeMap<Lsn, Arc<LogRecord>>,
    persist_lsn: Lsn,
    active_txns: HashMap<TxnId, Lsn>,
    data: KvDatabase,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self {
            log_records: BTreeMap::new(),
            persist_lsn: INVALID_LSN,
            active_txns: HashMap::new(),
            data: KvDatabase::new(),
        }
    }

    /// Installs the checkpoint: recovery starts from its data image, its
    /// active-transaction table, and the LSN it covers.
    pub fn init(&mut self, checkpoint: Checkpoint) {
        self.persist_lsn = checkpoint.checkpoint_lsn;
        self.active_txns = checkpoint.active_txns;
        self.data = checkpoint.persist_data;
    }

    pub fn append_log_record(&mut self, record: Arc<LogRecord>) {
        self.log_records.insert(record.lsn, record);
    }

    /// Replays every record past the checkpoint in LSN order. Each record
    /// first becomes its transaction's last LSN; commits retire the
    /// transaction, aborts roll it back on the spot.
    pub fn redo_phase(&mut self) {
        let tail: Vec<Arc<LogRecord>> = self
            .log_records
            .range((Bound::Excluded(self.persist_lsn), Bound::Unbounded))
            .map(|(_, record)| record.clone())
            .collect();
        for record in tail {
            self.active_txns.insert(record.txn_id, record.lsn);
            match &record.kind {
                LogRecordKind::Begin => {}
                LogRecordKind::Insert { key, value } => {
                    self.data.insert(key.clone(), *value);
                }
                LogRecordKind::Delete { key, .. } => {
                    self.data.remove(key);
                }
                LogRecordKind::Update {
                    old_key,
                    new_key,
                    new_value,
                    ..
                } => {
                    self.data.remove(old_key);
                    self.data.insert(new_key.clone(), *new_value);
                }
                LogRecordKind::Commit => {
                    self.active_txns.remove(&record.txn_id);
                }
                LogRecordKind::Abort => {
                    self.rollback_txn(record.txn_id);
                    self.active_txns.remove(&record.txn_id);
                }
            }
        }
    }

    /// Rolls back every transaction still active after REDO.
    pub fn undo_phase(&mut self) {
        let survivors: Vec<TxnId> = self.active_txns.keys().copied().collect();
        for txn_id in survivors {
            self.rollback_txn(txn_id);
        }
        self.active_txns.clear();
    }

    /// Walks the transaction's `prev_lsn` chain backwards, inverting each
    /// record. The chain may reach below the oldest record held here (it
    /// continues into the checkpointed past); the walk stops there.
    fn rollback_txn(&mut self, txn_id: TxnId) {
        let Some(&last_lsn) = self.active_txns.get(&txn_id) else {
            return;
        };
        let mut lsn = last_lsn;
        while lsn != INVALID_LSN {
            let Some(record) = self.log_records.get(&lsn).cloned() else {
                break;
            };
            match &record.kind {
                LogRecordKind::Insert { key, .. } => {
                    self.data.remove(key);
                }
                LogRecordKind::Delete { key, value } => {
                    self.data.insert(key.clone(), *value);
                }
                LogRecordKind::Update {
                    old_key,
                    old_value,
                    new_key,
                    ..
                } => {
                    self.data.remove(new_key);
                    self.data.insert(old_key.clone(), *old_value);
                }
                LogRecordKind::Begin | LogRecordKind::Commit | LogRecordKind::Abort => {}
            }
            lsn = record.prev_lsn;
        }
    }

    pub fn data(&self) -> &KvDatabase {
        &self.data
    }

    pub fn active_txns(&self) -> &HashMap<TxnId, Lsn> {
        &self.active_txns
    }
}
