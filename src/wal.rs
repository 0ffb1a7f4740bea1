//! The logical write-ahead log.
//!
//! Records describe operations over the key-value abstraction used by
//! recovery. The [`LogManager`] owns the LSN counter and the per-transaction
//! previous-LSN chain; [`WalFile`] gives the log a stable on-disk form, each
//! record framed by a length and a CRC of its payload.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::{Lsn, Result, TxnId, INVALID_LSN};

/// What a log record did, over the logical `key -> value` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordKind {
    Begin,
    Commit,
    Abort,
    Insert {
        key: String,
        value: i32,
    },
    Delete {
        key: String,
        value: i32,
    },
    Update {
        old_key: String,
        old_value: i32,
        new_key: String,
        new_value: i32,
    },
}

/// One immutable log record. `prev_lsn` threads the records of a
/// transaction into a chain ending at `INVALID_LSN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub kind: LogRecordKind,
}

/// The record factory: hands out monotone LSNs and maintains each
/// transaction's previous-LSN so records chain correctly.
#[derive(Debug, Default)]
pub struct LogManager {
    next_lsn: Lsn,
    prev_lsn_by_txn: HashMap<TxnId, Lsn>,
}

impl LogManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    fn append(&mut self, txn_id: TxnId, kind: LogRecordKind) -> Arc<LogRecord> {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        let prev_lsn = self
            .prev_lsn_by_txn
            .insert(txn_id, lsn)
            .unwrap_or(INVALID_LSN);
        Arc::new(LogRecord {
            lsn,
            prev_lsn,
            txn_id,
            kind,
        })
    }

    pub fn begin(&mut self, txn_id: TxnId) -> Arc<LogRecord> {
        self.append(txn_id, LogRecordKind::Begin)
    }

    pub fn commit(&mut self, txn_id: TxnId) -> Arc<LogRecord> {
        self.append(txn_id, LogRecordKind::Commit)
    }

    pub fn abort(&mut self, txn_id: TxnId) -> Arc<LogRecord> {
        self.append(txn_id, LogRecordKind::Abort)
    }

    pub fn insert(&mut self, txn_id: TxnId, key: &str, value: i32) -> Arc<LogRecord> {
        self.append(
            txn_id,
            LogRecordKind::Insert {
                key: key.to_string(),
                value,
            },
        )
    }

    pub fn delete(&mut self, txn_id: TxnId, key: &str, value: i32) -> Arc<LogRecord> {
        self.append(
            txn_id,
            LogRecordKind::Delete {
                key: key.to_string(),
                value,
            },
        )
    }

    pub fn update(
        &mut self,
        txn_id: TxnId,
        old_key: &str,
        old_value: i32,
        new_key: &str,
        new_value: i32,
    ) -> Arc<LogRecord> {
        self.append(
            txn_id,
            LogRecordKind::Update {
                old_key: old_key.to_string(),
                old_value,
                new_key: new_key.to_string(),
                new_value,
            },
        )
    }
}

const FRAME_HEADER_SIZE: usize = 8;

/// Persistent form of the log: records appended as
/// `{payload_len: u32, crc: u32, payload}` frames.
pub struct WalFile {
    file: File,
}

impl WalFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let payload = bincode::serialize(record)
            .map_err(|e| EngineError::Corrupted(format!("log record encode failed: {e}")))?;
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&payload)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads every intact record. A CRC mismatch is corruption; a truncated
    /// trailing frame (a torn append) ends the log.
    pub fn read_all(&mut self) -> Result<Vec<Arc<LogRecord>>> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut at = 0;
        while at + FRAME_HEADER_SIZE <= bytes.len() {
            let payload_len =
                u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
            let crc = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
            let payload_start = at + FRAME_HEADER_SIZE;
            if payload_start + payload_len > bytes.len() {
                break;
            }
            let payload = &bytes[payload_start..payload_start + payload_len];
            let mut hasher = Hasher::new();
            hasher.update(payload);
            if hasher.finalize() != crc {
                return Err(EngineError::Corrupted(format!(
                    "log record at offset {at} fails its checksum"
                )));
            }
            let record: LogRecord = bincode::deserialize(payload)
                .map_err(|e| EngineError::Corrupted(format!("log record decode failed: {e}")))?;
            records.push(Arc::new(record));
            at = payload_start + payload_len;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lsns_are_monotone_and_chains_thread_per_txn() {
        let mut lm = LogManager::new();
        let b1 = lm.begin(1);
        let b2 = lm.begin(2);
        let i1 = lm.insert(1, "a", 1);
        let i2 = lm.insert(2, "b", 2);
        let c1 = lm.commit(1);

        assert_eq!(
            (b1.lsn, b2.lsn, i1.lsn, i2.lsn, c1.lsn),
            (0, 1, 2, 3, 4)
        );
        assert_eq!(b1.prev_lsn, INVALID_LSN);
        assert_eq!(i1.prev_lsn, b1.lsn);
        assert_eq!(c1.prev_lsn, i1.lsn);
        assert_eq!(i2.prev_lsn, b2.lsn);
    }

    #[test]
    fn fresh_manager_restarts_the_counter() {
        let mut lm = LogManager::new();
        lm.begin(1);
        assert_eq!(LogManager::new().next_lsn(), 0);
        assert_eq!(lm.next_lsn(), 1);
    }

    #[test]
    fn wal_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut lm = LogManager::new();
        let records = vec![
            lm.begin(7),
            lm.insert(7, "k", 42),
            lm.update(7, "k", 42, "k2", 43),
            lm.delete(7, "k2", 43),
            lm.commit(7),
        ];
        {
            let mut wal = WalFile::open(&path).unwrap();
            for record in &records {
                wal.append(record).unwrap();
            }
            wal.sync().unwrap();
        }
        let read = WalFile::open(&path).unwrap().read_all().unwrap();
        assert_eq!(read.len(), records.len());
        for (got, want) in read.iter().zip(&records) {
            assert_eq!(got.as_ref(), want.as_ref());
        }
    }

    #[test]
    fn corrupted_payload_fails_the_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut lm = LogManager::new();
        {
            let mut wal = WalFile::open(&path).unwrap();
            wal.append(&lm.insert(1, "key", 5)).unwrap();
        }
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::End(-1)).unwrap();
            file.write_all(&[0xff]).unwrap();
        }
        assert!(matches!(
            WalFile::open(&path).unwrap().read_all(),
            Err(EngineError::Corrupted(_))
        ));
    }

    #[test]
    fn torn_trailing_append_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut lm = LogManager::new();
        {
            let mut wal = WalFile::open(&path).unwrap();
            wal.append(&lm.insert(1, "key", 5)).unwrap();
            wal.append(&lm.commit(1)).unwrap();
        }
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();

        let records = WalFile::open(&path).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].kind, LogRecordKind::Insert { .. }));
    }
}
