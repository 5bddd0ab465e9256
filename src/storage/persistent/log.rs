//! Append-only log of computed values.
//!
//! Every `save` appends one framed record; the in-memory index is rebuilt by
//! replaying the log on open. Later records for a key win.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: framed ValueRecord]
//! [RECORD 2: framed ValueRecord]
//! ...
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::PersistentConfig;
use crate::key::ComputationKey;
use crate::storage::traits::{ComputedValueStore, StorageError};
use crate::value::ComputedValue;

use super::codec;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ValueRecord {
    fingerprint: String,
    key: ComputationKey,
    value: ComputedValue,
}

fn io_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("{context}: {err}"))
}

/// Durable [`ComputedValueStore`] backed by an append-only log file.
///
/// Intended for a single engine process; deployments sharing the store
/// across processes should put a database behind `ComputedValueStore`.
#[derive(Debug)]
pub struct LogComputedValueStore {
    path: PathBuf,
    index: RwLock<HashMap<ComputationKey, ComputedValue>>,
    writer: Mutex<BufWriter<File>>,
    sync_on_write: bool,
}

impl LogComputedValueStore {
    /// Opens or creates the log at `path` and replays it.
    ///
    /// Replay stops at the first unreadable record; the file is truncated
    /// there so later appends stay readable.
    pub fn open(path: impl AsRef<Path>, config: &PersistentConfig) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        // Only a missing or empty file starts a new log; anything else must carry a valid header.
        let exists = path.exists() && fs::metadata(&path)?.len() > 0;

        let index = if exists {
            let (index, valid_len) = Self::replay(&path)?;
            let file = OpenOptions::new().write(true).open(&path)?;
            if file.metadata()?.len() > valid_len {
                tracing::warn!(path = %path.display(), valid_len, "truncating unreadable log tail");
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            index
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            HashMap::new()
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        tracing::debug!(path = %path.display(), keys = index.len(), "opened computed-value log");
        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(BufWriter::new(file)),
            sync_on_write: config.sync_on_write,
        })
    }

    fn replay(path: &Path) -> IoResult<(HashMap<ComputationKey, ComputedValue>, u64)> {
        let mut reader = BufReader::new(File::open(path)?);
        codec::read_header(&mut reader)?;

        let mut index = HashMap::new();
        let mut valid_len = codec::HEADER_LEN;
        loop {
            match codec::read_frame::<ValueRecord>(&mut reader) {
                Ok(Some(record)) => {
                    valid_len = reader.stream_position()?;
                    if record.fingerprint != record.key.fingerprint() {
                        tracing::warn!(key = %record.key, "skipping log record with mismatched fingerprint");
                        continue;
                    }
                    index.insert(record.key, record.value);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %path.display(), offset = valid_len, error = %e, "log corruption detected, replay stopped");
                    break;
                }
            }
        }
        Ok((index, valid_len))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Rewrites the log with exactly one record per key.
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut writer = self.writer.lock().map_err(|_| StorageError::BackendError("poisoned lock: log.writer".to_string()))?;
        writer.flush().map_err(|e| io_err("flush before compaction", &e))?;

        let index = self
            .index
            .read()
            .map_err(|_| StorageError::BackendError("poisoned lock: log.index".to_string()))?;
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp).map_err(|e| io_err("create compaction file", &e))?);
            codec::write_header(&mut out).map_err(|e| io_err("write header", &e))?;
            for (key, value) in index.iter() {
                let frame = Self::frame(key, value)?;
                out.write_all(&frame).map_err(|e| io_err("write record", &e))?;
            }
            out.flush().map_err(|e| io_err("flush compaction file", &e))?;
            out.get_ref().sync_all().map_err(|e| io_err("sync compaction file", &e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| io_err("replace log", &e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err("reopen log", &e))?;
        *writer = BufWriter::new(file);
        tracing::info!(path = %self.path.display(), keys = index.len(), "compacted computed-value log");
        Ok(())
    }

    fn frame(key: &ComputationKey, value: &ComputedValue) -> Result<Vec<u8>, StorageError> {
        let record = ValueRecord {
            fingerprint: key.fingerprint(),
            key: *key,
            value: value.clone(),
        };
        codec::encode_frame(&record).map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

impl ComputedValueStore for LogComputedValueStore {
    fn find(&self, key: &ComputationKey) -> Result<Option<ComputedValue>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| StorageError::BackendError("poisoned lock: log.index".to_string()))?;
        Ok(index.get(key).cloned())
    }

    fn save(&self, key: &ComputationKey, value: &ComputedValue) -> Result<(), StorageError> {
        let frame = Self::frame(key, value)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StorageError::BackendError("poisoned lock: log.writer".to_string()))?;
        writer.write_all(&frame).map_err(|e| io_err("append record", &e))?;
        writer.flush().map_err(|e| io_err("flush record", &e))?;
        if self.sync_on_write {
            writer.get_ref().sync_all().map_err(|e| io_err("sync record", &e))?;
        }

        // Index updates happen under the writer lock so they follow log order.
        let mut index = self
            .index
            .write()
            .map_err(|_| StorageError::BackendError("poisoned lock: log.index".to_string()))?;
        index.insert(*key, value.clone());
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| StorageError::BackendError("poisoned lock: log.index".to_string()))?;
        Ok(index.len())
    }
}
