//! Persistent file-backed KV store with WAL and checkpoint support.
//!
//! Uses an in-memory BTreeMap as read cache, a write-ahead log (WAL) for durability,
//! and checkpoint files for fast recovery. Each write, guarded or not, is one WAL
//! record, so a batch is either replayed whole or not at all.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kvstore::{apply_ops, first_failed_guard, scan, BatchOp, Guard, Key, KvPair, KvStore, Value};
use crate::types::StoreError;

const WAL_FILENAME: &str = "wal.bin";
const CHECKPOINT_FILENAME: &str = "checkpoint.bin";
const LOCK_FILENAME: &str = "store.lock";

#[derive(Debug, Serialize, Deserialize, Clone)]
enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl From<&BatchOp> for WalOp {
    fn from(op: &BatchOp) -> Self {
        match op {
            BatchOp::Put { key, value } => WalOp::Put {
                key: key.clone(),
                value: value.clone(),
            },
            BatchOp::Delete { key } => WalOp::Delete { key: key.clone() },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    seq: u64,
    ops: Vec<WalOp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    seq: u64,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

struct WalWriter {
    file: File,
    seq: u64,
}

impl WalWriter {
    fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(WalWriter { file, seq: 0 })
    }

    fn append(&mut self, ops: Vec<WalOp>) -> Result<(), StoreError> {
        self.seq += 1;
        let entry = WalEntry { seq: self.seq, ops };
        let encoded = bincode::serialize(&entry)
            .map_err(|e| StoreError::KvError(format!("failed to serialize WAL entry: {}", e)))?;
        let len_bytes = (encoded.len() as u32).to_le_bytes();
        self.file.write_all(&len_bytes)?;
        self.file.write_all(&encoded)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Persistent file-backed KV store.
///
/// On open, loads the last checkpoint and replays any remaining WAL entries.
/// The directory is held under an exclusive lock until the store is dropped,
/// so a second opener (in this process or another) fails with `Locked`.
/// Concurrent workers share one opened store instead.
pub struct PersistentKvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    wal: Mutex<WalWriter>,
    dir: PathBuf,
    _lock: File,
}

impl PersistentKvStore {
    /// Opens or creates a persistent KV store in the given directory.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(dir.join(LOCK_FILENAME))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir.to_path_buf()));
        }

        let wal_path = dir.join(WAL_FILENAME);
        let checkpoint_path = dir.join(CHECKPOINT_FILENAME);

        let mut data = BTreeMap::new();
        let checkpoint_seq = load_checkpoint(&checkpoint_path, &mut data)?;
        let (replayed, last_seq, valid_len) = replay_wal(&wal_path, &mut data, checkpoint_seq)?;
        if wal_path.exists() && fs::metadata(&wal_path)?.len() > valid_len {
            OpenOptions::new().write(true).open(&wal_path)?.set_len(valid_len)?;
        }
        debug!(
            dir = %dir.display(),
            keys = data.len(),
            replayed,
            "opened persistent kv store"
        );

        let mut wal = WalWriter::open(&wal_path)?;
        wal.seq = last_seq;

        Ok(Self {
            data: RwLock::new(data),
            wal: Mutex::new(wal),
            dir: dir.to_path_buf(),
            _lock: lock,
        })
    }

    /// Directory holding the WAL and checkpoint.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a checkpoint of the current state and truncates the WAL.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        let mut wal = self
            .wal
            .lock()
            .map_err(|e| StoreError::KvError(e.to_string()))?;

        let checkpoint = Checkpoint {
            seq: wal.seq,
            entries: data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let encoded = bincode::serialize(&checkpoint)
            .map_err(|e| StoreError::KvError(format!("failed to serialize checkpoint: {}", e)))?;

        let checkpoint_path = self.dir.join(CHECKPOINT_FILENAME);
        let mut tmp_path = checkpoint_path.clone();
        tmp_path.set_extension("tmp");
        {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(&encoded)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, &checkpoint_path)?;
        wal.truncate()?;

        debug!(seq = checkpoint.seq, keys = checkpoint.entries.len(), "checkpoint written");
        Ok(())
    }

    fn mutate(&self, guards: &[Guard], ops: Vec<BatchOp>) -> Result<Option<Key>, StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        if let Some(failed) = first_failed_guard(&data, guards) {
            return Ok(Some(failed));
        }
        if ops.is_empty() {
            return Ok(None);
        }
        {
            let mut wal = self
                .wal
                .lock()
                .map_err(|e| StoreError::KvError(e.to_string()))?;
            wal.append(ops.iter().map(WalOp::from).collect())?;
        }
        apply_ops(&mut data, ops);
        Ok(None)
    }
}

fn load_checkpoint(path: &Path, data: &mut BTreeMap<Key, Value>) -> Result<u64, StoreError> {
    if !path.exists() {
        return Ok(0);
    }

    let mut contents = Vec::new();
    File::open(path)?.read_to_end(&mut contents)?;
    if contents.is_empty() {
        return Ok(0);
    }

    let checkpoint: Checkpoint = bincode::deserialize(&contents)
        .map_err(|e| StoreError::KvError(format!("failed to deserialize checkpoint: {}", e)))?;
    data.extend(checkpoint.entries);
    Ok(checkpoint.seq)
}

fn replay_wal(
    path: &Path,
    data: &mut BTreeMap<Key, Value>,
    after_seq: u64,
) -> Result<(usize, u64, u64), StoreError> {
    if !path.exists() {
        return Ok((0, after_seq, 0));
    }

    let mut file = File::open(path)?;
    let mut replayed = 0;
    let mut max_seq = after_seq;
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut entry_buf = vec![0u8; len];
        match file.read_exact(&mut entry_buf) {
            Ok(()) => {}
            // torn tail from a crash mid-append: the batch never happened
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let entry: WalEntry = bincode::deserialize(&entry_buf)
            .map_err(|e| StoreError::KvError(format!("failed to deserialize WAL entry: {}", e)))?;
        valid_len += 4 + len as u64;
        if entry.seq <= after_seq {
            continue;
        }
        max_seq = max_seq.max(entry.seq);
        for op in entry.ops {
            match op {
                WalOp::Put { key, value } => {
                    data.insert(key, value);
                }
                WalOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        replayed += 1;
    }

    Ok((replayed, max_seq, valid_len))
}

impl KvStore for PersistentKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: Key, value: Value) -> Result<(), StoreError> {
        self.mutate(&[], vec![BatchOp::Put { key, value }]).map(|_| ())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.mutate(&[], vec![BatchOp::Delete { key: key.to_vec() }])
            .map(|_| ())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        Ok(scan(&data, prefix))
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        Ok(data.contains_key(key))
    }

    fn write_guarded(
        &self,
        guards: &[Guard],
        ops: Vec<BatchOp>,
    ) -> Result<Option<Key>, StoreError> {
        self.mutate(guards, ops)
    }
}
