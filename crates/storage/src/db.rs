//! sled database wrapper with raw and serde helpers.

use entrychain_core::{CodecError, Hash};
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// One-byte table tags prefixing every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Table {
    /// entry hash -> entry bytes
    Entry = 0x01,
    /// chain id ++ timestamp ++ entry hash -> queue status
    EntryQueue = 0x02,
    /// key merkle root -> eblock bytes
    EBlock = 0x03,
    /// chain id ++ sequence -> key merkle root
    EBlockSequence = 0x04,
    /// chain id -> chain record
    Chain = 0x05,
    /// header hash -> ecblock bytes
    ECBlock = 0x06,
    /// fixed key -> header hash of the latest ecblock
    ECHead = 0x07,
}

impl Table {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Status value stored for a queued entry.
pub const STATUS_IN_QUEUE: u8 = 0x01;

/// Wrapper around sled database with serialization helpers.
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store raw bytes under `key`.
    pub fn store<K: AsRef<[u8]>>(&self, key: K, value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Fetch the raw bytes stored under `key`.
    pub fn fetch<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All key/value pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix<P: AsRef<[u8]>>(&self, prefix: P) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Apply multiple operations atomically.
    ///
    /// Atomicity is provided by sled's `apply_batch`: the batch collects
    /// operations in memory and writes them through sled's write-ahead log.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    fn tagged_key(table: Table, parts: &[&[u8]]) -> Vec<u8> {
        let len = 1 + parts.iter().map(|p| p.len()).sum::<usize>();
        let mut key = Vec::with_capacity(len);
        key.push(table.tag());
        for part in parts {
            key.extend_from_slice(part);
        }
        key
    }

    /// Format: table tag (1) + entry hash (32)
    pub fn entry_key(entry_hash: &Hash) -> Vec<u8> {
        Self::tagged_key(Table::Entry, &[entry_hash.as_ref()])
    }

    /// Format: table tag (1) + chain id (32) + timestamp (8, big-endian) + entry hash (32)
    pub fn entry_queue_key(chain_id: &Hash, timestamp: u64, entry_hash: &Hash) -> Vec<u8> {
        Self::tagged_key(
            Table::EntryQueue,
            &[
                chain_id.as_ref(),
                &timestamp.to_be_bytes(),
                entry_hash.as_ref(),
            ],
        )
    }

    /// Prefix of every queue key for `chain_id`.
    pub fn entry_queue_prefix(chain_id: &Hash) -> Vec<u8> {
        Self::tagged_key(Table::EntryQueue, &[chain_id.as_ref()])
    }

    /// Format: table tag (1) + key merkle root (32)
    pub fn eblock_key(key_mr: &Hash) -> Vec<u8> {
        Self::tagged_key(Table::EBlock, &[key_mr.as_ref()])
    }

    /// Format: table tag (1) + chain id (32) + sequence (4, big-endian)
    pub fn eblock_sequence_key(chain_id: &Hash, sequence: u32) -> Vec<u8> {
        Self::tagged_key(
            Table::EBlockSequence,
            &[chain_id.as_ref(), &sequence.to_be_bytes()],
        )
    }

    /// Format: table tag (1) + chain id (32)
    pub fn chain_key(chain_id: &Hash) -> Vec<u8> {
        Self::tagged_key(Table::Chain, &[chain_id.as_ref()])
    }

    /// Format: table tag (1) + header hash (32)
    pub fn ecblock_key(header_hash: &Hash) -> Vec<u8> {
        Self::tagged_key(Table::ECBlock, &[header_hash.as_ref()])
    }

    pub fn ec_head_key() -> Vec<u8> {
        vec![Table::ECHead.tag()]
    }
}

/// Batch operation for atomic updates.
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}
