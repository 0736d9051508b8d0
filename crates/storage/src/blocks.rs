//! Entry, block and chain persistence.

use crate::db::{BatchOp, Result, Storage, StorageError, Table, STATUS_IN_QUEUE};
use entrychain_core::{
    BinaryMarshal, BinaryUnmarshal, EBlock, EChain, ECBlock, Entry, Hash, HASH_LENGTH,
};
use std::collections::HashSet;

/// An entry waiting in a chain's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedEntry {
    pub timestamp: u64,
    pub entry_hash: Hash,
}

/// Manages entries, Entry Blocks, Entry Credit Blocks and chain records.
pub struct BlockStore<'a> {
    storage: &'a Storage,
}

impl<'a> BlockStore<'a> {
    /// Create a new BlockStore wrapping the given storage.
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Store an entry and put it in its chain's queue, atomically.
    ///
    /// Entries whose ext ids do not fit the binary encoding are rejected.
    pub fn insert_entry_and_queue(&self, entry: &Entry, timestamp: u64) -> Result<Hash> {
        entry.validate()?;
        let entry_hash = entry.hash();
        self.storage.batch(vec![
            BatchOp::Insert {
                key: Storage::entry_key(&entry_hash),
                value: entry.marshal(),
            },
            BatchOp::Insert {
                key: Storage::entry_queue_key(&entry.chain_id, timestamp, &entry_hash),
                value: vec![STATUS_IN_QUEUE],
            },
        ])?;
        Ok(entry_hash)
    }

    /// Get an entry by its hash.
    pub fn fetch_entry(&self, entry_hash: &Hash) -> Result<Option<Entry>> {
        match self.storage.fetch(Storage::entry_key(entry_hash))? {
            Some(bytes) => Ok(Some(Entry::unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Entries queued for `chain_id`, oldest first.
    pub fn queued_entries(&self, chain_id: &Hash) -> Result<Vec<QueuedEntry>> {
        let prefix = Storage::entry_queue_prefix(chain_id);
        let mut out = Vec::new();
        for (key, _) in self.storage.scan_prefix(&prefix)? {
            out.push(parse_queue_key(&key)?);
        }
        Ok(out)
    }

    /// Chain ids with at least one queued entry, in key order.
    pub fn queued_chains(&self) -> Result<Vec<Hash>> {
        let mut out: Vec<Hash> = Vec::new();
        for (key, _) in self.storage.scan_prefix([Table::EntryQueue.tag()])? {
            let chain_id = Hash::from_slice(key.get(1..1 + HASH_LENGTH).unwrap_or(&[]))?;
            if out.last() != Some(&chain_id) {
                out.push(chain_id);
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Chains
    // =========================================================================

    pub fn put_chain(&self, chain: &EChain) -> Result<()> {
        self.storage.put(Storage::chain_key(&chain.chain_id), chain)
    }

    pub fn get_chain(&self, chain_id: &Hash) -> Result<Option<EChain>> {
        self.storage.get(Storage::chain_key(chain_id))
    }

    /// Every stored chain record, ordered by chain id.
    pub fn load_chains(&self) -> Result<Vec<EChain>> {
        let mut chains = Vec::new();
        for (_, value) in self.storage.scan_prefix([Table::Chain.tag()])? {
            chains.push(bincode::deserialize(&value)?);
        }
        Ok(chains)
    }

    // =========================================================================
    // Entry Blocks
    // =========================================================================

    /// Get an Entry Block by its key Merkle root.
    pub fn get_eblock(&self, key_mr: &Hash) -> Result<Option<EBlock>> {
        match self.storage.fetch(Storage::eblock_key(key_mr))? {
            Some(bytes) => Ok(Some(EBlock::unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get an Entry Block by chain and sequence number.
    ///
    /// This performs two lookups: (chain, sequence) -> key MR -> block.
    pub fn get_eblock_by_sequence(&self, chain_id: &Hash, sequence: u32) -> Result<Option<EBlock>> {
        let key = Storage::eblock_sequence_key(chain_id, sequence);
        match self.storage.fetch(&key)? {
            Some(bytes) => self.get_eblock(&Hash::from_slice(&bytes)?),
            None => Ok(None),
        }
    }

    /// The most recent sealed block of `chain`, if it has any.
    pub fn latest_eblock(&self, chain: &EChain) -> Result<Option<EBlock>> {
        match chain.next_block_height {
            0 => Ok(None),
            height => self
                .get_eblock_by_sequence(&chain.chain_id, height - 1)?
                .map(Some)
                .ok_or_else(|| {
                    StorageError::NotFound(format!(
                        "eblock {} of chain {}",
                        height - 1,
                        chain.chain_id
                    ))
                }),
        }
    }

    // =========================================================================
    // Entry Credit Blocks
    // =========================================================================

    pub fn get_ecblock(&self, header_hash: &Hash) -> Result<Option<ECBlock>> {
        match self.storage.fetch(Storage::ecblock_key(header_hash))? {
            Some(bytes) => Ok(Some(ECBlock::unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The latest committed Entry Credit Block.
    pub fn get_ec_head(&self) -> Result<Option<ECBlock>> {
        match self.storage.fetch(Storage::ec_head_key())? {
            Some(bytes) => self.get_ecblock(&Hash::from_slice(&bytes)?),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Period commit
    // =========================================================================

    /// Persist one closed period in a single atomic batch.
    ///
    /// `chains` are the chain records after advancing past `eblocks`. Each
    /// block must sit exactly at the stored height of its chain. Queued
    /// entries included in the blocks are removed from the queue.
    pub fn commit_period(
        &self,
        eblocks: &[EBlock],
        chains: &[EChain],
        ecblock: &ECBlock,
    ) -> Result<()> {
        let mut ops = Vec::new();

        for block in eblocks {
            let stored_height = self
                .get_chain(&block.chain_id())?
                .map_or(0, |c| c.next_block_height);
            if block.eb_sequence() != stored_height {
                return Err(StorageError::InvalidBlock(format!(
                    "eblock sequence {} for chain {} but stored height is {}",
                    block.eb_sequence(),
                    block.chain_id(),
                    stored_height
                )));
            }

            let key_mr = block.key_mr();
            ops.push(BatchOp::Insert {
                key: Storage::eblock_key(&key_mr),
                value: block.marshal(),
            });
            ops.push(BatchOp::Insert {
                key: Storage::eblock_sequence_key(&block.chain_id(), block.eb_sequence()),
                value: key_mr.as_bytes().to_vec(),
            });

            let included: HashSet<&Hash> = block.entries().iter().collect();
            for queued in self.queued_entries(&block.chain_id())? {
                if included.contains(&queued.entry_hash) {
                    ops.push(BatchOp::Remove {
                        key: Storage::entry_queue_key(
                            &block.chain_id(),
                            queued.timestamp,
                            &queued.entry_hash,
                        ),
                    });
                }
            }
        }

        for chain in chains {
            ops.push(BatchOp::Insert {
                key: Storage::chain_key(&chain.chain_id),
                value: bincode::serialize(chain)?,
            });
        }

        let header_hash = ecblock.header_hash();
        ops.push(BatchOp::Insert {
            key: Storage::ecblock_key(&header_hash),
            value: ecblock.marshal(),
        });
        ops.push(BatchOp::Insert {
            key: Storage::ec_head_key(),
            value: header_hash.as_bytes().to_vec(),
        });

        self.storage.batch(ops)
    }
}

fn parse_queue_key(key: &[u8]) -> Result<QueuedEntry> {
    const TS_START: usize = 1 + HASH_LENGTH;
    const HASH_START: usize = TS_START + 8;

    if key.len() != HASH_START + HASH_LENGTH {
        return Err(StorageError::InvalidBlock(format!(
            "malformed queue key of {} bytes",
            key.len()
        )));
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[TS_START..HASH_START]);
    Ok(QueuedEntry {
        timestamp: u64::from_be_bytes(ts),
        entry_hash: Hash::from_slice(&key[HASH_START..])?,
    })
}
