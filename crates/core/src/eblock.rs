//! Entry Blocks: per-chain blocks of entry hashes and minute markers.
//!
//! An Entry Block is built through [`EBlockBuilder`], which only allows
//! appends. [`EBlockBuilder::seal`] consumes the builder, computes the body
//! and key Merkle roots and returns an immutable [`EBlock`].

use crate::codec::{BinaryMarshal, BinaryUnmarshal, CodecError, Reader, Result, Writer};
use crate::entry::Entry;
use crate::hash::{hash, Hash, HASH_LENGTH};
use crate::merkle::{merkle_root, MerkleProof, MerkleTree};
use thiserror::Error;

/// Size of the serialized Entry Block header.
pub const EBLOCK_HEADER_LEN: usize = 4 * HASH_LENGTH + 4 + 4 + 4;

/// Number of minute windows in one block period.
pub const MINUTES_PER_BLOCK: u8 = 10;

/// Errors raised while building Entry Blocks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("invalid linkage: {0}")]
    InvalidLinkage(&'static str),

    #[error("minute {0} out of range 1..=10")]
    InvalidMinute(u8),
}

/// The sentinel hash marking the end of `minute`.
///
/// All bytes are zero except the last, which holds the minute number.
pub fn minute_marker(minute: u8) -> Hash {
    let mut bytes = [0u8; HASH_LENGTH];
    bytes[HASH_LENGTH - 1] = minute;
    Hash(bytes)
}

/// Returns the minute number if `hash` is a minute marker.
pub fn as_minute_marker(hash: &Hash) -> Option<u8> {
    let (prefix, last) = hash.0.split_at(HASH_LENGTH - 1);
    let minute = last[0];
    if prefix.iter().all(|b| *b == 0) && (1..=MINUTES_PER_BLOCK).contains(&minute) {
        Some(minute)
    } else {
        None
    }
}

/// The header of an Entry Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EBlockHeader {
    /// All entries in this block belong to this chain.
    pub chain_id: Hash,
    /// Merkle root of the body.
    pub body_mr: Hash,
    /// Key Merkle root of the previous block of this chain.
    pub prev_key_mr: Hash,
    /// Header hash of the previous block of this chain.
    pub prev_hash: Hash,
    /// Position of this block in its chain, starting at 0.
    pub eb_sequence: u32,
    /// Height of the directory block that references this block.
    pub db_height: u32,
    /// Number of entries plus minute markers.
    pub entry_count: u32,
}

impl EBlockHeader {
    /// Hash of the serialized header.
    pub fn hash(&self) -> Hash {
        hash(&self.marshal())
    }
}

impl BinaryMarshal for EBlockHeader {
    fn marshal_into(&self, w: &mut Writer) {
        w.put_hash(&self.chain_id);
        w.put_hash(&self.body_mr);
        w.put_hash(&self.prev_key_mr);
        w.put_hash(&self.prev_hash);
        w.put_u32(self.eb_sequence);
        w.put_u32(self.db_height);
        w.put_u32(self.entry_count);
    }
}

impl BinaryUnmarshal for EBlockHeader {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            chain_id: r.read_hash("chain id")?,
            body_mr: r.read_hash("body merkle root")?,
            prev_key_mr: r.read_hash("previous key merkle root")?,
            prev_hash: r.read_hash("previous hash")?,
            eb_sequence: r.read_u32("eblock sequence")?,
            db_height: r.read_u32("directory block height")?,
            entry_count: r.read_u32("entry count")?,
        })
    }
}

/// An Entry Block still open for appends.
#[derive(Debug, Clone)]
pub struct EBlockBuilder {
    header: EBlockHeader,
    entries: Vec<Hash>,
}

impl EBlockBuilder {
    pub(crate) fn new(
        chain_id: Hash,
        eb_sequence: u32,
        prev_key_mr: Hash,
        prev_hash: Hash,
        capacity: usize,
    ) -> Self {
        Self {
            header: EBlockHeader {
                chain_id,
                body_mr: Hash::ZERO,
                prev_key_mr,
                prev_hash,
                eb_sequence,
                db_height: 0,
                entry_count: 0,
            },
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn chain_id(&self) -> Hash {
        self.header.chain_id
    }

    pub fn eb_sequence(&self) -> u32 {
        self.header.eb_sequence
    }

    pub fn header(&self) -> &EBlockHeader {
        &self.header
    }

    pub fn entries(&self) -> &[Hash] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set the height of the directory block this block will belong to.
    pub fn set_db_height(&mut self, db_height: u32) {
        self.header.db_height = db_height;
    }

    /// Append an entry; returns the content hash that was recorded.
    pub fn add_entry(&mut self, entry: &Entry) -> Hash {
        let entry_hash = entry.hash();
        self.add_entry_hash(entry_hash);
        entry_hash
    }

    /// Append an already computed entry hash.
    pub fn add_entry_hash(&mut self, entry_hash: Hash) {
        self.entries.push(entry_hash);
        self.header.entry_count += 1;
    }

    /// Close minute `minute` (1..=10) by appending its marker.
    pub fn add_end_of_minute_marker(&mut self, minute: u8) -> std::result::Result<(), BlockError> {
        if !(1..=MINUTES_PER_BLOCK).contains(&minute) {
            return Err(BlockError::InvalidMinute(minute));
        }
        self.add_entry_hash(minute_marker(minute));
        Ok(())
    }

    /// Whether the most recent body element is a minute marker.
    pub fn ends_with_marker(&self) -> bool {
        self.entries
            .last()
            .map_or(false, |h| as_minute_marker(h).is_some())
    }

    /// Compute the Merkle roots and freeze the block.
    pub fn seal(self) -> EBlock {
        let Self { mut header, entries } = self;
        header.body_mr = merkle_root(&entries);
        EBlock::from_parts(header, entries)
    }
}

/// Entries recorded in one minute window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinuteBucket {
    /// The minute closed by a marker, or `None` for trailing entries that
    /// no marker has closed yet.
    pub minute: Option<u8>,
    pub entries: Vec<Hash>,
}

/// A sealed, immutable Entry Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EBlock {
    header: EBlockHeader,
    entries: Vec<Hash>,
    key_mr: Hash,
}

impl EBlock {
    fn from_parts(header: EBlockHeader, entries: Vec<Hash>) -> Self {
        let key_mr = merkle_root(&[header.hash(), header.body_mr]);
        Self {
            header,
            entries,
            key_mr,
        }
    }

    pub fn header(&self) -> &EBlockHeader {
        &self.header
    }

    pub fn entries(&self) -> &[Hash] {
        &self.entries
    }

    pub fn chain_id(&self) -> Hash {
        self.header.chain_id
    }

    pub fn eb_sequence(&self) -> u32 {
        self.header.eb_sequence
    }

    pub fn body_mr(&self) -> Hash {
        self.header.body_mr
    }

    /// The block's identity: Merkle root of the header hash and body root.
    pub fn key_mr(&self) -> Hash {
        self.key_mr
    }

    /// Hash of the serialized header; the next block's `prev_hash`.
    pub fn header_hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn is_origin(&self) -> bool {
        self.header.eb_sequence == 0 && self.header.prev_hash.is_zero()
    }

    /// Whether the stored body root matches the body.
    pub fn verify_body_mr(&self) -> bool {
        merkle_root(&self.entries) == self.header.body_mr
    }

    /// Entry hashes without minute markers.
    pub fn entry_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.entries
            .iter()
            .filter(|h| as_minute_marker(h).is_none())
    }

    /// Proof that `entry_hash` is part of this block, checked against
    /// [`EBlock::body_mr`]. `None` if the entry is not in the block.
    pub fn entry_proof(&self, entry_hash: &Hash) -> Option<MerkleProof> {
        let index = self.entries.iter().position(|h| h == entry_hash)?;
        MerkleTree::new(&self.entries).proof(index)
    }

    /// Split the body into per-minute buckets using the minute markers.
    pub fn minute_buckets(&self) -> Vec<MinuteBucket> {
        let mut buckets = Vec::new();
        let mut current = Vec::new();
        for h in &self.entries {
            match as_minute_marker(h) {
                Some(minute) => buckets.push(MinuteBucket {
                    minute: Some(minute),
                    entries: std::mem::take(&mut current),
                }),
                None => current.push(*h),
            }
        }
        if !current.is_empty() {
            buckets.push(MinuteBucket {
                minute: None,
                entries: current,
            });
        }
        buckets
    }
}

impl BinaryMarshal for EBlock {
    fn marshal_into(&self, w: &mut Writer) {
        self.header.marshal_into(w);
        for entry in &self.entries {
            w.put_hash(entry);
        }
    }
}

impl BinaryUnmarshal for EBlock {
    /// Decodes a block that occupies the rest of the input.
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        let header = EBlockHeader::unmarshal_from(r)?;

        let remaining = r.remaining();
        let declared = u64::from(header.entry_count);
        if remaining % HASH_LENGTH != 0 || (remaining / HASH_LENGTH) as u64 != declared {
            return Err(CodecError::CountMismatch {
                field: "eblock entry",
                declared,
                actual: (remaining / HASH_LENGTH) as u64,
            });
        }

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            entries.push(r.read_hash("eblock entry")?);
        }
        Ok(Self::from_parts(header, entries))
    }
}
