//! Entry Credit Blocks: the credit ledger for one block period.
//!
//! The body is an ordered list of type-tagged ledger entries. Every entry
//! kind has a fixed encoded size, so the only framing on the wire is the
//! leading tag byte.

use crate::balance::IncreaseBalance;
use crate::codec::{BinaryMarshal, BinaryUnmarshal, CodecError, Reader, Result, Writer};
use crate::commit::{CommitChain, CommitEntry};
use crate::hash::{hash, Hash};
use crate::merkle::merkle_root;

/// Tag byte of a server index marker.
pub const ECID_SERVER_INDEX_NUMBER: u8 = 0x00;
/// Tag byte of a minute marker.
pub const ECID_MINUTE_NUMBER: u8 = 0x01;
/// Tag byte of a [`CommitChain`].
pub const ECID_CHAIN_COMMIT: u8 = 0x02;
/// Tag byte of a [`CommitEntry`].
pub const ECID_ENTRY_COMMIT: u8 = 0x03;
/// Tag byte of an [`IncreaseBalance`].
pub const ECID_BALANCE_INCREASE: u8 = 0x04;

/// Chain id of the entry-credit chain.
pub const EC_CHAIN_ID: Hash = Hash([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0x0c,
]);

/// One element of an Entry Credit Block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ECBlockEntry {
    ServerIndexNumber(u8),
    MinuteNumber(u8),
    CommitChain(CommitChain),
    CommitEntry(CommitEntry),
    IncreaseBalance(IncreaseBalance),
}

impl ECBlockEntry {
    pub fn tag(&self) -> u8 {
        match self {
            Self::ServerIndexNumber(_) => ECID_SERVER_INDEX_NUMBER,
            Self::MinuteNumber(_) => ECID_MINUTE_NUMBER,
            Self::CommitChain(_) => ECID_CHAIN_COMMIT,
            Self::CommitEntry(_) => ECID_ENTRY_COMMIT,
            Self::IncreaseBalance(_) => ECID_BALANCE_INCREASE,
        }
    }

    /// Encoded size including the tag byte.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::ServerIndexNumber(_) | Self::MinuteNumber(_) => 1,
            Self::CommitChain(_) => CommitChain::LENGTH,
            Self::CommitEntry(_) => CommitEntry::LENGTH,
            Self::IncreaseBalance(_) => IncreaseBalance::LENGTH,
        }
    }
}

impl From<CommitChain> for ECBlockEntry {
    fn from(value: CommitChain) -> Self {
        Self::CommitChain(value)
    }
}

impl From<CommitEntry> for ECBlockEntry {
    fn from(value: CommitEntry) -> Self {
        Self::CommitEntry(value)
    }
}

impl From<IncreaseBalance> for ECBlockEntry {
    fn from(value: IncreaseBalance) -> Self {
        Self::IncreaseBalance(value)
    }
}

impl BinaryMarshal for ECBlockEntry {
    fn marshal_into(&self, w: &mut Writer) {
        w.put_u8(self.tag());
        match self {
            Self::ServerIndexNumber(n) | Self::MinuteNumber(n) => w.put_u8(*n),
            Self::CommitChain(cc) => cc.marshal_into(w),
            Self::CommitEntry(ce) => ce.marshal_into(w),
            Self::IncreaseBalance(ib) => ib.marshal_into(w),
        }
    }
}

impl BinaryUnmarshal for ECBlockEntry {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        let offset = r.offset();
        let tag = r.read_u8("entry type")?;
        let entry = match tag {
            ECID_SERVER_INDEX_NUMBER => Self::ServerIndexNumber(r.read_u8("server index")?),
            ECID_MINUTE_NUMBER => Self::MinuteNumber(r.read_u8("minute number")?),
            ECID_CHAIN_COMMIT => Self::CommitChain(CommitChain::unmarshal_from(r)?),
            ECID_ENTRY_COMMIT => Self::CommitEntry(CommitEntry::unmarshal_from(r)?),
            ECID_BALANCE_INCREASE => Self::IncreaseBalance(IncreaseBalance::unmarshal_from(r)?),
            tag => return Err(CodecError::UnknownEntryType { tag, offset }),
        };
        Ok(entry)
    }
}

/// The header of an Entry Credit Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ECBlockHeader {
    pub ec_chain_id: Hash,
    /// Hash of the serialized body.
    pub body_hash: Hash,
    pub prev_header_hash: Hash,
    pub prev_ledger_key_mr: Hash,
    pub db_height: u32,
    pub header_expansion_area: Vec<u8>,
    object_count: u64,
    body_size: u64,
}

impl ECBlockHeader {
    pub fn new(ec_chain_id: Hash) -> Self {
        Self {
            ec_chain_id,
            body_hash: Hash::ZERO,
            prev_header_hash: Hash::ZERO,
            prev_ledger_key_mr: Hash::ZERO,
            db_height: 0,
            header_expansion_area: Vec::new(),
            object_count: 0,
            body_size: 0,
        }
    }

    /// Number of body entries.
    pub fn object_count(&self) -> u64 {
        self.object_count
    }

    /// Encoded size of the body in bytes.
    pub fn body_size(&self) -> u64 {
        self.body_size
    }

    pub fn hash(&self) -> Hash {
        hash(&self.marshal())
    }
}

impl BinaryMarshal for ECBlockHeader {
    fn marshal_into(&self, w: &mut Writer) {
        w.put_hash(&self.ec_chain_id);
        w.put_hash(&self.body_hash);
        w.put_hash(&self.prev_header_hash);
        w.put_hash(&self.prev_ledger_key_mr);
        w.put_u32(self.db_height);
        w.put_u64(self.header_expansion_area.len() as u64);
        w.put_bytes(&self.header_expansion_area);
        w.put_u64(self.object_count);
        w.put_u64(self.body_size);
    }
}

impl BinaryUnmarshal for ECBlockHeader {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        let ec_chain_id = r.read_hash("ec chain id")?;
        let body_hash = r.read_hash("body hash")?;
        let prev_header_hash = r.read_hash("previous header hash")?;
        let prev_ledger_key_mr = r.read_hash("previous ledger key merkle root")?;
        let db_height = r.read_u32("directory block height")?;
        let expansion_len = r.read_u64("header expansion size")?;
        let expansion_len = usize::try_from(expansion_len).unwrap_or(usize::MAX);
        let header_expansion_area = r.take(expansion_len, "header expansion area")?.to_vec();
        Ok(Self {
            ec_chain_id,
            body_hash,
            prev_header_hash,
            prev_ledger_key_mr,
            db_height,
            header_expansion_area,
            object_count: r.read_u64("object count")?,
            body_size: r.read_u64("body size")?,
        })
    }
}

/// An Entry Credit Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ECBlock {
    pub header: ECBlockHeader,
    body: Vec<ECBlockEntry>,
}

impl Default for ECBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl ECBlock {
    /// An empty block on the entry-credit chain.
    pub fn new() -> Self {
        Self::with_header(ECBlockHeader::new(EC_CHAIN_ID))
    }

    pub fn with_header(header: ECBlockHeader) -> Self {
        let mut block = Self {
            header,
            body: Vec::new(),
        };
        block.header.object_count = 0;
        block.header.body_size = 0;
        block
    }

    /// The successor of `prev`, linked by header hash and ledger key root.
    pub fn next(prev: &ECBlock) -> Self {
        let mut header = ECBlockHeader::new(prev.header.ec_chain_id);
        header.prev_header_hash = prev.header_hash();
        header.prev_ledger_key_mr = prev.ledger_key_mr();
        header.db_height = prev.header.db_height + 1;
        Self::with_header(header)
    }

    pub fn body(&self) -> &[ECBlockEntry] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Append a ledger entry.
    pub fn add_entry(&mut self, entry: impl Into<ECBlockEntry>) {
        let entry = entry.into();
        self.header.object_count += 1;
        self.header.body_size += entry.encoded_len() as u64;
        self.body.push(entry);
    }

    fn body_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.header.body_size as usize);
        for entry in &self.body {
            entry.marshal_into(&mut w);
        }
        w.into_bytes()
    }

    /// Recompute `body_hash` from the current body.
    pub fn compute_body_hash(&mut self) -> Hash {
        self.header.body_hash = hash(&self.body_bytes());
        self.header.body_hash
    }

    /// Hash of the serialized header; the next block's `prev_header_hash`.
    pub fn header_hash(&self) -> Hash {
        self.header.hash()
    }

    /// Merkle root of the header hash and the hash of the body.
    pub fn ledger_key_mr(&self) -> Hash {
        merkle_root(&[self.header_hash(), hash(&self.body_bytes())])
    }
}

impl BinaryMarshal for ECBlock {
    fn marshal_into(&self, w: &mut Writer) {
        self.header.marshal_into(w);
        for entry in &self.body {
            entry.marshal_into(w);
        }
    }
}

impl BinaryUnmarshal for ECBlock {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        let header = ECBlockHeader::unmarshal_from(r)?;
        let body_size = usize::try_from(header.body_size).unwrap_or(usize::MAX);
        let start = r.offset();

        let mut body = Vec::with_capacity(header.object_count.min(1024) as usize);
        while r.offset() - start < body_size {
            if r.is_empty() {
                return Err(CodecError::Truncated {
                    field: "ecblock body",
                    offset: r.offset(),
                    needed: body_size - (r.offset() - start),
                    remaining: 0,
                });
            }
            body.push(ECBlockEntry::unmarshal_from(r)?);
        }

        let consumed = (r.offset() - start) as u64;
        if consumed != header.body_size {
            return Err(CodecError::BodySizeMismatch {
                declared: header.body_size,
                actual: consumed,
            });
        }
        if body.len() as u64 != header.object_count {
            return Err(CodecError::CountMismatch {
                field: "ecblock object",
                declared: header.object_count,
                actual: body.len() as u64,
            });
        }

        Ok(Self { header, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::MilliTime;
    use crate::crypto::{Keypair, PublicKey};

    fn signed_commit_chain(kp: &Keypair) -> CommitChain {
        CommitChain {
            version: 0,
            milli_time: MilliTime([1, 1, 1, 1, 1, 1]),
            chain_id_hash: Hash::repeat(0xAA),
            weld: Hash::repeat(0xBB),
            entry_hash: Hash::repeat(0xCC),
            credits: 11,
            ec_pub_key: PublicKey::default(),
            sig: Default::default(),
        }
        .signed(kp)
    }

    fn scenario_block() -> ECBlock {
        let kp = Keypair::generate();
        let cc = signed_commit_chain(&kp);
        let ib = IncreaseBalance::new(PublicKey([0xAA; 32]), Hash::repeat(0xBB), 12);

        let mut ecb = ECBlock::new();
        ecb.header.ec_chain_id = Hash::repeat(0x11);
        ecb.header.body_hash = Hash::repeat(0x22);
        ecb.header.prev_header_hash = Hash::repeat(0x33);
        ecb.header.prev_ledger_key_mr = Hash::repeat(0x44);
        ecb.header.db_height = 10;
        ecb.header.header_expansion_area = vec![0x55; 32];

        ecb.add_entry(cc);
        ecb.add_entry(ib);
        ecb
    }

    #[test]
    fn test_ecblock_marshal_unmarshal_marshal() {
        let ecb1 = scenario_block();
        let p = ecb1.marshal();

        let ecb2 = ECBlock::unmarshal(&p).unwrap();
        let q = ecb2.marshal();

        assert_eq!(p, q);
        assert_eq!(ecb2, ecb1);
        match &ecb2.body()[0] {
            ECBlockEntry::CommitChain(cc) => assert!(cc.verify().is_ok()),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_add_entry_counts() {
        let ecb = scenario_block();
        assert_eq!(ecb.header.object_count(), 2);
        assert_eq!(ecb.len(), 2);
        assert_eq!(
            ecb.header.body_size(),
            (1 + CommitChain::LENGTH + 1 + IncreaseBalance::LENGTH) as u64
        );
    }

    #[test]
    fn test_header_layout() {
        let ecb = scenario_block();
        let bytes = ecb.marshal();
        assert_eq!(&bytes[..32], &[0x11; 32]);
        assert_eq!(&bytes[128..132], &[0, 0, 0, 10]);
        assert_eq!(&bytes[132..140], &[0, 0, 0, 0, 0, 0, 0, 32]);
        // first body tag follows expansion area, object count and body size
        assert_eq!(bytes[140 + 32 + 16], ECID_CHAIN_COMMIT);
    }

    #[test]
    fn test_all_entry_kinds_roundtrip() {
        let kp = Keypair::generate();
        let mut ecb = ECBlock::new();
        ecb.add_entry(ECBlockEntry::ServerIndexNumber(0));
        ecb.add_entry(signed_commit_chain(&kp));
        ecb.add_entry(ECBlockEntry::MinuteNumber(1));
        ecb.add_entry(CommitEntry::new(Hash::repeat(3), 1, MilliTime::from_millis(7)).signed(&kp));
        ecb.add_entry(IncreaseBalance::new(kp.public_key, Hash::repeat(9), 100));
        ecb.add_entry(ECBlockEntry::MinuteNumber(2));
        ecb.compute_body_hash();

        let bytes = ecb.marshal();
        let decoded = ECBlock::unmarshal(&bytes).unwrap();
        assert_eq!(decoded.marshal(), bytes);
        let tags: Vec<u8> = decoded.body().iter().map(|e| e.tag()).collect();
        assert_eq!(tags, vec![0, 2, 1, 3, 4, 1]);
    }

    #[test]
    fn test_unknown_entry_type() {
        let mut ecb = ECBlock::new();
        ecb.add_entry(ECBlockEntry::MinuteNumber(1));
        let mut bytes = ecb.marshal();
        let tag_offset = bytes.len() - 2;
        bytes[tag_offset] = 0x7F;

        assert_eq!(
            ECBlock::unmarshal(&bytes),
            Err(CodecError::UnknownEntryType {
                tag: 0x7F,
                offset: tag_offset,
            })
        );
    }

    #[test]
    fn test_truncated_variant() {
        let bytes = scenario_block().marshal();
        let cut = &bytes[..bytes.len() - 5];
        assert!(matches!(
            ECBlock::unmarshal(cut),
            Err(CodecError::Truncated {
                field: "increase balance amount",
                ..
            })
        ));
    }

    #[test]
    fn test_object_count_mismatch() {
        let ecb = scenario_block();
        let mut bytes = ecb.marshal();
        // object count sits right before the body size
        let count_offset = 140 + 32 + 7;
        bytes[count_offset] = 3;
        assert!(matches!(
            ECBlock::unmarshal(&bytes),
            Err(CodecError::CountMismatch {
                declared: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_body_size_mismatch() {
        let ecb = scenario_block();
        let mut bytes = ecb.marshal();
        // low byte of the body size; the last entry then runs past it
        let size_offset = 140 + 32 + 15;
        bytes[size_offset] -= 1;
        assert!(matches!(
            ECBlock::unmarshal(&bytes),
            Err(CodecError::BodySizeMismatch {
                declared: 273,
                actual: 274,
            })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = scenario_block().marshal();
        bytes.push(0);
        assert_eq!(ECBlock::unmarshal(&bytes), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_chained_blocks() {
        let mut first = scenario_block();
        first.compute_body_hash();
        let second = ECBlock::next(&first);

        assert_eq!(second.header.prev_header_hash, first.header_hash());
        assert_eq!(second.header.prev_ledger_key_mr, first.ledger_key_mr());
        assert_eq!(second.header.db_height, 11);
        assert_eq!(second.header.ec_chain_id, first.header.ec_chain_id);
        assert!(second.is_empty());
    }

    #[test]
    fn test_body_hash_tracks_body() {
        let mut ecb = ECBlock::new();
        let empty = ecb.compute_body_hash();
        ecb.add_entry(ECBlockEntry::MinuteNumber(1));
        assert_ne!(ecb.compute_body_hash(), empty);
    }
}
