//! Core block primitives for entrychain.
//!
//! This crate provides the fundamental types of the block/ledger layer:
//! - SHA-256 hashes and the Merkle root construction
//! - Binary codec helpers (big-endian, fixed-width, offset-aware errors)
//! - Entries, entry chains and Entry Blocks
//! - Entry Credit Blocks and their ledger entries
//! - Ed25519 signing for credit commitments

pub mod balance;
pub mod codec;
pub mod commit;
pub mod crypto;
pub mod eblock;
pub mod echain;
pub mod ecblock;
pub mod entry;
pub mod hash;
pub mod merkle;

// Re-export commonly used types at the crate root
pub use balance::IncreaseBalance;
pub use codec::{BinaryMarshal, BinaryUnmarshal, CodecError, Reader, Writer};
pub use commit::{CommitChain, CommitEntry, MilliTime};
pub use crypto::{CryptoError, Keypair, PublicKey, Signature};
pub use eblock::{
    as_minute_marker, minute_marker, BlockError, EBlock, EBlockBuilder, EBlockHeader,
    MinuteBucket, EBLOCK_HEADER_LEN, MINUTES_PER_BLOCK,
};
pub use echain::EChain;
pub use ecblock::{ECBlock, ECBlockEntry, ECBlockHeader, EC_CHAIN_ID};
pub use entry::{Entry, MAX_EXT_IDS_SIZE};
pub use hash::{hash, hash_concat, Hash, HASH_LENGTH};
pub use merkle::{merkle_root, MerkleProof, MerkleTree};
