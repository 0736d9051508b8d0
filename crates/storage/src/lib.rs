//! Persistent storage layer for entrychain.
//!
//! This crate provides the storage backend for the block/ledger layer:
//! - Entries and per-chain entry queues
//! - Entry Blocks (by key Merkle root and by chain sequence)
//! - Entry Credit Blocks and the credit chain head
//! - Chain records used to rebuild sequencing state on restart
//!
//! # Key layout
//!
//! Every key starts with a one-byte [`Table`] tag. Integers in keys are
//! big-endian so that sled's key order is numeric order.
//!
//! ```text
//! 0x01 Entry           entry hash                          -> entry bytes
//! 0x02 EntryQueue      chain id | timestamp u64 | entry hash -> status
//! 0x03 EBlock          key merkle root                     -> eblock bytes
//! 0x04 EBlockSequence  chain id | sequence u32              -> key merkle root
//! 0x05 Chain           chain id                            -> chain record
//! 0x06 ECBlock         header hash                         -> ecblock bytes
//! 0x07 ECHead                                              -> header hash
//! ```
//!
//! Blocks are stored in their wire encoding; chain records with bincode.
//!
//! # Example
//!
//! ```rust,no_run
//! use entrychain_core::{Entry, Hash};
//! use entrychain_storage::{BlockStore, Storage};
//!
//! let storage = Storage::open("./entrychain_data").unwrap();
//! let store = BlockStore::new(&storage);
//!
//! let entry = Entry::new(Hash([0xAA; 32]), vec![], b"hello".to_vec());
//! let entry_hash = store.insert_entry_and_queue(&entry, 1_430_000_000).unwrap();
//! assert_eq!(store.fetch_entry(&entry_hash).unwrap(), Some(entry));
//! ```

pub mod blocks;
pub mod db;

pub use blocks::{BlockStore, QueuedEntry};
pub use db::{BatchOp, Result, Storage, StorageError, Table, STATUS_IN_QUEUE};
