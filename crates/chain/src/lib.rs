//! Sequencing for entrychain.
//!
//! This crate turns submissions and timing signals into committed blocks:
//! - **Sequencer**: single owner of every chain's open block and the
//!   entry-credit block of the current period
//! - **Credits**: entry-credit balances charged by commits
//! - **Config**: sequencer settings, loadable from JSON
//!
//! # Example
//!
//! ```rust,no_run
//! use entrychain_chain::{ControlSignal, Sequencer, SequencerConfig};
//! use entrychain_core::{Entry, Hash};
//! use entrychain_storage::{BlockStore, Storage};
//!
//! let storage = Storage::open("./entrychain_data").unwrap();
//! let store = BlockStore::new(&storage);
//! let mut sequencer = Sequencer::restore(SequencerConfig::default(), &store).unwrap();
//!
//! let entry = Entry::new(Hash::repeat(1), vec![b"id".to_vec()], b"hello".to_vec());
//! store.insert_entry_and_queue(&entry, 1).unwrap();
//! sequencer.submit_entry(&entry).unwrap();
//!
//! sequencer.handle_signal(ControlSignal::CloseBlock).unwrap();
//! let period = sequencer.commit_period(&store).unwrap();
//! println!("committed {} entry blocks", period.eblocks.len());
//! ```

pub mod config;
pub mod credits;
pub mod sequencer;

pub use config::{ConfigError, SequencerConfig};
pub use credits::{CreditError, CreditLedger};
pub use sequencer::{
    ControlSignal, Result, SealedPeriod, Sequencer, SequencerError, SignalOutcome,
};
