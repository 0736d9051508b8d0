//! Block sequencing.
//!
//! The [`Sequencer`] is the single writer for every chain. Entries go into
//! the open entry block of their chain and ledger entries into the open
//! entry-credit block. Control signals close minutes and, finally, the
//! period. A sealed period must be written with [`Sequencer::commit_period`]
//! before any chain height moves forward.

use crate::config::{ConfigError, SequencerConfig};
use crate::credits::{CreditError, CreditLedger};
use entrychain_core::{
    BlockError, CodecError, CommitChain, CommitEntry, CryptoError, EBlock, EBlockBuilder, EChain,
    ECBlock, ECBlockEntry, ECBlockHeader, Entry, Hash, IncreaseBalance, PublicKey,
};
use entrychain_storage::{BlockStore, StorageError};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while sequencing.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("signature error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] CodecError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("the current period is sealed")]
    SealedBlock,

    #[error("the current period is already sealed")]
    AlreadySealed,

    #[error("no sealed period")]
    NothingSealed,

    #[error("signal for directory block {actual}, open block is {expected}")]
    HeightMismatch { expected: u32, actual: u32 },

    #[error("minute {minute} does not follow minute {last}")]
    MinuteOutOfOrder { last: u8, minute: u8 },

    #[error("queued entry {0} is missing")]
    MissingEntry(Hash),
}

pub type Result<T> = std::result::Result<T, SequencerError>;

/// Timing events delivered to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Minute `minute` of the directory block at `next_db_height` has ended.
    EndOfMinute { minute: u8, next_db_height: u32 },
    /// Close the period regardless of the current minute.
    CloseBlock,
}

/// What a control signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    MinuteClosed(u8),
    PeriodSealed,
}

/// The blocks of one closed period, waiting to be committed or abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPeriod {
    pub db_height: u32,
    /// One sealed block per chain that received entries, ordered by chain id.
    pub eblocks: Vec<EBlock>,
    pub ecblock: ECBlock,
}

struct ChainSlot {
    chain: EChain,
    /// Last committed block.
    last: Option<EBlock>,
    open: Option<EBlockBuilder>,
}

impl ChainSlot {
    fn new(chain: EChain) -> Self {
        Self {
            chain,
            last: None,
            open: None,
        }
    }

    /// The open block, created on first use.
    fn open_block(
        &mut self,
        capacity: usize,
        db_height: u32,
    ) -> std::result::Result<&mut EBlockBuilder, BlockError> {
        let builder = match self.open.take() {
            Some(builder) => builder,
            None => {
                let mut builder = self.chain.create_block(self.last.as_ref(), capacity)?;
                builder.set_db_height(db_height);
                builder
            }
        };
        Ok(self.open.insert(builder))
    }
}

/// Single owner of all chain state.
pub struct Sequencer {
    config: SequencerConfig,
    chains: HashMap<Hash, ChainSlot>,
    /// Open entry-credit block of the current period.
    ecblock: ECBlock,
    /// Last committed entry-credit block.
    last_ecblock: Option<ECBlock>,
    credits: CreditLedger,
    /// Balances as of the last commit.
    committed_credits: CreditLedger,
    /// Last closed minute of the current period, 0 if none.
    minute: u8,
    sealed: Option<SealedPeriod>,
}

impl Sequencer {
    /// A sequencer over an empty store.
    pub fn new(config: SequencerConfig) -> Result<Self> {
        config.validate()?;
        let mut header = ECBlockHeader::new(config.ec_chain_id);
        header.db_height = config.start_db_height;
        Ok(Self {
            config,
            chains: HashMap::new(),
            ecblock: ECBlock::with_header(header),
            last_ecblock: None,
            credits: CreditLedger::new(),
            committed_credits: CreditLedger::new(),
            minute: 0,
            sealed: None,
        })
    }

    /// Rebuild the sequencer from committed state.
    ///
    /// Chain heights and last blocks come from the chain records, balances
    /// from replaying the entry-credit chain, and entries still in the
    /// queue are placed into the new period's open blocks.
    pub fn restore(config: SequencerConfig, store: &BlockStore<'_>) -> Result<Self> {
        let mut sequencer = Self::new(config)?;

        for chain in store.load_chains()? {
            let last = store.latest_eblock(&chain)?;
            let chain_id = chain.chain_id;
            let mut slot = ChainSlot::new(chain);
            slot.last = last;
            sequencer.chains.insert(chain_id, slot);
        }

        let mut history = Vec::new();
        let mut cursor = store.get_ec_head()?;
        while let Some(block) = cursor {
            let prev = block.header.prev_header_hash;
            history.push(block);
            cursor = if prev.is_zero() {
                None
            } else {
                let block = store
                    .get_ecblock(&prev)?
                    .ok_or_else(|| StorageError::NotFound(format!("ecblock {prev}")))?;
                Some(block)
            };
        }
        for block in history.iter().rev() {
            sequencer.credits.apply_block(block)?;
        }
        sequencer.committed_credits = sequencer.credits.clone();
        if let Some(head) = history.into_iter().next() {
            sequencer.ecblock = ECBlock::next(&head);
            sequencer.last_ecblock = Some(head);
        }

        let resubmitted = sequencer.resubmit_queued(store)?;
        info!(
            chains = sequencer.chains.len(),
            db_height = sequencer.db_height(),
            resubmitted,
            "sequencer restored"
        );
        Ok(sequencer)
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Directory block height of the open period.
    pub fn db_height(&self) -> u32 {
        self.ecblock.header.db_height
    }

    /// Last closed minute of the open period, 0 if none.
    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    pub fn sealed(&self) -> Option<&SealedPeriod> {
        self.sealed.as_ref()
    }

    /// Committed state of a chain.
    pub fn chain(&self, chain_id: &Hash) -> Option<&EChain> {
        self.chains.get(chain_id).map(|slot| &slot.chain)
    }

    /// Last committed block of a chain.
    pub fn last_block(&self, chain_id: &Hash) -> Option<&EBlock> {
        self.chains.get(chain_id).and_then(|slot| slot.last.as_ref())
    }

    /// The open block of a chain, if it received anything this period.
    pub fn open_block(&self, chain_id: &Hash) -> Option<&EBlockBuilder> {
        self.chains.get(chain_id).and_then(|slot| slot.open.as_ref())
    }

    /// The open entry-credit block.
    pub fn ecblock(&self) -> &ECBlock {
        &self.ecblock
    }

    pub fn balance(&self, key: &PublicKey) -> u64 {
        self.credits.balance(key)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sealed.is_some() {
            return Err(SequencerError::SealedBlock);
        }
        Ok(())
    }

    // =========================================================================
    // Submissions
    // =========================================================================

    /// Append an entry to its chain's open block, opening it if needed.
    pub fn submit_entry(&mut self, entry: &Entry) -> Result<Hash> {
        self.ensure_open()?;
        entry.validate()?;
        let capacity = self.config.block_capacity;
        let db_height = self.db_height();
        let slot = self
            .chains
            .entry(entry.chain_id)
            .or_insert_with(|| ChainSlot::new(EChain::new(entry.chain_id)));
        let block = slot.open_block(capacity, db_height)?;
        let entry_hash = block.add_entry(entry);
        debug!(
            chain = %entry.chain_id,
            entry = %entry_hash,
            sequence = block.eb_sequence(),
            "entry added"
        );
        Ok(entry_hash)
    }

    /// Record a paid chain creation.
    pub fn submit_commit_chain(&mut self, commit: CommitChain) -> Result<()> {
        self.ensure_open()?;
        self.pay("chain commit", &commit.ec_pub_key, commit.credits, commit.verify())?;
        self.ecblock.add_entry(commit);
        Ok(())
    }

    /// Record a paid entry in an existing chain.
    pub fn submit_commit_entry(&mut self, commit: CommitEntry) -> Result<()> {
        self.ensure_open()?;
        self.pay("entry commit", &commit.ec_pub_key, commit.credits, commit.verify())?;
        self.ecblock.add_entry(commit);
        Ok(())
    }

    /// Credit a key. Returns the new balance.
    pub fn submit_increase_balance(&mut self, increase: IncreaseBalance) -> Result<u64> {
        self.ensure_open()?;
        let balance = self.credits.credit(increase.ec_pub_key, increase.num_ec)?;
        debug!(
            key = %increase.ec_pub_key,
            amount = increase.num_ec,
            balance,
            "balance increased"
        );
        self.ecblock.add_entry(increase);
        Ok(balance)
    }

    fn pay(
        &mut self,
        kind: &'static str,
        key: &PublicKey,
        credits: u8,
        signature: std::result::Result<(), CryptoError>,
    ) -> Result<()> {
        if let Err(err) = signature {
            warn!(%key, %err, "{kind} rejected");
            return Err(err.into());
        }
        match self.credits.charge(key, u64::from(credits)) {
            Ok(remaining) => {
                debug!(%key, credits, remaining, "{kind} accepted");
                Ok(())
            }
            Err(err) => {
                warn!(%key, %err, "{kind} rejected");
                Err(err.into())
            }
        }
    }

    // =========================================================================
    // Period lifecycle
    // =========================================================================

    /// React to a timing event. The last minute of a period also seals it.
    pub fn handle_signal(&mut self, signal: ControlSignal) -> Result<SignalOutcome> {
        match signal {
            ControlSignal::EndOfMinute {
                minute,
                next_db_height,
            } => {
                self.end_minute(minute, next_db_height)?;
                if minute == self.config.minutes_per_period {
                    self.seal_period()?;
                    return Ok(SignalOutcome::PeriodSealed);
                }
                Ok(SignalOutcome::MinuteClosed(minute))
            }
            ControlSignal::CloseBlock => {
                self.seal_period()?;
                Ok(SignalOutcome::PeriodSealed)
            }
        }
    }

    fn end_minute(&mut self, minute: u8, next_db_height: u32) -> Result<()> {
        self.ensure_open()?;
        let expected = self.db_height();
        if next_db_height != expected {
            return Err(SequencerError::HeightMismatch {
                expected,
                actual: next_db_height,
            });
        }
        if minute == 0 || minute > self.config.minutes_per_period {
            return Err(BlockError::InvalidMinute(minute).into());
        }
        if minute <= self.minute {
            return Err(SequencerError::MinuteOutOfOrder {
                last: self.minute,
                minute,
            });
        }

        let mut marked = 0usize;
        for block in self.chains.values_mut().filter_map(|slot| slot.open.as_mut()) {
            block.add_end_of_minute_marker(minute)?;
            marked += 1;
        }
        self.ecblock.add_entry(ECBlockEntry::MinuteNumber(minute));
        self.minute = minute;
        debug!(minute, db_height = expected, marked, "minute closed");
        Ok(())
    }

    /// Seal every open block of the period.
    ///
    /// Nothing is persisted; follow with [`Sequencer::commit_period`] or
    /// [`Sequencer::abandon_period`].
    pub fn seal_period(&mut self) -> Result<&SealedPeriod> {
        if self.sealed.is_some() {
            return Err(SequencerError::AlreadySealed);
        }

        let mut eblocks: Vec<EBlock> = self
            .chains
            .values_mut()
            .filter_map(|slot| slot.open.take())
            .map(EBlockBuilder::seal)
            .collect();
        eblocks.sort_by_key(|block| block.chain_id());

        let fresh = self.fresh_ecblock();
        let mut ecblock = std::mem::replace(&mut self.ecblock, fresh);
        ecblock.compute_body_hash();

        let period = SealedPeriod {
            db_height: ecblock.header.db_height,
            eblocks,
            ecblock,
        };
        info!(
            db_height = period.db_height,
            eblocks = period.eblocks.len(),
            ec_entries = period.ecblock.len(),
            "period sealed"
        );
        Ok(&*self.sealed.insert(period))
    }

    /// Write the sealed period, then advance every chain past its block.
    ///
    /// On a storage failure the period stays sealed and can be retried.
    pub fn commit_period(&mut self, store: &BlockStore<'_>) -> Result<SealedPeriod> {
        let period = self.sealed.as_ref().ok_or(SequencerError::NothingSealed)?;

        let mut advanced = Vec::with_capacity(period.eblocks.len());
        for block in &period.eblocks {
            let mut chain = self
                .chains
                .get(&block.chain_id())
                .map(|slot| slot.chain.clone())
                .unwrap_or_else(|| EChain::new(block.chain_id()));
            chain.advance(block)?;
            if let Some(first) = block.entry_hashes().next() {
                chain.record_first_entry(*first);
            }
            advanced.push(chain);
        }

        if let Err(err) = store.commit_period(&period.eblocks, &advanced, &period.ecblock) {
            warn!(db_height = period.db_height, %err, "period commit failed");
            return Err(err.into());
        }

        let period = self.sealed.take().ok_or(SequencerError::NothingSealed)?;
        for (block, chain) in period.eblocks.iter().zip(advanced) {
            let chain_id = chain.chain_id;
            let slot = self
                .chains
                .entry(chain_id)
                .or_insert_with(|| ChainSlot::new(EChain::new(chain_id)));
            slot.chain = chain;
            slot.last = Some(block.clone());
        }
        self.ecblock = ECBlock::next(&period.ecblock);
        self.last_ecblock = Some(period.ecblock.clone());
        self.committed_credits = self.credits.clone();
        self.minute = 0;

        info!(
            db_height = period.db_height,
            eblocks = period.eblocks.len(),
            key_mr = %period.ecblock.ledger_key_mr(),
            "period committed"
        );
        Ok(period)
    }

    /// Drop the sealed period without writing it.
    ///
    /// Chain heights are untouched and balances return to the last commit.
    /// Entries stay in the storage queue; see [`Sequencer::resubmit_queued`].
    pub fn abandon_period(&mut self) -> Result<SealedPeriod> {
        let period = self.sealed.take().ok_or(SequencerError::NothingSealed)?;
        self.credits = self.committed_credits.clone();
        self.minute = 0;
        warn!(
            db_height = period.db_height,
            eblocks = period.eblocks.len(),
            ec_entries = period.ecblock.len(),
            "sealed period abandoned"
        );
        Ok(period)
    }

    /// Submit every queued entry, oldest first within each chain.
    ///
    /// Meant for a fresh period; entries already in an open block would be
    /// added twice.
    pub fn resubmit_queued(&mut self, store: &BlockStore<'_>) -> Result<usize> {
        let mut count = 0;
        for chain_id in store.queued_chains()? {
            for queued in store.queued_entries(&chain_id)? {
                let entry = store
                    .fetch_entry(&queued.entry_hash)?
                    .ok_or(SequencerError::MissingEntry(queued.entry_hash))?;
                self.submit_entry(&entry)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// An empty entry-credit block following the last committed one.
    fn fresh_ecblock(&self) -> ECBlock {
        match &self.last_ecblock {
            Some(prev) => ECBlock::next(prev),
            None => {
                let mut header = ECBlockHeader::new(self.config.ec_chain_id);
                header.db_height = self.config.start_db_height;
                ECBlock::with_header(header)
            }
        }
    }
}
