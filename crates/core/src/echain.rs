//! Entry chains: identity and block height of one chain.

use crate::eblock::{BlockError, EBlock, EBlockBuilder};
use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// A chain and the height of the next block to be created for it.
///
/// `next_block_height == 0` means no block exists yet, so the next block
/// is the origin block and must not have a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EChain {
    pub chain_id: Hash,
    pub next_block_height: u32,
    /// Hash of the first entry ever written to this chain.
    pub first_entry: Option<Hash>,
}

impl EChain {
    pub fn new(chain_id: Hash) -> Self {
        Self {
            chain_id,
            next_block_height: 0,
            first_entry: None,
        }
    }

    /// Whether the next block is this chain's origin block.
    pub fn is_fresh(&self) -> bool {
        self.next_block_height == 0
    }

    /// Start a new block linked to `previous`.
    ///
    /// The chain itself is not modified; call [`EChain::advance`] once the
    /// sealed block has been durably written.
    pub fn create_block(
        &self,
        previous: Option<&EBlock>,
        capacity: usize,
    ) -> Result<EBlockBuilder, BlockError> {
        match previous {
            None if self.next_block_height != 0 => {
                Err(BlockError::InvalidLinkage("previous block cannot be empty"))
            }
            Some(_) if self.next_block_height == 0 => Err(BlockError::InvalidLinkage(
                "origin block cannot have a parent block",
            )),
            Some(prev) if prev.chain_id() != self.chain_id => Err(BlockError::InvalidLinkage(
                "previous block belongs to another chain",
            )),
            Some(prev) => Ok(EBlockBuilder::new(
                self.chain_id,
                self.next_block_height,
                prev.key_mr(),
                prev.header_hash(),
                capacity,
            )),
            None => Ok(EBlockBuilder::new(
                self.chain_id,
                0,
                Hash::ZERO,
                Hash::ZERO,
                capacity,
            )),
        }
    }

    /// Move the height past `sealed`, which must be the block created at
    /// the current height.
    pub fn advance(&mut self, sealed: &EBlock) -> Result<(), BlockError> {
        if sealed.chain_id() != self.chain_id {
            return Err(BlockError::InvalidLinkage(
                "sealed block belongs to another chain",
            ));
        }
        if sealed.eb_sequence() != self.next_block_height {
            return Err(BlockError::InvalidLinkage(
                "sealed block is not at the chain height",
            ));
        }
        self.next_block_height += 1;
        Ok(())
    }

    /// Remember the first entry hash; later calls are ignored.
    pub fn record_first_entry(&mut self, entry_hash: Hash) {
        if self.first_entry.is_none() {
            self.first_entry = Some(entry_hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> EChain {
        EChain::new(Hash::repeat(0x42))
    }

    #[test]
    fn test_origin_block() {
        let chain = chain();
        assert!(chain.is_fresh());
        let builder = chain.create_block(None, 4).unwrap();
        assert_eq!(builder.eb_sequence(), 0);
        assert_eq!(builder.header().prev_hash, Hash::ZERO);
        assert_eq!(builder.header().prev_key_mr, Hash::ZERO);
        assert!(builder.is_empty());
        // creating a block has no effect on the chain
        assert_eq!(chain.next_block_height, 0);
    }

    #[test]
    fn test_missing_parent_fails() {
        let mut chain = chain();
        chain.next_block_height = 3;
        assert!(matches!(
            chain.create_block(None, 0),
            Err(BlockError::InvalidLinkage(_))
        ));
    }

    #[test]
    fn test_origin_with_parent_fails() {
        let mut other = chain();
        let parent = other.create_block(None, 0).unwrap().seal();
        other.advance(&parent).unwrap();

        let fresh = chain();
        assert!(matches!(
            fresh.create_block(Some(&parent), 0),
            Err(BlockError::InvalidLinkage(_))
        ));
    }

    #[test]
    fn test_parent_from_other_chain_fails() {
        let mut a = EChain::new(Hash::repeat(1));
        let block = a.create_block(None, 0).unwrap().seal();
        a.advance(&block).unwrap();

        let mut b = EChain::new(Hash::repeat(2));
        b.next_block_height = 1;
        assert!(b.create_block(Some(&block), 0).is_err());
    }

    #[test]
    fn test_sequence_monotonic() {
        let mut chain = chain();
        let mut previous: Option<EBlock> = None;
        let mut sequences = Vec::new();

        for i in 0..5u8 {
            let mut builder = chain.create_block(previous.as_ref(), 1).unwrap();
            builder.add_entry_hash(Hash::repeat(i + 1));
            let sealed = builder.seal();
            if let Some(prev) = &previous {
                assert_eq!(sealed.header().prev_key_mr, prev.key_mr());
                assert_eq!(sealed.header().prev_hash, prev.header_hash());
            }
            chain.advance(&sealed).unwrap();
            sequences.push(sealed.eb_sequence());
            previous = Some(sealed);
        }

        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(chain.next_block_height, 5);
    }

    #[test]
    fn test_advance_rejects_stale_block() {
        let mut chain = chain();
        let block = chain.create_block(None, 0).unwrap().seal();
        chain.advance(&block).unwrap();
        assert!(chain.advance(&block).is_err());
        assert_eq!(chain.next_block_height, 1);
    }

    #[test]
    fn test_first_entry_recorded_once() {
        let mut chain = chain();
        chain.record_first_entry(Hash::repeat(7));
        chain.record_first_entry(Hash::repeat(8));
        assert_eq!(chain.first_entry, Some(Hash::repeat(7)));
    }
}
