use entrychain_chain::{ControlSignal, Sequencer, SequencerConfig, SignalOutcome};
use entrychain_core::{
    BinaryMarshal, BinaryUnmarshal, CommitChain, CommitEntry, EBlock, ECBlock, Entry,
    Hash, IncreaseBalance, Keypair, MilliTime,
};
use entrychain_storage::{BlockStore, Storage};

fn chain_id() -> Hash {
    Hash::repeat(0x42)
}

fn entry(n: u8) -> Entry {
    Entry::new(chain_id(), vec![vec![n], b"ext".to_vec()], vec![n; 40])
}

fn end_of_minute(minute: u8, next_db_height: u32) -> ControlSignal {
    ControlSignal::EndOfMinute {
        minute,
        next_db_height,
    }
}

#[test]
fn test_full_period_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = Keypair::generate();
    let config = SequencerConfig {
        start_db_height: 100,
        ..SequencerConfig::default()
    };

    let committed = {
        let storage = Storage::open(dir.path()).unwrap();
        let store = BlockStore::new(&storage);
        let mut seq = Sequencer::restore(config.clone(), &store).unwrap();
        assert_eq!(seq.db_height(), 100);

        seq.submit_increase_balance(IncreaseBalance::new(
            keypair.public_key,
            Hash::repeat(7),
            30,
        ))
        .unwrap();

        // one entry in each of the first three minutes
        for minute in 1..=10u8 {
            if minute <= 3 {
                let e = entry(minute);
                store.insert_entry_and_queue(&e, u64::from(minute)).unwrap();
                let hash = seq.submit_entry(&e).unwrap();
                if minute == 1 {
                    let commit = CommitChain::new(&chain_id(), hash, 11, MilliTime::from_millis(1));
                    seq.submit_commit_chain(commit.signed(&keypair)).unwrap();
                } else {
                    let millis = MilliTime::from_millis(u64::from(minute));
                    let commit = CommitEntry::new(hash, 1, millis);
                    seq.submit_commit_entry(commit.signed(&keypair)).unwrap();
                }
            }
            let outcome = seq.handle_signal(end_of_minute(minute, 100)).unwrap();
            if minute == 10 {
                assert_eq!(outcome, SignalOutcome::PeriodSealed);
            } else {
                assert_eq!(outcome, SignalOutcome::MinuteClosed(minute));
            }
        }

        let period = seq.commit_period(&store).unwrap();
        assert_eq!(seq.balance(&keypair.public_key), 30 - 11 - 1 - 1);
        storage.flush().unwrap();
        period
    };

    let block = &committed.eblocks[0];
    let buckets = block.minute_buckets();
    assert_eq!(buckets.len(), 10);
    for (i, bucket) in buckets.iter().enumerate() {
        assert_eq!(bucket.minute, Some(i as u8 + 1));
        assert_eq!(bucket.entries.len(), usize::from(i < 3));
    }
    // 1 balance increase + 3 commits + 10 minute numbers
    assert_eq!(committed.ecblock.len(), 14);

    let storage = Storage::open(dir.path()).unwrap();
    let store = BlockStore::new(&storage);

    let stored = store.get_eblock(&block.key_mr()).unwrap().unwrap();
    assert_eq!(&stored, block);
    assert_eq!(EBlock::unmarshal(&stored.marshal()).unwrap(), stored);
    assert_eq!(
        store.get_eblock_by_sequence(&chain_id(), 0).unwrap().as_ref(),
        Some(block)
    );
    let head = store.get_ec_head().unwrap().unwrap();
    assert_eq!(head, committed.ecblock);
    assert_eq!(ECBlock::unmarshal(&head.marshal()).unwrap(), head);

    let seq = Sequencer::restore(config, &store).unwrap();
    assert_eq!(seq.db_height(), 101);
    assert_eq!(seq.balance(&keypair.public_key), 17);
    let chain = seq.chain(&chain_id()).unwrap();
    assert_eq!(chain.next_block_height, 1);
    assert_eq!(chain.first_entry, Some(entry(1).hash()));
    assert!(seq.open_block(&chain_id()).is_none());
}
