//! End-to-end pipeline scenarios against the in-memory store.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tickwatch_network::ConnectionPool;
use tickwatch_pipeline::runtime::{PipelineConfig, Runtime};
use tickwatch_pipeline::{indexer, processor, reconciler, verifier};
use tickwatch_storage::{MemoryTickStore, TickStore};
use tickwatch_types::crypto::NodeKeys;
use tickwatch_types::tick::WallClock;
use tickwatch_types::wire::frame;
use tickwatch_types::{
    Committee, Digest, LogEvent, LogIdRange, LogType, PacketType, TickData, TickLogRanges,
    TickVote, NUMBER_OF_COMPUTORS, QUORUM,
};

const EPOCH: u16 = 100;
const TICK: u32 = 1000;

struct Harness {
    runtime: Arc<Runtime>,
    seat_keys: Vec<NodeKeys>,
}

fn seat_key(index: usize) -> NodeKeys {
    NodeKeys::from_seed(&format!("{index:055}"))
}

fn harness() -> Harness {
    let seat_keys: Vec<NodeKeys> = (0..NUMBER_OF_COMPUTORS).map(seat_key).collect();
    let arbitrator = NodeKeys::from_seed("arbitrator");

    let mut committee = Committee {
        epoch: EPOCH,
        public_keys: seat_keys.iter().map(|k| k.public_key()).collect(),
        signature: [0u8; 64],
    };
    committee.signature = arbitrator.sign(&committee.signing_digest());

    let config = PipelineConfig {
        arbitrator: arbitrator.public_key(),
        ..PipelineConfig::default()
    };
    let runtime = Arc::new(Runtime::new(
        config,
        Arc::new(MemoryTickStore::new()),
        None,
        Arc::new(ConnectionPool::default()),
    ));
    runtime.set_epoch(EPOCH);
    runtime.install_committee(committee);
    runtime.initial_tick.store(TICK, Ordering::Release);
    runtime.frontiers.fetch.store(TICK - 1, Ordering::Release);
    runtime.frontiers.verify.store(TICK - 1, Ordering::Release);
    runtime.frontiers.log_fetch.store(TICK - 1, Ordering::Release);
    runtime.frontiers.log_verify.store(TICK - 1, Ordering::Release);
    runtime.frontiers.index.store(TICK - 1, Ordering::Release);

    Harness { runtime, seat_keys }
}

fn tick_data_with(digests: Vec<Digest>) -> TickData {
    TickData {
        computor_index: 12,
        epoch: EPOCH,
        tick: TICK,
        clock: WallClock {
            millisecond: 0,
            second: 0,
            minute: 30,
            hour: 12,
            day: 1,
            month: 6,
            year: 26,
        },
        timelock: [7u8; 32],
        transaction_digests: digests,
        contract_fees: vec![],
        signature: [0u8; 64],
    }
}

fn signed_vote(keys: &NodeKeys, index: u16, transaction_digest: Digest) -> TickVote {
    let mut vote = TickVote {
        computor_index: index,
        epoch: EPOCH,
        tick: TICK,
        clock: WallClock::default(),
        prev_resource_testing_digest: 1,
        salted_resource_testing_digest: 2,
        prev_transaction_body_digest: 3,
        salted_transaction_body_digest: 4,
        prev_spectrum_digest: [10u8; 32],
        prev_universe_digest: [11u8; 32],
        prev_computer_digest: [12u8; 32],
        salted_spectrum_digest: [13u8; 32],
        salted_universe_digest: [14u8; 32],
        salted_computer_digest: [15u8; 32],
        transaction_digest,
        expected_next_tick_transaction_digest: [16u8; 32],
        signature: [0u8; 64],
    };
    vote.signature = keys.sign(&vote.signing_digest());
    vote
}

async fn feed_votes(
    harness: &Harness,
    indexes: std::ops::Range<usize>,
    transaction_digest: Digest,
) {
    for i in indexes {
        let vote = signed_vote(&harness.seat_keys[i], i as u16, transaction_digest);
        let packet = frame(PacketType::TickVote, 0, &vote.encode());
        processor::process_packet(&harness.runtime, &packet)
            .await
            .unwrap();
    }
}

fn transfer_log(log_id: u64, amount: i64) -> LogEvent {
    let mut body = Vec::new();
    body.extend_from_slice(&[1u8; 32]);
    body.extend_from_slice(&[2u8; 32]);
    body.extend_from_slice(&amount.to_le_bytes());
    LogEvent {
        epoch: EPOCH,
        tick: TICK,
        log_type: LogType::QuTransfer as u8,
        log_id,
        log_digest: 0,
        body,
    }
}

fn ranges_for_five_logs() -> TickLogRanges {
    let mut ranges = TickLogRanges::empty(TICK);
    ranges.ranges[0] = LogIdRange {
        from_log_id: 100,
        length: 3,
    };
    ranges.ranges[1] = LogIdRange {
        from_log_id: 103,
        length: 2,
    };
    ranges.aggregate = LogIdRange {
        from_log_id: 100,
        length: 5,
    };
    ranges.aggregate_byte_size = (0..5).map(|i| transfer_log(100 + i, 1).byte_len() as u64).sum();
    ranges
}

#[tokio::test]
async fn quorum_admission_advances_verify_frontier() {
    let h = harness();
    let td = tick_data_with(vec![[3u8; 32], [4u8; 32]]);
    let consensus_digest = td.transaction_set_digest();

    let packet = frame(PacketType::TickData, 0, &td.encode());
    processor::process_packet(&h.runtime, &packet).await.unwrap();
    feed_votes(&h, 0..QUORUM, consensus_digest).await;

    assert!(verifier::admit_next(&h.runtime).await.unwrap());
    assert_eq!(h.runtime.frontiers.verify.load(Ordering::Acquire), TICK);

    let canonical = h
        .runtime
        .store
        .get_canonical_tick_data(TICK)
        .await
        .unwrap()
        .expect("canonical tick data must be promoted");
    assert_eq!(canonical.transaction_set_digest(), consensus_digest);
    assert!(h.runtime.store.is_tick_verified(TICK).await.unwrap());
    assert_eq!(h.runtime.store.tick_vote_count(TICK).await.unwrap(), QUORUM);
}

#[tokio::test]
async fn byzantine_minority_is_counted_and_ignored() {
    let h = harness();
    let td = tick_data_with(vec![[3u8; 32]]);
    let consensus_digest = td.transaction_set_digest();
    let minority_digest = [9u8; 32];

    let packet = frame(PacketType::TickData, 0, &td.encode());
    processor::process_packet(&h.runtime, &packet).await.unwrap();
    feed_votes(&h, 0..QUORUM, consensus_digest).await;
    feed_votes(&h, QUORUM..NUMBER_OF_COMPUTORS, minority_digest).await;

    assert!(verifier::admit_next(&h.runtime).await.unwrap());
    assert_eq!(h.runtime.frontiers.verify.load(Ordering::Acquire), TICK);

    let canonical = h
        .runtime
        .store
        .get_canonical_tick_data(TICK)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(canonical.transaction_set_digest(), consensus_digest);
    assert_ne!(canonical.transaction_set_digest(), minority_digest);
    assert_eq!(
        h.runtime.tallies.byzantine_suspect.load(Ordering::Relaxed),
        (NUMBER_OF_COMPUTORS - QUORUM) as u64
    );
}

#[tokio::test]
async fn invalid_vote_signatures_never_reach_storage() {
    let h = harness();
    let mut vote = signed_vote(&h.seat_keys[3], 3, [1u8; 32]);
    vote.signature = [0xAB; 64];
    let packet = frame(PacketType::TickVote, 0, &vote.encode());
    processor::process_packet(&h.runtime, &packet).await.unwrap();

    assert_eq!(h.runtime.store.tick_vote_count(TICK).await.unwrap(), 0);
    assert_eq!(
        h.runtime.tallies.invalid_signature.load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn vote_from_wrong_seat_is_rejected() {
    let h = harness();
    // Seat 5's key signing a vote that claims seat 6.
    let vote = signed_vote(&h.seat_keys[5], 6, [1u8; 32]);
    let packet = frame(PacketType::TickVote, 0, &vote.encode());
    processor::process_packet(&h.runtime, &packet).await.unwrap();
    assert_eq!(h.runtime.store.tick_vote_count(TICK).await.unwrap(), 0);
}

#[tokio::test]
async fn log_range_reconciliation_and_hole_refill() {
    let h = harness();
    // Admit the tick first so the reconciler may look at it.
    let td = tick_data_with(vec![[3u8; 32], [4u8; 32]]);
    let consensus = td.transaction_set_digest();
    processor::process_packet(&h.runtime, &frame(PacketType::TickData, 0, &td.encode()))
        .await
        .unwrap();
    feed_votes(&h, 0..QUORUM, consensus).await;
    assert!(verifier::admit_next(&h.runtime).await.unwrap());

    h.runtime
        .store
        .insert_log_ranges(&ranges_for_five_logs())
        .await
        .unwrap();

    // Supply all logs except id 102: the frontier must stall.
    for id in [100u64, 101, 103, 104] {
        let log = transfer_log(id, 10);
        h.runtime
            .store
            .insert_log(EPOCH, id, &log.encode())
            .await
            .unwrap();
    }
    assert!(!reconciler::reconcile_next(&h.runtime).await.unwrap());
    assert_eq!(
        h.runtime.frontiers.log_verify.load(Ordering::Acquire),
        TICK - 1
    );

    // Re-supplying the missing id unsticks it.
    let log = transfer_log(102, 10);
    h.runtime
        .store
        .insert_log(EPOCH, 102, &log.encode())
        .await
        .unwrap();
    assert!(reconciler::reconcile_next(&h.runtime).await.unwrap());
    assert_eq!(h.runtime.frontiers.log_verify.load(Ordering::Acquire), TICK);

    // Verified transfers reached the entity ledger.
    let receiver = tickwatch_types::identity::identity_from_public_key(&[2u8; 32], false);
    let balance = h.runtime.ledger.balance(&receiver).unwrap();
    assert_eq!(balance.number_of_incoming_transfers, 5);
}

#[tokio::test]
async fn declared_byte_size_mismatch_blocks_advancement() {
    let h = harness();
    let td = tick_data_with(vec![]);
    let consensus = td.transaction_set_digest();
    processor::process_packet(&h.runtime, &frame(PacketType::TickData, 0, &td.encode()))
        .await
        .unwrap();
    feed_votes(&h, 0..QUORUM, consensus).await;
    assert!(verifier::admit_next(&h.runtime).await.unwrap());

    let mut ranges = ranges_for_five_logs();
    ranges.aggregate_byte_size += 1;
    h.runtime.store.insert_log_ranges(&ranges).await.unwrap();
    for id in 100u64..=104 {
        let log = transfer_log(id, 10);
        h.runtime
            .store
            .insert_log(EPOCH, id, &log.encode())
            .await
            .unwrap();
    }
    assert!(!reconciler::reconcile_next(&h.runtime).await.unwrap());
    assert_eq!(
        h.runtime.frontiers.log_verify.load(Ordering::Acquire),
        TICK - 1
    );
}

#[tokio::test]
async fn indexing_is_idempotent() {
    let h = harness();
    let tx_digest = [3u8; 32];
    let td = tick_data_with(vec![tx_digest]);
    let consensus = td.transaction_set_digest();
    processor::process_packet(&h.runtime, &frame(PacketType::TickData, 0, &td.encode()))
        .await
        .unwrap();
    feed_votes(&h, 0..QUORUM, consensus).await;
    assert!(verifier::admit_next(&h.runtime).await.unwrap());

    h.runtime
        .store
        .insert_log_ranges(&ranges_for_five_logs())
        .await
        .unwrap();
    for id in 100u64..=104 {
        let log = transfer_log(id, 10);
        h.runtime
            .store
            .insert_log(EPOCH, id, &log.encode())
            .await
            .unwrap();
    }
    assert!(reconciler::reconcile_next(&h.runtime).await.unwrap());
    assert!(indexer::index_next(&h.runtime).await.unwrap());
    assert_eq!(h.runtime.frontiers.index.load(Ordering::Acquire), TICK);

    let hash = tickwatch_types::identity::identity_from_public_key(&tx_digest, true);
    let first = h.runtime.store.get_indexed_tx(&hash).await.unwrap().unwrap();
    let sender = tickwatch_types::identity::identity_from_public_key(&[1u8; 32], false);
    let first_transfers = h
        .runtime
        .store
        .get_transfer_index(&sender, "")
        .await
        .unwrap();

    // Replaying the same tick must not change any index entry.
    indexer::index_tick(&h.runtime, TICK).await.unwrap();
    let second = h.runtime.store.get_indexed_tx(&hash).await.unwrap().unwrap();
    let second_transfers = h
        .runtime
        .store
        .get_transfer_index(&sender, "")
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first_transfers, second_transfers);
    assert_eq!(first.from_log_id, 100);
    assert_eq!(first.to_log_id, 102);
    assert!(first.executed);
}

#[tokio::test]
async fn frontier_dominance_holds() {
    let h = harness();
    let td = tick_data_with(vec![]);
    let consensus = td.transaction_set_digest();
    processor::process_packet(&h.runtime, &frame(PacketType::TickData, 0, &td.encode()))
        .await
        .unwrap();
    feed_votes(&h, 0..QUORUM, consensus).await;
    assert!(verifier::admit_next(&h.runtime).await.unwrap());
    h.runtime
        .store
        .insert_log_ranges(&TickLogRanges::empty(TICK))
        .await
        .unwrap();
    assert!(reconciler::reconcile_next(&h.runtime).await.unwrap());
    assert!(indexer::index_next(&h.runtime).await.unwrap());

    let fetch = h.runtime.frontiers.fetch.load(Ordering::Acquire);
    let verify = h.runtime.frontiers.verify.load(Ordering::Acquire);
    let log_verify = h.runtime.frontiers.log_verify.load(Ordering::Acquire);
    let index = h.runtime.frontiers.index.load(Ordering::Acquire);
    assert!(index <= verify.min(log_verify));
    assert!(verify.min(log_verify) <= fetch);
}

#[tokio::test]
async fn graceful_shutdown_joins_every_stage() {
    let h = harness();
    let mut tasks = Vec::new();
    for _ in 0..4 {
        tasks.push(tokio::spawn(processor::run_data_worker(h.runtime.clone())));
    }
    tasks.push(tokio::spawn(verifier::run_verifier(h.runtime.clone())));
    tasks.push(tokio::spawn(reconciler::run_reconciler(h.runtime.clone())));
    tasks.push(tokio::spawn(indexer::run_indexer(h.runtime.clone())));

    // Mid-flight traffic.
    let td = tick_data_with(vec![[3u8; 32]]);
    h.runtime
        .buffers
        .data
        .push(frame(PacketType::TickData, 0, &td.encode()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.runtime.shutdown.cancel();
    h.runtime.buffers.close_all();

    let all = futures_join(tasks);
    tokio::time::timeout(Duration::from_secs(3), all)
        .await
        .expect("all stages must exit within three seconds");

    // The worker drained the packet before exiting.
    assert!(h.runtime.store.has_tick_data(TICK).await.unwrap());
}

async fn futures_join(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}
