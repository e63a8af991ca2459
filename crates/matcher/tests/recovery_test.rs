//! Crash-recovery and replay-determinism tests
//!
//! The event log is the source of truth: a restarted engine must rebuild
//! the exact same books from its last snapshot plus the log tail, and two
//! fresh engines fed the same log prefix must converge to identical state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use crucible_matcher::{
	AddressLedger, EventLog, LocalEventLog, MatcherOrchestrator, MatchingRules,
	MemorySnapshotStore, OrchestratorConfig, OutputDispatcher, QueueEvent, Settings,
	SnapshotStore,
};
use crucible_sdk::{
	Asset, AssetPair, Order, OrderStatus, PublicKey, Side, Signature,
};

const AMOUNT_ASSET: Asset = Asset::Issued([3; 32]);

fn test_pair() -> AssetPair {
	AssetPair::new(AMOUNT_ASSET, Asset::Native).unwrap()
}

fn order(owner: u8, side: Side, price: u64, amount: u64, ts: u64) -> Order {
	Order {
		version: 3,
		sender: PublicKey([owner; 32]),
		matcher: PublicKey([0x4D; 32]),
		pair: test_pair(),
		side,
		price,
		amount,
		fee: 300_000,
		fee_asset: AMOUNT_ASSET,
		// log timestamps are wall clock; keep expirations far in the future
		timestamp: 1_700_000_000_000 + ts,
		expiration: 4_000_000_000_000,
		signature: Signature([owner; 64]),
	}
}

struct Engine {
	orchestrator: MatcherOrchestrator,
	ledger: Arc<AddressLedger>,
	_dispatcher: OutputDispatcher,
}

fn start_engine(log: Arc<dyn EventLog>, snapshots: Arc<dyn SnapshotStore>) -> Engine {
	let settings = Settings {
		process_consumed_timeout: 2_000,
		start_events_processing_timeout: 5_000,
		snapshots_loading_timeout: 5_000,
		snapshots_interval: 2,
		..Settings::default()
	};
	let ledger = Arc::new(AddressLedger::new(settings.address_orders_history_cap));
	let (outputs_tx, outputs_rx) = unbounded();
	let (trades_tx, _trades_rx) = unbounded();
	let dispatcher = OutputDispatcher::start(outputs_rx, ledger.clone(), trades_tx);
	let orchestrator = MatcherOrchestrator::start(
		OrchestratorConfig::from_settings(&settings).unwrap(),
		MatchingRules::default(),
		log,
		snapshots,
		&ledger,
		outputs_tx,
	)
	.unwrap();
	Engine {
		orchestrator,
		ledger,
		_dispatcher: dispatcher,
	}
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
	let end = Instant::now() + deadline;
	while Instant::now() < end {
		if check() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(10));
	}
	check()
}

#[test]
fn test_replay_after_crash_from_empty_snapshot() {
	// the log survives the crash, snapshots do not
	let log = Arc::new(LocalEventLog::in_memory());
	let o1 = order(1, Side::Sell, 500_000, 1_000, 1);
	let o2 = order(2, Side::Sell, 600_000, 1_000, 2);
	log.append(QueueEvent::Placed(o1.clone())).unwrap();
	log.append(QueueEvent::Placed(o2.clone())).unwrap();
	log.append(QueueEvent::Canceled {
		pair: test_pair(),
		order_id: o1.id(),
		requestor: o1.sender,
	})
	.unwrap();

	let engine = start_engine(log.clone(), Arc::new(MemorySnapshotStore::new()));

	// startup blocked until the whole backlog was applied
	assert_eq!(
		engine.orchestrator.last_processed_offset(),
		log.end_offset().unwrap()
	);

	// only O2 remains, untouched
	let status = engine.orchestrator.market_status(&test_pair());
	assert_eq!(status.best_ask, Some(600_000));
	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&o2.id()) == OrderStatus::Accepted
	}));
	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&o1.id()).is_terminal()
	}));

	engine.orchestrator.shutdown();
}

#[test]
fn test_restart_restores_books_and_reservations_from_snapshot() {
	let log = Arc::new(LocalEventLog::in_memory());
	let snapshots = Arc::new(MemorySnapshotStore::new());

	let sell = order(1, Side::Sell, 500_000, 2_000, 1);
	let buy = order(2, Side::Buy, 500_000, 500, 2);
	{
		let engine = start_engine(log.clone(), snapshots.clone());
		engine.orchestrator.place_order(sell.clone()).unwrap();
		let (offset, _) = engine.orchestrator.place_order(buy.clone()).unwrap();
		assert!(wait_until(Duration::from_secs(5), || {
			engine.orchestrator.last_processed_offset() >= offset
		}));
		// graceful stop persists the final snapshot
		engine.orchestrator.shutdown();
	}

	let snapshot = snapshots.load(&test_pair()).unwrap().expect("snapshot");
	assert_eq!(snapshot.offset, 1);

	let engine = start_engine(log, snapshots);
	let status = engine.orchestrator.market_status(&test_pair());
	assert_eq!(status.best_ask, Some(500_000));

	// the ledger is reseeded from the restored book: the partially
	// filled sell still locks its remaining amount and fee
	assert_eq!(
		engine.ledger.status(&sell.id()),
		OrderStatus::PartiallyFilled {
			filled_amount: 500,
			filled_fee: 75_000
		}
	);
	let reserved = engine.ledger.reserved(&sell.sender);
	assert_eq!(
		reserved.get(&AMOUNT_ASSET).copied(),
		Some(1_500 + 225_000)
	);

	// the fully filled buy is not part of the restored state
	assert_eq!(engine.ledger.status(&buy.id()), OrderStatus::NotFound);

	engine.orchestrator.shutdown();
}

#[test]
fn test_replay_is_deterministic_across_fresh_engines() {
	let log = Arc::new(LocalEventLog::in_memory());
	for i in 0..10u64 {
		let side = if i % 2 == 0 { Side::Sell } else { Side::Buy };
		let owner = (i % 3) as u8 + 1;
		let event = QueueEvent::Placed(order(
			owner,
			side,
			400_000 + 50_000 * (i % 4),
			1_000 + 100 * i,
			i,
		));
		log.append(event).unwrap();
	}

	let first = start_engine(log.clone(), Arc::new(MemorySnapshotStore::new()));
	let second = start_engine(log.clone(), Arc::new(MemorySnapshotStore::new()));

	assert_eq!(
		first.orchestrator.last_processed_offset(),
		second.orchestrator.last_processed_offset()
	);
	assert_eq!(
		first.orchestrator.market_status(&test_pair()),
		second.orchestrator.market_status(&test_pair())
	);

	// the per-order views agree as well
	for i in 0..10u64 {
		let side = if i % 2 == 0 { Side::Sell } else { Side::Buy };
		let owner = (i % 3) as u8 + 1;
		let id = order(owner, side, 400_000 + 50_000 * (i % 4), 1_000 + 100 * i, i).id();
		assert!(wait_until(Duration::from_secs(5), || {
			first.ledger.status(&id) == second.ledger.status(&id)
		}));
	}

	first.orchestrator.shutdown();
	second.orchestrator.shutdown();
}

#[test]
fn test_snapshot_cadence_bounds_replay_window() {
	let log = Arc::new(LocalEventLog::in_memory());
	let snapshots = Arc::new(MemorySnapshotStore::new());

	{
		let engine = start_engine(log.clone(), snapshots.clone());
		// snapshots-interval is 2: offsets 0..=3 leave a snapshot at 3
		for i in 0..4u64 {
			engine
				.orchestrator
				.place_order(order(1, Side::Sell, 500_000 + i, 100, i))
				.unwrap();
		}
		assert!(wait_until(Duration::from_secs(5), || {
			engine.orchestrator.last_processed_offset() >= 3
		}));
		assert!(wait_until(Duration::from_secs(5), || {
			snapshots
				.load(&test_pair())
				.unwrap()
				.is_some_and(|s| s.offset >= 1)
		}));
		// crash without a final snapshot
		drop(engine);
	}

	// restart replays only the gap and converges to the full book
	let engine = start_engine(log, snapshots);
	assert_eq!(engine.orchestrator.last_processed_offset(), 3);
	let status = engine.orchestrator.market_status(&test_pair());
	assert_eq!(status.best_ask, Some(500_000));

	engine.orchestrator.shutdown();
}
