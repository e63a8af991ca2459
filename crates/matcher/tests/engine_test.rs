//! End-to-end tests for the matching engine
//!
//! These drive the full pipeline: validated orders are appended to the
//! event log, the orchestrator routes them to per-pair workers, workers
//! mutate books and emit outputs, the dispatcher applies them to the
//! address ledger and forwards settlement instructions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, unbounded};
use crucible_matcher::{
	AddressLedger, EventLog, LocalEventLog, MatcherOrchestrator, MatchingRules,
	MemorySnapshotStore, OrchestratorConfig, OutputDispatcher, ServiceStatus, Settings,
	SnapshotStore,
};
use crucible_sdk::{
	Asset, AssetPair, ExchangeTrade, Order, OrderStatus, PRICE_SCALE, PublicKey, Side, Signature,
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

struct TestEngine {
	orchestrator: MatcherOrchestrator,
	ledger: Arc<AddressLedger>,
	trades: Receiver<ExchangeTrade>,
	_dispatcher: OutputDispatcher,
}

fn start_engine(
	log: Arc<dyn EventLog>,
	snapshots: Arc<dyn SnapshotStore>,
) -> TestEngine {
	let settings = Settings {
		process_consumed_timeout: 2_000,
		start_events_processing_timeout: 5_000,
		snapshots_loading_timeout: 5_000,
		..Settings::default()
	};

	let ledger = Arc::new(AddressLedger::new(settings.address_orders_history_cap));
	{
		let log = log.clone();
		ledger.set_auto_cancel(move |req| {
			let _ = log.append(crucible_matcher::QueueEvent::Canceled {
				pair: req.pair,
				order_id: req.order_id,
				requestor: req.owner,
			});
		});
	}

	let (outputs_tx, outputs_rx) = unbounded();
	let (trades_tx, trades_rx) = unbounded();
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

	TestEngine {
		orchestrator,
		ledger,
		trades: trades_rx,
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

fn wait_processed(engine: &TestEngine, offset: i64) {
	assert!(
		wait_until(Duration::from_secs(5), || {
			engine.orchestrator.last_processed_offset() >= offset
		}),
		"engine did not reach offset {offset}"
	);
}

#[test]
fn test_simple_cross_end_to_end() {
	let log = Arc::new(LocalEventLog::in_memory());
	let engine = start_engine(log, Arc::new(MemorySnapshotStore::new()));
	assert_eq!(engine.orchestrator.status(), ServiceStatus::Working);

	let a_sell = order(1, Side::Sell, 500_000, 2_000 * PRICE_SCALE, 1);
	let b_rest = order(2, Side::Buy, 300_000, 2_000 * PRICE_SCALE, 2);
	let b_take = order(2, Side::Buy, 800_000, 1_000 * PRICE_SCALE, 3);

	engine.orchestrator.place_order(a_sell.clone()).unwrap();
	engine.orchestrator.place_order(b_rest.clone()).unwrap();
	let (offset, _) = engine.orchestrator.place_order(b_take.clone()).unwrap();
	wait_processed(&engine, offset);

	// one trade at the resting price
	let trade = engine
		.trades
		.recv_timeout(Duration::from_secs(5))
		.expect("expected a trade");
	assert_eq!(trade.order_id, b_take.id());
	assert_eq!(trade.counter_id, a_sell.id());
	assert_eq!(trade.price, 500_000);
	assert_eq!(trade.amount, 1_000 * PRICE_SCALE);
	assert!(engine.trades.is_empty());

	// the book rests as sell(1000, 500000); buy(2000, 300000)
	let status = engine.orchestrator.market_status(&test_pair());
	assert_eq!(status.best_ask, Some(500_000));
	assert_eq!(status.best_bid, Some(300_000));

	// B's price-asset reservation is the resting buy's 600_000_000; the
	// taker's reservation was fully released on fill
	let b = PublicKey([2; 32]);
	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&b_take.id()).is_terminal()
	}));
	assert_eq!(
		engine.ledger.reserved(&b).get(&Asset::Native).copied(),
		Some(600_000_000)
	);

	// statuses: taker filled, both resting orders accepted
	assert_eq!(
		engine.ledger.status(&b_take.id()),
		OrderStatus::Filled {
			filled_amount: 1_000 * PRICE_SCALE,
			filled_fee: 300_000
		}
	);
	assert_eq!(engine.ledger.status(&b_rest.id()), OrderStatus::Accepted);
	assert!(matches!(
		engine.ledger.status(&a_sell.id()),
		OrderStatus::PartiallyFilled { .. }
	));

	engine.orchestrator.shutdown();
}

#[test]
fn test_price_time_priority_end_to_end() {
	let log = Arc::new(LocalEventLog::in_memory());
	let engine = start_engine(log, Arc::new(MemorySnapshotStore::new()));

	let first = order(1, Side::Sell, 500_000, 1_000, 1);
	let second = order(2, Side::Sell, 500_000, 1_000, 2);
	engine.orchestrator.place_order(first.clone()).unwrap();
	engine.orchestrator.place_order(second.clone()).unwrap();
	let (offset, _) = engine
		.orchestrator
		.place_order(order(3, Side::Buy, 500_000, 1_000, 3))
		.unwrap();
	wait_processed(&engine, offset);

	let trade = engine.trades.recv_timeout(Duration::from_secs(5)).unwrap();
	// exactly the earlier resting order is consumed
	assert_eq!(trade.counter_id, first.id());
	assert!(engine.trades.is_empty());

	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&first.id()).is_terminal()
	}));
	assert_eq!(engine.ledger.status(&second.id()), OrderStatus::Accepted);

	engine.orchestrator.shutdown();
}

#[test]
fn test_cancel_through_the_log() {
	let log = Arc::new(LocalEventLog::in_memory());
	let engine = start_engine(log, Arc::new(MemorySnapshotStore::new()));

	let sell = order(1, Side::Sell, 500_000, 2_000, 1);
	engine.orchestrator.place_order(sell.clone()).unwrap();
	let (offset, _) = engine
		.orchestrator
		.cancel_order(test_pair(), sell.id(), sell.sender)
		.unwrap();
	wait_processed(&engine, offset);

	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&sell.id())
			== OrderStatus::Cancelled {
				filled_amount: 0,
				filled_fee: 0,
			}
	}));
	assert_eq!(
		engine.orchestrator.market_status(&test_pair()).best_ask,
		None
	);
	assert!(engine.ledger.reserved(&sell.sender).is_empty());

	engine.orchestrator.shutdown();
}

#[test]
fn test_book_deletion_cancels_resting_orders() {
	let log = Arc::new(LocalEventLog::in_memory());
	let engine = start_engine(log, Arc::new(MemorySnapshotStore::new()));

	let sell = order(1, Side::Sell, 500_000, 2_000, 1);
	let buy = order(2, Side::Buy, 400_000, 1_000, 2);
	engine.orchestrator.place_order(sell.clone()).unwrap();
	engine.orchestrator.place_order(buy.clone()).unwrap();
	let (offset, _) = engine.orchestrator.delete_order_book(test_pair()).unwrap();
	wait_processed(&engine, offset);

	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&sell.id()).is_terminal()
			&& engine.ledger.status(&buy.id()).is_terminal()
	}));
	assert_eq!(
		engine.orchestrator.market_status(&test_pair()),
		Default::default()
	);

	engine.orchestrator.shutdown();
}

#[test]
fn test_auto_cancel_cascade_end_to_end() {
	let log = Arc::new(LocalEventLog::in_memory());
	let engine = start_engine(log, Arc::new(MemorySnapshotStore::new()));

	let owner = PublicKey([1; 32]);
	let older = order(1, Side::Sell, 500_000, 1_000, 100);
	let newer = order(1, Side::Sell, 600_000, 1_000, 200);
	engine.orchestrator.place_order(older.clone()).unwrap();
	let (offset, _) = engine.orchestrator.place_order(newer.clone()).unwrap();
	wait_processed(&engine, offset);
	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&newer.id()) == OrderStatus::Accepted
	}));

	// each order reserves 1000 + 300000 fee of the amount asset; the new
	// spendable only covers one
	engine
		.ledger
		.balance_changed(&owner, &AMOUNT_ASSET, 301_000);

	// the youngest order is cancelled through the log
	assert!(wait_until(Duration::from_secs(5), || {
		engine.ledger.status(&newer.id()).is_terminal()
	}));
	assert_eq!(engine.ledger.status(&older.id()), OrderStatus::Accepted);
	assert_eq!(
		engine.ledger.reserved(&owner).get(&AMOUNT_ASSET).copied(),
		Some(301_000)
	);

	engine.orchestrator.shutdown();
}

#[test]
fn test_graceful_shutdown_persists_final_snapshots() {
	let log = Arc::new(LocalEventLog::in_memory());
	let snapshots = Arc::new(MemorySnapshotStore::new());
	let engine = start_engine(log, snapshots.clone());

	assert_eq!(engine.orchestrator.status(), ServiceStatus::Working);
	let (offset, _) = engine
		.orchestrator
		.place_order(order(1, Side::Sell, 500_000, 1_000, 1))
		.unwrap();
	wait_processed(&engine, offset);

	engine.orchestrator.shutdown();

	let snapshot = snapshots.load(&test_pair()).unwrap().expect("final snapshot");
	assert_eq!(snapshot.offset, offset);
	assert_eq!(snapshot.asks.len(), 1);
}
