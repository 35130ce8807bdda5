//! End-to-end engine behavior over [`MockLedger`]:
//! - single-flight reconcile and timeout cleanup
//! - backfill vs repair writes of curve parameters
//! - bounded multi-pool reads
//! - settlement cooldown serialization
//! - decay projection source selection
//! - presentation views and discrepancy flags

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use futures_util::future::join_all;

use super::{curve_pool, MockLedger, NOW};
use crate::consts::{SECONDS_PER_DAY, TOKEN_SCALE};
use crate::engine::math::encode_price_micro;
use crate::engine::{
    CacheStore, DecayEngine, DecayParams, DecaySource, Discrepancy, InMemoryCache,
    JsonFileCache, PoolDisplay, PoolViewService, ReconcileStatus, Reconciler,
    SettlementCoordinator, SettlementEngine,
};
use crate::ledger::LedgerReader;
use crate::types::{CacheField, CurveFields, CurveParams, PoolId, PoolPhase, Side};
use crate::Error;

const ONE: u128 = TOKEN_SCALE;
const BUDGET: Duration = Duration::from_secs(1);

fn reader(ledger: &Arc<MockLedger>) -> LedgerReader {
    LedgerReader::new(ledger.clone())
}

fn reconciler(ledger: &Arc<MockLedger>) -> (Reconciler, Arc<InMemoryCache>) {
    let store = Arc::new(InMemoryCache::new());
    (Reconciler::new(reader(ledger), store.clone()), store)
}

// =========================================================================
// Reconcile
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_syncs_share_one_fetch() {
    let ledger = Arc::new(MockLedger::new().with_delay(Duration::from_millis(50)));
    let pool = curve_pool(1, 710 * ONE, 1575 * ONE);
    ledger.put(pool.clone());
    let (reconciler, store) = reconciler(&ledger);

    let outcomes = join_all((0..10).map(|_| reconciler.sync(pool.pool_id, BUDGET))).await;

    assert_eq!(ledger.calls(), 1);
    assert!(outcomes.iter().all(|o| o.is_applied()));
    assert_eq!(outcomes.iter().filter(|o| o.shared).count(), 9);
    assert!(outcomes.windows(2).all(|w| w[0].record == w[1].record));
    assert!(!reconciler.is_in_flight(&pool.pool_id));

    let metrics = reconciler.metrics().snapshot();
    assert_eq!(metrics.fetches, 1);
    assert_eq!(metrics.deduplicated, 9);
    assert_eq!(metrics.applied, 1);

    let row = store.get(pool.pool_id).await.unwrap().unwrap();
    assert_eq!(row.supply_long, 710 * ONE);
    assert_eq!(row.last_synced_at, Some(NOW));
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let ledger = Arc::new(MockLedger::new());
    let pool = curve_pool(2, 5 * ONE, 3 * ONE);
    ledger.put(pool.clone());
    let (reconciler, store) = reconciler(&ledger);

    let first = reconciler.sync(pool.pool_id, BUDGET).await;
    let second = reconciler.sync(pool.pool_id, BUDGET).await;

    assert!(first.is_applied() && second.is_applied());
    assert!(!second.shared);
    assert!(!first.applied.changed.is_empty());
    assert!(second.applied.changed.is_empty());
    assert_eq!(first.record, second.record);
    assert_eq!(store.list().await.unwrap().len(), 1);
    assert_eq!(ledger.calls(), 2);
}

#[tokio::test]
async fn test_backfill_keeps_curve_until_force_resync() {
    let ledger = Arc::new(MockLedger::new());
    let mut pool = curve_pool(3, 10 * ONE, 10 * ONE);
    ledger.put(pool.clone());
    let (reconciler, store) = reconciler(&ledger);

    reconciler.sync(pool.pool_id, BUDGET).await;

    pool.curve.scale_micro = Some(2_000_000);
    pool.supply_long = 11 * ONE;
    ledger.put(pool.clone());

    let backfilled = reconciler.sync(pool.pool_id, BUDGET).await;
    assert!(backfilled.is_applied());
    assert!(backfilled.applied.changed.contains(&CacheField::SupplyLong));
    assert!(!backfilled.applied.contains(CacheField::CurveScale));
    let row = store.get(pool.pool_id).await.unwrap().unwrap();
    assert_eq!(row.scale_micro, Some(1_000_000));
    assert_eq!(row.supply_long, 11 * ONE);

    let repaired = reconciler.force_resync(pool.pool_id, BUDGET).await.unwrap();
    assert!(repaired.applied.changed.contains(&CacheField::CurveScale));
    let row = store.get(pool.pool_id).await.unwrap().unwrap();
    assert_eq!(row.scale_micro, Some(2_000_000));
}

#[tokio::test(start_paused = true)]
async fn test_sync_timeout_leaves_cache_untouched() {
    let ledger = Arc::new(MockLedger::new().with_delay(Duration::from_secs(5)));
    let pool = curve_pool(4, ONE, ONE);
    ledger.put(pool.clone());
    let (reconciler, store) = reconciler(&ledger);

    let outcome = reconciler
        .sync(pool.pool_id, Duration::from_millis(100))
        .await;

    match &outcome.status {
        ReconcileStatus::NoOp { timed_out, .. } => assert!(*timed_out),
        other => panic!("expected timeout no-op, got {other:?}"),
    }
    assert!(outcome.record.is_none());
    assert_eq!(store.get(pool.pool_id).await.unwrap(), None);
    assert!(!reconciler.is_in_flight(&pool.pool_id));
    assert_eq!(reconciler.metrics().snapshot().timeouts, 1);
}

#[tokio::test]
async fn test_missing_pool_is_noop_and_force_resync_errors() {
    let ledger = Arc::new(MockLedger::new());
    let (reconciler, store) = reconciler(&ledger);
    let absent = PoolId::repeat_byte(0xee);

    let outcome = reconciler.sync(absent, BUDGET).await;
    assert!(!outcome.is_applied());
    assert!(store.list().await.unwrap().is_empty());

    let err = reconciler.force_resync(absent, BUDGET).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_ledger_failure_is_noop() {
    let ledger = Arc::new(MockLedger::new());
    let pool = curve_pool(5, ONE, 2 * ONE);
    ledger.put(pool.clone());
    ledger.fail(pool.pool_id);
    let (reconciler, store) = reconciler(&ledger);

    let outcome = reconciler.sync(pool.pool_id, BUDGET).await;
    match outcome.status {
        ReconcileStatus::NoOp { timed_out, .. } => assert!(!timed_out),
        ReconcileStatus::Applied => panic!("failed read must not apply"),
    }
    assert_eq!(store.get(pool.pool_id).await.unwrap(), None);
    assert_eq!(reconciler.metrics().snapshot().noops, 1);
}

#[tokio::test]
async fn test_reconcile_flags_price_divergence() {
    let ledger = Arc::new(MockLedger::new());
    let (reconciler, _store) = reconciler(&ledger);

    let mut pool = curve_pool(6, 710 * ONE, 1575 * ONE);
    let doubled = U256::from(821_938u64);
    pool.sqrt_price_long_x96 = encode_price_micro(doubled);

    let outcome = reconciler.reconcile(pool, BUDGET).await;
    assert!(outcome.is_applied());
    let long_divergence = outcome.flags.iter().find_map(|f| match f {
        Discrepancy::PriceDivergence {
            side: Side::Long,
            divergence_bps,
            ..
        } => Some(*divergence_bps),
        _ => None,
    });
    assert!(long_divergence.is_some_and(|bps| bps > 9_000));
    assert!(!outcome
        .flags
        .iter()
        .any(|f| matches!(f, Discrepancy::PriceDivergence { side: Side::Short, .. })));
    assert!(reconciler.metrics().snapshot().discrepancies >= 1);
}

#[tokio::test]
async fn test_reconcile_flags_vault_shortfall() {
    let ledger = Arc::new(MockLedger::new());
    let (reconciler, store) = reconciler(&ledger);

    let mut pool = curve_pool(7, 3 * ONE, 4 * ONE);
    pool.vault_balance = pool.total_reserve() - 10;

    let outcome = reconciler.reconcile(pool.clone(), BUDGET).await;
    assert!(outcome.is_applied());
    assert!(outcome
        .flags
        .iter()
        .any(|f| matches!(f, Discrepancy::Inconsistent { .. })));
    // Ledger values are written regardless.
    let row = store.get(pool.pool_id).await.unwrap().unwrap();
    assert_eq!(row.vault_balance, pool.vault_balance);
}

#[tokio::test]
async fn test_reconcile_flags_non_canonical_curve() {
    let ledger = Arc::new(MockLedger::new());
    let (reconciler, _store) = reconciler(&ledger);

    let mut pool = curve_pool(8, 2 * ONE, 2 * ONE);
    pool.curve = CurveFields::from_params(&CurveParams {
        exponent: 2,
        ..CurveParams::default()
    });

    let outcome = reconciler.reconcile(pool, BUDGET).await;
    assert!(outcome
        .flags
        .iter()
        .any(|f| matches!(f, Discrepancy::NonCanonicalCurve { params } if params.exponent == 2)));
}

#[tokio::test]
async fn test_json_file_store_behind_reconciler() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pools.json");
    let ledger = Arc::new(MockLedger::new());
    let pool = curve_pool(9, 7 * ONE, ONE);
    ledger.put(pool.clone());

    let store = Arc::new(JsonFileCache::open(&path).unwrap());
    let reconciler = Reconciler::new(reader(&ledger), store);
    assert!(reconciler.sync(pool.pool_id, BUDGET).await.is_applied());

    let reopened = JsonFileCache::open(&path).unwrap();
    let row = reopened.get(pool.pool_id).await.unwrap().unwrap();
    assert_eq!(row.reserve_long, pool.reserve_long);
    assert_eq!(row.sqrt_price_short_x96, pool.sqrt_price_short_x96);
}

// =========================================================================
// Multi-pool reads
// =========================================================================

#[tokio::test]
async fn test_fetch_many_isolates_failures() {
    let ledger = Arc::new(MockLedger::new());
    let ok_a = curve_pool(10, ONE, ONE);
    let ok_b = curve_pool(11, 2 * ONE, ONE);
    let broken = curve_pool(12, ONE, 3 * ONE);
    ledger.put(ok_a.clone());
    ledger.put(ok_b.clone());
    ledger.put(broken.clone());
    ledger.fail(broken.pool_id);
    let missing = PoolId::repeat_byte(13);

    let ids = [ok_a.pool_id, broken.pool_id, ok_b.pool_id, missing, ok_a.pool_id];
    let result = reader(&ledger).with_max_concurrency(2).fetch_many(&ids, BUDGET).await;

    assert_eq!(result.len(), 4);
    assert_eq!(result[&ok_a.pool_id].as_ref(), Some(&ok_a));
    assert_eq!(result[&ok_b.pool_id].as_ref(), Some(&ok_b));
    assert_eq!(result[&broken.pool_id], None);
    assert_eq!(result[&missing], None);
    assert_eq!(ledger.calls(), 4);
}

#[tokio::test]
async fn test_fetch_many_prefers_batch() {
    let ledger = Arc::new(MockLedger::new().with_batch());
    let a = curve_pool(14, ONE, ONE);
    let b = curve_pool(15, ONE, 5 * ONE);
    ledger.put(a.clone());
    ledger.put(b.clone());
    let missing = PoolId::repeat_byte(16);

    let result = reader(&ledger)
        .fetch_many(&[a.pool_id, missing, b.pool_id], BUDGET)
        .await;

    assert_eq!(ledger.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.calls(), 0);
    assert_eq!(result[&a.pool_id].as_ref(), Some(&a));
    assert_eq!(result[&b.pool_id].as_ref(), Some(&b));
    assert_eq!(result[&missing], None);
}

#[tokio::test]
async fn test_fetch_many_short_batch_falls_back_to_single_reads() {
    let ledger = Arc::new(MockLedger::new().with_truncated_batch());
    let a = curve_pool(18, ONE, ONE);
    let b = curve_pool(19, 3 * ONE, ONE);
    ledger.put(a.clone());
    ledger.put(b.clone());

    let result = reader(&ledger)
        .fetch_many(&[a.pool_id, b.pool_id, a.pool_id], BUDGET)
        .await;

    assert_eq!(ledger.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.calls(), 2);
    assert_eq!(result.len(), 2);
    assert_eq!(result[&a.pool_id].as_ref(), Some(&a));
    assert_eq!(result[&b.pool_id].as_ref(), Some(&b));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_many_budget_bounds_the_batch() {
    let ledger = Arc::new(
        MockLedger::new()
            .with_batch()
            .with_delay(Duration::from_secs(10)),
    );
    let a = curve_pool(17, ONE, ONE);
    ledger.put(a.clone());

    let result = reader(&ledger)
        .fetch_many(&[a.pool_id], Duration::from_millis(200))
        .await;
    assert_eq!(result.len(), 1);
    assert_eq!(result[&a.pool_id], None);
}

#[tokio::test]
async fn test_fetch_empty_is_empty() {
    let ledger = Arc::new(MockLedger::new());
    assert!(reader(&ledger).fetch_many(&[], BUDGET).await.is_empty());
    assert_eq!(ledger.calls(), 0);
}

// =========================================================================
// Settlement
// =========================================================================

#[tokio::test]
async fn test_second_settlement_before_ledger_catches_up_is_too_early() {
    let ledger = Arc::new(MockLedger::new());
    let pool = curve_pool(20, 710 * ONE, 1575 * ONE);
    ledger.put(pool.clone());
    let coordinator =
        SettlementCoordinator::new(SettlementEngine::default(), reader(&ledger), BUDGET);

    let first = coordinator.settle(pool.pool_id, 800_000, NOW).await.unwrap();
    assert!(first.transfer_to_long() > 0);
    assert_eq!(
        first.reserve_long + first.reserve_short,
        pool.total_reserve()
    );

    // The ledger still reports the old last_settle_ts.
    let err = coordinator
        .settle(pool.pool_id, 800_000, NOW + 10)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TooEarly { remaining_secs: 3_590, .. }));

    assert!(coordinator.settle(pool.pool_id, 800_000, NOW + 3_600).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_settlements_apply_once() {
    let ledger = Arc::new(MockLedger::new().with_delay(Duration::from_millis(5)));
    let pool = curve_pool(21, ONE, ONE);
    ledger.put(pool.clone());
    let coordinator =
        SettlementCoordinator::new(SettlementEngine::default(), reader(&ledger), BUDGET);

    let results = join_all((0..5).map(|_| coordinator.settle(pool.pool_id, 900_000, NOW))).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::TooEarly { .. })));
}

#[tokio::test]
async fn test_settlement_one_second_early() {
    let ledger = Arc::new(MockLedger::new());
    let mut pool = curve_pool(22, ONE, ONE);
    pool.last_settle_ts = NOW - 3_599;
    ledger.put(pool.clone());
    let coordinator =
        SettlementCoordinator::new(SettlementEngine::default(), reader(&ledger), BUDGET);

    let err = coordinator.settle(pool.pool_id, 0, NOW).await.unwrap_err();
    assert!(matches!(err, Error::TooEarly { remaining_secs: 1, .. }));
    assert!(coordinator.settle(pool.pool_id, 0, NOW + 1).await.is_ok());
}

#[tokio::test]
async fn test_settlement_gates_evicted_after_cooldown() {
    let ledger = Arc::new(MockLedger::new());
    let a = curve_pool(23, ONE, 2 * ONE);
    let b = curve_pool(24, 2 * ONE, ONE);
    ledger.put(a.clone());
    ledger.put(b.clone());
    let coordinator =
        SettlementCoordinator::new(SettlementEngine::default(), reader(&ledger), BUDGET);

    coordinator.settle(a.pool_id, 900_000, NOW).await.unwrap();
    coordinator.settle(b.pool_id, 100_000, NOW + 10).await.unwrap();
    assert_eq!(coordinator.tracked_pools().await, 2);

    // A's cooldown has run out, B's has not.
    let err = coordinator
        .settle(PoolId::repeat_byte(0x78), 0, NOW + 3_600)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert_eq!(coordinator.tracked_pools().await, 2);

    coordinator.settle(b.pool_id, 100_000, NOW + 3_610).await.unwrap();
    assert_eq!(coordinator.tracked_pools().await, 1);
}

#[tokio::test]
async fn test_settlement_of_unknown_pool() {
    let ledger = Arc::new(MockLedger::new());
    let coordinator =
        SettlementCoordinator::new(SettlementEngine::default(), reader(&ledger), BUDGET);
    let err = coordinator
        .settle(PoolId::repeat_byte(0x77), 0, NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

// =========================================================================
// Decay
// =========================================================================

#[tokio::test]
async fn test_decay_prefers_ledger_simulation() {
    let ledger = Arc::new(MockLedger::new().with_simulation());
    let mut pool = curve_pool(30, 4 * ONE, 6 * ONE);
    pool.expiration_ts = Some(NOW - 2 * SECONDS_PER_DAY);

    let mut simulated = pool.clone();
    simulated.reserve_long /= 2;
    simulated.reserve_short /= 2;
    ledger.put_simulated(simulated.clone());

    let engine = DecayEngine::new(DecayParams::default()).with_ledger(reader(&ledger), BUDGET);
    let projection = engine.project(&pool, NOW).await;

    assert_eq!(projection.source, DecaySource::Ledger);
    assert_eq!(projection.pending_days, 2);
    assert_eq!(projection.reserve_long, simulated.reserve_long);
    assert_eq!(projection.reserve_short, simulated.reserve_short);
    assert_eq!(ledger.simulate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_decay_skips_simulation_when_nothing_pending() {
    let ledger = Arc::new(MockLedger::new().with_simulation());
    let pool = curve_pool(31, ONE, ONE);

    let engine = DecayEngine::new(DecayParams::default()).with_ledger(reader(&ledger), BUDGET);
    let projection = engine.project(&pool, NOW).await;

    assert_eq!(projection.source, DecaySource::Local);
    assert!(!projection.decay_pending);
    assert_eq!(ledger.simulate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_decay_falls_back_to_local_law() {
    let ledger = Arc::new(MockLedger::new().with_simulation());
    let mut pool = curve_pool(32, 4 * ONE, 6 * ONE);
    pool.expiration_ts = Some(NOW - SECONDS_PER_DAY);
    ledger.fail(pool.pool_id);

    let engine = DecayEngine::new(DecayParams::default()).with_ledger(reader(&ledger), BUDGET);
    let projection = engine.project(&pool, NOW).await;

    assert_eq!(projection.source, DecaySource::Local);
    assert_eq!(projection.factor_micro, 990_000);
    assert_eq!(projection.reserve_long, pool.reserve_long * 99 / 100);
}

// =========================================================================
// Views
// =========================================================================

fn view_service(ledger: &Arc<MockLedger>) -> (PoolViewService, Reconciler) {
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryCache::new());
    let reconciler = Reconciler::new(reader(ledger), store.clone());
    let service = PoolViewService::new(store, DecayEngine::new(DecayParams::default()))
        .with_read_through(reconciler.clone(), BUDGET);
    (service, reconciler)
}

#[tokio::test]
async fn test_view_reads_through_on_miss() {
    let ledger = Arc::new(MockLedger::new());
    let pool = curve_pool(40, 710 * ONE, 1575 * ONE);
    ledger.put(pool.clone());
    let (service, _) = view_service(&ledger);

    let display = service.view(pool.pool_id, NOW).await;
    let view = display.view().expect("pool should be available");

    assert!((view.price_long - 0.410_969).abs() < 1e-5, "{}", view.price_long);
    assert!((view.price_short - 0.911_651).abs() < 1e-5, "{}", view.price_short);
    assert_eq!(view.phase, PoolPhase::Trading);
    assert_eq!(view.supply_long, 710.0);
    assert_eq!(view.supply_short, 1575.0);
    assert!((view.relevance - 504_100.0 / 2_984_725.0).abs() < 1e-5);
    assert!((view.market_cap - 1_727.636).abs() < 0.01);
    assert!(!view.decay_pending);
    assert_eq!(view.last_synced_at, Some(NOW));

    // Second read is served from the cache.
    service.view(pool.pool_id, NOW).await;
    assert_eq!(ledger.calls(), 1);
}

#[tokio::test]
async fn test_view_applies_pending_decay() {
    let ledger = Arc::new(MockLedger::new());
    let mut pool = curve_pool(41, 710 * ONE, 1575 * ONE);
    pool.expiration_ts = Some(NOW - 2 * SECONDS_PER_DAY);
    ledger.put(pool.clone());
    let (service, _) = view_service(&ledger);

    let view = service.view(pool.pool_id, NOW).await.view().cloned().unwrap();
    assert!(view.decay_pending);
    assert!((view.market_cap - 1_727.636 * 0.9801).abs() < 0.01);
    assert!((view.relevance - 504_100.0 / 2_984_725.0).abs() < 1e-5);
    assert!((view.vault_balance_display - pool.vault_balance as f64 / 1e6).abs() < 1e-9);
}

#[tokio::test]
async fn test_view_unavailable_without_data() {
    let ledger = Arc::new(MockLedger::new());
    let broken = curve_pool(42, ONE, ONE);
    ledger.put(broken.clone());
    ledger.fail(broken.pool_id);
    let (service, _) = view_service(&ledger);

    assert_eq!(service.view(broken.pool_id, NOW).await, PoolDisplay::Unavailable);
    assert_eq!(
        service.view(PoolId::repeat_byte(43), NOW).await,
        PoolDisplay::Unavailable
    );

    let cache_only = PoolViewService::new(
        Arc::new(InMemoryCache::new()),
        DecayEngine::new(DecayParams::default()),
    );
    assert_eq!(cache_only.view(broken.pool_id, NOW).await, PoolDisplay::Unavailable);
}

#[tokio::test]
async fn test_view_many_keeps_order() {
    let ledger = Arc::new(MockLedger::new());
    let a = curve_pool(44, ONE, ONE);
    ledger.put(a.clone());
    let missing = PoolId::repeat_byte(45);
    let (service, reconciler) = view_service(&ledger);
    reconciler.sync(a.pool_id, BUDGET).await;

    let views = service.view_many(&[missing, a.pool_id], NOW).await;
    assert_eq!(views[0], (missing, PoolDisplay::Unavailable));
    assert_eq!(views[1].0, a.pool_id);
    assert!(views[1].1.view().is_some());
}
