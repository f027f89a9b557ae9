//! 모의 브로커를 상대로 한 실행 흐름 테스트.

use chrono::{TimeDelta, Utc};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trader_core::{
    BrokerAccount, BrokerAccountId, BrokerCredentials, BrokerType, ConnectionState, Direction,
    ExecutionConfig, InMemoryStore, OrderState, RiskConfig, RiskPolicy, RiskViolation, Signal,
    Timeframe, TimeframeConflictPolicy, TradingStore, UserId,
};
use trader_exchange::{Broker, BrokerGateway, FillMode, SimulatedBroker, SimulatedConfig};
use trader_execution::{
    CancelReport, DivergenceKind, ExecutionCoordinator, ExecutionError, ExecutionOutcome,
};
use trader_notification::{MemorySender, NotificationDispatcher, NotificationSender};
use uuid::Uuid;

const USER: UserId = UserId(1);

struct Harness {
    coordinator: Arc<ExecutionCoordinator>,
    broker: Arc<SimulatedBroker>,
    store: Arc<InMemoryStore>,
    memory: Arc<MemorySender>,
    account_id: BrokerAccountId,
    _cancel: CancellationToken,
}

async fn harness(policy: RiskPolicy, fill_mode: FillMode) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let memory = Arc::new(MemorySender::new());
    let cancel = CancellationToken::new();
    let senders: Vec<Arc<dyn NotificationSender>> = vec![memory.clone()];
    let (notifier, _handle) = NotificationDispatcher::spawn(senders, 64, cancel.clone());

    let config = ExecutionConfig {
        submit_timeout_ms: 200,
        submit_retries: 1,
        retry_initial_ms: 1,
        persist_retries: 1,
        ..Default::default()
    };
    let coordinator = Arc::new(ExecutionCoordinator::new(
        config,
        RiskConfig::default(),
        TimeframeConflictPolicy::Independent,
        store.clone(),
        notifier,
    ));

    let broker = Arc::new(SimulatedBroker::new(
        SimulatedConfig::default().with_fill_mode(fill_mode),
    ));
    broker
        .connect(&BrokerCredentials::new("key", "secret"))
        .await
        .unwrap();

    store.save_risk_policy(USER, &policy).await.unwrap();
    let account = BrokerAccount::new(USER, BrokerType::Simulated, "sealed");
    let account_id = account.id;
    coordinator
        .register_account(account, Arc::new(Broker::from(broker.clone())))
        .await
        .unwrap();

    Harness {
        coordinator,
        broker,
        store,
        memory,
        account_id,
        _cancel: cancel,
    }
}

fn auto_policy() -> RiskPolicy {
    RiskPolicy::default().with_auto_trading(true)
}

fn signal(instrument: &str, timeframe: Timeframe, direction: Direction) -> Signal {
    let generated_at = Utc::now() - TimeDelta::minutes(1);
    Signal {
        id: Signal::derive_id(instrument, timeframe, generated_at),
        instrument: instrument.to_string(),
        timeframe,
        direction,
        confidence: 0.8,
        technical_strength: 0.8,
        indicator_weights: BTreeMap::new(),
        sentiment_weight: 0.0,
        entry_price: dec!(100),
        volatility_stop: None,
        generated_at,
        expires_at: generated_at + TimeDelta::minutes(15),
        reasoning: vec!["rsi oversold".to_string()],
    }
}

async fn offer(h: &Harness, signal: Signal) -> Uuid {
    let id = signal.id;
    h.coordinator.offer_signal(USER, signal).await;
    id
}

async fn wait_for(memory: &MemorySender, kind: &str, count: usize) {
    for _ in 0..100 {
        if memory.count(kind) >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("알림 {kind} {count}건을 받지 못함");
}

#[tokio::test]
async fn test_auto_execution_fills_and_books_position() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    let ExecutionOutcome::Filled(order) = outcome else {
        panic!("체결되어야 함: {outcome:?}");
    };
    // 자본 10000, 리스크 1%, 손절 거리 2% = 2 -> 수량 50
    assert_eq!(order.size, dec!(50));
    assert_eq!(order.stop_price, Some(dec!(98)));
    assert_eq!(order.take_profit_price, Some(dec!(104)));
    assert_eq!(order.signal_id, Some(id));

    let stored = h.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.state, OrderState::Filled);

    let positions = h.coordinator.ledger().positions(USER).await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].net_size, dec!(50));
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(1));
    wait_for(&h.memory, "order_filled", 1).await;

    // 같은 신호는 다시 사용할 수 없음
    let again = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    assert!(matches!(
        again,
        ExecutionOutcome::Blocked(RiskViolation::SignalUnusable(_))
    ));
    assert_eq!(h.broker.broker_order_count(), 1);
}

#[tokio::test]
async fn test_manual_mode_waits_for_confirmation() {
    let h = harness(RiskPolicy::default(), FillMode::Immediate).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Short)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    let ExecutionOutcome::ManualActionRequired(plan) = outcome else {
        panic!("수동 확인이 필요해야 함: {outcome:?}");
    };
    assert_eq!(plan.direction, Direction::Short);
    assert_eq!(h.broker.broker_order_count(), 0);
    wait_for(&h.memory, "manual_action_required", 1).await;

    // 신호는 그대로 남아 있어 확인 후 실행 가능
    let confirmed = h
        .coordinator
        .execute_manual(USER, h.account_id, id)
        .await
        .unwrap();
    let ExecutionOutcome::Filled(order) = confirmed else {
        panic!("확인 후 체결되어야 함: {confirmed:?}");
    };
    assert_eq!(order.size, plan.size);
    let positions = h.coordinator.ledger().positions(USER).await;
    assert_eq!(positions[0].net_size, -plan.size);
}

#[tokio::test]
async fn test_concurrent_requests_for_same_instrument_are_serialized() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    let fast = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;
    let slow = offer(&h, signal("X", Timeframe::M15, Direction::Long)).await;

    let (a, b) = tokio::join!(
        h.coordinator.execute_signal(USER, h.account_id, fast),
        h.coordinator.execute_signal(USER, h.account_id, slow),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let filled = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Filled(_)))
        .count();
    let blocked = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Blocked(RiskViolation::PositionExists)))
        .count();
    assert_eq!((filled, blocked), (1, 1));
    assert_eq!(h.broker.broker_order_count(), 1);
    assert_eq!(h.coordinator.ledger().positions(USER).await.len(), 1);
}

#[tokio::test]
async fn test_queued_request_is_reevaluated_after_rejection() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.reject_next_order("insufficient margin").await;
    let first = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;
    let queued = offer(&h, signal("X", Timeframe::M15, Direction::Long)).await;

    let (a, b) = tokio::join!(
        h.coordinator.execute_signal(USER, h.account_id, first),
        h.coordinator.execute_signal(USER, h.account_id, queued),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Rejected(_)))
        .count();
    let filled = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Filled(_)))
        .count();
    // 거부로 예약이 풀린 뒤 대기하던 요청은 PositionExists 없이 체결
    assert_eq!((rejected, filled), (1, 1));
    assert_eq!(h.coordinator.ledger().positions(USER).await.len(), 1);
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(1));
}

#[tokio::test]
async fn test_pending_orders_count_toward_position_limit() {
    let h = harness(auto_policy().with_max_positions(2), FillMode::Deferred).await;
    let a = offer(&h, signal("A", Timeframe::M5, Direction::Long)).await;
    let b = offer(&h, signal("B", Timeframe::M5, Direction::Long)).await;
    let c = offer(&h, signal("C", Timeframe::M5, Direction::Long)).await;

    // 서로 다른 종목 레인이 동시에 실행되어도 슬롯은 두 개뿐
    let (ra, rb, rc) = tokio::join!(
        h.coordinator.execute_signal(USER, h.account_id, a),
        h.coordinator.execute_signal(USER, h.account_id, b),
        h.coordinator.execute_signal(USER, h.account_id, c),
    );
    let outcomes = [ra.unwrap(), rb.unwrap(), rc.unwrap()];
    let pending = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Pending(_)))
        .count();
    let blocked = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                ExecutionOutcome::Blocked(RiskViolation::MaxPositions { limit: 2, .. })
            )
        })
        .count();
    assert_eq!((pending, blocked), (2, 1));
    assert_eq!(h.broker.broker_order_count(), 2);
    assert!(h.coordinator.ledger().positions(USER).await.is_empty());
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(2));

    // 접수만 된 주문이 슬롯을 잡고 있으므로 이후 신호도 막힘
    let d = offer(&h, signal("D", Timeframe::M5, Direction::Long)).await;
    let later = h
        .coordinator
        .execute_signal(USER, h.account_id, d)
        .await
        .unwrap();
    assert!(matches!(
        later,
        ExecutionOutcome::Blocked(RiskViolation::MaxPositions { open: 2, limit: 2 })
    ));
}

#[tokio::test]
async fn test_gateway_must_match_account_broker_type() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    let account = BrokerAccount::new(USER, BrokerType::Binance, "sealed");
    let err = h
        .coordinator
        .register_account(account, Arc::new(Broker::from(h.broker.clone())))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Core(_)));
}

#[tokio::test]
async fn test_lost_ack_is_resubmitted_with_same_order_id() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.drop_next_acks(1).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));

    // 브로커에는 주문 하나, 원장에는 한 번만 반영
    assert_eq!(h.broker.broker_order_count(), 1);
    let positions = h.coordinator.ledger().positions(USER).await;
    assert_eq!(positions[0].net_size, dec!(50));
}

#[tokio::test]
async fn test_watchdog_rejects_order_the_broker_never_received() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.lose_next_orders(5).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    let ExecutionOutcome::Pending(order) = outcome else {
        panic!("응답 대기여야 함: {outcome:?}");
    };
    assert_eq!(order.state, OrderState::Submitted);
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(1));

    // 창 안에서는 건드리지 않음
    let early = h.coordinator.watchdog(Utc::now()).await.unwrap();
    assert_eq!(early.rejected, 0);

    let report = h
        .coordinator
        .watchdog(Utc::now() + TimeDelta::seconds(60))
        .await
        .unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.unresolved, 0);

    let stored = h.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.state, OrderState::Rejected);
    assert_eq!(stored.reject_reason.as_deref(), Some("no broker record"));
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(0));
    assert!(h.store.list_active_orders(Some(USER)).await.unwrap().is_empty());
    wait_for(&h.memory, "order_rejected", 1).await;
}

#[tokio::test]
async fn test_broker_rejection_releases_reservation() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.reject_next_order("insufficient margin").await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    let ExecutionOutcome::Rejected(order) = outcome else {
        panic!("거부되어야 함: {outcome:?}");
    };
    assert_eq!(order.reject_reason.as_deref(), Some("insufficient margin"));
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(0));
    assert!(h.coordinator.ledger().positions(USER).await.is_empty());
    wait_for(&h.memory, "order_rejected", 1).await;
}

#[tokio::test]
async fn test_order_is_not_submitted_when_it_cannot_be_persisted() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;
    h.store.fail_next_writes(1);

    let err = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Core(_)));
    assert_eq!(h.broker.broker_order_count(), 0);
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(0));
}

#[tokio::test]
async fn test_fill_event_is_applied_once() {
    let h = harness(auto_policy(), FillMode::Deferred).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    let ExecutionOutcome::Pending(order) = outcome else {
        panic!("접수 상태여야 함: {outcome:?}");
    };
    assert!(order.broker_order_id.is_some());

    let price = h.broker.fill_accepted(order.id).await.unwrap();
    let first = h.coordinator.on_fill(order.id, price).await.unwrap();
    let second = h.coordinator.on_fill(order.id, price).await.unwrap();
    assert_eq!(first.state, OrderState::Filled);
    assert_eq!(second.state, OrderState::Filled);

    let positions = h.coordinator.ledger().positions(USER).await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].net_size, dec!(50));
    wait_for(&h.memory, "order_filled", 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.memory.count("order_filled"), 1);
}

#[tokio::test]
async fn test_cancel_all_commits_orders_filled_before_cancel() {
    let h = harness(auto_policy(), FillMode::Deferred).await;
    let x = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;
    let y = offer(&h, signal("Y", Timeframe::M5, Direction::Long)).await;

    let x_order = h
        .coordinator
        .execute_signal(USER, h.account_id, x)
        .await
        .unwrap();
    let y_order = h
        .coordinator
        .execute_signal(USER, h.account_id, y)
        .await
        .unwrap();
    let (Some(x_order), Some(y_order)) = (x_order.order().cloned(), y_order.order().cloned())
    else {
        panic!("두 주문 모두 생성되어야 함");
    };
    h.broker.fill_accepted(y_order.id).await.unwrap();

    let report = h.coordinator.cancel_all(USER).await.unwrap();
    assert_eq!(
        report,
        CancelReport {
            cancelled: 1,
            filled: 1,
            failed: 0
        }
    );

    let x_stored = h.store.get_order(x_order.id).await.unwrap().unwrap();
    let y_stored = h.store.get_order(y_order.id).await.unwrap().unwrap();
    assert_eq!(x_stored.state, OrderState::Cancelled);
    assert_eq!(y_stored.state, OrderState::Filled);

    let positions = h.coordinator.ledger().positions(USER).await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].instrument, "Y");
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(1));

    // 종결된 주문만 남았으므로 다시 취소할 것이 없음
    let again = h.coordinator.cancel_all(USER).await.unwrap();
    assert_eq!(again, CancelReport::default());
}

#[tokio::test]
async fn test_reconciliation_adopts_unknown_broker_position() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.inject_position("Y", dec!(3), dec!(20)).await;

    let divergences = h.coordinator.reconcile_account(h.account_id).await.unwrap();
    assert_eq!(divergences.len(), 1);
    assert_eq!(divergences[0].kind, DivergenceKind::Adopted);
    assert_eq!(divergences[0].local_size, dec!(0));
    assert_eq!(divergences[0].broker_size, dec!(3));

    let positions = h.coordinator.ledger().positions(USER).await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].instrument, "Y");
    assert_eq!(positions[0].net_size, dec!(3));
    assert_eq!(h.store.list_positions(USER).await.unwrap().len(), 1);
    wait_for(&h.memory, "reconciliation_divergence", 1).await;

    // 브로커에서 사라지면 원장에서도 종료
    h.broker.inject_position("Y", dec!(0), dec!(20)).await;
    let divergences = h.coordinator.reconcile_account(h.account_id).await.unwrap();
    assert_eq!(divergences[0].kind, DivergenceKind::Closed);
    assert!(h.coordinator.ledger().positions(USER).await.is_empty());
}

#[tokio::test]
async fn test_repeated_reconciliation_failures_degrade_account_until_resync() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.fail_account_queries(3).await;
    for _ in 0..3 {
        assert!(h.coordinator.reconcile_account(h.account_id).await.is_err());
    }
    wait_for(&h.memory, "account_degraded", 1).await;
    let account = h.store.get_account(h.account_id).await.unwrap().unwrap();
    assert_eq!(account.connection_state, ConnectionState::Degraded);

    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;
    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Blocked(RiskViolation::AccountDegraded)
    );
    assert_eq!(h.broker.broker_order_count(), 0);

    h.coordinator.resync_account(h.account_id).await.unwrap();
    let account = h.store.get_account(h.account_id).await.unwrap().unwrap();
    assert_eq!(account.connection_state, ConnectionState::Connected);

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
}

#[tokio::test]
async fn test_unanswered_submit_degrades_account() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    h.broker.lose_next_orders(5).await;
    let lost = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;

    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, lost)
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Pending(_)));
    h.broker.lose_next_orders(0).await;
    wait_for(&h.memory, "account_degraded", 1).await;
    let account = h.store.get_account(h.account_id).await.unwrap().unwrap();
    assert_eq!(account.connection_state, ConnectionState::Degraded);

    // 다른 종목도 재동기화 전까지 막힘
    let next = offer(&h, signal("Y", Timeframe::M5, Direction::Long)).await;
    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, next)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Blocked(RiskViolation::AccountDegraded)
    );

    h.coordinator.resync_account(h.account_id).await.unwrap();
    let outcome = h
        .coordinator
        .execute_signal(USER, h.account_id, next)
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
}

#[tokio::test]
async fn test_close_position_flattens_ledger_and_releases_risk() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    let id = offer(&h, signal("X", Timeframe::M5, Direction::Long)).await;
    h.coordinator
        .execute_signal(USER, h.account_id, id)
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .close_position(USER, h.account_id, "X")
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
    assert!(h.coordinator.ledger().positions(USER).await.is_empty());
    assert_eq!(h.coordinator.ledger().exposure_pct(USER).await, dec!(0));

    let err = h
        .coordinator
        .close_position(USER, h.account_id, "X")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::PositionNotFound(_)));
}

#[tokio::test]
async fn test_account_of_another_user_is_refused() {
    let h = harness(auto_policy(), FillMode::Immediate).await;
    let err = h
        .coordinator
        .execute_signal(UserId(2), h.account_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::AccountOwnership { .. }));
}
