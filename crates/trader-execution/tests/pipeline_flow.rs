//! 스냅샷에서 사용자별 실행까지의 파이프라인 테스트.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use trader_core::{
    names, RiskViolation, BrokerAccount, BrokerCredentials, BrokerType, ExecutionConfig, InMemoryStore,
    IndicatorSnapshot, RiskConfig, RiskPolicy, SignalConfig, Timeframe, TimeframeConflictPolicy,
    TradingStore, UserId,
};
use trader_exchange::{Broker, BrokerGateway, SimulatedBroker, SimulatedConfig};
use trader_execution::{ExecutionCoordinator, ExecutionOutcome, SignalPipeline};
use trader_notification::NotificationDispatcher;
use trader_strategy::{NoTradeReason, SignalGenerator};

fn snapshot(rsi: f64, macd: f64) -> IndicatorSnapshot {
    let timestamp = Utc::now()
        .duration_trunc(TimeDelta::minutes(5))
        .unwrap_or_else(|_| Utc::now());
    snapshot_at(rsi, macd, timestamp)
}

fn snapshot_at(rsi: f64, macd: f64, timestamp: DateTime<Utc>) -> IndicatorSnapshot {
    let mut values = BTreeMap::new();
    values.insert(names::RSI.to_string(), rsi);
    values.insert(names::MACD.to_string(), macd);
    values.insert(names::MACD_SIGNAL.to_string(), 0.0);
    IndicatorSnapshot {
        instrument: "X".to_string(),
        timeframe: Timeframe::M5,
        values,
        close: dec!(100),
        timestamp,
    }
}

#[tokio::test]
async fn test_signal_fans_out_to_each_subscriber_under_own_policy() {
    let store = Arc::new(InMemoryStore::new());
    let policy = TimeframeConflictPolicy::Independent;
    let coordinator = Arc::new(ExecutionCoordinator::new(
        ExecutionConfig::default(),
        RiskConfig::default(),
        policy,
        store.clone(),
        NotificationDispatcher::disabled(),
    ));

    let auto = UserId(1);
    let manual = UserId(2);
    let mut accounts = Vec::new();
    for user in [auto, manual] {
        let broker = Arc::new(SimulatedBroker::new(SimulatedConfig::default()));
        broker
            .connect(&BrokerCredentials::new("key", "secret"))
            .await
            .unwrap();
        let account = BrokerAccount::new(user, BrokerType::Simulated, "sealed");
        accounts.push(account.id);
        coordinator
            .register_account(account, Arc::new(Broker::from(broker)))
            .await
            .unwrap();
    }
    store
        .save_risk_policy(auto, &RiskPolicy::default().with_auto_trading(true))
        .await
        .unwrap();
    store
        .save_risk_policy(manual, &RiskPolicy::default())
        .await
        .unwrap();

    let pipeline = SignalPipeline::new(
        SignalGenerator::new(SignalConfig::new(policy)),
        coordinator.clone(),
    );
    pipeline.subscribe(auto, accounts[0], "X").await;
    pipeline.subscribe(manual, accounts[1], "X").await;
    assert_eq!(pipeline.instruments().await, vec!["X".to_string()]);

    // RSI 과매도 + MACD 상향: 두 표 모두 롱
    let report = pipeline.on_snapshot(&snapshot(25.0, 1.0), None).await.unwrap();
    let signal = report.signal.expect("신호가 발행되어야 함");
    assert!(store.get_signal(signal.id).await.unwrap().is_some());
    assert_eq!(report.executions.len(), 2);

    for execution in &report.executions {
        let outcome = execution.result.as_ref().unwrap();
        if execution.subscription.user_id == auto {
            assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
        } else {
            assert!(matches!(outcome, ExecutionOutcome::ManualActionRequired(_)));
        }
    }
    assert_eq!(coordinator.ledger().positions(auto).await.len(), 1);
    assert!(coordinator.ledger().positions(manual).await.is_empty());

    // 수동 사용자의 신호는 북에 남아 있음
    let pending = coordinator.active_signals(manual, Utc::now()).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, signal.id);

    // 같은 봉은 다시 처리하지 않음
    let again = pipeline.on_snapshot(&snapshot(25.0, 1.0), None).await.unwrap();
    assert!(again.signal.is_none());
    assert!(again.executions.is_empty());
}

#[tokio::test]
async fn test_split_vote_produces_no_trade() {
    let store = Arc::new(InMemoryStore::new());
    let policy = TimeframeConflictPolicy::RequireAgreement;
    let coordinator = Arc::new(ExecutionCoordinator::new(
        ExecutionConfig::default(),
        RiskConfig::default(),
        policy,
        store,
        NotificationDispatcher::disabled(),
    ));
    let pipeline = SignalPipeline::new(SignalGenerator::new(SignalConfig::new(policy)), coordinator);

    // RSI 숏, MACD 롱
    let report = pipeline.on_snapshot(&snapshot(80.0, 1.0), None).await.unwrap();
    assert!(report.signal.is_none());
    assert_eq!(
        report.no_trade,
        Some(NoTradeReason::Tie { long: 1, short: 1 })
    );
}

#[tokio::test]
async fn test_bar_clock_keeps_historic_signals_actionable() {
    let policy = TimeframeConflictPolicy::Independent;
    let historic = DateTime::from_timestamp(1_704_067_200, 0).unwrap();

    let mut outcomes = Vec::new();
    for bar_clock in [false, true] {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(ExecutionCoordinator::new(
            ExecutionConfig::default(),
            RiskConfig::default(),
            policy,
            store.clone(),
            NotificationDispatcher::disabled(),
        ));
        let broker = Arc::new(SimulatedBroker::new(SimulatedConfig::default()));
        broker
            .connect(&BrokerCredentials::new("key", "secret"))
            .await
            .unwrap();
        let account = BrokerAccount::new(UserId(1), BrokerType::Simulated, "sealed");
        let account_id = account.id;
        coordinator
            .register_account(account, Arc::new(Broker::from(broker)))
            .await
            .unwrap();
        store
            .save_risk_policy(UserId(1), &RiskPolicy::default().with_auto_trading(true))
            .await
            .unwrap();

        let mut pipeline = SignalPipeline::new(
            SignalGenerator::new(SignalConfig::new(policy)),
            coordinator,
        );
        if bar_clock {
            pipeline = pipeline.with_bar_clock();
        }
        pipeline.subscribe(UserId(1), account_id, "X").await;

        let report = pipeline
            .on_snapshot(&snapshot_at(25.0, 1.0, historic), None)
            .await
            .unwrap();
        assert_eq!(report.executions.len(), 1);
        outcomes.push(report.executions[0].result.as_ref().unwrap().clone());
    }

    // 벽시계로는 이미 만료된 신호
    assert!(matches!(
        outcomes[0],
        ExecutionOutcome::Blocked(RiskViolation::SignalUnusable(_))
    ));
    assert!(matches!(outcomes[1], ExecutionOutcome::Filled(_)));
}
