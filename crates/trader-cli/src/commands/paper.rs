//! 페이퍼 트레이딩 명령어.
//!
//! CSV 틱을 모의 브로커에 주입하면서 지표 엔진, 신호 파이프라인, 실행
//! 코디네이터를 그대로 돌립니다. 사용자는 데모 사용자 한 명이며 저장소는
//! 메모리입니다.
//!
//! ```bash
//! trader paper -c config/default.toml -i data/btc_ticks.csv --balance 10000
//! ```

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trader_analytics::IndicatorEngine;
use trader_core::{
    AppConfig, BrokerAccount, BrokerCredentials, BrokerType, InMemoryStore, NotificationConfig,
    Position, RiskPolicy, Tick, TradingStore, UserId,
};
use trader_exchange::{Broker, BrokerGateway, BrokerOptions, SimulatedConfig};
use trader_execution::{ExecutionCoordinator, ExecutionOutcome, SignalPipeline};
use trader_notification::{NotificationDispatcher, NotificationSender, TelegramSender};
use trader_strategy::SignalGenerator;

use crate::commands::ticks::instruments;

/// 페이퍼 트레이딩 옵션.
#[derive(Debug, Clone)]
pub struct PaperOptions {
    /// 데모 사용자
    pub user_id: UserId,
    /// 모의 계좌 초기 잔고
    pub initial_balance: Decimal,
    /// 자동 매매 여부. 끄면 신호는 수동 확인 대기로 남습니다
    pub auto_trading: bool,
}

impl Default for PaperOptions {
    fn default() -> Self {
        Self {
            user_id: UserId(1),
            initial_balance: Decimal::new(10_000, 0),
            auto_trading: true,
        }
    }
}

/// 페이퍼 트레이딩 결과.
#[derive(Debug, Default)]
pub struct PaperReport {
    /// 처리한 틱 수
    pub ticks: usize,
    /// 스냅샷 수
    pub snapshots: usize,
    /// 발행된 신호 수
    pub signals: usize,
    /// 체결된 주문 수
    pub filled: usize,
    /// 리스크 검사에서 막힌 수
    pub blocked: usize,
    /// 거부된 주문 수
    pub rejected: usize,
    /// 수동 확인 대기 수
    pub manual: usize,
    /// 실행 에러 수
    pub errors: usize,
    /// 종료 시점 열린 포지션
    pub positions: Vec<Position>,
    /// 종료 시점 계좌 평가액
    pub equity: Option<Decimal>,
}

fn notifier(
    config: &NotificationConfig,
    cancel: CancellationToken,
) -> (NotificationDispatcher, Option<JoinHandle<()>>) {
    if !config.enabled || !config.telegram.enabled {
        return (NotificationDispatcher::disabled(), None);
    }
    let senders: Vec<Arc<dyn NotificationSender>> =
        vec![Arc::new(TelegramSender::new(&config.telegram))];
    let (dispatcher, handle) = NotificationDispatcher::spawn(senders, config.queue_capacity, cancel);
    (dispatcher, Some(handle))
}

/// 틱 시퀀스로 페이퍼 트레이딩을 실행합니다.
pub async fn run_paper(
    config: &AppConfig,
    ticks: &[Tick],
    options: &PaperOptions,
) -> Result<PaperReport> {
    let cancel = CancellationToken::new();
    let (dispatcher, notifier_task) = notifier(&config.notification, cancel.clone());

    let store = Arc::new(InMemoryStore::new());
    let coordinator = Arc::new(ExecutionCoordinator::new(
        config.execution.clone(),
        config.risk.clone(),
        config.signal.timeframe_policy,
        store.clone(),
        dispatcher,
    ));

    let user_id = options.user_id;
    store
        .save_risk_policy(
            user_id,
            &RiskPolicy::default().with_auto_trading(options.auto_trading),
        )
        .await?;
    let account = BrokerAccount::new(user_id, BrokerType::Simulated, "paper");
    let account_id = account.id;

    let broker_options = BrokerOptions {
        simulated: SimulatedConfig::default().with_initial_balance(options.initial_balance),
        ..Default::default()
    };
    let broker = Arc::new(Broker::for_account(&account, &broker_options)?);
    let simulated = broker
        .as_simulated()
        .cloned()
        .context("페이퍼 계좌는 모의 브로커가 필요합니다")?;
    broker
        .connect(&BrokerCredentials::new("paper", "paper"))
        .await
        .context("모의 브로커 연결 실패")?;
    coordinator.register_account(account, broker.clone()).await?;

    let pipeline = SignalPipeline::new(
        SignalGenerator::new(config.signal.clone()),
        coordinator.clone(),
    )
    .with_bar_clock();
    for instrument in instruments(ticks) {
        pipeline.subscribe(user_id, account_id, instrument).await;
    }

    let mut engine = IndicatorEngine::new(config.indicators.clone());
    let mut report = PaperReport {
        ticks: ticks.len(),
        ..Default::default()
    };

    for tick in ticks {
        simulated.push_tick(tick.clone()).await;
        let snapshots = engine.on_tick(tick);
        if snapshots.is_empty() {
            continue;
        }

        // 봉 마감마다 브로커 쪽 손절/익절 체결을 원장에 반영
        if let Err(e) = coordinator.reconcile_account(account_id).await {
            warn!(account_id = %account_id, error = %e, "정합성 검사 실패");
        }

        for snapshot in snapshots {
            report.snapshots += 1;
            let outcome = pipeline.on_snapshot(&snapshot, None).await?;
            if outcome.signal.is_some() {
                report.signals += 1;
            }
            for execution in outcome.executions {
                match execution.result {
                    Ok(ExecutionOutcome::Filled(_)) => report.filled += 1,
                    Ok(ExecutionOutcome::Rejected(_)) => report.rejected += 1,
                    Ok(ExecutionOutcome::Blocked(_)) => report.blocked += 1,
                    Ok(ExecutionOutcome::ManualActionRequired(_)) => report.manual += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "실행 실패");
                        report.errors += 1;
                    }
                }
            }
        }
    }

    if let Err(e) = coordinator.reconcile_account(account_id).await {
        warn!(account_id = %account_id, error = %e, "최종 정합성 검사 실패");
    }
    report.positions = coordinator.ledger().positions(user_id).await;
    report.equity = coordinator
        .ledger()
        .user(user_id)
        .await
        .lock()
        .await
        .equity(account_id);

    cancel.cancel();
    if let Some(handle) = notifier_task {
        if let Err(e) = handle.await {
            warn!(error = %e, "알림 태스크 종료 실패");
        }
    }

    info!(
        ticks = report.ticks,
        snapshots = report.snapshots,
        signals = report.signals,
        filled = report.filled,
        blocked = report.blocked,
        open_positions = report.positions.len(),
        "페이퍼 트레이딩 완료"
    );
    Ok(report)
}
