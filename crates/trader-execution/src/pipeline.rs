//! 지표 스냅샷에서 주문까지의 파이프라인.
//!
//! 스냅샷마다 신호를 한 번 생성하고, 종목을 구독한 사용자마다
//! 각자의 신호 북에 넣은 뒤 자동 실행 경로로 넘깁니다.
//! 사용자별 실행은 동시에 진행되며 서로의 결과에 영향을 주지 않습니다.

use crate::coordinator::{ExecutionCoordinator, ExecutionOutcome};
use crate::error::ExecutionResult;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use trader_core::{BrokerAccountId, IndicatorSnapshot, SentimentScore, Signal, UserId};
use trader_notification::NotificationEvent;
use trader_strategy::{NoTradeReason, OfferOutcome, SignalGenerator, SignalOutcome};

/// 종목 구독.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// 사용자
    pub user_id: UserId,
    /// 주문을 낼 계좌
    pub account_id: BrokerAccountId,
}

/// 사용자 한 명의 실행 결과.
#[derive(Debug)]
pub struct UserExecution {
    /// 구독
    pub subscription: Subscription,
    /// 실행 결과
    pub result: ExecutionResult<ExecutionOutcome>,
}

/// 스냅샷 처리 결과.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// 발행된 신호
    pub signal: Option<Signal>,
    /// 신호를 내지 않은 사유
    pub no_trade: Option<NoTradeReason>,
    /// 사용자별 실행 결과
    pub executions: Vec<UserExecution>,
}

/// 신호 파이프라인.
pub struct SignalPipeline {
    generator: Mutex<SignalGenerator>,
    coordinator: Arc<ExecutionCoordinator>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    bar_clock: bool,
}

impl SignalPipeline {
    /// 새 파이프라인을 생성합니다.
    pub fn new(generator: SignalGenerator, coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self {
            generator: Mutex::new(generator),
            coordinator,
            subscriptions: RwLock::new(HashMap::new()),
            bar_clock: false,
        }
    }

    /// 실행 시각으로 벽시계 대신 스냅샷의 봉 시각을 씁니다.
    ///
    /// 과거 틱을 빠르게 흘려보내는 페이퍼 트레이딩에서 신호가 벽시계 기준으로
    /// 만료되지 않게 합니다.
    pub fn with_bar_clock(mut self) -> Self {
        self.bar_clock = true;
        self
    }

    /// 코디네이터.
    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    /// 사용자를 종목 신호에 구독시킵니다.
    pub async fn subscribe(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
        instrument: impl Into<String>,
    ) {
        let subscription = Subscription {
            user_id,
            account_id,
        };
        let mut subscriptions = self.subscriptions.write().await;
        let entry = subscriptions.entry(instrument.into()).or_default();
        if !entry.contains(&subscription) {
            entry.push(subscription);
        }
    }

    /// 구독을 해제합니다.
    pub async fn unsubscribe(&self, user_id: UserId, instrument: &str) {
        if let Some(entry) = self.subscriptions.write().await.get_mut(instrument) {
            entry.retain(|s| s.user_id != user_id);
        }
    }

    /// 구독된 종목 목록.
    pub async fn instruments(&self) -> Vec<String> {
        let mut instruments: Vec<String> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(instrument, _)| instrument.clone())
            .collect();
        instruments.sort();
        instruments
    }

    /// 스냅샷 하나를 처리합니다.
    pub async fn on_snapshot(
        &self,
        snapshot: &IndicatorSnapshot,
        sentiment: Option<&SentimentScore>,
    ) -> ExecutionResult<PipelineReport> {
        self.coordinator
            .mark_price(&snapshot.instrument, snapshot.close)
            .await;

        let outcome = self.generator.lock().await.generate(snapshot, sentiment);
        let signal = match outcome {
            SignalOutcome::Issued(signal) => signal,
            SignalOutcome::NoTrade(reason) => {
                debug!(
                    instrument = %snapshot.instrument,
                    timeframe = %snapshot.timeframe,
                    reason = ?reason,
                    "신호 없음"
                );
                return Ok(PipelineReport {
                    no_trade: Some(reason),
                    ..Default::default()
                });
            }
            SignalOutcome::Duplicate => return Ok(PipelineReport::default()),
        };
        self.coordinator.store().save_signal(&signal).await?;

        let subscriptions = self
            .subscriptions
            .read()
            .await
            .get(&signal.instrument)
            .cloned()
            .unwrap_or_default();

        let mut accepted = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            match self
                .coordinator
                .offer_signal(subscription.user_id, signal.clone())
                .await
            {
                OfferOutcome::Active { .. } => {
                    self.coordinator
                        .notifier()
                        .notify(NotificationEvent::SignalIssued {
                            user_id: subscription.user_id,
                            signal: signal.clone(),
                        });
                    accepted.push(subscription);
                }
                other => debug!(user_id = %subscription.user_id, outcome = ?other, "신호 미채택"),
            }
        }
        info!(signal_id = %signal.id, users = accepted.len(), "신호 배포");

        let now = if self.bar_clock {
            snapshot.timestamp
        } else {
            Utc::now()
        };
        let results = join_all(accepted.iter().map(|subscription| {
            self.coordinator.execute_signal_at(
                subscription.user_id,
                subscription.account_id,
                signal.id,
                now,
            )
        }))
        .await;

        let executions = accepted
            .into_iter()
            .zip(results)
            .map(|(subscription, result)| UserExecution {
                subscription,
                result,
            })
            .collect();

        Ok(PipelineReport {
            signal: Some(signal),
            no_trade: None,
            executions,
        })
    }
}
