//! 주문 실행 코디네이터.
//!
//! 신호 하나를 실행하는 순서:
//! 1. (사용자, 종목) 레인 획득
//! 2. 신호 북에서 사용 가능 여부 확인
//! 3. 원장 기준 리스크 평가
//! 4. 노출 예산 예약 후 신호 소비
//! 5. 주문을 `Pending`, `Submitted` 순으로 영속화한 뒤 브로커 제출
//! 6. 응답에 따라 체결 커밋, 거부 처리, 또는 워치독 대기
//!
//! 제출 재시도는 항상 같은 주문 ID를 사용하므로 브로커 쪽에서 중복 주문이
//! 생기지 않습니다. 응답이 없는 주문은 `Submitted`로 남고, 워치독이
//! 브로커에 상태를 조회해 종결합니다.

use crate::error::{ExecutionError, ExecutionResult};
use crate::lanes::{AccountLane, InstrumentLanes};
use crate::ledger::{Divergence, Ledger, UserLedger};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use trader_core::{
    lane_span, AckStatus, BrokerAccount, BrokerAccountId, CancelAck, ConnectionState,
    ExecutionConfig, Order, OrderAck, OrderState, Position, PositionKey, Price, RiskConfig,
    RiskViolation, Signal, TimeframeConflictPolicy, TraderError, TradingStore, UserId,
};
use trader_exchange::{
    with_retry_if, Broker, BrokerError, BrokerGateway, BrokerResult, RetryConfig,
};
use trader_notification::{NotificationDispatcher, NotificationEvent};
use trader_risk::{RiskDecision, RiskManager, TradePlan};
use trader_strategy::{OfferOutcome, SignalBook, TakeOutcome};
use uuid::Uuid;

/// 실행 요청 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// 체결 완료
    Filled(Order),
    /// 브로커 응답 대기 (워치독이 종결)
    Pending(Order),
    /// 브로커 거부
    Rejected(Order),
    /// 취소됨
    Cancelled(Order),
    /// 자동 매매 비활성: 사용자 확인 필요
    ManualActionRequired(TradePlan),
    /// 주문 전 차단
    Blocked(RiskViolation),
}

impl ExecutionOutcome {
    /// 주문이 만들어진 경우 그 주문.
    pub fn order(&self) -> Option<&Order> {
        match self {
            ExecutionOutcome::Filled(order)
            | ExecutionOutcome::Pending(order)
            | ExecutionOutcome::Rejected(order)
            | ExecutionOutcome::Cancelled(order) => Some(order),
            ExecutionOutcome::ManualActionRequired(_) | ExecutionOutcome::Blocked(_) => None,
        }
    }
}

/// 전체 취소 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// 취소된 주문 수
    pub cancelled: usize,
    /// 취소 전에 이미 체결된 주문 수
    pub filled: usize,
    /// 처리하지 못한 주문 수
    pub failed: usize,
}

/// 워치독 한 회차 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    /// 체결로 종결
    pub filled: usize,
    /// 거부로 종결
    pub rejected: usize,
    /// 취소로 종결
    pub cancelled: usize,
    /// 아직 종결하지 못함
    pub unresolved: usize,
}

enum Stuck {
    Resolved(ExecutionOutcome),
    Waiting,
    Gone,
}

/// 주문 실행 코디네이터.
pub struct ExecutionCoordinator {
    config: ExecutionConfig,
    timeframe_policy: TimeframeConflictPolicy,
    risk: RiskManager,
    store: Arc<dyn TradingStore>,
    ledger: Arc<Ledger>,
    notifier: NotificationDispatcher,
    lanes: InstrumentLanes,
    accounts: RwLock<HashMap<BrokerAccountId, AccountLane>>,
    books: RwLock<HashMap<UserId, Arc<Mutex<SignalBook>>>>,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .field("timeframe_policy", &self.timeframe_policy)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl ExecutionCoordinator {
    /// 새 코디네이터를 생성합니다.
    pub fn new(
        config: ExecutionConfig,
        risk_config: RiskConfig,
        timeframe_policy: TimeframeConflictPolicy,
        store: Arc<dyn TradingStore>,
        notifier: NotificationDispatcher,
    ) -> Self {
        let ledger = Arc::new(Ledger::new(risk_config.max_total_risk_pct));
        Self {
            config,
            timeframe_policy,
            risk: RiskManager::new(risk_config),
            store,
            ledger,
            notifier,
            lanes: InstrumentLanes::new(),
            accounts: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
        }
    }

    /// 실행 설정.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// 원장.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// 저장소.
    pub fn store(&self) -> &Arc<dyn TradingStore> {
        &self.store
    }

    /// 알림 디스패처.
    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    // ==================== 계좌 ====================

    /// 연결된 계좌를 등록합니다.
    ///
    /// 저장소의 열린 포지션으로 원장을 복원한 뒤 첫 정합성 검사를 실행합니다.
    /// 검사가 실패해도 등록은 유지되며 실패 횟수만 기록됩니다.
    /// 게이트웨이 유형이 계좌의 브로커 유형과 다르면 등록하지 않습니다.
    pub async fn register_account(
        &self,
        mut account: BrokerAccount,
        gateway: Arc<Broker>,
    ) -> ExecutionResult<()> {
        if gateway.broker_type() != account.broker_type {
            return Err(ExecutionError::Core(TraderError::InvalidInput(format!(
                "account {} is {} but gateway is {}",
                account.id,
                account.broker_type,
                gateway.broker_type()
            ))));
        }
        account.connection_state = gateway.connection_state();
        self.store.save_account(&account).await?;

        let positions: Vec<Position> = self
            .store
            .list_positions(account.user_id)
            .await?
            .into_iter()
            .filter(|p| p.broker_account_id == account.id)
            .collect();
        let restored = positions.len();
        self.ledger
            .user(account.user_id)
            .await
            .lock()
            .await
            .restore(positions);

        self.accounts.write().await.insert(
            account.id,
            AccountLane {
                account_id: account.id,
                user_id: account.user_id,
                broker_type: account.broker_type,
                gateway,
            },
        );
        info!(
            user_id = %account.user_id,
            account_id = %account.id,
            broker = %account.broker_type,
            restored,
            "계좌 등록"
        );

        if let Err(e) = self.reconcile_account(account.id).await {
            warn!(account_id = %account.id, error = %e, "초기 정합성 검사 실패");
        }
        Ok(())
    }

    /// 등록된 계좌 ID 목록.
    pub async fn account_ids(&self) -> Vec<BrokerAccountId> {
        let mut ids: Vec<_> = self.accounts.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    async fn account_lane(&self, account_id: BrokerAccountId) -> ExecutionResult<AccountLane> {
        self.accounts
            .read()
            .await
            .get(&account_id)
            .cloned()
            .ok_or(ExecutionError::UnknownAccount(account_id))
    }

    async fn owned_lane(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
    ) -> ExecutionResult<AccountLane> {
        let lane = self.account_lane(account_id).await?;
        if lane.user_id != user_id {
            return Err(ExecutionError::AccountOwnership {
                account: account_id,
                user: user_id,
            });
        }
        Ok(lane)
    }

    // ==================== 신호 북 ====================

    async fn book(&self, user_id: UserId) -> Arc<Mutex<SignalBook>> {
        if let Some(book) = self.books.read().await.get(&user_id) {
            return book.clone();
        }
        self.books
            .write()
            .await
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(SignalBook::new())))
            .clone()
    }

    /// 사용자 신호 북에 신호를 제안합니다.
    pub async fn offer_signal(&self, user_id: UserId, signal: Signal) -> OfferOutcome {
        self.book(user_id).await.lock().await.offer(signal)
    }

    /// 사용자의 만료되지 않은 활성 신호.
    pub async fn active_signals(&self, user_id: UserId, now: DateTime<Utc>) -> Vec<Signal> {
        self.book(user_id)
            .await
            .lock()
            .await
            .active_signals(now)
            .cloned()
            .collect()
    }

    /// 만료된 신호를 모든 북에서 제거합니다.
    pub async fn prune_signals(&self, now: DateTime<Utc>) -> usize {
        let books: Vec<_> = self.books.read().await.values().cloned().collect();
        let mut pruned = 0;
        for book in books {
            pruned += book.lock().await.prune(now);
        }
        pruned
    }

    // ==================== 실행 ====================

    /// 자동 실행 경로. 사용자 정책이 자동 매매를 허용하지 않으면
    /// 주문 없이 `ManualActionRequired`를 반환합니다.
    pub async fn execute_signal(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
        signal_id: Uuid,
    ) -> ExecutionResult<ExecutionOutcome> {
        self.execute(user_id, account_id, signal_id, false, Utc::now())
            .await
    }

    /// 주어진 시각 기준으로 자동 실행합니다 (리플레이, 페이퍼 트레이딩).
    pub async fn execute_signal_at(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
        signal_id: Uuid,
        now: DateTime<Utc>,
    ) -> ExecutionResult<ExecutionOutcome> {
        self.execute(user_id, account_id, signal_id, false, now).await
    }

    /// 사용자가 확인한 신호를 실행합니다. 자동 매매 설정은 보지 않습니다.
    pub async fn execute_manual(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
        signal_id: Uuid,
    ) -> ExecutionResult<ExecutionOutcome> {
        self.execute(user_id, account_id, signal_id, true, Utc::now())
            .await
    }

    async fn execute(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
        signal_id: Uuid,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> ExecutionResult<ExecutionOutcome> {
        let lane = self.owned_lane(user_id, account_id).await?;
        let book = self.book(user_id).await;
        let instrument = match book.lock().await.get(signal_id) {
            Some(signal) => signal.instrument.clone(),
            None => {
                return Ok(self.blocked(
                    user_id,
                    "-",
                    Some(signal_id),
                    RiskViolation::SignalUnusable("알 수 없는 신호".to_string()),
                ))
            }
        };

        let span = lane_span!("execute_signal", user_id, account_id, instrument);
        async {
            let _lane_guard = self.lanes.acquire(user_id, &instrument).await;

            let signal = match book.lock().await.inspect(signal_id, now, self.timeframe_policy) {
                TakeOutcome::Taken(signal) => signal,
                TakeOutcome::Conflict(reason) => {
                    return Ok(self.blocked(
                        user_id,
                        &instrument,
                        Some(signal_id),
                        RiskViolation::TimeframeConflict(reason),
                    ))
                }
                other => {
                    return Ok(self.blocked(
                        user_id,
                        &instrument,
                        Some(signal_id),
                        RiskViolation::SignalUnusable(other.reason().unwrap_or_default()),
                    ))
                }
            };

            let policy = self
                .store
                .get_risk_policy(user_id)
                .await?
                .unwrap_or_default();
            let key = PositionKey::new(account_id, instrument.clone());
            let user_ledger = self.ledger.user(user_id).await;
            let mut ctx = user_ledger.lock().await.risk_context(&key);
            if !lane.gateway.connection_state().accepts_orders() {
                ctx.account_degraded = true;
            }

            let decision = if confirmed {
                self.risk.evaluate_confirmed(&signal, &policy, &ctx)
            } else {
                self.risk.evaluate(&signal, &policy, &ctx)
            };
            let plan = match decision {
                RiskDecision::Approved(plan) => plan,
                RiskDecision::ManualAction(plan) => {
                    info!(signal_id = %signal.id, size = %plan.size, "수동 확인 대기");
                    self.notifier.notify(NotificationEvent::ManualActionRequired {
                        user_id,
                        signal_id: signal.id,
                        instrument: instrument.clone(),
                        direction: plan.direction,
                        size: plan.size,
                        entry_price: plan.entry_price,
                        stop_price: plan.stop_price,
                        take_profit_price: plan.take_profit_price,
                        confidence: signal.confidence,
                    });
                    return Ok(ExecutionOutcome::ManualActionRequired(plan));
                }
                RiskDecision::Rejected(violation) => {
                    return Ok(self.blocked(user_id, &instrument, Some(signal.id), violation))
                }
            };

            let order = Order::new(
                user_id,
                account_id,
                instrument.clone(),
                plan.side(),
                plan.size,
                plan.entry_price,
            )
            .with_protection(Some(plan.stop_price), Some(plan.take_profit_price))
            .with_risk_pct(plan.risk_pct)
            .with_signal(signal.id);

            let reserved = user_ledger
                .lock()
                .await
                .reserve(&order, policy.max_concurrent_positions);
            if let Err(violation) = reserved {
                return Ok(self.blocked(user_id, &instrument, Some(signal.id), violation));
            }

            let taken = book
                .lock()
                .await
                .take_with_policy(signal_id, now, self.timeframe_policy);
            if !matches!(taken, TakeOutcome::Taken(_)) {
                self.release(user_id, order.id).await;
                return Ok(self.blocked(
                    user_id,
                    &instrument,
                    Some(signal_id),
                    RiskViolation::SignalUnusable(taken.reason().unwrap_or_default()),
                ));
            }

            info!(
                order_id = %order.id,
                side = %order.side,
                size = %order.size,
                stop = %plan.stop_price,
                take_profit = %plan.take_profit_price,
                risk_pct = %plan.risk_pct,
                "주문 생성"
            );
            self.place(&lane, order).await
        }
        .instrument(span)
        .await
    }

    /// 열린 포지션을 시장가로 청산합니다.
    pub async fn close_position(
        &self,
        user_id: UserId,
        account_id: BrokerAccountId,
        instrument: &str,
    ) -> ExecutionResult<ExecutionOutcome> {
        let lane = self.owned_lane(user_id, account_id).await?;
        let span = lane_span!("close_position", user_id, account_id, instrument);
        async {
            let _lane_guard = self.lanes.acquire(user_id, instrument).await;
            let key = PositionKey::new(account_id, instrument);
            let position = self
                .ledger
                .user(user_id)
                .await
                .lock()
                .await
                .position(&key)
                .cloned()
                .ok_or_else(|| ExecutionError::PositionNotFound(key.to_string()))?;

            let side = if position.is_long() {
                trader_core::Side::Sell
            } else {
                trader_core::Side::Buy
            };
            let order = Order::new(
                user_id,
                account_id,
                instrument,
                side,
                position.net_size.abs(),
                position.mark_price,
            );
            info!(order_id = %order.id, size = %order.size, "포지션 청산 주문");
            self.place(&lane, order).await
        }
        .instrument(span)
        .await
    }

    /// 주문을 영속화하고 제출한 뒤 응답을 반영합니다.
    async fn place(&self, lane: &AccountLane, mut order: Order) -> ExecutionResult<ExecutionOutcome> {
        if let Err(e) = self.store.save_order(&order).await {
            self.release(order.user_id, order.id).await;
            return Err(e.into());
        }
        order.transition(OrderState::Submitted)?;
        if let Err(e) = self.store.save_order(&order).await {
            // Pending으로 남은 기록은 워치독이 거부 처리
            self.release(order.user_id, order.id).await;
            return Err(e.into());
        }

        match self.submit(lane, &order).await {
            Ok(ack) => self.apply_ack(lane, order, ack).await,
            Err(e) if e.is_retryable() || e.is_ambiguous() => {
                warn!(order_id = %order.id, error = %e, "제출 응답 없음, 워치독 대기");
                let degraded = self
                    .ledger
                    .user(order.user_id)
                    .await
                    .lock()
                    .await
                    .mark_degraded(lane.account_id);
                if degraded {
                    self.account_degraded(lane, format!("submit {}: {}", order.id, e))
                        .await;
                }
                Ok(ExecutionOutcome::Pending(order))
            }
            Err(e) => {
                let order = self.reject_order(order, e.to_string()).await?;
                Ok(ExecutionOutcome::Rejected(order))
            }
        }
    }

    async fn submit(&self, lane: &AccountLane, order: &Order) -> BrokerResult<OrderAck> {
        let retry = RetryConfig::new(self.config.submit_retries, self.config.retry_initial_ms);
        let timeout = self.config.submit_timeout();
        with_retry_if(&retry, "submit_order", BrokerError::is_retryable, |attempt| {
            let gateway = lane.gateway.clone();
            let order = order.clone();
            async move {
                if attempt > 0 {
                    debug!(order_id = %order.id, attempt, "같은 주문 ID로 재제출");
                }
                match tokio::time::timeout(timeout, gateway.submit_order(&order)).await {
                    Ok(result) => result,
                    Err(_) => Err(BrokerError::Timeout(format!("submit {}", order.id))),
                }
            }
        })
        .await
    }

    async fn apply_ack(
        &self,
        lane: &AccountLane,
        mut order: Order,
        ack: OrderAck,
    ) -> ExecutionResult<ExecutionOutcome> {
        order.broker_order_id = Some(ack.broker_order_id.clone());
        if !ack.protective_order_ids.is_empty() {
            order.protective_order_ids = ack.protective_order_ids.clone();
        }
        match ack.status {
            AckStatus::Filled { price } => {
                let order = self.commit_fill(lane, order, price).await?;
                Ok(ExecutionOutcome::Filled(order))
            }
            AckStatus::Accepted => {
                self.store.save_order(&order).await?;
                debug!(order_id = %order.id, broker_order_id = %ack.broker_order_id, "브로커 접수");
                Ok(ExecutionOutcome::Pending(order))
            }
            AckStatus::Rejected { reason } => {
                let order = self.reject_order(order, reason).await?;
                Ok(ExecutionOutcome::Rejected(order))
            }
            AckStatus::Cancelled => {
                let order = self.cancel_local(order).await?;
                Ok(ExecutionOutcome::Cancelled(order))
            }
        }
    }

    /// 체결을 원장과 저장소에 하나의 단위로 반영합니다.
    ///
    /// 저장소 커밋이 끝나기 전에는 원장을 바꾸지 않습니다. 커밋이 끝내 실패하면
    /// 주문은 `Submitted`로 남고 워치독이 다시 시도합니다.
    async fn commit_fill(
        &self,
        lane: &AccountLane,
        order: Order,
        price: Price,
    ) -> ExecutionResult<Order> {
        let mut filled = order;
        filled.mark_filled(price)?;

        let user_ledger = self.ledger.user(filled.user_id).await;
        {
            let mut ledger = user_ledger.lock().await;
            let position = ledger.preview_fill(&filled, price, &filled.protective_order_ids);
            self.persist_fill(&filled, &position).await?;
            ledger.install_fill(filled.id, position);
        }

        info!(
            order_id = %filled.id,
            instrument = %filled.instrument,
            side = %filled.side,
            size = %filled.size,
            price = %price,
            "주문 체결"
        );
        self.notifier.notify(NotificationEvent::OrderFilled {
            user_id: filled.user_id,
            account_id: filled.broker_account_id,
            order_id: filled.id,
            instrument: filled.instrument.clone(),
            side: filled.side,
            size: filled.size,
            price,
        });

        if let Err(e) = self.reconcile_account(lane.account_id).await {
            warn!(account_id = %lane.account_id, error = %e, "체결 후 정합성 검사 실패");
        }
        Ok(filled)
    }

    async fn persist_fill(&self, order: &Order, position: &Position) -> ExecutionResult<()> {
        let retry = RetryConfig::new(self.config.persist_retries, self.config.retry_initial_ms);
        let store = self.store.clone();
        with_retry_if(
            &retry,
            "commit_fill",
            |_: &trader_core::TraderError| true,
            move |_| {
                let store = store.clone();
                async move { store.commit_fill(order, position).await }
            },
        )
        .await
        .map_err(ExecutionError::from)
    }

    async fn reject_order(&self, mut order: Order, reason: String) -> ExecutionResult<Order> {
        order.mark_rejected(reason.clone())?;
        self.store.save_order(&order).await?;
        self.release(order.user_id, order.id).await;

        warn!(order_id = %order.id, instrument = %order.instrument, reason = %reason, "주문 거부");
        self.notifier.notify(NotificationEvent::OrderRejected {
            user_id: order.user_id,
            account_id: order.broker_account_id,
            order_id: order.id,
            instrument: order.instrument.clone(),
            reason,
        });
        Ok(order)
    }

    async fn cancel_local(&self, mut order: Order) -> ExecutionResult<Order> {
        order.transition(OrderState::Cancelled)?;
        self.store.save_order(&order).await?;
        self.release(order.user_id, order.id).await;
        info!(order_id = %order.id, "주문 취소");
        Ok(order)
    }

    async fn release(&self, user_id: UserId, order_id: Uuid) {
        if let Some(pct) = self
            .ledger
            .user(user_id)
            .await
            .lock()
            .await
            .budget_mut()
            .release(order_id)
        {
            debug!(order_id = %order_id, pct = %pct, "리스크 예약 해제");
        }
    }

    fn blocked(
        &self,
        user_id: UserId,
        instrument: &str,
        signal_id: Option<Uuid>,
        violation: RiskViolation,
    ) -> ExecutionOutcome {
        info!(
            user_id = %user_id,
            instrument,
            violation = %violation,
            "주문 차단"
        );
        self.notifier.notify(NotificationEvent::RiskBreach {
            user_id,
            instrument: instrument.to_string(),
            signal_id,
            violation: violation.clone(),
        });
        ExecutionOutcome::Blocked(violation)
    }

    // ==================== 브로커 이벤트 ====================

    /// 브로커가 알려온 체결을 반영합니다. 이미 체결된 주문이면 그대로 반환합니다.
    pub async fn on_fill(&self, order_id: Uuid, price: Price) -> ExecutionResult<Order> {
        let order = self.load_order(order_id).await?;
        let lane = self.account_lane(order.broker_account_id).await?;
        let _lane_guard = self.lanes.acquire(order.user_id, &order.instrument).await;

        // 대기 중에 상태가 바뀌었을 수 있음
        let order = self.load_order(order_id).await?;
        match order.state {
            OrderState::Filled => {
                debug!(order_id = %order_id, "이미 반영된 체결");
                Ok(order)
            }
            OrderState::Submitted => self.commit_fill(&lane, order, price).await,
            other => Err(trader_core::TraderError::InvalidState(format!(
                "{} 상태 주문 {}은 체결될 수 없습니다",
                other, order_id
            ))
            .into()),
        }
    }

    async fn load_order(&self, order_id: Uuid) -> ExecutionResult<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| ExecutionError::OrderNotFound(order_id.to_string()))
    }

    /// 사용자의 대기/제출 주문을 모두 취소합니다.
    ///
    /// 취소 전에 체결된 주문은 체결로 반영합니다. 종결된 주문은 건드리지 않습니다.
    pub async fn cancel_all(&self, user_id: UserId) -> ExecutionResult<CancelReport> {
        let orders = self.store.list_active_orders(Some(user_id)).await?;
        let mut report = CancelReport::default();
        for order in orders {
            let order_id = order.id;
            match self.cancel_one(order).await {
                Ok(Some(ExecutionOutcome::Cancelled(_))) => report.cancelled += 1,
                Ok(Some(ExecutionOutcome::Filled(_))) => report.filled += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "주문 취소 실패");
                    report.failed += 1;
                }
            }
        }
        info!(
            user_id = %user_id,
            cancelled = report.cancelled,
            filled = report.filled,
            failed = report.failed,
            "전체 취소"
        );
        Ok(report)
    }

    async fn cancel_one(&self, order: Order) -> ExecutionResult<Option<ExecutionOutcome>> {
        let lane = self.account_lane(order.broker_account_id).await?;
        let _lane_guard = self.lanes.acquire(order.user_id, &order.instrument).await;
        let order = self.load_order(order.id).await?;

        match order.state {
            OrderState::Pending => Ok(Some(ExecutionOutcome::Cancelled(
                self.cancel_local(order).await?,
            ))),
            OrderState::Submitted => {
                let ack = match tokio::time::timeout(
                    self.config.account_timeout(),
                    lane.gateway.cancel_order(order.id),
                )
                .await
                {
                    Ok(result) => result?,
                    Err(_) => return Err(BrokerError::Timeout(format!("cancel {}", order.id)).into()),
                };
                match ack {
                    CancelAck::Cancelled | CancelAck::NotFound => Ok(Some(
                        ExecutionOutcome::Cancelled(self.cancel_local(order).await?),
                    )),
                    CancelAck::AlreadyFilled { price } => Ok(Some(ExecutionOutcome::Filled(
                        self.commit_fill(&lane, order, price).await?,
                    ))),
                }
            }
            _ => Ok(None),
        }
    }

    // ==================== 워치독 ====================

    /// 창을 넘겨 응답이 없는 주문을 브로커에 조회해 종결합니다.
    ///
    /// - `Pending`: 제출 전에 멈춘 주문이므로 거부 처리
    /// - 브로커에 기록 없음: 거부 처리
    /// - 브로커가 체결/거부/취소를 보고: 그대로 반영
    ///
    /// 종결된 주문이 있는 계좌는 마지막에 정합성 검사를 합니다.
    pub async fn watchdog(&self, now: DateTime<Utc>) -> ExecutionResult<WatchdogReport> {
        let window = TimeDelta::seconds(self.config.watchdog_window_secs);
        let orders = self.store.list_active_orders(None).await?;
        let mut report = WatchdogReport::default();

        let mut touched: Vec<BrokerAccountId> = Vec::new();

        for order in orders.into_iter().filter(|o| now - o.updated_at >= window) {
            let order_id = order.id;
            let account_id = order.broker_account_id;
            match self.resolve_stuck(order).await {
                Ok(Stuck::Resolved(outcome)) => {
                    match outcome {
                        ExecutionOutcome::Filled(_) => report.filled += 1,
                        ExecutionOutcome::Rejected(_) => report.rejected += 1,
                        ExecutionOutcome::Cancelled(_) => report.cancelled += 1,
                        _ => report.unresolved += 1,
                    }
                    if !touched.contains(&account_id) {
                        touched.push(account_id);
                    }
                }
                Ok(Stuck::Waiting) => report.unresolved += 1,
                Ok(Stuck::Gone) => {}
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "워치독 처리 실패");
                    report.unresolved += 1;
                }
            }
        }

        for account_id in touched {
            if let Err(e) = self.reconcile_account(account_id).await {
                warn!(account_id = %account_id, error = %e, "워치독 후 정합성 검사 실패");
            }
        }

        if report != WatchdogReport::default() {
            info!(
                filled = report.filled,
                rejected = report.rejected,
                cancelled = report.cancelled,
                unresolved = report.unresolved,
                "워치독 실행"
            );
        }
        Ok(report)
    }

    async fn resolve_stuck(&self, order: Order) -> ExecutionResult<Stuck> {
        let lane = self.account_lane(order.broker_account_id).await?;
        let _lane_guard = self.lanes.acquire(order.user_id, &order.instrument).await;
        let order = self.load_order(order.id).await?;

        match order.state {
            OrderState::Pending => {
                let order = self
                    .reject_order(order, "제출되지 않은 주문".to_string())
                    .await?;
                Ok(Stuck::Resolved(ExecutionOutcome::Rejected(order)))
            }
            OrderState::Submitted => {
                let status = tokio::time::timeout(
                    self.config.account_timeout(),
                    lane.gateway.order_status(order.id),
                )
                .await;
                match status {
                    Ok(Ok(Some(ack))) if ack.status == AckStatus::Accepted => Ok(Stuck::Waiting),
                    Ok(Ok(Some(ack))) => Ok(Stuck::Resolved(self.apply_ack(&lane, order, ack).await?)),
                    Ok(Ok(None)) => {
                        let order = self
                            .reject_order(order, "no broker record".to_string())
                            .await?;
                        Ok(Stuck::Resolved(ExecutionOutcome::Rejected(order)))
                    }
                    Ok(Err(e)) => {
                        debug!(order_id = %order.id, error = %e, "주문 상태 조회 실패");
                        Ok(Stuck::Waiting)
                    }
                    Err(_) => Ok(Stuck::Waiting),
                }
            }
            _ => Ok(Stuck::Gone),
        }
    }

    // ==================== 정합성 ====================

    /// 브로커 상태와 원장을 맞춥니다. 브로커 쪽이 기준입니다.
    pub async fn reconcile_account(
        &self,
        account_id: BrokerAccountId,
    ) -> ExecutionResult<Vec<Divergence>> {
        self.reconcile(account_id, false).await
    }

    /// 사람이 요청한 재동기화. 브로커 상태를 채택하고 degraded를 해제합니다.
    pub async fn resync_account(
        &self,
        account_id: BrokerAccountId,
    ) -> ExecutionResult<Vec<Divergence>> {
        self.reconcile(account_id, true).await
    }

    async fn reconcile(
        &self,
        account_id: BrokerAccountId,
        resync: bool,
    ) -> ExecutionResult<Vec<Divergence>> {
        let lane = self.account_lane(account_id).await?;
        let user_ledger = self.ledger.user(lane.user_id).await;

        let state = match tokio::time::timeout(
            self.config.account_timeout(),
            lane.gateway.get_account_state(),
        )
        .await
        {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => return Err(self.reconciliation_failed(&lane, &user_ledger, e).await),
            Err(_) => {
                let e = BrokerError::Timeout("account state".to_string());
                return Err(self.reconciliation_failed(&lane, &user_ledger, e).await);
            }
        };

        let divergences = {
            let mut ledger = user_ledger.lock().await;
            let divergences = ledger.plan_reconcile(account_id, &state);
            for divergence in &divergences {
                self.store.save_position(&divergence.position).await?;
            }
            ledger.apply_reconcile(account_id, &state, &divergences, Utc::now());
            if resync {
                ledger.clear_degraded(account_id);
            }
            divergences
        };

        if resync {
            self.set_account_state(account_id, lane.gateway.connection_state())
                .await;
            info!(account_id = %account_id, divergences = divergences.len(), "계좌 재동기화");
        }

        for divergence in &divergences {
            warn!(
                account_id = %account_id,
                instrument = %divergence.position.instrument,
                local = %divergence.local_size,
                broker = %divergence.broker_size,
                action = %divergence.kind,
                "포지션 불일치, 브로커 상태 채택"
            );
            self.notifier
                .notify(NotificationEvent::ReconciliationDivergence {
                    user_id: lane.user_id,
                    account_id,
                    instrument: divergence.position.instrument.clone(),
                    local_size: divergence.local_size,
                    broker_size: divergence.broker_size,
                    action: divergence.kind.to_string(),
                });
        }
        Ok(divergences)
    }

    async fn reconciliation_failed(
        &self,
        lane: &AccountLane,
        user_ledger: &Mutex<UserLedger>,
        error: BrokerError,
    ) -> ExecutionError {
        let degraded = user_ledger
            .lock()
            .await
            .record_failure(lane.account_id, self.config.reconciliation_max_failures);
        warn!(account_id = %lane.account_id, error = %error, "계좌 조회 실패");

        if degraded {
            self.account_degraded(lane, error.to_string()).await;
        }
        ExecutionError::Broker(error)
    }

    /// degraded 전환을 알리고 저장된 계좌 상태에 반영합니다.
    async fn account_degraded(&self, lane: &AccountLane, reason: String) {
        warn!(account_id = %lane.account_id, reason = %reason, "계좌 degraded");
        self.notifier.notify(NotificationEvent::AccountDegraded {
            user_id: lane.user_id,
            account_id: lane.account_id,
            reason,
        });
        self.set_account_state(lane.account_id, ConnectionState::Degraded)
            .await;
    }

    async fn set_account_state(&self, account_id: BrokerAccountId, state: ConnectionState) {
        match self.store.get_account(account_id).await {
            Ok(Some(mut account)) => {
                account.connection_state = state;
                if let Err(e) = self.store.save_account(&account).await {
                    warn!(account_id = %account_id, error = %e, "계좌 상태 저장 실패");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(account_id = %account_id, error = %e, "계좌 조회 실패"),
        }
    }

    // ==================== 평가/유지보수 ====================

    /// 종목의 평가 가격을 모든 사용자 원장에 반영합니다.
    pub async fn mark_price(&self, instrument: &str, price: Price) {
        for user_id in self.ledger.users().await {
            self.ledger
                .user(user_id)
                .await
                .lock()
                .await
                .mark(instrument, price);
        }
    }

    /// 워치독과 정기 정합성 검사를 취소될 때까지 실행합니다.
    pub async fn run_maintenance(&self, cancel: CancellationToken) {
        let mut watchdog = tokio::time::interval(Duration::from_secs(
            self.config.watchdog_interval_secs.max(1),
        ));
        let mut reconciliation = tokio::time::interval(Duration::from_secs(
            self.config.reconciliation_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("실행 유지보수 루프 종료");
                    break;
                }
                _ = watchdog.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.watchdog(now).await {
                        warn!(error = %e, "워치독 실행 실패");
                    }
                    let pruned = self.prune_signals(now).await;
                    if pruned > 0 {
                        debug!(pruned, "만료 신호 정리");
                    }
                }
                _ = reconciliation.tick() => {
                    for account_id in self.account_ids().await {
                        if let Err(e) = self.reconcile_account(account_id).await {
                            debug!(account_id = %account_id, error = %e, "정기 정합성 검사 실패");
                        }
                    }
                }
            }
        }
    }
}
