//! 모의 브로커 구현.

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use trader_core::{
    AccountState, AckStatus, BrokerCredentials, BrokerPosition, BrokerType, CancelAck,
    ConnectionState, Order, OrderAck, Price, Quantity, Side, Tick,
};
use uuid::Uuid;

use crate::traits::{BrokerGateway, ConnectionHandle, TickStream};
use crate::{BrokerError, BrokerResult};

/// 시장가 주문 체결 시점.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// 제출 즉시 체결
    #[default]
    Immediate,
    /// 접수만 하고 `fill_accepted` 호출 시 체결
    Deferred,
}

/// 모의 브로커 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// 초기 현금 잔고
    pub initial_balance: Decimal,
    /// 거래 수수료율 (0.001 = 0.1%)
    pub fee_rate: Decimal,
    /// 시장가 슬리피지율
    pub slippage_rate: Decimal,
    /// 체결 시점
    #[serde(default)]
    pub fill_mode: FillMode,
    /// 요청 지연 (밀리초)
    #[serde(default)]
    pub latency_ms: u64,
    /// 시세 브로드캐스트 버퍼
    #[serde(default = "default_tick_channel")]
    pub tick_channel_capacity: usize,
}

fn default_tick_channel() -> usize {
    4096
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_rate: Decimal::ZERO,
            slippage_rate: Decimal::ZERO,
            fill_mode: FillMode::Immediate,
            latency_ms: 0,
            tick_channel_capacity: default_tick_channel(),
        }
    }
}

impl SimulatedConfig {
    /// 초기 잔고를 설정합니다.
    pub fn with_initial_balance(mut self, amount: Decimal) -> Self {
        self.initial_balance = amount;
        self
    }

    /// 수수료율을 설정합니다.
    pub fn with_fee_rate(mut self, rate: Decimal) -> Self {
        self.fee_rate = rate;
        self
    }

    /// 슬리피지율을 설정합니다.
    pub fn with_slippage_rate(mut self, rate: Decimal) -> Self {
        self.slippage_rate = rate;
        self
    }

    /// 체결 시점을 설정합니다.
    pub fn with_fill_mode(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    /// 요청 지연을 설정합니다.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone)]
struct SimOrder {
    order: Order,
    ack: OrderAck,
}

#[derive(Debug, Clone)]
struct SimPosition {
    net_size: Quantity,
    entry_price: Price,
    stop_price: Option<Price>,
    take_profit_price: Option<Price>,
}

#[derive(Debug, Default)]
struct Faults {
    reject_next: Option<String>,
    drop_acks: u32,
    lose_orders: u32,
    fail_account_queries: u32,
}

#[derive(Debug)]
struct SimState {
    cash: Decimal,
    quotes: HashMap<String, Tick>,
    orders: HashMap<Uuid, SimOrder>,
    positions: HashMap<String, SimPosition>,
    faults: Faults,
}

/// 페이퍼 트레이딩 브로커.
pub struct SimulatedBroker {
    config: SimulatedConfig,
    connection: StdRwLock<ConnectionState>,
    state: Arc<RwLock<SimState>>,
    ticks: broadcast::Sender<Tick>,
    broker_orders: AtomicU64,
}

impl SimulatedBroker {
    /// 새 모의 브로커를 생성합니다.
    pub fn new(config: SimulatedConfig) -> Self {
        let (ticks, _) = broadcast::channel(config.tick_channel_capacity.max(1));
        let state = SimState {
            cash: config.initial_balance,
            quotes: HashMap::new(),
            orders: HashMap::new(),
            positions: HashMap::new(),
            faults: Faults::default(),
        };
        Self {
            config,
            connection: StdRwLock::new(ConnectionState::Disconnected),
            state: Arc::new(RwLock::new(state)),
            ticks,
            broker_orders: AtomicU64::new(0),
        }
    }

    fn set_connection(&self, next: ConnectionState) {
        match self.connection.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn ensure_connected(&self) -> BrokerResult<()> {
        match self.connection_state() {
            ConnectionState::Connected | ConnectionState::Degraded => Ok(()),
            _ => Err(BrokerError::NotConnected),
        }
    }

    // ==================== 시세 ====================

    /// 호가를 주입합니다. 구독자에게 전달되고 보호 주문을 평가합니다.
    pub async fn push_tick(&self, tick: Tick) {
        {
            let mut state = self.state.write().await;
            state.quotes.insert(tick.instrument.clone(), tick.clone());
            Self::trigger_protection(&mut state, &tick, self.config.fee_rate);
        }
        // 구독자가 없으면 전송 실패는 무시
        let _ = self.ticks.send(tick);
    }

    fn trigger_protection(state: &mut SimState, tick: &Tick, fee_rate: Decimal) {
        let Some(position) = state.positions.get(&tick.instrument).cloned() else {
            return;
        };
        let price = tick.mid();
        let long = position.net_size > Decimal::ZERO;
        let stop_hit = position
            .stop_price
            .is_some_and(|stop| if long { price <= stop } else { price >= stop });
        let target_hit = position
            .take_profit_price
            .is_some_and(|tp| if long { price >= tp } else { price <= tp });

        if stop_hit || target_hit {
            let exit = if stop_hit {
                position.stop_price.unwrap_or(price)
            } else {
                position.take_profit_price.unwrap_or(price)
            };
            info!(
                instrument = %tick.instrument,
                exit = %exit,
                reason = if stop_hit { "stop_loss" } else { "take_profit" },
                "보호 주문 트리거"
            );
            let notional = exit * position.net_size;
            state.cash += notional - notional.abs() * fee_rate;
            state.positions.remove(&tick.instrument);
        }
    }

    // ==================== 체결 ====================

    fn fill_price(&self, state: &SimState, order: &Order) -> Price {
        let base = state
            .quotes
            .get(&order.instrument)
            .map(|t| match order.side {
                Side::Buy => t.ask.max(t.mid()),
                Side::Sell => t.bid.min(t.mid()),
            })
            .unwrap_or(order.entry_price);
        match order.side {
            Side::Buy => base * (Decimal::ONE + self.config.slippage_rate),
            Side::Sell => base * (Decimal::ONE - self.config.slippage_rate),
        }
    }

    fn apply_fill(state: &mut SimState, order: &Order, price: Price, fee_rate: Decimal) {
        let delta = order.signed_size();
        let notional = price * order.size;
        state.cash -= delta * price + notional * fee_rate;

        let entry = state
            .positions
            .entry(order.instrument.clone())
            .or_insert(SimPosition {
                net_size: Decimal::ZERO,
                entry_price: price,
                stop_price: None,
                take_profit_price: None,
            });

        let same_direction =
            entry.net_size.is_zero() || entry.net_size.is_sign_positive() == delta.is_sign_positive();
        if same_direction {
            let total = entry.net_size.abs() + order.size;
            entry.entry_price = (entry.entry_price * entry.net_size.abs() + price * order.size) / total;
            entry.stop_price = order.stop_price;
            entry.take_profit_price = order.take_profit_price;
        } else if order.size > entry.net_size.abs() {
            entry.entry_price = price;
            entry.stop_price = order.stop_price;
            entry.take_profit_price = order.take_profit_price;
        }
        entry.net_size += delta;

        if entry.net_size.is_zero() {
            state.positions.remove(&order.instrument);
        }
    }

    /// `Deferred` 모드에서 접수된 주문을 체결합니다.
    pub async fn fill_accepted(&self, order_id: Uuid) -> BrokerResult<Price> {
        let mut state = self.state.write().await;
        let Some(record) = state.orders.get(&order_id).cloned() else {
            return Err(BrokerError::OrderNotFound(order_id.to_string()));
        };
        if record.ack.status != AckStatus::Accepted {
            return Err(BrokerError::Rejected(format!(
                "주문 {}은 체결 대기 상태가 아닙니다",
                order_id
            )));
        }
        let price = self.fill_price(&state, &record.order);
        Self::apply_fill(&mut state, &record.order, price, self.config.fee_rate);
        if let Some(entry) = state.orders.get_mut(&order_id) {
            entry.ack.status = AckStatus::Filled { price };
        }
        Ok(price)
    }

    // ==================== 장애 주입 ====================

    /// 다음 주문을 거부합니다.
    pub async fn reject_next_order(&self, reason: impl Into<String>) {
        self.state.write().await.faults.reject_next = Some(reason.into());
    }

    /// 다음 `count`개 주문은 처리하지만 응답을 유실합니다 (타임아웃 반환).
    pub async fn drop_next_acks(&self, count: u32) {
        self.state.write().await.faults.drop_acks = count;
    }

    /// 다음 `count`개 주문은 브로커에 도달하지 않습니다 (타임아웃 반환).
    pub async fn lose_next_orders(&self, count: u32) {
        self.state.write().await.faults.lose_orders = count;
    }

    /// 다음 `count`번의 계좌 조회를 실패시킵니다.
    pub async fn fail_account_queries(&self, count: u32) {
        self.state.write().await.faults.fail_account_queries = count;
    }

    /// 원장이 모르는 포지션을 브로커 측에 직접 만듭니다.
    pub async fn inject_position(&self, instrument: &str, net_size: Quantity, entry_price: Price) {
        let mut state = self.state.write().await;
        if net_size.is_zero() {
            state.positions.remove(instrument);
        } else {
            state.positions.insert(
                instrument.to_string(),
                SimPosition {
                    net_size,
                    entry_price,
                    stop_price: None,
                    take_profit_price: None,
                },
            );
        }
    }

    /// 연결을 끊습니다 (재연결 테스트용).
    pub fn disconnect(&self) {
        self.set_connection(ConnectionState::Disconnected);
    }

    /// 브로커 측에 생성된 주문 수.
    pub fn broker_order_count(&self) -> u64 {
        self.broker_orders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerGateway for SimulatedBroker {
    fn name(&self) -> &str {
        "simulated"
    }

    fn connection_state(&self) -> ConnectionState {
        match self.connection.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn connect(&self, credentials: &BrokerCredentials) -> BrokerResult<ConnectionHandle> {
        self.set_connection(ConnectionState::Connecting);
        self.simulate_latency().await;
        if credentials.api_key.is_empty() {
            self.set_connection(ConnectionState::Disconnected);
            return Err(BrokerError::Unauthorized("empty api key".to_string()));
        }
        self.set_connection(ConnectionState::Connected);
        info!(broker = "simulated", "Connected");
        Ok(ConnectionHandle::new(BrokerType::Simulated))
    }

    async fn subscribe(&self, instrument: &str) -> BrokerResult<TickStream> {
        self.ensure_connected()?;
        let instrument = instrument.to_string();
        let rx = self.ticks.subscribe();

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(tick) => return Some((Ok(tick), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "모의 시세 수신 지연으로 틱 유실");
                        return Some((
                            Err(BrokerError::Stream(format!("lagged by {} ticks", skipped))),
                            rx,
                        ));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |item| {
            let keep = match item {
                Ok(tick) => tick.instrument == instrument,
                Err(_) => true,
            };
            futures::future::ready(keep)
        });

        Ok(stream.boxed())
    }

    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck> {
        self.ensure_connected()?;
        self.simulate_latency().await;
        let mut state = self.state.write().await;

        // 멱등성: 같은 클라이언트 주문 ID는 기존 주문을 반환
        if let Some(existing) = state.orders.get(&order.id) {
            debug!(order_id = %order.id, "중복 제출, 기존 주문 반환");
            return Ok(existing.ack.clone());
        }

        if state.faults.lose_orders > 0 {
            state.faults.lose_orders -= 1;
            return Err(BrokerError::Timeout(format!("submit {}", order.id)));
        }

        let sequence = self.broker_orders.fetch_add(1, Ordering::SeqCst) + 1;
        let broker_order_id = format!("SIM-{}", sequence);

        let status = if let Some(reason) = state.faults.reject_next.take() {
            AckStatus::Rejected { reason }
        } else if order.size <= Decimal::ZERO {
            AckStatus::Rejected {
                reason: "invalid size".to_string(),
            }
        } else {
            match self.config.fill_mode {
                FillMode::Immediate => {
                    let price = self.fill_price(&state, order);
                    Self::apply_fill(&mut state, order, price, self.config.fee_rate);
                    AckStatus::Filled { price }
                }
                FillMode::Deferred => AckStatus::Accepted,
            }
        };

        let mut protective_order_ids = Vec::new();
        if !matches!(status, AckStatus::Rejected { .. }) {
            if order.stop_price.is_some() {
                protective_order_ids.push(format!("{}-SL", broker_order_id));
            }
            if order.take_profit_price.is_some() {
                protective_order_ids.push(format!("{}-TP", broker_order_id));
            }
        }

        let ack = OrderAck {
            order_id: order.id,
            broker_order_id,
            status,
            protective_order_ids,
        };
        state.orders.insert(
            order.id,
            SimOrder {
                order: order.clone(),
                ack: ack.clone(),
            },
        );

        if state.faults.drop_acks > 0 {
            state.faults.drop_acks -= 1;
            return Err(BrokerError::Timeout(format!("ack lost for {}", order.id)));
        }
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: Uuid) -> BrokerResult<CancelAck> {
        self.ensure_connected()?;
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let Some(record) = state.orders.get_mut(&order_id) else {
            return Ok(CancelAck::NotFound);
        };
        match record.ack.status.clone() {
            AckStatus::Accepted => {
                record.ack.status = AckStatus::Cancelled;
                Ok(CancelAck::Cancelled)
            }
            AckStatus::Filled { price } => Ok(CancelAck::AlreadyFilled { price }),
            AckStatus::Cancelled | AckStatus::Rejected { .. } => Ok(CancelAck::Cancelled),
        }
    }

    async fn get_account_state(&self) -> BrokerResult<AccountState> {
        self.ensure_connected()?;
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        if state.faults.fail_account_queries > 0 {
            state.faults.fail_account_queries -= 1;
            return Err(BrokerError::Timeout("account query".to_string()));
        }

        let mut equity = state.cash;
        let mut positions = Vec::with_capacity(state.positions.len());
        for (instrument, position) in &state.positions {
            let mark = state
                .quotes
                .get(instrument)
                .map(|t| t.mid())
                .unwrap_or(position.entry_price);
            equity += mark * position.net_size;
            positions.push(BrokerPosition {
                instrument: instrument.clone(),
                net_size: position.net_size,
                entry_price: position.entry_price,
            });
        }
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        Ok(AccountState {
            balance: state.cash,
            equity,
            positions,
        })
    }

    async fn order_status(&self, order_id: Uuid) -> BrokerResult<Option<OrderAck>> {
        self.ensure_connected()?;
        Ok(self
            .state
            .read()
            .await
            .orders
            .get(&order_id)
            .map(|r| r.ack.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trader_core::{BrokerAccountId, UserId};

    async fn connected(config: SimulatedConfig) -> SimulatedBroker {
        let broker = SimulatedBroker::new(config);
        broker
            .connect(&BrokerCredentials::new("paper", "paper"))
            .await
            .unwrap();
        broker
    }

    fn tick(bid: Decimal, ask: Decimal) -> Tick {
        Tick::new("X", Utc::now(), bid, ask, dec!(1))
    }

    fn buy(size: Decimal) -> Order {
        Order::new(UserId(1), BrokerAccountId::new(), "X", Side::Buy, size, dec!(100))
    }

    #[tokio::test]
    async fn test_duplicate_submission_creates_one_broker_order() {
        let broker = connected(SimulatedConfig::default()).await;
        broker.push_tick(tick(dec!(99), dec!(101))).await;

        let order = buy(dec!(2));
        let first = broker.submit_order(&order).await.unwrap();
        let second = broker.submit_order(&order).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.broker_order_count(), 1);
        let account = broker.get_account_state().await.unwrap();
        assert_eq!(account.position("X").unwrap().net_size, dec!(2));
    }

    #[tokio::test]
    async fn test_dropped_ack_is_recoverable_by_resubmit() {
        let broker = connected(SimulatedConfig::default()).await;
        broker.drop_next_acks(1).await;

        let order = buy(dec!(1));
        let err = broker.submit_order(&order).await.unwrap_err();
        assert!(err.is_ambiguous());

        let ack = broker.submit_order(&order).await.unwrap();
        assert!(matches!(ack.status, AckStatus::Filled { .. }));
        assert_eq!(broker.broker_order_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_order_is_unknown() {
        let broker = connected(SimulatedConfig::default()).await;
        broker.lose_next_orders(1).await;
        let order = buy(dec!(1));
        assert!(broker.submit_order(&order).await.is_err());
        assert!(broker.order_status(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deferred_fill_and_cancel() {
        let broker = connected(SimulatedConfig::default().with_fill_mode(FillMode::Deferred)).await;
        let a = buy(dec!(1));
        let b = buy(dec!(1));
        assert_eq!(broker.submit_order(&a).await.unwrap().status, AckStatus::Accepted);
        broker.submit_order(&b).await.unwrap();

        let price = broker.fill_accepted(a.id).await.unwrap();
        assert_eq!(
            broker.cancel_order(a.id).await.unwrap(),
            CancelAck::AlreadyFilled { price }
        );
        assert_eq!(broker.cancel_order(b.id).await.unwrap(), CancelAck::Cancelled);
        assert_eq!(broker.cancel_order(Uuid::new_v4()).await.unwrap(), CancelAck::NotFound);
    }

    #[tokio::test]
    async fn test_stop_loss_triggers_on_tick() {
        let broker = connected(SimulatedConfig::default()).await;
        broker.push_tick(tick(dec!(100), dec!(100))).await;

        let order = buy(dec!(1)).with_protection(Some(dec!(95)), Some(dec!(110)));
        let ack = broker.submit_order(&order).await.unwrap();
        assert_eq!(ack.protective_order_ids.len(), 2);

        broker.push_tick(tick(dec!(94), dec!(94))).await;
        let account = broker.get_account_state().await.unwrap();
        assert!(account.positions.is_empty());
        assert_eq!(account.balance, dec!(9995));
    }

    #[tokio::test]
    async fn test_subscription_filters_instrument() {
        let broker = connected(SimulatedConfig::default()).await;
        let mut stream = broker.subscribe("X").await.unwrap();

        broker
            .push_tick(Tick::new("Y", Utc::now(), dec!(1), dec!(1), dec!(1)))
            .await;
        broker.push_tick(tick(dec!(10), dec!(12))).await;

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.instrument, "X");
        assert_eq!(received.mid(), dec!(11));
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let broker = SimulatedBroker::new(SimulatedConfig::default());
        assert!(matches!(
            broker.submit_order(&buy(dec!(1))).await,
            Err(BrokerError::NotConnected)
        ));
    }
}
