//! 시세 피드 어댑터.
//!
//! 브로커 연결당 하나의 수집 태스크가 종목별 고정 크기 링 버퍼에 틱을
//! 적재합니다. 버퍼가 가득 차면 가장 오래된 틱을 버리고 카운터를 올립니다.
//! 스트림 종료나 에러가 발생하면 지수 백오프로 재연결하며, 그동안 연결
//! 상태는 `Degraded`입니다.

use chrono::{DateTime, Utc};
use futures::stream::{select_all, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trader_core::{ConnectionState, FeedConfig, Tick};

use crate::retry::RetryConfig;
use crate::traits::{BrokerGateway, TickStream};
use crate::{BrokerError, BrokerResult};

// ============================================================================
// 링 버퍼
// ============================================================================

/// `TickBuffer::push` 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 적재됨
    Accepted,
    /// 적재됨, 가장 오래된 틱이 밀려남
    DroppedOldest,
    /// 마지막으로 받은 틱보다 오래되어 버림
    OutOfOrder,
}

/// 종목별 고정 크기 틱 링 버퍼.
#[derive(Debug)]
pub struct TickBuffer {
    instrument: String,
    capacity: usize,
    ticks: VecDeque<Tick>,
    last_accepted: Option<DateTime<Utc>>,
    dropped: u64,
    out_of_order: u64,
}

impl TickBuffer {
    /// 새 버퍼를 생성합니다. 용량은 최소 1입니다.
    pub fn new(instrument: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            instrument: instrument.into(),
            capacity,
            ticks: VecDeque::with_capacity(capacity),
            last_accepted: None,
            dropped: 0,
            out_of_order: 0,
        }
    }

    /// 틱을 적재합니다.
    pub fn push(&mut self, tick: Tick) -> PushOutcome {
        if self.last_accepted.is_some_and(|last| tick.timestamp < last) {
            self.out_of_order += 1;
            debug!(instrument = %self.instrument, ts = %tick.timestamp, "순서가 뒤바뀐 틱 버림");
            return PushOutcome::OutOfOrder;
        }
        self.last_accepted = Some(tick.timestamp);

        let mut outcome = PushOutcome::Accepted;
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
            self.dropped += 1;
            outcome = PushOutcome::DroppedOldest;
            if self.dropped == 1 || self.dropped % 100 == 0 {
                warn!(
                    instrument = %self.instrument,
                    capacity = self.capacity,
                    dropped = self.dropped,
                    "틱 버퍼 오버플로, 오래된 틱 폐기"
                );
            }
        }
        self.ticks.push_back(tick);
        outcome
    }

    /// 버퍼의 틱을 시간순으로 모두 꺼냅니다.
    pub fn drain(&mut self) -> Vec<Tick> {
        self.ticks.drain(..).collect()
    }

    /// 버퍼에 남은 틱 수.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// 버퍼가 비었는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// 최대 보관 틱 수. 가득 차면 가장 오래된 틱부터 폐기합니다.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 누적 폐기 수.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// 누적 역순 틱 수.
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }
}

// ============================================================================
// 어댑터
// ============================================================================

/// 피드 통계 스냅샷.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// 수신한 틱 수
    pub received: u64,
    /// 버퍼 용량 초과로 폐기된 틱 수
    pub dropped: u64,
    /// 타임스탬프가 역순이라 거부된 틱 수
    pub out_of_order: u64,
    /// 재연결 횟수
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    out_of_order: AtomicU64,
    reconnects: AtomicU64,
}

struct Shared {
    buffers: Mutex<HashMap<String, TickBuffer>>,
    counters: Counters,
    state: RwLock<ConnectionState>,
    notify: Notify,
    capacity: usize,
}

impl Shared {
    fn buffers(&self) -> MutexGuard<'_, HashMap<String, TickBuffer>> {
        match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// 브로커 연결 하나에 대한 시세 수집기.
#[derive(Clone)]
pub struct FeedAdapter {
    gateway: Arc<dyn BrokerGateway>,
    instruments: Vec<String>,
    config: FeedConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl FeedAdapter {
    /// 새 어댑터를 생성합니다. 수집은 `start`에서 시작합니다.
    pub fn new(gateway: Arc<dyn BrokerGateway>, instruments: Vec<String>, config: FeedConfig) -> Self {
        let shared = Shared {
            buffers: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            state: RwLock::new(ConnectionState::Disconnected),
            notify: Notify::new(),
            capacity: config.buffer_capacity,
        };
        Self {
            gateway,
            instruments,
            config,
            shared: Arc::new(shared),
            cancel: CancellationToken::new(),
        }
    }

    /// 수집 태스크를 시작합니다.
    pub fn start(&self) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.run().await })
    }

    /// 수집을 중단합니다.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// 종료 토큰.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 현재 연결 상태.
    pub fn connection_state(&self) -> ConnectionState {
        match self.shared.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// 새 틱이 적재될 때까지 대기합니다.
    pub async fn notified(&self) {
        self.shared.notify.notified().await
    }

    /// 틱을 직접 적재합니다 (재생/페이퍼 모드).
    pub fn ingest(&self, tick: Tick) -> PushOutcome {
        let outcome = {
            let mut buffers = self.shared.buffers();
            buffers
                .entry(tick.instrument.clone())
                .or_insert_with(|| TickBuffer::new(tick.instrument.clone(), self.shared.capacity))
                .push(tick)
        };
        let counters = &self.shared.counters;
        counters.received.fetch_add(1, Ordering::Relaxed);
        match outcome {
            PushOutcome::Accepted => {}
            PushOutcome::DroppedOldest => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::OutOfOrder => {
                counters.out_of_order.fetch_add(1, Ordering::Relaxed);
                return outcome;
            }
        }
        self.shared.notify.notify_one();
        outcome
    }

    /// 종목 버퍼의 틱을 꺼냅니다.
    pub fn drain(&self, instrument: &str) -> Vec<Tick> {
        self.shared
            .buffers()
            .get_mut(instrument)
            .map(TickBuffer::drain)
            .unwrap_or_default()
    }

    /// 모든 종목의 틱을 시간순으로 꺼냅니다.
    pub fn drain_all(&self) -> Vec<Tick> {
        let mut ticks: Vec<Tick> = self
            .shared
            .buffers()
            .values_mut()
            .flat_map(TickBuffer::drain)
            .collect();
        ticks.sort_by_key(|t| t.timestamp);
        ticks
    }

    /// 통계 스냅샷.
    pub fn stats(&self) -> FeedStats {
        let c = &self.shared.counters;
        FeedStats {
            received: c.received.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            out_of_order: c.out_of_order.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
        }
    }

    async fn subscribe_all(&self) -> BrokerResult<Vec<TickStream>> {
        let timeout = Duration::from_millis(self.config.subscribe_timeout_ms);
        let mut streams = Vec::with_capacity(self.instruments.len());
        for instrument in &self.instruments {
            let stream = tokio::time::timeout(timeout, self.gateway.subscribe(instrument))
                .await
                .map_err(|_| BrokerError::Timeout(format!("subscribe {}", instrument)))??;
            streams.push(stream);
        }
        Ok(streams)
    }

    async fn run(&self) {
        let retry = RetryConfig::new(u32::MAX, self.config.reconnect_initial_ms)
            .with_max_delay(self.config.reconnect_max_ms);
        let idle = Duration::from_secs(self.config.idle_timeout_secs.max(1));
        let mut attempt: u32 = 0;

        self.shared.set_state(ConnectionState::Connecting);
        loop {
            match self.subscribe_all().await {
                Ok(streams) => {
                    self.shared.set_state(ConnectionState::Connected);
                    info!(
                        broker = self.gateway.name(),
                        instruments = self.instruments.len(),
                        "피드 구독 완료"
                    );
                    attempt = 0;
                    let mut merged = select_all(streams);
                    loop {
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                self.shared.set_state(ConnectionState::Disconnected);
                                return;
                            }
                            next = tokio::time::timeout(idle, merged.next()) => match next {
                                Ok(Some(Ok(tick))) => {
                                    self.ingest(tick);
                                }
                                Ok(Some(Err(e))) => {
                                    warn!(broker = self.gateway.name(), error = %e, "피드 에러, 재연결");
                                    break;
                                }
                                Ok(None) => {
                                    warn!(broker = self.gateway.name(), "피드 스트림 종료, 재연결");
                                    break;
                                }
                                Err(_) => {
                                    warn!(broker = self.gateway.name(), idle_secs = idle.as_secs(), "피드 유휴 시간 초과, 재연결");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(broker = self.gateway.name(), error = %e, attempt, "피드 구독 실패");
                }
            }

            self.shared.set_state(ConnectionState::Degraded);
            self.shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            let delay = retry.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;
    use trader_core::{
        AccountState, BrokerCredentials, BrokerType, CancelAck, Order, OrderAck,
    };
    use uuid::Uuid;

    use crate::traits::ConnectionHandle;

    fn tick_at(secs: i64) -> Tick {
        Tick::new(
            "X",
            Utc.timestamp_opt(secs, 0).unwrap(),
            dec!(100),
            dec!(101),
            dec!(1),
        )
    }

    #[test]
    fn test_buffer_drops_oldest() {
        let mut buffer = TickBuffer::new("X", 3);
        for i in 0..5 {
            buffer.push(tick_at(i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        let drained = buffer.drain();
        assert_eq!(drained[0].timestamp.timestamp(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_rejects_out_of_order() {
        let mut buffer = TickBuffer::new("X", 10);
        assert_eq!(buffer.push(tick_at(10)), PushOutcome::Accepted);
        assert_eq!(buffer.push(tick_at(5)), PushOutcome::OutOfOrder);
        assert_eq!(buffer.push(tick_at(10)), PushOutcome::Accepted);
        assert_eq!(buffer.out_of_order(), 1);
        assert_eq!(buffer.len(), 2);
    }

    /// 한 번에 틱 하나만 보내고 스트림을 끝내는 게이트웨이.
    struct OneShotGateway {
        subscribes: AtomicU32,
    }

    #[async_trait]
    impl BrokerGateway for OneShotGateway {
        fn name(&self) -> &str {
            "one-shot"
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn connect(&self, _: &BrokerCredentials) -> BrokerResult<ConnectionHandle> {
            Ok(ConnectionHandle::new(BrokerType::Simulated))
        }

        async fn subscribe(&self, _instrument: &str) -> BrokerResult<TickStream> {
            let n = self.subscribes.fetch_add(1, Ordering::SeqCst) as i64;
            Ok(futures::stream::iter(vec![Ok(tick_at(n))]).boxed())
        }

        async fn submit_order(&self, _: &Order) -> BrokerResult<OrderAck> {
            Err(BrokerError::NotSupported("feed only".into()))
        }

        async fn cancel_order(&self, _: Uuid) -> BrokerResult<CancelAck> {
            Err(BrokerError::NotSupported("feed only".into()))
        }

        async fn get_account_state(&self) -> BrokerResult<AccountState> {
            Err(BrokerError::NotSupported("feed only".into()))
        }

        async fn order_status(&self, _: Uuid) -> BrokerResult<Option<OrderAck>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_end() {
        let gateway = Arc::new(OneShotGateway {
            subscribes: AtomicU32::new(0),
        });
        let config = FeedConfig {
            reconnect_initial_ms: 10,
            reconnect_max_ms: 10,
            ..FeedConfig::default()
        };
        let adapter = FeedAdapter::new(gateway.clone(), vec!["X".to_string()], config);
        let handle = adapter.start();

        tokio::time::sleep(Duration::from_millis(55)).await;
        adapter.shutdown();
        handle.await.unwrap();

        let stats = adapter.stats();
        assert!(stats.reconnects >= 2);
        assert!(gateway.subscribes.load(Ordering::SeqCst) >= 3);
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
        let ticks = adapter.drain("X");
        assert_eq!(ticks.len() as u64, stats.received - stats.out_of_order);
    }

    #[tokio::test]
    async fn test_ingest_wakes_consumer() {
        let gateway = Arc::new(OneShotGateway {
            subscribes: AtomicU32::new(0),
        });
        let adapter = FeedAdapter::new(gateway, vec![], FeedConfig::default());
        let waiter = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter.notified().await;
                adapter.drain("X")
            })
        };
        tokio::task::yield_now().await;
        adapter.ingest(tick_at(1));
        let drained = waiter.await.unwrap();
        assert_eq!(drained.len(), 1);
    }
}
