//! Deriv 브로커 게이트웨이.
//!
//! Deriv WebSocket API 연결 하나로 요청/응답과 시세 구독을 모두 처리합니다.
//! 요청은 `req_id`로 응답과 짝지어지고, 구독한 `tick` 메시지는 종목 스트림으로
//! 흘려보냅니다.
//!
//! 주문은 스테이크 기반 CALL/PUT 계약 매수입니다. 주문 수량이 스테이크
//! 금액이며, 브로커가 보고하는 포지션 수량도 열린 계약 스테이크의 합입니다.
//! 신호 없는 반대 방향 주문(청산)은 열린 계약을 시장가로 매도합니다.
//!
//! Deriv 매수에는 클라이언트 주문 ID가 없습니다. 주문 ID는 `passthrough`에
//! 실어 보내 늦게 도착한 응답도 주문에 연결하고, 결과를 확인하지 못한
//! 주문은 다시 매수하지 않습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock as StdRwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use trader_core::{
    decimal_from_f64, AccountState, AckStatus, BrokerCredentials, BrokerPosition, BrokerType,
    CancelAck, ConnectionState, Order, OrderAck, Price, Side, Tick,
};
use uuid::Uuid;

use crate::traits::{BrokerGateway, ConnectionHandle, TickStream};
use crate::{BrokerError, BrokerResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// 설정
// ============================================================================

/// Deriv 연결 설정. API 토큰은 `connect` 시점에 전달됩니다.
#[derive(Debug, Clone)]
pub struct DerivConfig {
    /// 애플리케이션 ID
    pub app_id: String,
    /// 계좌 통화
    pub currency: String,
    /// 계약 기간
    pub contract_duration: u32,
    /// 계약 기간 단위 (t, s, m, h, d)
    pub duration_unit: String,
    /// 요청 타임아웃 (밀리초)
    pub request_timeout_ms: u64,
    /// 시세 브로드캐스트 버퍼
    pub tick_channel_capacity: usize,
    /// WebSocket URL 재정의 (테스트용)
    pub ws_url: Option<String>,
}

impl Default for DerivConfig {
    fn default() -> Self {
        Self {
            app_id: "1089".to_string(),
            currency: "USD".to_string(),
            contract_duration: 5,
            duration_unit: "m".to_string(),
            request_timeout_ms: 30_000,
            tick_channel_capacity: 1024,
            ws_url: None,
        }
    }
}

impl DerivConfig {
    /// WebSocket 기본 URL을 재정의합니다.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// 요청 타임아웃을 설정합니다.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 접속 URL (`app_id` 포함).
    pub fn endpoint(&self) -> String {
        let base = self
            .ws_url
            .as_deref()
            .unwrap_or("wss://ws.derivws.com/websockets/v3");
        format!("{}?app_id={}", base, self.app_id)
    }
}

// ============================================================================
// API 메시지 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct DerivError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DerivTick {
    symbol: String,
    epoch: i64,
    quote: f64,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DerivBuy {
    contract_id: i64,
    buy_price: f64,
}

#[derive(Debug, Deserialize)]
struct DerivSell {
    sold_for: f64,
}

#[derive(Debug, Deserialize)]
struct DerivBalance {
    balance: f64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct DerivPortfolio {
    #[serde(default)]
    contracts: Vec<DerivContract>,
}

#[derive(Debug, Deserialize)]
struct DerivContract {
    contract_id: i64,
    symbol: String,
    contract_type: String,
    buy_price: f64,
}

/// 매수 요청에 실어 보내고 `echo_req`로 돌려받는 주문 정보.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Passthrough {
    order_id: Uuid,
    symbol: String,
    side: Side,
    reference_price: Price,
}

// ============================================================================
// 공유 상태
// ============================================================================

#[derive(Debug, Clone)]
struct Contract {
    contract_id: i64,
    symbol: String,
    side: Side,
    stake: Decimal,
    price: Price,
    open: bool,
}

impl Contract {
    fn ack(&self, order_id: Uuid) -> OrderAck {
        OrderAck {
            order_id,
            broker_order_id: self.contract_id.to_string(),
            status: AckStatus::Filled { price: self.price },
            protective_order_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    /// 주문 ID → 매수 계약
    contracts: HashMap<Uuid, Contract>,
    /// 결과를 확인하지 못한 매수 주문
    unresolved: HashSet<Uuid>,
    /// 청산 주문 ID → 확인 응답
    closes: HashMap<Uuid, OrderAck>,
    /// 종목별 최근 중간가
    quotes: HashMap<String, Price>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn amount(value: f64) -> BrokerResult<Decimal> {
    decimal_from_f64(value).ok_or_else(|| BrokerError::Parse(format!("invalid amount {}", value)))
}

fn field<T: DeserializeOwned>(response: &Value, key: &str) -> BrokerResult<T> {
    let value = response
        .get(key)
        .cloned()
        .ok_or_else(|| BrokerError::Parse(format!("missing '{}'", key)))?;
    Ok(serde_json::from_value(value)?)
}

fn is_down_contract(contract_type: &str) -> bool {
    matches!(contract_type, "PUT" | "PUTE" | "MULTDOWN")
}

/// 수신 태스크와 게이트웨이가 함께 쓰는 상태.
struct Shared {
    book: StdMutex<Book>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Value>>>,
    state: StdRwLock<ConnectionState>,
    ticks: broadcast::Sender<Tick>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn state(&self) -> ConnectionState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "해석할 수 없는 Deriv 메시지");
                return;
            }
        };
        let failed = value.get("error").is_some();
        match value.get("msg_type").and_then(Value::as_str) {
            Some("tick") if !failed => self.on_tick(&value),
            Some("buy") if !failed => self.on_buy(&value),
            _ => {}
        }
        if let Some(req_id) = value.get("req_id").and_then(Value::as_u64) {
            if let Some(tx) = lock(&self.pending).remove(&req_id) {
                if tx.send(value).is_err() {
                    debug!(req_id, "요청자가 응답 전에 떠남");
                }
            }
        }
    }

    fn on_tick(&self, value: &Value) {
        let tick = match field::<DerivTick>(value, "tick").and_then(Self::to_tick) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(error = %e, "Deriv 틱 파싱 실패");
                return;
            }
        };
        lock(&self.book)
            .quotes
            .insert(tick.instrument.clone(), tick.mid());
        // 구독자가 없으면 버림
        self.ticks.send(tick).ok();
    }

    fn to_tick(raw: DerivTick) -> BrokerResult<Tick> {
        let quote = amount(raw.quote)?;
        let bid = raw.bid.map(amount).transpose()?.unwrap_or(quote);
        let ask = raw.ask.map(amount).transpose()?.unwrap_or(quote);
        let timestamp = DateTime::from_timestamp(raw.epoch, 0).unwrap_or_else(Utc::now);
        Ok(Tick::new(raw.symbol, timestamp, bid, ask, Decimal::ZERO))
    }

    /// 요청자가 타임아웃으로 떠난 뒤 도착한 매수 응답도 여기서 기록됩니다.
    fn on_buy(&self, value: &Value) {
        let passthrough = value
            .get("echo_req")
            .map(|echo| field::<Passthrough>(echo, "passthrough"));
        let buy = field::<DerivBuy>(value, "buy");
        match (passthrough, buy) {
            (Some(Ok(passthrough)), Ok(buy)) => {
                if let Err(e) = self.record_buy(&passthrough, &buy) {
                    warn!(order_id = %passthrough.order_id, error = %e, "매수 응답 기록 실패");
                }
            }
            _ => debug!("주문 정보 없는 매수 응답"),
        }
    }

    fn record_buy(&self, passthrough: &Passthrough, buy: &DerivBuy) -> BrokerResult<Contract> {
        let stake = amount(buy.buy_price)?;
        let mut book = lock(&self.book);
        book.unresolved.remove(&passthrough.order_id);
        if let Some(existing) = book.contracts.get(&passthrough.order_id) {
            return Ok(existing.clone());
        }
        let price = book
            .quotes
            .get(&passthrough.symbol)
            .copied()
            .unwrap_or(passthrough.reference_price);
        let contract = Contract {
            contract_id: buy.contract_id,
            symbol: passthrough.symbol.clone(),
            side: passthrough.side,
            stake,
            price,
            open: true,
        };
        book.contracts.insert(passthrough.order_id, contract.clone());
        Ok(contract)
    }

    fn open_contracts(&self, symbol: &str, side: Side) -> Vec<Contract> {
        let mut open: Vec<Contract> = lock(&self.book)
            .contracts
            .values()
            .filter(|c| c.open && c.symbol == symbol && c.side == side)
            .cloned()
            .collect();
        open.sort_by_key(|c| c.contract_id);
        open
    }

    fn mark_closed(&self, contract_id: i64) {
        for contract in lock(&self.book)
            .contracts
            .values_mut()
            .filter(|c| c.contract_id == contract_id)
        {
            contract.open = false;
        }
    }

    /// 포트폴리오에 없는 계약(만기/매도)을 닫힌 것으로 표시합니다.
    fn sync_open(&self, listed: &[DerivContract]) {
        let ids: HashSet<i64> = listed.iter().map(|c| c.contract_id).collect();
        for contract in lock(&self.book).contracts.values_mut() {
            contract.open = ids.contains(&contract.contract_id);
        }
    }

    fn quote(&self, symbol: &str) -> Option<Price> {
        lock(&self.book).quotes.get(symbol).copied()
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, shared: Arc<Shared>) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => shared.dispatch(&text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Deriv WebSocket 수신 에러");
                break;
            }
        }
    }
    shared.set_state(ConnectionState::Disconnected);
    // 대기 중인 요청은 송신자가 사라지면서 깨어남
    lock(&shared.pending).clear();
    info!("Deriv WebSocket 연결 종료");
}

struct Session {
    sink: Mutex<SplitSink<WsStream, Message>>,
    reader: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ============================================================================
// Deriv 브로커
// ============================================================================

/// Deriv 게이트웨이.
pub struct DerivBroker {
    config: DerivConfig,
    shared: Arc<Shared>,
    session: RwLock<Option<Arc<Session>>>,
    next_req_id: AtomicU64,
}

impl DerivBroker {
    /// 새 게이트웨이를 생성합니다. 연결은 `connect`에서 맺습니다.
    pub fn new(config: DerivConfig) -> Self {
        let (ticks, _) = broadcast::channel(config.tick_channel_capacity.max(1));
        Self {
            config,
            shared: Arc::new(Shared {
                book: StdMutex::new(Book::default()),
                pending: StdMutex::new(HashMap::new()),
                state: StdRwLock::new(ConnectionState::Disconnected),
                ticks,
            }),
            session: RwLock::new(None),
            next_req_id: AtomicU64::new(0),
        }
    }

    /// Deriv 에러 코드를 BrokerError로 매핑.
    fn map_error(error: DerivError) -> BrokerError {
        match error.code.as_str() {
            "InvalidToken" | "AuthorizationRequired" | "PermissionDenied" => {
                BrokerError::Unauthorized(error.message)
            }
            "RateLimit" => BrokerError::RateLimited,
            "InsufficientBalance"
            | "ContractBuyValidationError"
            | "InvalidContractProposal"
            | "ContractCreationFailure"
            | "PriceMoved"
            | "MarketIsClosed"
            | "InputValidationFailed" => {
                BrokerError::Rejected(format!("{}: {}", error.code, error.message))
            }
            "InvalidContractId" | "InvalidSellContractProposal" | "ContractNotFound" => {
                BrokerError::OrderNotFound(error.message)
            }
            _ => BrokerError::Api {
                code: 0,
                message: format!("{}: {}", error.code, error.message),
            },
        }
    }

    /// 요청을 보내고 같은 `req_id`의 응답을 기다립니다.
    async fn request(&self, mut body: Value) -> BrokerResult<Value> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)?;
        let req_id = self.next_req_id.fetch_add(1, Ordering::SeqCst) + 1;
        body["req_id"] = json!(req_id);

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(req_id, tx);

        let sent = session
            .sink
            .lock()
            .await
            .send(Message::Text(body.to_string()))
            .await;
        if let Err(e) = sent {
            lock(&self.shared.pending).remove(&req_id);
            return Err(BrokerError::Network(format!("send failed: {}", e)));
        }

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(BrokerError::Disconnected(format!(
                    "connection closed before req_id {}",
                    req_id
                )))
            }
            Err(_) => {
                lock(&self.shared.pending).remove(&req_id);
                return Err(BrokerError::Timeout(format!("req_id {}", req_id)));
            }
        };

        match response.get("error") {
            Some(error) => Err(Self::map_error(serde_json::from_value(error.clone())?)),
            None => Ok(response),
        }
    }

    async fn buy(&self, order: &Order) -> BrokerResult<OrderAck> {
        let stake = order
            .size
            .normalize()
            .to_f64()
            .ok_or_else(|| BrokerError::Parse(format!("invalid stake {}", order.size)))?;
        let contract_type = match order.side {
            Side::Buy => "CALL",
            Side::Sell => "PUT",
        };
        let passthrough = Passthrough {
            order_id: order.id,
            symbol: order.instrument.clone(),
            side: order.side,
            reference_price: order.entry_price,
        };
        let request = json!({
            "buy": 1,
            "price": stake,
            "parameters": {
                "amount": stake,
                "basis": "stake",
                "contract_type": contract_type,
                "currency": self.config.currency,
                "duration": self.config.contract_duration,
                "duration_unit": self.config.duration_unit,
                "symbol": order.instrument,
            },
            "passthrough": serde_json::to_value(&passthrough)?,
        });

        lock(&self.shared.book).unresolved.insert(order.id);
        match self.request(request).await {
            Ok(response) => {
                let buy: DerivBuy = field(&response, "buy")?;
                let contract = self.shared.record_buy(&passthrough, &buy)?;
                info!(
                    order_id = %order.id,
                    contract_id = contract.contract_id,
                    contract_type,
                    stake = %contract.stake,
                    "Deriv 계약 매수"
                );
                Ok(contract.ack(order.id))
            }
            Err(BrokerError::Rejected(reason)) => {
                lock(&self.shared.book).unresolved.remove(&order.id);
                Ok(OrderAck {
                    order_id: order.id,
                    broker_order_id: String::new(),
                    status: AckStatus::Rejected { reason },
                    protective_order_ids: Vec::new(),
                })
            }
            Err(e) if e.is_ambiguous() => {
                warn!(order_id = %order.id, error = %e, "매수 결과 미확인");
                Err(e)
            }
            Err(e) => {
                lock(&self.shared.book).unresolved.remove(&order.id);
                Err(e)
            }
        }
    }

    /// 열린 계약을 주문 수량만큼 시장가로 매도합니다.
    async fn sell(&self, order: &Order, open: Vec<Contract>) -> BrokerResult<OrderAck> {
        let mut sold = Decimal::ZERO;
        let mut last_contract = String::new();
        for contract in open {
            if sold >= order.size {
                break;
            }
            match self
                .request(json!({"sell": contract.contract_id, "price": 0}))
                .await
            {
                Ok(response) => {
                    let sell: DerivSell = field(&response, "sell")?;
                    info!(
                        order_id = %order.id,
                        contract_id = contract.contract_id,
                        sold_for = sell.sold_for,
                        "Deriv 계약 매도"
                    );
                    sold += contract.stake;
                    last_contract = contract.contract_id.to_string();
                }
                // 이미 만기되었거나 매도된 계약
                Err(BrokerError::OrderNotFound(msg)) => {
                    debug!(contract_id = contract.contract_id, reason = %msg, "매도할 수 없는 계약");
                }
                Err(e) => return Err(e),
            }
            self.shared.mark_closed(contract.contract_id);
        }

        let status = if sold.is_zero() {
            AckStatus::Rejected {
                reason: "no open contract".to_string(),
            }
        } else {
            AckStatus::Filled {
                price: self
                    .shared
                    .quote(&order.instrument)
                    .unwrap_or(order.entry_price),
            }
        };
        let ack = OrderAck {
            order_id: order.id,
            broker_order_id: last_contract,
            status,
            protective_order_ids: Vec::new(),
        };
        lock(&self.shared.book).closes.insert(order.id, ack.clone());
        Ok(ack)
    }

    /// 이미 알려진 주문의 확인 응답.
    fn known_ack(&self, order_id: Uuid) -> Option<OrderAck> {
        let book = lock(&self.shared.book);
        if let Some(contract) = book.contracts.get(&order_id) {
            return Some(contract.ack(order_id));
        }
        book.closes.get(&order_id).cloned()
    }

    fn is_unresolved(&self, order_id: Uuid) -> bool {
        lock(&self.shared.book).unresolved.contains(&order_id)
    }
}

#[async_trait]
impl BrokerGateway for DerivBroker {
    fn name(&self) -> &str {
        "deriv"
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// API 토큰은 `credentials.api_secret`에 담겨 옵니다.
    async fn connect(&self, credentials: &BrokerCredentials) -> BrokerResult<ConnectionHandle> {
        self.shared.set_state(ConnectionState::Connecting);
        let (ws, _) = match connect_async(self.config.endpoint().as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        let (sink, read) = ws.split();
        let reader = tokio::spawn(read_loop(read, self.shared.clone()));
        *self.session.write().await = Some(Arc::new(Session {
            sink: Mutex::new(sink),
            reader,
        }));

        let token = credentials.api_secret.expose_secret().to_string();
        match self.request(json!({ "authorize": token })).await {
            Ok(response) => {
                let login = response["authorize"]["loginid"].as_str().unwrap_or_default();
                self.shared.set_state(ConnectionState::Connected);
                info!(broker = self.name(), login, "Connected");
                Ok(ConnectionHandle::new(BrokerType::Deriv))
            }
            Err(e) => {
                *self.session.write().await = None;
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn subscribe(&self, instrument: &str) -> BrokerResult<TickStream> {
        let rx = self.shared.ticks.subscribe();
        let response = self
            .request(json!({ "ticks": instrument, "subscribe": 1 }))
            .await?;
        info!(
            instrument,
            subscription = %response["subscription"]["id"],
            "Deriv 시세 구독"
        );

        let instrument = instrument.to_string();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(tick) => return Some((Ok(tick), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
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
        if let Some(ack) = self.known_ack(order.id) {
            debug!(order_id = %order.id, "중복 제출, 기존 결과 반환");
            return Ok(ack);
        }
        if self.is_unresolved(order.id) {
            // 첫 매수가 브로커에 도달했을 수 있으므로 다시 보내지 않음
            return Err(BrokerError::Timeout(format!(
                "buy {} awaiting broker result",
                order.id
            )));
        }
        if !self.connection_state().accepts_orders() {
            return Err(BrokerError::NotConnected);
        }

        let open = self
            .shared
            .open_contracts(&order.instrument, order.side.opposite());
        if order.signal_id.is_none() && !open.is_empty() {
            return self.sell(order, open).await;
        }
        self.buy(order).await
    }

    /// 매수된 계약은 취소할 수 없습니다.
    async fn cancel_order(&self, order_id: Uuid) -> BrokerResult<CancelAck> {
        Ok(match self.known_ack(order_id) {
            Some(OrderAck {
                status: AckStatus::Filled { price },
                ..
            }) => CancelAck::AlreadyFilled { price },
            _ => CancelAck::NotFound,
        })
    }

    async fn get_account_state(&self) -> BrokerResult<AccountState> {
        let balance: DerivBalance = field(&self.request(json!({ "balance": 1 })).await?, "balance")?;
        let portfolio: DerivPortfolio =
            field(&self.request(json!({ "portfolio": 1 })).await?, "portfolio")?;
        if balance.currency != self.config.currency {
            warn!(
                expected = %self.config.currency,
                actual = %balance.currency,
                "Deriv 계좌 통화 불일치"
            );
        }
        self.shared.sync_open(&portfolio.contracts);

        let mut sizes: BTreeMap<String, Decimal> = BTreeMap::new();
        for contract in &portfolio.contracts {
            let stake = amount(contract.buy_price)?;
            let signed = if is_down_contract(&contract.contract_type) {
                -stake
            } else {
                stake
            };
            *sizes.entry(contract.symbol.clone()).or_default() += signed;
        }

        let cash = amount(balance.balance)?;
        let positions = sizes
            .into_iter()
            .filter(|(_, size)| !size.is_zero())
            .map(|(instrument, net_size)| BrokerPosition {
                entry_price: self.shared.quote(&instrument).unwrap_or(Decimal::ZERO),
                instrument,
                net_size,
            })
            .collect();

        Ok(AccountState {
            balance: cash,
            equity: cash,
            positions,
        })
    }

    /// 늦게 도착한 매수 응답까지 반영된 로컬 기록으로 답합니다.
    async fn order_status(&self, order_id: Uuid) -> BrokerResult<Option<OrderAck>> {
        Ok(self.known_ack(order_id))
    }
}
