//! Binance Spot 브로커 게이트웨이.
//!
//! REST(서명 요청)로 주문/계좌를 처리하고 `bookTicker` WebSocket 스트림으로
//! 최우선 호가를 받습니다. 클라이언트 주문 ID(`newClientOrderId`)에 내부
//! 주문 ID를 그대로 사용합니다.
//!
//! Binance는 이미 종결된 주문의 클라이언트 ID 재사용을 막지 않으므로, 같은
//! 주문의 재제출은 먼저 `origClientOrderId`로 상태를 조회하고 브로커에 기록이
//! 없을 때만 다시 전송합니다.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use trader_core::{
    AccountState, AckStatus, BrokerCredentials, BrokerPosition, BrokerType, CancelAck,
    ConnectionState, Order, OrderAck, Side, Tick,
};
use uuid::Uuid;

use crate::traits::{BrokerGateway, ConnectionHandle, TickStream};
use crate::{BrokerError, BrokerResult};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// 설정
// ============================================================================

/// Binance 연결 설정. 자격증명은 `connect` 시점에 전달됩니다.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// 테스트넷 사용
    pub testnet: bool,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 수신 윈도우 (밀리초)
    pub recv_window: u64,
    /// 계좌 평가 기준 자산
    pub quote_asset: String,
    /// REST URL 재정의 (테스트용)
    pub rest_url: Option<String>,
    /// WebSocket URL 재정의 (테스트용)
    pub ws_url: Option<String>,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            timeout_secs: 30,
            recv_window: 5000,
            quote_asset: "USDT".to_string(),
            rest_url: None,
            ws_url: None,
        }
    }
}

impl BinanceConfig {
    /// 테스트넷 사용.
    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// REST 기본 URL을 재정의합니다.
    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = Some(url.into());
        self
    }

    /// REST API 기본 URL 반환.
    pub fn rest_base_url(&self) -> &str {
        if let Some(url) = &self.rest_url {
            return url;
        }
        if self.testnet {
            "https://testnet.binance.vision"
        } else {
            "https://api.binance.com"
        }
    }

    /// WebSocket 기본 URL 반환.
    pub fn ws_base_url(&self) -> &str {
        if let Some(url) = &self.ws_url {
            return url;
        }
        if self.testnet {
            "wss://testnet.binance.vision/ws"
        } else {
            "wss://stream.binance.com:9443/ws"
        }
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct BinanceAccountBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAccountInfo {
    balances: Vec<BinanceAccountBalance>,
    #[serde(default)]
    can_trade: bool,
}

#[derive(Debug, Deserialize)]
struct BinancePrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    symbol: String,
    order_id: i64,
    client_order_id: String,
    executed_qty: String,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

/// `bookTicker` 스트림 이벤트.
#[derive(Debug, Deserialize)]
struct WsBookTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask: String,
}

// ============================================================================
// Binance 브로커
// ============================================================================

#[derive(Clone)]
struct Keys {
    api_key: String,
    api_secret: SecretString,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("api_key", &"***REDACTED***")
            .field("api_secret", &"***REDACTED***")
            .finish()
    }
}

/// Binance Spot 게이트웨이.
pub struct BinanceBroker {
    config: BinanceConfig,
    client: Client,
    keys: RwLock<Option<Keys>>,
    state: RwLock<ConnectionState>,
    /// 취소 요청에 필요한 주문 ID → 심볼
    symbols: Mutex<HashMap<Uuid, String>>,
}

impl BinanceBroker {
    /// 새 게이트웨이를 생성합니다.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `BrokerError::Network`를 반환합니다.
    pub fn new(config: BinanceConfig) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::Network(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            config,
            client,
            keys: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            symbols: Mutex::new(HashMap::new()),
        })
    }

    fn set_state(&self, next: ConnectionState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn keys(&self) -> BrokerResult<Keys> {
        let guard = match self.keys.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or(BrokerError::NotConnected)
    }

    fn remember_symbol(&self, order_id: Uuid, symbol: &str) {
        let mut guard = match self.symbols.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(order_id, symbol.to_string());
    }

    fn symbol_of(&self, order_id: Uuid) -> Option<String> {
        let guard = match self.symbols.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(&order_id).cloned()
    }

    fn timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// HMAC-SHA256으로 쿼리 문자열 서명.
    fn sign(secret: &SecretString, query: &str) -> BrokerResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| BrokerError::Unauthorized(format!("invalid secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// 파라미터에서 쿼리 문자열 생성.
    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signed_query(&self, keys: &Keys, params: &[(&str, String)]) -> BrokerResult<String> {
        let mut all_params = params.to_vec();
        all_params.push(("timestamp", Self::timestamp_ms().to_string()));
        all_params.push(("recvWindow", self.config.recv_window.to_string()));
        let query = Self::build_query(&all_params);
        let signature = Self::sign(&keys.api_secret, &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> BrokerResult<T> {
        let url = format!(
            "{}{}?{}",
            self.config.rest_base_url(),
            endpoint,
            Self::build_query(params)
        );
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> BrokerResult<T> {
        let keys = self.keys()?;
        let url = format!(
            "{}{}?{}",
            self.config.rest_base_url(),
            endpoint,
            self.signed_query(&keys, params)?
        );
        debug!("GET (signed) {}", endpoint);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &keys.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> BrokerResult<T> {
        let keys = self.keys()?;
        let url = format!("{}{}", self.config.rest_base_url(), endpoint);
        let body = self.signed_query(&keys, params)?;
        debug!("POST (signed) {}", endpoint);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &keys.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn signed_delete<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> BrokerResult<T> {
        let keys = self.keys()?;
        let url = format!(
            "{}{}?{}",
            self.config.rest_base_url(),
            endpoint,
            self.signed_query(&keys, params)?
        );
        debug!("DELETE (signed) {}", endpoint);
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &keys.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// API 응답 처리.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> BrokerResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse response: {} - Body: {}", e, body);
                BrokerError::Parse(e.to_string())
            })
        } else if let Ok(error) = serde_json::from_str::<BinanceError>(&body) {
            Err(Self::map_error_code(error.code, &error.msg))
        } else {
            Err(BrokerError::Api {
                code: status.as_u16() as i32,
                message: body,
            })
        }
    }

    /// Binance 에러 코드를 BrokerError로 매핑.
    fn map_error_code(code: i32, msg: &str) -> BrokerError {
        match code {
            -1001 => BrokerError::Disconnected(msg.to_string()),
            -1002 | -2014 | -2015 => BrokerError::Unauthorized(msg.to_string()),
            -1003 => BrokerError::RateLimited,
            -1013 | -1111 | -2010 => BrokerError::Rejected(msg.to_string()),
            -2011 | -2013 => BrokerError::OrderNotFound(msg.to_string()),
            _ => BrokerError::Api {
                code,
                message: msg.to_string(),
            },
        }
    }

    fn parse_decimal(s: &str) -> BrokerResult<Decimal> {
        s.parse()
            .map_err(|e| BrokerError::Parse(format!("invalid decimal '{}': {}", s, e)))
    }

    fn side_code(side: Side) -> &'static str {
        match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// 주문 응답을 확인 응답으로 변환.
    fn to_ack(order_id: Uuid, resp: &BinanceOrderResponse) -> BrokerResult<OrderAck> {
        let status = match resp.status.as_str() {
            "FILLED" => {
                let executed = Self::parse_decimal(&resp.executed_qty)?;
                let quote = match &resp.cummulative_quote_qty {
                    Some(q) => Self::parse_decimal(q)?,
                    None => Decimal::ZERO,
                };
                if executed.is_zero() {
                    return Err(BrokerError::Parse("filled with zero quantity".to_string()));
                }
                AckStatus::Filled {
                    price: quote / executed,
                }
            }
            "CANCELED" | "EXPIRED" => AckStatus::Cancelled,
            "REJECTED" => AckStatus::Rejected {
                reason: format!("broker status {}", resp.status),
            },
            _ => AckStatus::Accepted,
        };
        Ok(OrderAck {
            order_id,
            broker_order_id: resp.order_id.to_string(),
            status,
            protective_order_ids: Vec::new(),
        })
    }

    /// 진입 주문 체결 후 손절/익절 주문을 등록합니다.
    async fn place_protection(&self, order: &Order) -> Vec<String> {
        let exit_side = Self::side_code(order.side.opposite());
        let legs = [
            ("STOP_LOSS", "sl", order.stop_price),
            ("TAKE_PROFIT", "tp", order.take_profit_price),
        ];
        let mut ids = Vec::new();
        for (order_type, suffix, trigger) in legs {
            let Some(trigger) = trigger else { continue };
            let client_id = format!("{}-{}", order.id.simple(), suffix);
            let params = [
                ("symbol", order.instrument.clone()),
                ("side", exit_side.to_string()),
                ("type", order_type.to_string()),
                ("quantity", order.size.normalize().to_string()),
                ("stopPrice", trigger.normalize().to_string()),
                ("newClientOrderId", client_id.clone()),
            ];
            match self
                .signed_post::<BinanceOrderResponse>("/api/v3/order", &params)
                .await
            {
                Ok(resp) => ids.push(resp.order_id.to_string()),
                Err(e) => warn!(order_id = %order.id, leg = suffix, error = %e, "보호 주문 등록 실패"),
            }
        }
        ids
    }

    fn parse_book_ticker(text: &str) -> Option<BrokerResult<Tick>> {
        let event: WsBookTicker = serde_json::from_str(text).ok()?;
        let parsed = (|| -> BrokerResult<Tick> {
            Ok(Tick::new(
                event.symbol.clone(),
                Utc::now(),
                Self::parse_decimal(&event.bid)?,
                Self::parse_decimal(&event.ask)?,
                Self::parse_decimal(&event.bid_qty)?,
            ))
        })();
        Some(parsed)
    }
}

#[async_trait]
impl BrokerGateway for BinanceBroker {
    fn name(&self) -> &str {
        if self.config.testnet {
            "binance-testnet"
        } else {
            "binance"
        }
    }

    fn connection_state(&self) -> ConnectionState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn connect(&self, credentials: &BrokerCredentials) -> BrokerResult<ConnectionHandle> {
        self.set_state(ConnectionState::Connecting);
        {
            let mut guard = match self.keys.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(Keys {
                api_key: credentials.api_key.clone(),
                api_secret: credentials.api_secret.clone(),
            });
        }

        match self
            .signed_get::<BinanceAccountInfo>("/api/v3/account", &[])
            .await
        {
            Ok(account) => {
                if !account.can_trade {
                    warn!("Binance 계좌에 거래 권한이 없습니다");
                }
                self.set_state(ConnectionState::Connected);
                info!(broker = self.name(), "Connected");
                Ok(ConnectionHandle::new(BrokerType::Binance))
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn subscribe(&self, instrument: &str) -> BrokerResult<TickStream> {
        let url = format!(
            "{}/{}@bookTicker",
            self.config.ws_base_url(),
            instrument.to_lowercase()
        );
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!(instrument, "Binance bookTicker 구독");

        let (_write, read) = ws_stream.split();
        let stream = read.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Self::parse_book_ticker(&text),
                Ok(Message::Close(_)) => Some(Err(BrokerError::Disconnected(
                    "websocket closed".to_string(),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(BrokerError::from(e))),
            }
        });
        Ok(stream.boxed())
    }

    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck> {
        if !self.connection_state().accepts_orders() {
            return Err(BrokerError::NotConnected);
        }
        // 이전 시도가 브로커에 도달했을 수 있음
        if self.symbol_of(order.id).is_some() {
            if let Some(mut ack) = self.order_status(order.id).await? {
                debug!(order_id = %order.id, status = ?ack.status, "재제출 전 기존 주문 발견");
                if matches!(ack.status, AckStatus::Filled { .. }) {
                    ack.protective_order_ids = self.place_protection(order).await;
                }
                return Ok(ack);
            }
        }
        self.remember_symbol(order.id, &order.instrument);

        let params = [
            ("symbol", order.instrument.clone()),
            ("side", Self::side_code(order.side).to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", order.size.normalize().to_string()),
            ("newClientOrderId", order.id.simple().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let response = match self
            .signed_post::<BinanceOrderResponse>("/api/v3/order", &params)
            .await
        {
            Ok(resp) => resp,
            // 같은 클라이언트 ID의 재제출: 기존 주문 상태를 반환
            Err(BrokerError::Rejected(msg)) if msg.contains("Duplicate") => {
                return match self.order_status(order.id).await? {
                    Some(ack) => Ok(ack),
                    None => Err(BrokerError::Rejected(msg)),
                };
            }
            Err(BrokerError::Rejected(reason)) => {
                return Ok(OrderAck {
                    order_id: order.id,
                    broker_order_id: String::new(),
                    status: AckStatus::Rejected { reason },
                    protective_order_ids: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let mut ack = Self::to_ack(order.id, &response)?;
        if matches!(ack.status, AckStatus::Filled { .. }) {
            ack.protective_order_ids = self.place_protection(order).await;
        }
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: Uuid) -> BrokerResult<CancelAck> {
        let Some(symbol) = self.symbol_of(order_id) else {
            return Ok(CancelAck::NotFound);
        };
        let params = [
            ("symbol", symbol),
            ("origClientOrderId", order_id.simple().to_string()),
        ];
        match self
            .signed_delete::<BinanceOrderResponse>("/api/v3/order", &params)
            .await
        {
            Ok(_) => Ok(CancelAck::Cancelled),
            Err(BrokerError::OrderNotFound(_)) => match self.order_status(order_id).await? {
                Some(OrderAck {
                    status: AckStatus::Filled { price },
                    ..
                }) => Ok(CancelAck::AlreadyFilled { price }),
                Some(_) => Ok(CancelAck::Cancelled),
                None => Ok(CancelAck::NotFound),
            },
            Err(e) => Err(e),
        }
    }

    async fn get_account_state(&self) -> BrokerResult<AccountState> {
        let account: BinanceAccountInfo = self.signed_get("/api/v3/account", &[]).await?;
        let quote = self.config.quote_asset.as_str();

        let mut balance = Decimal::ZERO;
        let mut equity = Decimal::ZERO;
        let mut positions = Vec::new();

        for entry in &account.balances {
            let total = Self::parse_decimal(&entry.free)? + Self::parse_decimal(&entry.locked)?;
            if total.is_zero() {
                continue;
            }
            if entry.asset == quote {
                balance += total;
                equity += total;
                continue;
            }
            let instrument = format!("{}{}", entry.asset, quote);
            let price = match self
                .public_get::<BinancePrice>("/api/v3/ticker/price", &[("symbol", instrument.clone())])
                .await
            {
                Ok(p) => Self::parse_decimal(&p.price)?,
                Err(e) => {
                    debug!(asset = %entry.asset, error = %e, "평가 가격 없음, 건너뜀");
                    continue;
                }
            };
            equity += total * price;
            positions.push(BrokerPosition {
                instrument,
                net_size: total,
                entry_price: price,
            });
        }

        Ok(AccountState {
            balance,
            equity,
            positions,
        })
    }

    async fn order_status(&self, order_id: Uuid) -> BrokerResult<Option<OrderAck>> {
        let Some(symbol) = self.symbol_of(order_id) else {
            return Ok(None);
        };
        let params = [
            ("symbol", symbol),
            ("origClientOrderId", order_id.simple().to_string()),
        ];
        match self
            .signed_get::<BinanceOrderResponse>("/api/v3/order", &params)
            .await
        {
            Ok(resp) => {
                debug!(client_order_id = %resp.client_order_id, symbol = %resp.symbol, "order status");
                Self::to_ack(order_id, &resp).map(Some)
            }
            Err(BrokerError::OrderNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
