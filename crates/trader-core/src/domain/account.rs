//! 브로커 계좌와 계좌 상태.

use crate::types::{BrokerAccountId, Price, Quantity, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 브로커 유형. 계좌별로 정적으로 게이트웨이 구현을 결정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerType {
    /// 모의 브로커 (페이퍼 트레이딩)
    Simulated,
    /// Binance 현물
    Binance,
    /// Deriv (WebSocket API, 스테이크 기반 계약)
    Deriv,
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerType::Simulated => write!(f, "simulated"),
            BrokerType::Binance => write!(f, "binance"),
            BrokerType::Deriv => write!(f, "deriv"),
        }
    }
}

impl FromStr for BrokerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" | "paper" => Ok(BrokerType::Simulated),
            "binance" => Ok(BrokerType::Binance),
            "deriv" => Ok(BrokerType::Deriv),
            other => Err(format!("Unknown broker type: {}", other)),
        }
    }
}

/// 브로커 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 연결 안 됨
    Disconnected,
    /// 연결 중
    Connecting,
    /// 연결됨
    Connected,
    /// 성능 저하 (타임아웃/재연결 중, 또는 정합성 실패)
    Degraded,
}

impl ConnectionState {
    /// 신규 주문을 받을 수 있는 상태인지 확인합니다.
    pub fn accepts_orders(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// 사용자의 브로커 계좌.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerAccount {
    /// 계좌 ID
    pub id: BrokerAccountId,
    /// 사용자
    pub user_id: UserId,
    /// 브로커 유형
    pub broker_type: BrokerType,
    /// 암호화된 자격증명 (base64(nonce‖ciphertext))
    pub encrypted_credentials_ref: String,
    /// 연결 상태
    pub connection_state: ConnectionState,
}

impl BrokerAccount {
    /// 새 계좌를 생성합니다.
    pub fn new(
        user_id: UserId,
        broker_type: BrokerType,
        encrypted_credentials_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: BrokerAccountId::new(),
            user_id,
            broker_type,
            encrypted_credentials_ref: encrypted_credentials_ref.into(),
            connection_state: ConnectionState::Disconnected,
        }
    }
}

/// 브로커가 보고한 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// 종목
    pub instrument: String,
    /// 순수량 (롱 양수, 숏 음수)
    pub net_size: Quantity,
    /// 평균 진입가
    pub entry_price: Price,
}

/// 브로커가 보고한 계좌 상태.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// 현금 잔고
    pub balance: Decimal,
    /// 평가 자본
    pub equity: Decimal,
    /// 포지션 목록
    pub positions: Vec<BrokerPosition>,
}

impl AccountState {
    /// 종목별 포지션 조회.
    pub fn position(&self, instrument: &str) -> Option<&BrokerPosition> {
        self.positions.iter().find(|p| p.instrument == instrument)
    }
}
