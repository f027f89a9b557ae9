//! 브로커 에러 타입.

use thiserror::Error;
use trader_core::{TimeoutScope, TraderError};

/// 브로커 게이트웨이/피드 에러.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 연결되지 않은 상태에서 호출
    #[error("Not connected")]
    NotConnected,

    /// 인증/권한 에러
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 주문 거부 (해당 주문 종결)
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// API 에러 코드
    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },

    /// 주문을 찾을 수 없음
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    Parse(String),

    /// 스트림 에러
    #[error("Stream error: {0}")]
    Stream(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 지원되지 않는 작업
    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// 브로커 작업 Result 타입.
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// 같은 멱등성 키로 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_)
                | BrokerError::Disconnected(_)
                | BrokerError::RateLimited
                | BrokerError::Timeout(_)
                | BrokerError::Stream(_)
        )
    }

    /// 결과가 불확실한 에러인지 확인 (요청이 브로커에 도달했을 수 있음).
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, BrokerError::Timeout(_) | BrokerError::Disconnected(_))
    }

    /// 권장 재시도 대기 시간(밀리초) 반환.
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            BrokerError::RateLimited => Some(60_000),
            BrokerError::Network(_) => Some(1_000),
            BrokerError::Disconnected(_) => Some(5_000),
            BrokerError::Timeout(_) => Some(500),
            BrokerError::Stream(_) => Some(2_000),
            _ => None,
        }
    }

    /// 재시도하면 안 되는 치명적 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::Unauthorized(_) | BrokerError::Rejected(_) | BrokerError::NotSupported(_)
        )
    }
}

impl From<BrokerError> for TraderError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected(reason) => TraderError::BrokerRejection(reason),
            BrokerError::Api { code, message } => {
                TraderError::BrokerRejection(format!("{}: {}", code, message))
            }
            BrokerError::Timeout(op) => TraderError::timeout(TimeoutScope::Order, op),
            BrokerError::Stream(msg) | BrokerError::Disconnected(msg) => TraderError::Feed(msg),
            BrokerError::OrderNotFound(id) => TraderError::NotFound(format!("order {}", id)),
            other => TraderError::Feed(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrokerError::Timeout(err.to_string())
        } else if err.is_connect() {
            BrokerError::Network(err.to_string())
        } else {
            BrokerError::Network(format!("request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BrokerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BrokerError::Stream(err.to_string())
    }
}
