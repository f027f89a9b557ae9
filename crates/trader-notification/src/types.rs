//! 알림 타입 및 trait 정의.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{
    BrokerAccountId, Direction, Price, Quantity, RiskViolation, Side, Signal, TraderError, UserId,
};
use uuid::Uuid;

/// 알림 우선순위 레벨.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// 낮은 우선순위 (정보성)
    Low,
    /// 일반 우선순위
    #[default]
    Normal,
    /// 높은 우선순위 (사용자 확인 필요)
    High,
    /// 긴급 우선순위 (즉시 대응 필요)
    Critical,
}

/// 알림 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// 신호 발행
    SignalIssued {
        user_id: UserId,
        signal: Signal,
    },
    /// 주문 체결
    OrderFilled {
        user_id: UserId,
        account_id: BrokerAccountId,
        order_id: Uuid,
        instrument: String,
        side: Side,
        size: Quantity,
        price: Price,
    },
    /// 주문 거부
    OrderRejected {
        user_id: UserId,
        account_id: BrokerAccountId,
        order_id: Uuid,
        instrument: String,
        reason: String,
    },
    /// 리스크 정책 위반으로 주문 차단
    RiskBreach {
        user_id: UserId,
        instrument: String,
        signal_id: Option<Uuid>,
        violation: RiskViolation,
    },
    /// 자동매매 비활성: 사용자 확인 필요
    ManualActionRequired {
        user_id: UserId,
        signal_id: Uuid,
        instrument: String,
        direction: Direction,
        size: Quantity,
        entry_price: Price,
        stop_price: Price,
        take_profit_price: Price,
        confidence: f64,
    },
    /// 원장과 브로커 상태 불일치 (브로커 기준으로 수정됨)
    ReconciliationDivergence {
        user_id: UserId,
        account_id: BrokerAccountId,
        instrument: String,
        local_size: Quantity,
        broker_size: Quantity,
        action: String,
    },
    /// 계좌 degraded 전환
    AccountDegraded {
        user_id: UserId,
        account_id: BrokerAccountId,
        reason: String,
    },
}

impl NotificationEvent {
    /// 이벤트 수신 사용자.
    pub fn user_id(&self) -> UserId {
        match self {
            NotificationEvent::SignalIssued { user_id, .. }
            | NotificationEvent::OrderFilled { user_id, .. }
            | NotificationEvent::OrderRejected { user_id, .. }
            | NotificationEvent::RiskBreach { user_id, .. }
            | NotificationEvent::ManualActionRequired { user_id, .. }
            | NotificationEvent::ReconciliationDivergence { user_id, .. }
            | NotificationEvent::AccountDegraded { user_id, .. } => *user_id,
        }
    }

    /// 이벤트 종류 이름.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::SignalIssued { .. } => "signal_issued",
            NotificationEvent::OrderFilled { .. } => "order_filled",
            NotificationEvent::OrderRejected { .. } => "order_rejected",
            NotificationEvent::RiskBreach { .. } => "risk_breach",
            NotificationEvent::ManualActionRequired { .. } => "manual_action_required",
            NotificationEvent::ReconciliationDivergence { .. } => "reconciliation_divergence",
            NotificationEvent::AccountDegraded { .. } => "account_degraded",
        }
    }

    /// 기본 우선순위.
    pub fn default_priority(&self) -> NotificationPriority {
        match self {
            NotificationEvent::SignalIssued { .. } | NotificationEvent::OrderFilled { .. } => {
                NotificationPriority::Normal
            }
            NotificationEvent::OrderRejected { .. }
            | NotificationEvent::RiskBreach { .. }
            | NotificationEvent::ManualActionRequired { .. } => NotificationPriority::High,
            NotificationEvent::ReconciliationDivergence { .. }
            | NotificationEvent::AccountDegraded { .. } => NotificationPriority::Critical,
        }
    }
}

/// 알림 메시지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 고유 알림 ID
    pub id: Uuid,
    /// 알림 이벤트
    pub event: NotificationEvent,
    /// 우선순위 레벨
    pub priority: NotificationPriority,
    /// 타임스탬프
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// 이벤트 기본 우선순위로 새 알림을 생성합니다.
    pub fn new(event: NotificationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: event.default_priority(),
            event,
            timestamp: Utc::now(),
        }
    }

    /// 우선순위 레벨을 설정합니다.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// 수신 사용자.
    pub fn user_id(&self) -> UserId {
        self.event.user_id()
    }
}

/// 알림 작업용 Result 타입.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// 알림 에러.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("알림 전송 실패: {0}")]
    SendFailed(String),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("요청 한도 초과: {0}초 후 재시도")]
    RateLimited(u64),

    #[error("전송 큐가 가득 참")]
    QueueFull,

    #[error("디스패처가 종료됨")]
    Closed,

    #[error("네트워크 에러: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<NotificationError> for TraderError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::InvalidConfig(msg) => TraderError::Config(msg),
            other => TraderError::Internal(other.to_string()),
        }
    }
}

/// 알림 전송기 trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 알림을 전송합니다.
    async fn send(&self, notification: &Notification) -> NotificationResult<()>;

    /// 전송기가 활성화되어 있는지 확인합니다.
    fn is_enabled(&self) -> bool;

    /// 전송기 이름을 반환합니다.
    fn name(&self) -> &str;
}

/// 부호 있는 수량을 `+1.5` / `-2` 형태로 표시합니다.
pub(crate) fn signed(value: Decimal) -> String {
    if value.is_sign_negative() {
        value.normalize().to_string()
    } else {
        format!("+{}", value.normalize())
    }
}
