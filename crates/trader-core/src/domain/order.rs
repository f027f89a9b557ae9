//! 주문 타입 및 상태 머신.
//!
//! - `Side` - 주문 방향 (매수/매도)
//! - `OrderState` - `pending → submitted → {filled | rejected | cancelled}`
//! - `Order` - 주문 엔티티 (ID가 멱등성 키)
//! - `OrderAck` / `CancelAck` - 브로커 응답

use crate::domain::Direction;
use crate::error::{TraderError, TraderResult};
use crate::types::{BrokerAccountId, Percentage, PositionKey, Price, Quantity, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// 순포지션에 적용할 부호가 붙은 수량.
    pub fn signed(&self, size: Quantity) -> Quantity {
        match self {
            Side::Buy => size,
            Side::Sell => -size,
        }
    }

    /// 이 방향으로 진입했을 때의 포지션 방향.
    pub fn direction(&self) -> Direction {
        match self {
            Side::Buy => Direction::Long,
            Side::Sell => Direction::Short,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// 생성됨 (리스크 승인 대기 또는 제출 전)
    Pending,
    /// 브로커에 제출됨
    Submitted,
    /// 체결됨
    Filled,
    /// 거부됨
    Rejected,
    /// 취소됨
    Cancelled,
}

impl OrderState {
    /// 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled
        )
    }

    /// 아직 진행 중인지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }

    /// 허용되는 전이인지 확인합니다.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Submitted, Filled)
                | (Submitted, Rejected)
                | (Submitted, Cancelled)
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Pending => "pending",
            OrderState::Submitted => "submitted",
            OrderState::Filled => "filled",
            OrderState::Rejected => "rejected",
            OrderState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 주문 엔티티.
///
/// `id`는 브로커 제출 시 클라이언트 주문 ID로 사용되는 멱등성 키입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// 주문 ID (멱등성 키)
    pub id: Uuid,
    /// 사용자
    pub user_id: UserId,
    /// 브로커 계좌
    pub broker_account_id: BrokerAccountId,
    /// 종목
    pub instrument: String,
    /// 방향
    pub side: Side,
    /// 수량
    pub size: Quantity,
    /// 기준 진입가
    pub entry_price: Price,
    /// 손절가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    /// 익절가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<Price>,
    /// 이 주문이 점유하는 리스크 (%)
    pub risk_pct: Percentage,
    /// 원천 신호 (청산 주문은 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<Uuid>,
    /// 상태
    pub state: OrderState,
    /// 브로커 주문 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    /// 체결가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<Price>,
    /// 보호 주문 ID (손절/익절)
    #[serde(default)]
    pub protective_order_ids: Vec<String>,
    /// 거부 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 마지막 변경 시각
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 새 `pending` 주문을 생성합니다.
    pub fn new(
        user_id: UserId,
        broker_account_id: BrokerAccountId,
        instrument: impl Into<String>,
        side: Side,
        size: Quantity,
        entry_price: Price,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            broker_account_id,
            instrument: instrument.into(),
            side,
            size,
            entry_price,
            stop_price: None,
            take_profit_price: None,
            risk_pct: Percentage::ZERO,
            signal_id: None,
            state: OrderState::Pending,
            broker_order_id: None,
            fill_price: None,
            protective_order_ids: Vec::new(),
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 손절/익절가 설정.
    pub fn with_protection(mut self, stop: Option<Price>, take_profit: Option<Price>) -> Self {
        self.stop_price = stop;
        self.take_profit_price = take_profit;
        self
    }

    /// 리스크 비율 설정.
    pub fn with_risk_pct(mut self, pct: Percentage) -> Self {
        self.risk_pct = pct;
        self
    }

    /// 원천 신호 설정.
    pub fn with_signal(mut self, signal_id: Uuid) -> Self {
        self.signal_id = Some(signal_id);
        self
    }

    /// 이 주문이 생성하거나 변경할 포지션의 키.
    pub fn position_key(&self) -> PositionKey {
        PositionKey::new(self.broker_account_id, self.instrument.clone())
    }

    /// 부호 있는 수량 (매도 음수).
    pub fn signed_size(&self) -> Quantity {
        self.side.signed(self.size)
    }

    /// 새 상태로 전이합니다.
    ///
    /// 최종 상태에서 벗어나는 전이, 건너뛰는 전이는 `InvalidState` 에러입니다.
    pub fn transition(&mut self, next: OrderState) -> TraderResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(TraderError::InvalidState(format!(
                "주문 {}: {} → {} 전이 불가",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 체결로 전이하고 체결 정보를 기록합니다.
    pub fn mark_filled(&mut self, price: Price) -> TraderResult<()> {
        self.transition(OrderState::Filled)?;
        self.fill_price = Some(price);
        Ok(())
    }

    /// 거부로 전이하고 사유를 기록합니다.
    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> TraderResult<()> {
        self.transition(OrderState::Rejected)?;
        self.reject_reason = Some(reason.into());
        Ok(())
    }
}

/// 브로커 측 주문 상태.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckStatus {
    /// 접수됨 (체결 대기)
    Accepted,
    /// 체결됨
    Filled {
        /// 평균 체결가
        price: Price,
    },
    /// 거부됨
    Rejected {
        /// 사유
        reason: String,
    },
    /// 취소됨
    Cancelled,
}

/// 주문 제출/조회 응답.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    /// 클라이언트 주문 ID (= Order.id)
    pub order_id: Uuid,
    /// 브로커 주문 ID
    pub broker_order_id: String,
    /// 브로커 측 상태
    pub status: AckStatus,
    /// 브로커가 생성한 보호 주문 ID
    #[serde(default)]
    pub protective_order_ids: Vec<String>,
}

/// 취소 응답.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// 취소됨
    Cancelled,
    /// 이미 체결되어 취소 불가
    AlreadyFilled {
        /// 체결가
        price: Price,
    },
    /// 브로커가 모르는 주문
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(
            UserId(1),
            BrokerAccountId::new(),
            "X",
            Side::Buy,
            dec!(4),
            dec!(100),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut o = order();
        assert_eq!(o.state, OrderState::Pending);
        o.transition(OrderState::Submitted).unwrap();
        o.mark_filled(dec!(100.5)).unwrap();
        assert_eq!(o.state, OrderState::Filled);
        assert_eq!(o.fill_price, Some(dec!(100.5)));
    }

    #[test]
    fn test_final_states_are_immutable() {
        let mut o = order();
        o.transition(OrderState::Submitted).unwrap();
        o.mark_rejected("margin").unwrap();

        for next in [
            OrderState::Pending,
            OrderState::Submitted,
            OrderState::Filled,
            OrderState::Cancelled,
        ] {
            assert!(o.transition(next).is_err());
        }
        assert_eq!(o.state, OrderState::Rejected);
        assert_eq!(o.reject_reason.as_deref(), Some("margin"));
    }

    #[test]
    fn test_cannot_skip_submission() {
        let mut o = order();
        assert!(o.mark_filled(dec!(1)).is_err());
        assert_eq!(o.state, OrderState::Pending);
        assert!(o.fill_price.is_none());
    }

    #[test]
    fn test_signed_size() {
        let mut o = order();
        assert_eq!(o.signed_size(), dec!(4));
        o.side = Side::Sell;
        assert_eq!(o.signed_size(), dec!(-4));
    }
}
