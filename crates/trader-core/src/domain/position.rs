//! 포지션 추적.
//!
//! 순포지션(`net_size`)은 부호를 가집니다: 양수 롱, 음수 숏.
//! (사용자, 계좌, 종목)당 열린 포지션은 최대 하나입니다.

use crate::domain::Side;
use crate::types::{BrokerAccountId, Percentage, PositionKey, Price, Quantity, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 사용자의 브로커별 종목 순보유량.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 사용자
    pub user_id: UserId,
    /// 브로커 계좌
    pub broker_account_id: BrokerAccountId,
    /// 종목
    pub instrument: String,
    /// 순수량 (롱 양수, 숏 음수)
    pub net_size: Quantity,
    /// 평균 진입가
    pub entry_price: Price,
    /// 최근 평가 가격
    pub mark_price: Price,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 실현 손익
    pub realized_pnl: Decimal,
    /// 점유 리스크 (%)
    pub risk_pct: Percentage,
    /// 보호 주문 ID
    #[serde(default)]
    pub protective_order_ids: Vec<String>,
    /// 포지션 오픈 시각
    pub opened_at: DateTime<Utc>,
    /// 마지막 업데이트 시각
    pub updated_at: DateTime<Utc>,
    /// 포지션 종료 시각 (오픈 상태면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// 첫 체결로 새 포지션을 생성합니다.
    pub fn open(
        user_id: UserId,
        broker_account_id: BrokerAccountId,
        instrument: impl Into<String>,
        side: Side,
        size: Quantity,
        price: Price,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            broker_account_id,
            instrument: instrument.into(),
            net_size: side.signed(size),
            entry_price: price,
            mark_price: price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            risk_pct: Percentage::ZERO,
            protective_order_ids: Vec::new(),
            opened_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// 포지션 키.
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.broker_account_id, self.instrument.clone())
    }

    /// 포지션이 오픈 상태인지 확인합니다.
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none() && !self.net_size.is_zero()
    }

    /// 롱 포지션인지 확인합니다.
    pub fn is_long(&self) -> bool {
        self.net_size > Decimal::ZERO
    }

    /// 체결을 반영하고 이번 체결로 실현된 손익을 반환합니다.
    ///
    /// 같은 방향이면 평균 진입가를 갱신하고, 반대 방향이면 실현 손익을
    /// 계산합니다. 반대 방향 체결이 보유량을 넘으면 남은 수량으로 방향이
    /// 전환되고 진입가는 체결가로 재설정됩니다. 순수량이 0이 되면 종료됩니다.
    pub fn apply_fill(&mut self, side: Side, size: Quantity, price: Price) -> Decimal {
        let delta = side.signed(size);
        let mut realized = Decimal::ZERO;

        if self.net_size.is_zero() || self.net_size.is_sign_positive() == delta.is_sign_positive() {
            let total = self.net_size.abs() + size;
            if !total.is_zero() {
                self.entry_price =
                    (self.entry_price * self.net_size.abs() + price * size) / total;
            }
            self.net_size += delta;
        } else {
            let closing = size.min(self.net_size.abs());
            let direction = if self.is_long() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = (price - self.entry_price) * closing * direction;
            self.realized_pnl += realized;
            self.net_size += delta;

            if !self.net_size.is_zero() && self.net_size.is_sign_positive() != direction.is_sign_positive() {
                // 방향 전환: 남은 수량은 체결가로 새로 진입
                self.entry_price = price;
            }
        }

        let now = Utc::now();
        self.updated_at = now;
        if self.net_size.is_zero() {
            self.closed_at = Some(now);
            self.unrealized_pnl = Decimal::ZERO;
        } else {
            self.mark(price);
        }
        realized
    }

    /// 평가 가격을 갱신하고 미실현 손익을 재계산합니다.
    pub fn mark(&mut self, price: Price) {
        self.mark_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.net_size;
    }

    /// 브로커가 보고한 값으로 덮어씁니다.
    pub fn overwrite(&mut self, net_size: Quantity, entry_price: Price) {
        self.net_size = net_size;
        self.entry_price = entry_price;
        self.updated_at = Utc::now();
        if net_size.is_zero() {
            self.closed_at = Some(self.updated_at);
        } else {
            self.mark(self.mark_price);
        }
    }

    /// 명목 가치.
    pub fn notional_value(&self) -> Decimal {
        self.mark_price * self.net_size.abs()
    }
}
