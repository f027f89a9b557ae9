//! 정밀한 금융 계산을 위한 Decimal 유틸리티.
//!
//! 가격, 수량, 리스크 비율은 모두 `Decimal`로 다룹니다.
//! 지표 계산처럼 부동소수점이 필요한 경계에서만 `f64`로 변환합니다.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// 금융 정밀도를 위한 가격 타입.
pub type Price = Decimal;

/// 주문 수량을 위한 타입 (부호 있는 순포지션에도 사용).
pub type Quantity = Decimal;

/// 퍼센트 단위 비율 (2 = 2%).
pub type Percentage = Decimal;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// 퍼센트 단위 비율을 적용한 값을 반환합니다 (`self × pct / 100`).
    fn pct_of(&self, pct: Percentage) -> Decimal;

    /// 지정된 소수점 자릿수에서 0 방향으로 내림합니다.
    ///
    /// 포지션 크기는 리스크 예산을 넘지 않도록 항상 내림합니다.
    fn floor_dp(&self, dp: u32) -> Decimal;

    /// 지표 계산용 `f64` 변환. 표현 불가능하면 NaN.
    fn to_f64_lossy(&self) -> f64;

    /// 부호 (-1, 0, 1).
    fn signum_i8(&self) -> i8;
}

impl DecimalExt for Decimal {
    fn pct_of(&self, pct: Percentage) -> Decimal {
        *self * pct / Decimal::ONE_HUNDRED
    }

    fn floor_dp(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
    }

    fn to_f64_lossy(&self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }

    fn signum_i8(&self) -> i8 {
        if self.is_zero() {
            0
        } else if self.is_sign_negative() {
            -1
        } else {
            1
        }
    }
}

/// `f64` 지표 값을 가격 `Decimal`로 변환합니다. NaN/무한대는 `None`.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::from_f64(value)
    } else {
        None
    }
}
