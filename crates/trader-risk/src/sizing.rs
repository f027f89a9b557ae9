//! 포지션 크기와 보호 가격 계산.
//!
//! 모든 함수는 순수 함수이며 `Decimal`만 다룹니다. 같은 입력은 항상 같은
//! 결과를 냅니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{
    DecimalExt, Direction, Percentage, Price, Quantity, RiskConfig, RiskPolicy, RiskViolation,
    Side, Signal,
};
use uuid::Uuid;

/// 승인된 거래 계획.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    /// 원천 신호
    pub signal_id: Uuid,
    /// 종목
    pub instrument: String,
    /// 방향
    pub direction: Direction,
    /// 진입가
    pub entry_price: Price,
    /// 수량
    pub size: Quantity,
    /// 손절가
    pub stop_price: Price,
    /// 익절가
    pub take_profit_price: Price,
    /// 손절 거리
    pub stop_distance: Price,
    /// 점유 리스크 (%)
    pub risk_pct: Percentage,
}

impl TradePlan {
    /// 진입 주문 방향.
    pub fn side(&self) -> Side {
        self.direction.entry_side()
    }

    /// 손절 시 손실 금액.
    pub fn risk_amount(&self) -> Decimal {
        self.size * self.stop_distance
    }
}

/// 손절 거리.
///
/// 정책이 변동성 손절을 쓰고 신호에 값이 있으면 그것을, 아니면
/// 진입가 × `default_stop_pct`를 사용합니다.
pub fn stop_distance(signal: &Signal, policy: &RiskPolicy) -> Result<Price, RiskViolation> {
    let distance = match signal.volatility_stop {
        Some(stop) if policy.use_volatility_stop => stop,
        _ => signal.entry_price.pct_of(policy.default_stop_pct),
    };
    if distance <= Decimal::ZERO {
        return Err(RiskViolation::InvalidStop(format!(
            "손절 거리 {}는 0보다 커야 합니다",
            distance
        )));
    }
    Ok(distance)
}

/// 익절 거리 = 진입가 × `default_take_profit_pct`.
pub fn take_profit_distance(entry: Price, policy: &RiskPolicy) -> Price {
    entry.pct_of(policy.default_take_profit_pct)
}

/// 포지션 크기 = 자본 × 리스크% / 손절 거리, 지정 자릿수에서 내림.
///
/// 손절 거리가 0 이하이면 0을 반환합니다.
pub fn position_size(
    equity: Decimal,
    risk_pct: Percentage,
    stop_distance: Price,
    precision: u32,
) -> Quantity {
    if stop_distance <= Decimal::ZERO || equity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (equity.pct_of(risk_pct) / stop_distance).floor_dp(precision)
}

/// (손절가, 익절가). 롱은 손절이 아래, 숏은 위.
pub fn protective_levels(
    direction: Direction,
    entry: Price,
    stop_distance: Price,
    take_profit_distance: Price,
) -> (Price, Price) {
    match direction {
        Direction::Long => (entry - stop_distance, entry + take_profit_distance),
        Direction::Short => (entry + stop_distance, entry - take_profit_distance),
    }
}

/// 신호와 정책으로 거래 계획을 만듭니다.
pub fn plan_trade(
    signal: &Signal,
    policy: &RiskPolicy,
    equity: Decimal,
    config: &RiskConfig,
) -> Result<TradePlan, RiskViolation> {
    let distance = stop_distance(signal, policy)?;
    let size = position_size(
        equity,
        policy.risk_per_trade_pct,
        distance,
        config.size_precision,
    );
    if size < config.min_order_size || size.is_zero() {
        return Err(RiskViolation::SizeTooSmall {
            size,
            minimum: config.min_order_size,
        });
    }

    let tp_distance = take_profit_distance(signal.entry_price, policy);
    let (stop_price, take_profit_price) =
        protective_levels(signal.direction, signal.entry_price, distance, tp_distance);
    if stop_price <= Decimal::ZERO {
        return Err(RiskViolation::InvalidStop(format!(
            "손절가 {}가 0 이하입니다",
            stop_price
        )));
    }

    Ok(TradePlan {
        signal_id: signal.id,
        instrument: signal.instrument.clone(),
        direction: signal.direction,
        entry_price: signal.entry_price,
        size,
        stop_price,
        take_profit_price,
        stop_distance: distance,
        risk_pct: policy.risk_per_trade_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::signal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reference_sizing() {
        // 10000 × 2% / 50 = 4
        assert_eq!(position_size(dec!(10000), dec!(2), dec!(50), 4), dec!(4));
        assert_eq!(position_size(dec!(10000), dec!(2), dec!(0), 4), dec!(0));
        assert_eq!(position_size(dec!(1000), dec!(1), dec!(3), 2), dec!(3.33));
    }

    #[test]
    fn test_levels_mirror_by_direction() {
        assert_eq!(
            protective_levels(Direction::Long, dec!(100), dec!(2), dec!(4)),
            (dec!(98), dec!(104))
        );
        assert_eq!(
            protective_levels(Direction::Short, dec!(100), dec!(2), dec!(4)),
            (dec!(102), dec!(96))
        );
    }

    #[test]
    fn test_plan_with_default_stop() {
        let policy = RiskPolicy::default().with_risk_per_trade(dec!(2));
        let s = signal(Direction::Long, dec!(2500), None);
        let plan = plan_trade(&s, &policy, dec!(10000), &RiskConfig::default()).unwrap();
        // 손절 거리 2500 × 2% = 50
        assert_eq!(plan.stop_distance, dec!(50));
        assert_eq!(plan.size, dec!(4));
        assert_eq!(plan.stop_price, dec!(2450));
        assert_eq!(plan.take_profit_price, dec!(2600));
        assert_eq!(plan.risk_amount(), dec!(200));
        assert_eq!(plan.side(), Side::Buy);
    }

    #[test]
    fn test_volatility_stop_only_when_enabled() {
        let s = signal(Direction::Short, dec!(100), Some(dec!(5)));
        let config = RiskConfig::default();

        let plain = plan_trade(&s, &RiskPolicy::default(), dec!(10000), &config).unwrap();
        assert_eq!(plain.stop_distance, dec!(2));

        let policy = RiskPolicy::default().with_volatility_stop(true);
        let vol = plan_trade(&s, &policy, dec!(10000), &config).unwrap();
        assert_eq!(vol.stop_distance, dec!(5));
        assert_eq!(vol.stop_price, dec!(105));
        assert_eq!(vol.size, dec!(20));
    }

    #[test]
    fn test_size_too_small() {
        let config = RiskConfig {
            min_order_size: dec!(1),
            ..RiskConfig::default()
        };
        let s = signal(Direction::Long, dec!(50000), None);
        let err = plan_trade(&s, &RiskPolicy::default(), dec!(1000), &config).unwrap_err();
        assert!(matches!(err, RiskViolation::SizeTooSmall { .. }));
    }

    #[test]
    fn test_long_stop_below_zero_is_invalid() {
        let policy = RiskPolicy::default().with_volatility_stop(true);
        let s = signal(Direction::Long, dec!(10), Some(dec!(12)));
        let err = plan_trade(&s, &policy, dec!(10000), &RiskConfig::default()).unwrap_err();
        assert!(matches!(err, RiskViolation::InvalidStop(_)));
    }
}
