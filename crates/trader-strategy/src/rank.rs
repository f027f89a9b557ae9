//! 후보 신호 품질 순위.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use trader_core::{DecimalExt, RiskPolicy, Signal};

/// 점수가 매겨진 신호.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSignal {
    /// 신호
    pub signal: Signal,
    /// 품질 점수 [0, 1]
    pub quality: f64,
    /// 손익비
    pub reward_risk: f64,
}

/// 정책 기준 손익비 (익절 거리 / 손절 거리).
pub fn reward_risk(signal: &Signal, policy: &RiskPolicy) -> f64 {
    let take_profit = signal.entry_price.pct_of(policy.default_take_profit_pct);
    let stop = match signal.volatility_stop {
        Some(stop) if policy.use_volatility_stop => stop,
        _ => signal.entry_price.pct_of(policy.default_stop_pct),
    };
    if stop <= Decimal::ZERO {
        return 0.0;
    }
    (take_profit / stop).to_f64().unwrap_or(0.0)
}

/// 0.4 × 신뢰도 + 0.4 × 기술적 강도 + 0.2 × min(손익비, 3) / 3.
pub fn quality_score(signal: &Signal, policy: &RiskPolicy) -> f64 {
    let rr = reward_risk(signal, policy).clamp(0.0, 3.0);
    0.4 * signal.confidence + 0.4 * signal.technical_strength + 0.2 * rr / 3.0
}

/// 후보 신호를 품질 점수 내림차순으로 정렬합니다.
///
/// 점수가 같으면 더 최근 신호가 앞에 옵니다.
pub fn rank_signals<I>(signals: I, policy: &RiskPolicy) -> Vec<RankedSignal>
where
    I: IntoIterator<Item = Signal>,
{
    let mut ranked: Vec<RankedSignal> = signals
        .into_iter()
        .map(|signal| RankedSignal {
            quality: quality_score(&signal, policy),
            reward_risk: reward_risk(&signal, policy),
            signal,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.quality
            .total_cmp(&a.quality)
            .then_with(|| b.signal.generated_at.cmp(&a.signal.generated_at))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::signal;
    use rust_decimal_macros::dec;
    use trader_core::{Direction, Timeframe};

    #[test]
    fn test_reward_risk_uses_policy_distances() {
        let policy = RiskPolicy::default();
        let s = signal("X", Timeframe::M5, Direction::Long, 0);
        // 4% / 2%
        assert!((reward_risk(&s, &policy) - 2.0).abs() < 1e-9);

        let mut vol = s.clone();
        vol.volatility_stop = Some(dec!(1));
        assert!((reward_risk(&vol, &policy) - 2.0).abs() < 1e-9);

        let policy = RiskPolicy {
            use_volatility_stop: true,
            ..RiskPolicy::default()
        };
        // 진입가 100 기준 익절 4 / 손절 1
        assert!((reward_risk(&vol, &policy) - 4.0).abs() < 1e-9);
        assert!((quality_score(&vol, &policy)
            - (0.4 * vol.confidence + 0.4 * vol.technical_strength + 0.2))
            .abs()
            < 1e-9);
    }

    #[test]
    fn test_rank_order() {
        let policy = RiskPolicy::default();
        let mut weak = signal("X", Timeframe::M5, Direction::Long, 0);
        weak.confidence = 0.5;
        let mut strong = signal("Y", Timeframe::M5, Direction::Long, 0);
        strong.confidence = 0.9;

        let ranked = rank_signals(vec![weak.clone(), strong.clone()], &policy);
        assert_eq!(ranked[0].signal.id, strong.id);
        assert_eq!(ranked[1].signal.id, weak.id);
        assert!(ranked[0].quality > ranked[1].quality);
    }
}
