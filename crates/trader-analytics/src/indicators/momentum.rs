//! 모멘텀 지표 (Momentum Indicators).
//!
//! 가격 모멘텀과 과매수/과매도 상태를 측정합니다.
//! - RSI (Relative Strength Index)
//! - Stochastic Oscillator

use serde::{Deserialize, Serialize};
use ta::indicators::{ExponentialMovingAverage, FastStochastic, RelativeStrengthIndex};
use ta::{DataItem, Next};

use super::{ta_error, IndicatorResult};

/// RSI 파라미터.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RsiParams {
    /// RSI 기간 (기본: 14).
    pub period: usize,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// 스토캐스틱 파라미터.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StochasticParams {
    /// %K 기간 (기본: 14).
    pub k_period: usize,
    /// %D 기간 (smoothing, 기본: 3).
    pub d_period: usize,
}

impl Default for StochasticParams {
    fn default() -> Self {
        Self {
            k_period: 14,
            d_period: 3,
        }
    }
}

/// 스토캐스틱 결과.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochasticResult {
    /// %K (Fast Stochastic).
    pub k: f64,
    /// %D (%K의 평활값). 봉이 부족하면 `None`.
    pub d: Option<f64>,
}

/// 최신 RSI. 0-100 범위이며 `period + 1`개 종가가 필요합니다.
pub fn rsi(prices: &[f64], params: RsiParams) -> IndicatorResult<Option<f64>> {
    if prices.len() < params.period + 1 {
        return Ok(None);
    }
    let mut indicator = RelativeStrengthIndex::new(params.period).map_err(ta_error)?;
    Ok(prices.iter().map(|&p| indicator.next(p)).last())
}

/// 최신 스토캐스틱.
pub fn stochastic(items: &[DataItem], params: StochasticParams) -> IndicatorResult<Option<StochasticResult>> {
    if items.len() < params.k_period {
        return Ok(None);
    }
    let mut fast = FastStochastic::new(params.k_period).map_err(ta_error)?;
    let mut smooth = ExponentialMovingAverage::new(params.d_period).map_err(ta_error)?;

    let mut k = 0.0;
    let mut d = 0.0;
    for item in items {
        k = fast.next(item);
        d = smooth.next(k);
    }

    let d = (items.len() >= params.k_period + params.d_period).then_some(d);
    Ok(Some(StochasticResult { k, d }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::bars_from_closes;
    use crate::indicators::to_data_items;

    #[test]
    fn test_rsi_rising_market_is_overbought() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let value = rsi(&prices, RsiParams::default()).unwrap().unwrap();
        assert!(value > 70.0);
    }

    #[test]
    fn test_rsi_needs_period_plus_one() {
        let prices = vec![1.0; 14];
        assert!(rsi(&prices, RsiParams::default()).unwrap().is_none());
    }

    #[test]
    fn test_stochastic_at_range_bottom() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let items = to_data_items(&bars_from_closes(&closes)).unwrap();
        let result = stochastic(&items, StochasticParams::default()).unwrap().unwrap();
        assert!(result.k < 20.0);
        assert!(result.d.is_some());
    }
}
