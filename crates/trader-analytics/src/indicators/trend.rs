//! 추세 지표 (Trend Indicators).

use serde::{Deserialize, Serialize};
use ta::indicators::{MovingAverageConvergenceDivergence, SimpleMovingAverage};
use ta::Next;

use super::{ta_error, IndicatorResult};

/// SMA 파라미터.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmaParams {
    /// 이동평균 기간.
    pub period: usize,
}

/// MACD 파라미터.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacdParams {
    /// 단기 EMA 기간 (기본: 12).
    pub fast_period: usize,
    /// 장기 EMA 기간 (기본: 26).
    pub slow_period: usize,
    /// 시그널 EMA 기간 (기본: 9).
    pub signal_period: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

/// MACD 결과.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdResult {
    /// MACD 라인 (단기 EMA - 장기 EMA).
    pub macd: f64,
    /// 시그널 라인.
    pub signal: f64,
    /// 히스토그램 (MACD - 시그널).
    pub histogram: f64,
}

/// 최신 SMA.
pub fn sma(prices: &[f64], params: SmaParams) -> IndicatorResult<Option<f64>> {
    if prices.len() < params.period {
        return Ok(None);
    }
    let mut indicator = SimpleMovingAverage::new(params.period).map_err(ta_error)?;
    Ok(prices.iter().map(|&p| indicator.next(p)).last())
}

/// 최신 MACD. 장기 EMA와 시그널 EMA가 모두 워밍업되어야 합니다.
pub fn macd(prices: &[f64], params: MacdParams) -> IndicatorResult<Option<MacdResult>> {
    if prices.len() < params.slow_period + params.signal_period {
        return Ok(None);
    }
    let mut indicator = MovingAverageConvergenceDivergence::new(
        params.fast_period,
        params.slow_period,
        params.signal_period,
    )
    .map_err(ta_error)?;
    Ok(prices
        .iter()
        .map(|&p| indicator.next(p))
        .last()
        .map(|out| MacdResult {
            macd: out.macd,
            signal: out.signal,
            histogram: out.histogram,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_last_value() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&prices, SmaParams { period: 3 }).unwrap(), Some(4.0));
        assert_eq!(sma(&prices, SmaParams { period: 6 }).unwrap(), None);
    }

    #[test]
    fn test_macd_uptrend_above_signal() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i * i) as f64 * 0.05).collect();
        let result = macd(&prices, MacdParams::default()).unwrap().unwrap();
        assert!(result.macd > result.signal);
        assert!(result.histogram > 0.0);
    }

    #[test]
    fn test_invalid_period_is_error() {
        assert!(sma(&[1.0], SmaParams { period: 0 }).is_err());
    }
}
