//! 변동성 지표 (Volatility Indicators).

use serde::{Deserialize, Serialize};
use ta::indicators::{AverageTrueRange, BollingerBands};
use ta::{DataItem, Next};

use super::{ta_error, IndicatorResult};

/// 볼린저 밴드 파라미터.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BollingerBandsParams {
    /// 이동평균 기간 (기본: 20).
    pub period: usize,
    /// 표준편차 배수 (기본: 2.0).
    pub std_dev_multiplier: f64,
}

impl Default for BollingerBandsParams {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev_multiplier: 2.0,
        }
    }
}

/// 볼린저 밴드 결과.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBandsResult {
    /// 상단 밴드 (MA + k × σ).
    pub upper: f64,
    /// 중간 밴드 (이동평균).
    pub middle: f64,
    /// 하단 밴드 (MA - k × σ).
    pub lower: f64,
}

/// ATR 파라미터.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AtrParams {
    /// ATR 기간 (기본: 14).
    pub period: usize,
}

impl Default for AtrParams {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// 최신 볼린저 밴드.
pub fn bollinger_bands(
    prices: &[f64],
    params: BollingerBandsParams,
) -> IndicatorResult<Option<BollingerBandsResult>> {
    if prices.len() < params.period {
        return Ok(None);
    }
    let mut indicator =
        BollingerBands::new(params.period, params.std_dev_multiplier).map_err(ta_error)?;
    Ok(prices
        .iter()
        .map(|&p| indicator.next(p))
        .last()
        .map(|out| BollingerBandsResult {
            upper: out.upper,
            middle: out.average,
            lower: out.lower,
        }))
}

/// 최신 ATR. 첫 봉에는 직전 종가가 없으므로 `period + 1`개 봉이 필요합니다.
pub fn atr(items: &[DataItem], params: AtrParams) -> IndicatorResult<Option<f64>> {
    if items.len() < params.period + 1 {
        return Ok(None);
    }
    let mut indicator = AverageTrueRange::new(params.period).map_err(ta_error)?;
    Ok(items.iter().map(|item| indicator.next(item)).last())
}
