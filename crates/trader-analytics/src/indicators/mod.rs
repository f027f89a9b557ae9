//! 기술적 지표 모듈.
//!
//! ta-rs 라이브러리 기반으로 봉 윈도우에서 최신 지표 값을 계산합니다.
//! 매 봉 마감마다 새 지표 인스턴스로 윈도우 전체를 다시 계산하므로 같은
//! 윈도우는 항상 같은 결과를 냅니다. 봉 수가 부족한 지표는 결과에서 빠집니다.
//!
//! # 지원 지표
//!
//! ## 추세 지표 (Trend Indicators)
//! - **SMA**: 단순 이동평균 (단기/장기)
//! - **MACD**: 이동평균 수렴/확산
//!
//! ## 모멘텀 지표 (Momentum Indicators)
//! - **RSI**: 상대강도지수
//! - **Stochastic**: 스토캐스틱 오실레이터 (%K, %D)
//!
//! ## 변동성 지표 (Volatility Indicators)
//! - **Bollinger Bands**: 볼린저 밴드
//! - **ATR**: 평균 실제 범위

pub mod momentum;
pub mod trend;
pub mod volatility;

use std::collections::BTreeMap;
use ta::DataItem;
use thiserror::Error;
use trader_core::{names, Bar, DecimalExt, IndicatorConfig, TraderError};

pub use momentum::{RsiParams, StochasticParams, StochasticResult};
pub use trend::{MacdParams, MacdResult, SmaParams};
pub use volatility::{AtrParams, BollingerBandsParams, BollingerBandsResult};

/// 지표 계산 오류.
#[derive(Debug, Error)]
pub enum IndicatorError {
    /// 데이터 부족 오류
    #[error("데이터가 부족합니다: 필요 {required}개, 제공 {provided}개")]
    InsufficientData { required: usize, provided: usize },

    /// 잘못된 파라미터
    #[error("잘못된 파라미터: {0}")]
    InvalidParameter(String),

    /// 잘못된 봉 데이터
    #[error("잘못된 봉 데이터: {0}")]
    InvalidBar(String),
}

/// 지표 계산 결과 타입.
pub type IndicatorResult<T> = Result<T, IndicatorError>;

impl From<IndicatorError> for TraderError {
    fn from(err: IndicatorError) -> Self {
        TraderError::Internal(err.to_string())
    }
}

/// ta 라이브러리 에러를 파라미터 오류로 변환.
pub(crate) fn ta_error(err: ta::errors::TaError) -> IndicatorError {
    IndicatorError::InvalidParameter(format!("{:?}", err))
}

/// 봉을 ta `DataItem`으로 변환합니다.
pub(crate) fn to_data_items(bars: &[Bar]) -> IndicatorResult<Vec<DataItem>> {
    bars.iter()
        .map(|bar| {
            DataItem::builder()
                .open(bar.open.to_f64_lossy())
                .high(bar.high.to_f64_lossy())
                .low(bar.low.to_f64_lossy())
                .close(bar.close.to_f64_lossy())
                .volume(bar.volume.to_f64_lossy())
                .build()
                .map_err(|e| IndicatorError::InvalidBar(format!("{} @ {}: {:?}", bar.instrument, bar.open_time, e)))
        })
        .collect()
}

pub(crate) fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close.to_f64_lossy()).collect()
}

/// 설정된 지표 묶음.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    /// RSI 파라미터
    pub rsi: RsiParams,
    /// MACD 파라미터
    pub macd: MacdParams,
    /// 볼린저 밴드 파라미터
    pub bollinger: BollingerBandsParams,
    /// 스토캐스틱 파라미터
    pub stochastic: StochasticParams,
    /// 단기 이동평균 (기본 20)
    pub sma_fast: SmaParams,
    /// 장기 이동평균 (기본 50)
    pub sma_slow: SmaParams,
    /// ATR 파라미터
    pub atr: AtrParams,
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self::from_config(&IndicatorConfig::default())
    }
}

impl IndicatorSet {
    /// 설정에서 지표 묶음을 생성합니다.
    pub fn from_config(config: &IndicatorConfig) -> Self {
        Self {
            rsi: RsiParams {
                period: config.rsi_period,
            },
            macd: MacdParams {
                fast_period: config.macd_fast,
                slow_period: config.macd_slow,
                signal_period: config.macd_signal,
            },
            bollinger: BollingerBandsParams {
                period: config.bollinger_period,
                std_dev_multiplier: config.bollinger_std,
            },
            stochastic: StochasticParams {
                k_period: config.stochastic_period,
                d_period: config.stochastic_smooth,
            },
            sma_fast: SmaParams {
                period: config.sma_fast,
            },
            sma_slow: SmaParams {
                period: config.sma_slow,
            },
            atr: AtrParams {
                period: config.atr_period,
            },
        }
    }

    /// 윈도우의 마지막 봉 기준 지표 값을 계산합니다.
    ///
    /// 봉이 부족한 지표는 결과에 포함되지 않습니다.
    pub fn compute(&self, bars: &[Bar]) -> IndicatorResult<BTreeMap<String, f64>> {
        let mut values = BTreeMap::new();
        if bars.is_empty() {
            return Ok(values);
        }
        let prices = closes(bars);
        let items = to_data_items(bars)?;

        if let Some(rsi) = momentum::rsi(&prices, self.rsi)? {
            values.insert(names::RSI.to_string(), rsi);
        }
        if let Some(stoch) = momentum::stochastic(&items, self.stochastic)? {
            values.insert(names::STOCH_K.to_string(), stoch.k);
            if let Some(d) = stoch.d {
                values.insert(names::STOCH_D.to_string(), d);
            }
        }
        if let Some(macd) = trend::macd(&prices, self.macd)? {
            values.insert(names::MACD.to_string(), macd.macd);
            values.insert(names::MACD_SIGNAL.to_string(), macd.signal);
            values.insert(names::MACD_HISTOGRAM.to_string(), macd.histogram);
        }
        if let Some(sma) = trend::sma(&prices, self.sma_fast)? {
            values.insert(names::SMA_FAST.to_string(), sma);
        }
        if let Some(sma) = trend::sma(&prices, self.sma_slow)? {
            values.insert(names::SMA_SLOW.to_string(), sma);
        }
        if let Some(bb) = volatility::bollinger_bands(&prices, self.bollinger)? {
            values.insert(names::BB_UPPER.to_string(), bb.upper);
            values.insert(names::BB_MIDDLE.to_string(), bb.middle);
            values.insert(names::BB_LOWER.to_string(), bb.lower);
        }
        if let Some(atr) = volatility::atr(&items, self.atr)? {
            values.insert(names::ATR.to_string(), atr);
        }

        values.retain(|_, v| v.is_finite());
        Ok(values)
    }
}
