//! 지표 스냅샷.

use crate::types::{Price, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 지표 이름 상수.
pub mod names {
    /// RSI
    pub const RSI: &str = "rsi";
    /// MACD 라인
    pub const MACD: &str = "macd";
    /// MACD 시그널 라인
    pub const MACD_SIGNAL: &str = "macd_signal";
    /// MACD 히스토그램
    pub const MACD_HISTOGRAM: &str = "macd_histogram";
    /// 볼린저 상단
    pub const BB_UPPER: &str = "bb_upper";
    /// 볼린저 중심선
    pub const BB_MIDDLE: &str = "bb_middle";
    /// 볼린저 하단
    pub const BB_LOWER: &str = "bb_lower";
    /// 스토캐스틱 %K
    pub const STOCH_K: &str = "stoch_k";
    /// 스토캐스틱 %D
    pub const STOCH_D: &str = "stoch_d";
    /// 단기 이동평균
    pub const SMA_FAST: &str = "sma_20";
    /// 장기 이동평균
    pub const SMA_SLOW: &str = "sma_50";
    /// ATR
    pub const ATR: &str = "atr";
}

/// 완성된 봉 하나에 대해 계산된 지표 값 묶음.
///
/// 재계산 시 새 스냅샷으로 대체되며 기존 스냅샷은 변경하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// 종목
    pub instrument: String,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 지표 이름 → 값
    pub values: BTreeMap<String, f64>,
    /// 기준 봉의 종가
    pub close: Price,
    /// 기준 봉 종료 시각
    pub timestamp: DateTime<Utc>,
}

impl IndicatorSnapshot {
    /// 지표 값을 조회합니다.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// 스냅샷이 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
