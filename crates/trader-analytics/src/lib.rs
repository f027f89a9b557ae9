//! 지표 엔진과 감성 집계.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 틱 → 봉 집계와 롤링 윈도우
//! - 기술적 지표 (RSI, MACD, 볼린저, 스토캐스틱, SMA, ATR)
//! - 봉 마감마다 지표 스냅샷을 만드는 지표 엔진
//! - 소스별로 격리된 감성 집계기

pub mod bars;
pub mod engine;
pub mod indicators;
pub mod sentiment;

pub use bars::{BarAggregator, BarWindow};
pub use engine::IndicatorEngine;
pub use indicators::{IndicatorError, IndicatorResult, IndicatorSet};
pub use sentiment::{
    Normalized, RawSentiment, SentimentAggregator, SentimentError, SentimentReading,
    SentimentSource,
};
