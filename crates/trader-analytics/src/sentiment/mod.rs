//! 감성 집계.
//!
//! 이질적인 감성 소스(극성 점수, 강세/약세 집계, 헤드라인)를
//! (점수 ∈ [-1, 1], 신뢰도 ∈ [0, 1])로 정규화하고, 시간 감쇠를 적용해
//! 종목별 단일 점수로 융합합니다.

mod aggregator;
pub mod lexicon;
mod news;

pub use aggregator::{decayed_confidence, fuse, Contribution, SentimentAggregator};
pub use news::{NewsApiConfig, NewsApiSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trader_core::{TimeoutScope, TraderError};

/// 감성 소스 에러.
#[derive(Debug, Error)]
pub enum SentimentError {
    /// 소스 응답 시간 초과
    #[error("sentiment source {source_name} timed out after {ms}ms")]
    Timeout { source_name: String, ms: u64 },

    /// HTTP/네트워크 에러
    #[error("HTTP error: {0}")]
    Http(String),

    /// 응답 파싱 에러
    #[error("Parse error: {0}")]
    Parse(String),

    /// 소스가 에러를 보고함
    #[error("source error: {0}")]
    Source(String),

    /// 정규화할 데이터 없음
    #[error("no usable sentiment data")]
    Empty,
}

pub type SentimentResult<T> = Result<T, SentimentError>;

impl From<SentimentError> for TraderError {
    fn from(err: SentimentError) -> Self {
        match err {
            SentimentError::Timeout { source_name, .. } => {
                TraderError::timeout(TimeoutScope::Sentiment, source_name)
            }
            other => TraderError::Feed(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SentimentError {
    fn from(err: reqwest::Error) -> Self {
        SentimentError::Http(err.to_string())
    }
}

/// 소스별 원시 감성 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSentiment {
    /// 이미 계산된 극성 점수
    Polarity { score: f64, confidence: f64 },
    /// 강세/약세 의견 수
    BullBear { bullish: u64, bearish: u64 },
    /// 헤드라인 텍스트
    Headlines(Vec<String>),
}

/// 정규화된 감성 값.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    /// 점수 [-1, 1]
    pub score: f64,
    /// 신뢰도 [0, 1]
    pub confidence: f64,
    /// 근거가 된 기사/의견 수. 소스가 직접 신뢰도를 계산한 경우 `None`
    pub samples: Option<usize>,
}

impl RawSentiment {
    /// 점수/신뢰도로 정규화합니다. 사용할 데이터가 없으면 `None`.
    ///
    /// 표본 수에 따른 커버리지는 융합 단계에서 소스 전체를 합산해 적용합니다.
    pub fn normalize(&self) -> Option<Normalized> {
        match self {
            RawSentiment::Polarity { score, confidence } => {
                if score.is_nan() || confidence.is_nan() {
                    return None;
                }
                Some(Normalized {
                    score: score.clamp(-1.0, 1.0),
                    confidence: confidence.clamp(0.0, 1.0),
                    samples: None,
                })
            }
            RawSentiment::BullBear { bullish, bearish } => {
                let total = bullish + bearish;
                if total == 0 {
                    return None;
                }
                let score = (*bullish as f64 - *bearish as f64) / total as f64;
                Some(Normalized {
                    score,
                    confidence: score.abs().min(1.0),
                    samples: Some(total as usize),
                })
            }
            RawSentiment::Headlines(headlines) => {
                let unique = lexicon::dedupe_headlines(headlines);
                let scored: Vec<f64> = unique
                    .iter()
                    .map(|h| lexicon::score_text(h))
                    .collect();
                if scored.is_empty() {
                    return None;
                }
                let mean = scored.iter().sum::<f64>() / scored.len() as f64;
                Some(Normalized {
                    score: mean,
                    confidence: mean.abs().min(1.0),
                    samples: Some(scored.len()),
                })
            }
        }
    }
}

/// 소스 하나의 정규화된 관측치.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    /// 소스 이름
    pub source: String,
    /// 점수 [-1, 1]
    pub score: f64,
    /// 신뢰도 [0, 1]
    pub confidence: f64,
    /// 기사/의견 수 (`None`이면 소스 자체 신뢰도)
    #[serde(default)]
    pub samples: Option<usize>,
    /// 관측 시각
    pub observed_at: DateTime<Utc>,
}

/// 감성 데이터 소스.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    /// 소스 이름 (종목 내에서 유일).
    fn name(&self) -> &str;

    /// 종목 감성을 가져옵니다.
    async fn fetch(&self, instrument: &str) -> SentimentResult<RawSentiment>;
}
