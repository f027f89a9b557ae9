//! 감성 점수.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 정규화된 종목별 감성 점수.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// 종목
    pub instrument: String,
    /// 점수 [-1, 1]
    pub score: f64,
    /// 신뢰도 [0, 1]
    pub confidence: f64,
    /// 관측 시각
    pub timestamp: DateTime<Utc>,
    /// 융합에 기여한 소스 수
    pub source_count: usize,
}

impl SentimentScore {
    /// 새 감성 점수를 생성합니다. 범위를 벗어난 값은 잘라냅니다.
    pub fn new(
        instrument: impl Into<String>,
        score: f64,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            score: clamp_unit(score, -1.0),
            confidence: clamp_unit(confidence, 0.0),
            timestamp,
            source_count: 1,
        }
    }

    /// 소스 수를 설정합니다.
    pub fn with_source_count(mut self, count: usize) -> Self {
        self.source_count = count;
        self
    }

    /// 라벨 (±0.1 중립 구간).
    pub fn label(&self) -> &'static str {
        if self.score > 0.1 {
            "positive"
        } else if self.score < -0.1 {
            "negative"
        } else {
            "neutral"
        }
    }
}

fn clamp_unit(value: f64, lower: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(lower, 1.0)
    }
}
