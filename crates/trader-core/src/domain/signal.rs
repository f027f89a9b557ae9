//! 트레이딩 신호.
//!
//! - `Direction` - 신호 방향 (롱/숏)
//! - `Signal` - 지표와 감성을 융합한 발행 신호 (발행 후 불변)

use crate::domain::Side;
use crate::types::{Price, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 신호 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 롱
    Long,
    /// 숏
    Short,
}

impl Direction {
    /// 진입 주문 방향.
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// 부호 (+1 롱, -1 숏).
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// 반대 방향.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// 발행된 트레이딩 신호.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// 신호 ID (종목/타임프레임/봉 시각에서 결정적으로 파생)
    pub id: Uuid,
    /// 종목
    pub instrument: String,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 방향
    pub direction: Direction,
    /// 융합 신뢰도 [0, 1]
    pub confidence: f64,
    /// 기술적 강도 (다수 방향 득표율)
    pub technical_strength: f64,
    /// 방향에 동의한 지표별 가중치
    pub indicator_weights: BTreeMap<String, f64>,
    /// 감성 기여 가중치 (정렬도 반영)
    pub sentiment_weight: f64,
    /// 신호 시점 종가
    pub entry_price: Price,
    /// 변동성 기반 손절 거리 (ATR × 배수)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility_stop: Option<Price>,
    /// 생성 시각 (= 스냅샷 시각)
    pub generated_at: DateTime<Utc>,
    /// 만료 시각
    pub expires_at: DateTime<Utc>,
    /// 판단 근거
    #[serde(default)]
    pub reasoning: Vec<String>,
}

impl Signal {
    /// (종목, 타임프레임, 봉 시각) 키에 대한 결정적 신호 ID.
    pub fn derive_id(instrument: &str, timeframe: Timeframe, bar_time: DateTime<Utc>) -> Uuid {
        let key = format!("{}|{}|{}", instrument, timeframe, bar_time.timestamp());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
    }

    /// 주어진 시각에 만료되었는지 확인합니다.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 신호 강도 등급.
    pub fn strength_label(&self) -> &'static str {
        match self.confidence {
            c if c >= 0.8 => "very_strong",
            c if c >= 0.6 => "strong",
            c if c >= 0.4 => "moderate",
            c if c >= 0.2 => "weak",
            _ => "very_weak",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_id_is_stable() {
        let ts = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        let a = Signal::derive_id("X", Timeframe::M5, ts);
        let b = Signal::derive_id("X", Timeframe::M5, ts);
        let c = Signal::derive_id("X", Timeframe::H1, ts);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Long.entry_side(), Side::Buy);
        assert_eq!(Direction::Short.entry_side(), Side::Sell);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
        assert_eq!(Direction::Short.sign(), -1.0);
    }
}
