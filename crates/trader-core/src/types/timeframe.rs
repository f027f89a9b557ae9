//! 봉 집계를 위한 타임프레임 정의.
//!
//! 봉 경계는 Unix epoch 기준으로 정렬됩니다. 같은 틱 시퀀스는 항상
//! 같은 경계에서 봉이 닫히므로 재생(replay) 결과가 결정적입니다.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 봉 타임프레임.
///
/// `Ord`는 기간 순서를 따릅니다 (`M1 < H1 < D1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 30분봉
    #[serde(rename = "30m")]
    M30,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// 모든 타임프레임 (짧은 순).
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// 이 타임프레임의 초 단위 값을 반환합니다.
    pub fn as_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    /// 이 타임프레임의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs().unsigned_abs())
    }

    /// chrono 기간.
    pub fn delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.as_secs())
    }

    /// `ts`가 속한 봉의 시작 시각.
    pub fn bar_open(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.as_secs();
        let aligned = ts.timestamp().div_euclid(secs) * secs;
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    /// 간격 코드 ("5m", "1h" ...).
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|tf| tf.code() == s)
            .ok_or_else(|| format!("Invalid timeframe: {}", s))
    }
}
