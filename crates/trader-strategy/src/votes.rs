//! 지표별 방향 투표.
//!
//! 스냅샷에 값이 있는 지표만 투표합니다. 기준 구간 밖이 아니면
//! 중립(`None`)으로 투표하며, 중립도 투표 수에는 포함됩니다.

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use trader_core::{names, Direction, IndicatorSnapshot};

/// RSI 과매수 기준
pub const RSI_OVERBOUGHT: f64 = 70.0;
/// RSI 과매도 기준
pub const RSI_OVERSOLD: f64 = 30.0;
/// 스토캐스틱 과매수 기준
pub const STOCH_OVERBOUGHT: f64 = 80.0;
/// 스토캐스틱 과매도 기준
pub const STOCH_OVERSOLD: f64 = 20.0;

/// 한 지표 그룹의 투표.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorVote {
    /// 투표 그룹 이름
    pub indicator: &'static str,
    /// 방향 (`None`은 중립)
    pub direction: Option<Direction>,
    /// 판단 근거
    pub reason: String,
}

impl IndicatorVote {
    fn new(indicator: &'static str, direction: Option<Direction>, reason: String) -> Self {
        Self {
            indicator,
            direction,
            reason,
        }
    }
}

/// 스냅샷의 모든 지표 그룹에 대해 투표를 수집합니다.
pub fn collect_votes(snapshot: &IndicatorSnapshot) -> Vec<IndicatorVote> {
    let close = snapshot.close.to_f64().unwrap_or(f64::NAN);

    [
        rsi_vote(snapshot),
        macd_vote(snapshot),
        bollinger_vote(snapshot, close),
        stochastic_vote(snapshot),
        trend_vote(snapshot, close),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn rsi_vote(snapshot: &IndicatorSnapshot) -> Option<IndicatorVote> {
    let rsi = snapshot.get(names::RSI)?;
    let vote = if rsi > RSI_OVERBOUGHT {
        IndicatorVote::new(
            names::RSI,
            Some(Direction::Short),
            format!("RSI {:.1} > {} (과매수)", rsi, RSI_OVERBOUGHT),
        )
    } else if rsi < RSI_OVERSOLD {
        IndicatorVote::new(
            names::RSI,
            Some(Direction::Long),
            format!("RSI {:.1} < {} (과매도)", rsi, RSI_OVERSOLD),
        )
    } else {
        IndicatorVote::new(names::RSI, None, format!("RSI {:.1} 중립", rsi))
    };
    Some(vote)
}

fn macd_vote(snapshot: &IndicatorSnapshot) -> Option<IndicatorVote> {
    let line = snapshot.get(names::MACD)?;
    let signal = snapshot.get(names::MACD_SIGNAL)?;
    let direction = if line > signal {
        Some(Direction::Long)
    } else if line < signal {
        Some(Direction::Short)
    } else {
        None
    };
    let reason = match direction {
        Some(Direction::Long) => format!("MACD {:.4} > 시그널 {:.4}", line, signal),
        Some(Direction::Short) => format!("MACD {:.4} < 시그널 {:.4}", line, signal),
        None => "MACD = 시그널".to_string(),
    };
    Some(IndicatorVote::new(names::MACD, direction, reason))
}

fn bollinger_vote(snapshot: &IndicatorSnapshot, close: f64) -> Option<IndicatorVote> {
    let upper = snapshot.get(names::BB_UPPER)?;
    let lower = snapshot.get(names::BB_LOWER)?;
    let vote = if close > upper {
        IndicatorVote::new(
            "bollinger",
            Some(Direction::Short),
            format!("종가 {:.2} > 볼린저 상단 {:.2}", close, upper),
        )
    } else if close < lower {
        IndicatorVote::new(
            "bollinger",
            Some(Direction::Long),
            format!("종가 {:.2} < 볼린저 하단 {:.2}", close, lower),
        )
    } else {
        IndicatorVote::new("bollinger", None, "볼린저 밴드 내부".to_string())
    };
    Some(vote)
}

fn stochastic_vote(snapshot: &IndicatorSnapshot) -> Option<IndicatorVote> {
    let k = snapshot.get(names::STOCH_K)?;
    let vote = if k > STOCH_OVERBOUGHT {
        IndicatorVote::new(
            "stochastic",
            Some(Direction::Short),
            format!("%K {:.1} > {} (과매수)", k, STOCH_OVERBOUGHT),
        )
    } else if k < STOCH_OVERSOLD {
        IndicatorVote::new(
            "stochastic",
            Some(Direction::Long),
            format!("%K {:.1} < {} (과매도)", k, STOCH_OVERSOLD),
        )
    } else {
        IndicatorVote::new("stochastic", None, format!("%K {:.1} 중립", k))
    };
    Some(vote)
}

/// 종가 > 단기 > 장기 이동평균이면 상승 추세.
fn trend_vote(snapshot: &IndicatorSnapshot, close: f64) -> Option<IndicatorVote> {
    let fast = snapshot.get(names::SMA_FAST)?;
    let slow = snapshot.get(names::SMA_SLOW)?;
    let vote = if close > fast && fast > slow {
        IndicatorVote::new("ma_trend", Some(Direction::Long), "이동평균 정배열".to_string())
    } else if close < fast && fast < slow {
        IndicatorVote::new("ma_trend", Some(Direction::Short), "이동평균 역배열".to_string())
    } else {
        IndicatorVote::new("ma_trend", None, "이동평균 혼조".to_string())
    };
    Some(vote)
}

/// 투표 집계 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    /// 롱 투표 수
    pub long: usize,
    /// 숏 투표 수
    pub short: usize,
    /// 전체 투표 수 (중립 포함)
    pub cast: usize,
}

impl Tally {
    /// 투표를 집계합니다.
    pub fn of(votes: &[IndicatorVote]) -> Self {
        let long = votes
            .iter()
            .filter(|v| v.direction == Some(Direction::Long))
            .count();
        let short = votes
            .iter()
            .filter(|v| v.direction == Some(Direction::Short))
            .count();
        Self {
            long,
            short,
            cast: votes.len(),
        }
    }

    /// 다수 방향. 동률이거나 방향 투표가 없으면 `None`.
    pub fn majority(&self) -> Option<Direction> {
        use std::cmp::Ordering;
        match self.long.cmp(&self.short) {
            Ordering::Greater => Some(Direction::Long),
            Ordering::Less => Some(Direction::Short),
            Ordering::Equal => None,
        }
    }

    /// 다수 방향 득표율.
    pub fn strength(&self) -> f64 {
        if self.cast == 0 {
            return 0.0;
        }
        self.long.max(self.short) as f64 / self.cast as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use trader_core::Timeframe;

    fn snapshot(values: &[(&str, f64)]) -> IndicatorSnapshot {
        IndicatorSnapshot {
            instrument: "X".to_string(),
            timeframe: Timeframe::M5,
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            close: dec!(100),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_missing_indicators_do_not_vote() {
        let votes = collect_votes(&snapshot(&[(names::RSI, 25.0)]));
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].direction, Some(Direction::Long));
    }

    #[test]
    fn test_macd_needs_both_lines() {
        let votes = collect_votes(&snapshot(&[(names::MACD, 1.0)]));
        assert!(votes.is_empty());
    }

    #[test]
    fn test_neutral_counts_toward_strength() {
        let votes = collect_votes(&snapshot(&[
            (names::RSI, 25.0),
            (names::STOCH_K, 50.0),
            (names::MACD, 1.0),
            (names::MACD_SIGNAL, 0.5),
        ]));
        let tally = Tally::of(&votes);
        assert_eq!(tally.long, 2);
        assert_eq!(tally.short, 0);
        assert_eq!(tally.cast, 3);
        assert_eq!(tally.majority(), Some(Direction::Long));
        assert!((tally.strength() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_bollinger_and_trend() {
        let votes = collect_votes(&snapshot(&[
            (names::BB_UPPER, 98.0),
            (names::BB_LOWER, 90.0),
            (names::SMA_FAST, 95.0),
            (names::SMA_SLOW, 90.0),
        ]));
        let by_name: BTreeMap<_, _> = votes.iter().map(|v| (v.indicator, v.direction)).collect();
        assert_eq!(by_name["bollinger"], Some(Direction::Short));
        assert_eq!(by_name["ma_trend"], Some(Direction::Long));
        assert_eq!(Tally::of(&votes).majority(), None);
    }
}
