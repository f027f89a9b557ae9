//! 지표 스냅샷과 감성 점수를 융합해 신호를 생성합니다.
//!
//! 방향은 지표 투표 다수로 정해지고, 감성은 신뢰도만 조정합니다.
//! 같은 (종목, 타임프레임, 봉 시각)에 대한 스냅샷은 한 번만 처리됩니다.

use crate::votes::{collect_votes, Tally};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use trader_core::{
    decimal_from_f64, names, IndicatorSnapshot, SentimentScore, Signal, SignalConfig, Timeframe,
};

/// 신호를 내지 않은 이유.
#[derive(Debug, Clone, PartialEq)]
pub enum NoTradeReason {
    /// 투표한 지표가 없음
    NoVotes,
    /// 롱/숏 투표 동률 (전부 중립 포함)
    Tie {
        /// 롱 투표 수
        long: usize,
        /// 숏 투표 수
        short: usize,
    },
    /// 융합 신뢰도가 최소값 미만
    BelowFloor {
        /// 융합 신뢰도
        confidence: f64,
        /// 최소값
        floor: f64,
    },
}

/// 스냅샷 평가 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// 신호 발행
    Issued(Signal),
    /// 신호 없음
    NoTrade(NoTradeReason),
    /// 이미 처리한 봉 (또는 더 오래된 봉)
    Duplicate,
}

impl SignalOutcome {
    /// 발행된 신호를 꺼냅니다.
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            SignalOutcome::Issued(signal) => Some(signal),
            _ => None,
        }
    }
}

/// 감성 정렬도 a = sign(direction) × score × confidence.
fn alignment(sign: f64, sentiment: Option<&SentimentScore>) -> f64 {
    sentiment
        .map(|s| (sign * s.score * s.confidence).clamp(-1.0, 1.0))
        .unwrap_or(0.0)
}

/// 융합 신뢰도 = strength × (w_t + w_s × (1 + a)), [0, 1]로 제한.
pub fn fuse_confidence(strength: f64, alignment: f64, config: &SignalConfig) -> f64 {
    let combined =
        strength * (config.technical_weight + config.sentiment_weight * (1.0 + alignment));
    if combined.is_finite() {
        combined.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// 신호 생성기.
///
/// (종목, 타임프레임)별 마지막 처리 봉 시각을 기억합니다.
#[derive(Debug)]
pub struct SignalGenerator {
    config: SignalConfig,
    last_processed: HashMap<(String, Timeframe), DateTime<Utc>>,
}

impl SignalGenerator {
    /// 새 생성기를 만듭니다.
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            last_processed: HashMap::new(),
        }
    }

    /// 설정.
    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// 마지막으로 처리한 봉 시각.
    pub fn last_processed(&self, instrument: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        self.last_processed
            .get(&(instrument.to_string(), timeframe))
            .copied()
    }

    /// 스냅샷을 평가합니다.
    ///
    /// `sentiment`는 호출 시점에 유효한 융합 감성 점수이며, 없으면 정렬도 0으로
    /// 계산합니다.
    pub fn generate(
        &mut self,
        snapshot: &IndicatorSnapshot,
        sentiment: Option<&SentimentScore>,
    ) -> SignalOutcome {
        let key = (snapshot.instrument.clone(), snapshot.timeframe);
        if let Some(last) = self.last_processed.get(&key) {
            if snapshot.timestamp <= *last {
                debug!(
                    instrument = %snapshot.instrument,
                    timeframe = %snapshot.timeframe,
                    bar = %snapshot.timestamp,
                    "이미 처리한 봉, 건너뜀"
                );
                return SignalOutcome::Duplicate;
            }
        }
        self.last_processed.insert(key, snapshot.timestamp);

        let votes = collect_votes(snapshot);
        let tally = Tally::of(&votes);
        if tally.cast == 0 {
            return SignalOutcome::NoTrade(NoTradeReason::NoVotes);
        }
        let Some(direction) = tally.majority() else {
            debug!(
                instrument = %snapshot.instrument,
                long = tally.long,
                short = tally.short,
                "투표 동률, 신호 없음"
            );
            return SignalOutcome::NoTrade(NoTradeReason::Tie {
                long: tally.long,
                short: tally.short,
            });
        };

        let strength = tally.strength();
        let a = alignment(direction.sign(), sentiment);
        let confidence = fuse_confidence(strength, a, &self.config);

        if confidence < self.config.confidence_floor {
            debug!(
                instrument = %snapshot.instrument,
                timeframe = %snapshot.timeframe,
                confidence,
                floor = self.config.confidence_floor,
                "최소 신뢰도 미달"
            );
            return SignalOutcome::NoTrade(NoTradeReason::BelowFloor {
                confidence,
                floor: self.config.confidence_floor,
            });
        }

        // 지표 가중치 합 + 감성 가중치 = 융합 신뢰도 (제한 전)
        let per_vote = self.config.technical_weight / tally.cast as f64;
        let mut indicator_weights = BTreeMap::new();
        let mut reasoning = Vec::with_capacity(votes.len() + 1);
        for vote in &votes {
            if vote.direction == Some(direction) {
                indicator_weights.insert(vote.indicator.to_string(), per_vote);
            }
            reasoning.push(vote.reason.clone());
        }
        let sentiment_weight = strength * self.config.sentiment_weight * (1.0 + a);
        if let Some(s) = sentiment {
            reasoning.push(format!(
                "감성 {:.2} (신뢰도 {:.2}, 정렬도 {:+.2})",
                s.score, s.confidence, a
            ));
        }

        let volatility_stop = snapshot
            .get(names::ATR)
            .and_then(|atr| decimal_from_f64(atr * self.config.atr_stop_multiplier))
            .filter(|stop| stop.is_sign_positive() && !stop.is_zero());

        let generated_at = snapshot.timestamp;
        let expires_at = generated_at + snapshot.timeframe.delta() * self.config.ttl_bars;

        let signal = Signal {
            id: Signal::derive_id(&snapshot.instrument, snapshot.timeframe, generated_at),
            instrument: snapshot.instrument.clone(),
            timeframe: snapshot.timeframe,
            direction,
            confidence,
            technical_strength: strength,
            indicator_weights,
            sentiment_weight,
            entry_price: snapshot.close,
            volatility_stop,
            generated_at,
            expires_at,
            reasoning,
        };

        info!(
            signal_id = %signal.id,
            instrument = %signal.instrument,
            timeframe = %signal.timeframe,
            direction = %signal.direction,
            confidence = signal.confidence,
            "신호 발행"
        );
        SignalOutcome::Issued(signal)
    }

    /// 오래된 처리 기록을 정리합니다.
    pub fn forget_before(&mut self, cutoff: DateTime<Utc>) {
        self.last_processed.retain(|_, ts| *ts >= cutoff);
    }
}
