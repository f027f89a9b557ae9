//! 소스별 격리 폴링과 감성 융합.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trader_core::{SentimentConfig, SentimentScore};

use super::{SentimentError, SentimentReading, SentimentSource};

/// 융합 입력 하나 (감쇠/패널티 적용 전).
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    /// 마지막 정상 관측치
    pub reading: SentimentReading,
    /// 연속 실패 횟수
    pub consecutive_failures: u32,
}

/// 시간 감쇠가 적용된 신뢰도.
///
/// 신선도 기간 이내는 그대로, 이후는 반감기마다 절반이 됩니다.
pub fn decayed_confidence(confidence: f64, age_secs: i64, config: &SentimentConfig) -> f64 {
    let excess = age_secs - config.freshness_horizon_secs;
    if excess <= 0 {
        return confidence;
    }
    let half_life = config.half_life_secs.max(1) as f64;
    confidence * 2f64.powf(-(excess as f64) / half_life)
}

/// 기여분을 하나의 감성 점수로 융합합니다.
///
/// 감쇠/실패 패널티 이후 신뢰도가 하한 미만인 기여분은 제외됩니다.
/// 커버리지는 남은 기여분의 기사/의견 수 합계를 `coverage_target`으로 나눈
/// 값이며, 자체 신뢰도를 보고한 소스는 목표치만큼으로 셉니다.
/// 남은 기여분이 없으면 `None`.
pub fn fuse(
    instrument: &str,
    contributions: &[Contribution],
    now: DateTime<Utc>,
    config: &SentimentConfig,
) -> Option<SentimentScore> {
    let target = config.coverage_target.max(1);
    let survivors: Vec<(f64, f64, usize)> = contributions
        .iter()
        .filter_map(|c| {
            let age = (now - c.reading.observed_at).num_seconds();
            let penalty = config.failure_penalty.powi(c.consecutive_failures as i32);
            let confidence = decayed_confidence(c.reading.confidence, age, config) * penalty;
            (confidence >= config.confidence_floor && confidence > 0.0).then_some((
                c.reading.score,
                confidence,
                c.reading.samples.unwrap_or(target),
            ))
        })
        .collect();

    if survivors.is_empty() {
        return None;
    }

    let n = survivors.len() as f64;
    let total_confidence: f64 = survivors.iter().map(|(_, c, _)| c).sum();
    let score = survivors.iter().map(|(s, c, _)| s * c).sum::<f64>() / total_confidence;

    let bullish = survivors.iter().filter(|(s, _, _)| *s > 0.0).count();
    let bearish = survivors.iter().filter(|(s, _, _)| *s < 0.0).count();
    let agreement = bullish.max(bearish) as f64 / n;
    let samples: usize = survivors.iter().map(|(_, _, samples)| samples).sum();
    let coverage = (samples as f64 / target as f64).min(1.0);
    let confidence = (total_confidence / n) * coverage * (1.0 + agreement) / 2.0;

    Some(SentimentScore::new(instrument, score, confidence, now).with_source_count(survivors.len()))
}

#[derive(Debug, Default, Clone)]
struct SourceState {
    last_good: Option<SentimentReading>,
    consecutive_failures: u32,
}

/// 종목별 감성 집계기.
pub struct SentimentAggregator {
    config: SentimentConfig,
    sources: Vec<Arc<dyn SentimentSource>>,
    /// (종목, 소스 이름) → 상태
    states: RwLock<HashMap<(String, String), SourceState>>,
}

impl SentimentAggregator {
    /// 소스 없이 생성합니다. `with_source`로 추가합니다.
    pub fn new(config: SentimentConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// 소스를 추가합니다.
    pub fn with_source(mut self, source: Arc<dyn SentimentSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 등록된 소스 수.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// 모든 소스를 동시에 폴링하고 `now` 기준 융합 점수를 반환합니다.
    ///
    /// 각 소스는 자체 타임아웃을 가지며, 실패한 소스는 마지막 정상
    /// 관측치를 유지한 채 연속 실패 횟수만 증가합니다.
    pub async fn poll(&self, instrument: &str, now: DateTime<Utc>) -> Option<SentimentScore> {
        let timeout = Duration::from_millis(self.config.source_timeout_ms);
        let fetches = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let result = match tokio::time::timeout(timeout, source.fetch(instrument)).await {
                    Ok(result) => result,
                    Err(_) => Err(SentimentError::Timeout {
                        source_name: source.name().to_string(),
                        ms: timeout.as_millis() as u64,
                    }),
                };
                (source.name().to_string(), result)
            }
        });
        let results = join_all(fetches).await;

        {
            let mut states = self.states.write().await;
            for (name, result) in results {
                let state = states
                    .entry((instrument.to_string(), name.clone()))
                    .or_default();
                match result.and_then(|raw| raw.normalize().ok_or(SentimentError::Empty)) {
                    Ok(normalized) => {
                        state.last_good = Some(SentimentReading {
                            source: name,
                            score: normalized.score,
                            confidence: normalized.confidence,
                            samples: normalized.samples,
                            observed_at: now,
                        });
                        state.consecutive_failures = 0;
                    }
                    Err(e) => {
                        state.consecutive_failures += 1;
                        warn!(
                            instrument,
                            source = %name,
                            failures = state.consecutive_failures,
                            error = %e,
                            "감성 소스 실패, 이전 값 유지"
                        );
                    }
                }
            }
        }

        self.score_at(instrument, now).await
    }

    /// 저장된 관측치로 `now` 기준 융합 점수를 계산합니다.
    pub async fn score_at(&self, instrument: &str, now: DateTime<Utc>) -> Option<SentimentScore> {
        let contributions: Vec<Contribution> = {
            let states = self.states.read().await;
            states
                .iter()
                .filter(|((inst, _), _)| inst == instrument)
                .filter_map(|(_, state)| {
                    state.last_good.clone().map(|reading| Contribution {
                        reading,
                        consecutive_failures: state.consecutive_failures,
                    })
                })
                .collect()
        };
        let fused = fuse(instrument, &contributions, now, &self.config);
        if let Some(score) = &fused {
            debug!(
                instrument,
                score = score.score,
                confidence = score.confidence,
                sources = score.source_count,
                "감성 융합"
            );
        }
        fused
    }

    /// 주기적으로 종목들을 폴링합니다. 토큰이 취소되면 종료합니다.
    pub async fn run(self: Arc<Self>, instruments: Vec<String>, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        info!(instruments = instruments.len(), sources = self.sources.len(), "감성 폴링 시작");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    for instrument in &instruments {
                        self.poll(instrument, Utc::now()).await;
                    }
                }
            }
        }
    }
}
