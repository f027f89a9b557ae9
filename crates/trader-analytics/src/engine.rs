//! 지표 엔진.
//!
//! 틱을 타임프레임별 봉으로 집계하고, 봉이 마감될 때마다 윈도우에서 지표
//! 스냅샷을 만듭니다. 비동기 경로(`process_tick`)는 계산을 블로킹 워커에서
//! 실행하고 마감 기한을 넘기면 해당 스냅샷을 버립니다.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use trader_core::{Bar, IndicatorConfig, IndicatorSnapshot, Tick, Timeframe};

use crate::bars::{BarAggregator, BarWindow};
use crate::indicators::IndicatorSet;

#[derive(Debug, Clone)]
struct Series {
    aggregator: BarAggregator,
    window: BarWindow,
}

/// 마감된 봉과 계산 대상 윈도우.
struct PendingComputation {
    timeframe: Timeframe,
    bar: Bar,
    bars: Vec<Bar>,
}

/// 종목/타임프레임별 지표 엔진.
#[derive(Debug)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    indicators: IndicatorSet,
    series: HashMap<(String, Timeframe), Series>,
    missed_cycles: u64,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        let indicators = IndicatorSet::from_config(&config);
        Self {
            config,
            indicators,
            series: HashMap::new(),
            missed_cycles: 0,
        }
    }

    /// 기한을 넘겨 버려진 계산 횟수.
    pub fn missed_cycles(&self) -> u64 {
        self.missed_cycles
    }

    /// 윈도우의 봉 수.
    pub fn window_len(&self, instrument: &str, timeframe: Timeframe) -> usize {
        self.series
            .get(&(instrument.to_string(), timeframe))
            .map(|s| s.window.len())
            .unwrap_or(0)
    }

    fn close_bars(&mut self, tick: &Tick) -> Vec<PendingComputation> {
        let mut pending = Vec::new();
        for &timeframe in &self.config.timeframes {
            let capacity = self.config.window_capacity;
            let series = self
                .series
                .entry((tick.instrument.clone(), timeframe))
                .or_insert_with(|| Series {
                    aggregator: BarAggregator::new(timeframe),
                    window: BarWindow::new(capacity),
                });
            if let Some(bar) = series.aggregator.on_tick(tick) {
                series.window.push(bar.clone());
                pending.push(PendingComputation {
                    timeframe,
                    bar,
                    bars: series.window.to_vec(),
                });
            }
        }
        pending
    }

    fn snapshot(indicators: &IndicatorSet, job: PendingComputation) -> Option<IndicatorSnapshot> {
        match indicators.compute(&job.bars) {
            Ok(values) if values.is_empty() => {
                debug!(instrument = %job.bar.instrument, timeframe = %job.timeframe, bars = job.bars.len(), "워밍업 중, 스냅샷 없음");
                None
            }
            Ok(values) => Some(IndicatorSnapshot {
                instrument: job.bar.instrument.clone(),
                timeframe: job.timeframe,
                values,
                close: job.bar.close,
                timestamp: job.bar.close_time(),
            }),
            Err(e) => {
                warn!(instrument = %job.bar.instrument, timeframe = %job.timeframe, error = %e, "지표 계산 실패");
                None
            }
        }
    }

    /// 틱을 동기적으로 처리합니다. 같은 틱 시퀀스는 같은 스냅샷을 만듭니다.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<IndicatorSnapshot> {
        self.close_bars(tick)
            .into_iter()
            .filter_map(|job| Self::snapshot(&self.indicators, job))
            .collect()
    }

    /// 과거 틱 시퀀스를 재생합니다.
    pub fn replay<'a, I>(&mut self, ticks: I) -> Vec<IndicatorSnapshot>
    where
        I: IntoIterator<Item = &'a Tick>,
    {
        ticks.into_iter().flat_map(|t| self.on_tick(t)).collect()
    }

    fn deadline(&self, timeframe: Timeframe) -> Duration {
        let period = timeframe.duration();
        match self.config.compute_budget_ms {
            Some(ms) => period.min(Duration::from_millis(ms)),
            None => period,
        }
    }

    /// 틱을 처리하고 지표 계산은 블로킹 워커에서 기한 내에 수행합니다.
    ///
    /// 기한을 넘기거나 워커가 실패하면 해당 스냅샷은 버려지고 누락 카운터가
    /// 증가합니다. 호출자에게 에러를 반환하지 않습니다.
    pub async fn process_tick(&mut self, tick: &Tick) -> Vec<IndicatorSnapshot> {
        let mut snapshots = Vec::new();
        for job in self.close_bars(tick) {
            let deadline = self.deadline(job.timeframe);
            let instrument = job.bar.instrument.clone();
            let timeframe = job.timeframe;
            let indicators = self.indicators.clone();
            let handle = tokio::task::spawn_blocking(move || Self::snapshot(&indicators, job));

            match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(Some(snapshot))) => snapshots.push(snapshot),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    self.missed_cycles += 1;
                    warn!(%instrument, %timeframe, error = %e, "지표 워커 실패, 주기 누락");
                }
                Err(_) => {
                    self.missed_cycles += 1;
                    warn!(
                        %instrument,
                        %timeframe,
                        deadline_ms = deadline.as_millis() as u64,
                        missed = self.missed_cycles,
                        "지표 계산 기한 초과, 주기 누락"
                    );
                }
            }
        }
        snapshots
    }
}
