//! 틱 리플레이 명령어.
//!
//! CSV 틱을 지표 엔진과 신호 생성기에 순서대로 흘려보냅니다. 주문은 내지
//! 않으며, 같은 입력은 항상 같은 스냅샷과 신호(같은 신호 ID 포함)를 만듭니다.
//!
//! ```bash
//! trader replay -c config/default.toml -i data/btc_ticks.csv -o signals.jsonl
//! ```

use anyhow::{Context, Result};
use std::io::Write;
use tracing::{debug, info};
use trader_analytics::IndicatorEngine;
use trader_core::{AppConfig, IndicatorSnapshot, Signal, Tick};
use trader_strategy::{SignalGenerator, SignalOutcome};

/// 리플레이 결과.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// 처리한 틱 수
    pub ticks: usize,
    /// 생성된 스냅샷
    pub snapshots: Vec<IndicatorSnapshot>,
    /// 발행된 신호
    pub signals: Vec<Signal>,
    /// 신호 없이 끝난 스냅샷 수
    pub no_trade: usize,
}

/// 틱 시퀀스를 재생합니다.
pub fn replay_ticks(config: &AppConfig, ticks: &[Tick]) -> ReplayReport {
    let mut engine = IndicatorEngine::new(config.indicators.clone());
    let mut generator = SignalGenerator::new(config.signal.clone());
    let mut report = ReplayReport {
        ticks: ticks.len(),
        ..Default::default()
    };

    for snapshot in engine.replay(ticks) {
        match generator.generate(&snapshot, None) {
            SignalOutcome::Issued(signal) => report.signals.push(signal),
            SignalOutcome::NoTrade(reason) => {
                debug!(
                    instrument = %snapshot.instrument,
                    timeframe = %snapshot.timeframe,
                    reason = ?reason,
                    "신호 없음"
                );
                report.no_trade += 1;
            }
            SignalOutcome::Duplicate => {}
        }
        report.snapshots.push(snapshot);
    }

    info!(
        ticks = report.ticks,
        snapshots = report.snapshots.len(),
        signals = report.signals.len(),
        "리플레이 완료"
    );
    report
}

/// 신호를 한 줄에 하나씩 JSON으로 씁니다.
pub fn write_signals<W: Write>(signals: &[Signal], mut writer: W) -> Result<()> {
    for signal in signals {
        serde_json::to_writer(&mut writer, signal).context("신호 직렬화 실패")?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ticks::test_support::wave;

    fn config() -> AppConfig {
        AppConfig::from_toml_str("[signal]\ntimeframe_policy = \"independent\"\n").unwrap()
    }

    #[test]
    fn test_replay_is_deterministic() {
        let ticks = wave("X", 600);
        let first = replay_ticks(&config(), &ticks);
        let second = replay_ticks(&config(), &ticks);

        assert_eq!(first.ticks, 600);
        assert!(!first.snapshots.is_empty());
        assert_eq!(first.snapshots, second.snapshots);
        assert_eq!(
            first.signals.iter().map(|s| s.id).collect::<Vec<_>>(),
            second.signals.iter().map(|s| s.id).collect::<Vec<_>>()
        );
        assert_eq!(
            first.signals.len() + first.no_trade,
            first.snapshots.len()
        );
    }

    #[test]
    fn test_signals_written_as_json_lines() {
        let ticks = wave("X", 600);
        let report = replay_ticks(&config(), &ticks);

        let mut out = Vec::new();
        write_signals(&report.signals, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), report.signals.len());
        for line in text.lines() {
            let signal: Signal = serde_json::from_str(line).unwrap();
            assert_eq!(signal.instrument, "X");
        }
    }
}
