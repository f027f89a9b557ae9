//! CSV 틱 파일 로더.
//!
//! 헤더: `timestamp,instrument,bid,ask,volume`. 시각은 RFC 3339입니다.
//!
//! ```text
//! timestamp,instrument,bid,ask,volume
//! 2024-01-01T00:00:00Z,BTCUSDT,42000.1,42000.3,1.5
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use trader_core::Tick;

#[derive(Debug, Deserialize)]
struct TickRecord {
    timestamp: DateTime<Utc>,
    instrument: String,
    #[serde(with = "rust_decimal::serde::str")]
    bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ask: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    volume: Decimal,
}

/// 리더에서 틱을 읽습니다. 결과는 시각 순으로 정렬됩니다 (같은 시각은 파일 순서 유지).
pub fn read_ticks<R: Read>(reader: R) -> Result<Vec<Tick>> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut ticks = Vec::new();
    for (index, record) in csv.deserialize::<TickRecord>().enumerate() {
        // 헤더가 1행
        let line = index + 2;
        let record = record.with_context(|| format!("{}행을 읽을 수 없습니다", line))?;
        if record.bid <= Decimal::ZERO || record.ask < record.bid {
            bail!(
                "{}행: 잘못된 호가 (bid {}, ask {})",
                line,
                record.bid,
                record.ask
            );
        }
        ticks.push(Tick::new(
            record.instrument,
            record.timestamp,
            record.bid,
            record.ask,
            record.volume,
        ));
    }
    ticks.sort_by_key(|t| t.timestamp);
    Ok(ticks)
}

/// 파일에서 틱을 읽습니다.
pub fn load_ticks(path: impl AsRef<Path>) -> Result<Vec<Tick>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("틱 파일을 열 수 없습니다: {}", path.display()))?;
    read_ticks(file)
}

/// 틱에 등장하는 종목 (정렬, 중복 제거).
pub fn instruments(ticks: &[Tick]) -> Vec<String> {
    let mut instruments: Vec<String> = ticks.iter().map(|t| t.instrument.clone()).collect();
    instruments.sort();
    instruments.dedup();
    instruments
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeDelta, Utc};
    use rust_decimal::Decimal;
    use trader_core::Tick;

    /// 분당 한 틱씩, 완만한 상승 뒤 하락하는 시세.
    pub fn wave(instrument: &str, minutes: i64) -> Vec<Tick> {
        let start = DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default();
        (0..minutes)
            .map(|i| {
                let phase = (i % 240) as f64 / 240.0 * std::f64::consts::TAU;
                let price = 100.0 + 10.0 * phase.sin() + (i % 7) as f64 * 0.1;
                let bid = Decimal::from_f64_retain(price)
                    .unwrap_or(Decimal::ONE_HUNDRED)
                    .round_dp(2);
                Tick::new(
                    instrument,
                    start + TimeDelta::minutes(i),
                    bid,
                    bid + Decimal::new(2, 2),
                    Decimal::ONE,
                )
            })
            .collect()
    }
}
