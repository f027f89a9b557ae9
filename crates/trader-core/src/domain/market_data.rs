//! 시장 데이터 타입.
//!
//! - `Tick` - 브로커 피드에서 정규화된 단일 호가
//! - `Bar` - 타임프레임 단위로 집계된 틱 구간

use crate::types::{Price, Quantity, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 정규화된 호가 틱.
///
/// 생성 후 변경되지 않으며, 종목별로 타임스탬프 순서를 가집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// 종목
    pub instrument: String,
    /// 호가 시각
    pub timestamp: DateTime<Utc>,
    /// 매수 호가
    pub bid: Price,
    /// 매도 호가
    pub ask: Price,
    /// 거래량 (브로커에 따라 최우선 호가 잔량)
    pub volume: Quantity,
}

impl Tick {
    /// 새 틱을 생성합니다.
    pub fn new(
        instrument: impl Into<String>,
        timestamp: DateTime<Utc>,
        bid: Price,
        ask: Price,
        volume: Quantity,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            bid,
            ask,
            volume,
        }
    }

    /// 중간 가격.
    pub fn mid(&self) -> Price {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// 스프레드.
    pub fn spread(&self) -> Price {
        self.ask - self.bid
    }
}

/// 틱을 타임프레임 단위로 집계한 봉.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// 종목
    pub instrument: String,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 봉 시작 시각 (epoch 정렬)
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: Quantity,
    /// 집계된 틱 수
    pub tick_count: u32,
}

impl Bar {
    /// 첫 틱으로 새 봉을 엽니다.
    pub fn open_with(tick: &Tick, timeframe: Timeframe) -> Self {
        let price = tick.mid();
        Self {
            instrument: tick.instrument.clone(),
            timeframe,
            open_time: timeframe.bar_open(tick.timestamp),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: tick.volume,
            tick_count: 1,
        }
    }

    /// 틱을 봉에 반영합니다.
    pub fn update(&mut self, tick: &Tick) {
        let price = tick.mid();
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += tick.volume;
        self.tick_count += 1;
    }

    /// 봉 종료 시각 (다음 봉의 시작).
    pub fn close_time(&self) -> DateTime<Utc> {
        self.open_time + self.timeframe.delta()
    }

    /// 해당 시각이 이 봉 구간에 속하는지 확인합니다.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.open_time && ts < self.close_time()
    }
}
