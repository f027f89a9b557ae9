//! 틱 → 봉 집계와 롤링 윈도우.

use std::collections::VecDeque;
use trader_core::{Bar, Tick, Timeframe};

/// (종목, 타임프레임) 단위 봉 집계기.
///
/// 다음 경계 이후의 틱이 들어오면 진행 중인 봉을 마감합니다. 틱이 없던
/// 구간에 대해 빈 봉을 만들지 않습니다.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    timeframe: Timeframe,
    current: Option<Bar>,
}

impl BarAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// 진행 중인 봉.
    pub fn current(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    /// 틱을 반영하고, 마감된 봉이 있으면 반환합니다.
    ///
    /// 진행 중인 봉보다 오래된 틱은 무시합니다.
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Bar> {
        let Some(bar) = self.current.as_mut() else {
            self.current = Some(Bar::open_with(tick, self.timeframe));
            return None;
        };
        if tick.timestamp < bar.open_time {
            return None;
        }
        if bar.contains(tick.timestamp) {
            bar.update(tick);
            return None;
        }
        self.current.replace(Bar::open_with(tick, self.timeframe))
    }
}

/// 최근 봉을 고정 개수만큼 보관하는 윈도우.
#[derive(Debug, Clone)]
pub struct BarWindow {
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl BarWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    /// 봉을 추가합니다. 용량을 넘으면 가장 오래된 봉을 버립니다.
    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// 가장 최근 봉.
    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// 오래된 순서의 봉 복사본.
    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }
}
