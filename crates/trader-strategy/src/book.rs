//! 사용자별 신호 북.
//!
//! (종목, 타임프레임)마다 활성 신호는 최대 하나입니다. 교체는 도착 순서가
//! 아니라 신호의 `generated_at`(봉 시각)으로 판정하므로, 늦게 도착한 오래된
//! 신호가 새 신호를 밀어내는 일은 없습니다.

use crate::timeframes::{resolve, Actionability};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;
use trader_core::{Signal, Timeframe, TimeframeConflictPolicy};
use uuid::Uuid;

/// `offer` 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferOutcome {
    /// 활성 신호가 됨. 교체된 이전 신호 ID 포함.
    Active {
        /// 교체된 신호
        superseded: Option<Uuid>,
    },
    /// 같은 키에 더 새로운 신호가 이미 있었음
    Stale,
    /// 이미 받은 신호
    Duplicate,
}

/// `take` 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum TakeOutcome {
    /// 사용 가능 (소비 처리됨)
    Taken(Signal),
    /// 더 새로운 신호로 교체됨
    Superseded,
    /// 만료됨
    Expired,
    /// 이미 소비됨
    Consumed,
    /// 모르는 신호
    Unknown,
    /// 다른 타임프레임 신호와 충돌 (소비하지 않음)
    Conflict(String),
}

impl TakeOutcome {
    /// 사용할 수 없는 경우의 사유.
    pub fn reason(&self) -> Option<String> {
        match self {
            TakeOutcome::Taken(_) => None,
            TakeOutcome::Superseded => Some("신호가 새 신호로 대체됨".to_string()),
            TakeOutcome::Expired => Some("신호 만료".to_string()),
            TakeOutcome::Consumed => Some("이미 사용된 신호".to_string()),
            TakeOutcome::Unknown => Some("알 수 없는 신호".to_string()),
            TakeOutcome::Conflict(reason) => Some(reason.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Active,
    Superseded,
    Consumed,
}

#[derive(Debug, Clone)]
struct Entry {
    signal: Signal,
    status: EntryStatus,
}

type BookKey = (String, Timeframe);

/// 사용자별 신호 북.
#[derive(Debug, Default)]
pub struct SignalBook {
    entries: HashMap<Uuid, Entry>,
    active: HashMap<BookKey, Uuid>,
    newest: HashMap<BookKey, DateTime<Utc>>,
}

impl SignalBook {
    /// 빈 북을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 신호를 제안합니다.
    pub fn offer(&mut self, signal: Signal) -> OfferOutcome {
        if self.entries.contains_key(&signal.id) {
            return OfferOutcome::Duplicate;
        }

        let key = (signal.instrument.clone(), signal.timeframe);
        if let Some(newest) = self.newest.get(&key) {
            if signal.generated_at <= *newest {
                debug!(
                    signal_id = %signal.id,
                    instrument = %signal.instrument,
                    "오래된 신호 폐기"
                );
                return OfferOutcome::Stale;
            }
        }

        let superseded = self.active.insert(key.clone(), signal.id);
        if let Some(old) = superseded {
            if let Some(entry) = self.entries.get_mut(&old) {
                entry.status = EntryStatus::Superseded;
            }
        }
        self.newest.insert(key, signal.generated_at);
        self.entries.insert(
            signal.id,
            Entry {
                signal,
                status: EntryStatus::Active,
            },
        );
        OfferOutcome::Active { superseded }
    }

    /// 신호를 사용 처리합니다.
    pub fn take(&mut self, signal_id: Uuid, now: DateTime<Utc>) -> TakeOutcome {
        self.take_with_policy(signal_id, now, TimeframeConflictPolicy::Independent)
    }

    /// 소비하지 않고 사용 가능 여부만 확인합니다.
    ///
    /// 사용 가능하면 신호 사본을 담은 `Taken`을 반환합니다.
    pub fn inspect(
        &self,
        signal_id: Uuid,
        now: DateTime<Utc>,
        policy: TimeframeConflictPolicy,
    ) -> TakeOutcome {
        let Some(entry) = self.entries.get(&signal_id) else {
            return TakeOutcome::Unknown;
        };
        match entry.status {
            EntryStatus::Superseded => return TakeOutcome::Superseded,
            EntryStatus::Consumed => return TakeOutcome::Consumed,
            EntryStatus::Active => {}
        }
        if entry.signal.is_expired(now) {
            return TakeOutcome::Expired;
        }
        match resolve(policy, &entry.signal, self.active_signals(now)) {
            Actionability::Conflict(reason) => TakeOutcome::Conflict(reason),
            Actionability::Actionable => TakeOutcome::Taken(entry.signal.clone()),
        }
    }

    /// 타임프레임 충돌 정책을 적용해 신호를 사용 처리합니다.
    ///
    /// 충돌이면 신호는 활성 상태로 남습니다.
    pub fn take_with_policy(
        &mut self,
        signal_id: Uuid,
        now: DateTime<Utc>,
        policy: TimeframeConflictPolicy,
    ) -> TakeOutcome {
        let outcome = self.inspect(signal_id, now, policy);
        if let TakeOutcome::Taken(signal) = &outcome {
            if let Some(entry) = self.entries.get_mut(&signal_id) {
                entry.status = EntryStatus::Consumed;
            }
            self.active
                .remove(&(signal.instrument.clone(), signal.timeframe));
        }
        outcome
    }

    /// 신호 조회 (상태 무관).
    pub fn get(&self, signal_id: Uuid) -> Option<&Signal> {
        self.entries.get(&signal_id).map(|e| &e.signal)
    }

    /// 만료되지 않은 활성 신호.
    pub fn active_signals(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Signal> {
        self.active
            .values()
            .filter_map(|id| self.entries.get(id))
            .map(|e| &e.signal)
            .filter(move |s| !s.is_expired(now))
    }

    /// 종목의 활성 신호.
    pub fn active_for(&self, instrument: &str, now: DateTime<Utc>) -> Vec<&Signal> {
        self.active_signals(now)
            .filter(|s| s.instrument == instrument)
            .collect()
    }

    /// 만료된 항목을 제거하고 제거된 수를 반환합니다.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.signal.is_expired(now));
        let entries = &self.entries;
        self.active.retain(|_, id| entries.contains_key(id));
        before - self.entries.len()
    }

    /// 보관 중인 항목 수.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, signal};
    use chrono::TimeDelta;
    use trader_core::Direction;

    #[test]
    fn test_newer_signal_supersedes_regardless_of_arrival_order() {
        let older = signal("X", Timeframe::M5, Direction::Long, 0);
        let newer = signal("X", Timeframe::M5, Direction::Short, 5);

        // 순서대로 도착
        let mut book = SignalBook::new();
        assert_eq!(book.offer(older.clone()), OfferOutcome::Active { superseded: None });
        assert_eq!(
            book.offer(newer.clone()),
            OfferOutcome::Active {
                superseded: Some(older.id)
            }
        );

        // 역순 도착
        let mut reversed = SignalBook::new();
        reversed.offer(newer.clone());
        assert_eq!(reversed.offer(older.clone()), OfferOutcome::Stale);

        for b in [&mut book, &mut reversed] {
            let now = at(6);
            let active: Vec<_> = b.active_signals(now).map(|s| s.id).collect();
            assert_eq!(active, vec![newer.id]);
        }
        assert_eq!(book.take(older.id, at(6)), TakeOutcome::Superseded);
        assert_eq!(reversed.take(older.id, at(6)), TakeOutcome::Unknown);
    }

    #[test]
    fn test_take_once() {
        let s = signal("X", Timeframe::M5, Direction::Long, 0);
        let mut book = SignalBook::new();
        book.offer(s.clone());
        assert_eq!(book.offer(s.clone()), OfferOutcome::Duplicate);

        assert!(matches!(book.take(s.id, at(1)), TakeOutcome::Taken(_)));
        assert_eq!(book.take(s.id, at(1)), TakeOutcome::Consumed);
        assert_eq!(book.take(Uuid::new_v4(), at(1)), TakeOutcome::Unknown);
    }

    #[test]
    fn test_expired_signal_cannot_be_taken() {
        let s = signal("X", Timeframe::M5, Direction::Long, 0);
        let mut book = SignalBook::new();
        book.offer(s.clone());
        let after = s.expires_at + TimeDelta::seconds(1);
        assert_eq!(book.take(s.id, after), TakeOutcome::Expired);
        assert_eq!(book.prune(after), 1);
        assert!(book.is_empty());
        assert_eq!(book.active_signals(after).count(), 0);
    }

    #[test]
    fn test_conflict_keeps_signal_active() {
        let m5 = signal("X", Timeframe::M5, Direction::Long, 0);
        let h1 = signal("X", Timeframe::H1, Direction::Short, 0);
        let mut book = SignalBook::new();
        book.offer(m5.clone());
        book.offer(h1.clone());

        let outcome =
            book.take_with_policy(m5.id, at(1), TimeframeConflictPolicy::HigherTimeframeWins);
        assert!(matches!(outcome, TakeOutcome::Conflict(_)));
        assert_eq!(book.active_for("X", at(1)).len(), 2);

        // 확인만으로는 소비되지 않음
        let policy = TimeframeConflictPolicy::Independent;
        assert!(matches!(book.inspect(m5.id, at(1), policy), TakeOutcome::Taken(_)));
        assert!(matches!(book.inspect(m5.id, at(1), policy), TakeOutcome::Taken(_)));

        // 상위 신호는 하위 신호에 막히지 않음
        let outcome =
            book.take_with_policy(h1.id, at(1), TimeframeConflictPolicy::HigherTimeframeWins);
        assert!(matches!(outcome, TakeOutcome::Taken(_)));
    }
}
