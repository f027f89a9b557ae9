//! 타임프레임 간 신호 충돌 판정.

use trader_core::{Signal, TimeframeConflictPolicy};

/// 후보 신호의 실행 가능 여부.
#[derive(Debug, Clone, PartialEq)]
pub enum Actionability {
    /// 실행 가능
    Actionable,
    /// 다른 타임프레임의 활성 신호와 충돌
    Conflict(String),
}

impl Actionability {
    /// 실행 가능한지 확인합니다.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Actionability::Actionable)
    }
}

/// 같은 종목의 다른 활성 신호들과 비교해 후보의 실행 가능 여부를 판정합니다.
///
/// `active`에 후보 자신이나 다른 종목 신호가 섞여 있어도 무시합니다.
pub fn resolve<'a, I>(policy: TimeframeConflictPolicy, candidate: &Signal, active: I) -> Actionability
where
    I: IntoIterator<Item = &'a Signal>,
{
    if policy == TimeframeConflictPolicy::Independent {
        return Actionability::Actionable;
    }

    let conflicting = active.into_iter().find(|other| {
        other.id != candidate.id
            && other.instrument == candidate.instrument
            && other.timeframe != candidate.timeframe
            && other.direction != candidate.direction
            && match policy {
                TimeframeConflictPolicy::RequireAgreement => true,
                TimeframeConflictPolicy::HigherTimeframeWins => {
                    other.timeframe > candidate.timeframe
                }
                TimeframeConflictPolicy::Independent => false,
            }
    });

    match conflicting {
        Some(other) => Actionability::Conflict(format!(
            "{} {} 신호가 {} {} 신호와 충돌",
            candidate.timeframe, candidate.direction, other.timeframe, other.direction
        )),
        None => Actionability::Actionable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::signal;
    use trader_core::{Direction, Timeframe};

    #[test]
    fn test_policies() {
        let m5_long = signal("X", Timeframe::M5, Direction::Long, 0);
        let h1_short = signal("X", Timeframe::H1, Direction::Short, 0);
        let m1_short = signal("X", Timeframe::M1, Direction::Short, 0);
        let other_instrument = signal("Y", Timeframe::H1, Direction::Short, 0);

        assert!(resolve(TimeframeConflictPolicy::Independent, &m5_long, [&h1_short]).is_actionable());
        assert!(!resolve(
            TimeframeConflictPolicy::RequireAgreement,
            &m5_long,
            [&h1_short]
        )
        .is_actionable());
        assert!(!resolve(
            TimeframeConflictPolicy::RequireAgreement,
            &m5_long,
            [&m1_short]
        )
        .is_actionable());

        // 상위 타임프레임만 하위를 막음
        assert!(!resolve(
            TimeframeConflictPolicy::HigherTimeframeWins,
            &m5_long,
            [&h1_short]
        )
        .is_actionable());
        assert!(resolve(
            TimeframeConflictPolicy::HigherTimeframeWins,
            &m5_long,
            [&m1_short]
        )
        .is_actionable());

        assert!(resolve(
            TimeframeConflictPolicy::RequireAgreement,
            &m5_long,
            [&other_instrument]
        )
        .is_actionable());
    }
}
