//! 사용자별 리스크 노출 예산.
//!
//! 제출 대기 중인 주문은 예약(`reserve`)으로, 체결된 주문은 포지션에 귀속된
//! 점유분(`commit`)으로 집계합니다. 예약 + 점유 합계는 한도를 넘지 않습니다.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use trader_core::{Percentage, PositionKey, RiskViolation};
use uuid::Uuid;

/// 노출 예산.
#[derive(Debug, Clone)]
pub struct ExposureBudget {
    ceiling: Percentage,
    reserved: HashMap<Uuid, (PositionKey, Percentage)>,
    committed: HashMap<PositionKey, Percentage>,
}

impl ExposureBudget {
    /// 한도를 지정해 생성합니다.
    pub fn new(ceiling: Percentage) -> Self {
        Self {
            ceiling,
            reserved: HashMap::new(),
            committed: HashMap::new(),
        }
    }

    /// 한도 (%).
    pub fn ceiling(&self) -> Percentage {
        self.ceiling
    }

    /// 예약 중인 합계 (%).
    pub fn reserved_pct(&self) -> Percentage {
        self.reserved.values().map(|(_, pct)| *pct).sum()
    }

    /// 포지션에 점유된 합계 (%).
    pub fn committed_pct(&self) -> Percentage {
        self.committed.values().copied().sum()
    }

    /// 예약 + 점유 (%).
    pub fn exposure_pct(&self) -> Percentage {
        self.reserved_pct() + self.committed_pct()
    }

    /// 포지션의 점유분.
    pub fn position_pct(&self, key: &PositionKey) -> Percentage {
        self.committed.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    /// 포지션 키에 대해 진행 중인 예약이 있는지 확인합니다.
    pub fn is_reserved(&self, key: &PositionKey) -> bool {
        self.reserved.values().any(|(k, _)| k == key)
    }

    /// 예약이 잡혀 있는 포지션 키.
    pub fn reserved_keys(&self) -> HashSet<&PositionKey> {
        self.reserved.values().map(|(key, _)| key).collect()
    }

    /// 주문에 대한 리스크를 예약합니다.
    ///
    /// 같은 주문 ID로 다시 호출하면 아무것도 바꾸지 않습니다.
    pub fn reserve(
        &mut self,
        order_id: Uuid,
        key: PositionKey,
        pct: Percentage,
    ) -> Result<(), RiskViolation> {
        if self.reserved.contains_key(&order_id) {
            return Ok(());
        }
        let current = self.exposure_pct();
        if current + pct > self.ceiling {
            return Err(RiskViolation::ExposureCeiling {
                current_pct: current,
                requested_pct: pct,
                ceiling_pct: self.ceiling,
            });
        }
        debug!(order_id = %order_id, position = %key, pct = %pct, "리스크 예약");
        self.reserved.insert(order_id, (key, pct));
        Ok(())
    }

    /// 체결된 주문의 예약을 포지션 점유분으로 옮깁니다.
    pub fn commit(&mut self, order_id: Uuid) -> Option<Percentage> {
        let (key, pct) = self.reserved.remove(&order_id)?;
        *self.committed.entry(key).or_insert(Decimal::ZERO) += pct;
        Some(pct)
    }

    /// 거부/취소된 주문의 예약을 해제합니다.
    pub fn release(&mut self, order_id: Uuid) -> Option<Percentage> {
        self.reserved.remove(&order_id).map(|(_, pct)| pct)
    }

    /// 종료된 포지션의 점유분을 해제합니다.
    pub fn release_position(&mut self, key: &PositionKey) -> Option<Percentage> {
        self.committed.remove(key)
    }

    /// 브로커에서 채택한 포지션처럼 주문 없이 점유분을 설정합니다.
    pub fn set_position(&mut self, key: PositionKey, pct: Percentage) {
        if pct.is_zero() {
            self.committed.remove(&key);
        } else {
            self.committed.insert(key, pct);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::BrokerAccountId;

    #[test]
    fn test_reserve_respects_ceiling() {
        let account = BrokerAccountId::new();
        let mut budget = ExposureBudget::new(dec!(3));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        budget.reserve(a, PositionKey::new(account, "X"), dec!(1)).unwrap();
        budget.reserve(b, PositionKey::new(account, "Y"), dec!(2)).unwrap();
        let err = budget
            .reserve(c, PositionKey::new(account, "Z"), dec!(0.5))
            .unwrap_err();
        assert_eq!(
            err,
            RiskViolation::ExposureCeiling {
                current_pct: dec!(3),
                requested_pct: dec!(0.5),
                ceiling_pct: dec!(3),
            }
        );

        // 재예약은 중복 집계되지 않음
        budget.reserve(a, PositionKey::new(account, "X"), dec!(1)).unwrap();
        assert_eq!(budget.exposure_pct(), dec!(3));
    }

    #[test]
    fn test_lifecycle() {
        let key = PositionKey::new(BrokerAccountId::new(), "X");
        let mut budget = ExposureBudget::new(dec!(6));
        let filled = Uuid::new_v4();
        let rejected = Uuid::new_v4();

        budget.reserve(filled, key.clone(), dec!(1)).unwrap();
        budget.reserve(rejected, key.clone(), dec!(1)).unwrap();
        assert_eq!(budget.reserved_pct(), dec!(2));
        assert!(budget.is_reserved(&key));
        assert_eq!(budget.reserved_keys().len(), 1);

        assert_eq!(budget.commit(filled), Some(dec!(1)));
        assert_eq!(budget.commit(filled), None);
        assert_eq!(budget.release(rejected), Some(dec!(1)));
        assert_eq!(budget.reserved_pct(), dec!(0));
        assert!(!budget.is_reserved(&key));
        assert_eq!(budget.position_pct(&key), dec!(1));

        assert_eq!(budget.release_position(&key), Some(dec!(1)));
        assert_eq!(budget.exposure_pct(), dec!(0));
    }
}
