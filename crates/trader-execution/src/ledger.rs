//! 사용자별 계좌/포지션 원장.
//!
//! 사용자마다 독립된 `UserLedger`를 두고 각자의 잠금으로 보호합니다.
//! 한 사용자의 원장 작업은 다른 사용자의 원장을 읽거나 쓰지 않습니다.
//!
//! 브로커가 보고한 상태와 원장이 다르면 브로커 쪽을 따릅니다.
//! 다만 제출 중인 주문이 있는 포지션 키는 체결 커밋과 겹치지 않도록
//! 정합성 검사에서 건너뜁니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use trader_core::{
    AccountState, BrokerAccountId, Order, Percentage, Position, PositionKey, Price, Quantity,
    RiskViolation, Side, UserId,
};
use trader_risk::{ExposureBudget, RiskContext};
use uuid::Uuid;

/// 불일치 해소 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// 원장에 없던 브로커 포지션을 채택
    Adopted,
    /// 브로커에 없는 원장 포지션을 종료
    Closed,
    /// 수량이 달라 브로커 값으로 덮어씀
    Overwritten,
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceKind::Adopted => write!(f, "adopted"),
            DivergenceKind::Closed => write!(f, "closed"),
            DivergenceKind::Overwritten => write!(f, "overwritten"),
        }
    }
}

/// 원장과 브로커 상태의 불일치 한 건.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    /// 해소 방식
    pub kind: DivergenceKind,
    /// 원장 순수량
    pub local_size: Quantity,
    /// 브로커 순수량
    pub broker_size: Quantity,
    /// 해소 후 포지션
    pub position: Position,
}

impl Divergence {
    /// 포지션 키.
    pub fn key(&self) -> PositionKey {
        self.position.key()
    }
}

#[derive(Debug, Clone, Default)]
struct AccountHealth {
    equity: Option<Decimal>,
    failures: u32,
    degraded: bool,
    last_reconciled_at: Option<DateTime<Utc>>,
}

/// 한 사용자의 원장.
#[derive(Debug)]
pub struct UserLedger {
    user_id: UserId,
    positions: HashMap<PositionKey, Position>,
    budget: ExposureBudget,
    accounts: HashMap<BrokerAccountId, AccountHealth>,
}

impl UserLedger {
    /// 빈 원장을 생성합니다.
    pub fn new(user_id: UserId, exposure_ceiling: Percentage) -> Self {
        Self {
            user_id,
            positions: HashMap::new(),
            budget: ExposureBudget::new(exposure_ceiling),
            accounts: HashMap::new(),
        }
    }

    /// 소유 사용자.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 열린 포지션 조회.
    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key).filter(|p| p.is_open())
    }

    /// 열린 포지션 목록 (계좌, 종목 순).
    pub fn open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.key().cmp(&b.key()));
        positions
    }

    /// 열린 포지션 수.
    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    /// 사용 중인 포지션 슬롯 수.
    ///
    /// 열린 포지션에 더해, 아직 포지션이 없는 키에 예약을 잡아 둔 제출 중
    /// 주문도 슬롯 하나를 차지합니다.
    pub fn position_slots(&self) -> usize {
        let pending = self
            .budget
            .reserved_keys()
            .into_iter()
            .filter(|key| self.position(key).is_none())
            .count();
        self.open_count() + pending
    }

    /// 주문의 리스크를 예약합니다.
    ///
    /// 평가 이후 다른 레인이 슬롯을 잡았을 수 있으므로 동시 포지션 한도를
    /// 같은 잠금 안에서 다시 확인합니다. 이미 쓰고 있는 키는 새 슬롯이 아닙니다.
    pub fn reserve(&mut self, order: &Order, max_positions: usize) -> Result<(), RiskViolation> {
        let key = order.position_key();
        let new_slot = self.position(&key).is_none() && !self.budget.is_reserved(&key);
        let used = self.position_slots();
        if new_slot && used >= max_positions {
            return Err(RiskViolation::MaxPositions {
                open: used,
                limit: max_positions,
            });
        }
        self.budget.reserve(order.id, key, order.risk_pct)
    }

    /// 노출 예산.
    pub fn budget(&self) -> &ExposureBudget {
        &self.budget
    }

    /// 노출 예산 (수정용).
    pub fn budget_mut(&mut self) -> &mut ExposureBudget {
        &mut self.budget
    }

    /// 마지막으로 확인된 계좌 평가 자본.
    pub fn equity(&self, account_id: BrokerAccountId) -> Option<Decimal> {
        self.accounts.get(&account_id).and_then(|a| a.equity)
    }

    /// 계좌 평가 자본을 설정합니다.
    pub fn set_equity(&mut self, account_id: BrokerAccountId, equity: Decimal) {
        self.accounts.entry(account_id).or_default().equity = Some(equity);
    }

    /// 계좌가 degraded 상태인지 확인합니다.
    pub fn is_degraded(&self, account_id: BrokerAccountId) -> bool {
        self.accounts.get(&account_id).is_some_and(|a| a.degraded)
    }

    /// 마지막 정합성 검사 성공 시각.
    pub fn last_reconciled_at(&self, account_id: BrokerAccountId) -> Option<DateTime<Utc>> {
        self.accounts
            .get(&account_id)
            .and_then(|a| a.last_reconciled_at)
    }

    /// 리스크 평가에 쓰는 현재 상황.
    pub fn risk_context(&self, key: &PositionKey) -> RiskContext {
        RiskContext {
            equity: self.equity(key.account_id).unwrap_or(Decimal::ZERO),
            open_positions: self.position_slots(),
            exposure_pct: self.budget.exposure_pct(),
            has_position: self.position(key).is_some() || self.budget.is_reserved(key),
            account_degraded: self.is_degraded(key.account_id),
        }
    }

    /// 저장소에서 읽은 포지션으로 원장을 복원합니다.
    pub fn restore(&mut self, positions: impl IntoIterator<Item = Position>) {
        for position in positions.into_iter().filter(Position::is_open) {
            let key = position.key();
            self.budget.set_position(key.clone(), position.risk_pct);
            self.positions.insert(key, position);
        }
    }

    /// 체결을 반영한 포지션을 계산합니다. 원장은 바꾸지 않습니다.
    pub fn preview_fill(
        &self,
        order: &Order,
        price: Price,
        protective_order_ids: &[String],
    ) -> Position {
        let mut position = match self.position(&order.position_key()) {
            Some(existing) => {
                let mut position = existing.clone();
                position.apply_fill(order.side, order.size, price);
                position.risk_pct += order.risk_pct;
                position
            }
            None => {
                let mut position = Position::open(
                    order.user_id,
                    order.broker_account_id,
                    order.instrument.clone(),
                    order.side,
                    order.size,
                    price,
                );
                position.risk_pct = order.risk_pct;
                position
            }
        };
        if !protective_order_ids.is_empty() {
            position.protective_order_ids = protective_order_ids.to_vec();
        }
        if !position.is_open() {
            position.risk_pct = Decimal::ZERO;
            position.protective_order_ids.clear();
        }
        position
    }

    /// 영속화가 끝난 체결을 원장에 반영합니다.
    pub fn install_fill(&mut self, order_id: Uuid, position: Position) {
        let key = position.key();
        if position.is_open() {
            self.budget.commit(order_id);
            self.positions.insert(key, position);
        } else {
            self.budget.release(order_id);
            self.budget.release_position(&key);
            self.positions.remove(&key);
            debug!(position = %key, "포지션 종료");
        }
    }

    /// 브로커 상태와 비교해 불일치 목록을 계산합니다. 원장은 바꾸지 않습니다.
    ///
    /// 수량만 비교합니다. 브로커가 보고하는 진입가는 평가 가격인 경우가 있어
    /// 차이가 나도 불일치로 보지 않습니다.
    pub fn plan_reconcile(&self, account_id: BrokerAccountId, state: &AccountState) -> Vec<Divergence> {
        let mut divergences = Vec::new();

        for reported in state.positions.iter().filter(|p| !p.net_size.is_zero()) {
            let key = PositionKey::new(account_id, reported.instrument.clone());
            if self.budget.is_reserved(&key) {
                debug!(position = %key, "제출 중인 주문이 있어 정합성 검사 건너뜀");
                continue;
            }
            match self.position(&key) {
                None => {
                    let side = if reported.net_size.is_sign_positive() {
                        Side::Buy
                    } else {
                        Side::Sell
                    };
                    let position = Position::open(
                        self.user_id,
                        account_id,
                        reported.instrument.clone(),
                        side,
                        reported.net_size.abs(),
                        reported.entry_price,
                    );
                    divergences.push(Divergence {
                        kind: DivergenceKind::Adopted,
                        local_size: Decimal::ZERO,
                        broker_size: reported.net_size,
                        position,
                    });
                }
                Some(local) if local.net_size != reported.net_size => {
                    let mut position = local.clone();
                    position.overwrite(reported.net_size, reported.entry_price);
                    divergences.push(Divergence {
                        kind: DivergenceKind::Overwritten,
                        local_size: local.net_size,
                        broker_size: reported.net_size,
                        position,
                    });
                }
                Some(_) => {}
            }
        }

        for local in self
            .positions
            .values()
            .filter(|p| p.is_open() && p.broker_account_id == account_id)
        {
            let reported = state
                .position(&local.instrument)
                .map(|p| p.net_size)
                .unwrap_or(Decimal::ZERO);
            if !reported.is_zero() || self.budget.is_reserved(&local.key()) {
                continue;
            }
            let mut position = local.clone();
            position.overwrite(Decimal::ZERO, local.entry_price);
            position.risk_pct = Decimal::ZERO;
            divergences.push(Divergence {
                kind: DivergenceKind::Closed,
                local_size: local.net_size,
                broker_size: Decimal::ZERO,
                position,
            });
        }

        divergences.sort_by(|a, b| a.position.instrument.cmp(&b.position.instrument));
        divergences
    }

    /// 영속화가 끝난 정합성 결과를 원장에 반영합니다.
    pub fn apply_reconcile(
        &mut self,
        account_id: BrokerAccountId,
        state: &AccountState,
        divergences: &[Divergence],
        now: DateTime<Utc>,
    ) {
        for divergence in divergences {
            let key = divergence.key();
            if divergence.position.is_open() {
                if divergence.kind == DivergenceKind::Adopted {
                    self.budget.set_position(key.clone(), divergence.position.risk_pct);
                }
                self.positions.insert(key, divergence.position.clone());
            } else {
                self.budget.release_position(&key);
                self.positions.remove(&key);
            }
        }
        let health = self.accounts.entry(account_id).or_default();
        health.equity = Some(state.equity);
        health.failures = 0;
        health.last_reconciled_at = Some(now);
    }

    /// 정합성 검사 실패를 기록합니다. 이번 실패로 degraded가 되면 `true`.
    pub fn record_failure(&mut self, account_id: BrokerAccountId, max_failures: u32) -> bool {
        let health = self.accounts.entry(account_id).or_default();
        health.failures += 1;
        if health.failures >= max_failures && !health.degraded {
            health.degraded = true;
            warn!(
                account_id = %account_id,
                failures = health.failures,
                "정합성 검사 연속 실패, 계좌 degraded 전환"
            );
            return true;
        }
        false
    }

    /// 실패 횟수와 관계없이 계좌를 degraded로 전환합니다.
    ///
    /// 새로 전환된 경우에만 `true`를 반환합니다.
    pub fn mark_degraded(&mut self, account_id: BrokerAccountId) -> bool {
        let health = self.accounts.entry(account_id).or_default();
        !std::mem::replace(&mut health.degraded, true)
    }

    /// degraded 상태를 해제합니다.
    pub fn clear_degraded(&mut self, account_id: BrokerAccountId) {
        let health = self.accounts.entry(account_id).or_default();
        health.degraded = false;
        health.failures = 0;
    }

    /// 종목의 평가 가격을 갱신합니다.
    pub fn mark(&mut self, instrument: &str, price: Price) {
        for position in self
            .positions
            .values_mut()
            .filter(|p| p.instrument == instrument)
        {
            position.mark(price);
        }
    }
}

/// 전체 사용자 원장.
#[derive(Debug)]
pub struct Ledger {
    exposure_ceiling: Percentage,
    users: RwLock<HashMap<UserId, Arc<Mutex<UserLedger>>>>,
}

impl Ledger {
    /// 노출 한도를 지정해 생성합니다.
    pub fn new(exposure_ceiling: Percentage) -> Self {
        Self {
            exposure_ceiling,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// 사용자 원장. 없으면 생성합니다.
    pub async fn user(&self, user_id: UserId) -> Arc<Mutex<UserLedger>> {
        if let Some(ledger) = self.users.read().await.get(&user_id) {
            return ledger.clone();
        }
        self.users
            .write()
            .await
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(UserLedger::new(user_id, self.exposure_ceiling))))
            .clone()
    }

    /// 사용자의 열린 포지션.
    pub async fn positions(&self, user_id: UserId) -> Vec<Position> {
        self.user(user_id).await.lock().await.open_positions()
    }

    /// 사용자의 현재 노출 (예약 포함, %).
    pub async fn exposure_pct(&self, user_id: UserId) -> Percentage {
        self.user(user_id).await.lock().await.budget().exposure_pct()
    }

    /// 원장이 있는 사용자 목록.
    pub async fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.read().await.keys().copied().collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::BrokerPosition;

    fn order(account: BrokerAccountId, side: Side, size: Decimal) -> Order {
        Order::new(UserId(1), account, "X", side, size, dec!(100)).with_risk_pct(dec!(1))
    }

    fn state(positions: Vec<(&str, Decimal)>) -> AccountState {
        AccountState {
            balance: dec!(10000),
            equity: dec!(10000),
            positions: positions
                .into_iter()
                .map(|(instrument, net_size)| BrokerPosition {
                    instrument: instrument.to_string(),
                    net_size,
                    entry_price: dec!(100),
                })
                .collect(),
        }
    }

    #[test]
    fn test_pending_reservations_take_position_slots() {
        let account = BrokerAccountId::new();
        let mut ledger = UserLedger::new(UserId(1), dec!(6));
        let first = Order::new(UserId(1), account, "A", Side::Buy, dec!(1), dec!(100))
            .with_risk_pct(dec!(1));
        let second = Order::new(UserId(1), account, "B", Side::Buy, dec!(1), dec!(100))
            .with_risk_pct(dec!(1));
        let third = Order::new(UserId(1), account, "C", Side::Buy, dec!(1), dec!(100))
            .with_risk_pct(dec!(1));

        ledger.reserve(&first, 2).unwrap();
        ledger.reserve(&second, 2).unwrap();
        assert_eq!(ledger.open_count(), 0);
        assert_eq!(ledger.position_slots(), 2);
        assert_eq!(
            ledger.risk_context(&third.position_key()).open_positions,
            2
        );

        assert_eq!(
            ledger.reserve(&third, 2),
            Err(RiskViolation::MaxPositions { open: 2, limit: 2 })
        );
        // 재예약과 같은 키 추가 주문은 새 슬롯이 아님
        ledger.reserve(&first, 2).unwrap();
        let more_a = Order::new(UserId(1), account, "A", Side::Buy, dec!(1), dec!(100))
            .with_risk_pct(dec!(1));
        ledger.reserve(&more_a, 2).unwrap();
        assert_eq!(ledger.position_slots(), 2);

        ledger.budget_mut().release(second.id);
        ledger.reserve(&third, 2).unwrap();
        assert_eq!(ledger.position_slots(), 2);
    }

    #[test]
    fn test_fill_lifecycle_moves_budget() {
        let account = BrokerAccountId::new();
        let mut ledger = UserLedger::new(UserId(1), dec!(6));
        let open = order(account, Side::Buy, dec!(2));
        ledger
            .budget_mut()
            .reserve(open.id, open.position_key(), dec!(1))
            .unwrap();

        let position = ledger.preview_fill(&open, dec!(100), &["SL".to_string()]);
        // 미리보기는 원장을 바꾸지 않음
        assert!(ledger.position(&open.position_key()).is_none());
        ledger.install_fill(open.id, position);

        let held = ledger.position(&open.position_key()).unwrap();
        assert_eq!(held.net_size, dec!(2));
        assert_eq!(held.risk_pct, dec!(1));
        assert_eq!(ledger.budget().committed_pct(), dec!(1));
        assert_eq!(ledger.budget().reserved_pct(), dec!(0));

        let close = Order::new(UserId(1), account, "X", Side::Sell, dec!(2), dec!(110));
        let closed = ledger.preview_fill(&close, dec!(110), &[]);
        assert!(!closed.is_open());
        assert_eq!(closed.realized_pnl, dec!(20));
        ledger.install_fill(close.id, closed);
        assert_eq!(ledger.open_count(), 0);
        assert_eq!(ledger.budget().exposure_pct(), dec!(0));
    }

    #[test]
    fn test_reconcile_follows_broker() {
        let account = BrokerAccountId::new();
        let mut ledger = UserLedger::new(UserId(1), dec!(6));
        for (instrument, size) in [("X", dec!(1)), ("Y", dec!(2))] {
            let mut position =
                Position::open(UserId(1), account, instrument, Side::Buy, size, dec!(100));
            position.risk_pct = dec!(1);
            ledger.restore([position]);
        }

        // X 수량 불일치, Y 브로커에 없음, Z 원장에 없음
        let reported = state(vec![("X", dec!(3)), ("Z", dec!(-1))]);
        let divergences = ledger.plan_reconcile(account, &reported);
        let kinds: Vec<_> = divergences
            .iter()
            .map(|d| (d.position.instrument.as_str(), d.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("X", DivergenceKind::Overwritten),
                ("Y", DivergenceKind::Closed),
                ("Z", DivergenceKind::Adopted),
            ]
        );

        ledger.apply_reconcile(account, &reported, &divergences, Utc::now());
        let sizes: Vec<_> = ledger
            .open_positions()
            .iter()
            .map(|p| (p.instrument.clone(), p.net_size))
            .collect();
        assert_eq!(
            sizes,
            vec![("X".to_string(), dec!(3)), ("Z".to_string(), dec!(-1))]
        );
        // Y 점유분 해제
        assert_eq!(ledger.budget().committed_pct(), dec!(1));
        assert_eq!(ledger.equity(account), Some(dec!(10000)));

        // 다시 검사하면 불일치 없음
        assert!(ledger.plan_reconcile(account, &reported).is_empty());
    }

    #[test]
    fn test_reconcile_skips_in_flight_keys() {
        let account = BrokerAccountId::new();
        let mut ledger = UserLedger::new(UserId(1), dec!(6));
        let pending = order(account, Side::Buy, dec!(1));
        ledger
            .budget_mut()
            .reserve(pending.id, pending.position_key(), dec!(1))
            .unwrap();

        let reported = state(vec![("X", dec!(1))]);
        assert!(ledger.plan_reconcile(account, &reported).is_empty());
    }

    #[test]
    fn test_degraded_after_repeated_failures() {
        let account = BrokerAccountId::new();
        let mut ledger = UserLedger::new(UserId(1), dec!(6));
        assert!(!ledger.record_failure(account, 3));
        assert!(!ledger.record_failure(account, 3));
        assert!(ledger.record_failure(account, 3));
        assert!(!ledger.record_failure(account, 3));
        assert!(ledger.is_degraded(account));
        assert!(ledger.risk_context(&PositionKey::new(account, "X")).account_degraded);

        // 자동 검사 성공만으로는 해제되지 않음
        ledger.apply_reconcile(account, &state(vec![]), &[], Utc::now());
        assert!(ledger.is_degraded(account));
        ledger.clear_degraded(account);
        assert!(!ledger.is_degraded(account));

        assert!(ledger.mark_degraded(account));
        assert!(!ledger.mark_degraded(account));
        assert!(ledger.is_degraded(account));
    }

    #[tokio::test]
    async fn test_ledgers_are_per_user() {
        let ledger = Ledger::new(dec!(6));
        let account = BrokerAccountId::new();
        {
            let user = ledger.user(UserId(1)).await;
            let mut guard = user.lock().await;
            guard.restore([Position::open(UserId(1), account, "X", Side::Buy, dec!(1), dec!(100))]);
        }
        assert_eq!(ledger.positions(UserId(1)).await.len(), 1);
        assert!(ledger.positions(UserId(2)).await.is_empty());
        assert_eq!(ledger.users().await, vec![UserId(1), UserId(2)]);
    }
}
