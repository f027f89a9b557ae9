//! 영속화 협력자 인터페이스.
//!
//! 코어는 자체 내구성을 구현하지 않습니다. 주문/포지션 상태 전이는
//! 저장소 쓰기가 성공해야 커밋된 것으로 간주합니다.
//! `InMemoryStore`는 테스트와 페이퍼 모드용 참조 구현입니다.

use crate::domain::{BrokerAccount, Order, Position, RiskPolicy, Signal};
use crate::error::{TraderError, TraderResult};
use crate::types::{BrokerAccountId, PositionKey, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 계좌, 주문, 신호, 리스크 정책, 포지션 CRUD.
#[async_trait]
pub trait TradingStore: Send + Sync {
    /// 계좌 저장 (upsert).
    async fn save_account(&self, account: &BrokerAccount) -> TraderResult<()>;

    /// 계좌 조회.
    async fn get_account(&self, id: BrokerAccountId) -> TraderResult<Option<BrokerAccount>>;

    /// 사용자 계좌 목록.
    async fn list_accounts(&self, user_id: UserId) -> TraderResult<Vec<BrokerAccount>>;

    /// 주문 저장 (upsert).
    async fn save_order(&self, order: &Order) -> TraderResult<()>;

    /// 주문 조회.
    async fn get_order(&self, id: Uuid) -> TraderResult<Option<Order>>;

    /// 최종 상태가 아닌 주문 목록. `user_id`가 없으면 전체.
    async fn list_active_orders(&self, user_id: Option<UserId>) -> TraderResult<Vec<Order>>;

    /// 신호 저장.
    async fn save_signal(&self, signal: &Signal) -> TraderResult<()>;

    /// 신호 조회.
    async fn get_signal(&self, id: Uuid) -> TraderResult<Option<Signal>>;

    /// 리스크 정책 조회.
    async fn get_risk_policy(&self, user_id: UserId) -> TraderResult<Option<RiskPolicy>>;

    /// 리스크 정책 저장.
    async fn save_risk_policy(&self, user_id: UserId, policy: &RiskPolicy) -> TraderResult<()>;

    /// 포지션 저장. 종료된 포지션은 보관함으로 이동합니다.
    async fn save_position(&self, position: &Position) -> TraderResult<()>;

    /// 사용자의 열린 포지션 목록.
    async fn list_positions(&self, user_id: UserId) -> TraderResult<Vec<Position>>;

    /// 체결된 주문과 갱신된 포지션을 하나의 단위로 저장합니다.
    ///
    /// 둘 중 하나만 반영되는 일은 없어야 합니다.
    async fn commit_fill(&self, order: &Order, position: &Position) -> TraderResult<()>;
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<BrokerAccountId, BrokerAccount>,
    orders: HashMap<Uuid, Order>,
    signals: HashMap<Uuid, Signal>,
    policies: HashMap<UserId, RiskPolicy>,
    positions: HashMap<(UserId, PositionKey), Position>,
    archived: Vec<Position>,
}

impl Tables {
    fn put_position(&mut self, position: &Position) {
        let key = (position.user_id, position.key());
        if position.is_open() {
            self.positions.insert(key, position.clone());
        } else {
            self.positions.remove(&key);
            self.archived.push(position.clone());
        }
    }
}

/// 메모리 저장소 (테스트/페이퍼 모드).
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicU32,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// 새 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `count`번의 쓰기를 실패시킵니다.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// 성공한 쓰기 횟수.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// 보관된(종료) 포지션 목록.
    pub async fn archived_positions(&self) -> Vec<Position> {
        self.tables.read().await.archived.clone()
    }

    fn check_write(&self) -> TraderResult<()> {
        let injected = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TraderError::Persistence("injected write failure".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TradingStore for InMemoryStore {
    async fn save_account(&self, account: &BrokerAccount) -> TraderResult<()> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: BrokerAccountId) -> TraderResult<Option<BrokerAccount>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self, user_id: UserId) -> TraderResult<Vec<BrokerAccount>> {
        Ok(self
            .tables
            .read()
            .await
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn save_order(&self, order: &Order) -> TraderResult<()> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.orders.get(&order.id) {
            if existing.state.is_final() && existing.state != order.state {
                return Err(TraderError::InvalidState(format!(
                    "주문 {}은 이미 {} 상태입니다",
                    order.id, existing.state
                )));
            }
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> TraderResult<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn list_active_orders(&self, user_id: Option<UserId>) -> TraderResult<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.state.is_active())
            .filter(|o| user_id.map_or(true, |u| o.user_id == u))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn save_signal(&self, signal: &Signal) -> TraderResult<()> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .signals
            .insert(signal.id, signal.clone());
        Ok(())
    }

    async fn get_signal(&self, id: Uuid) -> TraderResult<Option<Signal>> {
        Ok(self.tables.read().await.signals.get(&id).cloned())
    }

    async fn get_risk_policy(&self, user_id: UserId) -> TraderResult<Option<RiskPolicy>> {
        Ok(self.tables.read().await.policies.get(&user_id).cloned())
    }

    async fn save_risk_policy(&self, user_id: UserId, policy: &RiskPolicy) -> TraderResult<()> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .policies
            .insert(user_id, policy.clone());
        Ok(())
    }

    async fn save_position(&self, position: &Position) -> TraderResult<()> {
        self.check_write()?;
        self.tables.write().await.put_position(position);
        Ok(())
    }

    async fn list_positions(&self, user_id: UserId) -> TraderResult<Vec<Position>> {
        Ok(self
            .tables
            .read()
            .await
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn commit_fill(&self, order: &Order, position: &Position) -> TraderResult<()> {
        self.check_write()?;
        // 하나의 쓰기 락 안에서 둘 다 반영
        let mut tables = self.tables.write().await;
        tables.orders.insert(order.id, order.clone());
        tables.put_position(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderState, Side};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(UserId(1), BrokerAccountId::new(), "X", Side::Buy, dec!(1), dec!(10))
    }

    #[tokio::test]
    async fn test_active_orders_filter() {
        let store = InMemoryStore::new();
        let mut a = order();
        let b = order();
        a.transition(OrderState::Cancelled).unwrap();
        store.save_order(&a).await.unwrap();
        store.save_order(&b).await.unwrap();

        let active = store.list_active_orders(Some(UserId(1))).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn test_final_order_cannot_be_overwritten() {
        let store = InMemoryStore::new();
        let mut o = order();
        o.transition(OrderState::Cancelled).unwrap();
        store.save_order(&o).await.unwrap();

        let mut stale = o.clone();
        stale.state = OrderState::Pending;
        assert!(store.save_order(&stale).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryStore::new();
        store.fail_next_writes(1);
        assert!(store.save_order(&order()).await.is_err());
        assert!(store.save_order(&order()).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_fill_archives_closed_position() {
        let store = InMemoryStore::new();
        let mut o = order();
        o.transition(OrderState::Submitted).unwrap();
        o.mark_filled(dec!(10)).unwrap();

        let mut position =
            Position::open(o.user_id, o.broker_account_id, "X", Side::Buy, dec!(1), dec!(10));
        store.commit_fill(&o, &position).await.unwrap();
        assert_eq!(store.list_positions(UserId(1)).await.unwrap().len(), 1);

        position.apply_fill(Side::Sell, dec!(1), dec!(11));
        store.save_position(&position).await.unwrap();
        assert!(store.list_positions(UserId(1)).await.unwrap().is_empty());
        assert_eq!(store.archived_positions().await.len(), 1);
    }
}
