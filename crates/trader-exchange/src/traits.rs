//! 브로커 게이트웨이 계약.
//!
//! 브로커마다 한 번 구현되며, 주문 실행 코디네이터와 시세 피드 어댑터가
//! 사용합니다. 모든 호출은 호출자가 제공한 주문 ID로 재시도에 안전합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use trader_core::{
    AccountState, BrokerCredentials, BrokerType, CancelAck, ConnectionState, Order, OrderAck,
    Tick,
};
use uuid::Uuid;

use crate::BrokerResult;

/// 정규화된 틱 스트림. 스트림 종료 또는 에러는 재연결 대상입니다.
pub type TickStream = BoxStream<'static, BrokerResult<Tick>>;

/// 연결 세션 정보.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionHandle {
    /// 브로커 유형
    pub broker_type: BrokerType,
    /// 세션 ID
    pub session_id: Uuid,
    /// 연결 시각
    pub connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// 새 세션 핸들을 생성합니다.
    pub fn new(broker_type: BrokerType) -> Self {
        Self {
            broker_type,
            session_id: Uuid::new_v4(),
            connected_at: Utc::now(),
        }
    }
}

/// 브로커 능력 집합.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// 브로커 이름.
    fn name(&self) -> &str;

    /// 현재 연결 상태.
    fn connection_state(&self) -> ConnectionState;

    /// 자격증명으로 연결합니다.
    async fn connect(&self, credentials: &BrokerCredentials) -> BrokerResult<ConnectionHandle>;

    /// 종목 시세를 구독합니다.
    async fn subscribe(&self, instrument: &str) -> BrokerResult<TickStream>;

    /// 주문을 제출합니다.
    ///
    /// 같은 `order.id`로 다시 호출하면 새 주문을 만들지 않고 기존 주문의
    /// 상태를 반환해야 합니다.
    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck>;

    /// 주문을 취소합니다.
    async fn cancel_order(&self, order_id: Uuid) -> BrokerResult<CancelAck>;

    /// 계좌 잔고와 포지션을 조회합니다.
    async fn get_account_state(&self) -> BrokerResult<AccountState>;

    /// 주문 상태를 조회합니다. 브로커에 기록이 없으면 `None`.
    async fn order_status(&self, order_id: Uuid) -> BrokerResult<Option<OrderAck>>;
}
