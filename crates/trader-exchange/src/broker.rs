//! 브로커 유형별 정적 디스패치.
//!
//! 계좌의 `BrokerType`으로 게이트웨이를 고르고, 실행 계층은 `Broker` 하나만
//! 다룹니다. 모의 브로커는 `Arc`로 공유해 시세 주입과 장애 주입에 씁니다.

use async_trait::async_trait;
use std::sync::Arc;
use trader_core::{
    AccountState, BrokerAccount, BrokerCredentials, BrokerType, CancelAck, ConnectionState, Order,
    OrderAck,
};
use uuid::Uuid;

use crate::binance::{BinanceBroker, BinanceConfig};
use crate::deriv::{DerivBroker, DerivConfig};
use crate::simulated::{SimulatedBroker, SimulatedConfig};
use crate::traits::{BrokerGateway, ConnectionHandle, TickStream};
use crate::BrokerResult;

/// 지원하는 브로커 게이트웨이.
pub enum Broker {
    /// 인메모리 모의 브로커 (페이퍼 트레이딩, 테스트)
    Simulated(Arc<SimulatedBroker>),
    /// Binance Spot (REST 주문, WebSocket 시세)
    Binance(BinanceBroker),
    /// Deriv (WebSocket 계약 매수/매도)
    Deriv(DerivBroker),
}

/// 브로커 생성 옵션. 계좌 유형에 해당하는 설정만 사용됩니다.
#[derive(Debug, Clone, Default)]
pub struct BrokerOptions {
    /// 모의 브로커 설정
    pub simulated: SimulatedConfig,
    /// Binance 설정
    pub binance: BinanceConfig,
    /// Deriv 설정
    pub deriv: DerivConfig,
}

impl Broker {
    /// 계좌의 브로커 유형에 맞는 게이트웨이를 생성합니다.
    pub fn for_account(account: &BrokerAccount, options: &BrokerOptions) -> BrokerResult<Self> {
        Ok(match account.broker_type {
            BrokerType::Simulated => {
                Broker::Simulated(Arc::new(SimulatedBroker::new(options.simulated.clone())))
            }
            BrokerType::Binance => Broker::Binance(BinanceBroker::new(options.binance.clone())?),
            BrokerType::Deriv => Broker::Deriv(DerivBroker::new(options.deriv.clone())),
        })
    }

    /// 게이트웨이의 브로커 유형.
    pub fn broker_type(&self) -> BrokerType {
        match self {
            Broker::Simulated(_) => BrokerType::Simulated,
            Broker::Binance(_) => BrokerType::Binance,
            Broker::Deriv(_) => BrokerType::Deriv,
        }
    }

    /// 모의 브로커인 경우 공유 핸들을 반환합니다.
    pub fn as_simulated(&self) -> Option<&Arc<SimulatedBroker>> {
        match self {
            Broker::Simulated(sim) => Some(sim),
            _ => None,
        }
    }
}

impl From<Arc<SimulatedBroker>> for Broker {
    fn from(sim: Arc<SimulatedBroker>) -> Self {
        Broker::Simulated(sim)
    }
}

impl From<SimulatedBroker> for Broker {
    fn from(sim: SimulatedBroker) -> Self {
        Broker::Simulated(Arc::new(sim))
    }
}

#[async_trait]
impl BrokerGateway for Broker {
    fn name(&self) -> &str {
        match self {
            Broker::Simulated(b) => b.name(),
            Broker::Binance(b) => b.name(),
            Broker::Deriv(b) => b.name(),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        match self {
            Broker::Simulated(b) => b.connection_state(),
            Broker::Binance(b) => b.connection_state(),
            Broker::Deriv(b) => b.connection_state(),
        }
    }

    async fn connect(&self, credentials: &BrokerCredentials) -> BrokerResult<ConnectionHandle> {
        match self {
            Broker::Simulated(b) => b.connect(credentials).await,
            Broker::Binance(b) => b.connect(credentials).await,
            Broker::Deriv(b) => b.connect(credentials).await,
        }
    }

    async fn subscribe(&self, instrument: &str) -> BrokerResult<TickStream> {
        match self {
            Broker::Simulated(b) => b.subscribe(instrument).await,
            Broker::Binance(b) => b.subscribe(instrument).await,
            Broker::Deriv(b) => b.subscribe(instrument).await,
        }
    }

    async fn submit_order(&self, order: &Order) -> BrokerResult<OrderAck> {
        match self {
            Broker::Simulated(b) => b.submit_order(order).await,
            Broker::Binance(b) => b.submit_order(order).await,
            Broker::Deriv(b) => b.submit_order(order).await,
        }
    }

    async fn cancel_order(&self, order_id: Uuid) -> BrokerResult<CancelAck> {
        match self {
            Broker::Simulated(b) => b.cancel_order(order_id).await,
            Broker::Binance(b) => b.cancel_order(order_id).await,
            Broker::Deriv(b) => b.cancel_order(order_id).await,
        }
    }

    async fn get_account_state(&self) -> BrokerResult<AccountState> {
        match self {
            Broker::Simulated(b) => b.get_account_state().await,
            Broker::Binance(b) => b.get_account_state().await,
            Broker::Deriv(b) => b.get_account_state().await,
        }
    }

    async fn order_status(&self, order_id: Uuid) -> BrokerResult<Option<OrderAck>> {
        match self {
            Broker::Simulated(b) => b.order_status(order_id).await,
            Broker::Binance(b) => b.order_status(order_id).await,
            Broker::Deriv(b) => b.order_status(order_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trader_core::UserId;

    #[test]
    fn test_selects_variant_from_account() {
        let account = BrokerAccount::new(UserId(1), BrokerType::Simulated, "ref");
        let broker = Broker::for_account(&account, &BrokerOptions::default()).unwrap();
        assert_eq!(broker.broker_type(), BrokerType::Simulated);
        assert!(broker.as_simulated().is_some());

        let account = BrokerAccount::new(UserId(1), BrokerType::Binance, "ref");
        let broker = Broker::for_account(&account, &BrokerOptions::default()).unwrap();
        assert_eq!(broker.name(), "binance");
        assert!(broker.as_simulated().is_none());

        let account = BrokerAccount::new(UserId(1), BrokerType::Deriv, "ref");
        let broker = Broker::for_account(&account, &BrokerOptions::default()).unwrap();
        assert_eq!(broker.broker_type(), BrokerType::Deriv);
        assert_eq!(broker.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shared_simulated_handle() {
        let sim = Arc::new(SimulatedBroker::new(SimulatedConfig::default()));
        let broker = Broker::from(sim.clone());
        broker
            .connect(&BrokerCredentials::new("key", "secret"))
            .await
            .unwrap();
        assert!(sim.connection_state().accepts_orders());
        assert!(Arc::ptr_eq(broker.as_simulated().unwrap(), &sim));
    }
}
