//! 직렬화 레인.
//!
//! 같은 (사용자, 종목)에 대한 실행 요청은 도착 순서대로 하나씩 처리됩니다.
//! 서로 다른 사용자나 종목은 서로를 기다리지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use trader_core::{BrokerAccountId, BrokerType, UserId};
use trader_exchange::{Broker, BrokerGateway};

type LaneKey = (UserId, String);

/// (사용자, 종목)별 FIFO 잠금.
#[derive(Debug, Default)]
pub struct InstrumentLanes {
    lanes: StdMutex<HashMap<LaneKey, Arc<Mutex<()>>>>,
}

impl InstrumentLanes {
    /// 빈 레인 집합을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 레인을 획득합니다. 가드가 살아있는 동안 같은 키의 다른 요청은 대기합니다.
    ///
    /// tokio `Mutex`는 대기 순서대로 잠금을 넘기므로 요청 순서가 보존됩니다.
    pub async fn acquire(&self, user_id: UserId, instrument: &str) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = match self.lanes.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            lanes
                .entry((user_id, instrument.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lane.lock_owned().await
    }

    /// 생성된 레인 수.
    pub fn len(&self) -> usize {
        match self.lanes.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 등록된 브로커 계좌와 게이트웨이.
#[derive(Clone)]
pub struct AccountLane {
    /// 계좌 ID
    pub account_id: BrokerAccountId,
    /// 소유 사용자
    pub user_id: UserId,
    /// 브로커 종류
    pub broker_type: BrokerType,
    /// 게이트웨이
    pub gateway: Arc<Broker>,
}

impl std::fmt::Debug for AccountLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLane")
            .field("account_id", &self.account_id)
            .field("user_id", &self.user_id)
            .field("broker", &self.gateway.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_lane_is_serialized_in_order() {
        let lanes = Arc::new(InstrumentLanes::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = lanes.acquire(UserId(1), "X").await;
        let mut handles = Vec::new();
        for i in 0..3 {
            let lanes = lanes.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lanes.acquire(UserId(1), "X").await;
                log.lock().await.push(i);
            }));
            // 대기열 진입 순서를 고정
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(log.lock().await.is_empty());
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*log.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_different_lanes_do_not_block() {
        let lanes = InstrumentLanes::new();
        let _x = lanes.acquire(UserId(1), "X").await;
        let _y = lanes.acquire(UserId(1), "Y").await;
        let _other_user = lanes.acquire(UserId(2), "X").await;
        assert_eq!(lanes.len(), 3);
    }
}
