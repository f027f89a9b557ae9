//! 사용자/계좌 식별자.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 사용자 ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// 브로커 계좌 ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerAccountId(pub Uuid);

impl BrokerAccountId {
    /// 새 계좌 ID를 생성합니다.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BrokerAccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BrokerAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 포지션 키: (계좌, 종목). 사용자별 원장 안에서 포지션을 식별합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    /// 브로커 계좌
    pub account_id: BrokerAccountId,
    /// 종목
    pub instrument: String,
}

impl PositionKey {
    /// 새 포지션 키를 생성합니다.
    pub fn new(account_id: BrokerAccountId, instrument: impl Into<String>) -> Self {
        Self {
            account_id,
            instrument: instrument.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.instrument)
    }
}
