//! 실행 에러 타입.

use thiserror::Error;
use trader_core::{BrokerAccountId, RiskViolation, TraderError, UserId};
use trader_exchange::BrokerError;

/// 실행 오류 유형.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unknown broker account: {0}")]
    UnknownAccount(BrokerAccountId),

    #[error("Account {account} does not belong to user {user}")]
    AccountOwnership {
        account: BrokerAccountId,
        user: UserId,
    },

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Risk check failed: {0}")]
    Risk(RiskViolation),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Core(#[from] TraderError),
}

/// 실행 작업 Result 타입.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

impl From<ExecutionError> for TraderError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::UnknownAccount(id) => TraderError::NotFound(format!("account {}", id)),
            ExecutionError::AccountOwnership { .. } => TraderError::InvalidInput(err.to_string()),
            ExecutionError::PositionNotFound(key) => TraderError::NotFound(format!("position {}", key)),
            ExecutionError::OrderNotFound(id) => TraderError::NotFound(format!("order {}", id)),
            ExecutionError::Risk(violation) => TraderError::RiskViolation(violation),
            ExecutionError::Broker(e) => e.into(),
            ExecutionError::Core(e) => e,
        }
    }
}
