//! 주문 실행 조정 및 사용자별 포지션 원장.
//!
//! 이 crate는 다음을 제공합니다:
//! - 신호를 리스크 평가를 거쳐 주문으로 실행하는 코디네이터
//! - (사용자, 종목) 단위 직렬화 레인
//! - 브로커 상태 기준의 정합성 검사를 포함한 원장
//! - 응답 없는 주문을 종결하는 워치독
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::{ExecutionCoordinator, SignalPipeline};
//!
//! let coordinator = Arc::new(ExecutionCoordinator::new(
//!     config.execution, config.risk, config.signal.timeframe_policy, store, notifier,
//! ));
//! let gateway = Arc::new(Broker::for_account(&account, &BrokerOptions::default())?);
//! coordinator.register_account(account, gateway).await?;
//! let outcome = coordinator.execute_signal(user_id, account_id, signal_id).await?;
//! ```

pub mod coordinator;
pub mod error;
pub mod lanes;
pub mod ledger;
pub mod pipeline;

pub use coordinator::{CancelReport, ExecutionCoordinator, ExecutionOutcome, WatchdogReport};
pub use error::{ExecutionError, ExecutionResult};
pub use lanes::{AccountLane, InstrumentLanes};
pub use ledger::{Divergence, DivergenceKind, Ledger, UserLedger};
pub use pipeline::{PipelineReport, SignalPipeline, Subscription, UserExecution};
