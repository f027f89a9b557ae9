//! 리스크 관리.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 사용자 정책 기반 신호 평가 (신뢰도, 동시 포지션, 노출 한도, 자동매매)
//! - 거래당 리스크 기반 포지션 사이징과 손절/익절 가격
//! - 예약/점유로 나뉜 사용자별 노출 예산
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::{RiskContext, RiskDecision, RiskManager};
//!
//! let manager = RiskManager::new(RiskConfig::default());
//! match manager.evaluate(&signal, &policy, &ctx) {
//!     RiskDecision::Approved(plan) => { /* 주문 생성 */ }
//!     RiskDecision::ManualAction(plan) => { /* 사용자에게 표시 */ }
//!     RiskDecision::Rejected(reason) => { /* 알림 */ }
//! }
//! ```

pub mod budget;
pub mod manager;
pub mod sizing;

pub use budget::ExposureBudget;
pub use manager::{RiskContext, RiskDecision, RiskManager};
pub use sizing::{
    plan_trade, position_size, protective_levels, stop_distance, take_profit_distance, TradePlan,
};
