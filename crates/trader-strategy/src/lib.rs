//! 신호 생성.
//!
//! 이 크레이트가 제공하는 기능:
//! - 지표별 방향 투표와 다수결 (`votes`)
//! - 감성 융합 신뢰도와 중복 봉 차단 (`generator`)
//! - 사용자별 신호 북: 교체, 만료, 소비 (`book`)
//! - 타임프레임 충돌 정책 (`timeframes`)
//! - 후보 신호 순위 (`rank`)

pub mod book;
pub mod generator;
pub mod rank;
pub mod timeframes;
pub mod votes;

pub use book::{OfferOutcome, SignalBook, TakeOutcome};
pub use generator::{fuse_confidence, NoTradeReason, SignalGenerator, SignalOutcome};
pub use rank::{quality_score, rank_signals, reward_risk, RankedSignal};
pub use timeframes::{resolve, Actionability};
pub use votes::{collect_votes, IndicatorVote, Tally};
