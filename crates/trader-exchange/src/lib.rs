//! 브로커 게이트웨이와 시세 피드.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `BrokerGateway` trait: 통합 브로커 인터페이스
//! - 모의 브로커 (페이퍼 트레이딩, 테스트)
//! - Binance Spot 게이트웨이 (REST + WebSocket)
//! - Deriv 게이트웨이 (WebSocket 계약 API)
//! - 브로커 유형별 정적 디스패치 `Broker`
//! - 시세 피드 어댑터와 종목별 링 버퍼
//! - 지수 백오프 재시도

pub mod binance;
pub mod broker;
pub mod deriv;
pub mod error;
pub mod feed;
pub mod retry;
pub mod simulated;
pub mod traits;

pub use binance::{BinanceBroker, BinanceConfig};
pub use broker::{Broker, BrokerOptions};
pub use deriv::{DerivBroker, DerivConfig};
pub use error::*;
pub use feed::{FeedAdapter, FeedStats, PushOutcome, TickBuffer};
pub use retry::{with_retry, with_retry_if, RetryConfig};
pub use simulated::{FillMode, SimulatedBroker, SimulatedConfig};
pub use traits::*;
