//! 페이퍼 트레이딩용 모의 브로커.
//!
//! - 주입된 호가로 시세 스트림 제공
//! - 클라이언트 주문 ID 기준 멱등 주문 처리
//! - 최근 호가 중간가 ± 슬리피지로 시장가 체결
//! - 손절/익절 보호 주문 트리거
//! - 테스트용 장애 주입 (거부, 응답 유실, 계좌 조회 실패)
//!
//! # 예제
//!
//! ```ignore
//! let broker = SimulatedBroker::new(SimulatedConfig::default().with_initial_balance(dec!(10000)));
//! broker.connect(&credentials).await?;
//! broker.push_tick(tick);
//! let ack = broker.submit_order(&order).await?;
//! ```

mod broker;

pub use broker::{FillMode, SimulatedBroker, SimulatedConfig};
