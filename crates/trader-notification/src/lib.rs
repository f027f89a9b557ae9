//! # Trader Notification
//!
//! 트레이딩 알림 서비스.
//!
//! 이벤트: 신호 발행, 주문 체결/거부, 리스크 한도, 수동 확인 요청,
//! 포지션 불일치, 계좌 중단.
//!
//! 전송은 `NotificationDispatcher`의 백그라운드 태스크가 담당하며
//! 트레이딩 경로는 전송 결과를 기다리지 않습니다.
//!
//! 지원 채널:
//! - Telegram

pub mod dispatcher;
pub mod telegram;
pub mod types;

pub use dispatcher::*;
pub use telegram::*;
pub use types::*;
