//! CLI 명령어 구현 모듈.

pub mod credentials;
pub mod paper;
pub mod replay;
pub mod ticks;
