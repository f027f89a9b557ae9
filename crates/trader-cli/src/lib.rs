//! CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 마스터 키 생성과 브로커 자격증명 암호화
//! - CSV 틱 리플레이 (지표 스냅샷과 신호)
//! - 모의 브로커를 상대로 한 페이퍼 트레이딩

pub mod commands;
