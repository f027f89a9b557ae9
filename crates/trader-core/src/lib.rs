//! # Trader Core
//!
//! 트레이딩 엔진의 핵심 도메인 모델 및 타입을 제공합니다:
//! - 틱, 봉, 지표 스냅샷, 감성 점수
//! - 신호, 주문 상태 머신, 포지션, 브로커 계좌
//! - 사용자별 리스크 정책
//! - 에러 분류, 설정, 로깅
//! - 자격증명 서비스, 영속화 협력자 인터페이스

pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod logging;
pub mod store;
pub mod types;

pub use config::*;
pub use crypto::{
    AesGcmCredentialService, BrokerCredentials, CredentialService, CryptoError,
};
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use store::*;
pub use types::*;
