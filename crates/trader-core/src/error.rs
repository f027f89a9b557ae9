//! 트레이딩 시스템의 에러 타입.
//!
//! 에러는 복구 방식에 따라 분류됩니다:
//! - `Feed`: 재연결(백오프)로 복구
//! - `BrokerRejection`: 해당 주문에 대해 종결, 사용자에게 표시
//! - `RiskViolation`: 주문 생성 차단, 재시도 없음
//! - `ReconciliationDivergence`: 계좌를 degraded로 전환, 수동 재동기화 필요
//! - `Timeout`: 일시적, 제한된 재시도 후 `escalate`로 승격

use crate::domain::RiskViolation;
use thiserror::Error;

/// 타임아웃이 발생한 작업 범위.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    /// 시세 구독/수신
    Feed,
    /// 주문 제출/취소
    Order,
    /// 계좌 조회
    Account,
    /// 외부 감성 소스
    Sentiment,
}

/// 핵심 트레이딩 에러.
#[derive(Debug, Error)]
pub enum TraderError {
    /// 시세 피드 에러 (재연결로 복구)
    #[error("피드 에러: {0}")]
    Feed(String),

    /// 브로커 주문 거부 (해당 주문 종결)
    #[error("브로커 거부: {0}")]
    BrokerRejection(String),

    /// 리스크 정책 위반
    #[error("리스크 위반: {0}")]
    RiskViolation(RiskViolation),

    /// 원장과 브로커 상태 불일치
    #[error("정합성 불일치: {0}")]
    ReconciliationDivergence(String),

    /// 타임아웃
    #[error("타임아웃 ({scope:?}): {operation}")]
    Timeout {
        /// 작업 범위
        scope: TimeoutScope,
        /// 작업 설명
        operation: String,
    },

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 영속화 에러
    #[error("저장소 에러: {0}")]
    Persistence(String),

    /// 자격증명 에러
    #[error("자격증명 에러: {0}")]
    Credential(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 허용되지 않는 상태 전이
    #[error("잘못된 상태: {0}")]
    InvalidState(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 트레이딩 작업을 위한 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 타임아웃 에러 생성.
    pub fn timeout(scope: TimeoutScope, operation: impl Into<String>) -> Self {
        TraderError::Timeout {
            scope,
            operation: operation.into(),
        }
    }

    /// 로컬 복구(재시도/재연결) 대상인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(self, TraderError::Feed(_) | TraderError::Timeout { .. })
    }

    /// 사용자에게 반드시 표시되어야 하는 에러인지 확인합니다.
    ///
    /// 정책/거부 계열은 조용히 재시도하지 않습니다.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            TraderError::BrokerRejection(_)
                | TraderError::RiskViolation(_)
                | TraderError::ReconciliationDivergence(_)
        )
    }

    /// 재시도 한도를 소진한 타임아웃을 상위 분류로 승격합니다.
    ///
    /// 피드 계열은 `Feed`, 주문 계열은 `BrokerRejection`이 됩니다.
    /// 타임아웃이 아닌 에러는 그대로 반환합니다.
    pub fn escalate(self) -> Self {
        match self {
            TraderError::Timeout {
                scope: TimeoutScope::Feed | TimeoutScope::Sentiment,
                operation,
            } => TraderError::Feed(format!("재시도 한도 초과: {}", operation)),
            TraderError::Timeout {
                scope: TimeoutScope::Order,
                operation,
            } => TraderError::BrokerRejection(format!("응답 없음: {}", operation)),
            TraderError::Timeout {
                scope: TimeoutScope::Account,
                operation,
            } => TraderError::ReconciliationDivergence(format!("계좌 조회 실패: {}", operation)),
            other => other,
        }
    }
}

impl From<RiskViolation> for TraderError {
    fn from(violation: RiskViolation) -> Self {
        TraderError::RiskViolation(violation)
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_classification() {
        assert!(TraderError::Feed("stream closed".to_string()).is_transient());
        assert!(TraderError::timeout(TimeoutScope::Order, "submit").is_transient());

        let violation = TraderError::from(RiskViolation::LowConfidence {
            confidence: 0.4,
            minimum: 0.6,
        });
        assert!(violation.is_user_facing());
        assert!(!violation.is_transient());

        let rejection = TraderError::BrokerRejection("insufficient margin".to_string());
        assert!(rejection.is_user_facing());
        assert!(!TraderError::Config("x".to_string()).is_user_facing());

        let ceiling = TraderError::from(RiskViolation::ExposureCeiling {
            current_pct: dec!(5),
            requested_pct: dec!(2),
            ceiling_pct: dec!(6),
        });
        assert!(ceiling.to_string().contains("6"));
    }

    #[test]
    fn test_timeout_escalation() {
        let feed = TraderError::timeout(TimeoutScope::Feed, "subscribe X").escalate();
        assert!(matches!(feed, TraderError::Feed(_)));

        let order = TraderError::timeout(TimeoutScope::Order, "submit 1").escalate();
        assert!(matches!(order, TraderError::BrokerRejection(_)));

        let account = TraderError::timeout(TimeoutScope::Account, "account").escalate();
        assert!(matches!(account, TraderError::ReconciliationDivergence(_)));

        let untouched = TraderError::NotFound("order".to_string()).escalate();
        assert!(matches!(untouched, TraderError::NotFound(_)));
    }
}
