//! 사용자별 리스크 정책과 위반 사유.

use crate::types::{Percentage, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 사용자별 리스크 정책.
///
/// 사용자가 소유하며 트레이딩 컴포넌트는 읽기만 합니다.
/// 모든 호출에 명시적으로 전달됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// 거래당 리스크 (자본 대비 %)
    pub risk_per_trade_pct: Percentage,
    /// 최대 동시 포지션 수
    pub max_concurrent_positions: usize,
    /// 기본 손절 거리 (진입가 대비 %)
    pub default_stop_pct: Percentage,
    /// 기본 익절 거리 (진입가 대비 %)
    pub default_take_profit_pct: Percentage,
    /// 최소 신호 신뢰도
    pub min_signal_confidence: f64,
    /// 자동매매 활성화
    pub auto_trading_enabled: bool,
    /// 지표 기반 변동성 손절 사용
    #[serde(default)]
    pub use_volatility_stop: bool,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: Decimal::ONE,
            max_concurrent_positions: 5,
            default_stop_pct: Decimal::TWO,
            default_take_profit_pct: Decimal::new(4, 0),
            min_signal_confidence: 0.6,
            auto_trading_enabled: false,
            use_volatility_stop: false,
        }
    }
}

impl RiskPolicy {
    /// 거래당 리스크 설정.
    pub fn with_risk_per_trade(mut self, pct: Percentage) -> Self {
        self.risk_per_trade_pct = pct;
        self
    }

    /// 최대 동시 포지션 수 설정.
    pub fn with_max_positions(mut self, max: usize) -> Self {
        self.max_concurrent_positions = max;
        self
    }

    /// 최소 신뢰도 설정.
    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_signal_confidence = confidence;
        self
    }

    /// 자동매매 설정.
    pub fn with_auto_trading(mut self, enabled: bool) -> Self {
        self.auto_trading_enabled = enabled;
        self
    }

    /// 변동성 손절 설정.
    pub fn with_volatility_stop(mut self, enabled: bool) -> Self {
        self.use_volatility_stop = enabled;
        self
    }
}

/// 리스크 정책 위반 사유.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskViolation {
    /// 신호 신뢰도 부족
    LowConfidence {
        /// 신호 신뢰도
        confidence: f64,
        /// 정책 최소값
        minimum: f64,
    },
    /// 동시 포지션 한도 도달
    MaxPositions {
        /// 현재 오픈 포지션 수
        open: usize,
        /// 정책 한도
        limit: usize,
    },
    /// 노출 한도 초과
    ExposureCeiling {
        /// 현재 노출 (%)
        current_pct: Percentage,
        /// 요청 리스크 (%)
        requested_pct: Percentage,
        /// 한도 (%)
        ceiling_pct: Percentage,
    },
    /// 계산된 크기가 최소 주문 수량 미만
    SizeTooSmall {
        /// 계산된 크기
        size: Quantity,
        /// 최소 크기
        minimum: Quantity,
    },
    /// 손절 거리 산출 불가
    InvalidStop(String),
    /// 계좌가 degraded 상태
    AccountDegraded,
    /// 신호를 주문에 사용할 수 없음 (대체/만료/소비)
    SignalUnusable(String),
    /// 이미 같은 방향의 포지션 보유
    PositionExists,
    /// 타임프레임 간 신호 충돌
    TimeframeConflict(String),
}

impl fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskViolation::LowConfidence { confidence, minimum } => {
                write!(f, "신뢰도 부족 ({:.2} < {:.2})", confidence, minimum)
            }
            RiskViolation::MaxPositions { open, limit } => {
                write!(f, "동시 포지션 한도 도달 ({}/{})", open, limit)
            }
            RiskViolation::ExposureCeiling {
                current_pct,
                requested_pct,
                ceiling_pct,
            } => write!(
                f,
                "노출 한도 초과 ({}% + {}% > {}%)",
                current_pct, requested_pct, ceiling_pct
            ),
            RiskViolation::SizeTooSmall { size, minimum } => {
                write!(f, "주문 수량 부족 ({} < {})", size, minimum)
            }
            RiskViolation::InvalidStop(reason) => write!(f, "손절 거리 오류: {}", reason),
            RiskViolation::AccountDegraded => write!(f, "계좌가 degraded 상태입니다"),
            RiskViolation::SignalUnusable(reason) => write!(f, "사용할 수 없는 신호: {}", reason),
            RiskViolation::PositionExists => write!(f, "이미 동일 방향 포지션이 있습니다"),
            RiskViolation::TimeframeConflict(reason) => write!(f, "타임프레임 충돌: {}", reason),
        }
    }
}
