//! 리스크 매니저.
//!
//! 사용자 정책과 계좌 상황은 호출마다 명시적으로 전달됩니다. 매니저는
//! 전역 한도(`RiskConfig`)만 보유합니다.

use crate::sizing::{plan_trade, TradePlan};
use rust_decimal::Decimal;
use tracing::{debug, info};
use trader_core::{Percentage, RiskConfig, RiskPolicy, RiskViolation, Signal};

/// 평가 시점의 사용자/계좌 상황.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskContext {
    /// 평가 자본
    pub equity: Decimal,
    /// 열린 포지션 수 (사용자 전체)
    pub open_positions: usize,
    /// 현재 노출 (예약 포함, %)
    pub exposure_pct: Percentage,
    /// 같은 계좌/종목에 열린 포지션이 있는지
    pub has_position: bool,
    /// 계좌가 degraded 상태인지
    pub account_degraded: bool,
}

/// 평가 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    /// 자동 실행 승인
    Approved(TradePlan),
    /// 자동매매 비활성: 사용자 확인 필요
    ManualAction(TradePlan),
    /// 거부
    Rejected(RiskViolation),
}

impl RiskDecision {
    /// 거래 계획 (승인/수동 확인).
    pub fn plan(&self) -> Option<&TradePlan> {
        match self {
            RiskDecision::Approved(plan) | RiskDecision::ManualAction(plan) => Some(plan),
            RiskDecision::Rejected(_) => None,
        }
    }
}

/// 리스크 매니저.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    /// 새 매니저를 생성합니다.
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// 전역 설정.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// 사용자별 노출 한도 (%).
    pub fn exposure_ceiling(&self) -> Percentage {
        self.config.max_total_risk_pct
    }

    /// 신호를 평가합니다.
    pub fn evaluate(&self, signal: &Signal, policy: &RiskPolicy, ctx: &RiskContext) -> RiskDecision {
        match self.check(signal, policy, ctx) {
            Err(violation) => {
                info!(
                    signal_id = %signal.id,
                    instrument = %signal.instrument,
                    reason = %violation,
                    "리스크 평가 거부"
                );
                RiskDecision::Rejected(violation)
            }
            Ok(plan) if policy.auto_trading_enabled => {
                debug!(signal_id = %signal.id, size = %plan.size, "리스크 평가 승인");
                RiskDecision::Approved(plan)
            }
            Ok(plan) => {
                debug!(signal_id = %signal.id, "자동매매 비활성, 수동 확인 필요");
                RiskDecision::ManualAction(plan)
            }
        }
    }

    /// 사용자가 확인한 신호를 평가합니다. 자동매매 설정만 무시합니다.
    pub fn evaluate_confirmed(
        &self,
        signal: &Signal,
        policy: &RiskPolicy,
        ctx: &RiskContext,
    ) -> RiskDecision {
        match self.check(signal, policy, ctx) {
            Ok(plan) => RiskDecision::Approved(plan),
            Err(violation) => RiskDecision::Rejected(violation),
        }
    }

    fn check(
        &self,
        signal: &Signal,
        policy: &RiskPolicy,
        ctx: &RiskContext,
    ) -> Result<TradePlan, RiskViolation> {
        if ctx.account_degraded {
            return Err(RiskViolation::AccountDegraded);
        }
        if signal.confidence < policy.min_signal_confidence {
            return Err(RiskViolation::LowConfidence {
                confidence: signal.confidence,
                minimum: policy.min_signal_confidence,
            });
        }
        if ctx.has_position {
            return Err(RiskViolation::PositionExists);
        }
        if ctx.open_positions >= policy.max_concurrent_positions {
            return Err(RiskViolation::MaxPositions {
                open: ctx.open_positions,
                limit: policy.max_concurrent_positions,
            });
        }
        let ceiling = self.exposure_ceiling();
        if ctx.exposure_pct + policy.risk_per_trade_pct > ceiling {
            return Err(RiskViolation::ExposureCeiling {
                current_pct: ctx.exposure_pct,
                requested_pct: policy.risk_per_trade_pct,
                ceiling_pct: ceiling,
            });
        }
        plan_trade(signal, policy, ctx.equity, &self.config)
    }
}
