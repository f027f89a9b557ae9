//! 설정 관리.
//!
//! 기본값 → TOML 파일 → `TRADER__` 환경 변수 순으로 덮어씁니다.
//! 예: `TRADER__RISK__MAX_TOTAL_RISK_PCT=5`.

use crate::error::{TraderError, TraderResult};
use crate::types::{Percentage, Quantity, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 시세 피드 설정
    #[serde(default)]
    pub feed: FeedConfig,
    /// 지표 엔진 설정
    #[serde(default)]
    pub indicators: IndicatorConfig,
    /// 감성 집계 설정
    #[serde(default)]
    pub sentiment: SentimentConfig,
    /// 신호 생성 설정 (타임프레임 충돌 정책은 필수)
    pub signal: SignalConfig,
    /// 리스크 관리 설정
    #[serde(default)]
    pub risk: RiskConfig,
    /// 주문 실행 설정
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// 알림 설정
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨 / EnvFilter 지시어
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 출력 형식 (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// 시세 피드 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// 종목별 틱 버퍼 용량
    pub buffer_capacity: usize,
    /// 구독 타임아웃 (밀리초)
    pub subscribe_timeout_ms: u64,
    /// 재연결 초기 대기 (밀리초)
    pub reconnect_initial_ms: u64,
    /// 재연결 최대 대기 (밀리초)
    pub reconnect_max_ms: u64,
    /// 틱 수신 무응답 허용 시간 (초), 초과 시 재연결
    pub idle_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            subscribe_timeout_ms: 10_000,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            idle_timeout_secs: 60,
        }
    }
}

/// 지표 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// 봉 윈도우 용량
    pub window_capacity: usize,
    /// 집계할 타임프레임
    pub timeframes: Vec<Timeframe>,
    /// 계산 시간 예산 (밀리초). 없으면 봉 기간 전체
    pub compute_budget_ms: Option<u64>,
    /// RSI 기간
    pub rsi_period: usize,
    /// MACD 단기 EMA
    pub macd_fast: usize,
    /// MACD 장기 EMA
    pub macd_slow: usize,
    /// MACD 시그널 EMA
    pub macd_signal: usize,
    /// 볼린저 기간
    pub bollinger_period: usize,
    /// 볼린저 표준편차 배수
    pub bollinger_std: f64,
    /// 스토캐스틱 기간
    pub stochastic_period: usize,
    /// 스토캐스틱 %D 평활 기간
    pub stochastic_smooth: usize,
    /// 단기 SMA
    pub sma_fast: usize,
    /// 장기 SMA
    pub sma_slow: usize,
    /// ATR 기간
    pub atr_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            window_capacity: 200,
            timeframes: vec![Timeframe::M5, Timeframe::H1],
            compute_budget_ms: None,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            stochastic_period: 14,
            stochastic_smooth: 3,
            sma_fast: 20,
            sma_slow: 50,
            atr_period: 14,
        }
    }
}

impl IndicatorConfig {
    /// 모든 지표를 계산하는 데 필요한 최소 봉 수.
    pub fn min_bars(&self) -> usize {
        [
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal,
            self.bollinger_period,
            self.stochastic_period + self.stochastic_smooth,
            self.sma_slow,
            self.atr_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }
}

/// 감성 집계 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SentimentConfig {
    /// 신선도 기간 (초). 이 기간이 지나면 신뢰도가 감쇠합니다
    pub freshness_horizon_secs: i64,
    /// 감쇠 반감기 (초)
    pub half_life_secs: i64,
    /// 융합 제외 임계 신뢰도
    pub confidence_floor: f64,
    /// 소스별 타임아웃 (밀리초)
    pub source_timeout_ms: u64,
    /// 연속 실패 1회당 신뢰도 배수
    pub failure_penalty: f64,
    /// 폴링 주기 (초)
    pub poll_interval_secs: u64,
    /// 커버리지 1.0에 필요한 기사/의견 수
    pub coverage_target: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            freshness_horizon_secs: 15 * 60,
            half_life_secs: 30 * 60,
            confidence_floor: 0.1,
            source_timeout_ms: 5_000,
            failure_penalty: 0.5,
            poll_interval_secs: 300,
            coverage_target: 10,
        }
    }
}

/// 같은 종목의 타임프레임 간 신호 충돌 처리 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeframeConflictPolicy {
    /// 타임프레임마다 독립적으로 처리
    Independent,
    /// 다른 타임프레임의 활성 신호와 방향이 다르면 실행하지 않음
    RequireAgreement,
    /// 상위 타임프레임의 활성 신호와 다른 하위 신호는 실행하지 않음
    HigherTimeframeWins,
}

/// 신호 생성 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    /// 기술적 가중치
    #[serde(default = "default_technical_weight")]
    pub technical_weight: f64,
    /// 감성 가중치
    #[serde(default = "default_sentiment_weight")]
    pub sentiment_weight: f64,
    /// 전역 최소 융합 신뢰도
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// 신호 유효 봉 수
    #[serde(default = "default_ttl_bars")]
    pub ttl_bars: i32,
    /// 변동성 손절 ATR 배수
    #[serde(default = "default_atr_stop_multiplier")]
    pub atr_stop_multiplier: f64,
    /// 타임프레임 충돌 정책 (기본값 없음)
    pub timeframe_policy: TimeframeConflictPolicy,
}

fn default_technical_weight() -> f64 {
    0.7
}

fn default_sentiment_weight() -> f64 {
    0.3
}

fn default_confidence_floor() -> f64 {
    0.5
}

fn default_ttl_bars() -> i32 {
    3
}

fn default_atr_stop_multiplier() -> f64 {
    2.0
}

impl SignalConfig {
    /// 정책을 지정해 기본 가중치로 생성합니다.
    pub fn new(timeframe_policy: TimeframeConflictPolicy) -> Self {
        Self {
            technical_weight: default_technical_weight(),
            sentiment_weight: default_sentiment_weight(),
            confidence_floor: default_confidence_floor(),
            ttl_bars: default_ttl_bars(),
            atr_stop_multiplier: default_atr_stop_multiplier(),
            timeframe_policy,
        }
    }

    /// 전역 최소 신뢰도 설정.
    pub fn with_floor(mut self, floor: f64) -> Self {
        self.confidence_floor = floor;
        self
    }
}

/// 리스크 관리 설정 (사용자 정책과 별개의 전역 한도).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    /// 사용자별 총 리스크 노출 한도 (%)
    pub max_total_risk_pct: Percentage,
    /// 최소 주문 수량
    pub min_order_size: Quantity,
    /// 수량 소수점 자릿수
    pub size_precision: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_total_risk_pct: Decimal::new(6, 0),
            min_order_size: Decimal::new(1, 4),
            size_precision: 4,
        }
    }
}

/// 주문 실행 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 주문 제출 타임아웃 (밀리초)
    pub submit_timeout_ms: u64,
    /// 같은 주문 ID로 재제출하는 최대 횟수
    pub submit_retries: u32,
    /// 재시도 초기 대기 (밀리초)
    pub retry_initial_ms: u64,
    /// 응답 없는 submitted 주문을 워치독이 해소하기까지의 시간 (초)
    pub watchdog_window_secs: i64,
    /// 워치독 주기 (초)
    pub watchdog_interval_secs: u64,
    /// 정기 정합성 검사 주기 (초)
    pub reconciliation_interval_secs: u64,
    /// degraded 전환 전 허용 정합성 실패 횟수
    pub reconciliation_max_failures: u32,
    /// 계좌 조회 타임아웃 (밀리초)
    pub account_timeout_ms: u64,
    /// 체결 커밋 재시도 횟수
    pub persist_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 5_000,
            submit_retries: 3,
            retry_initial_ms: 200,
            watchdog_window_secs: 30,
            watchdog_interval_secs: 10,
            reconciliation_interval_secs: 60,
            reconciliation_max_failures: 3,
            account_timeout_ms: 5_000,
            persist_retries: 3,
        }
    }
}

impl ExecutionConfig {
    /// 주문 제출 타임아웃.
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    /// 계좌 조회 타임아웃.
    pub fn account_timeout(&self) -> Duration {
        Duration::from_millis(self.account_timeout_ms)
    }
}

/// 알림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 알림 활성화 여부
    pub enabled: bool,
    /// 전송 큐 용량
    pub queue_capacity: usize,
    /// 텔레그램 설정
    pub telegram: TelegramConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_capacity: 256,
            telegram: TelegramConfig::default(),
        }
    }
}

/// 텔레그램 알림 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 봇 토큰
    #[serde(default)]
    pub bot_token: String,
    /// 기본 채팅 ID
    #[serde(default)]
    pub chat_id: String,
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드하고 검증합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> TraderResult<Self> {
        let builder = config::Config::builder()
            .set_default("logging.level", "info")
            .map_err(|e| TraderError::Config(e.to_string()))?
            // 파일에서 로드
            .add_source(config::File::from(path.as_ref()))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TraderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 문자열(TOML)에서 설정을 로드합니다.
    pub fn from_toml_str(toml: &str) -> TraderResult<Self> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TraderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 값의 일관성을 검증합니다.
    pub fn validate(&self) -> TraderResult<()> {
        let signal = &self.signal;
        if signal.technical_weight < 0.0 || signal.sentiment_weight < 0.0 {
            return Err(TraderError::Config("가중치는 음수일 수 없습니다".into()));
        }
        if (signal.technical_weight + signal.sentiment_weight - 1.0).abs() > 1e-6 {
            return Err(TraderError::Config(format!(
                "기술/감성 가중치 합이 1이 아닙니다: {} + {}",
                signal.technical_weight, signal.sentiment_weight
            )));
        }
        if !(0.0..=1.0).contains(&signal.confidence_floor) {
            return Err(TraderError::Config("confidence_floor는 [0, 1] 범위여야 합니다".into()));
        }
        if signal.ttl_bars <= 0 {
            return Err(TraderError::Config("ttl_bars는 1 이상이어야 합니다".into()));
        }
        if self.feed.buffer_capacity == 0 || self.indicators.window_capacity == 0 {
            return Err(TraderError::Config("버퍼 용량은 0일 수 없습니다".into()));
        }
        if self.indicators.window_capacity < self.indicators.min_bars() {
            return Err(TraderError::Config(format!(
                "window_capacity {}가 지표 최소 봉 수 {}보다 작습니다",
                self.indicators.window_capacity,
                self.indicators.min_bars()
            )));
        }
        if self.risk.max_total_risk_pct <= Decimal::ZERO {
            return Err(TraderError::Config("max_total_risk_pct는 양수여야 합니다".into()));
        }
        if self.sentiment.half_life_secs <= 0 {
            return Err(TraderError::Config("half_life_secs는 양수여야 합니다".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [signal]
            timeframe_policy = "higher_timeframe_wins"
            "#,
        )
        .unwrap();

        assert_eq!(config.signal.technical_weight, 0.7);
        assert_eq!(config.signal.sentiment_weight, 0.3);
        assert_eq!(
            config.signal.timeframe_policy,
            TimeframeConflictPolicy::HigherTimeframeWins
        );
        assert_eq!(config.risk.max_total_risk_pct, dec!(6));
        assert_eq!(config.feed.buffer_capacity, 1024);
        assert_eq!(config.indicators.timeframes, vec![Timeframe::M5, Timeframe::H1]);
    }

    #[test]
    fn test_timeframe_policy_is_required() {
        let result = AppConfig::from_toml_str("[risk]\nmax_total_risk_pct = 5\n");
        assert!(matches!(result, Err(TraderError::Config(_))));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let result = AppConfig::from_toml_str(
            r#"
            [signal]
            timeframe_policy = "independent"
            technical_weight = 0.8
            sentiment_weight = 0.3
            "#,
        );
        assert!(matches!(result, Err(TraderError::Config(_))));
    }

    #[test]
    fn test_min_bars() {
        let config = IndicatorConfig::default();
        assert_eq!(config.min_bars(), 50);
    }
}
