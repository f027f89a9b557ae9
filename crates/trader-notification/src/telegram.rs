//! 텔레그램 알림 서비스.
//!
//! Telegram Bot API로 사용자별 트레이딩 알림을 전송합니다.

use crate::types::{
    signed, Notification, NotificationError, NotificationEvent, NotificationPriority,
    NotificationResult, NotificationSender,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use trader_core::{Direction, Side, UserId};

const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// 텔레그램 알림 전송기.
pub struct TelegramSender {
    bot_token: SecretString,
    default_chat_id: String,
    user_chats: HashMap<UserId, String>,
    enabled: bool,
    api_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSender")
            .field("bot_token", &"***")
            .field("default_chat_id", &self.default_chat_id)
            .field("users", &self.user_chats.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl TelegramSender {
    /// 설정으로 전송기를 생성합니다.
    pub fn new(config: &trader_core::TelegramConfig) -> Self {
        Self {
            bot_token: SecretString::from(config.bot_token.clone()),
            default_chat_id: config.chat_id.clone(),
            user_chats: HashMap::new(),
            enabled: config.enabled,
            api_url: DEFAULT_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// 환경 변수에서 전송기를 생성합니다.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        let enabled = std::env::var("TELEGRAM_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);
        Some(Self::new(&trader_core::TelegramConfig {
            enabled,
            bot_token,
            chat_id,
        }))
    }

    /// 사용자 전용 채팅 ID를 등록합니다.
    pub fn with_user_chat(mut self, user_id: UserId, chat_id: impl Into<String>) -> Self {
        self.user_chats.insert(user_id, chat_id.into());
        self
    }

    /// API 주소를 변경합니다 (테스트용).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn chat_for(&self, user_id: UserId) -> &str {
        self.user_chats
            .get(&user_id)
            .map(String::as_str)
            .unwrap_or(self.default_chat_id.as_str())
    }

    /// 알림을 텔레그램 메시지로 포맷합니다.
    fn format_message(&self, notification: &Notification) -> String {
        let priority_emoji = match notification.priority {
            NotificationPriority::Low => "ℹ️",
            NotificationPriority::Normal => "📊",
            NotificationPriority::High => "⚠️",
            NotificationPriority::Critical => "🚨",
        };

        let content = match &notification.event {
            NotificationEvent::SignalIssued { signal, .. } => {
                let reasons = signal.reasoning.join("\n• ");
                format!(
                    "{} <b>신호 발행</b>\n\n\
                     종목: <code>{}</code> ({})\n\
                     방향: {}\n\
                     신뢰도: {:.0}% ({})\n\
                     기준가: {}\n\
                     만료: {}\n\n\
                     • {}",
                    direction_emoji(signal.direction),
                    signal.instrument,
                    signal.timeframe,
                    signal.direction,
                    signal.confidence * 100.0,
                    signal.strength_label(),
                    signal.entry_price,
                    signal.expires_at.format("%H:%M UTC"),
                    reasons
                )
            }

            NotificationEvent::OrderFilled {
                order_id,
                instrument,
                side,
                size,
                price,
                ..
            } => {
                let side_emoji = match side {
                    Side::Buy => "🟢",
                    Side::Sell => "🔴",
                };
                format!(
                    "{side_emoji} <b>주문 체결</b>\n\n\
                     종목: <code>{instrument}</code>\n\
                     방향: {side}\n\
                     수량: {size}\n\
                     가격: {price}\n\
                     주문ID: <code>{order_id}</code>"
                )
            }

            NotificationEvent::OrderRejected {
                order_id,
                instrument,
                reason,
                ..
            } => format!(
                "{priority_emoji} <b>주문 거부</b>\n\n\
                 종목: <code>{instrument}</code>\n\
                 사유: {reason}\n\
                 주문ID: <code>{order_id}</code>"
            ),

            NotificationEvent::RiskBreach {
                instrument,
                violation,
                ..
            } => format!(
                "{priority_emoji} <b>리스크 한도</b>\n\n\
                 종목: <code>{instrument}</code>\n\
                 사유: {violation}"
            ),

            NotificationEvent::ManualActionRequired {
                signal_id,
                instrument,
                direction,
                size,
                entry_price,
                stop_price,
                take_profit_price,
                confidence,
                ..
            } => format!(
                "{} <b>수동 확인 필요</b>\n\n\
                 종목: <code>{}</code>\n\
                 방향: {}\n\
                 수량: {}\n\
                 진입가: {}\n\
                 손절가: {}\n\
                 익절가: {}\n\
                 신뢰도: {:.0}%\n\
                 신호ID: <code>{}</code>",
                direction_emoji(*direction),
                instrument,
                direction,
                size,
                entry_price,
                stop_price,
                take_profit_price,
                confidence * 100.0,
                signal_id
            ),

            NotificationEvent::ReconciliationDivergence {
                instrument,
                local_size,
                broker_size,
                action,
                ..
            } => format!(
                "{priority_emoji} <b>포지션 불일치</b>\n\n\
                 종목: <code>{instrument}</code>\n\
                 원장: {}\n\
                 브로커: {}\n\
                 조치: {action}",
                signed(*local_size),
                signed(*broker_size)
            ),

            NotificationEvent::AccountDegraded {
                account_id, reason, ..
            } => format!(
                "{priority_emoji} <b>계좌 중단</b>\n\n\
                 계좌: <code>{account_id}</code>\n\
                 사유: {reason}\n\n\
                 재동기화 전까지 신규 주문이 차단됩니다."
            ),
        };

        let timestamp = notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        format!("{content}\n\n<i>🕐 {timestamp}</i>")
    }

    /// 텔레그램에 원시 메시지를 전송합니다.
    async fn send_message(&self, chat_id: &str, text: &str) -> NotificationResult<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_url,
            self.bot_token.expose_secret()
        );

        let params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        debug!(chat_id, "Sending Telegram message");

        let response = self.client.post(&url).json(&params).send().await?;

        if response.status().is_success() {
            info!("Telegram notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                warn!("Telegram rate limited");
                return Err(NotificationError::RateLimited(60));
            }

            error!("Failed to send Telegram message: {} - {}", status, body);
            Err(NotificationError::SendFailed(format!(
                "HTTP {}: {}",
                status, body
            )))
        }
    }
}

fn direction_emoji(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "🟢",
        Direction::Short => "🔴",
    }
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        if !self.is_enabled() {
            debug!("Telegram notifications are disabled, skipping");
            return Ok(());
        }
        let chat_id = self.chat_for(notification.user_id());
        if chat_id.is_empty() {
            return Err(NotificationError::InvalidConfig(format!(
                "사용자 {}의 채팅 ID가 없습니다",
                notification.user_id()
            )));
        }

        let message = self.format_message(notification);
        self.send_message(chat_id, &message).await
    }

    fn is_enabled(&self) -> bool {
        self.enabled && !self.bot_token.expose_secret().is_empty()
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{BrokerAccountId, RiskViolation};
    use uuid::Uuid;

    fn config() -> trader_core::TelegramConfig {
        trader_core::TelegramConfig {
            enabled: true,
            bot_token: "test_token".to_string(),
            chat_id: "123456".to_string(),
        }
    }

    #[test]
    fn test_format_order_filled() {
        let sender = TelegramSender::new(&config());
        let notification = Notification::new(NotificationEvent::OrderFilled {
            user_id: UserId(1),
            account_id: BrokerAccountId::new(),
            order_id: Uuid::new_v4(),
            instrument: "BTCUSDT".to_string(),
            side: Side::Buy,
            size: dec!(0.01),
            price: dec!(50000),
        });

        let message = sender.format_message(&notification);
        assert!(message.contains("주문 체결"));
        assert!(message.contains("BTCUSDT"));
        assert!(message.contains("BUY"));
    }

    #[test]
    fn test_format_divergence_shows_signed_sizes() {
        let sender = TelegramSender::new(&config());
        let notification = Notification::new(NotificationEvent::ReconciliationDivergence {
            user_id: UserId(1),
            account_id: BrokerAccountId::new(),
            instrument: "X".to_string(),
            local_size: dec!(0),
            broker_size: dec!(-2.50),
            action: "adopted".to_string(),
        });
        assert_eq!(notification.priority, NotificationPriority::Critical);

        let message = sender.format_message(&notification);
        assert!(message.contains("🚨"));
        assert!(message.contains("원장: +0"));
        assert!(message.contains("브로커: -2.5"));
    }

    #[test]
    fn test_chat_routing_and_masked_debug() {
        let sender = TelegramSender::new(&config()).with_user_chat(UserId(7), "777");
        assert_eq!(sender.chat_for(UserId(7)), "777");
        assert_eq!(sender.chat_for(UserId(8)), "123456");
        assert!(!format!("{:?}", sender).contains("test_token"));
    }

    #[tokio::test]
    async fn test_send_posts_to_bot_api() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottest_token/sendMessage")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "chat_id": "777",
                "parse_mode": "HTML",
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let sender = TelegramSender::new(&config())
            .with_user_chat(UserId(7), "777")
            .with_api_url(server.url());
        let notification = Notification::new(NotificationEvent::RiskBreach {
            user_id: UserId(7),
            instrument: "X".to_string(),
            signal_id: None,
            violation: RiskViolation::AccountDegraded,
        });
        sender.send(&notification).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/bottest_token/sendMessage")
            .with_status(429)
            .create_async()
            .await;

        let sender = TelegramSender::new(&config()).with_api_url(server.url());
        let notification = Notification::new(NotificationEvent::AccountDegraded {
            user_id: UserId(1),
            account_id: BrokerAccountId::new(),
            reason: "timeout".to_string(),
        });
        let err = sender.send(&notification).await.unwrap_err();
        assert!(matches!(err, NotificationError::RateLimited(60)));
    }
}
