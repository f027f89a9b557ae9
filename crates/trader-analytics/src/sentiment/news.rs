//! NewsAPI 헤드라인 소스.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::{RawSentiment, SentimentError, SentimentResult, SentimentSource};

/// NewsAPI 설정.
#[derive(Clone)]
pub struct NewsApiConfig {
    /// API 키
    pub api_key: SecretString,
    /// 기본 URL
    pub base_url: String,
    /// 요청당 기사 수
    pub page_size: u32,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl fmt::Debug for NewsApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewsApiConfig")
            .field("api_key", &"***REDACTED***")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl NewsApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: "https://newsapi.org".to_string(),
            page_size: 20,
            timeout_secs: 10,
        }
    }

    /// 기본 URL을 재정의합니다.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// 종목 코드를 뉴스 검색어로 변환합니다.
pub(crate) fn search_query(instrument: &str) -> String {
    let upper = instrument.to_uppercase();
    let base = ["USDT", "USDC", "BUSD", "USD"]
        .iter()
        .find_map(|quote| upper.strip_suffix(quote))
        .unwrap_or(upper.as_str());
    match base {
        "BTC" => "Bitcoin OR BTC".to_string(),
        "ETH" => "Ethereum OR ETH".to_string(),
        "XAU" => "Gold".to_string(),
        "XAG" => "Silver".to_string(),
        "EUR" => "EUR/USD OR Euro Dollar".to_string(),
        "GBP" => "GBP/USD OR Pound Dollar".to_string(),
        other => other.to_string(),
    }
}

/// NewsAPI `/v2/everything` 헤드라인 소스.
pub struct NewsApiSource {
    config: NewsApiConfig,
    client: Client,
}

impl NewsApiSource {
    pub fn new(config: NewsApiConfig) -> SentimentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SentimentSource for NewsApiSource {
    fn name(&self) -> &str {
        "newsapi"
    }

    async fn fetch(&self, instrument: &str) -> SentimentResult<RawSentiment> {
        let url = format!("{}/v2/everything", self.config.base_url);
        let query = search_query(instrument);
        let page_size = self.config.page_size.to_string();
        debug!(instrument, query = %query, "뉴스 조회");

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", self.config.api_key.expose_secret())
            .query(&[
                ("q", query.as_str()),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;

        let body = response.text().await?;
        let parsed: NewsResponse =
            serde_json::from_str(&body).map_err(|e| SentimentError::Parse(e.to_string()))?;
        if parsed.status != "ok" {
            return Err(SentimentError::Source(
                parsed.message.unwrap_or_else(|| parsed.status.clone()),
            ));
        }

        let headlines: Vec<String> = parsed
            .articles
            .into_iter()
            .filter_map(|a| {
                let text = format!(
                    "{} {}",
                    a.title.unwrap_or_default(),
                    a.description.unwrap_or_default()
                );
                let text = text.trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .collect();

        if headlines.is_empty() {
            return Err(SentimentError::Empty);
        }
        Ok(RawSentiment::Headlines(headlines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_search_query() {
        assert_eq!(search_query("BTCUSDT"), "Bitcoin OR BTC");
        assert_eq!(search_query("XAUUSD"), "Gold");
        assert_eq!(search_query("AAPL"), "AAPL");
    }

    #[tokio::test]
    async fn test_fetch_headlines() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/everything")
            .match_query(Matcher::Any)
            .match_header("X-Api-Key", "k")
            .with_status(200)
            .with_body(
                r#"{"status":"ok","articles":[{"title":"Bitcoin rallies","description":null},{"title":null,"description":null}]}"#,
            )
            .create_async()
            .await;

        let source = NewsApiSource::new(NewsApiConfig::new("k").with_base_url(server.url())).unwrap();
        let raw = source.fetch("BTCUSDT").await.unwrap();
        assert_eq!(raw, RawSentiment::Headlines(vec!["Bitcoin rallies".to_string()]));
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/everything")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"status":"error","code":"apiKeyInvalid","message":"bad key"}"#)
            .create_async()
            .await;

        let source = NewsApiSource::new(NewsApiConfig::new("k").with_base_url(server.url())).unwrap();
        assert!(matches!(
            source.fetch("ETHUSDT").await,
            Err(SentimentError::Source(msg)) if msg == "bad key"
        ));
    }
}
