//! 헤드라인 키워드 사전 점수화와 중복 제거.

use std::collections::HashSet;

const POSITIVE: &[&str] = &[
    "bull", "bullish", "rally", "rallies", "surge", "surges", "soar", "soars", "gain", "gains",
    "record", "high", "growth", "beat", "beats", "upgrade", "upgraded", "strong", "optimism",
    "optimistic", "breakout", "adoption", "approval", "approved", "profit", "rebound", "buy",
];

const NEGATIVE: &[&str] = &[
    "bear", "bearish", "crash", "crashes", "plunge", "plunges", "drop", "drops", "fall", "falls",
    "loss", "losses", "low", "weak", "downgrade", "downgraded", "miss", "misses", "fear",
    "selloff", "sell-off", "hack", "hacked", "ban", "lawsuit", "fraud", "recession", "sell",
];

/// 헤드라인 중복 판정 임계값 (단어 집합 Jaccard 유사도).
pub const DUPLICATE_THRESHOLD: f64 = 0.8;

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// 텍스트 감성 점수 [-1, 1]. 사전 단어가 없으면 0.
pub fn score_text(text: &str) -> f64 {
    let mut positive = 0usize;
    let mut negative = 0usize;
    for word in tokens(text) {
        if POSITIVE.contains(&word.as_str()) {
            positive += 1;
        } else if NEGATIVE.contains(&word.as_str()) {
            negative += 1;
        }
    }
    let total = positive + negative;
    if total == 0 {
        0.0
    } else {
        (positive as f64 - negative as f64) / total as f64
    }
}

/// 두 텍스트 단어 집합의 Jaccard 유사도.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = tokens(a).into_iter().collect();
    let b: HashSet<String> = tokens(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

/// 거의 같은 헤드라인을 제거합니다. 먼저 나온 헤드라인을 남깁니다.
pub fn dedupe_headlines(headlines: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for headline in headlines {
        let trimmed = headline.trim();
        if trimmed.is_empty() {
            continue;
        }
        if unique
            .iter()
            .all(|seen| jaccard(seen, trimmed) <= DUPLICATE_THRESHOLD)
        {
            unique.push(trimmed.to_string());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_text() {
        assert_eq!(score_text("Bitcoin rallies on ETF approval"), 1.0);
        assert_eq!(score_text("Exchange hacked, prices plunge"), -1.0);
        assert_eq!(score_text("Markets open"), 0.0);
        assert_eq!(score_text("Gains erased as stocks fall"), 0.0);
    }

    #[test]
    fn test_near_duplicates_removed() {
        let headlines = vec![
            "Ethereum upgrade goes live today".to_string(),
            "Ethereum upgrade goes live today.".to_string(),
            "Ethereum upgrade delayed again".to_string(),
            "   ".to_string(),
        ];
        let unique = dedupe_headlines(&headlines);
        assert_eq!(unique.len(), 2);
    }
}
