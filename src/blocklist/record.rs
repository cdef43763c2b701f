//! Block records and failure classification.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse category of the failure that led to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockErrorType {
    Cloudflare,
    Captcha,
    Authentication,
    RateLimit,
    InvalidFormat,
    Timeout,
    Other,
}

impl BlockErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::Captcha => "captcha",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::InvalidFormat => "invalid_format",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for BlockErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloudflare" => Ok(Self::Cloudflare),
            "captcha" => Ok(Self::Captcha),
            "authentication" => Ok(Self::Authentication),
            "rate_limit" => Ok(Self::RateLimit),
            "invalid_format" => Ok(Self::InvalidFormat),
            "timeout" => Ok(Self::Timeout),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown block error type: {}", other)),
        }
    }
}

impl std::fmt::Display for BlockErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static RATE_LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests")
        .expect("rate limit pattern should compile")
});

static AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b40[13]\b|forbidden|unauthori[sz]ed|access denied")
        .expect("auth pattern should compile")
});

static TIMEOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)time[d ]?\s?out")
        .expect("timeout pattern should compile")
});

static FORMAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)invalid|pars(e|ing)|format|unexpected token")
        .expect("format pattern should compile")
});

/// Classify a free-form failure message.
///
/// Specific signatures (Cloudflare, CAPTCHA) win over status-code keywords,
/// since challenge pages are usually served with a 403 or 503.
pub fn classify_error(message: &str) -> BlockErrorType {
    let lower = message.to_lowercase();

    if lower.contains("cloudflare") || lower.contains("cf-ray") {
        BlockErrorType::Cloudflare
    } else if lower.contains("captcha") {
        BlockErrorType::Captcha
    } else if RATE_LIMIT_PATTERN.is_match(message) {
        BlockErrorType::RateLimit
    } else if AUTH_PATTERN.is_match(message) {
        BlockErrorType::Authentication
    } else if TIMEOUT_PATTERN.is_match(message) {
        BlockErrorType::Timeout
    } else if FORMAT_PATTERN.is_match(message) {
        BlockErrorType::InvalidFormat
    } else {
        BlockErrorType::Other
    }
}

/// Failure history for one domain.
///
/// Present from the first recorded failure; `attempt_count >= 1` while the
/// record exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub domain: String,
    /// Most recent failure message.
    pub reason: String,
    pub error_type: BlockErrorType,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub is_temporary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl BlockRecord {
    pub fn new(domain: &str, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            reason: reason.to_string(),
            error_type: classify_error(reason),
            first_failed_at: now,
            last_attempt_at: now,
            attempt_count: 0,
            is_temporary: true,
            cooldown_until: None,
        }
    }

    /// Permanently blocked; only a manual unblock clears it.
    pub fn is_permanent(&self) -> bool {
        !self.is_temporary
    }

    /// Whether requests to this domain should be skipped at `now`.
    pub fn blocks_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_permanent() {
            return true;
        }
        self.cooldown_until.is_some_and(|until| until > now)
    }

    /// Short human-readable state label.
    pub fn state_label(&self, now: DateTime<Utc>) -> &'static str {
        if self.is_permanent() {
            "permanent"
        } else if self.blocks_at(now) {
            "cooldown"
        } else {
            "watching"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        assert_eq!(classify_error("403 Forbidden"), BlockErrorType::Authentication);
        assert_eq!(classify_error("HTTP 401"), BlockErrorType::Authentication);
        assert_eq!(classify_error("429 Too Many Requests"), BlockErrorType::RateLimit);
        assert_eq!(classify_error("hit the rate limit"), BlockErrorType::RateLimit);
        assert_eq!(classify_error("request timed out"), BlockErrorType::Timeout);
        assert_eq!(classify_error("operation timeout"), BlockErrorType::Timeout);
        assert_eq!(classify_error("CAPTCHA required"), BlockErrorType::Captcha);
        assert_eq!(classify_error("failed to parse JSON"), BlockErrorType::InvalidFormat);
        assert_eq!(classify_error("connection reset"), BlockErrorType::Other);
    }

    #[test]
    fn test_cloudflare_wins_over_status() {
        assert_eq!(
            classify_error("403 Forbidden: Cloudflare challenge"),
            BlockErrorType::Cloudflare
        );
        assert_eq!(
            classify_error("503 captcha page"),
            BlockErrorType::Captcha
        );
    }

    #[test]
    fn test_status_codes_need_word_boundaries() {
        assert_eq!(classify_error("recipe 14031 missing"), BlockErrorType::Other);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let mut record = BlockRecord::new("site.com", "403 Forbidden", now);
        record.attempt_count = 1;
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["errorType"], "authentication");
        assert_eq!(json["attemptCount"], 1);
        assert_eq!(json["isTemporary"], true);
        assert!(json.get("cooldownUntil").is_none());
        assert!(json.get("firstFailedAt").is_some());

        let back: BlockRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_blocks_at() {
        let now = Utc::now();
        let mut record = BlockRecord::new("site.com", "timeout", now);
        assert!(!record.blocks_at(now));

        record.cooldown_until = Some(now + chrono::Duration::minutes(5));
        assert!(record.blocks_at(now));
        assert!(!record.blocks_at(now + chrono::Duration::minutes(6)));

        record.is_temporary = false;
        record.cooldown_until = None;
        assert!(record.blocks_at(now + chrono::Duration::days(30)));
    }
}
