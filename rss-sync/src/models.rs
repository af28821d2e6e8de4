use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub type ArticleId = i64;
pub type FeedId = i64;
pub type DigestId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: ArticleId,
    pub feed_id: FeedId,
    #[serde(default)]
    pub guid: String,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub published_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_starred: bool,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    /// Present only when the backend embeds the current summary in list
    /// responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

impl Article {
    pub fn flag(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::ToggleRead => self.is_read,
            MutationKind::ToggleStar => self.is_starred,
        }
    }

    pub fn set_flag(&mut self, kind: MutationKind, value: bool) {
        match kind {
            MutationKind::ToggleRead => self.is_read = value,
            MutationKind::ToggleStar => self.is_starred = value,
        }
    }
}

/// One page of the article list, as returned by `GET /articles`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticlePage {
    pub items: Vec<Article>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl ArticlePage {
    pub fn total_pages(&self) -> u32 {
        total_pages(self.total, self.page_size)
    }
}

pub fn total_pages(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub id: i64,
    pub article_id: ArticleId,
    pub llm_provider: ProviderType,
    pub llm_model: String,
    pub summary_text: String,
    pub key_points: Option<Vec<String>>,
    pub token_usage: Option<u32>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(PeriodType::Daily),
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            other => Err(SyncError::Validation(format!(
                "period_type must be one of: daily, weekly, monthly (got {other:?})"
            ))),
        }
    }
}

/// LLM backends the server may report as the producer of a summary or digest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Openai,
    Zhipu,
    Doubao,
    Minimax,
    OpenaiCompat,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestReport {
    pub id: DigestId,
    pub period_type: PeriodType,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub period_start: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub period_end: DateTime<Utc>,
    pub content: String,
    pub article_count: u32,
    pub llm_provider: ProviderType,
    pub llm_model: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

impl DigestReport {
    /// Half-open: `period_start <= at < period_end`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.period_start <= at && at < self.period_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestGenerateRequest {
    pub period_type: PeriodType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl DigestGenerateRequest {
    pub fn for_period(period_type: PeriodType) -> Self {
        Self {
            period_type,
            start_date: None,
            end_date: None,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(SyncError::Validation(format!(
                    "start_date {start} must be before end_date {end}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummarizeRequest {
    pub article_ids: Vec<ArticleId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BatchSummarizeResponse {
    pub requested: u32,
    pub queued: u32,
    pub already_summarized: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub category_id: Option<i64>,
    pub is_active: bool,
    pub fetch_interval_minutes: u32,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub last_fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub article_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedFetchResult {
    pub feed_id: FeedId,
    pub new_articles: u32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchAllResult {
    pub feeds_processed: u32,
    pub new_articles: u32,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpmlImportResult {
    pub feeds_created: u32,
    pub categories_created: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRunResult {
    pub success: bool,
    pub message: String,
}

/// Backend timestamps come either as RFC 3339 or, for columns stored
/// without a zone, as naive ISO 8601 that is taken to be UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}"))),
                None => Ok(None),
            }
        }
    }
}

/// The two in-place toggles an article supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    ToggleRead,
    ToggleStar,
}

impl MutationKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            MutationKind::ToggleRead => "read",
            MutationKind::ToggleStar => "star",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(45, 20), 3);
        assert_eq!(total_pages(40, 20), 2);
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(1, 20), 1);
    }

    #[test]
    fn period_type_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<PeriodType>().unwrap(), PeriodType::Weekly);
        assert!("yearly".parse::<PeriodType>().is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = serde_json::from_str::<ProviderType>("\"mystery\"");
        assert!(err.is_err());
        let ok: ProviderType = serde_json::from_str("\"openai_compat\"").unwrap();
        assert_eq!(ok, ProviderType::OpenaiCompat);
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let expected: DateTime<Utc> = "2024-10-21T07:28:00.123456Z".parse().unwrap();
        assert_eq!(timestamp::parse("2024-10-21T07:28:00.123456"), Some(expected));
        assert_eq!(timestamp::parse("2024-10-21 07:28:00.123456"), Some(expected));
        assert_eq!(
            timestamp::parse("2024-10-21T09:28:00+02:00"),
            Some("2024-10-21T07:28:00Z".parse().unwrap())
        );
        assert_eq!(
            timestamp::parse("2024-10-21T07:28:00"),
            Some("2024-10-21T07:28:00Z".parse().unwrap())
        );
        assert_eq!(timestamp::parse("yesterday"), None);
    }

    #[test]
    fn feed_without_fetch_time_decodes() {
        let feed: Feed = serde_json::from_value(serde_json::json!({
            "id": 1,
            "url": "http://example.com/feed.xml",
            "title": "Feed",
            "description": null,
            "site_url": null,
            "category_id": null,
            "is_active": true,
            "fetch_interval_minutes": 60,
        }))
        .unwrap();
        assert_eq!(feed.last_fetched_at, None);
    }

    #[test]
    fn generate_request_rejects_inverted_range() {
        let mut req = DigestGenerateRequest::for_period(PeriodType::Daily);
        req.start_date = Some("2024-10-02T00:00:00Z".parse().unwrap());
        req.end_date = Some("2024-10-01T00:00:00Z".parse().unwrap());
        assert!(req.validate().is_err());
    }
}
