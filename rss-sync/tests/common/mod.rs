#![allow(dead_code)]

use std::time::Duration;

use rss_sync::config::ApiConfig;
use rss_sync::{ApiClient, ReadOptions, SyncClient};
use serde_json::{json, Value};
use wiremock::MockServer;

pub const CREATED_AT: &str = "2024-10-21T07:28:00Z";
// how the backend renders columns stored without a zone
pub const NAIVE_CREATED_AT: &str = "2024-10-21T07:28:00.123456";

pub fn api_for(server: &MockServer) -> ApiClient {
    let config = ApiConfig {
        base_url: format!("{}/api/v1", server.uri()),
        request_timeout_seconds: 5,
        ..ApiConfig::default()
    };
    ApiClient::new(&config).expect("api client")
}

pub fn read_options() -> ReadOptions {
    ReadOptions {
        stale_time: Duration::from_secs(30),
        placeholder_previous: false,
        retry: true,
    }
}

pub fn client_for(server: &MockServer) -> SyncClient {
    SyncClient::with_api(api_for(server), read_options(), read_options())
}

pub fn article(id: i64) -> Value {
    json!({
        "id": id,
        "feed_id": 1,
        "guid": format!("guid-{id}"),
        "title": format!("Article {id}"),
        "url": format!("http://example.com/{id}"),
        "author": null,
        "content": "",
        "published_at": CREATED_AT,
        "is_read": false,
        "is_starred": false,
        "created_at": NAIVE_CREATED_AT,
    })
}

pub fn article_with(id: i64, patch: Value) -> Value {
    let mut value = article(id);
    if let (Some(target), Some(fields)) = (value.as_object_mut(), patch.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    value
}

pub fn summary(id: i64, article_id: i64, created_at: &str) -> Value {
    json!({
        "id": id,
        "article_id": article_id,
        "llm_provider": "anthropic",
        "llm_model": "claude-3-haiku",
        "summary_text": format!("summary of {article_id}"),
        "key_points": ["one", "two"],
        "token_usage": 120,
        "created_at": created_at,
    })
}

pub fn page(items: Vec<Value>, total: u64, page: u32) -> Value {
    json!({
        "items": items,
        "total": total,
        "page": page,
        "page_size": 20,
    })
}

pub fn articles(ids: impl IntoIterator<Item = i64>) -> Vec<Value> {
    ids.into_iter().map(article).collect()
}

pub fn digest(id: i64, period_type: &str, start: &str, end: &str) -> Value {
    json!({
        "id": id,
        "period_type": period_type,
        "period_start": start,
        "period_end": end,
        "content": format!("digest {id}"),
        "article_count": 12,
        "llm_provider": "openai",
        "llm_model": "gpt-4o-mini",
        "created_at": NAIVE_CREATED_AT,
    })
}
