use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ConfigError, Result, SyncError};
use crate::models::{
    Article, ArticleId, ArticlePage, BatchSummarizeRequest, BatchSummarizeResponse,
    DigestGenerateRequest, DigestId, DigestReport, Feed, FeedFetchResult, FeedId, FetchAllResult,
    MutationKind, OpmlImportResult, PeriodType, Summary, TaskRunResult,
};

/// Query string for `GET /articles`. `None` fields are left off the wire.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ArticleQuery {
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<FeedId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_starred: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Serialize)]
struct PeriodQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    period_type: Option<PeriodType>,
}

#[derive(Serialize)]
struct CategoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    category_id: Option<i64>,
}

/// Thin typed wrapper over the dashboard REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> std::result::Result<Self, ConfigError> {
        let http = ClientBuilder::new()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base: config.base_url()?,
        })
    }

    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| SyncError::Validation(format!("bad path {path:?}: {e}")))?;
        debug!(%method, %url, "api request");
        Ok(self.http.request(method, url))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "request did not reach the server");
            SyncError::Network(e.to_string())
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        warn!(status = status.as_u16(), %detail, "api returned an error");
        Err(SyncError::from_status(status.as_u16(), detail))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        let bytes = response.bytes().await.map_err(SyncError::from)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_articles(&self, query: &ArticleQuery) -> Result<ArticlePage> {
        let req = self.request(Method::GET, "articles")?.query(query);
        self.send_json(req).await
    }

    pub async fn get_article(&self, id: ArticleId) -> Result<Article> {
        let req = self.request(Method::GET, &format!("articles/{id}"))?;
        self.send_json(req).await
    }

    pub async fn toggle(&self, id: ArticleId, kind: MutationKind) -> Result<Article> {
        let path = format!("articles/{id}/{}", kind.path_segment());
        let req = self.request(Method::PUT, &path)?;
        self.send_json(req).await
    }

    pub async fn toggle_read(&self, id: ArticleId) -> Result<Article> {
        self.toggle(id, MutationKind::ToggleRead).await
    }

    pub async fn toggle_star(&self, id: ArticleId) -> Result<Article> {
        self.toggle(id, MutationKind::ToggleStar).await
    }

    pub async fn summarize_article(&self, id: ArticleId) -> Result<Summary> {
        let req = self.request(Method::POST, &format!("summaries/article/{id}"))?;
        self.send_json(req).await
    }

    /// `Ok(None)` when the server has no summary for the article yet.
    pub async fn get_article_summary(&self, id: ArticleId) -> Result<Option<Summary>> {
        let req = self.request(Method::GET, &format!("summaries/article/{id}"))?;
        match self.send_json(req).await {
            Ok(summary) => Ok(Some(summary)),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn batch_summarize(&self, ids: &[ArticleId]) -> Result<BatchSummarizeResponse> {
        let body = BatchSummarizeRequest {
            article_ids: ids.to_vec(),
        };
        let req = self.request(Method::POST, "summaries/batch")?.json(&body);
        self.send_json(req).await
    }

    pub async fn list_digests(&self, period: Option<PeriodType>) -> Result<Vec<DigestReport>> {
        let req = self
            .request(Method::GET, "summaries/digests")?
            .query(&PeriodQuery {
                period_type: period,
            });
        self.send_json(req).await
    }

    pub async fn get_digest(&self, id: DigestId) -> Result<DigestReport> {
        let req = self.request(Method::GET, &format!("summaries/digests/{id}"))?;
        self.send_json(req).await
    }

    pub async fn generate_digest(&self, params: &DigestGenerateRequest) -> Result<DigestReport> {
        let req = self
            .request(Method::POST, "summaries/digests/generate")?
            .json(params);
        self.send_json(req).await
    }

    pub async fn list_feeds(&self, category_id: Option<i64>) -> Result<Vec<Feed>> {
        let req = self
            .request(Method::GET, "feeds")?
            .query(&CategoryQuery { category_id });
        self.send_json(req).await
    }

    pub async fn fetch_feed(&self, id: FeedId) -> Result<FeedFetchResult> {
        let req = self.request(Method::POST, &format!("feeds/{id}/fetch"))?;
        self.send_json(req).await
    }

    pub async fn fetch_all_feeds(&self) -> Result<FetchAllResult> {
        let req = self.request(Method::POST, "feeds/fetch-all")?;
        self.send_json(req).await
    }

    pub async fn import_opml(&self, file_name: &str, content: String) -> Result<OpmlImportResult> {
        let part = reqwest::multipart::Part::text(content)
            .file_name(file_name.to_string())
            .mime_str("text/xml")
            .map_err(|e| SyncError::Validation(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let req = self.request(Method::POST, "opml/import")?.multipart(form);
        self.send_json(req).await
    }

    pub async fn export_opml(&self) -> Result<String> {
        let req = self.request(Method::GET, "opml/export")?;
        let response = self.send(req).await?;
        response.text().await.map_err(SyncError::from)
    }

    pub async fn run_task(&self, task_id: i64) -> Result<TaskRunResult> {
        let req = self.request(Method::POST, &format!("tasks/{task_id}/run"))?;
        self.send_json(req).await
    }
}

// FastAPI errors look like {"detail": "..."} or {"detail": [{...}, ...]}.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
