use tokio::sync::broadcast;
use tracing::info;

use crate::api::ApiClient;
use crate::batch::BatchDispatcher;
use crate::cache::{QueryCache, QueryKey, QueryResult, ReadOptions, ResourceType};
use crate::config::SyncConfig;
use crate::digest::DigestInsertionController;
use crate::error::{ConfigError, Result};
use crate::models::{Feed, FeedFetchResult, FeedId, FetchAllResult, OpmlImportResult, TaskRunResult};
use crate::mutation::MutationCoordinator;
use crate::notify::{Notification, Notifier};
use crate::overlay::SummaryOverlay;
use crate::pagination::PaginationController;
use crate::summarize::Summarizer;
use crate::view::ArticleListView;

/// Owns the shared state (cache, overlay, notifier) and hands out the
/// per-concern controllers wired against it.
#[derive(Debug, Clone)]
pub struct SyncClient {
    api: ApiClient,
    cache: QueryCache,
    overlay: SummaryOverlay,
    notifier: Notifier,
    list_options: ReadOptions,
    read_options: ReadOptions,
    mutations: MutationCoordinator,
}

impl SyncClient {
    pub fn from_config(config: &SyncConfig) -> std::result::Result<Self, ConfigError> {
        let api = ApiClient::new(&config.api)?;
        let read_options = ReadOptions {
            stale_time: config.cache.stale_time(),
            placeholder_previous: false,
            retry: config.cache.retry_reads,
        };
        let list_options = ReadOptions {
            placeholder_previous: config.ui.placeholder_previous,
            ..read_options
        };
        let mut client = Self::with_api(api, read_options, list_options);
        client.overlay =
            SummaryOverlay::with_pending_timeout(config.cache.summary_pending_timeout());
        Ok(client)
    }

    pub fn with_api(api: ApiClient, read_options: ReadOptions, list_options: ReadOptions) -> Self {
        let cache = QueryCache::new();
        let notifier = Notifier::default();
        let mutations = MutationCoordinator::new(api.clone(), cache.clone(), notifier.clone());
        Self {
            api,
            cache,
            overlay: SummaryOverlay::new(),
            notifier,
            list_options,
            read_options,
            mutations,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn overlay(&self) -> &SummaryOverlay {
        &self.overlay
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn article_list(&self, pager: PaginationController) -> ArticleListView {
        ArticleListView::new(
            self.api.clone(),
            self.cache.clone(),
            self.overlay.clone(),
            self.notifier.clone(),
            self.list_options,
            pager,
        )
    }

    pub fn summarizer(&self) -> Summarizer {
        Summarizer::new(
            self.api.clone(),
            self.cache.clone(),
            self.overlay.clone(),
            self.notifier.clone(),
        )
    }

    pub fn batch(&self) -> BatchDispatcher {
        BatchDispatcher::new(
            self.api.clone(),
            self.cache.clone(),
            self.overlay.clone(),
            self.notifier.clone(),
        )
    }

    /// Shared coordinator, so per-article serialization holds across callers.
    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn digests(&self) -> DigestInsertionController {
        DigestInsertionController::new(
            self.api.clone(),
            self.cache.clone(),
            self.notifier.clone(),
            self.read_options,
        )
    }

    pub async fn feeds(&self) -> QueryResult<Vec<Feed>> {
        let api = self.api.clone();
        let result = self
            .cache
            .read(QueryKey::new(ResourceType::Feeds), self.read_options, move || {
                let api = api.clone();
                async move { api.list_feeds(None).await }
            })
            .await;
        if let Some(err) = &result.error {
            self.notifier.error("Could not load feeds", err);
        }
        result
    }

    pub async fn fetch_feed(&self, id: FeedId) -> Result<FeedFetchResult> {
        let result = self.api.fetch_feed(id).await;
        self.after_ingest(result, "Feed fetch failed", |r| {
            format!("{} new article(s) from feed {}", r.new_articles, r.feed_id)
        })
        .await
    }

    pub async fn fetch_all_feeds(&self) -> Result<FetchAllResult> {
        let result = self.api.fetch_all_feeds().await;
        self.after_ingest(result, "Fetching feeds failed", |r| {
            format!(
                "{} feed(s) fetched, {} new article(s)",
                r.feeds_processed, r.new_articles
            )
        })
        .await
    }

    pub async fn run_task(&self, task_id: i64) -> Result<TaskRunResult> {
        let result = self.api.run_task(task_id).await;
        self.after_ingest(result, "Task run failed", |r| r.message.clone())
            .await
    }

    pub async fn import_opml(&self, file_name: &str, content: String) -> Result<OpmlImportResult> {
        let result = self.api.import_opml(file_name, content).await;
        self.after_ingest(result, "OPML import failed", |r| {
            format!(
                "Imported {} feed(s) and {} categor(ies)",
                r.feeds_created, r.categories_created
            )
        })
        .await
    }

    pub async fn export_opml(&self) -> Result<String> {
        self.api.export_opml().await.map_err(|err| {
            self.notifier.error("OPML export failed", &err);
            err
        })
    }

    // Anything that can add articles or feeds server-side makes both lists stale.
    async fn after_ingest<T>(
        &self,
        result: Result<T>,
        context: &str,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.cache.invalidate(ResourceType::Articles).await;
                self.cache.invalidate(ResourceType::Feeds).await;
                let message = describe(&value);
                info!(%message, "server-side ingest finished");
                self.notifier.info(message);
                Ok(value)
            }
            Err(err) => {
                self.notifier.error(context, &err);
                Err(err)
            }
        }
    }
}
