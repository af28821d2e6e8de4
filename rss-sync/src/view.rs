use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::{ApiClient, ArticleQuery};
use crate::cache::{QueryCache, QueryKey, QueryResult, ReadOptions, ResourceType};
use crate::error::SyncError;
use crate::models::{Article, ArticleId, ArticlePage};
use crate::notify::Notifier;
use crate::overlay::{ArticleView, SummaryOverlay};
use crate::pagination::{FilterState, PaginationController};

type PageFuture = BoxFuture<'static, Result<ArticlePage, SyncError>>;

pub fn detail_key(id: ArticleId) -> QueryKey {
    QueryKey::new(ResourceType::ArticleDetail).with("id", id)
}

/// What the article list should render right now.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleListState {
    pub items: Vec<ArticleView>,
    pub total: Option<u64>,
    pub page: u32,
    pub total_pages: Option<u32>,
    pub is_loading: bool,
    pub is_placeholder: bool,
    pub error: Option<SyncError>,
}

impl ArticleListState {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Current(ArticleListState),
    /// Filters or page changed while the fetch was on the wire; the result
    /// stays cached but is not the active view.
    Superseded(QueryKey),
}

/// The paginated, filterable article list: pagination state, cache reads,
/// and overlay merging in one place.
#[derive(Debug, Clone)]
pub struct ArticleListView {
    api: ApiClient,
    cache: QueryCache,
    overlay: SummaryOverlay,
    notifier: Notifier,
    options: ReadOptions,
    pager: Arc<RwLock<PaginationController>>,
}

impl ArticleListView {
    pub fn new(
        api: ApiClient,
        cache: QueryCache,
        overlay: SummaryOverlay,
        notifier: Notifier,
        options: ReadOptions,
        pager: PaginationController,
    ) -> Self {
        Self {
            api,
            cache,
            overlay,
            notifier,
            options,
            pager: Arc::new(RwLock::new(pager)),
        }
    }

    pub async fn pagination(&self) -> PaginationController {
        self.pager.read().await.clone()
    }

    pub async fn active_key(&self) -> QueryKey {
        self.pager.read().await.derive_key()
    }

    pub async fn set_filters(&self, next: FilterState) {
        self.pager.write().await.set_filters(next);
    }

    pub async fn update_filters(&self, f: impl FnOnce(&mut FilterState)) {
        self.pager.write().await.update_filters(f);
    }

    pub async fn set_page(&self, page: u32) -> u32 {
        self.pager.write().await.set_page(page)
    }

    pub async fn url_query(&self) -> String {
        self.pager.read().await.to_url_query()
    }

    /// Resolves the active page. A page that fell past the end because the
    /// total shrank is clamped and fetched again instead of shown empty.
    pub async fn load(&self) -> LoadOutcome {
        self.load_with(self.options).await
    }

    /// Like [`load`](Self::load) but always waits for the network instead of
    /// answering with placeholder data.
    pub async fn load_awaited(&self) -> LoadOutcome {
        let options = ReadOptions {
            placeholder_previous: false,
            ..self.options
        };
        self.load_with(options).await
    }

    async fn load_with(&self, options: ReadOptions) -> LoadOutcome {
        loop {
            let (key, query) = {
                let pager = self.pager.read().await;
                (pager.derive_key(), pager.query())
            };

            let result = self
                .cache
                .read(key.clone(), options, self.fetcher(query))
                .await;

            let snapshot = {
                let mut pager = self.pager.write().await;
                if pager.derive_key() != key {
                    debug!(key = %key, "discarding response for inactive key");
                    return LoadOutcome::Superseded(key);
                }
                if let Some(page) = result.data.as_ref().filter(|_| !result.is_placeholder) {
                    if pager.apply_total(page.total) {
                        continue;
                    }
                }
                pager.clone()
            };

            if result.is_placeholder {
                self.report_background_failure(key);
            } else if let Some(err) = &result.error {
                self.notifier.error("Could not load articles", err);
            }
            return LoadOutcome::Current(self.state_from(&snapshot, result).await);
        }
    }

    // The placeholder answer went out before the refresh finished, so its
    // failure is reported once it lands.
    fn report_background_failure(&self, key: QueryKey) {
        let cache = self.cache.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Some(err) = cache.settled_error(&key).await {
                notifier.error("Could not load articles", &err);
            }
        });
    }

    // Reconciliation runs inside the fetch so background refreshes hand
    // overlay entries over to server data too.
    fn fetcher(&self, query: ArticleQuery) -> impl Fn() -> PageFuture + Send + Sync + 'static {
        let api = self.api.clone();
        let overlay = self.overlay.clone();
        move || {
            let api = api.clone();
            let overlay = overlay.clone();
            let query = query.clone();
            async move {
                let page = api.list_articles(&query).await?;
                overlay.reconcile(&page.items).await;
                Ok(page)
            }
            .boxed()
        }
    }

    async fn state_from(
        &self,
        pager: &PaginationController,
        result: QueryResult<ArticlePage>,
    ) -> ArticleListState {
        let items = match &result.data {
            Some(page) => self.overlay.merge(&page.items).await,
            None => Vec::new(),
        };
        ArticleListState {
            items,
            total: pager.total(),
            page: pager.page(),
            total_pages: pager.total_pages(),
            is_loading: result.is_loading,
            is_placeholder: result.is_placeholder,
            error: result.error,
        }
    }

    /// Loads the detail copy of one article. It is patched by toggles like
    /// the list pages are.
    pub async fn open_article(&self, id: ArticleId) -> QueryResult<Article> {
        let api = self.api.clone();
        let options = ReadOptions {
            placeholder_previous: false,
            ..self.options
        };
        let result = self
            .cache
            .read(detail_key(id), options, move || {
                let api = api.clone();
                async move { api.get_article(id).await }
            })
            .await;
        if let Some(err) = &result.error {
            self.notifier.error("Could not load article", err);
        }
        result
    }
}
