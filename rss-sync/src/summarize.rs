use tracing::{debug, info};

use crate::api::ApiClient;
use crate::cache::{QueryCache, QueryKey, ResourceType};
use crate::error::Result;
use crate::models::{ArticleId, Summary};
use crate::notify::Notifier;
use crate::overlay::SummaryOverlay;

/// Single-article summarization and the per-article presence check.
#[derive(Debug, Clone)]
pub struct Summarizer {
    api: ApiClient,
    cache: QueryCache,
    overlay: SummaryOverlay,
    notifier: Notifier,
}

impl Summarizer {
    pub fn new(api: ApiClient, cache: QueryCache, overlay: SummaryOverlay, notifier: Notifier) -> Self {
        Self {
            api,
            cache,
            overlay,
            notifier,
        }
    }

    /// Requests a summary for `article_id`. The id is pending while the
    /// request runs; only a successful result reaches the overlay.
    pub async fn summarize(&self, article_id: ArticleId) -> Result<Summary> {
        self.overlay.mark_pending([article_id]).await;
        match self.api.summarize_article(article_id).await {
            Ok(summary) => {
                info!(article_id, summary_id = summary.id, "article summarized");
                self.overlay.put(article_id, summary.clone()).await;
                self.cache
                    .write(summary_key(article_id), Some(summary.clone()))
                    .await;
                Ok(summary)
            }
            Err(err) => {
                self.overlay.clear_pending(article_id).await;
                self.notifier.error("Summarization failed", &err);
                Err(err)
            }
        }
    }

    /// Asks the server whether it already holds a summary for `article_id`.
    /// A found summary confirms (and evicts) the matching overlay entry; a
    /// missing one ends the pending state of the id.
    pub async fn check_summary(&self, article_id: ArticleId) -> Result<Option<Summary>> {
        let found = self.api.get_article_summary(article_id).await?;
        match &found {
            Some(server) => {
                if self.overlay.confirm(article_id, server).await {
                    debug!(article_id, "overlay summary confirmed by presence check");
                }
            }
            // nothing is coming for a queued id the server has no summary for
            None => self.overlay.clear_pending(article_id).await,
        }
        self.cache.write(summary_key(article_id), found.clone()).await;
        Ok(found)
    }

    /// Summary to show for `article_id`: the overlay first, then the last
    /// presence check.
    pub async fn current(&self, article_id: ArticleId) -> Option<Summary> {
        match self.overlay.get(article_id).await {
            Some(local) => Some(local),
            None => self
                .cache
                .peek::<Option<Summary>>(&summary_key(article_id))
                .await
                .flatten(),
        }
    }
}

pub(crate) fn summary_key(article_id: ArticleId) -> QueryKey {
    QueryKey::new(ResourceType::ArticleSummary).with("article_id", article_id)
}
