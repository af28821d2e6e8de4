use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::api::ApiClient;
use crate::cache::{QueryCache, ResourceType};
use crate::error::Result;
use crate::models::{Article, ArticleId};
use crate::notify::Notifier;
use crate::overlay::SummaryOverlay;

/// Aggregate result of one batch dispatch. Per-article completion shows up
/// later through list refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub requested: u32,
    pub queued: u32,
    pub already_done: u32,
}

#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    api: ApiClient,
    cache: QueryCache,
    overlay: SummaryOverlay,
    notifier: Notifier,
}

impl BatchDispatcher {
    pub fn new(api: ApiClient, cache: QueryCache, overlay: SummaryOverlay, notifier: Notifier) -> Self {
        Self {
            api,
            cache,
            overlay,
            notifier,
        }
    }

    /// Sends the ids in `ids` that are not known to be summarized already,
    /// judged against the overlay and the `visible` page. On failure nothing
    /// is queued or invalidated and the same set can be dispatched again.
    pub async fn dispatch(
        &self,
        ids: &BTreeSet<ArticleId>,
        visible: &[Article],
    ) -> Result<BatchOutcome> {
        let mut to_send = Vec::with_capacity(ids.len());
        let mut skipped = 0u32;
        for &id in ids {
            let on_page = visible
                .iter()
                .any(|article| article.id == id && article.summary.is_some());
            if on_page || self.overlay.contains(id).await {
                skipped += 1;
            } else {
                to_send.push(id);
            }
        }

        if to_send.is_empty() {
            debug!(skipped, "nothing to summarize");
            return Ok(BatchOutcome {
                requested: 0,
                queued: 0,
                already_done: skipped,
            });
        }

        let response = match self.api.batch_summarize(&to_send).await {
            Ok(response) => response,
            Err(err) => {
                self.notifier.error("Batch summarization failed", &err);
                return Err(err);
            }
        };

        self.overlay.mark_pending(to_send.iter().copied()).await;
        self.cache.invalidate(ResourceType::Articles).await;

        let outcome = BatchOutcome {
            requested: response.requested,
            queued: response.queued,
            already_done: skipped + response.already_summarized,
        };
        info!(
            requested = outcome.requested,
            queued = outcome.queued,
            already_done = outcome.already_done,
            "batch summarization dispatched"
        );
        self.notifier.info(format!(
            "{} article(s) queued for summarization, {} already done",
            outcome.queued, outcome.already_done
        ));
        Ok(outcome)
    }

    /// Dispatches every article of `visible` that has no summary yet.
    pub async fn dispatch_page(&self, visible: &[Article]) -> Result<BatchOutcome> {
        let ids: BTreeSet<ArticleId> = visible.iter().map(|article| article.id).collect();
        self.dispatch(&ids, visible).await
    }
}
