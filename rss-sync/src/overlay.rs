//! Locally produced summaries that the paginated article list does not show
//! yet.
//!
//! The overlay only ever holds summaries the server already returned to us.
//! Ids whose summary is still being produced live in a separate pending set
//! until a summary shows up, the presence check finds none, or the pending
//! mark times out. An entry is dropped as soon as a canonical fetch shows the
//! server copy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{Article, ArticleId, Summary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    Server,
    Overlay,
}

/// An article as it should be rendered: server data merged with local
/// knowledge.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleView {
    pub article: Article,
    pub summary: Option<Summary>,
    pub summary_source: Option<SummarySource>,
    pub summary_pending: bool,
}

pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct OverlayState {
    summaries: HashMap<ArticleId, Summary>,
    // when each id was handed to the server for summarization
    pending: HashMap<ArticleId, Instant>,
}

#[derive(Debug, Clone)]
pub struct SummaryOverlay {
    inner: Arc<RwLock<OverlayState>>,
    pending_timeout: Duration,
}

impl Default for SummaryOverlay {
    fn default() -> Self {
        Self::with_pending_timeout(DEFAULT_PENDING_TIMEOUT)
    }
}

impl OverlayState {
    fn pending_at(&self, article_id: ArticleId, timeout: Duration) -> bool {
        self.pending
            .get(&article_id)
            .is_some_and(|since| since.elapsed() < timeout)
    }
}

// The server copy supersedes ours when it is the same summary or a newer one.
fn confirms(server: &Summary, local: &Summary) -> bool {
    server.id == local.id || server.created_at >= local.created_at
}

impl SummaryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pending mark older than `timeout` is treated as a summary that will
    /// never arrive.
    pub fn with_pending_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::default(),
            pending_timeout: timeout,
        }
    }

    /// Stores a confirmed summary. A regenerated summary replaces an older
    /// one; an older one never replaces a newer one.
    pub async fn put(&self, article_id: ArticleId, summary: Summary) {
        let mut inner = self.inner.write().await;
        inner.pending.remove(&article_id);
        match inner.summaries.get(&article_id) {
            Some(existing) if existing.created_at > summary.created_at => {
                debug!(article_id, "keeping newer overlay summary");
            }
            _ => {
                inner.summaries.insert(article_id, summary);
            }
        }
    }

    pub async fn get(&self, article_id: ArticleId) -> Option<Summary> {
        self.inner.read().await.summaries.get(&article_id).cloned()
    }

    pub async fn contains(&self, article_id: ArticleId) -> bool {
        self.inner.read().await.summaries.contains_key(&article_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.summaries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every entry the freshly fetched `articles` already carry, and
    /// pending marks that timed out. Must run after each successful list
    /// fetch. Returns how many entries were handed over to server data.
    pub async fn reconcile(&self, articles: &[Article]) -> usize {
        let mut inner = self.inner.write().await;
        let timeout = self.pending_timeout;
        let before = inner.pending.len();
        inner.pending.retain(|_, since| since.elapsed() < timeout);
        let expired = before - inner.pending.len();
        if expired > 0 {
            debug!(expired, "pending summaries timed out");
        }
        let mut removed = 0;
        for article in articles {
            let Some(server) = &article.summary else {
                continue;
            };
            inner.pending.remove(&article.id);
            let confirmed = inner
                .summaries
                .get(&article.id)
                .is_some_and(|local| confirms(server, local));
            if confirmed {
                inner.summaries.remove(&article.id);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "overlay entries confirmed by server");
        }
        removed
    }

    /// Same as [`reconcile`](Self::reconcile) for a single summary obtained
    /// from the per-article summary endpoint.
    pub async fn confirm(&self, article_id: ArticleId, server: &Summary) -> bool {
        let mut inner = self.inner.write().await;
        inner.pending.remove(&article_id);
        let confirmed = inner
            .summaries
            .get(&article_id)
            .is_some_and(|local| confirms(server, local));
        if confirmed {
            inner.summaries.remove(&article_id);
        }
        confirmed
    }

    pub async fn mark_pending(&self, ids: impl IntoIterator<Item = ArticleId>) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        inner.pending.extend(ids.into_iter().map(|id| (id, now)));
    }

    pub async fn clear_pending(&self, article_id: ArticleId) {
        self.inner.write().await.pending.remove(&article_id);
    }

    pub async fn is_pending(&self, article_id: ArticleId) -> bool {
        self.inner
            .read()
            .await
            .pending_at(article_id, self.pending_timeout)
    }

    /// Merges overlay summaries into a server page. Anything still in the
    /// overlay after reconciliation is newer than what the server sent.
    pub async fn merge(&self, articles: &[Article]) -> Vec<ArticleView> {
        let inner = self.inner.read().await;
        articles
            .iter()
            .map(|article| {
                let (summary, summary_source) = match inner.summaries.get(&article.id) {
                    Some(local) => (Some(local.clone()), Some(SummarySource::Overlay)),
                    None => match &article.summary {
                        Some(server) => (Some(server.clone()), Some(SummarySource::Server)),
                        None => (None, None),
                    },
                };
                ArticleView {
                    article: article.clone(),
                    summary,
                    summary_source,
                    summary_pending: inner.pending_at(article.id, self.pending_timeout),
                }
            })
            .collect()
    }

    /// Whether `article` needs no further summarization, judging from the
    /// overlay and the server copy at hand.
    pub async fn is_summarized(&self, article: &Article) -> bool {
        article.summary.is_some() || self.contains(article.id).await
    }
}
