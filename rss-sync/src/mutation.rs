//! Optimistic read/star toggles.
//!
//! Each toggle runs `Idle -> Pending -> Committed | RolledBack`. Toggles for
//! the same article are serialized behind a per-article FIFO lock, so a
//! second click waits for the first round trip instead of racing it. The
//! round trip runs on its own task: dropping the caller's future does not
//! stop it from committing or rolling back.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::cache::{QueryCache, ResourceType};
use crate::error::{Result, SyncError};
use crate::models::{Article, ArticleId, ArticlePage, MutationKind};
use crate::notify::Notifier;
use crate::view::detail_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    api: ApiClient,
    cache: QueryCache,
    notifier: Notifier,
    locks: Arc<Mutex<HashMap<ArticleId, Arc<Mutex<()>>>>>,
    states: Arc<RwLock<HashMap<(ArticleId, MutationKind), MutationState>>>,
}

impl MutationCoordinator {
    pub fn new(api: ApiClient, cache: QueryCache, notifier: Notifier) -> Self {
        Self {
            api,
            cache,
            notifier,
            locks: Arc::default(),
            states: Arc::default(),
        }
    }

    pub async fn state(&self, id: ArticleId, kind: MutationKind) -> MutationState {
        self.states
            .read()
            .await
            .get(&(id, kind))
            .copied()
            .unwrap_or(MutationState::Idle)
    }

    pub async fn toggle_read(&self, id: ArticleId) -> Result<Article> {
        self.toggle(id, MutationKind::ToggleRead).await
    }

    pub async fn toggle_star(&self, id: ArticleId) -> Result<Article> {
        self.toggle(id, MutationKind::ToggleStar).await
    }

    pub async fn toggle(&self, id: ArticleId, kind: MutationKind) -> Result<Article> {
        let this = self.clone();
        match tokio::spawn(async move { this.serialized(id, kind).await }).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(SyncError::Network(format!("toggle interrupted: {err}"))),
        }
    }

    /// Whether a toggle for `id` is running or queued.
    pub async fn is_busy(&self, id: ArticleId) -> bool {
        self.locks.lock().await.contains_key(&id)
    }

    async fn serialized(&self, id: ArticleId, kind: MutationKind) -> Result<Article> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        let result = {
            let _turn = lock.lock().await;
            self.run(id, kind).await
        };
        self.release_lock(id, lock).await;
        result
    }

    async fn run(&self, id: ArticleId, kind: MutationKind) -> Result<Article> {
        self.set_state(id, kind, MutationState::Pending).await;

        let previous = self.current_flag(id, kind).await;
        if let Some(previous) = previous {
            let patched = self.set_flag_everywhere(id, kind, !previous).await;
            debug!(article_id = id, ?kind, patched, "optimistic toggle applied");
        }

        match self.api.toggle(id, kind).await {
            Ok(article) => {
                self.overwrite_everywhere(&article).await;
                self.cache.invalidate(ResourceType::Articles).await;
                self.set_state(id, kind, MutationState::Committed).await;
                info!(article_id = id, ?kind, value = article.flag(kind), "toggle committed");
                Ok(article)
            }
            Err(err) => {
                if let Some(previous) = previous {
                    self.set_flag_everywhere(id, kind, previous).await;
                }
                self.set_state(id, kind, MutationState::RolledBack).await;
                self.notifier.error("Could not update article", &err);
                Err(err)
            }
        }
    }

    async fn set_state(&self, id: ArticleId, kind: MutationKind, state: MutationState) {
        self.states.write().await.insert((id, kind), state);
    }

    // The detail view wins if open, otherwise the first cached page copy.
    async fn current_flag(&self, id: ArticleId, kind: MutationKind) -> Option<bool> {
        if let Some(article) = self.cache.peek::<Article>(&detail_key(id)).await {
            return Some(article.flag(kind));
        }
        self.cache
            .scan::<ArticlePage, _, _>(ResourceType::Articles, |_, page| {
                page.items
                    .iter()
                    .find(|article| article.id == id)
                    .map(|article| article.flag(kind))
            })
            .await
    }

    async fn set_flag_everywhere(&self, id: ArticleId, kind: MutationKind, value: bool) -> usize {
        let mut patched = self
            .cache
            .update_all::<ArticlePage, _>(ResourceType::Articles, |_, page| {
                let mut changed = false;
                for article in page.items.iter_mut().filter(|article| article.id == id) {
                    article.set_flag(kind, value);
                    changed = true;
                }
                changed
            })
            .await;
        if self
            .cache
            .update::<Article, _>(&detail_key(id), |article| article.set_flag(kind, value))
            .await
        {
            patched += 1;
        }
        patched
    }

    // The toggle endpoints do not embed summaries, so keep whatever summary
    // the cached copy already had.
    async fn overwrite_everywhere(&self, canonical: &Article) {
        let merge = |cached: &mut Article| {
            let summary = cached.summary.take();
            *cached = canonical.clone();
            if cached.summary.is_none() {
                cached.summary = summary;
            }
        };
        self.cache
            .update_all::<ArticlePage, _>(ResourceType::Articles, |_, page| {
                let mut changed = false;
                for article in page.items.iter_mut().filter(|a| a.id == canonical.id) {
                    merge(article);
                    changed = true;
                }
                changed
            })
            .await;
        self.cache
            .update::<Article, _>(&detail_key(canonical.id), merge)
            .await;
    }

    async fn release_lock(&self, id: ArticleId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // one reference in the map, one here: nobody else is queued
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&id);
        }
    }
}
