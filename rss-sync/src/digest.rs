use tracing::{debug, info};

use crate::api::ApiClient;
use crate::cache::{QueryCache, QueryKey, QueryResult, ReadOptions, ResourceType};
use crate::error::Result;
use crate::models::{DigestGenerateRequest, DigestId, DigestReport, PeriodType};
use crate::notify::Notifier;

pub fn digest_list_key(period: Option<PeriodType>) -> QueryKey {
    let key = QueryKey::new(ResourceType::Digests);
    match period {
        Some(period) => key.with("period_type", period),
        None => key,
    }
}

/// Digest listing plus generation with optimistic insertion into the list
/// currently on screen.
#[derive(Debug, Clone)]
pub struct DigestInsertionController {
    api: ApiClient,
    cache: QueryCache,
    notifier: Notifier,
    options: ReadOptions,
}

impl DigestInsertionController {
    pub fn new(api: ApiClient, cache: QueryCache, notifier: Notifier, options: ReadOptions) -> Self {
        Self {
            api,
            cache,
            notifier,
            options,
        }
    }

    pub async fn list(&self, period: Option<PeriodType>) -> QueryResult<Vec<DigestReport>> {
        let api = self.api.clone();
        let result = self
            .cache
            .read(digest_list_key(period), self.options, move || {
                let api = api.clone();
                async move { api.list_digests(period).await }
            })
            .await;
        if let Some(err) = &result.error {
            self.notifier.error("Could not load digests", err);
        }
        result
    }

    pub async fn get(&self, id: DigestId) -> Result<DigestReport> {
        self.api.get_digest(id).await
    }

    /// Generates a digest. On success it is inserted into the cached list for
    /// `view` (the period filter on screen) before the digest lists are
    /// invalidated. On failure the cached list is left untouched.
    pub async fn generate(
        &self,
        params: &DigestGenerateRequest,
        view: Option<PeriodType>,
    ) -> Result<DigestReport> {
        let generated = match params.validate() {
            Ok(()) => self.api.generate_digest(params).await,
            Err(err) => Err(err),
        };
        let report = match generated {
            Ok(report) => report,
            Err(err) => {
                self.notifier.error("Digest generation failed", &err);
                return Err(err);
            }
        };

        if view.map_or(true, |period| period == report.period_type) {
            let inserted = self
                .cache
                .update::<Vec<DigestReport>, _>(&digest_list_key(view), |list| {
                    insert_newest_first(list, report.clone())
                })
                .await;
            debug!(digest_id = report.id, inserted, "optimistic digest insert");
        }
        self.cache.invalidate(ResourceType::Digests).await;

        info!(
            digest_id = report.id,
            period = %report.period_type,
            article_count = report.article_count,
            "digest generated"
        );
        self.notifier.info(format!(
            "{} digest generated from {} article(s)",
            report.period_type, report.article_count
        ));
        Ok(report)
    }
}

/// Keeps the list ordered by `period_start` descending, the order the
/// backend lists digests in. A report with an id already present replaces
/// that entry.
pub fn insert_newest_first(list: &mut Vec<DigestReport>, report: DigestReport) {
    list.retain(|existing| existing.id != report.id);
    let at = list
        .iter()
        .position(|existing| existing.period_start <= report.period_start)
        .unwrap_or(list.len());
    list.insert(at, report);
}
