use tracing::debug;
use url::form_urlencoded;

use crate::api::ArticleQuery;
use crate::cache::{QueryKey, ResourceType};
use crate::models::{total_pages, FeedId};

pub const PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFilter {
    #[default]
    Any,
    Read,
    Unread,
}

impl ReadFilter {
    pub fn as_is_read(&self) -> Option<bool> {
        match self {
            ReadFilter::Any => None,
            ReadFilter::Read => Some(true),
            ReadFilter::Unread => Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterState {
    pub search: String,
    pub feed_id: Option<FeedId>,
    pub read_filter: ReadFilter,
    pub starred_only: bool,
}

impl FilterState {
    pub fn for_feed(feed_id: FeedId) -> Self {
        Self {
            feed_id: Some(feed_id),
            ..Self::default()
        }
    }

    fn search_term(&self) -> Option<&str> {
        let term = self.search.trim();
        (!term.is_empty()).then_some(term)
    }
}

/// Filter criteria plus the current page of the article list.
#[derive(Debug, Clone)]
pub struct PaginationController {
    filters: FilterState,
    page: u32,
    total: Option<u64>,
}

impl Default for PaginationController {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationController {
    pub fn new() -> Self {
        Self {
            filters: FilterState::default(),
            page: 1,
            total: None,
        }
    }

    pub fn with_filters(filters: FilterState) -> Self {
        Self {
            filters,
            page: 1,
            total: None,
        }
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total.map(|total| total_pages(total, PAGE_SIZE))
    }

    /// Replaces the filters and goes back to the first page. The previous
    /// total no longer applies to the new result set.
    pub fn set_filters(&mut self, next: FilterState) {
        if next != self.filters {
            self.total = None;
        }
        self.filters = next;
        self.page = 1;
    }

    pub fn update_filters(&mut self, f: impl FnOnce(&mut FilterState)) {
        let mut next = self.filters.clone();
        f(&mut next);
        self.set_filters(next);
    }

    /// Moves to page `n`, clamped into the valid range. Returns the page
    /// actually selected.
    pub fn set_page(&mut self, n: u32) -> u32 {
        self.page = n.clamp(1, self.last_page());
        self.page
    }

    /// Records the total reported by the server. Returns `true` when the
    /// current page fell past the end and was clamped.
    pub fn apply_total(&mut self, total: u64) -> bool {
        self.total = Some(total);
        let clamped = self.page.clamp(1, self.last_page());
        if clamped != self.page {
            debug!(from = self.page, to = clamped, total, "page out of range, clamping");
            self.page = clamped;
            return true;
        }
        false
    }

    fn last_page(&self) -> u32 {
        match self.total_pages() {
            Some(pages) => pages.max(1),
            None => u32::MAX,
        }
    }

    /// Canonical cache key: default-valued filters are omitted so equal
    /// filter states always address the same entry.
    pub fn derive_key(&self) -> QueryKey {
        let mut key = QueryKey::new(ResourceType::Articles).with("page", self.page);
        if let Some(feed_id) = self.filters.feed_id {
            key = key.with("feed_id", feed_id);
        }
        if let Some(is_read) = self.filters.read_filter.as_is_read() {
            key = key.with("is_read", is_read);
        }
        if self.filters.starred_only {
            key = key.with("is_starred", true);
        }
        if let Some(term) = self.filters.search_term() {
            key = key.with("search", term);
        }
        key
    }

    pub fn query(&self) -> ArticleQuery {
        ArticleQuery {
            page: self.page,
            page_size: PAGE_SIZE,
            feed_id: self.filters.feed_id,
            is_read: self.filters.read_filter.as_is_read(),
            is_starred: self.filters.starred_only.then_some(true),
            search: self.filters.search_term().map(str::to_string),
        }
    }

    /// Only the feed scope is shareable through the URL.
    pub fn to_url_query(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if let Some(feed_id) = self.filters.feed_id {
            serializer.append_pair("feed_id", &feed_id.to_string());
        }
        serializer.finish()
    }

    pub fn from_url_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut filters = FilterState::default();
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            if name == "feed_id" {
                match value.parse::<FeedId>() {
                    Ok(id) => filters.feed_id = Some(id),
                    Err(e) => debug!(value = %value, error = %e, "ignoring malformed feed_id"),
                }
            }
        }
        Self::with_filters(filters)
    }
}
