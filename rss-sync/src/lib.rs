pub mod api;
pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod models;
pub mod mutation;
pub mod notify;
pub mod overlay;
pub mod pagination;
pub mod summarize;
pub mod view;

pub use api::{ApiClient, ArticleQuery};
pub use batch::{BatchDispatcher, BatchOutcome};
pub use cache::{QueryCache, QueryKey, QueryResult, ReadOptions, ResourceType};
pub use client::SyncClient;
pub use config::SyncConfig;
pub use digest::DigestInsertionController;
pub use error::{ConfigError, ErrorKind, Result, SyncError};
pub use mutation::{MutationCoordinator, MutationState};
pub use notify::{Level, Notification, Notifier};
pub use overlay::{ArticleView, SummaryOverlay, SummarySource};
pub use pagination::{FilterState, PaginationController, ReadFilter, PAGE_SIZE};
pub use summarize::Summarizer;
pub use view::{ArticleListState, ArticleListView, LoadOutcome};
