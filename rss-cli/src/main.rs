use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rss_sync::models::{ArticleId, DigestGenerateRequest, FeedId, PeriodType};
use rss_sync::{FilterState, LoadOutcome, PaginationController, ReadFilter, SyncClient, SyncConfig};
use serde_json::json;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rss-dash", version, about = "RSS digest dashboard client")]
struct Cli {
    /// API base URL, overrides config and environment
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List one page of articles
    Articles {
        #[arg(long)]
        feed: Option<FeedId>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, conflicts_with = "read")]
        unread: bool,
        #[arg(long)]
        read: bool,
        #[arg(long)]
        starred: bool,
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Toggle the read flag of an article
    Read { id: ArticleId },
    /// Toggle the star flag of an article
    Star { id: ArticleId },
    /// Summarize one article now
    Summarize { id: ArticleId },
    /// Queue several articles for summarization
    Batch {
        #[arg(required = true)]
        ids: Vec<ArticleId>,
    },
    /// List digests, optionally for one period type
    Digests {
        #[arg(long)]
        period: Option<PeriodType>,
    },
    /// Generate a digest for a period
    DigestGenerate {
        period: PeriodType,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// List subscribed feeds
    Feeds,
    /// Fetch every active feed on the server
    FetchAll,
    /// Import feeds from an OPML file
    ImportOpml { path: PathBuf },
    /// Print the OPML export
    ExportOpml,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match SyncConfig::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to load config");
                return ExitCode::FAILURE;
            }
        },
        None => SyncConfig::load(),
    };
    if let Some(base_url) = cli.base_url.clone() {
        config.api.base_url = base_url;
    }

    let client = match SyncClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build client");
            return ExitCode::FAILURE;
        }
    };

    match run(&client, cli.command).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(client: &SyncClient, command: Command) -> rss_sync::Result<serde_json::Value> {
    let value = match command {
        Command::Articles {
            feed,
            page,
            unread,
            read,
            starred,
            search,
        } => {
            let read_filter = match (unread, read) {
                (true, _) => ReadFilter::Unread,
                (_, true) => ReadFilter::Read,
                _ => ReadFilter::Any,
            };
            let view = client.article_list(PaginationController::with_filters(FilterState {
                search,
                feed_id: feed,
                read_filter,
                starred_only: starred,
            }));
            view.set_page(page).await;
            let state = match view.load_awaited().await {
                LoadOutcome::Current(state) => state,
                LoadOutcome::Superseded(key) => {
                    warn!(%key, "article list changed during load");
                    return Ok(serde_json::Value::Null);
                }
            };
            if let Some(err) = state.error {
                return Err(err);
            }
            let items: Vec<_> = state
                .items
                .iter()
                .map(|view| {
                    json!({
                        "id": view.article.id,
                        "title": view.article.title,
                        "url": view.article.url,
                        "is_read": view.article.is_read,
                        "is_starred": view.article.is_starred,
                        "summary": view.summary.as_ref().map(|s| &s.summary_text),
                        "summary_pending": view.summary_pending,
                    })
                })
                .collect();
            json!({
                "page": state.page,
                "total": state.total,
                "total_pages": state.total_pages,
                "items": items,
            })
        }
        Command::Read { id } => serde_json::to_value(client.mutations().toggle_read(id).await?)?,
        Command::Star { id } => serde_json::to_value(client.mutations().toggle_star(id).await?)?,
        Command::Summarize { id } => serde_json::to_value(client.summarizer().summarize(id).await?)?,
        Command::Batch { ids } => {
            let ids: BTreeSet<ArticleId> = ids.into_iter().collect();
            let outcome = client.batch().dispatch(&ids, &[]).await?;
            json!({
                "requested": outcome.requested,
                "queued": outcome.queued,
                "already_done": outcome.already_done,
            })
        }
        Command::Digests { period } => {
            let result = client.digests().list(period).await;
            match (result.data, result.error) {
                (_, Some(err)) => return Err(err),
                (data, None) => serde_json::to_value(data.unwrap_or_default())?,
            }
        }
        Command::DigestGenerate { period, start, end } => {
            let params = DigestGenerateRequest {
                period_type: period,
                start_date: start,
                end_date: end,
            };
            serde_json::to_value(client.digests().generate(&params, None).await?)?
        }
        Command::Feeds => {
            let result = client.feeds().await;
            match (result.data, result.error) {
                (_, Some(err)) => return Err(err),
                (data, None) => serde_json::to_value(data.unwrap_or_default())?,
            }
        }
        Command::FetchAll => serde_json::to_value(client.fetch_all_feeds().await?)?,
        Command::ImportOpml { path } => {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                rss_sync::SyncError::Validation(format!("cannot read {}: {e}", path.display()))
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "feeds.opml".to_string());
            serde_json::to_value(client.import_opml(&file_name, content).await?)?
        }
        Command::ExportOpml => serde_json::Value::String(client.export_opml().await?),
    };
    Ok(value)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
