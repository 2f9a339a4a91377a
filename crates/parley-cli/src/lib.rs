use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use parley_client::{
    BatchError, ChatSession, ClientConfig, ClientError, ConfigError, ConversationBatch,
    ConversationService, DashboardService, DashboardView, SendError, SendOutcome, TypingHub,
};
use parley_protocol::{ConversationId, DashboardSummary, IdError, UserId};
use parley_store::{
    FileCache, InMemoryCache, InMemoryPresenceStore, InMemoryStore, LocalCache,
    StaticSummarySource, StoreError,
};
use thiserror::Error;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "parley",
    version,
    about = "Parley command line client",
    long_about = "Parley command line client for sending messages, bulk conversation management and the creator dashboard"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PARLEY_CACHE_DIR",
        help = "Directory for the on-disk dashboard cache"
    )]
    pub cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Send a direct message")]
    Send {
        #[arg(help = "Sender user ID")]
        from: String,
        #[arg(help = "Recipient user ID")]
        to: String,
        #[arg(help = "Message body")]
        text: String,
        #[arg(long, help = "Simulate a store outage during the write")]
        offline: bool,
    },
    #[command(about = "Create demo conversations and archive them in one batch")]
    Archive {
        #[arg(long, help = "User whose inbox is archived")]
        user: String,
        #[arg(long, default_value_t = 10, help = "Number of conversations")]
        count: usize,
    },
    #[command(about = "Show the creator dashboard")]
    Dashboard {
        #[arg(long, help = "Dashboard owner")]
        user: String,
        #[arg(long, help = "Simulate an aggregation outage")]
        offline: bool,
        #[arg(long, help = "Clear the cache before loading")]
        refresh: bool,
    },
    #[command(about = "Print the effective client configuration")]
    Config,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// In-process backends shared by one-shot commands and the REPL.
pub struct Backend {
    pub config: ClientConfig,
    pub store: Arc<InMemoryStore>,
    pub presence: Arc<InMemoryPresenceStore>,
    pub summaries: Arc<StaticSummarySource>,
    pub cache: Arc<dyn LocalCache>,
}

impl Backend {
    pub async fn open(config: ClientConfig, cache_dir: Option<&Path>) -> Result<Self, CliError> {
        let cache: Arc<dyn LocalCache> = match cache_dir {
            Some(dir) => Arc::new(FileCache::open(dir).await?),
            None => Arc::new(InMemoryCache::new()),
        };
        Ok(Self {
            config,
            store: Arc::new(InMemoryStore::with_sequential_ids("srv")),
            presence: Arc::new(InMemoryPresenceStore::new()),
            summaries: Arc::new(StaticSummarySource::new()),
            cache,
        })
    }

    pub fn conversations(&self) -> ConversationService {
        ConversationService::new(self.store.clone())
    }

    pub fn batch(&self) -> ConversationBatch {
        ConversationBatch::new(self.store.clone()).with_limit(self.config.batch_limit)
    }

    pub fn dashboard(&self) -> DashboardService {
        DashboardService::new(self.summaries.clone(), Arc::clone(&self.cache))
            .with_ttl(self.config.dashboard_ttl())
            .with_throttle(self.config.dashboard_throttle())
    }

    pub fn typing(&self) -> TypingHub {
        TypingHub::new(self.presence.clone(), self.config.typing_timeout())
    }

    pub async fn open_session(
        &self,
        conversation_id: ConversationId,
        user: UserId,
    ) -> Result<ChatSession, CliError> {
        Ok(ChatSession::open(self.store.clone(), conversation_id, user, &self.config).await?)
    }

    /// Recompute `user`'s summary from the store and push it to the source.
    pub async fn publish_summary(&self, user: &UserId) -> Result<DashboardSummary, CliError> {
        let summary = summarize(&self.store, user).await?;
        self.summaries.set_summary(summary.clone()).await;
        Ok(summary)
    }
}

/// Messages received by `user` across every conversation they take part in.
pub async fn summarize(store: &InMemoryStore, user: &UserId) -> Result<DashboardSummary, CliError> {
    use parley_store::ConversationStore;

    let mut summary = DashboardSummary::empty(user.clone(), Utc::now());
    for conversation in store.list_for_user(user).await? {
        let received = store
            .messages(&conversation.id)
            .await
            .iter()
            .filter(|m| &m.sender_id != user)
            .count();
        summary.total_messages += received as u64;
    }
    Ok(summary)
}

pub fn format_dashboard(user: &UserId, view: &DashboardView) -> String {
    let (summary, header) = match view {
        DashboardView::Fresh(summary) => (summary, format!("dashboard for {user} (live)")),
        DashboardView::Cached {
            summary,
            cached_at,
            stale,
        } => {
            let age = if *stale { ", stale" } else { "" };
            (
                summary,
                format!(
                    "dashboard for {user} (cached at {}{age})",
                    cached_at.format("%Y-%m-%d %H:%M:%S")
                ),
            )
        }
        DashboardView::Empty => return format!("no dashboard data for {user}"),
    };

    let mut lines = vec![
        header,
        format!("  messages:          {}", summary.total_messages),
    ];
    for (category, count) in &summary.by_category {
        lines.push(format!("  {:<18} {count}", format!("{category:?}:").to_lowercase()));
    }
    lines.push(format!(
        "  faq auto-replies:  {:.0}%",
        summary.faq.auto_response_rate()
    ));
    lines.push(format!(
        "  drafts accepted:   {:.0}%",
        summary.voice.acceptance_rate()
    ));
    lines.join("\n")
}

pub async fn run(cli: Cli) -> Result<String, CliError> {
    let config = ClientConfig::from_env()?;
    let backend = Backend::open(config.clone(), cli.cache_dir.as_deref()).await?;

    match cli.command {
        Commands::Send {
            from,
            to,
            text,
            offline,
        } => {
            let from = UserId::new(from)?;
            let to = UserId::new(to)?;
            let conversation = backend.conversations().create_direct(&from, &to).await?;
            if offline {
                backend.store.set_offline(true).await;
            }
            let session = backend.open_session(conversation.id.clone(), from).await?;
            let output = match session.send(&text).await? {
                None => "nothing to send".to_string(),
                Some(SendOutcome::Delivered { id }) => {
                    format!("message sent: {id} ({})", conversation.id)
                }
                Some(SendOutcome::Failed { token, failure }) => {
                    format!("message failed ({failure:?}): {token}")
                }
            };
            session.close();
            Ok(output)
        }
        Commands::Archive { user, count } => {
            if count == 0 {
                return Err(CliError::InvalidArgument(
                    "count must be at least 1".to_string(),
                ));
            }
            let user = UserId::new(user)?;
            let conversations = backend.conversations();
            let mut ids = Vec::with_capacity(count);
            for i in 0..count {
                let peer = UserId::new(format!("fan{i}"))?;
                ids.push(conversations.create_direct(&user, &peer).await?.id);
            }
            let archived = backend
                .batch()
                .batch_archive_conversations(&ids, &user, true)
                .await?;
            let remaining = conversations.list_for_user(&user, false).await?.len();
            Ok(format!(
                "archived {archived} conversations for {user} ({remaining} left in inbox)"
            ))
        }
        Commands::Dashboard {
            user,
            offline,
            refresh,
        } => {
            let user = UserId::new(user)?;
            if offline {
                backend.summaries.set_available(false);
            } else {
                backend.publish_summary(&user).await?;
            }
            let dashboard = backend.dashboard();
            let view = if refresh {
                dashboard.refresh(&user).await
            } else {
                dashboard.load_fast(&user).await
            };
            Ok(format_dashboard(&user, &view))
        }
        Commands::Config => Ok(serde_json::to_string_pretty(&config)?),
    }
}
