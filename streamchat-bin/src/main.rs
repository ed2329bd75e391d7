mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use streamchat_core::{
    ChatBackend, ChatSession, Config, ConversationStore, FileStore, HttpBackend, MemoryStore,
    SendOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Streaming chat client", long_about = None)]
struct Cli {
    /// JSON or TOML config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat on stdin/stdout
    Chat {
        /// Continue a stored conversation
        #[arg(long)]
        conversation: Option<Uuid>,
    },
    /// List stored conversations, newest first
    History,
    /// Print one stored conversation
    Show {
        id: Uuid,
        /// Prefix each message with its id
        #[arg(long)]
        ids: bool,
    },
    /// Bookmark a stored message, or remove its bookmark
    Bookmark { message: Uuid },
    /// List bookmarked message ids, newest first
    Bookmarks,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::from_path(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(Config::default()),
    }
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match &cfg.store.dir {
        Some(dir) => Arc::new(FileStore::open(dir).await?),
        None => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;
    let store = open_store(&cfg).await?;

    match cli.command {
        Commands::Chat { conversation } => {
            let backend: Arc<dyn ChatBackend> = Arc::new(HttpBackend::from_config(&cfg)?);
            let session = match conversation {
                Some(id) => ChatSession::open(backend, store, &cfg, id).await?,
                None => ChatSession::new(backend, Some(store), &cfg),
            };
            chat_loop(&session).await?;
        }
        Commands::History => {
            let convs = store.list_conversations(&cfg.memory.user_id).await?;
            if convs.is_empty() {
                println!("no conversations");
            }
            for c in &convs {
                println!("{}", render::render_conversation(c));
            }
        }
        Commands::Show { id, ids } => {
            for m in store.list_messages(id).await? {
                if ids {
                    print!("[{}] ", m.id);
                }
                print!("{}", render::render_message(&m));
            }
        }
        Commands::Bookmark { message } => {
            let marked = store.toggle_bookmark(&cfg.memory.user_id, message).await?;
            println!("{} {message}", if marked { "bookmarked" } else { "removed" });
        }
        Commands::Bookmarks => {
            for b in store.list_bookmarks(&cfg.memory.user_id).await? {
                println!("{}", render::render_bookmark(&b));
            }
        }
    }

    Ok(())
}

async fn chat_loop(session: &ChatSession) -> anyhow::Result<()> {
    let mut notices = session
        .take_notices()
        .context("notice receiver already taken")?;
    for m in session.messages().iter() {
        print!("{}", render::render_message(m));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let mut snapshots = session.subscribe();
        let send = session.send(&line);
        tokio::pin!(send);
        // Bytes of the in-progress reply already echoed.
        let mut shown = 0usize;
        let result = loop {
            tokio::select! {
                res = &mut send => break res,
                Ok(()) = snapshots.changed() => {
                    let list = snapshots.borrow_and_update().clone();
                    if let Some(last) = list.last().filter(|m| m.is_placeholder())
                        && last.payload.is_none()
                    {
                        if shown == 0 {
                            print!("assistant: ");
                        }
                        let raw = &last.raw_content;
                        if let Some(fresh) = raw.get(shown..) {
                            print!("{fresh}");
                            stdout.flush()?;
                        }
                        shown = raw.len();
                    }
                }
            }
        };

        if shown > 0 {
            println!();
        }
        match result {
            Ok(SendOutcome::Completed(reply)) => {
                if let Some(p) = &reply.payload {
                    print!("{}", render::render_payload(p));
                }
                tracing::debug!(mood = %session.mood(), "reply complete");
            }
            Ok(SendOutcome::Ignored) => {}
            Err(e) => tracing::debug!(error = %e, "send failed"),
        }
        while let Ok(notice) = notices.try_recv() {
            eprintln!("! {}", notice.text);
        }
    }
    Ok(())
}
