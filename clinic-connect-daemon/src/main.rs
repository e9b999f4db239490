mod config;
mod diagnostics;
mod error_handler;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use clinic_connect_sync::{
    AuthContext, Conversation, ConversationSession, Inbox, JsonFileStore, MessageStore,
    ReadStateSynchronizer, SyncEvent, SystemClock,
};
use diagnostics::{Cli, Command};
use error_handler::ErrorHandler;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use config::Config;

/// Everything a command needs once configuration is loaded
struct Daemon {
    config: Config,
    auth: AuthContext,
    store: Arc<JsonFileStore>,
    errors: ErrorHandler,
}

impl Daemon {
    async fn new(config: Config) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create daemon directories")?;

        let store = JsonFileStore::open(&config.paths.data_dir)
            .await
            .context("Failed to open message store")?;

        let mut auth = AuthContext::new(config.user.user_id.as_str());
        if let Some(token) = &config.user.token {
            auth = auth.with_token(token.as_str());
        }

        Ok(Self {
            config,
            auth,
            store: Arc::new(store),
            errors: ErrorHandler::new(),
        })
    }

    /// Follow one conversation until Ctrl-C
    ///
    /// Every line typed on stdin is sent as a message; an empty line only
    /// counts as activity.
    async fn watch(&self, counterpart: &str) -> Result<()> {
        let store: Arc<dyn MessageStore> = self.store.clone();
        let mut session = ConversationSession::new(
            counterpart,
            self.auth.clone(),
            store,
            self.config.polling.clone(),
            Arc::new(SystemClock),
        )
        .context("Failed to create conversation session")?;

        let mut events = session.subscribe();
        session.open().await;
        info!("Watching conversation with {}", counterpart);

        let mut printed: HashSet<String> = HashSet::new();
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, closing conversation");
                    break;
                }
                Some(event) = events.recv() => {
                    self.render_event(&event, &mut printed);
                }
                line = stdin.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) if line.trim().is_empty() => session.mark_activity().await,
                        Ok(Some(line)) => {
                            if let Err(e) = session.send_message(&line).await {
                                self.errors.handle_error(&e, "sending message", Some(counterpart));
                            }
                        }
                        Ok(None) => {
                            debug!("stdin closed, watching without input");
                            stdin_open = false;
                        }
                        Err(e) => {
                            debug!("Failed to read stdin: {}", e);
                            stdin_open = false;
                        }
                    }
                }
            }
        }

        session.close().await;
        let stats = session.stats().await;
        info!(
            "Poll statistics: {} cycles, {} failures, {} messages merged, {} errors handled",
            stats.cycles,
            stats.failures,
            stats.merged,
            self.errors.handled()
        );
        Ok(())
    }

    fn render_event(&self, event: &SyncEvent, printed: &mut HashSet<String>) {
        if let SyncEvent::MessagesMerged { messages, .. } = event {
            for message in messages.iter() {
                if printed.insert(message.id().to_string()) {
                    println!("{}", status::format_message(message, self.auth.user_id()));
                }
            }
        }

        if let SyncEvent::PollFailed { error, .. } = event {
            debug!("Poll of {} failed: {}", event.counterpart(), error);
        }

        if let Some(line) = status::status_line(event) {
            println!("{}", line);
        }
    }

    async fn send(&self, counterpart: &str, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            anyhow::bail!("Refusing to send an empty message");
        }

        match self.store.send_message(&self.auth, counterpart, body).await {
            Ok(message) => {
                println!("{}", status::format_message(&message, self.auth.user_id()));
                Ok(())
            }
            Err(e) => {
                self.errors.handle_error(&e, "sending message", Some(counterpart));
                Err(e).context("Failed to send message")
            }
        }
    }

    async fn inbox(&self, json: bool) -> Result<()> {
        let inbox = match Inbox::load(&*self.store, &self.auth).await {
            Ok(inbox) => inbox,
            Err(e) => {
                self.errors.handle_error(&e, "loading inbox", None);
                return Err(e).context("Failed to load inbox");
            }
        };

        let summaries = inbox.summaries();
        if json {
            let output =
                serde_json::to_string_pretty(&summaries).context("Failed to serialize inbox")?;
            println!("{}", output);
            return Ok(());
        }

        if summaries.is_empty() {
            println!("No conversations");
        }
        for summary in &summaries {
            println!("{}", status::format_summary(summary));
        }
        println!("{} unread", inbox.total_unread());
        Ok(())
    }

    async fn mark_read(&self, counterpart: &str) -> Result<()> {
        let mut conversation = Conversation::new(self.auth.user_id(), counterpart);
        let fetched = self
            .store
            .fetch_messages(&self.auth, counterpart, None)
            .await
            .context("Failed to fetch conversation")?;
        conversation.merge_fetched(fetched);

        let mut read_state = ReadStateSynchronizer::new(self.auth.user_id());
        read_state.recompute_conversation(&conversation);

        match read_state
            .mark_conversation_read(&mut conversation, &*self.store, &self.auth)
            .await
        {
            Ok(marked) => {
                println!("Marked {} messages from {} as read", marked, counterpart);
                Ok(())
            }
            Err(e) => {
                self.errors.handle_error(&e, "marking messages read", Some(counterpart));
                Err(e).context("Failed to mark conversation read")
            }
        }
    }
}

fn dump_config(config: &Config) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    println!("# {}", config.config_path().display());
    println!("{}", contents);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    info!("Configuration loaded");
    info!("User: {}", config.user.user_id);
    info!("Data directory: {}", config.paths.data_dir.display());

    if let Command::DumpConfig = cli.command {
        return dump_config(&config);
    }

    let daemon = Daemon::new(config)
        .await
        .context("Failed to create daemon")?;

    match &cli.command {
        Command::Watch { counterpart } => daemon.watch(counterpart).await,
        Command::Send { counterpart, body } => daemon.send(counterpart, body).await,
        Command::Inbox { json } => daemon.inbox(*json).await,
        Command::MarkRead { counterpart } => daemon.mark_read(counterpart).await,
        Command::DumpConfig => dump_config(&daemon.config),
    }
}
