use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use colored::Colorize;
use parley_cli::{format_dashboard, Backend, CliError};
use parley_client::{
    search_messages, ChatSession, ClientConfig, SendOutcome, Subscription, TypingHub,
};
use parley_protocol::{
    ConversationId, Message, MessageDraft, MessageId, MessageStatus, TypingMap, UserId,
};
use parley_store::MessageStore;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REPL_COMMANDS: &[&str] = &[
    "login",
    "dm",
    "send",
    "recv",
    "show",
    "retry",
    "offline",
    "list",
    "archive",
    "delete",
    "typing",
    "search",
    "dashboard",
    "metrics",
    "help",
    "exit",
    "quit",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Login(String),
    Dm(String),
    Send(String),
    Receive(String, String),
    Show,
    Retry,
    Offline(bool),
    List,
    Archive(Vec<String>),
    Delete(Vec<String>),
    Typing(bool),
    Search(String),
    Dashboard,
    Metrics,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

#[derive(Default)]
struct ReplHelper;

impl Helper for ReplHelper {}
impl Hinter for ReplHelper {
    type Hint = String;
}
impl Highlighter for ReplHelper {}
impl Validator for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let pos = pos.min(line.len());
        let input = &line[..pos];
        let start = input
            .rfind(char::is_whitespace)
            .map_or(0, |last_ws| last_ws + 1);

        let pairs = complete_candidates(&input[start..])
            .into_iter()
            .map(|candidate| Pair {
                display: candidate.to_string(),
                replacement: candidate.to_string(),
            })
            .collect();
        Ok((start, pairs))
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }

    match line {
        "exit" | "quit" => return ReplCommand::Exit,
        "help" | "?" => return ReplCommand::Help,
        "show" => return ReplCommand::Show,
        "retry" => return ReplCommand::Retry,
        "list" => return ReplCommand::List,
        "dashboard" => return ReplCommand::Dashboard,
        "metrics" => return ReplCommand::Metrics,
        _ => {}
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let tail = parts.next().map(str::trim).unwrap_or_default();
    let ids = || tail.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    match command {
        "login" if !tail.is_empty() => ReplCommand::Login(tail.to_string()),
        "login" => ReplCommand::Unknown("usage: login <user_id>".to_string()),
        "dm" if !tail.is_empty() => ReplCommand::Dm(tail.to_string()),
        "dm" => ReplCommand::Unknown("usage: dm <user_id>".to_string()),
        "send" if !tail.is_empty() => ReplCommand::Send(tail.to_string()),
        "send" => ReplCommand::Unknown("usage: send <message>".to_string()),
        "recv" => {
            let mut parts = tail.splitn(2, char::is_whitespace);
            let sender = parts.next().unwrap_or_default();
            let text = parts.next().map(str::trim).unwrap_or_default();
            if sender.is_empty() || text.is_empty() {
                ReplCommand::Unknown("usage: recv <user_id> <message>".to_string())
            } else {
                ReplCommand::Receive(sender.to_string(), text.to_string())
            }
        }
        "offline" => match parse_switch(tail) {
            Some(offline) => ReplCommand::Offline(offline),
            None => ReplCommand::Unknown("usage: offline on|off".to_string()),
        },
        "typing" => match parse_switch(tail) {
            Some(typing) => ReplCommand::Typing(typing),
            None => ReplCommand::Unknown("usage: typing on|off".to_string()),
        },
        "archive" if !tail.is_empty() => ReplCommand::Archive(ids()),
        "archive" => ReplCommand::Unknown("usage: archive <conversation_id>...".to_string()),
        "delete" if !tail.is_empty() => ReplCommand::Delete(ids()),
        "delete" => ReplCommand::Unknown("usage: delete <conversation_id>...".to_string()),
        "search" if !tail.is_empty() => ReplCommand::Search(tail.to_string()),
        "search" => ReplCommand::Unknown("usage: search <query>".to_string()),
        _ => ReplCommand::Unknown(format!("unknown command: {line}")),
    }
}

fn help_text() -> String {
    [
        "Commands:",
        "  login <user_id>           Act as a user",
        "  dm <user_id>              Open the direct conversation with a user",
        "  send <message>            Send to the open conversation",
        "  recv <user_id> <message>  Simulate an incoming message",
        "  show                      Print the open conversation",
        "  retry                     Retry every failed message",
        "  offline on|off            Simulate a backend outage",
        "  list                      List your conversations",
        "  archive <id>...           Archive conversations in one batch",
        "  delete <id>...            Delete conversations in one batch",
        "  typing on|off             Publish your typing state",
        "  search <query>            Search loaded messages",
        "  dashboard                 Show your creator dashboard",
        "  metrics                   Dump client metrics (Prometheus text)",
        "  help                      Show this help",
        "  exit | quit               Exit REPL",
    ]
    .join("\n")
}

fn render_metrics() -> String {
    let exported = parley_client::metrics::export();
    if exported.is_empty() {
        "No metrics recorded yet.".to_string()
    } else {
        exported
    }
}

struct ReplState {
    backend: Backend,
    typing: TypingHub,
    user: Option<UserId>,
    session: Option<ChatSession>,
    typing_watch: Option<Subscription>,
    typists: Arc<Mutex<TypingMap>>,
    failed: Vec<MessageId>,
}

impl ReplState {
    fn new(backend: Backend) -> Self {
        let typing = backend.typing();
        Self {
            backend,
            typing,
            user: None,
            session: None,
            typing_watch: None,
            typists: Arc::new(Mutex::new(TypingMap::new())),
            failed: Vec::new(),
        }
    }

    fn user(&self, command: &str) -> Result<UserId, CliError> {
        self.user
            .clone()
            .ok_or_else(|| CliError::InvalidArgument(format!("login required before `{command}`")))
    }

    fn session(&self, command: &str) -> Result<&ChatSession, CliError> {
        self.session
            .as_ref()
            .ok_or_else(|| CliError::InvalidArgument(format!("dm required before `{command}`")))
    }

    async fn close_session(&mut self) {
        if let Some(watch) = self.typing_watch.take() {
            watch.unsubscribe();
        }
        if let Some(session) = self.session.take() {
            if let Err(err) = self
                .typing
                .cleanup(session.conversation_id(), session.user_id())
                .await
            {
                tracing::warn!(error = %err, "Failed to clear typing state");
            }
            session.close();
        }
        self.failed.clear();
    }

    fn remember_failure(&mut self, id: MessageId) {
        if !self.failed.contains(&id) {
            self.failed.push(id);
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "parley_cli=info,parley_client=warn,parley_store=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if std::env::args().count() > 1 {
        let cli = parley_cli::Cli::parse();
        match parley_cli::run(cli).await {
            Ok(output) => {
                println!("{output}");
            }
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };
    let cache_dir = std::env::var("PARLEY_CACHE_DIR").ok().map(PathBuf::from);
    let backend = match Backend::open(config, cache_dir.as_deref()).await {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let mut editor = match Editor::<ReplHelper, rustyline::history::DefaultHistory>::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("error: failed to start REPL: {err}");
            std::process::exit(1);
        }
    };
    editor.set_helper(Some(ReplHelper));
    let history = history_file();
    let _ = editor.load_history(&history);

    let mut state = ReplState::new(backend);
    println!(
        "{}",
        "Parley interactive mode. Type `help`.".bright_green()
    );
    loop {
        match editor.readline(&prompt(&state)) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                match run_repl_command(&mut state, parse_command(trimmed)).await {
                    Ok(should_exit) => {
                        if should_exit {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{} {}", "error:".red(), err),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red());
                break;
            }
        }
    }

    state.close_session().await;
    if let Err(err) = editor.save_history(&history) {
        eprintln!("{} failed to save history: {err}", "warning:".yellow());
    }
}

fn prompt(state: &ReplState) -> String {
    let typists = match state.typists.lock() {
        Ok(map) => map.keys().map(ToString::to_string).collect::<Vec<_>>(),
        Err(poisoned) => poisoned
            .into_inner()
            .keys()
            .map(ToString::to_string)
            .collect(),
    };
    let typing = if typists.is_empty() {
        String::new()
    } else {
        format!(" [{} typing]", typists.join(", "))
    };
    match (&state.user, &state.session) {
        (Some(user), Some(session)) => {
            format!("{user}@{}{typing}> ", session.conversation_id())
        }
        (Some(user), None) => format!("{user}> "),
        _ => "parley> ".to_string(),
    }
}

async fn run_repl_command(state: &mut ReplState, command: ReplCommand) -> Result<bool, CliError> {
    match command {
        ReplCommand::Login(user) => {
            let user = UserId::new(user)?;
            state.close_session().await;
            println!("{} {}", "logged in as".green(), user.to_string().cyan());
            state.user = Some(user);
        }
        ReplCommand::Dm(peer) => {
            let user = state.user("dm")?;
            let peer = UserId::new(peer)?;
            let conversation = state
                .backend
                .conversations()
                .create_direct(&user, &peer)
                .await?;
            state.close_session().await;

            let session = state
                .backend
                .open_session(conversation.id.clone(), user.clone())
                .await?;
            let typists = Arc::clone(&state.typists);
            let watch = state
                .typing
                .subscribe_to_typing(&conversation.id, user.clone(), move |map| {
                    match typists.lock() {
                        Ok(mut current) => *current = map,
                        Err(poisoned) => *poisoned.into_inner() = map,
                    }
                })
                .await?;
            state
                .backend
                .conversations()
                .mark_as_read(&conversation.id, &user)
                .await?;
            println!(
                "{} {}",
                "opened".green(),
                conversation.id.to_string().cyan()
            );
            print_messages(&session.visible(), &user);
            state.session = Some(session);
            state.typing_watch = Some(watch);
        }
        ReplCommand::Send(text) => {
            let outcome = state.session("send")?.send(&text).await?;
            match outcome {
                None => println!("{}", "nothing to send".yellow()),
                Some(SendOutcome::Delivered { id }) => {
                    println!("{} {}", "message sent:".green(), id.cyan());
                }
                Some(SendOutcome::Failed { token, failure }) => {
                    println!(
                        "{} {} ({failure:?}), `retry` to resend",
                        "message failed:".red(),
                        token.to_string().cyan()
                    );
                    state.remember_failure(MessageId::Local(token));
                }
            }
        }
        ReplCommand::Receive(sender, text) => {
            let session = state.session("recv")?;
            let draft = MessageDraft::new(
                session.conversation_id().clone(),
                UserId::new(sender)?,
                text,
            );
            let stored = state.backend.store.append(draft).await?;
            println!("{} {}", "delivered:".green(), stored.id.cyan());
        }
        ReplCommand::Show => {
            let session = state.session("show")?;
            print_messages(&session.visible(), session.user_id());
        }
        ReplCommand::Retry => {
            let ids = std::mem::take(&mut state.failed);
            if ids.is_empty() {
                println!("{}", "nothing to retry".yellow());
            }
            for id in ids {
                let outcome = state.session("retry")?.retry_message(&id).await?;
                match outcome {
                    SendOutcome::Delivered { id } => {
                        println!("{} {}", "message sent:".green(), id.cyan());
                    }
                    SendOutcome::Failed { token, failure } => {
                        println!("{} {} ({failure:?})", "still failing:".red(), token);
                        state.remember_failure(MessageId::Local(token));
                    }
                }
            }
        }
        ReplCommand::Offline(offline) => {
            state.backend.store.set_offline(offline).await;
            state.backend.presence.set_offline(offline);
            state.backend.summaries.set_available(!offline);
            let label = if offline { "offline" } else { "online" };
            println!("{} {}", "backend is now".green(), label.cyan());
        }
        ReplCommand::List => {
            let user = state.user("list")?;
            let conversations = state
                .backend
                .conversations()
                .list_for_user(&user, true)
                .await?;
            if conversations.is_empty() {
                println!("{}", "no conversations yet".yellow());
            }
            for conversation in conversations {
                let current = state
                    .session
                    .as_ref()
                    .is_some_and(|s| s.conversation_id() == &conversation.id);
                let marker = if current { "*" } else { " " };
                let archived = if conversation.is_archived_by(&user) {
                    " [archived]".dimmed().to_string()
                } else {
                    String::new()
                };
                let preview = conversation
                    .last_message
                    .as_ref()
                    .map(|m| m.text.chars().take(40).collect::<String>())
                    .unwrap_or_default();
                println!(
                    "{marker} {} ({} unread){archived} {}",
                    conversation.id.to_string().cyan(),
                    conversation.unread_for(&user),
                    preview.dimmed()
                );
            }
        }
        ReplCommand::Archive(ids) => {
            let user = state.user("archive")?;
            let ids = parse_conversation_ids(ids)?;
            let count = state
                .backend
                .batch()
                .batch_archive_conversations(&ids, &user, true)
                .await?;
            println!("{} {count} conversations", "archived".green());
        }
        ReplCommand::Delete(ids) => {
            let user = state.user("delete")?;
            let ids = parse_conversation_ids(ids)?;
            let count = state
                .backend
                .batch()
                .batch_delete_conversations(&ids, &user)
                .await?;
            println!("{} {count} conversations", "deleted".green());
        }
        ReplCommand::Typing(is_typing) => {
            let session = state.session("typing")?;
            let (conversation, user) = (session.conversation_id().clone(), session.user_id().clone());
            state.typing.set_typing(&conversation, &user, is_typing).await?;
            let label = if is_typing { "typing" } else { "idle" };
            println!("{} {}", "you are".green(), label.cyan());
        }
        ReplCommand::Search(query) => {
            let session = state.session("search")?;
            let results = search_messages(&session.visible(), &query);
            println!("{}", format!("Search results for: {query}").bright_blue());
            if results.is_empty() {
                println!("{}", "No results found.".yellow());
            } else {
                print_messages(&results, session.user_id());
                println!("{}", format!("Total: {} results", results.len()).green());
            }
        }
        ReplCommand::Dashboard => {
            let user = state.user("dashboard")?;
            if let Err(err) = state.backend.publish_summary(&user).await {
                tracing::warn!(error = %err, "Could not recompute dashboard summary");
            }
            let view = state.backend.dashboard().load_fast(&user).await;
            println!("{}", format_dashboard(&user, &view).bright_blue());
        }
        ReplCommand::Metrics => {
            print!("{}", render_metrics());
        }
        ReplCommand::Help => {
            println!("{}", help_text().bright_blue());
        }
        ReplCommand::Exit => {
            println!("{}", "bye".bright_green());
            return Ok(true);
        }
        ReplCommand::Empty => {}
        ReplCommand::Unknown(message) => {
            println!("{} {message}", "warning:".yellow());
            println!("{}", "Type `help` for available commands.".yellow());
        }
    }

    Ok(false)
}

fn parse_conversation_ids(ids: Vec<String>) -> Result<Vec<ConversationId>, CliError> {
    Ok(ids
        .into_iter()
        .map(ConversationId::new)
        .collect::<Result<Vec<_>, _>>()?)
}

fn print_messages(messages: &[Message], viewer: &UserId) {
    if messages.is_empty() {
        println!("{}", "no messages yet".yellow());
        return;
    }
    for message in messages {
        let time = message.timestamp.format("%H:%M:%S").to_string();
        let sender = if &message.sender_id == viewer {
            "you".to_string()
        } else {
            message.sender_id.to_string()
        };
        let status = match message.status {
            MessageStatus::Delivered if message.read_by.iter().any(|u| u != viewer) => {
                " ✓✓".green().to_string()
            }
            MessageStatus::Delivered => String::new(),
            MessageStatus::Sending => " …".dimmed().to_string(),
            MessageStatus::Failed => " !".red().to_string(),
        };
        println!("{} {}: {}{status}", time.dimmed(), sender.cyan(), message.text);
    }
}

fn history_file() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".parley-history");
    }
    PathBuf::from(".parley-history")
}

fn complete_candidates(prefix: &str) -> BTreeSet<&'static str> {
    REPL_COMMANDS
        .iter()
        .copied()
        .filter(|command| command.starts_with(prefix))
        .collect()
}
