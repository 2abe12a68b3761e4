//! Line-oriented terminal front end.

use crate::api::http::HttpBackend;
use crate::app::DocChat;
use crate::commands::chat::ConversationState;
use crate::commands::settings::{self, ClientConfig};
use crate::db::models::{DocumentId, Message, Role};
use crate::db::Database;
use crate::events::AppEvent;
use crate::upload::FileUpload;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
commands:
  list                 show documents
  select <id>          open a document
  clear                deselect
  upload <path>        upload a .pdf or .txt file
  delete <id>          delete a document
  ask <question>       ask about the selected document
  sources <n>          show/hide sources of the n-th message
  show                 print the conversation
  dismiss              dismiss the error notice
  settings             print stored settings
  set <key> <value>    change a setting (api_url, request_timeout_secs)
  quit";

#[derive(Debug, PartialEq)]
enum Command {
    List,
    Select(DocumentId),
    Clear,
    Upload(PathBuf),
    Delete(DocumentId),
    Ask(String),
    Sources(usize),
    Show,
    Dismiss,
    Settings,
    Set(String, String),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let id = |rest: &str| {
            rest.parse::<DocumentId>()
                .map_err(|_| format!("expected a document id, got {rest:?}"))
        };

        let command = match name {
            "list" | "ls" => Command::List,
            "select" => Command::Select(id(rest)?),
            "clear" => Command::Clear,
            "upload" if !rest.is_empty() => Command::Upload(PathBuf::from(rest)),
            "delete" | "rm" => Command::Delete(id(rest)?),
            "ask" => Command::Ask(rest.to_string()),
            "sources" => Command::Sources(
                rest.parse()
                    .map_err(|_| format!("expected a message number, got {rest:?}"))?,
            ),
            "show" => Command::Show,
            "dismiss" => Command::Dismiss,
            "settings" => Command::Settings,
            "set" => match rest.split_once(char::is_whitespace) {
                Some((key, value)) => Command::Set(key.to_string(), value.trim().to_string()),
                None => return Err("usage: set <key> <value>".into()),
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "upload" => return Err("usage: upload <path>".into()),
            other => return Err(format!("unknown command: {other} (try `help`)")),
        };
        Ok(Some(command))
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn data_dir() -> PathBuf {
    std::env::var_os("DOCQA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".docqa"))
}

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(repl(&data_dir()))
}

async fn repl(dir: &Path) -> anyhow::Result<()> {
    let db = Arc::new(
        Database::new(dir).with_context(|| format!("failed to open database in {}", dir.display()))?,
    );
    let config = ClientConfig::load(&db);
    let backend = HttpBackend::new(&config).context("failed to build HTTP client")?;
    match backend.health().await {
        Ok(status) => tracing::info!(api_url = %config.api_url, status = %status, "backend reachable"),
        Err(e) => tracing::warn!(api_url = %config.api_url, error = %e, "backend health check failed"),
    }

    let chat = Arc::new(DocChat::new(Arc::new(backend), db.clone()));
    let mut events = chat.subscribe();
    chat.refresh().await;
    print_documents(&chat);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => dispatch(&chat, &db, command),
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => render_event(&chat, event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Runs a command. Anything that talks to the backend goes to its own task
/// so the prompt stays responsive.
fn dispatch(chat: &Arc<DocChat>, db: &Database, command: Command) {
    let chat = chat.clone();
    match command {
        Command::List => print_documents(&chat),
        Command::Select(id) => {
            tokio::spawn(async move {
                if !chat.select_id(id).await {
                    println!("no document with id {id}");
                }
            });
        }
        Command::Clear => {
            tokio::spawn(async move {
                chat.select(None).await;
            });
        }
        Command::Upload(path) => match FileUpload::from_path(&path) {
            Ok(upload) => {
                tokio::spawn(async move {
                    if let Ok(document) = chat.upload(upload).await {
                        println!("uploaded {} (#{})", document.title, document.id);
                    }
                });
            }
            Err(e) => println!("cannot read {}: {e}", path.display()),
        },
        Command::Delete(id) => {
            tokio::spawn(async move {
                if chat.delete(id).await.is_ok() {
                    println!("deleted #{id}");
                }
            });
        }
        Command::Ask(text) => {
            tokio::spawn(async move { chat.submit(&text).await });
        }
        Command::Sources(n) => {
            let messages = chat.conversation().messages();
            match n.checked_sub(1).and_then(|i| messages.get(i)) {
                Some(message) if message.has_sources() => {
                    chat.conversation().toggle_sources(&message.id);
                }
                Some(_) => println!("message {n} has no sources"),
                None => println!("no message {n}"),
            }
        }
        Command::Show => print_conversation(&chat),
        Command::Dismiss => chat.registry().dismiss_error(),
        Command::Settings => match settings::get_settings(db) {
            Ok(map) if map.is_empty() => println!("(defaults)"),
            Ok(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort();
                for (key, value) in entries {
                    println!("{key} = {value}");
                }
            }
            Err(e) => println!("{e}"),
        },
        Command::Set(key, value) => match settings::set_setting(db, &key, &value) {
            Ok(()) => println!("saved; restart to apply"),
            Err(e) => println!("{e}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn render_event(chat: &DocChat, event: AppEvent) {
    match event {
        AppEvent::DocumentsChanged => print_documents(chat),
        AppEvent::ConversationChanged { state, .. } => match state {
            ConversationState::Loading => println!("loading conversation..."),
            ConversationState::AwaitingAnswer => {
                print_conversation(chat);
                println!("  ...");
            }
            ConversationState::Idle | ConversationState::Empty => print_conversation(chat),
        },
        AppEvent::SourcesToggled { .. } => print_conversation(chat),
        AppEvent::UploadStateChanged(true) => println!("uploading..."),
        AppEvent::ErrorNotice(Some(notice)) => println!("error: {notice} (`dismiss` to clear)"),
        AppEvent::SelectionChanged(_)
        | AppEvent::UploadStateChanged(false)
        | AppEvent::ErrorNotice(None) => {}
    }
}

fn print_documents(chat: &DocChat) {
    let documents = chat.session().documents();
    if documents.is_empty() {
        println!("No documents uploaded yet");
        return;
    }
    let selected = chat.session().selected_id();
    for document in documents {
        let marker = if Some(document.id) == selected { '*' } else { ' ' };
        println!(
            "{marker} #{:<5} {}  ({})",
            document.id,
            document.title,
            document.uploaded_at.format("%Y-%m-%d")
        );
    }
}

fn print_conversation(chat: &DocChat) {
    let conversation = chat.conversation();
    let messages = conversation.messages();
    if messages.is_empty() {
        println!("{}", conversation.welcome_text());
        return;
    }
    for (i, message) in messages.iter().enumerate() {
        print!("{}", render_message(i + 1, message, conversation.is_expanded(&message.id)));
    }
}

fn render_message(n: usize, message: &Message, expanded: bool) -> String {
    let speaker = match message.role {
        Role::Question => "you",
        Role::Answer => "assistant",
        Role::Error => "error",
    };
    let mut out = format!("[{n}] {speaker}: {}\n", message.content);
    if let Some(summary) = message.sources_summary() {
        let arrow = if expanded { 'v' } else { '>' };
        out.push_str(&format!("    {arrow} {summary}\n"));
        if expanded {
            for (i, source) in message.sources.iter().flatten().enumerate() {
                out.push_str(&format!(
                    "      Passage {} {} {}\n",
                    i + 1,
                    relevance_bar(source.relevance_percent()),
                    source.text
                ));
            }
        }
    }
    out
}

fn relevance_bar(percent: f64) -> String {
    const WIDTH: usize = 10;
    let filled = ((percent / 100.0) * WIDTH as f64).round() as usize;
    let filled = filled.min(WIDTH);
    format!("[{}{}]", "#".repeat(filled), " ".repeat(WIDTH - filled))
}
