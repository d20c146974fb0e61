use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use localgrok_core::models::{MODEL_OPTIONS, supports_reasoning};
use localgrok_core::services::{ChatBackend, OllamaClient};
use localgrok_core::{
    ChatError, ChatOrchestrator, ConnectionStatus, ConversationStore, InMemoryConversationStore,
    OrchestratorConfig, Preferences, SettingsJsonRepository, SettingsRepository,
    SqliteConversationStore, TurnHandle, TurnOutcome,
};

#[derive(Parser)]
#[command(
    name = "localgrok",
    version,
    about = "Chat with a local Ollama server, with optional web search"
)]
struct Cli {
    /// Model server host (IP or hostname)
    #[arg(long, env = "LOCALGROK_HOST", global = true)]
    host: Option<String>,
    /// Model server port
    #[arg(long, env = "LOCALGROK_PORT", global = true)]
    port: Option<u16>,
    /// SearXNG port on the same host
    #[arg(long, env = "LOCALGROK_SEARCH_PORT", global = true)]
    search_port: Option<u16>,
    /// Model id for new messages
    #[arg(long, env = "LOCALGROK_MODEL", global = true)]
    model: Option<String>,
    /// Persist the overrides above as the new defaults
    #[arg(long, global = true)]
    save: bool,
    /// Conversation database path
    #[arg(long, env = "LOCALGROK_DB", global = true)]
    db: Option<PathBuf>,
    /// Keep chats in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat {
        /// Start with web search and reasoning enabled
        #[arg(long)]
        tools: bool,
        /// Continue an existing chat
        #[arg(long)]
        chat: Option<i64>,
    },
    /// List chats, most recent first
    Chats,
    /// List models installed on the server
    Models,
    /// Check that the server is reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays the transcript
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("localgrok=info,localgrok_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let preferences = load_preferences(&cli).await?;
    let config = OrchestratorConfig::default();

    match cli.command.unwrap_or(Command::Chat {
        tools: false,
        chat: None,
    }) {
        Command::Ping => ping(&preferences, &config).await,
        Command::Models => list_models(&preferences, &config).await,
        Command::Chats => {
            let store = open_store(cli.db.as_ref(), cli.ephemeral).await?;
            list_chats(store.as_ref()).await
        }
        Command::Chat { tools, chat } => {
            let store = open_store(cli.db.as_ref(), cli.ephemeral).await?;
            let orchestrator = ChatOrchestrator::from_preferences(store, &preferences, config)?;
            run_chat(orchestrator, tools, chat).await
        }
    }
}

async fn load_preferences(cli: &Cli) -> Result<Preferences> {
    let repo = SettingsJsonRepository::new()?;
    let mut preferences = repo.load().await.context("Failed to load settings")?;

    if let Some(host) = &cli.host {
        preferences.server_host = host.clone();
    }
    if let Some(port) = cli.port {
        preferences.server_port = port;
    }
    if let Some(port) = cli.search_port {
        preferences.search_port = port;
    }
    if let Some(model) = &cli.model {
        preferences.default_model = model.clone();
    }
    let preferences = preferences.normalized();

    if cli.save {
        repo.save(preferences.clone())
            .await
            .context("Failed to save settings")?;
        info!("Saved settings");
    }

    Ok(preferences)
}

async fn open_store(db: Option<&PathBuf>, ephemeral: bool) -> Result<Arc<dyn ConversationStore>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryConversationStore::new()));
    }
    let store = match db {
        Some(path) => SqliteConversationStore::open(path).await,
        None => SqliteConversationStore::new().await,
    }
    .context("Failed to open conversation database")?;
    Ok(Arc::new(store))
}

fn client(preferences: &Preferences, config: &OrchestratorConfig) -> Result<OllamaClient> {
    Ok(OllamaClient::new(
        preferences.server_url(),
        config.server_connect_timeout,
        config.server_read_timeout,
    )?)
}

async fn ping(preferences: &Preferences, config: &OrchestratorConfig) -> Result<()> {
    let client = client(preferences, config)?;
    client
        .health_check()
        .await
        .with_context(|| format!("{} is not reachable", client.base_url()))?;
    println!("{} is reachable", client.base_url());
    Ok(())
}

async fn list_models(preferences: &Preferences, config: &OrchestratorConfig) -> Result<()> {
    let models = client(preferences, config)?
        .list_models()
        .await
        .context("Failed to list models")?;

    for model in models {
        let tag = MODEL_OPTIONS
            .iter()
            .find(|o| o.model_id == model.name)
            .map(|o| format!(" [{}]", o.display_name))
            .unwrap_or_default();
        let reasoning = if supports_reasoning(&model.name) {
            " (reasoning)"
        } else {
            ""
        };
        println!(
            "{}{tag}{reasoning}  {} {}",
            model.name,
            model.parameter_size.as_deref().unwrap_or("?"),
            model.quantization_level.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

async fn list_chats(store: &dyn ConversationStore) -> Result<()> {
    for chat in store.list_chats().await? {
        println!("{:>4}  {}  ({})", chat.id, chat.title, chat.model);
    }
    Ok(())
}

const HELP: &str = "Commands: /new, /chats, /open <id>, /rename <title>, /delete <id>, \
/model <id>, /brain, /ping, /help, /quit. Ctrl-C stops a reply.";

async fn run_chat(orchestrator: ChatOrchestrator, tools: bool, chat: Option<i64>) -> Result<()> {
    if tools {
        orchestrator.toggle_brain();
    }
    if let Some(chat_id) = chat {
        orchestrator.select_chat(chat_id).await?;
    }

    let status = orchestrator.refresh_server_connection().await;
    print_status(&orchestrator, &status);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match handle_command(&orchestrator, command).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    continue;
                }
            }
        }

        if !orchestrator.connection_status().get().is_connected() {
            // One more probe before falling back to the setup hint.
            if !orchestrator.refresh_server_connection().await.is_connected() {
                let reminder = orchestrator.send_setup_reminder().await?;
                println!("{}\n", reminder.content);
                continue;
            }
        }

        match orchestrator.send(line).await {
            Ok(handle) => render_turn(&orchestrator, handle).await?,
            Err(ChatError::TurnInProgress { .. }) => eprintln!("A reply is still being generated."),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Returns `Ok(false)` when the user asked to quit.
async fn handle_command(orchestrator: &ChatOrchestrator, command: &str) -> Result<bool> {
    let (name, arg) = command
        .split_once(' ')
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => return Ok(false),
        "help" => println!("{HELP}"),
        "new" => {
            let chat = orchestrator.create_new_chat().await?;
            println!("Started chat {}", chat.id);
        }
        "chats" => list_chats(orchestrator.store().as_ref()).await?,
        "open" => {
            let id: i64 = arg.parse().context("Usage: /open <id>")?;
            let chat = orchestrator.select_chat(id).await?;
            println!("Opened \"{}\"", chat.title);
            for message in orchestrator.store().messages_for_chat(id).await? {
                println!("[{}] {}", message.role, message.content);
            }
        }
        "rename" => {
            let id = orchestrator
                .session()
                .current_chat
                .get()
                .context("No chat selected")?;
            orchestrator.rename_chat(id, arg).await?;
        }
        "delete" => {
            let id: i64 = arg.parse().context("Usage: /delete <id>")?;
            orchestrator.delete_chat(id).await?;
            println!("Deleted chat {id}");
        }
        "model" => {
            if arg.is_empty() {
                println!("Model: {}", orchestrator.session().selected_model.get());
            } else {
                orchestrator.set_model(arg);
                println!("Model set to {arg}");
            }
        }
        "brain" => {
            let on = orchestrator.toggle_brain();
            println!("Tools & reasoning {}", if on { "on" } else { "off" });
        }
        "ping" => {
            let status = orchestrator.refresh_server_connection().await;
            print_status(orchestrator, &status);
        }
        other => println!("Unknown command /{other}. {HELP}"),
    }
    Ok(true)
}

fn print_status(orchestrator: &ChatOrchestrator, status: &ConnectionStatus) {
    let model = orchestrator.session().selected_model.get();
    match status {
        ConnectionStatus::Connected => println!(
            "Connected. Model: {model}, {} models installed.",
            orchestrator.available_models().get().len()
        ),
        ConnectionStatus::Error(reason) => println!("Not connected: {reason}"),
        other => println!("Connection: {other:?}"),
    }
}

/// Print the reply as it streams. Ctrl-C stops generation.
async fn render_turn(orchestrator: &ChatOrchestrator, handle: TurnHandle) -> Result<()> {
    let message_id = handle.message_id;
    let mut updates = orchestrator.streaming_state().watch();
    let mut printed_reasoning = 0;
    let mut shown = String::new();
    let mut tool_announced = false;

    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            changed = updates.changed() => {
                if changed.is_err() {
                    continue;
                }
                let Some(state) = updates
                    .borrow_and_update()
                    .clone()
                    .filter(|s| s.message_id == message_id)
                else {
                    continue;
                };

                let mut out = std::io::stdout().lock();
                if state.reasoning.len() > printed_reasoning {
                    write!(out, "{}", &state.reasoning[printed_reasoning..])?;
                    printed_reasoning = state.reasoning.len();
                }
                if state.is_executing_tool && !tool_announced {
                    writeln!(out, "\n[{}…]", state.tool_display_name)?;
                    tool_announced = true;
                }
                if let Some(fresh) = state.content.strip_prefix(shown.as_str())
                    && !fresh.is_empty()
                {
                    if shown.is_empty() && printed_reasoning > 0 {
                        writeln!(out, "\n---")?;
                    }
                    write!(out, "{fresh}")?;
                    shown.push_str(fresh);
                }
                out.flush()?;
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                orchestrator.stop_generation().await?;
            }
        }
    };

    // The final write may carry text that never reached the live view.
    if let Some(message) = orchestrator.store().get_message(message_id).await? {
        match message.content.strip_prefix(shown.as_str()) {
            Some(rest) => print!("{rest}"),
            None => print!("\n{}", message.content),
        }
    }
    println!();

    match outcome {
        TurnOutcome::Complete => {}
        TurnOutcome::Cancelled => println!("[stopped]"),
        TurnOutcome::Failed(reason) => eprintln!("error: {reason}"),
    }
    println!();
    Ok(())
}
