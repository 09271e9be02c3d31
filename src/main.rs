//! chatstream - streaming chat completions in the terminal
//!
//! A line-oriented front end over a session state machine that streams
//! answers from an OpenAI-compatible endpoint.

mod config;
mod history;
mod llm;
mod runtime;
mod state_machine;

use config::{ConfigStore, ControllerOptions, MemoryConfigStore, SqliteConfigStore};
use llm::{LoggingTransport, OpenAIStreamTransport};
use runtime::{SessionController, SessionUpdate};
use state_machine::SessionStatus;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "Commands: /clear /cancel /history /config /set <field> <value> /save /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so the transcript on stdout stays readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatstream=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Configuration
    let db_path = std::env::var("CHATSTREAM_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.chatstream/chatstream.db")
    });
    let store = open_store(&db_path);

    let transport = LoggingTransport::new(Arc::new(OpenAIStreamTransport::new()?));
    let controller = SessionController::spawn(transport, store, ControllerOptions::from_env());

    let config = controller.config().await?.with_env_overrides();
    if config.api_key.is_empty() {
        tracing::warn!("No API key configured. Set OPENAI_API_KEY or use /set apiKey <key>.");
    }
    if let Err(e) = controller.update_config(config).await {
        tracing::warn!(error = %e, "Ignoring invalid environment overrides");
    }

    run_repl(&controller).await
}

fn open_store(db_path: &str) -> Arc<dyn ConfigStore> {
    if let Some(parent) = PathBuf::from(db_path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(path = %parent.display(), error = %e, "Failed to create data directory");
        }
    }

    tracing::info!(path = %db_path, "Opening settings database");
    match SqliteConfigStore::open(db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "Settings database unavailable, settings will not persist");
            Arc::new(MemoryConfigStore::new())
        }
    }
}

async fn run_repl(controller: &SessionController) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = controller.subscribe();
    let mut shown = String::new();

    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(controller, line.trim()).await? {
                    break;
                }
            }

            update = updates.recv() => match update {
                Ok(update) => render(&mut std::io::stdout().lock(), &mut shown, &update)?,
                // The next snapshot fills in whatever was skipped
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Display fell behind, skipped updates");
                }
                Err(RecvError::Closed) => break,
            },

            result = tokio::signal::ctrl_c() => {
                result?;
                if controller.current_state() == SessionStatus::Idle {
                    break;
                }
                controller.cancel().await?;
            }
        }
    }

    Ok(())
}

/// Returns `false` when the user asked to quit
async fn handle_line(
    controller: &SessionController,
    line: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    if line.is_empty() {
        return Ok(true);
    }

    let Some(command) = line.strip_prefix('/') else {
        if let Err(e) = controller.send(line).await {
            eprintln!("[{}] {e}", e.kind.as_str());
        }
        return Ok(true);
    };

    let mut parts = command.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("quit" | "exit"), _, _) => return Ok(false),
        (Some("cancel"), _, _) => controller.cancel().await?,
        (Some("clear"), _, _) => match controller.clear().await {
            Ok(()) => println!("[history cleared]"),
            Err(e) => eprintln!("[{}] {e}", e.kind.as_str()),
        },
        (Some("history"), _, _) => {
            for turn in controller.history().await? {
                println!("{}: {}", turn.role().as_str(), turn.content());
            }
        }
        (Some("config"), _, _) => println!("{:#?}", controller.config().await?),
        (Some("set"), Some(field), Some(value)) => {
            let mut config = controller.config().await?;
            let result = match config.set_field(field, value.trim()) {
                Ok(()) => controller.update_config(config).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => println!("[{field} updated]"),
                Err(e) => eprintln!("[{}] {e}", e.kind.as_str()),
            }
        }
        (Some("save"), _, _) => match controller.save_config().await {
            Ok(()) => println!("[config saved]"),
            Err(e) => eprintln!("[error] {e}"),
        },
        _ => println!("{HELP}"),
    }

    Ok(true)
}

/// Bring `shown` up to `text` and return what has to be written for it.
/// A snapshot that does not extend what is on screen starts a fresh line.
fn catch_up(shown: &mut String, text: &str) -> String {
    let unseen = match text.strip_prefix(shown.as_str()) {
        Some(rest) => rest.to_string(),
        None => format!("\n{text}"),
    };
    shown.clear();
    shown.push_str(text);
    unseen
}

/// Write one update. `shown` is the answer text already on screen; rendering
/// works from the snapshots, so skipped partials are never lost.
fn render(out: &mut impl Write, shown: &mut String, update: &SessionUpdate) -> std::io::Result<()> {
    match update {
        SessionUpdate::StateChanged { status } => {
            // A terminal update may have been skipped
            if *status == SessionStatus::Sending && !shown.is_empty() {
                writeln!(out)?;
                shown.clear();
            }
        }
        SessionUpdate::Partial { delta, text } => {
            if text.strip_prefix(shown.as_str()) == Some(delta.as_str()) {
                write!(out, "{delta}")?;
                shown.push_str(delta);
            } else {
                write!(out, "{}", catch_up(shown, text))?;
            }
            out.flush()?;
        }
        SessionUpdate::Completed { answer } => {
            writeln!(out, "{}", catch_up(shown, answer))?;
            shown.clear();
        }
        SessionUpdate::Failed { error, partial } => {
            if let Some(partial) = partial {
                writeln!(out, "{}", catch_up(shown, partial))?;
            } else if !shown.is_empty() {
                writeln!(out)?;
            }
            shown.clear();
            let suffix = if partial.is_some() {
                " (answer incomplete)"
            } else {
                ""
            };
            eprintln!("[{} error] {error}{suffix}", error.kind.as_str());
        }
        SessionUpdate::Cancelled { partial } => {
            if let Some(partial) = partial {
                write!(out, "{}", catch_up(shown, partial))?;
            }
            shown.clear();
            writeln!(out, "\n[cancelled]")?;
        }
    }
    Ok(())
}
