//! Interactive terminal front end for the conversation coordinator.
//!
//! Reads lines from stdin: `/`-prefixed lines are commands, anything else is
//! a typed turn. Assistant messages are printed to stdout; all tracing output
//! goes to stderr so the conversation stays readable.
//!
//! Usage: `voxchat [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use voxchat::llm::ApiGenerationClient;
use voxchat::retrieval::HttpContextRetriever;
use voxchat::speech::ConsoleSpeech;
use voxchat::{ChatConfig, ChatEvent, ConversationCoordinator, TurnOrigin, TurnOutcome};

const HELP: &str = "\
commands:
  /new                 start a new session
  /sessions            list sessions
  /switch <id>         switch to a session
  /delete <id>         delete a session
  /models              list models
  /model <id>          load a model
  /download <id>       download and load a model
  /refresh             reload the model list
  /voice               toggle voice mode
  /conversation        toggle conversation mode
  /rag                 toggle online context
  /quit                exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let generation = Arc::new(ApiGenerationClient::new(config.api.clone()));
    let retriever = Arc::new(
        HttpContextRetriever::new(&config.retrieval)
            .map_err(|e| anyhow::anyhow!("failed to build retrieval client: {e}"))?,
    );
    let (speech, speech_events) = ConsoleSpeech::new();

    let coordinator =
        ConversationCoordinator::new(config, generation, retriever, Arc::new(speech));
    coordinator.attach_speech_events(speech_events);

    let printer = tokio::spawn(print_events(coordinator.clone()));

    println!("voxchat v{}", env!("CARGO_PKG_VERSION"));
    coordinator.initialize().await;
    println!("{}", coordinator.snapshot().status_text);
    println!("type /help for commands\n");

    let result = tokio::select! {
        res = run_repl(&coordinator) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down...");
            Ok(())
        }
    };

    coordinator.shutdown().await;
    printer.abort();
    result
}

fn load_config() -> anyhow::Result<ChatConfig> {
    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => ChatConfig::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display())),
        None => {
            let path = ChatConfig::default_config_path();
            if path.exists() {
                Ok(ChatConfig::from_file(&path)?)
            } else {
                Ok(ChatConfig::default())
            }
        }
    }
}

async fn run_repl(coordinator: &ConversationCoordinator) -> anyhow::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            tracing::info!("stdin closed; exiting");
            return Ok(());
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let Some(command) = input.strip_prefix('/') else {
            match coordinator.submit_turn(input, TurnOrigin::Typed).await {
                TurnOutcome::Completed { .. } => {}
                TurnOutcome::Deferred => println!("started a new session, send your message again"),
                TurnOutcome::Dropped(reason) => println!("not sent: {reason:?}"),
                TurnOutcome::Cancelled => {}
            }
            continue;
        };

        let (name, arg) = match command.split_once(' ') {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match name {
            "quit" | "exit" => return Ok(()),
            "help" => println!("{HELP}"),
            "new" => {
                coordinator.start_new_session();
            }
            "sessions" => {
                let state = coordinator.snapshot();
                for summary in &state.sessions {
                    let marker = if state.active_session_id.as_deref() == Some(summary.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{marker} {}  {} ({} messages)",
                        summary.id, summary.title, summary.message_count
                    );
                }
            }
            "switch" => report(coordinator.select_session(arg)),
            "delete" => report(coordinator.delete_session(arg)),
            "models" => {
                let state = coordinator.snapshot();
                for model in &state.available_models {
                    let current = state.current_model_id.as_deref() == Some(model.id.as_str());
                    println!(
                        "{} {}  {}{}",
                        if current { "*" } else { " " },
                        model.id,
                        model.name,
                        if model.is_downloaded { "" } else { " (not downloaded)" }
                    );
                }
            }
            "model" => report(coordinator.select_model(arg).await),
            "download" => report(coordinator.download_model(arg).await),
            "refresh" => report(coordinator.refresh_models().await),
            "voice" => println!("voice mode: {}", on_off(coordinator.toggle_voice_mode())),
            "conversation" => println!(
                "conversation mode: {}",
                on_off(coordinator.toggle_conversation_mode())
            ),
            "rag" => println!(
                "online context: {}",
                on_off(coordinator.toggle_context_augmentation())
            ),
            other => println!("unknown command /{other}, try /help"),
        }
    }
}

/// Print assistant messages and download progress as they happen.
async fn print_events(coordinator: ConversationCoordinator) {
    let mut events = coordinator.subscribe_events();
    loop {
        match events.recv().await {
            Ok(ChatEvent::MessageAppended { message, .. }) if !message.is_user => {
                let tag = if message.has_context { " [context]" } else { "" };
                println!("assistant{tag}> {}", message.text);
            }
            Ok(ChatEvent::DownloadProgress { model_id, fraction }) => {
                println!("downloading {model_id}: {:.0}%", fraction * 100.0);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => tracing::debug!("event printer lagged by {n}"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn report(result: voxchat::Result<()>) {
    if let Err(e) = result {
        println!("error: {e}");
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
