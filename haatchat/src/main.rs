//! `haatchat` client: drive one marketplace conversation from the terminal.
//!
//! Opens a seeded buyer/seller conversation backed by the simulated
//! transport, prints store notifications as they happen, and reads commands
//! from stdin. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/haatchat/config.toml`).
//!
//! ```bash
//! cargo run --bin haatchat
//!
//! # Flaky network, short retry budget
//! cargo run --bin haatchat -- --failure-rate 0.5 --max-retries 1
//! ```

use std::io;
use std::path::Path;

use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use haatchat::app::{self, Command, DisplayMessage};
use haatchat::chat::attachment::PickerResponse;
use haatchat::chat::conversation::{ConversationParams, PeerRole};
use haatchat::chat::inbound::InboundMessage;
use haatchat::chat::store::MessageStore;
use haatchat::chat::{ChatEvent, Draft, RejectionReason, SendPipeline};
use haatchat::config::{CliArgs, ClientConfig};
use haatchat::inbox;
use haatchat::presence::PresenceSignaler;
use haatchat::transport::simulated::SimulatedTransport;
use haatchat_proto::message::{ConversationId, LocalUserId, Message};

const PEER_LABEL: &str = "John Doe";

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so they do not interleave with the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("haatchat starting");
    let result = run(&config).await;
    tracing::info!("haatchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("haatchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_env("HAATCHAT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Sets up the conversation and runs the command loop until `/quit` or EOF.
async fn run(config: &ClientConfig) -> io::Result<()> {
    let store = MessageStore::new();
    let conversation = store.open(
        ConversationParams::new(PEER_LABEL, "Goat - Jamunapari", LocalUserId::new("seller-1"))
            .with_avatar("https://via.placeholder.com/50")
            .with_role(PeerRole::Buyer),
    );

    let (transport, receipts) = SimulatedTransport::new(config.simulated_config());
    let pipeline = SendPipeline::new(
        store.clone(),
        transport,
        config.attachment_resolver(),
        config.pipeline_config(),
    );
    let receipt_pump = pipeline.spawn_receipt_pump(receipts);

    let (_subscription, mut events) = store
        .subscribe_channel(&conversation)
        .map_err(io::Error::other)?;
    let timestamp_format = config.timestamp_format.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event, &timestamp_format);
        }
    });

    seed(&pipeline, &conversation);

    let presence = if config.presence_enabled {
        let signaler = PresenceSignaler::new(store.clone());
        Some(
            signaler
                .start(&conversation, config.typing_interval)
                .map_err(io::Error::other)?,
        )
    } else {
        None
    };

    println!("Chatting with {PEER_LABEL} about Goat - Jamunapari. /help for commands.");
    for (i, reply) in config.quick_replies.iter().enumerate() {
        println!("  /quick {}  {reply}", i + 1);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        handle_command(&pipeline, &conversation, command, config);
    }

    if let Some(handle) = presence {
        handle.stop();
    }
    pipeline.flush().await;
    pipeline.shutdown();
    receipt_pump.abort();
    printer.abort();
    Ok(())
}

/// The three messages the conversation opens with.
fn seed(pipeline: &SendPipeline<SimulatedTransport>, conversation: &ConversationId) {
    let seeded = [
        pipeline
            .receive_inbound(
                conversation,
                InboundMessage::text("Is the goat still available?").read(),
            )
            .map(|_| ())
            .map_err(|e| e.to_string()),
        pipeline
            .compose(
                conversation,
                Draft::text("Yes, it's available! Do you want more photos?"),
            )
            .map(|_| ())
            .map_err(|e| e.to_string()),
        pipeline
            .receive_inbound(
                conversation,
                InboundMessage::image("https://via.placeholder.com/200"),
            )
            .map(|_| ())
            .map_err(|e| e.to_string()),
    ];
    for result in seeded {
        if let Err(e) = result {
            tracing::warn!(error = %e, "could not seed conversation");
        }
    }
}

fn handle_command(
    pipeline: &SendPipeline<SimulatedTransport>,
    conversation: &ConversationId,
    command: Command,
    config: &ClientConfig,
) {
    let composed = match command {
        Command::Text(text) => pipeline.compose(conversation, Draft::Text(text)),
        Command::Image(uri) => pipeline.compose(conversation, Draft::Image(PickerResponse::picked(uri))),
        Command::ImageCancel => pipeline.compose(conversation, Draft::Image(PickerResponse::Cancelled)),
        Command::Quick(index) => pipeline.compose_quick_reply(conversation, index),
        Command::Retry(id) => {
            if let Err(e) = pipeline.retry(conversation, id) {
                println!("cannot retry {id}: {e}");
            }
            return;
        }
        Command::Read => {
            match pipeline.mark_read(conversation) {
                Ok(n) => println!("marked {n} message(s) read"),
                Err(e) => println!("{e}"),
            }
            return;
        }
        Command::List => {
            print_conversation(pipeline.store(), conversation, &config.timestamp_format);
            return;
        }
        Command::Inbox(query) => {
            for summary in inbox::summarize(pipeline.store(), &query) {
                println!("{}", app::render_summary(&summary));
            }
            return;
        }
        Command::Dump => {
            dump(pipeline.store(), conversation);
            return;
        }
        Command::Help => {
            println!("{}", app::HELP);
            return;
        }
        Command::Quit => return,
    };

    match composed {
        Ok(_) | Err(RejectionReason::EmptyDraft) => {}
        Err(e) => println!("not sent: {e}"),
    }
}

fn print_event(event: &ChatEvent, timestamp_format: &str) {
    if let ChatEvent::MessageAppended { message, .. } = event {
        println!("{}", display(message, timestamp_format).render());
    } else if let Some(line) = app::describe_event(event, PEER_LABEL) {
        println!("  {line}");
    }
}

fn print_conversation(store: &MessageStore, conversation: &ConversationId, timestamp_format: &str) {
    match store.list(conversation) {
        Ok(log) => {
            for message in &log {
                println!("{}", display(&message, timestamp_format).render());
            }
        }
        Err(e) => println!("{e}"),
    }
}

fn dump(store: &MessageStore, conversation: &ConversationId) {
    let messages: Vec<Message> = match store.list(conversation) {
        Ok(log) => log.iter().collect(),
        Err(e) => {
            println!("{e}");
            return;
        }
    };
    match serde_json::to_string_pretty(&messages) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("could not serialize conversation: {e}"),
    }
}

fn display(message: &Message, timestamp_format: &str) -> DisplayMessage {
    DisplayMessage::from_message(message, PEER_LABEL, timestamp_format, &Local)
}
