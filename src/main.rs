use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use waav_session::{
    AgentSpec, AudioTapRegistry, BackendClient, ChatMessage, ConnectionHost, EngineConfig,
    HttpCredentialIssuer, HttpPromptStore, InstructionTemplate, OpenAITransportFactory,
    RemoteAudioMeter, SessionController, SessionServices, SoftwareAudioBackend, ToolEvent, decode,
    session::{DEFAULT_TEMPLATE, resolve_template},
};

/// Quiet period before a streamed message is printed.
const PRINT_SETTLE: Duration = Duration::from_millis(600);

/// WaaV Session - Realtime conversational session engine
#[derive(Parser, Debug)]
#[command(name = "waav-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Strip tool blocks from assistant text and print the decoded commands
    Decode {
        /// Text to decode (read from stdin if omitted)
        text: Option<String>,
    },

    /// Hold a text conversation with the realtime agent
    Chat {
        /// Path to configuration file (YAML)
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Template context value, repeatable (values may be JSON)
        #[arg(long = "context", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        context: Vec<(String, String)>,

        /// Agent display name
        #[arg(long = "name", default_value = "Asistente")]
        name: String,

        /// Print the remote audio level while the agent speaks
        #[arg(long = "meter")]
        meter: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// JSON values stay structured, anything else is a plain string.
fn context_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { text } => run_decode(text),
        Commands::Chat {
            config,
            context,
            name,
            meter,
        } => run_chat(config, context, name, meter).await,
    }
}

fn run_decode(text: Option<String>) -> anyhow::Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    let decoded = decode(&text);
    let output = json!({
        "cleanText": decoded.clean_text,
        "commands": decoded.commands,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    context: Vec<(String, String)>,
    name: String,
    with_meter: bool,
) -> anyhow::Result<()> {
    // Crypto provider for the rustls-backed WebSocket and HTTP clients
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::from_file(&path)?
        }
        None => EngineConfig::from_env()?,
    };

    let backend = BackendClient::from_config(&config)?;
    let credentials = Arc::new(HttpCredentialIssuer::new(backend.clone()));
    let prompts = Arc::new(HttpPromptStore::new(backend));

    let template = resolve_template(prompts.as_ref(), &config.profile_id, DEFAULT_TEMPLATE).await;
    let mut agent = AgentSpec::new(name.clone(), InstructionTemplate::new(template))
        .with_context("agent_name", name);
    for (key, value) in &context {
        agent = agent.with_context(key.clone(), context_value(value));
    }
    if let Some(voice) = &config.voice {
        agent = agent.with_voice(voice.clone());
    }

    let mut transport_config = config.openai_config();
    transport_config.audio_input = false;

    let connections = Arc::new(ConnectionHost::default());
    let services = SessionServices::new(
        credentials,
        Arc::new(OpenAITransportFactory::new(transport_config)),
    )
    .with_connections(connections.clone())
    .with_prompts(prompts);
    let controller = SessionController::new(services, agent, config.session_options());

    let meter = if with_meter {
        let registry = AudioTapRegistry::new(connections);
        let meter = RemoteAudioMeter::mount_with_interval(
            &registry,
            Arc::new(SoftwareAudioBackend),
            config.meter_poll_interval(),
        )?;
        tokio::spawn(print_volume(meter.subscribe_volume()));
        Some(meter)
    } else {
        None
    };

    let (messages_tx, messages_rx) = mpsc::unbounded_channel();
    controller.on_messages(Arc::new(move |messages: Vec<ChatMessage>| {
        let _ = messages_tx.send(messages);
        Box::pin(async {})
    }));
    controller.on_tool_event(Arc::new(|event: ToolEvent| {
        Box::pin(async move {
            match serde_json::to_string(&event) {
                Ok(line) => println!("tool> {line}"),
                Err(e) => tracing::warn!("Failed to serialize tool event: {}", e),
            }
        })
    }));
    let printer = tokio::spawn(print_messages(messages_rx));

    let mut status = controller.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            eprintln!("[{current}]");
        }
    });

    controller.connect().await?;
    eprintln!("Type a message, /mute, /restart or /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let result = match line.trim() {
            "/quit" => break,
            "/mute" => controller.toggle_mute().await.map(|muted| {
                eprintln!("[{}]", if muted { "muted" } else { "unmuted" });
            }),
            "/restart" => controller.restart().await,
            text => controller.send_text(text).await,
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
        }
        if let Some(error) = controller.error() {
            eprintln!("session error: {error}");
        }
    }

    controller.shutdown().await?;
    if let Some(meter) = meter {
        meter.unmount();
    }
    printer.abort();
    Ok(())
}

/// Print messages once their text stops changing.
async fn print_messages(mut rx: mpsc::UnboundedReceiver<Vec<ChatMessage>>) {
    let mut printed: HashMap<String, String> = HashMap::new();
    let mut pending: Option<Vec<ChatMessage>> = None;

    loop {
        let next = if pending.is_some() {
            tokio::time::timeout(PRINT_SETTLE, rx.recv()).await
        } else {
            Ok(rx.recv().await)
        };

        match next {
            Ok(Some(messages)) => pending = Some(messages),
            Ok(None) => {
                flush_messages(pending.take(), &mut printed);
                break;
            }
            Err(_) => flush_messages(pending.take(), &mut printed),
        }
    }
}

fn flush_messages(messages: Option<Vec<ChatMessage>>, printed: &mut HashMap<String, String>) {
    for message in messages.into_iter().flatten() {
        if message.text.is_empty() || printed.get(&message.id) == Some(&message.text) {
            continue;
        }
        println!("{}> {}", message.role, message.text);
        printed.insert(message.id, message.text);
    }
}

async fn print_volume(mut volume: tokio::sync::watch::Receiver<f32>) {
    let mut shown = 0.0f32;
    while volume.changed().await.is_ok() {
        let level = *volume.borrow_and_update();
        if (level - shown).abs() >= 0.05 {
            shown = level;
            let bars = (level * 40.0).round() as usize;
            eprintln!("[volume {:>4.2}] {}", level, "#".repeat(bars.min(40)));
        }
    }
}
