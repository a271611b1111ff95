use agri_flow::{
    FlowConfig, FlowRunner, HttpToolTransport, ImageInput, InMemorySessionStorage, IntentRefiner,
    OpenRouterRefiner, SessionStorage, TurnEvent, TurnRequest, create_flow_runner,
};
use anyhow::{Context as _, Result};
use clap::Parser;
use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Interactive terminal client for the agricultural assistant.
#[derive(Debug, Parser)]
#[command(name = "agri-assistant", version)]
struct Args {
    /// YAML configuration file (defaults to $AGRI_FLOW_CONFIG, then built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resume an existing session instead of starting a new one
    #[arg(short, long)]
    session: Option<String>,

    /// Print the full structured response after each turn
    #[arg(long)]
    json: bool,

    /// Disable LLM refinement of insurance intents
    #[arg(long)]
    no_refinement: bool,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agri_assistant=info,agri_flow=info".into());

    // Pretty output is easier to read next to the conversation
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(args: &Args) -> Result<FlowConfig> {
    let mut config = match &args.config {
        Some(path) => FlowConfig::from_file(path)?,
        None => FlowConfig::load()?,
    };
    if args.no_refinement {
        config.intent.refinement_enabled = false;
    }
    Ok(config)
}

fn build_refiner(config: &FlowConfig) -> Option<Arc<dyn IntentRefiner>> {
    if !config.intent.refinement_enabled {
        return None;
    }
    match OpenRouterRefiner::from_env(&config.intent.model) {
        Ok(refiner) => {
            info!(model = %config.intent.model, "Insurance intent refinement enabled");
            Some(Arc::new(refiner))
        }
        Err(e) => {
            warn!(error = %e, "Refinement unavailable, using keyword rules only");
            None
        }
    }
}

#[cfg(feature = "postgres")]
async fn build_storage() -> Arc<dyn SessionStorage> {
    use agri_flow::PostgresSessionStorage;

    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        info!("Using PostgreSQL session storage");
        match PostgresSessionStorage::connect(&database_url).await {
            Ok(storage) => return Arc::new(storage),
            Err(e) => error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            ),
        }
    } else {
        info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
    }
    Arc::new(InMemorySessionStorage::new())
}

#[cfg(not(feature = "postgres"))]
async fn build_storage() -> Arc<dyn SessionStorage> {
    info!("Using in-memory session storage");
    Arc::new(InMemorySessionStorage::new())
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

async fn read_image(path: &Path) -> Result<ImageInput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read image {}", path.display()))?;
    Ok(ImageInput::from_bytes(mime_type_for(path), &bytes))
}

/// One parsed line of user input.
enum Command {
    Say(String),
    Image { path: PathBuf, text: String },
    Reset,
    Quit,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("/image") {
        let rest = rest.trim_start();
        let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return Command::Image {
            path: PathBuf::from(path),
            text: text.trim().to_string(),
        };
    }
    match line {
        "/reset" => Command::Reset,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Say(line.to_string()),
    }
}

async fn run_turn(runner: &FlowRunner, request: TurnRequest, json: bool) {
    let mut stream = runner.turn_stream(request).await;
    while let Some(event) = stream.next().await {
        match event {
            TurnEvent::Status { message, .. } => println!("  ... {message}"),
            // Partials repeat inside the final text
            TurnEvent::Partial { .. } => {}
            TurnEvent::Final(response) => {
                println!("\nassistant> {}\n", response.response_text);
                if json {
                    match serde_json::to_string_pretty(&response) {
                        Ok(body) => println!("{body}\n"),
                        Err(e) => warn!(error = %e, "Cannot serialize response"),
                    }
                }
                if response.is_complete {
                    println!("(conversation complete, type /reset to start over)\n");
                }
            }
            TurnEvent::Error { message } => println!("\nassistant> {message}\n"),
        }
    }
}

fn prompt() {
    print!("you> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = load_config(&args)?;
    let transport = Arc::new(HttpToolTransport::new(config.endpoints.clone())?);
    let storage = build_storage().await;
    let refiner = build_refiner(&config);
    let runner = create_flow_runner(&config, transport, storage, refiner)?;

    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(session_id = %session_id, "Session started");
    println!("Agricultural assistant. Commands: /image <path> [text], /reset, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Quit => break,
            Command::Reset => match runner.reset(&session_id).await {
                Ok(_) => println!("Session reset.\n"),
                Err(e) => error!(error = %e, "Failed to reset session"),
            },
            Command::Say(text) if text.is_empty() => {}
            Command::Say(text) => {
                run_turn(&runner, TurnRequest::new(&session_id, text), args.json).await;
            }
            Command::Image { path, text } => match read_image(&path).await {
                Ok(image) => {
                    let request = TurnRequest::new(&session_id, text).with_image(image);
                    run_turn(&runner, request, args.json).await;
                }
                Err(e) => println!("{e:#}\n"),
            },
        }
        prompt();
    }

    info!(session_id = %session_id, "Goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_command_splits_path_and_text() {
        match parse_command("/image leaf.PNG my wheat leaves") {
            Command::Image { path, text } => {
                assert_eq!(path, PathBuf::from("leaf.PNG"));
                assert_eq!(text, "my wheat leaves");
                assert_eq!(mime_type_for(&path), "image/png");
            }
            _ => panic!("expected an image command"),
        }
        match parse_command("/image photo.jpg") {
            Command::Image { path, text } => {
                assert_eq!(path, PathBuf::from("photo.jpg"));
                assert!(text.is_empty());
            }
            _ => panic!("expected an image command"),
        }
    }

    #[test]
    fn control_commands() {
        assert!(matches!(parse_command(" /reset "), Command::Reset));
        assert!(matches!(parse_command("/quit"), Command::Quit));
        assert!(matches!(parse_command("hello"), Command::Say(t) if t == "hello"));
    }
}
