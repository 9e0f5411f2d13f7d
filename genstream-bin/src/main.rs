use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use genstream_core::{
    config::{Config, PromptCfg},
    engine::{GenerationEngine, ScriptedEngine},
    error_format::ErrorEnvelope,
    handler::{HandlerResponse, RequestHandler},
    metrics::TracingSink,
    model::{ChatMessage, GenerationRequest, Role, Snapshot},
    prompt::PromptBuilder,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "genstream CLI: drive the stream aggregator against a scripted engine", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RequestArgs {
    /// Model name; the configured served model when omitted
    #[arg(long, default_value = "")]
    model: String,
    #[arg(short, long, help = "Message from the user")]
    message: String,
    /// Number of choices to generate
    #[arg(short, long, default_value_t = 1)]
    n: u32,
    /// JSON array of snapshots to replay instead of echoing the input
    #[arg(long)]
    script: Option<PathBuf>,
    #[arg(long)]
    request_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream wire lines as they are produced
    Stream {
        #[command(flatten)]
        request: RequestArgs,
        /// Simulate a client disconnect after this many lines
        #[arg(long)]
        disconnect_after: Option<usize>,
    },
    /// Print the assembled final response
    Complete {
        #[command(flatten)]
        request: RequestArgs,
    },
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_script(path: &Path) -> anyhow::Result<Vec<Snapshot>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing script {}", path.display()))
}

fn build_request(args: &RequestArgs, stream: bool) -> GenerationRequest {
    GenerationRequest {
        request_id: args
            .request_id
            .clone()
            .unwrap_or_else(|| format!("cli-{}", std::process::id())),
        model: args.model.clone(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: args.message.clone(),
        }],
        n: args.n,
        stream,
        sampling: Default::default(),
    }
}

/// Scripted engine for this run: the given script, or an echo of the
/// request's extracted input.
fn build_engine(
    cfg: &Config,
    args: &RequestArgs,
    req: &GenerationRequest,
) -> anyhow::Result<Arc<dyn GenerationEngine>> {
    let engine = match &args.script {
        Some(path) => ScriptedEngine::new(load_script(path)?),
        None => {
            let input_only = PromptCfg {
                template: Some("{input}".into()),
                ..cfg.prompt.clone()
            };
            let input = PromptBuilder::from_config(&input_only)?.build(req)?;
            ScriptedEngine::echo(&input, args.n)
        }
    };
    let engine: Arc<dyn GenerationEngine> = Arc::new(
        engine.with_step_delay(Duration::from_millis(cfg.engine.step_delay_ms)),
    );
    Ok(engine)
}

fn print_envelope(envelope: &ErrorEnvelope) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(envelope)?);
    anyhow::bail!("request failed with status {}", envelope.status_code())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    init_tracing(&cfg.logging.filter);

    let (args, stream, disconnect_after) = match &cli.command {
        Commands::Stream {
            request,
            disconnect_after,
        } => (request, true, *disconnect_after),
        Commands::Complete { request } => (request, false, None),
    };

    let req = build_request(args, stream);
    let engine = build_engine(&cfg, args, &req)?;
    let handler = RequestHandler::from_config(&cfg, engine, Arc::new(TracingSink))?;
    let disconnect = CancellationToken::new();

    match handler.handle(req, disconnect.clone()).await {
        HandlerResponse::Stream(mut lines) => {
            let mut seen = 0usize;
            while let Some(item) = lines.next().await {
                match item {
                    Ok(line) => {
                        print!("{line}");
                        io::stdout().flush().ok();
                        seen += 1;
                        if disconnect_after == Some(seen) {
                            tracing::info!(lines = seen, "simulating client disconnect");
                            disconnect.cancel();
                        }
                    }
                    Err(err) => return print_envelope(&handler.error_envelope(&err)),
                }
            }
        }
        HandlerResponse::Full(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        HandlerResponse::Error { envelope, .. } => return print_envelope(&envelope),
    }

    Ok(())
}
