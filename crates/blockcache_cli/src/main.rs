//! blockcache CLI: one-shot lookups, or a JSON-lines request loop on stdin.

use blockcache::{BlockDescriptor, ChainService, ServiceConfig, ServiceError};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let service = ChainService::open(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Block(args) => rt.block_on(run_block(&service, &cli.identity, args)),
        Command::Tx(args) => rt.block_on(run_tx(&service, &cli.identity, args)),
        Command::Receipt(args) => rt.block_on(run_receipt(&service, &cli.identity, args)),
        Command::Serve => rt.block_on(serve(Arc::new(service))),
    }
}

#[derive(Parser)]
#[command(name = "blockcache")]
#[command(about = "Tiered block, transaction and receipt cache in front of a JSON-RPC node")]
struct Cli {
    /// Config file; defaults to $BLOCKCACHE_CONFIG_PATH, then ./config/blockcache.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    rpc_url: Option<String>,
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Caller identity charged against the rate limiter for one-shot commands.
    #[arg(long, global = true, default_value = "cli")]
    identity: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a block by number or by latest/finalized/safe.
    Block(BlockArgs),
    /// Resolve a mined transaction by hash.
    Tx(HashArgs),
    /// Resolve a transaction receipt by hash.
    Receipt(HashArgs),
    /// Answer JSON-lines requests from stdin until EOF or ctrl-c.
    Serve,
}

#[derive(Parser)]
struct BlockArgs {
    descriptor: String,
    /// Include full transaction records.
    #[arg(long)]
    full: bool,
}

#[derive(Parser)]
struct HashArgs {
    hash: String,
}

fn load_config(cli: &Cli) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.rpc_url {
        config.rpc.url = url.clone();
    }
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Accept a `0x`-prefixed 32-byte hex hash and return its canonical form.
fn check_hash(hash: &str) -> Result<String, String> {
    let trimmed = hash.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| format!("hash must be 0x-prefixed: {}", trimmed))?;
    let bytes = hex::decode(digits).map_err(|e| format!("invalid hash {}: {}", trimmed, e))?;
    if bytes.len() != 32 {
        return Err(format!("hash must be 32 bytes, got {}", bytes.len()));
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_block(
    service: &ChainService,
    identity: &str,
    args: BlockArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor: BlockDescriptor = args.descriptor.parse()?;
    let block = service.block(identity, descriptor, args.full).await?;
    print_json(&block)
}

async fn run_tx(
    service: &ChainService,
    identity: &str,
    args: HashArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let hash = check_hash(&args.hash)?;
    let tx = service.transaction(identity, &hash).await?;
    print_json(&tx)
}

async fn run_receipt(
    service: &ChainService,
    identity: &str,
    args: HashArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let hash = check_hash(&args.hash)?;
    let receipt = service.receipt(identity, &hash).await?;
    print_json(&receipt)
}

/// One line of `serve` input, e.g.
/// `{"id": 1, "identity": "10.0.0.1", "kind": "block", "target": "latest", "full": true}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    identity: String,
    #[serde(flatten)]
    request: Request,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Request {
    Block {
        target: String,
        #[serde(default)]
        full: bool,
    },
    Tx {
        hash: String,
    },
    Receipt {
        hash: String,
    },
}

#[derive(Debug, Serialize)]
struct Failure {
    kind: &'static str,
    message: String,
}

impl Failure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: "bad_request",
            message: message.into(),
        }
    }
}

impl From<ServiceError> for Failure {
    fn from(e: ServiceError) -> Self {
        let kind = match e {
            ServiceError::RateLimited(_) => "rate_limited",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Server(_) | ServiceError::Startup(_) => "server_error",
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Self {
            kind: "server_error",
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Failure>,
}

async fn dispatch(
    service: &ChainService,
    identity: &str,
    request: Request,
) -> Result<Value, Failure> {
    match request {
        Request::Block { target, full } => {
            let descriptor: BlockDescriptor = target
                .parse()
                .map_err(|e: blockcache::DescriptorError| Failure::bad_request(e.to_string()))?;
            Ok(serde_json::to_value(service.block(identity, descriptor, full).await?)?)
        }
        Request::Tx { hash } => {
            let hash = check_hash(&hash).map_err(Failure::bad_request)?;
            Ok(serde_json::to_value(service.transaction(identity, &hash).await?)?)
        }
        Request::Receipt { hash } => {
            let hash = check_hash(&hash).map_err(Failure::bad_request)?;
            Ok(serde_json::to_value(service.receipt(identity, &hash).await?)?)
        }
    }
}

async fn handle(service: &ChainService, line: &str) -> Response {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Response {
                id: None,
                ok: None,
                error: Some(Failure::bad_request(e.to_string())),
            }
        }
    };
    match dispatch(service, &envelope.identity, envelope.request).await {
        Ok(value) => Response {
            id: envelope.id,
            ok: Some(value),
            error: None,
        },
        Err(failure) => Response {
            id: envelope.id,
            ok: None,
            error: Some(failure),
        },
    }
}

async fn serve(service: Arc<ChainService>) -> Result<(), Box<dyn std::error::Error>> {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
        info!("interrupted");
    };
    info!("serving requests from stdin");
    let summary = serve_lines(
        service,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        interrupt,
    )
    .await?;
    info!(
        handled = summary.handled,
        peak_pending = summary.peak_pending,
        "serve finished"
    );
    Ok(())
}

#[derive(Debug, Default)]
struct ServeSummary {
    handled: usize,
    /// Most request tasks held at once, finished or not.
    peak_pending: usize,
}

fn log_joined(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "request task failed");
    }
}

/// Answer one request per input line until EOF, a read error or `interrupt`.
/// In-flight requests are drained and the service is shut down on every exit.
async fn serve_lines<R, W, I>(
    service: Arc<ChainService>,
    input: R,
    mut output: W,
    interrupt: I,
) -> Result<ServeSummary, JoinError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    I: Future<Output = ()>,
{
    service.start_refresher();

    // single writer so concurrent responses never interleave
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if let Err(e) = output.write_all(line.as_bytes()).await {
                warn!(error = %e, "output closed");
                break;
            }
            let _ = output.flush().await;
        }
    });

    let mut lines = input.lines();
    let mut tasks = JoinSet::new();
    let mut summary = ServeSummary::default();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "input read failed, stopping");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let service = service.clone();
                let out_tx = out_tx.clone();
                tasks.spawn(async move {
                    let response = handle(&service, &line).await;
                    match serde_json::to_string(&response) {
                        Ok(encoded) => {
                            let _ = out_tx.send(encoded);
                        }
                        Err(e) => warn!(error = %e, "response encode failed"),
                    }
                });
                summary.handled += 1;
                summary.peak_pending = summary.peak_pending.max(tasks.len());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_joined(joined),
            _ = &mut interrupt => break,
        }
    }

    while let Some(joined) = tasks.join_next().await {
        log_joined(joined);
    }
    drop(out_tx);
    let written = writer.await;
    service.shutdown().await;
    written?;
    Ok(summary)
}
