use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docscan::api::{create_router, AppState};
use docscan::config::Config;
use docscan::ocr::{BatchItem, BatchLine, EngineMode, OcrOrchestrator, RawImage};

#[derive(Parser)]
#[command(name = "docscan")]
#[command(about = "OCR for photographed documents with local and remote engines")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Recognize image files, printing one JSON line per file
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// auto, local or remote; defaults to OCR_DEFAULT_MODE
        #[arg(long)]
        mode: Option<EngineMode>,
        /// Attach diagnostics to each result
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docscan=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();

    if config.remote.api_key.is_none() && config.pipeline.default_mode != EngineMode::Local {
        tracing::warn!(
            "OCR_REMOTE_API_KEY is not set; remote recognition is unavailable and auto mode will use the local engine"
        );
    }

    tracing::info!("Initializing OCR orchestrator...");
    let orchestrator = Arc::new(OcrOrchestrator::new(&config)?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, orchestrator).await,
        Command::Scan { files, mode, debug } => scan(orchestrator, files, mode, debug).await,
    }
}

async fn serve(config: Config, orchestrator: Arc<OcrOrchestrator>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, Arc::clone(&orchestrator));

    let cancel_token = CancellationToken::new();

    let token = cancel_token.child_token();
    let release_on_shutdown = tokio::spawn(async move {
        token.cancelled().await;
        tracing::info!("Releasing local OCR worker...");
        orchestrator.release_local_worker().await;
    });

    let app = create_router(state);

    tracing::info!("Docscan starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/api/v1/health", addr);
    tracing::info!("  Recognize:    POST http://{}/api/v1/ocr", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // Server may stop without a signal (listener error); still release the worker
    cancel_token.cancel();
    release_on_shutdown.await?;

    Ok(())
}

async fn scan(
    orchestrator: Arc<OcrOrchestrator>,
    files: Vec<PathBuf>,
    mode: Option<EngineMode>,
    debug: bool,
) -> anyhow::Result<()> {
    let mode = mode.unwrap_or_else(|| orchestrator.default_mode());
    let options = orchestrator.default_options().with_debug(debug);
    let total = files.len();
    let mut failed = 0;

    for (index, path) in files.into_iter().enumerate() {
        let name = path.display().to_string();
        let result = match RawImage::from_path(&path).await {
            Ok(raw) => orchestrator.recognize(raw, mode, &options).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            failed += 1;
        }

        let line = BatchLine::from(BatchItem {
            index,
            name,
            result,
        });
        println!("{}", serde_json::to_string(&line)?);
    }

    orchestrator.release_local_worker().await;

    if failed > 0 {
        anyhow::bail!("{failed} of {total} files failed");
    }
    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
    cancel_token.cancel();
}
