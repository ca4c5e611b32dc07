use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use js_eval_wasi::config::{Cli, Config};
use js_eval_wasi::mcp::{server, McpServer};
use js_eval_wasi::sandbox::{self, Evaluator, Sandbox};
use js_eval_wasi::tools::{EvalJsTool, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Handles --help / --version and exits on bad flags
    let cli = Cli::parse();

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("js_eval_wasi=info,tower_http=info")),
        )
        .init();

    info!("js-eval-wasi v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_cli(&cli)?;
    let engine_path = config.engine_path()?;
    let limits = config.engine.resource_limits();

    info!(
        "Engine: {} (max {} MiB)",
        engine_path.display(),
        config.engine.max_image_size_mib
    );
    info!(
        "Limits: {} MiB memory ({} pages), {} ms timeout",
        config.engine.memory_limit_mib,
        limits.memory_limit_pages,
        limits.execution_deadline.as_millis()
    );

    // Startup failures are fatal: the deployment is misconfigured.
    let image = sandbox::load(&engine_path, config.engine.max_image_size_mib)
        .context("failed to load WASM binary")?;
    let sandbox = Sandbox::initialize(image, &config.engine.sandbox_options())
        .context("failed to create WASI JavaScript evaluator")?;

    let shutdown = CancellationToken::new();
    let evaluator = Evaluator::new(sandbox.module(), limits);

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EvalJsTool::new(evaluator, shutdown.clone())));
    info!("Tools: {} registered", tools.len());

    let app = server::router(McpServer::new(tools), &config.server.transport_limits());

    let signal = shutdown.clone();
    let served = server::serve(config.listen_addr()?, app, async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, exiting"),
            Err(e) => {
                // Keep serving; the process can still be killed.
                error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        }
        signal.cancel();
    })
    .await;

    if let Err(e) = sandbox.shutdown().await {
        warn!("Failed to clean up WASI evaluator: {e}");
    }

    served.context("failed to listen and serve")
}
