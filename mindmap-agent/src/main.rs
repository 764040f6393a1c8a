// Mindmap agent entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Load config (copying defaults on first run)
// 3. Create mpsc channels
// 4. Build the LLM client and application state
// 5. Bind and spawn the WebSocket server
// 6. Spawn the app loop
// 7. Wait for Ctrl+C, then shut down

use mindmap_agent::app;
use mindmap_agent::config;
use mindmap_agent::llm;
use mindmap_agent::protocol::AppCommand;
use mindmap_agent::ws_server;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Mindmap agent starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} on {}, model {}, output to {}",
        config.llm.provider,
        config.server.bind_addr(),
        config.model(),
        config.output.dir
    );

    let (ws_tx, ws_rx) = mpsc::channel(256);
    let (llm_tx, llm_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let llm_client = llm::client::LlmClient::from_config(&config);
    match &llm_client {
        llm::client::LlmClient::Active(client) => {
            info!("LLM client initialized ({}, key from config)", client.provider())
        }
        llm::client::LlmClient::Disabled => {
            info!("LLM client disabled until a key is configured")
        }
    }

    let bind_addr = config.server.bind_addr();
    let app_state = app::AppState::new(config, llm_client, llm_tx, cmd_tx.clone());

    let listener = ws_server::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {bind_addr}"))?;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, llm_rx, cmd_rx, app_state).await {
            error!("Application loop error: {}", e);
        }
    });

    info!("Application ready on ws://{}", bind_addr);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");
    let _ = cmd_tx.send(AppCommand::Shutdown).await;

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    // The accept loop never returns on its own.
    ws_handle.abort();

    info!("Mindmap agent shut down cleanly");
    Ok(())
}

/// Initialize tracing to stderr.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mindmap_agent=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
