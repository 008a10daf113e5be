use std::io::BufRead;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use groqbot::chatbot::webhook::{self, AppState};
use groqbot::chatbot::{ConversationHandler, RelayClient, RequestContext, Store, StoreOptions};
use groqbot::config::Config;
use groqbot::groq;
use groqbot::retry::RetryPolicy;

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(&config.log_dir);

    info!("🚀 Starting groqbot...");
    if let Err(e) = dotenv {
        warn!("No .env file loaded ({e}), using process environment");
    }
    info!("Model: {}, endpoint: {}", config.model_name, config.groq_api_url);

    let mode = std::env::args().nth(1).unwrap_or_else(|| "chat".to_string());

    let store = match Store::open(&StoreOptions::from_config(&config)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open database {:?}: {e}", config.db_path);
            return ExitCode::FAILURE;
        }
    };

    let gateway = match groq::Client::new(&config, RetryPolicy::default()) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to build Groq client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let handler = Arc::new(ConversationHandler::new(gateway, store.clone()));

    let code = match mode.as_str() {
        "chat" => {
            run_chat(handler, config.request_timeout).await;
            ExitCode::SUCCESS
        }
        "webhook" => match run_webhook(&config, handler).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Webhook server failed: {e}");
                ExitCode::FAILURE
            }
        },
        other => {
            error!("Unknown mode '{other}', expected 'chat' or 'webhook'");
            ExitCode::from(2)
        }
    };

    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => warn!("Database still in use at exit, leaving pool to drop"),
    }
    info!("groqbot stopped");
    code
}

/// Stderr plus an append-only file under `log_dir`. Falls back to stderr only
/// when the file can't be opened.
fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let log_file = std::fs::create_dir_all(log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("groqbot.log"))
    });

    let (file_layer, guard) = match log_file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                );
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Failed to open log file in {log_dir:?}: {e}");
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(file_layer)
        .init();

    guard
}

/// Interactive loop: one line in, one reply out, until EOF or Ctrl+C.
async fn run_chat(handler: Arc<ConversationHandler>, request_timeout: Duration) {
    let (cancel, root) = RequestContext::with_cancel();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let mut lines = spawn_stdin_reader();
    println!("Groq bot is ready. Type a message:");

    loop {
        let input = tokio::select! {
            done = root.done() => {
                info!("Chat loop interrupted: {done}");
                break;
            }
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let ctx = root.with_timeout(request_timeout);
        match handler.handle(&ctx, &input).await {
            Ok(reply) => println!("Bot: {}", reply.text),
            Err(e) => {
                println!("Error: {e}");
                if root.err().is_some() {
                    break;
                }
            }
        }
        println!("\nType another message:");
    }
}

/// Reads stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
    });
    rx
}

async fn run_webhook(
    config: &Config,
    handler: Arc<ConversationHandler>,
) -> Result<(), Box<dyn std::error::Error>> {
    let relay = RelayClient::new(&config.relay_url)?;

    if let Some(url) = &config.webhook_public_url {
        if let Err(e) = relay.register_webhook(url).await {
            warn!("Failed to register webhook with relay at {}: {e}", relay.base_url());
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.webhook_addr).await?;
    let addr = listener.local_addr()?;
    info!("🌐 Webhook server listening on {addr}");
    info!("Relay: {}", relay.base_url());
    info!("If the relay runs under WSL or Docker, point its webhook at your host IP:");
    info!("  http://<host-ip>:{}/webhook/wa", addr.port());

    let state = AppState {
        handler,
        relay: Arc::new(relay),
        request_timeout: config.request_timeout,
    };
    webhook::serve(listener, state, shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
