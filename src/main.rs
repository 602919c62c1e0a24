use std::net::SocketAddr;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use newsrelay::config::{Config, Target};
use newsrelay::queue::{PublishQueue, spawn_worker};
use newsrelay::server::{ServerSettings, create_router};
use newsrelay::telegram::{TelegramPublisher, build_bot};
use newsrelay::telegram_log::TelegramLogLayer;
use newsrelay::webhook::WebhookPublisher;
use newsrelay::Relay;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A path argument selects a JSON config file; otherwise the environment (and .env) is used
    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => {
            dotenvy::dotenv().ok();
            Config::from_env()?
        }
    };

    let relay = match &config.target {
        Target::Telegram { bot_token, chat_id, api_url } => Relay::Telegram(TelegramPublisher::new(
            build_bot(bot_token, api_url.as_ref()),
            chat_id.clone(),
        )),
        Target::Webhook { url } => Relay::Webhook(WebhookPublisher::new(url.clone())?),
    };

    let _guard = init_logging(&config, relay.bot())?;

    info!("🚀 Starting newsrelay...");
    match &config_path {
        Some(path) => info!("Loaded config from {path}"),
        None => info!("Loaded config from environment"),
    }
    if !config.auth_configured() {
        warn!("WEBHOOK_SECRET and WEBHOOK_API_KEY are unset - /publish accepts unauthenticated requests");
    }

    if let Some(bot) = relay.bot() {
        match bot.get_me().await {
            Ok(me) => info!("Bot user ID: {}, username: @{}", me.id, me.username()),
            Err(e) => warn!("Failed to get bot info: {e}"),
        }
    }
    info!("Publishing to {}", relay.describe());

    let queue = Arc::new(PublishQueue::new(config.retry.clone()));
    let worker = spawn_worker(queue.clone(), Arc::new(relay));

    let app = create_router(queue.clone(), ServerSettings::from_config(&config));
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(address = %config.listen_addr, "Publish relay listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let pending = queue.len().await;
    if pending > 0 {
        warn!("Shutting down with {pending} undelivered job(s); they are not persisted");
    }
    worker.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Stdout plus a log file under `<data_dir>/logs`, and the operator chat when configured.
fn init_logging(config: &Config, bot: Option<&Bot>) -> std::io::Result<WorkerGuard> {
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("newsrelay.log"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let tg_layer = match (config.log_chat_id, bot) {
        (Some(chat_id), Some(bot)) => Some(TelegramLogLayer::new(bot.clone(), ChatId(chat_id))),
        _ => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(tg_layer)
        .init();

    if config.log_chat_id.is_some() && bot.is_none() {
        warn!("log_chat_id is set but delivery goes to a webhook; Telegram log relay disabled");
    }

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, draining connections...");
}
