//! Run the mock Telegram Bot API.
//!
//! Usage: mock-telegram [port]   (default 9090, or MOCK_TG_PORT)
//! Then point the relay at it with TELEGRAM_API_URL=http://127.0.0.1:9090

use std::net::SocketAddr;

use newsrelay::mock_telegram::MockTelegram;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MOCK_TG_PORT").ok())
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(9090);

    let mock = MockTelegram::new();
    let (addr, handle) = mock.serve(SocketAddr::from(([127, 0, 0, 1], port))).await?;
    info!("Mock Telegram server listening on http://{addr}");

    tokio::select! {
        _ = handle => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
