mod shutdown;
mod startup;

use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize logging
    startup::init_logging()?;

    info!("Starting ontime");

    // Load configuration
    let config = startup::load_config().await?;

    // Reminders are only allowed on explicit request
    let allow_notifications = std::env::args()
        .skip(1)
        .any(|arg| arg == startup::ALLOW_NOTIFICATIONS_FLAG);

    // Run until a shutdown signal arrives
    startup::run(config, allow_notifications).await
}
