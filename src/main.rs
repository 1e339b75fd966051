use tracing::info;
use tracing_subscriber::EnvFilter;

use reviewer_invoices::{service, Config, ReviewerOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        "Starting reviewer invoices for {:02}.{}",
        config.month, config.year
    );

    let reports = service::run(config).await?;
    for report in &reports {
        match &report.outcome {
            ReviewerOutcome::Processed {
                spreadsheet_url,
                telegram,
            } => info!("{}: sent {} to {}", report.username, spreadsheet_url, telegram),
            ReviewerOutcome::Skipped(reason) => info!("{}: skipped ({:?})", report.username, reason),
        }
    }

    Ok(())
}
