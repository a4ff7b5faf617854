use anyhow::Result;
use clap::Parser;
use pagebus::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // SERVICEBUS_SAS_TOKEN may come from a local .env
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "pagebus stopped with an error");
    } else {
        tracing::info!("pagebus stopped");
    }
    result
}
