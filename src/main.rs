use anyhow::Result;
use clap::Parser;
use twigga::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing for the CLI.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::debug!("command completed"),
        Err(e) => tracing::error!(error = %e, "command failed"),
    }
    result
}
