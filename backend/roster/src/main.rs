use anyhow::Error;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Roster file path or http(s) URL.
    source: String,

    #[arg(long, default_value = "rideline.db")]
    database: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    roster::import_from(&args.source, &args.database).await?;

    Ok(())
}
