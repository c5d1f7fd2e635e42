use anyhow::Error;
use server::config::Config;

#[tokio::main]
async fn main() -> Result<(), Error> {
    server::init_tracing();

    let config = Config::load()?;

    #[cfg(feature = "seed")]
    if let Ok(source) = std::env::var("ROSTER_SOURCE") {
        roster::import_from(&source, &config.database_path).await?;
    }

    server::serve(config).await
}
