use anyhow::Result;
use blog_translate_gateway::{config, server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blog_translate_gateway=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!("Starting blog translation gateway");

    // Load configuration from environment
    let config = config::Config::from_env()?;

    server::serve(config).await
}
