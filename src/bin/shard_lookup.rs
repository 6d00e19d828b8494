//! Print the translation shard each hostname is pinned to.
//!
//! Usage: `shard-lookup <host> [<host> ...]`
//!
//! Reads `TRANSLATION_SHARDS` and `TRANSLATION_UPSTREAM_DOMAIN` the same way
//! the gateway does, falling back to the built-in defaults.

use anyhow::{bail, Context, Result};
use blog_translate_gateway::shard::{strip_www, ShardSet, DEFAULT_UPSTREAM_DOMAIN};
use tracing::info;

fn main() -> Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shard_lookup=info".parse()?),
        )
        .init();

    let hosts: Vec<String> = std::env::args().skip(1).collect();
    if hosts.is_empty() {
        bail!("Usage: shard-lookup <host> [<host> ...]");
    }

    let shards = match std::env::var("TRANSLATION_SHARDS") {
        Ok(list) => ShardSet::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
            .context("Invalid TRANSLATION_SHARDS")?,
        Err(_) => ShardSet::with_defaults(),
    };
    let domain = std::env::var("TRANSLATION_UPSTREAM_DOMAIN")
        .unwrap_or_else(|_| DEFAULT_UPSTREAM_DOMAIN.to_string());

    info!("Resolving {} host(s) across {} shards", hosts.len(), shards.len());

    for host in &hosts {
        let shard = shards.pick(host);
        println!("{}\t{}\t{}.{}", strip_www(host), shard, shard, domain);
    }

    Ok(())
}
