pub mod config;
pub mod content;
pub mod i18n;
pub mod metrics;
pub mod origin;
pub mod proxy;
pub mod rewrite;
pub mod router;
pub mod server;
pub mod shard;
