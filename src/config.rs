use crate::i18n::{LanguageRegistry, DEFAULT_LANGUAGES, DEFAULT_NATIVE_LANGUAGE};
use crate::shard::{ShardSet, DEFAULT_SHARDS, DEFAULT_UPSTREAM_DOMAIN};
use anyhow::{bail, Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Content server behind the gateway
    pub origin_url: String,

    // Languages
    pub native_language: String,
    pub supported_languages: Vec<String>,

    // Translation upstream
    pub translation_shards: Vec<String>,
    pub upstream_domain: String,
    pub upstream_timeout_secs: u64,
    pub default_scheme: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            origin_url: std::env::var("ORIGIN_URL").context("ORIGIN_URL not set")?,

            native_language: std::env::var("NATIVE_LANGUAGE")
                .unwrap_or_else(|_| DEFAULT_NATIVE_LANGUAGE.to_string()),
            supported_languages: std::env::var("SUPPORTED_LANGUAGES")
                .ok()
                .map(|v| parse_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGES.iter().map(|c| c.to_string()).collect()),

            translation_shards: std::env::var("TRANSLATION_SHARDS")
                .ok()
                .map(|v| parse_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or_else(|| DEFAULT_SHARDS.iter().map(|s| s.to_string()).collect()),
            upstream_domain: std::env::var("TRANSLATION_UPSTREAM_DOMAIN")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_DOMAIN.to_string()),
            upstream_timeout_secs: std::env::var("UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            default_scheme: std::env::var("DEFAULT_SCHEME")
                .unwrap_or_else(|_| "https".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that `from_env` cannot reject while parsing.
    pub fn validate(&self) -> Result<()> {
        if !self.origin_url.starts_with("http://") && !self.origin_url.starts_with("https://") {
            bail!("ORIGIN_URL must be an http(s) URL, got '{}'", self.origin_url);
        }
        if self.default_scheme != "http" && self.default_scheme != "https" {
            bail!("DEFAULT_SCHEME must be 'http' or 'https', got '{}'", self.default_scheme);
        }
        if self.upstream_timeout_secs == 0 {
            bail!("UPSTREAM_TIMEOUT_SECS must be greater than zero");
        }
        if self.upstream_domain.trim().is_empty() {
            bail!("TRANSLATION_UPSTREAM_DOMAIN must not be empty");
        }
        Ok(())
    }

    pub fn languages(&self) -> Result<LanguageRegistry> {
        LanguageRegistry::new(&self.native_language, &self.supported_languages)
            .context("Invalid language configuration")
    }

    pub fn shards(&self) -> Result<ShardSet> {
        ShardSet::new(&self.translation_shards).context("Invalid TRANSLATION_SHARDS")
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
