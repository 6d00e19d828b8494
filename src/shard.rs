//! Deterministic hostname -> upstream shard selection.

use anyhow::{bail, Result};
use md5::{Digest, Md5};

/// Shards of the translation rendering service. Repeated entries weight a shard.
pub const DEFAULT_SHARDS: &[&str] = &[
    "van", "kars", "sis", "dvin", "ani", "evn", "vagh", "step", "sis", "tigr", "ani", "van",
];

/// Domain the shard ids are prefixed to (`<shard>.<domain>`).
pub const DEFAULT_UPSTREAM_DOMAIN: &str = "tdn.gtranslate.net";

/// Number of leading hex digits of the digest used as the shard key.
const KEY_HEX_DIGITS: usize = 5;

/// Ordered, non-empty list of upstream shard ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSet {
    shards: Vec<String>,
}

impl ShardSet {
    /// # Errors
    /// Fails if the list is empty or an id is not a valid DNS label.
    pub fn new<I, S>(shards: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Vec::new();
        for shard in shards {
            let shard = shard.as_ref().trim().to_ascii_lowercase();
            if shard.is_empty()
                || shard.starts_with('-')
                || !shard.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                bail!("Invalid shard id: '{}'", shard);
            }
            list.push(shard);
        }

        if list.is_empty() {
            bail!("At least one upstream shard is required");
        }

        Ok(Self { shards: list })
    }

    pub fn with_defaults() -> Self {
        Self {
            shards: DEFAULT_SHARDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Index of the shard serving `hostname`.
    ///
    /// The key is the MD5 of the lower-cased hostname with any leading
    /// `www.` removed; its first five hex digits, read as an integer, are
    /// reduced modulo the number of shards. The translation service pins
    /// sessions to the shard picked this way, so the rule must not change.
    pub fn index_for(&self, hostname: &str) -> usize {
        let base = strip_www(&hostname.to_ascii_lowercase()).to_string();
        let digest = hex::encode(Md5::digest(base.as_bytes()));
        // Five hex digits always fit in a u32.
        let key = u32::from_str_radix(&digest[..KEY_HEX_DIGITS], 16).unwrap_or(0);
        key as usize % self.shards.len()
    }

    /// Shard id serving `hostname`.
    pub fn pick(&self, hostname: &str) -> &str {
        &self.shards[self.index_for(hostname)]
    }
}

impl Default for ShardSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Remove a leading `www.` (any casing).
pub fn strip_www(host: &str) -> &str {
    match host.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("www.") => &host[4..],
        _ => host,
    }
}
