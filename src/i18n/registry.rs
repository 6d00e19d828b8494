//! Language registry: the set of languages the gateway will route and translate.
//!
//! The registry is built once at startup from configuration and shared
//! read-only (behind an `Arc`) by the router and the proxy. Codes are stored
//! lower-cased; lookups are case-insensitive.

use anyhow::{bail, Result};
use std::collections::BTreeSet;

/// Language codes accepted by the translation rendering service.
pub const DEFAULT_LANGUAGES: &[&str] = &[
    "af", "am", "ar", "az", "be", "bg", "bn", "bs", "ca", "ceb", "co", "cs", "cy", "da", "de",
    "el", "en", "eo", "es", "et", "eu", "fa", "fi", "fr", "fy", "ga", "gd", "gl", "gu", "ha",
    "haw", "hi", "hmn", "hr", "ht", "hu", "hy", "id", "ig", "is", "it", "iw", "ja", "jw", "ka",
    "kk", "km", "kn", "ko", "ku", "ky", "la", "lb", "lo", "lt", "lv", "mg", "mi", "mk", "ml",
    "mn", "mr", "ms", "mt", "my", "ne", "nl", "no", "ny", "pa", "pl", "ps", "pt", "ro", "ru",
    "sd", "si", "sk", "sl", "sm", "sn", "so", "sq", "sr", "st", "su", "sv", "sw", "ta", "te",
    "tg", "th", "tl", "tr", "uk", "ur", "uz", "vi", "xh", "yi", "yo", "zh-cn", "zh-tw", "zu",
];

/// Language the site's content is written in.
pub const DEFAULT_NATIVE_LANGUAGE: &str = "pt";

/// Supported languages plus the site's native language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageRegistry {
    native: String,
    supported: BTreeSet<String>,
}

impl LanguageRegistry {
    /// Build a registry from a native language code and the supported codes.
    ///
    /// # Errors
    /// Fails when no codes are given, a code is blank or contains characters
    /// other than ASCII letters and `-`, or the native language is not one of
    /// the supported codes.
    pub fn new<I, S>(native: &str, codes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut supported = BTreeSet::new();
        for code in codes {
            let code = code.as_ref().trim().to_ascii_lowercase();
            if code.is_empty() {
                bail!("Language codes must not be empty");
            }
            if !code.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
                bail!("Invalid language code: '{}'", code);
            }
            supported.insert(code);
        }

        if supported.is_empty() {
            bail!("At least one supported language is required");
        }

        let native = native.trim().to_ascii_lowercase();
        if !supported.contains(&native) {
            bail!("Native language '{}' is not in the supported set", native);
        }

        Ok(Self { native, supported })
    }

    /// Registry with the built-in language list and native language.
    pub fn with_defaults() -> Self {
        Self {
            native: DEFAULT_NATIVE_LANGUAGE.to_string(),
            supported: DEFAULT_LANGUAGES.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Whether `code` (any casing) is a supported language.
    pub fn is_supported(&self, code: &str) -> bool {
        self.supported.contains(&code.to_ascii_lowercase())
    }

    /// Whether `code` (any casing) is the native language.
    pub fn is_native(&self, code: &str) -> bool {
        self.native.eq_ignore_ascii_case(code)
    }

    pub fn native(&self) -> &str {
        &self.native
    }

    /// Supported codes in lexical order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.supported.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.supported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supported.is_empty()
    }

    /// Regex alternation matching any supported code, e.g. `af|am|ar`.
    ///
    /// Longer codes come first so `zh-cn` is tried before a shorter prefix.
    pub fn alternation(&self) -> String {
        let mut codes: Vec<&str> = self.codes().collect();
        codes.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        codes
            .into_iter()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
