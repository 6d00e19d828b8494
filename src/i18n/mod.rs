//! Language support for the gateway.
//!
//! - `registry`: the supported-language set and the site's native language,
//!   built once from configuration and shared read-only.
//!
//! # Example
//!
//! ```rust
//! use blog_translate_gateway::i18n::LanguageRegistry;
//!
//! let registry = LanguageRegistry::new("pt", ["pt", "en", "fr"]).unwrap();
//! assert!(registry.is_supported("FR"));
//! assert!(registry.is_native("pt"));
//! ```

mod registry;

pub use registry::{LanguageRegistry, DEFAULT_LANGUAGES, DEFAULT_NATIVE_LANGUAGE};
