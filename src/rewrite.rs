//! Text rewriting of translated upstream responses.
//!
//! Upstream pages are rendered for a synthetic host (`<lang>.<site>`). These
//! rules map every URL the page exposes back onto the local site under
//! `/<lang>/`. Rewriting is plain substitution over the markup, not DOM
//! surgery: malformed upstream HTML passes through the same rules unchanged in
//! structure. The order of the body rules matters; see [`Rewriter::rewrite_html`].
//!
//! Known edge case: a content path segment that happens to equal a supported
//! language code (e.g. `/fr/es/` where `es` is a real slug) is collapsed as
//! if the upstream had emitted a language prefix.

use crate::i18n::LanguageRegistry;
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::sync::Arc;

/// Names and hosts involved in rewriting one response.
#[derive(Debug, Clone, Copy)]
pub struct RewriteTarget<'a> {
    /// Requested language, lower-case.
    pub language: &'a str,
    /// Host the client asked for, without port.
    pub original_host: &'a str,
    /// Host the upstream rendered the page for.
    pub synthetic_host: &'a str,
}

impl RewriteTarget<'_> {
    fn local_base(&self) -> String {
        format!("{}/{}", self.original_host, self.language)
    }
}

/// Compiled rewrite rules for one language registry.
#[derive(Debug, Clone)]
pub struct Rewriter {
    languages: Arc<LanguageRegistry>,
    root_attr: Regex,
    protocol_relative_attr: Regex,
    double_prefix_attr: Regex,
    leading_language: Regex,
}

impl Rewriter {
    pub fn new(languages: Arc<LanguageRegistry>) -> Result<Self> {
        let alternation = languages.alternation();

        Ok(Self {
            root_attr: Regex::new(r#"(?i)(href|src|action)="/"#)
                .context("Failed to compile root attribute pattern")?,
            protocol_relative_attr: Regex::new(r#"(?i)(href|src|action)="/([a-z-]+)//"#)
                .context("Failed to compile protocol-relative pattern")?,
            double_prefix_attr: Regex::new(&format!(
                r#"(?i)(href|src|action)="/([a-z-]+)/({})/"#,
                alternation
            ))
            .context("Failed to compile double language prefix pattern")?,
            leading_language: Regex::new(&format!("^(?i)(?:{})/", alternation))
                .context("Failed to compile leading language pattern")?,
            languages,
        })
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    /// Rewrite a `Location` or `Refresh` header value.
    ///
    /// The synthetic host becomes `<originalHost>/<lang>`, root-relative values
    /// gain a `/<lang>` prefix, and the first `/<lang>/<otherLang>/` collapses
    /// to `/<otherLang>/`.
    pub fn rewrite_header_location(&self, value: &str, target: &RewriteTarget<'_>) -> String {
        let mut out = replace_ignore_ascii_case(value, target.synthetic_host, &target.local_base());

        if out.starts_with('/') {
            out = format!("/{}{}", target.language, out);
        }

        self.collapse_first_double_prefix(&out, target.language)
    }

    /// Rewrite an HTML document body.
    ///
    /// Steps, in order:
    /// 1. synthetic host -> `<originalHost>/<lang>`
    /// 2. `href="/`, `src="/`, `action="/` -> `...="/<lang>/`
    /// 3. `...="/<lang>//` -> `...="//` so protocol-relative URLs stay external
    /// 4. `...="/<lang>/<otherLang>/` -> `...="/<otherLang>/`
    ///
    /// Step 3 must run after step 2, otherwise `//cdn.example.com` would end
    /// up as `/<lang>//cdn.example.com`.
    pub fn rewrite_html(&self, html: &str, target: &RewriteTarget<'_>) -> String {
        let lang = target.language;

        let out = replace_ignore_ascii_case(html, target.synthetic_host, &target.local_base());

        let out = self.root_attr.replace_all(&out, |caps: &Captures| {
            format!("{}=\"/{}/", &caps[1], lang)
        });

        let out = self
            .protocol_relative_attr
            .replace_all(&out, |caps: &Captures| {
                if caps[2].eq_ignore_ascii_case(lang) {
                    format!("{}=\"//", &caps[1])
                } else {
                    caps[0].to_string()
                }
            });

        let out = self.double_prefix_attr.replace_all(&out, |caps: &Captures| {
            if caps[2].eq_ignore_ascii_case(lang) {
                format!("{}=\"/{}/", &caps[1], &caps[3])
            } else {
                caps[0].to_string()
            }
        });

        out.into_owned()
    }

    fn collapse_first_double_prefix(&self, value: &str, lang: &str) -> String {
        let needle = format!("/{}/", lang.to_ascii_lowercase());
        // ASCII lower-casing keeps byte offsets aligned with `value`.
        let lowered = value.to_ascii_lowercase();

        let mut from = 0;
        while let Some(pos) = lowered[from..].find(&needle) {
            let start = from + pos;
            let rest = start + needle.len();
            if self.leading_language.is_match(&value[rest..]) {
                return format!("{}/{}", &value[..start], &value[rest..]);
            }
            from = start + 1;
        }

        value.to_string()
    }
}

/// Replace every ASCII case-insensitive occurrence of `needle`.
fn replace_ignore_ascii_case(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }

    let lowered = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();

    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (start, _) in lowered.match_indices(&needle) {
        out.push_str(&haystack[last..start]);
        out.push_str(replacement);
        last = start + needle.len();
    }
    out.push_str(&haystack[last..]);
    out
}
