//! Post-body content pipeline: ad-block placement and the app-card marker.
//!
//! Post bodies are HTML that can be segmented on `</p>`. Ads are injected by
//! paragraph index, then after the title, and finally the body is split at the
//! app-card marker so the card can be rendered between the two halves.
//!
//! The gateway itself never calls these: they are pure helpers for the post
//! renderer, which supplies the post HTML, its categories and the configured
//! ads, and renders the card between [`PostBody::before_card`] and
//! [`PostBody::after_card`].

use serde::{Deserialize, Serialize};

/// Marker an author places where the app store card should appear.
pub const PLAY_CARD_MARKER: &str = "<!-- GOOGLE_PLAY_CARD -->";

const PARAGRAPH_CLOSE: &str = "</p>";
const TITLE_CLOSE: &str = "</h1>";

/// Placement kind as stored by the admin panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdPositionKind {
    AfterTitle,
    #[serde(rename = "BEFORE_PARAGRAPH_X")]
    BeforeParagraph,
}

/// Where an ad block is placed in a post body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdPosition {
    /// Right after the first `</h1>`.
    AfterTitle,
    /// After the n-th closing `</p>` (1-based), i.e. before paragraph n + 1.
    BeforeParagraph(u32),
}

/// An ad snippet configured by the site admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdBlock {
    /// Raw markup inserted verbatim.
    pub code: String,
    pub position: AdPositionKind,
    /// Only meaningful for `BEFORE_PARAGRAPH_X`.
    #[serde(default)]
    pub paragraph_index: Option<u32>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Category ids of posts this ad must not appear on.
    #[serde(default)]
    pub excluded_categories: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl AdBlock {
    pub fn after_title(code: impl Into<String>) -> Self {
        Self::with_position(code, AdPositionKind::AfterTitle, None)
    }

    pub fn before_paragraph(code: impl Into<String>, index: u32) -> Self {
        Self::with_position(code, AdPositionKind::BeforeParagraph, Some(index))
    }

    fn with_position(
        code: impl Into<String>,
        position: AdPositionKind,
        paragraph_index: Option<u32>,
    ) -> Self {
        Self {
            code: code.into(),
            position,
            paragraph_index,
            active: true,
            excluded_categories: Vec::new(),
        }
    }

    /// Resolved placement. A paragraph ad without an index never matches.
    pub fn placement(&self) -> AdPosition {
        match self.position {
            AdPositionKind::AfterTitle => AdPosition::AfterTitle,
            AdPositionKind::BeforeParagraph => {
                AdPosition::BeforeParagraph(self.paragraph_index.unwrap_or(0))
            }
        }
    }

    /// Active, and not excluded by any of the post's categories.
    pub fn is_eligible(&self, post_categories: &[String]) -> bool {
        self.active
            && !self
                .excluded_categories
                .iter()
                .any(|excluded| post_categories.contains(excluded))
    }
}

/// A post body ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostBody {
    /// Markup before the app-card marker (the whole body when there is none).
    pub before_card: String,
    /// Markup after the marker; empty when there is none.
    pub after_card: String,
    /// Whether the marker was present.
    pub has_card_marker: bool,
}

impl PostBody {
    /// Whether the app card is shown: the marker exists and the post has a store URL.
    pub fn shows_card(&self, store_url: Option<&str>) -> bool {
        self.has_card_marker && store_url.is_some_and(|url| !url.trim().is_empty())
    }
}

/// Ads that may appear on a post with the given categories, in input order.
pub fn eligible_ads<'a>(ads: &'a [AdBlock], post_categories: &[String]) -> Vec<&'a AdBlock> {
    ads.iter().filter(|ad| ad.is_eligible(post_categories)).collect()
}

/// Insert each `(index, code)` ad after the index-th closing `</p>`.
pub fn inject_paragraph_ads(content: &str, ads: &[(u32, &str)]) -> String {
    let extra: usize = ads.iter().map(|(_, code)| code.len() + 24).sum();
    let mut out = String::with_capacity(content.len() + extra);
    let mut last = 0;
    let mut paragraph = 0u32;

    // ASCII lowercasing keeps byte offsets aligned with `content`.
    let lower = content.to_ascii_lowercase();
    for (start, tag) in lower.match_indices(PARAGRAPH_CLOSE) {
        let end = start + tag.len();
        out.push_str(&content[last..end]);
        last = end;
        paragraph += 1;

        for (_, code) in ads.iter().filter(|(index, _)| *index == paragraph) {
            out.push_str(&wrap_ad(code));
        }
    }

    out.push_str(&content[last..]);
    out
}

/// Insert the ads right after the first `</h1>`; unchanged if there is none.
pub fn inject_after_title(content: &str, codes: &[&str]) -> String {
    if codes.is_empty() {
        return content.to_string();
    }

    match content.to_ascii_lowercase().find(TITLE_CLOSE) {
        Some(start) => {
            let end = start + TITLE_CLOSE.len();
            let ads: String = codes.iter().map(|code| wrap_ad(code)).collect();
            format!("{}{}{}", &content[..end], ads, &content[end..])
        }
        None => content.to_string(),
    }
}

/// Split at the first app-card marker.
pub fn split_at_card_marker(content: &str) -> PostBody {
    match content.split_once(PLAY_CARD_MARKER) {
        Some((before, after)) => PostBody {
            before_card: before.to_string(),
            after_card: after.to_string(),
            has_card_marker: true,
        },
        None => PostBody {
            before_card: content.to_string(),
            after_card: String::new(),
            has_card_marker: false,
        },
    }
}

/// Full pipeline: eligibility, paragraph ads, title ads, marker split.
pub fn prepare_post_body(content: &str, ads: &[AdBlock], post_categories: &[String]) -> PostBody {
    let eligible = eligible_ads(ads, post_categories);

    let paragraph_ads: Vec<(u32, &str)> = eligible
        .iter()
        .filter_map(|ad| match ad.placement() {
            AdPosition::BeforeParagraph(index) => Some((index, ad.code.as_str())),
            AdPosition::AfterTitle => None,
        })
        .collect();
    let title_ads: Vec<&str> = eligible
        .iter()
        .filter(|ad| ad.placement() == AdPosition::AfterTitle)
        .map(|ad| ad.code.as_str())
        .collect();

    let with_paragraph_ads = inject_paragraph_ads(content, &paragraph_ads);
    let with_title_ads = inject_after_title(&with_paragraph_ads, &title_ads);

    split_at_card_marker(&with_title_ads)
}

fn wrap_ad(code: &str) -> String {
    format!("<div class=\"my-4\">{}</div>", code)
}
