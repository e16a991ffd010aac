use gleaner_core::error::AppError;
use gleaner_core::models::{CandidateItem, Lookup, NoteFields};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

/// CSS selectors and URL rules describing the feed and note-detail markup.
///
/// Defaults match the search-result grid of the target site. Every field can
/// be overridden under the `selectors` key of the run configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSelectors {
    /// One feed card.
    pub card: String,
    /// Anchor inside a card whose `href` identifies the note.
    pub link: String,
    /// Presence inside a card marks a video note.
    pub video_marker: String,
    /// Root of the opened note detail.
    pub detail: String,
    pub title: String,
    pub body: String,
    /// Images inside the detail's media carousel.
    pub media: String,
    /// Only image URLs containing this host are kept.
    pub media_host: String,
    /// Image URLs containing this fragment are dropped.
    pub media_exclude: String,
}

impl Default for FeedSelectors {
    fn default() -> Self {
        Self {
            card: ".note-item".into(),
            link: "a[href]".into(),
            video_marker: ".play-icon".into(),
            detail: ".note-container".into(),
            title: ".title".into(),
            body: ".desc".into(),
            media: ".media-container img".into(),
            media_host: "xhscdn.com".into(),
            media_exclude: "avatar".into(),
        }
    }
}

/// Extraction adapter turning rendered HTML into feed candidates and note
/// fields.
///
/// All DOM knowledge lives here. Drivers hand over page HTML and receive the
/// fixed `{title, body, media_urls}` contract back.
pub struct NoteExtractor {
    card: Selector,
    link: Selector,
    video_marker: Selector,
    detail: Selector,
    title: Selector,
    body: Selector,
    media: Selector,
    media_host: String,
    media_exclude: String,
    card_css: String,
    detail_css: String,
}

fn parse_selector(raw: &str) -> Result<Selector, AppError> {
    Selector::parse(raw).map_err(|e| AppError::ConfigError(format!("Invalid selector {raw:?}: {e}")))
}

impl NoteExtractor {
    pub fn new(selectors: &FeedSelectors) -> Result<Self, AppError> {
        Ok(Self {
            card: parse_selector(&selectors.card)?,
            link: parse_selector(&selectors.link)?,
            video_marker: parse_selector(&selectors.video_marker)?,
            detail: parse_selector(&selectors.detail)?,
            title: parse_selector(&selectors.title)?,
            body: parse_selector(&selectors.body)?,
            media: parse_selector(&selectors.media)?,
            media_host: selectors.media_host.clone(),
            media_exclude: selectors.media_exclude.clone(),
            card_css: selectors.card.clone(),
            detail_css: selectors.detail.clone(),
        })
    }

    /// Selector matching the card whose link points at `identifier`.
    pub fn card_selector_for(&self, identifier: &str) -> String {
        let escaped = identifier.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{} a[href=\"{}\"]", self.card_css, escaped)
    }

    /// Raw CSS of the detail root, for drivers that query the live DOM.
    pub fn detail_css(&self) -> &str {
        &self.detail_css
    }

    /// Visible feed cards in document order. Cards without a link are skipped.
    pub fn parse_feed(&self, html: &str) -> Vec<CandidateItem> {
        let document = Html::parse_document(html);

        document
            .select(&self.card)
            .filter_map(|card| {
                let href = card
                    .select(&self.link)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .map(str::trim)
                    .filter(|h| !h.is_empty())?;

                if card.select(&self.video_marker).next().is_some() {
                    Some(CandidateItem::video(href))
                } else {
                    Some(CandidateItem::new(href))
                }
            })
            .collect()
    }

    /// Fields of the opened note, or `NotFound` when no detail view is present.
    pub fn parse_detail(&self, html: &str) -> Lookup<NoteFields> {
        let document = Html::parse_document(html);
        let Some(detail) = document.select(&self.detail).next() else {
            return Lookup::NotFound;
        };

        let title = first_text(&detail, &self.title).filter(|t| !t.is_empty());
        let body = first_text(&detail, &self.body).unwrap_or_default();

        let media_urls = detail
            .select(&self.media)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| src.contains(&self.media_host))
            .filter(|src| self.media_exclude.is_empty() || !src.contains(&self.media_exclude))
            .map(normalize_media_url)
            .collect();

        Lookup::Found(NoteFields {
            title,
            body,
            media_urls,
        })
    }
}

fn first_text(root: &ElementRef, selector: &Selector) -> Option<String> {
    root.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Drop query string and fragment; scheme-relative URLs become https.
pub fn normalize_media_url(src: &str) -> String {
    let src = src.trim();
    let end = src.find(['?', '#']).unwrap_or(src.len());
    let stripped = &src[..end];
    match stripped.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => stripped.to_string(),
    }
}
