//! Release identifier lookup.
//!
//! Overture announces its current release on a documentation page whose
//! title contains an identifier such as `2024-11-13.0`.

use briefkasten_mailbox_models::RunWarning;
use regex::Regex;
use scraper::{Html, Selector};

use crate::PlacesSource;

/// Finds the release identifier in the release page HTML.
///
/// The `<title>` and first `<h1>` are searched before the full page text.
/// `pattern` must have one capture group around the identifier.
#[must_use]
pub fn parse_release_page(html: &str, pattern: &Regex) -> Option<String> {
    let document = Html::parse_document(html);
    let title_sel = Selector::parse("title").unwrap_or_else(|_| unreachable!());
    let h1_sel = Selector::parse("h1").unwrap_or_else(|_| unreachable!());

    let headings = document
        .select(&title_sel)
        .chain(document.select(&h1_sel))
        .map(|el| el.text().collect::<String>());

    for text in headings {
        if let Some(release) = capture(pattern, &text) {
            return Some(release);
        }
    }

    capture(pattern, html)
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolves the latest release, falling back to `fallback` on failure.
///
/// The warning is `Some` when the fallback was used.
pub async fn resolve_release(
    source: &dyn PlacesSource,
    fallback: &str,
) -> (String, Option<RunWarning>) {
    match source.latest_release().await {
        Ok(release) => {
            log::info!("Latest places release: {release}");
            (release, None)
        }
        Err(e) => {
            log::warn!("Could not resolve latest places release ({e}); using {fallback}");
            (
                fallback.to_string(),
                Some(RunWarning::ReleaseFallback {
                    release: fallback.to_string(),
                    message: e.to_string(),
                }),
            )
        }
    }
}
