use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;

use crate::model::{ArtistBlock, Whitelist};

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static ARTIST_STRONG_MARK: Lazy<Selector> = Lazy::new(|| Selector::parse("strong mark").unwrap());
static ARTIST_STRONG: Lazy<Selector> = Lazy::new(|| Selector::parse("strong").unwrap());

/// Iterates `<tr>` rows in a parsed monthly page and retains those whose
/// bolded artist name matches the whitelist. Purely structural — it performs
/// no content parsing beyond locating the artist name.
pub fn collect_artist_blocks(document: &Html, whitelist: &Whitelist) -> Vec<ArtistBlock> {
    let mut blocks = Vec::new();

    for (row_index, row) in document.select(&ROW_SELECTOR).enumerate() {
        let Some(artist) = extract_row_artist(&row) else {
            continue;
        };

        if !whitelist.contains(&artist) {
            continue;
        }

        blocks.push(ArtistBlock {
            raw_html: row.inner_html(),
            canonical_artist: artist,
            row_index,
        });
    }

    debug!(count = blocks.len(), "collected whitelisted artist blocks");
    blocks
}

/// The first match wins: a row naming multiple whitelisted artists is
/// attributed to whichever one appears first in document order, avoiding
/// duplicate downstream emission for the same row.
fn extract_row_artist(row: &scraper::ElementRef) -> Option<String> {
    if let Some(el) = row.select(&ARTIST_STRONG_MARK).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    if let Some(el) = row.select(&ARTIST_STRONG).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}
