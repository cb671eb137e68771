use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::CleanedBlock;

/// Month-name-followed-by-day-and-year token, e.g. "August 11, 2025".
static DATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s*\d{4}\b").unwrap()
});

/// Markers after which a date is a reference, not a scheduled release, and is
/// excluded from the classifier's date count. Treated as a closed list —
/// no additional markers are recognized.
const REFERENCE_MARKERS: &[&str] = &[
    "Album Release:",
    "Digital Release:",
    "CD Release:",
    "MV Release:",
    "Pre-release:",
    "OST Release:",
];

const TITLE_TRACK_MARKER: &str = "Title Track:";
const ALBUM_MARKER: &str = "Album:";
const OST_MARKER: &str = "OST:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Simple,
    Complex,
}

/// Decides *simple* vs *complex* on a cleaned block, per the date-count and
/// marker-shape rules above.
pub fn classify(block: &CleanedBlock) -> BlockClass {
    let Some(need_unparse) = block.need_unparse() else {
        return BlockClass::Complex;
    };

    let non_reference_date_count = count_non_reference_dates(&need_unparse);
    if non_reference_date_count > 1 {
        return BlockClass::Complex;
    }

    let has_title_track = need_unparse.contains(TITLE_TRACK_MARKER);
    let has_album = need_unparse.contains(ALBUM_MARKER);
    let has_ost = need_unparse.contains(OST_MARKER);
    let has_youtube = need_unparse.contains("<a href=");

    let simple_shape = (has_title_track && has_album)
        || (has_title_track && has_ost)
        || (has_album && !has_title_track && !has_youtube);

    if simple_shape {
        BlockClass::Simple
    } else {
        BlockClass::Complex
    }
}

fn count_non_reference_dates(text: &str) -> usize {
    DATE_TOKEN
        .find_iter(text)
        .filter(|m| !preceded_by_reference_marker(text, m.start()))
        .count()
}

/// A date is a "reference date" if the nearest marker before it on the same
/// line is one of [`REFERENCE_MARKERS`], with no other date token in between.
fn preceded_by_reference_marker(text: &str, date_start: usize) -> bool {
    let line_start = text[..date_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &text[line_start..date_start];

    REFERENCE_MARKERS
        .iter()
        .filter_map(|marker| prefix.rfind(marker))
        .max()
        .is_some()
}
