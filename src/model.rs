use std::collections::BTreeSet;
use std::time::Instant;

use sha2::{Digest, Sha256};

/// A single structured release, immutable once emitted by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// `DD.MM.YY`
    pub date: String,
    /// `HH:MM` in the configured display zone, empty if unknown.
    pub time_local: String,
    pub artist: String,
    pub album: String,
    pub title_track: String,
    pub mv_url: String,
}

impl Release {
    pub fn artist_lower(&self) -> String {
        self.artist.to_lowercase()
    }

    pub fn title_track_lower(&self) -> String {
        self.title_track.to_lowercase()
    }

    pub fn dedup_key(&self) -> (String, String, String) {
        (self.artist_lower(), self.date.clone(), self.title_track_lower())
    }

    /// `(artist-lowercased, date)` — the grouping key the reconciler collapses
    /// candidates on before picking one representative per group.
    pub fn group_key(&self) -> (String, String) {
        (self.artist_lower(), self.date.clone())
    }

    /// Tie-break order for two records sharing the same `(artist, date, track)`
    /// key: a non-empty `mv_url` wins, then a non-empty `album`, else whichever
    /// was seen first.
    pub fn is_better_than(&self, other: &Release) -> bool {
        let self_mv = !self.mv_url.is_empty();
        let other_mv = !other.mv_url.is_empty();
        if self_mv != other_mv {
            return self_mv;
        }
        let self_album = !self.album.is_empty();
        let other_album = !other.album.is_empty();
        if self_album != other_album {
            return self_album;
        }
        false
    }
}

/// One artist's raw table-row fragment, retained only for the duration of a
/// single monthly-page parse.
#[derive(Debug, Clone)]
pub struct ArtistBlock {
    pub raw_html: String,
    pub canonical_artist: String,
    pub row_index: usize,
}

/// The stable textual intermediate produced by the block cleaner:
/// `<event><date/><artist/><need_unparse/></event>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedBlock {
    pub structured_text: String,
}

impl CleanedBlock {
    pub fn new(structured_text: String) -> Self {
        Self { structured_text }
    }

    fn extract_tag(&self, tag: &str) -> Option<String> {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let start = self.structured_text.find(&open)? + open.len();
        let end = self.structured_text[start..].find(&close)? + start;
        Some(self.structured_text[start..end].to_string())
    }

    pub fn date(&self) -> Option<String> {
        self.extract_tag("date")
    }

    pub fn artist(&self) -> Option<String> {
        self.extract_tag("artist")
    }

    pub fn need_unparse(&self) -> Option<String> {
        self.extract_tag("need_unparse")
    }
}

/// A pre-normalization release extracted by either the deterministic or the
/// LLM extractor. `date_text` may still be an English long-form date.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedRelease {
    pub artist: String,
    pub date_text: String,
    pub track: String,
    pub album: String,
    pub youtube_url: String,
}

/// Backoff parameters for the retry wrapper. Configuration, not runtime state.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: std::time::Duration,
    pub max_delay: std::time::Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: std::time::Duration::from_millis(500),
            max_delay: std::time::Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// An immutable snapshot of the externally-managed artist whitelist.
/// The engine never mutates it; callers supply a fresh snapshot per query.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    lowercase_names: BTreeSet<String>,
}

impl Whitelist {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lowercase_names: names.into_iter().map(|n| n.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lowercase_names.is_empty()
    }

    pub fn contains(&self, artist: &str) -> bool {
        self.lowercase_names.contains(&artist.to_lowercase())
    }

    pub fn is_subset_of(&self, other: &Whitelist) -> bool {
        self.lowercase_names.is_subset(&other.lowercase_names)
    }

    pub fn len(&self) -> usize {
        self.lowercase_names.len()
    }

    /// A stable hash over the sorted lowercase artist set, used to key cache
    /// variants for the same month list.
    pub fn fingerprint(&self) -> String {
        let joined = self.lowercase_names.iter().cloned().collect::<Vec<_>>().join("\u{1f}");
        let digest = Sha256::digest(joined.as_bytes());
        format!("{digest:x}")
    }
}

/// The tuple (sorted months, whitelist fingerprint) that indexes cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub months: Vec<String>,
    pub whitelist_fingerprint: String,
}

impl CacheKey {
    pub fn new(mut months: Vec<String>, whitelist: &Whitelist) -> Self {
        months.sort();
        months.dedup();
        Self {
            months,
            whitelist_fingerprint: whitelist.fingerprint(),
        }
    }
}

/// A timestamped, ordered list of releases for one [`CacheKey`]. Retains the
/// whitelist snapshot it was populated with so the derived-filter fast path
/// can test subset-ness against a later, narrower query.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub releases: Vec<Release>,
    pub whitelist: Whitelist,
    pub timestamp: Instant,
}

impl CacheEntry {
    pub fn new(releases: Vec<Release>, whitelist: Whitelist) -> Self {
        Self {
            releases,
            whitelist,
            timestamp: Instant::now(),
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }

    pub fn is_fresh(&self, cache_duration: std::time::Duration) -> bool {
        self.age() < cache_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_case_and_order_insensitive() {
        let a = Whitelist::from_names(["CORTIS", "aespa"]);
        let b = Whitelist::from_names(["aespa", "cortis"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_for_different_sets() {
        let a = Whitelist::from_names(["cortis"]);
        let b = Whitelist::from_names(["cortis", "aespa"]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn subset_check() {
        let full = Whitelist::from_names(["cortis", "aespa", "ive"]);
        let narrow = Whitelist::from_names(["cortis"]);
        assert!(narrow.is_subset_of(&full));
        assert!(!full.is_subset_of(&narrow));
    }

    #[test]
    fn cleaned_block_extracts_tags() {
        let block = CleanedBlock::new(
            "<event><date>August 11, 2025</date><artist>CORTIS</artist><need_unparse>x</need_unparse></event>"
                .to_string(),
        );
        assert_eq!(block.date().as_deref(), Some("August 11, 2025"));
        assert_eq!(block.artist().as_deref(), Some("CORTIS"));
        assert_eq!(block.need_unparse().as_deref(), Some("x"));
    }

    #[test]
    fn release_prefers_mv_url_over_album() {
        let with_mv = Release {
            date: "11.08.25".into(),
            time_local: String::new(),
            artist: "CORTIS".into(),
            album: String::new(),
            title_track: "GO!".into(),
            mv_url: "https://youtu.be/abc".into(),
        };
        let with_album = Release {
            mv_url: String::new(),
            album: "1st EP".into(),
            ..with_mv.clone()
        };
        assert!(with_mv.is_better_than(&with_album));
        assert!(!with_album.is_better_than(&with_mv));
    }
}
