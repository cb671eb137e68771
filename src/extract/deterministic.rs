use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CleanedBlock, ParsedRelease};
use crate::youtube_url::{canonicalize_youtube_url, is_channel_url, is_youtube_url};

static TITLE_TRACK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^.*Title Track:\s*(.+)$").unwrap());
static ALBUM_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^.*Album:\s*(.+)$").unwrap());
static OST_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^.*OST:\s*(.+)$").unwrap());
static YOUTUBE_HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<a href="([^"]+)">"#).unwrap());
static MV_OR_ALBUM_RELEASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(MV|Album) Release\b").unwrap());
static QUOTED_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new("\"([^\"]+)\"").unwrap());

/// Produces zero or one [`ParsedRelease`] from a cleaned, *simple* block,
/// matching it against the target month/year via regex rules for date,
/// artist, track, album, and YouTube link.
pub fn extract_deterministic(block: &CleanedBlock, target_month: &str, target_year: i32) -> Option<ParsedRelease> {
    let date_text = block.date()?;
    let artist = block.artist()?;
    let need_unparse = block.need_unparse().unwrap_or_default();

    let naive = NaiveDate::parse_from_str(&date_text, "%B %d, %Y").ok()?;
    if !naive.format("%B").to_string().eq_ignore_ascii_case(target_month) {
        return None;
    }
    if naive.year() != target_year {
        return None;
    }

    let track = extract_track(&need_unparse);
    let album = extract_album(&need_unparse);
    let youtube_url = extract_youtube_url(&need_unparse);

    Some(ParsedRelease {
        artist,
        date_text: naive.format("%d.%m.%y").to_string(),
        track,
        album,
        youtube_url,
    })
}

fn extract_track(need_unparse: &str) -> String {
    if let Some(caps) = TITLE_TRACK_LINE.captures(need_unparse) {
        return clean_track_text(&caps[1]);
    }

    if MV_OR_ALBUM_RELEASE.is_match(need_unparse) {
        return "Album & MV Release".to_string();
    }

    String::new()
}

fn clean_track_text(raw: &str) -> String {
    let trimmed = raw.trim();

    // Prefer the quoted title if one is present; decoration like "- MV Release"
    // outside the quotes is dropped along with the quotes themselves.
    if let Some(caps) = QUOTED_SEGMENT.captures(trimmed) {
        return caps[1].trim().to_string();
    }

    let without_markers = trimmed
        .replace("MV Release", "")
        .replace("Album Release", "")
        .replace(" MV", "")
        .replace(" Release", "");
    without_markers.trim().trim_matches('\'').to_string()
}

fn extract_album(need_unparse: &str) -> String {
    if let Some(caps) = ALBUM_LINE.captures(need_unparse) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = OST_LINE.captures(need_unparse) {
        return caps[1].trim().to_string();
    }
    String::new()
}

fn extract_youtube_url(need_unparse: &str) -> String {
    for caps in YOUTUBE_HREF.captures_iter(need_unparse) {
        let href = &caps[1];
        if is_youtube_url(href) && !is_channel_url(href) {
            return canonicalize_youtube_url(href);
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(need_unparse: &str, date: &str, artist: &str) -> CleanedBlock {
        CleanedBlock::new(format!(
            "<event><date>{date}</date><artist>{artist}</artist><need_unparse>{need_unparse}</need_unparse></event>"
        ))
    }

    #[test]
    fn s1_scenario() {
        let b = block(
            r#"Title Track: "GO!" - MV Release
Album: 1st EP COLOR OUTSIDE THE LINES
<a href="https://youtu.be/abc">YouTube</a>"#,
            "August 11, 2025",
            "CORTIS",
        );
        let release = extract_deterministic(&b, "august", 2025).expect("should parse");
        assert_eq!(release.date_text, "11.08.25");
        assert_eq!(release.artist, "CORTIS");
        assert_eq!(release.track, "GO!");
        assert_eq!(release.album, "1st EP COLOR OUTSIDE THE LINES");
        assert_eq!(release.youtube_url, "https://youtu.be/abc");
    }

    #[test]
    fn s5_curly_quote_trimmed_track() {
        let b = block(
            r#"Title Track: "Song" MV Release"#,
            "August 1, 2025",
            "IVE",
        );
        let release = extract_deterministic(&b, "august", 2025).unwrap();
        assert_eq!(release.track, "Song");
    }

    #[test]
    fn s6_album_only_no_title_track_no_youtube() {
        let b = block("Album: Special Edition", "August 1, 2025", "IVE");
        let release = extract_deterministic(&b, "august", 2025).unwrap();
        assert_eq!(release.track, "");
        assert_eq!(release.album, "Special Edition");
    }

    #[test]
    fn wrong_month_is_dropped() {
        let b = block("Album: Test", "September 1, 2025", "IVE");
        assert!(extract_deterministic(&b, "august", 2025).is_none());
    }

    #[test]
    fn unparsable_date_yields_no_release() {
        let b = block("Album: Test", "not a date", "IVE");
        assert!(extract_deterministic(&b, "august", 2025).is_none());
    }

    #[test]
    fn channel_url_is_excluded_in_favor_of_watch_link() {
        let b = block(
            r#"Album: Test
<a href="https://www.youtube.com/@somechannel">channel</a>
<a href="https://youtu.be/real">video</a>"#,
            "August 1, 2025",
            "IVE",
        );
        let release = extract_deterministic(&b, "august", 2025).unwrap();
        assert_eq!(release.youtube_url, "https://youtu.be/real");
    }

    #[test]
    fn generic_mv_release_without_title_track_emits_placeholder() {
        let b = block("MV Release\nAlbum: Test", "August 1, 2025", "IVE");
        let release = extract_deterministic(&b, "august", 2025).unwrap();
        assert_eq!(release.track, "Album & MV Release");
    }
}
