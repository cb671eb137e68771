use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::EngineError;
use crate::model::{ParsedRelease, Release};

static KST_TIME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(AM|PM)\s*KST\b").unwrap());

/// Re-parses one [`ParsedRelease`] against the target month/year, producing a
/// normalized [`Release`]. Drops (returns `Ok(None)`) on unparsable dates or a
/// month mismatch rather than failing the whole batch.
pub fn reconcile_one(
    parsed: &ParsedRelease,
    target_month: &str,
    target_year: i32,
    raw_block_text: &str,
    display_tz: Tz,
) -> Result<Option<Release>, EngineError> {
    let naive = parse_release_date(&parsed.date_text, target_year)
        .ok_or_else(|| EngineError::Date(parsed.date_text.clone()))?;

    if !naive.format("%B").to_string().eq_ignore_ascii_case(target_month) {
        return Ok(None);
    }

    let time_local = extract_kst_time(raw_block_text)
        .map(|t| convert_kst_to_display(naive, t, display_tz))
        .unwrap_or_default();

    Ok(Some(Release {
        date: naive.format("%d.%m.%y").to_string(),
        time_local,
        artist: parsed.artist.clone(),
        album: parsed.album.clone(),
        title_track: parsed.track.clone(),
        mv_url: parsed.youtube_url.clone(),
    }))
}

/// Accepts either the engine's own `DD.MM.YY` output or an English long-form
/// date (`"August 11, 2025"`, as produced directly by the block cleaner).
fn parse_release_date(text: &str, target_year: i32) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%d.%m.%y") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%B %d, %Y") {
        return Some(date);
    }
    // bare "Month DD" with no year, assume the target year
    let with_year = format!("{text}, {target_year}");
    NaiveDate::parse_from_str(&with_year, "%B %d, %Y").ok()
}

fn extract_kst_time(text: &str) -> Option<NaiveTime> {
    let caps = KST_TIME_TOKEN.captures(text)?;
    let hour: u32 = caps[1].parse().ok()?;
    let is_pm = caps[2].eq_ignore_ascii_case("pm");
    let hour24 = match (hour % 12, is_pm) {
        (h, true) => h + 12,
        (h, false) => h,
    };
    NaiveTime::from_hms_opt(hour24, 0, 0)
}

fn convert_kst_to_display(date: NaiveDate, time: NaiveTime, display_tz: Tz) -> String {
    let kst = chrono_tz::Asia::Seoul;
    let naive_dt = date.and_time(time);
    match kst.from_local_datetime(&naive_dt).single() {
        Some(kst_dt) => {
            let converted: DateTime<Tz> = kst_dt.with_timezone(&display_tz);
            converted.format("%H:%M").to_string()
        }
        None => String::new(),
    }
}

/// Groups candidates by `(artist-lowercased, date)`, picks one representative
/// per group per the richer tie-break rule, then sorts by date/artist/track.
pub fn group_and_select(releases: Vec<Release>) -> Vec<Release> {
    let mut groups: HashMap<(String, String), Vec<Release>> = HashMap::new();
    for release in releases {
        groups.entry(release.group_key()).or_default().push(release);
    }

    let mut selected: Vec<Release> = groups.into_values().map(pick_best).collect();
    selected.sort_by(|a, b| {
        release_date(a)
            .cmp(&release_date(b))
            .then_with(|| a.artist_lower().cmp(&b.artist_lower()))
            .then_with(|| a.title_track_lower().cmp(&b.title_track_lower()))
    });

    debug!(count = selected.len(), "reconciled release group count");
    selected
}

/// `Release.date` is stored as `DD.MM.YY`, which does not sort lexicographically
/// in calendar order across month boundaries. Falls back to `NaiveDate::MIN`
/// for a malformed date rather than panicking; `reconcile_one` never produces one.
fn release_date(release: &Release) -> NaiveDate {
    NaiveDate::parse_from_str(&release.date, "%d.%m.%y").unwrap_or(NaiveDate::MIN)
}

/// Prefer a record with both a non-empty track and a non-empty YouTube URL;
/// else one with a non-empty track; else one with a non-empty YouTube URL;
/// else whichever was seen first.
fn pick_best(mut candidates: Vec<Release>) -> Release {
    candidates.sort_by_key(|r| std::cmp::Reverse(score(r)));
    candidates
        .into_iter()
        .next()
        .expect("group_and_select never creates an empty group")
}

fn score(release: &Release) -> u8 {
    let has_track = !release.title_track.is_empty();
    let has_mv = !release.mv_url.is_empty();
    match (has_track, has_mv) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    }
}
