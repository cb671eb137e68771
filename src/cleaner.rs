use ego_tree::NodeRef;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};

use crate::model::CleanedBlock;
use crate::youtube_url::{canonicalize_youtube_url, is_youtube_url};

static TD_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static MARK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("mark").unwrap());
static STRONG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("strong").unwrap());
static STRONG_MARK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("strong mark").unwrap());
static DATE_TAG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("date").unwrap());
static ARTIST_TAG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("artist").unwrap());
static NEED_UNPARSE_TAG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("need_unparse").unwrap());

const TEASER_POSTER_MARKER: &str = "Teaser Poster:";

/// Rewrites one `ArtistBlock.raw_html` (or a previously produced
/// `CleanedBlock.structured_text`, to preserve idempotence) into the
/// canonical `<event><date/><artist/><need_unparse/></event>` shape.
pub fn clean_block(raw_html: &str) -> Option<CleanedBlock> {
    if raw_html.trim_start().starts_with("<event>") {
        clean_already_structured(raw_html)
    } else {
        clean_raw_row(raw_html)
    }
}

fn clean_raw_row(raw_html: &str) -> Option<CleanedBlock> {
    let wrapped = format!("<table><tr>{raw_html}</tr></table>");
    let document = Html::parse_document(&wrapped);
    let cells: Vec<_> = document.select(&TD_SELECTOR).collect();
    let left = cells.first()?;
    let right = cells.get(1)?;

    let date_raw = left
        .select(&MARK_SELECTOR)
        .next()
        .map(|m| m.text().collect::<String>())?;

    let artist_raw = right
        .select(&STRONG_MARK_SELECTOR)
        .next()
        .or_else(|| right.select(&STRONG_SELECTOR).next())
        .map(|a| a.text().collect::<String>())?;

    let need_unparse_raw = render_content(*right);

    assemble(date_raw, artist_raw, need_unparse_raw)
}

fn clean_already_structured(raw_html: &str) -> Option<CleanedBlock> {
    let fragment = Html::parse_fragment(raw_html);

    let date_raw = fragment
        .select(&DATE_TAG_SELECTOR)
        .next()
        .map(|e| e.text().collect::<String>())?;
    let artist_raw = fragment
        .select(&ARTIST_TAG_SELECTOR)
        .next()
        .map(|e| e.text().collect::<String>())?;
    let need_el = fragment.select(&NEED_UNPARSE_TAG_SELECTOR).next()?;
    let need_unparse_raw = render_content(need_el);

    assemble(date_raw, artist_raw, need_unparse_raw)
}

fn assemble(date_raw: String, artist_raw: String, need_unparse_raw: String) -> Option<CleanedBlock> {
    let date = normalize_typography(&date_raw).trim().to_string();
    let artist = normalize_typography(&artist_raw).trim().to_string();

    let mut need = normalize_typography(&need_unparse_raw);
    need = strip_after_teaser_poster(&need);
    need = normalize_list_prefix(&need);
    let need = need.trim().to_string();

    if date.is_empty() || artist.is_empty() {
        return None;
    }

    Some(CleanedBlock::new(format!(
        "<event><date>{date}</date><artist>{artist}</artist><need_unparse>{need}</need_unparse></event>"
    )))
}

/// Flattens an element's children to text, keeping `<br>` as newlines and
/// rewriting `<a href>` anchors that point to YouTube (href canonicalized);
/// every other element (mark/strong/span/other anchors/...) is unwrapped to
/// its text content.
fn render_content(start: ElementRef) -> String {
    let mut out = String::new();
    render_children(start.children(), &mut out);
    out
}

fn render_children<'a>(children: impl Iterator<Item = NodeRef<'a, Node>>, out: &mut String) {
    for child in children {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(elem) => {
                let name = elem.name();
                if name.eq_ignore_ascii_case("br") {
                    out.push('\n');
                } else if name.eq_ignore_ascii_case("a") {
                    match elem.attr("href").filter(|href| is_youtube_url(href)) {
                        Some(href) => {
                            let canon = canonicalize_youtube_url(href);
                            out.push_str("<a href=\"");
                            out.push_str(&canon);
                            out.push_str("\">");
                            render_children(child.children(), out);
                            out.push_str("</a>");
                        }
                        None => {} // drop non-YouTube anchors entirely, including their text
                    }
                } else {
                    render_children(child.children(), out);
                }
            }
            _ => {}
        }
    }
}

/// Numeric/named entity decoding plus typographic punctuation normalization:
/// curly quotes to straight quotes, em/en dashes to a plain hyphen, ellipsis
/// to three dots, and non-breaking/exotic Unicode spaces to an ASCII space.
fn normalize_typography(text: &str) -> String {
    let decoded = html_escape::decode_html_entities(text);
    let mut out = String::with_capacity(decoded.len());
    for ch in decoded.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' | '\u{201B}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201F}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{FEFF}' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

fn strip_after_teaser_poster(text: &str) -> String {
    match text.find(TEASER_POSTER_MARKER) {
        Some(idx) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// A line whose trimmed content starts with `"- "` (the ASCII hyphen left
/// behind by [`normalize_typography`]'s em/en-dash collapse) is a bulleted
/// sub-item; render it with a bullet instead of a hyphen for readability.
fn normalize_list_prefix(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed_start = line.trim_start();
            let indent_len = line.len() - trimmed_start.len();
            if let Some(rest) = trimmed_start.strip_prefix("- ") {
                format!("{}{}{}", &line[..indent_len], "\u{2022} ", rest)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1_RAW: &str = r#"<td class="text-align-right"><mark>August 11, 2025</mark></td><td class="text-align-left"><strong><mark>CORTIS</mark></strong><br>Title Track: "GO!" – MV Release<br>Album: 1st EP COLOR OUTSIDE THE LINES<br><a href="https://youtu.be/abc?si=xyz">YouTube</a></td>"#;

    #[test]
    fn cleans_s1_block() {
        let cleaned = clean_block(S1_RAW).expect("should clean");
        assert_eq!(cleaned.date().as_deref(), Some("August 11, 2025"));
        assert_eq!(cleaned.artist().as_deref(), Some("CORTIS"));
        let need = cleaned.need_unparse().unwrap();
        assert!(need.contains("Title Track: \"GO!\""));
        assert!(need.contains(r#"<a href="https://youtu.be/abc">YouTube</a>"#));
        assert!(!need.contains("si="));
    }

    #[test]
    fn cleaning_is_idempotent() {
        let once = clean_block(S1_RAW).unwrap();
        let twice = clean_block(&once.structured_text).unwrap();
        assert_eq!(once.structured_text, twice.structured_text);
    }

    #[test]
    fn drops_non_youtube_anchors_entirely() {
        let raw = r#"<td><mark>August 1, 2025</mark></td><td><strong>IVE</strong><br>Album: Test<br><a href="https://example.com">site</a></td>"#;
        let cleaned = clean_block(raw).unwrap();
        let need = cleaned.need_unparse().unwrap();
        assert!(!need.contains("<a"));
        assert!(!need.contains("site"));
    }

    #[test]
    fn strips_after_teaser_poster_marker() {
        let raw = r#"<td><mark>August 1, 2025</mark></td><td><strong>IVE</strong><br>Album: Test<br>Teaser Poster: coming soon</td>"#;
        let cleaned = clean_block(raw).unwrap();
        let need = cleaned.need_unparse().unwrap();
        assert!(!need.contains("Teaser Poster"));
        assert!(!need.contains("coming soon"));
    }

    #[test]
    fn converts_bulleted_dash_lines() {
        let raw = "<event><date>August 1, 2025</date><artist>IVE</artist><need_unparse>Album: Test\n- First track\n- Second track</need_unparse></event>";
        let cleaned = clean_block(raw).unwrap();
        let need = cleaned.need_unparse().unwrap();
        assert!(need.contains("\u{2022} First track"));
        assert!(need.contains("\u{2022} Second track"));
    }

    #[test]
    fn typographic_quotes_become_straight_quotes() {
        let raw = "<event><date>August 1, 2025</date><artist>IVE</artist><need_unparse>Title Track: \u{201c}Song\u{201d}</need_unparse></event>";
        let cleaned = clean_block(raw).unwrap();
        assert!(cleaned.need_unparse().unwrap().contains("\"Song\""));
    }
}
