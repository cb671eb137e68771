use url::Url;

const TRACKING_PARAMS: &[&str] = &["si", "t", "list", "feature", "index"];

/// Matches both bare `youtube.com` hosts and the `youtu.be` short-link host.
pub fn is_youtube_url(href: &str) -> bool {
    match Url::parse(href) {
        Ok(url) => match url.host_str() {
            Some(host) => {
                let host = host.trim_start_matches("www.").trim_start_matches("m.");
                host == "youtube.com" || host == "youtu.be" || host == "music.youtube.com"
            }
            None => false,
        },
        Err(_) => false,
    }
}

/// `/@handle` channel links, excluded from the deterministic extractor's
/// "first YouTube link" search.
pub fn is_channel_url(href: &str) -> bool {
    Url::parse(href)
        .map(|url| url.path().starts_with("/@"))
        .unwrap_or(false)
}

/// A short link like `youtu.be/<id>` or `/shorts/<id>`/`/embed/<id>` already
/// carries the video id in its path, so a redundant `v` query parameter is
/// tracking noise rather than the canonical identifier.
fn path_already_identifies_video(path: &str) -> bool {
    path.starts_with("/shorts/") || path.starts_with("/embed/") || (!path.is_empty() && path != "/watch")
}

/// Strips tracking parameters (`si`, `t`, `list`, `feature`, `index`, and a
/// redundant `v` when the path already names the video) and collapses a
/// dangling `?`/`?&` left behind.
pub fn canonicalize_youtube_url(href: &str) -> String {
    let Ok(mut url) = Url::parse(href) else {
        return href.trim().to_string();
    };

    let is_youtu_be = url.host_str().map(|h| h == "youtu.be").unwrap_or(false);
    let strip_v = is_youtu_be || path_already_identifies_video(url.path());

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.as_ref();
            if TRACKING_PARAMS.contains(&k) {
                return false;
            }
            if k == "v" && strip_v {
                return false;
            }
            true
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let pairs = kept
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&pairs));
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_params_from_short_link() {
        let out = canonicalize_youtube_url("https://youtu.be/abc?si=xyz");
        assert_eq!(out, "https://youtu.be/abc");
    }

    #[test]
    fn keeps_v_on_watch_url() {
        let out = canonicalize_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&si=xyz");
        assert_eq!(out, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn no_trailing_question_mark_when_nothing_kept() {
        let out = canonicalize_youtube_url("https://youtu.be/abc?list=PL123&feature=share");
        assert!(!out.contains('?'));
    }

    #[test]
    fn recognizes_channel_urls() {
        assert!(is_channel_url("https://www.youtube.com/@somechannel"));
        assert!(!is_channel_url("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn recognizes_youtube_hosts() {
        assert!(is_youtube_url("https://youtu.be/abc"));
        assert!(is_youtube_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_youtube_url("https://example.com/watch?v=abc"));
    }
}
