//! Video identifier parsing and target URL checks.

use regex::Regex;
use std::sync::LazyLock;

/// Ordered: the broad shape list first, then the `watch?...v=` fallback for
/// ids that follow other query parameters.
static VIDEO_ID_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"(?:v=|/embed/|/watch\?v=|youtu\.be/|/v/|shorts/)([a-zA-Z0-9_-]{11})")
            .expect("valid video id pattern"),
        Regex::new(r"youtube\.com/watch\?.*v=([a-zA-Z0-9_-]{11})")
            .expect("valid watch pattern"),
    ]
});

const ALLOWED_HOST_MARKERS: [&str; 2] = ["youtube.com", "youtu.be"];

/// Pulls the 11-character video id out of a YouTube-style URL.
///
/// ```
/// use ytproxy::video_id::extract_video_id;
/// assert_eq!(
///     extract_video_id("https://youtu.be/dQw4w9WgXcQ").as_deref(),
///     Some("dQw4w9WgXcQ")
/// );
/// ```
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
    })
}

/// Substring check on the raw target; the proxy refuses to fetch anything else.
pub fn is_allowed_target(url: &str) -> bool {
    ALLOWED_HOST_MARKERS
        .iter()
        .any(|marker| url.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_known_shapes() {
        let cases = [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
        ];
        for url in cases {
            assert_eq!(
                extract_video_id(url).as_deref(),
                Some("dQw4w9WgXcQ"),
                "url: {url}"
            );
        }
    }

    #[test]
    fn keeps_only_eleven_characters() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQextra").as_deref(),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn ids_with_dash_and_underscore() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=a-b_c-d_e-f").as_deref(),
            Some("a-b_c-d_e-f")
        );
    }

    #[test]
    fn no_id_for_unrecognized_urls() {
        assert_eq!(extract_video_id("https://www.youtube.com/feed/trending"), None);
        assert_eq!(extract_video_id("https://youtu.be/short"), None);
        assert_eq!(extract_video_id(""), None);
    }

    #[test]
    fn allowed_target_is_a_substring_match() {
        assert!(is_allowed_target("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_allowed_target("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_allowed_target("http://127.0.0.1:9000/youtube.com/watch"));
        assert!(!is_allowed_target("https://example.com"));
        assert!(!is_allowed_target("https://vimeo.com/12345"));
    }
}
