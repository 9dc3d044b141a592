//! Outbound HTTP to YouTube.
//!
//! Every call here is blocking (`ureq`); the axum handlers move them onto the
//! tokio blocking pool so async workers never stall on the network.

use std::io::Read;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProxySettings;
use crate::innertube;

/// Largest page body accepted from upstream. Watch pages are around 1-2 MiB;
/// anything bigger is an error rather than a truncated page.
const MAX_PAGE_BYTES: u64 = 32 * 1024 * 1024;

pub const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";
const PROBE_TITLE_MARKER: &str = "\"title\"";

const MOBILE_SAFARI_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

/// Sent with proxied page fetches. The Google referer gets past referer
/// checks and the no-cache pair asks intermediaries for a fresh copy.
const BROWSER_HEADERS: [(&str, &str); 13] = [
    ("User-Agent", MOBILE_SAFARI_UA),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9,ru;q=0.8"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Referer", "https://www.google.com/"),
    ("Origin", "https://www.google.com"),
];

const PROBE_HEADERS: [(&str, &str); 4] = [
    (
        "User-Agent",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15",
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Referer", "https://www.google.com/"),
];

/// Public pages tried in order by [`Upstream::probe`]; `{id}` is replaced by
/// the video id.
pub const DEFAULT_PROBE_TEMPLATES: [&str; 4] = [
    "https://www.youtube.com/watch?v={id}",
    "https://m.youtube.com/watch?v={id}",
    "https://www.youtube.com/embed/{id}",
    "https://youtube.com/oembed?url=https://www.youtube.com/watch?v={id}&format=json",
];

/// What came back from a proxied page fetch, fully buffered.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub status_text: String,
    /// Upstream `content-type`, `text/html` when the header is missing.
    pub content_type: String,
    pub cf_ray: Option<String>,
    pub cf_country: Option<String>,
    pub body: String,
}

impl PageResponse {
    /// HTML that mentions the player payload and is worth running the
    /// extractor on.
    pub fn may_embed_player(&self) -> bool {
        self.content_type.contains("text/html") && self.body.contains(PLAYER_RESPONSE_MARKER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub url: String,
    pub body: String,
}

/// Shared, read-only client for both upstream strategies and the probe.
#[derive(Clone)]
pub struct Upstream {
    agent: ureq::Agent,
    player_url: String,
    probe_templates: Vec<String>,
}

impl Upstream {
    pub fn from_settings(settings: &ProxySettings) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = settings.upstream_timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            agent: builder.build(),
            player_url: innertube::player_url(
                &settings.innertube_endpoint,
                &settings.innertube_key,
            ),
            probe_templates: DEFAULT_PROBE_TEMPLATES
                .iter()
                .map(|template| template.to_string())
                .collect(),
        }
    }

    pub fn with_probe_templates(mut self, templates: Vec<String>) -> Self {
        self.probe_templates = templates;
        self
    }

    pub fn fetch_player(&self, video_id: &str) -> Result<Value> {
        innertube::fetch_player(&self.agent, &self.player_url, video_id)
    }

    /// Fetches `url` with browser headers, forwarding `method` and, for
    /// anything but GET, `body`. Error statuses are returned, not raised, so
    /// they can be passed through to the caller.
    pub fn fetch_page(&self, method: &str, url: &str, body: &[u8]) -> Result<PageResponse> {
        let mut request = self.agent.request(method, url);
        for (name, value) in BROWSER_HEADERS {
            request = request.set(name, value);
        }

        let result = if method.eq_ignore_ascii_case("GET") {
            request.call()
        } else {
            request.send_bytes(body)
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => bail!("fetching {url}: {err}"),
        };

        let status = response.status();
        let status_text = response.status_text().to_string();
        let content_type = response
            .header("content-type")
            .unwrap_or("text/html")
            .to_string();
        let cf_ray = response.header("cf-ray").map(str::to_string);
        let cf_country = response.header("cf-ipcountry").map(str::to_string);
        let body = read_body(response).with_context(|| format!("reading body of {url}"))?;

        Ok(PageResponse {
            status,
            status_text,
            content_type,
            cf_ray,
            cf_country,
            body,
        })
    }

    /// Walks the probe list and returns the first page that answers 2xx and
    /// looks like it describes a video. Failed candidates are skipped.
    pub fn probe(&self, video_id: &str) -> Option<ProbeHit> {
        for template in &self.probe_templates {
            let url = template.replace("{id}", video_id);
            match self.probe_one(&url) {
                Ok(Some(body)) => return Some(ProbeHit { url, body }),
                Ok(None) => debug!(%url, "probe candidate did not describe a video"),
                Err(err) => warn!(%url, error = %err, "probe candidate failed"),
            }
        }
        None
    }

    fn probe_one(&self, url: &str) -> Result<Option<String>> {
        let mut request = self.agent.get(url);
        for (name, value) in PROBE_HEADERS {
            request = request.set(name, value);
        }
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                debug!(%url, code, "probe candidate answered with an error status");
                return Ok(None);
            }
            Err(err) => bail!("{err}"),
        };
        let body = read_body(response)?;
        let describes_video =
            body.contains(PLAYER_RESPONSE_MARKER) || body.contains(PROBE_TITLE_MARKER);
        Ok(describes_video.then_some(body))
    }
}

fn read_body(response: ureq::Response) -> Result<String> {
    read_body_within(response, MAX_PAGE_BYTES)
}

fn read_body_within(response: ureq::Response, limit: u64) -> Result<String> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(limit + 1)
        .read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        bail!("upstream body exceeds {limit} bytes");
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        http::StatusCode,
        response::IntoResponse,
        routing::{any, get},
    };
    use std::net::SocketAddr;

    async fn spawn_pages() -> SocketAddr {
        let app = Router::new()
            .route(
                "/html",
                get(|| async {
                    (
                        [("content-type", "text/html; charset=utf-8"), ("cf-ray", "abc-AMS")],
                        "<script>var ytInitialPlayerResponse = {};</script>",
                    )
                }),
            )
            .route("/bare", get(|| async { "plain" }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "nothing here") }),
            )
            .route(
                "/echo",
                any(|method: axum::http::Method, body: String| async move {
                    format!("{method} {body}").into_response()
                }),
            )
            .route("/titled", get(|| async { r#"{"title":"A video"}"# }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn upstream() -> Upstream {
        Upstream::from_settings(&ProxySettings {
            host: "127.0.0.1".into(),
            port: 0,
            innertube_endpoint: "http://127.0.0.1:9/player".into(),
            innertube_key: "test".into(),
            upstream_timeout: Some(std::time::Duration::from_secs(5)),
        })
    }

    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_page_captures_headers() {
        let addr = spawn_pages().await;
        let page = blocking(move || upstream().fetch_page("GET", &format!("http://{addr}/html"), &[]))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.content_type.starts_with("text/html"));
        assert_eq!(page.cf_ray.as_deref(), Some("abc-AMS"));
        assert_eq!(page.cf_country, None);
        assert!(page.may_embed_player());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_page_keeps_error_statuses() {
        let addr = spawn_pages().await;
        let page =
            blocking(move || upstream().fetch_page("GET", &format!("http://{addr}/missing"), &[]))
                .await
                .unwrap();
        assert_eq!(page.status, 404);
        assert_eq!(page.body, "nothing here");
        assert!(!page.may_embed_player());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_page_forwards_method_and_body() {
        let addr = spawn_pages().await;
        let page = blocking(move || {
            upstream().fetch_page("POST", &format!("http://{addr}/echo"), b"payload")
        })
        .await
        .unwrap();
        assert_eq!(page.body, "POST payload");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_page_reports_transport_errors() {
        let err = blocking(|| upstream().fetch_page("GET", "not a url", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn oversized_bodies_are_rejected_not_truncated() {
        let fits = ureq::Response::new(200, "OK", "abcdef").unwrap();
        assert_eq!(read_body_within(fits, 6).unwrap(), "abcdef");

        let oversized = ureq::Response::new(200, "OK", "abcdefg").unwrap();
        let err = read_body_within(oversized, 6).unwrap_err();
        assert!(err.to_string().contains("exceeds 6 bytes"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_returns_first_qualifying_candidate() {
        let addr = spawn_pages().await;
        let upstream = upstream().with_probe_templates(vec![
            format!("http://{addr}/missing?v={{id}}"),
            format!("http://{addr}/bare?v={{id}}"),
            format!("http://{addr}/titled?v={{id}}"),
            format!("http://{addr}/html?v={{id}}"),
        ]);
        let hit = blocking(move || upstream.probe("dQw4w9WgXcQ")).await.unwrap();
        assert_eq!(hit.url, format!("http://{addr}/titled?v=dQw4w9WgXcQ"));
        assert!(hit.body.contains("A video"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_gives_up_after_all_candidates() {
        let addr = spawn_pages().await;
        let upstream = upstream().with_probe_templates(vec![
            "http://127.0.0.1:9/unreachable".to_string(),
            format!("http://{addr}/bare"),
        ]);
        assert_eq!(blocking(move || upstream.probe("dQw4w9WgXcQ")).await, None);
    }
}
