//! The request dispatcher.
//!
//! One fallback handler serves every path: it resolves a video id and/or a
//! target URL from the query string, tries the player API first and falls
//! back to fetching the target page and scraping its embedded player JSON.
//! `/probe` hosts the secondary alternate-page probe. A response middleware
//! stamps the CORS headers on everything that leaves the router.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::embedded_json::extract_between;
use crate::upstream::{PageResponse, Upstream};
use crate::video_id::{extract_video_id, is_allowed_target};

pub const INNER_API_SOURCE: &str = "youtube_inner_api";
pub const PLAYER_START_MARKER: &str = "var ytInitialPlayerResponse = ";
pub const PLAYER_END_MARKER: &str = ";</script>";

const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    (
        "access-control-allow-methods",
        "GET, POST, PUT, DELETE, OPTIONS",
    ),
    (
        "access-control-allow-headers",
        "Content-Type, Authorization, X-Requested-With",
    ),
];

/// Shared state injected into every handler. Read-only after start-up, so
/// requests never observe each other.
#[derive(Clone)]
pub struct ProxyState {
    upstream: Arc<Upstream>,
}

impl ProxyState {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/probe", any(probe))
        .fallback(dispatch)
        // Forwarded bodies are not capped by axum's 2 MiB default.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::map_response(with_cors_headers))
        .with_state(state)
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

fn preflight() -> Response {
    StatusCode::OK.into_response()
}

/// The `url` and `v` query parameters. Empty values count as absent and the
/// first occurrence of a repeated key wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProxyParams {
    pub url: Option<String>,
    pub v: Option<String>,
}

impl ProxyParams {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map_err(|err| anyhow!("invalid query string: {err}"))?;
        let first = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
                .filter(|value| !value.is_empty())
        };
        Ok(Self {
            url: first("url"),
            v: first("v"),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InnerApiEnvelope {
    success: bool,
    data: Value,
    source: &'static str,
    extracted_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageEnvelope {
    success: bool,
    data: Value,
    extracted_at: String,
    proxy_info: ProxyInfo,
    /// Why the player API was skipped over, when it was tried first.
    #[serde(skip_serializing_if = "Option::is_none")]
    inner_api_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyInfo {
    cloudflare_ray: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProbeEnvelope {
    success: bool,
    method: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_id: Option<String>,
}

/// JSON error response. The `error` field is always present; the others only
/// where the caller gets something actionable from them.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                ..ErrorBody::default()
            },
        }
    }

    pub fn missing_params() -> Self {
        let mut err = Self::new(StatusCode::BAD_REQUEST, "Missing url or v parameter");
        err.body.usage =
            Some("Add ?url=https://youtube.com/watch?v=VIDEO_ID or ?v=VIDEO_ID");
        err
    }

    pub fn forbidden_target() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Only YouTube URLs are allowed")
    }

    pub fn no_fallback() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "Inner API failed and no URL provided for HTML parsing",
        )
    }

    pub fn missing_video_id() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Missing video ID parameter")
    }

    pub fn probe_exhausted(video_id: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::NOT_FOUND, "All methods failed");
        err.body.video_id = Some(video_id.into());
        err
    }

    /// The top-level 500 for anything the strategies did not absorb.
    pub fn proxy_failure(err: &anyhow::Error) -> Self {
        let mut api_err = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Proxy request failed");
        api_err.body.message = Some(format!("{err:#}"));
        api_err.body.timestamp = Some(timestamp());
        api_err
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("upstream worker panicked")
}

async fn dispatch(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }

    match proxy_request(&state, method, &uri, body).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %format!("{err:#}"), "proxy request failed");
            ApiError::proxy_failure(&err).into_response()
        }
    }
}

async fn proxy_request(
    state: &ProxyState,
    method: Method,
    uri: &Uri,
    body: Bytes,
) -> Result<Response> {
    let ProxyParams { url: target, v } = ProxyParams::from_uri(uri)?;
    let video_id = v.or_else(|| target.as_deref().and_then(extract_video_id));

    info!(
        %method,
        target = target.as_deref().unwrap_or("-"),
        video_id = video_id.as_deref().unwrap_or("-"),
        "dispatching proxy request"
    );

    if target.is_none() && video_id.is_none() {
        return Ok(ApiError::missing_params().into_response());
    }

    let mut inner_api_error = None;
    if let Some(video_id) = video_id {
        let upstream = state.upstream.clone();
        let lookup_id = video_id.clone();
        match run_blocking(move || upstream.fetch_player(&lookup_id)).await? {
            Ok(data) => {
                let envelope = InnerApiEnvelope {
                    success: true,
                    data,
                    source: INNER_API_SOURCE,
                    extracted_at: timestamp(),
                };
                return Ok(Json(envelope).into_response());
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(%video_id, error = %reason, "player API lookup failed, falling back");
                inner_api_error = Some(reason);
            }
        }
    }

    let Some(target) = target else {
        return Ok(ApiError::no_fallback().into_response());
    };
    if !is_allowed_target(&target) {
        return Ok(ApiError::forbidden_target().into_response());
    }

    let upstream = state.upstream.clone();
    let page = run_blocking(move || upstream.fetch_page(method.as_str(), &target, &body)).await??;
    Ok(shape_page(page, inner_api_error))
}

fn shape_page(page: PageResponse, inner_api_error: Option<String>) -> Response {
    if page.may_embed_player() {
        match extract_between(&page.body, PLAYER_START_MARKER, PLAYER_END_MARKER) {
            Ok(data) => {
                let envelope = PageEnvelope {
                    success: true,
                    data,
                    extracted_at: timestamp(),
                    proxy_info: ProxyInfo {
                        cloudflare_ray: page.cf_ray,
                        country: page.cf_country,
                    },
                    inner_api_error,
                };
                return Json(envelope).into_response();
            }
            Err(err) if err.is_not_found() => {
                debug!(error = %err, "player markers missing, passing page through")
            }
            Err(err) => warn!(error = %err, "embedded player JSON unusable, passing page through"),
        }
    }
    passthrough(page)
}

fn passthrough(page: PageResponse) -> Response {
    let status = StatusCode::from_u16(page.status).unwrap_or(StatusCode::BAD_GATEWAY);
    debug!(status = page.status, status_text = %page.status_text, "raw passthrough");
    let content_type = HeaderValue::from_str(&page.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("text/html"));
    let mut response = (status, page.body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

async fn probe(State(state): State<ProxyState>, method: Method, uri: Uri) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }

    let params = match ProxyParams::from_uri(&uri) {
        Ok(params) => params,
        Err(err) => return ApiError::internal(format!("{err:#}")).into_response(),
    };
    let Some(video_id) = params.v else {
        return ApiError::missing_video_id().into_response();
    };

    let upstream = state.upstream.clone();
    let probe_id = video_id.clone();
    match tokio::task::spawn_blocking(move || upstream.probe(&probe_id)).await {
        Ok(Some(hit)) => {
            info!(%video_id, url = %hit.url, "probe succeeded");
            Json(ProbeEnvelope {
                success: true,
                method: hit.url,
                data: hit.body,
            })
            .into_response()
        }
        Ok(None) => ApiError::probe_exhausted(video_id).into_response(),
        Err(err) => {
            error!(error = %err, "probe worker failed");
            ApiError::internal(err.to_string()).into_response()
        }
    }
}
