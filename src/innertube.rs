//! Player-data lookups against YouTube's internal `youtubei/v1/player` API,
//! posing as the iOS app.
//!
//! The mobile client usually receives direct stream URLs, which is the reason
//! to try this before scraping the watch page.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

pub const CLIENT_NAME: &str = "IOS";
pub const CLIENT_NAME_ID: &str = "5";
pub const CLIENT_VERSION: &str = "17.36.4";
pub const SIGNATURE_TIMESTAMP: u32 = 19834;

const IOS_USER_AGENT: &str =
    "com.google.ios.youtube/17.36.4 (iPhone; CPU iPhone OS 16_6 like Mac OS X)";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRequest<'a> {
    pub video_id: &'a str,
    pub context: RequestContext,
    pub playback_context: PlaybackContext,
    pub racy_check_ok: bool,
    pub content_check_ok: bool,
}

#[derive(Debug, Serialize)]
pub struct RequestContext {
    pub client: ClientInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub hl: &'static str,
    pub gl: &'static str,
    pub device_make: &'static str,
    pub device_model: &'static str,
    pub client_name: &'static str,
    pub client_version: &'static str,
    pub os_name: &'static str,
    pub os_version: &'static str,
    pub platform: &'static str,
    pub client_form_factor: &'static str,
}

impl ClientInfo {
    fn ios() -> Self {
        Self {
            hl: "en",
            gl: "US",
            device_make: "Apple",
            device_model: "iPhone",
            client_name: CLIENT_NAME,
            client_version: CLIENT_VERSION,
            os_name: "iOS",
            os_version: "16.6",
            platform: "MOBILE",
            client_form_factor: "SMALL_FORM_FACTOR",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackContext {
    pub content_playback_context: ContentPlaybackContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPlaybackContext {
    pub html5_preference: &'static str,
    pub referer: String,
    pub signature_timestamp: u32,
}

impl<'a> PlayerRequest<'a> {
    pub fn for_video(video_id: &'a str) -> Self {
        Self {
            video_id,
            context: RequestContext {
                client: ClientInfo::ios(),
            },
            playback_context: PlaybackContext {
                content_playback_context: ContentPlaybackContext {
                    html5_preference: "HTML5_PREF_WANTS",
                    referer: format!("https://www.youtube.com/watch?v={video_id}"),
                    signature_timestamp: SIGNATURE_TIMESTAMP,
                },
            },
            racy_check_ok: true,
            content_check_ok: true,
        }
    }
}

/// Headers the iOS app sends alongside a player request.
pub fn player_headers() -> [(&'static str, &'static str); 6] {
    [
        ("Content-Type", "application/json"),
        ("User-Agent", IOS_USER_AGENT),
        ("X-YouTube-Client-Name", CLIENT_NAME_ID),
        ("X-YouTube-Client-Version", CLIENT_VERSION),
        ("Accept", "application/json"),
        ("Accept-Language", "en-US,en;q=0.9"),
    ]
}

pub fn player_url(endpoint: &str, key: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}key={key}")
}

/// A response is only useful when it carries both metadata and stream info;
/// unplayable or age-gated videos come back without `streamingData`.
pub fn is_playable(data: &Value) -> bool {
    ["videoDetails", "streamingData"]
        .iter()
        .all(|field| data.get(field).is_some_and(|value| !value.is_null()))
}

/// Issues one blocking player request. Any non-2xx status, undecodable body or
/// unplayable payload is reported as an error for the caller to fall back on.
pub fn fetch_player(agent: &ureq::Agent, url: &str, video_id: &str) -> Result<Value> {
    let mut request = agent.post(url);
    for (name, value) in player_headers() {
        request = request.set(name, value);
    }

    let response = match request.send_json(PlayerRequest::for_video(video_id)) {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => bail!("player API responded with status {code}"),
        Err(err) => bail!("calling player API: {err}"),
    };

    let data: Value = response
        .into_json()
        .context("decoding player API response")?;
    if !is_playable(&data) {
        bail!("player API response lacks videoDetails or streamingData");
    }
    Ok(data)
}
