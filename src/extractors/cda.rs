use std::collections::BTreeMap;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::REFERER;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::utils::{html_attribute, is_url_host_and_has_path};
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::http::{get_page, merge_headers, origin_of, post_json, RequestBody};

const DEFAULT_RPC_URL: &str = "https://www.cda.pl/";
const FILE_MARKERS: &[&str] = &["_XDDD", "_CDA", "_ADC", "_CXD", "_QWE", "_Q5", "_IKSDE"];

#[derive(Debug, Deserialize)]
struct PlayerData {
    video: PlayerVideo,
    #[serde(default)]
    api: Option<PlayerApi>,
}

#[derive(Debug, Deserialize)]
struct PlayerApi {
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerVideo {
    id: String,
    #[serde(default)]
    file: String,
    #[serde(default)]
    quality: String,
    #[serde(default)]
    qualities: BTreeMap<String, String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    hash2: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: RpcResult,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    resp: String,
}

/// Decodes the `file` field of CDA player data into a media url.
pub fn decrypt_file(file: &str) -> Result<String, anyhow::Error> {
    let mut stripped = file.to_string();
    for marker in FILE_MARKERS {
        stripped = stripped.replace(marker, "");
    }

    let unquoted = urlencoding::decode(&stripped).context("file is not valid percent encoding")?;
    let shifted = unquoted
        .chars()
        .map(|c| match c as u32 {
            code @ 33..=126 => char::from_u32(33 + (code + 14) % 94).unwrap_or(c),
            _ => c,
        })
        .collect::<String>();

    let path = shifted
        .replace(".cda.mp4", "")
        .replace(".2cda.pl", ".cda.pl")
        .replace(".3cda.pl", ".cda.pl");

    if path.contains("/upstream") {
        Ok(format!("https://{}", path.replace("/upstream", ".mp4/upstream")))
    } else {
        Ok(format!("https://{path}.mp4"))
    }
}

/// `1080` for `"1080p"`, zero when the name has no leading number.
fn quality_height(quality: &str) -> u32 {
    quality
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct Cda {
    rpc_url: String,
}

impl Default for Cda {
    fn default() -> Self {
        Cda {
            rpc_url: DEFAULT_RPC_URL.to_string(),
        }
    }
}

impl Cda {
    pub fn with_rpc_url(rpc_url: impl Into<String>) -> Self {
        Cda { rpc_url: rpc_url.into() }
    }

    async fn video_link(
        &self,
        video: &PlayerVideo,
        quality_id: &str,
        ts: &str,
        request: &ExtractRequest,
    ) -> Result<String, anyhow::Error> {
        let rpc_url = Url::parse(&self.rpc_url).context("invalid rpc url")?;
        let ts = ts.split('_').next().unwrap_or(ts);
        let ts = ts.parse::<u64>().map(serde_json::Value::from).unwrap_or_else(|_| json!(ts));

        let body = json!({
            "jsonrpc": "2.0",
            "method": "videoGetLink",
            "params": [video.id, quality_id, ts, video.hash2, {}],
            "id": 4,
        });
        let response: RpcResponse = post_json(rpc_url, &request.headers, RequestBody::Json(body)).await?;

        Ok(response.result.resp)
    }
}

impl Extractor for Cda {
    const DISPLAY_NAME: &'static str = "CDA";
    const NAMES: &'static [&'static str] = &["CDA", "cda.pl"];

    async fn supports_url(url: &str) -> Option<bool> {
        let is_video_path = Url::parse(url)
            .map(|url| url.path().starts_with("/video/") || url.host_str() == Some("ebd.cda.pl"))
            .unwrap_or(false);

        Some(
            is_video_path
                && (is_url_host_and_has_path(url, "cda.pl", false, true)
                    || is_url_host_and_has_path(url, "ebd.cda.pl", false, false)),
        )
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        static PLAYER_DATA_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"<[^>]*\splayer_data\s*=\s*(?:"[^"]*"|'[^']*')[^>]*>"#).unwrap());

        let page_url = request.parsed_url().context("CDA: failed to retrieve sources")?;
        let page = get_page(page_url, &request.headers)
            .await
            .context("CDA: failed to retrieve sources")?;

        let player_data = PLAYER_DATA_REGEX
            .find(&page.text)
            .and_then(|tag| html_attribute(tag.as_str(), "player_data"))
            .context("CDA: failed to retrieve sources: no player data")?;
        let player_data: PlayerData =
            serde_json::from_str(&player_data).context("CDA: failed to retrieve sources: invalid player data")?;

        let video = player_data.video;
        let ts = player_data
            .api
            .and_then(|api| api.ts)
            .or_else(|| video.ts.clone())
            .unwrap_or_default();
        let headers = merge_headers(&request.headers, &[(REFERER, format!("{}/", origin_of(&page.url)))]);

        let mut qualities = video.qualities.iter().collect::<Vec<_>>();
        qualities.sort_by_key(|(quality, _)| std::cmp::Reverse(quality_height(quality)));
        let mut videos = Vec::new();

        if qualities.is_empty() {
            if !video.file.is_empty() {
                let url = decrypt_file(&video.file).context("CDA: failed to retrieve sources")?;
                let quality = Some(video.quality.as_str()).filter(|quality| !quality.is_empty());
                videos.push(ExtractedVideo::new(url, request.label(Self::DISPLAY_NAME, quality)).headers(headers));
            }
            return Ok(videos);
        }

        for (quality, quality_id) in qualities {
            // `file` only holds the quality the page was rendered with; the rest come from the rpc endpoint.
            let url = if *quality_id == video.quality && !video.file.is_empty() {
                decrypt_file(&video.file)
            } else {
                self.video_link(&video, quality_id, &ts, request).await
            };

            match url {
                Ok(url) => videos.push(
                    ExtractedVideo::new(url, request.label(Self::DISPLAY_NAME, Some(quality.as_str()))).headers(headers.clone()),
                ),
                Err(err) => log::debug!("CDA: skipping {quality}: {:#}", err),
            }
        }

        Ok(videos)
    }
}
