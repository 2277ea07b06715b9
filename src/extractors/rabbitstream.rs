use anyhow::Context;
use reqwest::header::{HeaderName, REFERER};
use serde::Deserialize;
use url::Url;

use super::utils::videos_from_url;
use super::{ExtractRequest, ExtractedVideo, Extractor, Track};
use crate::crypto::aes::decrypt_salted_base64;
use crate::http::{get_page_json, get_page_text, merge_headers, origin_of};

const DEFAULT_KEY_URL: &str = "https://raw.githubusercontent.com/enimax-anime/key/e4/key.txt";
const EMBED_HOSTS: &[&str] = &["rabbitstream", "megacloud", "dokicloud"];

#[derive(Debug, Deserialize)]
struct SourcesResponse {
    sources: serde_json::Value,
    #[serde(default)]
    tracks: Vec<SourceTrack>,
}

#[derive(Debug, Deserialize)]
struct SourceFile {
    file: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceTrack {
    file: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// `/embed-N/` players of RabbitStream and its MegaCloud clones.
///
/// Their `getSources` endpoint returns the source list either as plain JSON or as a CryptoJS blob. The
/// passphrase is published at `key_url`, either as text or as index pairs locating it inside the blob.
#[derive(Debug)]
pub struct RabbitStream {
    key_url: String,
}

impl Default for RabbitStream {
    fn default() -> Self {
        RabbitStream {
            key_url: DEFAULT_KEY_URL.to_string(),
        }
    }
}

impl RabbitStream {
    pub fn with_key_url(key_url: impl Into<String>) -> Self {
        RabbitStream { key_url: key_url.into() }
    }

    async fn decrypt_sources(&self, encrypted: &str, request: &ExtractRequest) -> Result<Vec<SourceFile>, anyhow::Error> {
        let key_url = Url::parse(&self.key_url).context("invalid key url")?;
        let key = get_page_text(key_url, &request.headers)
            .await
            .context("failed to fetch decryption key")?;
        let key = key.trim();

        let (password, data) = if key.starts_with('[') {
            let pairs = serde_json::from_str::<Vec<(usize, usize)>>(key).context("invalid key pairs")?;
            split_embedded_password(&pairs, encrypted)?
        } else {
            (key.to_string(), encrypted.to_string())
        };

        let plain = decrypt_salted_base64(&data, password.as_bytes()).context("failed to decrypt sources")?;
        serde_json::from_slice(&plain).context("decrypted sources are not valid json")
    }
}

/// Removes the passphrase hidden in `encrypted` and returns `(password, data)`.
///
/// Each `(offset, length)` pair selects `length` characters starting `offset` characters into the blob,
/// shifted right by the lengths of all previous pairs.
pub fn split_embedded_password(pairs: &[(usize, usize)], encrypted: &str) -> Result<(String, String), anyhow::Error> {
    let mut chars = encrypted.chars().map(Some).collect::<Vec<_>>();
    let mut password = String::new();
    let mut shift = 0usize;

    for &(offset, length) in pairs {
        let out_of_range = || format!("key pair ({offset}, {length}) out of range");
        let start = offset.checked_add(shift).with_context(out_of_range)?;
        let end = start.checked_add(length).with_context(out_of_range)?;
        let selected = chars.get_mut(start..end).with_context(out_of_range)?;

        for slot in selected {
            password.extend(slot.take());
        }

        shift = shift.checked_add(length).with_context(out_of_range)?;
    }

    Ok((password, chars.into_iter().flatten().collect()))
}

impl Extractor for RabbitStream {
    const DISPLAY_NAME: &'static str = "RabbitStream";
    const NAMES: &'static [&'static str] = &["RabbitStream", "MegaCloud"];

    async fn supports_url(url: &str) -> Option<bool> {
        Some(
            Url::parse(url)
                .map(|url| {
                    let host_matches = url
                        .host_str()
                        .map(|host| EMBED_HOSTS.iter().any(|needle| host.contains(needle)))
                        .unwrap_or(false);
                    host_matches && url.path().contains("/embed-")
                })
                .unwrap_or(false),
        )
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let embed_url = request
            .parsed_url()
            .context("RabbitStream: failed to retrieve sources")?;
        let id = embed_url
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .map(str::to_string)
            .context("RabbitStream: failed to retrieve sources: no embed id")?;

        let origin = origin_of(&embed_url);
        let mut sources_url = Url::parse(&format!("{origin}/ajax/embed-4/getSources"))
            .context("RabbitStream: failed to retrieve sources")?;
        sources_url.query_pairs_mut().append_pair("id", &id);

        let api_headers = merge_headers(
            &request.headers,
            &[
                (HeaderName::from_static("x-requested-with"), "XMLHttpRequest"),
                (REFERER, embed_url.as_str()),
            ],
        );
        let response: SourcesResponse = get_page_json(sources_url, &api_headers)
            .await
            .context("RabbitStream: failed to retrieve sources")?;

        let sources = match response.sources {
            serde_json::Value::String(encrypted) => self
                .decrypt_sources(&encrypted, request)
                .await
                .context("RabbitStream: failed to retrieve sources")?,
            value => serde_json::from_value::<Vec<SourceFile>>(value)
                .context("RabbitStream: failed to retrieve sources: unexpected sources")?,
        };

        let subtitles = response
            .tracks
            .iter()
            .filter(|track| matches!(track.kind.as_deref(), Some("captions") | Some("subtitles")))
            .map(|track| Track::new(track.label.clone().unwrap_or_else(|| "Unknown".to_string()), &track.file))
            .collect::<Vec<_>>();

        let video_headers = merge_headers(&request.headers, &[(REFERER, format!("{origin}/"))]);
        let mut videos = Vec::new();

        for source in sources {
            let Ok(url) = Url::parse(&source.file) else {
                log::debug!("RabbitStream: skipping invalid source url: {}", source.file);
                continue;
            };
            log::trace!("RabbitStream: source {} ({:?})", url, source.kind);

            match videos_from_url(url, &video_headers, None, |quality| {
                request.label(Self::DISPLAY_NAME, quality)
            })
            .await
            {
                Ok(found) => videos.extend(found),
                Err(err) => log::debug!("RabbitStream: skipping {}: {:#}", source.file, err),
            }
        }

        for video in &mut videos {
            let mut merged = subtitles.clone();
            merged.append(&mut video.subtitles);
            video.subtitles = merged;
        }

        Ok(videos)
    }
}
