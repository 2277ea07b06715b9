use anyhow::Context;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, REFERER};
use url::Url;

use super::utils::videos_from_url;
use super::{ExtractRequest, ExtractedVideo, Extractor, Track};
use crate::http::{get_page, merge_headers, origin_of};
use crate::jsunpack::deobfuscate;

static SOURCES_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)["']?sources["']?\s*:\s*\[(.*?)\]"#).unwrap());
static TRACKS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)["']?tracks["']?\s*:\s*\[(.*?)\]"#).unwrap());
static OBJECT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());
static FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']?(?:file|src)["']?\s*:\s*["']([^"']+)["']"#).unwrap());
static LABEL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["']?label["']?\s*:\s*["']([^"']*)["']"#).unwrap());
static KIND_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["']?kind["']?\s*:\s*["']([^"']*)["']"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSource {
    pub file: String,
    pub label: Option<String>,
}

/// What a `jwplayer().setup({...})` call (or a look-alike player config) declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerSetup {
    pub sources: Vec<PlayerSource>,
    pub tracks: Vec<Track>,
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().replace("\\/", "/"))
}

/// Reads the sources and caption tracks out of a deobfuscated player script.
///
/// A `sources: [...]` list wins; otherwise the first `file: "..."` is taken. Returns `None` when the script
/// declares no file at all.
pub fn parse_player_setup(script: &str) -> Option<PlayerSetup> {
    let mut sources = SOURCES_REGEX
        .captures(script)
        .and_then(|captures| captures.get(1))
        .map(|list| {
            OBJECT_REGEX
                .find_iter(list.as_str())
                .filter_map(|object| {
                    let object = object.as_str();
                    Some(PlayerSource {
                        file: capture(&FILE_REGEX, object)?,
                        label: capture(&LABEL_REGEX, object).filter(|label| !label.is_empty()),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if sources.is_empty() {
        sources.extend(capture(&FILE_REGEX, script).map(|file| PlayerSource { file, label: None }));
    }

    if sources.is_empty() {
        return None;
    }

    let tracks = TRACKS_REGEX
        .captures(script)
        .and_then(|captures| captures.get(1))
        .map(|list| {
            OBJECT_REGEX
                .find_iter(list.as_str())
                .filter(|object| {
                    matches!(
                        capture(&KIND_REGEX, object.as_str()).as_deref(),
                        Some("captions") | Some("subtitles")
                    )
                })
                .filter_map(|object| {
                    let object = object.as_str();
                    let file = capture(&FILE_REGEX, object)?;
                    let label = capture(&LABEL_REGEX, object).unwrap_or_else(|| "Unknown".to_string());
                    Some(Track::new(label, file))
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Some(PlayerSetup { sources, tracks })
}

/// Script bodies worth searching, most specific first: `data:` URI scripts, inline scripts, then the
/// whole document for responses that are plain JavaScript.
pub(crate) fn script_candidates(html: &str) -> Vec<String> {
    static SCRIPT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script[^>]*>(.*?)</script>").unwrap());
    static DATA_URI_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"data:text/javascript;base64,([A-Za-z0-9+/=]+)").unwrap());

    let mut candidates = DATA_URI_REGEX
        .captures_iter(html)
        .filter_map(|captures| {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(captures.get(1)?.as_str())
                .ok()?;
            String::from_utf8(decoded).ok()
        })
        .collect::<Vec<_>>();

    candidates.extend(
        SCRIPT_REGEX
            .captures_iter(html)
            .filter_map(|captures| captures.get(1))
            .map(|body| body.as_str().trim())
            .filter(|body| !body.is_empty())
            .map(str::to_string),
    );
    candidates.push(html.to_string());

    candidates
}

/// Finds the first script that declares a player setup, unwrapping obfuscation on the way.
pub fn find_player_setup(html: &str) -> Option<PlayerSetup> {
    script_candidates(html)
        .iter()
        .find_map(|script| parse_player_setup(&deobfuscate(script)))
}

/// Turns a player setup into videos. Relative files resolve against `base_url`; caption tracks go to every
/// video. Sources that cannot be fetched are skipped.
pub async fn videos_from_setup(
    setup: PlayerSetup,
    base_url: &Url,
    headers: &HeaderMap,
    request: &ExtractRequest,
    server: &str,
) -> Vec<ExtractedVideo> {
    let tracks = setup
        .tracks
        .into_iter()
        .filter_map(|track| {
            let url = base_url.join(&track.url).ok()?;
            Some(Track::new(track.label, url))
        })
        .collect::<Vec<_>>();

    let mut videos = Vec::new();

    for source in setup.sources {
        let Ok(url) = base_url.join(&source.file) else {
            log::debug!("{server}: skipping invalid source url: {}", source.file);
            continue;
        };

        match videos_from_url(url, headers, source.label.as_deref(), |quality| {
            request.label(server, quality)
        })
        .await
        {
            Ok(found) => videos.extend(found),
            Err(err) => log::debug!("{server}: skipping {}: {:#}", source.file, err),
        }
    }

    for video in &mut videos {
        let mut merged = tracks.clone();
        merged.append(&mut video.subtitles);
        video.subtitles = merged;
    }

    videos
}

/// Any page embedding a JW Player. Only used when asked for by name, since nothing in a url says so.
#[derive(Debug, Default)]
pub struct JwPlayer;

impl Extractor for JwPlayer {
    const DISPLAY_NAME: &'static str = "JWPlayer";
    const NAMES: &'static [&'static str] = &["JWPlayer", "JW"];

    async fn supports_url(_url: &str) -> Option<bool> {
        None
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let page_url = request.parsed_url().context("JWPlayer: failed to retrieve sources")?;
        let page = get_page(page_url, &request.headers)
            .await
            .context("JWPlayer: failed to retrieve sources")?;

        let setup = find_player_setup(&page.text).context("JWPlayer: failed to retrieve sources: no player setup")?;
        let headers = merge_headers(&request.headers, &[(REFERER, format!("{}/", origin_of(&page.url)))]);

        Ok(videos_from_setup(setup, &page.url, &headers, request, Self::DISPLAY_NAME).await)
    }
}
