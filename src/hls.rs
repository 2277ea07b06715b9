//! Splitting of HLS master playlists into per-quality variants.

use anyhow::Context;
use m3u8_rs::{AlternativeMedia, AlternativeMediaType, Playlist};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

/// A side track (subtitle or detached audio) attached to a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub label: String,
    pub url: String,
}

impl Track {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Track {
            label: label.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistVariant {
    pub label: String,
    pub url: String,
    /// `AVERAGE-BANDWIDTH` in bits per second, when the playlist declares it.
    pub average_bandwidth: Option<u64>,
    pub subtitles: Vec<Track>,
    pub audio_tracks: Vec<Track>,
}

pub fn is_master_playlist(text: &str) -> bool {
    text.contains(STREAM_INF_TAG)
}

/// Splits a master playlist into its variants, in playlist order.
///
/// Relative variant URIs are resolved against `playlist_url`, which should be the final URL the playlist
/// was served from. A playlist without any `#EXT-X-STREAM-INF` is a media playlist already: it yields one
/// variant labelled `default_label` pointing at `playlist_url` unchanged. A master playlist that yields no
/// variant at all is an error.
pub fn split_master_playlist(
    text: &str,
    playlist_url: &Url,
    default_label: &str,
) -> Result<Vec<PlaylistVariant>, anyhow::Error> {
    let fallback = || PlaylistVariant {
        label: default_label.to_string(),
        url: playlist_url.as_str().to_string(),
        average_bandwidth: None,
        subtitles: Vec::new(),
        audio_tracks: Vec::new(),
    };

    if !is_master_playlist(text) {
        return Ok(vec![fallback()]);
    }

    let playlist = match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(playlist)) => Some(playlist),
        Ok(Playlist::MediaPlaylist(_)) | Err(_) => None,
    };
    let alternatives = playlist
        .as_ref()
        .map(|playlist| playlist.alternatives.as_slice())
        .unwrap_or_default();

    let subtitles = tracks_of_type(alternatives, playlist_url, |media_type| {
        matches!(media_type, AlternativeMediaType::Subtitles)
    });
    let audio_tracks = tracks_of_type(alternatives, playlist_url, |media_type| {
        matches!(media_type, AlternativeMediaType::Audio)
    });

    let mut variants = playlist
        .iter()
        .flat_map(|playlist| playlist.variants.iter())
        .filter(|variant| !variant.is_i_frame)
        .map(|variant| {
            let url = playlist_url
                .join(variant.uri.trim())
                .with_context(|| format!("invalid variant uri: {}", variant.uri))?;
            let label = variant
                .resolution
                .as_ref()
                .map(|resolution| format!("{}p", resolution.height))
                .unwrap_or_else(|| default_label.to_string());

            Ok(PlaylistVariant {
                label,
                url: url.into(),
                average_bandwidth: variant.average_bandwidth,
                subtitles: subtitles.clone(),
                audio_tracks: audio_tracks.clone(),
            })
        })
        .collect::<Result<Vec<_>, anyhow::Error>>()?;

    // m3u8-rs drops `#EXT-X-STREAM-INF` lines it considers incomplete, e.g. without BANDWIDTH.
    let stream_inf_count = text
        .lines()
        .filter(|line| line.trim_start().starts_with(STREAM_INF_TAG))
        .count();
    if variants.len() < stream_inf_count {
        variants = split_stream_inf_lines(text, playlist_url, default_label)?;
        for variant in &mut variants {
            variant.subtitles = subtitles.clone();
            variant.audio_tracks = audio_tracks.clone();
        }
    }

    if variants.is_empty() {
        anyhow::bail!("master playlist has no variants");
    }

    Ok(variants)
}

/// Reads each `#EXT-X-STREAM-INF` attribute line and the next non-empty, non-tag line as its URI.
fn split_stream_inf_lines(
    text: &str,
    playlist_url: &Url,
    default_label: &str,
) -> Result<Vec<PlaylistVariant>, anyhow::Error> {
    static ATTRIBUTE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([A-Z0-9-]+)=("[^"]*"|[^,]*)"#).unwrap());

    let mut variants = Vec::new();
    let mut lines = text.lines().map(str::trim);

    while let Some(line) = lines.next() {
        let Some(attributes) = line.strip_prefix(STREAM_INF_TAG).and_then(|rest| rest.strip_prefix(':')) else {
            continue;
        };
        let Some(uri) = lines.find(|line| !line.is_empty() && !line.starts_with('#')) else {
            break;
        };

        let attribute = |name: &str| {
            ATTRIBUTE_REGEX
                .captures_iter(attributes)
                .find(|captures| &captures[1] == name)
                .map(|captures| captures[2].trim_matches('"').to_string())
        };
        let label = attribute("RESOLUTION")
            .and_then(|resolution| resolution.split_once('x').map(|(_, height)| format!("{height}p")))
            .unwrap_or_else(|| default_label.to_string());
        let url = playlist_url
            .join(uri)
            .with_context(|| format!("invalid variant uri: {uri}"))?;

        variants.push(PlaylistVariant {
            label,
            url: url.into(),
            average_bandwidth: attribute("AVERAGE-BANDWIDTH").and_then(|value| value.parse().ok()),
            subtitles: Vec::new(),
            audio_tracks: Vec::new(),
        });
    }

    Ok(variants)
}

fn tracks_of_type(
    alternatives: &[AlternativeMedia],
    playlist_url: &Url,
    is_wanted: impl Fn(&AlternativeMediaType) -> bool,
) -> Vec<Track> {
    alternatives
        .iter()
        .filter(|media| is_wanted(&media.media_type))
        .filter_map(|media| {
            let uri = media.uri.as_deref()?;
            let url = playlist_url.join(uri.trim()).ok()?;
            Some(Track::new(media.name.clone(), url))
        })
        .collect()
}
