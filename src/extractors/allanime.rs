use anyhow::Context;
use reqwest::header::{HeaderMap, ORIGIN, REFERER};
use serde::Deserialize;
use url::Url;

use super::utils::videos_from_playlist;
use super::{ExtractRequest, ExtractedVideo, Extractor, Track};
use crate::hls::{is_master_playlist, split_master_playlist};
use crate::http::{get_page, get_page_json, merge_headers, origin_of};

const DEFAULT_API_BASE: &str = "https://allanime.day";
const SOURCE_URL_XOR_KEY: u8 = 56;

#[derive(Debug, Deserialize)]
struct ClockResponse {
    links: Vec<ClockLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClockLink {
    link: String,
    #[serde(default)]
    hls: Option<bool>,
    #[serde(default)]
    mp4: Option<bool>,
    #[serde(default)]
    cr_iframe: Option<bool>,
    #[serde(default)]
    resolution_str: String,
    #[serde(default)]
    subtitles: Vec<ClockSubtitle>,
    #[serde(default)]
    port_data: Option<PortData>,
}

#[derive(Debug, Deserialize)]
struct PortData {
    #[serde(default)]
    streams: Vec<PortStream>,
}

#[derive(Debug, Deserialize)]
struct PortStream {
    format: String,
    url: String,
    #[serde(default)]
    hardsub_lang: String,
}

#[derive(Debug, Deserialize)]
struct ClockSubtitle {
    lang: String,
    src: String,
    #[serde(default)]
    label: Option<String>,
}

/// Source urls handed out by the AllAnime API: plain `/apivtwo/clock?id=...` paths or the same paths
/// hex encoded and prefixed with `--`.
#[derive(Debug)]
pub struct AllAnime {
    api_base: String,
}

impl Default for AllAnime {
    fn default() -> Self {
        AllAnime {
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl AllAnime {
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        AllAnime {
            api_base: api_base.into(),
        }
    }

    fn clock_url(&self, source_url: &str) -> Result<Url, anyhow::Error> {
        let path = match source_url.strip_prefix("--") {
            Some(encoded) => decode_source_url(encoded)?,
            None => source_url.to_string(),
        };
        let path = path.replacen("/clock?", "/clock.json?", 1);

        let base = Url::parse(&self.api_base).context("invalid api base")?;
        base.join(&path).context("invalid source url")
    }
}

/// Reverses the `--` source url obfuscation: hex bytes, each xored with 56.
pub fn decode_source_url(encoded: &str) -> Result<String, anyhow::Error> {
    let bytes = hex::decode(encoded).context("failed to parse hex string")?;
    let decoded = bytes.into_iter().map(|byte| byte ^ SOURCE_URL_XOR_KEY).collect::<Vec<_>>();
    String::from_utf8(decoded).context("decoded source url is not utf-8")
}

/// `1500000` becomes `"1 mb/s"`. Steps of 1000, truncated.
fn human_bitrate(bits_per_second: u64) -> String {
    const UNITS: [&str; 5] = ["b/s", "kb/s", "mb/s", "gb/s", "tb/s"];

    let mut value = bits_per_second;
    let mut unit = 0;
    while value >= 1000 && unit < UNITS.len() - 1 {
        value /= 1000;
        unit += 1;
    }

    format!("{value} {}", UNITS[unit])
}

impl Extractor for AllAnime {
    const DISPLAY_NAME: &'static str = "AllAnime";
    const NAMES: &'static [&'static str] = &["AllAnime"];

    async fn supports_url(url: &str) -> Option<bool> {
        if url.starts_with("--") || url.starts_with("/apivtwo/clock") {
            return Some(true);
        }

        Some(
            Url::parse(url)
                .map(|url| {
                    url.host_str().is_some_and(|host| host.contains("allanime")) && url.path().contains("/clock")
                })
                .unwrap_or(false),
        )
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let clock_url = self
            .clock_url(&request.url)
            .context("AllAnime: failed to retrieve sources")?;
        let api_origin = origin_of(&clock_url);
        let api_headers = merge_headers(&request.headers, &[(REFERER, format!("{api_origin}/"))]);

        let response: ClockResponse = get_page_json(clock_url, &api_headers)
            .await
            .context("AllAnime: failed to retrieve sources")?;

        let name = request.label(Self::DISPLAY_NAME, None);
        let video_headers = merge_headers(
            &request.headers,
            &[(ORIGIN, api_origin.clone()), (REFERER, format!("{api_origin}/"))],
        );
        let mut videos = Vec::new();

        for link in response.links {
            let subtitles = link
                .subtitles
                .iter()
                .map(|subtitle| {
                    let label = match &subtitle.label {
                        Some(label) => format!("{} - {}", subtitle.lang, label),
                        None => subtitle.lang.clone(),
                    };
                    Track::new(label, subtitle.src.clone())
                })
                .collect::<Vec<_>>();

            if link.mp4 == Some(true) {
                videos.push(
                    ExtractedVideo::new(&link.link, format!("Original ({name} - {})", link.resolution_str))
                        .headers(video_headers.clone())
                        .subtitles(subtitles),
                );
            } else if link.hls == Some(true) {
                match self.hls_videos(&link, &name, subtitles, &request.headers, &video_headers).await {
                    Ok(hls_videos) => videos.extend(hls_videos),
                    Err(err) => log::debug!("AllAnime: skipping {}: {:#}", link.link, err),
                }
            } else if link.cr_iframe == Some(true) {
                videos.extend(self.port_videos(&link, &subtitles, &request.headers).await);
            } else {
                log::debug!("AllAnime: unsupported link type: {}", link.link);
            }
        }

        Ok(videos)
    }
}

impl AllAnime {
    async fn hls_videos(
        &self,
        link: &ClockLink,
        name: &str,
        subtitles: Vec<Track>,
        context_headers: &HeaderMap,
        video_headers: &HeaderMap,
    ) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let playlist_url = Url::parse(&link.link).context("invalid hls link")?;
        let page = get_page(playlist_url, context_headers).await?;
        let server_label = format!("{name} - {}", link.resolution_str);

        if !is_master_playlist(&page.text) {
            return Ok(vec![ExtractedVideo::new(&link.link, server_label)
                .headers(video_headers.clone())
                .subtitles(subtitles)]);
        }

        let variants = split_master_playlist(&page.text, &page.url, &server_label)?;

        Ok(variants
            .into_iter()
            .map(|variant| {
                let bitrate = variant
                    .average_bandwidth
                    .map(|bandwidth| format!(" {}", human_bitrate(bandwidth)))
                    .unwrap_or_default();
                let mut variant_subtitles = subtitles.clone();
                variant_subtitles.extend(variant.subtitles);

                ExtractedVideo::new(variant.url, format!("{}{bitrate} ({server_label})", variant.label))
                    .headers(video_headers.clone())
                    .subtitles(variant_subtitles)
                    .audio_tracks(variant.audio_tracks)
            })
            .collect())
    }

    /// Streams of a `crIframe` link: DASH manifests are returned as they are, HLS masters are split.
    async fn port_videos(
        &self,
        link: &ClockLink,
        subtitles: &[Track],
        context_headers: &HeaderMap,
    ) -> Vec<ExtractedVideo> {
        let Some(port_data) = &link.port_data else {
            log::debug!("AllAnime: no streams for {}", link.link);
            return Vec::new();
        };

        let mut videos = Vec::new();

        for stream in &port_data.streams {
            let hardsub = if stream.hardsub_lang.is_empty() {
                String::new()
            } else {
                format!(" - Hardsub: {}", stream.hardsub_lang)
            };

            match stream.format.as_str() {
                "adaptive_dash" => videos.push(
                    ExtractedVideo::new(&stream.url, format!("Original (AC - Dash{hardsub})"))
                        .headers(context_headers.clone())
                        .subtitles(subtitles.to_vec()),
                ),
                "adaptive_hls" => {
                    let result = match Url::parse(&stream.url) {
                        Ok(playlist_url) => {
                            videos_from_playlist(playlist_url, context_headers, context_headers, "Original", |quality| {
                                format!("{quality} (AC - HLS{hardsub})")
                            })
                            .await
                        }
                        Err(err) => Err(err.into()),
                    };

                    match result {
                        Ok(hls_videos) => videos.extend(hls_videos.into_iter().map(|video| {
                            let mut video_subtitles = subtitles.to_vec();
                            video_subtitles.extend(video.subtitles.iter().cloned());
                            video.subtitles(video_subtitles)
                        })),
                        Err(err) => log::debug!("AllAnime: skipping {}: {:#}", stream.url, err),
                    }
                }
                format => log::trace!("AllAnime: ignoring {format} stream"),
            }
        }

        videos
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::ORIGIN;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{decode_source_url, human_bitrate, AllAnime};
    use crate::extractors::{ExtractRequest, Extractor, Track};

    #[test]
    fn test_decode_source_url() {
        assert_eq!(
            decode_source_url("175948514e4c4f57175b54575b5307515c0509").unwrap(),
            "/apivtwo/clock?id=1"
        );
        assert!(decode_source_url("175").is_err());
    }

    #[test]
    fn test_human_bitrate() {
        assert_eq!(human_bitrate(999), "999 b/s");
        assert_eq!(human_bitrate(1500000), "1 mb/s");
        assert_eq!(human_bitrate(2_500_000_000), "2 gb/s");
        assert_eq!(human_bitrate(7_000_000_000_000_000), "7000 tb/s");
    }

    #[tokio::test]
    async fn test_supports_url() {
        assert_eq!(AllAnime::supports_url("--175948514e4c4f57").await, Some(true));
        assert_eq!(AllAnime::supports_url("https://allanime.day/apivtwo/clock?id=1").await, Some(true));
        assert_eq!(AllAnime::supports_url("https://example.com/apivtwo/clock?id=1").await, Some(false));
    }

    #[tokio::test]
    async fn test_allanime_links() {
        let server = MockServer::start().await;
        let clock_json = format!(
            r#"{{"links":[
                {{"link":"https://cdn.example.com/ep1.mp4","mp4":true,"resolutionStr":"Mp4","subtitles":[{{"lang":"en","src":"https://cdn.example.com/en.vtt","label":"English"}}]}},
                {{"link":"{uri}/hls/master.m3u8","hls":true,"resolutionStr":"Hls"}},
                {{"link":"https://cdn.example.com/iframe","crIframe":true,"resolutionStr":"Alt","portData":{{"streams":[
                    {{"format":"adaptive_dash","url":"https://cdn.example.com/dash.mpd","audio_lang":"ja-JP","hardsub_lang":"en-US"}},
                    {{"format":"adaptive_hls","url":"{uri}/ac/master.m3u8","audio_lang":"ja-JP","hardsub_lang":""}},
                    {{"format":"trailer_hls","url":"https://cdn.example.com/trailer.m3u8","audio_lang":"ja-JP","hardsub_lang":""}}
                ]}}}}
            ]}}"#,
            uri = server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/apivtwo/clock.json"))
            .and(query_param("id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(clock_json))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hls/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n\
                 #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"Japanese\",URI=\"audio/ja.m3u8\"\n\
                 #EXT-X-STREAM-INF:BANDWIDTH=2000000,AVERAGE-BANDWIDTH=1500000,RESOLUTION=1280x720,AUDIO=\"aud\"\n\
                 720/index.m3u8\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ac/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n\
                 #EXT-X-STREAM-INF:BANDWIDTH=4000000,RESOLUTION=1920x1080\n\
                 https://cdn.example.com/ac/1080.m3u8\n",
            ))
            .mount(&server)
            .await;

        let extractor = AllAnime::with_api_base(server.uri());
        let request = ExtractRequest::new("--175948514e4c4f57175b54575b5307515c0509").prefix(Some("Default".into()));
        let videos = extractor.resolve(&request).await;

        assert_eq!(videos.len(), 4);
        assert_eq!(videos[0].url, "https://cdn.example.com/ep1.mp4");
        assert_eq!(videos[0].label, "Original (Default - Mp4)");
        assert_eq!(videos[0].headers.get(ORIGIN).unwrap().to_str().unwrap(), server.uri());
        assert_eq!(
            videos[0].subtitles,
            vec![Track::new("en - English", "https://cdn.example.com/en.vtt")]
        );

        assert_eq!(videos[1].url, format!("{}/hls/720/index.m3u8", server.uri()));
        assert_eq!(videos[1].label, "720p 1 mb/s (Default - Hls)");
        assert_eq!(
            videos[1].audio_tracks,
            vec![Track::new("Japanese", format!("{}/hls/audio/ja.m3u8", server.uri()))]
        );
        assert_eq!(videos[1].headers.get(ORIGIN).unwrap().to_str().unwrap(), server.uri());

        assert_eq!(videos[2].url, "https://cdn.example.com/dash.mpd");
        assert_eq!(videos[2].label, "Original (AC - Dash - Hardsub: en-US)");
        assert!(videos[2].subtitles.is_empty());

        assert_eq!(videos[3].url, "https://cdn.example.com/ac/1080.m3u8");
        assert_eq!(videos[3].label, "1080p (AC - HLS)");
    }

    #[tokio::test]
    async fn test_allanime_bad_source_is_empty() {
        let extractor = AllAnime::with_api_base("http://127.0.0.1:1");
        assert!(extractor.resolve(&ExtractRequest::new("--zz")).await.is_empty());
        assert!(extractor
            .resolve(&ExtractRequest::new("/apivtwo/clock?id=1"))
            .await
            .is_empty());
    }
}
