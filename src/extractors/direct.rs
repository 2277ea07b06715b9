use anyhow::Context;

use super::utils::videos_from_url;
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::http::is_m3u8_url;

const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".webm", ".m4v", ".mov"];

/// Urls that already point at media. Playlists are split into their variants.
#[derive(Debug, Default)]
pub struct Direct;

impl Extractor for Direct {
    const DISPLAY_NAME: &'static str = "Direct";
    const NAMES: &'static [&'static str] = &["Direct"];

    async fn supports_url(url: &str) -> Option<bool> {
        let url = url::Url::parse(url).ok()?;
        let path = url.path().to_ascii_lowercase();

        if is_m3u8_url(&url) || MEDIA_EXTENSIONS.iter().any(|extension| path.ends_with(extension)) {
            Some(true)
        } else {
            None
        }
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let url = request.parsed_url().context("Direct: invalid url")?;

        videos_from_url(url, &request.headers, None, |quality| {
            request.label(Self::DISPLAY_NAME, quality)
        })
        .await
        .context("Direct: failed to retrieve sources")
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::Direct;
    use crate::extractors::{ExtractRequest, Extractor};

    #[tokio::test]
    async fn test_direct_file() {
        assert_eq!(Direct::supports_url("https://cdn.example.com/a/video.MP4").await, Some(true));
        assert_eq!(Direct::supports_url("https://cdn.example.com/embed/123").await, None);

        let request = ExtractRequest::new("https://cdn.example.com/a/video.mp4").referer(Some("https://site.example/"));
        let videos = Direct.resolve(&request).await;

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].url, "https://cdn.example.com/a/video.mp4");
        assert_eq!(videos[0].label, "Direct");
        assert_eq!(videos[0].headers, request.headers);
    }

    #[tokio::test]
    async fn test_direct_playlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=854x480\n480/index.m3u8\n",
            ))
            .mount(&server)
            .await;

        let request = ExtractRequest::new(format!("{}/hls/master.m3u8", server.uri())).prefix(Some("Mirror ".into()));
        let videos = Direct.resolve(&request).await;

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].label, "Mirror 480p");
        assert_eq!(videos[0].url, format!("{}/hls/480/index.m3u8", server.uri()));
    }
}
