use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderName, REFERER};
use serde::Deserialize;
use url::Url;

use super::googledrive::{is_drive_url, GoogleDrive};
use super::utils::{url_host_contains, videos_from_url};
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::http::{get_page, merge_headers, origin_of, post_json, RequestBody};

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct GdFlix;

impl Extractor for GdFlix {
    const DISPLAY_NAME: &'static str = "GDFlix";
    const NAMES: &'static [&'static str] = &["GDFlix"];

    async fn supports_url(url: &str) -> Option<bool> {
        let is_file_url = Url::parse(url)
            .map(|url| url.path().starts_with("/file/"))
            .unwrap_or(false);

        Some(is_file_url && url_host_contains(url, "gdflix"))
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        static KEY_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"formData\.append\(\s*["']key["']\s*,\s*["']([^"']+)["']"#).unwrap());

        let file_url = request.parsed_url().context("GDFlix: failed to retrieve sources")?;
        let page = get_page(file_url, &request.headers)
            .await
            .context("GDFlix: failed to retrieve sources")?;

        let key = KEY_REGEX
            .captures(&page.text)
            .and_then(|captures| captures.get(1))
            .map(|key| key.as_str().to_string())
            .context("GDFlix: failed to retrieve sources: no key")?;

        let action_url = Url::parse(&format!("{}/action?type=1", origin_of(&page.url)))
            .context("GDFlix: failed to retrieve sources")?;
        let host = page.url.host_str().unwrap_or_default();
        let action_headers = merge_headers(
            &request.headers,
            &[(HeaderName::from_static("x-token"), host), (REFERER, page.url.as_str())],
        );

        let response: ActionResponse = post_json(
            action_url,
            &action_headers,
            RequestBody::form(&[("action", "direct"), ("key", key.as_str()), ("action_token", "")]),
        )
        .await
        .context("GDFlix: failed to retrieve sources")?;

        if let Some(error) = response.error.filter(|error| !error.is_null() && error != &serde_json::Value::Bool(false)) {
            anyhow::bail!("GDFlix: failed to retrieve sources: {error}");
        }

        let video_url = response
            .url
            .filter(|url| !url.is_empty())
            .context("GDFlix: failed to retrieve sources: no url in response")?;
        let video_url = Url::parse(&video_url).context("GDFlix: failed to retrieve sources")?;
        log::debug!("GDFlix: action returned {video_url}");

        if is_drive_url(&video_url) {
            return GoogleDrive
                .extract_videos(&request.with_url(video_url))
                .await
                .context("GDFlix: failed to retrieve sources");
        }

        videos_from_url(video_url, &request.headers, None, |quality| {
            request.label(Self::DISPLAY_NAME, quality)
        })
        .await
        .context("GDFlix: failed to retrieve sources")
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::GdFlix;
    use crate::extractors::{ExtractRequest, Extractor};

    const FILE_PAGE: &str = r#"<html><script>
        const formData = new FormData();
        formData.append("action", "direct");
        formData.append("key", "k3y-ab12");
        formData.append("action_token", "");
    </script></html>"#;

    #[tokio::test]
    async fn test_supports_url() {
        assert_eq!(GdFlix::supports_url("https://new2.gdflix.cfd/file/aBcD").await, Some(true));
        assert_eq!(GdFlix::supports_url("https://new6.gdtot.dad/file/98765").await, Some(false));
    }

    #[tokio::test]
    async fn test_gdflix_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/aBcD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FILE_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/action"))
            .and(query_param("type", "1"))
            .and(header("x-token", "127.0.0.1"))
            .and(body_string_contains("key=k3y-ab12"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"url":"https://cdn.example.com/files/movie.mkv"}"#),
            )
            .mount(&server)
            .await;

        let request = ExtractRequest::new(format!("{}/file/aBcD", server.uri()));
        let videos = GdFlix.resolve(&request).await;

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].url, "https://cdn.example.com/files/movie.mkv");
        assert_eq!(videos[0].label, "GDFlix");
    }

    #[tokio::test]
    async fn test_gdflix_error_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/aBcD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FILE_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/action"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"error":"Invalid key"}"#))
            .mount(&server)
            .await;

        let videos = GdFlix
            .resolve(&ExtractRequest::new(format!("{}/file/aBcD", server.uri())))
            .await;
        assert!(videos.is_empty());
    }
}
