use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::utils::{html_forms, query_param};
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::http::get_response;

const DRIVE_HOSTS: &[&str] = &["drive.google.com", "drive.usercontent.google.com", "docs.google.com"];

/// File id from `/file/d/<id>/...` or an `id` query parameter.
pub fn drive_file_id(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "d" {
            return segments.next().filter(|id| !id.is_empty()).map(str::to_string);
        }
    }

    query_param(url, "id").filter(|id| !id.is_empty())
}

pub fn is_drive_url(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| DRIVE_HOSTS.iter().any(|drive_host| host.eq_ignore_ascii_case(drive_host)))
}

/// Reads the virus scan interstitial: the url its `download-form` submits to and the file size it shows.
fn parse_download_form(html: &str, page_url: &Url) -> Option<(Url, Option<String>)> {
    static SIZE_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?s)class="uc-name-size".*?\(([^()<>]+)\)\s*</span>"#).unwrap());

    let form = html_forms(html)
        .into_iter()
        .find(|form| form.id.as_deref() == Some("download-form"))?;
    let mut action = page_url.join(form.action.as_deref()?).ok()?;

    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(existing) = action.query() {
        query.extend_pairs(form_urlencoded::parse(existing.as_bytes()));
    }
    query.extend_pairs(form.inputs.iter().map(|(name, value)| (name.as_str(), value.as_str())));
    action.set_query(Some(&query.finish()));

    let size = SIZE_REGEX
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|size| size.as_str().trim().to_string());

    Some((action, size))
}

#[derive(Debug, Default)]
pub struct GoogleDrive;

impl Extractor for GoogleDrive {
    const DISPLAY_NAME: &'static str = "Google Drive";
    const NAMES: &'static [&'static str] = &["GoogleDrive", "Google Drive", "GDrive"];

    async fn supports_url(url: &str) -> Option<bool> {
        Some(
            Url::parse(url)
                .map(|url| is_drive_url(&url) && drive_file_id(&url).is_some())
                .unwrap_or(false),
        )
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let url = request.parsed_url().context("Google Drive: failed to retrieve sources")?;
        let id = drive_file_id(&url).context("Google Drive: failed to retrieve sources: no file id")?;

        let mut download_url = url.join("/uc").context("Google Drive: failed to retrieve sources")?;
        download_url
            .query_pairs_mut()
            .clear()
            .append_pair("id", &id)
            .append_pair("export", "download");

        let response = get_response(download_url, &request.headers)
            .await
            .context("Google Drive: failed to retrieve sources")?;
        let final_url = response.url().clone();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("text/html"));

        if !is_html {
            return Ok(vec![
                ExtractedVideo::new(final_url, request.label(Self::DISPLAY_NAME, None)).headers(request.headers.clone())
            ]);
        }

        let html = response
            .text()
            .await
            .context("Google Drive: failed to retrieve sources")?;
        let (video_url, size) = parse_download_form(&html, &final_url)
            .context("Google Drive: failed to retrieve sources: no download form")?;
        log::debug!("Google Drive: confirmed download of {id}");

        Ok(vec![ExtractedVideo::new(
            video_url,
            request.label(Self::DISPLAY_NAME, size.as_deref()),
        )
        .headers(request.headers.clone())])
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_drive_file_id() {
        let id = |url: &str| drive_file_id(&Url::parse(url).unwrap());

        assert_eq!(
            id("https://drive.google.com/file/d/1abCDef-Gh_9/view?usp=sharing").as_deref(),
            Some("1abCDef-Gh_9")
        );
        assert_eq!(id("https://drive.google.com/uc?id=1xyz&export=download").as_deref(), Some("1xyz"));
        assert_eq!(id("https://drive.google.com/drive/folders"), None);
    }

    #[tokio::test]
    async fn test_supports_url() {
        assert_eq!(
            GoogleDrive::supports_url("https://drive.google.com/file/d/1abCDef/view").await,
            Some(true)
        );
        assert_eq!(GoogleDrive::supports_url("https://drive.google.com/").await, Some(false));
        assert_eq!(
            GoogleDrive::supports_url("https://database.gdriveplayer.us/player.php?id=1").await,
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_direct_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("id", "1abCDef"))
            .and(query_param("export", "download"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 16], "video/mp4"))
            .mount(&server)
            .await;

        let videos = GoogleDrive
            .resolve(&ExtractRequest::new(format!("{}/file/d/1abCDef/view", server.uri())))
            .await;

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].url, format!("{}/uc?id=1abCDef&export=download", server.uri()));
        assert_eq!(videos[0].label, "Google Drive");
    }

    #[tokio::test]
    async fn test_virus_scan_interstitial() {
        let server = MockServer::start().await;
        let interstitial = r#"<html><body>
            <span class="uc-name-size"><a href="/open?id=1abCDef">movie.mkv</a> (1.4G)</span>
            <form id="download-form" action="https://drive.usercontent.google.com/download" method="get">
              <input type="submit" id="uc-download-link" value="Download anyway"/>
              <input type="hidden" name="id" value="1abCDef">
              <input type="hidden" name="export" value="download">
              <input type="hidden" name="confirm" value="t">
              <input type="hidden" name="uuid" value="0d3c-11">
            </form></body></html>"#;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(interstitial, "text/html; charset=utf-8"))
            .mount(&server)
            .await;

        let request = ExtractRequest::new(format!("{}/uc?id=1abCDef", server.uri())).prefix(Some("GDrive - ".into()));
        let videos = GoogleDrive.resolve(&request).await;

        assert_eq!(videos.len(), 1);
        assert_eq!(
            videos[0].url,
            "https://drive.usercontent.google.com/download?id=1abCDef&export=download&confirm=t&uuid=0d3c-11"
        );
        assert_eq!(videos[0].label, "GDrive - 1.4G");
    }

    #[tokio::test]
    async fn test_quota_page_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>Quota exceeded</html>", "text/html"))
            .mount(&server)
            .await;

        let videos = GoogleDrive
            .resolve(&ExtractRequest::new(format!("{}/file/d/1abCDef/view", server.uri())))
            .await;
        assert!(videos.is_empty());
    }
}
