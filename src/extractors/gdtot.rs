use anyhow::Context;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::REFERER;
use url::Url;

use super::googledrive::GoogleDrive;
use super::utils::{html_forms, query_param, unescape_html, url_host_contains};
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::http::{get_page, merge_headers, origin_of, post_page, Page, RequestBody};

const DEFAULT_DRIVE_BASE: &str = "https://drive.google.com";

/// Target of a `<meta http-equiv="refresh" content="0; URL=...">` or a `location.replace('...')`.
fn redirect_target(page: &Page) -> Option<Url> {
    static META_REFRESH_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)URL=([^"'>\s]+)"#).unwrap());
    static LOCATION_REPLACE_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"location\.replace\(\s*['"]([^'"]+)['"]"#).unwrap());

    let target = META_REFRESH_REGEX
        .captures(&page.text)
        .or_else(|| LOCATION_REPLACE_REGEX.captures(&page.text))
        .and_then(|captures| captures.get(1))?;

    page.url.join(&unescape_html(target.as_str())).ok()
}

/// Decodes the `gd` parameter, the base64 encoded Drive file id.
fn drive_id_from_target(target: &Url) -> Result<String, anyhow::Error> {
    let encoded = query_param(target, "gd").context("no gd parameter in redirect")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(encoded.trim()))
        .context("failed to decode gd parameter")?;

    String::from_utf8(decoded).context("gd parameter is not utf-8")
}

/// GDTot and GDBot share links: their download page leads to a Google Drive file.
#[derive(Debug)]
pub struct GdTot {
    drive_base: String,
}

impl Default for GdTot {
    fn default() -> Self {
        GdTot {
            drive_base: DEFAULT_DRIVE_BASE.to_string(),
        }
    }
}

impl GdTot {
    pub fn with_drive_base(drive_base: impl Into<String>) -> Self {
        GdTot {
            drive_base: drive_base.into(),
        }
    }

    /// Submits the auto-posting form some mirrors put in front of the download page.
    async fn submit_hidden_form(page: Page, headers: &reqwest::header::HeaderMap) -> Result<Page, anyhow::Error> {
        let auto_submits = page.text.contains(".submit()");
        let form = html_forms(&page.text)
            .into_iter()
            .find(|form| auto_submits && !form.inputs.is_empty());
        let Some(form) = form else {
            return Ok(page);
        };

        let action = page
            .url
            .join(form.action.as_deref().unwrap_or(""))
            .context("invalid form action")?;
        log::debug!("GDTot: submitting form to {action}");

        post_page(action, headers, RequestBody::Form(form.inputs)).await
    }
}

impl Extractor for GdTot {
    const DISPLAY_NAME: &'static str = "GDTot";
    const NAMES: &'static [&'static str] = &["GDTot", "GDBot"];

    async fn supports_url(url: &str) -> Option<bool> {
        let is_file_url = Url::parse(url)
            .map(|url| url.path().starts_with("/file/"))
            .unwrap_or(false);

        Some(is_file_url && (url_host_contains(url, "gdtot") || url_host_contains(url, "gdbot")))
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let file_url = request.parsed_url().context("GDTot: failed to retrieve sources")?;
        let id = file_url
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .map(str::to_string)
            .context("GDTot: failed to retrieve sources: no file id")?;

        let mut download_url = Url::parse(&format!("{}/dld", origin_of(&file_url)))
            .context("GDTot: failed to retrieve sources")?;
        download_url.query_pairs_mut().append_pair("id", &id);

        let headers = merge_headers(&request.headers, &[(REFERER, file_url.as_str())]);
        let page = get_page(download_url, &headers)
            .await
            .context("GDTot: failed to retrieve sources")?;
        let page = Self::submit_hidden_form(page, &headers)
            .await
            .context("GDTot: failed to retrieve sources")?;

        let target = redirect_target(&page).context("GDTot: failed to retrieve sources: no redirect found")?;
        let drive_id = drive_id_from_target(&target).context("GDTot: failed to retrieve sources")?;
        log::debug!("GDTot: {id} is Drive file {drive_id}");

        let drive_url = format!("{}/file/d/{drive_id}/view", self.drive_base.trim_end_matches('/'));
        GoogleDrive
            .extract_videos(&request.with_url(drive_url))
            .await
            .context("GDTot: failed to retrieve sources")
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::GdTot;
    use crate::extractors::{ExtractRequest, Extractor};

    #[tokio::test]
    async fn test_supports_url() {
        assert_eq!(GdTot::supports_url("https://new6.gdtot.dad/file/98765").await, Some(true));
        assert_eq!(GdTot::supports_url("https://gdbot.xyz/file/1").await, Some(true));
        assert_eq!(GdTot::supports_url("https://new6.gdtot.dad/").await, Some(false));
    }

    #[tokio::test]
    async fn test_gdtot_to_drive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dld"))
            .and(query_param("id", "98765"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<form action="/ddl" method="post"><input type="hidden" name="token" value="t0k"></form>
                <script>document.forms[0].submit();</script>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ddl"))
            .and(body_string_contains("token=t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<meta http-equiv="refresh" content="0; URL=/dl?gd=MWFiQ0RlZi1HaF85&amp;t=1">"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("id", "1abCDef-Gh_9"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 16], "video/mp4"))
            .mount(&server)
            .await;

        let extractor = GdTot::with_drive_base(server.uri());
        let videos = extractor
            .resolve(&ExtractRequest::new(format!("{}/file/98765", server.uri())))
            .await;

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].url, format!("{}/uc?id=1abCDef-Gh_9&export=download", server.uri()));
        assert_eq!(videos[0].label, "Google Drive");
    }

    #[tokio::test]
    async fn test_location_replace_without_gd_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dld"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<script>location.replace('/login?next=/file/1')</script>"),
            )
            .mount(&server)
            .await;

        let videos = GdTot::with_drive_base(server.uri())
            .resolve(&ExtractRequest::new(format!("{}/file/1", server.uri())))
            .await;
        assert!(videos.is_empty());
    }
}
