use std::time::SystemTime;

use anyhow::Context;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use reqwest::header::REFERER;

use super::utils::is_url_host_and_has_path;
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::http::{get_page, get_page_text, merge_headers};

const DOOD_HOSTS: &[&str] = &[
    "dood.li",
    "dood.la",
    "dood.re",
    "ds2video.com",
    "ds2play.com",
    "dood.yt",
    "dood.ws",
    "dood.so",
    "dood.to",
    "dood.pm",
    "dood.watch",
    "dood.sh",
    "dood.cx",
    "dood.wf",
    "doods.pro",
    "dooood.com",
    "doodstream.com",
    "d000d.com",
    "d0000d.com",
];

#[derive(Debug, Default)]
pub struct Doodstream;

impl Extractor for Doodstream {
    const DISPLAY_NAME: &'static str = "Doodstream";
    const NAMES: &'static [&'static str] = &["Doodstream", "Dood"];

    async fn supports_url(url: &str) -> Option<bool> {
        Some(
            DOOD_HOSTS
                .iter()
                .any(|host| is_url_host_and_has_path(url, host, true, true)),
        )
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        static PASS_MD5_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"['"](/pass_md5/(?:[\w-]+/)*([\w-]+))['"]"#).unwrap());

        let mut embed_url = request
            .parsed_url()
            .context("Doodstream: failed to retrieve sources")?;
        if let Some(id) = embed_url.path().strip_prefix("/d/").map(str::to_string) {
            embed_url.set_path(&format!("/e/{id}"));
        }

        let page = get_page(embed_url, &request.headers)
            .await
            .context("Doodstream: failed to retrieve sources")?;
        let current_url = page.url;

        let (relative_fetch_url, token) = PASS_MD5_REGEX
            .captures(&page.text)
            .and_then(|captures| captures.get(1).zip(captures.get(2)))
            .map(|(m1, m2)| (m1.as_str().to_string(), m2.as_str().to_string()))
            .context("Doodstream: failed to retrieve sources: pass_md5 not found")?;

        let video_base_url = {
            let fetch_url = current_url
                .join(&relative_fetch_url)
                .context("Doodstream: failed to retrieve sources")?;
            let fetch_headers = merge_headers(&request.headers, &[(REFERER, current_url.as_str())]);
            get_page_text(fetch_url, &fetch_headers)
                .await
                .context("Doodstream: failed to retrieve sources")?
        };
        let video_base_url = video_base_url.trim();
        if !video_base_url.starts_with("http") {
            anyhow::bail!("Doodstream: failed to retrieve sources: unexpected pass_md5 answer");
        }

        let random_string = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect::<String>();
        let unix_time_millis = {
            let start = SystemTime::now();
            let since_the_epoch = start
                .duration_since(std::time::UNIX_EPOCH)
                .context("Doodstream: failed to retrieve sources: system time before Unix epoch")?;
            since_the_epoch.as_millis()
        };

        let video_url = format!("{video_base_url}{random_string}?token={token}&expiry={unix_time_millis}");
        let video_url_referer = current_url
            .join("/")
            .context("Doodstream: failed to retrieve sources")?;
        let headers = merge_headers(&request.headers, &[(REFERER, video_url_referer.as_str())]);

        Ok(vec![
            ExtractedVideo::new(video_url, request.label("Doodstream mirror", None)).headers(headers)
        ])
    }
}
