use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

const MAX_REDIRECTS: u32 = 10;

static DEFAULT_CLIENT_NO_REDIRECT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(Duration::from_secs(20))
        .timeout(Duration::from_secs(60))
        .redirect(Policy::none()) // redirects handled in send
        .build()
        .unwrap()
});

#[derive(Debug, Clone)]
pub enum RequestBody {
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

impl RequestBody {
    pub fn form<K: ToString, V: ToString>(pairs: &[(K, V)]) -> Self {
        RequestBody::Form(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

/// A fetched document together with the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub content_type: Option<String>,
    pub text: String,
}

impl Page {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|content_type| content_type.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }
}

/// Sends a request, following redirects manually.
///
/// reqwest rewrites the Referer header when it follows redirects itself, but hosts check it on every hop.
/// Here the caller's headers are sent unchanged to every location. A 301, 302 or 303 answer to a request
/// with a body is followed with a GET, as browsers do.
pub async fn send(
    method: Method,
    url: Url,
    headers: &HeaderMap,
    body: Option<RequestBody>,
) -> Result<reqwest::Response, anyhow::Error> {
    let client = &*DEFAULT_CLIENT_NO_REDIRECT;
    let mut method = method;
    let mut body = body;
    let mut last_url = url;
    let mut redirect_count = 0u32;

    loop {
        log::debug!("{} {}", method, last_url);

        let mut request = client
            .request(method.clone(), last_url.clone())
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .headers(headers.clone());

        match &body {
            Some(RequestBody::Form(pairs)) => request = request.form(pairs),
            Some(RequestBody::Json(value)) => request = request.json(value),
            None => {}
        }

        let response = request.send().await.context("failed to request url")?;
        let status = response.status();
        let location_header = response.headers().get(reqwest::header::LOCATION);

        match (status.is_redirection(), location_header) {
            (true, Some(location)) => {
                if redirect_count >= MAX_REDIRECTS {
                    anyhow::bail!("more than {MAX_REDIRECTS} redirects");
                }

                redirect_count += 1;
                let location = location
                    .to_str()
                    .context("redirect url could not be converted to string")?;
                last_url = last_url.join(location).context("invalid redirect url")?;

                if matches!(
                    status,
                    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
                ) && method != Method::GET
                    && method != Method::HEAD
                {
                    method = Method::GET;
                    body = None;
                }
            }
            _ => {
                return response
                    .error_for_status()
                    .with_context(|| format!("unexpected status {status}"));
            }
        }
    }
}

pub async fn get_response(url: Url, headers: &HeaderMap) -> Result<reqwest::Response, anyhow::Error> {
    send(Method::GET, url, headers, None).await
}

async fn into_page(response: reqwest::Response) -> Result<Page, anyhow::Error> {
    let url = response.url().clone();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let text = response
        .text()
        .await
        .context("failed to parse response body as text")?;

    Ok(Page { url, content_type, text })
}

pub async fn get_page(url: Url, headers: &HeaderMap) -> Result<Page, anyhow::Error> {
    into_page(get_response(url, headers).await?).await
}

pub async fn get_page_text(url: Url, headers: &HeaderMap) -> Result<String, anyhow::Error> {
    Ok(get_page(url, headers).await?.text)
}

pub async fn get_page_json<T: DeserializeOwned>(url: Url, headers: &HeaderMap) -> Result<T, anyhow::Error> {
    get_response(url, headers)
        .await?
        .json()
        .await
        .context("failed to parse response body as json")
}

pub async fn post_page(url: Url, headers: &HeaderMap, body: RequestBody) -> Result<Page, anyhow::Error> {
    into_page(send(Method::POST, url, headers, Some(body)).await?).await
}

pub async fn post_json<T: DeserializeOwned>(
    url: Url,
    headers: &HeaderMap,
    body: RequestBody,
) -> Result<T, anyhow::Error> {
    send(Method::POST, url, headers, Some(body))
        .await?
        .json()
        .await
        .context("failed to parse response body as json")
}

/// Copies `base` and sets every `(name, value)` pair, replacing values already present.
///
/// Values that are not valid header values are skipped.
pub fn merge_headers<V: AsRef<str>>(base: &HeaderMap, extra: &[(HeaderName, V)]) -> HeaderMap {
    let mut headers = base.clone();

    for (name, value) in extra {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                headers.insert(name.clone(), value);
            }
            Err(_) => log::debug!("Skipping invalid value for header {}", name),
        }
    }

    headers
}

pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

pub fn is_m3u8_url(url: &Url) -> bool {
    url.path_segments()
        .and_then(|segments| segments.last())
        .map(|last| {
            let lower = last.to_ascii_lowercase();
            (lower.ends_with(".m3u8") && lower.len() != ".m3u8".len())
                || (lower.ends_with(".m3u") && lower.len() != ".m3u".len())
        })
        .unwrap_or(false)
}
