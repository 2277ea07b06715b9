use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::extractors::allanime::AllAnime;
use crate::extractors::cda::Cda;
use crate::extractors::direct::Direct;
use crate::extractors::doodstream::Doodstream;
use crate::extractors::gdflix::GdFlix;
use crate::extractors::gdriveplayer::GDrivePlayer;
use crate::extractors::gdtot::GdTot;
use crate::extractors::googledrive::GoogleDrive;
use crate::extractors::jwplayer::JwPlayer;
use crate::extractors::rabbitstream::RabbitStream;
pub use crate::hls::Track;

pub mod allanime;
pub mod cda;
pub mod direct;
pub mod doodstream;
pub mod gdflix;
pub mod gdriveplayer;
pub mod gdtot;
pub mod googledrive;
pub mod jwplayer;
pub mod rabbitstream;

macro_rules! normalized_name {
    ($extractor:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            Some(<$ext>::DISPLAY_NAME)
        } else {
            normalized_name!($extractor, $($tail),*)
        }
    };
    ($extractor:expr $(,)?) => {
        None
    };
}

macro_rules! exists_extractor_with_name {
    ($extractor:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            true
        } else {
            exists_extractor_with_name!($extractor, $($tail),*)
        }
    };
    ($extractor:expr $(,)?) => {
        false
    };
}

macro_rules! find_extractor {
    ($url:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::supports_url($url).await.unwrap_or(false) {
            Some(<$ext>::DISPLAY_NAME)
        } else {
            find_extractor!($url, $($tail),*)
        }
    };
    ($url:expr $(,)?) => {
        None
    };
}

macro_rules! resolve {
    ($request:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::supports_url(&$request.url).await.unwrap_or(false) {
            Some(<$ext>::default().resolve($request).await)
        } else {
            resolve!($request, $($tail),*)
        }
    };
    ($request:expr $(,)?) => {
        None
    };
}

macro_rules! resolve_with_extractor {
    ($extractor:expr, $request:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            if <$ext>::supports_url(&$request.url).await.unwrap_or(true) {
                Some(<$ext>::default().resolve($request).await)
            } else {
                None
            }
        } else {
            resolve_with_extractor!($extractor, $request, $($tail),*)
        }
    };
    ($extractor:expr, $request:expr $(,)?) => {
        None
    };
}

macro_rules! create_functions_for_extractors {
    ($( $ext:ty ),* $(,)?) => {
        pub fn normalized_name(extractor: &str) -> Option<&'static str> {
            normalized_name!(extractor, $($ext),*)
        }

        pub fn exists_extractor_with_name(extractor: &str) -> bool {
            exists_extractor_with_name!(extractor, $($ext),*)
        }

        /// Display name of the first registered extractor that claims the url.
        pub async fn find_extractor(url: &str) -> Option<&'static str> {
            find_extractor!(url, $($ext),*)
        }

        /// Resolves with the first registered extractor that claims the url.
        ///
        /// `None` means no extractor claims it; an extractor that fails yields `Some` of an empty list.
        pub async fn resolve(request: &ExtractRequest) -> Option<Vec<ExtractedVideo>> {
            resolve!(request, $($ext),*)
        }

        /// Resolves with the extractor named `extractor`, which may also take urls it does not recognise.
        pub async fn resolve_with_extractor(extractor: &str, request: &ExtractRequest) -> Option<Vec<ExtractedVideo>> {
            resolve_with_extractor!(extractor, request, $($ext),*)
        }

        /// Display names of all registered extractors, in registry order.
        pub fn extractor_names() -> &'static [&'static str] {
            const DISPLAY_NAMES: &[&str] = &[$(<$ext>::DISPLAY_NAME),*];
            DISPLAY_NAMES
        }

        const _CHECK_UNIQUE_NAMES: () = {
            let names_array = [$(<$ext>::NAMES),*];

            let mut i = 0;
            while i < names_array.len() {
                let names = names_array[i];
                i += 1;

                let mut j = 0;
                while j < names.len() {
                    let name = names[j];
                    j += 1;

                    let mut count = 0;
                    let mut i2 = 0;
                    while i2 < names_array.len() {
                        let names2 = names_array[i2];
                        i2 += 1;

                        let mut j2 = 0;
                        while j2 < names2.len() {
                            let name2 = names2[j2];
                            j2 += 1;

                            if name.len() == name2.len() {
                                let mut equal = true;
                                let bytes1 = name.as_bytes();
                                let bytes2 = name2.as_bytes();
                                let mut k = 0;
                                while k < bytes1.len() {
                                    let b1 = bytes1[k];
                                    let b2 = bytes2[k];
                                    k += 1;
                                    if !b1.eq_ignore_ascii_case(&b2) {
                                        equal = false;
                                        break;
                                    }
                                }
                                if equal {
                                    count += 1;
                                }
                            }
                        }
                    }

                    if count != 1 {
                        panic!("Non-unique extractor name!");
                    }
                }
            }
        };
    };
    () => {};
}

// Order matters: the first extractor claiming a url wins.
create_functions_for_extractors! {
    Doodstream,
    RabbitStream,
    AllAnime,
    GdFlix,
    GdTot,
    GoogleDrive,
    GDrivePlayer,
    Cda,
    JwPlayer,
    Direct,
}

/// Input of one extraction: the embed url, the headers of the page it was found on and an optional label
/// prefix naming the server option.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub prefix: Option<String>,
}

impl ExtractRequest {
    pub fn new(url: impl Into<String>) -> Self {
        ExtractRequest {
            url: url.into(),
            headers: HeaderMap::new(),
            prefix: None,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => log::warn!("Ignoring invalid value for header {}", name),
        }
        self
    }

    pub fn referer(self, referer: Option<&str>) -> Self {
        match referer {
            Some(referer) => self.header(reqwest::header::REFERER, referer),
            None => self,
        }
    }

    pub fn user_agent(self, user_agent: Option<&str>) -> Self {
        match user_agent {
            Some(user_agent) => self.header(reqwest::header::USER_AGENT, user_agent),
            None => self,
        }
    }

    pub fn prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn parsed_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.url)
    }

    /// Same context, different url. Used when one extractor hands over to another.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        ExtractRequest {
            url: url.into(),
            headers: self.headers.clone(),
            prefix: self.prefix.clone(),
        }
    }

    /// `"{prefix}{quality}"` with a prefix, otherwise `"{server} - {quality}"`.
    ///
    /// Without a quality the prefix alone (minus trailing separators) or the server name is used.
    pub fn label(&self, server: &str, quality: Option<&str>) -> String {
        match (self.prefix.as_deref(), quality) {
            (Some(prefix), Some(quality)) => format!("{prefix}{quality}"),
            (Some(prefix), None) => prefix.trim_end_matches([' ', '-', ':']).to_string(),
            (None, Some(quality)) => format!("{server} - {quality}"),
            (None, None) => server.to_string(),
        }
    }
}

/// One resolved stream. `headers` must be sent when fetching `url`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedVideo {
    pub url: String,
    pub label: String,
    pub headers: HeaderMap,
    pub subtitles: Vec<Track>,
    pub audio_tracks: Vec<Track>,
}

impl ExtractedVideo {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        ExtractedVideo {
            url: url.into(),
            label: label.into(),
            headers: HeaderMap::new(),
            subtitles: Vec::new(),
            audio_tracks: Vec::new(),
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn subtitles(mut self, subtitles: Vec<Track>) -> Self {
        self.subtitles = subtitles;
        self
    }

    pub fn audio_tracks(mut self, audio_tracks: Vec<Track>) -> Self {
        self.audio_tracks = audio_tracks;
        self
    }
}

pub trait Extractor: Default {
    const DISPLAY_NAME: &'static str;
    const NAMES: &'static [&'static str];

    /// `Some(false)` for urls that are certainly not handled, `None` when unsure.
    async fn supports_url(url: &str) -> Option<bool>;

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error>;

    /// Never fails: any error is logged and turned into an empty list, so a dead mirror does not take
    /// down its siblings.
    async fn resolve(&self, request: &ExtractRequest) -> Vec<ExtractedVideo> {
        match self.extract_videos(request).await {
            Ok(videos) => {
                let videos = videos
                    .into_iter()
                    .filter(|video| !video.url.is_empty())
                    .collect::<Vec<_>>();
                log::debug!("{}: found {} video(s)", Self::DISPLAY_NAME, videos.len());
                videos
            }
            Err(err) => {
                log::warn!("{}: {:#}", Self::DISPLAY_NAME, err);
                Vec::new()
            }
        }
    }
}

pub mod utils {
    use anyhow::Context;
    use once_cell::sync::Lazy;
    use regex::Regex;
    use reqwest::header::HeaderMap;
    use url::Url;

    use super::ExtractedVideo;
    use crate::hls::split_master_playlist;
    use crate::http::{get_page, is_m3u8_url};

    pub fn is_url_host_and_has_path(url: &str, host: &str, allow_http: bool, allow_www: bool) -> bool {
        url::Url::parse(url)
            .map(|url| {
                let scheme = url.scheme();
                let is_correct_scheme = scheme == "https" || (allow_http && scheme == "http");

                let no_username = url.username().is_empty();
                let no_password = url.password().is_none();
                let no_port = url.port().is_none();

                let is_same_host = url
                    .host_str()
                    .map(|url_host| {
                        let new_url_host = if allow_www {
                            url_host.strip_prefix("www.").unwrap_or(url_host)
                        } else {
                            url_host
                        };

                        host.eq_ignore_ascii_case(new_url_host)
                    })
                    .unwrap_or(false);

                let path = url.path();
                let path_is_empty = path.strip_prefix('/').unwrap_or(path).is_empty();

                is_correct_scheme && no_username && no_password && no_port && is_same_host && !path_is_empty
            })
            .unwrap_or(false)
    }

    /// For services rotating through many domains, e.g. `new4.gdtot.dad`.
    pub fn url_host_contains(url: &str, needle: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase().contains(needle)))
            .unwrap_or(false)
    }

    pub fn query_param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }

    /// Decodes the HTML entities commonly found in attribute values.
    pub fn unescape_html(input: &str) -> String {
        static NUMERIC_ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").unwrap());

        let named = input
            .replace("&quot;", "\"")
            .replace("&#039;", "'")
            .replace("&apos;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">");
        let numeric = NUMERIC_ENTITY_REGEX.replace_all(&named, |captures: &regex::Captures| {
            let code = &captures[1];
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            value
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| captures[0].to_string())
        });

        numeric.replace("&amp;", "&")
    }

    /// Value of attribute `name` in the opening tag text `tag`, HTML entities decoded.
    pub fn html_attribute(tag: &str, name: &str) -> Option<String> {
        static ATTRIBUTE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap());

        ATTRIBUTE_REGEX
            .captures_iter(tag)
            .find(|captures| captures[1].eq_ignore_ascii_case(name))
            .and_then(|captures| captures.get(2).or_else(|| captures.get(3)).or_else(|| captures.get(4)))
            .map(|value| unescape_html(value.as_str()))
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HtmlForm {
        pub id: Option<String>,
        pub action: Option<String>,
        pub method: Option<String>,
        /// `(name, value)` of every named `<input>`, in document order.
        pub inputs: Vec<(String, String)>,
    }

    pub fn html_forms(html: &str) -> Vec<HtmlForm> {
        static FORM_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form>").unwrap());
        static INPUT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<input\b([^>]*)>").unwrap());

        FORM_REGEX
            .captures_iter(html)
            .map(|captures| {
                let attributes = &captures[1];
                let inputs = INPUT_REGEX
                    .captures_iter(&captures[2])
                    .filter_map(|input| {
                        let name = html_attribute(&input[1], "name")?;
                        let value = html_attribute(&input[1], "value").unwrap_or_default();
                        Some((name, value))
                    })
                    .collect();

                HtmlForm {
                    id: html_attribute(attributes, "id"),
                    action: html_attribute(attributes, "action"),
                    method: html_attribute(attributes, "method"),
                    inputs,
                }
            })
            .collect()
    }

    /// Fetches a playlist and turns every variant into a video. A media playlist becomes one video
    /// labelled `default_label`.
    pub async fn videos_from_playlist(
        playlist_url: Url,
        fetch_headers: &HeaderMap,
        video_headers: &HeaderMap,
        default_label: &str,
        label: impl Fn(&str) -> String,
    ) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let page = get_page(playlist_url, fetch_headers)
            .await
            .context("failed to fetch playlist")?;
        let variants = split_master_playlist(&page.text, &page.url, default_label)?;

        Ok(variants
            .into_iter()
            .map(|variant| {
                ExtractedVideo::new(variant.url, label(&variant.label))
                    .headers(video_headers.clone())
                    .subtitles(variant.subtitles)
                    .audio_tracks(variant.audio_tracks)
            })
            .collect())
    }

    /// Splits HLS urls into their variants and wraps anything else as a single video.
    pub async fn videos_from_url(
        url: Url,
        headers: &HeaderMap,
        quality: Option<&str>,
        label: impl Fn(Option<&str>) -> String,
    ) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        if is_m3u8_url(&url) {
            let default_label = label(quality);
            videos_from_playlist(url, headers, headers, &default_label, |variant| label(Some(variant))).await
        } else {
            Ok(vec![ExtractedVideo::new(url, label(quality)).headers(headers.clone())])
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_is_url_host_and_has_path() {
            assert!(is_url_host_and_has_path("https://www.cda.pl/video/123", "cda.pl", false, true));
            assert!(!is_url_host_and_has_path("https://www.cda.pl/", "cda.pl", false, true));
            assert!(!is_url_host_and_has_path("http://cda.pl/video/1", "cda.pl", false, true));
            assert!(!is_url_host_and_has_path("https://user@cda.pl/video/1", "cda.pl", true, true));
        }

        #[test]
        fn test_url_host_contains() {
            assert!(url_host_contains("https://new6.GDTOT.dad/file/123", "gdtot"));
            assert!(!url_host_contains("https://example.com/gdtot/123", "gdtot"));
            assert!(!url_host_contains("ftp://gdtot.dad/file", "gdtot"));
        }

        #[test]
        fn test_unescape_html() {
            assert_eq!(
                unescape_html("{&quot;a&quot;:&quot;b&amp;c&#039;&#x41;&#66;&quot;}"),
                r#"{"a":"b&c'AB"}"#
            );
            assert_eq!(unescape_html("&amp;quot;"), "&quot;");
        }

        #[test]
        fn test_html_forms() {
            let html = r#"<form id="download-form" action="/uc?export=download&amp;confirm=t" method="get">
                <input type="hidden" name="id" value="1abC">
                <input type='hidden' name='uuid' value='f00'/>
                <input type="submit" value="Download anyway">
            </form>"#;
            let forms = html_forms(html);

            assert_eq!(forms.len(), 1);
            assert_eq!(forms[0].id.as_deref(), Some("download-form"));
            assert_eq!(forms[0].action.as_deref(), Some("/uc?export=download&confirm=t"));
            assert_eq!(forms[0].method.as_deref(), Some("get"));
            assert_eq!(
                forms[0].inputs,
                vec![("id".to_string(), "1abC".to_string()), ("uuid".to_string(), "f00".to_string())]
            );
            assert_eq!(html_attribute(r#"div player_data="{&quot;a&quot;:1}""#, "player_data").as_deref(), Some(r#"{"a":1}"#));
        }
    }
}
