use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::REFERER;
use url::Url;

use super::jwplayer::{find_player_setup, script_candidates, videos_from_setup, PlayerSetup, PlayerSource};
use super::{ExtractRequest, ExtractedVideo, Extractor};
use crate::crypto::aes::{decrypt_cryptojs_json, decrypt_key_iv_hex, decrypt_salted_base64, CbcPadding};
use crate::http::{get_page, merge_headers, origin_of};
use crate::jsunpack::deobfuscate;

const JS_VALUE: &str = r#"('[^']*'|"[^"]*"|[\w.]+\(\s*['"][0-9a-fA-F]*['"]\s*\)|\w+)"#;

static AES_DECRYPT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"AES\.decrypt\(\s*{JS_VALUE}\s*,\s*{JS_VALUE}")).unwrap());
static HEX_PARSE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"Hex\.parse\(\s*['"]([0-9a-fA-F]+)['"]\s*\)"#).unwrap());

/// The player script's `CryptoJS.AES.decrypt(...)` call with its arguments resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Secret {
    Password { data: String, password: String },
    KeyIv { data: String, key: String, iv: String, padding: CbcPadding },
}

/// Value of a quoted literal, or of the string a `var`/`let`/`const` binding assigns.
fn resolve_js_value(script: &str, expression: &str) -> Option<String> {
    let quoted = expression
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| expression.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')));
    if let Some(value) = quoted {
        return Some(value.to_string());
    }

    let binding = Regex::new(&format!(
        r#"(?:var|let|const)\s+{}\s*=\s*(?:'([^']*)'|"([^"]*)")"#,
        regex::escape(expression)
    ))
    .ok()?;
    let captures = binding.captures(script)?;

    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

fn find_secret(script: &str) -> Option<Secret> {
    let captures = AES_DECRYPT_REGEX.captures(script)?;
    let data = resolve_js_value(script, captures.get(1)?.as_str())?;
    let key_expression = captures.get(2)?;

    if key_expression.as_str().contains("Hex.parse") {
        let key = HEX_PARSE_REGEX.captures(key_expression.as_str())?.get(1)?.as_str().to_string();
        let iv = HEX_PARSE_REGEX
            .captures(&script[key_expression.end()..])?
            .get(1)?
            .as_str()
            .to_string();
        let padding = if script.contains("NoPadding") {
            CbcPadding::None
        } else {
            CbcPadding::Pkcs7
        };

        return Some(Secret::KeyIv { data, key, iv, padding });
    }

    let password = resolve_js_value(script, key_expression.as_str())?;
    Some(Secret::Password { data, password })
}

fn decrypt_secret(secret: &Secret) -> Result<String, anyhow::Error> {
    let plain = match secret {
        Secret::Password { data, password } if data.trim_start().starts_with('{') => {
            decrypt_cryptojs_json(data, password.as_bytes())?
        }
        Secret::Password { data, password } => decrypt_salted_base64(data, password.as_bytes())?,
        Secret::KeyIv { data, key, iv, padding } => decrypt_key_iv_hex(data, key, iv, *padding)?,
    };

    let text = String::from_utf8(plain).context("decrypted data is not utf-8")?;
    let text = text.trim_end_matches(['\0', ' ']);

    // The payload is often a JSON encoded string holding more script.
    Ok(serde_json::from_str::<String>(text).unwrap_or_else(|_| text.to_string()))
}

/// Locates and decrypts the encrypted player payload of a page, returning the player setup it declares.
pub fn decrypt_player_setup(html: &str) -> Result<PlayerSetup, anyhow::Error> {
    let secret = script_candidates(html)
        .iter()
        .find_map(|script| find_secret(&deobfuscate(script)))
        .context("no encrypted player data")?;
    log::trace!("GDrivePlayer: found encrypted player data");

    let payload = decrypt_secret(&secret)?;
    let payload = payload.trim();

    if payload.starts_with("http") {
        return Ok(PlayerSetup {
            sources: vec![PlayerSource {
                file: payload.to_string(),
                label: None,
            }],
            tracks: Vec::new(),
        });
    }

    find_player_setup(&deobfuscate(payload)).context("decrypted data declares no sources")
}

/// GDrivePlayer and the mirrors sharing its page layout.
#[derive(Debug, Default)]
pub struct GDrivePlayer;

impl Extractor for GDrivePlayer {
    const DISPLAY_NAME: &'static str = "GDrivePlayer";
    const NAMES: &'static [&'static str] = &["GDrivePlayer", "GDPlayer"];

    async fn supports_url(url: &str) -> Option<bool> {
        Some(
            Url::parse(url)
                .map(|url| {
                    url.host_str().is_some_and(|host| host.contains("gdriveplayer"))
                        && !url.path().trim_start_matches('/').is_empty()
                })
                .unwrap_or(false),
        )
    }

    async fn extract_videos(&self, request: &ExtractRequest) -> Result<Vec<ExtractedVideo>, anyhow::Error> {
        let page_url = request
            .parsed_url()
            .context("GDrivePlayer: failed to retrieve sources")?;
        let page = get_page(page_url, &request.headers)
            .await
            .context("GDrivePlayer: failed to retrieve sources")?;

        let setup = decrypt_player_setup(&page.text).context("GDrivePlayer: failed to retrieve sources")?;
        let headers = merge_headers(&request.headers, &[(REFERER, format!("{}/", origin_of(&page.url)))]);

        Ok(videos_from_setup(setup, &page.url, &headers, request, Self::DISPLAY_NAME).await)
    }
}
