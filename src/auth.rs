use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::client::CatalogClient;
use crate::config::HarvestConfig;
use crate::engine::RetryPolicy;
use crate::error::HarvestError;
use crate::planner::BearerToken;

pub const CONFIG_META_NAME: &str = "web-experience-app/config/environment";
pub const TOKEN_POINTER: &str = "/MEDIA_API/token";

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid meta regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid attribute regex")
});

pub fn bootstrap<C: CatalogClient + ?Sized>(
    client: &C,
    config: &HarvestConfig,
    retry: &RetryPolicy,
) -> Result<BearerToken, HarvestError> {
    let url = format!(
        "https://{}/{}/app/id{}",
        config.storefront_host, config.country, config.bootstrap_app_id
    );
    info!(%url, "bootstrapping bulk API token");
    let page = retry.run(|| client.fetch_page(&url))?;
    let token = extract_token(&page)?;
    info!(token_chars = token.as_str().len(), "bulk API token acquired");
    Ok(token)
}

pub fn extract_token(html: &str) -> Result<BearerToken, HarvestError> {
    let content = find_meta_content(html, CONFIG_META_NAME).ok_or_else(|| {
        HarvestError::AuthExtraction(format!("meta tag {CONFIG_META_NAME:?} not found"))
    })?;
    let decoded = percent_decode_str(&content)
        .decode_utf8()
        .map_err(|err| HarvestError::AuthExtraction(format!("config blob is not UTF-8: {err}")))?;
    let blob: Value = serde_json::from_str(&decoded)
        .map_err(|err| HarvestError::AuthExtraction(format!("config blob is not JSON: {err}")))?;
    let token = blob
        .pointer(TOKEN_POINTER)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            HarvestError::AuthExtraction(format!("config blob has no string at {TOKEN_POINTER}"))
        })?;
    BearerToken::new(token)
}

fn find_meta_content(html: &str, name: &str) -> Option<String> {
    META_TAG.find_iter(html).find_map(|tag| {
        let mut tag_name = None;
        let mut content = None;
        for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match caps[1].to_ascii_lowercase().as_str() {
                "name" => tag_name = Some(value),
                "content" => content = Some(value),
                _ => {}
            }
        }
        (tag_name == Some(name)).then(|| content.map(unescape_html)).flatten()
    })
}

fn unescape_html(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const BLOB: &str = "%7B%22MEDIA_API%22%3A%7B%22token%22%3A%22eyJhbGci.payload.sig%22%7D%7D";

    #[test]
    fn extracts_token_from_meta_tag() {
        let html = format!(
            r#"<html><head><meta charset="utf-8"><meta name="{CONFIG_META_NAME}" content="{BLOB}"></head></html>"#
        );
        let token = extract_token(&html).unwrap();
        assert_eq!(token.as_str(), "eyJhbGci.payload.sig");
    }

    #[test]
    fn attribute_order_does_not_matter() {
        let html = format!(r#"<META content='{BLOB}' NAME='{CONFIG_META_NAME}' />"#);
        assert!(extract_token(&html).is_ok());
    }

    #[test]
    fn missing_meta_tag() {
        let err = extract_token("<html><head></head></html>").unwrap_err();
        assert_matches!(err, HarvestError::AuthExtraction(_));
    }

    #[test]
    fn missing_token_field() {
        let html = format!(r#"<meta name="{CONFIG_META_NAME}" content="%7B%22MEDIA_API%22%3A%7B%7D%7D">"#);
        let err = extract_token(&html).unwrap_err();
        assert_matches!(err, HarvestError::AuthExtraction(msg) if msg.contains("MEDIA_API"));
    }
}
