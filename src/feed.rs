use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::Account;
use crate::error::{FetchError, SnapError};
use crate::retry::retry_once_if;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const FEED_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script\s*id="__NEXT_DATA__"\s*type="application/json">([^<]+)</script>"#)
        .unwrap()
});

/// Decoded `__NEXT_DATA__` document for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPayload {
    pub value: Value,
}

pub trait FeedSource: Send + Sync {
    fn fetch_page(&self, account: &Account) -> Result<String, FetchError>;
}

#[derive(Clone)]
pub struct FeedHttpClient {
    client: Client,
    base_url: String,
}

impl FeedHttpClient {
    pub fn new() -> Result<Self, SnapError> {
        Self::with_base_url("https://www.snapchat.com")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, SnapError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|err| SnapError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn page_url(&self, account: &Account) -> String {
        format!("{}/add/{}/", self.base_url, account.as_str())
    }
}

impl FeedSource for FeedHttpClient {
    fn fetch_page(&self, account: &Account) -> Result<String, FetchError> {
        let url = self.page_url(account);
        // Only the request is retried; a body read that stalls fails the attempt.
        let response = retry_once_if(
            || self.client.get(&url).send().map_err(fetch_error),
            |err| matches!(err, FetchError::Timeout),
        )?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }
        response.text().map_err(fetch_error)
    }
}

fn fetch_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(err.to_string())
    }
}

/// Every `__NEXT_DATA__` block on the page, in document order.
pub fn embedded_blocks(html: &str) -> Vec<&str> {
    NEXT_DATA_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|block| block.as_str())
        .collect()
}

/// Pulls the first embedded `__NEXT_DATA__` block out of the page and decodes it.
pub fn extract_payload(html: &str) -> Result<FeedPayload, FetchError> {
    let captured = embedded_blocks(html)
        .into_iter()
        .next()
        .ok_or(FetchError::NoEmbeddedPayload)?;
    let body = captured.trim();
    if body.is_empty() {
        return Err(FetchError::MalformedPayload("empty payload block".to_string()));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|err| FetchError::MalformedPayload(err.to_string()))?;
    Ok(FeedPayload { value })
}

/// Page text kept next to its decoded payload for the raw dumps.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub html: String,
    pub payload: FeedPayload,
}

impl FetchedFeed {
    pub fn raw_blocks(&self) -> Vec<&str> {
        embedded_blocks(&self.html)
    }
}

pub fn fetch_feed<F: FeedSource + ?Sized>(
    source: &F,
    account: &Account,
) -> Result<FetchedFeed, FetchError> {
    let html = source.fetch_page(account)?;
    let payload = extract_payload(&html)?;
    Ok(FetchedFeed { html, payload })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn extracts_first_block() {
        let html = r#"<html><script id="__NEXT_DATA__" type="application/json">{"props":{"a":1}}</script>
            <script id="__NEXT_DATA__" type="application/json">{"props":{"a":2}}</script></html>"#;
        let payload = extract_payload(html).unwrap();
        assert_eq!(payload.value["props"]["a"], 1);
    }

    #[test]
    fn lists_every_block() {
        let html = r#"<script id="__NEXT_DATA__" type="application/json">{"a":1}</script>
            <script id="__NEXT_DATA__" type="application/json">{"a":2}</script>"#;
        assert_eq!(embedded_blocks(html), vec![r#"{"a":1}"#, r#"{"a":2}"#]);
        assert!(embedded_blocks("<html></html>").is_empty());
    }

    #[test]
    fn missing_block() {
        let err = extract_payload("<html><body>nothing here</body></html>").unwrap_err();
        assert_matches!(err, FetchError::NoEmbeddedPayload);
    }

    #[test]
    fn broken_json() {
        let html = r#"<script id="__NEXT_DATA__" type="application/json">{"props": </script>"#;
        let err = extract_payload(html).unwrap_err();
        assert_matches!(err, FetchError::MalformedPayload(_));
    }

    #[test]
    fn page_url_layout() {
        let client = FeedHttpClient::with_base_url("https://example.test/").unwrap();
        let account: Account = "abc".parse().unwrap();
        assert_eq!(client.page_url(&account), "https://example.test/add/abc/");
    }
}
