// src/api/client.rs

//! HTTP client for the content server API
//!
//! Wraps a blocking reqwest client with basic auth, resolves server-relative
//! hrefs against the configured base URL, and surfaces every non-2xx
//! response as [`Error::Http`].

use super::tasks::CallReport;
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Maximum attempts for idempotent reads that fail in transport
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 500;

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 2048;

/// JSON client for one content server
pub struct ApiClient {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl ApiClient {
    /// Create a client from harness configuration
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout()?)
            .danger_accept_invalid_certs(!config.server.verify_tls)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url()?,
            username: config.server.username.clone(),
            password: config.server.password.clone(),
        })
    }

    /// Base URL every href is resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a server-relative href (or absolute URL)
    pub fn url(&self, href: &str) -> Result<Url> {
        self.base_url
            .join(href)
            .map_err(|e| Error::ParseError(format!("Invalid href '{href}': {e}")))
    }

    fn request(&self, method: Method, href: &str) -> Result<RequestBuilder> {
        let url = self.url(href)?;
        debug!("{} {}", method, url);
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password)))
    }

    fn send(&self, method: &Method, href: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .map_err(|e| Error::RequestError(format!("{method} {href}: {e}")))?;
        check_status(method, response)
    }

    /// GET with transport-level retries
    fn get(&self, href: &str, query: &[(&str, &str)]) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let builder = self.request(Method::GET, href)?.query(query);
            match builder.send() {
                Ok(response) => return check_status(&Method::GET, response),
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::RequestError(format!(
                            "GET {href} failed after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("GET {} attempt {} failed: {}, retrying...", href, attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// GET and decode a JSON body
    pub fn get_json<T: DeserializeOwned>(&self, href: &str) -> Result<T> {
        decode_json(self.get(href, &[])?)
    }

    /// GET with query parameters and decode a JSON body
    pub fn get_json_with_query<T: DeserializeOwned>(
        &self,
        href: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        decode_json(self.get(href, query)?)
    }

    /// GET a text body (e.g., published XML)
    pub fn get_text(&self, href: &str) -> Result<String> {
        self.get(href, &[])?
            .text()
            .map_err(|e| Error::RequestError(format!("Failed to read body of {href}: {e}")))
    }

    /// POST a JSON body and decode the JSON answer
    pub fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        href: &str,
        body: &B,
    ) -> Result<T> {
        let builder = self.request(Method::POST, href)?.json(body);
        decode_json(self.send(&Method::POST, href, builder)?)
    }

    /// POST an action that answers with a call report
    pub fn post_action<B: Serialize + ?Sized>(&self, href: &str, body: &B) -> Result<CallReport> {
        self.post_json(href, body)
    }

    /// PUT a JSON body and decode the JSON answer
    pub fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        href: &str,
        body: &B,
    ) -> Result<T> {
        let builder = self.request(Method::PUT, href)?.json(body);
        decode_json(self.send(&Method::PUT, href, builder)?)
    }

    /// PUT raw bytes
    pub fn put_bytes(&self, href: &str, bytes: Vec<u8>) -> Result<()> {
        let builder = self
            .request(Method::PUT, href)?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        self.send(&Method::PUT, href, builder)?;
        Ok(())
    }

    /// DELETE a resource; asynchronous deletes answer with a call report
    pub fn delete(&self, href: &str) -> Result<CallReport> {
        let builder = self.request(Method::DELETE, href)?;
        let response = self.send(&Method::DELETE, href, builder)?;
        let text = response
            .text()
            .map_err(|e| Error::RequestError(format!("Failed to read body of {href}: {e}")))?;
        if text.trim().is_empty() || text.trim() == "null" {
            return Ok(CallReport::default());
        }
        serde_json::from_str(&text).map_err(|e| {
            Error::ParseError(format!("Unexpected DELETE answer from {href}: {e}"))
        })
    }

    /// Download an artifact from an absolute URL (fixtures are unauthenticated)
    pub fn download(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| Error::RequestError(format!("Failed to fetch {}: {}", url, e)))?;
        let response = check_status(&Method::GET, response)?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::RequestError(format!("Failed to read {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

fn check_status(method: &Method, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let mut body = response.text().unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    Err(Error::Http {
        method: method.to_string(),
        url,
        status: status.as_u16(),
        body,
    })
}

fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    response
        .json()
        .map_err(|e| Error::ParseError(format!("Invalid JSON from {url}: {e}")))
}
