//! HTTP client wrapper shared by every acquisition stage.
//!
//! This module provides the [`HttpClient`] struct which handles page fetches,
//! JSON API calls, and streaming binary downloads with proper timeout
//! configuration, User-Agent rotation, and error mapping.

use std::time::Duration;

use futures_util::StreamExt;
use rand::seq::SliceRandom;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER, RETRY_AFTER, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::error::FetchError;

/// Default Accept header for HTML page fetches.
const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8";

/// A fetched page body together with the final URL after redirects.
///
/// The final URL matters for absolutizing relative links scraped out of the
/// body.
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// URL the response actually came from.
    pub final_url: String,
    /// Decoded response body.
    pub body: String,
}

/// A downloaded binary artifact.
#[derive(Debug)]
pub struct BinaryResponse {
    /// URL the bytes actually came from.
    pub final_url: String,
    /// Lowercased Content-Type header, empty when absent.
    pub content_type: String,
    /// Response bytes.
    pub bytes: Vec<u8>,
}

/// HTTP client for the acquisition pipeline.
///
/// Designed to be created once and shared (it is cheap to clone; the inner
/// reqwest client pools connections). Every request picks a random
/// User-Agent from the configured pool, matching how the mirror and
/// repository endpoints are normally browsed.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    user_agents: Vec<String>,
}

impl HttpClient {
    /// Creates a client with the given request timeout and User-Agent pool.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(timeout: Duration, user_agents: Vec<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .gzip(true)
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            user_agents,
        }
    }

    /// Picks a random User-Agent from the pool.
    fn random_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map_or("pubminer/0.1", String::as_str)
    }

    /// Fetches a page as text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on network failure, timeout, non-2xx status,
    /// or undecodable body.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> Result<PageResponse, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .header(ACCEPT, HTML_ACCEPT);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_string(response.headers(), RETRY_AFTER.as_str());
            return Err(FetchError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        debug!(bytes = body.len(), "fetched page");
        Ok(PageResponse { final_url, body })
    }

    /// Fetches a URL and deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on network failure, non-2xx status, or a body
    /// that does not match `T`.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_string(response.headers(), RETRY_AFTER.as_str());
            return Err(FetchError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::bad_body(url, e.to_string()))
    }

    /// Probes a URL with HEAD, returning `(status, lowercased content-type)`.
    ///
    /// Network failures are mapped like any other fetch; non-2xx statuses are
    /// returned to the caller rather than raised, since probing expects them.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] only for transport-level failures.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn head_content_type(&self, url: &str) -> Result<(u16, String), FetchError> {
        let response = self
            .client
            .head(url)
            .header(USER_AGENT, self.random_user_agent())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let content_type = header_string(response.headers(), CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_lowercase();
        Ok((response.status().as_u16(), content_type))
    }

    /// Downloads a binary artifact, streaming the body into memory.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on network failure, timeout, or non-2xx status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_bytes(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<BinaryResponse, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .header(ACCEPT, "application/pdf,*/*;q=0.8");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_string(response.headers(), RETRY_AFTER.as_str());
            return Err(FetchError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let final_url = response.url().to_string();
        let content_type = header_string(response.headers(), CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_lowercase();

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(url, e))?;
            bytes.extend_from_slice(&chunk);
        }

        debug!(bytes = bytes.len(), content_type = %content_type, "downloaded artifact");
        Ok(BinaryResponse {
            final_url,
            content_type,
            bytes,
        })
    }
}

/// Reads a header value as an owned string, when present and valid UTF-8.
fn header_string(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
