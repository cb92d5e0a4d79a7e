//! hub.rs
//!
//! Best-effort push of UPS data and events to the home-automation hub.

use std::time::Duration;

use log::debug;
use reqwest::header::{CONTENT_TYPE, REFERER};
use serde::Serialize;

/// The hub expects this content type even though the body is JSON.
const PUSH_CONTENT_TYPE: &str = "text/html";

const REFERER_VALUE: &str = "apcupsd";

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("failed to encode hub payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("hub request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Envelope wrapping every pushed payload.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    data: &'a T,
}

#[derive(Clone, Debug)]
pub struct HubClient {
    client: reqwest::Client,
    url: String,
}

impl HubClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, HubError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `{"data": payload}` to the hub.
    ///
    /// Only transport failures are reported; the hub's status code and body
    /// are not looked at.
    pub async fn push<T: Serialize>(&self, payload: &T) -> Result<(), HubError> {
        let body = serde_json::to_string(&Envelope { data: payload })?;
        debug!("Pushing {} bytes to hub at {}", body.len(), self.url);

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, PUSH_CONTENT_TYPE)
            .header(REFERER, REFERER_VALUE)
            .body(body)
            .send()
            .await?;

        debug!("Hub answered {}", response.status());
        Ok(())
    }
}
