use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use super::PollTransport;
use crate::error::TransportError;

/// HTTP snapshot endpoint of a dashboard page (`/api/<page>-data/`).
pub struct HttpPoll {
    client: Client,
    url: String,
}

impl HttpPoll {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        // The server answers AJAX-style requests with the JSON snapshot.
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PollTransport for HttpPoll {
    async fn fetch(&mut self) -> Result<String, TransportError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}
