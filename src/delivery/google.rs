//! Shared HTTP plumbing for the Google REST clients.
//!
//! Bearer-token auth, per-request timeout, and mapping of transport and
//! status failures onto [`DeliveryError`].

use std::time::Duration;

use reqwest::{RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use crate::error::DeliveryError;

/// Error bodies are cut to this many characters before they reach logs.
const MAX_ERROR_BODY: usize = 500;

pub(crate) struct GoogleApi {
    service: &'static str,
    base_url: String,
    token: SecretString,
    timeout: Duration,
    client: reqwest::Client,
}

impl GoogleApi {
    pub(crate) fn new(
        service: &'static str,
        base_url: impl Into<String>,
        token: SecretString,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            base_url: base_url.into(),
            token,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub(crate) fn service(&self) -> &'static str {
        self.service
    }

    /// Base URL plus percent-encoded path segments.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, DeliveryError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| DeliveryError::Validation {
            service: self.service.into(),
            reason: format!("invalid base URL '{}': {e}", self.base_url),
        })?;
        {
            let mut path = url.path_segments_mut().map_err(|_| DeliveryError::Validation {
                service: self.service.into(),
                reason: format!("base URL '{}' cannot take a path", self.base_url),
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    pub(crate) async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<Value, DeliveryError> {
        self.send(self.client.get(url).query(query)).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<Value, DeliveryError> {
        self.send(self.client.post(url).json(body)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, DeliveryError> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http {
                service: self.service.into(),
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DeliveryError::MalformedResponse {
                service: self.service.into(),
                reason: e.to_string(),
            })
    }

    fn transport_error(&self, e: reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            DeliveryError::Timeout {
                service: self.service.into(),
                timeout: self.timeout,
            }
        } else if e.is_builder() {
            DeliveryError::Validation {
                service: self.service.into(),
                reason: e.to_string(),
            }
        } else {
            DeliveryError::Connection {
                service: self.service.into(),
                reason: e.to_string(),
            }
        }
    }

    /// `id` field of a created resource.
    pub(crate) fn created_id(&self, value: &Value) -> Result<String, DeliveryError> {
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DeliveryError::MalformedResponse {
                service: self.service.into(),
                reason: "response has no 'id'".into(),
            })
    }
}

/// `items` array of a list response; absent means empty.
pub(crate) fn items(value: &Value) -> &[Value] {
    value
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
