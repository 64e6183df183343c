use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use thiserror::Error;

use crate::config::Config;

use super::types::{Method, Request, Response};

/// Errors from a single network fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  /// The request never produced a response (DNS, refused, timeout, offline)
  #[error("network request to {url} failed: {message}")]
  Network { url: String, message: String },
  /// A response arrived but the caller required a 2xx
  #[error("{url} responded with HTTP {status}")]
  Status { url: String, status: u16 },
  #[error("invalid request URL: {0}")]
  InvalidUrl(String),
}

/// Anything that can turn a request into a response over the network.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .user_agent(concat!("quiter-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

fn reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();

    let mut builder = self
      .client
      .request(reqwest_method(request.method), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| FetchError::Network {
      url: url.clone(),
      message: e.to_string(),
    })?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Network {
        url: url.clone(),
        message: format!("failed to read body: {}", e),
      })?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
      url: final_url,
    })
  }
}
