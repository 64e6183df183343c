use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
    }
  }
}

/// How the request was initiated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full-page navigation
  Navigate,
  #[default]
  Cors,
}

/// What kind of resource the request is for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestDestination {
  Document,
  Script,
  Style,
  Image,
  Font,
  #[default]
  Empty,
}

impl FromStr for RequestDestination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "document" => Ok(Self::Document),
      "script" => Ok(Self::Script),
      "style" => Ok(Self::Style),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "" | "empty" | "other" => Ok(Self::Empty),
      other => Err(format!("unknown request destination: {}", other)),
    }
  }
}

/// An outgoing request as seen by the router
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub destination: RequestDestination,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// Plain GET for a subresource
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::Get,
      mode: RequestMode::Cors,
      destination: RequestDestination::Empty,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// Top-level page navigation
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: RequestDestination::Document,
      ..Self::get(url)
    }
  }

  /// JSON POST, used when replaying queued actions
  pub fn post_json(url: Url, payload: &serde_json::Value) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());

    Self {
      method: Method::Post,
      headers,
      body: Some(payload.to_string().into_bytes()),
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: RequestDestination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Key under which responses to this request are cached (URL without fragment).
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }

  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }
}

/// A fully buffered response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  /// Final URL the response was served from (empty for generated responses)
  pub url: String,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: Vec::new(),
      url: String::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  #[cfg(test)]
  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = url.into();
    self
  }

  /// Status in the 2xx range
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type").map(String::as_str)
  }
}
