//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::config::Config;
use crate::net::{Fetch, FetchError, Request, Response};

pub const ORIGIN: &str = "https://quiter.test/";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
  origin().join(path).unwrap()
}

pub fn test_config(manifest: &[&str]) -> Config {
  let mut config = Config::with_origin(origin());
  config.cache.manifest = manifest.iter().map(|s| s.to_string()).collect();
  config
}

enum Scripted {
  Respond(Response),
  Fail,
}

/// Fetcher answering from a script. Unscripted URLs get a 404; while
/// offline every request fails with a network error.
pub struct ScriptedFetcher {
  online: AtomicBool,
  script: Mutex<HashMap<String, Scripted>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      script: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) -> &Self {
    let response = Response::new(status)
      .with_header("Content-Type", "text/plain")
      .with_body(body)
      .with_url(url(path).as_str());
    self
      .script
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Scripted::Respond(response));
    self
  }

  pub fn fail(&self, path: &str) -> &Self {
    self
      .script
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Scripted::Fail);
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// "METHOD url" for every request seen, in order
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let key = request.url.to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method.as_str(), key));

    let network_error = || FetchError::Network {
      url: key.clone(),
      message: "connection refused".to_string(),
    };

    if !self.online.load(Ordering::SeqCst) {
      return Err(network_error());
    }

    match self.script.lock().unwrap().get(&key) {
      Some(Scripted::Respond(response)) => Ok(response.clone()),
      Some(Scripted::Fail) => Err(network_error()),
      None => Ok(Response::new(404).with_url(key.as_str())),
    }
  }
}
