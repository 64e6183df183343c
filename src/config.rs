use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the web app; requests to any other origin are never intercepted
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub local_cache: LocalCacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub status: StatusConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Namespace prefix, e.g. "quiter" gives "quiter-static-v1"
  pub prefix: String,
  /// Version suffix; bumping it invalidates every cache on next activation
  pub version: String,
  /// Document served for offline navigations with no cached copy
  pub app_shell: String,
  /// App-shell files fetched at install time, in order
  pub manifest: Vec<String>,
  /// Activate straight after a successful install instead of waiting
  pub skip_waiting_on_install: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "quiter".to_string(),
      version: "v1".to_string(),
      app_shell: "/index.html".to_string(),
      manifest: [
        "/",
        "/index.html",
        "/learning.html",
        "/community.html",
        "/css/styles.css",
        "/js/utils.js",
        "/js/loading.js",
        "/js/search.js",
        "/js/performance.js",
        "/js/validation.js",
        "/js/offline.js",
        "/js/darkmode.js",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      skip_waiting_on_install: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Delay before the startup drain, so the rest of startup finishes first
  pub startup_drain_delay_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      startup_drain_delay_ms: 2000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalCacheConfig {
  pub default_ttl_ms: u64,
  /// Literal prefix prepended to every logical key in persistent storage
  pub key_prefix: String,
  pub sweep_interval_secs: u64,
  /// Emulated storage quota in bytes (keys + values); unlimited when unset
  pub quota_bytes: Option<u64>,
}

impl Default for LocalCacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_ms: 24 * 60 * 60 * 1000,
      key_prefix: "cache_".to_string(),
      sweep_interval_secs: 60 * 60,
      quota_bytes: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  /// Path probed to decide whether the origin is reachable
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 10,
      probe_path: "/".to_string(),
      probe_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
  /// How long a status banner stays visible
  pub banner_secs: u64,
}

impl Default for StatusConfig {
  fn default() -> Self {
    Self { banner_secs: 3 }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/quiter-offline/offline.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Configuration with every field defaulted except the origin.
  pub fn with_origin(origin: Url) -> Self {
    Self {
      origin,
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      local_cache: LocalCacheConfig::default(),
      network: NetworkConfig::default(),
      status: StatusConfig::default(),
      storage: StorageConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./quiter-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/quiter-offline/config.yaml
  ///
  /// With no file found, `origin_override` alone is enough to run on defaults.
  pub fn load(explicit_path: Option<&Path>, origin_override: Option<Url>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match (path, origin_override) {
      (Some(p), origin) => {
        let mut config = Self::load_from_path(&p)?;
        if let Some(origin) = origin {
          config.origin = origin;
        }
        config
      }
      (None, Some(origin)) => Self::with_origin(origin),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found and no --origin given. Create one at \
           ~/.config/quiter-offline/config.yaml"
        ))
      }
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("quiter-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("quiter-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("origin must be an http(s) URL, got {}", self.origin));
    }
    if self.cache.version.is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    if !self.cache.manifest.iter().any(|p| p == &self.cache.app_shell) {
      return Err(eyre!(
        "cache.manifest must include the app shell {}",
        self.cache.app_shell
      ));
    }

    let durations = [
      ("network.timeout_secs", self.network.timeout_secs),
      ("network.probe_interval_secs", self.network.probe_interval_secs),
      ("local_cache.sweep_interval_secs", self.local_cache.sweep_interval_secs),
      ("status.banner_secs", self.status.banner_secs),
    ];
    if let Some((name, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
      return Err(eyre!("{} must be greater than zero", name));
    }
    Ok(())
  }

  /// Resolve a path from the manifest or the command line against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))
  }
}
