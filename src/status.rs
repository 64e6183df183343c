//! Transient status banner for connectivity and sync updates.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
  Success,
  Info,
  Warning,
}

impl StatusLevel {
  fn label(&self) -> &'static str {
    match self {
      Self::Success => "ok",
      Self::Info => "info",
      Self::Warning => "warning",
    }
  }
}

#[derive(Debug, Clone)]
struct Banner {
  message: String,
  level: StatusLevel,
  shown_at: Instant,
}

/// Shows one message at a time; a new message replaces the current one and
/// each message dismisses itself after the configured duration.
pub struct StatusBanner {
  current: Mutex<Option<Banner>>,
  visible_for: Duration,
  /// Echo banners to stderr (interactive use)
  echo: bool,
}

impl StatusBanner {
  pub fn new(visible_for: Duration, echo: bool) -> Self {
    Self {
      current: Mutex::new(None),
      visible_for,
      echo,
    }
  }

  pub fn show(&self, message: impl Into<String>, level: StatusLevel) {
    let message = message.into();
    match level {
      StatusLevel::Warning => warn!(status = level.label(), "{}", message),
      _ => info!(status = level.label(), "{}", message),
    }
    if self.echo {
      eprintln!("[{}] {}", level.label(), message);
    }

    *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Banner {
      message,
      level,
      shown_at: Instant::now(),
    });
  }

  /// Message still on screen, if any
  pub fn current(&self) -> Option<(String, StatusLevel)> {
    self.current_at(Instant::now())
  }

  fn current_at(&self, now: Instant) -> Option<(String, StatusLevel)> {
    let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
    match current.as_ref() {
      Some(banner) if now.duration_since(banner.shown_at) < self.visible_for => {
        Some((banner.message.clone(), banner.level))
      }
      Some(_) => {
        *current = None;
        None
      }
      None => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_message_replaces_old() {
    let banner = StatusBanner::new(Duration::from_secs(3), false);
    banner.show("Offline", StatusLevel::Warning);
    banner.show("Back online", StatusLevel::Success);
    assert_eq!(
      banner.current(),
      Some(("Back online".to_string(), StatusLevel::Success))
    );
  }

  #[test]
  fn test_banner_dismisses_itself() {
    let banner = StatusBanner::new(Duration::from_secs(3), false);
    banner.show("Syncing", StatusLevel::Info);

    let later = Instant::now() + Duration::from_secs(4);
    assert_eq!(banner.current_at(later), None);
    assert_eq!(banner.current(), None);
  }
}
