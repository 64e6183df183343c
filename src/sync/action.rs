use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::net::{Fetch, FetchError, Request};
use crate::util::now_millis;

/// User actions that must eventually reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
  PostComment,
  LikePost,
  SaveProgress,
}

impl ActionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::PostComment => "post_comment",
      Self::LikePost => "like_post",
      Self::SaveProgress => "save_progress",
    }
  }

  /// API endpoint the action is POSTed to
  pub fn endpoint(&self) -> &'static str {
    match self {
      Self::PostComment => "/api/comments",
      Self::LikePost => "/api/likes",
      Self::SaveProgress => "/api/progress",
    }
  }
}

impl fmt::Display for ActionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "post_comment" => Ok(Self::PostComment),
      "like_post" => Ok(Self::LikePost),
      "save_progress" => Ok(Self::SaveProgress),
      other => Err(format!("unknown action: {}", other)),
    }
  }
}

/// An action waiting to be replayed. Only ever removed, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
  pub id: String,
  pub action: ActionKind,
  #[serde(rename = "data")]
  pub payload: Value,
  /// Milliseconds since the Unix epoch
  #[serde(rename = "timestamp")]
  pub enqueued_at: i64,
}

impl QueuedAction {
  pub fn new(action: ActionKind, payload: Value) -> Self {
    let enqueued_at = now_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    Self {
      id: format!("{}-{}", enqueued_at, &suffix[..12]),
      action,
      payload,
      enqueued_at,
    }
  }
}

/// Send one action to its endpoint. Any non-2xx answer counts as a failure.
pub async fn send_action<F: Fetch + ?Sized>(
  fetcher: &F,
  origin: &Url,
  action: ActionKind,
  payload: &Value,
) -> Result<Value, FetchError> {
  let url = origin
    .join(action.endpoint())
    .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", action.endpoint(), e)))?;

  let response = fetcher.fetch(&Request::post_json(url, payload)).await?;
  if !response.ok() {
    return Err(FetchError::Status {
      url: response.url,
      status: response.status,
    });
  }

  // Endpoints may answer with an empty body
  Ok(serde_json::from_slice(&response.body).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{origin, ScriptedFetcher};
  use serde_json::json;

  #[test]
  fn test_ids_are_unique() {
    let a = QueuedAction::new(ActionKind::LikePost, json!({ "postId": 7 }));
    let b = QueuedAction::new(ActionKind::LikePost, json!({ "postId": 7 }));
    assert_ne!(a.id, b.id);
    assert!(a.id.starts_with(&a.enqueued_at.to_string()));
  }

  #[test]
  fn test_persisted_shape() {
    let action = QueuedAction {
      id: "1-abc".to_string(),
      action: ActionKind::SaveProgress,
      payload: json!({ "lesson": 3 }),
      enqueued_at: 1,
    };
    assert_eq!(
      serde_json::to_value(&action).unwrap(),
      json!({ "id": "1-abc", "action": "save_progress", "data": { "lesson": 3 }, "timestamp": 1 })
    );
  }

  #[test]
  fn test_kind_parse() {
    assert_eq!("post_comment".parse::<ActionKind>(), Ok(ActionKind::PostComment));
    assert!("share_post".parse::<ActionKind>().is_err());
  }

  #[tokio::test]
  async fn test_send_posts_to_endpoint() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("/api/comments", 201, r#"{"id": 99}"#);

    let result = send_action(&fetcher, &origin(), ActionKind::PostComment, &json!({ "text": "hi" }))
      .await
      .unwrap();
    assert_eq!(result, json!({ "id": 99 }));
    assert_eq!(fetcher.calls(), vec!["POST https://quiter.test/api/comments"]);
  }

  #[tokio::test]
  async fn test_send_rejects_error_status() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("/api/likes", 500, "");

    let err = send_action(&fetcher, &origin(), ActionKind::LikePost, &json!({}))
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));
  }
}
