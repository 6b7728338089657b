//! Push payloads turned into notifications, and notification clicks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct PushPayload {
  title: String,
  #[serde(default)]
  body: Option<String>,
  #[serde(default)]
  data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// What the host should display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: Option<String>,
  pub icon: String,
  pub badge: String,
  pub data: Value,
  pub actions: Vec<NotificationAction>,
}

pub const OPEN_ACTION: &str = "open";
pub const DISMISS_ACTION: &str = "dismiss";

/// Build a notification from a push payload. An empty payload shows nothing.
pub fn from_push(payload: &[u8], config: &NotificationConfig) -> Result<Option<Notification>> {
  if payload.is_empty() {
    return Ok(None);
  }

  let push: PushPayload = serde_json::from_slice(payload)
    .map_err(|e| Error::Message(format!("invalid push payload: {}", e)))?;

  Ok(Some(Notification {
    title: push.title,
    body: push.body,
    icon: config.icon.clone(),
    badge: config.badge.clone(),
    data: push.data,
    actions: vec![
      NotificationAction {
        action: OPEN_ACTION.to_string(),
        title: "Open App".to_string(),
      },
      NotificationAction {
        action: DISMISS_ACTION.to_string(),
        title: "Dismiss".to_string(),
      },
    ],
  }))
}

/// URL to open for a click on `action` (`None` is a click on the body).
pub fn on_click(action: Option<&str>, config: &NotificationConfig) -> Option<String> {
  match action {
    None | Some(OPEN_ACTION) | Some("") => Some(config.open_url.clone()),
    Some(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_push_builds_notification() {
    let config = NotificationConfig::default();
    let payload = br#"{"title":"Daily goal","body":"5 verses left","data":{"chapter":2}}"#;

    let notification = from_push(payload, &config).unwrap().unwrap();

    assert_eq!(notification.title, "Daily goal");
    assert_eq!(notification.body.as_deref(), Some("5 verses left"));
    assert_eq!(notification.icon, "/icons/icon-192x192.png");
    assert_eq!(notification.badge, "/icons/badge-72x72.png");
    assert_eq!(notification.data["chapter"], 2);
    assert_eq!(notification.actions.len(), 2);
    assert_eq!(notification.actions[0].action, "open");
    assert_eq!(notification.actions[1].title, "Dismiss");
  }

  #[test]
  fn test_empty_push_is_ignored() {
    let config = NotificationConfig::default();
    assert_eq!(from_push(b"", &config).unwrap(), None);
  }

  #[test]
  fn test_malformed_push_is_an_error() {
    let config = NotificationConfig::default();
    assert!(matches!(
      from_push(b"not json", &config),
      Err(Error::Message(_))
    ));
  }

  #[test]
  fn test_click_routing() {
    let config = NotificationConfig::default();
    assert_eq!(on_click(None, &config).as_deref(), Some("/"));
    assert_eq!(on_click(Some("open"), &config).as_deref(), Some("/"));
    assert_eq!(on_click(Some("dismiss"), &config), None);
  }
}
