//! Push payloads to notifications, and notification clicks to window actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// What the platform is asked to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  #[serde(rename = "type")]
  kind: Option<String>,
  company: Option<Value>,
  status: Option<Value>,
  amount: Option<Value>,
}

impl Notification {
  /// Build the notification for a push message.
  ///
  /// `app_title` and `tag` come from configuration. A payload that is not
  /// valid JSON keeps the default wording.
  pub fn from_push(app_title: &str, tag: &str, data: Option<&[u8]>) -> Self {
    let mut title = app_title.to_string();
    let mut body = "You have new activity".to_string();

    let payload = data.and_then(|bytes| match serde_json::from_slice::<PushPayload>(bytes) {
      Ok(payload) => Some(payload),
      Err(e) => {
        warn!("Ignoring malformed push payload: {}", e);
        None
      }
    });

    if let Some(payload) = payload {
      if let Some(t) = payload.title.filter(|t| !t.is_empty()) {
        title = t;
      }
      if let Some(b) = payload.body.filter(|b| !b.is_empty()) {
        body = b;
      }

      match payload.kind.as_deref() {
        Some("referral_update") => {
          title = "Referral Update".to_string();
          body = format!(
            "Your referral \"{}\" status changed to {}",
            field(&payload.company),
            field(&payload.status)
          );
        }
        Some("payment") => {
          title = "Payment Received".to_string();
          body = format!("You received ${} commission payment", field(&payload.amount));
        }
        Some("question_response") => {
          title = "Question Answered".to_string();
          body = "Your question has been answered by our team".to_string();
        }
        _ => {}
      }
    }

    Self {
      title,
      body,
      tag: tag.to_string(),
      require_interaction: true,
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: "Open Portal".to_string(),
        },
        NotificationAction {
          action: "dismiss".to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }
}

fn field(value: &Option<Value>) -> String {
  match value {
    Some(Value::String(s)) => s.clone(),
    Some(Value::Null) | None => "unknown".to_string(),
    Some(other) => other.to_string(),
  }
}

/// What to do with client windows after a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
  /// Bring an already open window to the front
  Focus(Url),
  /// No window is open on our origin
  OpenWindow(Url),
  Ignore,
}

/// Resolve a click on a notification button (`None` = the body itself).
pub fn resolve_click(action: Option<&str>, open_clients: &[Url], origin: &Url) -> ClickAction {
  if !matches!(action, None | Some("") | Some("open")) {
    return ClickAction::Ignore;
  }

  if let Some(client) = open_clients.iter().find(|c| c.origin() == origin.origin()) {
    return ClickAction::Focus(client.clone());
  }

  let mut root = origin.clone();
  root.set_path("/");
  root.set_query(None);
  root.set_fragment(None);
  ClickAction::OpenWindow(root)
}
