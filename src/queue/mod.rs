//! Durable queue of client writes waiting to reach the remote API.

mod store;

pub use store::QueueStore;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of client writes that can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
  Referral,
  Question,
}

impl EntityType {
  pub const ALL: [EntityType; 2] = [EntityType::Referral, EntityType::Question];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Referral => "referral",
      Self::Question => "question",
    }
  }

  /// Storage namespace holding this type's queue
  pub fn namespace(&self) -> &'static str {
    match self {
      Self::Referral => "referrals",
      Self::Question => "questions",
    }
  }

  /// Path of the remote endpoint accepting this type, relative to the
  /// API base.
  pub fn endpoint(&self) -> &'static str {
    match self {
      Self::Referral => "api/referrals",
      Self::Question => "api/questions",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "referral" | "referrals" => Ok(Self::Referral),
      "question" | "questions" => Ok(Self::Question),
      other => Err(eyre!("Unknown entity type '{}'", other)),
    }
  }
}

/// A client write not yet confirmed by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  /// Client-generated, stable across retries
  pub id: String,
  #[serde(rename = "type")]
  pub entity_type: EntityType,
  /// Opaque record posted as the request body
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
}

impl PendingMutation {
  pub fn new(id: impl Into<String>, entity_type: EntityType, payload: serde_json::Value) -> Self {
    Self {
      id: id.into(),
      entity_type,
      payload,
      created_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entity_type_parsing() {
    assert_eq!("referral".parse::<EntityType>().unwrap(), EntityType::Referral);
    assert_eq!("questions".parse::<EntityType>().unwrap(), EntityType::Question);
    assert!("payment".parse::<EntityType>().is_err());
    assert_eq!(EntityType::Question.endpoint(), "api/questions");
  }
}
