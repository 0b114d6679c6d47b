//! User profile projection.
//!
//! The remote store owns one profile document per user; everything here
//! is a projection of that document. Field names are camelCase on the
//! wire, matching the hosted documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One user's profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id, equal to the document id. Defaulted so partial cache
    /// entries (anchor-only patches) still parse as a projection.
    #[serde(default)]
    pub uid: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Anchor instant the counter is derived from. Absent until the
    /// first reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quit_since: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Parse a profile from a document snapshot.
    pub fn from_snapshot(snapshot: Value) -> Result<Self> {
        Ok(serde_json::from_value(snapshot)?)
    }

    /// Serialize the profile back into snapshot form.
    pub fn to_snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
