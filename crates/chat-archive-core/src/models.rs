//! Core data models used throughout Chat Archive.
//!
//! These types represent the messages, sync checkpoints, and aggregate
//! statistics that flow through the ingest and retrieval pipeline. Field
//! names serialize in camelCase to match the HTTP wire format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message as submitted by a platform bridge, before storage.
///
/// `(platform, message_id)` is the dedup key. The storage-assigned `_id`
/// only exists on [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// `"telegram"`, `"slack"`, `"discord"`, `"whatsapp"`, `"imessage"`, ...
    pub platform: String,
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Slack thread / Telegram topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Platform-specific message identifier.
    pub message_id: String,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    /// Usually `"user"`, `"assistant"` or `"system"`; not enforced.
    pub author_role: String,
    /// Unix milliseconds, caller supplied.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Quoted snippet of the message being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_text: Option<String>,
    /// Platform-specific extras, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A stored message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Storage-assigned identifier (UUID v4).
    #[serde(rename = "_id")]
    pub id: String,
    /// Wall-clock insertion time in Unix milliseconds.
    #[serde(rename = "_creationTime")]
    pub creation_time: i64,
    pub platform: String,
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub message_id: String,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    pub author_role: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Populated lazily by the embedding pipeline; `None` means not yet embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Message {
    /// Build a stored record from an ingest payload.
    pub fn from_new(id: String, creation_time: i64, new: NewMessage) -> Self {
        Self {
            id,
            creation_time,
            platform: new.platform,
            group_id: new.group_id,
            group_name: new.group_name,
            thread_id: new.thread_id,
            message_id: new.message_id,
            content: new.content,
            author_id: new.author_id,
            author_name: new.author_name,
            author_role: new.author_role,
            timestamp: new.timestamp,
            reply_to_id: new.reply_to_id,
            reply_to_text: new.reply_to_text,
            metadata: new.metadata,
            embedding: None,
        }
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    /// Returns true if every supplied filter matches this message exactly.
    pub fn matches(&self, filter: &MessageFilter) -> bool {
        if let Some(p) = &filter.platform {
            if &self.platform != p {
                return false;
            }
        }
        if let Some(g) = &filter.group_id {
            if &self.group_id != g {
                return false;
            }
        }
        if let Some(a) = &filter.author_id {
            if &self.author_id != a {
                return false;
            }
        }
        true
    }
}

/// Optional exact-match filters shared by keyword and semantic search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFilter {
    pub platform: Option<String>,
    pub group_id: Option<String>,
    pub author_id: Option<String>,
}

impl MessageFilter {
    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.group_id.is_none() && self.author_id.is_none()
    }
}

/// Last-seen position for an incremental sync of one group.
///
/// Owned by an external sync collaborator; the archive only stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub platform: String,
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    pub last_timestamp: i64,
    pub last_sync_at: i64,
}

/// Aggregate counts returned by `GET /stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: u64,
    pub by_platform: BTreeMap<String, u64>,
    /// Keyed by `"platform:groupId"`.
    pub by_group: BTreeMap<String, u64>,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

impl Stats {
    /// Key used in [`Stats::by_group`].
    pub fn group_key(platform: &str, group_id: &str) -> String {
        format!("{}:{}", platform, group_id)
    }
}
