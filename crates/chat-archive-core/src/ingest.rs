//! Ingest service: validation and idempotent writes.
//!
//! Every write goes through the dedup key `(platform, messageId)`:
//!
//! 1. Look the key up with [`MessageStore::find_by_external_id`].
//! 2. Absent: insert a new record.
//! 3. Present with different `content`: patch the content in place.
//! 4. Present with identical content: no-op.
//!
//! Validation happens up front on raw JSON so that a batch with a single bad
//! element is rejected before anything is written.
//!
//! The check-then-insert is not atomic. Two concurrent saves of the same key
//! can both observe "absent" and both insert; stores do not guard against it.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::NewMessage;
use crate::store::MessageStore;

/// Fields that must be present on every ingested message, in check order.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "platform",
    "groupId",
    "messageId",
    "content",
    "authorId",
    "authorName",
    "authorRole",
    "timestamp",
];

/// Client-side validation failure. Nothing has been written when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Message must be a JSON object")]
    NotAnObject,
    #[error("Invalid message: {0}")]
    Invalid(String),
    #[error("Missing messages array")]
    MissingMessages,
    #[error("messages[{index}]: {source}")]
    InBatch {
        index: usize,
        #[source]
        source: Box<IngestError>,
    },
}

/// Validate one raw JSON message and convert it to a [`NewMessage`].
///
/// A required field that is absent or `null` is reported as missing; a field
/// with the wrong JSON type is reported as invalid.
pub fn parse_message(value: &Value) -> Result<NewMessage, IngestError> {
    let obj = value.as_object().ok_or(IngestError::NotAnObject)?;
    for field in REQUIRED_FIELDS {
        match obj.get(field) {
            None | Some(Value::Null) => return Err(IngestError::MissingField(field)),
            Some(_) => {}
        }
    }
    serde_json::from_value(value.clone()).map_err(|e| IngestError::Invalid(e.to_string()))
}

/// Validate every element of a batch. Any failure rejects the whole batch.
pub fn parse_batch(values: &[Value]) -> Result<Vec<NewMessage>, IngestError> {
    values
        .iter()
        .enumerate()
        .map(|(index, v)| {
            parse_message(v).map_err(|e| IngestError::InBatch {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

/// Extract and validate the `messages` array of a batch request body.
pub fn parse_batch_body(body: &Value) -> Result<Vec<NewMessage>, IngestError> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(IngestError::MissingMessages)?;
    parse_batch(messages)
}

/// What [`save_one`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveOutcome {
    /// No record with this dedup key existed; a new one was written.
    Inserted,
    /// A record existed with different content; its content was replaced.
    Updated,
    /// A record existed with identical content; nothing was written.
    Unchanged,
}

/// Per-element outcomes of [`save_batch`], in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<SaveOutcome>,
}

impl BatchReport {
    /// Number of newly inserted records (updates are not counted).
    pub fn inserted(&self) -> usize {
        self.count(SaveOutcome::Inserted)
    }

    pub fn updated(&self) -> usize {
        self.count(SaveOutcome::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(SaveOutcome::Unchanged)
    }

    fn count(&self, outcome: SaveOutcome) -> usize {
        self.outcomes.iter().filter(|o| **o == outcome).count()
    }
}

/// Save a single message, deduplicating on `(platform, messageId)`.
///
/// Idempotent under retry. Content change detection is a strict string
/// comparison.
pub async fn save_one<S: MessageStore + ?Sized>(store: &S, msg: &NewMessage) -> Result<SaveOutcome> {
    match store
        .find_by_external_id(&msg.platform, &msg.message_id)
        .await?
    {
        Some(existing) if existing.content != msg.content => {
            store.patch_content(&existing.id, &msg.content).await?;
            debug!(platform = %msg.platform, message_id = %msg.message_id, "content updated");
            Ok(SaveOutcome::Updated)
        }
        Some(_) => Ok(SaveOutcome::Unchanged),
        None => {
            let id = store.insert(msg).await?;
            debug!(platform = %msg.platform, message_id = %msg.message_id, id = %id, "inserted");
            Ok(SaveOutcome::Inserted)
        }
    }
}

/// Save a batch of messages in order, applying [`save_one`] to each.
///
/// Elements are processed sequentially, so duplicates inside one batch
/// collapse onto the first occurrence. There is no rollback: a store error
/// part-way through propagates and leaves earlier elements written.
pub async fn save_batch<S: MessageStore + ?Sized>(
    store: &S,
    msgs: &[NewMessage],
) -> Result<BatchReport> {
    let mut report = BatchReport {
        outcomes: Vec::with_capacity(msgs.len()),
    };
    for msg in msgs {
        report.outcomes.push(save_one(store, msg).await?);
    }
    debug!(
        total = msgs.len(),
        inserted = report.inserted(),
        updated = report.updated(),
        "batch saved"
    );
    Ok(report)
}
