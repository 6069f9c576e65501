//! Trigger events announcing new objects.

use serde::{Deserialize, Serialize};

/// The three fields of a storage notification the pipeline acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_name: String,
    pub bucket_name: String,
    pub object_key: String,
}

/// Failure to read a notification.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("notification contains no records")]
    NoRecords,

    #[error("object key '{0}' is not valid URL encoding")]
    BadKey(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEvent {
    Notification(Notification),
    Flat(TriggerEvent),
}

#[derive(Deserialize)]
struct Notification {
    #[serde(rename = "Records")]
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct Record {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Deserialize)]
struct ObjectEntity {
    key: String,
}

impl TriggerEvent {
    pub fn new(event_name: impl Into<String>, bucket_name: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            bucket_name: bucket_name.into(),
            object_key: object_key.into(),
        }
    }

    /// Parse an S3 notification (`{"Records": [...]}`) or a flat
    /// `{event_name, bucket_name, object_key}` object.
    ///
    /// Notification keys arrive URL-encoded and are decoded here.
    pub fn from_json(text: &str) -> Result<Vec<Self>, EventError> {
        match serde_json::from_str::<RawEvent>(text)? {
            RawEvent::Flat(event) => Ok(vec![event]),
            RawEvent::Notification(notification) => {
                if notification.records.is_empty() {
                    return Err(EventError::NoRecords);
                }
                notification
                    .records
                    .into_iter()
                    .map(|record| {
                        Ok(Self {
                            event_name: record.event_name,
                            bucket_name: record.s3.bucket.name,
                            object_key: decode_key(&record.s3.object.key)?,
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Decode an S3 notification key (form encoding: `+` is a space).
fn decode_key(raw: &str) -> Result<String, EventError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| EventError::BadKey(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFICATION: &str = r#"{
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": {"name": "raw-games", "arn": "arn:aws:s3:::raw-games"},
                "object": {"key": "games/week+1/001%3Dfinal.parquet", "size": 1024}
            }
        }]
    }"#;

    #[test]
    fn test_parse_notification() {
        let events = TriggerEvent::from_json(NOTIFICATION).unwrap();
        assert_eq!(
            events,
            vec![TriggerEvent::new(
                "ObjectCreated:Put",
                "raw-games",
                "games/week 1/001=final.parquet"
            )]
        );
    }

    #[test]
    fn test_parse_flat_event() {
        let json = r#"{"event_name": "manual", "bucket_name": "b", "object_key": "games/001.parquet"}"#;
        let events = TriggerEvent::from_json(json).unwrap();
        assert_eq!(events, vec![TriggerEvent::new("manual", "b", "games/001.parquet")]);
    }

    #[test]
    fn test_empty_records() {
        let err = TriggerEvent::from_json(r#"{"Records": []}"#).unwrap_err();
        assert!(matches!(err, EventError::NoRecords));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(TriggerEvent::from_json("{"), Err(EventError::Json(_))));
        assert!(TriggerEvent::from_json(r#"{"unrelated": 1}"#).is_err());
    }
}
