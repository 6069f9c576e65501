//! Decides whether an object should be processed.

use crate::io::Tag;
use chrono::{DateTime, Utc};

/// Format of the processed-time tag value.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Most tags S3 accepts on one object.
pub const MAX_OBJECT_TAGS: usize = 10;

/// Outcome of checking an object against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Fetch, enrich, store and tag
    Eligible,

    /// Key does not carry the dataset extension
    WrongFormat,

    /// Object already carries the processed tag
    AlreadyProcessed,
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDecision::Eligible => write!(f, "eligible"),
            GateDecision::WrongFormat => write!(f, "wrong format"),
            GateDecision::AlreadyProcessed => write!(f, "already processed"),
        }
    }
}

/// Format and processed-tag check.
#[derive(Debug, Clone)]
pub struct IdempotencyGate {
    extension: String,
    tag_name: String,
}

impl IdempotencyGate {
    pub fn new(extension: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            tag_name: tag_name.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Classify an object from its key and current tags.
    /// The format check always runs first.
    pub fn decide(&self, key: &str, tags: &[Tag]) -> GateDecision {
        if !key.ends_with(&self.extension) {
            return GateDecision::WrongFormat;
        }
        if tags.iter().any(|t| t.key == self.tag_name) {
            return GateDecision::AlreadyProcessed;
        }
        GateDecision::Eligible
    }

    /// Whether the processed tag can still be added to `tags`.
    pub fn has_tag_room(&self, tags: &[Tag]) -> bool {
        tags.iter().filter(|t| t.key != self.tag_name).count() < MAX_OBJECT_TAGS
    }

    /// Tag marking an object as processed at `at`.
    pub fn processed_tag(&self, at: DateTime<Utc>) -> Tag {
        Tag::new(self.tag_name.clone(), at.format(TIMESTAMP_FORMAT).to_string())
    }

    /// `tags` with the processed tag added. Other tags are kept.
    pub fn mark_processed(&self, tags: &[Tag], at: DateTime<Utc>) -> Vec<Tag> {
        let mut marked: Vec<Tag> = tags.iter().filter(|t| t.key != self.tag_name).cloned().collect();
        marked.push(self.processed_tag(at));
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gate() -> IdempotencyGate {
        IdempotencyGate::new(".parquet", "ProcessedTime")
    }

    #[test]
    fn test_eligible() {
        assert_eq!(gate().decide("games/001.parquet", &[]), GateDecision::Eligible);
        assert_eq!(
            gate().decide("games/001.parquet", &[Tag::new("owner", "ingest")]),
            GateDecision::Eligible
        );
    }

    #[test]
    fn test_already_processed() {
        let tags = vec![Tag::new("ProcessedTime", "2024-01-01 00:00:00")];
        assert_eq!(gate().decide("games/001.parquet", &tags), GateDecision::AlreadyProcessed);
    }

    #[test]
    fn test_wrong_format() {
        assert_eq!(gate().decide("games/001.csv", &[]), GateDecision::WrongFormat);
        assert_eq!(gate().decide("games/001.parquet.tmp", &[]), GateDecision::WrongFormat);
        assert_eq!(gate().decide("parquet", &[]), GateDecision::WrongFormat);
    }

    #[test]
    fn test_format_checked_before_tags() {
        let tags = vec![Tag::new("ProcessedTime", "2024-01-01 00:00:00")];
        assert_eq!(gate().decide("games/001.csv", &tags), GateDecision::WrongFormat);
    }

    #[test]
    fn test_processed_tag_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(gate().processed_tag(at), Tag::new("ProcessedTime", "2024-01-01 00:00:00"));
    }

    #[test]
    fn test_tag_room() {
        let mut tags: Vec<Tag> = (0..9).map(|i| Tag::new(format!("t{i}"), "v")).collect();
        assert!(gate().has_tag_room(&tags));

        tags.push(Tag::new("t9", "v"));
        assert!(!gate().has_tag_room(&tags));
    }

    #[test]
    fn test_mark_processed_keeps_other_tags() {
        let at = Utc.with_ymd_and_hms(2024, 6, 30, 12, 5, 9).unwrap();
        let tags = vec![Tag::new("owner", "ingest")];

        let marked = gate().mark_processed(&tags, at);
        assert_eq!(
            marked,
            vec![
                Tag::new("owner", "ingest"),
                Tag::new("ProcessedTime", "2024-06-30 12:05:09"),
            ]
        );
        assert_eq!(gate().decide("k.parquet", &marked), GateDecision::AlreadyProcessed);
    }
}
