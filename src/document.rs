//! The wire batch exchanged by `/checks/updates` and `/filters/updates`.

use serde::{Deserialize, Serialize};

/// Which changelog stream a request or queue entry belongs to.
///
/// Checks and filtersets replicate independently: separate sequence
/// spaces, separate cursors, separate endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Checks,
    Filters,
}

impl StreamKind {
    /// URL path segment for this stream's updates endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            StreamKind::Checks => "checks",
            StreamKind::Filters => "filters",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// One batch of configuration updates served to a pulling peer.
///
/// `seq` is the highest changelog sequence number actually included in
/// `entities` - not the requested window end. Entities that resolved to
/// deleted or unknown objects are silently dropped, so `seq` can trail
/// the requested `end`. The puller acknowledges `seq` as `prev` on its
/// next request, which retires everything up to it from the server's
/// outbound queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDocument {
    /// Highest sequence number represented by this document.
    pub seq: i64,

    /// Serialized configuration entities, in changelog order.
    #[serde(default)]
    pub entities: Vec<serde_json::Value>,
}

impl ChangeDocument {
    /// A document carrying nothing: `seq = 0`, no entities.
    pub fn empty() -> Self {
        Self {
            seq: 0,
            entities: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_paths() {
        assert_eq!(StreamKind::Checks.path(), "checks");
        assert_eq!(StreamKind::Filters.path(), "filters");
        assert_eq!(StreamKind::Checks.to_string(), "checks");
    }

    #[test]
    fn test_empty_document() {
        let doc = ChangeDocument::empty();
        assert_eq!(doc.seq, 0);
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }

    #[test]
    fn test_document_json_shape() {
        let doc = ChangeDocument {
            seq: 42,
            entities: vec![serde_json::json!({"id": "abc", "name": "ping"})],
        };
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: ChangeDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seq, 42);
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_document_missing_entities_defaults_empty() {
        let parsed: ChangeDocument = serde_json::from_str(r#"{"seq": 7}"#).unwrap();
        assert_eq!(parsed.seq, 7);
        assert!(parsed.is_empty());
    }
}
