//! Message entity

use serde::{Deserialize, Serialize};

use super::metadata::Metadata;
use super::current_time_micros;

/// A single message inside a session
///
/// Keyed by (session_id, create_time, message_id); create_time is the middle
/// component so scans order by session first, then time. Once assigned (at
/// construction or resolved through the secondary index), create_time is
/// immutable; messages are never re-keyed.
///
/// A `create_time` of 0 means "unknown" and makes lookups fall back to the
/// secondary index. A message legitimately created at the epoch is
/// indistinguishable from one with an unknown time; that boundary case is a
/// known limitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: String,
    pub message_id: String,
    /// Microsecond creation timestamp; 0 = unknown
    pub create_time: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_content: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::with_time(session_id, message_id, current_time_micros())
    }

    pub fn with_time(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        create_time: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            create_time,
            content: None,
            search_content: None,
            metadata: Metadata::new(),
        }
    }

    pub fn full(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        create_time: i64,
        content: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            create_time,
            content,
            search_content: None,
            metadata,
        }
    }
}
