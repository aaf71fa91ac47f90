//! Session entity

use serde::{Deserialize, Serialize};

use super::metadata::Metadata;
use super::current_time_micros;

/// A user conversation session
///
/// Keyed by (user_id, session_id); both are immutable once the session
/// exists. `update_time` advances only through [`Session::refresh_update_time`]
/// or an explicit set, never implicitly on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub session_id: String,

    /// Microsecond timestamp of the last explicit refresh
    pub update_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_content: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Session {
    /// Create a session stamped with the current time
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::with_time(user_id, session_id, current_time_micros())
    }

    pub fn with_time(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        update_time: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            update_time,
            search_content: None,
            metadata: Metadata::new(),
        }
    }

    pub fn full(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        update_time: i64,
        search_content: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            update_time,
            search_content,
            metadata,
        }
    }

    /// Advance update_time to now (microseconds)
    pub fn refresh_update_time(&mut self) {
        self.update_time = current_time_micros();
    }
}
