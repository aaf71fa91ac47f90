//! Store configuration
//!
//! Table and index names are carried in an explicit value object constructed
//! once and passed to every operation. There is no process-wide default state;
//! two stores with different configs can share one backend connection.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_TABLE: &str = "session";
pub const DEFAULT_SESSION_SECONDARY_INDEX: &str = "session_secondary_index";
pub const DEFAULT_SESSION_SEARCH_INDEX: &str = "session_search_index";
pub const DEFAULT_MESSAGE_TABLE: &str = "message";
pub const DEFAULT_MESSAGE_SECONDARY_INDEX: &str = "message_secondary_index";
pub const DEFAULT_MESSAGE_SEARCH_INDEX: &str = "message_search_index";

/// Table and index names used by a [`MemoryStore`](crate::memory::MemoryStore)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub session_table: String,
    pub message_table: String,
    /// Session index ordered by (user_id, update_time, session_id)
    pub session_secondary_index: String,
    /// Message index ordered by (session_id, message_id, create_time)
    pub message_secondary_index: String,
    pub session_search_index: String,
    pub message_search_index: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_table: DEFAULT_SESSION_TABLE.to_string(),
            message_table: DEFAULT_MESSAGE_TABLE.to_string(),
            session_secondary_index: DEFAULT_SESSION_SECONDARY_INDEX.to_string(),
            message_secondary_index: DEFAULT_MESSAGE_SECONDARY_INDEX.to_string(),
            session_search_index: DEFAULT_SESSION_SEARCH_INDEX.to_string(),
            message_search_index: DEFAULT_MESSAGE_SEARCH_INDEX.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn with_session_table(mut self, name: impl Into<String>) -> Self {
        self.session_table = name.into();
        self
    }

    pub fn with_message_table(mut self, name: impl Into<String>) -> Self {
        self.message_table = name.into();
        self
    }

    pub fn with_session_secondary_index(mut self, name: impl Into<String>) -> Self {
        self.session_secondary_index = name.into();
        self
    }

    pub fn with_message_secondary_index(mut self, name: impl Into<String>) -> Self {
        self.message_secondary_index = name.into();
        self
    }

    pub fn with_session_search_index(mut self, name: impl Into<String>) -> Self {
        self.session_search_index = name.into();
        self
    }

    pub fn with_message_search_index(mut self, name: impl Into<String>) -> Self {
        self.message_search_index = name.into();
        self
    }
}
