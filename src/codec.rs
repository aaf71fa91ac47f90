//! Entity/row codec
//!
//! Maps domain entities to composite keys plus generic column lists and back.
//! Decoding fills reserved attributes from key fields and reserved column
//! names; every other column lands in the metadata map verbatim. Encoding
//! omits empty reserved fields rather than storing empty values, and the
//! update path computes the symmetric difference of the metadata maps so
//! removed keys become explicit column deletions.

use crate::error::{Result, TablememError};
use crate::model::{Message, Session};
use crate::store::{Column, CompositeKey, KeyValue, Row};

/// Reserved column and key-field names
pub mod fields {
    pub const USER_ID: &str = "user_id";
    pub const SESSION_ID: &str = "session_id";
    pub const MESSAGE_ID: &str = "message_id";
    pub const UPDATE_TIME: &str = "update_time";
    pub const CREATE_TIME: &str = "create_time";
    pub const CONTENT: &str = "content";
    pub const SEARCH_CONTENT: &str = "search_content";
}

const SESSION_RESERVED: &[&str] = &[
    fields::USER_ID,
    fields::SESSION_ID,
    fields::UPDATE_TIME,
    fields::SEARCH_CONTENT,
];

const MESSAGE_RESERVED: &[&str] = &[
    fields::SESSION_ID,
    fields::MESSAGE_ID,
    fields::CREATE_TIME,
    fields::CONTENT,
    fields::SEARCH_CONTENT,
];

/// Bidirectional mapping between an entity and its stored row
pub trait RowCodec: Sized + Send + 'static {
    /// Rebuild an entity from key fields and columns; never fails, unknown
    /// columns become metadata
    fn decode_row(key: &CompositeKey, columns: &[Column]) -> Self;

    /// The entity's composite primary key
    fn primary_key(&self) -> CompositeKey;

    /// Columns for a full put; empty reserved fields are omitted
    fn encode_columns(&self) -> Vec<Column>;

    /// Column upserts and deletions turning `previous` into `self`
    fn update_mutation(&self, previous: &Self) -> (Vec<Column>, Vec<String>);

    /// Pre-network validation: key fields present, metadata keys off the
    /// reserved list
    fn validate(&self) -> Result<()>;
}

pub(crate) fn decode<T: RowCodec>(row: &Row) -> T {
    T::decode_row(&row.key, &row.columns)
}

fn key_string(value: &KeyValue) -> String {
    match value {
        KeyValue::Str(s) => s.clone(),
        KeyValue::Int(i) => i.to_string(),
        KeyValue::Min | KeyValue::Max => String::new(),
    }
}

fn key_int(value: &KeyValue) -> i64 {
    match value {
        KeyValue::Int(i) => *i,
        KeyValue::Str(s) => s.parse().unwrap_or(0),
        KeyValue::Min | KeyValue::Max => 0,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn check_metadata_keys(
    metadata: &crate::model::Metadata,
    reserved: &[&str],
    entity: &str,
) -> Result<()> {
    for key in metadata.keys() {
        if reserved.contains(&key) {
            return Err(TablememError::Validation(format!(
                "metadata key '{key}' collides with a reserved {entity} column"
            )));
        }
    }
    Ok(())
}

/// Diff of the open metadata maps: every entry of `next` is an upsert, every
/// key of `previous` missing from `next` is a deletion
fn metadata_diff(
    next: &crate::model::Metadata,
    previous: &crate::model::Metadata,
    upserts: &mut Vec<Column>,
    deletions: &mut Vec<String>,
) {
    for (key, value) in next.iter() {
        upserts.push(Column::new(key, value.clone()));
    }
    for key in previous.keys() {
        if !next.contains_key(key) {
            deletions.push(key.to_string());
        }
    }
}

impl RowCodec for Session {
    fn decode_row(key: &CompositeKey, columns: &[Column]) -> Self {
        let mut session = Session::with_time("", "", 0);
        for (name, value) in key.iter() {
            match name {
                fields::USER_ID => session.user_id = key_string(value),
                fields::SESSION_ID => session.session_id = key_string(value),
                // Secondary-index rows carry update_time as a key field
                fields::UPDATE_TIME => session.update_time = key_int(value),
                _ => {}
            }
        }
        for column in columns {
            match column.name.as_str() {
                fields::UPDATE_TIME => {
                    session.update_time = column.value.as_i64().unwrap_or(0);
                }
                fields::SEARCH_CONTENT => {
                    session.search_content = Some(column.value.as_str_lossy());
                }
                _ => session
                    .metadata
                    .insert_unchecked(column.name.clone(), column.value.clone()),
            }
        }
        session
    }

    fn primary_key(&self) -> CompositeKey {
        CompositeKey::new()
            .field(fields::USER_ID, KeyValue::str(&self.user_id))
            .field(fields::SESSION_ID, KeyValue::str(&self.session_id))
    }

    fn encode_columns(&self) -> Vec<Column> {
        let mut columns = vec![Column::new(fields::UPDATE_TIME, self.update_time)];
        if let Some(content) = non_empty(&self.search_content) {
            columns.push(Column::new(fields::SEARCH_CONTENT, content));
        }
        for (key, value) in self.metadata.iter() {
            columns.push(Column::new(key, value.clone()));
        }
        columns
    }

    fn update_mutation(&self, previous: &Self) -> (Vec<Column>, Vec<String>) {
        let mut upserts = vec![Column::new(fields::UPDATE_TIME, self.update_time)];
        let mut deletions = Vec::new();
        match non_empty(&self.search_content) {
            Some(content) => upserts.push(Column::new(fields::SEARCH_CONTENT, content)),
            None => deletions.push(fields::SEARCH_CONTENT.to_string()),
        }
        metadata_diff(&self.metadata, &previous.metadata, &mut upserts, &mut deletions);
        (upserts, deletions)
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(TablememError::Validation(
                "session user_id must not be empty".to_string(),
            ));
        }
        if self.session_id.is_empty() {
            return Err(TablememError::Validation(
                "session session_id must not be empty".to_string(),
            ));
        }
        check_metadata_keys(&self.metadata, SESSION_RESERVED, "session")
    }
}

impl RowCodec for Message {
    fn decode_row(key: &CompositeKey, columns: &[Column]) -> Self {
        let mut message = Message::with_time("", "", 0);
        for (name, value) in key.iter() {
            match name {
                fields::SESSION_ID => message.session_id = key_string(value),
                fields::MESSAGE_ID => message.message_id = key_string(value),
                fields::CREATE_TIME => message.create_time = key_int(value),
                _ => {}
            }
        }
        for column in columns {
            match column.name.as_str() {
                fields::CONTENT => message.content = Some(column.value.as_str_lossy()),
                fields::SEARCH_CONTENT => {
                    message.search_content = Some(column.value.as_str_lossy());
                }
                _ => message
                    .metadata
                    .insert_unchecked(column.name.clone(), column.value.clone()),
            }
        }
        message
    }

    fn primary_key(&self) -> CompositeKey {
        CompositeKey::new()
            .field(fields::SESSION_ID, KeyValue::str(&self.session_id))
            .field(fields::CREATE_TIME, KeyValue::int(self.create_time))
            .field(fields::MESSAGE_ID, KeyValue::str(&self.message_id))
    }

    fn encode_columns(&self) -> Vec<Column> {
        let mut columns = Vec::new();
        if let Some(content) = non_empty(&self.content) {
            columns.push(Column::new(fields::CONTENT, content));
        }
        if let Some(content) = non_empty(&self.search_content) {
            columns.push(Column::new(fields::SEARCH_CONTENT, content));
        }
        for (key, value) in self.metadata.iter() {
            columns.push(Column::new(key, value.clone()));
        }
        columns
    }

    fn update_mutation(&self, previous: &Self) -> (Vec<Column>, Vec<String>) {
        let mut upserts = Vec::new();
        let mut deletions = Vec::new();
        match non_empty(&self.content) {
            Some(content) => upserts.push(Column::new(fields::CONTENT, content)),
            None => deletions.push(fields::CONTENT.to_string()),
        }
        match non_empty(&self.search_content) {
            Some(content) => upserts.push(Column::new(fields::SEARCH_CONTENT, content)),
            None => deletions.push(fields::SEARCH_CONTENT.to_string()),
        }
        metadata_diff(&self.metadata, &previous.metadata, &mut upserts, &mut deletions);
        (upserts, deletions)
    }

    fn validate(&self) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(TablememError::Validation(
                "message session_id must not be empty".to_string(),
            ));
        }
        if self.message_id.is_empty() {
            return Err(TablememError::Validation(
                "message message_id must not be empty".to_string(),
            ));
        }
        check_metadata_keys(&self.metadata, MESSAGE_RESERVED, "message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip_through_row() {
        let mut msg = Message::with_time("s1", "m1", 123);
        msg.content = Some("hello".to_string());
        msg.metadata.put("meta_long", 9i64).unwrap();
        msg.metadata.put("meta_bytes", b"abc".to_vec()).unwrap();

        let row = Row {
            key: msg.primary_key(),
            columns: msg.encode_columns(),
        };
        let decoded: Message = decode(&row);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_columns_become_metadata() {
        let key = CompositeKey::new()
            .field(fields::SESSION_ID, KeyValue::str("s1"))
            .field(fields::CREATE_TIME, KeyValue::int(5))
            .field(fields::MESSAGE_ID, KeyValue::str("m1"));
        let columns = vec![
            Column::new(fields::CONTENT, "body"),
            Column::new("extra", true),
        ];
        let msg = Message::decode_row(&key, &columns);
        assert_eq!(msg.create_time, 5);
        assert_eq!(msg.content.as_deref(), Some("body"));
        assert_eq!(msg.metadata.get_bool("extra"), Some(true));
    }

    #[test]
    fn test_session_decodes_update_time_from_index_key() {
        let key = CompositeKey::new()
            .field(fields::USER_ID, KeyValue::str("u1"))
            .field(fields::UPDATE_TIME, KeyValue::int(777))
            .field(fields::SESSION_ID, KeyValue::str("s1"));
        let session = Session::decode_row(&key, &[]);
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.update_time, 777);
    }

    #[test]
    fn test_encode_omits_empty_reserved_fields() {
        let mut msg = Message::with_time("s1", "m1", 1);
        msg.content = Some(String::new());
        let columns = msg.encode_columns();
        assert!(columns.is_empty());
    }

    #[test]
    fn test_update_mutation_diffs_metadata() {
        let mut previous = Message::with_time("s1", "m1", 1);
        previous.metadata.put("a", 1i64).unwrap();
        previous.metadata.put("b", 2i64).unwrap();
        let mut next = previous.clone();
        next.metadata.remove("b");
        next.metadata.put("c", 3i64).unwrap();

        let (upserts, deletions) = next.update_mutation(&previous);
        let upsert_names: Vec<&str> = upserts.iter().map(|c| c.name.as_str()).collect();
        assert!(upsert_names.contains(&"a"));
        assert!(upsert_names.contains(&"c"));
        assert!(deletions.contains(&"b".to_string()));
        // Empty content becomes an explicit column deletion
        assert!(deletions.contains(&fields::CONTENT.to_string()));
    }

    #[test]
    fn test_validate_rejects_reserved_metadata_key() {
        let mut session = Session::with_time("u1", "s1", 1);
        session.metadata.put("update_time", 5i64).unwrap();
        assert!(matches!(
            session.validate(),
            Err(TablememError::Validation(_))
        ));

        let msg = Message::with_time("", "m1", 1);
        assert!(msg.validate().is_err());
    }
}
