use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value};

use crate::dao::models::{SessionPin, SessionRecord};

use super::error::{CouchDaoError, CouchResult};

pub const SESSION_PREFIX: &str = "session::";

pub fn session_doc_id(pin: &SessionPin) -> String {
    format!("{SESSION_PREFIX}{pin}")
}

/// Session record as persisted, wrapped with CouchDB bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionRecord,
}

impl CouchSessionDocument {
    pub fn new(pin: &SessionPin, session: SessionRecord) -> Self {
        Self {
            id: session_doc_id(pin),
            rev: None,
            session,
        }
    }
}

/// Minimal view used when only the revision matters.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Value>,
}

impl ChangeRow {
    /// Decode the embedded document; deletions map to `None`.
    pub fn into_session(self) -> CouchResult<Option<SessionRecord>> {
        if self.deleted {
            return Ok(None);
        }
        let Some(doc) = self.doc else {
            return Ok(None);
        };
        from_value::<CouchSessionDocument>(doc)
            .map(|doc| Some(doc.session))
            .map_err(|source| CouchDaoError::DeserializeValue {
                path: self.id,
                source,
            })
    }
}

/// Render a sequence token as the `since` query parameter.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(seq) => seq.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_flattens_session_fields_next_to_couch_metadata() {
        let pin: SessionPin = "123456".parse().unwrap();
        let record = SessionRecord::new_lobby(
            "host",
            "quiz",
            crate::dao::models::QuizSnapshot {
                title: "Quiz".into(),
                questions: vec![],
            },
        );
        let value = serde_json::to_value(CouchSessionDocument::new(&pin, record)).unwrap();

        assert_eq!(value["_id"], "session::123456");
        assert!(value.get("_rev").is_none());
        assert_eq!(value["status"], "LOBBY");
    }

    #[test]
    fn deleted_change_rows_decode_to_none() {
        let row: ChangeRow = serde_json::from_value(json!({
            "id": "session::123456",
            "deleted": true,
            "doc": {"_id": "session::123456", "_rev": "2-x", "_deleted": true}
        }))
        .unwrap();
        assert!(row.into_session().unwrap().is_none());
    }

    #[test]
    fn sequence_tokens_keep_their_raw_form() {
        assert_eq!(seq_param(&json!("12-g1AAAA")), "12-g1AAAA");
        assert_eq!(seq_param(&json!(12)), "12");
    }
}
