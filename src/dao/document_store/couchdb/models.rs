use serde::Deserialize;
use serde_json::{Map, Value};

use crate::dao::document_store::{Document, Revision};

/// Upper bound appended to a key prefix for `_all_docs` range scans.
pub const END_SUFFIX: &str = "\u{ffff}";
const ID_FIELD: &str = "_id";
const REV_FIELD: &str = "_rev";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Body returned by `PUT`/`DELETE` on a document.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
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
}

/// CouchDB 1.x reports sequences as numbers, 2.x+ as opaque strings.
pub fn seq_to_string(seq: &Value) -> String {
    match seq {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

/// Percent-encode a document path so `/` separators survive as part of the id.
pub fn encode_doc_id(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Split a raw CouchDB body into the store-neutral [`Document`] shape.
pub fn into_document(path: &str, mut raw: Value) -> Option<Document> {
    let fields = raw.as_object_mut()?;
    let revision = match fields.remove(REV_FIELD) {
        Some(Value::String(rev)) => rev,
        _ => return None,
    };
    fields.remove(ID_FIELD);
    Some(Document {
        path: path.to_string(),
        revision: Revision(revision),
        data: raw,
    })
}

/// Attach `_id` (and `_rev` when updating) to a body before writing it back.
pub fn into_body(path: &str, data: Value, revision: Option<&Revision>) -> Value {
    let mut fields = match data {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    fields.insert(ID_FIELD.into(), Value::String(path.to_string()));
    if let Some(revision) = revision {
        fields.insert(REV_FIELD.into(), Value::String(revision.0.clone()));
    }
    Value::Object(fields)
}
