//! Form records and remote payload validation
//!
//! Remote payloads are checked explicitly before anything is built from
//! them. A payload either validates into a [`FormPayload`] or is rejected
//! with [`Error::Validation`] naming the reason.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A cached form, mirrored from the remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRecord {
    /// Remote form identifier (0 is valid)
    pub id: u64,
    pub title: String,
    /// Number of submissions/entries the form has collected
    pub entry_count: u64,
    pub is_active: bool,
    pub is_trash: bool,
    /// When this record was last refreshed from the remote service
    pub last_synced: DateTime<Utc>,
    /// The original payload, kept verbatim for downstream consumers
    pub raw_data: Value,
}

impl FormRecord {
    /// Create a new active record with minimal required fields
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id,
            raw_data: serde_json::json!({ "id": id.to_string(), "title": title }),
            title,
            entry_count: 0,
            is_active: true,
            is_trash: false,
            last_synced: Utc::now(),
        }
    }

    /// Validate a raw payload and build a record stamped with `synced_at`
    pub fn from_payload(raw: &Value, synced_at: DateTime<Utc>) -> Result<Self> {
        Ok(FormPayload::validate(raw)?.into_record(raw.clone(), synced_at))
    }

    /// Time elapsed since the record was last synced
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_synced)
    }
}

/// Remote status of a form, as reported in its `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormStatus {
    Enabled,
    Disabled,
    Deleted,
}

impl FormStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ENABLED" | "ACTIVE" => Some(FormStatus::Enabled),
            "DISABLED" | "INACTIVE" => Some(FormStatus::Disabled),
            "DELETED" | "TRASH" | "TRASHED" => Some(FormStatus::Deleted),
            _ => None,
        }
    }
}

/// The fields of a remote payload that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPayload {
    pub id: u64,
    pub title: String,
    pub entry_count: u64,
    pub status: FormStatus,
    /// Explicit `is_active`/`isActive` flag; overrides `status`
    pub active_flag: Option<bool>,
    /// Explicit `is_trash`/`isTrash` flag; overrides `status`
    pub trash_flag: Option<bool>,
}

impl FormPayload {
    /// Check that `raw` is an object bearing a usable `id` and `title`.
    pub fn validate(raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| Error::Validation(format!("expected a form object, got {}", type_name(raw))))?;

        let id = match obj.get("id") {
            Some(v) => parse_u64(v)
                .ok_or_else(|| Error::Validation(format!("unparseable form id: {}", v)))?,
            None => return Err(Error::Validation("form payload has no id".to_string())),
        };

        let title = match obj.get("title") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "form {} has a non-string title: {}",
                    id, other
                )));
            }
            None => return Err(Error::Validation(format!("form {} has no title", id))),
        };

        let entry_count = entry_count(obj)
            .ok_or_else(|| Error::Validation(format!("form {} has an unparseable entry count", id)))?;

        let status = match obj.get("status") {
            None | Some(Value::Null) => FormStatus::Enabled,
            Some(Value::String(s)) => FormStatus::parse(s)
                .ok_or_else(|| Error::Validation(format!("form {} has unknown status {:?}", id, s)))?,
            Some(other) => {
                return Err(Error::Validation(format!(
                    "form {} has a non-string status: {}",
                    id, other
                )));
            }
        };

        let active_flag = flag(obj, ["is_active", "isActive"])
            .map_err(|v| Error::Validation(format!("form {} has an unreadable active flag: {}", id, v)))?;
        let trash_flag = flag(obj, ["is_trash", "isTrash"])
            .map_err(|v| Error::Validation(format!("form {} has an unreadable trash flag: {}", id, v)))?;

        Ok(Self {
            id,
            title,
            entry_count,
            status,
            active_flag,
            trash_flag,
        })
    }

    /// Trashed forms are never active unless the payload says so explicitly
    pub fn is_trash(&self) -> bool {
        self.trash_flag.unwrap_or(self.status == FormStatus::Deleted)
    }

    pub fn is_active(&self) -> bool {
        self.active_flag
            .unwrap_or(self.status == FormStatus::Enabled && !self.is_trash())
    }

    pub fn into_record(self, raw_data: Value, synced_at: DateTime<Utc>) -> FormRecord {
        FormRecord {
            id: self.id,
            is_active: self.is_active(),
            is_trash: self.is_trash(),
            title: self.title,
            entry_count: self.entry_count,
            last_synced: synced_at,
            raw_data,
        }
    }
}

/// Validate the listing endpoint's response.
///
/// The whole response is rejected unless it is an array whose every entry
/// is a valid form object.
pub fn validate_active_list(raw: &Value) -> Result<Vec<FormPayload>> {
    let entries = raw.as_array().ok_or_else(|| {
        Error::Validation(format!(
            "active form list is not an array (got {})",
            type_name(raw)
        ))
    })?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            FormPayload::validate(entry)
                .map_err(|e| Error::Validation(format!("active list entry {}: {}", i, e)))
        })
        .collect()
}

fn entry_count(obj: &Map<String, Value>) -> Option<u64> {
    ["count", "entry_count", "entryCount"]
        .iter()
        .find_map(|key| obj.get(*key))
        .map_or(Some(0), parse_u64)
}

/// First present flag among `keys`. Booleans, 0/1 and "0"/"1" (also
/// "true"/"false") are accepted; anything else is returned as the error.
fn flag<'v>(obj: &'v Map<String, Value>, keys: [&str; 2]) -> std::result::Result<Option<bool>, &'v Value> {
    let Some(v) = keys.iter().find_map(|key| obj.get(*key)) else {
        return Ok(None);
    };
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(v),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "0" | "false" => Ok(Some(false)),
            "1" | "true" => Ok(Some(true)),
            _ => Err(v),
        },
        _ => Err(v),
    }
}

/// Accept both JSON numbers and numeric strings ("241234")
fn parse_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
