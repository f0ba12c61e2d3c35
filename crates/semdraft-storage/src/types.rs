//! Storage-layer types exchanged with draft transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use semdraft_core::ModelId;

use crate::checklist::ChecklistItem;

/// Server-assigned fields returned by a successful draft save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub saved_at: DateTime<Utc>,
    pub version: u64,
    pub checklist: Vec<ChecklistItem>,
}

impl SaveReceipt {
    /// The checklist in the JSON shape stored on the draft.
    pub fn checklist_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.checklist).unwrap_or(serde_json::Value::Null)
    }
}

/// Summary of a stored model (for listing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub id: ModelId,
    pub name: String,
    /// Number of draft saves so far.
    pub version: u64,
    pub saved_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}
