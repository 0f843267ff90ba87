//! The change event shape carried over the `ayb_changes` NOTIFY channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Deserialized straight from a trigger's `NOTIFY ayb_changes, '<payload>'`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    pub schema: String,
    pub table: String,
    pub action: Action,
    pub pk: Vec<Value>,
    #[serde(default)]
    pub new_row: Option<Value>,
}

impl ChangeEvent {
    #[must_use]
    pub fn table_key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// What actually goes out over a subscription's outbound queue — the event,
/// serialised once per subscriber that passes the visibility probe.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    pub action: Action,
    pub data: Value,
}
