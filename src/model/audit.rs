use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An append-only audit event (§3, §4.4). `details` is an opaque key/value
/// map the collaborator populates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub principal: String,
    pub details: BTreeMap<String, String>,
    pub own_hash: String,
}
