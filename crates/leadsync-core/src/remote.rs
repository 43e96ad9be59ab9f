//! Records held by the remote CRM-like store and the activity rules guarding their deletion.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(default)]
    pub id: String,
    #[serde(
        default,
        rename = "createdTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            fields,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Text value of a field; numbers and booleans are rendered, null is `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Field names consulted when deciding whether a remote lead has been worked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFields {
    pub activities: String,
    pub notes: String,
    pub stage: String,
    /// Stage value a freshly pushed lead carries.
    pub default_stage: String,
}

impl Default for ActivityFields {
    fn default() -> Self {
        Self {
            activities: "Activities".into(),
            notes: "Notes".into(),
            stage: "Stage".into(),
            default_stage: "Qualified".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ActivitySignal {
    Activities { count: usize },
    Notes,
    Stage { stage: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RemoteAssessment {
    NotFound,
    HasActivity { signals: Vec<ActivitySignal> },
    SafeToDelete,
}

impl ActivityFields {
    /// Every signal of downstream use on `record`.
    ///
    /// A stage other than the default counts as activity even when the lead
    /// was only moved, not worked.
    pub fn signals(&self, record: &RemoteRecord) -> Vec<ActivitySignal> {
        let mut signals = Vec::new();

        let activity_count = match record.fields.get(&self.activities) {
            Some(Value::Array(items)) => items.len(),
            Some(Value::String(s)) if !s.trim().is_empty() => 1,
            Some(Value::Null) | Some(Value::String(_)) | None => 0,
            Some(_) => 1,
        };
        if activity_count > 0 {
            signals.push(ActivitySignal::Activities {
                count: activity_count,
            });
        }

        if record
            .text(&self.notes)
            .is_some_and(|notes| !notes.trim().is_empty())
        {
            signals.push(ActivitySignal::Notes);
        }

        if let Some(stage) = record.text(&self.stage) {
            if !stage.is_empty() && stage != self.default_stage {
                signals.push(ActivitySignal::Stage { stage });
            }
        }

        signals
    }

    /// Classify a fetched record: deletable only with no signal at all.
    pub fn assess(&self, record: Option<&RemoteRecord>) -> RemoteAssessment {
        let Some(record) = record.filter(|r| !r.fields.is_empty()) else {
            return RemoteAssessment::NotFound;
        };
        let signals = self.signals(record);
        if signals.is_empty() {
            RemoteAssessment::SafeToDelete
        } else {
            RemoteAssessment::HasActivity { signals }
        }
    }
}
