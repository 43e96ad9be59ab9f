use serde::{Deserialize, Serialize};

/// Cross-source identity of a lead: trimmed, lowercased company name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Operator override flag. Only `skip` carries meaning; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideAction {
    Skip,
    Other(String),
    Unset,
}

impl OverrideAction {
    pub fn parse(cell: &str) -> Self {
        let value = cell.trim().to_lowercase();
        if value.is_empty() {
            Self::Unset
        } else if value == "skip" {
            Self::Skip
        } else {
            Self::Other(value)
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}
