//! Candidate lists handed from reconciliation discovery to the confirmed deletion pass.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A qualify row whose remote counterpart may be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub sheet_row: usize,
    pub company_name: String,
    pub remote_id: String,
    /// Status text at discovery time, quoted back in the rewritten status.
    pub previous_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateList {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source_sheet: String,
    pub to_delete: Vec<Candidate>,
    pub has_activities: Vec<Candidate>,
    pub not_found: Vec<Candidate>,
}

impl CandidateList {
    pub fn new(source_sheet: impl Into<String>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            expires_at: created_at + ttl,
            source_sheet: source_sheet.into(),
            to_delete: Vec::new(),
            has_activities: Vec::new(),
            not_found: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn total(&self) -> usize {
        self.to_delete.len() + self.has_activities.len() + self.not_found.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_relative_to_creation() {
        let created = Utc::now();
        let list = CandidateList::new("GM - Qualify", created, Duration::hours(24));
        assert!(!list.is_expired(created + Duration::hours(23)));
        assert!(list.is_expired(created + Duration::hours(24)));
        assert_eq!(list.total(), 0);
    }
}
