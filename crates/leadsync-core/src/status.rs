//! Lead status as tagged state, with an explicit boundary to the legacy status text.
//!
//! The status column of a sheet holds strings such as `Sent on 2025-07-31 (ID: rec123)`.
//! Operators read them, so the text format is kept byte-compatible; everything inside
//! the engine works on [`LeadStatus`] and converts at the edges.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

const DATE: &str = r"(\d{4}-\d{2}-\d{2})";

static SENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(?i:sent) on {DATE}(?: \(ID: ([^)]+)\))?$")).expect("valid regex")
});
static VERIFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(?i:verified) on {DATE}(?: \(ID: ([^)]+)\))?$")).expect("valid regex")
});
static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^Error on {DATE}$")).expect("valid regex"));
static API_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^API Error on {DATE}$")).expect("valid regex"));
static DELETED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^Deleted from Airtable on {DATE} \(was: (.*)\)$")).expect("valid regex")
});
static IN_PIPELINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^In Pipeline - has activities \(was: (.*)\)$").expect("valid regex")
});
static NOT_FOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Record not found in Airtable \(was: (.*)\)$").expect("valid regex")
});
static REMOTE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ID: ([^)]+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Sent {
        date: NaiveDate,
        remote_id: Option<String>,
    },
    Verified {
        date: NaiveDate,
        remote_id: Option<String>,
    },
    Error {
        date: NaiveDate,
    },
    ApiError {
        date: NaiveDate,
    },
    Deleted {
        date: NaiveDate,
        was: String,
    },
    InPipeline {
        was: String,
    },
    NotFound {
        was: String,
    },
    /// Free text an operator typed, or a format this engine does not write.
    Unrecognized { text: String },
}

impl LeadStatus {
    pub fn sent(date: NaiveDate, remote_id: impl Into<String>) -> Self {
        Self::Sent {
            date,
            remote_id: Some(remote_id.into()),
        }
    }

    pub fn verified(date: NaiveDate, remote_id: impl Into<String>) -> Self {
        Self::Verified {
            date,
            remote_id: Some(remote_id.into()),
        }
    }

    /// Decode a status cell. Never fails: unknown text is kept verbatim.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::Pending;
        }
        if let Some(caps) = SENT_RE.captures(text) {
            if let Some(date) = parse_date(&caps[1]) {
                return Self::Sent {
                    date,
                    remote_id: caps.get(2).map(|m| m.as_str().to_string()),
                };
            }
        }
        if let Some(caps) = VERIFIED_RE.captures(text) {
            if let Some(date) = parse_date(&caps[1]) {
                return Self::Verified {
                    date,
                    remote_id: caps.get(2).map(|m| m.as_str().to_string()),
                };
            }
        }
        if let Some(date) = ERROR_RE.captures(text).and_then(|c| parse_date(&c[1])) {
            return Self::Error { date };
        }
        if let Some(date) = API_ERROR_RE.captures(text).and_then(|c| parse_date(&c[1])) {
            return Self::ApiError { date };
        }
        if let Some(caps) = DELETED_RE.captures(text) {
            if let Some(date) = parse_date(&caps[1]) {
                return Self::Deleted {
                    date,
                    was: caps[2].to_string(),
                };
            }
        }
        if let Some(caps) = IN_PIPELINE_RE.captures(text) {
            return Self::InPipeline {
                was: caps[1].to_string(),
            };
        }
        if let Some(caps) = NOT_FOUND_RE.captures(text) {
            return Self::NotFound {
                was: caps[1].to_string(),
            };
        }
        Self::Unrecognized {
            text: text.to_string(),
        }
    }

    /// Legacy text form written back into the status column.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::Sent { remote_id, .. } | Self::Verified { remote_id, .. } => remote_id.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => Ok(()),
            Self::Sent { date, remote_id } => {
                write!(f, "Sent on {}", date.format("%Y-%m-%d"))?;
                if let Some(id) = remote_id {
                    write!(f, " (ID: {id})")?;
                }
                Ok(())
            }
            Self::Verified { date, remote_id } => {
                write!(f, "Verified on {}", date.format("%Y-%m-%d"))?;
                if let Some(id) = remote_id {
                    write!(f, " (ID: {id})")?;
                }
                Ok(())
            }
            Self::Error { date } => write!(f, "Error on {}", date.format("%Y-%m-%d")),
            Self::ApiError { date } => write!(f, "API Error on {}", date.format("%Y-%m-%d")),
            Self::Deleted { date, was } => write!(
                f,
                "Deleted from Airtable on {} (was: {was})",
                date.format("%Y-%m-%d")
            ),
            Self::InPipeline { was } => write!(f, "In Pipeline - has activities (was: {was})"),
            Self::NotFound { was } => write!(f, "Record not found in Airtable (was: {was})"),
            Self::Unrecognized { text } => f.write_str(text),
        }
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Idempotence guard on raw status text: anything starting with `sent` or
/// `verified` (any case) was already pushed and must not be created again.
pub fn is_already_processed(status_text: &str) -> bool {
    let lower = status_text.to_lowercase();
    lower.starts_with("sent") || lower.starts_with("verified")
}

/// Reconciler candidate check: the trimmed status starts with the literal `Sent on`.
pub fn is_sent_status(status_text: &str) -> bool {
    status_text.trim().starts_with("Sent on")
}

/// Pull the remote identifier out of `... (ID: <token>)`.
pub fn extract_remote_id(status_text: &str) -> Option<&str> {
    REMOTE_ID_RE
        .captures(status_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
