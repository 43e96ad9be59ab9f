//! Environment configuration, the YAML workbook layout, and call pacing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use leadsync_core::{ActivityFields, ColumnResolver, HeaderMap};
use leadsync_storage::{AirtableConfig, BackoffPolicy, SlidingWindowLimiter, DEFAULT_API_URL};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workbook_path: PathBuf,
    pub state_dir: PathBuf,
    pub layout_path: PathBuf,
    pub airtable_api_key: Option<String>,
    pub airtable_base_id: Option<String>,
    pub airtable_api_url: String,
    pub http_timeout_secs: u64,
    pub rate_max_calls: usize,
    pub rate_window_ms: u64,
    pub lock_wait_secs: u64,
    /// A lock file older than this is treated as left behind by a crashed run.
    pub lock_stale_secs: u64,
    pub candidate_ttl_hours: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workbook_path: PathBuf::from("./workbook.json"),
            state_dir: PathBuf::from("./state"),
            layout_path: PathBuf::from("./leadsync.yaml"),
            airtable_api_key: None,
            airtable_base_id: None,
            airtable_api_url: DEFAULT_API_URL.to_string(),
            http_timeout_secs: 20,
            rate_max_calls: 5,
            rate_window_ms: 1000,
            lock_wait_secs: 10,
            lock_stale_secs: 1800,
            candidate_ttl_hours: 24,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workbook_path: env_nonempty("LEADSYNC_WORKBOOK")
                .map(PathBuf::from)
                .unwrap_or(defaults.workbook_path),
            state_dir: env_nonempty("LEADSYNC_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            layout_path: env_nonempty("LEADSYNC_LAYOUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.layout_path),
            airtable_api_key: env_nonempty("AIRTABLE_API_KEY"),
            airtable_base_id: env_nonempty("AIRTABLE_BASE_ID"),
            airtable_api_url: env_nonempty("AIRTABLE_API_URL").unwrap_or(defaults.airtable_api_url),
            http_timeout_secs: env_parsed("LEADSYNC_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            rate_max_calls: env_parsed("LEADSYNC_RATE_MAX_CALLS").unwrap_or(defaults.rate_max_calls),
            rate_window_ms: env_parsed("LEADSYNC_RATE_WINDOW_MS").unwrap_or(defaults.rate_window_ms),
            lock_wait_secs: env_parsed("LEADSYNC_LOCK_WAIT_SECS").unwrap_or(defaults.lock_wait_secs),
            lock_stale_secs: env_parsed("LEADSYNC_LOCK_STALE_SECS").unwrap_or(defaults.lock_stale_secs),
            candidate_ttl_hours: env_parsed("LEADSYNC_CANDIDATE_TTL_HOURS")
                .unwrap_or(defaults.candidate_ttl_hours),
        }
    }

    /// Client settings for the hosted store; missing credentials are a configuration failure.
    pub fn airtable(&self) -> Result<AirtableConfig, PipelineError> {
        let api_key = self
            .airtable_api_key
            .clone()
            .ok_or(PipelineError::MissingCredential("AIRTABLE_API_KEY"))?;
        let base_id = self
            .airtable_base_id
            .clone()
            .ok_or(PipelineError::MissingCredential("AIRTABLE_BASE_ID"))?;
        let mut config = AirtableConfig::new(base_id, api_key);
        config.api_url = self.airtable_api_url.clone();
        config.timeout = Duration::from_secs(self.http_timeout_secs);
        config.backoff = BackoffPolicy::default();
        Ok(config)
    }

    pub fn limiter(&self) -> Arc<SlidingWindowLimiter> {
        Arc::new(SlidingWindowLimiter::new(
            self.rate_max_calls,
            Duration::from_millis(self.rate_window_ms),
        ))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("run.lock")
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    pub fn candidate_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.candidate_ttl_hours.max(1))
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.state_dir.join("reports")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetNames {
    pub raw: String,
    pub qualify: String,
    pub archived_leads: String,
    pub legacy: String,
    pub archived_activities: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            raw: "GM - RAW".into(),
            qualify: "GM - Qualify".into(),
            archived_leads: "Archived Leads".into(),
            legacy: "Height".into(),
            archived_activities: "Archived Activities".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    /// Company name in the raw, qualify and legacy sheets.
    pub name: String,
    /// Where the transfer writes skip reasons on the raw sheet.
    pub notes: String,
    /// Raw-sheet flag set once a row was transferred.
    pub sent_to_qualify: String,
    /// Qualify-sheet status text.
    pub status: String,
    /// Company name in the archived-leads sheet, as written by the archiver.
    pub archive_name: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            name: "name".into(),
            notes: "notes".into(),
            sent_to_qualify: "senttoqualify".into(),
            status: "processed".into(),
            archive_name: "Company Name".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLayout {
    pub leads_table: String,
    pub activities_table: String,
    pub company_name_field: String,
    pub source_field: String,
    /// Source value that deprioritises a lead kept because it was already worked.
    pub unqualified_source: String,
    pub date_closed_field: String,
    /// Link field on activities pointing at their lead.
    pub lead_link_field: String,
    pub activity: ActivityFields,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            leads_table: "Leads".into(),
            activities_table: "Activities".into(),
            company_name_field: "Company Name".into(),
            source_field: "Source".into(),
            unqualified_source: "GM - Unqualified".into(),
            date_closed_field: "Date Closed".into(),
            lead_link_field: "Lead".into(),
            activity: ActivityFields::default(),
        }
    }
}

/// Where one outbound field takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum FieldSource {
    /// Cell text, omitted when the column is absent or the cell is blank.
    Column { column: String },
    /// `true` when the cell reads `yes`; omitted only when the column is absent.
    YesNo { column: String },
    Constant { value: String },
    /// The run date as `YYYY-MM-DD`.
    Today,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub remote: String,
    #[serde(flatten)]
    pub source: FieldSource,
}

impl FieldRule {
    fn column(remote: &str, column: &str) -> Self {
        Self {
            remote: remote.into(),
            source: FieldSource::Column {
                column: column.into(),
            },
        }
    }

    fn constant(remote: &str, value: &str) -> Self {
        Self {
            remote: remote.into(),
            source: FieldSource::Constant {
                value: value.into(),
            },
        }
    }
}

pub fn default_field_mapping() -> Vec<FieldRule> {
    vec![
        FieldRule::column("Company Name", "name"),
        FieldRule::column("Phone", "phone"),
        FieldRule::column("Website URL", "websiteurl"),
        FieldRule::column("Industry", "category"),
        FieldRule::column("Email", "extractemail.email"),
        FieldRule {
            remote: "Is Running Ads".into(),
            source: FieldSource::YesNo {
                column: "extractads.isrunningads".into(),
            },
        },
        FieldRule {
            remote: "Date Added".into(),
            source: FieldSource::Today,
        },
        FieldRule::constant("Strategy", "Cold Call"),
        FieldRule::constant("Source", "GM"),
        FieldRule::constant("Stage", "Qualified"),
    ]
}

/// Build the outbound payload for one row.
pub fn build_payload(
    rules: &[FieldRule],
    headers: &HeaderMap,
    row: &[String],
    today: NaiveDate,
) -> Map<String, Value> {
    let cell = |column: &str| -> Option<&str> {
        headers
            .get(column)
            .map(|idx| row.get(idx).map(String::as_str).unwrap_or(""))
    };

    let mut fields = Map::new();
    for rule in rules {
        let value = match &rule.source {
            FieldSource::Column { column } => cell(column)
                .filter(|v| !v.trim().is_empty())
                .map(|v| Value::String(v.to_string())),
            FieldSource::YesNo { column } => {
                cell(column).map(|v| Value::Bool(v.trim().eq_ignore_ascii_case("yes")))
            }
            FieldSource::Constant { value } => {
                Some(value).filter(|v| !v.is_empty()).map(|v| Value::String(v.clone()))
            }
            FieldSource::Today => Some(Value::String(today.format("%Y-%m-%d").to_string())),
        };
        if let Some(value) = value {
            fields.insert(rule.remote.clone(), value);
        }
    }
    fields
}

/// Sheet, column and remote-field names, loaded from YAML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub sheets: SheetNames,
    pub columns: ColumnNames,
    pub remote: RemoteLayout,
    pub override_column: ColumnResolver,
    pub field_mapping: Vec<FieldRule>,
    /// Also reject transfer rows whose name already exists in the remote store.
    pub include_remote_in_qualify: bool,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            sheets: SheetNames::default(),
            columns: ColumnNames::default(),
            remote: RemoteLayout::default(),
            override_column: ColumnResolver::override_flag(),
            field_mapping: default_field_mapping(),
            include_remote_in_qualify: false,
        }
    }
}

impl Layout {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing layout yaml")
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no layout file; using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Fixed sleeps between remote calls, on top of the sliding-window limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between pages of a list call.
    pub page_pause: Duration,
    /// Between bulk create or delete chunks.
    pub chunk_pause: Duration,
    /// Between per-record reconciliation calls.
    pub call_delay: Duration,
    /// After the store signals a rate limit.
    pub rate_limit_backoff: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            page_pause: Duration::from_millis(250),
            chunk_pause: Duration::from_millis(250),
            call_delay: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(5),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            page_pause: Duration::ZERO,
            chunk_pause: Duration::ZERO,
            call_delay: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
        }
    }
}

pub(crate) async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn payload_omits_absent_and_blank_sources() {
        let headers = HeaderMap::from_headers(&["Name", "phone", "websiteurl", "extractads.isrunningads"]);
        let row: Vec<String> = ["Acme Ltd", "", "https://acme.test", "Yes "]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let payload = build_payload(&default_field_mapping(), &headers, &row, d("2025-07-31"));

        assert_eq!(payload.get("Company Name"), Some(&json!("Acme Ltd")));
        assert_eq!(payload.get("Website URL"), Some(&json!("https://acme.test")));
        assert_eq!(payload.get("Is Running Ads"), Some(&json!(true)));
        assert_eq!(payload.get("Date Added"), Some(&json!("2025-07-31")));
        assert_eq!(payload.get("Stage"), Some(&json!("Qualified")));
        assert_eq!(payload.get("Source"), Some(&json!("GM")));
        assert!(!payload.contains_key("Phone"), "blank cell is omitted");
        assert!(!payload.contains_key("Industry"), "absent column is omitted");
        assert!(!payload.contains_key("Email"));
    }

    #[test]
    fn yes_no_column_reads_false_for_anything_but_yes() {
        let headers = HeaderMap::from_headers(&["name", "extractads.isrunningads"]);
        let row = vec!["Acme".to_string(), String::new()];
        let payload = build_payload(&default_field_mapping(), &headers, &row, d("2025-01-01"));
        assert_eq!(payload.get("Is Running Ads"), Some(&json!(false)));
    }

    #[test]
    fn partial_layout_yaml_keeps_other_defaults() {
        let layout = Layout::from_yaml(
            r#"
sheets:
  qualify: "Qualified Leads"
columns:
  status: "Status"
include_remote_in_qualify: true
field_mapping:
  - remote: "Company Name"
    from: column
    column: "company"
  - remote: "Source"
    from: constant
    value: "Import"
"#,
        )
        .expect("layout");

        assert_eq!(layout.sheets.qualify, "Qualified Leads");
        assert_eq!(layout.sheets.raw, "GM - RAW");
        assert_eq!(layout.columns.status, "Status");
        assert_eq!(layout.columns.name, "name");
        assert!(layout.include_remote_in_qualify);
        assert_eq!(layout.field_mapping.len(), 2);
        assert_eq!(layout.override_column, ColumnResolver::override_flag());
        assert_eq!(layout.remote.activity.default_stage, "Qualified");
    }

    #[test]
    fn missing_credentials_fail_remote_configuration() {
        let config = PipelineConfig {
            airtable_base_id: Some("appBase".into()),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.airtable(),
            Err(PipelineError::MissingCredential("AIRTABLE_API_KEY"))
        ));
    }
}
