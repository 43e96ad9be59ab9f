//! Ordered header-resolution strategies for columns whose name drifted between sheets.

use serde::{Deserialize, Serialize};

use crate::header::{normalize_header, HeaderMap};

/// One way of locating a column. Strategies are tried in order; the first hit wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// A single exact (normalized) header.
    Exact { name: String },
    /// Known alternative spellings, in preference order.
    Synonyms { names: Vec<String> },
    /// Any header containing every fragment, scanned in column order.
    ContainsAll { fragments: Vec<String> },
    /// Bare last-resort headers such as `action`, scanned in column order.
    BareName { names: Vec<String> },
}

impl ResolveStrategy {
    /// Heuristic tiers can be switched off for a strict layout.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, Self::ContainsAll { .. } | Self::BareName { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Exact { .. } => "exact",
            Self::Synonyms { .. } => "synonym",
            Self::ContainsAll { .. } => "contains-all",
            Self::BareName { .. } => "bare-name",
        }
    }

    fn resolve(&self, map: &HeaderMap) -> Option<(usize, String)> {
        match self {
            Self::Exact { name } => map.get(name).map(|idx| (idx, normalize_header(name))),
            Self::Synonyms { names } => names
                .iter()
                .find_map(|name| map.get(name).map(|idx| (idx, normalize_header(name)))),
            Self::ContainsAll { fragments } => {
                let fragments: Vec<String> =
                    fragments.iter().map(|f| normalize_header(f)).collect();
                map.keys()
                    .find(|key| fragments.iter().all(|f| key.contains(f.as_str())))
                    .and_then(|key| map.get(key).map(|idx| (idx, key.to_string())))
            }
            Self::BareName { names } => {
                let names: Vec<String> = names.iter().map(|n| normalize_header(n)).collect();
                map.keys()
                    .find(|key| names.iter().any(|n| n == key))
                    .and_then(|key| map.get(key).map(|idx| (idx, key.to_string())))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub index: usize,
    pub header: String,
    pub strategy: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnResolver {
    pub strategies: Vec<ResolveStrategy>,
    #[serde(default = "default_true")]
    pub allow_heuristics: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnResolver {
    pub fn new(strategies: Vec<ResolveStrategy>) -> Self {
        Self {
            strategies,
            allow_heuristics: true,
        }
    }

    /// The override-flag chain: exact `airtableaction`, then known spellings,
    /// then any header mentioning both `airtable` and `action`, then bare `action`/`skip`.
    pub fn override_flag() -> Self {
        Self::new(vec![
            ResolveStrategy::Exact {
                name: "airtableaction".into(),
            },
            ResolveStrategy::Synonyms {
                names: vec![
                    "airtable action".into(),
                    "airtableaction".into(),
                    "airtable_action".into(),
                    "action".into(),
                    "skip".into(),
                ],
            },
            ResolveStrategy::ContainsAll {
                fragments: vec!["airtable".into(), "action".into()],
            },
            ResolveStrategy::BareName {
                names: vec!["action".into(), "skip".into()],
            },
        ])
    }

    pub fn strict(mut self) -> Self {
        self.allow_heuristics = false;
        self
    }

    pub fn resolve(&self, map: &HeaderMap) -> Option<ResolvedColumn> {
        self.strategies
            .iter()
            .filter(|s| self.allow_heuristics || !s.is_heuristic())
            .find_map(|s| {
                s.resolve(map).map(|(index, header)| ResolvedColumn {
                    index,
                    header,
                    strategy: s.label(),
                })
            })
    }
}

impl Default for ColumnResolver {
    fn default() -> Self {
        Self::override_flag()
    }
}
