//! Match engine: filters directory records against search criteria.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::fuzz::{Score, Scorer};
use crate::{DoctorRecord, RecordField};

/// Practice mode a record must carry to be returned by a search.
pub const DEFAULT_REQUIRED_MODE: &str = "Médecin de Libre Pratique";

/// How strictly the practice-mode gate compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Case-insensitive equality.
    #[default]
    Exact,
    /// Case-insensitive containment of the required value.
    Contains,
}

/// Configuration for a [`MatchEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Required practice mode.
    #[serde(default = "default_required_mode")]
    pub required_mode: String,
    /// Gate strictness.
    #[serde(default)]
    pub gate: GateMode,
    /// Minimum name score (0–100).
    #[serde(default = "default_threshold")]
    pub threshold: Score,
    /// Scorer used for the name criterion.
    #[serde(default)]
    pub scorer: Scorer,
}

fn default_required_mode() -> String {
    DEFAULT_REQUIRED_MODE.to_string()
}

fn default_threshold() -> Score {
    90
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            required_mode: default_required_mode(),
            gate: GateMode::Exact,
            threshold: default_threshold(),
            scorer: Scorer::TokenSetRatio,
        }
    }
}

impl MatchConfig {
    /// Settings used by list searches: substring gate, threshold 85.
    pub fn list() -> Self {
        Self {
            gate: GateMode::Contains,
            threshold: 85,
            ..Default::default()
        }
    }

    /// Settings used by existence checks: exact gate, threshold 90.
    pub fn existence() -> Self {
        Self::default()
    }

    /// Sets the gate strictness.
    pub fn with_gate(mut self, gate: GateMode) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the name threshold.
    pub fn with_threshold(mut self, threshold: Score) -> Self {
        self.threshold = threshold.min(100);
        self
    }

    /// Sets the required practice mode.
    pub fn with_required_mode(mut self, mode: impl Into<String>) -> Self {
        self.required_mode = mode.into();
        self
    }
}

/// Optional search criteria. Absent or blank values do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    /// Fuzzy-matched against the full name.
    pub name: Option<String>,
    /// Case-insensitive exact specialty.
    pub specialty: Option<String>,
    /// Case-insensitive exact region; `governorate` is accepted on input.
    #[serde(alias = "governorate")]
    pub region: Option<String>,
}

impl SearchCriteria {
    /// Criteria matching every gated record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name criterion.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the specialty criterion.
    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    /// Sets the region criterion.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// A record paired with its score, as returned by [`MatchEngine::suggest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    /// First record in store order carrying the suggested value.
    pub record: DoctorRecord,
    /// Similarity of the query to the record's field, 0–100.
    pub score: Score,
}

/// Applies the practice-mode gate, fuzzy name and exact specialty/region filters.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    config: MatchConfig,
    required_lower: String,
}

impl MatchEngine {
    /// Creates an engine with the given settings.
    pub fn new(config: MatchConfig) -> Self {
        let required_lower = config.required_mode.trim().to_lowercase();
        Self {
            config,
            required_lower,
        }
    }

    /// Returns the engine settings.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// True when `record` passes every gate for `criteria`.
    pub fn matches(&self, record: &DoctorRecord, criteria: &SearchCriteria) -> bool {
        self.passes_gate(record)
            && self.name_matches(record, criteria.name.as_deref())
            && exact_matches(&record.specialty, criteria.specialty.as_deref())
            && exact_matches(&record.region, criteria.region.as_deref())
    }

    /// Every matching record, in store order.
    pub fn query(&self, records: &[DoctorRecord], criteria: &SearchCriteria) -> Vec<DoctorRecord> {
        records
            .iter()
            .filter(|r| self.matches(r, criteria))
            .cloned()
            .collect()
    }

    /// True if any record matches; stops at the first hit.
    pub fn exists(&self, records: &[DoctorRecord], criteria: &SearchCriteria) -> bool {
        records.iter().any(|r| self.matches(r, criteria))
    }

    /// Ranked suggestions for a single field.
    ///
    /// Scores `query` against `field` of every record with `scorer`, keeps the
    /// ones at or above `cutoff` and returns at most `limit`, best first. Ties
    /// keep store order. A field value is suggested once, case and surrounding
    /// whitespace aside, through its first record. The practice-mode gate is
    /// not applied.
    pub fn suggest(
        records: &[DoctorRecord],
        field: RecordField,
        query: &str,
        scorer: Scorer,
        cutoff: Score,
        limit: usize,
    ) -> Vec<Suggestion> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut scored: Vec<Suggestion> = records
            .iter()
            .filter_map(|record| {
                let value = record.field(field).trim().to_lowercase();
                if value.is_empty() || !seen.insert(value.clone()) {
                    return None;
                }
                let score = scorer.score(&query, &value);
                (score >= cutoff).then(|| Suggestion {
                    record: record.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(limit);
        scored
    }

    fn passes_gate(&self, record: &DoctorRecord) -> bool {
        let mode = record.practice_mode.trim().to_lowercase();
        match self.config.gate {
            GateMode::Exact => mode == self.required_lower,
            GateMode::Contains => mode.contains(&self.required_lower),
        }
    }

    fn name_matches(&self, record: &DoctorRecord, name: Option<&str>) -> bool {
        let query = match non_blank(name) {
            Some(q) => q.to_lowercase(),
            None => return true,
        };
        if record.full_name.is_empty() {
            return false;
        }
        let score = self
            .config
            .scorer
            .score(&query, &record.full_name.to_lowercase());
        score >= self.config.threshold
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn exact_matches(field: &str, criterion: Option<&str>) -> bool {
    match non_blank(criterion) {
        Some(wanted) => field.trim().to_lowercase() == wanted.to_lowercase(),
        None => true,
    }
}
