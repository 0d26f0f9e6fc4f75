//! Browsing-context abstraction over the paginated directory grid.
//!
//! The crawl only needs a handful of capabilities from the target site: apply a
//! filter, tell when the grid is loaded, hand over the current page's table
//! markup, and report whether the "next page" control is usable. `GridSession`
//! captures exactly those so the pagination logic can be driven by a real
//! browser or by a scripted fake in tests.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Result;

/// CSS selectors for the DevExpress grid and its surrounding controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSelectors {
    /// The filter dropdown (`<select>`).
    pub dropdown: String,
    /// The grid's main table.
    pub table: String,
    /// A data row inside the table.
    pub data_row: String,
    /// A data cell inside a row.
    pub cell: String,
    /// The bottom pager container.
    pub pager: String,
    /// The pager's "Page X of Y" summary.
    pub pager_summary: String,
    /// The clickable "next page" control.
    pub next_button: String,
    /// Class the grid toolkit puts on a rendered but disabled pager button.
    pub disabled_class: String,
}

impl Default for GridSelectors {
    fn default() -> Self {
        Self {
            dropdown: "#GuidSpecialite".to_string(),
            table: "#MedecinNPGSGridView_DXMainTable".to_string(),
            data_row: "tr.dxgvDataRow_MetropolisBlue".to_string(),
            cell: "td.dxgv".to_string(),
            pager: "#MedecinNPGSGridView_DXPagerBottom".to_string(),
            pager_summary: "#MedecinNPGSGridView_DXPagerBottom b.dxp-summary".to_string(),
            next_button: "#MedecinNPGSGridView_DXPagerBottom a.dxp-button:has(img[alt='Next'])"
                .to_string(),
            disabled_class: "dxp-disabledButton".to_string(),
        }
    }
}

/// One strategy for confirming that the grid refreshed after a page change.
///
/// The pagination driver tries its configured strategies in order until one
/// succeeds. `Delay` always succeeds, so it is the natural last resort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Confirmation {
    /// Wait until the pager's "Page X of Y" prefix differs from the pre-click value.
    PagerChange {
        /// Maximum time to wait in milliseconds.
        timeout_ms: u64,
    },
    /// Wait until network activity settles.
    NetworkIdle {
        /// Maximum time to wait in milliseconds.
        timeout_ms: u64,
    },
    /// Sleep for a fixed grace period.
    Delay {
        /// Milliseconds to sleep.
        ms: u64,
    },
}

impl Confirmation {
    /// The default chain: pager text change, then network idle, then a grace delay.
    pub fn default_chain() -> Vec<Confirmation> {
        vec![
            Confirmation::PagerChange { timeout_ms: 30_000 },
            Confirmation::NetworkIdle { timeout_ms: 25_000 },
            Confirmation::Delay { ms: 5_000 },
        ]
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Confirmation::PagerChange { .. } => "pager-change",
            Confirmation::NetworkIdle { .. } => "network-idle",
            Confirmation::Delay { .. } => "delay",
        }
    }
}

/// An option read from the filter dropdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    /// The option's `value` attribute.
    pub value: String,
    /// The option's visible text.
    pub text: String,
}

/// A live browsing context positioned on the directory grid.
///
/// All waits are bounded by the timeout passed in; an expired wait returns
/// [`DirectoryError::Timeout`](crate::DirectoryError::Timeout).
#[async_trait]
pub trait GridSession: Send {
    /// Navigates to `url` and waits for the load event.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Waits until the filter dropdown is visible.
    async fn wait_for_filter_control(&mut self, timeout: Duration) -> Result<()>;

    /// Reads every option of the filter dropdown, in document order.
    async fn filter_options(&mut self) -> Result<Vec<FilterOption>>;

    /// Selects the dropdown option with the given value and fires its change event.
    async fn select_filter(&mut self, value: &str) -> Result<()>;

    /// Waits until the grid table is visible.
    async fn wait_for_grid(&mut self, timeout: Duration) -> Result<()>;

    /// Returns the pager summary text, or `None` when no pager is visible.
    async fn pager_summary(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Returns the markup of the grid table.
    async fn grid_html(&mut self, timeout: Duration) -> Result<String>;

    /// True when the next-page control is both visible and enabled.
    async fn next_page_enabled(&mut self, timeout: Duration) -> Result<bool>;

    /// Clicks the next-page control.
    async fn click_next_page(&mut self, timeout: Duration) -> Result<()>;

    /// Waits until the pager summary prefix differs from `previous_prefix`.
    async fn wait_for_pager_change(&mut self, previous_prefix: &str, timeout: Duration)
        -> Result<()>;

    /// Waits until network activity settles.
    async fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<()>;

    /// Text identifying what the grid currently shows: the pager summary
    /// followed by the text of every data row. `None` when no data row is
    /// rendered.
    async fn grid_fingerprint(&mut self) -> Result<Option<String>>;

    /// Waits until [`grid_fingerprint`](Self::grid_fingerprint) no longer
    /// returns `previous`. A grid that empties counts as changed.
    async fn wait_for_grid_change(&mut self, previous: &str, timeout: Duration) -> Result<()>;

    /// Saves a screenshot of the current page.
    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    /// Releases the browsing context. Calling it twice is harmless.
    async fn close(&mut self) -> Result<()>;
}

/// Returns the "Page X of Y" part of a pager summary.
///
/// The trailing parenthesised item count can change independently of the
/// page, so only the prefix is compared when detecting a page change.
pub fn pager_prefix(summary: &str) -> &str {
    summary.split('(').next().unwrap_or_default().trim()
}

/// Parsed form of a pager summary such as `Page 2 of 14 (270 items)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerSummary {
    /// Current page (1-based).
    pub page: u32,
    /// Total number of pages.
    pub pages: u32,
    /// Total number of items, when the summary includes it.
    pub items: Option<u32>,
}

impl PagerSummary {
    /// Parses a pager summary, returning `None` if it has no page numbers.
    pub fn parse(summary: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"(?i)page\s+(\d+)\s+(?:of|sur|de)\s+(\d+)(?:\s*\((\d+))?")
                .expect("valid pager pattern")
        });
        let caps = pattern.captures(summary)?;
        Some(Self {
            page: caps.get(1)?.as_str().parse().ok()?,
            pages: caps.get(2)?.as_str().parse().ok()?,
            items: caps.get(3).and_then(|m| m.as_str().parse().ok()),
        })
    }

    /// True when this is the last page.
    pub fn is_last(&self) -> bool {
        self.page >= self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors_default() {
        let selectors = GridSelectors::default();
        assert_eq!(selectors.table, "#MedecinNPGSGridView_DXMainTable");
        assert_eq!(selectors.data_row, "tr.dxgvDataRow_MetropolisBlue");
        assert!(selectors.pager_summary.starts_with(&selectors.pager));
        assert!(selectors.next_button.contains("alt='Next'"));
    }

    #[test]
    fn test_selectors_partial_deserialization() {
        let json = r##"{"table":"#grid"}"##;
        let selectors: GridSelectors = serde_json::from_str(json).unwrap();
        assert_eq!(selectors.table, "#grid");
        assert_eq!(selectors.cell, "td.dxgv");
    }

    #[test]
    fn test_confirmation_default_chain_order() {
        let chain = Confirmation::default_chain();
        let names: Vec<_> = chain.iter().map(Confirmation::name).collect();
        assert_eq!(names, vec!["pager-change", "network-idle", "delay"]);
        assert!(matches!(chain[2], Confirmation::Delay { ms: 5000 }));
    }

    #[test]
    fn test_confirmation_serialization() {
        let json = serde_json::to_string(&Confirmation::NetworkIdle { timeout_ms: 500 }).unwrap();
        assert_eq!(json, r#"{"strategy":"network_idle","timeout_ms":500}"#);
        let parsed: Confirmation = serde_json::from_str(r#"{"strategy":"delay","ms":100}"#).unwrap();
        assert_eq!(parsed, Confirmation::Delay { ms: 100 });
    }

    #[test]
    fn test_pager_prefix_strips_count() {
        assert_eq!(pager_prefix("Page 1 of 14 (270 items)"), "Page 1 of 14");
        assert_eq!(pager_prefix("  Page 3 of 3 "), "Page 3 of 3");
        assert_eq!(pager_prefix(""), "");
    }

    #[test]
    fn test_pager_summary_parse() {
        let summary = PagerSummary::parse("Page 2 of 14 (270 items)").unwrap();
        assert_eq!(summary.page, 2);
        assert_eq!(summary.pages, 14);
        assert_eq!(summary.items, Some(270));
        assert!(!summary.is_last());
    }

    #[test]
    fn test_pager_summary_parse_without_items() {
        let summary = PagerSummary::parse("Page 5 of 5").unwrap();
        assert_eq!(summary.items, None);
        assert!(summary.is_last());
    }

    #[test]
    fn test_pager_summary_parse_garbage() {
        assert!(PagerSummary::parse("Loading...").is_none());
    }
}
