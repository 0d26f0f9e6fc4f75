//! Pagination driver: walks every page of the grid for one filter value.
//!
//! Each pass is a small state machine:
//!
//! ```text
//! InitialLoad -> PageReady -> Extracted -> NextAvailable -> ClickedNext -> Reload -> PageReady ...
//!                                  \              \
//!                                   Terminal       Terminal
//! ```
//!
//! Failures never escape a pass. Whatever was collected before the failing
//! page is returned alongside a [`Termination`] describing why the pass ended.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::extract::{ExtractedPage, PageExtractor};
use crate::grid::{pager_prefix, Confirmation, GridSession, PagerSummary};
use crate::{DirectoryError, DoctorRecord, FilterValue};

/// Timeouts and confirmation strategies for one pagination pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Grid wait right after a filter was applied (fuller reload).
    pub initial_grid_timeout_ms: u64,
    /// Grid wait after a page change.
    pub page_grid_timeout_ms: u64,
    /// Pause after the grid becomes visible, letting rows render.
    pub settle_ms: u64,
    /// Pager summary lookup.
    pub pager_timeout_ms: u64,
    /// Grid markup retrieval.
    pub grid_html_timeout_ms: u64,
    /// Next-page visibility/enabled probe.
    pub next_probe_timeout_ms: u64,
    /// Next-page click.
    pub click_timeout_ms: u64,
    /// Ordered strategies confirming the grid refreshed after a click.
    pub confirmations: Vec<Confirmation>,
    /// Stop after this many pages, if set.
    pub max_pages: Option<u32>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            initial_grid_timeout_ms: 60_000,
            page_grid_timeout_ms: 30_000,
            settle_ms: 2_000,
            pager_timeout_ms: 5_000,
            grid_html_timeout_ms: 15_000,
            next_probe_timeout_ms: 3_000,
            click_timeout_ms: 15_000,
            confirmations: Confirmation::default_chain(),
            max_pages: None,
        }
    }
}

/// Where diagnostic screenshots go when something fails.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    dir: Option<PathBuf>,
}

impl Diagnostics {
    /// Screenshots are written to `dir`, or skipped when `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Best-effort screenshot; failures are only logged.
    pub async fn capture<S: GridSession + ?Sized>(&self, session: &mut S, name: &str) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            debug!("Cannot create screenshot dir {}: {}", dir.display(), e);
            return;
        }
        let path = dir.join(format!("screenshot_{}.png", name));
        match session.screenshot(&path).await {
            Ok(()) => info!("Saved diagnostic screenshot {}", path.display()),
            Err(e) => debug!("Screenshot {} failed: {}", path.display(), e),
        }
    }
}

/// Ephemeral per-step pagination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    /// Current page, 1-based.
    pub page: u32,
    /// Pager summary seen on the current page, used for change detection.
    pub pager_text: Option<String>,
    /// Set once the pass has ended.
    pub terminal: bool,
}

impl PageState {
    fn new() -> Self {
        Self {
            page: 1,
            pager_text: None,
            terminal: false,
        }
    }

    fn advance(&mut self) {
        self.page += 1;
    }
}

/// Where in a page cycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the grid table.
    GridWait,
    /// Reading or parsing the table.
    Extract,
    /// Probing or clicking the next-page control.
    Pagination,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::GridWait => "table",
            Stage::Extract => "extract",
            Stage::Pagination => "pagination",
        }
    }
}

/// Why a pagination pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The first page had no data rows.
    NoData,
    /// The next-page control was missing, hidden, or disabled.
    LastPage,
    /// A later page came back with no data rows.
    Exhausted,
    /// The configured page cap was reached.
    PageLimit,
    /// An unrecoverable error ended the pass early.
    Failed {
        /// Page being processed.
        page: u32,
        /// Step that failed.
        stage: Stage,
        /// Error description.
        reason: String,
    },
}

impl Termination {
    /// True if the pass ended on an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::NoData => f.write_str("no data"),
            Termination::LastPage => f.write_str("last page"),
            Termination::Exhausted => f.write_str("empty page"),
            Termination::PageLimit => f.write_str("page limit"),
            Termination::Failed {
                page,
                stage,
                reason,
            } => write!(f, "failed at page {} ({}): {}", page, stage.as_str(), reason),
        }
    }
}

/// Result of scraping one filter value.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Records from every page scraped, in page then row order.
    pub records: Vec<DoctorRecord>,
    /// Number of pages that produced rows.
    pub pages: u32,
    /// How the pass ended.
    pub termination: Termination,
}

enum Step {
    InitialLoad,
    Reload,
    PageReady,
    Extracted(ExtractedPage),
    NextAvailable,
    ClickedNext,
}

/// Drives the click-wait-extract cycle for one filter at a time.
pub struct Paginator {
    config: PaginationConfig,
    extractor: PageExtractor,
    diagnostics: Diagnostics,
}

impl Paginator {
    /// Creates a driver with the given timeouts and extractor.
    pub fn new(config: PaginationConfig, extractor: PageExtractor) -> Self {
        Self {
            config,
            extractor,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Enables diagnostic screenshots.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Returns the pagination configuration.
    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Scrapes every page of the currently applied filter.
    ///
    /// The filter must already be applied to `session`. Records are returned
    /// untagged; the caller stamps them with the filter.
    pub async fn scrape<S: GridSession + ?Sized>(
        &self,
        session: &mut S,
        filter: &FilterValue,
    ) -> FilterOutcome {
        let mut records = Vec::new();
        let mut state = PageState::new();
        let mut pages = 0;
        let mut step = Step::InitialLoad;

        let termination = loop {
            step = match step {
                Step::InitialLoad => {
                    debug!(filter = %filter.display_name, "Waiting for grid after filter change");
                    match session
                        .wait_for_grid(ms(self.config.initial_grid_timeout_ms))
                        .await
                    {
                        Ok(()) => Step::PageReady,
                        Err(e) => {
                            break self.fail(session, filter, &state, Stage::GridWait, e).await;
                        }
                    }
                }

                Step::Reload => {
                    debug!(filter = %filter.display_name, page = state.page, "Waiting for grid after pagination");
                    match session
                        .wait_for_grid(ms(self.config.page_grid_timeout_ms))
                        .await
                    {
                        Ok(()) => Step::PageReady,
                        Err(e) => {
                            break self.fail(session, filter, &state, Stage::GridWait, e).await;
                        }
                    }
                }

                Step::PageReady => {
                    if self.config.settle_ms > 0 {
                        tokio::time::sleep(ms(self.config.settle_ms)).await;
                    }
                    state.pager_text = self.read_pager(session).await;

                    match session.grid_html(ms(self.config.grid_html_timeout_ms)).await {
                        Ok(html) => Step::Extracted(self.extractor.extract_page(&html)),
                        Err(e) => {
                            break self.fail(session, filter, &state, Stage::Extract, e).await;
                        }
                    }
                }

                Step::Extracted(page) => {
                    if page.rows == 0 {
                        if state.page == 1 {
                            info!(filter = %filter.display_name, "No doctors listed for filter");
                            break Termination::NoData;
                        }
                        info!(
                            filter = %filter.display_name,
                            page = state.page,
                            "Empty page after page change, assuming end of data"
                        );
                        break Termination::Exhausted;
                    }

                    info!(
                        filter = %filter.display_name,
                        page = state.page,
                        rows = page.rows,
                        records = page.records.len(),
                        "Extracted page"
                    );
                    records.extend(page.records);
                    pages += 1;

                    if self.config.max_pages.is_some_and(|max| state.page >= max) {
                        warn!(filter = %filter.display_name, page = state.page, "Page limit reached");
                        break Termination::PageLimit;
                    }
                    Step::NextAvailable
                }

                Step::NextAvailable => {
                    match session
                        .next_page_enabled(ms(self.config.next_probe_timeout_ms))
                        .await
                    {
                        Ok(true) => {
                            match session.click_next_page(ms(self.config.click_timeout_ms)).await {
                                Ok(()) => Step::ClickedNext,
                                Err(e) => {
                                    break self
                                        .fail(session, filter, &state, Stage::Pagination, e)
                                        .await;
                                }
                            }
                        }
                        Ok(false) => {
                            debug!(filter = %filter.display_name, "Next button not visible or disabled");
                            break Termination::LastPage;
                        }
                        Err(e) if e.is_timeout() => {
                            debug!(filter = %filter.display_name, "Next button probe timed out: {}", e);
                            break Termination::LastPage;
                        }
                        Err(e) => {
                            break self.fail(session, filter, &state, Stage::Pagination, e).await;
                        }
                    }
                }

                Step::ClickedNext => {
                    self.confirm_update(session, state.pager_text.as_deref()).await;
                    state.advance();
                    Step::Reload
                }
            };
        };
        state.terminal = true;

        info!(
            filter = %filter.display_name,
            last_page = state.page,
            terminal = state.terminal,
            pages,
            rows = records.len(),
            termination = %termination,
            "Pagination pass finished"
        );

        FilterOutcome {
            records,
            pages,
            termination,
        }
    }

    async fn read_pager<S: GridSession + ?Sized>(&self, session: &mut S) -> Option<String> {
        match session.pager_summary(ms(self.config.pager_timeout_ms)).await {
            Ok(Some(text)) => {
                match PagerSummary::parse(&text) {
                    Some(summary) => debug!(
                        "Pager: page {} of {} ({:?} items)",
                        summary.page, summary.pages, summary.items
                    ),
                    None => debug!("Pager text: {}", text),
                }
                Some(text)
            }
            Ok(None) => {
                debug!("Pager not visible, assuming single page or relying on next button");
                None
            }
            Err(e) => {
                warn!("Could not read pager summary: {}", e);
                None
            }
        }
    }

    /// Tries each confirmation strategy in order until one succeeds.
    ///
    /// Exhausting every strategy is not an error: the next page is read
    /// anyway, accepting a small risk of stale content over hanging.
    async fn confirm_update<S: GridSession + ?Sized>(
        &self,
        session: &mut S,
        previous_pager: Option<&str>,
    ) {
        for strategy in &self.config.confirmations {
            let outcome = match strategy {
                Confirmation::PagerChange { timeout_ms } => {
                    let Some(previous) = previous_pager else {
                        debug!("No pager text before click, skipping pager-change wait");
                        continue;
                    };
                    session
                        .wait_for_pager_change(pager_prefix(previous), ms(*timeout_ms))
                        .await
                }
                Confirmation::NetworkIdle { timeout_ms } => {
                    session.wait_for_network_idle(ms(*timeout_ms)).await
                }
                Confirmation::Delay { ms: delay } => {
                    tokio::time::sleep(ms(*delay)).await;
                    Ok(())
                }
            };

            match outcome {
                Ok(()) => {
                    debug!("Page change confirmed by {}", strategy.name());
                    return;
                }
                Err(e) => warn!("Confirmation '{}' failed: {}", strategy.name(), e),
            }
        }
        warn!("No confirmation strategy succeeded, reading page anyway");
    }

    async fn fail<S: GridSession + ?Sized>(
        &self,
        session: &mut S,
        filter: &FilterValue,
        state: &PageState,
        stage: Stage,
        error: DirectoryError,
    ) -> Termination {
        warn!(
            filter = %filter.display_name,
            page = state.page,
            stage = stage.as_str(),
            "Pagination pass failed: {}",
            error
        );
        self.diagnostics
            .capture(
                session,
                &format!("{}_page_{}_{}_error", filter.slug(), state.page, stage.as_str()),
            )
            .await;
        Termination::Failed {
            page: state.page,
            stage,
            reason: error.to_string(),
        }
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_config_default() {
        let config = PaginationConfig::default();
        assert_eq!(config.initial_grid_timeout_ms, 60_000);
        assert_eq!(config.page_grid_timeout_ms, 30_000);
        assert!(config.initial_grid_timeout_ms > config.page_grid_timeout_ms);
        assert_eq!(config.confirmations.len(), 3);
        assert!(config.max_pages.is_none());
    }

    #[test]
    fn test_pagination_config_partial_deserialization() {
        let config: PaginationConfig =
            serde_json::from_str(r#"{"settle_ms":0,"max_pages":3}"#).unwrap();
        assert_eq!(config.settle_ms, 0);
        assert_eq!(config.max_pages, Some(3));
        assert_eq!(config.click_timeout_ms, 15_000);
    }

    #[test]
    fn test_page_state_advance() {
        let mut state = PageState::new();
        assert_eq!(state.page, 1);
        state.advance();
        state.advance();
        assert_eq!(state.page, 3);
        assert!(!state.terminal);
    }

    #[test]
    fn test_termination_is_failure() {
        assert!(!Termination::NoData.is_failure());
        assert!(!Termination::LastPage.is_failure());
        assert!(Termination::Failed {
            page: 2,
            stage: Stage::Extract,
            reason: "boom".to_string(),
        }
        .is_failure());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::GridWait.as_str(), "table");
        assert_eq!(Stage::Extract.as_str(), "extract");
        assert_eq!(Stage::Pagination.as_str(), "pagination");
    }
}
