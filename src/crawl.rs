//! Crawl orchestration across filter values.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::extract::PageExtractor;
use crate::grid::{GridSelectors, GridSession};
use crate::paginate::{Diagnostics, PaginationConfig, Paginator, Stage, Termination};
use crate::{Dataset, DirectoryError, FilterKind, FilterValue, Result};

/// Default directory start page.
pub const DEFAULT_START_URL: &str = "http://197.13.14.115:90/AnnuairesMedecins/IndexAnnuairesMedecins";

/// Which filter values a crawl walks through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "values", rename_all = "snake_case")]
pub enum FilterScope {
    /// Every specialty listed in the dropdown, applied by selecting it.
    SpecialtyDropdown,
    /// The given regions, applied through the `ville` query parameter.
    Regions(Vec<String>),
    /// The given specialties (GUID and label), applied through the
    /// `strGuidSpecialite` query parameter.
    Specialties(Vec<FilterValue>),
}

/// Settings for a whole crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Directory page hosting the dropdown and grid.
    pub start_url: String,
    /// DOM selectors of the grid.
    pub selectors: GridSelectors,
    /// Per-page timeouts and confirmation strategies.
    pub pagination: PaginationConfig,
    /// Start page navigation.
    pub navigation_timeout_ms: u64,
    /// Dropdown visibility after navigation.
    pub filter_control_timeout_ms: u64,
    /// Network idle after selecting a dropdown option.
    pub filter_idle_timeout_ms: u64,
    /// Grid content replacing the previous filter's rows after a dropdown selection.
    pub filter_change_timeout_ms: u64,
    /// Grid visibility check right after a dropdown selection.
    pub filter_grid_timeout_ms: u64,
    /// Pause after navigating to a filter URL.
    pub filter_settle_ms: u64,
    /// Where failure screenshots are written; disabled when unset.
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_url: DEFAULT_START_URL.to_string(),
            selectors: GridSelectors::default(),
            pagination: PaginationConfig::default(),
            navigation_timeout_ms: 60_000,
            filter_control_timeout_ms: 30_000,
            filter_idle_timeout_ms: 45_000,
            filter_change_timeout_ms: 30_000,
            filter_grid_timeout_ms: 10_000,
            filter_settle_ms: 3_000,
            screenshot_dir: None,
        }
    }
}

impl CrawlConfig {
    /// URL that opens the grid pre-filtered on `filter`.
    pub fn filter_url(&self, filter: &FilterValue) -> String {
        let separator = if self.start_url.contains('?') { '&' } else { '?' };
        match filter.kind {
            FilterKind::Region => format!(
                "{}{}ville={}",
                self.start_url,
                separator,
                urlencoding::encode(&filter.id)
            ),
            FilterKind::Specialty => format!(
                "{}{}strGuidSpecialite=value{}",
                self.start_url,
                separator,
                urlencoding::encode(&filter.id)
            ),
        }
    }
}

/// Per-filter line of a crawl report.
#[derive(Debug, Clone)]
pub struct FilterSummary {
    /// The filter that was scraped.
    pub filter: FilterValue,
    /// Records kept for this filter.
    pub records: usize,
    /// Pages that produced rows.
    pub pages: u32,
    /// How the filter's pass ended.
    pub termination: Termination,
}

/// Everything a crawl produced.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Records in filter, page, row order.
    pub dataset: Dataset,
    /// One entry per filter, in crawl order.
    pub filters: Vec<FilterSummary>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CrawlReport {
    /// Number of filters whose pass ended in an error.
    pub fn failed_filters(&self) -> usize {
        self.filters
            .iter()
            .filter(|f| f.termination.is_failure())
            .count()
    }
}

/// Walks every filter value of a scope through the pagination driver.
pub struct Crawler {
    config: CrawlConfig,
    paginator: Paginator,
    diagnostics: Diagnostics,
}

impl Crawler {
    /// Creates a crawler, validating the configured selectors.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        url::Url::parse(&config.start_url)?;
        let extractor = PageExtractor::new(&config.selectors)?;
        let diagnostics = Diagnostics::new(config.screenshot_dir.clone());
        let paginator = Paginator::new(config.pagination.clone(), extractor)
            .with_diagnostics(diagnostics.clone());
        Ok(Self {
            config,
            paginator,
            diagnostics,
        })
    }

    /// Returns the crawl configuration.
    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Runs a crawl and releases `session` afterwards, whatever the outcome.
    pub async fn run_with<S: GridSession>(
        &self,
        mut session: S,
        scope: &FilterScope,
    ) -> Result<CrawlReport> {
        let result = self.run(&mut session, scope).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close browsing session: {}", e);
        }
        result
    }

    /// Crawls every filter value of `scope` on an open session.
    ///
    /// Only filter discovery can fail the whole crawl. A filter whose pass
    /// errors keeps its partial records and the crawl moves on.
    pub async fn run<S: GridSession + ?Sized>(
        &self,
        session: &mut S,
        scope: &FilterScope,
    ) -> Result<CrawlReport> {
        let start = Instant::now();
        let filters = self.discover(session, scope).await?;
        info!("Crawling {} filter values", filters.len());

        let mut report = CrawlReport::default();
        for (index, filter) in filters.iter().enumerate() {
            info!(
                "===== Filter {}/{}: {} ({}) =====",
                index + 1,
                filters.len(),
                filter.display_name,
                filter.id
            );

            if let Err(e) = self.apply(session, scope, filter).await {
                warn!(filter = %filter.display_name, "Could not apply filter, skipping: {}", e);
                self.diagnostics
                    .capture(session, &format!("{}_apply_error", filter.slug()))
                    .await;
                report.filters.push(FilterSummary {
                    filter: filter.clone(),
                    records: 0,
                    pages: 0,
                    termination: Termination::Failed {
                        page: 1,
                        stage: Stage::GridWait,
                        reason: e.to_string(),
                    },
                });
                continue;
            }

            let outcome = self.paginator.scrape(session, filter).await;
            let count = outcome.records.len();
            report.dataset.extend(outcome.records.into_iter().map(|mut record| {
                filter.tag(&mut record);
                record
            }));
            info!(filter = %filter.display_name, "Collected {} doctors", count);
            report.filters.push(FilterSummary {
                filter: filter.clone(),
                records: count,
                pages: outcome.pages,
                termination: outcome.termination,
            });
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Finished crawl: {} doctors from {} filters ({} failed) in {}ms",
            report.dataset.len(),
            report.filters.len(),
            report.failed_filters(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Resolves the filter values of a scope. Zero values is fatal.
    async fn discover<S: GridSession + ?Sized>(
        &self,
        session: &mut S,
        scope: &FilterScope,
    ) -> Result<Vec<FilterValue>> {
        let filters = match scope {
            FilterScope::SpecialtyDropdown => {
                info!("Navigating to start page: {}", self.config.start_url);
                let opened = async {
                    session
                        .navigate(&self.config.start_url, ms(self.config.navigation_timeout_ms))
                        .await?;
                    session
                        .wait_for_filter_control(ms(self.config.filter_control_timeout_ms))
                        .await
                }
                .await;
                if let Err(e) = opened {
                    error!("Start page or specialty dropdown unavailable: {}", e);
                    self.diagnostics.capture(session, "start_page_error").await;
                    return Err(e);
                }

                session
                    .filter_options()
                    .await
                    .inspect_err(|e| error!("Could not read specialty dropdown: {}", e))?
                    .into_iter()
                    .filter(|option| !option.value.trim().is_empty())
                    .map(|option| {
                        let label = option.text.split_whitespace().collect::<Vec<_>>().join(" ");
                        FilterValue::specialty(option.value.trim(), label)
                    })
                    .collect()
            }
            FilterScope::Regions(names) => names
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(FilterValue::region)
                .collect(),
            FilterScope::Specialties(values) => values.clone(),
        };

        if filters.is_empty() {
            error!("No filter values found, nothing to crawl");
            return Err(DirectoryError::NoFilters);
        }
        Ok(filters)
    }

    /// Applies one filter and waits for the grid to reload.
    async fn apply<S: GridSession + ?Sized>(
        &self,
        session: &mut S,
        scope: &FilterScope,
        filter: &FilterValue,
    ) -> Result<()> {
        match scope {
            FilterScope::SpecialtyDropdown => {
                let before = match session.grid_fingerprint().await {
                    Ok(fingerprint) => fingerprint,
                    Err(e) => {
                        debug!(filter = %filter.display_name, "Grid unreadable before selection: {}", e);
                        None
                    }
                };
                session.select_filter(&filter.id).await?;
                session
                    .wait_for_network_idle(ms(self.config.filter_idle_timeout_ms))
                    .await?;
                // Rows still showing the previous filter must not be read as this one's.
                if let Some(before) = before {
                    session
                        .wait_for_grid_change(&before, ms(self.config.filter_change_timeout_ms))
                        .await?;
                }
                session
                    .wait_for_grid(ms(self.config.filter_grid_timeout_ms))
                    .await?;
            }
            FilterScope::Regions(_) | FilterScope::Specialties(_) => {
                let url = self.config.filter_url(filter);
                info!("Navigating to {}", url);
                session
                    .navigate(&url, ms(self.config.navigation_timeout_ms))
                    .await?;
                if self.config.filter_settle_ms > 0 {
                    tokio::time::sleep(ms(self.config.filter_settle_ms)).await;
                }
            }
        }
        Ok(())
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_config_default() {
        let config = CrawlConfig::default();
        assert_eq!(config.start_url, DEFAULT_START_URL);
        assert_eq!(config.filter_idle_timeout_ms, 45_000);
        assert_eq!(config.filter_change_timeout_ms, 30_000);
        assert!(config.screenshot_dir.is_none());
    }

    #[test]
    fn test_filter_url_region_is_encoded() {
        let config = CrawlConfig::default();
        let url = config.filter_url(&FilterValue::region("Ben Arous"));
        assert_eq!(url, format!("{}?ville=Ben%20Arous", DEFAULT_START_URL));
    }

    #[test]
    fn test_filter_url_specialty() {
        let config = CrawlConfig::default();
        let url = config.filter_url(&FilterValue::specialty(
            "32c20d96-f256-42da-8591-3b5787ee35a0",
            "Gastro-entérologie",
        ));
        assert!(url.ends_with("?strGuidSpecialite=value32c20d96-f256-42da-8591-3b5787ee35a0"));
    }

    #[test]
    fn test_filter_url_appends_to_existing_query() {
        let config = CrawlConfig {
            start_url: "http://localhost/grid?lang=fr".to_string(),
            ..Default::default()
        };
        let url = config.filter_url(&FilterValue::region("Sfax"));
        assert_eq!(url, "http://localhost/grid?lang=fr&ville=Sfax");
    }

    #[test]
    fn test_crawler_rejects_invalid_start_url() {
        let config = CrawlConfig {
            start_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Crawler::new(config),
            Err(DirectoryError::UrlParse(_))
        ));
    }

    #[test]
    fn test_filter_scope_serialization() {
        let scope = FilterScope::Regions(vec!["Bizerte".to_string()]);
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"scope":"regions","values":["Bizerte"]}"#);
        let dropdown: FilterScope =
            serde_json::from_str(r#"{"scope":"specialty_dropdown"}"#).unwrap();
        assert_eq!(dropdown, FilterScope::SpecialtyDropdown);
    }

    #[test]
    fn test_report_failed_filters() {
        let report = CrawlReport {
            filters: vec![
                FilterSummary {
                    filter: FilterValue::region("A"),
                    records: 3,
                    pages: 1,
                    termination: Termination::LastPage,
                },
                FilterSummary {
                    filter: FilterValue::region("B"),
                    records: 0,
                    pages: 0,
                    termination: Termination::Failed {
                        page: 1,
                        stage: Stage::GridWait,
                        reason: "timeout".to_string(),
                    },
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.failed_filters(), 1);
    }
}
