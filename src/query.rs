//! Query service: list and existence searches over the record store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{MatchConfig, MatchEngine, SearchCriteria};
use crate::store::RecordStore;
use crate::{DirectoryError, DoctorRecord, Result};

const NO_DATA: &str = "No data loaded";

/// Page-size bounds for list searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLimits {
    /// Size used when the request gives none.
    pub default_size: usize,
    /// Larger requested sizes are clamped to this.
    pub max_size: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 100,
        }
    }
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: usize,
    /// Items per page, `1..=max_size`.
    pub size: usize,
}

impl PageRequest {
    /// Parses raw `page` / `size` query parameters.
    ///
    /// A missing page means 1 and a page below 1 is raised to 1. A missing
    /// size means the default; a non-positive size is rejected and an
    /// oversized one clamped. Non-integers are rejected.
    pub fn parse(page: Option<&str>, size: Option<&str>, limits: &PageLimits) -> Result<Self> {
        let page = match blank_to_none(page) {
            Some(raw) => parse_int("page", raw)?.max(1) as usize,
            None => 1,
        };

        let size = match blank_to_none(size) {
            Some(raw) => {
                let size = parse_int("size", raw)?;
                if size <= 0 {
                    return Err(DirectoryError::InvalidRequest(
                        "Page size must be a positive integer".to_string(),
                    ));
                }
                (size as usize).min(limits.max_size)
            }
            None => limits.default_size.min(limits.max_size),
        };

        Ok(Self { page, size: size.max(1) })
    }

    /// Start offset into the full match list.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.size)
    }
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_int(name: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>().map_err(|_| {
        DirectoryError::InvalidRequest(format!("Invalid '{}' parameter: must be an integer", name))
    })
}

/// One page of list-search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorPage {
    /// Records on this page, in store order.
    pub doctors: Vec<DoctorRecord>,
    /// 1-based page number that was requested.
    pub current_page: usize,
    /// Page size that was applied.
    pub page_size: usize,
    /// Matches across all pages.
    pub total_items: usize,
    /// `ceil(total_items / page_size)`.
    pub total_pages: usize,
    /// Set when no data is loaded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl DoctorPage {
    /// Slices `matches` according to `request`.
    pub fn slice(matches: Vec<DoctorRecord>, request: PageRequest) -> Self {
        let total_items = matches.len();
        let total_pages = total_items.div_ceil(request.size.max(1));
        let doctors = matches
            .into_iter()
            .skip(request.offset())
            .take(request.size)
            .collect();
        Self {
            doctors,
            current_page: request.page,
            page_size: request.size,
            total_items,
            total_pages,
            message: None,
        }
    }
}

/// Existence-search answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Existence {
    /// True when at least one record matched.
    pub result: bool,
    /// Set when the answer is `false` because no data is loaded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Service health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Human-readable greeting.
    pub message: String,
    /// Always `OK` while the service answers.
    pub status: String,
    /// True when the store holds at least one record.
    pub data_loaded: bool,
    /// Records in the current snapshot.
    pub record_count: usize,
}

/// List and existence searches backed by a shared [`RecordStore`].
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<RecordStore>,
    list_engine: MatchEngine,
    exists_engine: MatchEngine,
    limits: PageLimits,
}

impl QueryService {
    /// Creates a service with the list and existence presets and default limits.
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            list_engine: MatchEngine::new(MatchConfig::list()),
            exists_engine: MatchEngine::new(MatchConfig::existence()),
            limits: PageLimits::default(),
        }
    }

    /// Sets the engine configuration for list searches.
    pub fn with_list_config(mut self, config: MatchConfig) -> Self {
        self.list_engine = MatchEngine::new(config);
        self
    }

    /// Sets the engine configuration for existence searches.
    pub fn with_existence_config(mut self, config: MatchConfig) -> Self {
        self.exists_engine = MatchEngine::new(config);
        self
    }

    /// Sets the page-size bounds.
    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the page-size bounds.
    pub fn limits(&self) -> &PageLimits {
        &self.limits
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Paginated list of matching records.
    pub fn list(&self, criteria: &SearchCriteria, request: PageRequest) -> DoctorPage {
        let records = self.store.snapshot();
        if records.is_empty() {
            let mut page = DoctorPage::slice(Vec::new(), request);
            page.message = Some(NO_DATA.to_string());
            return page;
        }

        let matches = self.list_engine.query(&records, criteria);
        debug!(
            "List search matched {} of {} records (page {}, size {})",
            matches.len(),
            records.len(),
            request.page,
            request.size
        );
        DoctorPage::slice(matches, request)
    }

    /// Parses raw pagination parameters and runs [`list`](Self::list).
    pub fn list_raw(
        &self,
        criteria: &SearchCriteria,
        page: Option<&str>,
        size: Option<&str>,
    ) -> Result<DoctorPage> {
        let request = PageRequest::parse(page, size, &self.limits)?;
        Ok(self.list(criteria, request))
    }

    /// Whether any record matches.
    pub fn exists(&self, criteria: &SearchCriteria) -> Existence {
        let records = self.store.snapshot();
        if records.is_empty() {
            return Existence {
                result: false,
                reason: Some(NO_DATA.to_string()),
            };
        }
        Existence {
            result: self.exists_engine.exists(&records, criteria),
            reason: None,
        }
    }

    /// Health summary with the current record count.
    pub fn status(&self) -> Status {
        let record_count = self.store.len();
        Status {
            message: "Doctor directory API is running".to_string(),
            status: "OK".to_string(),
            data_loaded: record_count > 0,
            record_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_REQUIRED_MODE;

    fn service(count: usize) -> QueryService {
        let records = (0..count)
            .map(|i| {
                DoctorRecord::new(format!("Doctor {}", i))
                    .with_specialty(if i % 2 == 0 { "Cardiologie" } else { "ORL" })
                    .with_practice_mode(DEFAULT_REQUIRED_MODE)
            })
            .collect();
        QueryService::new(Arc::new(RecordStore::from_records(records)))
    }

    fn request(page: usize, size: usize) -> PageRequest {
        PageRequest { page, size }
    }

    #[test]
    fn test_page_request_defaults() {
        let req = PageRequest::parse(None, None, &PageLimits::default()).unwrap();
        assert_eq!(req, request(1, 20));
        let req = PageRequest::parse(Some(""), Some(" "), &PageLimits::default()).unwrap();
        assert_eq!(req, request(1, 20));
    }

    #[test]
    fn test_page_request_clamps() {
        let limits = PageLimits::default();
        assert_eq!(PageRequest::parse(Some("0"), None, &limits).unwrap().page, 1);
        assert_eq!(PageRequest::parse(Some("-3"), None, &limits).unwrap().page, 1);
        assert_eq!(PageRequest::parse(None, Some("500"), &limits).unwrap().size, 100);
        assert_eq!(PageRequest::parse(Some("3"), Some("7"), &limits).unwrap(), request(3, 7));
    }

    #[test]
    fn test_page_request_rejects_bad_input() {
        let limits = PageLimits::default();
        for (page, size) in [
            (Some("abc"), None),
            (Some("1.5"), None),
            (None, Some("0")),
            (None, Some("-1")),
            (None, Some("ten")),
        ] {
            let err = PageRequest::parse(page, size, &limits).unwrap_err();
            assert!(matches!(err, DirectoryError::InvalidRequest(_)), "{:?}", (page, size));
        }
    }

    #[test]
    fn test_list_slices_in_order() {
        let svc = service(45);
        let page = svc.list(&SearchCriteria::new(), request(3, 20));
        assert_eq!(page.total_items, 45);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.doctors.len(), 5);
        assert_eq!(page.doctors[0].full_name, "Doctor 40");
        assert_eq!(page.current_page, 3);
        assert_eq!(page.page_size, 20);
        assert!(page.message.is_none());
    }

    #[test]
    fn test_list_page_past_end_is_empty() {
        let page = service(5).list(&SearchCriteria::new(), request(4, 2));
        assert!(page.doctors.is_empty());
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn test_slices_concatenate_to_full_scan() {
        let svc = service(23);
        let criteria = SearchCriteria::new().with_specialty("cardiologie");
        let full = svc.list(&criteria, request(1, 100)).doctors;
        for size in 1..=7 {
            let mut collected = Vec::new();
            let pages = svc.list(&criteria, request(1, size)).total_pages;
            assert_eq!(pages, full.len().div_ceil(size));
            for page in 1..=pages {
                collected.extend(svc.list(&criteria, request(page, size)).doctors);
            }
            assert_eq!(collected, full);
        }
    }

    #[test]
    fn test_empty_store_list_and_exists() {
        let svc = service(0);
        let page = svc.list(&SearchCriteria::new(), request(1, 20));
        assert!(page.doctors.is_empty());
        assert_eq!(page.total_items, 0);
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.message.as_deref(), Some("No data loaded"));

        let existence = svc.exists(&SearchCriteria::new());
        assert!(!existence.result);
        assert!(existence.reason.is_some());

        let status = svc.status();
        assert!(!status.data_loaded);
        assert_eq!(status.record_count, 0);
        assert_eq!(status.status, "OK");
    }

    #[test]
    fn test_exists_agrees_with_list_under_same_config() {
        let svc = service(10).with_existence_config(MatchConfig::list());
        for criteria in [
            SearchCriteria::new().with_name("Doctor 3"),
            SearchCriteria::new().with_specialty("Dermatologie"),
            SearchCriteria::new().with_specialty("orl"),
        ] {
            let listed = svc.list(&criteria, request(1, 1)).total_items;
            assert_eq!(svc.exists(&criteria).result, listed > 0);
        }
    }

    #[test]
    fn test_list_raw_propagates_validation_error() {
        let svc = service(3);
        assert!(svc.list_raw(&SearchCriteria::new(), None, Some("0")).is_err());
        let page = svc.list_raw(&SearchCriteria::new(), Some("2"), Some("2")).unwrap();
        assert_eq!(page.doctors.len(), 1);
    }

    #[test]
    fn test_page_serializes_camel_case() {
        let page = service(1).list(&SearchCriteria::new(), request(1, 20));
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["currentPage"], 1);
        assert_eq!(json["totalPages"], 1);
        assert_eq!(json["doctors"][0]["fullName"], "Doctor 0");
        assert!(json.get("message").is_none());
    }
}
