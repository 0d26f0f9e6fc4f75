//! # doctor-directory
//!
//! Crawls a paginated doctor directory into a flat CSV dataset and serves
//! fuzzy searches over it.
//!
//! The crate has two halves:
//!
//! - Crawling: a [`Crawler`] walks a set of filter values (specialties or
//!   regions), and for each one a [`Paginator`] pages through the directory
//!   grid, extracting [`DoctorRecord`]s from every page. The site is reached
//!   through the [`GridSession`] trait, implemented over Chrome when the
//!   `headless` feature is enabled.
//! - Querying: a [`RecordStore`] holds the dataset, a [`MatchEngine`] filters
//!   it by practice mode, fuzzy name and exact specialty/region, and the
//!   [`QueryService`] exposes paginated list and existence searches, served
//!   over HTTP by [`server::router`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use doctor_directory::{QueryService, RecordStore, SearchCriteria, PageRequest};
//!
//! let store = Arc::new(RecordStore::load("All_docs.csv"));
//! let service = QueryService::new(store);
//!
//! let criteria = SearchCriteria::new().with_name("Ben Ali Mohamed");
//! let page = service.list(&criteria, PageRequest { page: 1, size: 20 });
//! for doctor in &page.doctors {
//!     println!("{} ({})", doctor.full_name, doctor.specialty);
//! }
//! ```

#![warn(missing_docs)]

mod error;
mod record;

pub mod config;
pub mod crawl;
pub mod engine;
pub mod extract;
pub mod fuzz;
pub mod grid;
pub mod paginate;
pub mod query;
pub mod server;
pub mod store;

#[cfg(feature = "headless")]
pub mod browser;
#[cfg(feature = "headless")]
pub mod chrome;

pub use config::{AppConfig, BrowserOptions, ServiceConfig};
pub use crawl::{CrawlConfig, CrawlReport, Crawler, FilterScope, FilterSummary};
pub use engine::{GateMode, MatchConfig, MatchEngine, SearchCriteria, Suggestion};
pub use error::{DirectoryError, Result};
pub use extract::{ExtractedPage, PageExtractor};
pub use fuzz::{Score, Scorer};
pub use grid::{Confirmation, FilterOption, GridSelectors, GridSession, PagerSummary};
pub use paginate::{Diagnostics, FilterOutcome, PaginationConfig, Paginator, Stage, Termination};
pub use query::{DoctorPage, Existence, PageLimits, PageRequest, QueryService, Status};
pub use record::{Dataset, DoctorRecord, FilterKind, FilterValue, RecordField, COLUMNS};
pub use store::{read_dataset, write_dataset, RecordStore};
