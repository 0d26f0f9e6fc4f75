//! Doctor records and crawl filter values.

use serde::{Deserialize, Serialize};

/// Column identifiers of the flat dataset file, in positional order.
pub const COLUMNS: [&str; 6] = [
    "fullName",
    "specialty",
    "practiceMode",
    "address",
    "phone",
    "region",
];

/// One practitioner entry.
///
/// Every field defaults to the empty string, so downstream string handling
/// never has to deal with a missing value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoctorRecord {
    /// Full name as listed in the directory.
    pub full_name: String,
    /// Medical specialty.
    pub specialty: String,
    /// Practice mode, e.g. "Médecin de Libre Pratique".
    pub practice_mode: String,
    /// Professional address.
    pub address: String,
    /// Phone number, digits and punctuation preserved.
    pub phone: String,
    /// Region (governorate); only set by region-scoped crawls.
    pub region: String,
}

impl DoctorRecord {
    /// Creates a record with the given name and every other field empty.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    /// Sets the specialty.
    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = specialty.into();
        self
    }

    /// Sets the practice mode.
    pub fn with_practice_mode(mut self, mode: impl Into<String>) -> Self {
        self.practice_mode = mode.into();
        self
    }

    /// Sets the address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the phone number.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    /// Sets the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Builds a record from positional cells, trimming each value.
    ///
    /// Missing trailing cells default to empty; cells past the known
    /// columns are ignored.
    pub fn from_cells<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut record = Self::default();
        for (i, cell) in cells.into_iter().take(COLUMNS.len()).enumerate() {
            let value = cell.trim().to_string();
            match i {
                0 => record.full_name = value,
                1 => record.specialty = value,
                2 => record.practice_mode = value,
                3 => record.address = value,
                4 => record.phone = value,
                _ => record.region = value,
            }
        }
        record
    }

    /// Returns the fields in [`COLUMNS`] order.
    pub fn cells(&self) -> [&str; 6] {
        [
            self.full_name.as_str(),
            self.specialty.as_str(),
            self.practice_mode.as_str(),
            self.address.as_str(),
            self.phone.as_str(),
            self.region.as_str(),
        ]
    }

    /// True when name, specialty, mode, address and phone are all empty.
    ///
    /// Such rows carry no directory information and are dropped by the crawl.
    pub fn is_blank(&self) -> bool {
        self.full_name.is_empty()
            && self.specialty.is_empty()
            && self.practice_mode.is_empty()
            && self.address.is_empty()
            && self.phone.is_empty()
    }

    /// Returns the value of one searchable field.
    pub fn field(&self, field: RecordField) -> &str {
        match field {
            RecordField::Name => &self.full_name,
            RecordField::Specialty => &self.specialty,
            RecordField::Region => &self.region,
        }
    }
}

/// Searchable record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordField {
    /// `full_name`.
    Name,
    /// `specialty`.
    Specialty,
    /// `region`.
    Region,
}

/// What a crawl filter scopes by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// A specialty from the dropdown or a specialty GUID.
    #[default]
    Specialty,
    /// A governorate name.
    Region,
}

/// A discrete filter value driving one pagination pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterValue {
    /// Identifier sent to the site (specialty GUID or region name).
    pub id: String,
    /// Human-readable label.
    pub display_name: String,
    /// Which record field this filter scopes.
    pub kind: FilterKind,
}

impl FilterValue {
    /// Creates a specialty filter from its GUID and label.
    pub fn specialty(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind: FilterKind::Specialty,
        }
    }

    /// Creates a region filter; the name doubles as identifier.
    pub fn region(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            display_name: name,
            kind: FilterKind::Region,
        }
    }

    /// Stamps a crawled record with this filter.
    ///
    /// Specialty filters replace the scraped specialty with the selected
    /// label; region filters fill in the region.
    pub fn tag(&self, record: &mut DoctorRecord) {
        match self.kind {
            FilterKind::Specialty => record.specialty = self.display_name.clone(),
            FilterKind::Region => record.region = self.display_name.clone(),
        }
    }

    /// A filesystem-safe slug of the display name, used for diagnostics.
    pub fn slug(&self) -> String {
        let slug: String = self
            .display_name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        if slug.is_empty() {
            self.id.clone()
        } else {
            slug
        }
    }
}

/// The ordered sequence of records produced by one crawl or loaded for serving.
pub type Dataset = Vec<DoctorRecord>;
