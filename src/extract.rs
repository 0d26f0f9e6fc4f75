//! Page extraction: grid table markup to doctor records.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::grid::GridSelectors;
use crate::{DirectoryError, DoctorRecord, Result};

/// Minimum number of cells a data row needs: name, specialty, mode, address, phone.
pub const MIN_CELLS: usize = 5;

const NBSP: char = '\u{a0}';

/// One page of the grid after extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// Rows matching the data-row selector, kept or not.
    pub rows: usize,
    /// Well-formed, non-blank rows in page order.
    pub records: Vec<DoctorRecord>,
}

/// Pulls doctor records out of one page of the grid.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    row: Selector,
    cell: Selector,
}

impl PageExtractor {
    /// Builds an extractor from the grid's row and cell selectors.
    pub fn new(selectors: &GridSelectors) -> Result<Self> {
        Ok(Self {
            row: parse_selector(&selectors.data_row)?,
            cell: parse_selector(&selectors.cell)?,
        })
    }

    /// Extracts every well-formed row of the page.
    ///
    /// Rows with fewer than [`MIN_CELLS`] cells are skipped with a warning,
    /// and rows whose five directory cells are all empty are dropped. An
    /// empty result is not an error; the caller decides what it means.
    pub fn extract(&self, markup: &str) -> Vec<DoctorRecord> {
        self.extract_page(markup).records
    }

    /// Like [`extract`](Self::extract), also reporting how many data rows
    /// the page carried before skipping and dropping.
    pub fn extract_page(&self, markup: &str) -> ExtractedPage {
        let document = if markup.contains("<table") {
            Html::parse_document(markup)
        } else {
            // Bare rows are discarded by the HTML parser outside a table context.
            Html::parse_document(&format!("<table>{}</table>", markup))
        };

        let mut page = ExtractedPage::default();
        for (index, row) in document.select(&self.row).enumerate() {
            page.rows += 1;
            let cells: Vec<ElementRef> = row.select(&self.cell).collect();
            if cells.len() < MIN_CELLS {
                warn!(
                    "Row {} skipped, expected {}+ cells, found {}",
                    index + 1,
                    MIN_CELLS,
                    cells.len()
                );
                continue;
            }

            let record = DoctorRecord {
                full_name: cell_text(&cells[0]),
                specialty: cell_text(&cells[1]),
                practice_mode: cell_text(&cells[2]),
                address: cell_text(&cells[3]),
                phone: phone_text(&cells[4]),
                region: String::new(),
            };

            if record.is_blank() {
                debug!("Row {} has no directory data, dropping", index + 1);
                continue;
            }
            page.records.push(record);
        }

        page
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| DirectoryError::Parse(format!("Failed to parse selector '{}': {:?}", css, e)))
}

fn raw_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>()
}

/// Cell text with non-breaking spaces turned into ordinary spaces.
fn cell_text(cell: &ElementRef) -> String {
    raw_text(cell).replace(NBSP, " ").trim().to_string()
}

/// Phone numbers drop non-breaking spaces entirely.
fn phone_text(cell: &ElementRef) -> String {
    raw_text(cell).replace(NBSP, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> PageExtractor {
        PageExtractor::new(&GridSelectors::default()).unwrap()
    }

    fn row(cells: &[&str]) -> String {
        let tds: String = cells
            .iter()
            .map(|c| format!(r#"<td class="dxgv">{}</td>"#, c))
            .collect();
        format!(r#"<tr class="dxgvDataRow_MetropolisBlue">{}</tr>"#, tds)
    }

    #[test]
    fn test_extract_full_row() {
        let html = format!(
            "<table><tbody>{}</tbody></table>",
            row(&[
                "Dr Amal Trabelsi",
                "Cardiologie",
                "Médecin de Libre Pratique",
                "12 Rue de Rome, Tunis",
                "71 000 111"
            ])
        );
        let records = extractor().extract(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].full_name, "Dr Amal Trabelsi");
        assert_eq!(records[0].specialty, "Cardiologie");
        assert_eq!(records[0].practice_mode, "Médecin de Libre Pratique");
        assert_eq!(records[0].phone, "71 000 111");
        assert_eq!(records[0].region, "");
    }

    #[test]
    fn test_extract_bare_rows_without_table() {
        let html = format!("<tbody>{}</tbody>", row(&["A", "B", "C", "D", "E"]));
        let records = extractor().extract(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].full_name, "A");
    }

    #[test]
    fn test_extract_skips_short_row() {
        let html = format!(
            "<table>{}{}</table>",
            row(&["Only", "Three", "Cells"]),
            row(&["Sami", "ORL", "Libre", "Sfax", "74 111 222"])
        );
        let records = extractor().extract(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].full_name, "Sami");
    }

    #[test]
    fn test_extract_nbsp_in_address_becomes_space() {
        let html = format!(
            "<table>{}</table>",
            row(&["Nour", "Pédiatrie", "Libre", "Avenue&nbsp;Habib&nbsp;Bourguiba", "70&nbsp;123&nbsp;456"])
        );
        let records = extractor().extract(&html);
        assert_eq!(records[0].address, "Avenue Habib Bourguiba");
        assert!(!records[0].address.contains('\u{a0}'));
        assert_eq!(records[0].phone, "70123456");
    }

    #[test]
    fn test_extract_trims_and_empties_nbsp_only_cells() {
        let html = format!(
            "<table>{}</table>",
            row(&["  Karim  ", "Dermatologie", "Libre", "&nbsp;", "&nbsp;"])
        );
        let records = extractor().extract(&html);
        assert_eq!(records[0].full_name, "Karim");
        assert_eq!(records[0].address, "");
        assert_eq!(records[0].phone, "");
    }

    #[test]
    fn test_extract_drops_blank_rows() {
        let html = format!(
            "<table>{}</table>",
            row(&["&nbsp;", " ", "", "&nbsp;", ""])
        );
        assert!(extractor().extract(&html).is_empty());
    }

    #[test]
    fn test_extract_page_counts_rows_before_dropping() {
        let html = format!(
            "<table>{}{}{}</table>",
            row(&["&nbsp;", "", "", "", ""]),
            row(&["Short", "Row"]),
            row(&["Rim", "B", "C", "D", "E"])
        );
        let page = extractor().extract_page(&html);
        assert_eq!(page.rows, 3);
        assert_eq!(page.records.len(), 1);

        let blank_only = format!("<table>{}</table>", row(&["", "", "", "", ""]));
        let page = extractor().extract_page(&blank_only);
        assert_eq!(page.rows, 1);
        assert!(page.records.is_empty());

        assert_eq!(extractor().extract_page("<table></table>").rows, 0);
    }

    #[test]
    fn test_extract_ignores_non_data_rows() {
        let html = format!(
            r#"<table><tr class="dxgvHeader"><td class="dxgv">Nom</td></tr>{}</table>"#,
            row(&["A", "B", "C", "D", "E"])
        );
        assert_eq!(extractor().extract(&html).len(), 1);
    }

    #[test]
    fn test_extract_nested_markup_in_cell() {
        let html = format!(
            "<table>{}</table>",
            row(&["<span>Dr</span> <b>Hedi</b>", "B", "C", "D", "E"])
        );
        assert_eq!(extractor().extract(&html)[0].full_name, "Dr Hedi");
    }

    #[test]
    fn test_extract_empty_page() {
        assert!(extractor().extract("<table></table>").is_empty());
        assert!(extractor().extract("").is_empty());
    }

    #[test]
    fn test_extract_preserves_row_order() {
        let html = format!(
            "<table>{}{}{}</table>",
            row(&["First", "B", "C", "D", "E"]),
            row(&["Second", "B", "C", "D", "E"]),
            row(&["Third", "B", "C", "D", "E"])
        );
        let names: Vec<_> = extractor()
            .extract(&html)
            .into_iter()
            .map(|r| r.full_name)
            .collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_extractor_rejects_bad_selector() {
        let selectors = GridSelectors {
            data_row: "tr[".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            PageExtractor::new(&selectors),
            Err(DirectoryError::Parse(_))
        ));
    }
}
