use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;
use tracing::{debug, warn};

use convert_common::handler::FormatHandler;
use convert_common::item::{Feature, FeatureKey, FeatureSet, Item};
use convert_common::table::Table;

/// Job reports written by Lithoz ceramic 3D printers.
///
/// Every page becomes a table tagged with `___SECTION = page N`.  A
/// `Schichtbereich von ...` (layer range) line opens a further table on the
/// same page.  `Key: Value` lines feed the current table's metadata.
pub struct PdfLithozReader;

const MARKER: &str = "Lithoz";
const LAYER_RANGE: &str = "Schichtbereich";

impl FormatHandler for PdfLithozReader {
    fn identifier(&self) -> &'static str {
        "pdf_lithoz_reader"
    }

    fn priority(&self) -> i32 {
        101
    }

    fn check(&self, item: &Item, scratch: &mut FeatureSet) -> Result<bool> {
        if item.suffix() != ".pdf" || item.mime_type() != "application/pdf" {
            return Ok(false);
        }
        let Some(pages) = extract_pages(item) else {
            return Ok(false);
        };
        if !pages.iter().any(|p| p.contains(MARKER)) {
            return Ok(false);
        }
        scratch.insert(FeatureKey::PdfPages, Feature::Pages(pages));
        Ok(true)
    }

    fn get_tables(&self, item: &Item) -> Result<Vec<Table>> {
        let feature = item.feature(FeatureKey::PdfPages)?;
        let pages = feature
            .as_pages()
            .ok_or_else(|| item.mismatch(FeatureKey::PdfPages))?;
        Ok(pages_to_tables(pages))
    }
}

/// Page texts, or `None` when the document cannot be read.
///
/// pdf-extract can panic on malformed input; the panic is contained here so
/// dispatch carries on with the remaining handlers.
fn extract_pages(item: &Item) -> Option<Vec<String>> {
    let bytes = item.bytes();
    let result = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    let text = match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!("pdf extraction failed for '{}': {e}", item.display_path());
            return None;
        }
        Err(_) => {
            warn!("pdf extraction panicked for '{}'", item.display_path());
            return None;
        }
    };
    Some(text.split('\u{c}').map(str::to_string).collect())
}

fn pages_to_tables(pages: &[String]) -> Vec<Table> {
    let mut tables = Vec::new();
    for (idx, page) in pages.iter().enumerate() {
        let section = format!("page {}", idx + 1);
        let mut table = section_table(&section);

        for line in page.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.contains("Schichtbereich von") {
                tables.push(std::mem::replace(&mut table, section_table(&section)));
                let range = line
                    .split_once(LAYER_RANGE)
                    .map(|(_, rest)| rest.trim())
                    .unwrap_or_default();
                table.metadata.add(LAYER_RANGE, range);
            } else if let Some((key, value)) = line.split_once(':') {
                let (key, value) = (key.trim(), value.trim());
                if !key.is_empty() && !value.is_empty() {
                    table.metadata.add(key, value);
                }
            }
            table.header.push(line.to_string());
        }
        tables.push(table);
    }
    tables
}

fn section_table(section: &str) -> Table {
    let mut table = Table::new();
    table.metadata.set("___SECTION", section);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use convert_common::handler::check_and_attach;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_one_table_per_page() {
        let tables = pages_to_tables(&pages(&[
            "Lithoz CeraFab\nJob: crown-17\nMaterial: LithaCon 3Y\n",
            "Operator: mk\n",
        ]));
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].metadata.get("___SECTION"), Some("page 1"));
        assert_eq!(tables[0].metadata.get("Job"), Some("crown-17"));
        assert_eq!(tables[0].header, ["Lithoz CeraFab", "Job: crown-17", "Material: LithaCon 3Y"]);
        assert_eq!(tables[1].metadata.get("___SECTION"), Some("page 2"));
        assert_eq!(tables[1].metadata.get("Operator"), Some("mk"));
    }

    #[test]
    fn test_layer_range_opens_table() {
        let tables = pages_to_tables(&pages(&[
            "Job: a\nSchichtbereich von 1 bis 120\nBelichtung: 2.0\nBelichtung: 2.0\nSchichtbereich von 121 bis 200\nBelichtung: 2.4\n",
        ]));
        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].metadata.get("Job"), Some("a"));
        assert_eq!(tables[1].metadata.get("Schichtbereich"), Some("von 1 bis 120"));
        assert_eq!(tables[1].metadata.get_all("Belichtung"), ["2.0"]);
        assert_eq!(tables[1].header[0], "Schichtbereich von 1 bis 120");
        assert_eq!(tables[2].metadata.get("Schichtbereich"), Some("von 121 bis 200"));
        assert_eq!(tables[2].metadata.get("___SECTION"), Some("page 1"));
        assert!(tables.iter().all(|t| t.columns().is_empty() && t.rows().is_empty()));
    }

    #[test]
    fn test_check_rejects_non_pdf() {
        let r = PdfLithozReader;
        let text = Item::new(b"Lithoz report".to_vec(), "report.pdf", "application/pdf");
        assert!(!check_and_attach(&r, &text).unwrap());
        let wrong_suffix = Item::new(b"%PDF-1.4\n".to_vec(), "report.txt", "");
        assert!(!check_and_attach(&r, &wrong_suffix).unwrap());
    }

    #[test]
    fn test_check_survives_broken_pdf() {
        let r = PdfLithozReader;
        let broken = Item::new(b"%PDF-1.4\n%%EOF garbage".to_vec(), "report.pdf", "");
        assert!(!check_and_attach(&r, &broken).unwrap());
        assert!(!broken.has_feature(FeatureKey::PdfPages));
    }
}
