use anyhow::{Context, Result};
use tracing::debug;

use convert_common::handler::FormatHandler;
use convert_common::item::{FeatureSet, Item};
use convert_common::table::Table;

/// Bruker DIFFRAC plus `.uxd` powder diffraction exports.
///
/// Lines starting with `_` or `;` form the header; `_KEY=VALUE` lines are
/// metadata.  `_FILEVERSION` decides how the data lines read: version 2 is a
/// stream of counts (one value per row), version 3 tab-separated
/// angle/count pairs.
pub struct UxdReader;

impl FormatHandler for UxdReader {
    fn identifier(&self) -> &'static str {
        "uxd_reader"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn check(&self, item: &Item, _scratch: &mut FeatureSet) -> Result<bool> {
        Ok(item.suffix() == ".uxd" && item.text().is_some())
    }

    fn get_tables(&self, item: &Item) -> Result<Vec<Table>> {
        let text = item.text().context("UXD file is not text")?;
        Ok(vec![parse(text)?])
    }
}

fn parse(text: &str) -> Result<Table> {
    let mut table = Table::new();
    let mut data_lines = Vec::new();

    for line in text.lines().map(str::trim_end) {
        let mut chars = line.chars();
        let first = chars.next();
        let second = chars.next();
        if matches!(first, Some('_' | ';')) && second.is_some() {
            table.header.push(line.to_string());
            if first == Some('_') && second != Some('+') {
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.split('=').next().unwrap_or("");
                    table.metadata.add(key.trim()[1..].to_string(), value.trim());
                }
            }
        } else if !line.trim().is_empty() {
            data_lines.push(line);
        }
    }

    let version = table
        .metadata
        .get("FILEVERSION")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);

    match version {
        2 => {
            table.add_column("0", "Column #0 (counts)")?;
            for line in data_lines {
                // a line either parses completely or is skipped
                if let Some(values) = numbers(line.split_whitespace()) {
                    for v in values {
                        table.push_row(vec![v])?;
                    }
                }
            }
        }
        3 => {
            table.add_column("0", "Column #0 (angle)")?;
            table.add_column("1", "Column #1 (counts)")?;
            for line in data_lines {
                match numbers(line.split('\t').map(str::trim)) {
                    Some(values) if values.len() >= 2 => {
                        table.push_row(values.into_iter().take(2).collect())?;
                    }
                    _ => debug!("uxd: skipping data line '{line}'"),
                }
            }
        }
        other => debug!("uxd: unsupported FILEVERSION {other}, no data rows read"),
    }

    table.set_dimensions();
    Ok(table)
}

fn numbers<'a>(tokens: impl Iterator<Item = &'a str>) -> Option<Vec<String>> {
    tokens
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().ok().map(|_| t.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use convert_common::handler::check_and_attach;

    const V2: &str = "; Diffrac Plus export\n\
_FILEVERSION=2\n\
_SAMPLE='PD-01'\n\
_+COMMENT=ignored\n\
_STEPSIZE=0.02\n\
_STEPSIZE=0.02\n\
\n\
   120    130   125\n\
   118 x\n\
   140\n";

    const V3: &str = "_FILEVERSION=3\n_2THETA=5.0\n10.00\t120\n10.02\t133\nnot data\n";

    #[test]
    fn test_check() {
        let r = UxdReader;
        assert!(check_and_attach(&r, &Item::new(V2.as_bytes().to_vec(), "PD-01.UXD", "")).unwrap());
        assert!(!check_and_attach(&r, &Item::new(V2.as_bytes().to_vec(), "PD-01.txt", "")).unwrap());
    }

    #[test]
    fn test_version_2_counts() {
        let t = parse(V2).unwrap();
        assert_eq!(t.header.len(), 6);
        assert_eq!(t.header[0], "; Diffrac Plus export");
        assert_eq!(t.metadata.get("FILEVERSION"), Some("2"));
        assert_eq!(t.metadata.get("SAMPLE"), Some("'PD-01'"));
        assert_eq!(t.metadata.get_all("STEPSIZE"), ["0.02"]);
        assert!(!t.metadata.contains_key("+COMMENT"));
        let values: Vec<_> = t.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(values, ["120", "130", "125", "140"]);
        assert_eq!(t.columns().len(), 1);
    }

    #[test]
    fn test_version_3_pairs() {
        let t = parse(V3).unwrap();
        assert_eq!(t.columns().len(), 2);
        assert_eq!(t.rows(), [vec!["10.00".to_string(), "120".to_string()], vec!["10.02".to_string(), "133".to_string()]]);
        assert_eq!(t.metadata.get("rows"), Some("2"));
    }

    #[test]
    fn test_unknown_version_has_no_rows() {
        let t = parse("_FILEVERSION=x\n1 2 3\n").unwrap();
        assert!(t.rows().is_empty());
        assert!(t.columns().is_empty());
    }
}
