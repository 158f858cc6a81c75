use anyhow::{Context, Result};
use tracing::debug;

use convert_common::handler::FormatHandler;
use convert_common::item::{Feature, FeatureKey, FeatureSet, Item};
use convert_common::table::{Metadata, Table};

/// Catch-all for text exports that are "some header lines, then columns of
/// numbers".  Registered last so every specific handler gets a chance first.
pub struct TextTableReader;

const CANDIDATES: [char; 3] = ['\t', ';', ','];

impl FormatHandler for TextTableReader {
    fn identifier(&self) -> &'static str {
        "text_table_reader"
    }

    fn priority(&self) -> i32 {
        1000
    }

    fn check(&self, item: &Item, scratch: &mut FeatureSet) -> Result<bool> {
        if item.is_container() {
            return Ok(false);
        }
        let Some(text) = item.text() else {
            return Ok(false);
        };
        match sniff_delimiter(text) {
            Some(delimiter) => {
                scratch.insert(FeatureKey::TextDelimiter, Feature::Delimiter(delimiter));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_tables(&self, item: &Item) -> Result<Vec<Table>> {
        let feature = item.feature(FeatureKey::TextDelimiter)?;
        let delimiter = feature
            .as_delimiter()
            .ok_or_else(|| item.mismatch(FeatureKey::TextDelimiter))?;
        let text = item.text().context("item has no text")?;
        let tables = parse(text, delimiter)?;
        debug!("'{}': {} numeric block(s), delimiter {delimiter:?}", item.display_path(), tables.len());
        Ok(tables)
    }
}

/// `Some(Some(c))` for a character delimiter, `Some(None)` for whitespace,
/// `None` when no line looks like a row of numbers.
fn sniff_delimiter(text: &str) -> Option<Option<char>> {
    for c in CANDIDATES {
        let hit = records(text, Some(c))
            .is_ok_and(|rs| rs.iter().any(|r| r.fields.len() >= 2 && is_data_row(&r.fields, true)));
        if hit {
            return Some(Some(c));
        }
    }
    records(text, None)
        .is_ok_and(|rs| rs.iter().any(|r| is_data_row(&r.fields, false)))
        .then_some(None)
}

/// One record of the input: the raw line, kept for the header, and its fields.
struct Record {
    line: String,
    fields: Vec<String>,
}

/// Split `text` into records.  A character delimiter goes through the `csv`
/// reader so quoted fields survive; `None` splits on runs of whitespace.
fn records(text: &str, delimiter: Option<char>) -> Result<Vec<Record>> {
    let Some(c) = delimiter else {
        return Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Record {
                line: line.to_string(),
                fields: line.split_whitespace().map(str::to_string).collect(),
            })
            .collect());
    };

    let byte = u8::try_from(c).with_context(|| format!("delimiter {c:?} is not ASCII"))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(byte)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut parsed = Vec::new();
    for result in reader.records() {
        let record = result.context("reading delimited text")?;
        let start = record.position().map_or(0, |p| p.byte() as usize);
        parsed.push((start, record.iter().map(str::to_string).collect::<Vec<_>>()));
    }

    // a record's raw text runs up to where the next one starts
    let ends: Vec<usize> = parsed.iter().skip(1).map(|(start, _)| *start).chain([text.len()]).collect();
    Ok(parsed
        .into_iter()
        .zip(ends)
        .filter_map(|((start, fields), end)| {
            let line = text.get(start..end)?.trim_end();
            (!line.trim().is_empty()).then(|| Record { line: line.to_string(), fields })
        })
        .collect())
}

fn is_number(field: &str) -> bool {
    field.bytes().any(|b| b.is_ascii_digit()) && field.parse::<f64>().is_ok()
}

/// Every field is a number.  With `allow_label` the first field may instead
/// be a row label, provided at least two numbers follow it.
fn is_data_row(fields: &[String], allow_label: bool) -> bool {
    match fields {
        [] => false,
        [first, rest @ ..] if allow_label && rest.len() >= 2 && !is_number(first) => {
            rest.iter().all(|f| is_number(f))
        }
        _ => fields.iter().all(|f| is_number(f)),
    }
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=').or_else(|| line.split_once(':'))?;
    let key = key.trim();
    (!key.is_empty()).then(|| (key, value.trim()))
}

fn parse(text: &str, delimiter: Option<char>) -> Result<Vec<Table>> {
    let mut tables: Vec<Table> = Vec::new();
    let mut current: Option<Table> = None;
    let mut pending_header: Vec<String> = Vec::new();
    let mut pending_meta = Metadata::new();

    for Record { line, fields } in records(text, delimiter)? {
        if is_data_row(&fields, delimiter.is_some()) {
            let fits = current.as_ref().is_some_and(|t| t.columns().len() == fields.len());
            if !fits {
                if let Some(done) = current.take() {
                    tables.push(finish(done));
                }
                let mut table = Table::new();
                table.header = std::mem::take(&mut pending_header);
                table.metadata = std::mem::take(&mut pending_meta);
                for i in 0..fields.len() {
                    table.add_column(i.to_string(), format!("Column #{i}"))?;
                }
                current = Some(table);
            }
            if let Some(table) = current.as_mut() {
                table.push_row(fields)?;
            }
        } else {
            // a non-numeric line closes the running block
            if let Some(done) = current.take() {
                tables.push(finish(done));
            }
            if let Some((key, value)) = key_value(&line) {
                pending_meta.add(key, value);
            }
            pending_header.push(line);
        }
    }
    if let Some(done) = current.take() {
        tables.push(finish(done));
    }

    // trailing annotations belong to the last block
    if let Some(last) = tables.last_mut() {
        last.header.append(&mut pending_header);
        for (key, values) in pending_meta.iter() {
            for v in values {
                last.metadata.add(key, v.as_str());
            }
        }
        last.set_dimensions();
    }
    Ok(tables)
}

fn finish(mut table: Table) -> Table {
    table.set_dimensions();
    table
}
