use anyhow::Result;
use serde_json::{Map, Value};
use tracing::debug;

use convert_common::handler::{base_metadata, FormatHandler};
use convert_common::item::{Feature, FeatureKey, FeatureSet, Item};
use convert_common::table::{stringify, Metadata, Table};

/// PalmSens PSTrace session files (`.pssession`): a JSON document, usually
/// UTF-16 with a byte-order mark, holding one or more measurements.
pub struct PsSessionReader;

impl FormatHandler for PsSessionReader {
    fn identifier(&self) -> &'static str {
        "pssession_reader"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn check(&self, item: &Item, scratch: &mut FeatureSet) -> Result<bool> {
        if item.suffix() != ".pssession" {
            return Ok(false);
        }
        scratch.insert(FeatureKey::PsSessionDocument, Feature::Json(parse_document(item)));
        Ok(true)
    }

    fn get_tables(&self, item: &Item) -> Result<Vec<Table>> {
        let feature = item.feature(FeatureKey::PsSessionDocument)?;
        let doc = feature
            .as_json()
            .ok_or_else(|| item.mismatch(FeatureKey::PsSessionDocument))?;

        let mut tables = Vec::new();
        let measurements = lookup(doc, &["measurements", "Measurements"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for measurement in measurements {
            tables.push(measurement_table(measurement)?);
        }
        Ok(tables)
    }

    fn get_metadata(&self, item: &Item) -> Result<Metadata> {
        let mut metadata = base_metadata(self.identifier(), item);
        let feature = item.feature(FeatureKey::PsSessionDocument)?;
        let doc_type = feature
            .as_json()
            .and_then(|doc| lookup(doc, &["type", "Type"]))
            .map(stringify)
            .unwrap_or_default();
        metadata.set("type", doc_type);
        Ok(metadata)
    }
}

/// A session that does not parse is treated as an empty document.
fn parse_document(item: &Item) -> Value {
    let Some(text) = item.text() else {
        return Value::Object(Map::new());
    };
    let trimmed = text.trim_matches(|c: char| c == '\u{feff}' || c == '\0' || c.is_whitespace());
    match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            debug!("'{}' is not valid JSON: {e}", item.name());
            Value::Object(Map::new())
        }
    }
}

/// First present, non-empty value among `names` (files differ in key casing).
fn lookup<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| value.get(n))
        .find(|v| !is_empty(v))
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn field(value: &Value, names: &[&str]) -> String {
    lookup(value, names).map(stringify).unwrap_or_default()
}

fn measurement_table(measurement: &Value) -> Result<Table> {
    let mut table = Table::new();

    let method = field(measurement, &["method", "Method"]);
    table.header = method.lines().map(str::to_string).collect();

    // key=value lines of the method script
    for line in &table.header {
        if line.starts_with('#') {
            continue;
        }
        if let [key, value] = line.trim().split('=').collect::<Vec<_>>()[..] {
            table.metadata.set(key, value);
        }
    }

    table.metadata.set("title", field(measurement, &["title", "Title"]));
    table.metadata.set("timestamp", field(measurement, &["timestamp", "TimeStamp"]));
    table.metadata.set("deviceused", field(measurement, &["deviceused", "DeviceUsed"]));
    table.metadata.set("deviceserial", field(measurement, &["deviceserial", "DeviceSerial"]));

    let null = Value::Null;
    let dataset = lookup(measurement, &["dataset", "DataSet"]).unwrap_or(&null);
    table.metadata.set("type", field(dataset, &["type", "Type"]));

    let arrays = lookup(dataset, &["values", "Values"])
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut columns: Vec<Vec<String>> = Vec::with_capacity(arrays.len());
    for (idx, array) in arrays.iter().enumerate() {
        let description = field(array, &["description", "Description"]);
        table.metadata.set(format!("column_{idx:02}"), description.as_str());
        table.add_column(idx.to_string(), format!("Column #{idx} ({description})"))?;

        let values = lookup(array, &["datavalues", "DataValues"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        columns.push(
            values
                .iter()
                .map(|dv| dv.get("v").or_else(|| dv.get("V")).map(stringify).unwrap_or_default())
                .collect(),
        );
    }

    // each array is a column; transpose into rows, padding short arrays
    let height = columns.iter().map(Vec::len).max().unwrap_or(0);
    for i in 0..height {
        let row = columns
            .iter()
            .map(|c| c.get(i).cloned().unwrap_or_default())
            .collect();
        table.push_row(row)?;
    }

    table.set_dimensions();
    Ok(table)
}
