use chrono::NaiveDateTime;
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlvError {
    #[error("{member}: missing or malformed Date/Time header")]
    MissingTimestamp { member: String },
    #[error("no ALV samples to aggregate")]
    NoSamples,
}

const CORRELATION: &str = "Correlation";
const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Does `text` look like an ALV correlator export?
pub fn is_alv(text: &str) -> bool {
    text.trim_start().starts_with("ALV-")
}

/// One ALV correlator `.asc` export.
///
/// The file starts with `Key : value` lines (values optionally quoted),
/// followed by quoted section titles such as `"Correlation"` or
/// `"Count Rate"`, each introducing rows of numbers.  Only the first data
/// channel of the correlation section is kept.
#[derive(Debug, Clone)]
pub struct AlvSample {
    pub member: String,
    pub header: Vec<String>,
    pub fields: IndexMap<String, String>,
    pub correlation: Vec<String>,
    pub timestamp: NaiveDateTime,
}

impl AlvSample {
    pub fn parse(member: &str, text: &str) -> Result<Self, AlvError> {
        let mut header = Vec::new();
        let mut fields = IndexMap::new();
        let mut correlation = Vec::new();
        let mut section: Option<&str> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(name) = section_title(trimmed) {
                section = Some(name);
                continue;
            }
            match section {
                None => {
                    header.push(line.trim_end().to_string());
                    if let Some((key, value)) = trimmed.split_once(':') {
                        fields.insert(key.trim().to_string(), unquote(value.trim()).to_string());
                    }
                }
                Some(CORRELATION) => {
                    let values: Vec<&str> = trimmed.split_whitespace().collect();
                    if values.len() >= 2 && values.iter().all(|v| v.parse::<f64>().is_ok()) {
                        correlation.push(values[1].to_string());
                    }
                }
                Some(_) => {}
            }
        }

        let timestamp = parse_timestamp(&fields)
            .ok_or_else(|| AlvError::MissingTimestamp { member: member.to_string() })?;

        Ok(Self {
            member: member.to_string(),
            header,
            fields,
            correlation,
            timestamp,
        })
    }

    /// `Samplename`, or the member name when the sample was left unnamed.
    pub fn identifier(&self) -> &str {
        self.fields
            .get("Samplename")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.member)
    }
}

fn section_title(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('"')?.strip_suffix('"')?;
    (!inner.is_empty() && !inner.contains('"')).then_some(inner)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_timestamp(fields: &IndexMap<String, String>) -> Option<NaiveDateTime> {
    let date = fields.get("Date")?;
    let time = fields.get("Time")?;
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIMESTAMP_FORMAT).ok()
}
