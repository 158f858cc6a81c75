//! JCAMP-DX 5.01 output for one-dimensional spectra.
//!
//! Two data classes are written.  `XYDATA` packs evenly spaced Y values in
//! `(X++(Y..Y))` form: every value is re-expressed as an integer digit string
//! scaled by a single `YFACTOR`, so `digits * YFACTOR` gives back exactly the
//! decimal the caller supplied.  `XYPOINTS` lists explicit `x,y` pairs
//! unchanged.

use convert_common::config::JcampConfig;
use convert_common::table::Table;
use thiserror::Error;

const DEFAULT_VALUES_PER_LINE: usize = 12;
const END: &str = "##END=$$ End of the data block";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("'{0}' is not a plain decimal number")]
    NotDecimal(String),
    #[error("'{0}' is not a number")]
    NotNumber(String),
    #[error("need at least {needed} value(s), got {got}")]
    TooFewValues { needed: usize, got: usize },
    #[error("table has no column {0}")]
    NoColumn(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpectrumData {
    /// Y values evenly spaced from `first_x` to `last_x`.
    XyData {
        first_x: String,
        last_x: String,
        y: Vec<String>,
    },
    /// Explicit (x, y) pairs.
    XyPoints(Vec<(String, String)>),
}

impl SpectrumData {
    /// Pairs from two columns of `table`.  Rows with an empty cell in either
    /// column are skipped.
    pub fn points_from_table(table: &Table, x_col: usize, y_col: usize) -> Result<Self, WriteError> {
        let xs = table.column_values(x_col).ok_or(WriteError::NoColumn(x_col))?;
        let ys = table.column_values(y_col).ok_or(WriteError::NoColumn(y_col))?;
        let points = xs
            .into_iter()
            .zip(ys)
            .map(|(x, y)| (x.trim(), y.trim()))
            .filter(|(x, y)| !x.is_empty() && !y.is_empty())
            .map(|(x, y)| (x.to_string(), y.to_string()))
            .collect();
        Ok(SpectrumData::XyPoints(points))
    }

    fn data_class(&self) -> &'static str {
        match self {
            SpectrumData::XyData { .. } => "XYDATA",
            SpectrumData::XyPoints(_) => "XYPOINTS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JcampOptions {
    pub title: String,
    pub origin: Option<String>,
    pub owner: Option<String>,
    pub data_type: String,
    pub xunits: String,
    pub yunits: String,
    /// Y values per `XYDATA` line.
    pub values_per_line: usize,
}

impl Default for JcampOptions {
    fn default() -> Self {
        Self {
            title: "Spectrum".to_string(),
            origin: None,
            owner: None,
            data_type: "INFRARED SPECTRUM".to_string(),
            xunits: "1/CM".to_string(),
            yunits: "TRANSMITTANCE".to_string(),
            values_per_line: DEFAULT_VALUES_PER_LINE,
        }
    }
}

impl JcampOptions {
    pub fn from_config(cfg: &JcampConfig) -> Self {
        Self {
            origin: cfg.origin.clone(),
            owner: cfg.owner.clone(),
            values_per_line: cfg.values_per_line,
            ..Self::default()
        }
    }
}

type Header = Vec<(&'static str, Option<String>)>;

/// Render `data` as a complete JCAMP-DX document.  Nothing is produced
/// unless every input value is valid.
pub fn write(data: &SpectrumData, opts: &JcampOptions) -> Result<String, WriteError> {
    let mut header: Header = vec![
        ("TITLE", Some(opts.title.clone())),
        (
            "JCAMP-DX",
            Some(format!("5.01 $$ {} ({})", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        ),
        ("DATA TYPE", Some(opts.data_type.clone())),
        ("DATA CLASS", Some(data.data_class().to_string())),
        ("ORIGIN", opts.origin.clone()),
        ("OWNER", opts.owner.clone()),
        ("XUNITS", Some(opts.xunits.clone())),
        ("YUNITS", Some(opts.yunits.clone())),
    ];

    let body = match data {
        SpectrumData::XyData { first_x, last_x, y } => {
            xydata(first_x, last_x, y, opts.values_per_line.max(1), &mut header)?
        }
        SpectrumData::XyPoints(points) => xypoints(points, &mut header)?,
    };

    let mut out = String::new();
    for (key, value) in header {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            out.push_str(&format!("##{key}={value}\n"));
        }
    }
    for line in body {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(END);
    out.push('\n');
    Ok(out)
}

fn xydata(
    first_x: &str,
    last_x: &str,
    y: &[String],
    per_line: usize,
    header: &mut Header,
) -> Result<Vec<String>, WriteError> {
    if y.len() < 2 {
        return Err(WriteError::TooFewValues { needed: 2, got: y.len() });
    }
    let first = parse_number(first_x)?;
    let last = parse_number(last_x)?;
    let values = y.iter().map(|v| parse_decimal(v)).collect::<Result<Vec<_>, _>>()?;

    let npoints = values.len();
    let delta = (last - first) / (npoints - 1) as f64;
    let max_decimals = values.iter().map(|d| d.decimals).max().unwrap_or(0);
    let (min_y, max_y) = min_max(values.iter().map(|d| d.value));
    let (min_x, max_x) = if first <= last { (first_x, last_x) } else { (last_x, first_x) };

    header.extend([
        ("FIRSTX", Some(first_x.to_string())),
        ("LASTX", Some(last_x.to_string())),
        ("MINX", Some(min_x.to_string())),
        ("MAXX", Some(max_x.to_string())),
        ("MINY", Some(render_float(min_y))),
        ("MAXY", Some(render_float(max_y))),
        ("NPOINTS", Some(npoints.to_string())),
        ("DELTAX", Some(render_float(delta))),
        ("FIRSTY", Some(y[0].clone())),
        ("XFACTOR", Some("1.0".to_string())),
        ("YFACTOR", Some(y_factor(max_decimals))),
        ("XYDATA", Some("(X++(Y..Y))".to_string())),
    ]);

    let lines = values
        .chunks(per_line)
        .enumerate()
        .map(|(n, chunk)| {
            let x = first + (n * per_line) as f64 * delta;
            let mut line = render_float(x);
            for d in chunk {
                line.push(',');
                line.push_str(&d.digits);
                line.push_str(&"0".repeat(max_decimals - d.decimals));
            }
            line
        })
        .collect();
    Ok(lines)
}

fn xypoints(points: &[(String, String)], header: &mut Header) -> Result<Vec<String>, WriteError> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Err(WriteError::TooFewValues { needed: 1, got: 0 });
    };
    let mut xs = Vec::with_capacity(points.len());
    let mut ys = Vec::with_capacity(points.len());
    for (x, y) in points {
        xs.push(parse_number(x)?);
        ys.push(parse_number(y)?);
    }
    let (min_x, max_x) = min_max(xs.into_iter());
    let (min_y, max_y) = min_max(ys.into_iter());

    header.extend([
        ("FIRSTX", Some(first.0.clone())),
        ("LASTX", Some(last.0.clone())),
        ("MINX", Some(render_float(min_x))),
        ("MAXX", Some(render_float(max_x))),
        ("MINY", Some(render_float(min_y))),
        ("MAXY", Some(render_float(max_y))),
        ("NPOINTS", Some(points.len().to_string())),
        ("FIRSTY", Some(first.1.clone())),
        ("XYPOINTS", Some("(XY..XY)".to_string())),
    ]);

    Ok(points.iter().map(|(x, y)| format!("{x},{y}")).collect())
}

/// A value written as plain decimal text, split for digit-width encoding.
#[derive(Debug)]
struct Decimal {
    /// Sign and every digit, decimal point removed.
    digits: String,
    decimals: usize,
    value: f64,
}

fn parse_decimal(text: &str) -> Result<Decimal, WriteError> {
    let not_decimal = || WriteError::NotDecimal(text.to_string());
    let t = text.trim();
    let negative = t.starts_with('-');
    let unsigned = t.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(t);
    let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int.is_empty() && frac.is_empty()) || !all_digits(int) || !all_digits(frac) {
        return Err(not_decimal());
    }
    let value = t.parse::<f64>().map_err(|_| not_decimal())?;

    Ok(Decimal {
        digits: format!("{}{int}{frac}", if negative { "-" } else { "" }),
        decimals: frac.len(),
        value,
    })
}

fn parse_number(text: &str) -> Result<f64, WriteError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| WriteError::NotNumber(text.to_string()))
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

fn y_factor(decimals: usize) -> String {
    if decimals == 0 {
        return "1".to_string();
    }
    format!("1e-{decimals}")
        .parse::<f64>()
        .map(render_float)
        .unwrap_or_default()
}

/// Integral values keep a trailing `.0`, everything else uses the shortest
/// round-trip form.
fn render_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
