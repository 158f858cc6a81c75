mod sample;

use anyhow::{Context, Result};
use tracing::debug;

use convert_common::handler::{base_metadata, FormatHandler};
use convert_common::item::{Feature, FeatureKey, FeatureSet, Item};
use convert_common::table::{join_values, Metadata, Table};

pub use sample::{is_alv, AlvError, AlvSample};

/// Header fields folded into the sample timestamp instead of the metadata.
const TIMESTAMP_FIELDS: [&str; 2] = ["Date", "Time"];

/// Per-sample ALV header fields and the canonical batch keys they are
/// published under, one value per sample.
const CANONICAL_SERIES: [(&str, &str); 7] = [
    ("Refractive Index", "refractive index"),
    ("Temperature [K]", "temperature [K]"),
    ("Viscosity [cp]", "viscosity [mPas]"),
    ("Angle [°]", "detection angle [degrees]"),
    ("Diffusion Coefficient 2. order fit [µm²/s]", "average diffusion coefficient [micron^2/s]"),
    ("Expansion Parameter µ2", "second cumulant (expansion parameter)"),
    ("Hydrodynamic Radius 2. order fit [nm]", "hydrodynamic radius [nm]"),
];

/// Batches of ALV dynamic light scattering runs, uploaded as one tar
/// container with an `.asc` file per run.
///
/// The whole batch becomes a single table: one column per sample in
/// measurement order, one row per correlation channel.
pub struct AlvAscReader;

impl FormatHandler for AlvAscReader {
    fn identifier(&self) -> &'static str {
        "alv_asc_reader"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn check(&self, item: &Item, scratch: &mut FeatureSet) -> Result<bool> {
        if !item.is_container() {
            return Ok(false);
        }
        let listed = convert_archive::member_names(item);
        if !listed.iter().any(|name| name.to_ascii_lowercase().ends_with(".asc")) {
            return Ok(false);
        }
        let members: Vec<Item> = convert_archive::expand(item)
            .into_iter()
            .filter(|m| m.suffix() == ".asc" && m.text().is_some_and(is_alv))
            .collect();
        if members.is_empty() {
            return Ok(false);
        }
        debug!("'{}' holds {} ALV sample(s)", item.display_path(), members.len());
        scratch.insert(FeatureKey::AlvMembers, Feature::Members(members));
        Ok(true)
    }

    fn get_tables(&self, item: &Item) -> Result<Vec<Table>> {
        let feature = item.feature(FeatureKey::AlvMembers)?;
        let members = feature
            .as_members()
            .ok_or_else(|| item.mismatch(FeatureKey::AlvMembers))?;

        let mut samples = Vec::with_capacity(members.len());
        for member in members {
            let path = member.display_path();
            let text = member
                .text()
                .with_context(|| format!("{path} is not text"))?;
            samples.push(AlvSample::parse(&path, text)?);
        }
        Ok(vec![aggregate(samples)?])
    }

    fn get_metadata(&self, item: &Item) -> Result<Metadata> {
        let mut metadata = base_metadata(self.identifier(), item);
        metadata.set("type", "alv_dls_batch");
        let feature = item.feature(FeatureKey::AlvMembers)?;
        let count = feature.as_members().map(<[Item]>::len).unwrap_or(0);
        metadata.set("samples", count.to_string());
        Ok(metadata)
    }
}

/// Merge per-run samples into one table ordered by measurement time.
pub fn aggregate(mut samples: Vec<AlvSample>) -> Result<Table> {
    samples.sort_by_key(|s| s.timestamp);
    let first = samples.first().ok_or(AlvError::NoSamples)?;
    let start = first.timestamp;

    let mut table = Table::new();
    table.header = first.header.clone();

    for (idx, sample) in samples.iter().enumerate() {
        table.add_column(idx.to_string(), sample.identifier())?;
    }

    let height = samples.iter().map(|s| s.correlation.len()).max().unwrap_or(0);
    for i in 0..height {
        let row = samples
            .iter()
            .map(|s| s.correlation.get(i).cloned().unwrap_or_default())
            .collect();
        table.push_row(row)?;
    }

    // pivot: one metadata entry per field, one value per sample
    let mut keys: Vec<&str> = Vec::new();
    for sample in &samples {
        for key in sample.fields.keys() {
            if !TIMESTAMP_FIELDS.contains(&key.as_str()) && !keys.contains(&key.as_str()) {
                keys.push(key.as_str());
            }
        }
    }
    for key in keys {
        table.metadata.set(key, series(&samples, key));
    }
    canonical_fields(&samples, first, &mut table.metadata);

    table.metadata.set(
        "measurement starting time",
        start.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    let offsets: Vec<String> = samples
        .iter()
        .map(|s| (s.timestamp - start).num_seconds().to_string())
        .collect();
    table.metadata.set("duration [s]", join_values(&offsets));

    table.set_dimensions();
    Ok(table)
}

fn series(samples: &[AlvSample], key: &str) -> String {
    let values: Vec<&str> = samples
        .iter()
        .map(|s| s.fields.get(key).map(String::as_str).unwrap_or(""))
        .collect();
    join_values(&values)
}

/// Batch-level keys under their canonical names.  Single-valued fields come
/// from the earliest sample; the device string loses its `/` suffix.
fn canonical_fields(samples: &[AlvSample], first: &AlvSample, metadata: &mut Metadata) {
    if let Some(name) = first.fields.get("Samplename") {
        metadata.set("Samplename", name.as_str());
    }
    if let Some(device) = first.fields.get("Device Info") {
        let model = device.split('/').next().unwrap_or_default().trim();
        metadata.set("Device Info", model);
    }
    if let Some(wavelength) = first.fields.get("Wavelength [nm]") {
        metadata.set("wavelength [nm]", wavelength.as_str());
    }
    for (source, canonical) in CANONICAL_SERIES {
        if samples.iter().any(|s| s.fields.contains_key(source)) {
            metadata.set(canonical, series(samples, source));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convert_common::handler::check_and_attach;
    use std::io::Write;

    fn asc(name: &str, date: &str, time: &str, corr: &[&str]) -> String {
        let mut s = format!(
            "ALV-5000/E-WIN Data\nDate :\t\"{date}\"\nTime :\t\"{time}\"\nSamplename : \t\"{name}\"\nWavelength [nm] :\t632.8\n\n\"Correlation\"\n"
        );
        for (i, c) in corr.iter().enumerate() {
            s.push_str(&format!("  {}\t{c}\n", (i + 1) as f64 * 0.25));
        }
        s
    }

    fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_bytes()).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&tar).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_aggregate_orders_by_timestamp() {
        let samples = vec![
            AlvSample::parse("b.asc", &asc("B", "12.03.2021", "10:15:00", &["1.2", "1.1"])).unwrap(),
            AlvSample::parse("a.asc", &asc("A", "12.03.2021", "09:00:00", &["1.5"])).unwrap(),
            AlvSample::parse("c.asc", &asc("C", "12.03.2021", "11:30:00", &["1.3", "1.0"])).unwrap(),
        ];
        let t = aggregate(samples).unwrap();

        let names: Vec<_> = t.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        assert_eq!(t.rows()[0], ["1.5", "1.2", "1.3"]);
        assert_eq!(t.rows()[1], ["", "1.1", "1.0"]);
        assert_eq!(t.metadata.get("Samplename"), Some("A"));
        assert_eq!(t.metadata.get("Wavelength [nm]"), Some("632.8, 632.8, 632.8"));
        assert_eq!(t.metadata.get("measurement starting time"), Some("2021-03-12 09:00:00"));
        assert_eq!(t.metadata.get("duration [s]"), Some("0, 4500, 9000"));
        assert!(!t.metadata.contains_key("Date"));
        assert_eq!(t.metadata.get("rows"), Some("2"));
        assert_eq!(t.metadata.get("columns"), Some("3"));
    }

    #[test]
    fn test_canonical_batch_keys() {
        let extra = "Device Info :\t\"ALV-7004/USB/CGS-3\"\nTemperature [K] :\t298.15\nViscosity [cp] :\t0.89\n\
                     Angle [°] :\t90.0\nHydrodynamic Radius 2. order fit [nm] :\t{r}\n";
        let with_extra = |name: &str, time: &str, r: &str| {
            let mut text = asc(name, "05.09.2023", time, &["1.7"]);
            let split = text.find("\n\n").unwrap();
            text.insert_str(split + 1, &extra.replace("{r}", r));
            AlvSample::parse(&format!("{name}.asc"), &text).unwrap()
        };
        let t = aggregate(vec![with_extra("late", "10:00:00", "55.1"), with_extra("early", "09:00:00", "52.4")]).unwrap();

        assert_eq!(t.metadata.get("Samplename"), Some("early"));
        assert_eq!(t.metadata.get("Device Info"), Some("ALV-7004"));
        assert_eq!(t.metadata.get("wavelength [nm]"), Some("632.8"));
        assert_eq!(t.metadata.get("temperature [K]"), Some("298.15, 298.15"));
        assert_eq!(t.metadata.get("viscosity [mPas]"), Some("0.89, 0.89"));
        assert_eq!(t.metadata.get("detection angle [degrees]"), Some("90.0, 90.0"));
        assert_eq!(t.metadata.get("hydrodynamic radius [nm]"), Some("52.4, 55.1"));
        assert!(!t.metadata.contains_key("refractive index"));
        // raw pivot is kept alongside
        assert_eq!(t.metadata.get("Temperature [K]"), Some("298.15, 298.15"));
    }

    #[test]
    fn test_aggregate_empty_is_error() {
        let err = aggregate(vec![]).unwrap_err();
        assert!(matches!(err.downcast_ref::<AlvError>(), Some(AlvError::NoSamples)));
    }

    #[test]
    fn test_check_and_tables_from_container() {
        let s2 = asc("S2", "01.02.2022", "08:00:10", &["1.9"]);
        let s1 = asc("S1", "01.02.2022", "08:00:00", &["1.8"]);
        let bytes = tar_gz(&[
            ("run/s2.asc", s2.as_str()),
            ("run/s1.asc", s1.as_str()),
            ("run/notes.txt", "not a sample"),
            ("run/other.asc", "some other instrument\n"),
        ]);
        let item = Item::new(bytes, "batch.tar.gz", "application/gzip");
        let r = AlvAscReader;
        assert!(check_and_attach(&r, &item).unwrap());

        let tables = r.get_tables(&item).unwrap();
        assert_eq!(tables.len(), 1);
        let names: Vec<_> = tables[0].columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["S1", "S2"]);

        let m = r.get_metadata(&item).unwrap();
        assert_eq!(m.get("type"), Some("alv_dls_batch"));
        assert_eq!(m.get("samples"), Some("2"));
    }

    #[test]
    fn test_check_rejects_plain_files_and_foreign_containers() {
        let r = AlvAscReader;
        let plain = Item::new(asc("S", "01.02.2022", "08:00:00", &[]).into_bytes(), "s.asc", "");
        assert!(!check_and_attach(&r, &plain).unwrap());

        let other = Item::new(tar_gz(&[("a.txt", "1 2 3\n")]), "other.tar.gz", "");
        assert!(!check_and_attach(&r, &other).unwrap());
        assert!(!other.has_feature(FeatureKey::AlvMembers));
    }

    #[test]
    fn test_bad_member_timestamp_surfaces() {
        let r = AlvAscReader;
        let item = Item::new(tar_gz(&[("x.asc", "ALV-5000\nSamplename : \"X\"\n")]), "batch.tgz", "");
        assert!(check_and_attach(&r, &item).unwrap());
        let err = r.get_tables(&item).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlvError>(),
            Some(AlvError::MissingTimestamp { member }) if member == "x.asc"
        ));
    }
}
