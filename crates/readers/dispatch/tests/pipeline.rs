use std::io::Write;

use convert_common::config::LimitsConfig;
use convert_common::item::Item;
use convert_dispatch::default_registry;
use convert_dispatch::pipeline::{convert_upload, ConvertError, ItemReport};

fn tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

fn alv_sample(name: &str, time: &str, correlation: &[&str]) -> Vec<u8> {
    let mut s = format!(
        "ALV-7004/USB\r\nDate :\t\"05.09.2023\"\r\nTime :\t\"{time}\"\r\nSamplename : \t\"{name}\"\r\n\
         Temperature [K] :\t     298.15000\r\nWavelength [nm] :\t     632.80000\r\n\r\n\"Correlation\"\r\n"
    );
    for (i, c) in correlation.iter().enumerate() {
        s.push_str(&format!("  {:.5}\t  {c}\r\n", 0.0125 * (i + 1) as f64));
    }
    s.push_str("\r\n\"Count Rate\"\r\n       0.15625\t     100.2\r\n");
    s.into_bytes()
}

fn assert_aligned(reports: &[ItemReport]) {
    for report in reports {
        if let Ok(conversion) = &report.result {
            for table in &conversion.tables {
                let width = table.columns().len();
                assert!(table.rows().iter().all(|r| r.len() == width), "{}", report.path);
                assert_eq!(table.metadata.get("rows"), Some(table.rows().len().to_string().as_str()));
                assert_eq!(table.metadata.get("columns"), Some(width.to_string().as_str()));
            }
        }
    }
}

#[test]
fn test_batch_of_alv_samples_becomes_one_table() {
    let late = alv_sample("PS-3", "14:02:10", &["1.71", "1.52", "1.21"]);
    let early = alv_sample("PS-1", "09:30:00", &["1.80", "1.60"]);
    let middle = alv_sample("PS-2", "11:45:30", &["1.75", "1.55", "1.30"]);
    let archive = gzip(&tar(&[
        ("batch/c.asc", late.as_slice()),
        ("batch/a.asc", middle.as_slice()),
        ("batch/b.asc", early.as_slice()),
    ]));

    let registry = default_registry();
    let reports = convert_upload(&registry, archive, "batch.tar.gz", "application/gzip", &LimitsConfig::default());

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.path, "batch.tar.gz");
    let conversion = report.result.as_ref().unwrap();
    assert_eq!(conversion.handler, "alv_asc_reader");
    assert_eq!(conversion.metadata.get("type"), Some("alv_dls_batch"));
    assert_eq!(conversion.metadata.get("samples"), Some("3"));

    assert_eq!(conversion.tables.len(), 1);
    let table = &conversion.tables[0];
    let columns: Vec<_> = table.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, ["PS-1", "PS-2", "PS-3"]);
    assert_eq!(table.rows().len(), 3);
    assert_eq!(table.rows()[2], ["", "1.30", "1.21"]);
    assert_eq!(table.metadata.get("measurement starting time"), Some("2023-09-05 09:30:00"));
    assert_eq!(table.metadata.get("duration [s]"), Some("0, 8130, 16330"));
    assert_eq!(table.metadata.get("Temperature [K]"), Some("298.15000, 298.15000, 298.15000"));
    assert_eq!(table.metadata.get("temperature [K]"), Some("298.15000, 298.15000, 298.15000"));
    assert_eq!(table.metadata.get("wavelength [nm]"), Some("632.80000"));
    assert_eq!(table.metadata.get("Samplename"), Some("PS-1"));
    assert_eq!(table.metadata.get("rows"), Some("3"));
    assert_eq!(table.metadata.get("columns"), Some("3"));
    assert_aligned(&reports);
}

#[test]
fn test_unrecognised_binary_is_reported_not_raised() {
    let registry = default_registry();
    let blob: Vec<u8> = (0u8..=255).cycle().take(2048).collect();
    let reports = convert_upload(&registry, blob, "scan.raw", "application/octet-stream", &LimitsConfig::default());

    assert_eq!(reports.len(), 1);
    assert!(!reports[0].is_supported());
    assert!(matches!(&reports[0].result, Err(ConvertError::Unsupported { name }) if name == "scan.raw"));

    let json = serde_json::to_value(&reports[0]).unwrap();
    assert_eq!(json["status"], "unsupported");
}

#[test]
fn test_specific_handler_wins_over_text_fallback() {
    let uxd = b"_FILEVERSION=2\n_SAMPLE='PD-01'\n120 130 125\n".to_vec();
    let registry = default_registry();

    let item = Item::new(uxd.clone(), "PD-01.uxd", "");
    assert_eq!(registry.matching(&item), ["uxd_reader", "text_table_reader"]);

    let reports = convert_upload(&registry, uxd, "PD-01.uxd", "", &LimitsConfig::default());
    let conversion = reports[0].result.as_ref().unwrap();
    assert_eq!(conversion.handler, "uxd_reader");
    assert_eq!(conversion.tables[0].rows().len(), 3);
}

#[test]
fn test_unclaimed_container_is_converted_member_by_member() {
    let archive = gzip(&tar(&[
        ("runs/PD-01.uxd", b"_FILEVERSION=3\n10.00\t120\n10.02\t133\n".as_slice()),
        ("runs/absorbance.csv", b"nm,A\n200,0.51\n201,0.49\n".as_slice()),
        ("runs/photo.bin", [0u8, 1, 2, 3, 0, 0, 7].as_slice()),
    ]));
    let registry = default_registry();
    let reports = convert_upload(&registry, archive, "upload.tgz", "", &LimitsConfig::default());

    let summary: Vec<_> = reports
        .iter()
        .map(|r| (r.path.as_str(), r.result.as_ref().map(|c| c.handler).ok()))
        .collect();
    assert_eq!(
        summary,
        [
            ("upload.tgz/runs/PD-01.uxd", Some("uxd_reader")),
            ("upload.tgz/runs/absorbance.csv", Some("text_table_reader")),
            ("upload.tgz/runs/photo.bin", None),
        ]
    );
    assert_aligned(&reports);
}

#[test]
fn test_nesting_and_member_limits_apply() {
    let inner = tar(&[("deep.csv", b"1,2\n".as_slice())]);
    let outer = tar(&[
        ("a.csv", b"1,2\n".as_slice()),
        ("b.csv", b"3,4\n".as_slice()),
        ("inner.tar", inner.as_slice()),
    ]);
    let registry = default_registry();

    let shallow = LimitsConfig { max_archive_depth: 1, ..LimitsConfig::default() };
    let reports = convert_upload(&registry, outer.clone(), "outer.tar", "", &shallow);
    let paths: Vec<_> = reports.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["outer.tar/a.csv", "outer.tar/b.csv", "outer.tar/inner.tar"]);
    assert!(!reports[2].is_supported());

    let deep = convert_upload(&registry, outer.clone(), "outer.tar", "", &LimitsConfig::default());
    assert_eq!(deep.last().map(|r| r.path.as_str()), Some("outer.tar/inner.tar/deep.csv"));

    let few = LimitsConfig { max_archive_members: 1, ..LimitsConfig::default() };
    let reports = convert_upload(&registry, outer, "outer.tar", "", &few);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].path, "outer.tar/a.csv");
}

#[test]
fn test_quoted_csv_is_converted() {
    let registry = default_registry();
    let csv = b"\"wavenumber\",\"absorbance\"\n\"400.0\",\"0.51\"\n\"401.0\",\"0.49\"\n".to_vec();
    let reports = convert_upload(&registry, csv, "ir.csv", "text/csv", &LimitsConfig::default());
    let conversion = reports[0].result.as_ref().unwrap();
    assert_eq!(conversion.handler, "text_table_reader");
    assert_eq!(conversion.tables[0].rows()[1], ["401.0", "0.49"]);

    let labelled = b"name,x,y\n\"a, b\",1,2\n".to_vec();
    let reports = convert_upload(&registry, labelled, "samples.csv", "", &LimitsConfig::default());
    let conversion = reports[0].result.as_ref().unwrap();
    assert_eq!(conversion.tables[0].rows()[0], ["a, b", "1", "2"]);
    assert_aligned(&reports);
}
