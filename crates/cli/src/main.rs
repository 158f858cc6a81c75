use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use convert_common::config::{default_config_path, load_config, ConverterConfig};
use convert_common::item::Item;
use convert_common::logging;
use convert_dispatch::default_registry;
use convert_dispatch::pipeline::{convert_upload, ItemReport};
use convert_jcamp::{JcampOptions, SpectrumData};

mod upload;

/// Exit status when no item of the upload was recognised.
const EXIT_UNSUPPORTED: i32 = 2;

#[derive(Parser)]
#[command(name = "spectra-convert", about = "Convert instrument exports into tables and JCAMP-DX")]
struct Args {
    /// Config file (default: ~/.config/spectra-convert/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print effective configuration with defaults filled in
    Config,
    /// List registered readers in dispatch order
    Readers,
    /// Show how a file is classified and, for archives, what it contains
    Inspect {
        file: PathBuf,
    },
    /// Convert a file and print the extracted tables as JSON
    Convert {
        file: PathBuf,
        /// Compact single-line JSON
        #[arg(long)]
        compact: bool,
    },
    /// Convert a file and write two columns of one table as JCAMP-DX
    Jcamp {
        file: PathBuf,
        /// Table index, counted across all converted items
        #[arg(long, default_value_t = 0)]
        table: usize,
        #[arg(long, default_value_t = 0)]
        x_column: usize,
        #[arg(long, default_value_t = 1)]
        y_column: usize,
        #[arg(long)]
        title: Option<String>,
        /// Write evenly spaced XYDATA instead of XYPOINTS
        #[arg(long)]
        xydata: bool,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    logging::init("warn,spectra_convert=info", &config.log.ignore);

    match args.command {
        Command::Config => {
            let toml = toml::to_string_pretty(&config).context("serializing config to TOML")?;
            let path = args.config.map(PathBuf::from).unwrap_or_else(default_config_path);
            println!("# Effective configuration (file: {})", path.display());
            print!("{toml}");
        }

        Command::Readers => {
            for handler in default_registry().handlers() {
                println!("{:>6}  {}", handler.priority(), handler.identifier());
            }
        }

        Command::Inspect { file } => {
            let bytes = upload::read_upload(&file, &config.limits)?;
            let name = upload::upload_name(&file);
            let item = Item::new(bytes, &name, "");
            let members: Vec<_> = convert_archive::expand_recursive(&item, config.limits.max_archive_depth)
                .iter()
                .map(|m| {
                    json!({
                        "path": m.display_path(),
                        "size": m.len(),
                        "mime_type": m.mime_type(),
                        "encoding": m.encoding(),
                    })
                })
                .collect();
            let readers = default_registry().matching(&item);
            let out = json!({
                "name": name,
                "classification": item.classification(),
                "readers": readers,
                "members": members,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Command::Convert { file, compact } => {
            let reports = run(&file, &config)?;
            let out = if compact {
                serde_json::to_string(&reports)?
            } else {
                serde_json::to_string_pretty(&reports)?
            };
            println!("{out}");
            if !reports.iter().any(|r| r.is_supported()) {
                std::process::exit(EXIT_UNSUPPORTED);
            }
        }

        Command::Jcamp { file, table, x_column, y_column, title, xydata, output } => {
            let reports = run(&file, &config)?;
            let Some(selected) = reports
                .iter()
                .filter_map(|r| r.result.as_ref().ok())
                .flat_map(|c| c.tables.iter())
                .nth(table)
            else {
                bail!("{} has no table #{table}", file.display());
            };

            let points = SpectrumData::points_from_table(selected, x_column, y_column)?;
            let data = if xydata { evenly_spaced(points)? } else { points };

            let mut opts = JcampOptions::from_config(&config.jcamp);
            if let Some(title) = title {
                opts.title = title;
            }
            let doc = convert_jcamp::write(&data, &opts)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, doc).with_context(|| format!("writing {}", path.display()))?;
                    info!("wrote {}", path.display());
                }
                None => print!("{doc}"),
            }
        }
    }
    Ok(())
}

fn run(file: &Path, config: &ConverterConfig) -> Result<Vec<ItemReport>> {
    let bytes = upload::read_upload(file, &config.limits)?;
    let name = upload::upload_name(file);
    let registry = default_registry();
    Ok(convert_upload(&registry, bytes, &name, "application/octet-stream", &config.limits))
}

/// Reinterpret (x, y) pairs as a series spanning the first to the last x.
fn evenly_spaced(data: SpectrumData) -> Result<SpectrumData> {
    let points = match data {
        SpectrumData::XyPoints(points) => points,
        other => return Ok(other),
    };
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        bail!("selected columns hold no values");
    };
    Ok(SpectrumData::XyData {
        first_x: first.0.clone(),
        last_x: last.0.clone(),
        y: points.iter().map(|(_, y)| y.clone()).collect(),
    })
}
