use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use convert_common::config::LimitsConfig;
use convert_common::item::Item;
use convert_common::table::{Metadata, Table};

use crate::HandlerRegistry;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// No handler recognised the item.  Not a failure of any handler.
    #[error("no handler recognises '{name}'")]
    Unsupported { name: String },
    /// A handler matched and then failed to parse.  Never retried with
    /// another handler.
    #[error("{handler} failed on '{item}': {error:#}")]
    Handler {
        handler: &'static str,
        item: String,
        error: anyhow::Error,
    },
}

/// Everything one handler extracted from one item.
#[derive(Debug, Serialize)]
pub struct Conversion {
    pub handler: &'static str,
    pub metadata: Metadata,
    pub tables: Vec<Table>,
}

/// Outcome for one item of an upload.
#[derive(Debug)]
pub struct ItemReport {
    /// Upload name, or `container/member` for archive members.
    pub path: String,
    pub mime_type: String,
    pub result: Result<Conversion, ConvertError>,
}

impl ItemReport {
    pub fn is_supported(&self) -> bool {
        !matches!(self.result, Err(ConvertError::Unsupported { .. }))
    }
}

impl Serialize for ItemReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("path", &self.path)?;
        map.serialize_entry("mime_type", &self.mime_type)?;
        match &self.result {
            Ok(conversion) => {
                map.serialize_entry("status", "converted")?;
                map.serialize_entry("handler", conversion.handler)?;
                map.serialize_entry("metadata", &conversion.metadata)?;
                map.serialize_entry("tables", &conversion.tables)?;
            }
            Err(ConvertError::Unsupported { .. }) => {
                map.serialize_entry("status", "unsupported")?;
            }
            Err(e) => {
                map.serialize_entry("status", "failed")?;
                if let ConvertError::Handler { handler, .. } = e {
                    map.serialize_entry("handler", handler)?;
                }
                map.serialize_entry("error", &e.to_string())?;
            }
        }
        map.end()
    }
}

/// Dispatch `item` and run the winning handler.
pub fn convert_item(registry: &HandlerRegistry, item: &Item) -> Result<Conversion, ConvertError> {
    let handler = registry
        .dispatch(item)
        .ok_or_else(|| ConvertError::Unsupported { name: item.display_path() })?;
    let failed = |error: anyhow::Error| ConvertError::Handler {
        handler: handler.identifier(),
        item: item.display_path(),
        error,
    };

    let metadata = handler.get_metadata(item).map_err(failed)?;
    let tables = handler.get_tables(item).map_err(failed)?;
    debug!(
        "{} produced {} table(s) from '{}'",
        handler.identifier(),
        tables.len(),
        item.display_path()
    );
    Ok(Conversion { handler: handler.identifier(), metadata, tables })
}

/// Convert one upload.
///
/// The upload itself is dispatched first, so handlers that understand a
/// whole container get the chance to.  A container nobody claims is opened
/// and each member converted on its own, descending at most
/// `limits.max_archive_depth` levels.  Size limits on the upload itself are
/// the caller's job.
pub fn convert_upload(
    registry: &HandlerRegistry,
    bytes: Vec<u8>,
    name: &str,
    content_type: &str,
    limits: &LimitsConfig,
) -> Vec<ItemReport> {
    let item = Item::new(bytes, name, content_type);
    let mut reports = Vec::new();
    process(registry, item, limits, 0, &mut reports);

    let converted = reports.iter().filter(|r| r.result.is_ok()).count();
    info!("'{name}': {converted} of {} item(s) converted", reports.len());
    reports
}

fn process(
    registry: &HandlerRegistry,
    item: Item,
    limits: &LimitsConfig,
    depth: usize,
    reports: &mut Vec<ItemReport>,
) {
    let result = convert_item(registry, &item);

    let unclaimed = matches!(result, Err(ConvertError::Unsupported { .. }));
    if unclaimed && item.is_container() {
        if depth >= limits.max_archive_depth {
            warn!("'{}' is nested too deep, not expanded", item.display_path());
        } else {
            let mut members = convert_archive::expand(&item);
            if members.len() > limits.max_archive_members {
                warn!(
                    "'{}' has {} members, only the first {} are converted",
                    item.display_path(),
                    members.len(),
                    limits.max_archive_members
                );
                members.truncate(limits.max_archive_members);
            }
            if !members.is_empty() {
                let prefix = item.display_path();
                for member in members {
                    let path = if member.path().is_empty() {
                        prefix.clone()
                    } else {
                        format!("{prefix}/{}", member.path())
                    };
                    process(registry, member.with_path(&path), limits, depth + 1, reports);
                }
                return;
            }
        }
    }

    reports.push(ItemReport {
        path: item.display_path(),
        mime_type: item.mime_type().to_string(),
        result,
    });
}
