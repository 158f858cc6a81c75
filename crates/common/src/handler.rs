use anyhow::Result;

use crate::item::{FeatureSet, Item};
use crate::table::{Metadata, Table};

/// One pluggable file-shape recogniser and parser.
///
/// `check` runs for every item against every handler, so it must be cheap
/// and must only stage partial parses in `scratch`.  `get_tables` and
/// `get_metadata` may assume `check` matched the same item and that the
/// staged features were attached to it.
pub trait FormatHandler: Send + Sync {
    fn identifier(&self) -> &'static str;

    /// Lower values are tried first.
    fn priority(&self) -> i32;

    /// Does this handler understand `item`?  An `Err` counts as "no".
    fn check(&self, item: &Item, scratch: &mut FeatureSet) -> Result<bool>;

    fn get_tables(&self, item: &Item) -> Result<Vec<Table>>;

    fn get_metadata(&self, item: &Item) -> Result<Metadata> {
        Ok(base_metadata(self.identifier(), item))
    }
}

/// Summary fields every handler reports.  `type` defaults to the handler
/// identifier; handlers with a better discriminator overwrite it.
pub fn base_metadata(identifier: &str, item: &Item) -> Metadata {
    let mut m = Metadata::new();
    m.set("reader", identifier);
    m.set("name", item.name());
    if !item.path().is_empty() {
        m.set("path", item.path());
    }
    m.set("content_type", item.content_type());
    m.set("mime_type", item.mime_type());
    m.set("encoding", item.encoding().label());
    m.set("type", identifier);
    m
}

/// Run `check` with a fresh scratch set and attach what it staged only on a
/// match.
pub fn check_and_attach(handler: &dyn FormatHandler, item: &Item) -> Result<bool> {
    let mut scratch = FeatureSet::new();
    let matched = handler.check(item, &mut scratch)?;
    if matched {
        item.attach(scratch);
    }
    Ok(matched)
}
