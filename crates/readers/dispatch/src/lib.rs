pub mod pipeline;

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use convert_common::handler::{check_and_attach, FormatHandler};
use convert_common::item::{FeatureSet, Item};

use convert_reader_alv::AlvAscReader;
use convert_reader_pdf::PdfLithozReader;
use convert_reader_pssession::PsSessionReader;
use convert_reader_text::TextTableReader;
use convert_reader_uxd::UxdReader;

/// Collects handlers before any item is dispatched.
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: Vec<Box<dyn FormatHandler>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: impl FormatHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Freeze the catalog, ordered by priority.  Handlers with equal priority
    /// keep their registration order.
    pub fn build(mut self) -> HandlerRegistry {
        self.handlers.sort_by_key(|h| h.priority());
        HandlerRegistry { handlers: self.handlers }
    }
}

/// Immutable, priority-ordered handler catalog.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn FormatHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &dyn FormatHandler> {
        self.handlers.iter().map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// First handler, in priority order, whose `check` accepts `item`.
    ///
    /// The winner's staged features are attached to `item`; nothing from the
    /// handlers tried before it is.  A `check` that errors or panics is
    /// treated as a non-match.
    pub fn dispatch(&self, item: &Item) -> Option<&dyn FormatHandler> {
        let found = self
            .handlers()
            .find(|h| guarded(*h, item, || check_and_attach(*h, item)));
        match found {
            Some(h) => debug!("'{}' -> {}", item.display_path(), h.identifier()),
            None => debug!("'{}' -> no handler", item.display_path()),
        }
        found
    }

    /// Identifiers of every handler that would accept `item`, in priority
    /// order.  Leaves `item` untouched.
    pub fn matching(&self, item: &Item) -> Vec<&'static str> {
        self.handlers()
            .filter(|h| guarded(*h, item, || h.check(item, &mut FeatureSet::new())))
            .map(|h| h.identifier())
            .collect()
    }
}

fn guarded<F>(handler: &dyn FormatHandler, item: &Item, check: F) -> bool
where
    F: FnOnce() -> anyhow::Result<bool>,
{
    match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(Ok(matched)) => matched,
        Ok(Err(e)) => {
            debug!("{} check failed on '{}': {e:#}", handler.identifier(), item.display_path());
            false
        }
        Err(_) => {
            warn!("{} check panicked on '{}'", handler.identifier(), item.display_path());
            false
        }
    }
}

/// The catalog shipped with the converter.
pub fn default_registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(PsSessionReader)
        .register(UxdReader)
        .register(AlvAscReader)
        .register(PdfLithozReader)
        .register(TextTableReader)
        .build()
}
