use regex::Regex;
use tracing::field::{Field, Visit};
use tracing::{Metadata, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Per-layer filter dropping events whose `target: message` matches one of
/// the configured patterns.  Useful for chatty dependencies such as
/// `pdf_extract`.
pub struct LogIgnoreFilter {
    patterns: Vec<Regex>,
}

impl LogIgnoreFilter {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    fn suppresses(&self, target: &str, message: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let candidate = format!("{target}: {message}");
        self.patterns.iter().any(|p| p.is_match(&candidate))
    }
}

impl<S: Subscriber> tracing_subscriber::layer::Filter<S> for LogIgnoreFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &tracing::Event<'_>, _cx: &Context<'_, S>) -> bool {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        // log-bridged records carry their real target in the `log.target` field
        let target = visitor.log_target.as_deref().unwrap_or_else(|| event.metadata().target());
        !self.suppresses(target, &visitor.message)
    }
}

/// Install the global subscriber: `RUST_LOG` (or `default_filter`) plus a fmt
/// layer on stderr behind the ignore filter.
pub fn init(default_filter: &str, ignore: &[String]) {
    let filter = match LogIgnoreFilter::new(ignore) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("invalid log ignore pattern: {e}");
            None
        }
    };
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter.unwrap_or(LogIgnoreFilter { patterns: Vec::new() }));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter.into()))
        .with(fmt)
        .init();
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    log_target: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "log.target" => self.log_target = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "log.target" => self.log_target = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppresses_matching_target_and_message() {
        let f = LogIgnoreFilter::new(&["^pdf_extract: unknown glyph".to_string()]).unwrap();
        assert!(f.suppresses("pdf_extract", "unknown glyph name 'g12'"));
        assert!(!f.suppresses("convert_archive", "unknown glyph name 'g12'"));
    }

    #[test]
    fn test_empty_patterns_pass_everything() {
        let f = LogIgnoreFilter::new(&[]).unwrap();
        assert!(!f.suppresses("any", "thing"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(LogIgnoreFilter::new(&["(".to_string()]).is_err());
    }
}
