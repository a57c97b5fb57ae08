use std::fmt::Display;
use tracing::{Span, field};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Tag `span` with the outcome of the operation it covers
pub(crate) fn record_outcome<T, E: Display>(span: &Span, result: &Result<T, E>) {
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(e) => {
            span.record("error", field::display(e));
            span.record("otel.status_code", "ERROR");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info_span;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_record_outcome_without_subscriber_is_harmless() {
        let span = info_span!("test", error = field::Empty, otel.status_code = field::Empty);
        record_outcome::<(), _>(&span, &Err("boom"));
        record_outcome::<_, String>(&span, &Ok(1));
    }
}
