//! Tracing subscriber setup: `RUST_LOG` filter (default `leadsync=info`), JSON lines
//! when `RUST_LOG_FORMAT=json`, human-readable otherwise. Logs go to stderr so the
//! per-run summary on stdout stays clean.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "leadsync=info";

fn wants_json(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = std::env::var("RUST_LOG_FORMAT").ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if wants_json(format.as_deref()) {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
    }

    #[test]
    fn json_format_is_case_insensitive() {
        assert!(wants_json(Some("JSON")));
        assert!(!wants_json(Some("pretty")));
        assert!(!wants_json(None));
    }
}
