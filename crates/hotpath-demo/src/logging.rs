use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when RUST_LOG is unset, derived from HOTPATH_LOG.
fn default_directives(hotpath_log: Option<&str>) -> String {
    let level = match hotpath_log {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("hotpath={level},hotpath_demo={level}")
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean for
/// the records the demo prints.
///
/// RUST_LOG wins when set; otherwise HOTPATH_LOG picks the level.
/// LOG_FORMAT=json switches to one JSON object per line.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let hotpath_log = std::env::var("HOTPATH_LOG").ok();
        EnvFilter::new(default_directives(hotpath_log.as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_thread_names(true).with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info() {
        assert_eq!(default_directives(None), "hotpath=info,hotpath_demo=info");
        assert_eq!(
            default_directives(Some("nonsense")),
            "hotpath=info,hotpath_demo=info"
        );
    }

    #[test]
    fn warning_is_an_alias() {
        assert_eq!(default_directives(Some("warning")), default_directives(Some("warn")));
    }

    #[test]
    fn debug_applies_to_both_crates() {
        assert_eq!(default_directives(Some("debug")), "hotpath=debug,hotpath_demo=debug");
    }
}
