/// Initialize tracing for the application.
///
/// `level` is one of `error`, `warn`, `info`, `debug`, `trace`; anything else
/// falls back to `info`. When `debug` is set the level is raised to at least
/// `debug` regardless of `level`.
pub fn init(level: &str, debug: bool) {
    let lvl = if debug {
        match parse_level(level) {
            tracing::Level::TRACE => tracing::Level::TRACE,
            _ => tracing::Level::DEBUG,
        }
    } else {
        parse_level(level)
    };

    // try_init so tests can call this more than once
    let _ = tracing_subscriber::fmt()
        .with_max_level(lvl)
        .with_target(false)
        .try_init();
}

pub(crate) fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
