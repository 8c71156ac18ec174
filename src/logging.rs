use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "STORYCAST_LOG";

fn env_filter() -> EnvFilter {
    if let Ok(level) = std::env::var(LOG_ENV)
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the process-wide subscriber; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}
