use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "vitals=info";

/// Install the global subscriber. Logs go to stderr so stdout stays clean for exports.
///
/// `RUST_LOG` replaces the `vitals=info` default when it is set and valid.
pub fn init_logging() -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(env_filter(rust_log.as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}
