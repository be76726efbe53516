use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

/// HTTP client internals log every request at `info`; keep them quiet unless
/// something breaks.
pub const DEFAULT_FILTER: &str = "info,reqwest=error,hyper=error,hyper_util=error";

/// Build the logger for one workflow run. Nothing is installed globally;
/// callers attach it with `WithSubscriber`.
pub fn subscriber() -> impl Subscriber + Send + Sync + 'static {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish()
}
