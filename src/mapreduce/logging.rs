use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over the default directive.
pub fn init(verbose: bool) {
    let directive = if verbose { "janus_mr=debug" } else { "janus_mr=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
