use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, writing to stderr so stdout only carries
/// transcript output. The library logs through `log`; those records are
/// bridged into the subscriber.
///
/// Log level is Debug in development builds and Info in production builds.
/// `RUST_LOG` overrides it, and `verbose` forces Debug.
pub fn init(verbose: bool) {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
