use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "PICSHARE_LOG";

/// Picks the filter directive: `PICSHARE_LOG`, then `RUST_LOG`, then the
/// verbosity default.
pub fn filter_directive(verbose: bool) -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| default_directive(verbose).to_string())
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,picshare=debug"
    } else {
        "warn"
    }
}

/// Installs the global subscriber. Logs go to stderr so stdout stays clean
/// for feed output. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let directive = filter_directive(verbose);
    let filter = EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_default_enables_crate_debug() {
        assert_eq!(default_directive(true), "warn,picshare=debug");
        assert_eq!(default_directive(false), "warn");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(false);
        init(true);
    }
}
