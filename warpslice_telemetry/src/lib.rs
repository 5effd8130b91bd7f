//! Process-wide logging setup for tools built on `warpslice`.
//!
//! Library code only emits `tracing` events; binaries (and tests that
//! want to see the output) call [`initialize_logging`] once at startup.

use std::io::IsTerminal;
use std::str::FromStr;

pub use tracing::Level;
use tracing_glog::Glog;
use tracing_glog::GlogFields;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;

/// Environment variable to disable the glog logging layer.
/// Set to "1" to disable glog logging output.
pub const DISABLE_GLOG_TRACING: &str = "WARPSLICE_DISABLE_GLOG";

/// Set up logging for the current execution environment. Events are
/// written to stderr in glog format, at the level named by `RUST_LOG`
/// if it is set to a level, else `info` (`debug` under test).
///
/// Calling this more than once, or after another subscriber has been
/// installed, leaves the existing subscriber in place.
pub fn initialize_logging() {
    let default_level = match env::Env::current() {
        env::Env::Local => LevelFilter::INFO,
        env::Env::Test => LevelFilter::DEBUG,
    };
    let level = match std::env::var("RUST_LOG") {
        Ok(value) => LevelFilter::from_str(&value).unwrap_or(default_level),
        Err(_) => default_level,
    };

    let glog = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .event_format(Glog::default())
        .fmt_fields(GlogFields::default().compact())
        .with_ansi(std::io::stderr().is_terminal())
        .with_filter(level);

    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    if let Err(err) = Registry::default()
        .with(
            if std::env::var(DISABLE_GLOG_TRACING).unwrap_or_default() != "1" {
                Some(glog)
            } else {
                None
            },
        )
        .try_init()
    {
        tracing::debug!("logging already initialized for this process: {}", err);
        return;
    }
    tracing::debug!(
        environment = %env::Env::current(),
        %level,
        "logging initialized"
    );
}

pub mod env {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Env {
        Local,
        Test,
    }

    impl std::fmt::Display for Env {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "{}",
                match self {
                    Self::Local => "local",
                    Self::Test => "test",
                }
            )
        }
    }

    impl Env {
        #[cfg(test)]
        pub fn current() -> Self {
            Self::Test
        }

        #[cfg(not(test))]
        pub fn current() -> Self {
            Self::Local
        }
    }
}

pub mod test_utils {
    use tracing::Level;

    /// Install a global subscriber printing events at `level` and
    /// above. Handy when debugging a single test; unlike
    /// `#[traced_test]` it does not capture TRACE output.
    ///
    /// Panics if a global subscriber is already installed.
    pub fn set_tracing_env_filter(level: Level) {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(level.as_str()))
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
    }
}
