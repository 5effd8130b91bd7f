//! Runtime options.
//!
//! Options are read from the environment:
//!
//! | variable                              | field                        | default |
//! |---------------------------------------|------------------------------|---------|
//! | `WARPSLICE_KERNEL_EVENTS_DEPTH`       | `kernel_events_depth`        | `0`     |
//! | `WARPSLICE_KERNEL_EVENTS_SYSTEM`      | `kernel_events_system`       | `false` |
//! | `WARPSLICE_KERNEL_EVENTS_APPLICATION` | `kernel_events_application` | `true`  |
//!
//! Values that do not parse are reported and ignored.

use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

pub const KERNEL_EVENTS_DEPTH: &str = "WARPSLICE_KERNEL_EVENTS_DEPTH";
pub const KERNEL_EVENTS_SYSTEM: &str = "WARPSLICE_KERNEL_EVENTS_SYSTEM";
pub const KERNEL_EVENTS_APPLICATION: &str = "WARPSLICE_KERNEL_EVENTS_APPLICATION";

/// Options controlling which kernel events are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Report events only for kernels nested less deeply than this.
    /// 0 reports kernels at any depth.
    pub kernel_events_depth: u32,
    /// Report events of system kernels.
    pub kernel_events_system: bool,
    /// Report events of application kernels.
    pub kernel_events_application: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_events_depth: 0,
            kernel_events_system: false,
            kernel_events_application: true,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable
    /// name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        override_from(&lookup, KERNEL_EVENTS_DEPTH, &mut config.kernel_events_depth);
        override_from(&lookup, KERNEL_EVENTS_SYSTEM, &mut config.kernel_events_system);
        override_from(
            &lookup,
            KERNEL_EVENTS_APPLICATION,
            &mut config.kernel_events_application,
        );
        config
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(name) else {
        return;
    };
    match value.trim().parse() {
        Ok(parsed) => *field = parsed,
        Err(err) => tracing::warn!("ignoring {}={:?}: {}", name, value, err),
    }
}
