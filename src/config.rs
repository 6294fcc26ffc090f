//! Run-time knobs read from the environment once at startup.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_VERBOSE: &str = "SELFEXTRACT_VERBOSE";
pub const ENV_DIR: &str = "SELFEXTRACT_DIR";
pub const ENV_STARTUP: &str = "SELFEXTRACT_STARTUP";
pub const ENV_EXTRACT_ONLY: &str = "SELFEXTRACT_EXTRACT_ONLY";
pub const ENV_GRACE_TIMEOUT: &str = "SELFEXTRACT_GRACE_TIMEOUT";

/// Startup program launched when none is configured.
pub const DEFAULT_STARTUP: &str = "selfextract_startup";

/// Delay between a termination signal and the forced exit.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Immutable snapshot of every environment setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Enable debug logging.
    pub verbose: bool,
    /// Persistent extraction directory; `None` means a temporary one.
    pub extract_dir: Option<PathBuf>,
    /// Name of the startup program inside the extraction directory.
    pub startup: String,
    /// Extract and exit without launching anything.
    pub extract_only: bool,
    /// Grace period after a termination signal.
    pub grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            extract_dir: None,
            startup: DEFAULT_STARTUP.to_string(),
            extract_only: false,
            grace: DEFAULT_GRACE,
        }
    }
}

impl Config {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset. An unparsable or negative grace timeout
    /// keeps the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let flag = |name: &str| get(name).is_some_and(|v| is_truthy(&v.to_string_lossy()));

        Self {
            verbose: flag(ENV_VERBOSE),
            extract_dir: get(ENV_DIR).map(PathBuf::from),
            startup: get(ENV_STARTUP).map_or_else(
                || DEFAULT_STARTUP.to_string(),
                |v| v.to_string_lossy().into_owned(),
            ),
            extract_only: flag(ENV_EXTRACT_ONLY),
            grace: get(ENV_GRACE_TIMEOUT)
                .and_then(|v| parse_grace(&v.to_string_lossy()))
                .unwrap_or(DEFAULT_GRACE),
        }
    }
}

/// `y`, `yes`, `true` and `1`, in any case.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
    )
}

fn parse_grace(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}
