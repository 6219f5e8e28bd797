use std::path::PathBuf;

use crate::clock::TimeMode;
use crate::session::ProfileError;

pub const DEFAULT_TRACE_FILE: &str = "nytprof.out";
pub const DEFAULT_TIME_MODE: TimeMode = TimeMode::WallTime;

/// Environment variable holding the option string.
pub const OPTIONS_ENV_VAR: &str = "LINEPROF";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    /// Trace output path. Forked children append `.<pid>`.
    pub file: PathBuf,
    pub time_mode: TimeMode,
    /// Enable profiling immediately instead of waiting for `enable_profile`.
    pub begin: bool,
    /// Emit block-level samples (runs the context walker per statement).
    pub blocks: bool,
    /// Diagnostic verbosity; higher levels emit more `log` output.
    pub trace_level: u32,
    /// Detect pid changes and give each process its own stream.
    pub allow_fork: bool,
    /// Route calls through the host's fallback debug-sub mechanism instead
    /// of direct op overrides. Known limitation of the fallback: lvalue subs
    /// are never intercepted, so they go unprofiled.
    pub use_db_sub: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            file: PathBuf::from(DEFAULT_TRACE_FILE),
            time_mode: DEFAULT_TIME_MODE,
            begin: false,
            blocks: false,
            trace_level: 0,
            allow_fork: false,
            use_db_sub: false,
        }
    }
}

impl Configuration {
    /// Parse a colon-separated option list of `key=value` and boolean `key`
    /// entries, e.g. `file=/tmp/prof.out:blocks:trace=2`. Unknown options
    /// warn and are ignored; malformed values are fatal.
    pub fn from_option_string(options: &str) -> Result<Self, ProfileError> {
        let mut config = Configuration::default();
        for entry in options.split(':').filter(|entry| !entry.is_empty()) {
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (entry, None),
            };
            match key {
                "file" => match value {
                    Some(path) if !path.is_empty() => config.file = PathBuf::from(path),
                    _ => return Err(ProfileError::BadOption(entry.to_owned())),
                },
                "usecputime" => {
                    config.time_mode = if truthy(value) {
                        TimeMode::CpuTime
                    } else {
                        TimeMode::WallTime
                    };
                }
                "begin" => config.begin = truthy(value),
                "blocks" => config.blocks = truthy(value),
                "trace" => {
                    config.trace_level = value
                        .unwrap_or("0")
                        .parse()
                        .map_err(|_| ProfileError::BadOption(entry.to_owned()))?;
                }
                "allowfork" => config.allow_fork = truthy(value),
                "use_db_sub" => config.use_db_sub = truthy(value),
                _ => {
                    eprintln!("[lineprof] Warning: ignoring unknown option '{}'.", key);
                }
            }
        }
        Ok(config)
    }

    /// Configuration from the `LINEPROF` environment variable, defaults when
    /// it is unset.
    pub fn from_env() -> Result<Self, ProfileError> {
        match std::env::var(OPTIONS_ENV_VAR) {
            Ok(options) => Self::from_option_string(&options),
            Err(_) => Ok(Configuration::default()),
        }
    }
}

// Bare keys are true; `key=` and `key=0` are false.
fn truthy(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => !matches!(v, "" | "0"),
    }
}
