//! Session lifecycle: configuration, startup validation, and the external
//! enable/disable/finish controls exposed to the host runtime.

pub mod configuration;

use std::io;

use thiserror::Error;

use crate::clock::Clock;
use crate::host::Interpreter;
use crate::profiler::Profiler;
use crate::writer::TraceWriter;

use self::configuration::Configuration;

/// Startup failures. All of these are fatal: a session that cannot time or
/// cannot write has nothing useful to do.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profiler option '{0}'")]
    BadOption(String),
    #[error("cannot write profile output to {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("no usable {mode} clock on this platform: {source}")]
    ClockUnavailable {
        mode: &'static str,
        #[source]
        source: io::Error,
    },
}

pub struct Session {
    pub configuration: Configuration,
    profiler: Profiler,
}

impl Session {
    /// Build a session from the `LINEPROF` environment variable.
    pub fn from_env(application: &str) -> Result<Self, ProfileError> {
        Self::new(Configuration::from_env()?, application)
    }

    /// Validate the clock, open the trace stream, and write its header.
    /// Profiling starts immediately when the `begin` option is set and is
    /// otherwise deferred until [`Session::enable_profile`].
    pub fn new(configuration: Configuration, application: &str) -> Result<Self, ProfileError> {
        let clock = Clock::new(configuration.time_mode).map_err(|source| {
            ProfileError::ClockUnavailable {
                mode: configuration.time_mode.as_str(),
                source,
            }
        })?;
        let writer = TraceWriter::create(&configuration.file).map_err(|source| {
            ProfileError::Output {
                path: configuration.file.display().to_string(),
                source,
            }
        })?;

        let mut profiler = Profiler::new(configuration.clone(), clock, writer, application);
        profiler.start_stream().map_err(|source| ProfileError::Output {
            path: configuration.file.display().to_string(),
            source,
        })?;
        if configuration.begin {
            profiler.enable_profile();
        }

        log::debug!(
            "profiling session opened on {} ({} clock)",
            configuration.file.display(),
            configuration.time_mode.as_str()
        );

        Ok(Session {
            configuration,
            profiler,
        })
    }

    pub fn enable_profile(&mut self) {
        self.profiler.enable_profile();
    }

    pub fn disable_profile(&mut self) {
        self.profiler.disable_profile();
    }

    /// Finalize the trace for the current pid. Idempotent.
    pub fn finish(&mut self, interp: &dyn Interpreter) {
        self.profiler.finish(interp);
    }

    /// The engine itself, for the host's hook registrations.
    pub fn profiler(&mut self) -> &mut Profiler {
        &mut self.profiler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_session_writes_header_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.file = dir.path().join("session.out");
        let session = Session::new(config, "t/session.src").unwrap();
        drop(session);

        let bytes = fs::read(dir.path().join("session.out")).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("NYTProf 5 0\n"));
        assert!(text.contains(":ticks_per_sec=1000000\n"));
        assert!(text.contains(":application=t/session.src\n"));
        assert!(text.contains(":clock_mode=wall\n"));
    }

    #[test]
    fn test_unwritable_output_path_is_fatal() {
        let mut config = Configuration::default();
        config.file = "/no/such/dir/prof.out".into();
        match Session::new(config, "app") {
            Err(ProfileError::Output { .. }) => {}
            other => panic!("expected output error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_begin_option_enables_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.file = dir.path().join("begin.out");
        config.begin = true;
        let mut session = Session::new(config, "app").unwrap();
        assert!(session.profiler().is_profiling());

        let dir2 = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.file = dir2.path().join("nobegin.out");
        let mut session = Session::new(config, "app").unwrap();
        assert!(!session.profiler().is_profiling());
    }
}
