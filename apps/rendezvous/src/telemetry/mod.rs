pub mod logging {
    //! Subscriber setup. Every log line in the crate carries one of the
    //! [`Area`] targets, so verbosity can be raised for one part of the peer
    //! without drowning in the others.

    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// A full `EnvFilter` directive string; replaces everything derived here.
    pub const FILTER_ENV: &str = "RENDEZVOUS_LOG_FILTER";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl From<LogLevel> for LevelFilter {
        fn from(level: LogLevel) -> Self {
            match level {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Hash)]
    pub enum Area {
        Poller,
        Session,
        Media,
        Native,
        Dispatch,
    }

    impl Area {
        pub const ALL: [Area; 5] = [
            Area::Poller,
            Area::Session,
            Area::Media,
            Area::Native,
            Area::Dispatch,
        ];

        pub fn target(self) -> &'static str {
            match self {
                Area::Poller => "rendezvous::poller",
                Area::Session => "rendezvous::session",
                Area::Media => "rendezvous::media",
                Area::Native => "rendezvous::native",
                Area::Dispatch => "dispatch_queue",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
        /// Areas logged at `level`; empty means all of them. The rest stay at warn.
        pub areas: Vec<Area>,
        /// Let webrtc/http internals log below info when `level` is trace.
        pub trace_dependencies: bool,
    }

    impl LogConfig {
        /// Directive string for the subscriber's `EnvFilter`.
        pub fn directives(&self) -> String {
            let level = LevelFilter::from(self.level);
            let dependencies = if self.trace_dependencies {
                level
            } else {
                level.min(LevelFilter::INFO)
            };
            let quiet = level.min(LevelFilter::WARN);

            let mut directives = vec![dependencies.to_string().to_lowercase()];
            let app = if self.areas.is_empty() { level } else { quiet };
            directives.push(format!("rendezvous={}", app.to_string().to_lowercase()));
            for area in Area::ALL {
                let selected = self.areas.is_empty() || self.areas.contains(&area);
                let area_level = if selected { level } else { quiet };
                directives.push(format!(
                    "{}={}",
                    area.target(),
                    area_level.to_string().to_lowercase()
                ));
            }
            directives.join(",")
        }
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("invalid log filter {filter:?}: {reason}")]
        Filter { filter: String, reason: String },
        #[error("failed to install subscriber: {0}")]
        Install(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Install the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let filter = std::env::var(FILTER_ENV).unwrap_or_else(|_| config.directives());
        let env_filter = EnvFilter::try_new(&filter).map_err(|err| InitError::Filter {
            reason: err.to_string(),
            filter: filter.clone(),
        })?;

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let verbose = config.level >= LogLevel::Debug;
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(verbose)
            .with_thread_names(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Install(err.to_string()))?;

        let _ = GUARD.set(guard);
        tracing::debug!(target: "rendezvous::session", %filter, "logging initialized");
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn config(level: LogLevel, areas: &[Area], trace_dependencies: bool) -> LogConfig {
            LogConfig {
                level,
                file: None,
                areas: areas.to_vec(),
                trace_dependencies,
            }
        }

        #[test]
        fn every_area_follows_the_level_by_default() {
            let directives = config(LogLevel::Debug, &[], false).directives();
            assert_eq!(
                directives,
                "info,rendezvous=debug,rendezvous::poller=debug,rendezvous::session=debug,\
                 rendezvous::media=debug,rendezvous::native=debug,dispatch_queue=debug"
            );
        }

        #[test]
        fn dependencies_are_capped_at_info_unless_requested() {
            let capped = config(LogLevel::Trace, &[], false).directives();
            assert!(capped.starts_with("info,rendezvous=trace,"));

            let open = config(LogLevel::Trace, &[], true).directives();
            assert!(open.starts_with("trace,rendezvous=trace,"));
        }

        #[test]
        fn selected_areas_are_verbose_and_the_rest_stay_at_warn() {
            let directives =
                config(LogLevel::Trace, &[Area::Session, Area::Dispatch], false).directives();
            assert!(directives.contains("rendezvous=warn"));
            assert!(directives.contains("rendezvous::session=trace"));
            assert!(directives.contains("dispatch_queue=trace"));
            assert!(directives.contains("rendezvous::poller=warn"));
            assert!(directives.contains("rendezvous::native=warn"));
        }

        #[test]
        fn quiet_levels_stay_quiet() {
            let directives = config(LogLevel::Error, &[Area::Media], false).directives();
            assert!(directives.starts_with("error,rendezvous=error,"));
            assert!(directives.contains("rendezvous::media=error"));
        }

        #[test]
        fn derived_directives_parse() {
            for level in [LogLevel::Error, LogLevel::Info, LogLevel::Trace] {
                let directives = config(level, &[Area::Native], false).directives();
                EnvFilter::try_new(&directives).expect("valid filter");
            }
        }
    }
}
