//! Shared tracing configuration for the cinder workspace.
//!
//! Executables, integration tests and benches install their `tracing`
//! subscriber through this crate. The runtime crates only emit events;
//! nothing is printed until a subscriber is installed with
//! [`init_global_tracing`].
//!
//! Profiles are tuned to where the runtime spends its time:
//!
//! | profile       | output  | runtime crates | notes                                  |
//! |---------------|---------|----------------|----------------------------------------|
//! | `local`       | pretty  | info           | everything else at warn                |
//! | `ci`          | json    | info           | no colour                              |
//! | `performance` | json    | debug          | perf spans on, span close timings      |
//! | `streams`     | compact | trace          | stream workers, events, device kernels |
//! | `test`        | compact | warn           | captured by the libtest writer         |
//!
//! Stream workers run on threads named `cinder-stream-<id>`, so every profile
//! prints thread names.

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::fmt;
use std::str::FromStr;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Crates whose events the profiles raise above the default level
const RUNTIME_TARGETS: [&str; 2] = ["cinder_runtime", "cinder_core"];

/// Everything the stream-debugging profile traces
const STREAM_TARGETS: [&str; 3] = ["cinder_runtime::stream", "cinder_runtime::event", "cinder_core::device"];

fn directives_for(level: &str, targets: &[&str]) -> String {
    std::iter::once("warn".to_string())
        .chain(targets.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Named subscriber presets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingProfile {
    Local,
    Ci,
    Performance,
    Streams,
    Test,
}

impl TracingProfile {
    pub const ALL: [TracingProfile; 5] = [Self::Local, Self::Ci, Self::Performance, Self::Streams, Self::Test];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ci => "ci",
            Self::Performance => "performance",
            Self::Streams => "streams",
            Self::Test => "test",
        }
    }

    pub fn config(self) -> TracingConfig {
        match self {
            Self::Local => TracingConfig::for_local(),
            Self::Ci => TracingConfig::for_ci(),
            Self::Performance => TracingConfig::for_performance(),
            Self::Streams => TracingConfig::for_stream_debugging(),
            Self::Test => TracingConfig::for_tests(),
        }
    }
}

impl fmt::Display for TracingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TracingProfile {
    type Err = TracingSetupError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| TracingSetupError::UnknownProfile(value.to_string()))
    }
}

/// How the shared subscriber filters and formats runtime events
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Filter directives. When absent `RUST_LOG` is consulted, then
    /// [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    pub default_directive: String,
    pub output: TracingOutput,
    /// Forced off for JSON output
    pub ansi: bool,
    pub include_targets: bool,
    pub thread_names: bool,
    pub span_events: FmtSpan,
    /// Route output through libtest's capturing writer
    pub test_writer: bool,
    pub performance: PerformanceSettings,
}

/// Whether [`performance::PerformanceSpan`] guards report, and from what duration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerformanceSettings {
    pub enabled: bool,
    pub threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output; runtime crates at info, dependencies at warn
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: directives_for("info", &RUNTIME_TARGETS),
            output: TracingOutput::Pretty,
            ansi: true,
            include_targets: true,
            thread_names: true,
            span_events: FmtSpan::NONE,
            test_writer: false,
            performance: PerformanceSettings {
                enabled: cfg!(debug_assertions),
                threshold_us: None,
            },
        }
    }

    /// JSON lines for log collectors
    pub fn for_ci() -> Self {
        Self {
            output: TracingOutput::Json,
            ansi: false,
            performance: PerformanceSettings::default(),
            ..Self::for_local()
        }
    }

    /// Execute spans and kernel timings at debug, reported when spans close
    pub fn for_performance() -> Self {
        Self {
            directives: Some(directives_for("debug", &RUNTIME_TARGETS)),
            output: TracingOutput::Json,
            ansi: false,
            span_events: FmtSpan::CLOSE,
            performance: PerformanceSettings {
                enabled: true,
                threshold_us: None,
            },
            ..Self::for_local()
        }
    }

    /// Every enqueue, skip, signal and failure on the stream workers
    pub fn for_stream_debugging() -> Self {
        Self {
            directives: Some(directives_for("trace", &STREAM_TARGETS)),
            output: TracingOutput::Compact,
            include_targets: false,
            ..Self::for_local()
        }
    }

    /// Quiet, uncoloured and captured per test
    pub fn for_tests() -> Self {
        Self {
            default_directive: "warn".to_string(),
            output: TracingOutput::Compact,
            ansi: false,
            test_writer: true,
            performance: PerformanceSettings::default(),
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `CINDER_TRACING_PROFILE` - one of [`TracingProfile`]'s names, `local` when unset or unknown
    /// - `CINDER_TRACING_DIRECTIVES` - overrides filter directives
    /// - `CINDER_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `CINDER_PERF_TRACING` - `true`/`1`/`yes` enables performance spans
    /// - `CINDER_PERF_THRESHOLD_US` - minimum reported span duration
    pub fn from_env() -> Self {
        let mut config = env_value("CINDER_TRACING_PROFILE")
            .and_then(|name| name.parse::<TracingProfile>().ok())
            .unwrap_or(TracingProfile::Local)
            .config();

        if let Some(directives) = env_value("CINDER_TRACING_DIRECTIVES") {
            config.directives = Some(directives);
        }
        if let Some(output) = env_value("CINDER_TRACING_FORMAT").and_then(|v| TracingOutput::from_env_value(&v)) {
            config.output = output;
            config.ansi &= output != TracingOutput::Json;
        }
        if let Some(flag) = env_value("CINDER_PERF_TRACING") {
            config.performance.enabled = matches!(flag.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(threshold_us) = env_value("CINDER_PERF_THRESHOLD_US").and_then(|v| v.parse().ok()) {
            config.performance.threshold_us = Some(threshold_us);
        }
        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter {
                directives: directives.clone(),
                reason: err.to_string(),
            }),
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Output format for the formatter layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors surfaced while installing the shared subscriber
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    #[error("invalid tracing directives {directives:?}: {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("unknown tracing profile {0:?}")]
    UnknownProfile(String),

    /// A global subscriber is already installed
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for the given configuration without installing it
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    performance::set_enabled(config.performance.enabled, config.performance.threshold_us);
    Ok(Registry::default().with(formatter_layer(config)).with(filter))
}

fn formatter_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_thread_names(config.thread_names)
        .with_span_events(config.span_events.clone());

    match config.output {
        TracingOutput::Compact if config.test_writer => {
            layer.compact().with_ansi(config.ansi).with_test_writer().boxed()
        }
        TracingOutput::Compact => layer.compact().with_ansi(config.ansi).boxed(),
        TracingOutput::Pretty if config.test_writer => {
            layer.pretty().with_ansi(config.ansi).with_test_writer().boxed()
        }
        TracingOutput::Pretty => layer.pretty().with_ansi(config.ansi).boxed(),
        TracingOutput::Json => layer.json().with_ansi(false).boxed(),
    }
}

/// Install the configured subscriber as the process-wide default
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Install the test profile, ignoring the error when a subscriber already exists
pub fn init_test_tracing() {
    let _ = init_global_tracing(&TracingConfig::for_tests());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // env vars are process-global
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 5] = [
        "CINDER_TRACING_PROFILE",
        "CINDER_TRACING_DIRECTIVES",
        "CINDER_TRACING_FORMAT",
        "CINDER_PERF_TRACING",
        "CINDER_PERF_THRESHOLD_US",
    ];

    fn with_env(vars: &[(&str, &str)], check: impl FnOnce(TracingConfig)) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        KEYS.iter().for_each(|key| env::remove_var(key));
        vars.iter().for_each(|(key, value)| env::set_var(key, value));
        check(TracingConfig::from_env());
        KEYS.iter().for_each(|key| env::remove_var(key));
    }

    #[test]
    fn every_profile_builds() {
        for profile in TracingProfile::ALL {
            assert!(build_subscriber(&profile.config()).is_ok(), "{profile}");
        }
    }

    #[test]
    fn rejects_invalid_directive() {
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(
            build_subscriber(&config),
            Err(TracingSetupError::InvalidFilter { ref directives, .. }) if directives == "=::invalid"
        ));
    }

    #[test]
    fn profile_names_round_trip() {
        for profile in TracingProfile::ALL {
            assert_eq!(profile.name().parse::<TracingProfile>().unwrap(), profile);
        }
        assert_eq!(" Streams ".parse::<TracingProfile>().unwrap(), TracingProfile::Streams);
        assert!(matches!(
            "verbose".parse::<TracingProfile>(),
            Err(TracingSetupError::UnknownProfile(ref name)) if name == "verbose"
        ));
    }

    #[test]
    fn presets_target_the_runtime_crates() {
        assert_eq!(
            TracingConfig::for_local().default_directive,
            "warn,cinder_runtime=info,cinder_core=info"
        );
        assert_eq!(
            TracingConfig::for_performance().directives.as_deref(),
            Some("warn,cinder_runtime=debug,cinder_core=debug")
        );
        assert_eq!(
            TracingConfig::for_stream_debugging().directives.as_deref(),
            Some("warn,cinder_runtime::stream=trace,cinder_runtime::event=trace,cinder_core::device=trace")
        );

        let perf = TracingConfig::for_performance();
        assert!(perf.performance.enabled);
        assert_eq!(perf.output, TracingOutput::Json);

        let tests = TracingConfig::for_tests();
        assert!(tests.test_writer && !tests.ansi);
        assert!(!tests.performance.enabled);
    }

    #[test]
    fn from_env_respects_profile_and_format() {
        with_env(
            &[
                ("CINDER_TRACING_PROFILE", "ci"),
                ("CINDER_TRACING_FORMAT", "compact"),
                ("CINDER_TRACING_DIRECTIVES", "cinder_core=trace"),
            ],
            |config| {
                assert_eq!(config.directives.as_deref(), Some("cinder_core=trace"));
                assert!(!config.ansi);
                assert_eq!(config.output, TracingOutput::Compact);
            },
        );
    }

    #[test]
    fn from_env_json_format_drops_colour() {
        with_env(&[("CINDER_TRACING_FORMAT", "JSON")], |config| {
            assert_eq!(config.output, TracingOutput::Json);
            assert!(!config.ansi);
        });
    }

    #[test]
    fn from_env_falls_back_to_local() {
        with_env(&[("CINDER_TRACING_PROFILE", "nonsense"), ("CINDER_TRACING_DIRECTIVES", "  ")], |config| {
            assert_eq!(config.output, TracingOutput::Pretty);
            assert_eq!(config.directives, None);
        });
    }

    #[test]
    fn from_env_respects_performance_settings() {
        with_env(
            &[("CINDER_PERF_TRACING", "yes"), ("CINDER_PERF_THRESHOLD_US", "250")],
            |config| {
                assert_eq!(
                    config.performance,
                    PerformanceSettings {
                        enabled: true,
                        threshold_us: Some(250),
                    }
                );
            },
        );
    }
}
