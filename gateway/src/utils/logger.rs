use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::utils;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Per-target log levels, e.g. `{ "gateway": "debug", "notes_auth": "info" }`.
#[derive(Debug, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub struct LoggerTargets {
    directives: Vec<Directive>,
}

impl TryFrom<BTreeMap<String, String>> for LoggerTargets {
    type Error = String;

    fn try_from(targets: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let directives = targets
            .into_iter()
            .map(|(target, level)| {
                format!("{target}={level}")
                    .parse::<Directive>()
                    .map_err(|e| format!("invalid level for `{target}`: {e}"))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { directives })
    }
}

impl LoggerTargets {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        utils::serde::load_json_from_file(path)
    }

    pub fn to_filter(&self) -> EnvFilter {
        self.directives
            .iter()
            .cloned()
            .fold(EnvFilter::default(), EnvFilter::add_directive)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub outputs: Vec<LoggerOutput>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            outputs: vec![LoggerOutput::Stderr(LoggerStderrOutput::default())],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable on stderr, JSON in files.
    #[default]
    Auto,
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoggerOutput {
    Stderr(LoggerStderrOutput),
    File(LoggerFileOutput),
}

impl LoggerOutput {
    fn layer<S>(&self) -> Result<BoxedLayer<S>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        match self {
            Self::Stderr(stderr) => Ok(stderr.layer()),
            Self::File(file) => file.layer(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct LoggerStderrOutput {
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggerStderrOutput {
    fn layer<S>(&self) -> BoxedLayer<S>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        if self.format == LogFormat::Json {
            return tracing_stackdriver::layer()
                .with_writer(std::io::stderr)
                .boxed();
        }

        let layer = fmt::layer().with_writer(std::io::stderr);
        if is_systemd_child() {
            layer.without_time().with_ansi(false).boxed()
        } else {
            layer.with_ansi(std::io::stderr().is_terminal()).boxed()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerFileOutput {
    pub dir: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_max_files")]
    pub max_files: NonZeroUsize,
}

impl LoggerFileOutput {
    fn layer<S>(&self) -> Result<BoxedLayer<S>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let writer = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::HOURLY)
            .filename_prefix(&self.file_prefix)
            .max_log_files(self.max_files.get())
            .build(&self.dir)
            .with_context(|| format!("failed to open log dir {}", self.dir.display()))?;

        Ok(match self.format {
            LogFormat::Human => fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
            LogFormat::Json | LogFormat::Auto => {
                tracing_stackdriver::layer().with_writer(writer).boxed()
            }
        })
    }
}

fn default_file_prefix() -> String {
    "gateway.log".to_owned()
}

fn default_max_files() -> NonZeroUsize {
    NonZeroUsize::new(24).unwrap_or(NonZeroUsize::MIN)
}

pub fn is_systemd_child() -> bool {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `getppid` has no preconditions.
        let parent = unsafe { libc::getppid() };
        parent == 1 || std::env::var_os("SYSTEMD_EXEC_PID").is_some()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Installs the global subscriber. Fails if called twice.
///
/// Without `targets_path` the filter comes from `RUST_LOG` (default `info`).
/// With it, the file is polled and the filter reloaded when it changes.
pub fn init_logger(config: &LoggerConfig, targets_path: Option<PathBuf>) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::reload;

    let make_filter = {
        let targets_path = targets_path.clone();
        move || -> Result<EnvFilter> {
            match &targets_path {
                Some(path) => Ok(LoggerTargets::load_from(path)
                    .context("failed to load logger targets")?
                    .to_filter()),
                None => Ok(EnvFilter::builder()
                    .with_default_directive(tracing::Level::INFO.into())
                    .from_env_lossy()),
            }
        }
    };

    static ONCE: Once = Once::new();
    let mut installed = None;
    ONCE.call_once(|| {
        installed = Some((|| -> Result<_> {
            let (filter, handle) = reload::Layer::new(make_filter()?);
            let outputs = config
                .outputs
                .iter()
                .map(|output| output.layer())
                .collect::<Result<Vec<_>>>()?;

            let subscriber = tracing_subscriber::registry().with(filter).with(outputs);
            tracing::subscriber::set_global_default(subscriber)?;
            Ok(handle)
        })());
    });

    let handle = match installed {
        Some(handle) => handle?,
        None => anyhow::bail!("logger was already initialized"),
    };

    let Some(path) = targets_path else {
        return Ok(());
    };

    const POLL_INTERVAL: Duration = Duration::from_secs(10);
    let modified_at = move || -> Option<SystemTime> {
        std::fs::metadata(&path).and_then(|m| m.modified()).ok()
    };

    // A plain thread, so reloading works before the runtime is up.
    std::thread::Builder::new()
        .name("logger-targets-watch".to_owned())
        .spawn(move || {
            let mut last_modified = modified_at();
            loop {
                std::thread::sleep(POLL_INTERVAL);

                let modified = modified_at();
                if modified == last_modified {
                    continue;
                }
                last_modified = modified;

                match make_filter() {
                    Ok(filter) => {
                        if handle.reload(filter).is_err() {
                            break;
                        }
                        tracing::info!("reloaded logger targets");
                    }
                    Err(e) => tracing::error!("failed to reload logger targets: {e:#}"),
                }
            }
        })?;

    Ok(())
}

/// Routes panics through tracing, then exits.
pub fn set_abort_with_tracing() {
    std::panic::set_hook(Box::new(|info| {
        use std::io::Write;

        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!("panic: {info}\n{backtrace}");

        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();

        #[allow(clippy::exit)]
        std::process::exit(1);
    }));
}
