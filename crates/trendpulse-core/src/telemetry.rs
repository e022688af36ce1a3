use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use tracing_subscriber::{EnvFilter, fmt};

use crate::TrendPulseError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub env_filter: Option<String>,
    pub with_ansi: bool,
    /// Append log lines to this file instead of stdout.
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
            log_file: None,
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. Safe to call multiple times;
/// only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), TrendPulseError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or(options.env_filter)
        .unwrap_or_else(|| "info".to_string());

    let installed = match options.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|err| TrendPulseError::config_io(parent.to_path_buf(), err))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| TrendPulseError::config_io(path.clone(), err))?;
            fmt::Subscriber::builder()
                .with_env_filter(EnvFilter::new(env_filter))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => fmt::Subscriber::builder()
            .with_env_filter(EnvFilter::new(env_filter))
            .with_ansi(options.with_ansi)
            .try_init(),
    };

    installed.map_err(|err| {
        TrendPulseError::InvalidConfiguration(format!("telemetry init failed: {err}"))
    })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
