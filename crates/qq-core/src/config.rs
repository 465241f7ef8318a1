//! Process-wide configuration, layered from compile-time defaults, an
//! optional TOML file, and the `QQ_CONFIG` environment override.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Deserialize;
use serde::Serialize;

use crate::constants;
use crate::error::CoreError;

/// File suffixes used by qq.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSuffixes {
    /// Suffix for qq info files.
    pub qq_info: String,
    /// Suffix for qq output files.
    pub qq_out: String,
    /// Suffix for captured stdout.
    pub stdout: String,
    /// Suffix for captured stderr.
    pub stderr: String,
}

impl Default for FileSuffixes {
    fn default() -> Self {
        FileSuffixes {
            qq_info: constants::QQ_INFO_SUFFIX.to_string(),
            qq_out: constants::QQ_OUT_SUFFIX.to_string(),
            stdout: constants::STDOUT_SUFFIX.to_string(),
            stderr: constants::STDERR_SUFFIX.to_string(),
        }
    }
}

impl FileSuffixes {
    /// All four suffixes, in the order they are checked during cleanup scans.
    pub fn all(&self) -> [&str; 4] {
        [&self.qq_info, &self.qq_out, &self.stdout, &self.stderr]
    }
}

/// Connection and transfer timeouts, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// SSH connection timeout.
    pub ssh: u64,
    /// rsync transfer timeout.
    pub rsync: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        TimeoutSettings {
            ssh: constants::DEFAULT_SSH_TIMEOUT_SECS,
            rsync: constants::DEFAULT_RSYNC_TIMEOUT_SECS,
        }
    }
}

/// Settings governing the in-job Runner process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Maximum retry attempts for a Runner I/O operation.
    pub retry_tries: u32,
    /// Wait time, in seconds, between Runner retries.
    pub retry_wait: u64,
    /// Grace period, in seconds, between SIGTERM and SIGKILL.
    pub sigterm_to_sigkill: u64,
    /// Polling interval, in seconds, while waiting on the child process.
    pub subprocess_checks_wait_time: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        RunnerSettings {
            retry_tries: constants::DEFAULT_RUNNER_RETRY_TRIES,
            retry_wait: constants::DEFAULT_RUNNER_RETRY_WAIT_SECS,
            sigterm_to_sigkill: constants::DEFAULT_SIGTERM_TO_SIGKILL_SECS,
            subprocess_checks_wait_time: constants::DEFAULT_SUBPROCESS_POLL_SECS,
        }
    }
}

/// Settings governing the Archiver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverSettings {
    /// Maximum retry attempts for an Archiver I/O operation.
    pub retry_tries: u32,
    /// Wait time, in seconds, between Archiver retries.
    pub retry_wait: u64,
}

impl Default for ArchiverSettings {
    fn default() -> Self {
        ArchiverSettings {
            retry_tries: constants::DEFAULT_ARCHIVER_RETRY_TRIES,
            retry_wait: constants::DEFAULT_ARCHIVER_RETRY_WAIT_SECS,
        }
    }
}

/// Settings governing loop-job cycle naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopJobSettings {
    /// printf-style naming pattern for archived loop cycles.
    pub pattern: String,
}

impl Default for LoopJobSettings {
    fn default() -> Self {
        LoopJobSettings {
            pattern: constants::DEFAULT_LOOP_JOB_PATTERN.to_string(),
        }
    }
}

/// Persisted-timestamp format strings for each system qq talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DateFormats {
    /// qq's own persisted format.
    pub standard: String,
    /// PBS Pro's native date format.
    pub pbs: String,
    /// Slurm's native date format.
    pub slurm: String,
}

impl Default for DateFormats {
    fn default() -> Self {
        DateFormats {
            standard: constants::DATE_FORMAT.to_string(),
            pbs: "%a %b %d %H:%M:%S %Y".to_string(),
            slurm: "%Y-%m-%dT%H:%M:%S".to_string(),
        }
    }
}

/// Process exit codes, by scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitCodes {
    /// A qq script is run outside the qq environment.
    pub not_qq_env: i32,
    /// Default error code for qq-command/environment failures.
    pub default: i32,
    /// The job failed and its state could not be persisted.
    pub qq_run_fatal: i32,
    /// Inter-service communication failure during `qq run`.
    pub qq_run_communication: i32,
    /// The job script signaled that its loop should not be resubmitted.
    pub qq_run_no_resubmit: i32,
    /// Catch-all for unexpected/internal errors.
    pub unexpected_error: i32,
}

impl Default for ExitCodes {
    fn default() -> Self {
        ExitCodes {
            not_qq_env: 90,
            default: constants::EXIT_SUBMIT_FAILURE,
            qq_run_fatal: constants::EXIT_RUNNER_FATAL,
            qq_run_communication: constants::EXIT_RUNNER_COMMUNICATION,
            qq_run_no_resubmit: constants::EXIT_NO_RESUBMIT,
            unexpected_error: constants::EXIT_UNEXPECTED,
        }
    }
}

/// Backend-specific scratch-directory conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PbsOptions {
    /// Name of the subdirectory inside `$SCRATCHDIR` used as the job's
    /// working directory.
    pub scratch_dir_inner: String,
}

impl Default for PbsOptions {
    fn default() -> Self {
        PbsOptions {
            scratch_dir_inner: constants::SCRATCH_DIR_INNER.to_string(),
        }
    }
}

/// Slurm-specific tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmOptions {
    /// Maximum number of threads used to collect job info via `scontrol`.
    pub jobs_scontrol_nthreads: u32,
}

impl Default for SlurmOptions {
    fn default() -> Self {
        SlurmOptions {
            jobs_scontrol_nthreads: 8,
        }
    }
}

/// Top-level qq configuration, loaded once per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reserved file suffixes.
    pub suffixes: FileSuffixes,
    /// SSH/rsync timeouts.
    pub timeouts: TimeoutSettings,
    /// Runner retry/polling behavior.
    pub runner: RunnerSettings,
    /// Archiver retry behavior.
    pub archiver: ArchiverSettings,
    /// Loop-job cycle naming.
    pub loop_jobs: LoopJobSettings,
    /// Per-backend timestamp formats.
    pub date_formats: DateFormats,
    /// Process exit codes.
    pub exit_codes: ExitCodes,
    /// PBS-specific options.
    pub pbs_options: PbsOptions,
    /// Slurm-specific options.
    pub slurm_options: SlurmOptions,
    /// Name used for the qq binary in help text and resubmission commands.
    #[serde(default = "default_binary_name")]
    pub binary_name: String,
}

fn default_binary_name() -> String {
    "qq".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            suffixes: FileSuffixes::default(),
            timeouts: TimeoutSettings::default(),
            runner: RunnerSettings::default(),
            archiver: ArchiverSettings::default(),
            loop_jobs: LoopJobSettings::default(),
            date_formats: DateFormats::default(),
            exit_codes: ExitCodes::default(),
            pbs_options: PbsOptions::default(),
            slurm_options: SlurmOptions::default(),
            binary_name: default_binary_name(),
        }
    }
}

static GLOBAL: OnceLock<Config> = OnceLock::new();

impl Config {
    /// Loads configuration by layering compile-time defaults under an
    /// optional TOML file, resolved in priority order: `QQ_CONFIG`, then
    /// `./qq_config.toml`, then `$XDG_CONFIG_HOME/qq/config.toml` (falling
    /// back to `~/.config/qq/config.toml`).
    pub fn load() -> Result<Self, CoreError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = Config::discover_path() {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let loaded = builder.build()?;
        Ok(loaded.try_deserialize()?)
    }

    /// Finds the first configuration file that actually exists, in priority order.
    fn discover_path() -> Option<PathBuf> {
        let candidates = [
            std::env::var_os("QQ_CONFIG").map(PathBuf::from),
            std::env::current_dir().ok().map(|d| d.join("qq_config.toml")),
            dirs::config_dir().map(|d| d.join("qq").join("config.toml")),
        ];

        candidates.into_iter().flatten().find(|p| p.is_file())
    }

    /// Returns the process-global configuration, loading it (with defaults
    /// on any error) the first time it's requested.
    pub fn global() -> &'static Config {
        GLOBAL.get_or_init(|| Config::load().unwrap_or_default())
    }

    /// Installs an explicit configuration as the process-global instance.
    /// Intended for tests and for `main` to pin down a config loaded from a
    /// CLI-specified path. Returns an error if the global was already set.
    pub fn set_global(config: Config) -> Result<(), Config> {
        GLOBAL.set(config)
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(value: config::ConfigError) -> Self {
        CoreError::Config(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.suffixes.qq_info, ".qqinfo");
        assert_eq!(cfg.exit_codes.unexpected_error, 99);
        assert_eq!(cfg.binary_name, "qq");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let toml_text = "binary_name = \"myqq\"\n[timeouts]\nssh = 30\n";
        let parsed: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(parsed.binary_name, "myqq");
        assert_eq!(parsed.timeouts.ssh, 30);
        assert_eq!(parsed.timeouts.rsync, constants::DEFAULT_RSYNC_TIMEOUT_SECS);
    }
}
