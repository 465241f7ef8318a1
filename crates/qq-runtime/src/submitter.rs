//! Validates a user script, composes its job record, and hands it to a
//! batch backend for submission (§4.3).

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use qq_batch::Batch;
use qq_core::Config;
use qq_core::Dependency;
use qq_core::Duration;
use qq_core::JobType;
use qq_core::LoopInfo;
use qq_core::NaiveState;
use qq_core::Record;
use qq_core::Resources;
use qq_core::WorkDir;
use qq_core::constants;

use crate::error::RuntimeError;
use crate::error::RuntimeResult;

/// The shebang every qq-managed script must start with.
const EXPECTED_SHEBANG_SUFFIX: &str = "qq run";

/// Raw `# qq key=value` directives scraped from the top of a script, before
/// any typed interpretation.
#[derive(Debug, Default, Clone)]
pub struct Directives(BTreeMap<String, String>);

impl Directives {
    /// Scans `text` for `# qq <key>[=<value>]` lines following the shebang,
    /// stopping at the first line that isn't one.
    pub fn parse(text: &str) -> RuntimeResult<Self> {
        let mut map = BTreeMap::new();
        for line in text.lines().skip(1) {
            let trimmed = line.trim();
            let Some(rest) = trimmed.strip_prefix('#') else {
                break;
            };
            let rest = rest.trim_start();
            let Some(rest) = rest.strip_prefix("qq") else {
                break;
            };
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(RuntimeError::BadDirective(trimmed.to_string()));
            }

            let (key, value) = match rest.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (rest.to_string(), "true".to_string()),
            };
            if key.is_empty() {
                return Err(RuntimeError::BadDirective(trimmed.to_string()));
            }
            map.insert(key, value);
        }
        Ok(Directives(map))
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// User-visible submission options, either from the CLI or scraped script
/// directives; CLI-provided fields always win over directives for the same key.
#[derive(Debug, Default, Clone)]
pub struct SubmitOptions {
    /// Target queue.
    pub queue: Option<String>,
    /// Resource requests.
    pub resources: Resources,
    /// Standard vs. loop.
    pub job_type: Option<JobType>,
    /// First loop cycle.
    pub loop_start: Option<u32>,
    /// Last loop cycle.
    pub loop_end: Option<u32>,
    /// Loop archive directory.
    pub archive: Option<PathBuf>,
    /// Loop archive naming pattern.
    pub archive_format: Option<String>,
    /// Accounting/billing account.
    pub account: Option<String>,
    /// Job dependencies.
    pub depend: Vec<Dependency>,
    /// Files/directories excluded from working-directory staging.
    pub exclude: Vec<PathBuf>,
    /// Files/directories explicitly included in working-directory staging.
    pub include: Vec<PathBuf>,
    /// Explicit batch-system override.
    pub batch_system: Option<String>,
}

impl SubmitOptions {
    /// Parses directive-derived options into the same shape the CLI
    /// produces, so the two can be merged field-by-field.
    fn from_directives(directives: &Directives) -> RuntimeResult<Self> {
        let mut resources = Resources::default();
        let mut props = BTreeMap::new();

        let known_resource_keys = [
            "nnodes",
            "ncpus",
            "ncpus_per_node",
            "ngpus",
            "ngpus_per_node",
            "mem",
            "mem_per_node",
            "mem_per_cpu",
            "walltime",
            "work_dir",
            "job_dir",
            "work_size",
            "work_size_per_node",
            "work_size_per_cpu",
        ];
        let non_resource_keys = [
            "queue",
            "job_type",
            "loop_start",
            "loop_end",
            "archive",
            "archive_format",
            "account",
            "depend",
            "exclude",
            "include",
            "batch_system",
        ];

        for (key, value) in directives.0.iter() {
            if known_resource_keys.contains(&key.as_str()) || non_resource_keys.contains(&key.as_str()) {
                continue;
            }
            props.insert(key.clone(), value.clone());
        }
        resources.props = props;

        if let Some(v) = directives.get("nnodes") {
            resources.nnodes = Some(parse_field(v, "nnodes")?);
        }
        if let Some(v) = directives.get("ncpus") {
            resources.ncpus = Some(parse_field(v, "ncpus")?);
        }
        if let Some(v) = directives.get("ncpus_per_node") {
            resources.ncpus_per_node = Some(parse_field(v, "ncpus_per_node")?);
        }
        if let Some(v) = directives.get("ngpus") {
            resources.ngpus = Some(parse_field(v, "ngpus")?);
        }
        if let Some(v) = directives.get("ngpus_per_node") {
            resources.ngpus_per_node = Some(parse_field(v, "ngpus_per_node")?);
        }
        if let Some(v) = directives.get("mem") {
            resources.mem = Some(v.parse()?);
        }
        if let Some(v) = directives.get("mem_per_node") {
            resources.mem_per_node = Some(v.parse()?);
        }
        if let Some(v) = directives.get("mem_per_cpu") {
            resources.mem_per_cpu = Some(v.parse()?);
        }
        if let Some(v) = directives.get("walltime") {
            resources.walltime = Some(v.parse()?);
        }
        if let Some(v) = directives.get("work_dir").or_else(|| directives.get("job_dir")) {
            resources.work_dir = Some(WorkDir::parse(v)?);
        }
        if let Some(v) = directives.get("work_size") {
            resources.work_size = Some(v.parse()?);
        }
        if let Some(v) = directives.get("work_size_per_node") {
            resources.work_size_per_node = Some(v.parse()?);
        }
        if let Some(v) = directives.get("work_size_per_cpu") {
            resources.work_size_per_cpu = Some(v.parse()?);
        }

        Ok(SubmitOptions {
            queue: directives.get("queue").map(str::to_string),
            resources,
            job_type: directives.get("job_type").map(JobType::parse).transpose()?,
            loop_start: directives.get("loop_start").map(|v| parse_field(v, "loop_start")).transpose()?,
            loop_end: directives.get("loop_end").map(|v| parse_field(v, "loop_end")).transpose()?,
            archive: directives.get("archive").map(PathBuf::from),
            archive_format: directives.get("archive_format").map(str::to_string),
            account: directives.get("account").map(str::to_string),
            depend: directives.get("depend").map(Dependency::parse_many).transpose()?.unwrap_or_default(),
            exclude: directives.get("exclude").map(split_paths).unwrap_or_default(),
            include: directives.get("include").map(split_paths).unwrap_or_default(),
            batch_system: directives.get("batch_system").map(str::to_string),
        })
    }

    /// Merges `self` (CLI-provided) over `directive_derived`, CLI winning
    /// per-field.
    fn merged_with(self, directive_derived: SubmitOptions) -> SubmitOptions {
        SubmitOptions {
            queue: self.queue.or(directive_derived.queue),
            resources: Resources::merge([&self.resources, &directive_derived.resources]),
            job_type: self.job_type.or(directive_derived.job_type),
            loop_start: self.loop_start.or(directive_derived.loop_start),
            loop_end: self.loop_end.or(directive_derived.loop_end),
            archive: self.archive.or(directive_derived.archive),
            archive_format: self.archive_format.or(directive_derived.archive_format),
            account: self.account.or(directive_derived.account),
            depend: if self.depend.is_empty() { directive_derived.depend } else { self.depend },
            exclude: if self.exclude.is_empty() { directive_derived.exclude } else { self.exclude },
            include: if self.include.is_empty() { directive_derived.include } else { self.include },
            batch_system: self.batch_system.or(directive_derived.batch_system),
        }
    }
}

fn parse_field<T: std::str::FromStr>(v: &str, field: &str) -> RuntimeResult<T> {
    v.parse().map_err(|_| RuntimeError::BadDirective(format!("{field}={v}")))
}

fn split_paths(v: &str) -> Vec<PathBuf> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(PathBuf::from).collect()
}

/// Validates, composes, and submits a job.
pub struct Submitter<'a> {
    backend: &'a dyn Batch,
    qq_version: String,
}

impl<'a> Submitter<'a> {
    /// Builds a submitter targeting `backend`, stamping new records with
    /// `qq_version`.
    pub fn new(backend: &'a dyn Batch, qq_version: impl Into<String>) -> Self {
        Submitter { backend, qq_version: qq_version.into() }
    }

    /// Validates `script`, merges `cli_options` with its directives,
    /// submits it, and writes the resulting record beside the script.
    pub async fn submit(
        &self,
        script: &Path,
        cli_options: SubmitOptions,
        is_shared: bool,
    ) -> RuntimeResult<PathBuf> {
        let script = script
            .canonicalize()
            .map_err(|_| RuntimeError::BadShebang(script.to_path_buf()))?;
        let submission_dir = script.parent().expect("canonicalized script has a parent").to_path_buf();
        let script_name = script.file_name().expect("script has a filename").to_string_lossy().to_string();

        let text = std::fs::read_to_string(&script)?;
        Self::validate_shebang(&text, &script)?;

        let directives = Directives::parse(&text)?;
        let directive_options = SubmitOptions::from_directives(&directives)?;
        let options = cli_options.merged_with(directive_options);

        let queue = options.queue.clone().unwrap_or_default();
        let resources = self.backend.transform_resources(&queue, &options.resources)?;
        resources.validate()?;

        if resources.work_dir.is_some_and(WorkDir::is_input_dir) && !is_shared {
            return Err(RuntimeError::UnsuitableInputDir(submission_dir.clone()));
        }

        let job_type = options.job_type.unwrap_or(JobType::Standard);
        let loop_info = if job_type == JobType::Loop {
            let start = options.loop_start.unwrap_or(0);
            let end = options.loop_end.ok_or_else(|| RuntimeError::BadDirective("loop_end is required for loop jobs".to_string()))?;
            let archive = options.archive.clone().unwrap_or_else(|| submission_dir.join("archive"));
            let pattern = options.archive_format.clone().unwrap_or_else(|| Config::global().loop_jobs.pattern.clone());
            Some(LoopInfo::new(start, end, archive, pattern, None, Some(&submission_dir))?)
        } else {
            None
        };

        self.guard_clean_submission_dir(&submission_dir, &script_name, loop_info.as_ref())?;

        let job_name = script_name.clone();
        let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
        let suffixes = &Config::global().suffixes;
        let record_path = submission_dir.join(format!("{job_name}{}", suffixes.qq_info));
        let env_vars = self.build_env_vars(
            &options,
            &resources,
            is_shared,
            &submission_dir,
            &record_path,
            &hostname,
            loop_info.as_ref(),
        );

        let job_id = self
            .backend
            .job_submit(&resources, &queue, &script, &job_name, &options.depend, &env_vars, options.account.as_deref())
            .await?;

        let username = whoami::fallible::username().unwrap_or_else(|_| "unknown".to_string());

        let record = Record {
            batch_system: self.backend.env_name().to_string(),
            qq_version: self.qq_version.clone(),
            username,
            job_id,
            job_name: job_name.clone(),
            script_name: script_name.clone(),
            queue,
            job_type,
            input_machine: hostname,
            input_dir: submission_dir.clone(),
            job_state: NaiveState::Queued,
            submission_time: chrono::Utc::now(),
            stdout_file: format!("{script_name}{}", suffixes.stdout),
            stderr_file: format!("{script_name}{}", suffixes.stderr),
            resources,
            excluded_files: options.exclude,
            included_files: options.include,
            depend: options.depend,
            loop_info,
            account: options.account,
            start_time: None,
            main_node: None,
            all_nodes: None,
            work_dir: None,
            completion_time: None,
            job_exit_code: None,
            extra: BTreeMap::new(),
        };

        record.save(&record_path)?;
        Ok(record_path)
    }

    fn validate_shebang(text: &str, script: &Path) -> RuntimeResult<()> {
        let first_line = text.lines().next().unwrap_or_default();
        if !first_line.starts_with("#!") || !first_line.trim_end().ends_with(EXPECTED_SHEBANG_SUFFIX) {
            return Err(RuntimeError::BadShebang(script.to_path_buf()));
        }
        Ok(())
    }

    /// Refuses to submit into a directory that already carries qq runtime
    /// files, unless this is a valid next-cycle loop continuation: an
    /// existing record for the same script with matching loop metadata,
    /// the previous cycle, and a terminal FINISHED state.
    fn guard_clean_submission_dir(&self, dir: &Path, script_name: &str, loop_info: Option<&LoopInfo>) -> RuntimeResult<()> {
        let suffixes = &Config::global().suffixes;
        let has_runtime_files = suffixes.all().iter().any(|suffix| {
            dir.read_dir()
                .into_iter()
                .flatten()
                .flatten()
                .any(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        });
        if !has_runtime_files {
            return Ok(());
        }

        let record_path = dir.join(format!("{script_name}{}", suffixes.qq_info));
        if let (Some(loop_info), Ok(existing)) = (loop_info, Record::load(&record_path)) {
            let is_valid_continuation = existing.job_state == NaiveState::Finished
                && existing
                    .loop_info
                    .as_ref()
                    .is_some_and(|prev| prev.end == loop_info.end && prev.current + 1 == loop_info.current);
            if is_valid_continuation {
                return Ok(());
            }
        }

        Err(RuntimeError::DirtySubmissionDir(dir.to_path_buf()))
    }

    fn build_env_vars(
        &self,
        options: &SubmitOptions,
        resources: &Resources,
        is_shared: bool,
        submission_dir: &Path,
        record_path: &Path,
        hostname: &str,
        loop_info: Option<&LoopInfo>,
    ) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(constants::ENV_GUARD.to_string(), "true".to_string());
        env.insert(constants::ENV_SHARED_SUBMIT.to_string(), is_shared.to_string());
        env.insert(constants::ENV_INPUT_DIR.to_string(), submission_dir.display().to_string());
        env.insert(constants::ENV_BATCH_SYSTEM.to_string(), self.backend.env_name().to_string());
        env.insert(constants::ENV_INFO_FILE.to_string(), record_path.display().to_string());
        env.insert(constants::ENV_INPUT_MACHINE.to_string(), hostname.to_string());

        env.insert(constants::ENV_NCPUS.to_string(), resources.ncpus.unwrap_or(1).to_string());
        env.insert(constants::ENV_NGPUS.to_string(), resources.ngpus.unwrap_or(0).to_string());
        env.insert(constants::ENV_NNODES.to_string(), resources.nnodes.unwrap_or(1).to_string());
        let walltime_hours = resources.walltime.map(Duration::as_hours_ceil).unwrap_or(0);
        env.insert(constants::ENV_WALLTIME.to_string(), walltime_hours.to_string());

        if let Some(loop_info) = loop_info {
            env.insert(constants::ENV_LOOP_CURRENT.to_string(), loop_info.current.to_string());
            env.insert(constants::ENV_LOOP_START.to_string(), loop_info.start.to_string());
            env.insert(constants::ENV_LOOP_END.to_string(), loop_info.end.to_string());
            env.insert(constants::ENV_ARCHIVE_FORMAT.to_string(), loop_info.archive_format.clone());
            env.insert(constants::ENV_NO_RESUBMIT.to_string(), Config::global().exit_codes.qq_run_no_resubmit.to_string());
        }

        let _ = &options.batch_system;
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_parse_key_value_pairs() {
        let text = "#!/usr/bin/env -S qq run\n# qq queue=gpu\n# qq ncpus=4\necho hi\n";
        let directives = Directives::parse(text).unwrap();
        assert_eq!(directives.get("queue"), Some("gpu"));
        assert_eq!(directives.get("ncpus"), Some("4"));
    }

    #[test]
    fn directive_parsing_stops_at_first_non_directive_line() {
        let text = "#!/usr/bin/env -S qq run\n# qq queue=gpu\necho hi\n# qq ncpus=4\n";
        let directives = Directives::parse(text).unwrap();
        assert_eq!(directives.get("queue"), Some("gpu"));
        assert_eq!(directives.get("ncpus"), None);
    }

    #[test]
    fn bare_directive_defaults_to_true() {
        let text = "#!/usr/bin/env -S qq run\n# qq debug\n";
        let directives = Directives::parse(text).unwrap();
        assert_eq!(directives.get("debug"), Some("true"));
    }

    #[test]
    fn cli_options_win_over_directives() {
        let mut cli = SubmitOptions { queue: Some("cli-queue".to_string()), ..Default::default() };
        cli.resources.ncpus = Some(8);
        let directive = SubmitOptions { queue: Some("directive-queue".to_string()), ..Default::default() };
        let merged = cli.merged_with(directive);
        assert_eq!(merged.queue, Some("cli-queue".to_string()));
        assert_eq!(merged.resources.ncpus, Some(8));
    }

    #[test]
    fn unrecognized_directive_keys_become_props() {
        let text = "#!/usr/bin/env -S qq run\n# qq gpu_type=a100\n";
        let directives = Directives::parse(text).unwrap();
        let options = SubmitOptions::from_directives(&directives).unwrap();
        assert_eq!(options.resources.props.get("gpu_type"), Some(&"a100".to_string()));
    }

    #[test]
    fn shebang_must_end_with_qq_run() {
        let err = Submitter::validate_shebang("#!/bin/bash\n", Path::new("run.sh"));
        assert!(matches!(err, Err(RuntimeError::BadShebang(_))));
    }

    #[test]
    fn build_env_vars_always_emits_resource_hints_with_defaults() {
        let backend = qq_batch::VirtualBackend::new();
        let submitter = Submitter::new(&backend, "0.0.0");
        let options = SubmitOptions::default();
        let resources = Resources::default();

        let env = submitter.build_env_vars(
            &options,
            &resources,
            false,
            Path::new("/tmp/job"),
            Path::new("/tmp/job/job.sh.qqinfo"),
            "node01",
            None,
        );

        assert_eq!(env.get(constants::ENV_NCPUS), Some(&"1".to_string()));
        assert_eq!(env.get(constants::ENV_NGPUS), Some(&"0".to_string()));
        assert_eq!(env.get(constants::ENV_NNODES), Some(&"1".to_string()));
        assert_eq!(env.get(constants::ENV_WALLTIME), Some(&"0".to_string()));
        assert_eq!(env.get(constants::ENV_INFO_FILE), Some(&"/tmp/job/job.sh.qqinfo".to_string()));
        assert_eq!(env.get(constants::ENV_INPUT_MACHINE), Some(&"node01".to_string()));
    }

    #[test]
    fn build_env_vars_carries_explicit_resources_and_walltime_in_hours() {
        let backend = qq_batch::VirtualBackend::new();
        let submitter = Submitter::new(&backend, "0.0.0");
        let options = SubmitOptions::default();
        let mut resources = Resources::default();
        resources.ncpus = Some(8);
        resources.ngpus = Some(2);
        resources.nnodes = Some(4);
        resources.walltime = Some(Duration::from_secs(3 * 3600 + 1));

        let env = submitter.build_env_vars(
            &options,
            &resources,
            true,
            Path::new("/tmp/job"),
            Path::new("/tmp/job/job.sh.qqinfo"),
            "node01",
            None,
        );

        assert_eq!(env.get(constants::ENV_NCPUS), Some(&"8".to_string()));
        assert_eq!(env.get(constants::ENV_NGPUS), Some(&"2".to_string()));
        assert_eq!(env.get(constants::ENV_NNODES), Some(&"4".to_string()));
        assert_eq!(env.get(constants::ENV_WALLTIME), Some(&"4".to_string()));
    }
}
