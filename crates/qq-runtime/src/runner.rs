//! Executes a submitted job in-process: stages the working directory,
//! archives loop-job cycles, runs the script, and reports the outcome
//! back into its record (§4.2).

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use qq_batch::Batch;
use qq_batch::RemoteFs;
use qq_batch::SshRemoteFs;
use qq_core::Config;
use qq_core::NaiveState;
use qq_core::WorkDir;
use qq_core::constants;

use crate::archiver::Archiver;
use crate::archiver::previous_cycle_stem_regex;
use crate::error::RuntimeError;
use crate::error::RuntimeResult;
use crate::informer::Informer;

/// Drives a single job's execution from inside the batch system.
pub struct Runner<'a> {
    backend: &'a dyn Batch,
    remote_fs: SshRemoteFs,
}

impl<'a> Runner<'a> {
    /// Builds a runner against `backend`, using the configured SSH/rsync
    /// timeouts for working-directory staging.
    pub fn new(backend: &'a dyn Batch) -> Self {
        let timeouts = &Config::global().timeouts;
        Runner {
            backend,
            remote_fs: SshRemoteFs::new(
                std::time::Duration::from_secs(timeouts.ssh),
                std::time::Duration::from_secs(timeouts.rsync),
            ),
        }
    }

    /// Runs the job whose record lives at `record_path`, under submission
    /// host `input_machine`. Returns the process exit code the caller
    /// (`qq run`) should terminate with.
    pub async fn run(&self, record_path: &Path) -> RuntimeResult<i32> {
        let mut informer = Informer::load(record_path)?;

        let script_path = informer.record().input_dir.join(&informer.record().script_name);
        let script_stem = informer.record().script_name.clone();
        let is_shared = std::env::var(constants::ENV_SHARED_SUBMIT).map(|v| v == "true").unwrap_or(false);

        let archiver = informer.record().loop_info.as_ref().map(|loop_info| {
            Archiver::new(loop_info.archive.clone(), loop_info.archive_format.clone(), script_stem.clone())
        });

        if let (Some(archiver), Some(loop_info)) = (&archiver, informer.record().loop_info.as_ref()) {
            if loop_info.current > loop_info.start {
                let stem_regex = previous_cycle_stem_regex(&script_stem, &loop_info.archive_format);
                archiver.archive_runtime_files(&informer.record().input_dir, &stem_regex, loop_info.current - 1).await?;
            }
        }

        let work_dir = self.prepare_work_dir(&mut informer, is_shared).await?;

        if let (Some(archiver), Some(loop_info)) = (&archiver, informer.record().loop_info.as_ref()) {
            archiver.from_archive(&work_dir, loop_info.current).await?;
        }

        informer.reload()?;
        if informer.record().job_state == NaiveState::Killed {
            return Ok(128 + libc::SIGTERM);
        }

        let main_node = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
        informer.set_running(chrono::Utc::now(), main_node.clone(), vec![main_node], work_dir.clone());
        informer.save()?;

        let suffixes = &Config::global().suffixes;
        let stdout_path = work_dir.join(format!("{script_stem}{}", suffixes.stdout));
        let stderr_path = work_dir.join(format!("{script_stem}{}", suffixes.stderr));

        let exit_code = self.execute(&script_path, &work_dir, &stdout_path, &stderr_path, &mut informer).await?;

        if informer.record().job_state == NaiveState::Killed {
            return Ok(128 + libc::SIGTERM);
        }

        if exit_code == 0 {
            self.finalize_success(&mut informer, &work_dir, archiver.as_ref(), is_shared).await?;
        } else {
            informer.set_failed(chrono::Utc::now(), exit_code);
            informer.save()?;
        }

        Ok(exit_code)
    }

    async fn prepare_work_dir(&self, informer: &mut Informer, is_shared: bool) -> RuntimeResult<PathBuf> {
        let record = informer.record();
        let input_dir = record.input_dir.clone();
        if record.resources.work_dir.is_none_or(WorkDir::is_input_dir) {
            return Ok(input_dir);
        }

        let cfg = &Config::global().runner;
        let job_id = record.job_id.clone();
        let scratch_root = self.backend.get_scratch_dir(&job_id).await?;
        let work_dir = scratch_root.join(&Config::global().pbs_options.scratch_dir_inner);
        self.remote_fs.make_remote_dir(&main_host(), &work_dir).await?;

        let record_file = input_dir.join(format!("{}{}", record.script_name, Config::global().suffixes.qq_info));
        let mut exclude = record.excluded_files.clone();
        exclude.push(record_file);
        if let Some(loop_info) = &record.loop_info {
            exclude.push(loop_info.archive.clone());
        }
        let src_host = if is_shared { None } else { Some(record.input_machine.clone()) };
        qq_core::retryer::retry(cfg.retry_tries as usize, std::time::Duration::from_secs(cfg.retry_wait), || {
            let (input_dir, work_dir, exclude, src_host) = (input_dir.clone(), work_dir.clone(), exclude.clone(), src_host.clone());
            let remote_fs = &self.remote_fs;
            async move {
                remote_fs
                    .sync_with_exclusions(&input_dir, &work_dir, src_host.as_deref(), None, &exclude)
                    .await
            }
        })
        .await?;

        Ok(work_dir)
    }

    async fn execute(
        &self,
        script_path: &Path,
        work_dir: &Path,
        stdout_path: &Path,
        stderr_path: &Path,
        informer: &mut Informer,
    ) -> RuntimeResult<i32> {
        let stdout_file = std::fs::File::create(stdout_path)?;
        let stderr_file = std::fs::File::create(stderr_path)?;

        let mut child = tokio::process::Command::new("bash")
            .arg(script_path)
            .current_dir(work_dir)
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()?;

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let grace = std::time::Duration::from_secs(Config::global().runner.sigterm_to_sigkill);

        tokio::select! {
            status = child.wait() => {
                Ok(status?.code().unwrap_or(-1))
            }
            _ = sigterm.recv() => {
                informer.reload()?;
                informer.set_killed(chrono::Utc::now());
                informer.save()?;

                if let Some(pid) = child.id() {
                    unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                }
                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    if let Some(pid) = child.id() {
                        unsafe { libc::kill(pid as i32, libc::SIGKILL) };
                    }
                    child.wait().await?;
                }
                Ok(128 + libc::SIGTERM)
            }
        }
    }

    async fn finalize_success(
        &self,
        informer: &mut Informer,
        work_dir: &Path,
        archiver: Option<&Archiver>,
        is_shared: bool,
    ) -> RuntimeResult<()> {
        let record = informer.record().clone();

        if let (Some(archiver), Some(loop_info)) = (archiver, record.loop_info.as_ref()) {
            archiver.to_archive(work_dir, loop_info.current).await?;
        }

        if work_dir != record.input_dir {
            let cfg = &Config::global().runner;
            let dest_host = if is_shared { None } else { Some(record.input_machine.clone()) };
            let (src, dest, exclude) = (work_dir.to_path_buf(), record.input_dir.clone(), record.excluded_files.clone());
            qq_core::retryer::retry(cfg.retry_tries as usize, std::time::Duration::from_secs(cfg.retry_wait), || {
                let (src, dest, exclude, dest_host) = (src.clone(), dest.clone(), exclude.clone(), dest_host.clone());
                let remote_fs = &self.remote_fs;
                async move { remote_fs.sync_with_exclusions(&src, &dest, None, dest_host.as_deref(), &exclude).await }
            })
            .await?;
            let _ = self.remote_fs.delete_remote_dir(&main_host(), work_dir).await;
        }

        informer.reload()?;
        informer.set_finished(chrono::Utc::now(), 0);
        informer.save()?;

        self.maybe_resubmit(informer).await
    }

    async fn maybe_resubmit(&self, informer: &Informer) -> RuntimeResult<()> {
        let record = informer.record();
        let Some(loop_info) = &record.loop_info else {
            return Ok(());
        };
        if loop_info.current >= loop_info.end {
            return Ok(());
        }
        let mut args = record.command_line_for_resubmit();
        args.push("--loop-start".to_string());
        args.push((loop_info.current + 1).to_string());
        args.push("--loop-end".to_string());
        args.push(loop_info.end.to_string());

        let status = tokio::process::Command::new(&Config::global().binary_name)
            .arg("submit")
            .args(&args)
            .current_dir(&record.input_dir)
            .status()
            .await?;

        if !status.success() {
            return Err(RuntimeError::Internal(format!(
                "resubmission of cycle {} failed with status {status}",
                loop_info.current + 1
            )));
        }
        Ok(())
    }
}

fn main_host() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qq_core::JobType;
    use qq_core::Record;
    use qq_core::Resources;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_record(input_dir: PathBuf) -> Record {
        Record {
            batch_system: "vbs".into(),
            qq_version: "1.0.0".into(),
            username: "alice".into(),
            job_id: "1".into(),
            job_name: "run.sh".into(),
            script_name: "run.sh".into(),
            queue: "default".into(),
            job_type: JobType::Standard,
            input_machine: "localhost".into(),
            input_dir,
            job_state: NaiveState::Queued,
            submission_time: chrono::Utc::now(),
            stdout_file: "run.sh.out".into(),
            stderr_file: "run.sh.err".into(),
            resources: Resources { work_dir: Some(WorkDir::InputDir), ..Default::default() },
            excluded_files: Vec::new(),
            included_files: Vec::new(),
            depend: Vec::new(),
            loop_info: None,
            account: None,
            start_time: None,
            main_node: None,
            all_nodes: None,
            work_dir: None,
            completion_time: None,
            job_exit_code: None,
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn prepare_work_dir_uses_input_dir_directly() {
        let dir = tempdir().unwrap();
        let record_path = dir.path().join("run.sh.qqinfo");
        let record = sample_record(dir.path().to_path_buf());
        record.save(&record_path).unwrap();

        let informer = Informer::load(&record_path).unwrap();
        let backend = qq_batch::VirtualBackend::new();
        let runner = Runner::new(&backend);
        let mut informer = informer;
        let work_dir = runner.prepare_work_dir(&mut informer, true).await.unwrap();
        assert_eq!(work_dir, dir.path());
    }
}
