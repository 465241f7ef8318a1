//! Slurm backend: resource rendering, submission, and job/queue queries
//! built atop `sbatch`/`scontrol`/`squeue`/`sacct`/`scancel` (§4.1.3).
//!
//! Remote-filesystem operations are shared wholesale with [`crate::pbs`] —
//! both backends reach the submission host the same way, over SSH.

mod job;
mod queue;

pub use job::SlurmJob;
pub use queue::SlurmQueue;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use qq_core::Dependency;
use qq_core::DependencyKind;
use qq_core::Resources;
use qq_core::Size;
use qq_core::WorkDir;

use crate::backend::Batch;
use crate::error::BatchError;
use crate::error::BatchResult;
use crate::job::BatchJob;
use crate::node::BatchNode;
use crate::queue::BatchQueue;
use crate::remote_fs::RemoteFs;
use crate::remote_fs::SshRemoteFs;

/// The value `QQ_BATCH_SYSTEM` must hold to select this backend.
pub const ENV_NAME: &str = "Slurm";

const SUPPORTED_WORK_DIRS: &[WorkDir] = &[
    WorkDir::InputDir,
    WorkDir::ScratchLocal,
    WorkDir::ScratchSsd,
    WorkDir::ScratchShared,
    WorkDir::ScratchShm,
];

/// Splits a `scontrol`-style dump (`key=value key=value ...`, one record per
/// line or the whole text) on whitespace, keeping only pairs containing `=`.
fn parse_dump(text: &str) -> BTreeMap<String, String> {
    text.split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// The Slurm backend.
pub struct SlurmBackend {
    remote_fs: SshRemoteFs,
}

impl SlurmBackend {
    /// Builds a new Slurm backend using the configured SSH/rsync timeouts.
    pub fn new() -> Self {
        let cfg = qq_core::Config::global();
        SlurmBackend {
            remote_fs: SshRemoteFs::new(
                std::time::Duration::from_secs(cfg.timeouts.ssh),
                std::time::Duration::from_secs(cfg.timeouts.rsync),
            ),
        }
    }

    async fn run_via_bash(&self, command: &str) -> BatchResult<std::process::Output> {
        use tokio::io::AsyncWriteExt;
        let mut child = tokio::process::Command::new("bash")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .expect("bash spawned with piped stdin")
            .write_all(command.as_bytes())
            .await?;
        Ok(child.wait_with_output().await?)
    }

    fn translate_submit(
        resources: &Resources,
        queue: &str,
        script: &Path,
        job_name: &str,
        depend: &[Dependency],
        env_vars: &HashMap<String, String>,
        account: Option<&str>,
    ) -> BatchResult<String> {
        let qq_out = script
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(job_name)
            .with_extension(qq_core::constants::QQ_OUT_SUFFIX.trim_start_matches('.'));

        let mut command = format!(
            "sbatch -J {job_name} -p {queue} -e {} -o {} ",
            qq_out.display(),
            qq_out.display()
        );

        if let Some(account) = account {
            command.push_str(&format!("--account {account} "));
        }

        if !env_vars.is_empty() {
            command.push_str(&format!("--export ALL,{} ", translate_env_vars(env_vars)));
        }

        let nnodes = resources
            .nnodes
            .ok_or_else(|| qq_core::CoreError::InvalidResources("nnodes must be set before submission".into()))?;
        command.push_str(&format!("--nodes {nnodes} "));

        for chunk in translate_per_chunk_resources(resources, nnodes)? {
            command.push_str(&chunk);
            command.push(' ');
        }

        if !resources.props.is_empty() {
            let mut constraints = Vec::new();
            for (key, value) in &resources.props {
                if value != "true" {
                    return Err(qq_core::CoreError::InvalidResources(format!(
                        "Slurm only supports properties with a value of 'true', not '{key}={value}'"
                    ))
                    .into());
                }
                constraints.push(key.clone());
            }
            command.push_str(&format!("--constraint=\"{}\" ", constraints.join("&")));
        }

        if let Some(walltime) = &resources.walltime {
            command.push_str(&format!("--time={walltime} "));
        }

        if let Some(depend_str) = translate_dependencies(depend) {
            command.push_str(&format!("--dependency={depend_str} "));
        }

        command.push_str(&script.display().to_string());
        Ok(command)
    }
}

impl Default for SlurmBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn translate_env_vars(env_vars: &HashMap<String, String>) -> String {
    env_vars
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",")
}

/// Slurm's `after:ID,afterok:ID1:ID2,...` dependency string — the same
/// colon-within-kind, comma-across-kinds shape PBS uses.
fn translate_dependencies(depend: &[Dependency]) -> Option<String> {
    if depend.is_empty() {
        return None;
    }
    Some(
        depend
            .iter()
            .map(|dep| {
                let kind = match dep.kind {
                    DependencyKind::After => "after",
                    DependencyKind::Afterok => "afterok",
                    DependencyKind::Afternotok => "afternotok",
                    DependencyKind::Afterany => "afterany",
                };
                format!("{kind}:{}", dep.job_ids.join(":"))
            })
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn translate_per_chunk_resources(res: &Resources, nnodes: u32) -> BatchResult<Vec<String>> {
    if nnodes == 0 {
        return Err(qq_core::CoreError::InvalidResources("nnodes cannot be 0".into()).into());
    }

    let mut chunks = Vec::new();

    if let Some(ncpus) = res.ncpus {
        if ncpus != 0 && ncpus % nnodes != 0 {
            return Err(qq_core::CoreError::InvalidResources(format!(
                "ncpus ({ncpus}) must be divisible by nnodes ({nnodes})"
            ))
            .into());
        }
        if ncpus != 0 {
            chunks.push("--ntasks-per-node=1".to_string());
            chunks.push(format!("--cpus-per-task={}", ncpus / nnodes));
        }
    }

    if let Some(mem) = res.mem {
        chunks.push(format!("--mem={}kb", mem.div_ceil_by(nnodes as u64)?.as_kb_floor()));
    } else if let Some(mem_per_cpu) = res.mem_per_cpu {
        chunks.push(format!("--mem-per-cpu={}kb", mem_per_cpu.as_kb_floor()));
    } else {
        return Err(qq_core::CoreError::InvalidResources(
            "'mem' or 'mem-per-cpu' must be defined".into(),
        )
        .into());
    }

    if let Some(ngpus) = res.ngpus {
        if ngpus != 0 {
            if ngpus % nnodes != 0 {
                return Err(qq_core::CoreError::InvalidResources(format!(
                    "ngpus ({ngpus}) must be divisible by nnodes ({nnodes})"
                ))
                .into());
            }
            chunks.push(format!("--gpus-per-node={}", ngpus / nnodes));
        }
    }

    Ok(chunks)
}

#[async_trait]
impl Batch for SlurmBackend {
    fn env_name(&self) -> &'static str {
        ENV_NAME
    }

    fn is_available(&self) -> bool {
        which::which("sbatch").is_ok() && which::which("it4ifree").is_err()
    }

    fn supported_work_dirs(&self) -> &'static [WorkDir] {
        SUPPORTED_WORK_DIRS
    }

    async fn get_scratch_dir(&self, job_id: &str) -> BatchResult<PathBuf> {
        Err(BatchError::QueryFailed(format!(
            "getting the scratch directory of job '{job_id}' is not supported by the Slurm backend"
        )))
    }

    fn transform_resources(&self, _queue: &str, provided: &Resources) -> BatchResult<Resources> {
        let defaults = Resources {
            nnodes: Some(1),
            ncpus: Some(1),
            mem_per_cpu: Some(Size::parse("1gb")?),
            work_dir: Some(WorkDir::ScratchLocal),
            work_size_per_cpu: Some(Size::parse("1gb")?),
            walltime: Some("1d".parse()?),
            ..Default::default()
        };
        Ok(Resources::merge([provided, &defaults]))
    }

    async fn job_submit(
        &self,
        resources: &Resources,
        queue: &str,
        script: &Path,
        job_name: &str,
        depend: &[Dependency],
        env_vars: &HashMap<String, String>,
        account: Option<&str>,
    ) -> BatchResult<String> {
        let command = Self::translate_submit(resources, queue, script, job_name, depend, env_vars, account)?;
        tracing::debug!(%command, "submitting Slurm job");
        let output = self.run_via_bash(&command).await?;
        if !output.status.success() {
            return Err(BatchError::SubmissionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .next_back()
            .map(str::to_string)
            .ok_or_else(|| BatchError::SubmissionFailed("sbatch produced no job ID".to_string()))
    }

    async fn job_kill(&self, job_id: &str) -> BatchResult<()> {
        let output = self.run_via_bash(&format!("scancel {job_id}")).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not kill job '{job_id}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn job_kill_force(&self, job_id: &str) -> BatchResult<()> {
        let output = self.run_via_bash(&format!("scancel --signal=KILL {job_id}")).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not force-kill job '{job_id}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn get_batch_job(&self, job_id: &str) -> BatchResult<Box<dyn BatchJob>> {
        self.fetch_job(job_id).await
    }

    async fn get_unfinished_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        let ids = self.squeue_ids(&format!("squeue -u {user} -t PENDING,RUNNING -h -o \"%i\"")).await?;
        self.fetch_jobs(&ids).await
    }

    async fn get_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        let mut jobs = self
            .sacct_jobs(&format!(
                "sacct -u {user} --allocations --noheader --parsable2 --format={}",
                job::SACCT_FIELDS
            ))
            .await?;
        let pending_ids = self.squeue_ids(&format!("squeue -u {user} -t PENDING -h -o \"%i\"")).await?;
        self.merge_pending(&mut jobs, &pending_ids);
        Ok(jobs.into_iter().map(|j| Box::new(j) as Box<dyn BatchJob>).collect())
    }

    async fn get_all_unfinished_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        let ids = self.squeue_ids("squeue -t PENDING,RUNNING -h -o \"%i\"").await?;
        self.fetch_jobs(&ids).await
    }

    async fn get_all_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        let mut jobs = self
            .sacct_jobs(&format!(
                "sacct --allusers --allocations --noheader --parsable2 --format={}",
                job::SACCT_FIELDS
            ))
            .await?;
        let pending_ids = self.squeue_ids("squeue -t PENDING -h -o \"%i\"").await?;
        self.merge_pending(&mut jobs, &pending_ids);
        Ok(jobs.into_iter().map(|j| Box::new(j) as Box<dyn BatchJob>).collect())
    }

    async fn get_queues(&self) -> BatchResult<Vec<Box<dyn BatchQueue>>> {
        let output = self.run_via_bash("scontrol show partition -o").await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);

        let mut queues: Vec<Box<dyn BatchQueue>> = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let fields = parse_dump(line);
            let Some(name) = fields.get("PartitionName").cloned() else {
                continue;
            };
            let (running, queued, other) = self.queue_job_counts(&name).await?;
            queues.push(Box::new(SlurmQueue::from_fields(name, fields, running, queued, other)));
        }
        Ok(queues)
    }

    async fn get_nodes(&self) -> BatchResult<Vec<Box<dyn BatchNode>>> {
        Err(BatchError::QueryFailed("listing nodes is not supported by the Slurm backend".to_string()))
    }

    fn is_shared(&self, directory: &Path) -> bool {
        self.remote_fs.is_shared(directory)
    }
}

impl SlurmBackend {
    async fn fetch_job(&self, job_id: &str) -> BatchResult<Box<dyn BatchJob>> {
        let output = self.run_via_bash(&format!("scontrol show job {job_id} -o")).await?;
        if output.status.success() {
            let fields = parse_dump(&String::from_utf8_lossy(&output.stdout));
            return Ok(Box::new(SlurmJob::from_fields(job_id.to_string(), fields)));
        }

        let sacct_output = self
            .run_via_bash(&format!(
                "sacct --allocations --noheader --parsable2 -j {job_id} --format={}",
                job::SACCT_FIELDS
            ))
            .await?;
        if !sacct_output.status.success() {
            return Ok(Box::new(SlurmJob::empty(job_id)));
        }
        let row = String::from_utf8_lossy(&sacct_output.stdout);
        match SlurmJob::from_sacct_row(row.trim()) {
            Some(job) => Ok(Box::new(job)),
            None => Ok(Box::new(SlurmJob::empty(job_id))),
        }
    }

    async fn fetch_jobs(&self, ids: &[String]) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        // a plain `squeue` listing carries no per-job detail beyond the ID;
        // resolve each one through the same scontrol/sacct path as a single lookup.
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            resolved.push(self.fetch_job(id).await?);
        }
        Ok(resolved)
    }

    async fn sacct_jobs(&self, command: &str) -> BatchResult<Vec<SlurmJob>> {
        let output = self.run_via_bash(command).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(SlurmJob::from_sacct_row)
            .collect())
    }

    async fn squeue_ids(&self, command: &str) -> BatchResult<Vec<String>> {
        let output = self.run_via_bash(command).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn merge_pending(&self, jobs: &mut Vec<SlurmJob>, pending_ids: &[String]) {
        let known: std::collections::HashSet<&str> = jobs.iter().map(BatchJob::id).collect();
        for id in pending_ids {
            if !known.contains(id.as_str()) {
                jobs.push(SlurmJob::empty(id));
            }
        }
    }

    async fn queue_job_counts(&self, name: &str) -> BatchResult<(u32, u32, u32)> {
        let output = self.run_via_bash(&format!("squeue -p {name} -h -o \"%T\" | uniq -c")).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not get job numbers for queue '{name}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let (mut running, mut queued, mut other) = (0u32, 0u32, 0u32);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split_whitespace();
            let (Some(count), Some(state)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(count) = count.parse::<u32>() else {
                continue;
            };
            match state {
                "RUNNING" => running += count,
                "PENDING" => queued += count,
                "SUSPENDED" | "PREEMPTED" => other += count,
                _ => {}
            }
        }
        Ok((running, queued, other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_parses_whitespace_separated_pairs() {
        let parsed = parse_dump("JobId=123 JobState=RUNNING Partition=batch");
        assert_eq!(parsed.get("JobId").unwrap(), "123");
        assert_eq!(parsed.get("JobState").unwrap(), "RUNNING");
    }

    #[test]
    fn single_node_resources_use_mem_per_cpu() {
        let res = Resources {
            nnodes: Some(1),
            ncpus: Some(4),
            mem_per_cpu: Some(Size::parse("1gb").unwrap()),
            ..Default::default()
        };
        let chunks = translate_per_chunk_resources(&res, 1).unwrap();
        assert!(chunks.contains(&"--cpus-per-task=4".to_string()));
        assert!(chunks.contains(&"--mem-per-cpu=1048576kb".to_string()));
    }

    #[test]
    fn uneven_gpu_split_is_rejected() {
        let res = Resources {
            nnodes: Some(3),
            ngpus: Some(8),
            mem_per_cpu: Some(Size::parse("1gb").unwrap()),
            ..Default::default()
        };
        assert!(translate_per_chunk_resources(&res, 3).is_err());
    }

    #[test]
    fn dependencies_render_as_colon_joined_kinds() {
        let depend = vec![Dependency {
            kind: DependencyKind::Afterok,
            job_ids: vec!["10".to_string(), "11".to_string()],
        }];
        assert_eq!(translate_dependencies(&depend).unwrap(), "afterok:10:11");
    }
}
