//! PBS Professional backend: resource rendering, submission, and job/queue/
//! node queries built atop `qsub`/`qstat`/`pbsnodes` (§4.1.3).

mod dump;
mod job;
mod node;
mod queue;

pub use job::PbsJob;
pub use node::PbsNode;
pub use queue::PbsQueue;

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
pub const ENV_NAME: &str = "PBS";

/// Environment variable PBS Pro sets to the job's allocated scratch directory.
const PBS_SCRATCH_DIR_VAR: &str = "SCRATCHDIR";

const SUPPORTED_WORK_DIRS: &[WorkDir] = &[
    WorkDir::InputDir,
    WorkDir::ScratchLocal,
    WorkDir::ScratchSsd,
    WorkDir::ScratchShared,
    WorkDir::ScratchShm,
];

/// The PBS Pro backend.
pub struct PbsBackend {
    remote_fs: SshRemoteFs,
}

impl PbsBackend {
    /// Builds a new PBS backend using the configured SSH/rsync timeouts.
    pub fn new() -> Self {
        let cfg = qq_core::Config::global();
        PbsBackend {
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

    /// Renders a `qsub` command string for the given submission.
    fn translate_submit(
        resources: &Resources,
        queue: &str,
        script: &Path,
        job_name: &str,
        depend: &[Dependency],
        env_vars: &HashMap<String, String>,
    ) -> BatchResult<String> {
        let qq_out = script
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(job_name)
            .with_extension(qq_core::constants::QQ_OUT_SUFFIX.trim_start_matches('.'));

        let mut command = format!(
            "qsub -N {job_name} -q {queue} -j eo -e {} ",
            qq_out.display()
        );

        if !env_vars.is_empty() {
            command.push_str(&format!("-v {} ", translate_env_vars(env_vars)));
        }

        let mut chunks = translate_per_chunk_resources(resources)?;
        for (key, value) in &resources.props {
            chunks.push(format!("{key}={value}"));
        }

        let multi_node = resources.nnodes.unwrap_or(1) > 1;
        if multi_node {
            command.push_str(&format!("-l select={}:", resources.nnodes.unwrap()));
            command.push_str(&chunks.join(":"));
        } else {
            command.push_str("-l ");
            command.push_str(&chunks.join(","));
        }
        command.push(' ');

        if let Some(walltime) = &resources.walltime {
            command.push_str(&format!("-l walltime={walltime} "));
        }

        if multi_node {
            command.push_str("-l place=vscatter ");
        }

        if let Some(depend_str) = translate_dependencies(depend) {
            command.push_str(&format!("-W depend={depend_str} "));
        }

        command.push_str(&script.display().to_string());
        Ok(command)
    }

    fn translate_kill(job_id: &str) -> String {
        format!("qdel {job_id}")
    }

    fn translate_kill_force(job_id: &str) -> String {
        format!("qdel -W force {job_id}")
    }
}

impl Default for PbsBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn translate_env_vars(env_vars: &HashMap<String, String>) -> String {
    env_vars
        .iter()
        .map(|(key, value)| format!("\"{key}='{value}'\""))
        .collect::<Vec<_>>()
        .join(",")
}

/// PBS's `after:ID,afterok:ID1:ID2,...` dependency string, built by joining
/// each kind's job-ID list with colons rather than `=`.
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

fn translate_per_chunk_resources(res: &Resources) -> BatchResult<Vec<String>> {
    let nnodes = res
        .nnodes
        .ok_or_else(|| qq_core::CoreError::InvalidResources("nnodes must be set before submission".into()))?;
    if nnodes == 0 {
        return Err(qq_core::CoreError::InvalidResources("nnodes cannot be 0".into()).into());
    }

    let mut chunks = Vec::new();

    if let Some(ncpus) = res.ncpus {
        if ncpus % nnodes != 0 {
            return Err(qq_core::CoreError::InvalidResources(format!(
                "ncpus ({ncpus}) must be divisible by nnodes ({nnodes})"
            ))
            .into());
        }
        let per_node = ncpus / nnodes;
        chunks.push(format!("ncpus={per_node}"));
        chunks.push(format!("mpiprocs={per_node}"));
    }

    if let Some(mem) = res.mem {
        chunks.push(format!("mem={}kb", mem.div_ceil_by(nnodes as u64)?.as_kb_floor()));
    } else if let (Some(mem_per_cpu), Some(ncpus)) = (res.mem_per_cpu, res.ncpus) {
        chunks.push(format!(
            "mem={}kb",
            mem_per_cpu.multiply(ncpus as u64).div_ceil_by(nnodes as u64)?.as_kb_floor()
        ));
    } else {
        return Err(qq_core::CoreError::InvalidResources(
            "'mem' or 'mem-per-cpu' and 'ncpus' must be defined".into(),
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
            chunks.push(format!("ngpus={}", ngpus / nnodes));
        }
    }

    if let Some(workdir) = translate_work_dir(res, nnodes)? {
        chunks.push(workdir);
    }

    Ok(chunks)
}

fn translate_work_dir(res: &Resources, nnodes: u32) -> BatchResult<Option<String>> {
    let label = match res.work_dir.unwrap_or(WorkDir::InputDir) {
        WorkDir::InputDir => return Ok(None),
        WorkDir::ScratchLocal => "scratch_local",
        WorkDir::ScratchSsd => "scratch_ssd",
        WorkDir::ScratchShared => "scratch_shared",
        WorkDir::ScratchShm => return Ok(Some("scratch_shm=true".to_string())),
    };

    if let Some(size) = res.work_size {
        return Ok(Some(format!("{label}={}kb", size.div_ceil_by(nnodes as u64)?.as_kb_floor())));
    }
    if let (Some(per_cpu), Some(ncpus)) = (res.work_size_per_cpu, res.ncpus) {
        return Ok(Some(format!(
            "{label}={}kb",
            per_cpu.multiply(ncpus as u64).div_ceil_by(nnodes as u64)?.as_kb_floor()
        )));
    }
    Err(qq_core::CoreError::InvalidResources(
        "'work-size' or 'work-size-per-cpu' and 'ncpus' must be defined".into(),
    )
    .into())
}

#[async_trait]
impl Batch for PbsBackend {
    fn env_name(&self) -> &'static str {
        ENV_NAME
    }

    fn is_available(&self) -> bool {
        which::which("qsub").is_ok()
    }

    fn supported_work_dirs(&self) -> &'static [WorkDir] {
        SUPPORTED_WORK_DIRS
    }

    async fn get_scratch_dir(&self, job_id: &str) -> BatchResult<PathBuf> {
        std::env::var(PBS_SCRATCH_DIR_VAR)
            .map(PathBuf::from)
            .map_err(|_| BatchError::QueryFailed(format!("scratch directory for job '{job_id}' is undefined")))
    }

    fn transform_resources(&self, _queue: &str, provided: &Resources) -> BatchResult<Resources> {
        let defaults = Resources {
            nnodes: Some(1),
            ncpus: Some(1),
            mem_per_cpu: Some(Size::parse("1gb")?),
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
        _account: Option<&str>,
    ) -> BatchResult<String> {
        let command = Self::translate_submit(resources, queue, script, job_name, depend, env_vars)?;
        tracing::debug!(%command, "submitting PBS job");
        let output = self.run_via_bash(&command).await?;
        if !output.status.success() {
            return Err(BatchError::SubmissionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn job_kill(&self, job_id: &str) -> BatchResult<()> {
        let output = self.run_via_bash(&Self::translate_kill(job_id)).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not kill job '{job_id}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn job_kill_force(&self, job_id: &str) -> BatchResult<()> {
        let output = self.run_via_bash(&Self::translate_kill_force(job_id)).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not force-kill job '{job_id}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn get_batch_job(&self, job_id: &str) -> BatchResult<Box<dyn BatchJob>> {
        let output = self.run_via_bash(&format!("qstat -f {job_id}")).await?;
        if !output.status.success() {
            return Ok(Box::new(PbsJob::empty(job_id)));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        match dump::parse_multi(&text).into_iter().next() {
            Some((fields, id)) => Ok(Box::new(PbsJob::from_fields(id, fields))),
            None => Ok(Box::new(PbsJob::empty(job_id))),
        }
    }

    async fn get_unfinished_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        self.jobs_via_command(&format!("qstat -f -u {user}")).await
    }

    async fn get_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        self.jobs_via_command(&format!("qstat -f -x -u {user}")).await
    }

    async fn get_all_unfinished_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        self.jobs_via_command("qstat -f").await
    }

    async fn get_all_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        self.jobs_via_command("qstat -f -x").await
    }

    async fn get_queues(&self) -> BatchResult<Vec<Box<dyn BatchQueue>>> {
        let output = self.run_via_bash("qstat -Qfw").await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(dump::parse_multi(&text)
            .into_iter()
            .map(|(fields, name)| Box::new(PbsQueue::from_fields(name, fields)) as Box<dyn BatchQueue>)
            .collect())
    }

    async fn get_nodes(&self) -> BatchResult<Vec<Box<dyn BatchNode>>> {
        let output = self.run_via_bash("pbsnodes -a").await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(dump::parse_multi(&text)
            .into_iter()
            .map(|(fields, name)| Box::new(PbsNode::from_fields(name, fields)) as Box<dyn BatchNode>)
            .collect())
    }

    fn is_shared(&self, directory: &Path) -> bool {
        self.remote_fs.is_shared(directory)
    }
}

impl PbsBackend {
    async fn jobs_via_command(&self, command: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        let output = self.run_via_bash(command).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(dump::parse_multi(&text)
            .into_iter()
            .map(|(fields, id)| Box::new(PbsJob::from_fields(id, fields)) as Box<dyn BatchJob>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(nnodes: u32, ncpus: u32) -> Resources {
        Resources {
            nnodes: Some(nnodes),
            ncpus: Some(ncpus),
            mem_per_cpu: Some(Size::parse("1gb").unwrap()),
            work_dir: Some(WorkDir::ScratchLocal),
            work_size_per_cpu: Some(Size::parse("1gb").unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn single_node_submit_uses_comma_join() {
        let res = resources(1, 4);
        let command = PbsBackend::translate_submit(
            &res,
            "default",
            Path::new("/home/user/job.sh"),
            "myjob",
            &[],
            &HashMap::new(),
        )
        .unwrap();
        assert!(command.contains("-l ncpus=4,mpiprocs=4,mem=4194304kb"), "{command}");
        assert!(!command.contains("select="));
    }

    #[test]
    fn multi_node_submit_uses_select_syntax() {
        let res = resources(2, 8);
        let command = PbsBackend::translate_submit(
            &res,
            "default",
            Path::new("/home/user/job.sh"),
            "myjob",
            &[],
            &HashMap::new(),
        )
        .unwrap();
        assert!(command.contains("-l select=2:ncpus=4:mpiprocs=4:mem=4194304kb"), "{command}");
        assert!(command.contains("place=vscatter"));
    }

    #[test]
    fn uneven_cpu_split_is_rejected() {
        let res = resources(3, 8);
        let result = PbsBackend::translate_submit(
            &res,
            "default",
            Path::new("/home/user/job.sh"),
            "myjob",
            &[],
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn dependencies_render_as_colon_joined_kinds() {
        let depend = vec![Dependency {
            kind: DependencyKind::Afterok,
            job_ids: vec!["1".to_string(), "2".to_string()],
        }];
        assert_eq!(translate_dependencies(&depend).unwrap(), "afterok:1:2");
    }
}
