//! SSH/rsync-backed remote filesystem primitives, with a shared-storage
//! shortcut that collapses to local I/O.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use qq_core::constants::CD_FAIL_EXIT_CODE;
use qq_core::constants::SSH_FAIL_EXIT_CODE;

use crate::error::BatchError;
use crate::error::BatchResult;

/// Whether a filesystem endpoint is the local host or a named remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// The current host.
    Local,
    /// A named remote host, reached over SSH.
    Remote(String),
}

impl Endpoint {
    fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local)
    }

    fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Local => None,
            Endpoint::Remote(h) => Some(h),
        }
    }
}

/// The six remote-filesystem primitives plus two sync variants every batch
/// backend must provide (§4.1.2).
///
/// The blanket [`SshRemoteFs`] implementation is the "default" every
/// backend starts from; a backend overrides individual methods only when
/// it has a cheaper native path (e.g. the submission host being the same
/// as the execution host under a shared filesystem).
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Reads a file's contents from `host`.
    async fn read_remote_file(&self, host: &str, file: &Path) -> BatchResult<String>;
    /// Overwrites a file's contents on `host`.
    async fn write_remote_file(&self, host: &str, file: &Path, content: &str) -> BatchResult<()>;
    /// Creates a directory on `host`, succeeding if it already exists.
    async fn make_remote_dir(&self, host: &str, directory: &Path) -> BatchResult<()>;
    /// Lists the immediate contents of a directory on `host`.
    async fn list_remote_dir(&self, host: &str, directory: &Path) -> BatchResult<Vec<PathBuf>>;
    /// Moves files on `host` from `files[i]` to `moved_files[i]`.
    async fn move_remote_files(
        &self,
        host: &str,
        files: &[PathBuf],
        moved_files: &[PathBuf],
    ) -> BatchResult<()>;
    /// Recursively deletes a directory on `host`.
    async fn delete_remote_dir(&self, host: &str, directory: &Path) -> BatchResult<()>;
    /// Copies everything in `src_dir` to `dest_dir` except `exclude_files`,
    /// across at most one non-local endpoint. Never deletes at the destination.
    async fn sync_with_exclusions(
        &self,
        src_dir: &Path,
        dest_dir: &Path,
        src_host: Option<&str>,
        dest_host: Option<&str>,
        exclude_files: &[PathBuf],
    ) -> BatchResult<()>;
    /// Copies only `include_files` from `src_dir` to `dest_dir`, across at
    /// most one non-local endpoint. Never deletes at the destination.
    async fn sync_selected(
        &self,
        src_dir: &Path,
        dest_dir: &Path,
        src_host: Option<&str>,
        dest_host: Option<&str>,
        include_files: &[PathBuf],
    ) -> BatchResult<()>;
    /// True if `directory` resides on a filesystem shared across hosts.
    fn is_shared(&self, directory: &Path) -> bool;
}

/// The default SSH/rsync-backed [`RemoteFs`], short-circuiting to local I/O
/// whenever `QQ_SHARED_SUBMIT` is set (§4.1.2 "Shared-submit shortcut").
pub struct SshRemoteFs {
    ssh_timeout: Duration,
    rsync_timeout: Duration,
}

impl SshRemoteFs {
    /// Builds a new SSH/rsync remote filesystem with the given connect and
    /// transfer timeouts.
    pub fn new(ssh_timeout: Duration, rsync_timeout: Duration) -> Self {
        SshRemoteFs {
            ssh_timeout,
            rsync_timeout,
        }
    }

    fn shared_submit_active() -> bool {
        std::env::var(qq_core::constants::ENV_SHARED_SUBMIT)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    fn current_host() -> String {
        whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string())
    }

    fn endpoint_for(&self, host: &str) -> Endpoint {
        if Self::shared_submit_active() || host == Self::current_host() {
            Endpoint::Local
        } else {
            Endpoint::Remote(host.to_string())
        }
    }

    async fn run_ssh(&self, host: &str, remote_command: &str) -> BatchResult<std::process::Output> {
        self.run_ssh_with_stdin(host, remote_command, None).await
    }

    async fn run_ssh_with_stdin(
        &self,
        host: &str,
        remote_command: &str,
        stdin: Option<&str>,
    ) -> BatchResult<std::process::Output> {
        let mut child = Command::new("ssh")
            .arg("-o")
            .arg("PasswordAuthentication=no")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.ssh_timeout.as_secs()))
            .arg(host)
            .arg(remote_command)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(content) = stdin {
            use tokio::io::AsyncWriteExt;
            child
                .stdin
                .take()
                .expect("ssh spawned with piped stdin")
                .write_all(content.as_bytes())
                .await?;
        }

        let output = timeout(self.ssh_timeout + Duration::from_secs(5), child.wait_with_output())
            .await
            .map_err(|_| BatchError::Timeout(self.ssh_timeout))??;

        if output.status.code() == Some(SSH_FAIL_EXIT_CODE) {
            return Err(BatchError::SshFailed(format!("could not connect to '{host}'")));
        }
        Ok(output)
    }

    async fn run_ssh_cd(&self, host: &str, dir: &Path, remote_command: &str) -> BatchResult<std::process::Output> {
        let wrapped = format!(
            "cd {} || exit {CD_FAIL_EXIT_CODE}\n{remote_command}",
            shlex::try_quote(&dir.to_string_lossy()).unwrap_or_default()
        );
        let output = self.run_ssh(host, &wrapped).await?;
        if output.status.code() == Some(CD_FAIL_EXIT_CODE) {
            return Err(BatchError::CdFailed(dir.display().to_string()));
        }
        Ok(output)
    }

    async fn run_rsync(&self, args: &[String]) -> BatchResult<()> {
        let child = Command::new("rsync")
            .arg("-a")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = timeout(self.rsync_timeout, child.wait_with_output())
            .await
            .map_err(|_| BatchError::Timeout(self.rsync_timeout))??;

        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "rsync failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn remote_spec(host: Option<&str>, path: &Path) -> String {
        match host {
            Some(h) => format!("{h}:{}", path.display()),
            None => path.display().to_string(),
        }
    }
}

#[async_trait]
impl RemoteFs for SshRemoteFs {
    async fn read_remote_file(&self, host: &str, file: &Path) -> BatchResult<String> {
        if let Endpoint::Local = self.endpoint_for(host) {
            return Ok(tokio::fs::read_to_string(file).await?);
        }
        let output = self.run_ssh(host, &format!("cat {}", shell_quote(file))).await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not read '{}' on '{host}'",
                file.display()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn write_remote_file(&self, host: &str, file: &Path, content: &str) -> BatchResult<()> {
        if let Endpoint::Local = self.endpoint_for(host) {
            return Ok(tokio::fs::write(file, content).await?);
        }
        let output = self
            .run_ssh_with_stdin(host, &format!("cat > {}", shell_quote(file)), Some(content))
            .await?;
        if !output.status.success() {
            return Err(BatchError::QueryFailed(format!(
                "could not write '{}' on '{host}'",
                file.display()
            )));
        }
        Ok(())
    }

    async fn make_remote_dir(&self, host: &str, directory: &Path) -> BatchResult<()> {
        if let Endpoint::Local = self.endpoint_for(host) {
            tokio::fs::create_dir_all(directory).await?;
            return Ok(());
        }
        self.run_ssh(host, &format!("mkdir -p {}", shell_quote(directory)))
            .await?;
        Ok(())
    }

    async fn list_remote_dir(&self, host: &str, directory: &Path) -> BatchResult<Vec<PathBuf>> {
        if let Endpoint::Local = self.endpoint_for(host) {
            let mut entries = Vec::new();
            let mut iter = tokio::fs::read_dir(directory).await?;
            while let Some(entry) = iter.next_entry().await? {
                entries.push(entry.path());
            }
            return Ok(entries);
        }
        let output = self
            .run_ssh(host, &format!("ls -A {}", shell_quote(directory)))
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|name| directory.join(name))
            .collect())
    }

    async fn move_remote_files(
        &self,
        host: &str,
        files: &[PathBuf],
        moved_files: &[PathBuf],
    ) -> BatchResult<()> {
        if files.len() != moved_files.len() {
            return Err(BatchError::QueryFailed(
                "moveRemoteFiles: source and destination lists differ in length".into(),
            ));
        }
        if let Endpoint::Local = self.endpoint_for(host) {
            for (src, dst) in files.iter().zip(moved_files) {
                tokio::fs::rename(src, dst).await?;
            }
            return Ok(());
        }
        let commands: Vec<String> = files
            .iter()
            .zip(moved_files)
            .map(|(src, dst)| format!("mv {} {}", shell_quote(src), shell_quote(dst)))
            .collect();
        self.run_ssh(host, &commands.join(" && ")).await?;
        Ok(())
    }

    async fn delete_remote_dir(&self, host: &str, directory: &Path) -> BatchResult<()> {
        if let Endpoint::Local = self.endpoint_for(host) {
            let _ = tokio::fs::remove_dir_all(directory).await;
            return Ok(());
        }
        self.run_ssh(host, &format!("rm -rf {}", shell_quote(directory)))
            .await?;
        Ok(())
    }

    async fn sync_with_exclusions(
        &self,
        src_dir: &Path,
        dest_dir: &Path,
        src_host: Option<&str>,
        dest_host: Option<&str>,
        exclude_files: &[PathBuf],
    ) -> BatchResult<()> {
        let (src_ep, dest_ep) = self.resolve_endpoints(src_host, dest_host)?;
        let mut args: Vec<String> = exclude_files
            .iter()
            .map(|f| format!("--exclude={}", f.display()))
            .collect();
        args.push(format!("{}/", Self::remote_spec(src_ep.host(), src_dir)));
        args.push(Self::remote_spec(dest_ep.host(), dest_dir));
        self.run_rsync(&args).await
    }

    async fn sync_selected(
        &self,
        src_dir: &Path,
        dest_dir: &Path,
        src_host: Option<&str>,
        dest_host: Option<&str>,
        include_files: &[PathBuf],
    ) -> BatchResult<()> {
        let (src_ep, dest_ep) = self.resolve_endpoints(src_host, dest_host)?;
        let mut args = vec!["--include=*/".to_string()];
        args.extend(include_files.iter().map(|f| format!("--include={}", f.display())));
        args.push("--exclude=*".to_string());
        args.push(format!("{}/", Self::remote_spec(src_ep.host(), src_dir)));
        args.push(Self::remote_spec(dest_ep.host(), dest_dir));
        self.run_rsync(&args).await
    }

    fn is_shared(&self, directory: &Path) -> bool {
        std::process::Command::new("df")
            .arg("-l")
            .arg(directory)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| !status.success())
            .unwrap_or(true)
    }
}

impl SshRemoteFs {
    fn resolve_endpoints(
        &self,
        src_host: Option<&str>,
        dest_host: Option<&str>,
    ) -> BatchResult<(Endpoint, Endpoint)> {
        let src_ep = src_host.map(|h| self.endpoint_for(h)).unwrap_or(Endpoint::Local);
        let dest_ep = dest_host.map(|h| self.endpoint_for(h)).unwrap_or(Endpoint::Local);
        if !src_ep.is_local() && !dest_ep.is_local() && src_ep != dest_ep {
            return Err(BatchError::BothEndpointsRemote);
        }
        Ok((src_ep, dest_ep))
    }
}

fn shell_quote(path: &Path) -> String {
    shlex::try_quote(&path.to_string_lossy())
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_submit_forces_local_endpoint() {
        unsafe {
            std::env::set_var(qq_core::constants::ENV_SHARED_SUBMIT, "true");
        }
        let fs = SshRemoteFs::new(Duration::from_secs(5), Duration::from_secs(30));
        assert_eq!(fs.endpoint_for("some-other-host"), Endpoint::Local);
        unsafe {
            std::env::remove_var(qq_core::constants::ENV_SHARED_SUBMIT);
        }
    }

    #[tokio::test]
    async fn local_read_write_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        let fs = SshRemoteFs::new(Duration::from_secs(5), Duration::from_secs(30));
        let host = SshRemoteFs::current_host();

        fs.write_remote_file(&host, &file, "hello").await.unwrap();
        let content = fs.read_remote_file(&host, &file).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn distinct_remote_endpoints_are_rejected() {
        let fs = SshRemoteFs::new(Duration::from_secs(5), Duration::from_secs(30));
        let result = fs
            .sync_with_exclusions(
                Path::new("/a"),
                Path::new("/b"),
                Some("host-a"),
                Some("host-b"),
                &[],
            )
            .await;
        assert!(matches!(result, Err(BatchError::BothEndpointsRemote)));
    }
}
