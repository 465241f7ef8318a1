//! End-to-end coverage of submission and execution against the virtual
//! backend: no external scheduler, no real SSH/rsync hop, fully local.

use std::collections::BTreeMap;
use std::path::PathBuf;

use qq_batch::VirtualBackend;
use qq_core::Config;
use qq_core::JobType;
use qq_core::LoopInfo;
use qq_core::NaiveState;
use qq_core::Record;
use qq_core::Resources;
use qq_core::WorkDir;
use qq_runtime::Informer;
use qq_runtime::Runner;
use qq_runtime::SubmitOptions;
use qq_runtime::Submitter;
use tempfile::tempdir;

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/usr/bin/env -S qq run\n{body}")).unwrap();
    path
}

fn sample_record(input_dir: PathBuf, work_dir: Option<WorkDir>) -> Record {
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
        resources: Resources { work_dir, ..Default::default() },
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
async fn submit_writes_a_record_reflecting_merged_options() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "job.sh", "# qq ncpus=2\necho hi\n");

    let backend = VirtualBackend::new();
    let submitter = Submitter::new(&backend, "9.9.9");

    let mut options = SubmitOptions::default();
    options.resources.work_dir = Some(WorkDir::InputDir);
    let record_path = submitter.submit(&script, options, true).await.unwrap();

    assert!(record_path.exists());
    let record = Record::load(&record_path).unwrap();
    assert_eq!(record.script_name, "job.sh");
    assert_eq!(record.batch_system, "vbs");
    assert_eq!(record.qq_version, "9.9.9");
    assert_eq!(record.resources.ncpus, Some(2));
    assert_eq!(record.job_state, NaiveState::Queued);
}

#[tokio::test]
async fn submit_rejects_a_script_without_the_qq_run_shebang() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("bad.sh");
    std::fs::write(&script, "#!/bin/bash\necho hi\n").unwrap();

    let backend = VirtualBackend::new();
    let submitter = Submitter::new(&backend, "9.9.9");
    let err = submitter.submit(&script, SubmitOptions::default(), true).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn runner_executes_the_script_and_marks_the_record_finished() {
    let dir = tempdir().unwrap();
    write_script(dir.path(), "run.sh", "touch marker\nexit 0\n");
    let record_path = dir.path().join("run.sh.qqinfo");
    sample_record(dir.path().to_path_buf(), Some(WorkDir::InputDir)).save(&record_path).unwrap();

    let backend = VirtualBackend::new();
    let runner = Runner::new(&backend);
    let exit_code = runner.run(&record_path).await.unwrap();

    assert_eq!(exit_code, 0);
    assert!(dir.path().join("marker").exists());

    let record = Record::load(&record_path).unwrap();
    assert_eq!(record.job_state, NaiveState::Finished);
    assert_eq!(record.job_exit_code, Some(0));
    assert_eq!(record.work_dir, Some(dir.path().to_path_buf()));
}

#[tokio::test]
async fn runner_marks_the_record_failed_on_a_nonzero_exit_code() {
    let dir = tempdir().unwrap();
    write_script(dir.path(), "run.sh", "exit 3\n");
    let record_path = dir.path().join("run.sh.qqinfo");
    sample_record(dir.path().to_path_buf(), Some(WorkDir::InputDir)).save(&record_path).unwrap();

    let backend = VirtualBackend::new();
    let runner = Runner::new(&backend);
    let exit_code = runner.run(&record_path).await.unwrap();

    assert_eq!(exit_code, 3);
    let record = Record::load(&record_path).unwrap();
    assert_eq!(record.job_state, NaiveState::Failed);
    assert_eq!(record.job_exit_code, Some(3));
}

#[tokio::test]
async fn runner_skips_execution_for_a_job_already_marked_killed() {
    let dir = tempdir().unwrap();
    write_script(dir.path(), "run.sh", "touch marker\n");
    let record_path = dir.path().join("run.sh.qqinfo");
    let mut record = sample_record(dir.path().to_path_buf(), Some(WorkDir::InputDir));
    record.job_state = NaiveState::Killed;
    record.save(&record_path).unwrap();

    let backend = VirtualBackend::new();
    let runner = Runner::new(&backend);
    let exit_code = runner.run(&record_path).await.unwrap();

    assert_eq!(exit_code, 128 + libc::SIGTERM);
    assert!(!dir.path().join("marker").exists());
}

#[tokio::test]
async fn runner_does_not_resubmit_past_the_final_loop_cycle() {
    let dir = tempdir().unwrap();
    write_script(dir.path(), "run.sh", "exit 0\n");
    let archive = dir.path().join("archive");
    std::fs::create_dir_all(&archive).unwrap();

    let record_path = dir.path().join("run.sh.qqinfo");
    let mut record = sample_record(dir.path().to_path_buf(), Some(WorkDir::InputDir));
    record.job_type = JobType::Loop;
    record.loop_info = Some(
        LoopInfo::new(0, 3, archive, Config::global().loop_jobs.pattern.clone(), Some(3), Some(dir.path())).unwrap(),
    );
    record.save(&record_path).unwrap();

    let backend = VirtualBackend::new();
    let runner = Runner::new(&backend);
    let exit_code = runner.run(&record_path).await.unwrap();

    assert_eq!(exit_code, 0);
    let record = Record::load(&record_path).unwrap();
    assert_eq!(record.job_state, NaiveState::Finished);
}
