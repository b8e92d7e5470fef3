//! End-to-end tests for the agent binary's own wiring (CLI plumbing and the
//! filesystem/subprocess `ports` implementations it constructs).

use super::*;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn test_config(data_dir: &Path, stream_root: &Path, program_root: &Path) -> AgentConfig {
    AgentConfig {
        namespace: "ns".into(),
        application: "app".into(),
        data_dir: data_dir.to_path_buf(),
        polling_delay_seconds: 3600,
        stream_root: stream_root.to_path_buf(),
        dispatch_program_root: program_root.to_path_buf(),
    }
}

fn write_executable_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

#[tokio::test]
async fn schedule_then_state_reports_scheduled() {
    let temp = tempfile::tempdir().unwrap();
    let stream_root = temp.path().join("streams");
    std::fs::create_dir_all(&stream_root).unwrap();
    std::fs::write(stream_root.join("logs"), b"").unwrap();

    let config = test_config(&temp.path().join("data"), &stream_root, &temp.path().join("programs"));
    let registry = build_registry(&config).unwrap();

    run_command(
        &config,
        registry.clone(),
        Command::Schedule {
            program: "prog".into(),
            program_type: "batch".into(),
            schedule_name: "sched".into(),
            stream: "logs".into(),
            trigger_mb: 1,
        },
    )
    .await
    .unwrap();

    let state = registry
        .state(&program_ref(&config, "prog"), &ProgramType("batch".into()), "sched")
        .await;
    assert_eq!(state, scheduler_core::ScheduleState::Scheduled);
}

#[tokio::test]
async fn suspend_then_delete_removes_the_schedule() {
    let temp = tempfile::tempdir().unwrap();
    let stream_root = temp.path().join("streams");
    std::fs::create_dir_all(&stream_root).unwrap();
    std::fs::write(stream_root.join("logs"), b"").unwrap();

    let config = test_config(&temp.path().join("data"), &stream_root, &temp.path().join("programs"));
    let registry = build_registry(&config).unwrap();

    run_command(
        &config,
        registry.clone(),
        Command::Schedule {
            program: "prog".into(),
            program_type: "batch".into(),
            schedule_name: "sched".into(),
            stream: "logs".into(),
            trigger_mb: 1,
        },
    )
    .await
    .unwrap();

    run_command(
        &config,
        registry.clone(),
        Command::Suspend {
            program: "prog".into(),
            program_type: "batch".into(),
            schedule_name: "sched".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(
        registry
            .state(&program_ref(&config, "prog"), &ProgramType("batch".into()), "sched")
            .await,
        scheduler_core::ScheduleState::Suspended
    );

    run_command(
        &config,
        registry.clone(),
        Command::Delete {
            program: "prog".into(),
            program_type: "batch".into(),
            schedule_name: "sched".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(
        registry
            .state(&program_ref(&config, "prog"), &ProgramType("batch".into()), "sched")
            .await,
        scheduler_core::ScheduleState::NotFound
    );
}

#[tokio::test]
async fn subprocess_dispatcher_reports_refire_on_exit_code_75() {
    let temp = tempfile::tempdir().unwrap();
    let program_dir = temp.path().join("programs").join("batch");
    std::fs::create_dir_all(&program_dir).unwrap();
    write_executable_script(&program_dir.join("prog"), "exit 75");

    let dispatcher = infra::SubprocessDispatcher::new(temp.path().join("programs"));
    let args = scheduler_core::ports::DispatchArgs {
        schedule_name: "sched".into(),
        logical_start_time: 100,
        run_data_size: 2_000_000,
        past_run_logical_start_time: 0,
        past_run_data_size: 0,
    };

    let err = dispatcher
        .run("ns:app:prog", &ProgramType("batch".into()), &args)
        .await
        .unwrap_err();
    assert!(err.refire_immediately);
}

#[tokio::test]
async fn subprocess_dispatcher_receives_dispatch_args_as_env_vars() {
    let temp = tempfile::tempdir().unwrap();
    let program_dir = temp.path().join("programs").join("batch");
    std::fs::create_dir_all(&program_dir).unwrap();
    let out_file = temp.path().join("seen_run_data_size");
    write_executable_script(
        &program_dir.join("prog"),
        &format!("echo -n \"$runDataSize\" > {}", out_file.display()),
    );

    let dispatcher = infra::SubprocessDispatcher::new(temp.path().join("programs"));
    let args = scheduler_core::ports::DispatchArgs {
        schedule_name: "sched".into(),
        logical_start_time: 100,
        run_data_size: 2_000_000,
        past_run_logical_start_time: 0,
        past_run_data_size: 0,
    };

    dispatcher
        .run("ns:app:prog", &ProgramType("batch".into()), &args)
        .await
        .unwrap();

    let seen = std::fs::read_to_string(&out_file).unwrap();
    assert_eq!(seen, "2000000");
}
