//! End-to-end command lifecycle tests
//!
//! These spawn real processes through the system shell, so they are gated
//! to Unix hosts.

#![cfg(unix)]

use std::time::{Duration, Instant};

use procflow::{CancellationToken, CommandError, Shell, StdioChannel};

fn sh(script: &str) -> (&'static str, Vec<String>) {
    ("sh", vec!["-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn echo_round_trip() {
    let shell = Shell::new(|options| {
        options.timeout(Duration::from_secs(5));
    });
    let (program, args) = sh("printf 'abcd\\n'");
    let mut command = shell.run(program, args).unwrap();
    let result = command.wait().await.unwrap();
    assert_eq!(result.exit_code(), 0);
    assert!(result.success());
    assert_eq!(result.standard_output().await.unwrap(), "abcd\n");
    assert_eq!(result.standard_error().await.unwrap(), "");
}

#[tokio::test]
async fn stdin_feeds_the_child() {
    let shell = Shell::default();
    let mut command = shell.run("cat", Vec::<String>::new()).unwrap();
    let stdin = command.standard_input().unwrap();
    stdin.write_line("abcd").await.unwrap();
    stdin.close().await;
    let result = command.wait().await.unwrap();
    assert_eq!(result.standard_output().await.unwrap(), "abcd\n");
}

#[tokio::test]
async fn timeout_kills_the_process() {
    let started = Instant::now();
    let shell = Shell::new(|options| {
        options.timeout(Duration::from_millis(50));
    });
    let mut command = shell.run("sleep", ["10"]).unwrap();
    let err = command.wait().await.unwrap_err();
    assert!(matches!(err, CommandError::Timeout { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    // Kill after the fact is safe and idempotent.
    command.kill();
    command.kill();
    // The cached outcome replays.
    let again = command.wait().await.unwrap_err();
    assert!(matches!(again, CommandError::Timeout { .. }));
}

#[tokio::test]
async fn pre_cancelled_token_fails_as_cancelled() {
    let token = CancellationToken::new();
    token.cancel();
    let shell = Shell::new(move |options| {
        options.cancellation_token(token.clone());
    });
    let (program, args) = sh("exit 0");
    let mut command = shell.run(program, args).unwrap();
    let err = command.wait().await.unwrap_err();
    assert!(matches!(err, CommandError::Cancelled), "got {err:?}");
}

#[tokio::test]
async fn cancellation_mid_run_kills_the_process() {
    let started = Instant::now();
    let token = CancellationToken::new();
    let shell = Shell::default();
    let mut command = shell
        .run_with("sleep", ["10"], |options| {
            options.cancellation_token(token.clone());
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    let err = command.wait().await.unwrap_err();
    assert!(matches!(err, CommandError::Cancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    command.kill();
}

#[tokio::test]
async fn writes_after_exit_are_quiet_no_ops() {
    let shell = Shell::default();
    let (program, args) = sh("exit 1");
    let mut command = shell.run(program, args).unwrap();
    let stdin = command.standard_input().unwrap();
    let result = command.wait().await.unwrap();
    assert_eq!(result.exit_code(), 1);
    stdin.write_line("").await.unwrap();
    stdin.write(&[b'x']).await.unwrap();
    stdin.flush().await.unwrap();
}

#[tokio::test]
async fn throw_on_error_promotes_the_exit_code() {
    let shell = Shell::new(|options| {
        options.throw_on_error(true);
    });
    let (program, args) = sh("exit 3");
    let mut command = shell.run(program, args).unwrap();
    let err = command.wait().await.unwrap_err();
    assert!(
        matches!(err, CommandError::ErrorExitCode { code: 3 }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn negative_exit_truncates_per_platform() {
    let shell = Shell::default();
    let (program, args) = sh("exit -1");
    let mut command = shell.run(program, args).unwrap();
    let result = command.wait().await.unwrap();
    // Windows reports -1 verbatim; POSIX truncates to the low 8 bits.
    assert!(
        result.exit_code() == -1 || result.exit_code() == 255,
        "got {}",
        result.exit_code()
    );
}

#[tokio::test]
async fn process_accessor_honors_dispose_on_exit() {
    let shell = Shell::default();
    let (program, args) = sh("exit 0");
    let mut command = shell.run(program, args).unwrap();
    assert!(matches!(
        command.process(),
        Err(CommandError::ProcessNotAccessible)
    ));
    // The pid was captured eagerly and survives dispose-on-exit.
    assert!(command.process_id().unwrap() > 0);
    command.wait().await.unwrap();
    assert!(command.process_id().unwrap() > 0);

    let (program, args) = sh("exit 0");
    let mut retained = shell
        .run_with(program, args, |options| {
            options.dispose_on_exit(false);
        })
        .unwrap();
    retained.wait().await.unwrap();
    let child = retained.process().unwrap();
    // After exit the completion task has released the lock.
    assert!(child.try_lock().is_ok());
}

#[tokio::test]
async fn merged_lines_preserve_per_stream_order() {
    let shell = Shell::default();
    let (program, args) = sh("echo o1; echo e1 1>&2; echo o2; echo e2 1>&2");
    let mut command = shell.run(program, args).unwrap();
    let merged = command.output_and_error_lines().unwrap();

    // Single-shot: a second enumeration fails.
    let err = command.output_and_error_lines().unwrap_err();
    assert!(matches!(err, CommandError::LinesAlreadyConsumed));

    let lines = merged.collect().await.unwrap();
    command.wait().await.unwrap();
    let outs: Vec<&str> = lines
        .iter()
        .filter(|l| l.channel == StdioChannel::Stdout)
        .map(|l| l.text.as_str())
        .collect();
    let errs: Vec<&str> = lines
        .iter()
        .filter(|l| l.channel == StdioChannel::Stderr)
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(outs, ["o1", "o2"]);
    assert_eq!(errs, ["e1", "e2"]);
    assert_eq!(lines.len(), 4);
}

#[tokio::test]
async fn attach_observes_a_foreign_exit() {
    let shell = Shell::default();
    let mut child = shell.run("sleep", ["5"]).unwrap();
    let pid = child.process_id().unwrap();

    let mut attached = shell.try_attach(pid).unwrap().expect("attach to live pid");
    assert_eq!(attached.process_id().unwrap(), pid);
    assert!(matches!(
        attached.standard_output(),
        Err(CommandError::StreamUnavailableOnAttached)
    ));
    assert!(matches!(
        attached.process(),
        Err(CommandError::ProcessUnavailableOnAttached)
    ));

    attached.kill();
    let result = attached.wait().await.unwrap();
    // A killed process reports no exit code.
    assert_eq!(result.exit_code(), -1);
    assert!(matches!(
        result.standard_output().await,
        Err(CommandError::StreamUnavailableOnAttached)
    ));

    let own = child.wait().await.unwrap();
    assert_eq!(own.exit_code(), -1);
}

#[tokio::test]
async fn graceful_shutdown_interrupts_then_waits() {
    let shell = Shell::default();
    // A shell that traps nothing dies to SIGINT promptly.
    let mut command = shell.run("sleep", ["30"]).unwrap();
    let started = Instant::now();
    let result = command.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(!result.success());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn signal_reports_false_once_the_process_is_gone() {
    let shell = Shell::default();
    let (program, args) = sh("exit 0");
    let mut command = shell.run(program, args).unwrap();
    command.wait().await.unwrap();
    let delivered = command
        .try_signal(procflow::ControlSignal::Interrupt)
        .await
        .unwrap();
    assert!(!delivered);
}
