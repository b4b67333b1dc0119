use livexec::{RunError, SessionManager, SubmitError};

use super::{fixture_program, scratch_files, test_config};

#[tokio::test]
async fn test_run_collects_output() {
    let config = test_config();
    let manager = SessionManager::new(config.clone());
    let result = manager
        .run(&fixture_program("print_two.sh"))
        .await
        .expect("Failed to run");

    assert_eq!(result.stdout, "2\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, Some(0));
    assert!(result.is_success());
    assert!(scratch_files(&config).is_empty());
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_run_reports_runtime_error() {
    let manager = SessionManager::new(test_config());
    let result = manager
        .run(&fixture_program("runtime_error.sh"))
        .await
        .expect("Failed to run");

    assert_eq!(result.stdout, "before\n");
    assert_eq!(result.stderr, "boom\n");
    assert_eq!(result.exit_code, Some(3));
}

#[tokio::test]
async fn test_run_stdin_is_at_eof() {
    let manager = SessionManager::new(test_config());
    let result = manager
        .run(&fixture_program("read_eof.sh"))
        .await
        .expect("Failed to run");
    assert_eq!(result.stdout, "eof\n");
}

#[tokio::test]
async fn test_run_times_out() {
    let config = test_config();
    let manager = SessionManager::new(config.clone());
    let err = manager
        .run(&fixture_program("infinite_loop.sh"))
        .await
        .expect_err("run should time out");

    assert!(matches!(err, RunError::Timeout { .. }));
    assert_eq!(
        err.to_string(),
        "time limit exceeded (the program did not finish within 1 seconds)"
    );
    assert!(scratch_files(&config).is_empty());
    assert_eq!(manager.status().running, 0);
}

#[tokio::test]
async fn test_run_rejects_empty_program() {
    let manager = SessionManager::new(test_config());
    assert!(matches!(
        manager.run(b"").await,
        Err(RunError::Submit(SubmitError::EmptySource))
    ));
}
