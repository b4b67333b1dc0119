use std::time::Duration;

use livexec::{ServerMessage, SessionManager, TerminalStatus};

use super::{collect, eventually, fixture_program, scratch_files, test_config};

#[tokio::test]
async fn test_scratch_file_removed_after_finish() {
    let config = test_config();
    let manager = SessionManager::new(config.clone());
    let ticket = manager
        .submit(&fixture_program("print_two.sh"))
        .await
        .expect("Failed to submit");

    let files = scratch_files(&config);
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0].extension().and_then(|e| e.to_str()),
        Some("sh")
    );

    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");
    collect(&mut channel).await;

    assert!(scratch_files(&config).is_empty());
    assert!(manager.session(ticket.session_id).is_none());
    assert_eq!(manager.status().running, 0);
}

#[tokio::test]
async fn test_scratch_file_removed_after_cancel() {
    let config = test_config();
    let manager = SessionManager::new(config.clone());
    let ticket = manager
        .submit(&fixture_program("echo_input.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    channel.send_line("exit").await.expect("Failed to send");
    collect(&mut channel).await;
    assert!(scratch_files(&config).is_empty());
}

#[tokio::test]
async fn test_unattached_session_expires() {
    let mut config = test_config();
    config.attach_timeout = 0.2;
    let manager = SessionManager::new(config.clone());
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");

    eventually(|| manager.session(ticket.session_id).is_none()).await;
    assert!(scratch_files(&config).is_empty());
    assert!(manager.attach(ticket.session_id).is_err());
}

#[tokio::test]
async fn test_output_before_attach_is_kept() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("print_two.sh"))
        .await
        .expect("Failed to submit");

    // The program is long done by the time the client shows up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");
    assert_eq!(
        collect(&mut channel).await,
        vec![
            ServerMessage::Stdout("2".into()),
            ServerMessage::Terminal(TerminalStatus::Finished),
        ]
    );
}

#[tokio::test]
async fn test_spawn_failure_leaves_nothing_behind() {
    let mut config = test_config();
    config.interpreter.program = "livexec-definitely-missing-binary".to_string();
    config.guard.enabled = false;
    let manager = SessionManager::new(config.clone());

    assert!(manager.submit(&fixture_program("print_two.sh")).await.is_err());
    assert!(scratch_files(&config).is_empty());
    assert!(manager.registry().is_empty());
}
