use std::time::{Duration, Instant};

use livexec::{Config, ServerMessage, SessionManager, TerminalStatus};
use nix::sys::signal::kill;
use nix::unistd::Pid;

use super::{collect, eventually, fixture_program, scratch_files, test_config};

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Submit a program that never ends and never attach to it
async fn assert_budget_enforced_unattached(mut config: Config) {
    config.attach_timeout = 30.0;
    let manager = SessionManager::new(config.clone());
    let started = Instant::now();
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");
    let pid = manager
        .session(ticket.session_id)
        .and_then(|info| info.pid)
        .expect("Session should have a pid");

    eventually(|| manager.session(ticket.session_id).is_none()).await;
    assert!(started.elapsed() < config.backstop_deadline() + Duration::from_secs(2));
    assert!(!process_alive(pid));
    assert!(scratch_files(&config).is_empty());
    assert_eq!(manager.status().running, 0);
    assert!(manager.attach(ticket.session_id).is_err());
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let config = test_config();
    let manager = SessionManager::new(config.clone());
    let started = Instant::now();
    let ticket = manager
        .submit(&fixture_program("infinite_loop.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    let messages = collect(&mut channel).await;
    assert_eq!(
        messages,
        vec![ServerMessage::Terminal(TerminalStatus::TimedOut)]
    );
    assert!(started.elapsed() >= config.time_limit());
    assert!(scratch_files(&config).is_empty());
    assert_eq!(manager.status().running, 0);
}

#[tokio::test]
async fn test_backstop_without_guard() {
    let mut config = test_config();
    config.guard.enabled = false;
    config.time_limit = 0.5;
    let manager = SessionManager::new(config);
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    let started = Instant::now();
    let messages = collect(&mut channel).await;
    assert_eq!(
        messages,
        vec![ServerMessage::Terminal(TerminalStatus::TimedOut)]
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_output_before_timeout_is_relayed() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(b"echo start\nwhile true; do :; done\n")
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    let messages = collect(&mut channel).await;
    assert_eq!(
        messages,
        vec![
            ServerMessage::Stdout("start".into()),
            ServerMessage::Terminal(TerminalStatus::TimedOut),
        ]
    );
}

#[tokio::test]
async fn test_budget_enforced_before_attach() {
    assert_budget_enforced_unattached(test_config()).await;
}

#[tokio::test]
async fn test_budget_enforced_before_attach_without_guard() {
    let mut config = test_config();
    config.guard.enabled = false;
    config.time_limit = 0.5;
    assert_budget_enforced_unattached(config).await;
}

#[tokio::test]
async fn test_exit_before_attach_is_reported() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("runtime_error.sh"))
        .await
        .expect("Failed to submit");

    // The exit is observed and kept while nobody is attached.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let info = manager
        .session(ticket.session_id)
        .expect("Session should still be registered");
    assert!(info.attachable);
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");
    let messages = collect(&mut channel).await;
    assert!(messages.contains(&ServerMessage::Stdout("before".into())));
    assert!(messages.contains(&ServerMessage::Stderr("boom".into())));
    assert_eq!(
        messages.last(),
        Some(&ServerMessage::Terminal(TerminalStatus::Finished))
    );
}
