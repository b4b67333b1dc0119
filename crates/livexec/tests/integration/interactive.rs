use livexec::{AttachError, ServerMessage, SessionId, SessionManager, TerminalStatus};

use super::{collect, eventually, fixture_program, test_config};

#[tokio::test]
async fn test_output_then_finished() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("print_two.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    let messages = collect(&mut channel).await;
    assert_eq!(
        messages,
        vec![
            ServerMessage::Stdout("2".into()),
            ServerMessage::Terminal(TerminalStatus::Finished),
        ]
    );
}

#[tokio::test]
async fn test_input_reaches_program() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("greet.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    assert_eq!(
        channel.recv().await,
        Some(ServerMessage::Stdout("name?".into()))
    );
    channel.send_line("ana").await.expect("Failed to send");

    let messages = collect(&mut channel).await;
    assert_eq!(
        messages,
        vec![
            ServerMessage::Stdout("hello ana".into()),
            ServerMessage::Terminal(TerminalStatus::Finished),
        ]
    );
}

#[tokio::test]
async fn test_sentinel_cancels_session() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("echo_input.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    channel.send_line("1").await.expect("Failed to send");
    assert_eq!(
        channel.recv().await,
        Some(ServerMessage::Stdout("got 1".into()))
    );

    channel.send_line("exit").await.expect("Failed to send");
    let messages = collect(&mut channel).await;
    assert_eq!(
        messages.last(),
        Some(&ServerMessage::Terminal(TerminalStatus::Cancelled))
    );
    // The sentinel never reaches the program.
    assert!(!messages.contains(&ServerMessage::Stdout("got exit".into())));
    assert!(manager.session(ticket.session_id).is_none());
}

#[tokio::test]
async fn test_runtime_error_reports_finished() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("runtime_error.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    let messages = collect(&mut channel).await;
    assert!(messages.contains(&ServerMessage::Stdout("before".into())));
    assert!(messages.contains(&ServerMessage::Stderr("boom".into())));
    assert_eq!(
        messages.last(),
        Some(&ServerMessage::Terminal(TerminalStatus::Finished))
    );
    let terminals = messages.iter().filter(|m| m.is_terminal()).count();
    assert_eq!(terminals, 1);
}

#[tokio::test]
async fn test_unknown_session_is_invalid() {
    let manager = SessionManager::new(test_config());
    let err = manager
        .attach(SessionId(999_999))
        .expect_err("attach should fail");
    assert!(matches!(err, AttachError::UnknownSession(_)));
    assert_eq!(err.terminal(), TerminalStatus::InvalidSession);
}

#[tokio::test]
async fn test_second_attach_rejected() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");
    let _channel = manager.attach(ticket.session_id).expect("Failed to attach");

    assert!(matches!(
        manager.attach(ticket.session_id),
        Err(AttachError::AlreadyAttached(_))
    ));
    assert!(manager.cancel(ticket.session_id));
}

#[tokio::test]
async fn test_external_cancel() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");
    let mut channel = manager.attach(ticket.session_id).expect("Failed to attach");

    assert!(manager.cancel(ticket.session_id));
    let messages = collect(&mut channel).await;
    assert_eq!(
        messages,
        vec![ServerMessage::Terminal(TerminalStatus::Cancelled)]
    );
}

#[tokio::test]
async fn test_dropped_channel_cancels_session() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");
    let channel = manager.attach(ticket.session_id).expect("Failed to attach");

    drop(channel);
    eventually(|| manager.session(ticket.session_id).is_none()).await;
    assert_eq!(manager.status().running, 0);
}

#[tokio::test]
async fn test_session_info_while_running() {
    let manager = SessionManager::new(test_config());
    let ticket = manager
        .submit(&fixture_program("sleep_forever.sh"))
        .await
        .expect("Failed to submit");

    let info = manager.session(ticket.session_id).expect("session should exist");
    assert_eq!(info.id, ticket.session_id);
    assert_eq!(info.sequence, ticket.sequence);
    assert!(info.pid.is_some());
    assert!(info.attachable);

    let _channel = manager.attach(ticket.session_id).expect("Failed to attach");
    assert!(!manager.session(ticket.session_id).unwrap().attachable);
    manager.cancel(ticket.session_id);
}
